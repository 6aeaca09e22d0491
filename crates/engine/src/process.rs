//! Shell-backed [`CommandRunner`].
//!
//! Waiting commands run under Tokio so the timeout can kill the child; the
//! executor calls in from its worker thread through
//! [`block_on_future`](autostep_util::block_on_future). Fire-and-forget
//! commands are spawned with `std::process` and left running; a reaper
//! thread waits on each one so finished children do not linger as zombies.

use std::{
    path::PathBuf,
    process::{Command as StdCommand, Stdio},
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use autostep_util::block_on_future;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::services::{CommandOutcome, CommandOutput, CommandRunner};

#[cfg(windows)]
const SHELL: (&str, &str) = ("cmd", "/C");
#[cfg(not(windows))]
const SHELL: (&str, &str) = ("sh", "-c");

/// Runs commands through the platform shell (`sh -c` or `cmd /C`).
#[derive(Debug, Clone, Default)]
pub struct ShellCommandRunner {
    working_dir: Option<PathBuf>,
}

impl ShellCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs commands from `dir` instead of the process working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn spawn_detached(&self, command: &str) -> Result<CommandOutcome> {
        let (shell, flag) = SHELL;
        let mut process = StdCommand::new(shell);
        process
            .arg(flag)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &self.working_dir {
            process.current_dir(dir);
        }
        let mut child = process.spawn().context("failed to launch detached command")?;
        let pid = child.id();
        debug!(pid, "command detached");
        let reaper = thread::Builder::new().name(format!("autostep-reap-{pid}")).spawn(move || {
            if let Ok(status) = child.wait() {
                debug!(pid, %status, "detached command exited");
            }
        });
        if let Err(error) = reaper {
            warn!(pid, %error, "failed to start reaper for detached command");
        }
        Ok(CommandOutcome::Detached)
    }
}

impl CommandRunner for ShellCommandRunner {
    fn run(&self, command: &str, timeout: Duration, wait: bool) -> Result<CommandOutcome> {
        if !wait {
            return self.spawn_detached(command);
        }

        let command = command.to_string();
        let working_dir = self.working_dir.clone();
        block_on_future(async move {
            let (shell, flag) = SHELL;
            let mut process = Command::new(shell);
            process
                .arg(flag)
                .arg(&command)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            if let Some(dir) = working_dir {
                process.current_dir(dir);
            }

            let child = process.spawn().context("failed to launch command")?;
            match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(output) => {
                    let output = output.context("failed to collect command output")?;
                    Ok(CommandOutcome::Completed(CommandOutput {
                        exit_code: output.status.code(),
                        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    }))
                }
                // Dropping the wait future drops the child, which kills it.
                Err(_) => Ok(CommandOutcome::TimedOut),
            }
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn runner() -> ShellCommandRunner {
        ShellCommandRunner::new()
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let outcome = runner().run("echo hello", Duration::from_secs(5), true).expect("run");
        let CommandOutcome::Completed(output) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn reports_non_zero_exit_with_stderr() {
        let outcome = runner().run("echo broken >&2; exit 3", Duration::from_secs(5), true).expect("run");
        let CommandOutcome::Completed(output) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr.trim(), "broken");
    }

    #[test]
    fn times_out_long_commands() {
        let outcome = runner().run("sleep 5", Duration::from_millis(200), true).expect("run");
        assert_eq!(outcome, CommandOutcome::TimedOut);
    }

    #[test]
    fn detached_commands_return_immediately() {
        let outcome = runner().run("sleep 1", Duration::from_secs(1), false).expect("run");
        assert_eq!(outcome, CommandOutcome::Detached);
    }

    #[cfg(target_os = "linux")]
    fn zombie_children_named(name: &str) -> usize {
        let parent = std::process::id().to_string();
        std::fs::read_dir("/proc")
            .expect("read /proc")
            .filter_map(|entry| std::fs::read_to_string(entry.ok()?.path().join("stat")).ok())
            .filter(|stat| {
                let Some((head, tail)) = stat.rsplit_once(')') else {
                    return false;
                };
                let comm = head.split_once('(').map(|(_, comm)| comm).unwrap_or_default();
                let mut fields = tail.split_whitespace();
                let state = fields.next();
                let ppid = fields.next();
                comm == name && state == Some("Z") && ppid == Some(parent.as_str())
            })
            .count()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn finished_detached_commands_are_reaped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("reapcheck");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        let command = format!("exec {}", script.display());

        for _ in 0..5 {
            let outcome = runner().run(&command, Duration::from_secs(1), false).expect("run");
            assert_eq!(outcome, CommandOutcome::Detached);
        }
        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(zombie_children_named("reapcheck"), 0);
    }

    #[test]
    fn honours_working_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outcome = runner()
            .with_working_dir(dir.path())
            .run("pwd", Duration::from_secs(5), true)
            .expect("run");
        let CommandOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        let reported = std::fs::canonicalize(output.stdout.trim()).expect("canonical pwd");
        assert_eq!(reported, std::fs::canonicalize(dir.path()).expect("canonical dir"));
    }
}
