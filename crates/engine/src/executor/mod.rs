//! Step executor: performs one validated step against the desktop services.
//!
//! - `image_search` owns the template retry loop and click-point math
//! - `schedule` owns wall-clock waits
//! - `keys` parses `key` step chords
//! - `errors` defines [`ExecutionError`] and [`StepExecutionFailure`]
//!
//! The executor never decides whether a step runs; disabled steps and
//! cancellation between steps are the run controller's concern.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use autostep_types::{CommandSpec, ImageTarget, Point, Step, StepAction, WaitSpec};
use autostep_util::{redact_sensitive, resolve_against};
use tracing::{debug, info};

use crate::{
    command_safety::check_command,
    run::RunObserver,
    services::{CommandOutcome, CommandRunner, InputSynthesizer, ScreenLocator},
};

mod errors;
mod image_search;
pub mod keys;
pub mod schedule;

pub use errors::{ExecutionError, StepExecutionFailure};
pub use keys::KeyChord;

const COPY_CHORD: [&str; 2] = ["ctrl", "c"];
const PASTE_CHORD: [&str; 2] = ["ctrl", "v"];

/// Converts validated seconds into a `Duration`, saturating on overflow.
pub(crate) fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

/// Per-run state a step may consult while it executes.
pub struct StepContext<'a> {
    /// Monitor searched by image steps.
    pub monitor_index: usize,
    pub cancel_flag: &'a AtomicBool,
    pub observer: &'a dyn RunObserver,
}

impl StepContext<'_> {
    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }
}

/// How a step that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    /// A scheduled wait observed a cancellation request.
    Cancelled,
}

/// Dispatches steps to the screen, input, and command services.
pub struct StepExecutor {
    locator: Arc<dyn ScreenLocator>,
    input: Arc<dyn InputSynthesizer>,
    commands: Arc<dyn CommandRunner>,
    asset_root: Option<PathBuf>,
}

impl StepExecutor {
    pub fn new(locator: Arc<dyn ScreenLocator>, input: Arc<dyn InputSynthesizer>, commands: Arc<dyn CommandRunner>) -> Self {
        Self {
            locator,
            input,
            commands,
            asset_root: None,
        }
    }

    /// Resolves relative template paths against `root` (usually the step
    /// file's directory) instead of the working directory.
    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = Some(root.into());
        self
    }

    /// Executes `step`, the entry at `step_index` in the full sequence.
    pub fn execute(&self, step_index: usize, step: &Step, context: &StepContext<'_>) -> Result<StepOutcome, StepExecutionFailure> {
        self.dispatch(step_index, step.action(), context)
            .map_err(|source| StepExecutionFailure {
                step_index,
                kind: step.kind(),
                source,
            })
    }

    fn dispatch(&self, step_index: usize, action: &StepAction, context: &StepContext<'_>) -> Result<StepOutcome, ExecutionError> {
        match action {
            StepAction::ImageClick(target) => {
                let point = self.locate(target, Point::default(), context)?;
                self.input.click(point, target.click_type).map_err(ExecutionError::input)?;
            }
            StepAction::ImageOffsetClick { target, offset } => {
                let point = self.locate(target, *offset, context)?;
                self.input.click(point, target.click_type).map_err(ExecutionError::input)?;
            }
            StepAction::CoordClick { point, click_type } => {
                debug!(step_index, %point, click_type = click_type.as_str(), "clicking coordinate");
                self.input.click(*point, *click_type).map_err(ExecutionError::input)?;
            }
            StepAction::CoordDrag { from, to, duration_secs } => {
                debug!(step_index, %from, %to, duration_secs, "dragging");
                self.input.move_to(*from).map_err(ExecutionError::input)?;
                self.input.drag_to(*to, seconds(*duration_secs)).map_err(ExecutionError::input)?;
            }
            StepAction::Sleep(WaitSpec::Sleep { seconds: wait_secs }) => {
                debug!(step_index, seconds = wait_secs, "sleeping");
                thread::sleep(seconds(*wait_secs));
            }
            StepAction::Sleep(WaitSpec::Scheduled { target_time }) => {
                return schedule::wait_until(step_index, target_time, context);
            }
            StepAction::Key { key } => {
                let chord = KeyChord::parse(key)?;
                debug!(step_index, keys = ?chord.keys(), "pressing keys");
                if chord.is_single() {
                    self.input.press(&chord.keys()[0]).map_err(ExecutionError::input)?;
                } else {
                    self.input.hotkey(&chord.keys()).map_err(ExecutionError::input)?;
                }
            }
            StepAction::Copy => {
                self.input.hotkey(&COPY_CHORD).map_err(ExecutionError::input)?;
            }
            StepAction::Paste => {
                self.input.hotkey(&PASTE_CHORD).map_err(ExecutionError::input)?;
            }
            StepAction::CustomText { text } => {
                debug!(step_index, chars = text.chars().count(), "pasting text");
                self.input.set_clipboard(text).map_err(ExecutionError::input)?;
                self.input.hotkey(&PASTE_CHORD).map_err(ExecutionError::input)?;
            }
            StepAction::CmdCommand(spec) => self.run_command(step_index, spec)?,
            StepAction::RepeatStart { count } => {
                debug!(step_index, count, "entering loop region");
            }
            StepAction::RepeatEnd => {
                debug!(step_index, "loop iteration finished");
            }
        }
        Ok(StepOutcome::Completed)
    }

    fn locate(&self, target: &ImageTarget, offset: Point, context: &StepContext<'_>) -> Result<Point, ExecutionError> {
        let template_path = resolve_against(self.asset_root.as_deref(), &target.image_path);
        image_search::locate(self.locator.as_ref(), &template_path, target, offset, context.monitor_index)
    }

    fn run_command(&self, step_index: usize, spec: &CommandSpec) -> Result<(), ExecutionError> {
        check_command(&spec.command)?;

        let redacted = redact_sensitive(&spec.command);
        info!(step_index, command = %redacted, wait = spec.wait, timeout_secs = spec.timeout_secs, "running command");

        let outcome = self
            .commands
            .run(&spec.command, seconds(spec.timeout_secs), spec.wait)
            .map_err(|error| ExecutionError::Launch {
                command: redacted.clone(),
                message: format!("{error:#}"),
            })?;

        match outcome {
            CommandOutcome::Completed(output) if output.success() => {
                debug!(step_index, stdout_bytes = output.stdout.len(), "command finished");
                Ok(())
            }
            CommandOutcome::Completed(output) => Err(ExecutionError::Command {
                command: redacted,
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            }),
            CommandOutcome::TimedOut => Err(ExecutionError::Timeout {
                command: redacted,
                timeout_secs: spec.timeout_secs,
            }),
            CommandOutcome::Detached => {
                debug!(step_index, "command left running");
                Ok(())
            }
        }
    }
}
