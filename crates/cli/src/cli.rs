use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use autostep_engine::{
    ExecutionPlan, RunController, RunOptions, ShellCommandRunner, StepDocument, StepExecutor, expand_plan, expand_plan_from,
    load_step_file,
};
use autostep_types::{RunEvent, RunProgress, RunStatus, Step};
use autostep_util::{EngineSettings, SettingsStore};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "autostep", version, about = "Replay recorded desktop automation steps")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that a step file loads and its loops are balanced
    Validate(ValidateArgs),
    /// Print the expanded execution plan of a step file
    Plan(PlanArgs),
    /// Replay a step file on this desktop
    Run(RunArgs),
    /// Show or change the saved defaults
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the settings file location and its values
    Show,
    /// Change one setting and save it
    Set(SetArgs),
}

#[derive(Debug, Args)]
struct SetArgs {
    #[arg(value_enum)]
    key: SettingKey,
    /// New value; an empty log filter clears it
    value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SettingKey {
    /// Monitor searched by image steps when `run` gets no `--monitor`
    Monitor,
    /// Log filter used when `RUST_LOG` is unset
    LogFilter,
}

#[derive(Debug, Args)]
struct ValidateArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
}

#[derive(Debug, Args)]
struct PlanArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Expand from this step index instead of the first step
    #[arg(long, default_value_t = 0)]
    from: usize,
    /// Emit the plan as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Monitor searched by image steps; defaults to the settings file value
    #[arg(long)]
    monitor: Option<usize>,
    /// Start the run at this step index
    #[arg(long, default_value_t = 0)]
    from: usize,
}

impl Cli {
    pub async fn run(self, store: SettingsStore) -> Result<()> {
        match self.command {
            Command::Validate(args) => validate(&args.file),
            Command::Plan(args) => print_plan(&args),
            Command::Run(args) => run_steps(args, &store.settings()).await,
            Command::Config(ConfigCommand::Show) => show_settings(&store),
            Command::Config(ConfigCommand::Set(args)) => set_setting(&store, args.key, &args.value),
        }
    }
}

fn show_settings(store: &SettingsStore) -> Result<()> {
    if store.is_persistent() {
        println!("# {}", store.path().display());
    } else {
        println!("# settings file unavailable; showing defaults");
    }
    println!("{}", serde_json::to_string_pretty(&store.settings())?);
    Ok(())
}

fn set_setting(store: &SettingsStore, key: SettingKey, value: &str) -> Result<()> {
    if !store.is_persistent() {
        bail!("settings file unavailable; nothing can be saved");
    }
    let value = value.trim();
    match key {
        SettingKey::Monitor => {
            let index: usize = value
                .parse()
                .with_context(|| format!("monitor must be a non-negative index, found '{value}'"))?;
            store.update(|settings| settings.monitor_index = index)?;
        }
        SettingKey::LogFilter => {
            let filter = if value.is_empty() {
                None
            } else {
                EnvFilter::try_new(value).with_context(|| format!("invalid log filter '{value}'"))?;
                Some(value.to_string())
            };
            store.update(|settings| settings.log_filter = filter)?;
        }
    }
    info!(path = %store.path().display(), ?key, "settings saved");
    Ok(())
}

fn load(path: &Path) -> Result<StepDocument> {
    load_step_file(path).with_context(|| format!("failed to load step file {}", path.display()))
}

fn validate(path: &Path) -> Result<()> {
    let document = load(path)?;
    let plan = expand_plan(&document.steps).with_context(|| format!("{} has unbalanced loops", path.display()))?;
    println!(
        "{}: {} step(s), {} plan entries, {} enabled",
        path.display(),
        document.steps.len(),
        plan.len(),
        plan.enabled_count(&document.steps)
    );
    Ok(())
}

fn print_plan(args: &PlanArgs) -> Result<()> {
    let document = load(&args.file)?;
    let plan = expand_plan_from(&document.steps, args.from)?;
    if args.json {
        let rendered = serde_json::to_string_pretty(&plan_as_json(&document.steps, &plan))?;
        println!("{rendered}");
    } else {
        for line in render_plan(&document.steps, &plan) {
            println!("{line}");
        }
    }
    Ok(())
}

fn render_plan(steps: &[Step], plan: &ExecutionPlan) -> Vec<String> {
    plan.iter()
        .enumerate()
        .map(|(position, entry)| {
            let step = &steps[entry.step_index];
            let indent = "  ".repeat(entry.nest_level);
            let disabled = if step.is_enabled() { "" } else { " (disabled)" };
            let comment = if step.comment().is_empty() {
                String::new()
            } else {
                format!("  # {}", step.comment())
            };
            format!("{position:>4}  {indent}[{}] {}{disabled}{comment}", entry.step_index, step.kind())
        })
        .collect()
}

fn plan_as_json(steps: &[Step], plan: &ExecutionPlan) -> serde_json::Value {
    let entries: Vec<_> = plan
        .iter()
        .map(|entry| {
            let step = &steps[entry.step_index];
            json!({
                "step_index": entry.step_index,
                "nest_level": entry.nest_level,
                "type": step.kind(),
                "enabled": step.is_enabled(),
            })
        })
        .collect();
    json!({
        "entries": entries,
        "total_valid_count": plan.enabled_count(steps),
    })
}

async fn run_steps(args: RunArgs, settings: &EngineSettings) -> Result<()> {
    let document = load(&args.file)?;
    let (locator, input) = desktop_services()?;

    let mut executor = StepExecutor::new(locator, input, Arc::new(ShellCommandRunner::new()));
    if let Some(root) = args.file.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        executor = executor.with_asset_root(root);
    }
    let controller = RunController::new(executor);
    let options = RunOptions {
        monitor_index: args.monitor.unwrap_or(settings.monitor_index),
        start_index: args.from,
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<RunEvent>();
    let handle = controller.start_run_with_observer(&document.steps, options, Arc::new(events_tx))?;
    let canceller = handle.canceller();
    let worker = tokio::task::spawn_blocking(move || handle.wait());

    let mut cancel_requested = false;
    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            signal = tokio::signal::ctrl_c(), if !cancel_requested => {
                if let Err(error) = signal {
                    warn!(%error, "failed to listen for Ctrl-C");
                }
                info!("cancellation requested");
                canceller.cancel();
                cancel_requested = true;
            }
        }
    }

    let progress = worker.await.context("run worker task failed")?;
    report(&progress)
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::RunStarted {
            plan_length,
            total_valid_count,
            ..
        } => println!("running {plan_length} plan entries ({total_valid_count} enabled)"),
        RunEvent::StepStarted {
            step_index,
            nest_level,
            kind,
            ..
        } => println!("{}-> [{step_index}] {kind}", "  ".repeat(*nest_level)),
        RunEvent::StepFinished {
            step_index,
            success,
            duration_ms,
            ..
        } if !success => println!("   [{step_index}] failed after {duration_ms} ms"),
        RunEvent::WaitTick {
            step_index,
            remaining_secs,
        } if remaining_secs % 60 == 0 => println!("   [{step_index}] waiting, {remaining_secs} s left"),
        _ => {}
    }
}

fn report(progress: &RunProgress) -> Result<()> {
    match progress.status {
        RunStatus::Completed => {
            println!("completed {}/{} steps", progress.executed_count, progress.total_valid_count);
            Ok(())
        }
        RunStatus::Cancelled => {
            println!("cancelled after {}/{} steps", progress.executed_count, progress.total_valid_count);
            Ok(())
        }
        _ => match &progress.failure {
            Some(failure) => bail!(
                "run failed at step {} ({}, {}): {}",
                failure.step_index,
                failure.kind,
                failure.category.as_str(),
                failure.message
            ),
            None => bail!("run ended with status {:?}", progress.status),
        },
    }
}

#[cfg(feature = "desktop")]
fn desktop_services() -> Result<(
    Arc<dyn autostep_engine::ScreenLocator>,
    Arc<dyn autostep_engine::InputSynthesizer>,
)> {
    Ok((Arc::new(crate::desktop::XcapLocator), Arc::new(crate::desktop::EnigoInput::default())))
}

#[cfg(not(feature = "desktop"))]
fn desktop_services() -> Result<(
    Arc<dyn autostep_engine::ScreenLocator>,
    Arc<dyn autostep_engine::InputSynthesizer>,
)> {
    bail!("this build has no desktop support; rebuild with `--features desktop` to replay steps")
}

#[cfg(test)]
mod tests {
    use super::*;
    use autostep_engine::parse_step_document;
    use autostep_types::{FailureCategory, RunFailure, StepKind};
    use clap::CommandFactory;

    const LOOPED: &str = r#"[
        { "type": "key", "params": { "key": "tab" }, "comment": "focus" },
        { "type": "repeat_start", "params": { "count": 2 } },
        { "type": "key", "params": { "key": "down" }, "enabled": false },
        { "type": "repeat_end" }
    ]"#;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from(["autostep", "run", "flow.yaml", "--monitor", "1", "--from", "3"]).expect("parse");
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.file, PathBuf::from("flow.yaml"));
                assert_eq!(args.monitor, Some(1));
                assert_eq!(args.from, 3);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["autostep", "plan", "flow.json", "--json"]).expect("parse");
        assert!(matches!(cli.command, Command::Plan(PlanArgs { json: true, from: 0, .. })));
        assert!(Cli::try_parse_from(["autostep", "run"]).is_err());
    }

    #[test]
    fn parses_config_set() {
        let cli = Cli::try_parse_from(["autostep", "config", "set", "log-filter", "autostep_engine=debug"]).expect("parse");
        match cli.command {
            Command::Config(ConfigCommand::Set(args)) => {
                assert_eq!(args.key, SettingKey::LogFilter);
                assert_eq!(args.value, "autostep_engine=debug");
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["autostep", "config", "set", "theme", "dark"]).is_err());
    }

    #[test]
    fn config_set_saves_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let store = SettingsStore::load_from(&path).expect("store");

        set_setting(&store, SettingKey::Monitor, "2").expect("monitor");
        set_setting(&store, SettingKey::LogFilter, "autostep_engine=debug").expect("filter");
        let saved = SettingsStore::load_from(&path).expect("reload").settings();
        assert_eq!(saved.monitor_index, 2);
        assert_eq!(saved.log_filter.as_deref(), Some("autostep_engine=debug"));

        set_setting(&store, SettingKey::LogFilter, "").expect("clear");
        assert_eq!(SettingsStore::load_from(&path).expect("reload").settings().log_filter, None);
    }

    #[test]
    fn config_set_rejects_bad_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::load_from(dir.path().join("settings.json")).expect("store");
        assert!(set_setting(&store, SettingKey::Monitor, "-1").is_err());
        assert!(set_setting(&store, SettingKey::Monitor, "left").is_err());
        assert_eq!(store.settings(), EngineSettings::default());

        let error = set_setting(&SettingsStore::ephemeral(), SettingKey::Monitor, "1").expect_err("ephemeral");
        assert!(error.to_string().contains("unavailable"), "{error}");
    }

    #[test]
    fn renders_plan_with_nesting_and_disabled_steps() {
        let document = parse_step_document(LOOPED).expect("document");
        let plan = expand_plan(&document.steps).expect("plan");
        let lines = render_plan(&document.steps, &plan);

        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "   0  [0] key  # focus");
        assert_eq!(lines[1], "   1  [1] repeat_start");
        assert_eq!(lines[2], "   2    [2] key (disabled)");
        assert_eq!(lines[4], "   4      [2] key (disabled)");
    }

    #[test]
    fn json_plan_counts_enabled_entries() {
        let document = parse_step_document(LOOPED).expect("document");
        let plan = expand_plan(&document.steps).expect("plan");
        let value = plan_as_json(&document.steps, &plan);

        assert_eq!(value["total_valid_count"], 4);
        assert_eq!(value["entries"][2]["type"], "key");
        assert_eq!(value["entries"][2]["enabled"], false);
        assert_eq!(value["entries"][4]["nest_level"], 2);
    }

    #[test]
    fn validate_reports_unbalanced_loops() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, r#"[{ "type": "repeat_start", "params": { "count": 2 } }]"#).expect("write");
        let error = validate(&path).expect_err("unbalanced");
        assert!(format!("{error:#}").contains("no matching repeat_end"), "{error:#}");
    }

    #[test]
    fn failed_runs_become_errors() {
        let failed = RunProgress {
            status: RunStatus::Failed,
            failure: Some(RunFailure {
                step_index: 4,
                kind: StepKind::ImageClick,
                category: FailureCategory::ImageNotFound,
                message: "ok.png not found".into(),
            }),
            ..Default::default()
        };
        let message = report(&failed).expect_err("failed").to_string();
        assert!(message.contains("step 4"), "{message}");

        let cancelled = RunProgress {
            status: RunStatus::Cancelled,
            ..Default::default()
        };
        assert!(report(&cancelled).is_ok());
    }
}
