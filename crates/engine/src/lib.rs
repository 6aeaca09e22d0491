//! # Autostep Engine
//!
//! The Autostep Engine replays recorded desktop automation: image-located
//! clicks, coordinate clicks and drags, key presses, text entry, shell
//! commands, timed waits, and bounded loops.
//!
//! ## Key Features
//!
//! - **Step Files**: Loads and saves JSON/YAML step documents losslessly
//! - **Loop Expansion**: Turns `repeat_start`/`repeat_end` regions into a linear plan
//! - **Step Execution**: Dispatches each step to screen, input, and command services
//! - **Run Control**: One worker-thread run at a time with progress and cooperative cancellation
//! - **Command Screening**: Denylist checks before any shell command is spawned
//!
//! ## Usage
//!
//! ```rust
//! use autostep_engine::{expand_plan, parse_step_document};
//!
//! let document = parse_step_document(r#"[
//!     { "type": "repeat_start", "params": { "count": 2 } },
//!     { "type": "key", "params": { "key": "tab" } },
//!     { "type": "repeat_end" }
//! ]"#)?;
//!
//! let plan = expand_plan(&document.steps)?;
//! assert_eq!(plan.len(), 5);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`document`**: Step file parsing and rendering
//! - **`plan`**: Loop expansion into plan entries
//! - **`services`**: Traits for screen capture, input synthesis, and commands
//! - **`command_safety`**: Shell command denylist
//! - **`process`**: Shell-backed command runner
//! - **`executor`**: Per-step dispatch and failure classification
//! - **`run`**: Run controller, handles, and observers

pub mod command_safety;
pub mod document;
pub mod executor;
pub mod plan;
pub mod process;
pub mod run;
pub mod services;

// Re-export commonly used types for convenience
pub use command_safety::{SecurityViolation, check_command};
pub use document::{
    DocumentError, DocumentFormat, DocumentLayout, StepDocument, load_step_file, parse_step_document, parse_step_document_as,
    render_step_document, save_step_file,
};
pub use executor::{ExecutionError, KeyChord, StepContext, StepExecutionFailure, StepExecutor, StepOutcome};
pub use plan::{ExecutionPlan, MAX_PLAN_ENTRIES, PlanEntry, PlanError, expand_plan, expand_plan_from, find_matching_repeat_end};
pub use process::ShellCommandRunner;
pub use run::{NoopObserver, RunCanceller, RunController, RunError, RunHandle, RunObserver, RunOptions};
pub use services::{CommandOutcome, CommandOutput, CommandRunner, Frame, InputSynthesizer, ScreenLocator, TemplateMatch};
