//! Shared type definitions for Autostep.
//!
//! - [`step`]: the validated step model and its persisted record shape
//! - [`run`]: run status, progress snapshots, failure summaries, and lifecycle events

pub mod run;
pub mod step;

pub use run::{FailureCategory, RunEvent, RunFailure, RunProgress, RunStatus};
pub use step::{
    ClickType, CommandSpec, ImageTarget, Point, Step, StepAction, StepKind, StepParams, StepRecord, ValidationError, WaitSpec,
};
