//! Step execution failures.

use std::path::PathBuf;

use autostep_types::{FailureCategory, RunFailure, StepKind};
use thiserror::Error;

use crate::command_safety::SecurityViolation;

/// Why a single step could not be carried out.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("failed to load template image {}: {message}", .path.display())]
    ImageDecode { path: PathBuf, message: String },
    #[error("image '{file}' not found after {attempts} attempt(s): best score {last_score:.3}, required {threshold:.3}")]
    NotFound {
        file: String,
        attempts: u32,
        last_score: f64,
        threshold: f64,
    },
    #[error(transparent)]
    Security(#[from] SecurityViolation),
    #[error("command timed out after {timeout_secs}s: {command}")]
    Timeout { command: String, timeout_secs: f64 },
    #[error("command exited with {}: {stderr}", describe_exit(.exit_code))]
    Command {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("failed to launch command: {message}")]
    Launch { command: String, message: String },
    #[error("invalid {param}: {message}")]
    Format { param: &'static str, message: String },
    #[error("screen capture failed: {message}")]
    Capture { message: String },
    #[error("input synthesis failed: {message}")]
    Input { message: String },
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

impl ExecutionError {
    pub fn category(&self) -> FailureCategory {
        match self {
            ExecutionError::ImageDecode { .. } => FailureCategory::ImageDecodeFailed,
            ExecutionError::NotFound { .. } => FailureCategory::ImageNotFound,
            ExecutionError::Security(_) => FailureCategory::SecurityRejected,
            ExecutionError::Timeout { .. } => FailureCategory::Timeout,
            ExecutionError::Command { .. } | ExecutionError::Launch { .. } => FailureCategory::CommandFailed,
            ExecutionError::Format { .. } => FailureCategory::InvalidFormat,
            ExecutionError::Capture { .. } => FailureCategory::CaptureFailed,
            ExecutionError::Input { .. } => FailureCategory::InputFailed,
        }
    }

    pub(crate) fn capture(error: anyhow::Error) -> Self {
        ExecutionError::Capture {
            message: format!("{error:#}"),
        }
    }

    pub(crate) fn input(error: anyhow::Error) -> Self {
        ExecutionError::Input {
            message: format!("{error:#}"),
        }
    }
}

/// A step failure with the position and kind of the step that raised it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("step {step_index} ({kind}) failed: {source}")]
pub struct StepExecutionFailure {
    pub step_index: usize,
    pub kind: StepKind,
    #[source]
    pub source: ExecutionError,
}

impl StepExecutionFailure {
    pub fn category(&self) -> FailureCategory {
        self.source.category()
    }

    /// Summary stored in run progress.
    pub fn to_run_failure(&self) -> RunFailure {
        RunFailure {
            step_index: self.step_index,
            kind: self.kind,
            category: self.category(),
            message: self.source.to_string(),
        }
    }
}
