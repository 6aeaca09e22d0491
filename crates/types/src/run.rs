//! Run status, progress, and lifecycle event types.
//!
//! These are the values a run controller publishes to whoever drives it: a
//! progress snapshot that can be polled at any time, and a stream of
//! [`RunEvent`]s for consumers that prefer push updates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::step::StepKind;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Diagnostic category of a failed step, used to pick targeted remediation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// The template never reached the confidence threshold.
    ImageNotFound,
    /// The template file could not be read or decoded.
    ImageDecodeFailed,
    /// A shell command matched the denylist.
    SecurityRejected,
    /// A shell command exceeded its timeout.
    Timeout,
    /// A shell command could not start or exited non-zero.
    CommandFailed,
    /// A step parameter could not be interpreted at execution time.
    InvalidFormat,
    /// The screen could not be captured.
    CaptureFailed,
    /// Pointer, keyboard, or clipboard synthesis failed.
    InputFailed,
}

impl FailureCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCategory::ImageNotFound => "image_not_found",
            FailureCategory::ImageDecodeFailed => "image_decode_failed",
            FailureCategory::SecurityRejected => "security_rejected",
            FailureCategory::Timeout => "timeout",
            FailureCategory::CommandFailed => "command_failed",
            FailureCategory::InvalidFormat => "invalid_format",
            FailureCategory::CaptureFailed => "capture_failed",
            FailureCategory::InputFailed => "input_failed",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of the step failure that halted a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunFailure {
    /// Absolute index of the failing step in the full sequence.
    pub step_index: usize,
    pub kind: StepKind,
    pub category: FailureCategory,
    /// Human-readable cause.
    pub message: String,
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RunProgress {
    pub status: RunStatus,
    /// Enabled plan entries dispatched successfully so far.
    pub executed_count: usize,
    /// Enabled plan entries in the expanded plan.
    pub total_valid_count: usize,
    /// Absolute index of the step being (or last) executed.
    pub current_step_index: Option<usize>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure: Option<RunFailure>,
}

impl RunProgress {
    /// Completion ratio in `[0, 1]`; an empty plan counts as complete.
    pub fn fraction_complete(&self) -> f64 {
        if self.total_valid_count == 0 {
            return 1.0;
        }
        self.executed_count as f64 / self.total_valid_count as f64
    }
}

/// Lifecycle events emitted while a run progresses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        at: DateTime<Utc>,
        plan_length: usize,
        total_valid_count: usize,
    },
    StepStarted {
        /// Position within the expanded plan.
        plan_position: usize,
        step_index: usize,
        nest_level: usize,
        kind: StepKind,
    },
    StepFinished {
        step_index: usize,
        kind: StepKind,
        success: bool,
        duration_ms: u64,
    },
    /// Emitted once per second while a scheduled wait counts down.
    WaitTick { step_index: usize, remaining_secs: u64 },
    RunCompleted {
        status: RunStatus,
        finished_at: DateTime<Utc>,
        executed_count: usize,
        failure: Option<RunFailure>,
    },
}
