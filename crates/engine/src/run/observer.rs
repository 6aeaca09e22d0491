//! Run progress observers.

use std::time::Duration;

use autostep_types::{RunEvent, RunProgress, StepKind};
use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;

use crate::plan::PlanEntry;

/// Receives run lifecycle callbacks on the worker thread.
///
/// Every method defaults to a no-op so observers implement only what they need.
pub trait RunObserver: Send + Sync {
    fn on_run_started(&self, _plan_length: usize, _total_valid_count: usize) {}

    /// `plan_position` is the entry's position within the expanded plan.
    fn on_step_start(&self, _plan_position: usize, _entry: PlanEntry, _kind: StepKind) {}

    fn on_step_complete(&self, _entry: PlanEntry, _kind: StepKind, _success: bool, _elapsed: Duration) {}

    /// Called once per tick of a scheduled wait.
    fn on_wait_tick(&self, _step_index: usize, _remaining_secs: u64) {}

    fn on_run_complete(&self, _progress: &RunProgress) {}
}

/// Observer that ignores every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Streams [`RunEvent`]s to an async consumer. A dropped receiver is ignored.
impl RunObserver for UnboundedSender<RunEvent> {
    fn on_run_started(&self, plan_length: usize, total_valid_count: usize) {
        let _ = self.send(RunEvent::RunStarted {
            at: Utc::now(),
            plan_length,
            total_valid_count,
        });
    }

    fn on_step_start(&self, plan_position: usize, entry: PlanEntry, kind: StepKind) {
        let _ = self.send(RunEvent::StepStarted {
            plan_position,
            step_index: entry.step_index,
            nest_level: entry.nest_level,
            kind,
        });
    }

    fn on_step_complete(&self, entry: PlanEntry, kind: StepKind, success: bool, elapsed: Duration) {
        let _ = self.send(RunEvent::StepFinished {
            step_index: entry.step_index,
            kind,
            success,
            duration_ms: elapsed.as_millis().try_into().unwrap_or(u64::MAX),
        });
    }

    fn on_wait_tick(&self, step_index: usize, remaining_secs: u64) {
        let _ = self.send(RunEvent::WaitTick { step_index, remaining_secs });
    }

    fn on_run_complete(&self, progress: &RunProgress) {
        let _ = self.send(RunEvent::RunCompleted {
            status: progress.status,
            finished_at: progress.finished_at.unwrap_or_else(Utc::now),
            executed_count: progress.executed_count,
            failure: progress.failure.clone(),
        });
    }
}
