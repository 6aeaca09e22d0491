//! Run controller: admits one run at a time and drives its plan through the
//! [`StepExecutor`] on a dedicated worker thread.
//!
//! The caller keeps a [`RunHandle`] to poll progress, request cancellation,
//! or block until the run ends. Cancellation is cooperative: the worker checks
//! the flag before every plan entry and during scheduled waits, never in the
//! middle of a primitive.

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use autostep_types::{RunProgress, RunStatus, Step};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    executor::{StepContext, StepExecutor, StepOutcome},
    plan::{ExecutionPlan, PlanError, expand_plan_from},
};

pub mod observer;

pub use observer::{NoopObserver, RunObserver};

/// Parameters of a single run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Monitor searched by image steps.
    pub monitor_index: usize,
    /// First step to run; earlier steps are not part of the plan.
    pub start_index: usize,
}

/// Reasons a run could not be started.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("a run is already in progress")]
    AlreadyRunning,
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("failed to spawn the run worker: {0}")]
    Spawn(#[source] io::Error),
}

/// Owns the running flag and starts runs.
pub struct RunController {
    executor: Arc<StepExecutor>,
    running: Arc<AtomicBool>,
}

impl RunController {
    pub fn new(executor: StepExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True while a run's worker holds the controller.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts a run over a snapshot of `steps` without progress callbacks.
    pub fn start_run(&self, steps: &[Step], options: RunOptions) -> Result<RunHandle, RunError> {
        self.start_run_with_observer(steps, options, Arc::new(NoopObserver))
    }

    /// Starts a run over a snapshot of `steps`, reporting to `observer`.
    ///
    /// # Errors
    ///
    /// Fails without executing anything when another run is active, when the
    /// loop markers are unbalanced, or when `start_index` is out of range.
    pub fn start_run_with_observer(
        &self,
        steps: &[Step],
        options: RunOptions,
        observer: Arc<dyn RunObserver>,
    ) -> Result<RunHandle, RunError> {
        let guard = RunningGuard::acquire(&self.running).ok_or(RunError::AlreadyRunning)?;
        let plan = expand_plan_from(steps, options.start_index)?;
        let steps = steps.to_vec();
        let total_valid_count = plan.enabled_count(&steps);

        let progress = Arc::new(Mutex::new(RunProgress {
            status: RunStatus::Running,
            total_valid_count,
            started_at: Some(Utc::now()),
            ..Default::default()
        }));
        let cancel_flag = Arc::new(AtomicBool::new(false));

        info!(
            plan_length = plan.len(),
            total_valid_count,
            start_index = options.start_index,
            monitor_index = options.monitor_index,
            "run started"
        );

        let worker = RunWorker {
            executor: Arc::clone(&self.executor),
            steps,
            plan,
            monitor_index: options.monitor_index,
            cancel_flag: Arc::clone(&cancel_flag),
            progress: Arc::clone(&progress),
            observer,
        };
        let thread = thread::Builder::new()
            .name("autostep-run".into())
            .spawn(move || worker.run(guard))
            .map_err(RunError::Spawn)?;

        Ok(RunHandle {
            cancel_flag,
            progress,
            thread,
        })
    }
}

/// Handle to an active or finished run.
pub struct RunHandle {
    cancel_flag: Arc<AtomicBool>,
    progress: Arc<Mutex<RunProgress>>,
    thread: JoinHandle<RunProgress>,
}

impl RunHandle {
    /// Requests cancellation; the worker stops at the next checkpoint.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    /// A cloneable token that cancels this run from elsewhere.
    pub fn canceller(&self) -> RunCanceller {
        RunCanceller(Arc::clone(&self.cancel_flag))
    }

    /// Snapshot of the run's progress.
    pub fn progress(&self) -> RunProgress {
        self.progress.lock().expect("run progress lock poisoned").clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Blocks until the worker exits and returns the final progress.
    pub fn wait(self) -> RunProgress {
        match self.thread.join() {
            Ok(progress) => progress,
            Err(_) => {
                let mut progress = self.progress.lock().expect("run progress lock poisoned").clone();
                if !progress.status.is_terminal() {
                    progress.status = RunStatus::Failed;
                    progress.finished_at = Some(Utc::now());
                }
                progress
            }
        }
    }
}

/// Cancels a run without borrowing its [`RunHandle`].
#[derive(Debug, Clone)]
pub struct RunCanceller(Arc<AtomicBool>);

impl RunCanceller {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Clears the running flag when dropped, including on unwind.
struct RunningGuard(Arc<AtomicBool>);

impl RunningGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct RunWorker {
    executor: Arc<StepExecutor>,
    steps: Vec<Step>,
    plan: ExecutionPlan,
    monitor_index: usize,
    cancel_flag: Arc<AtomicBool>,
    progress: Arc<Mutex<RunProgress>>,
    observer: Arc<dyn RunObserver>,
}

impl RunWorker {
    fn run(self, guard: RunningGuard) -> RunProgress {
        let total_valid_count = self.update_progress(|progress| progress.total_valid_count);
        self.observer.on_run_started(self.plan.len(), total_valid_count);

        let context = StepContext {
            monitor_index: self.monitor_index,
            cancel_flag: self.cancel_flag.as_ref(),
            observer: self.observer.as_ref(),
        };
        let mut status = RunStatus::Completed;
        let mut failure = None;

        for (position, entry) in self.plan.iter().enumerate() {
            if context.is_cancelled() {
                info!(step_index = entry.step_index, "run cancelled");
                status = RunStatus::Cancelled;
                break;
            }

            let step = &self.steps[entry.step_index];
            if !step.is_enabled() {
                debug!(step_index = entry.step_index, "skipping disabled step");
                continue;
            }

            let kind = step.kind();
            self.update_progress(|progress| progress.current_step_index = Some(entry.step_index));
            self.observer.on_step_start(position, *entry, kind);
            debug!(step_index = entry.step_index, nest_level = entry.nest_level, kind = %kind, "executing step");

            let started_at = Instant::now();
            let result = self.executor.execute(entry.step_index, step, &context);
            let elapsed = started_at.elapsed();

            match result {
                Ok(StepOutcome::Completed) => {
                    self.update_progress(|progress| progress.executed_count += 1);
                    self.observer.on_step_complete(*entry, kind, true, elapsed);
                }
                Ok(StepOutcome::Cancelled) => {
                    self.observer.on_step_complete(*entry, kind, false, elapsed);
                    info!(step_index = entry.step_index, "run cancelled during wait");
                    status = RunStatus::Cancelled;
                    break;
                }
                Err(error) => {
                    warn!(
                        step_index = error.step_index,
                        kind = %error.kind,
                        category = %error.category(),
                        error = %error.source,
                        "step failed; halting run"
                    );
                    self.observer.on_step_complete(*entry, kind, false, elapsed);
                    failure = Some(error.to_run_failure());
                    status = RunStatus::Failed;
                    break;
                }
            }
        }

        let final_progress = self.update_progress(|progress| {
            progress.status = status;
            progress.failure = failure;
            progress.finished_at = Some(Utc::now());
            progress.clone()
        });
        drop(guard);
        info!(
            status = %final_progress.status,
            executed_count = final_progress.executed_count,
            total_valid_count = final_progress.total_valid_count,
            "run finished"
        );
        self.observer.on_run_complete(&final_progress);
        final_progress
    }

    fn update_progress<T>(&self, update: impl FnOnce(&mut RunProgress) -> T) -> T {
        let mut progress = self.progress.lock().expect("run progress lock poisoned");
        update(&mut progress)
    }
}
