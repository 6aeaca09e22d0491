//! Loop expansion: turns a flat step list with `repeat_start`/`repeat_end`
//! markers into the linear sequence of plan entries a run walks.
//!
//! Expansion is a pure function of the steps. Disabled steps keep their slot;
//! the run controller decides whether an entry is dispatched.

use autostep_types::{Step, StepAction};
use serde::Serialize;
use thiserror::Error;
use tracing::trace;

/// Upper bound on expanded plan length; loop counts multiply quickly.
pub const MAX_PLAN_ENTRIES: usize = 1_000_000;

/// One position in an execution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    /// Absolute index into the full step sequence.
    pub step_index: usize,
    /// Loop depth used for display only.
    pub nest_level: usize,
}

impl PlanEntry {
    pub const fn new(step_index: usize, nest_level: usize) -> Self {
        Self { step_index, nest_level }
    }
}

/// Error raised when a plan cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("repeat_start at step {index} has no matching repeat_end")]
    UnmatchedRepeatStart { index: usize },
    #[error("start index {start} is out of range for {len} step(s)")]
    StartIndexOutOfRange { start: usize, len: usize },
    #[error("loops expand to more than {limit} plan entries")]
    PlanTooLarge { limit: usize },
}

/// Linear sequence of plan entries produced by [`expand_plan`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExecutionPlan {
    entries: Vec<PlanEntry>,
}

impl ExecutionPlan {
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlanEntry> {
        self.entries.iter()
    }

    /// Number of entries whose step is enabled; the denominator of run progress.
    pub fn enabled_count(&self, steps: &[Step]) -> usize {
        self.entries
            .iter()
            .filter(|entry| steps.get(entry.step_index).is_some_and(Step::is_enabled))
            .count()
    }
}

impl<'a> IntoIterator for &'a ExecutionPlan {
    type Item = &'a PlanEntry;
    type IntoIter = std::slice::Iter<'a, PlanEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Expands the whole step sequence.
pub fn expand_plan(steps: &[Step]) -> Result<ExecutionPlan, PlanError> {
    expand_plan_from(steps, 0)
}

/// Expands the suffix of `steps` starting at `start_index`.
///
/// Entries keep absolute indices. A `start_index` equal to `steps.len()`
/// yields an empty plan; anything larger is rejected.
pub fn expand_plan_from(steps: &[Step], start_index: usize) -> Result<ExecutionPlan, PlanError> {
    if start_index > steps.len() {
        return Err(PlanError::StartIndexOutOfRange {
            start: start_index,
            len: steps.len(),
        });
    }

    let mut entries = Vec::with_capacity(steps.len() - start_index);
    expand_window(steps, start_index, steps.len(), 0, &mut entries)?;
    Ok(ExecutionPlan { entries })
}

fn expand_window(steps: &[Step], begin: usize, end: usize, nest_level: usize, entries: &mut Vec<PlanEntry>) -> Result<(), PlanError> {
    let mut index = begin;
    while index < end {
        match steps[index].action() {
            StepAction::RepeatStart { count } => {
                let end_index = find_matching_repeat_end(steps, index, end).ok_or(PlanError::UnmatchedRepeatStart { index })?;
                push_entry(entries, PlanEntry::new(index, nest_level))?;
                for iteration in 0..*count as usize {
                    let body_level = nest_level + iteration + 1;
                    expand_window(steps, index + 1, end_index, body_level, entries)?;
                    push_entry(entries, PlanEntry::new(end_index, body_level))?;
                }
                index = end_index + 1;
            }
            StepAction::RepeatEnd => {
                trace!(step_index = index, "skipping repeat_end without an open repeat_start");
                index += 1;
            }
            _ => {
                push_entry(entries, PlanEntry::new(index, nest_level))?;
                index += 1;
            }
        }
    }
    Ok(())
}

fn push_entry(entries: &mut Vec<PlanEntry>, entry: PlanEntry) -> Result<(), PlanError> {
    if entries.len() >= MAX_PLAN_ENTRIES {
        return Err(PlanError::PlanTooLarge { limit: MAX_PLAN_ENTRIES });
    }
    entries.push(entry);
    Ok(())
}

/// Finds the `repeat_end` closing the `repeat_start` at `start`, searching
/// strictly before `end`. Nested regions are skipped by depth counting.
pub fn find_matching_repeat_end(steps: &[Step], start: usize, end: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (index, step) in steps.iter().enumerate().take(end).skip(start + 1) {
        match step.action() {
            StepAction::RepeatStart { .. } => depth += 1,
            StepAction::RepeatEnd if depth == 0 => return Some(index),
            StepAction::RepeatEnd => depth -= 1,
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use autostep_types::StepParams;
    use serde_json::json;

    fn step(kind: &str, params: serde_json::Value) -> Step {
        let params: StepParams = serde_json::from_value(params).expect("params");
        Step::new(kind, params, "").expect("valid step")
    }

    fn key(name: &str) -> Step {
        step("key", json!({ "key": name }))
    }

    fn repeat(count: u32) -> Step {
        step("repeat_start", json!({ "count": count }))
    }

    fn end() -> Step {
        step("repeat_end", json!({}))
    }

    fn indices(plan: &ExecutionPlan) -> Vec<usize> {
        plan.iter().map(|entry| entry.step_index).collect()
    }

    #[test]
    fn plain_steps_expand_in_order() {
        let steps = vec![key("a"), key("b"), key("c")];
        let plan = expand_plan(&steps).expect("plan");
        assert_eq!(indices(&plan), vec![0, 1, 2]);
        assert!(plan.iter().all(|entry| entry.nest_level == 0));
    }

    #[test]
    fn single_loop_repeats_body_and_end() {
        let steps = vec![key("a"), repeat(3), key("b"), end(), key("c")];
        let plan = expand_plan(&steps).expect("plan");
        assert_eq!(indices(&plan), vec![0, 1, 2, 3, 2, 3, 2, 3, 4]);
        assert_eq!(plan.len(), 9);

        let levels: Vec<usize> = plan.iter().map(|entry| entry.nest_level).collect();
        assert_eq!(levels, vec![0, 0, 1, 1, 2, 2, 3, 3, 0]);
    }

    #[test]
    fn nested_loops_multiply() {
        let steps = vec![repeat(2), repeat(2), key("x"), end(), end()];
        let plan = expand_plan(&steps).expect("plan");
        let x_count = plan.iter().filter(|entry| entry.step_index == 2).count();
        assert_eq!(x_count, 4);
        assert_eq!(plan.iter().filter(|entry| entry.step_index == 4).count(), 2);
    }

    #[test]
    fn unmatched_start_names_its_index() {
        let steps = vec![key("a"), repeat(2), repeat(2), key("b"), end()];
        let error = expand_plan(&steps).expect_err("structural error");
        assert_eq!(error, PlanError::UnmatchedRepeatStart { index: 1 });
    }

    #[test]
    fn expansion_is_deterministic() {
        let steps = vec![repeat(2), key("a"), repeat(3), key("b"), end(), end(), key("c")];
        let first = expand_plan(&steps).expect("plan");
        let second = expand_plan(&steps).expect("plan");
        assert_eq!(first, second);
    }

    #[test]
    fn empty_loop_emits_start_once_and_end_per_iteration() {
        let steps = vec![repeat(3), end()];
        let plan = expand_plan(&steps).expect("plan");
        assert_eq!(indices(&plan), vec![0, 1, 1, 1]);
    }

    #[test]
    fn stray_repeat_end_is_skipped() {
        let steps = vec![key("a"), end(), key("b")];
        let plan = expand_plan(&steps).expect("plan");
        assert_eq!(indices(&plan), vec![0, 2]);
    }

    #[test]
    fn suffix_plans_keep_absolute_indices() {
        let steps = vec![key("a"), key("b"), repeat(2), key("c"), end()];
        let plan = expand_plan_from(&steps, 2).expect("plan");
        assert_eq!(indices(&plan), vec![2, 3, 4, 3, 4]);

        let error = expand_plan_from(&steps, 6).expect_err("out of range");
        assert_eq!(error, PlanError::StartIndexOutOfRange { start: 6, len: 5 });
        assert!(expand_plan_from(&steps, 5).expect("empty suffix").is_empty());
    }

    #[test]
    fn suffix_inside_a_loop_treats_its_end_as_stray() {
        let steps = vec![repeat(2), key("a"), end(), key("b")];
        let plan = expand_plan_from(&steps, 1).expect("plan");
        assert_eq!(indices(&plan), vec![1, 3]);
    }

    #[test]
    fn matching_end_skips_nested_regions() {
        let steps = vec![repeat(2), key("a"), repeat(2), key("b"), end(), end(), key("c")];
        assert_eq!(find_matching_repeat_end(&steps, 0, steps.len()), Some(5));
        assert_eq!(find_matching_repeat_end(&steps, 2, steps.len()), Some(4));
    }

    #[test]
    fn matching_end_is_none_when_missing() {
        let steps = vec![repeat(2), repeat(2), key("a"), end()];
        assert_eq!(find_matching_repeat_end(&steps, 0, steps.len()), None);
        assert_eq!(find_matching_repeat_end(&steps, 1, steps.len()), Some(3));
    }

    #[test]
    fn matching_end_stays_inside_the_window() {
        let steps = vec![repeat(2), key("a"), end(), key("b")];
        assert_eq!(find_matching_repeat_end(&steps, 0, 2), None);
        assert_eq!(find_matching_repeat_end(&steps, 0, 3), Some(2));
    }

    #[test]
    fn oversized_expansion_is_rejected() {
        let steps = vec![repeat(2_000_000_000), end()];
        let error = expand_plan(&steps).expect_err("too large");
        assert_eq!(error, PlanError::PlanTooLarge { limit: MAX_PLAN_ENTRIES });

        let nested = vec![repeat(1_000), repeat(1_000), key("a"), end(), end()];
        assert!(matches!(expand_plan(&nested), Err(PlanError::PlanTooLarge { .. })));
    }

    #[test]
    fn disabled_steps_keep_their_slots() {
        let steps = vec![key("a"), key("b").with_enabled(false), key("c")];
        let plan = expand_plan(&steps).expect("plan");
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.enabled_count(&steps), 2);
    }
}
