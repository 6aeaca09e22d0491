//! Wall-clock waits for `sleep` steps with `wait_type: scheduled`.

use std::{
    thread,
    time::{Duration, Instant},
};

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use tracing::info;

use super::{StepContext, StepOutcome, errors::ExecutionError};

const TICK: Duration = Duration::from_secs(1);
const TARGET_TIME_FORMAT: &str = "%H:%M:%S";

/// Parses an `HH:MM:SS` target time.
pub fn parse_target_time(value: &str) -> Result<NaiveTime, ExecutionError> {
    NaiveTime::parse_from_str(value.trim(), TARGET_TIME_FORMAT).map_err(|error| ExecutionError::Format {
        param: "target_time",
        message: format!("'{value}' is not an HH:MM:SS time ({error})"),
    })
}

/// The next time the clock reads `target`: today if it has not passed yet,
/// otherwise the same time tomorrow.
pub fn next_occurrence(now: NaiveDateTime, target: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(target);
    if today >= now { today } else { today + TimeDelta::days(1) }
}

/// Blocks until `target_time`, checking for cancellation and reporting the
/// remaining whole seconds once per tick.
pub(super) fn wait_until(step_index: usize, target_time: &str, context: &StepContext<'_>) -> Result<StepOutcome, ExecutionError> {
    let target = parse_target_time(target_time)?;
    let now = Local::now().naive_local();
    let wake_at = next_occurrence(now, target);
    let total = (wake_at - now).to_std().unwrap_or_default();
    info!(step_index, %wake_at, wait_secs = total.as_secs(), "waiting for scheduled time");

    let deadline = Instant::now() + total;
    loop {
        if context.is_cancelled() {
            info!(step_index, "scheduled wait cancelled");
            return Ok(StepOutcome::Cancelled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(StepOutcome::Completed);
        }
        context.observer.on_wait_tick(step_index, remaining.as_secs_f64().ceil() as u64);
        thread::sleep(remaining.min(TICK));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .and_then(|date| date.and_hms_opt(hour, minute, second))
            .expect("valid datetime")
    }

    fn time(hour: u32, minute: u32, second: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, second).expect("valid time")
    }

    #[test]
    fn later_today_stays_today() {
        assert_eq!(next_occurrence(at(8, 0, 0), time(9, 30, 0)), at(9, 30, 0));
    }

    #[test]
    fn earlier_time_rolls_to_tomorrow() {
        let next = next_occurrence(at(10, 0, 0), time(9, 30, 0));
        assert_eq!(next, at(9, 30, 0) + TimeDelta::days(1));
    }

    #[test]
    fn parses_only_hh_mm_ss() {
        assert_eq!(parse_target_time(" 07:05:09 ").expect("time"), time(7, 5, 9));
        for malformed in ["7pm", "25:00:00", "12:00", ""] {
            let error = parse_target_time(malformed).expect_err(malformed);
            assert!(matches!(error, ExecutionError::Format { param: "target_time", .. }));
        }
    }
}
