//! Pure time-policy functions (§4.1 Clock & Time Policy, C1).
//!
//! Nothing in this module performs I/O; `now` is always passed in by the
//! caller so the dispatch loop and the tests can both drive it deterministically.

use chrono::{DateTime, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use scheduler_types::ValidHourRange;

/// True iff `range` is absent or `t`'s local hour falls in `[start, end)`.
pub fn in_window(t: DateTime<Local>, range: Option<ValidHourRange>) -> bool {
    match range {
        None => true,
        Some(r) => r.contains_hour(t.hour()),
    }
}

/// Earliest instant `>= t` that is in-window.
///
/// If `t` is already in-window, returns `t` unchanged. Otherwise snaps
/// forward to `start_hour:00:00` — same day if `t`'s hour precedes the
/// window, next day if it's past the window's end.
pub fn advance_to_next_valid(t: DateTime<Local>, range: Option<ValidHourRange>) -> DateTime<Local> {
    let Some(range) = range else {
        return t;
    };
    if range.contains_hour(t.hour()) {
        return t;
    }

    let target_date = if (t.hour() as u8) < range.start_hour {
        t.date_naive()
    } else {
        t.date_naive() + Duration::days(1)
    };

    local_at(target_date, range.start_hour)
}

/// Compute the next dispatchable time, or `None` if no time remains before
/// the task's end date (§4.1 step list).
pub fn next_execution(
    now: DateTime<Local>,
    last_execution: Option<DateTime<Local>>,
    interval_seconds: u64,
    range: Option<ValidHourRange>,
    end_date: NaiveDate,
) -> Option<DateTime<Local>> {
    let candidate = match last_execution {
        None => now,
        Some(last) => last + Duration::seconds(interval_seconds as i64),
    };

    if candidate.date_naive() >= end_date {
        return None;
    }

    let adjusted = advance_to_next_valid(candidate, range);
    if adjusted.date_naive() >= end_date {
        return None;
    }

    Some(adjusted)
}

/// Build a local `DateTime` for `date` at `hour:00:00`, resolving DST
/// ambiguity/gaps by taking the earliest valid instant.
fn local_at(date: NaiveDate, hour: u8) -> DateTime<Local> {
    let naive: NaiveDateTime = date
        .and_hms_opt(hour as u32, 0, 0)
        .expect("hour is always in 0..24");
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _latest) => earliest,
        LocalResult::None => {
            // Spring-forward gap: push forward until a valid instant exists.
            Local
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
                .unwrap_or_else(|| Local::now())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_ymd_hms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap()
    }

    #[test]
    fn in_window_true_without_range() {
        let t = local_ymd_hms(2026, 1, 1, 3, 0, 0);
        assert!(in_window(t, None));
    }

    #[test]
    fn in_window_respects_bounds() {
        let range = ValidHourRange::new(8, 22).unwrap();
        assert!(in_window(local_ymd_hms(2026, 1, 1, 8, 0, 0), Some(range)));
        assert!(in_window(local_ymd_hms(2026, 1, 1, 21, 59, 59), Some(range)));
        assert!(!in_window(local_ymd_hms(2026, 1, 1, 22, 0, 0), Some(range)));
        assert!(!in_window(local_ymd_hms(2026, 1, 1, 7, 59, 59), Some(range)));
    }

    #[test]
    fn advance_to_next_valid_same_day_when_early() {
        let range = ValidHourRange::new(8, 22).unwrap();
        let t = local_ymd_hms(2026, 1, 1, 5, 0, 0);
        let adjusted = advance_to_next_valid(t, Some(range));
        assert_eq!(adjusted, local_ymd_hms(2026, 1, 1, 8, 0, 0));
    }

    #[test]
    fn advance_to_next_valid_next_day_when_late() {
        let range = ValidHourRange::new(8, 22).unwrap();
        let t = local_ymd_hms(2026, 1, 1, 23, 0, 0);
        let adjusted = advance_to_next_valid(t, Some(range));
        assert_eq!(adjusted, local_ymd_hms(2026, 1, 2, 8, 0, 0));
    }

    #[test]
    fn advance_to_next_valid_no_op_when_already_in_window() {
        let range = ValidHourRange::new(8, 22).unwrap();
        let t = local_ymd_hms(2026, 1, 1, 14, 0, 0);
        assert_eq!(advance_to_next_valid(t, Some(range)), t);
    }

    /// Scenario 1 from §8: hour-window deferral.
    #[test]
    fn scenario_hour_window_deferral() {
        let range = ValidHourRange::new(8, 22).unwrap();
        let now = local_ymd_hms(2026, 1, 1, 7, 30, 0);
        let end_date = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        let next = next_execution(now, None, 3600, Some(range), end_date).unwrap();
        assert_eq!(next, local_ymd_hms(2026, 1, 1, 8, 0, 0));
    }

    /// Scenario 2 from §8: overnight wrap.
    #[test]
    fn scenario_overnight_wrap() {
        let range = ValidHourRange::new(8, 22).unwrap();
        let last_execution = local_ymd_hms(2026, 1, 1, 21, 45, 30);
        let end_date = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        let next = next_execution(last_execution, Some(last_execution), 3600, Some(range), end_date)
            .unwrap();
        assert_eq!(next, local_ymd_hms(2026, 1, 2, 8, 0, 0));
    }

    #[test]
    fn next_execution_none_past_end_date() {
        let end_date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let now = local_ymd_hms(2026, 1, 1, 10, 0, 0);
        assert_eq!(next_execution(now, None, 3600, None, end_date), None);
    }

    #[test]
    fn next_execution_none_when_adjustment_crosses_end_date() {
        let range = ValidHourRange::new(8, 22).unwrap();
        let end_date = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        let last_execution = local_ymd_hms(2026, 1, 1, 21, 30, 0);
        // candidate = 22:30 (out of window) -> adjusted = Jan 2 08:00, which is >= end_date.
        assert_eq!(
            next_execution(last_execution, Some(last_execution), 3600, Some(range), end_date),
            None
        );
    }
}
