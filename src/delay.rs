//! Next-fire delay computation for interval and cron schedules.

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

use std::{str::FromStr, time::Duration};

use crate::error::MomoError;

/// Parse a human-readable interval like `"1 second"` or `"5 minutes"` into a
/// positive duration.
///
/// Whitespace is insignificant; `"1 second"`, `"1second"` and `"1 s"` all
/// parse to the same duration.
pub(crate) fn parse_interval(interval: &str) -> Result<Duration, MomoError> {
    let normalized: String = interval.split_whitespace().collect();
    let parsed = humantime::parse_duration(&normalized)
        .map_err(|_| MomoError::NonParsableInterval(interval.to_string()))?;
    if parsed.is_zero() {
        return Err(MomoError::NonParsableInterval(interval.to_string()));
    }
    Ok(parsed)
}

/// Parse a cron expression, accepting both the 5-field Unix form and the
/// extended 6/7-field form with seconds (and year).
///
/// 5-field expressions run at second `:00` of each matching minute.
pub(crate) fn parse_cron(expression: &str) -> Result<CronSchedule, MomoError> {
    let canonical = match expression.split_whitespace().count() {
        5 => format!("0 {expression}"),
        _ => expression.to_string(),
    };
    CronSchedule::from_str(&canonical)
        .map_err(|_| MomoError::NonParsableCronSchedule(expression.to_string()))
}

/// Delay until the next interval fire.
///
/// Without a previous start the job waits `first_run_after`; otherwise the
/// next fire is one interval after the last start, clamped to "now" when that
/// moment has already passed.
pub(crate) fn interval_delay(
    interval: Duration,
    first_run_after: Duration,
    last_started: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Duration {
    let Some(last_started) = last_started else {
        return first_run_after;
    };
    let interval = match chrono::Duration::from_std(interval) {
        Ok(interval) => interval,
        Err(_) => return first_run_after,
    };
    let next_fire = last_started + interval;
    next_fire
        .signed_duration_since(now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// The next cron instant strictly after `after`, or `None` when the
/// expression yields no further fire times.
pub(crate) fn next_cron_fire(
    schedule: &CronSchedule,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// Delay from `now` until `target`, clamped to zero for instants already
/// passed.
pub(crate) fn until(target: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    target
        .signed_duration_since(now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn interval_without_history_waits_first_run_after() {
        let now = Utc::now();
        let delay = interval_delay(
            Duration::from_secs(60),
            Duration::from_millis(1500),
            None,
            now,
        );
        assert_eq!(delay, Duration::from_millis(1500));
    }

    #[test]
    fn interval_resumes_relative_to_last_start() {
        let now = Utc.with_ymd_and_hms(2026, 1, 19, 10, 0, 30).unwrap();
        let last_started = Utc.with_ymd_and_hms(2026, 1, 19, 10, 0, 0).unwrap();
        let delay = interval_delay(
            Duration::from_secs(60),
            Duration::ZERO,
            Some(last_started),
            now,
        );
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn elapsed_interval_fires_immediately() {
        let now = Utc.with_ymd_and_hms(2026, 1, 19, 10, 5, 0).unwrap();
        let last_started = Utc.with_ymd_and_hms(2026, 1, 19, 10, 0, 0).unwrap();
        let delay = interval_delay(
            Duration::from_secs(60),
            Duration::ZERO,
            Some(last_started),
            now,
        );
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn exactly_elapsed_interval_fires_immediately() {
        let now = Utc.with_ymd_and_hms(2026, 1, 19, 10, 1, 0).unwrap();
        let last_started = Utc.with_ymd_and_hms(2026, 1, 19, 10, 0, 0).unwrap();
        let delay = interval_delay(
            Duration::from_secs(60),
            Duration::ZERO,
            Some(last_started),
            now,
        );
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn cron_fire_targets_next_instant() {
        let schedule = parse_cron("*/15 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 19, 10, 32, 0).unwrap();
        let next = next_cron_fire(&schedule, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 19, 10, 45, 0).unwrap());
        assert_eq!(until(next, now), Duration::from_secs(13 * 60));
    }

    #[test]
    fn five_field_expressions_pin_seconds() {
        let schedule = parse_cron("0 0 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 19, 23, 59, 59).unwrap();
        let next = next_cron_fire(&schedule, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 20, 0, 0, 0).unwrap());
    }

    #[test]
    fn six_field_expressions_keep_their_seconds() {
        let schedule = parse_cron("*/1 * * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 19, 10, 0, 0).unwrap();
        let next = next_cron_fire(&schedule, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 19, 10, 0, 1).unwrap());
    }

    #[test]
    fn until_clamps_past_instants_to_zero() {
        let now = Utc.with_ymd_and_hms(2026, 1, 19, 10, 0, 0).unwrap();
        let past = Utc.with_ymd_and_hms(2026, 1, 19, 9, 0, 0).unwrap();
        assert_eq!(until(past, now), Duration::ZERO);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(matches!(
            parse_interval("not a duration"),
            Err(MomoError::NonParsableInterval(_))
        ));
        assert!(matches!(
            parse_interval("0 seconds"),
            Err(MomoError::NonParsableInterval(_))
        ));
        assert!(matches!(
            parse_cron("61 * * * *"),
            Err(MomoError::NonParsableCronSchedule(_))
        ));
        assert!(matches!(
            parse_cron("* * *"),
            Err(MomoError::NonParsableCronSchedule(_))
        ));
    }
}
