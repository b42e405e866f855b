//! Next-run computation.
//!
//! Every function here returns a time strictly after its reference, or
//! `None` when the schedule has nothing left. Searches are bounded: weekly
//! looks 8 days ahead, monthly 13 months, cron about four years.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use tracing::warn;

use crate::{
    cron::CronExpr,
    error::{Result, SchedulerError},
    types::{IntervalUnit, JobType, MonthDay, Recurrence, ScheduleConfig, TimeOfDay},
};

const WEEKLY_SEARCH_DAYS: i64 = 8;
const MONTHLY_SEARCH_MONTHS: u32 = 13;

/// Longest accepted interval: one leap year.
const MAX_INTERVAL_MINUTES: u64 = 366 * 24 * 60;

/// Reject definitions that can never fire.
pub fn validate(recurrence: &Recurrence) -> Result<()> {
    match recurrence {
        Recurrence::Daily { .. } => Ok(()),
        Recurrence::Weekly { days, .. } if days.is_empty() => {
            Err(SchedulerError::InvalidSchedule("weekly schedule needs at least one day".into()))
        }
        Recurrence::Weekly { .. } => Ok(()),
        Recurrence::Monthly { days, .. } if days.is_empty() => {
            Err(SchedulerError::InvalidSchedule("monthly schedule needs at least one day".into()))
        }
        Recurrence::Monthly { .. } => Ok(()),
        Recurrence::Interval { every: 0, .. } => {
            Err(SchedulerError::InvalidSchedule("interval must be at least 1".into()))
        }
        Recurrence::Interval { every, unit } => {
            let minutes = match unit {
                IntervalUnit::Minutes => u64::from(*every),
                IntervalUnit::Hours => u64::from(*every) * 60,
            };
            if minutes > MAX_INTERVAL_MINUTES {
                return Err(SchedulerError::InvalidSchedule(
                    "interval must not exceed one year".into(),
                ));
            }
            Ok(())
        }
        Recurrence::Cron { expression } => CronExpr::parse(expression).map(|_| ()),
    }
}

/// Next occurrence of `recurrence` strictly after `after`.
///
/// `anchor` is the origin of the interval grid (the job's `start_at`, or its
/// creation time), so interval jobs do not drift with execution time.
pub fn next_occurrence(
    recurrence: &Recurrence,
    after: DateTime<Utc>,
    anchor: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match recurrence {
        Recurrence::Daily { time } => {
            let today = at_time(after.date_naive(), *time);
            if today > after {
                Some(today)
            } else {
                Some(at_time(after.date_naive() + Duration::days(1), *time))
            }
        }

        Recurrence::Weekly { days, time } => (0..WEEKLY_SEARCH_DAYS)
            .map(|offset| after.date_naive() + Duration::days(offset))
            .filter(|date| days.contains(&date.weekday()))
            .map(|date| at_time(date, *time))
            .find(|candidate| *candidate > after),

        Recurrence::Monthly { days, time } => {
            let (mut year, mut month) = (after.year(), after.month());
            for _ in 0..=MONTHLY_SEARCH_MONTHS {
                let last = days_in_month(year, month);
                let mut concrete: Vec<u32> = days
                    .iter()
                    .filter_map(|d| match d {
                        MonthDay::Day(n) if *n <= last => Some(*n),
                        // Day 31 in a 30-day month is skipped, not clamped.
                        MonthDay::Day(_) => None,
                        MonthDay::Last => Some(last),
                    })
                    .collect();
                concrete.sort_unstable();
                concrete.dedup();

                let found = concrete
                    .into_iter()
                    .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
                    .map(|date| at_time(date, *time))
                    .find(|candidate| *candidate > after);
                if found.is_some() {
                    return found;
                }

                (year, month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
            }
            None
        }

        Recurrence::Interval { every, unit } => {
            let step = match unit {
                IntervalUnit::Minutes => Duration::minutes(i64::from(*every)),
                IntervalUnit::Hours => Duration::hours(i64::from(*every)),
            };
            let step_ms = step.num_milliseconds();
            if step_ms <= 0 {
                return None;
            }
            if anchor > after {
                return Some(anchor);
            }
            let elapsed = (after - anchor).num_milliseconds();
            let steps = elapsed / step_ms + 1;
            steps
                .checked_mul(step_ms)
                .and_then(|ms| anchor.checked_add_signed(Duration::milliseconds(ms)))
        }

        Recurrence::Cron { expression } => match CronExpr::parse(expression) {
            Ok(cron) => cron.next_after(after),
            Err(e) => {
                warn!(expression = %expression, err = %e, "unparseable cron schedule");
                None
            }
        },
    }
}

/// Next run of a recurring job, honouring `start_at` and `end_at`.
pub fn next_recurring(
    config: &ScheduleConfig,
    after: DateTime<Utc>,
    created_at: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let recurrence = config.recurrence.as_ref()?;
    let anchor = config.start_at.unwrap_or(created_at);

    // Before the window opens, search from just before `start_at` so an
    // occurrence exactly at `start_at` counts.
    let from = match config.start_at {
        Some(start) if start > after => start - Duration::nanoseconds(1),
        _ => after,
    };

    let next = next_occurrence(recurrence, from, anchor)?;
    match config.end_at {
        Some(end) if next > end => None,
        _ => Some(next),
    }
}

/// First `next_run_at` of a newly created job, after validating its config.
pub fn initial_next_run(
    job_type: JobType,
    config: &ScheduleConfig,
    run_times: &[DateTime<Utc>],
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    match job_type {
        JobType::OneTime => {
            let run_at = config.run_at.ok_or_else(|| {
                SchedulerError::InvalidSchedule("one_time job needs schedule_config.run_at".into())
            })?;
            if run_at <= now {
                return Err(SchedulerError::InvalidSchedule(format!(
                    "run_at {run_at} is not in the future"
                )));
            }
            Ok(run_at)
        }
        JobType::MultiRun => run_times.iter().copied().find(|t| *t > now).ok_or_else(|| {
            SchedulerError::InvalidSchedule(
                "multi_run job needs at least one future run time".into(),
            )
        }),
        JobType::Recurring => {
            let recurrence = config.recurrence.as_ref().ok_or_else(|| {
                SchedulerError::InvalidSchedule(
                    "recurring job needs schedule_config.recurrence".into(),
                )
            })?;
            validate(recurrence)?;
            if let (Some(start), Some(end)) = (config.start_at, config.end_at) {
                if end < start {
                    return Err(SchedulerError::InvalidSchedule("end_at is before start_at".into()));
                }
            }
            next_recurring(config, now, now).ok_or_else(|| {
                SchedulerError::InvalidSchedule("schedule has no future occurrence".into())
            })
        }
    }
}

/// Sorted, deduplicated run times strictly after `now`.
pub fn future_run_times(run_times: &[DateTime<Utc>], now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut times: Vec<_> = run_times.iter().copied().filter(|t| *t > now).collect();
    times.sort_unstable();
    times.dedup();
    times
}

fn at_time(date: NaiveDate, time: TimeOfDay) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time.0))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(28, |last| last.day())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn time(h: u32, m: u32) -> TimeOfDay {
        TimeOfDay::new(h, m).unwrap()
    }

    fn next(r: &Recurrence, after: &str) -> Option<DateTime<Utc>> {
        let after = at(after);
        next_occurrence(r, after, after)
    }

    #[test]
    fn daily_rolls_to_tomorrow_once_passed() {
        let r = Recurrence::Daily { time: time(2, 0) };
        assert_eq!(next(&r, "2026-05-10T01:59:00Z"), Some(at("2026-05-10T02:00:00Z")));
        assert_eq!(next(&r, "2026-05-10T02:00:00Z"), Some(at("2026-05-11T02:00:00Z")));
    }

    #[test]
    fn weekly_monday_from_wednesday() {
        let r = Recurrence::Weekly {
            days: vec![Weekday::Mon],
            time: time(8, 0),
        };
        // 2026-01-07 is a Wednesday.
        assert_eq!(next(&r, "2026-01-07T12:00:00Z"), Some(at("2026-01-12T08:00:00Z")));
    }

    #[test]
    fn weekly_same_day_after_time_waits_a_week() {
        let r = Recurrence::Weekly {
            days: vec![Weekday::Mon],
            time: time(8, 0),
        };
        assert_eq!(next(&r, "2026-01-12T08:00:00Z"), Some(at("2026-01-19T08:00:00Z")));
    }

    #[test]
    fn monthly_last_day_handles_short_months() {
        let r = Recurrence::Monthly {
            days: vec![MonthDay::Last],
            time: time(23, 0),
        };
        assert_eq!(next(&r, "2026-02-01T00:00:00Z"), Some(at("2026-02-28T23:00:00Z")));
        assert_eq!(next(&r, "2028-02-01T00:00:00Z"), Some(at("2028-02-29T23:00:00Z")));
    }

    #[test]
    fn monthly_skips_months_without_the_day() {
        let r = Recurrence::Monthly {
            days: vec![MonthDay::Day(31)],
            time: time(6, 0),
        };
        assert_eq!(next(&r, "2026-04-01T00:00:00Z"), Some(at("2026-05-31T06:00:00Z")));
    }

    #[test]
    fn interval_stays_on_anchor_grid() {
        let r = Recurrence::Interval {
            every: 15,
            unit: IntervalUnit::Minutes,
        };
        let anchor = at("2026-01-01T00:00:00Z");
        assert_eq!(
            next_occurrence(&r, at("2026-01-01T00:31:07Z"), anchor),
            Some(at("2026-01-01T00:45:00Z"))
        );
        assert_eq!(
            next_occurrence(&r, at("2026-01-01T00:45:00Z"), anchor),
            Some(at("2026-01-01T01:00:00Z"))
        );
    }

    #[test]
    fn start_at_anchors_first_run() {
        let config = ScheduleConfig {
            recurrence: Some(Recurrence::Daily { time: time(9, 0) }),
            start_at: Some(at("2026-06-01T09:00:00Z")),
            ..Default::default()
        };
        let now = at("2026-05-20T10:00:00Z");
        assert_eq!(next_recurring(&config, now, now), Some(at("2026-06-01T09:00:00Z")));
    }

    #[test]
    fn end_at_closes_the_window() {
        let config = ScheduleConfig {
            recurrence: Some(Recurrence::Daily { time: time(9, 0) }),
            end_at: Some(at("2026-05-21T00:00:00Z")),
            ..Default::default()
        };
        let now = at("2026-05-20T10:00:00Z");
        assert_eq!(next_recurring(&config, now, now), None);
    }

    #[test]
    fn next_is_always_after_reference() {
        let recurrences = vec![
            Recurrence::Daily { time: time(0, 0) },
            Recurrence::Weekly {
                days: vec![Weekday::Sun, Weekday::Thu],
                time: time(23, 59),
            },
            Recurrence::Monthly {
                days: vec![MonthDay::Day(1), MonthDay::Day(30), MonthDay::Last],
                time: time(12, 0),
            },
            Recurrence::Interval {
                every: 7,
                unit: IntervalUnit::Hours,
            },
            Recurrence::Cron {
                expression: "*/10 3-5 * * 1,3".into(),
            },
        ];
        let anchor = at("2025-12-31T17:13:00Z");
        let mut reference = at("2026-01-01T00:00:00Z");
        for _ in 0..200 {
            for r in &recurrences {
                let n = next_occurrence(r, reference, anchor).unwrap();
                assert!(n > reference, "{r:?} gave {n} for {reference}");
            }
            reference += Duration::minutes(437);
        }
    }

    #[test]
    fn initial_next_run_validates_per_type() {
        let now = at("2026-01-01T00:00:00Z");
        let empty = ScheduleConfig::default();
        assert!(initial_next_run(JobType::OneTime, &empty, &[], now).is_err());
        assert!(initial_next_run(JobType::MultiRun, &empty, &[now], now).is_err());
        assert!(initial_next_run(JobType::Recurring, &empty, &[], now).is_err());

        let bad_cron = ScheduleConfig {
            recurrence: Some(Recurrence::Cron {
                expression: "61 * * * *".into(),
            }),
            ..Default::default()
        };
        assert!(initial_next_run(JobType::Recurring, &bad_cron, &[], now).is_err());

        let later = now + Duration::hours(1);
        let one_time = ScheduleConfig {
            run_at: Some(later),
            ..Default::default()
        };
        assert_eq!(initial_next_run(JobType::OneTime, &one_time, &[], now).unwrap(), later);
    }

    #[test]
    fn oversized_interval_is_rejected() {
        let hours = |every| Recurrence::Interval {
            every,
            unit: IntervalUnit::Hours,
        };
        assert!(validate(&hours(24 * 366)).is_ok());
        assert!(matches!(
            validate(&hours(24 * 366 + 1)),
            Err(SchedulerError::InvalidSchedule(_))
        ));
        assert!(validate(&hours(u32::MAX)).is_err());
        // Past the calendar's end there is simply no next run.
        assert_eq!(next(&hours(u32::MAX), "2026-01-01T00:00:00Z"), None);
    }

    #[test]
    fn future_run_times_sorts_and_drops_past() {
        let now = at("2026-01-01T00:00:00Z");
        let times = vec![
            now + Duration::hours(3),
            now - Duration::hours(1),
            now + Duration::hours(1),
            now + Duration::hours(3),
        ];
        assert_eq!(
            future_run_times(&times, now),
            vec![now + Duration::hours(1), now + Duration::hours(3)]
        );
    }
}
