//! Five-field cron expressions: `minute hour day-of-month month day-of-week`.
//!
//! Each field accepts `*`, single values, `a-b` ranges, comma lists and a
//! `/step` suffix on `*` or a range. Day-of-week is 0–7 with both 0 and 7
//! meaning Sunday. When day-of-month and day-of-week are both restricted a
//! day matches if either does. A field starting with `*` (including `*/n`)
//! counts as unrestricted for that rule.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use crate::error::{Result, SchedulerError};

/// Upper bound on the day search. Leap-day-only expressions fire within it.
const SEARCH_DAYS: i64 = 4 * 366 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: Field = Field { name: "minute", min: 0, max: 59 };
const HOUR: Field = Field { name: "hour", min: 0, max: 23 };
const DAY_OF_MONTH: Field = Field { name: "day-of-month", min: 1, max: 31 };
const MONTH: Field = Field { name: "month", min: 1, max: 12 };
const DAY_OF_WEEK: Field = Field { name: "day-of-week", min: 0, max: 7 };

impl CronExpr {
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let &[minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(invalid(format!(
                "expected 5 fields, got {} in {expression:?}",
                fields.len()
            )));
        };

        let mut days_of_week = parse_field(dow, &DAY_OF_WEEK)?;
        // 7 is an alias for Sunday.
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes: parse_field(minute, &MINUTE)?,
            hours: parse_field(hour, &HOUR)?,
            days_of_month: parse_field(dom, &DAY_OF_MONTH)?,
            months: parse_field(month, &MONTH)?,
            days_of_week,
            dom_restricted: !dom.starts_with('*'),
            dow_restricted: !dow.starts_with('*'),
        })
    }

    /// First matching minute strictly after `after`, if any within four years.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start_date = after.date_naive();
        for offset in 0..SEARCH_DAYS {
            let date = start_date + Duration::days(offset);
            if !self.matches_date(date) {
                continue;
            }
            for hour in bits(self.hours, 0, 23) {
                for minute in bits(self.minutes, 0, 59) {
                    let Some(candidate) = date
                        .and_hms_opt(hour, minute, 0)
                        .map(|naive| Utc.from_utc_datetime(&naive))
                    else {
                        continue;
                    };
                    if candidate > after {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        if self.months & (1 << date.month()) == 0 {
            return false;
        }
        let dom = self.days_of_month & (1 << date.day()) != 0;
        let dow = self.days_of_week & (1 << date.weekday().num_days_from_sunday()) != 0;
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// Whether `at` (truncated to the minute) is a firing time.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.matches_date(at.date_naive())
            && self.hours & (1 << at.hour()) != 0
            && self.minutes & (1 << at.minute()) != 0
    }
}

fn parse_field(text: &str, field: &Field) -> Result<u64> {
    let mut mask = 0u64;
    for item in text.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("bad step {step:?} in {} field", field.name)))?;
                if step == 0 {
                    return Err(invalid(format!("zero step in {} field", field.name)));
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (lo, hi) = if range == "*" {
            (field.min, field.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (value(a, field)?, value(b, field)?)
        } else {
            let v = value(range, field)?;
            // `5/15` means from 5 to the end in steps of 15.
            if item.contains('/') {
                (v, field.max)
            } else {
                (v, v)
            }
        };
        if lo > hi {
            return Err(invalid(format!(
                "descending range {lo}-{hi} in {} field",
                field.name
            )));
        }

        let mut v = lo;
        while v <= hi {
            mask |= 1 << v;
            v += step;
        }
    }
    Ok(mask)
}

fn value(text: &str, field: &Field) -> Result<u32> {
    let v: u32 = text
        .parse()
        .map_err(|_| invalid(format!("bad value {text:?} in {} field", field.name)))?;
    if v < field.min || v > field.max {
        return Err(invalid(format!(
            "{v} outside {}-{} in {} field",
            field.min, field.max, field.name
        )));
    }
    Ok(v)
}

fn bits(mask: u64, min: u32, max: u32) -> impl Iterator<Item = u32> {
    (min..=max).filter(move |v| mask & (1 << v) != 0)
}

fn invalid(msg: String) -> SchedulerError {
    SchedulerError::InvalidSchedule(format!("cron: {msg}"))
}
