use std::fmt;

use chrono::{DateTime, NaiveTime, SecondsFormat, Utc, Weekday};
use serde::{Deserialize, Serialize};
use vigil_core::TaskSpec;

/// How a job decides when to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Fires once at `schedule_config.run_at`.
    OneTime,
    /// Fires at each of `run_times`, consuming them.
    MultiRun,
    /// Fires per `schedule_config.recurrence`.
    Recurring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Active,
    Paused,
    /// Nothing left to fire.
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($ty), ": {}"), other)),
                }
            }
        }
    };
}

text_enum!(JobType { OneTime => "one_time", MultiRun => "multi_run", Recurring => "recurring" });
text_enum!(JobStatus { Active => "active", Paused => "paused", Completed => "completed" });
text_enum!(RunStatus { Running => "running", Success => "success", Failed => "failed" });

/// Wall-clock `HH:MM` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(pub NaiveTime);

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self)
            .map_err(|e| format!("invalid time {s:?} (expected HH:MM): {e}"))
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.0.format("%H:%M").to_string()
    }
}

/// A day of the month, or the month's last day whatever its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MonthDayRepr", into = "MonthDayRepr")]
pub enum MonthDay {
    Day(u32),
    Last,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum MonthDayRepr {
    Num(u32),
    Text(String),
}

impl TryFrom<MonthDayRepr> for MonthDay {
    type Error = String;

    fn try_from(r: MonthDayRepr) -> std::result::Result<Self, Self::Error> {
        match r {
            MonthDayRepr::Num(n @ 1..=31) => Ok(MonthDay::Day(n)),
            MonthDayRepr::Num(n) => Err(format!("day of month out of range: {n}")),
            MonthDayRepr::Text(s) if s.eq_ignore_ascii_case("last") => Ok(MonthDay::Last),
            MonthDayRepr::Text(s) => s
                .parse::<u32>()
                .map_err(|_| format!("invalid day of month: {s:?}"))
                .and_then(|n| MonthDay::try_from(MonthDayRepr::Num(n))),
        }
    }
}

impl From<MonthDay> for MonthDayRepr {
    fn from(d: MonthDay) -> Self {
        match d {
            MonthDay::Day(n) => MonthDayRepr::Num(n),
            MonthDay::Last => MonthDayRepr::Text("last".into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Minutes,
    Hours,
}

/// Recurring frequency. All times are UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frequency", rename_all = "snake_case")]
pub enum Recurrence {
    Daily {
        time: TimeOfDay,
    },
    Weekly {
        days: Vec<Weekday>,
        time: TimeOfDay,
    },
    Monthly {
        days: Vec<MonthDay>,
        time: TimeOfDay,
    },
    Interval {
        every: u32,
        unit: IntervalUnit,
    },
    /// `minute hour day-of-month month day-of-week`.
    Cron {
        expression: String,
    },
}

/// Type-specific schedule parameters. Fields not used by a job's type are
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// `one_time`: when to fire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
    /// `recurring`: the frequency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    /// `recurring`: no run before this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    /// `recurring`: the job completes once the next run would fall after this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerJob {
    pub id: String,
    pub name: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub schedule_config: ScheduleConfig,
    /// Null iff paused or completed, or while a run is in flight.
    pub next_run_at: Option<DateTime<Utc>>,
    /// `multi_run` only: pending fire times, ascending.
    pub run_times: Vec<DateTime<Utc>>,
    /// `recurring` only: runs left before the job completes.
    pub remaining_runs: Option<u32>,
    pub tasks: Vec<TaskSpec>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub job_type: JobType,
    #[serde(default)]
    pub schedule_config: ScheduleConfig,
    #[serde(default)]
    pub run_times: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub remaining_runs: Option<u32>,
    pub tasks: Vec<TaskSpec>,
}

/// One firing of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerRun {
    pub id: String,
    pub job_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub error: Option<String>,
    pub total_tasks: u32,
    pub failed_tasks: u32,
}

/// Stored timestamp form. Fixed width with a `Z` suffix, so string order is
/// time order.
pub fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn from_db_time(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {s:?}: {e}"))
}
