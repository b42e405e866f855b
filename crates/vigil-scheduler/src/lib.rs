//! `vigil-scheduler`: persisted check jobs fired on a schedule.
//!
//! Jobs live in the `scheduler_jobs` table. [`SchedulerEngine`] polls for
//! active jobs whose `next_run_at` has arrived, claims each by clearing that
//! column, runs its tasks through the engine and records a
//! [`SchedulerRun`]. [`SchedulerHandle`] manages jobs while the loop runs.
//!
//! | Job type    | Fires                                              |
//! |-------------|----------------------------------------------------|
//! | `one_time`  | once at `run_at`                                   |
//! | `multi_run` | at each listed instant, consuming it               |
//! | `recurring` | daily, weekly, monthly, every N minutes/hours, or cron |

pub mod cron;
pub mod db;
pub mod engine;
pub mod error;
pub mod handle;
pub mod schedule;
pub mod types;

pub use engine::{RunTrigger, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use handle::SchedulerHandle;
pub use types::{
    IntervalUnit, JobStatus, JobType, MonthDay, NewJob, Recurrence, RunStatus, ScheduleConfig,
    SchedulerJob, SchedulerRun, TimeOfDay,
};
