//! Job and run persistence shared by the poll loop and the HTTP handlers.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    schedule::{future_run_times, initial_next_run, next_recurring},
    types::{
        from_db_time, to_db_time, JobStatus, JobType, NewJob, RunStatus, SchedulerJob,
        SchedulerRun,
    },
};

const JOB_COLUMNS: &str = "id, name, job_type, status, schedule_config, next_run_at, run_times,
     remaining_runs, tasks, last_run_at, created_at, updated_at";

const RUN_COLUMNS: &str =
    "id, job_id, status, started_at, finished_at, session_id, error, total_tasks, failed_tasks";

/// Cloneable handle over the scheduler tables.
///
/// The HTTP layer and the engine share one handle; each call takes the lock
/// for a single statement or a short read-modify-write.
#[derive(Clone)]
pub struct SchedulerHandle {
    conn: Arc<Mutex<Connection>>,
}

impl SchedulerHandle {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SchedulerError::LockPoisoned)
    }

    /// Validate and persist a new active job.
    #[instrument(skip(self, new), fields(name = %new.name, job_type = %new.job_type))]
    pub fn create_job(&self, new: NewJob) -> Result<SchedulerJob> {
        let now = Utc::now();
        if new.name.trim().is_empty() {
            return Err(SchedulerError::InvalidSchedule("job name is empty".into()));
        }
        if new.tasks.is_empty() {
            return Err(SchedulerError::InvalidSchedule("job has no tasks".into()));
        }
        if new.remaining_runs == Some(0) {
            return Err(SchedulerError::InvalidSchedule(
                "remaining_runs must be at least 1".into(),
            ));
        }

        let run_times = match new.job_type {
            JobType::MultiRun => {
                let future = future_run_times(&new.run_times, now);
                if future.len() < new.run_times.len() {
                    warn!(
                        dropped = new.run_times.len() - future.len(),
                        "ignoring past or duplicate run times"
                    );
                }
                future
            }
            _ => Vec::new(),
        };
        let next = initial_next_run(new.job_type, &new.schedule_config, &run_times, now)?;

        let job = SchedulerJob {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            job_type: new.job_type,
            status: JobStatus::Active,
            schedule_config: new.schedule_config,
            next_run_at: Some(next),
            run_times,
            remaining_runs: match new.job_type {
                JobType::Recurring => new.remaining_runs,
                _ => None,
            },
            tasks: new.tasks,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        };

        self.conn()?.execute(
            "INSERT INTO scheduler_jobs
             (id, name, job_type, status, schedule_config, next_run_at, run_times,
              remaining_runs, tasks, last_run_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?10)",
            params![
                job.id,
                job.name,
                job.job_type.as_str(),
                job.status.as_str(),
                serde_json::to_string(&job.schedule_config)?,
                to_db_time(&next),
                serde_json::to_string(&job.run_times)?,
                job.remaining_runs,
                serde_json::to_string(&job.tasks)?,
                to_db_time(&now),
            ],
        )?;
        info!(job_id = %job.id, next_run_at = %next, "job created");
        Ok(job)
    }

    pub fn get_job(&self, id: &str) -> Result<SchedulerJob> {
        let conn = self.conn()?;
        load_job(&conn, id)
    }

    /// All jobs, oldest first. Rows that fail to decode are logged and skipped.
    pub fn list_jobs(&self) -> Result<Vec<SchedulerJob>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduler_jobs ORDER BY created_at, id"
        ))?;
        let jobs = stmt
            .query_map([], RawJob::from_row)?
            .filter_map(|row| match row.map_err(SchedulerError::from).and_then(RawJob::into_job) {
                Ok(job) => Some(job),
                Err(e) => {
                    error!(err = %e, "skipping unreadable job row");
                    None
                }
            })
            .collect();
        Ok(jobs)
    }

    /// Delete a job and its run history.
    pub fn delete_job(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM scheduler_jobs WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        conn.execute("DELETE FROM scheduler_runs WHERE job_id = ?1", [id])?;
        info!(job_id = %id, "job deleted");
        Ok(())
    }

    /// Stop a job from being picked up. A run already in flight finishes.
    pub fn pause_job(&self, id: &str) -> Result<SchedulerJob> {
        let conn = self.conn()?;
        let mut job = load_job(&conn, id)?;
        match job.status {
            JobStatus::Completed => {
                return Err(SchedulerError::InvalidState(format!("job {id} is completed")))
            }
            JobStatus::Paused => return Ok(job),
            JobStatus::Active => {}
        }
        job.status = JobStatus::Paused;
        job.next_run_at = None;
        job.updated_at = Utc::now();
        save_state(&conn, &job)?;
        info!(job_id = %id, "job paused");
        Ok(job)
    }

    /// Reactivate a paused job, recomputing its next run from now.
    ///
    /// A `one_time` job whose `run_at` has passed fires on the next poll. A
    /// job with nothing left to run becomes completed instead.
    pub fn resume_job(&self, id: &str) -> Result<SchedulerJob> {
        let conn = self.conn()?;
        let mut job = load_job(&conn, id)?;
        match job.status {
            JobStatus::Completed => {
                return Err(SchedulerError::InvalidState(format!("job {id} is completed")))
            }
            JobStatus::Active => return Ok(job),
            JobStatus::Paused => {}
        }

        let now = Utc::now();
        let next = match job.job_type {
            JobType::OneTime => Some(job.schedule_config.run_at.ok_or_else(|| {
                SchedulerError::InvalidRecord(format!("one_time job {id} has no run_at"))
            })?),
            JobType::MultiRun => {
                job.run_times.retain(|t| *t > now);
                job.run_times.first().copied()
            }
            JobType::Recurring => next_recurring(&job.schedule_config, now, job.created_at),
        };

        job.status = if next.is_some() {
            JobStatus::Active
        } else {
            JobStatus::Completed
        };
        job.next_run_at = next;
        job.updated_at = now;
        save_state(&conn, &job)?;
        info!(job_id = %id, status = %job.status, "job resumed");
        Ok(job)
    }

    /// Active jobs whose next run is at or before `now`, earliest first.
    pub fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<SchedulerJob>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduler_jobs
             WHERE status = 'active' AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at
             LIMIT ?2"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let jobs = stmt
            .query_map(params![to_db_time(&now), limit], RawJob::from_row)?
            .filter_map(|row| match row.map_err(SchedulerError::from).and_then(RawJob::into_job) {
                Ok(job) => Some(job),
                Err(e) => {
                    error!(err = %e, "skipping unreadable due job");
                    None
                }
            })
            .collect();
        Ok(jobs)
    }

    /// Clear `next_run_at` so no other poller picks the job up. Returns false
    /// if the job was already claimed, paused or completed.
    pub fn claim(&self, id: &str) -> Result<bool> {
        let n = self.conn()?.execute(
            "UPDATE scheduler_jobs SET next_run_at = NULL, updated_at = ?2
             WHERE id = ?1 AND status = 'active' AND next_run_at IS NOT NULL",
            params![id, to_db_time(&Utc::now())],
        )?;
        Ok(n == 1)
    }

    /// Advance a job after it fired and its run finished at `now`.
    ///
    /// Every fire, manual ones included, counts as the next occurrence.
    /// `one_time` completes. `multi_run` pops its earliest run time, drops any
    /// others that passed while it ran, and completes when none remain.
    /// `recurring` consumes one of `remaining_runs` if set and schedules its
    /// next occurrence after `now`. A job paused while it ran stays paused.
    #[instrument(skip(self))]
    pub fn record_fire(&self, id: &str, now: DateTime<Utc>) -> Result<SchedulerJob> {
        let conn = self.conn()?;
        let mut job = load_job(&conn, id)?;

        let next = match job.job_type {
            JobType::OneTime => None,
            JobType::MultiRun => {
                if !job.run_times.is_empty() {
                    job.run_times.remove(0);
                }
                let before = job.run_times.len();
                job.run_times.retain(|t| *t > now);
                let skipped = before - job.run_times.len();
                if skipped > 0 {
                    warn!(job_id = %id, skipped, "run times passed while the job was running");
                }
                job.run_times.first().copied()
            }
            JobType::Recurring => {
                job.remaining_runs = job.remaining_runs.map(|n| n.saturating_sub(1));
                if job.remaining_runs == Some(0) {
                    None
                } else {
                    next_recurring(&job.schedule_config, now, job.created_at)
                }
            }
        };

        job.last_run_at = Some(now);
        job.updated_at = now;
        match (job.status, next) {
            (JobStatus::Active, Some(next)) => job.next_run_at = Some(next),
            (JobStatus::Paused, Some(_)) => job.next_run_at = None,
            (_, None) => {
                job.status = JobStatus::Completed;
                job.next_run_at = None;
            }
            (JobStatus::Completed, Some(_)) => job.next_run_at = None,
        }
        save_state(&conn, &job)?;
        info!(
            job_id = %id,
            status = %job.status,
            next_run_at = ?job.next_run_at,
            "job rescheduled"
        );
        Ok(job)
    }

    /// Put a claimed job back on its schedule after a fire that could not
    /// be carried through. No occurrence is consumed: `one_time` and
    /// `multi_run` become due again at their pending time, `recurring`
    /// resumes from its next occurrence after `now`.
    ///
    /// Returns `None` when the job is not in the claimed state (active with no
    /// next run), so releasing twice is harmless.
    #[instrument(skip(self))]
    pub fn release(&self, id: &str, now: DateTime<Utc>) -> Result<Option<SchedulerJob>> {
        let conn = self.conn()?;
        let job = load_job(&conn, id)?;
        release_claimed(&conn, job, now)
    }

    /// Startup recovery after an unclean stop. Runs left `running` are
    /// marked failed and every claimed job is released. Returns how many
    /// jobs were put back.
    pub fn recover(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let interrupted = conn.execute(
            "UPDATE scheduler_runs
             SET status = 'failed', finished_at = ?1, error = 'interrupted by shutdown'
             WHERE status = 'running'",
            [to_db_time(&now)],
        )?;
        if interrupted > 0 {
            warn!(interrupted, "marked unfinished runs as failed");
        }

        let claimed: Vec<SchedulerJob> = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM scheduler_jobs
                 WHERE status = 'active' AND next_run_at IS NULL"
            ))?;
            let jobs = stmt
                .query_map([], RawJob::from_row)?
                .map(|row| row.map_err(SchedulerError::from).and_then(RawJob::into_job))
                .collect::<Result<Vec<_>>>()?;
            jobs
        };
        let mut released = 0;
        for job in claimed {
            if release_claimed(&conn, job, now)?.is_some() {
                released += 1;
            }
        }
        if released > 0 {
            info!(released, "claimed jobs returned to their schedule");
        }
        Ok(released)
    }

    pub fn start_run(&self, job_id: &str, now: DateTime<Utc>) -> Result<SchedulerRun> {
        let run = SchedulerRun {
            id: Uuid::now_v7().to_string(),
            job_id: job_id.to_string(),
            status: RunStatus::Running,
            started_at: now,
            finished_at: None,
            session_id: None,
            error: None,
            total_tasks: 0,
            failed_tasks: 0,
        };
        self.conn()?.execute(
            "INSERT INTO scheduler_runs (id, job_id, status, started_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![run.id, run.job_id, run.status.as_str(), to_db_time(&now)],
        )?;
        Ok(run)
    }

    /// Persist the final state of `run`.
    pub fn finish_run(&self, run: &SchedulerRun) -> Result<()> {
        self.conn()?.execute(
            "UPDATE scheduler_runs
             SET status = ?2, finished_at = ?3, session_id = ?4, error = ?5,
                 total_tasks = ?6, failed_tasks = ?7
             WHERE id = ?1",
            params![
                run.id,
                run.status.as_str(),
                run.finished_at.as_ref().map(to_db_time),
                run.session_id,
                run.error,
                run.total_tasks,
                run.failed_tasks,
            ],
        )?;
        Ok(())
    }

    /// Most recent runs of a job first.
    pub fn list_runs(&self, job_id: &str, limit: usize) -> Result<Vec<SchedulerRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM scheduler_runs
             WHERE job_id = ?1
             ORDER BY started_at DESC, id DESC
             LIMIT ?2"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![job_id, limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, u32>(7)?,
                row.get::<_, u32>(8)?,
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (id, job_id, status, started_at, finished_at, session_id, error, total, failed) =
                row?;
            runs.push(SchedulerRun {
                id,
                job_id,
                status: status.parse().map_err(SchedulerError::InvalidRecord)?,
                started_at: from_db_time(&started_at).map_err(SchedulerError::InvalidRecord)?,
                finished_at: finished_at
                    .as_deref()
                    .map(from_db_time)
                    .transpose()
                    .map_err(SchedulerError::InvalidRecord)?,
                session_id,
                error,
                total_tasks: total,
                failed_tasks: failed,
            });
        }
        Ok(runs)
    }
}

fn load_job(conn: &Connection, id: &str) -> Result<SchedulerJob> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM scheduler_jobs WHERE id = ?1"),
        [id],
        RawJob::from_row,
    )
    .optional()?
    .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?
    .into_job()
}

fn release_claimed(
    conn: &Connection,
    mut job: SchedulerJob,
    now: DateTime<Utc>,
) -> Result<Option<SchedulerJob>> {
    if job.status != JobStatus::Active || job.next_run_at.is_some() {
        return Ok(None);
    }
    let next = match job.job_type {
        JobType::OneTime => job.schedule_config.run_at,
        JobType::MultiRun => job.run_times.first().copied(),
        JobType::Recurring => next_recurring(&job.schedule_config, now, job.created_at),
    };
    match next {
        Some(next) => job.next_run_at = Some(next),
        None => job.status = JobStatus::Completed,
    }
    job.updated_at = now;
    save_state(conn, &job)?;
    warn!(
        job_id = %job.id,
        status = %job.status,
        next_run_at = ?job.next_run_at,
        "claimed job released"
    );
    Ok(Some(job))
}

/// Write back the mutable scheduling fields of `job`.
fn save_state(conn: &Connection, job: &SchedulerJob) -> Result<()> {
    conn.execute(
        "UPDATE scheduler_jobs
         SET status = ?2, next_run_at = ?3, run_times = ?4, remaining_runs = ?5,
             last_run_at = ?6, updated_at = ?7
         WHERE id = ?1",
        params![
            job.id,
            job.status.as_str(),
            job.next_run_at.as_ref().map(to_db_time),
            serde_json::to_string(&job.run_times)?,
            job.remaining_runs,
            job.last_run_at.as_ref().map(to_db_time),
            to_db_time(&job.updated_at),
        ],
    )?;
    Ok(())
}

/// Column values before decoding.
struct RawJob {
    id: String,
    name: String,
    job_type: String,
    status: String,
    schedule_config: String,
    next_run_at: Option<String>,
    run_times: String,
    remaining_runs: Option<u32>,
    tasks: String,
    last_run_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            job_type: row.get(2)?,
            status: row.get(3)?,
            schedule_config: row.get(4)?,
            next_run_at: row.get(5)?,
            run_times: row.get(6)?,
            remaining_runs: row.get(7)?,
            tasks: row.get(8)?,
            last_run_at: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_job(self) -> Result<SchedulerJob> {
        let time = |s: &str| from_db_time(s).map_err(SchedulerError::InvalidRecord);
        Ok(SchedulerJob {
            job_type: self.job_type.parse().map_err(SchedulerError::InvalidRecord)?,
            status: self.status.parse().map_err(SchedulerError::InvalidRecord)?,
            schedule_config: serde_json::from_str(&self.schedule_config)?,
            next_run_at: self.next_run_at.as_deref().map(time).transpose()?,
            run_times: serde_json::from_str(&self.run_times)?,
            remaining_runs: self.remaining_runs,
            tasks: serde_json::from_str(&self.tasks)?,
            last_run_at: self.last_run_at.as_deref().map(time).transpose()?,
            created_at: time(&self.created_at)?,
            updated_at: time(&self.updated_at)?,
            id: self.id,
            name: self.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vigil_core::TaskSpec;

    use crate::types::{IntervalUnit, Recurrence, ScheduleConfig};

    fn handle() -> SchedulerHandle {
        SchedulerHandle::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn tasks() -> Vec<TaskSpec> {
        vec![TaskSpec {
            host_id: "web-01".into(),
            script_ids: vec!["ssh-root-login".into()],
        }]
    }

    fn one_time(at: DateTime<Utc>) -> NewJob {
        NewJob {
            name: "nightly".into(),
            job_type: JobType::OneTime,
            schedule_config: ScheduleConfig {
                run_at: Some(at),
                ..Default::default()
            },
            run_times: Vec::new(),
            remaining_runs: None,
            tasks: tasks(),
        }
    }

    fn every_hour(remaining_runs: Option<u32>) -> NewJob {
        NewJob {
            name: "hourly".into(),
            job_type: JobType::Recurring,
            schedule_config: ScheduleConfig {
                recurrence: Some(Recurrence::Interval {
                    every: 1,
                    unit: IntervalUnit::Hours,
                }),
                ..Default::default()
            },
            run_times: Vec::new(),
            remaining_runs,
            tasks: tasks(),
        }
    }

    #[test]
    fn created_job_round_trips() {
        let h = handle();
        let at = Utc::now() + Duration::hours(2);
        let job = h.create_job(one_time(at)).unwrap();
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.next_run_at, Some(at));

        let loaded = h.get_job(&job.id).unwrap();
        assert_eq!(loaded.tasks, job.tasks);
        assert_eq!(loaded.schedule_config, job.schedule_config);
        // Stored with millisecond precision.
        assert!((loaded.next_run_at.unwrap() - at).num_milliseconds().abs() < 1);
        assert_eq!(h.list_jobs().unwrap().len(), 1);
    }

    #[test]
    fn invalid_jobs_are_rejected() {
        let h = handle();
        let past = one_time(Utc::now() - Duration::minutes(1));
        assert!(matches!(h.create_job(past), Err(SchedulerError::InvalidSchedule(_))));

        let mut no_tasks = one_time(Utc::now() + Duration::hours(1));
        no_tasks.tasks.clear();
        assert!(h.create_job(no_tasks).is_err());

        assert!(h.create_job(every_hour(Some(0))).is_err());
        assert!(h.list_jobs().unwrap().is_empty());
    }

    #[test]
    fn claim_succeeds_once() {
        let h = handle();
        let job = h.create_job(every_hour(None)).unwrap();
        assert!(h.claim(&job.id).unwrap());
        assert!(!h.claim(&job.id).unwrap());
        assert_eq!(h.get_job(&job.id).unwrap().next_run_at, None);
    }

    #[test]
    fn paused_jobs_are_not_due_and_resume_reschedules() {
        let h = handle();
        let job = h.create_job(every_hour(None)).unwrap();
        let later = Utc::now() + Duration::hours(2);
        assert_eq!(h.due_jobs(later, 20).unwrap().len(), 1);

        let paused = h.pause_job(&job.id).unwrap();
        assert_eq!(paused.status, JobStatus::Paused);
        assert_eq!(paused.next_run_at, None);
        assert!(h.due_jobs(later, 20).unwrap().is_empty());
        assert!(!h.claim(&job.id).unwrap());

        let resumed = h.resume_job(&job.id).unwrap();
        assert_eq!(resumed.status, JobStatus::Active);
        assert!(resumed.next_run_at.unwrap() > Utc::now());
    }

    #[test]
    fn one_time_completes_after_firing() {
        let h = handle();
        let job = h.create_job(one_time(Utc::now() + Duration::minutes(5))).unwrap();
        let fired = h.record_fire(&job.id, Utc::now()).unwrap();
        assert_eq!(fired.status, JobStatus::Completed);
        assert_eq!(fired.next_run_at, None);
        assert!(fired.last_run_at.is_some());
        assert!(matches!(h.resume_job(&job.id), Err(SchedulerError::InvalidState(_))));
        assert!(matches!(h.pause_job(&job.id), Err(SchedulerError::InvalidState(_))));
    }

    #[test]
    fn remaining_runs_count_down_to_completion() {
        let h = handle();
        let job = h.create_job(every_hour(Some(2))).unwrap();
        let first = h.record_fire(&job.id, Utc::now()).unwrap();
        assert_eq!(first.remaining_runs, Some(1));
        assert_eq!(first.status, JobStatus::Active);
        let second = h.record_fire(&job.id, Utc::now()).unwrap();
        assert_eq!(second.remaining_runs, Some(0));
        assert_eq!(second.status, JobStatus::Completed);
    }

    #[test]
    fn pausing_mid_run_survives_reschedule() {
        let h = handle();
        let job = h.create_job(every_hour(None)).unwrap();
        assert!(h.claim(&job.id).unwrap());
        h.pause_job(&job.id).unwrap();
        let after = h.record_fire(&job.id, Utc::now()).unwrap();
        assert_eq!(after.status, JobStatus::Paused);
        assert_eq!(after.next_run_at, None);
    }

    #[test]
    fn runs_are_listed_newest_first() {
        let h = handle();
        let job = h.create_job(every_hour(None)).unwrap();
        let t0 = Utc::now();
        let first = h.start_run(&job.id, t0).unwrap();
        let mut second = h.start_run(&job.id, t0 + Duration::seconds(1)).unwrap();
        second.status = RunStatus::Success;
        second.finished_at = Some(t0 + Duration::seconds(2));
        second.total_tasks = 3;
        h.finish_run(&second).unwrap();

        let runs = h.list_runs(&job.id, 10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second.id);
        assert_eq!(runs[0].status, RunStatus::Success);
        assert_eq!(runs[0].total_tasks, 3);
        assert_eq!(runs[1].id, first.id);
        assert_eq!(runs[1].status, RunStatus::Running);
    }

    #[test]
    fn release_restores_the_pending_occurrence() {
        let h = handle();
        let at = Utc::now() + Duration::minutes(5);
        let once = h.create_job(one_time(at)).unwrap();
        let hourly = h.create_job(every_hour(None)).unwrap();

        // Not claimed yet: nothing to release.
        assert!(h.release(&once.id, Utc::now()).unwrap().is_none());

        assert!(h.claim(&once.id).unwrap());
        assert!(h.claim(&hourly.id).unwrap());
        let once = h.release(&once.id, Utc::now()).unwrap().unwrap();
        assert_eq!(once.status, JobStatus::Active);
        assert!((once.next_run_at.unwrap() - at).num_milliseconds().abs() < 1);
        let hourly = h.release(&hourly.id, Utc::now()).unwrap().unwrap();
        assert!(hourly.next_run_at.unwrap() > Utc::now());
        assert_eq!(hourly.last_run_at, None);
    }

    #[test]
    fn release_leaves_paused_jobs_alone() {
        let h = handle();
        let job = h.create_job(every_hour(None)).unwrap();
        assert!(h.claim(&job.id).unwrap());
        h.pause_job(&job.id).unwrap();
        assert!(h.release(&job.id, Utc::now()).unwrap().is_none());
        assert_eq!(h.get_job(&job.id).unwrap().status, JobStatus::Paused);
    }

    #[test]
    fn recover_fails_interrupted_runs_and_releases_claims() {
        let h = handle();
        let stuck = h.create_job(every_hour(None)).unwrap();
        let idle = h.create_job(every_hour(None)).unwrap();
        assert!(h.claim(&stuck.id).unwrap());
        let run = h.start_run(&stuck.id, Utc::now()).unwrap();

        assert_eq!(h.recover(Utc::now()).unwrap(), 1);
        assert!(h.get_job(&stuck.id).unwrap().next_run_at.is_some());
        assert_eq!(h.get_job(&idle.id).unwrap().next_run_at, idle.next_run_at);

        let runs = h.list_runs(&stuck.id, 10).unwrap();
        assert_eq!(runs[0].id, run.id);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].finished_at.is_some());
        assert_eq!(h.recover(Utc::now()).unwrap(), 0);
    }

    #[test]
    fn delete_removes_job_and_runs() {
        let h = handle();
        let job = h.create_job(every_hour(None)).unwrap();
        h.start_run(&job.id, Utc::now()).unwrap();
        h.delete_job(&job.id).unwrap();
        assert!(matches!(h.get_job(&job.id), Err(SchedulerError::JobNotFound { .. })));
        assert!(h.list_runs(&job.id, 10).unwrap().is_empty());
        assert!(matches!(h.delete_job(&job.id), Err(SchedulerError::JobNotFound { .. })));
    }
}
