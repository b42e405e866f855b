use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use vigil_core::{config::SchedulerConfig, TaskSpec};
use vigil_engine::{Orchestrator, RunHandle, Stage};

use crate::{
    error::{Result, SchedulerError},
    handle::SchedulerHandle,
    types::{JobStatus, RunStatus, SchedulerJob, SchedulerRun},
};

/// Starts a run of check tasks. Implemented by [`Orchestrator`]; tests
/// substitute their own.
#[async_trait]
pub trait RunTrigger: Send + Sync {
    async fn start(&self, tasks: Vec<TaskSpec>) -> RunHandle;
}

#[async_trait]
impl RunTrigger for Orchestrator {
    async fn start(&self, tasks: Vec<TaskSpec>) -> RunHandle {
        Orchestrator::start(self, tasks)
    }
}

/// Polls for due jobs and fires them through a [`RunTrigger`].
#[derive(Clone)]
pub struct SchedulerEngine {
    handle: SchedulerHandle,
    trigger: Arc<dyn RunTrigger>,
    poll_interval: Duration,
    batch_size: usize,
}

impl SchedulerEngine {
    pub fn new(
        handle: SchedulerHandle,
        trigger: Arc<dyn RunTrigger>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            handle,
            trigger,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn handle(&self) -> &SchedulerHandle {
        &self.handle
    }

    /// Poll until `cancel` fires. A job already running when cancellation
    /// arrives is driven to completion first.
    ///
    /// Jobs and runs left mid-fire by a previous process are recovered
    /// before the first poll.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            batch_size = self.batch_size,
            "scheduler engine started"
        );
        if let Err(e) = self.handle.recover(Utc::now()) {
            error!("scheduler recovery failed: {e}");
        }
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.tick(Utc::now()).await {
                error!("scheduler tick error: {e}");
            }
        }
        info!("scheduler engine stopped");
    }

    /// Fire every job due at `now`, one batch. Returns how many fired.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.handle.due_jobs(now, self.batch_size)?;
        let mut fired = 0;
        for job in due {
            if !self.handle.claim(&job.id)? {
                debug!(job_id = %job.id, "job already claimed");
                continue;
            }
            fired += 1;
            let span = info_span!("job", job_id = %job.id, name = %job.name);
            if let Err(e) = self.execute(&job).instrument(span).await {
                error!(job_id = %job.id, err = %e, "scheduled job failed");
            }
        }
        Ok(fired)
    }

    /// Fire a job now, outside its schedule. The run proceeds in the
    /// background; the returned record is in the `running` state.
    pub fn trigger(&self, id: &str) -> Result<SchedulerRun> {
        let job = self.handle.get_job(id)?;
        match job.status {
            JobStatus::Completed => {
                return Err(SchedulerError::InvalidState(format!("job {id} is completed")))
            }
            // Paused jobs have no pending run to claim.
            JobStatus::Paused => {}
            JobStatus::Active => {
                if !self.handle.claim(id)? {
                    return Err(SchedulerError::InvalidState(format!(
                        "job {id} is already running"
                    )));
                }
            }
        }

        let run = match self.handle.start_run(&job.id, Utc::now()) {
            Ok(run) => run,
            Err(e) => {
                self.release(&job.id);
                return Err(e);
            }
        };
        info!(job_id = %job.id, run_id = %run.id, "manual trigger");
        let this = self.clone();
        let started = run.clone();
        let span = info_span!("job", job_id = %job.id, name = %job.name);
        tokio::spawn(
            async move {
                if let Err(e) = this.drive(&job, started).await {
                    error!(err = %e, "triggered job failed");
                }
            }
            .instrument(span),
        );
        Ok(run)
    }

    /// Run a claimed job to completion and reschedule it. On error the
    /// job is never left claimed.
    pub async fn execute(&self, job: &SchedulerJob) -> Result<SchedulerRun> {
        let run = match self.handle.start_run(&job.id, Utc::now()) {
            Ok(run) => run,
            Err(e) => {
                self.release(&job.id);
                return Err(e);
            }
        };
        self.drive(job, run).await
    }

    fn release(&self, job_id: &str) {
        if let Err(e) = self.handle.release(job_id, Utc::now()) {
            error!(job_id, err = %e, "claimed job could not be released");
        }
    }

    async fn drive(&self, job: &SchedulerJob, mut run: SchedulerRun) -> Result<SchedulerRun> {
        let mut handle = self.trigger.start(job.tasks.clone()).await;
        run.session_id = Some(handle.session_id.to_string());

        let mut summary = None;
        while let Some(event) = handle.events.recv().await {
            if let Stage::Complete { total_tasks, failed } = event.stage {
                summary = Some((total_tasks, failed));
            }
        }
        let joined = handle.join.await;

        match (summary, joined) {
            (Some((total, failed)), _) => {
                run.total_tasks = u32::try_from(total).unwrap_or(u32::MAX);
                run.failed_tasks = u32::try_from(failed).unwrap_or(u32::MAX);
                if failed == 0 {
                    run.status = RunStatus::Success;
                } else {
                    run.status = RunStatus::Failed;
                    run.error = Some(format!("{failed} of {total} task(s) failed"));
                }
            }
            (None, Err(e)) => {
                run.status = RunStatus::Failed;
                run.error = Some(format!("run aborted: {e}"));
            }
            (None, Ok(_)) => {
                run.status = RunStatus::Failed;
                run.error = Some("run ended without a complete event".into());
            }
        }

        let now = Utc::now();
        run.finished_at = Some(now);
        // The job fired either way, so it is rescheduled even when the run
        // row cannot be updated.
        let recorded = self.handle.finish_run(&run);
        if let Err(e) = &recorded {
            error!(job_id = %job.id, run_id = %run.id, err = %e, "could not record run outcome");
        }

        match self.handle.record_fire(&job.id, now) {
            Ok(updated) => info!(
                run_status = %run.status,
                failed_tasks = run.failed_tasks,
                job_status = %updated.status,
                "job run finished"
            ),
            // Deleted while running: the run row went with it.
            Err(SchedulerError::JobNotFound { .. }) => {
                warn!(job_id = %job.id, "job deleted during its run")
            }
            Err(e) => {
                self.release(&job.id);
                return Err(e);
            }
        }
        recorded?;
        Ok(run)
    }
}
