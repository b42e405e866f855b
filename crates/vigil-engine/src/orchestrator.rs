use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};
use vigil_classifier::Classifier;
use vigil_connector::{CommandExecutor, Connector, ConnectorFactory, Preflight, RetryPolicy};
use vigil_core::{
    config::ConnectorConfig, CheckStatus, ErrorCode, ExecutionResult, Host, Script, SessionId,
    TaskSpec, Verdict,
};

use crate::{
    error::EngineError,
    events::{ProgressEvent, ProgressSink, Stage},
    store::{Inventory, ResultSink},
};

/// Outcome of a whole run, as also reported by its `complete` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub session_id: SessionId,
    pub total_tasks: usize,
    pub failed_tasks: usize,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.failed_tasks == 0
    }
}

/// A run in flight. Dropping `events` does not stop it; awaiting `join`
/// waits for it.
pub struct RunHandle {
    pub session_id: SessionId,
    pub events: mpsc::UnboundedReceiver<ProgressEvent>,
    pub join: JoinHandle<RunSummary>,
}

/// Drives tasks through preflight, execution and classification.
#[derive(Clone)]
pub struct Orchestrator {
    factory: Arc<dyn ConnectorFactory>,
    inventory: Arc<dyn Inventory>,
    sink: Arc<dyn ResultSink>,
    preflight: Preflight,
    executor: CommandExecutor,
    classifier: Classifier,
}

impl Orchestrator {
    pub fn new(
        factory: Arc<dyn ConnectorFactory>,
        inventory: Arc<dyn Inventory>,
        sink: Arc<dyn ResultSink>,
        preflight: Preflight,
        executor: CommandExecutor,
        classifier: Classifier,
    ) -> Self {
        Self {
            factory,
            inventory,
            sink,
            preflight,
            executor,
            classifier,
        }
    }

    /// Wire gates and executor from connector settings.
    pub fn from_config(
        config: &ConnectorConfig,
        factory: Arc<dyn ConnectorFactory>,
        inventory: Arc<dyn Inventory>,
        sink: Arc<dyn ResultSink>,
        classifier: Classifier,
    ) -> Self {
        Self::new(
            factory,
            inventory,
            sink,
            Preflight::new(
                Duration::from_secs(config.network_timeout_secs),
                RetryPolicy::from(&config.retry),
            ),
            CommandExecutor::new(
                Duration::from_secs(config.command_timeout_secs),
                config.max_output_chars,
            ),
            classifier,
        )
    }

    /// Start a run on its own task and hand back its event stream.
    pub fn start(&self, tasks: Vec<TaskSpec>) -> RunHandle {
        let session_id = SessionId::new();
        let (events, rx) = ProgressSink::channel(session_id.clone());
        let this = self.clone();
        let span = info_span!("run", session_id = %session_id);
        let sid = session_id.clone();
        let join = tokio::spawn(async move { this.run(sid, tasks, events).await }.instrument(span));
        RunHandle {
            session_id,
            events: rx,
            join,
        }
    }

    /// Run every task in order. Always ends with a `complete` event.
    pub async fn run(
        &self,
        session_id: SessionId,
        tasks: Vec<TaskSpec>,
        mut events: ProgressSink,
    ) -> RunSummary {
        let total_tasks = tasks.len();
        info!(total_tasks, "run started");
        events.status(format!("starting {total_tasks} task(s)"));

        let mut failed_tasks = 0;
        for (task_index, task) in tasks.iter().enumerate() {
            events.emit(Stage::TaskStart {
                task_index,
                total_tasks,
                host_id: task.host_id.clone(),
                script_count: task.script_ids.len(),
            });

            let mut ctx = TaskContext {
                session_id: &session_id,
                task,
                events: &mut events,
                recorded: 0,
            };
            let caught = AssertUnwindSafe(
                self.run_task(&mut ctx)
                    .instrument(info_span!("task", host_id = %task.host_id)),
            )
            .catch_unwind()
            .await;
            let outcome = match caught {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let reason = format!("task aborted: {}", panic_message(panic.as_ref()));
                    error!(host_id = %task.host_id, reason = %reason, "task panicked");
                    // Scripts are recorded in task order, so the unrecorded
                    // ones are a suffix.
                    let start = ctx.recorded.min(task.script_ids.len());
                    let remaining = &task.script_ids[start..];
                    self.fail_all(&mut ctx, remaining, error_verdict(&reason)).await;
                    Err(reason)
                }
            };
            match outcome {
                Ok(()) => events.emit(Stage::TaskComplete {
                    task_index,
                    host_id: task.host_id.clone(),
                }),
                Err(reason) => {
                    failed_tasks += 1;
                    warn!(host_id = %task.host_id, reason = %reason, "task failed");
                    events.emit(Stage::TaskError {
                        task_index,
                        host_id: task.host_id.clone(),
                        error: reason,
                    });
                }
            }
        }

        events.emit(Stage::Complete {
            total_tasks,
            failed: failed_tasks,
        });
        info!(total_tasks, failed_tasks, "run finished");
        RunSummary {
            session_id,
            total_tasks,
            failed_tasks,
        }
    }

    /// `Err` carries the reason the task failed. Every script of the task has
    /// a recorded result either way.
    async fn run_task(&self, ctx: &mut TaskContext<'_>) -> Result<(), String> {
        let task = ctx.task;
        let host = match self.inventory.host(&task.host_id).await {
            Ok(Some(host)) => host,
            Ok(None) => {
                let reason = format!("host {} not found", task.host_id);
                self.fail_all(ctx, &task.script_ids, error_verdict(&reason)).await;
                return Err(reason);
            }
            Err(e) => {
                let reason = format!("host lookup failed: {e}");
                self.fail_all(ctx, &task.script_ids, error_verdict(&reason)).await;
                return Err(reason);
            }
        };

        let scripts = match self.resolve_scripts(task).await {
            Ok(scripts) => scripts,
            Err(reason) => {
                self.fail_all(ctx, &task.script_ids, error_verdict(&reason)).await;
                return Err(reason);
            }
        };

        let mut connector = self.factory.connector_for(&host);
        let outcome = self.on_host(ctx, &host, &scripts, connector.as_mut()).await;
        connector.close().await;
        outcome
    }

    async fn resolve_scripts(&self, task: &TaskSpec) -> Result<Vec<Script>, String> {
        let mut scripts = Vec::with_capacity(task.script_ids.len());
        for id in &task.script_ids {
            match self.inventory.script(id).await {
                Ok(Some(script)) => scripts.push(script),
                Ok(None) => return Err(format!("script {id} not found")),
                Err(e) => return Err(format!("script lookup failed: {e}")),
            }
        }
        Ok(scripts)
    }

    async fn on_host(
        &self,
        ctx: &mut TaskContext<'_>,
        host: &Host,
        scripts: &[Script],
        connector: &mut dyn Connector,
    ) -> Result<(), String> {
        let host_id = host.id.clone();
        let report = {
            let events = &mut *ctx.events;
            self.preflight
                .run(connector, |gate| events.emit(Stage::for_gate(&host_id, gate)))
                .await
        };

        if let Some(failed) = report.failure() {
            let code = failed.gate.error_code();
            let verdict = Verdict::from_code(code).with_description(failed.message.clone());
            let task = ctx.task;
            self.fail_all(ctx, &task.script_ids, verdict).await;
            return Err(format!("{}: {}", code.description(), failed.message));
        }

        let total = scripts.len();
        for (i, script) in scripts.iter().enumerate() {
            let outcome = self.executor.execute(connector, &script.command).await;
            let verdict = self.classifier.classify(&outcome, script).await;
            let (check_status, error_code) = (verdict.check_status, verdict.error_code);
            let session_lost = outcome.session_lost;
            let detail = outcome.output.stderr.clone();
            self.record(
                ctx,
                &script.id,
                outcome.output.stdout,
                outcome.output.stderr,
                verdict,
            )
            .await;
            ctx.events.emit(Stage::ScriptProgress {
                host_id: host_id.clone(),
                script_id: script.id.clone(),
                index: i + 1,
                total,
                check_status,
                error_code,
            });

            if session_lost {
                let remaining: Vec<String> =
                    scripts[i + 1..].iter().map(|s| s.id.clone()).collect();
                let verdict = Verdict::from_code(ErrorCode::ConnectionLost)
                    .with_description(detail.clone());
                self.fail_all(ctx, &remaining, verdict).await;
                return Err(format!("{}: {detail}", ErrorCode::ConnectionLost.description()));
            }
        }
        Ok(())
    }

    async fn fail_all(&self, ctx: &mut TaskContext<'_>, script_ids: &[String], verdict: Verdict) {
        let error = verdict.error_description.clone().unwrap_or_default();
        for script_id in script_ids {
            self.record(ctx, script_id, String::new(), error.clone(), verdict.clone())
                .await;
        }
    }

    async fn record(
        &self,
        ctx: &mut TaskContext<'_>,
        script_id: &str,
        output: String,
        error: String,
        verdict: Verdict,
    ) {
        let result = ExecutionResult::new(
            ctx.session_id,
            &ctx.task.host_id,
            script_id,
            output,
            error,
            verdict,
        );
        ctx.recorded += 1;
        let stored = AssertUnwindSafe(self.sink.record(&result))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(EngineError::Panicked(panic_message(panic.as_ref())))
            });
        if let Err(e) = stored {
            error!(host_id = %ctx.task.host_id, script_id, err = %e, "failed to record result");
            ctx.events.info(format!("result for {script_id} was not stored: {e}"));
        }
    }
}

struct TaskContext<'a> {
    session_id: &'a SessionId,
    task: &'a TaskSpec,
    events: &'a mut ProgressSink,
    /// Results written (or attempted) so far for this task.
    recorded: usize,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn error_verdict(reason: &str) -> Verdict {
    Verdict {
        check_status: CheckStatus::Error,
        error_code: None,
        error_description: Some(reason.to_string()),
        actual_data: None,
    }
}
