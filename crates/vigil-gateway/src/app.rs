use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use vigil_core::config::VigilConfig;
use vigil_engine::Orchestrator;
use vigil_scheduler::{SchedulerEngine, SchedulerHandle};

use crate::http::{health, jobs, runs};

/// Central shared state, passed as `Arc<AppState>` to all handlers.
pub struct AppState {
    pub config: VigilConfig,
    pub orchestrator: Orchestrator,
    /// Used for manual triggers; the poll loop runs on its own clone.
    pub scheduler: SchedulerEngine,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: VigilConfig,
        orchestrator: Orchestrator,
        scheduler: SchedulerEngine,
    ) -> Self {
        Self {
            config,
            orchestrator,
            scheduler,
            started_at: Utc::now(),
        }
    }

    pub fn jobs(&self) -> &SchedulerHandle {
        self.scheduler.handle()
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/runs", post(runs::start_run))
        .route("/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route("/jobs/{id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/jobs/{id}/pause", post(jobs::pause_job))
        .route("/jobs/{id}/resume", post(jobs::resume_job))
        .route("/jobs/{id}/trigger", post(jobs::trigger_job))
        .route("/jobs/{id}/runs", get(jobs::list_runs))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
