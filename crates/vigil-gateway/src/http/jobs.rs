//! Scheduler job management.
//!
//! | Route                       | Action                                 |
//! |-----------------------------|----------------------------------------|
//! | `GET /jobs`                 | list jobs                              |
//! | `POST /jobs`                | create from a [`NewJob`] body          |
//! | `GET /jobs/{id}`            | fetch one                              |
//! | `DELETE /jobs/{id}`         | delete with its run history            |
//! | `POST /jobs/{id}/pause`     | stop firing                            |
//! | `POST /jobs/{id}/resume`    | recompute next run and reactivate      |
//! | `POST /jobs/{id}/trigger`   | fire now in the background             |
//! | `GET /jobs/{id}/runs`       | recent runs, newest first (`?limit=`)  |

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use vigil_scheduler::{NewJob, SchedulerJob, SchedulerRun};

use crate::{app::AppState, http::error::ApiError};

const DEFAULT_RUN_LIMIT: usize = 50;
const MAX_RUN_LIMIT: usize = 500;

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SchedulerJob>>, ApiError> {
    Ok(Json(state.jobs().list_jobs()?))
}

pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewJob>,
) -> Result<(StatusCode, Json<SchedulerJob>), ApiError> {
    let job = state.jobs().create_job(new)?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SchedulerJob>, ApiError> {
    Ok(Json(state.jobs().get_job(&id)?))
}

pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.jobs().delete_job(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pause_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SchedulerJob>, ApiError> {
    Ok(Json(state.jobs().pause_job(&id)?))
}

pub async fn resume_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SchedulerJob>, ApiError> {
    Ok(Json(state.jobs().resume_job(&id)?))
}

pub async fn trigger_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SchedulerRun>), ApiError> {
    let run = state.scheduler.trigger(&id)?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

#[derive(Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<SchedulerRun>>, ApiError> {
    // 404 for unknown jobs rather than an empty list.
    state.jobs().get_job(&id)?;
    let limit = query.limit.unwrap_or(DEFAULT_RUN_LIMIT).clamp(1, MAX_RUN_LIMIT);
    Ok(Json(state.jobs().list_runs(&id, limit)?))
}
