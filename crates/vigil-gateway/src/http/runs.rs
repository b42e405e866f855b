//! Ad-hoc runs: POST /runs
//!
//! Request:  `{"tasks": [{"host_id": "web-01", "script_ids": ["s1", "s2"]}]}`
//! Response: `text/event-stream`, one `data:` frame per progress event, the
//! last one with `"stage": "complete"`.
//!
//! The run continues if the client disconnects; results are persisted either
//! way.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::Stream;
use serde::Deserialize;
use tracing::{info, warn};
use vigil_core::TaskSpec;

use crate::{app::AppState, http::error::ApiError};

#[derive(Deserialize)]
pub struct RunRequest {
    pub tasks: Vec<TaskSpec>,
}

pub async fn start_run(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if req.tasks.is_empty() {
        return Err(ApiError::BadRequest("tasks cannot be empty".into()));
    }
    if let Some(task) = req.tasks.iter().find(|t| t.script_ids.is_empty()) {
        return Err(ApiError::BadRequest(format!(
            "task for host {} has no scripts",
            task.host_id
        )));
    }

    let handle = state.orchestrator.start(req.tasks);
    info!(session_id = %handle.session_id, "run started via http");
    let mut events = handle.events;

    let stream = async_stream::stream! {
        while let Some(event) = events.recv().await {
            match Event::default().id(event.seq.to_string()).json_data(&event) {
                Ok(frame) => yield Ok(frame),
                Err(e) => warn!(seq = event.seq, "dropping unserializable event: {e}"),
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::app::tests::{body_text, send, test_router};

    #[tokio::test]
    async fn streams_events_until_complete() {
        let router = test_router();
        let resp = send(
            &router,
            "POST",
            "/runs",
            Some(json!({ "tasks": [{ "host_id": "ghost", "script_ids": ["s1", "s2"] }] })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "text/event-stream");

        let body = body_text(resp).await;
        let frames: Vec<serde_json::Value> = body
            .lines()
            .filter_map(|l| l.strip_prefix("data:"))
            .map(|d| serde_json::from_str(d.trim()).unwrap())
            .collect();
        let stages: Vec<&str> = frames.iter().map(|f| f["stage"].as_str().unwrap()).collect();
        assert_eq!(stages, ["status", "task_start", "task_error", "complete"]);
        assert_eq!(frames[3]["failed"], 1);
        assert_eq!(frames[3]["seq"], 4);
    }

    #[tokio::test]
    async fn empty_run_is_rejected() {
        let router = test_router();
        let resp = send(&router, "POST", "/runs", Some(json!({ "tasks": [] }))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(
            &router,
            "POST",
            "/runs",
            Some(json!({ "tasks": [{ "host_id": "h", "script_ids": [] }] })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
