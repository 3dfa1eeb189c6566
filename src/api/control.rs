/// Run control REST API endpoints
///
/// Start, stop, pause and resume runs, toggle breakpoints and read the
/// engine status and recent events.

use crate::api::AppState;
use crate::runtime::{EngineError, EngineEvent, EngineStatus};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Request body for starting a run
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    /// Start from this node instead of every start node
    #[serde(default)]
    pub start_node_id: Option<String>,
}

/// Response for a started run
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub run_id: Uuid,
    pub message: String,
}

/// Create run control routes
pub fn create_control_routes() -> Router<AppState> {
    Router::new()
        .route("/api/run/start", post(start_run))
        .route("/api/run/stop", post(stop_run))
        .route("/api/run/pause", post(pause_run))
        .route("/api/run/resume", post(resume_run))
        .route("/api/run/status", get(run_status))
        .route("/api/run/events", get(recent_events))
        .route("/api/breakpoints/{id}", put(set_breakpoint).delete(clear_breakpoint))
}

fn error_status(error: &EngineError) -> StatusCode {
    match error {
        EngineError::AlreadyRunning => StatusCode::CONFLICT,
        EngineError::NoGraph | EngineError::UnknownStartNode(_) => StatusCode::NOT_FOUND,
        EngineError::NoStartNode | EngineError::InvalidGraph(_) => StatusCode::BAD_REQUEST,
    }
}

/// Start a run
///
/// POST /api/run/start
/// Body (optional): { "start_node_id": "..." }
async fn start_run(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<StartResponse>, (StatusCode, String)> {
    let request: StartRequest = if body.trim().is_empty() {
        StartRequest::default()
    } else {
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("❌ Invalid start request: {}", e);
            (StatusCode::BAD_REQUEST, e.to_string())
        })?
    };

    match state.engine.start(request.start_node_id.as_deref()) {
        Ok(ctx) => Ok(Json(StartResponse {
            run_id: ctx.run_id,
            message: "Run started".to_string(),
        })),
        Err(e) => {
            tracing::warn!("❌ Run not started: {}", e);
            Err((error_status(&e), e.to_string()))
        }
    }
}

/// POST /api/run/stop
async fn stop_run(State(state): State<AppState>) -> Json<Value> {
    let stopped = state.engine.stop();
    Json(json!({ "stopped": stopped, "state": state.engine.state() }))
}

/// POST /api/run/pause
async fn pause_run(State(state): State<AppState>) -> Json<Value> {
    let paused = state.engine.pause();
    Json(json!({ "paused": paused, "state": state.engine.state() }))
}

/// POST /api/run/resume
async fn resume_run(State(state): State<AppState>) -> Json<Value> {
    let resumed = state.engine.resume();
    Json(json!({ "resumed": resumed, "state": state.engine.state() }))
}

/// GET /api/run/status
async fn run_status(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.status())
}

/// Recent engine events, oldest first
///
/// GET /api/run/events
async fn recent_events(State(state): State<AppState>) -> Json<Vec<EngineEvent>> {
    Json(state.engine.events().recent())
}

/// PUT /api/breakpoints/{id}
async fn set_breakpoint(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    state.engine.set_breakpoint(&id, true);
    Json(json!({ "breakpoints": state.engine.breakpoints() }))
}

/// DELETE /api/breakpoints/{id}
async fn clear_breakpoint(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    state.engine.set_breakpoint(&id, false);
    Json(json!({ "breakpoints": state.engine.breakpoints() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_http_statuses() {
        assert_eq!(error_status(&EngineError::AlreadyRunning), StatusCode::CONFLICT);
        assert_eq!(error_status(&EngineError::NoGraph), StatusCode::NOT_FOUND);
        assert_eq!(
            error_status(&EngineError::UnknownStartNode("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(error_status(&EngineError::NoStartNode), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn start_request_node_is_optional() {
        let request: StartRequest = serde_json::from_str("{}").unwrap();
        assert!(request.start_node_id.is_none());
        let request: StartRequest = serde_json::from_str(r#"{"start_node_id":"n1"}"#).unwrap();
        assert_eq!(request.start_node_id.as_deref(), Some("n1"));
    }
}
