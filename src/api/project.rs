/// Project management REST API endpoints
///
/// Loads a project into the engine and reads back the graph it is running.
/// A loaded project replaces the previous one; runs already in progress keep
/// the graph they started with.

use crate::api::AppState;
use crate::graph::storage::{parse_project, to_project_json};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;

/// Response for project load operations
#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub nodes: usize,
    pub links: usize,
    pub start_nodes: Vec<String>,
    pub message: String,
}

/// Create project routes
pub fn create_project_routes() -> Router<AppState> {
    Router::new().route("/api/project", get(get_project).put(put_project))
}

/// Load a project
///
/// PUT /api/project
/// Body: project JSON (`{ "nodes": {...}, "links": [...], "metadata": {...} }`)
async fn put_project(State(state): State<AppState>, body: String) -> Result<Json<ProjectResponse>, (StatusCode, String)> {
    let graph = match parse_project(&body) {
        Ok(graph) => graph,
        Err(e) => {
            tracing::warn!("❌ Rejected project upload: {:#}", e);
            return Err((StatusCode::BAD_REQUEST, format!("{:#}", e)));
        }
    };

    let compiled = state.engine.load(graph).map_err(|e| {
        tracing::warn!("❌ Rejected project upload: {}", e);
        (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
    })?;

    if let Some(storage) = &state.storage {
        if let Err(e) = storage.save(&compiled.graph).await {
            tracing::error!("Failed to persist project: {:#}", e);
            return Err((StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)));
        }
    }

    tracing::info!(
        "🔥 Loaded project ({} nodes, {} links)",
        compiled.graph.nodes.len(),
        compiled.graph.links.len()
    );

    Ok(Json(ProjectResponse {
        nodes: compiled.graph.nodes.len(),
        links: compiled.graph.links.len(),
        start_nodes: compiled.start_nodes(),
        message: "Project loaded successfully".to_string(),
    }))
}

/// Get the loaded project
///
/// GET /api/project
/// Returns the project JSON in its persisted layout
async fn get_project(State(state): State<AppState>) -> Result<Response, StatusCode> {
    let Some(compiled) = state.engine.graph() else {
        return Err(StatusCode::NOT_FOUND);
    };
    match to_project_json(&compiled.graph) {
        Ok(text) => Ok(([(header::CONTENT_TYPE, "application/json")], text).into_response()),
        Err(e) => {
            tracing::error!("Failed to serialize project: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
