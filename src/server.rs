/// Server setup and initialization
///
/// Wires together all components: desktop backends, engine, project storage and HTTP routes.
/// Provides the main application factory function for creating the Axum app.

use crate::{
    api::{create_control_routes, create_project_routes, AppState},
    config::Config,
    desktop::{Desktop, StaticScreen},
    graph::ProjectStorage,
    runtime::Engine,
};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Create the main Axum application with all routes
///
/// Builds the desktop backends and the engine, then loads the configured
/// project file, if any.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("🖥️ Initializing desktop backends");
    let mut desktop = Desktop::headless();
    if let Some(path) = &config.server.screen_path {
        tracing::info!("🖼️ Serving screen captures from {}", path);
        let screen = StaticScreen::from_file(path).with_context(|| format!("Failed to load screen image {}", path))?;
        desktop = desktop.with_screen(Arc::new(screen));
    }

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(Engine::new(&config, desktop));

    let storage = config.server.project_path.as_ref().map(ProjectStorage::new);
    if let Some(storage) = &storage {
        match tokio::fs::try_exists(storage.path()).await {
            Ok(true) => {
                tracing::info!("📥 Loading project from storage");
                let graph = storage.load().await?;
                engine
                    .load(graph)
                    .map_err(|e| anyhow::anyhow!("Failed to load project {}: {}", storage.path().display(), e))?;
            }
            _ => tracing::info!("📭 No project at {} yet", storage.path().display()),
        }
    }

    let app = create_router(AppState { engine, storage });
    tracing::info!("✅ Application initialized successfully");
    Ok(app)
}

/// Build the HTTP router around an existing engine
pub fn create_router(state: AppState) -> Router {
    tracing::info!("📡 Creating HTTP router with all endpoints");
    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        .merge(create_project_routes())
        .merge(create_control_routes())
        .with_state(state)
}

/// Start the HTTP server with the given configuration
///
/// Creates the application and starts the Axum server on the configured address and port.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Flowpilot server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
