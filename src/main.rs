/// Flowpilot: graph-driven desktop automation engine
///
/// Main entry point for the Flowpilot control server. Initializes configuration and starts
/// the HTTP server with project loading and run control.

use flowpilot::{config::Config, server::start_server};

/// Application entry point
///
/// Initializes the server with default configuration and starts listening for requests.
/// The server provides:
/// - Project loading at /api/project
/// - Run control at /api/run/*
/// - Breakpoints at /api/breakpoints/{id}
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration comes from FLOWPILOT_* environment variables
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
