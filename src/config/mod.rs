/// Configuration management for the Flowpilot engine
///
/// Handles control-server settings, scheduler limits and locator tuning.
/// A `Config` is built once and handed to the constructors that need it;
/// nothing in the engine reads settings from process-wide state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Control server configuration
    pub server: ServerConfig,
    /// Scheduler and run lifecycle configuration
    pub engine: EngineConfig,
    /// Visual locator tuning
    pub locator: LocatorConfig,
}

/// HTTP control server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
    /// Project file loaded into the engine at boot, if any
    pub project_path: Option<String>,
    /// Image served by the headless screen source, if any
    pub screen_path: Option<String>,
    /// How many recent engine events the status API keeps
    pub event_history: usize,
}

/// What `fork` does once the concurrency cap is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the traversal and log a warning
    Drop,
    /// Park the traversal until a running task finishes
    Queue,
}

impl OverflowPolicy {
    fn from_env_value(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "queue" => OverflowPolicy::Queue,
            _ => OverflowPolicy::Drop,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of node tasks running at once
    pub max_concurrency: usize,
    /// Behavior when a fork would exceed `max_concurrency`
    pub overflow: OverflowPolicy,
    /// Interval at which the supervisor checks for run completion
    pub supervisor_poll: Duration,
    /// Emit iconify/restore notifications around runs
    pub iconify_on_run: bool,
}

/// Locator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Try ten extra scales around the device scale ratio
    pub multiscale: bool,
    /// Match on intensity only
    pub grayscale: bool,
    /// Scale factor of the machine running the graph, used against the
    /// authoring machine's `dev_scale_x`; `None` asks the screen
    pub runtime_scale: Option<f64>,
    /// Pause between captures while polling
    pub poll_interval: Duration,
    /// Pause after a failed capture
    pub capture_retry: Duration,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for unattended hosts
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            engine: EngineConfig::default(),
            locator: LocatorConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("FLOWPILOT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("FLOWPILOT_PORT", 3005),
            project_path: std::env::var("FLOWPILOT_PROJECT").ok().filter(|p| !p.is_empty()),
            screen_path: std::env::var("FLOWPILOT_SCREEN").ok().filter(|p| !p.is_empty()),
            event_history: env_parse("FLOWPILOT_EVENT_HISTORY", 500),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: env_parse("FLOWPILOT_MAX_TASKS", 50),
            overflow: std::env::var("FLOWPILOT_OVERFLOW")
                .map(|v| OverflowPolicy::from_env_value(&v))
                .unwrap_or(OverflowPolicy::Drop),
            supervisor_poll: Duration::from_millis(env_parse("FLOWPILOT_SUPERVISOR_POLL_MS", 500)),
            iconify_on_run: env_parse("FLOWPILOT_ICONIFY", true),
        }
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            multiscale: env_parse("FLOWPILOT_MULTISCALE", true),
            grayscale: true,
            runtime_scale: std::env::var("FLOWPILOT_RUNTIME_SCALE")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            poll_interval: Duration::from_millis(100),
            capture_retry: Duration::from_millis(500),
        }
    }
}

/// Read and parse an env var, falling back to `default` when absent or malformed
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_policy_parses_leniently() {
        assert_eq!(OverflowPolicy::from_env_value("Queue"), OverflowPolicy::Queue);
        assert_eq!(OverflowPolicy::from_env_value(" drop "), OverflowPolicy::Drop);
        assert_eq!(OverflowPolicy::from_env_value("bogus"), OverflowPolicy::Drop);
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        assert_eq!(env_parse("FLOWPILOT_TEST_UNSET_KEY", 7usize), 7);
    }
}
