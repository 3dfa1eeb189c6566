/// Engine event bus
///
/// Everything the engine reports (log lines, node highlights, selection,
/// window and toast requests, state changes) goes out as an `EngineEvent`
/// on a tokio broadcast channel. A bounded ring of recent events is kept
/// for pollers that were not subscribed when the event happened. Log events
/// are mirrored to `tracing` at the matching level.

use crate::runtime::engine::EngineState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// Severity of an engine log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    /// Per-node execution trace
    Exec,
    Paused,
}

/// Highlight state of a node in the editor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Idle,
    Running,
    Ok,
    Fail,
}

/// Request to minimize or restore the operator's window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowCommand {
    Iconify,
    Restore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Log {
        message: String,
        level: LogLevel,
        at: DateTime<Utc>,
    },
    NodeStatus {
        node_id: String,
        status: NodeStatus,
    },
    /// Editor selection follows execution; `None` clears it
    SelectNode { node_id: Option<String> },
    Window { command: WindowCommand },
    Notify {
        message: String,
        duration: f64,
        sound: bool,
    },
    State { state: EngineState },
}

/// Broadcast fan-out with a bounded history
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    history: Mutex<VecDeque<EngineEvent>>,
    history_len: usize,
}

impl EventBus {
    pub fn new(history_len: usize) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_len.min(CHANNEL_CAPACITY))),
            history_len,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        if self.history_len > 0 {
            let mut history = self.history.lock();
            if history.len() == self.history_len {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        // no subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Most recent events, oldest first
    pub fn recent(&self) -> Vec<EngineEvent> {
        self.history.lock().iter().cloned().collect()
    }

    /// Emit a log line and mirror it to `tracing`
    pub fn log(&self, message: impl Into<String>, level: LogLevel) {
        let message = message.into();
        match level {
            LogLevel::Error => tracing::error!("{}", message),
            LogLevel::Warning => tracing::warn!("{}", message),
            LogLevel::Exec => tracing::debug!("{}", message),
            LogLevel::Info | LogLevel::Success | LogLevel::Paused => tracing::info!("{}", message),
        }
        self.emit(EngineEvent::Log {
            message,
            level,
            at: Utc::now(),
        });
    }

    pub fn node_status(&self, node_id: &str, status: NodeStatus) {
        self.emit(EngineEvent::NodeStatus {
            node_id: node_id.to_string(),
            status,
        });
    }

    pub fn select(&self, node_id: Option<&str>) {
        self.emit(EngineEvent::SelectNode {
            node_id: node_id.map(str::to_string),
        });
    }

    pub fn window(&self, command: WindowCommand) {
        self.emit(EngineEvent::Window { command });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded() {
        let bus = EventBus::new(2);
        bus.select(Some("a"));
        bus.select(Some("b"));
        bus.select(Some("c"));
        let recent = bus.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0], EngineEvent::SelectNode { node_id: Some("b".into()) });
    }

    #[tokio::test]
    async fn subscribers_receive_logs() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        bus.log("hello", LogLevel::Success);
        match rx.recv().await.unwrap() {
            EngineEvent::Log { message, level, .. } => {
                assert_eq!(message, "hello");
                assert_eq!(level, LogLevel::Success);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let value = serde_json::to_value(EngineEvent::NodeStatus {
            node_id: "n1".into(),
            status: NodeStatus::Fail,
        })
        .unwrap();
        assert_eq!(value["event"], "node_status");
        assert_eq!(value["status"], "fail");
    }
}
