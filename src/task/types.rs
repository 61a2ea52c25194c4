// Task data types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Task life cycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Working,
    Completed,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Working => "working",
            TaskState::Completed => "completed",
            TaskState::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named text attached to a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub description: String,
    pub text: String,
}

/// Event delivered to a task's live subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Status {
        task_id: String,
        state: TaskState,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        data: Option<Value>,
        is_final: bool,
    },
    Artifact {
        task_id: String,
        artifact: Artifact,
    },
}

impl TaskEvent {
    pub fn text(&self) -> Option<&str> {
        match self {
            TaskEvent::Status { text, .. } => text.as_deref(),
            TaskEvent::Artifact { artifact, .. } => Some(&artifact.text),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, TaskEvent::Status { is_final: true, .. })
    }
}

/// Live event sink of one task
#[derive(Debug, Clone)]
pub struct Subscriber {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl Subscriber {
    pub fn new(tx: mpsc::UnboundedSender<TaskEvent>) -> Self {
        Self { tx }
    }

    /// Returns false once the receiving side is gone
    pub fn send(&self, event: TaskEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}
