// Hops module - ordered provenance log threaded through every delegation step

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Hops shared between the concurrent calls of one invocation
pub type SharedHops = Arc<Mutex<Hops>>;

/// A step recorded locally
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopStep {
    pub index: u32,
    pub host: String,
    pub operation: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// A step returned by a downstream call, kept opaque. `host` and
/// `operation` come from the remote entry when it names them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteStep {
    pub index: u32,
    pub host: String,
    pub operation: String,
    pub remote: Value,
}

/// Provenance entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Local(HopStep),
    Remote(RemoteStep),
}

impl Step {
    pub fn index(&self) -> u32 {
        match self {
            Step::Local(s) => s.index,
            Step::Remote(s) => s.index,
        }
    }
}

/// Append-only provenance log
#[derive(Debug, Clone, Default)]
pub struct Hops {
    host_label: String,
    operation: String,
    current_index: u32,
    steps: Vec<Step>,
}

impl Hops {
    pub fn new(host_label: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            host_label: host_label.into(),
            operation: operation.into(),
            current_index: 0,
            steps: Vec::new(),
        }
    }

    /// Wrap for sharing across concurrent calls
    pub fn shared(self) -> SharedHops {
        Arc::new(Mutex::new(self))
    }

    /// Record a local step
    pub fn add(&mut self, message: impl Into<String>) -> u32 {
        self.current_index += 1;
        self.steps.push(Step::Local(HopStep {
            index: self.current_index,
            host: self.host_label.clone(),
            operation: self.operation.clone(),
            message: message.into(),
            at: Utc::now(),
        }));
        self.current_index
    }

    /// Record a single opaque remote payload
    pub fn add_remote(&mut self, data: Value) -> u32 {
        self.current_index += 1;
        self.push_remote(data);
        self.current_index
    }

    /// Merge a downstream step log. The counter advances once for the whole
    /// merge and every remote entry is appended under it, in remote order.
    pub fn merge(&mut self, remote_log: Value) -> u32 {
        self.current_index += 1;
        match remote_log {
            Value::Array(entries) => {
                for entry in entries {
                    self.push_remote(entry);
                }
            }
            Value::Null => {}
            other => self.push_remote(other),
        }
        self.current_index
    }

    /// Remote entries keep the host and operation they report; entries
    /// without them are attributed to the merging host.
    fn push_remote(&mut self, remote: Value) {
        let field = |key: &str, fallback: &str| {
            remote
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(fallback)
                .to_string()
        };
        let host = field("host", &self.host_label);
        let operation = field("operation", &self.operation);
        self.steps.push(Step::Remote(RemoteStep {
            index: self.current_index,
            host,
            operation,
            remote,
        }));
    }

    pub fn current_index(&self) -> u32 {
        self.current_index
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn host_label(&self) -> &str {
        &self.host_label
    }

    /// Serialize the log in insertion order
    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.steps).unwrap_or(Value::Array(Vec::new()))
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Local(s) => write!(f, "[{}] {}/{}: {}", s.index, s.host, s.operation, s.message),
            Step::Remote(s) => write!(f, "[{}] {}/{} <= {}", s.index, s.host, s.operation, s.remote),
        }
    }
}

/// Record a local step on a shared log, tolerating a poisoned lock
pub fn record(hops: &SharedHops, message: impl Into<String>) {
    let mut guard = hops.lock().unwrap_or_else(|e| e.into_inner());
    guard.add(message);
}

/// Merge a remote log into a shared log
pub fn merge_remote(hops: &SharedHops, remote_log: Value) {
    let mut guard = hops.lock().unwrap_or_else(|e| e.into_inner());
    guard.merge(remote_log);
}
