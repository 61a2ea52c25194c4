// Agent types

use crate::delegate::DelegateConfig;
use crate::task::TaskEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How an agent produces its answer. Exactly one per agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    #[default]
    Echo,
    Stream,
    Federate,
    HttpProxy,
}

impl BehaviorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BehaviorKind::Echo => "echo",
            BehaviorKind::Stream => "stream",
            BehaviorKind::Federate => "federate",
            BehaviorKind::HttpProxy => "http_proxy",
        }
    }
}

impl std::fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent definition as written in the agents file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub behavior: BehaviorKind,
    /// Response template for echo and stream agents
    #[serde(default)]
    pub payload: String,
    /// Artificial delay before each answer or update
    #[serde(default)]
    pub delay_ms: u64,
    /// Number of updates a stream agent emits
    #[serde(default = "default_stream_count")]
    pub stream_count: u32,
    /// Proxy target of an http_proxy agent
    #[serde(default)]
    pub upstream: Option<String>,
    #[serde(default)]
    pub delegates: DelegateConfig,
}

fn default_stream_count() -> u32 {
    3
}

impl AgentSpec {
    pub fn card(&self) -> AgentCard {
        AgentCard {
            name: self.name.clone(),
            description: self.description.clone(),
            skills: self.skills.clone(),
            behavior: self.behavior,
        }
    }
}

/// Public identity of an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub skills: Vec<String>,
    pub behavior: BehaviorKind,
}

/// One inbound message addressed to an agent
#[derive(Debug, Clone, Default)]
pub struct Inbound {
    pub content: String,
    pub headers: HashMap<String, String>,
    pub cancel: CancellationToken,
}

impl Inbound {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// What `Agent::handle` hands back to the transport
#[derive(Debug)]
pub enum AgentReply {
    Unary(String),
    Streaming {
        task_id: String,
        events: mpsc::UnboundedReceiver<TaskEvent>,
        done: JoinHandle<()>,
    },
}
