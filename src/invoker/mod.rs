// Invoker module - contracts for calling remote tools and peer agents
// The engine only sees these traits; HTTP implementations live in `http`.

pub mod error;
pub mod http;

pub use error::{InvokeError, Result};
pub use http::{HttpAgentInvoker, HttpInvokerConfig, HttpToolInvoker};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Where a call goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    /// Host/authority override
    pub authority: Option<String>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, authority: Option<String>) -> Self {
        Self {
            url: url.into(),
            authority,
        }
    }
}

/// Opens tool sessions
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        headers: &HashMap<String, String>,
    ) -> Result<Box<dyn ToolSession>>;
}

/// One connected tool server
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Returns the raw result map, which may carry `content` and `structuredContent`
    async fn call_tool(&self, tool: &str, args: &Map<String, Value>) -> Result<Map<String, Value>>;
}

/// Opens agent sessions
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        headers: &HashMap<String, String>,
    ) -> Result<Box<dyn AgentSession>>;
}

/// Message sent to a peer agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    pub agent: String,
    pub message: String,
    pub data: Option<Value>,
}

/// One connected peer agent
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Sends the request and pushes every classified remote event into `sink`
    async fn call_agent(&self, request: &AgentRequest, sink: &mut dyn AgentEventSink) -> Result<()>;
}

/// Remote agent events after classification
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Text(String),
    Data(Value),
    Status { state: String, message: Option<String> },
    Artifact { name: String, text: String },
}

/// Receives classified events during an agent call
pub trait AgentEventSink: Send {
    fn on_event(&mut self, event: AgentEvent);
}

impl AgentEventSink for Vec<AgentEvent> {
    fn on_event(&mut self, event: AgentEvent) {
        self.push(event);
    }
}
