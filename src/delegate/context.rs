// Per-invocation working state

use crate::delegate::config::{DelegateAgentCall, DelegateToolCall};
use crate::delegate::hints::Hints;
use crate::hops::SharedHops;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// A tool selected for this invocation. `call` is a private clone.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedTool {
    /// Delegate name from configuration
    pub key: String,
    pub call: DelegateToolCall,
}

impl MatchedTool {
    /// Selection key: the remote tool name
    pub fn name(&self) -> &str {
        self.call.tool_name()
    }

    pub fn answers_to(&self, name: &str) -> bool {
        self.key == name || self.name() == name
    }
}

/// An agent selected for this invocation. `call` is a private clone.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedAgent {
    /// Delegate name from configuration
    pub key: String,
    pub call: DelegateAgentCall,
    /// Message forwarded to the peer, `None` means the stripped inbound text
    pub message: Option<String>,
    /// Structured data attached to the forwarded message
    pub data: Option<Value>,
}

impl MatchedAgent {
    pub fn name(&self) -> &str {
        self.call.agent_name()
    }

    pub fn answers_to(&self, name: &str) -> bool {
        self.key == name || self.name() == name
    }
}

/// Which kind of delegate produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegateKind {
    Tool,
    Agent,
}

/// A structured per-call result flowing to the stream
#[derive(Debug, Clone, Serialize)]
pub struct ResultItem {
    pub delegate: String,
    pub kind: DelegateKind,
    pub data: Value,
}

impl ResultItem {
    /// A named text artifact sent back by a peer agent
    pub fn artifact(delegate: impl Into<String>, name: &str, text: &str) -> Self {
        Self {
            delegate: delegate.into(),
            kind: DelegateKind::Agent,
            data: serde_json::json!({ "artifact": name, "text": text }),
        }
    }

    /// `(name, text)` when this item carries a peer artifact
    pub fn as_artifact(&self) -> Option<(&str, &str)> {
        if self.kind != DelegateKind::Agent {
            return None;
        }
        let map = self.data.as_object()?;
        if map.len() != 2 {
            return None;
        }
        Some((map.get("artifact")?.as_str()?, map.get("text")?.as_str()?))
    }
}

/// Bookkeeping note from the engine itself: (delegate, message)
pub type LocalProgress = (String, String);

/// Outcome of one delegate call, kept for the unary response
#[derive(Debug, Clone, PartialEq)]
pub enum DelegateOutcome {
    Success {
        content: Vec<Value>,
        upstream: Option<Map<String, Value>>,
    },
    Failure(String),
}

impl DelegateOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, DelegateOutcome::Failure(_))
    }

    pub fn to_json(&self) -> Value {
        match self {
            DelegateOutcome::Failure(e) => serde_json::json!({ "error": e }),
            DelegateOutcome::Success { content, upstream } => {
                let mut out = Map::new();
                let content = match content.as_slice() {
                    [single] => single.clone(),
                    many => Value::Array(many.to_vec()),
                };
                out.insert("content".to_string(), content);
                if let Some(upstream) = upstream {
                    out.insert("upstreamContent".to_string(), Value::Object(upstream.clone()));
                }
                Value::Object(out)
            }
        }
    }
}

/// Senders of the three streaming channels
#[derive(Debug, Default)]
pub struct StreamChannels {
    pub local: Option<UnboundedSender<LocalProgress>>,
    pub upstream: Option<UnboundedSender<String>>,
    pub results: Option<UnboundedSender<ResultItem>>,
}

/// State owned by one inbound task for its whole life
#[derive(Debug)]
pub struct AgentContext {
    pub agent: String,
    /// Inbound text with hints stripped
    pub message: String,
    pub headers: HashMap<String, String>,
    pub hints: Hints,
    pub tools: Vec<MatchedTool>,
    pub agents: Vec<MatchedAgent>,
    pub hops: SharedHops,
    pub cancel: CancellationToken,
    channels: StreamChannels,
}

impl AgentContext {
    pub fn new(
        agent: impl Into<String>,
        headers: HashMap<String, String>,
        hops: SharedHops,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            agent: agent.into(),
            message: String::new(),
            headers,
            hints: Hints::default(),
            tools: Vec::new(),
            agents: Vec::new(),
            hops,
            cancel,
            channels: StreamChannels::default(),
        }
    }

    pub fn with_channels(mut self, channels: StreamChannels) -> Self {
        self.channels = channels;
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.channels.results.is_some()
    }

    pub fn tool(&self, name: &str) -> Option<&MatchedTool> {
        self.tools.iter().find(|t| t.answers_to(name))
    }

    pub fn agent_call(&self, name: &str) -> Option<&MatchedAgent> {
        self.agents.iter().find(|a| a.answers_to(name))
    }

    pub fn matched_count(&self) -> usize {
        self.tools.len() + self.agents.len()
    }

    /// Report engine bookkeeping; silently dropped when nobody listens
    pub fn progress(&self, delegate: &str, message: impl Into<String>) {
        if let Some(tx) = &self.channels.local {
            let _ = tx.send((delegate.to_string(), message.into()));
        }
    }

    pub fn upstream_progress(&self, message: impl Into<String>) {
        if let Some(tx) = &self.channels.upstream {
            let _ = tx.send(message.into());
        }
    }

    pub fn send_result(&self, item: ResultItem) {
        if let Some(tx) = &self.channels.results {
            let _ = tx.send(item);
        }
    }

    /// Close the channels: results, then local progress, then upstream progress.
    /// Must only run after every producer has finished.
    pub fn close_channels(&mut self) {
        drop(self.channels.results.take());
        drop(self.channels.local.take());
        drop(self.channels.upstream.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hops::Hops;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn test_artifact_items() {
        let item = ResultItem::artifact("planner", "itinerary", "day 1");
        assert_eq!(item.as_artifact(), Some(("itinerary", "day 1")));

        let reply = ResultItem {
            delegate: "planner".into(),
            kind: DelegateKind::Agent,
            data: json!({"artifact": "itinerary", "text": "day 1", "extra": true}),
        };
        assert_eq!(reply.as_artifact(), None);

        let tool = ResultItem { kind: DelegateKind::Tool, ..item };
        assert_eq!(tool.as_artifact(), None);
    }

    #[test]
    fn test_outcome_json() {
        let ok = DelegateOutcome::Success {
            content: vec![json!("sunny")],
            upstream: None,
        };
        assert_eq!(ok.to_json(), json!({"content": "sunny"}));

        let many = DelegateOutcome::Success {
            content: vec![json!("a"), json!("b")],
            upstream: Some(json!({"temp": 21}).as_object().unwrap().clone()),
        };
        assert_eq!(
            many.to_json(),
            json!({"content": ["a", "b"], "upstreamContent": {"temp": 21}})
        );

        let failed = DelegateOutcome::Failure("boom".to_string());
        assert!(failed.is_failure());
        assert_eq!(failed.to_json(), json!({"error": "boom"}));
    }

    #[tokio::test]
    async fn test_close_channels_ends_receivers() {
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let (local_tx, mut local_rx) = mpsc::unbounded_channel();
        let (upstream_tx, mut upstream_rx) = mpsc::unbounded_channel();

        let mut ctx = AgentContext::new(
            "peer",
            HashMap::new(),
            Hops::new("h", "op").shared(),
            CancellationToken::new(),
        )
        .with_channels(StreamChannels {
            local: Some(local_tx),
            upstream: Some(upstream_tx),
            results: Some(results_tx),
        });

        assert!(ctx.is_streaming());
        ctx.progress("weather", "calling");
        ctx.close_channels();
        ctx.progress("weather", "dropped");

        assert_eq!(local_rx.recv().await, Some(("weather".into(), "calling".into())));
        assert!(local_rx.recv().await.is_none());
        assert!(results_rx.recv().await.is_none());
        assert!(upstream_rx.recv().await.is_none());
    }
}
