// Call dispatcher - runs matched tool and agent calls

use crate::delegate::config::DelegateHeaders;
use crate::delegate::context::{AgentContext, DelegateKind, DelegateOutcome, MatchedAgent, MatchedTool, ResultItem};
use crate::hops;
use crate::invoker::{
    AgentEvent, AgentEventSink, AgentInvoker, AgentRequest, Endpoint, InvokeError, ToolInvoker,
};
use futures::future::join_all;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcomes keyed by call name, in dispatch order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub tools: Vec<(String, DelegateOutcome)>,
    pub agents: Vec<(String, DelegateOutcome)>,
}

impl DispatchReport {
    pub fn failures(&self) -> usize {
        self.tools
            .iter()
            .chain(self.agents.iter())
            .filter(|(_, o)| o.is_failure())
            .count()
    }
}

/// Executes one invocation's matched calls through the remote invokers
#[derive(Clone)]
pub struct CallDispatcher {
    tools: Arc<dyn ToolInvoker>,
    agents: Arc<dyn AgentInvoker>,
}

impl CallDispatcher {
    pub fn new(tools: Arc<dyn ToolInvoker>, agents: Arc<dyn AgentInvoker>) -> Self {
        Self { tools, agents }
    }

    /// Run every matched call. In parallel mode tools and agents run
    /// concurrently with each other; otherwise tools go first, one at a time.
    pub async fn run_all(&self, ctx: &AgentContext, parallel: bool) -> DispatchReport {
        if parallel {
            let (tools, agents) =
                futures::join!(self.run_tools(ctx, true), self.run_agents(ctx, true));
            DispatchReport { tools, agents }
        } else {
            let tools = self.run_tools(ctx, false).await;
            let agents = self.run_agents(ctx, false).await;
            DispatchReport { tools, agents }
        }
    }

    pub async fn run_tools(&self, ctx: &AgentContext, parallel: bool) -> Vec<(String, DelegateOutcome)> {
        if parallel {
            join_all(ctx.tools.iter().map(|tool| self.call_tool(ctx, tool))).await
        } else {
            let mut out = Vec::with_capacity(ctx.tools.len());
            for tool in &ctx.tools {
                out.push(self.call_tool(ctx, tool).await);
            }
            out
        }
    }

    pub async fn run_agents(&self, ctx: &AgentContext, parallel: bool) -> Vec<(String, DelegateOutcome)> {
        if parallel {
            join_all(ctx.agents.iter().map(|agent| self.call_agent(ctx, agent))).await
        } else {
            let mut out = Vec::with_capacity(ctx.agents.len());
            for agent in &ctx.agents {
                out.push(self.call_agent(ctx, agent).await);
            }
            out
        }
    }

    async fn call_tool(&self, ctx: &AgentContext, tool: &MatchedTool) -> (String, DelegateOutcome) {
        let name = tool.name().to_string();
        let headers = effective_headers(&tool.call.headers, &ctx.headers);
        let endpoint = Endpoint::new(tool.call.url.clone(), tool.call.authority.clone());

        info!(tool = %name, url = %endpoint.url, "calling tool");
        ctx.progress(&tool.key, format!("Calling tool {} on {}", name, tool.call.label()));
        hops::record(&ctx.hops, format!("Calling tool {} at {}", name, endpoint.url));

        let work = async {
            let session = self.tools.connect(&endpoint, &headers).await?;
            session.call_tool(&name, &tool.call.args).await
        };
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(InvokeError::Cancelled),
            r = work => r,
        };

        let outcome = match result {
            Ok(raw) => normalize_tool_result(ctx, raw),
            Err(e) => DelegateOutcome::Failure(e.to_string()),
        };

        match &outcome {
            DelegateOutcome::Failure(e) => {
                warn!(tool = %name, error = %e, "tool call failed");
                hops::record(&ctx.hops, format!("Tool {} failed: {}", name, e));
                ctx.send_result(ResultItem {
                    delegate: name.clone(),
                    kind: DelegateKind::Tool,
                    data: json!({ "error": e }),
                });
            }
            DelegateOutcome::Success { content, upstream } => {
                debug!(tool = %name, items = content.len(), "tool call succeeded");
                hops::record(&ctx.hops, format!("Tool {} returned {} item(s)", name, content.len()));
                for item in content {
                    ctx.send_result(ResultItem {
                        delegate: name.clone(),
                        kind: DelegateKind::Tool,
                        data: item.clone(),
                    });
                }
                if let Some(upstream) = upstream {
                    ctx.send_result(ResultItem {
                        delegate: name.clone(),
                        kind: DelegateKind::Tool,
                        data: json!({ "upstreamContent": upstream }),
                    });
                }
            }
        }
        (name, outcome)
    }

    async fn call_agent(&self, ctx: &AgentContext, agent: &MatchedAgent) -> (String, DelegateOutcome) {
        let name = agent.name().to_string();
        let headers = effective_headers(&agent.call.headers, &ctx.headers);
        let endpoint = Endpoint::new(agent.call.url.clone(), agent.call.authority.clone());
        let request = AgentRequest {
            agent: name.clone(),
            message: agent.message.clone().unwrap_or_else(|| ctx.message.clone()),
            data: agent.data.clone(),
        };

        info!(agent = %name, url = %endpoint.url, "calling peer agent");
        ctx.progress(&agent.key, format!("Calling agent {}", name));
        hops::record(&ctx.hops, format!("Calling agent {} at {}", name, endpoint.url));

        let mut sink = ContextSink {
            ctx,
            delegate: name.clone(),
            content: Vec::new(),
        };
        let result = {
            let work = async {
                let session = self.agents.connect(&endpoint, &headers).await?;
                session.call_agent(&request, &mut sink).await
            };
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => Err(InvokeError::Cancelled),
                r = work => r,
            }
        };

        let outcome = match result {
            Ok(()) => {
                debug!(agent = %name, items = sink.content.len(), "agent call succeeded");
                hops::record(&ctx.hops, format!("Agent {} answered", name));
                DelegateOutcome::Success {
                    content: sink.content,
                    upstream: None,
                }
            }
            Err(e) => {
                let e = e.to_string();
                warn!(agent = %name, error = %e, "agent call failed");
                hops::record(&ctx.hops, format!("Agent {} failed: {}", name, e));
                ctx.send_result(ResultItem {
                    delegate: name.clone(),
                    kind: DelegateKind::Agent,
                    data: json!({ "error": e }),
                });
                DelegateOutcome::Failure(e)
            }
        };
        (name, outcome)
    }
}

/// Routes classified agent events into the invocation
struct ContextSink<'a> {
    ctx: &'a AgentContext,
    delegate: String,
    /// Unary mode only
    content: Vec<Value>,
}

impl ContextSink<'_> {
    fn deliver(&mut self, data: Value) {
        if self.ctx.is_streaming() {
            self.ctx.send_result(ResultItem {
                delegate: self.delegate.clone(),
                kind: DelegateKind::Agent,
                data,
            });
        } else {
            self.content.push(data);
        }
    }
}

impl AgentEventSink for ContextSink<'_> {
    fn on_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Text(text) => self.deliver(Value::String(text)),
            AgentEvent::Data(Value::Object(mut map)) => {
                if let Some(remote) = map.remove("hops") {
                    hops::merge_remote(&self.ctx.hops, remote);
                }
                if !map.is_empty() {
                    self.deliver(Value::Object(map));
                }
            }
            AgentEvent::Data(other) => self.deliver(other),
            AgentEvent::Status { state, message } => {
                let text = match message {
                    Some(m) => format!("{} [{}]: {}", self.delegate, state, m),
                    None => format!("{} [{}]", self.delegate, state),
                };
                self.ctx.upstream_progress(text);
            }
            AgentEvent::Artifact { name, text } => {
                if self.ctx.is_streaming() {
                    self.ctx
                        .send_result(ResultItem::artifact(self.delegate.clone(), &name, &text));
                } else {
                    self.content.push(json!({ "artifact": name, "text": text }));
                }
            }
        }
    }
}

/// Configured headers, overlaid with whitelisted inbound headers, minus
/// excluded ones. Names are lowercased.
pub fn effective_headers(
    configured: &DelegateHeaders,
    inbound: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut out: HashMap<String, String> = configured
        .add
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect();

    for name in &configured.forward {
        if let Some((_, value)) = inbound.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            out.insert(name.to_ascii_lowercase(), value.clone());
        }
    }

    for name in &configured.remove {
        out.remove(&name.to_ascii_lowercase());
    }
    out
}

/// Flatten `content`, lift `structuredContent` and its remote hops
fn normalize_tool_result(ctx: &AgentContext, mut raw: Map<String, Value>) -> DelegateOutcome {
    let content = match raw.remove("content") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.into_iter().map(flatten_item).collect(),
        Some(other) => vec![other],
    };

    let upstream = match raw.remove("structuredContent") {
        Some(Value::Object(mut map)) => {
            if let Some(remote) = map.remove("hops") {
                hops::merge_remote(&ctx.hops, remote);
            }
            (!map.is_empty()).then_some(map)
        }
        _ => None,
    };

    if raw.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        let text = content
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        let text = if text.is_empty() { "tool reported an error".to_string() } else { text };
        return DelegateOutcome::Failure(text);
    }

    DelegateOutcome::Success { content, upstream }
}

/// Text content items become plain strings; anything else is kept as is
fn flatten_item(item: Value) -> Value {
    let text = match &item {
        Value::Object(map) if map.get("type").and_then(Value::as_str) == Some("text") => {
            map.get("text").and_then(Value::as_str).map(str::to_string)
        }
        _ => None,
    };
    text.map(Value::String).unwrap_or(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hops::Hops;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> AgentContext {
        AgentContext::new(
            "router",
            HashMap::new(),
            Hops::new("host-a", "federate").shared(),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_effective_headers() {
        let mut configured = DelegateHeaders::default();
        configured.add.insert("X-Static".into(), "1".into());
        configured.add.insert("X-Drop".into(), "gone".into());
        configured.forward = vec!["x-request-id".into(), "X-Missing".into()];
        configured.remove = vec!["x-drop".into()];

        let mut inbound = HashMap::new();
        inbound.insert("X-Request-ID".to_string(), "abc".to_string());
        inbound.insert("Authorization".to_string(), "secret".to_string());

        let headers = effective_headers(&configured, &inbound);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("x-static").map(String::as_str), Some("1"));
        assert_eq!(headers.get("x-request-id").map(String::as_str), Some("abc"));
        assert!(!headers.contains_key("authorization"));
    }

    #[test]
    fn test_forwarded_header_overrides_configured() {
        let mut configured = DelegateHeaders::default();
        configured.add.insert("x-tenant".into(), "default".into());
        configured.forward = vec!["X-Tenant".into()];

        let mut inbound = HashMap::new();
        inbound.insert("x-tenant".to_string(), "acme".to_string());

        let headers = effective_headers(&configured, &inbound);
        assert_eq!(headers.get("x-tenant").map(String::as_str), Some("acme"));
    }

    #[test]
    fn test_normalize_content_shapes() {
        let ctx = ctx();
        let raw = json!({
            "content": [{"type": "text", "text": "sunny"}, {"type": "image", "data": "..."}],
            "structuredContent": {"temp": 21, "hops": [{"index": 1, "host": "remote", "operation": "tool", "message": "served"}]}
        });
        let outcome = normalize_tool_result(&ctx, raw.as_object().unwrap().clone());
        match outcome {
            DelegateOutcome::Success { content, upstream } => {
                assert_eq!(content[0], json!("sunny"));
                assert_eq!(content[1]["type"], "image");
                assert_eq!(upstream.unwrap().get("temp"), Some(&json!(21)));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(ctx.hops.lock().unwrap().steps().len(), 1);

        let text = normalize_tool_result(&ctx, json!({"content": "plain"}).as_object().unwrap().clone());
        assert_eq!(text.to_json(), json!({"content": "plain"}));
    }

    #[test]
    fn test_normalize_error_flag() {
        let ctx = ctx();
        let raw = json!({"content": [{"type": "text", "text": "quota exceeded"}], "isError": true});
        let outcome = normalize_tool_result(&ctx, raw.as_object().unwrap().clone());
        assert_eq!(outcome, DelegateOutcome::Failure("quota exceeded".to_string()));
    }

    #[test]
    fn test_sink_unary_collects_and_merges_hops() {
        let ctx = ctx();
        let mut sink = ContextSink {
            ctx: &ctx,
            delegate: "planner".to_string(),
            content: Vec::new(),
        };
        sink.on_event(AgentEvent::Text("plan ready".into()));
        sink.on_event(AgentEvent::Data(json!({"hops": [{"index": 3}], "steps": 2})));
        sink.on_event(AgentEvent::Status {
            state: "working".into(),
            message: Some("thinking".into()),
        });
        sink.on_event(AgentEvent::Artifact {
            name: "plan".into(),
            text: "1. go".into(),
        });

        assert_eq!(sink.content.len(), 3);
        assert_eq!(sink.content[1], json!({"steps": 2}));
        assert_eq!(ctx.hops.lock().unwrap().current_index(), 1);
    }
}
