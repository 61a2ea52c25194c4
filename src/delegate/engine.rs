// Federation engine - match, override, dispatch, aggregate

use crate::delegate::aggregate::{
    NO_DELEGATES_AVAILABLE, NO_DELEGATES_TRIGGERED, ResultAggregator, StreamReceivers,
};
use crate::delegate::config::DelegateConfig;
use crate::delegate::context::{AgentContext, StreamChannels};
use crate::delegate::dispatch::{CallDispatcher, DispatchReport};
use crate::delegate::error::Result;
use crate::delegate::matcher::DelegateMatcher;
use crate::delegate::overrides::OverrideResolver;
use crate::delegate::trigger::TriggerIndex;
use crate::hops::{self, Hops};
use crate::invoker::{AgentInvoker, ToolInvoker};
use crate::task::TaskStateMachine;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const OPERATION: &str = "federate";

/// Prepared delegation state of one federating agent. Read-only after
/// `prepare`, shared by all of the agent's invocations.
pub struct FederationEngine {
    agent: String,
    host_label: String,
    config: DelegateConfig,
    index: TriggerIndex,
    dispatcher: CallDispatcher,
}

impl FederationEngine {
    pub fn prepare(
        agent: impl Into<String>,
        host_label: impl Into<String>,
        config: DelegateConfig,
        tools: Arc<dyn ToolInvoker>,
        agents: Arc<dyn AgentInvoker>,
    ) -> Result<Self> {
        let agent = agent.into();
        config.validate()?;
        let index = TriggerIndex::build(&config)?;
        info!(
            agent = %agent,
            tools = config.tools.len(),
            agents = config.agents.len(),
            triggers = index.len(),
            max_calls = config.effective_max_calls(),
            parallel = config.parallel,
            "federation prepared"
        );
        Ok(Self {
            agent,
            host_label: host_label.into(),
            config,
            index,
            dispatcher: CallDispatcher::new(tools, agents),
        })
    }

    pub fn config(&self) -> &DelegateConfig {
        &self.config
    }

    pub fn index(&self) -> &TriggerIndex {
        &self.index
    }

    /// Build the invocation context: match, then apply overrides on the clones
    fn context(
        &self,
        message: &str,
        headers: HashMap<String, String>,
        cancel: CancellationToken,
        channels: StreamChannels,
    ) -> (AgentContext, Vec<(String, String)>) {
        let hops = Hops::new(self.host_label.clone(), OPERATION).shared();
        hops::record(&hops, format!("{} received task", self.agent));

        let mut selection = DelegateMatcher::new(&self.config, &self.index).match_text(message);
        OverrideResolver::apply(&mut selection.tools, &mut selection.agents, &selection.hints);

        let mut ctx = AgentContext::new(self.agent.clone(), headers, hops, cancel).with_channels(channels);
        ctx.message = selection.text;
        ctx.hints = selection.hints;
        ctx.tools = selection.tools;
        ctx.agents = selection.agents;
        (ctx, selection.notes)
    }

    /// Report alternate-server notes and the no-match case
    fn announce(&self, ctx: &AgentContext, notes: &[(String, String)]) {
        for (delegate, note) in notes {
            ctx.progress(delegate, note.clone());
            hops::record(&ctx.hops, note.clone());
        }
        if ctx.matched_count() == 0 {
            let info = if self.index.is_empty() {
                NO_DELEGATES_AVAILABLE
            } else {
                NO_DELEGATES_TRIGGERED
            };
            info!(agent = %self.agent, "{}", info);
            ctx.progress(&self.agent, info);
            hops::record(&ctx.hops, info);
        }
    }

    async fn dispatch(&self, ctx: &AgentContext) -> DispatchReport {
        let report = self.dispatcher.run_all(ctx, self.config.parallel).await;
        if report.failures() > 0 {
            warn!(agent = %self.agent, failures = report.failures(), "some delegate calls failed");
        }
        report
    }

    /// Run one inbound message and return the combined document
    pub async fn run_unary(
        &self,
        message: &str,
        headers: HashMap<String, String>,
        cancel: CancellationToken,
    ) -> Value {
        let (ctx, notes) = self.context(message, headers, cancel, StreamChannels::default());
        self.announce(&ctx, &notes);
        let report = self.dispatch(&ctx).await;
        ResultAggregator::unary_document(&ctx, &report, self.index.is_empty())
    }

    /// Run one inbound message, streaming progress and results into `task`.
    ///
    /// Ordering: readers start, dispatch runs to completion, the channels are
    /// closed (results, local, upstream), then the readers are joined and
    /// the task is finished.
    pub async fn run_stream(
        &self,
        message: &str,
        headers: HashMap<String, String>,
        cancel: CancellationToken,
        task: Arc<TaskStateMachine>,
    ) {
        let (results_tx, results) = mpsc::unbounded_channel();
        let (local_tx, local) = mpsc::unbounded_channel();
        let (upstream_tx, upstream) = mpsc::unbounded_channel();

        let readers = ResultAggregator::spawn_readers(
            task.clone(),
            cancel.clone(),
            StreamReceivers {
                local,
                upstream,
                results,
            },
        );

        let channels = StreamChannels {
            local: Some(local_tx),
            upstream: Some(upstream_tx),
            results: Some(results_tx),
        };
        let (mut ctx, notes) = self.context(message, headers, cancel.clone(), channels);
        self.announce(&ctx, &notes);

        let report = self.dispatch(&ctx).await;
        ctx.close_channels();

        for reader in futures::future::join_all(readers).await {
            if let Err(e) = reader {
                warn!(task_id = %task.id(), error = %e, "stream reader panicked");
            }
        }

        let finished = if cancel.is_cancelled() {
            task.cancel(Some("task was cancelled".to_string()))
        } else {
            let calls = report.tools.len() + report.agents.len();
            task.complete(Some(format!(
                "{} finished {} delegate call(s), {} failed",
                self.agent,
                calls,
                report.failures()
            )))
        };
        if let Err(e) = finished {
            warn!(task_id = %task.id(), error = %e, "task already finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::config::DelegateToolCall;
    use crate::invoker::{AgentSession, Endpoint, InvokeError, ToolSession};
    use async_trait::async_trait;
    use serde_json::json;

    struct NoTools;

    #[async_trait]
    impl ToolInvoker for NoTools {
        async fn connect(
            &self,
            endpoint: &Endpoint,
            _headers: &HashMap<String, String>,
        ) -> crate::invoker::Result<Box<dyn ToolSession>> {
            Err(InvokeError::ConnectFailed {
                url: endpoint.url.clone(),
                reason: "unreachable".to_string(),
            })
        }
    }

    struct NoAgents;

    #[async_trait]
    impl AgentInvoker for NoAgents {
        async fn connect(
            &self,
            endpoint: &Endpoint,
            _headers: &HashMap<String, String>,
        ) -> crate::invoker::Result<Box<dyn AgentSession>> {
            Err(InvokeError::ConnectFailed {
                url: endpoint.url.clone(),
                reason: "unreachable".to_string(),
            })
        }
    }

    fn engine(config: DelegateConfig) -> FederationEngine {
        FederationEngine::prepare("router", "host-a", config, Arc::new(NoTools), Arc::new(NoAgents))
            .unwrap()
    }

    #[test]
    fn test_prepare_rejects_missing_url() {
        let config = DelegateConfig {
            tools: vec![DelegateToolCall {
                name: "weather".into(),
                triggers: vec!["weather".into()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let result =
            FederationEngine::prepare("router", "host-a", config, Arc::new(NoTools), Arc::new(NoAgents));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unary_without_delegates() {
        let engine = engine(DelegateConfig::default());
        let doc = engine
            .run_unary("hello there", HashMap::new(), CancellationToken::new())
            .await;
        assert_eq!(doc["tools"], json!({"info": NO_DELEGATES_AVAILABLE}));
        assert_eq!(doc["agents"], json!({"info": NO_DELEGATES_AVAILABLE}));
        assert_eq!(doc["message"], "hello there");
    }

    #[tokio::test]
    async fn test_unary_connect_failure_is_keyed() {
        let engine = engine(DelegateConfig {
            tools: vec![DelegateToolCall {
                name: "weather".into(),
                url: "http://127.0.0.1:1/mcp".into(),
                triggers: vec!["weather".into()],
                ..Default::default()
            }],
            ..Default::default()
        });
        let doc = engine
            .run_unary("weather please", HashMap::new(), CancellationToken::new())
            .await;
        let error = doc["tools"]["weather"]["error"].as_str().unwrap();
        assert!(error.contains("unreachable"));
        assert_eq!(doc["agents"], json!({"info": "No agents triggered"}));
        assert!(doc["hops"].as_array().unwrap().len() >= 3);
    }
}
