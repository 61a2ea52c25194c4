// Agent behaviors - one strategy per BehaviorKind

use super::error::{AgentError, Result};
use super::types::{AgentSpec, BehaviorKind, Inbound};
use crate::delegate::FederationEngine;
use crate::invoker::{AgentInvoker, ToolInvoker};
use crate::task::TaskStateMachine;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Unary and streaming halves of an agent
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    async fn do_unary(&self, inbound: &Inbound) -> Result<String>;

    /// Drive `task` to a terminal state
    async fn do_stream(&self, inbound: &Inbound, task: Arc<TaskStateMachine>);
}

/// Shared outbound clients handed to behaviors at preparation
#[derive(Clone)]
pub struct Collaborators {
    pub host_label: String,
    pub tools: Arc<dyn ToolInvoker>,
    pub agents: Arc<dyn AgentInvoker>,
    pub http: Client,
}

pub struct Behavior;

impl Behavior {
    /// Select the strategy once, at agent preparation
    pub fn prepare(spec: &AgentSpec, deps: &Collaborators) -> Result<Box<dyn AgentBehavior>> {
        let delay = Duration::from_millis(spec.delay_ms);
        let behavior: Box<dyn AgentBehavior> = match spec.behavior {
            BehaviorKind::Echo => Box::new(Echo {
                payload: spec.payload.clone(),
                delay,
            }),
            BehaviorKind::Stream => Box::new(Stream {
                payload: spec.payload.clone(),
                delay,
                count: spec.stream_count,
            }),
            BehaviorKind::Federate => Box::new(Federate {
                engine: FederationEngine::prepare(
                    spec.name.clone(),
                    deps.host_label.clone(),
                    spec.delegates.clone(),
                    deps.tools.clone(),
                    deps.agents.clone(),
                )?,
            }),
            BehaviorKind::HttpProxy => {
                let upstream = spec
                    .upstream
                    .clone()
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| AgentError::MissingUpstream(spec.name.clone()))?;
                Box::new(HttpProxy {
                    client: deps.http.clone(),
                    upstream,
                    delay,
                })
            }
        };
        debug!(agent = %spec.name, behavior = %spec.behavior, "behavior prepared");
        Ok(behavior)
    }
}

/// Sleep unless cancelled first; used where no task exists
async fn delay_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn finish(task: &TaskStateMachine, text: Option<String>) {
    if let Err(e) = task.complete(text) {
        debug!(task_id = %task.id(), error = %e, "task already finished");
    }
}

struct Echo {
    payload: String,
    delay: Duration,
}

impl Echo {
    fn reply(&self, content: &str) -> String {
        if self.payload.is_empty() {
            content.to_string()
        } else {
            format!("{} {}", self.payload, content).trim_end().to_string()
        }
    }
}

#[async_trait]
impl AgentBehavior for Echo {
    async fn do_unary(&self, inbound: &Inbound) -> Result<String> {
        delay_or_cancel(self.delay, &inbound.cancel).await?;
        Ok(self.reply(&inbound.content))
    }

    async fn do_stream(&self, inbound: &Inbound, task: Arc<TaskStateMachine>) {
        if !task.wait_or_cancel(self.delay, &inbound.cancel).await {
            return;
        }
        if task.update(self.reply(&inbound.content)).is_ok() {
            finish(&task, None);
        }
    }
}

struct Stream {
    payload: String,
    delay: Duration,
    count: u32,
}

impl Stream {
    fn item(&self, index: u32) -> String {
        let base = if self.payload.is_empty() { "update" } else { &self.payload };
        format!("{} {}", base, index)
    }
}

#[async_trait]
impl AgentBehavior for Stream {
    async fn do_unary(&self, inbound: &Inbound) -> Result<String> {
        let mut lines = Vec::with_capacity(self.count as usize);
        for i in 1..=self.count {
            delay_or_cancel(self.delay, &inbound.cancel).await?;
            lines.push(self.item(i));
        }
        Ok(lines.join("\n"))
    }

    async fn do_stream(&self, inbound: &Inbound, task: Arc<TaskStateMachine>) {
        for i in 1..=self.count {
            if !task.wait_or_cancel(self.delay, &inbound.cancel).await {
                info!(task_id = %task.id(), sent = i - 1, "stream cancelled");
                return;
            }
            if task.update(self.item(i)).is_err() {
                return;
            }
        }
        finish(&task, Some(format!("{} updates sent", self.count)));
    }
}

struct Federate {
    engine: FederationEngine,
}

#[async_trait]
impl AgentBehavior for Federate {
    async fn do_unary(&self, inbound: &Inbound) -> Result<String> {
        let doc = self
            .engine
            .run_unary(&inbound.content, inbound.headers.clone(), inbound.cancel.clone())
            .await;
        Ok(serde_json::to_string_pretty(&doc).unwrap_or_else(|_| doc.to_string()))
    }

    async fn do_stream(&self, inbound: &Inbound, task: Arc<TaskStateMachine>) {
        self.engine
            .run_stream(&inbound.content, inbound.headers.clone(), inbound.cancel.clone(), task)
            .await;
    }
}

struct HttpProxy {
    client: Client,
    upstream: String,
    delay: Duration,
}

impl HttpProxy {
    async fn forward(&self, inbound: &Inbound) -> Result<String> {
        let mut request = self.client.post(&self.upstream).body(inbound.content.clone());
        for (name, value) in &inbound.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let send = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(AgentError::Upstream {
                    status: status.as_u16(),
                    body,
                });
            }
            Ok(body)
        };

        tokio::select! {
            biased;
            _ = inbound.cancel.cancelled() => Err(AgentError::Cancelled),
            r = send => r,
        }
    }
}

#[async_trait]
impl AgentBehavior for HttpProxy {
    async fn do_unary(&self, inbound: &Inbound) -> Result<String> {
        delay_or_cancel(self.delay, &inbound.cancel).await?;
        debug!(upstream = %self.upstream, "proxying request");
        self.forward(inbound).await
    }

    async fn do_stream(&self, inbound: &Inbound, task: Arc<TaskStateMachine>) {
        if !task.wait_or_cancel(self.delay, &inbound.cancel).await {
            return;
        }
        match self.forward(inbound).await {
            Ok(body) => {
                if task.update(body).is_ok() {
                    finish(&task, None);
                }
            }
            Err(AgentError::Cancelled) => {
                let _ = task.cancel(Some("task was cancelled".to_string()));
            }
            Err(e) => {
                warn!(upstream = %self.upstream, error = %e, "proxy request failed");
                finish(&task, Some(e.to_string()));
            }
        }
    }
}
