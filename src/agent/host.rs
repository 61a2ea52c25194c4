// Host - serves UserRequests from comm against the registry

use super::error::{AgentError, Result};
use super::registry::AgentRegistry;
use super::types::{AgentReply, Inbound};
use crate::comm::{UpdatePayload, UserRequest, UserResponse};
use crate::task::{InMemoryTaskHandler, TaskEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Request handling state shared by every in-flight request
#[derive(Clone)]
pub struct Host {
    registry: Arc<AgentRegistry>,
    tasks: Arc<InMemoryTaskHandler>,
    request_timeout_secs: u64,
}

impl Host {
    pub fn new(registry: Arc<AgentRegistry>, request_timeout_secs: u64) -> Self {
        Self {
            registry,
            tasks: Arc::new(InMemoryTaskHandler::new()),
            request_timeout_secs,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Serve one request and send its response back to comm
    pub async fn handle_user_request(&self, req: UserRequest) {
        let UserRequest {
            agent,
            content,
            headers,
            stream,
            cancel,
            updates,
            reply,
            source_addr,
        } = req;

        info!(addr = %source_addr, agent = %agent, stream, "Handling user request");

        let inbound = Inbound::new(content)
            .with_headers(headers)
            .with_cancel(cancel.clone());

        let result = timeout(
            Duration::from_secs(self.request_timeout_secs),
            self.handle(&agent, inbound, stream, &updates),
        )
        .await;

        let response = match result {
            Ok(Ok(text)) => UserResponse::new(text),
            Ok(Err(e)) => {
                warn!(agent = %agent, error = %e, "Handle failed");
                UserResponse::error(e.to_string())
            }
            Err(_) => {
                error!(agent = %agent, "Handle timed out");
                cancel.cancel();
                UserResponse::error(AgentError::Timeout(self.request_timeout_secs).to_string())
            }
        };

        if reply.send(response).is_err() {
            warn!("Failed to send response to client");
        }
    }

    async fn handle(
        &self,
        agent: &str,
        inbound: Inbound,
        stream: bool,
        updates: &mpsc::UnboundedSender<UpdatePayload>,
    ) -> Result<String> {
        let agent = self.registry.get(agent)?;
        match agent.handle(inbound, stream, &self.tasks).await? {
            AgentReply::Unary(text) => Ok(text),
            AgentReply::Streaming {
                task_id,
                mut events,
                done,
            } => {
                let mut summary = format!("task {} finished", task_id);
                while let Some(event) = events.recv().await {
                    if let TaskEvent::Status {
                        state,
                        text,
                        is_final: true,
                        ..
                    } = &event
                    {
                        summary = text.clone().unwrap_or_else(|| format!("task {} {}", task_id, state));
                    }
                    let _ = updates.send(update_payload(&event));
                }
                if let Err(e) = done.await {
                    warn!(task_id = %task_id, error = %e, "streaming task panicked");
                }
                Ok(summary)
            }
        }
    }
}

/// Wire form of a task event
pub fn update_payload(event: &TaskEvent) -> UpdatePayload {
    match event {
        TaskEvent::Status {
            task_id,
            state,
            text,
            data,
            ..
        } => UpdatePayload {
            task_id: task_id.clone(),
            state: state.to_string(),
            text: text.clone(),
            data: data.as_ref().map(|d| d.to_string()),
        },
        TaskEvent::Artifact { task_id, artifact } => UpdatePayload {
            task_id: task_id.clone(),
            state: "artifact".to_string(),
            text: Some(format!("{}: {}", artifact.name, artifact.text)),
            data: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentSpec, BehaviorKind, Collaborators};
    use crate::invoker::{HttpAgentInvoker, HttpInvokerConfig, HttpToolInvoker};
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    fn host() -> Host {
        let registry = AgentRegistry::new(Collaborators {
            host_label: "test".to_string(),
            tools: Arc::new(HttpToolInvoker::new(HttpInvokerConfig::default()).unwrap()),
            agents: Arc::new(HttpAgentInvoker::new(HttpInvokerConfig::default()).unwrap()),
            http: reqwest::Client::new(),
        });
        registry
            .create(AgentSpec {
                name: "ticker".to_string(),
                behavior: BehaviorKind::Stream,
                payload: "tick".to_string(),
                stream_count: 2,
                ..Default::default()
            })
            .unwrap();
        Host::new(Arc::new(registry), 5)
    }

    fn request(agent: &str, stream: bool) -> (UserRequest, mpsc::UnboundedReceiver<UpdatePayload>, oneshot::Receiver<UserResponse>) {
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let (reply, reply_rx) = oneshot::channel();
        let req = UserRequest {
            agent: agent.to_string(),
            content: "go".to_string(),
            headers: Default::default(),
            stream,
            cancel: CancellationToken::new(),
            updates,
            reply,
            source_addr: "127.0.0.1:5000".parse().unwrap(),
        };
        (req, updates_rx, reply_rx)
    }

    #[tokio::test]
    async fn test_streaming_request_relays_updates() {
        let host = host();
        let (req, mut updates, reply) = request("ticker", true);
        host.handle_user_request(req).await;

        let response = reply.await.unwrap();
        assert!(!response.is_error);
        assert_eq!(response.content, "2 updates sent");

        let mut texts = Vec::new();
        while let Ok(update) = updates.try_recv() {
            texts.extend(update.text);
        }
        assert_eq!(texts, ["tick 1", "tick 2", "2 updates sent"]);
    }

    #[tokio::test]
    async fn test_unknown_agent_is_an_error_response() {
        let host = host();
        let (req, _updates, reply) = request("nobody", false);
        host.handle_user_request(req).await;

        let response = reply.await.unwrap();
        assert!(response.is_error);
        assert!(response.content.contains("nobody"));
    }
}
