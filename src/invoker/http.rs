// HTTP invokers - JSON-RPC 2.0 over HTTP POST

use super::{
    AgentEvent, AgentEventSink, AgentInvoker, AgentRequest, AgentSession, Endpoint, InvokeError,
    Result, ToolInvoker, ToolSession,
};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HOST, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Shared settings of the HTTP invokers
#[derive(Debug, Clone)]
pub struct HttpInvokerConfig {
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Maximum retry attempts for transport failures
    pub max_retries: u32,
    /// Base retry delay in milliseconds
    pub base_retry_delay_ms: u64,
}

impl Default for HttpInvokerConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_retries: 2,
            base_retry_delay_ms: 200,
        }
    }
}

fn build_client(config: &HttpInvokerConfig) -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?)
}

fn build_headers(endpoint: &Endpoint, headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| InvokeError::InvalidHeader(name.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| InvokeError::InvalidHeader(name.as_str().to_string()))?;
        map.insert(name, value);
    }
    if let Some(authority) = &endpoint.authority {
        let value = HeaderValue::from_str(authority)
            .map_err(|_| InvokeError::InvalidHeader("host".to_string()))?;
        map.insert(HOST, value);
    }
    Ok(map)
}

/// One JSON-RPC endpoint with its headers
#[derive(Clone)]
struct RpcClient {
    client: Client,
    url: String,
    headers: HeaderMap,
    config: HttpInvokerConfig,
}

impl RpcClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let start = Instant::now();
        let mut retries = 0;
        let base_delay = Duration::from_millis(self.config.base_retry_delay_ms);

        loop {
            debug!(url = %self.url, method, retry = retries, "sending rpc request");
            match self.send_once(method, &params).await {
                Ok(result) => {
                    info!(
                        url = %self.url,
                        method,
                        latency_ms = start.elapsed().as_millis() as u64,
                        retries,
                        "rpc call completed"
                    );
                    return Ok(result);
                }
                Err(e) if e.is_retryable() => {
                    retries += 1;
                    if retries > self.config.max_retries {
                        error!(url = %self.url, method, retries, error = %e, "rpc call failed: exhausted retries");
                        return Err(InvokeError::Exhausted {
                            retries,
                            last_error: e.to_string(),
                        });
                    }

                    let multiplier = 2u64.saturating_pow(retries - 1);
                    let delay_ms = base_delay.as_millis() as u64 * multiplier;
                    let delay = Duration::from_millis(delay_ms.min(30000));

                    warn!(
                        url = %self.url,
                        retry = retries,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "rpc call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, method: &str, params: &Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        debug!(status = status.as_u16(), "received rpc response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InvokeError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let mut envelope: Value = serde_json::from_str(&text)?;

        if let Some(err) = envelope.get("error") {
            return Err(InvokeError::Remote {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        envelope
            .get_mut("result")
            .map(Value::take)
            .ok_or_else(|| InvokeError::Malformed("response has neither result nor error".into()))
    }
}

/// Calls remote tools with `tools/call`
pub struct HttpToolInvoker {
    client: Client,
    config: HttpInvokerConfig,
}

impl HttpToolInvoker {
    pub fn new(config: HttpInvokerConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }
}

#[async_trait]
impl ToolInvoker for HttpToolInvoker {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        headers: &HashMap<String, String>,
    ) -> Result<Box<dyn ToolSession>> {
        if reqwest::Url::parse(&endpoint.url).is_err() {
            return Err(InvokeError::ConnectFailed {
                url: endpoint.url.clone(),
                reason: "invalid url".to_string(),
            });
        }
        Ok(Box::new(HttpToolSession {
            rpc: RpcClient {
                client: self.client.clone(),
                url: endpoint.url.clone(),
                headers: build_headers(endpoint, headers)?,
                config: self.config.clone(),
            },
        }))
    }
}

struct HttpToolSession {
    rpc: RpcClient,
}

#[async_trait]
impl ToolSession for HttpToolSession {
    async fn call_tool(&self, tool: &str, args: &Map<String, Value>) -> Result<Map<String, Value>> {
        let result = self
            .rpc
            .call("tools/call", json!({ "name": tool, "arguments": args }))
            .await?;
        match result {
            Value::Object(map) => Ok(map),
            other => Err(InvokeError::Malformed(format!("tool result is not an object: {other}"))),
        }
    }
}

/// Calls peer agents with `message/send`
pub struct HttpAgentInvoker {
    client: Client,
    config: HttpInvokerConfig,
}

impl HttpAgentInvoker {
    pub fn new(config: HttpInvokerConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }
}

#[async_trait]
impl AgentInvoker for HttpAgentInvoker {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        headers: &HashMap<String, String>,
    ) -> Result<Box<dyn AgentSession>> {
        if reqwest::Url::parse(&endpoint.url).is_err() {
            return Err(InvokeError::ConnectFailed {
                url: endpoint.url.clone(),
                reason: "invalid url".to_string(),
            });
        }
        Ok(Box::new(HttpAgentSession {
            rpc: RpcClient {
                client: self.client.clone(),
                url: endpoint.url.clone(),
                headers: build_headers(endpoint, headers)?,
                config: self.config.clone(),
            },
        }))
    }
}

struct HttpAgentSession {
    rpc: RpcClient,
}

#[async_trait]
impl AgentSession for HttpAgentSession {
    async fn call_agent(&self, request: &AgentRequest, sink: &mut dyn AgentEventSink) -> Result<()> {
        let mut parts = vec![json!({ "kind": "text", "text": request.message })];
        if let Some(data) = &request.data {
            parts.push(json!({ "kind": "data", "data": data }));
        }
        let params = json!({
            "message": {
                "role": "user",
                "messageId": uuid::Uuid::new_v4().to_string(),
                "parts": parts,
            },
            "metadata": { "agent": request.agent },
        });

        let result = self.rpc.call("message/send", params).await?;
        classify_result(&result, sink)
    }
}

/// Sort a peer agent's reply into text, data, status and artifact events
pub fn classify_result(result: &Value, sink: &mut dyn AgentEventSink) -> Result<()> {
    let kind = result.get("kind").and_then(Value::as_str).unwrap_or("message");
    match kind {
        "task" => {
            if let Some(status) = result.get("status") {
                emit_status(status, sink);
            }
            for artifact in result.get("artifacts").and_then(Value::as_array).into_iter().flatten() {
                emit_artifact(artifact, sink);
            }
            Ok(())
        }
        "status-update" => {
            let status = result
                .get("status")
                .ok_or_else(|| InvokeError::Malformed("status-update without status".into()))?;
            emit_status(status, sink);
            Ok(())
        }
        "artifact-update" => {
            let artifact = result
                .get("artifact")
                .ok_or_else(|| InvokeError::Malformed("artifact-update without artifact".into()))?;
            emit_artifact(artifact, sink);
            Ok(())
        }
        _ => {
            let parts = result
                .get("parts")
                .and_then(Value::as_array)
                .ok_or_else(|| InvokeError::Malformed("message without parts".into()))?;
            for part in parts {
                match part.get("kind").and_then(Value::as_str) {
                    Some("text") => sink.on_event(AgentEvent::Text(part_text(part))),
                    Some("data") => {
                        sink.on_event(AgentEvent::Data(part.get("data").cloned().unwrap_or(Value::Null)))
                    }
                    _ => sink.on_event(AgentEvent::Data(part.clone())),
                }
            }
            Ok(())
        }
    }
}

fn part_text(part: &Value) -> String {
    part.get("text").and_then(Value::as_str).unwrap_or_default().to_string()
}

fn parts_text(parts: Option<&Value>) -> String {
    parts
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|p| p.get("kind").and_then(Value::as_str) == Some("text"))
        .map(part_text)
        .collect::<Vec<_>>()
        .join("")
}

fn emit_status(status: &Value, sink: &mut dyn AgentEventSink) {
    let state = status
        .get("state")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let message = status
        .get("message")
        .map(|m| parts_text(m.get("parts")))
        .filter(|t| !t.is_empty());
    sink.on_event(AgentEvent::Status { state, message });
}

fn emit_artifact(artifact: &Value, sink: &mut dyn AgentEventSink) {
    let name = artifact
        .get("name")
        .or_else(|| artifact.get("artifactId"))
        .and_then(Value::as_str)
        .unwrap_or("artifact")
        .to_string();
    sink.on_event(AgentEvent::Artifact {
        name,
        text: parts_text(artifact.get("parts")),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_message() {
        let mut events: Vec<AgentEvent> = Vec::new();
        let result = json!({
            "kind": "message",
            "parts": [
                {"kind": "text", "text": "hello"},
                {"kind": "data", "data": {"hops": []}}
            ]
        });
        classify_result(&result, &mut events).unwrap();
        assert_eq!(events[0], AgentEvent::Text("hello".to_string()));
        assert_eq!(events[1], AgentEvent::Data(json!({"hops": []})));
    }

    #[test]
    fn test_classify_task() {
        let mut events: Vec<AgentEvent> = Vec::new();
        let result = json!({
            "kind": "task",
            "status": {"state": "completed", "message": {"parts": [{"kind": "text", "text": "done"}]}},
            "artifacts": [{"name": "report", "parts": [{"kind": "text", "text": "all good"}]}]
        });
        classify_result(&result, &mut events).unwrap();
        assert_eq!(
            events,
            vec![
                AgentEvent::Status {
                    state: "completed".to_string(),
                    message: Some("done".to_string())
                },
                AgentEvent::Artifact {
                    name: "report".to_string(),
                    text: "all good".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_classify_malformed() {
        let mut events: Vec<AgentEvent> = Vec::new();
        let result = classify_result(&json!({"kind": "message"}), &mut events);
        assert!(matches!(result, Err(InvokeError::Malformed(_))));
    }

    #[test]
    fn test_authority_sets_host_header() {
        let endpoint = Endpoint::new("http://127.0.0.1:8081/mcp", Some("weather.local".to_string()));
        let mut headers = HashMap::new();
        headers.insert("x-request-id".to_string(), "abc".to_string());
        let map = build_headers(&endpoint, &headers).unwrap();
        assert_eq!(map.get(HOST).unwrap(), "weather.local");
        assert_eq!(map.get("x-request-id").unwrap(), "abc");
    }

    #[test]
    fn test_invalid_header_rejected() {
        let endpoint = Endpoint::new("http://127.0.0.1/", None);
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "v".to_string());
        assert!(matches!(
            build_headers(&endpoint, &headers),
            Err(InvokeError::InvalidHeader(_))
        ));
    }
}
