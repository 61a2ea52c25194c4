// Result aggregator - unary document and streaming fan-in

use crate::delegate::context::{AgentContext, DelegateOutcome, LocalProgress, ResultItem};
use crate::delegate::dispatch::DispatchReport;
use crate::task::TaskStateMachine;
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const STREAM_CANCELLED: &str = "stream was cancelled";
pub const NO_DELEGATES_AVAILABLE: &str = "No delegates available";
pub const NO_DELEGATES_TRIGGERED: &str = "No delegates triggered";
pub const NO_TOOLS_TRIGGERED: &str = "No tools triggered";
pub const NO_AGENTS_TRIGGERED: &str = "No agents triggered";

/// Receiving ends of the three streaming channels
pub struct StreamReceivers {
    pub local: UnboundedReceiver<LocalProgress>,
    pub upstream: UnboundedReceiver<String>,
    pub results: UnboundedReceiver<ResultItem>,
}

pub struct ResultAggregator;

impl ResultAggregator {
    /// Combine a finished dispatch into one response document
    pub fn unary_document(ctx: &AgentContext, report: &DispatchReport, index_empty: bool) -> Value {
        let tools = keyed(&report.tools, index_empty, NO_TOOLS_TRIGGERED);
        let agents = keyed(&report.agents, index_empty, NO_AGENTS_TRIGGERED);
        let hops = ctx
            .hops
            .lock()
            .map(|h| h.to_json())
            .unwrap_or_else(|e| e.into_inner().to_json());

        json!({
            "agent": ctx.agent,
            "message": ctx.message,
            "tools": tools,
            "agents": agents,
            "hops": hops,
        })
    }

    /// Spawn the three reader loops. Each turns every item into one Working
    /// update and stops on channel close or cancellation.
    pub fn spawn_readers(
        task: Arc<TaskStateMachine>,
        cancel: CancellationToken,
        receivers: StreamReceivers,
    ) -> Vec<JoinHandle<()>> {
        let StreamReceivers {
            local,
            upstream,
            results,
        } = receivers;

        let gate = Arc::new(Mutex::new(()));
        vec![
            spawn_reader("upstream", upstream, task.clone(), cancel.clone(), gate.clone(), |task, text| {
                task.update(text)
            }),
            spawn_reader(
                "local",
                local,
                task.clone(),
                cancel.clone(),
                gate.clone(),
                |task, (delegate, msg)| task.update(format!("{}: {}", delegate, msg)),
            ),
            spawn_reader("results", results, task, cancel, gate, |task, item| {
                if let Some((name, text)) = item.as_artifact() {
                    return task.add_artifact(name, format!("from {}", item.delegate), text);
                }
                match serde_json::to_value(&item) {
                    Ok(data) => task.update_data(data),
                    Err(e) => task.update(format!("{}: unserializable result: {}", item.delegate, e)),
                }
            }),
        ]
    }
}

fn keyed(outcomes: &[(String, DelegateOutcome)], index_empty: bool, none_triggered: &str) -> Value {
    if outcomes.is_empty() {
        let info = if index_empty { NO_DELEGATES_AVAILABLE } else { none_triggered };
        return json!({ "info": info });
    }
    let mut map = Map::new();
    for (name, outcome) in outcomes {
        map.insert(name.clone(), outcome.to_json());
    }
    Value::Object(map)
}

/// One reader loop. `gate` serializes emits with the cancellation notices
/// of all readers, so no item is published after any reader reported
/// cancellation.
fn spawn_reader<T, F>(
    channel: &'static str,
    mut rx: UnboundedReceiver<T>,
    task: Arc<TaskStateMachine>,
    cancel: CancellationToken,
    gate: Arc<Mutex<()>>,
    emit: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(&TaskStateMachine, T) -> crate::task::error::Result<()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(channel, task_id = %task.id(), "reader cancelled");
                    let _guard = gate.lock().unwrap_or_else(|e| e.into_inner());
                    if let Err(e) = task.update(STREAM_CANCELLED) {
                        warn!(channel, error = %e, "could not report cancellation");
                    }
                    break;
                }
                item = rx.recv() => match item {
                    Some(item) => {
                        let _guard = gate.lock().unwrap_or_else(|e| e.into_inner());
                        if cancel.is_cancelled() {
                            debug!(channel, "dropping item received before cancellation");
                            continue;
                        }
                        if let Err(e) = emit(&task, item) {
                            warn!(channel, error = %e, "dropping stream update");
                        }
                    }
                    None => break,
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::context::{DelegateKind, StreamChannels};
    use crate::hops::Hops;
    use crate::task::{InMemoryTaskHandler, TaskEvent};
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn ctx() -> AgentContext {
        let mut ctx = AgentContext::new(
            "router",
            HashMap::new(),
            Hops::new("host-a", "federate").shared(),
            CancellationToken::new(),
        );
        ctx.message = "check weather".to_string();
        ctx
    }

    #[test]
    fn test_unary_placeholders() {
        let ctx = ctx();
        let report = DispatchReport::default();

        let doc = ResultAggregator::unary_document(&ctx, &report, true);
        assert_eq!(doc["tools"], json!({"info": NO_DELEGATES_AVAILABLE}));
        assert_eq!(doc["agents"], json!({"info": NO_DELEGATES_AVAILABLE}));

        let doc = ResultAggregator::unary_document(&ctx, &report, false);
        assert_eq!(doc["tools"], json!({"info": NO_TOOLS_TRIGGERED}));
        assert_eq!(doc["agents"], json!({"info": NO_AGENTS_TRIGGERED}));
        assert_eq!(doc["message"], "check weather");
    }

    #[test]
    fn test_unary_keeps_dispatch_order() {
        let ctx = ctx();
        let report = DispatchReport {
            tools: vec![
                ("weather".into(), DelegateOutcome::Success { content: vec![json!("sunny")], upstream: None }),
                ("alerts".into(), DelegateOutcome::Failure("connection refused".into())),
            ],
            agents: Vec::new(),
        };
        let doc = ResultAggregator::unary_document(&ctx, &report, false);
        let keys: Vec<&String> = doc["tools"].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["weather", "alerts"]);
        assert_eq!(doc["tools"]["alerts"], json!({"error": "connection refused"}));
    }

    #[tokio::test]
    async fn test_readers_drain_until_closed() {
        let handler = Arc::new(InMemoryTaskHandler::new());
        let task = TaskStateMachine::start(handler.clone()).unwrap();
        let mut events = handler.take_events(task.id()).unwrap();

        let (results_tx, results) = mpsc::unbounded_channel();
        let (local_tx, local) = mpsc::unbounded_channel();
        let (upstream_tx, upstream) = mpsc::unbounded_channel();
        let mut ctx = ctx().with_channels(StreamChannels {
            local: Some(local_tx),
            upstream: Some(upstream_tx),
            results: Some(results_tx),
        });

        let readers = ResultAggregator::spawn_readers(
            task.clone(),
            ctx.cancel.clone(),
            StreamReceivers { local, upstream, results },
        );

        ctx.progress("weather", "calling");
        ctx.upstream_progress("weather [working]");
        ctx.send_result(ResultItem {
            delegate: "weather".into(),
            kind: DelegateKind::Tool,
            data: json!("sunny"),
        });
        ctx.close_channels();
        futures::future::join_all(readers).await;
        task.complete(None).unwrap();

        let mut texts = Vec::new();
        let mut data = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if let TaskEvent::Status { text, data: d, .. } = ev {
                texts.extend(text);
                data.extend(d);
            }
        }
        assert!(texts.contains(&"weather: calling".to_string()));
        assert!(texts.contains(&"weather [working]".to_string()));
        assert_eq!(data, vec![json!({"delegate": "weather", "kind": "tool", "data": "sunny"})]);
        assert!(!texts.iter().any(|t| t == STREAM_CANCELLED));
    }

    #[tokio::test]
    async fn test_readers_report_cancellation_once_each() {
        let handler = Arc::new(InMemoryTaskHandler::new());
        let task = TaskStateMachine::start(handler.clone()).unwrap();
        let mut events = handler.take_events(task.id()).unwrap();
        let cancel = CancellationToken::new();

        let (_results_tx, results) = mpsc::unbounded_channel::<ResultItem>();
        let (_local_tx, local) = mpsc::unbounded_channel::<LocalProgress>();
        let (_upstream_tx, upstream) = mpsc::unbounded_channel::<String>();

        let readers = ResultAggregator::spawn_readers(
            task.clone(),
            cancel.clone(),
            StreamReceivers { local, upstream, results },
        );
        cancel.cancel();
        futures::future::join_all(readers).await;

        let mut cancelled = 0;
        while let Ok(ev) = events.try_recv() {
            if ev.text() == Some(STREAM_CANCELLED) {
                cancelled += 1;
            }
        }
        assert_eq!(cancelled, 3);
    }

    #[tokio::test]
    async fn test_peer_artifact_attached_to_task() {
        let handler = Arc::new(InMemoryTaskHandler::new());
        let task = TaskStateMachine::start(handler.clone()).unwrap();
        let mut events = handler.take_events(task.id()).unwrap();

        let (results_tx, results) = mpsc::unbounded_channel();
        let (_local_tx, local) = mpsc::unbounded_channel::<LocalProgress>();
        let (_upstream_tx, upstream) = mpsc::unbounded_channel::<String>();
        let readers = ResultAggregator::spawn_readers(
            task.clone(),
            CancellationToken::new(),
            StreamReceivers { local, upstream, results },
        );

        results_tx
            .send(ResultItem::artifact("planner", "itinerary", "day 1: museum"))
            .unwrap();
        drop(results_tx);
        drop(_local_tx);
        drop(_upstream_tx);
        futures::future::join_all(readers).await;

        assert_eq!(handler.artifacts(task.id())[0].name, "itinerary");
        let artifact = std::iter::from_fn(|| events.try_recv().ok())
            .find_map(|ev| match ev {
                TaskEvent::Artifact { artifact, .. } => Some(artifact),
                _ => None,
            })
            .unwrap();
        assert_eq!(artifact.text, "day 1: museum");
        assert_eq!(artifact.description, "from planner");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_nothing_published_after_cancellation_notice() {
        for _ in 0..20 {
            let handler = Arc::new(InMemoryTaskHandler::new());
            let task = TaskStateMachine::start(handler.clone()).unwrap();
            let mut events = handler.take_events(task.id()).unwrap();
            let cancel = CancellationToken::new();

            let (results_tx, results) = mpsc::unbounded_channel();
            let (local_tx, local) = mpsc::unbounded_channel();
            let (upstream_tx, upstream) = mpsc::unbounded_channel();
            let readers = ResultAggregator::spawn_readers(
                task.clone(),
                cancel.clone(),
                StreamReceivers { local, upstream, results },
            );

            for i in 0..500 {
                let _ = results_tx.send(ResultItem {
                    delegate: "weather".into(),
                    kind: DelegateKind::Tool,
                    data: json!(i),
                });
                let _ = local_tx.send(("weather".to_string(), format!("step {}", i)));
                let _ = upstream_tx.send(format!("remote {}", i));
                if i == 250 {
                    cancel.cancel();
                }
            }
            futures::future::join_all(readers).await;

            let events: Vec<TaskEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
            let first = events
                .iter()
                .position(|ev| ev.text() == Some(STREAM_CANCELLED))
                .unwrap();
            assert!(events[first..].iter().all(|ev| ev.text() == Some(STREAM_CANCELLED)));
            assert_eq!(events[first..].len(), 3);
            task.cancel(None).unwrap();
        }
    }
}
