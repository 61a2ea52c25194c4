// Task state machine - Working -> Completed | Canceled

use super::error::{Result, TaskError};
use super::handler::TaskHandler;
use super::types::{Artifact, Subscriber, TaskEvent, TaskState};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Inner {
    state: TaskState,
    subscriber: Option<Subscriber>,
}

/// Life cycle of one inbound task, shared by everything producing updates
pub struct TaskStateMachine {
    id: String,
    handler: Arc<dyn TaskHandler>,
    inner: Mutex<Inner>,
}

impl TaskStateMachine {
    /// Build and subscribe a task, entering `Working`
    pub fn start(handler: Arc<dyn TaskHandler>) -> Result<Arc<Self>> {
        let id = handler.build_task();
        let subscriber = handler.subscribe_task(&id)?;
        handler.update_task_state(&id, TaskState::Working, None);
        subscriber.send(TaskEvent::Status {
            task_id: id.clone(),
            state: TaskState::Working,
            text: None,
            data: None,
            is_final: false,
        });
        info!(task_id = %id, "task started");

        Ok(Arc::new(Self {
            id,
            handler,
            inner: Mutex::new(Inner {
                state: TaskState::Working,
                subscriber: Some(subscriber),
            }),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn terminal_error(&self, state: TaskState) -> TaskError {
        TaskError::Terminal {
            id: self.id.clone(),
            state,
        }
    }

    /// Intermediate text update
    pub fn update(&self, text: impl Into<String>) -> Result<()> {
        self.working(Some(text.into()), None)
    }

    /// Intermediate structured update
    pub fn update_data(&self, data: Value) -> Result<()> {
        self.working(None, Some(data))
    }

    fn working(&self, text: Option<String>, data: Option<Value>) -> Result<()> {
        let inner = self.lock();
        if inner.state.is_terminal() {
            return Err(self.terminal_error(inner.state));
        }
        self.handler
            .update_task_state(&self.id, TaskState::Working, text.as_deref());
        if let Some(subscriber) = &inner.subscriber {
            subscriber.send(TaskEvent::Status {
                task_id: self.id.clone(),
                state: TaskState::Working,
                text,
                data,
                is_final: false,
            });
        }
        Ok(())
    }

    /// Attach a named text artifact; notifies the subscriber and persists it
    pub fn add_artifact(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<()> {
        let inner = self.lock();
        if inner.state.is_terminal() {
            return Err(self.terminal_error(inner.state));
        }
        let artifact = Artifact {
            name: name.into(),
            description: description.into(),
            text: text.into(),
        };
        if let Some(subscriber) = &inner.subscriber {
            subscriber.send(TaskEvent::Artifact {
                task_id: self.id.clone(),
                artifact: artifact.clone(),
            });
        }
        self.handler.add_artifact(&self.id, &artifact, false, false);
        Ok(())
    }

    pub fn complete(&self, text: Option<String>) -> Result<()> {
        self.finish(TaskState::Completed, text)
    }

    pub fn cancel(&self, text: Option<String>) -> Result<()> {
        self.finish(TaskState::Canceled, text)
    }

    /// The single terminal transition: closes the subscriber, cleans the task
    fn finish(&self, state: TaskState, text: Option<String>) -> Result<()> {
        let subscriber = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                debug!(task_id = %self.id, current = %inner.state, requested = %state, "ignoring terminal transition");
                return Err(self.terminal_error(inner.state));
            }
            inner.state = state;
            inner.subscriber.take()
        };

        self.handler.update_task_state(&self.id, state, text.as_deref());
        if let Some(subscriber) = subscriber {
            subscriber.send(TaskEvent::Status {
                task_id: self.id.clone(),
                state,
                text,
                data: None,
                is_final: true,
            });
        }
        self.handler.clean_task(&self.id);
        info!(task_id = %self.id, state = %state, "task finished");
        Ok(())
    }

    /// Sleep for `delay` unless cancelled first. On cancellation the task
    /// moves to `Canceled` and false is returned.
    pub async fn wait_or_cancel(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        if delay.is_zero() && !cancel.is_cancelled() {
            return true;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = self.cancel(Some("task was cancelled".to_string()));
                false
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::handler::InMemoryTaskHandler;
    use crate::task::types::Subscriber;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Handler that counts cleanups and keeps the receiver for inspection
    #[derive(Default)]
    struct CountingHandler {
        cleaned: AtomicUsize,
        artifacts: AtomicUsize,
        rx: Mutex<Option<mpsc::UnboundedReceiver<TaskEvent>>>,
    }

    impl TaskHandler for CountingHandler {
        fn build_task(&self) -> String {
            "task-1".to_string()
        }

        fn subscribe_task(&self, _task_id: &str) -> Result<Subscriber> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.rx.lock().unwrap() = Some(rx);
            Ok(Subscriber::new(tx))
        }

        fn update_task_state(&self, _task_id: &str, _state: TaskState, _message: Option<&str>) {}

        fn add_artifact(&self, _task_id: &str, _artifact: &Artifact, _is_final: bool, _is_question: bool) {
            self.artifacts.fetch_add(1, Ordering::SeqCst);
        }

        fn clean_task(&self, _task_id: &str) {
            self.cleaned.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn drain(handler: &CountingHandler) -> Vec<TaskEvent> {
        let mut rx = handler.rx.lock().unwrap().take().unwrap();
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[test]
    fn test_terminal_state_is_final() {
        let handler = Arc::new(CountingHandler::default());
        let task = TaskStateMachine::start(handler.clone()).unwrap();

        task.update("halfway").unwrap();
        task.complete(Some("done".to_string())).unwrap();

        assert!(task.update("late").is_err());
        assert!(task.cancel(None).is_err());
        assert!(task.complete(None).is_err());
        assert!(task.add_artifact("a", "b", "c").is_err());
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(handler.cleaned.load(Ordering::SeqCst), 1);

        let events = drain(&handler);
        assert_eq!(events.len(), 3);
        assert!(events[2].is_final());
        assert_eq!(events[1].text(), Some("halfway"));
    }

    #[test]
    fn test_artifact_notifies_and_persists() {
        let handler = Arc::new(CountingHandler::default());
        let task = TaskStateMachine::start(handler.clone()).unwrap();

        task.add_artifact("report", "summary", "all good").unwrap();
        task.cancel(None).unwrap();

        assert_eq!(handler.artifacts.load(Ordering::SeqCst), 1);
        let events = drain(&handler);
        assert!(matches!(&events[1], TaskEvent::Artifact { artifact, .. } if artifact.name == "report"));
        assert!(matches!(&events[2], TaskEvent::Status { state: TaskState::Canceled, .. }));
    }

    #[tokio::test]
    async fn test_wait_or_cancel() {
        let handler = Arc::new(CountingHandler::default());
        let task = TaskStateMachine::start(handler.clone()).unwrap();
        let cancel = CancellationToken::new();

        assert!(task.wait_or_cancel(Duration::from_millis(5), &cancel).await);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        assert!(!task.wait_or_cancel(Duration::from_secs(30), &cancel).await);
        assert_eq!(task.state(), TaskState::Canceled);
        assert_eq!(handler.cleaned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_in_memory_handler_round_trip() {
        let handler = Arc::new(InMemoryTaskHandler::new());
        let task = TaskStateMachine::start(handler.clone()).unwrap();
        let mut events = handler.take_events(task.id()).unwrap();

        task.add_artifact("notes", "", "text").unwrap();
        assert_eq!(handler.state(task.id()), Some(TaskState::Working));
        assert_eq!(handler.artifacts(task.id()).len(), 1);

        task.complete(None).unwrap();
        assert!(handler.is_empty());

        let mut count = 0;
        while events.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
