// Task handler - the hosting server's task bookkeeping

use super::error::{Result, TaskError};
use super::types::{Artifact, Subscriber, TaskEvent, TaskState};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Task persistence and subscription, provided by the host
pub trait TaskHandler: Send + Sync {
    fn build_task(&self) -> String;
    fn subscribe_task(&self, task_id: &str) -> Result<Subscriber>;
    fn update_task_state(&self, task_id: &str, state: TaskState, message: Option<&str>);
    fn add_artifact(&self, task_id: &str, artifact: &Artifact, is_final: bool, is_question: bool);
    fn clean_task(&self, task_id: &str);
}

/// State kept per task
#[derive(Debug, Default)]
pub struct TaskRecord {
    pub history: Vec<(TaskState, Option<String>)>,
    pub artifacts: Vec<Artifact>,
    events: Option<mpsc::UnboundedReceiver<TaskEvent>>,
}

/// Default in-process handler
#[derive(Debug, Default)]
pub struct InMemoryTaskHandler {
    tasks: Mutex<HashMap<String, TaskRecord>>,
}

impl InMemoryTaskHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand the subscriber's receiving end to the transport
    pub fn take_events(&self, task_id: &str) -> Option<mpsc::UnboundedReceiver<TaskEvent>> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.get_mut(task_id).and_then(|r| r.events.take())
    }

    pub fn state(&self, task_id: &str) -> Option<TaskState> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks
            .get(task_id)
            .and_then(|r| r.history.last().map(|(state, _)| *state))
    }

    pub fn artifacts(&self, task_id: &str) -> Vec<Artifact> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks
            .get(task_id)
            .map(|r| r.artifacts.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskHandler for InMemoryTaskHandler {
    fn build_task(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.insert(id.clone(), TaskRecord::default());
        debug!(task_id = %id, "task built");
        id
    }

    fn subscribe_task(&self, task_id: &str) -> Result<Subscriber> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let record = tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::UnknownTask(task_id.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        record.events = Some(rx);
        Ok(Subscriber::new(tx))
    }

    fn update_task_state(&self, task_id: &str, state: TaskState, message: Option<&str>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = tasks.get_mut(task_id) {
            record.history.push((state, message.map(str::to_string)));
        }
    }

    fn add_artifact(&self, task_id: &str, artifact: &Artifact, _is_final: bool, _is_question: bool) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = tasks.get_mut(task_id) {
            record.artifacts.push(artifact.clone());
        }
    }

    fn clean_task(&self, task_id: &str) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if tasks.remove(task_id).is_some() {
            debug!(task_id, "task cleaned");
        }
    }
}
