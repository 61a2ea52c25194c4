// Agent registry - prepared agents by name

use super::behavior::{AgentBehavior, Behavior, Collaborators};
use super::error::{AgentError, Result};
use super::types::{AgentCard, AgentReply, AgentSpec, Inbound};
use crate::task::{InMemoryTaskHandler, TaskStateMachine};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// A prepared agent: its definition plus the behavior chosen for it
pub struct Agent {
    spec: AgentSpec,
    behavior: Box<dyn AgentBehavior>,
}

impl Agent {
    pub fn prepare(spec: AgentSpec, deps: &Collaborators) -> Result<Self> {
        if spec.name.trim().is_empty() {
            return Err(AgentError::EmptyName);
        }
        let behavior = Behavior::prepare(&spec, deps)?;
        Ok(Self { spec, behavior })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub fn card(&self) -> AgentCard {
        self.spec.card()
    }

    pub async fn unary(&self, inbound: &Inbound) -> Result<String> {
        self.behavior.do_unary(inbound).await
    }

    pub async fn stream(&self, inbound: &Inbound, task: Arc<TaskStateMachine>) {
        self.behavior.do_stream(inbound, task).await
    }

    /// Answer one inbound message. Streaming calls get a task whose events
    /// the caller drains; the behavior runs on its own tokio task.
    pub async fn handle(
        self: &Arc<Self>,
        inbound: Inbound,
        stream: bool,
        handler: &Arc<InMemoryTaskHandler>,
    ) -> Result<AgentReply> {
        if !stream {
            return Ok(AgentReply::Unary(self.unary(&inbound).await?));
        }

        let task = TaskStateMachine::start(handler.clone())?;
        let task_id = task.id().to_string();
        let events = handler
            .take_events(&task_id)
            .ok_or_else(|| AgentError::NoSubscriber(task_id.clone()))?;

        let agent = self.clone();
        let done = tokio::spawn(async move {
            agent.stream(&inbound, task).await;
        });
        info!(agent = %self.name(), task_id = %task_id, "streaming task started");

        Ok(AgentReply::Streaming {
            task_id,
            events,
            done,
        })
    }
}

/// Owns every agent served by this process
pub struct AgentRegistry {
    deps: Collaborators,
    agents: RwLock<HashMap<String, Arc<Agent>>>,
}

impl AgentRegistry {
    pub fn new(deps: Collaborators) -> Self {
        Self {
            deps,
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Prepare and register an agent; names are unique
    pub fn create(&self, spec: AgentSpec) -> Result<Arc<Agent>> {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        if agents.contains_key(&spec.name) {
            return Err(AgentError::Duplicate(spec.name));
        }
        let agent = Arc::new(Agent::prepare(spec, &self.deps)?);
        info!(agent = %agent.name(), behavior = %agent.spec().behavior, "agent registered");
        agents.insert(agent.name().to_string(), agent.clone());
        Ok(agent)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Agent>> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::Unknown(name.to_string()))
    }

    /// Cards of all agents, sorted by name
    pub fn list(&self) -> Vec<AgentCard> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        let mut cards: Vec<AgentCard> = agents.values().map(|a| a.card()).collect();
        cards.sort_by(|a, b| a.name.cmp(&b.name));
        cards
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Agent>> {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        let removed = agents.remove(name);
        if removed.is_some() {
            debug!(agent = name, "agent removed");
        }
        removed
    }

    pub fn clear(&self) {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        let count = agents.len();
        agents.clear();
        info!(count, "agents cleared");
    }

    pub fn len(&self) -> usize {
        self.agents.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
