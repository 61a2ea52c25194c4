// Delegate matcher - picks the delegates an inbound message calls for

use crate::delegate::config::{DelegateAgentCall, DelegateConfig, DelegateToolCall};
use crate::delegate::context::{MatchedAgent, MatchedTool};
use crate::delegate::hints::{self, Hints};
use crate::delegate::trigger::{TriggerIndex, TriggerTarget};
use tracing::{debug, info};

/// Result of matching one inbound message
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Inbound text with hints stripped
    pub text: String,
    pub hints: Hints,
    pub tools: Vec<MatchedTool>,
    pub agents: Vec<MatchedAgent>,
    /// (delegate, note) pairs describing alternate server substitutions
    pub notes: Vec<(String, String)>,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.tools.len() + self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Matches inbound text against one agent's delegates
pub struct DelegateMatcher<'a> {
    config: &'a DelegateConfig,
    index: &'a TriggerIndex,
    max_calls: usize,
}

impl<'a> DelegateMatcher<'a> {
    pub fn new(config: &'a DelegateConfig, index: &'a TriggerIndex) -> Self {
        Self {
            config,
            index,
            max_calls: config.effective_max_calls(),
        }
    }

    pub fn match_text(&self, raw: &str) -> Selection {
        let (text, hints) = hints::extract(raw);
        let mut selection = Selection {
            text,
            hints,
            ..Default::default()
        };
        let port = selection.hints.port.clone();

        // Named inputs first
        let names: Vec<String> = selection.hints.inputs.iter().map(|(k, _)| k.clone()).collect();
        for name in &names {
            if !self.has_budget(&selection) {
                break;
            }
            if let Some(tool) = self.config.find_tool(name) {
                self.select_tool(&mut selection, tool, port.as_deref());
            }
            if !self.has_budget(&selection) {
                break;
            }
            if let Some(agent) = self.config.find_agent(name) {
                self.select_agent(&mut selection, agent, port.as_deref());
            }
        }

        // Then triggers, in configuration order
        if self.has_budget(&selection) {
            let text = selection.text.clone();
            for entry in self.index.scan(&text) {
                if !self.has_budget(&selection) {
                    break;
                }
                debug!(phrase = %entry.phrase, "trigger matched");
                match &entry.target {
                    TriggerTarget::Tool(tool) => {
                        self.select_tool(&mut selection, tool, port.as_deref())
                    }
                    TriggerTarget::Agent(agent) => {
                        self.select_agent(&mut selection, agent, port.as_deref())
                    }
                }
            }
        }

        if let Some(target) = selection.hints.target.clone() {
            apply_target_hint(&mut selection, &target);
        }

        debug!(
            tools = selection.tools.len(),
            agents = selection.agents.len(),
            max_calls = self.max_calls,
            "delegates selected"
        );
        selection
    }

    fn has_budget(&self, selection: &Selection) -> bool {
        selection.len() < self.max_calls
    }

    fn select_tool(&self, selection: &mut Selection, tool: &DelegateToolCall, port: Option<&str>) {
        let candidate = MatchedTool {
            key: tool.name.clone(),
            call: tool.clone(),
        };
        match selection.tools.iter_mut().find(|t| t.name() == candidate.name()) {
            Some(existing) => {
                if prefers(port, &candidate.call.url, &existing.call.url) {
                    debug!(tool = %candidate.name(), url = %candidate.call.url, "replacing tool with port-matching endpoint");
                    *existing = candidate;
                }
            }
            None => selection.tools.push(candidate),
        }
    }

    fn select_agent(&self, selection: &mut Selection, agent: &DelegateAgentCall, port: Option<&str>) {
        let candidate = MatchedAgent {
            key: agent.name.clone(),
            call: agent.clone(),
            message: agent.message.clone(),
            data: None,
        };
        match selection.agents.iter_mut().find(|a| a.name() == candidate.name()) {
            Some(existing) => {
                if prefers(port, &candidate.call.url, &existing.call.url) {
                    debug!(agent = %candidate.name(), url = %candidate.call.url, "replacing agent with port-matching endpoint");
                    *existing = candidate;
                }
            }
            None => selection.agents.push(candidate),
        }
    }
}

/// A second match wins only if it carries the port hint and the first does not
fn prefers(port: Option<&str>, new_url: &str, existing_url: &str) -> bool {
    match port {
        Some(port) => new_url.contains(port) && !existing_url.contains(port),
        None => false,
    }
}

/// Switch matched calls to the alternate server named by the target hint
fn apply_target_hint(selection: &mut Selection, target: &str) {
    for tool in selection.tools.iter_mut() {
        if tool.call.label() == target {
            continue;
        }
        if let Some(alt) = tool.call.servers.get(target).cloned() {
            info!(tool = %tool.name(), server = target, url = %alt.url, "switching tool to alternate server");
            selection.notes.push((
                tool.key.clone(),
                format!("Tool {} switched to server {} at {}", tool.name(), target, alt.url),
            ));
            tool.call.url = alt.url;
            tool.call.authority = alt.authority;
            tool.call.server = target.to_string();
        }
    }

    for agent in selection.agents.iter_mut() {
        if agent.call.label() == target {
            continue;
        }
        if let Some(alt) = agent.call.servers.get(target).cloned() {
            let name = alt.name.unwrap_or_else(|| target.to_string());
            info!(agent = %agent.name(), alternate = %name, url = %alt.url, "switching agent to alternate peer");
            selection.notes.push((
                agent.key.clone(),
                format!("Agent {} redirected to {} at {}", agent.name(), name, alt.url),
            ));
            agent.call.agent = name;
            agent.call.url = alt.url;
            agent.call.authority = alt.authority;
        }
    }
}
