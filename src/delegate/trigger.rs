// Trigger index - precompiled trigger phrase table

use crate::delegate::config::{DelegateAgentCall, DelegateConfig, DelegateToolCall};
use crate::delegate::error::{DelegateError, Result};
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use tracing::debug;

/// What a trigger selects
#[derive(Debug, Clone)]
pub enum TriggerTarget {
    Tool(Arc<DelegateToolCall>),
    Agent(Arc<DelegateAgentCall>),
}

impl TriggerTarget {
    pub fn is_tool(&self) -> bool {
        matches!(self, TriggerTarget::Tool(_))
    }

    pub fn is_agent(&self) -> bool {
        matches!(self, TriggerTarget::Agent(_))
    }
}

/// One compiled trigger phrase
#[derive(Debug, Clone)]
pub struct TriggerEntry {
    pub phrase: String,
    pub pattern: Regex,
    pub target: TriggerTarget,
}

impl TriggerEntry {
    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Immutable trigger table, built once per agent preparation.
///
/// Entries keep configuration order: tool triggers first, then agent
/// triggers. A phrase reused for the same kind of target keeps its slot and
/// the later delegate wins; a phrase shared by a tool and an agent gets one
/// entry per kind.
#[derive(Debug, Clone, Default)]
pub struct TriggerIndex {
    entries: Vec<TriggerEntry>,
}

impl TriggerIndex {
    pub fn build(config: &DelegateConfig) -> Result<Self> {
        let mut index = Self::default();

        for tool in &config.tools {
            let shared = Arc::new(tool.clone());
            for trigger in &tool.triggers {
                let pattern = compile(&tool.name, trigger)?;
                index.insert(trigger, pattern, TriggerTarget::Tool(shared.clone()));
            }
        }

        for agent in &config.agents {
            let shared = Arc::new(agent.clone());
            for trigger in &agent.triggers {
                let pattern = compile(&agent.name, trigger)?;
                index.insert(trigger, pattern, TriggerTarget::Agent(shared.clone()));
            }
        }

        debug!(entries = index.entries.len(), "trigger index built");
        Ok(index)
    }

    fn insert(&mut self, phrase: &str, pattern: Regex, target: TriggerTarget) {
        let phrase = phrase.trim();
        let existing = self.entries.iter_mut().find(|e| {
            e.phrase.eq_ignore_ascii_case(phrase) && e.target.is_tool() == target.is_tool()
        });

        match existing {
            Some(entry) => {
                debug!(phrase, "trigger reused, last delegate wins");
                entry.target = target;
            }
            None => self.entries.push(TriggerEntry {
                phrase: phrase.to_string(),
                pattern,
                target,
            }),
        }
    }

    pub fn entries(&self) -> &[TriggerEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries whose pattern matches, in index order
    pub fn scan<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a TriggerEntry> + 'a {
        self.entries.iter().filter(move |e| e.matches(text))
    }
}

/// Wrap a trigger phrase in word boundaries, case-insensitive
fn compile(name: &str, trigger: &str) -> Result<Regex> {
    RegexBuilder::new(&format!(r"\b(?:{})\b", trigger.trim()))
        .case_insensitive(true)
        .build()
        .map_err(|source| DelegateError::InvalidTrigger {
            name: name.to_string(),
            trigger: trigger.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, triggers: &[&str]) -> DelegateToolCall {
        DelegateToolCall {
            name: name.to_string(),
            url: format!("http://localhost/{name}"),
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    fn agent(name: &str, triggers: &[&str]) -> DelegateAgentCall {
        DelegateAgentCall {
            name: name.to_string(),
            url: format!("http://localhost/{name}"),
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_word_boundary_and_case() {
        let config = DelegateConfig {
            tools: vec![tool("weather", &["weather"])],
            ..Default::default()
        };
        let index = TriggerIndex::build(&config).unwrap();

        assert_eq!(index.scan("What's the WEATHER like").count(), 1);
        assert_eq!(index.scan("weatherproof jacket").count(), 0);
    }

    #[test]
    fn test_entries_are_exclusive() {
        let config = DelegateConfig {
            tools: vec![tool("weather", &["weather", "forecast"])],
            agents: vec![agent("forecaster", &["forecast"])],
            ..Default::default()
        };
        let index = TriggerIndex::build(&config).unwrap();

        assert_eq!(index.len(), 3);
        let tools = index.entries().iter().filter(|e| e.target.is_tool()).count();
        let agents = index.entries().iter().filter(|e| e.target.is_agent()).count();
        assert_eq!(tools, 2);
        assert_eq!(agents, 1);
    }

    #[test]
    fn test_same_kind_reuse_last_wins() {
        let config = DelegateConfig {
            tools: vec![tool("first", &["lookup"]), tool("second", &["lookup"])],
            ..Default::default()
        };
        let index = TriggerIndex::build(&config).unwrap();

        assert_eq!(index.len(), 1);
        match &index.entries()[0].target {
            TriggerTarget::Tool(t) => assert_eq!(t.name, "second"),
            TriggerTarget::Agent(_) => panic!("expected tool"),
        }
    }

    #[test]
    fn test_invalid_trigger_is_config_error() {
        let config = DelegateConfig {
            tools: vec![tool("broken", &["(unclosed"])],
            ..Default::default()
        };
        assert!(matches!(
            TriggerIndex::build(&config),
            Err(DelegateError::InvalidTrigger { .. })
        ));
    }

    #[test]
    fn test_empty_config_builds_empty_index() {
        let index = TriggerIndex::build(&DelegateConfig::default()).unwrap();
        assert!(index.is_empty());
    }
}
