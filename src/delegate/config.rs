// Delegate configuration

use crate::delegate::error::{DelegateError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Header policy applied to every call of a delegate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelegateHeaders {
    /// Headers always sent
    #[serde(default)]
    pub add: HashMap<String, String>,
    /// Inbound headers copied onto the call (case-insensitive names)
    #[serde(default)]
    pub forward: Vec<String>,
    /// Headers stripped last
    #[serde(default)]
    pub remove: Vec<String>,
}

/// An alternate endpoint a target hint can switch a delegate to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AltServer {
    /// Remote agent name behind this endpoint (agent delegates only)
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub authority: Option<String>,
}

/// A remote tool the agent may call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelegateToolCall {
    /// Delegate name as configured
    pub name: String,
    /// Remote tool name, defaults to `name`
    #[serde(default)]
    pub tool: String,
    /// Label of the server hosting the tool, defaults to `name`
    #[serde(default)]
    pub server: String,
    pub url: String,
    #[serde(default)]
    pub authority: Option<String>,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub headers: DelegateHeaders,
    #[serde(default)]
    pub servers: HashMap<String, AltServer>,
}

impl DelegateToolCall {
    pub fn tool_name(&self) -> &str {
        if self.tool.is_empty() { &self.name } else { &self.tool }
    }

    pub fn label(&self) -> &str {
        if self.server.is_empty() { &self.name } else { &self.server }
    }
}

/// A remote peer agent the agent may call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelegateAgentCall {
    /// Delegate name as configured
    pub name: String,
    /// Remote agent name, defaults to `name`
    #[serde(default)]
    pub agent: String,
    pub url: String,
    #[serde(default)]
    pub authority: Option<String>,
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Fixed message forwarded instead of the inbound text
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub headers: DelegateHeaders,
    #[serde(default)]
    pub servers: HashMap<String, AltServer>,
}

impl DelegateAgentCall {
    pub fn agent_name(&self) -> &str {
        if self.agent.is_empty() { &self.name } else { &self.agent }
    }

    pub fn label(&self) -> &str {
        self.agent_name()
    }
}

/// Delegation settings of a federating agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelegateConfig {
    #[serde(default)]
    pub tools: Vec<DelegateToolCall>,
    #[serde(default)]
    pub agents: Vec<DelegateAgentCall>,
    #[serde(default)]
    pub max_calls: i64,
    #[serde(default)]
    pub parallel: bool,
}

impl DelegateConfig {
    /// Call budget per inbound task, never below 1
    pub fn effective_max_calls(&self) -> usize {
        if self.max_calls <= 0 { 1 } else { self.max_calls as usize }
    }

    /// Find a tool delegate by delegate name or remote tool name
    pub fn find_tool(&self, name: &str) -> Option<&DelegateToolCall> {
        self.tools
            .iter()
            .find(|t| t.name == name)
            .or_else(|| self.tools.iter().find(|t| t.tool_name() == name))
    }

    /// Find an agent delegate by delegate name or remote agent name
    pub fn find_agent(&self, name: &str) -> Option<&DelegateAgentCall> {
        self.agents
            .iter()
            .find(|a| a.name == name)
            .or_else(|| self.agents.iter().find(|a| a.agent_name() == name))
    }

    /// Check the configuration before the agent is activated
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for tool in &self.tools {
            check_entry("tool", &tool.name, &tool.url, &tool.triggers, &mut seen)?;
        }
        let mut seen = HashSet::new();
        for agent in &self.agents {
            check_entry("agent", &agent.name, &agent.url, &agent.triggers, &mut seen)?;
        }
        Ok(())
    }
}

fn check_entry(
    kind: &'static str,
    name: &str,
    url: &str,
    triggers: &[String],
    seen: &mut HashSet<String>,
) -> Result<()> {
    if name.trim().is_empty() {
        return Err(DelegateError::EmptyName { kind });
    }
    if url.trim().is_empty() {
        return Err(DelegateError::MissingUrl {
            kind,
            name: name.to_string(),
        });
    }
    if !seen.insert(name.to_string()) {
        return Err(DelegateError::DuplicateName {
            kind,
            name: name.to_string(),
        });
    }
    if triggers.is_empty() {
        warn!(kind, name, "delegate has no triggers and can only be reached through named inputs");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, url: &str) -> DelegateToolCall {
        DelegateToolCall {
            name: name.to_string(),
            url: url.to_string(),
            triggers: vec![name.to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_max_calls_defaults_to_one() {
        let mut config = DelegateConfig::default();
        assert_eq!(config.effective_max_calls(), 1);
        config.max_calls = -3;
        assert_eq!(config.effective_max_calls(), 1);
        config.max_calls = 4;
        assert_eq!(config.effective_max_calls(), 4);
    }

    #[test]
    fn test_validate_rejects_missing_url() {
        let config = DelegateConfig {
            tools: vec![tool("weather", "")],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DelegateError::MissingUrl { kind: "tool", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let config = DelegateConfig {
            tools: vec![tool("weather", "http://a"), tool("weather", "http://b")],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DelegateError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_zero_triggers_is_accepted() {
        let mut t = tool("silent", "http://a");
        t.triggers.clear();
        let config = DelegateConfig {
            tools: vec![t],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_names_default() {
        let t = tool("weather", "http://a");
        assert_eq!(t.tool_name(), "weather");
        assert_eq!(t.label(), "weather");

        let config = DelegateConfig {
            tools: vec![DelegateToolCall {
                tool: "forecast".to_string(),
                ..t
            }],
            ..Default::default()
        };
        assert!(config.find_tool("weather").is_some());
        assert!(config.find_tool("forecast").is_some());
        assert!(config.find_tool("rain").is_none());
    }

    #[test]
    fn test_parse_from_toml() {
        let text = r#"
max_calls = 2
parallel = true

[[tools]]
name = "weather"
url = "http://localhost:8081/mcp"
triggers = ["weather", "forecast"]
args = { city = "paris" }

[tools.headers]
forward = ["X-Request-Id"]

[tools.servers.east]
url = "http://localhost:9081/mcp"

[[agents]]
name = "notifier"
url = "http://localhost:8082/a2a"
triggers = ["notify \\w+"]
"#;
        let config: DelegateConfig = toml::from_str(text).unwrap();
        assert_eq!(config.effective_max_calls(), 2);
        assert!(config.parallel);
        assert_eq!(config.tools[0].args["city"], "paris");
        assert_eq!(config.tools[0].headers.forward, vec!["X-Request-Id"]);
        assert_eq!(config.tools[0].servers["east"].url, "http://localhost:9081/mcp");
        assert_eq!(config.agents[0].triggers[0], "notify \\w+");
        assert!(config.validate().is_ok());
    }
}
