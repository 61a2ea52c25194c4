// Agent configuration

use super::error::ConfigError;
use super::types::AgentSpec;
use crate::invoker::HttpInvokerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Parse an environment variable, logging a warning if the value is present but invalid.
pub(crate) fn parse_env_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) => match v.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(var = name, value = %v, "Invalid env var value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Daemon-wide settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Agents file
    pub config_path: PathBuf,
    /// Label recorded on every local hop
    pub host_label: String,
    /// Upper bound for one unary request
    pub request_timeout_secs: u64,
    /// Settings of the outbound tool/agent invokers
    pub invoker: HttpInvokerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("agents.toml"),
            host_label: "fedsim".to_string(),
            request_timeout_secs: 300,
            invoker: HttpInvokerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = ServerConfig::default();

        if let Ok(path) = std::env::var("FEDSIM_CONFIG") {
            config.config_path = PathBuf::from(path);
        }
        config.host_label = parse_env_var("FEDSIM_HOST_LABEL", config.host_label);
        config.request_timeout_secs =
            parse_env_var("FEDSIM_REQUEST_TIMEOUT_SECS", config.request_timeout_secs);
        config.invoker.max_retries =
            parse_env_var("FEDSIM_MAX_RETRIES", config.invoker.max_retries);

        config
    }
}

#[derive(Debug, Default, Deserialize)]
struct AgentsFile {
    #[serde(default)]
    agents: Vec<AgentSpec>,
}

/// Parse agent definitions from TOML text
pub fn parse_agents(content: &str, origin: &str) -> Result<Vec<AgentSpec>, ConfigError> {
    let file: AgentsFile = toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: origin.to_string(),
        source,
    })?;
    Ok(file.agents)
}

/// Load agent definitions. A missing file yields no agents.
pub fn load_agents(path: &Path) -> Result<Vec<AgentSpec>, ConfigError> {
    if !path.exists() {
        warn!(path = %path.display(), "agents file not found, starting without agents");
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let agents = parse_agents(&content, &path.display().to_string())?;

    debug!(path = %path.display(), agent_count = agents.len(), "loaded agent definitions");
    Ok(agents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::BehaviorKind;

    const AGENTS: &str = r#"
[[agents]]
name = "greeter"
behavior = "echo"
payload = "hello"
delay_ms = 10

[[agents]]
name = "router"
description = "routes to weather and notifier"
skills = ["weather", "notify"]
behavior = "federate"

[agents.delegates]
max_calls = 2
parallel = true

[[agents.delegates.tools]]
name = "weather"
url = "http://127.0.0.1:9000/mcp"
triggers = ["weather", "forecast"]

[[agents.delegates.agents]]
name = "notifier"
url = "http://127.0.0.1:9100/a2a"
triggers = ["notify bob"]
"#;

    #[test]
    fn test_parse_agents() {
        let agents = parse_agents(AGENTS, "inline").unwrap();
        assert_eq!(agents.len(), 2);

        assert_eq!(agents[0].behavior, BehaviorKind::Echo);
        assert_eq!(agents[0].stream_count, 3);
        assert!(agents[0].delegates.tools.is_empty());

        let router = &agents[1];
        assert_eq!(router.behavior, BehaviorKind::Federate);
        assert_eq!(router.delegates.effective_max_calls(), 2);
        assert!(router.delegates.parallel);
        assert_eq!(router.delegates.tools[0].triggers, ["weather", "forecast"]);
        assert_eq!(router.delegates.agents[0].name, "notifier");
    }

    #[test]
    fn test_parse_rejects_unknown_behavior() {
        let err = parse_agents("[[agents]]\nname = \"x\"\nbehavior = \"teleport\"\n", "inline");
        assert!(matches!(err, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let agents = load_agents(Path::new("/nonexistent/agents.toml")).unwrap();
        assert!(agents.is_empty());
    }
}
