// Agent module - agent definitions, behaviors and the registry

pub mod behavior;
pub mod config;
pub mod error;
pub mod host;
pub mod registry;
pub mod types;

pub use behavior::{AgentBehavior, Behavior, Collaborators};
pub use config::{ServerConfig, load_agents, parse_agents};
pub use error::{AgentError, ConfigError};
pub use host::Host;
pub use registry::{Agent, AgentRegistry};
pub use types::{AgentCard, AgentReply, AgentSpec, BehaviorKind, Inbound};
