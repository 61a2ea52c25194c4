// Agent errors

use crate::delegate::DelegateError;
use crate::invoker::InvokeError;
use crate::task::TaskError;
use thiserror::Error;

/// Agent errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid delegate configuration: {0}")]
    Delegates(#[from] DelegateError),

    #[error("Agent '{0}' is an http_proxy without an upstream")]
    MissingUpstream(String),

    #[error("Agent name is empty")]
    EmptyName,

    #[error("Agent '{0}' already exists")]
    Duplicate(String),

    #[error("Unknown agent: {0}")]
    Unknown(String),

    #[error("Upstream returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invoker setup failed: {0}")]
    Invoker(#[from] InvokeError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Task {0} has no event subscriber")]
    NoSubscriber(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Timeout after {0}s")]
    Timeout(u64),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

pub type Result<T> = std::result::Result<T, AgentError>;
