// Error types for remote invocations

use thiserror::Error;

/// Failure of one remote tool or agent call
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Failed to connect to {url}: {reason}")]
    ConnectFailed { url: String, reason: String },

    #[error("Invalid header '{0}'")]
    InvalidHeader(String),

    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed remote payload: {0}")]
    Malformed(String),

    #[error("Exhausted: max retries ({retries}) exceeded, last error: {last_error}")]
    Exhausted { retries: u32, last_error: String },

    #[error("Call cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InvokeError {
    /// Transport-level failures are worth retrying, remote answers are not
    pub fn is_retryable(&self) -> bool {
        match self {
            InvokeError::Network(e) => e.is_connect() || e.is_timeout(),
            InvokeError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, InvokeError>;
