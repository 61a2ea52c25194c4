// Delegate errors

use thiserror::Error;

/// Delegate configuration errors, fatal at agent preparation
#[derive(Debug, Error)]
pub enum DelegateError {
    #[error("Delegate {kind} has an empty name")]
    EmptyName { kind: &'static str },

    #[error("Delegate {kind} '{name}' has no call url")]
    MissingUrl { kind: &'static str, name: String },

    #[error("Delegate {kind} '{name}' is declared more than once")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Invalid trigger '{trigger}' for delegate '{name}': {source}")]
    InvalidTrigger {
        name: String,
        trigger: String,
        #[source]
        source: regex::Error,
    },
}

pub type Result<T> = std::result::Result<T, DelegateError>;
