// Task errors

use super::types::TaskState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task {id} already {state}")]
    Terminal { id: String, state: TaskState },

    #[error("Unknown task: {0}")]
    UnknownTask(String),
}

pub type Result<T> = std::result::Result<T, TaskError>;
