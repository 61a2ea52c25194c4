// Task module - inbound task life cycle

pub mod error;
pub mod handler;
pub mod state;
pub mod types;

pub use error::TaskError;
pub use handler::{InMemoryTaskHandler, TaskHandler};
pub use state::TaskStateMachine;
pub use types::{Artifact, Subscriber, TaskEvent, TaskState};
