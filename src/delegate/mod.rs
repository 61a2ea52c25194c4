// Delegate module - federation across remote tools and peer agents
//
// Flow of one inbound task:
//   hints::extract -> DelegateMatcher -> OverrideResolver -> CallDispatcher
//   -> ResultAggregator (unary document or streamed task updates)

pub mod aggregate;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod hints;
pub mod matcher;
pub mod overrides;
pub mod trigger;

pub use aggregate::{ResultAggregator, STREAM_CANCELLED};
pub use config::{AltServer, DelegateAgentCall, DelegateConfig, DelegateHeaders, DelegateToolCall};
pub use context::{AgentContext, DelegateKind, DelegateOutcome, MatchedAgent, MatchedTool, ResultItem};
pub use dispatch::{CallDispatcher, DispatchReport, effective_headers};
pub use engine::FederationEngine;
pub use error::DelegateError;
pub use matcher::{DelegateMatcher, Selection};
pub use overrides::{OverrideResolver, RemoteCallArgs};
pub use trigger::{TriggerEntry, TriggerIndex, TriggerTarget};
