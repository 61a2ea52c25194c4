//! fedsim - agent federation simulator
//!
//! Agents answer inbound messages by echoing, streaming, proxying to an
//! HTTP upstream, or federating: matching the message against configured
//! remote tools and peer agents, calling them, and merging their results.

pub mod agent;
pub mod comm;
pub mod delegate;
pub mod hops;
pub mod invoker;
pub mod task;
