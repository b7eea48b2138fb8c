//! Core logic of the conversation loop: stream aggregation, tool call
//! extraction and dispatch, and the agent that drives a turn.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

pub mod agent;
pub mod aggregator;
mod call_id;
pub mod conversation;
mod error;
pub mod extract;
mod model_client;
pub mod tool;

pub use agent::{Agent, AgentBuilder};
pub use error::Error;
pub use model_client::RetryPolicy;
