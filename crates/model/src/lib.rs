//! An abstraction layer for OpenAI-compatible chat models.
//!
//! This crate establishes the protocol between the conversation driver and
//! the model providers: the messages sent in a request, the fragments a
//! streamed response is made of, and the traits a provider implements.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to. Folding fragments
//! into complete messages is the job of the consumer.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
