//! An order support assistant that talks to an OpenAI-compatible endpoint
//! and lets the model look up orders and delivery dates.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring the assistant into your own host apps.

#![deny(missing_docs)]

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod session;
pub mod tools;

pub use session::{DEFAULT_SYSTEM_PROMPT, Session, SessionBuilder};

/// Re-exports of [`toolrelay_core`] crate.
pub mod core {
    pub use toolrelay_core::*;
}
