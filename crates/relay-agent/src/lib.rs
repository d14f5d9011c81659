//! Multi-agent turn-execution engine for relay.
//!
//! An [`Engine`] repeatedly asks a completion backend for the next message,
//! dispatches the tool calls it requests, lets tools hand control to another
//! registered [`Agent`], and stops when a turn, cost, success, cancellation or
//! completion condition fires. Everything that happened is kept in an
//! append-only [`History`] and returned as a [`RunResult`].

pub mod abort;
pub mod agent;
pub mod config;
pub mod cost;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod events;
pub mod handoff;
pub mod history;
pub mod retry;
pub mod state;
pub mod success;
pub mod tools;
pub mod transcript;
pub mod truncation;

pub use abort::*;
pub use agent::*;
pub use config::*;
pub use cost::*;
pub use dispatch::*;
pub use engine::*;
pub use errors::*;
pub use events::*;
pub use handoff::*;
pub use history::*;
pub use retry::*;
pub use state::*;
pub use success::*;
pub use tools::*;
pub use transcript::*;
pub use truncation::*;
