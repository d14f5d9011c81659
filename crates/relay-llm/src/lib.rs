//! Completion client boundary for relay.
//!
//! Wire types shared with the agent engine, the provider adapter contract,
//! a provider-routing [`Client`], and helpers that merge streamed deltas into
//! one finished [`Response`].

pub mod client;
pub mod errors;
pub mod provider;
pub mod providers;
pub mod stream;
pub mod types;
pub mod utils;

pub use client::Client;
pub use errors::LlmError;
pub use provider::ProviderAdapter;
pub use providers::openai_compatible::{OpenAiCompatibleAdapter, OpenAiCompatibleConfig};
pub use stream::{StreamEvent, StreamEventKind, StreamEventStream, ToolCallDelta};
pub use types::{
    Message, Request, Response, Role, ToolCall, ToolChoice, ToolDefinition, Usage,
};
pub use utils::sse::{SseEvent, SseParser};
pub use utils::stream_accumulator::{ResponseSeed, StreamAccumulator};
