//! Provider adapter contract.

use async_trait::async_trait;

use crate::errors::LlmError;
use crate::stream::StreamEventStream;
use crate::types::{Request, Response};

/// A model backend reachable through one wire protocol.
///
/// `complete` returns one finished message. `stream` returns the same answer
/// as an ordered sequence of deltas; callers merge them with
/// [`StreamAccumulator`](crate::StreamAccumulator) before acting on tool calls.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: Request) -> Result<Response, LlmError>;

    async fn stream(&self, request: Request) -> Result<StreamEventStream, LlmError>;
}
