//! Incremental completion deltas.

use crate::errors::LlmError;
use crate::types::Usage;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub type StreamEventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    TextDelta,
    ToolCallDelta,
    Finish,
}

/// A fragment of one tool call. Fragments sharing an `index` belong to the
/// same call; `id` and `name` usually arrive only on the first fragment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: StreamEventKind,
    pub delta: Option<String>,
    pub tool_call: Option<ToolCallDelta>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl StreamEvent {
    pub fn text_delta(delta: impl Into<String>) -> Self {
        Self {
            kind: StreamEventKind::TextDelta,
            delta: Some(delta.into()),
            tool_call: None,
            finish_reason: None,
            usage: None,
        }
    }

    pub fn tool_call_delta(tool_call: ToolCallDelta) -> Self {
        Self {
            kind: StreamEventKind::ToolCallDelta,
            delta: None,
            tool_call: Some(tool_call),
            finish_reason: None,
            usage: None,
        }
    }

    pub fn finish(finish_reason: Option<String>, usage: Option<Usage>) -> Self {
        Self {
            kind: StreamEventKind::Finish,
            delta: None,
            tool_call: None,
            finish_reason,
            usage,
        }
    }
}
