//! Stream accumulator that builds a Response from StreamEvent sequences.

use std::collections::BTreeMap;

use crate::stream::{StreamEvent, StreamEventKind, ToolCallDelta};
use crate::types::{Message, Response, ToolCall, Usage};

#[derive(Clone, Debug, Default)]
pub struct ResponseSeed {
    pub id: String,
    pub model: String,
    pub provider: String,
}

#[derive(Clone, Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
pub struct StreamAccumulator {
    seed: ResponseSeed,
    text: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl StreamAccumulator {
    pub fn new(seed: ResponseSeed) -> Self {
        Self {
            seed,
            ..Default::default()
        }
    }

    pub fn process(&mut self, event: &StreamEvent) {
        match event.kind {
            StreamEventKind::TextDelta => {
                if let Some(delta) = &event.delta {
                    self.text.push_str(delta);
                }
            }
            StreamEventKind::ToolCallDelta => {
                if let Some(tool_call) = &event.tool_call {
                    self.merge_tool_call(tool_call);
                }
            }
            StreamEventKind::Finish => {
                if let Some(reason) = &event.finish_reason {
                    self.finish_reason = Some(reason.clone());
                }
                if let Some(usage) = event.usage {
                    self.usage = Some(usage);
                }
            }
        }
    }

    /// Text received so far, used for progress reporting only.
    pub fn partial_text(&self) -> &str {
        &self.text
    }

    pub fn response(&self) -> Response {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .iter()
            .map(|(index, partial)| ToolCall {
                id: if partial.id.is_empty() {
                    format!("call_{index}")
                } else {
                    partial.id.clone()
                },
                name: partial.name.clone(),
                arguments: partial.arguments.clone(),
                index: *index,
            })
            .collect();

        let content = if self.text.is_empty() {
            None
        } else {
            Some(self.text.clone())
        };

        Response {
            id: self.seed.id.clone(),
            model: self.seed.model.clone(),
            provider: self.seed.provider.clone(),
            message: Message::assistant_with_tool_calls(content, tool_calls),
            finish_reason: self
                .finish_reason
                .clone()
                .unwrap_or_else(|| "other".to_string()),
            usage: self.usage.unwrap_or_default(),
        }
    }

    fn merge_tool_call(&mut self, delta: &ToolCallDelta) {
        let entry = self.tool_calls.entry(delta.index).or_default();
        if let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty()) {
            if entry.id.is_empty() {
                entry.id = id.to_string();
            }
        }
        if let Some(name) = delta.name.as_deref().filter(|name| !name.is_empty()) {
            if entry.name.is_empty() {
                entry.name = name.to_string();
            }
        }
        if let Some(arguments) = &delta.arguments {
            entry.arguments.push_str(arguments);
        }
    }
}
