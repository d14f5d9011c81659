use crate::HistoryError;
use relay_llm::{Message, Role};
use std::collections::HashSet;

/// Append-only conversation log of a run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt caller-supplied prior messages. Every tool message must answer
    /// a call of the nearest preceding assistant message, every such call
    /// exactly once.
    pub fn from_seed(messages: Vec<Message>) -> Result<Self, HistoryError> {
        let history = Self { messages };
        history.validate(false)?;
        Ok(history)
    }

    /// Like [`History::from_seed`], but the final assistant message may leave
    /// calls unanswered, as a run with tool execution disabled does.
    pub fn replay(messages: Vec<Message>) -> Result<Self, HistoryError> {
        let history = Self { messages };
        history.validate(true)?;
        Ok(history)
    }

    fn validate(&self, allow_open_tail: bool) -> Result<(), HistoryError> {
        let mut open_calls: Vec<(usize, String)> = Vec::new();
        let mut answered: HashSet<String> = HashSet::new();

        for (position, message) in self.messages.iter().enumerate() {
            match message.role {
                Role::Assistant => {
                    ensure_answered(&open_calls, &answered)?;
                    open_calls = message
                        .tool_calls()
                        .iter()
                        .map(|call| (position, call.id.clone()))
                        .collect();
                    answered.clear();
                }
                Role::Tool => {
                    let call_id = message
                        .tool_call_id
                        .as_deref()
                        .ok_or(HistoryError::MissingToolCallId { position })?;
                    if !open_calls.iter().any(|(_, id)| id == call_id) {
                        return Err(HistoryError::UnmatchedToolResult {
                            position,
                            call_id: call_id.to_string(),
                        });
                    }
                    if !answered.insert(call_id.to_string()) {
                        return Err(HistoryError::DuplicateToolResult {
                            position,
                            call_id: call_id.to_string(),
                        });
                    }
                }
                Role::System | Role::User => {}
            }
        }
        if allow_open_tail {
            return Ok(());
        }
        ensure_answered(&open_calls, &answered)
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
    }

    /// Messages appended at or after `start`.
    pub fn since(&self, start: usize) -> &[Message] {
        &self.messages[start.min(self.messages.len())..]
    }

    /// The last `count` messages.
    pub fn tail(&self, count: usize) -> &[Message] {
        self.since(self.messages.len().saturating_sub(count))
    }

    /// Ids of tool calls that have no matching tool message after them.
    pub fn unanswered_tool_calls(&self) -> Vec<String> {
        let answered: HashSet<&str> = self
            .messages
            .iter()
            .filter(|message| message.role == Role::Tool)
            .filter_map(|message| message.tool_call_id.as_deref())
            .collect();
        self.messages
            .iter()
            .flat_map(|message| message.tool_calls())
            .filter(|call| !answered.contains(call.id.as_str()))
            .map(|call| call.id.clone())
            .collect()
    }
}

fn ensure_answered(
    open_calls: &[(usize, String)],
    answered: &HashSet<String>,
) -> Result<(), HistoryError> {
    match open_calls.iter().find(|(_, id)| !answered.contains(id)) {
        Some((position, call_id)) => Err(HistoryError::UnansweredToolCall {
            position: *position,
            call_id: call_id.clone(),
        }),
        None => Ok(()),
    }
}
