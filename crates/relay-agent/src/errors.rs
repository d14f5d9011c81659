use relay_llm::LlmError;
use thiserror::Error;

/// Top-level error type for the relay-agent crate.
///
/// Only misuse at construction or run start and transcript I/O surface as
/// `AgentError`; per-round faults are absorbed into the conversation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),
    #[error(transparent)]
    InvalidHistory(#[from] HistoryError),
    #[error("transcript error: {0}")]
    Transcript(String),
    #[error("state hook failed: {0}")]
    StateHook(String),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl AgentError {
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }
}

/// Failure of a single tool call. Always converted into an error tool
/// message by the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    Validation(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error("tool timed out after {0} ms")]
    Timeout(u64),
    #[error("tool call cancelled")]
    Cancelled,
    #[error("tool panicked: {0}")]
    Panicked(String),
}

impl ToolError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("tool message at position {position} has no tool_call_id")]
    MissingToolCallId { position: usize },
    #[error("tool message at position {position} answers unknown call '{call_id}'")]
    UnmatchedToolResult { position: usize, call_id: String },
    #[error("tool call '{call_id}' is answered more than once (position {position})")]
    DuplicateToolResult { position: usize, call_id: String },
    #[error("tool call '{call_id}' issued at position {position} has no result")]
    UnansweredToolCall { position: usize, call_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_errors_convert_transparently() {
        let error: AgentError = LlmError::Transport("reset".to_string()).into();
        assert_eq!(error.to_string(), "transport error: reset");
    }

    #[test]
    fn tool_timeout_mentions_budget() {
        assert_eq!(ToolError::Timeout(250).to_string(), "tool timed out after 250 ms");
    }
}
