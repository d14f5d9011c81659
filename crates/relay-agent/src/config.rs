use crate::{AgentError, RetryPolicy};
use serde::{Deserialize, Serialize};

pub const DEFAULT_NUDGE_MESSAGE: &str =
    "The task is not finished yet. Keep working: use your tools to make progress toward the goal.";

/// Explicit configuration threaded into an [`Engine`](crate::Engine).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// `None` means unlimited rounds.
    pub max_turns: Option<usize>,
    /// Spend ceiling in the pricing function's currency.
    pub price_limit: Option<f64>,
    pub tool_timeout_ms: Option<u64>,
    pub completion_timeout_ms: Option<u64>,
    pub parallel_pool_size: usize,
    /// Characters kept from a tool result before head/tail truncation.
    pub tool_output_limit: Option<usize>,
    pub force_until_success: bool,
    pub nudge_message: String,
    /// Run the state hook after every N completed rounds.
    pub state_interval: Option<usize>,
    /// Number of trailing history messages handed to the state hook.
    pub state_window: usize,
    pub stream: bool,
    pub execute_tools: bool,
    pub model_override: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_turns: None,
            price_limit: None,
            tool_timeout_ms: None,
            completion_timeout_ms: None,
            parallel_pool_size: 8,
            tool_output_limit: None,
            force_until_success: false,
            nudge_message: DEFAULT_NUDGE_MESSAGE.to_string(),
            state_interval: None,
            state_window: 40,
            stream: false,
            execute_tools: true,
            model_override: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_turns == Some(0) {
            return Err(AgentError::invalid_configuration(
                "max_turns must be at least 1 when set",
            ));
        }
        if let Some(limit) = self.price_limit {
            if !limit.is_finite() || limit < 0.0 {
                return Err(AgentError::invalid_configuration(format!(
                    "price_limit must be a non-negative finite number, got {limit}"
                )));
            }
        }
        if self.tool_timeout_ms == Some(0) || self.completion_timeout_ms == Some(0) {
            return Err(AgentError::invalid_configuration(
                "timeouts must be positive when set",
            ));
        }
        if self.parallel_pool_size == 0 {
            return Err(AgentError::invalid_configuration(
                "parallel_pool_size must be at least 1",
            ));
        }
        if self.tool_output_limit == Some(0) {
            return Err(AgentError::invalid_configuration(
                "tool_output_limit must be positive when set",
            ));
        }
        if self.state_interval == Some(0) {
            return Err(AgentError::invalid_configuration(
                "state_interval must be at least 1 when set",
            ));
        }
        if self.state_interval.is_some() && self.state_window == 0 {
            return Err(AgentError::invalid_configuration(
                "state_window must be positive when the state hook is enabled",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(AgentError::invalid_configuration(
                "retry.max_attempts must be at least 1",
            ));
        }
        if self.force_until_success && self.nudge_message.trim().is_empty() {
            return Err(AgentError::invalid_configuration(
                "force_until_success requires a non-empty nudge_message",
            ));
        }
        Ok(())
    }
}
