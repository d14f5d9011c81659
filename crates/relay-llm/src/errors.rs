//! Completion backend error taxonomy.

use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider error{}: {message}", status_suffix(&.status))]
    Provider { status: Option<u16>, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("stream error: {0}")]
    Stream(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" ({code})")).unwrap_or_default()
}

impl LlmError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Provider {
            status,
            message: message.into(),
        }
    }

    /// Whether a retry of the same request can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::Stream(_) => true,
            Self::Provider { status: None, .. } => true,
            Self::Provider {
                status: Some(code), ..
            } => matches!(code, 408 | 409 | 429) || *code >= 500,
            Self::Configuration(_) | Self::InvalidResponse(_) => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Transport(format!("timed out: {error}"));
        }
        if let Some(status) = error.status() {
            return Self::provider(Some(status.as_u16()), error.to_string());
        }
        if error.is_decode() {
            return Self::InvalidResponse(error.to_string());
        }
        Self::Transport(error.to_string())
    }
}
