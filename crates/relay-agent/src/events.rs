use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

pub type EventData = HashMap<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStart,
    RunEnd,
    AssistantTextDelta,
    AssistantMessage,
    CompletionRetry,
    ToolCallStart,
    ToolCallEnd,
    Handoff,
    HandoffDiscarded,
    CostUpdated,
    NudgeInjected,
    StateUpdated,
    StateHookFailed,
    Warning,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStart => "run_start",
            Self::RunEnd => "run_end",
            Self::AssistantTextDelta => "assistant_text_delta",
            Self::AssistantMessage => "assistant_message",
            Self::CompletionRetry => "completion_retry",
            Self::ToolCallStart => "tool_call_start",
            Self::ToolCallEnd => "tool_call_end",
            Self::Handoff => "handoff",
            Self::HandoffDiscarded => "handoff_discarded",
            Self::CostUpdated => "cost_updated",
            Self::NudgeInjected => "nudge_injected",
            Self::StateUpdated => "state_updated",
            Self::StateHookFailed => "state_hook_failed",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub kind: EventKind,
    pub timestamp: String,
    pub run_id: String,
    pub data: EventData,
}

impl RunEvent {
    pub fn new(kind: EventKind, run_id: impl Into<String>, data: EventData) -> Self {
        Self {
            kind,
            timestamp: current_timestamp(),
            run_id: run_id.into(),
            data,
        }
    }

    /// Build an event from a JSON object literal; non-object values are
    /// stored under `value`.
    pub fn with_json(kind: EventKind, run_id: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map.into_iter().collect(),
            Value::Null => EventData::new(),
            other => EventData::from([("value".to_string(), other)]),
        };
        Self::new(kind, run_id, data)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn tool_call_start(
        run_id: impl Into<String>,
        call_id: &str,
        tool_name: &str,
        agent: &str,
    ) -> Self {
        Self::with_json(
            EventKind::ToolCallStart,
            run_id,
            json!({ "call_id": call_id, "tool_name": tool_name, "agent": agent }),
        )
    }

    pub fn tool_call_end(
        run_id: impl Into<String>,
        call_id: &str,
        tool_name: &str,
        output: &str,
        is_error: bool,
        duration_ms: u128,
    ) -> Self {
        Self::with_json(
            EventKind::ToolCallEnd,
            run_id,
            json!({
                "call_id": call_id,
                "tool_name": tool_name,
                "output": output,
                "is_error": is_error,
                "duration_ms": duration_ms as u64,
            }),
        )
    }

    pub fn warning(run_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_json(EventKind::Warning, run_id, json!({ "message": message.into() }))
    }

    pub fn error(run_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_json(EventKind::Error, run_id, json!({ "message": message.into() }))
    }
}

pub(crate) fn current_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}", now.as_secs(), now.subsec_millis())
}

/// Sink for run events. Emission is fire-and-forget: a slow or failing
/// observer must never change the outcome of a run.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: RunEvent);
}

#[derive(Default)]
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit(&self, _event: RunEvent) {}
}

#[derive(Clone, Default)]
pub struct BufferedEventEmitter {
    inner: Arc<Mutex<Vec<RunEvent>>>,
}

impl BufferedEventEmitter {
    pub fn snapshot(&self) -> Vec<RunEvent> {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.snapshot().into_iter().map(|event| event.kind).collect()
    }
}

impl EventEmitter for BufferedEventEmitter {
    fn emit(&self, event: RunEvent) {
        match self.inner.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Forwards events to `tracing`. Text deltas go to TRACE, failures to WARN,
/// everything else to DEBUG.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventEmitter;

impl EventEmitter for TracingEventEmitter {
    fn emit(&self, event: RunEvent) {
        let kind = event.kind.as_str();
        let data = Value::Object(event.data.into_iter().collect());
        match event.kind {
            EventKind::AssistantTextDelta => {
                tracing::trace!(run_id = %event.run_id, kind, %data, "relay event");
            }
            EventKind::Error
            | EventKind::Warning
            | EventKind::StateHookFailed
            | EventKind::HandoffDiscarded
            | EventKind::CompletionRetry => {
                tracing::warn!(run_id = %event.run_id, kind, %data, "relay event");
            }
            _ => {
                tracing::debug!(run_id = %event.run_id, kind, %data, "relay event");
            }
        }
    }
}
