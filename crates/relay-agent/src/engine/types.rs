use crate::{AgentId, ContextVariables, History, RunSummary};
use relay_llm::{Message, Response, Usage};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Completed,
    Succeeded,
    MaxTurns,
    PriceLimit,
    Interrupted,
    BackendFailure,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Succeeded => "succeeded",
            Self::MaxTurns => "max_turns",
            Self::PriceLimit => "price_limit",
            Self::Interrupted => "interrupted",
            Self::BackendFailure => "backend_failure",
        }
    }

    /// Only backend exhaustion counts as a failed run.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::BackendFailure)
    }
}

impl Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed round: who was active, what the backend returned and what
/// was appended to history because of it.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnRecord {
    /// 1-based round number.
    pub turn: usize,
    pub agent: AgentId,
    pub response: Response,
    pub appended: Vec<Message>,
    pub cost: f64,
    pub handoff: Option<AgentId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunResult {
    pub run_id: String,
    pub history: History,
    pub active_agent: AgentId,
    pub elapsed: Duration,
    pub cost: f64,
    pub usage: Usage,
    pub reason: TerminationReason,
    pub turns: Vec<TurnRecord>,
    pub context_variables: ContextVariables,
    /// Backend error text when `reason` is `BackendFailure`.
    pub failure: Option<String>,
    /// Latest output of the state hook, if it ever ran successfully.
    pub state: Option<String>,
}

impl RunResult {
    pub fn final_text(&self) -> Option<&str> {
        self.history
            .last_assistant()
            .map(Message::text)
            .filter(|text| !text.is_empty())
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            reason: self.reason,
            active_agent: self.active_agent.clone(),
            cost: self.cost,
            usage: self.usage,
            elapsed_ms: self.elapsed.as_millis() as u64,
            turns: self.turns.len(),
            failure: self.failure.clone(),
        }
    }
}
