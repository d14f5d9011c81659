mod round;
mod types;

pub use types::{RunResult, TerminationReason, TurnRecord};

use crate::{
    AbortHandle, AgentError, AgentId, AgentRegistry, ContextVariables,
    DispatchOptions, EventEmitter, EventKind, History, PriceTable, PricingFunction, RunConfig,
    RunEvent, StateHook, SuccessProbe, ToolDispatcher, TracingEventEmitter, TranscriptWriter,
    resolve_handoffs,
};
use relay_llm::{Client, Message};
use round::{Completion, RunState};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Turn controller: drives completion, tool dispatch and handoff rounds until
/// a termination predicate fires.
pub struct Engine {
    client: Client,
    config: RunConfig,
    pricing: Arc<dyn PricingFunction>,
    emitter: Arc<dyn EventEmitter>,
    success_probe: Option<Arc<dyn SuccessProbe>>,
    state_hook: Option<Arc<dyn StateHook>>,
    transcript: Option<Mutex<TranscriptWriter>>,
}

impl Engine {
    pub fn new(client: Client, config: RunConfig) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self {
            client,
            config,
            pricing: Arc::new(PriceTable::default()),
            emitter: Arc::new(TracingEventEmitter),
            success_probe: None,
            state_hook: None,
            transcript: None,
        })
    }

    pub fn with_pricing(mut self, pricing: Arc<dyn PricingFunction>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_success_probe(mut self, probe: Arc<dyn SuccessProbe>) -> Self {
        self.success_probe = Some(probe);
        self
    }

    /// The hook only runs when `state_interval` is configured.
    pub fn with_state_hook(mut self, hook: Arc<dyn StateHook>) -> Self {
        self.state_hook = Some(hook);
        self
    }

    pub fn with_transcript(mut self, writer: TranscriptWriter) -> Self {
        self.transcript = Some(Mutex::new(writer));
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run without an external cancellation signal.
    pub async fn run(
        &self,
        registry: &AgentRegistry,
        start_agent: &AgentId,
        seed_messages: Vec<Message>,
        context_variables: ContextVariables,
    ) -> Result<RunResult, AgentError> {
        self.run_with_abort(
            registry,
            start_agent,
            seed_messages,
            context_variables,
            AbortHandle::new(),
        )
        .await
    }

    /// Run until a termination predicate fires or `abort` is requested. The
    /// handle only governs this run; later runs on the same engine are
    /// unaffected.
    pub async fn run_with_abort(
        &self,
        registry: &AgentRegistry,
        start_agent: &AgentId,
        seed_messages: Vec<Message>,
        context_variables: ContextVariables,
        abort: AbortHandle,
    ) -> Result<RunResult, AgentError> {
        if !registry.contains(start_agent) {
            return Err(AgentError::UnknownAgent(start_agent.to_string()));
        }
        let history = History::from_seed(seed_messages)?;

        let mut state = RunState::new(start_agent.clone(), history, context_variables, abort);
        for message in state.history.messages() {
            self.record_transcript(&state.run_id, message);
        }
        tracing::info!(
            run_id = %state.run_id,
            agent = %state.active,
            seed_messages = state.history.len(),
            "run started"
        );
        self.emit(
            EventKind::RunStart,
            &state.run_id,
            json!({ "agent": state.active.as_str(), "seed_messages": state.history.len() }),
        );

        let dispatcher = ToolDispatcher::new(
            self.emitter.clone(),
            DispatchOptions {
                run_id: state.run_id.clone(),
                parallel_pool_size: self.config.parallel_pool_size,
                tool_timeout: self.config.tool_timeout_ms.map(Duration::from_millis),
                output_limit: self.config.tool_output_limit,
            },
        );

        let reason = loop {
            if state.abort.is_abort_requested() {
                break TerminationReason::Interrupted;
            }

            let agent = registry
                .get(&state.active)
                .ok_or_else(|| AgentError::UnknownAgent(state.active.to_string()))?;
            let request = self.build_request(agent, &state);
            let model = request.model.clone();

            let response = match self.complete_with_retry(request, &state).await {
                Completion::Response(response) => response,
                Completion::Interrupted => break TerminationReason::Interrupted,
                Completion::Failed(error) => {
                    tracing::error!(
                        run_id = %state.run_id,
                        error = %error,
                        "completion backend exhausted"
                    );
                    self.emitter
                        .emit(RunEvent::error(state.run_id.clone(), error.to_string()));
                    state.failure = Some(error.to_string());
                    break TerminationReason::BackendFailure;
                }
            };

            state.turn_count += 1;
            let cost = state
                .accountant
                .record(&model, &response.usage, self.pricing.as_ref());
            self.emit(
                EventKind::CostUpdated,
                &state.run_id,
                json!({
                    "turn": state.turn_count,
                    "turn_cost": cost,
                    "total_cost": state.accountant.total(),
                    "input_tokens": response.usage.input_tokens,
                    "output_tokens": response.usage.output_tokens,
                }),
            );

            let round_start = state.history.len();
            let message = assistant_message(&response, agent.name());
            let tool_calls = message.tool_calls().to_vec();
            self.emit(
                EventKind::AssistantMessage,
                &state.run_id,
                json!({
                    "agent": agent.name(),
                    "content": message.text(),
                    "tool_calls": tool_calls.len(),
                }),
            );
            self.append(&mut state, message);

            let mut handoff = None;
            if !tool_calls.is_empty() && self.config.execute_tools {
                let mut outcomes = dispatcher
                    .dispatch(agent, &tool_calls, &state.context_variables, &state.abort)
                    .await;
                let resolution =
                    resolve_handoffs(&mut outcomes, registry, self.emitter.as_ref(), &state.run_id);
                for outcome in &outcomes {
                    if let Ok(output) = &outcome.result {
                        state
                            .context_variables
                            .extend(output.context_updates.clone());
                    }
                    self.append(&mut state, outcome.to_message());
                }
                if let Some(target) = resolution.target {
                    tracing::info!(
                        run_id = %state.run_id,
                        from = %state.active,
                        to = %target,
                        "agent handoff"
                    );
                    self.emit(
                        EventKind::Handoff,
                        &state.run_id,
                        json!({ "from": state.active.as_str(), "to": target.as_str() }),
                    );
                    state.active = target.clone();
                    handoff = Some(target);
                }
            }

            let termination = self.check_termination(&state, tool_calls.is_empty());
            if termination.is_none() && tool_calls.is_empty() {
                let nudge = Message::user(self.config.nudge_message.clone());
                self.emit(
                    EventKind::NudgeInjected,
                    &state.run_id,
                    json!({ "turn": state.turn_count }),
                );
                self.append(&mut state, nudge);
            }

            state.turns.push(TurnRecord {
                turn: state.turn_count,
                agent: agent.id(),
                response,
                appended: state.history.since(round_start).to_vec(),
                cost,
                handoff,
            });

            if let Some(reason) = termination {
                break reason;
            }

            if self.state_refresh_due(&state) {
                self.refresh_state(&mut state).await;
            }
        };

        Ok(self.finish(state, reason))
    }

    /// Termination predicates in priority order.
    fn check_termination(&self, state: &RunState, bare_reply: bool) -> Option<TerminationReason> {
        if state.abort.is_abort_requested() {
            return Some(TerminationReason::Interrupted);
        }
        if self
            .config
            .max_turns
            .is_some_and(|max_turns| state.turn_count >= max_turns)
        {
            return Some(TerminationReason::MaxTurns);
        }
        if state.accountant.exceeds(self.config.price_limit) {
            return Some(TerminationReason::PriceLimit);
        }
        if self
            .success_probe
            .as_ref()
            .is_some_and(|probe| probe.check(&state.history))
        {
            return Some(TerminationReason::Succeeded);
        }
        if !self.config.execute_tools || (bare_reply && !self.config.force_until_success) {
            return Some(TerminationReason::Completed);
        }
        None
    }

    fn finish(&self, state: RunState, reason: TerminationReason) -> RunResult {
        let result = RunResult {
            run_id: state.run_id,
            history: state.history,
            active_agent: state.active,
            elapsed: state.started.elapsed(),
            cost: state.accountant.total(),
            usage: state.accountant.usage(),
            reason,
            turns: state.turns,
            context_variables: state.context_variables,
            failure: state.failure,
            state: state.world_state,
        };

        tracing::info!(
            run_id = %result.run_id,
            reason = %result.reason,
            turns = result.turns.len(),
            cost = result.cost,
            agent = %result.active_agent,
            "run finished"
        );
        let summary = result.summary();
        if let Some(transcript) = &self.transcript {
            let written = match transcript.lock() {
                Ok(mut writer) => writer.write_run_end(&summary),
                Err(poisoned) => poisoned.into_inner().write_run_end(&summary),
            };
            if let Err(error) = written {
                self.transcript_failed(&result.run_id, &error);
            }
        }
        self.emit(
            EventKind::RunEnd,
            &result.run_id,
            serde_json::to_value(&summary).unwrap_or_default(),
        );
        result
    }

    fn emit(&self, kind: EventKind, run_id: &str, data: serde_json::Value) {
        self.emitter.emit(RunEvent::with_json(kind, run_id, data));
    }
}

/// Tool call ids are made unique within the message: a blank id becomes
/// `call_<position>` and a repeated one gets `_<position>` appended, so every
/// tool result answers exactly one call.
fn assistant_message(response: &relay_llm::Response, sender: &str) -> Message {
    let mut seen = HashSet::new();
    let calls = response
        .message
        .tool_calls()
        .iter()
        .enumerate()
        .map(|(position, call)| {
            let mut id = if call.id.trim().is_empty() {
                format!("call_{position}")
            } else {
                call.id.clone()
            };
            while seen.contains(&id) {
                id = format!("{id}_{position}");
            }
            if id != call.id {
                tracing::debug!(original = %call.id, renamed = %id, "renamed tool call id");
            }
            seen.insert(id.clone());
            relay_llm::ToolCall {
                id,
                index: position,
                ..call.clone()
            }
        })
        .collect();
    Message::assistant_with_tool_calls(response.message.content.clone(), calls)
        .with_sender(sender)
}
