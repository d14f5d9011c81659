use super::*;
use crate::{Agent, CostAccountant};
use futures::StreamExt;
use relay_llm::{LlmError, Request, Response, ResponseSeed, StreamAccumulator, StreamEventKind};
use std::collections::HashMap;
use std::time::Instant;

/// Mutable bookkeeping of one run.
pub(super) struct RunState {
    pub(super) run_id: String,
    pub(super) active: AgentId,
    pub(super) history: History,
    pub(super) context_variables: ContextVariables,
    pub(super) accountant: CostAccountant,
    pub(super) turns: Vec<TurnRecord>,
    pub(super) turn_count: usize,
    pub(super) world_state: Option<String>,
    pub(super) failure: Option<String>,
    pub(super) started: Instant,
    pub(super) abort: AbortHandle,
    jitter_seed: u64,
}

impl RunState {
    pub(super) fn new(
        active: AgentId,
        history: History,
        context_variables: ContextVariables,
        abort: AbortHandle,
    ) -> Self {
        let run_id = uuid::Uuid::new_v4();
        Self {
            run_id: run_id.to_string(),
            active,
            history,
            context_variables,
            accountant: CostAccountant::new(),
            turns: Vec::new(),
            turn_count: 0,
            world_state: None,
            failure: None,
            started: Instant::now(),
            abort,
            jitter_seed: run_id.as_u128() as u64,
        }
    }
}

pub(super) enum Completion {
    Response(Response),
    Interrupted,
    Failed(LlmError),
}

impl Engine {
    pub(super) fn build_request(&self, agent: &Agent, state: &RunState) -> Request {
        let mut messages = Vec::with_capacity(state.history.len() + 2);
        messages.push(Message::system(
            agent.instructions().render(&state.context_variables),
        ));
        if let Some(world_state) = &state.world_state {
            messages.push(Message::system(format!("Current state:\n{world_state}")));
        }
        messages.extend(state.history.messages().iter().cloned());

        let tools = agent.tools().definitions();
        let has_tools = !tools.is_empty();
        let model = self
            .config
            .model_override
            .clone()
            .unwrap_or_else(|| agent.model().to_string());

        Request {
            model,
            provider: agent.provider().map(str::to_string),
            messages,
            tools: has_tools.then_some(tools),
            tool_choice: agent.tool_choice().filter(|_| has_tools).cloned(),
            parallel_tool_calls: has_tools.then_some(agent.parallel_tool_calls()),
            stream: self.config.stream,
            metadata: Some(HashMap::from([
                ("run_id".to_string(), state.run_id.clone()),
                ("agent".to_string(), agent.name().to_string()),
            ])),
        }
    }

    /// Ask the backend for the next message, retrying retryable failures
    /// with backoff. Cancellation wins over both the call and the sleep.
    pub(super) async fn complete_with_retry(
        &self,
        request: Request,
        state: &RunState,
    ) -> Completion {
        let policy = &self.config.retry;
        let mut attempt = 1u32;
        loop {
            let call = self.request_completion(request.clone(), &state.run_id);
            let error = tokio::select! {
                result = call => match result {
                    Ok(response) => return Completion::Response(response),
                    Err(error) => error,
                },
                _ = state.abort.cancelled() => return Completion::Interrupted,
            };

            if !error.is_retryable() || attempt >= policy.max_attempts {
                return Completion::Failed(error);
            }

            let delay_ms =
                policy.delay_for_attempt_ms(attempt, state.jitter_seed ^ state.turn_count as u64);
            tracing::warn!(
                run_id = %state.run_id,
                attempt,
                delay_ms,
                error = %error,
                "completion failed, retrying"
            );
            self.emit(
                EventKind::CompletionRetry,
                &state.run_id,
                json!({ "attempt": attempt, "delay_ms": delay_ms, "error": error.to_string() }),
            );
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                _ = state.abort.cancelled() => return Completion::Interrupted,
            }
            attempt += 1;
        }
    }

    async fn request_completion(&self, request: Request, run_id: &str) -> Result<Response, LlmError> {
        let call = async {
            if request.stream {
                self.stream_completion(request, run_id).await
            } else {
                self.client.complete(request).await
            }
        };
        match self.config.completion_timeout_ms.map(Duration::from_millis) {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| LlmError::Timeout(limit))?,
            None => call.await,
        }
    }

    /// Pull every delta and merge them before anything is dispatched. A
    /// stream that fails midway yields an error and its partial text is
    /// dropped.
    async fn stream_completion(&self, request: Request, run_id: &str) -> Result<Response, LlmError> {
        let seed = ResponseSeed {
            id: String::new(),
            model: request.model.clone(),
            provider: request.provider.clone().unwrap_or_default(),
        };
        let mut events = self.client.stream(request).await?;
        let mut accumulator = StreamAccumulator::new(seed);
        while let Some(event) = events.next().await {
            let event = event?;
            if event.kind == StreamEventKind::TextDelta {
                if let Some(delta) = &event.delta {
                    self.emit(
                        EventKind::AssistantTextDelta,
                        run_id,
                        json!({ "delta": delta }),
                    );
                }
            }
            accumulator.process(&event);
        }
        Ok(accumulator.response())
    }

    pub(super) fn append(&self, state: &mut RunState, message: Message) {
        self.record_transcript(&state.run_id, &message);
        state.history.push(message);
    }

    pub(super) fn record_transcript(&self, run_id: &str, message: &Message) {
        let Some(transcript) = &self.transcript else {
            return;
        };
        let written = match transcript.lock() {
            Ok(mut writer) => writer.write_message(message),
            Err(poisoned) => poisoned.into_inner().write_message(message),
        };
        if let Err(error) = written {
            self.transcript_failed(run_id, &error);
        }
    }

    pub(super) fn transcript_failed(&self, run_id: &str, error: &AgentError) {
        tracing::warn!(run_id, error = %error, "transcript write failed");
        self.emitter
            .emit(RunEvent::warning(run_id, format!("transcript write failed: {error}")));
    }

    pub(super) fn state_refresh_due(&self, state: &RunState) -> bool {
        match (&self.state_hook, self.config.state_interval) {
            (Some(_), Some(interval)) => state.turn_count % interval == 0,
            _ => false,
        }
    }

    /// Best effort: failures and timeouts keep the previous state.
    pub(super) async fn refresh_state(&self, state: &mut RunState) {
        let Some(hook) = &self.state_hook else {
            return;
        };
        let window = state.history.tail(self.config.state_window);
        let summarize = hook.summarize(state.world_state.as_deref(), window);
        let limited = async {
            match self.config.completion_timeout_ms.map(Duration::from_millis) {
                Some(limit) => tokio::time::timeout(limit, summarize).await.map_err(|_| {
                    AgentError::StateHook(format!("timed out after {} ms", limit.as_millis()))
                })?,
                None => summarize.await,
            }
        };
        let result = tokio::select! {
            result = limited => result,
            _ = state.abort.cancelled() => return,
        };

        match result {
            Ok(text) => {
                tracing::debug!(run_id = %state.run_id, turn = state.turn_count, "state updated");
                self.emit(
                    EventKind::StateUpdated,
                    &state.run_id,
                    json!({ "turn": state.turn_count, "state": text }),
                );
                state.world_state = Some(text);
            }
            Err(error) => {
                tracing::warn!(run_id = %state.run_id, error = %error, "state hook failed");
                self.emit(
                    EventKind::StateHookFailed,
                    &state.run_id,
                    json!({ "turn": state.turn_count, "error": error.to_string() }),
                );
            }
        }
    }
}
