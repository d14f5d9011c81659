use crate::tools::{coerce_tool_arguments, parse_tool_arguments, validate_tool_arguments};
use crate::{
    AbortHandle, Agent, AgentId, ContextVariables, EventEmitter, RunEvent, ToolContext, ToolError,
    ToolOutput, ToolSpec, ToolValue, truncate_tool_output,
};
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use relay_llm::{Message, ToolCall};
use serde_json::Value;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq)]
pub struct DispatchOptions {
    pub run_id: String,
    pub parallel_pool_size: usize,
    pub tool_timeout: Option<Duration>,
    pub output_limit: Option<usize>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            run_id: String::new(),
            parallel_pool_size: 8,
            tool_timeout: None,
            output_limit: None,
        }
    }
}

/// Result of one tool call, kept next to the request it answers.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallOutcome {
    pub call: ToolCall,
    /// Position of the call within its batch.
    pub position: usize,
    pub result: Result<ToolOutput, ToolError>,
    pub duration: Duration,
}

impl ToolCallOutcome {
    pub fn is_error(&self) -> bool {
        self.result.is_err()
    }

    pub fn handoff_target(&self) -> Option<&AgentId> {
        self.result.as_ref().ok().and_then(ToolOutput::handoff_target)
    }

    /// Text fed back to the model for this call.
    pub fn content(&self) -> String {
        match &self.result {
            Ok(output) => match &output.value {
                ToolValue::Text(text) => text.clone(),
                ToolValue::Handoff(target) => handoff_confirmation(target),
            },
            Err(error) => format!("Error: {error}"),
        }
    }

    pub fn to_message(&self) -> Message {
        Message::tool_result(self.call.id.clone(), self.call.name.clone(), self.content())
    }
}

pub fn handoff_confirmation(target: &AgentId) -> String {
    format!("Handed off to agent '{target}'.")
}

fn handoff_request(target: &AgentId) -> String {
    format!("Handoff to agent '{target}' requested.")
}

/// Executes one assistant message's batch of tool calls against the active
/// agent's tools. Every call yields exactly one outcome; faults never escape.
pub struct ToolDispatcher {
    emitter: Arc<dyn EventEmitter>,
    options: DispatchOptions,
}

impl ToolDispatcher {
    pub fn new(emitter: Arc<dyn EventEmitter>, options: DispatchOptions) -> Self {
        Self { emitter, options }
    }

    /// Outcomes come back in request order regardless of completion order.
    pub async fn dispatch(
        &self,
        agent: &Agent,
        calls: &[ToolCall],
        context: &ContextVariables,
        abort: &AbortHandle,
    ) -> Vec<ToolCallOutcome> {
        if agent.parallel_tool_calls() && calls.len() > 1 {
            let workers = self.options.parallel_pool_size.clamp(1, calls.len());
            tracing::debug!(
                run_id = %self.options.run_id,
                agent = agent.name(),
                calls = calls.len(),
                workers,
                "dispatching tool batch in parallel"
            );
            let mut outcomes: Vec<ToolCallOutcome> = stream::iter(calls.iter().enumerate())
                .map(|(position, call)| self.dispatch_single(agent, call, position, context, abort))
                .buffer_unordered(workers)
                .collect()
                .await;
            outcomes.sort_by_key(|outcome| outcome.position);
            return outcomes;
        }

        let mut outcomes = Vec::with_capacity(calls.len());
        for (position, call) in calls.iter().enumerate() {
            outcomes.push(
                self.dispatch_single(agent, call, position, context, abort)
                    .await,
            );
        }
        outcomes
    }

    async fn dispatch_single(
        &self,
        agent: &Agent,
        call: &ToolCall,
        position: usize,
        context: &ContextVariables,
        abort: &AbortHandle,
    ) -> ToolCallOutcome {
        let run_id = &self.options.run_id;
        self.emitter.emit(RunEvent::tool_call_start(
            run_id.clone(),
            &call.id,
            &call.name,
            agent.name(),
        ));

        let started = Instant::now();
        let result = if abort.is_abort_requested() {
            Err(ToolError::Cancelled)
        } else {
            match agent.tools().get(&call.name) {
                Some(spec) => {
                    let tool_context = ToolContext {
                        call_id: call.id.clone(),
                        agent: agent.id(),
                        context_variables: context.clone(),
                    };
                    self.execute(spec, call, tool_context, abort).await
                }
                None => Err(ToolError::UnknownTool(call.name.clone())),
            }
        };
        let duration = started.elapsed();

        let (output_text, result) = match result {
            Ok(mut output) => {
                // Handoffs are settled per batch; the resolution events report
                // whether this one was performed.
                let raw = match &output.value {
                    ToolValue::Text(text) => text.clone(),
                    ToolValue::Handoff(target) => handoff_request(target),
                };
                if let (ToolValue::Text(text), Some(limit)) =
                    (&mut output.value, self.options.output_limit)
                {
                    *text = truncate_tool_output(text, limit);
                }
                (raw, Ok(output))
            }
            Err(error) => {
                tracing::warn!(
                    run_id = %run_id,
                    call_id = %call.id,
                    tool = %call.name,
                    error = %error,
                    "tool call failed"
                );
                (error.to_string(), Err(error))
            }
        };

        self.emitter.emit(RunEvent::tool_call_end(
            run_id.clone(),
            &call.id,
            &call.name,
            &output_text,
            result.is_err(),
            duration.as_millis(),
        ));

        ToolCallOutcome {
            call: call.clone(),
            position,
            result,
            duration,
        }
    }

    async fn execute(
        &self,
        spec: &ToolSpec,
        call: &ToolCall,
        context: ToolContext,
        abort: &AbortHandle,
    ) -> Result<ToolOutput, ToolError> {
        let arguments = prepare_arguments(spec, call)?;

        let future = catch_unwind(AssertUnwindSafe(|| (spec.executor)(arguments, context)))
            .map_err(|payload| ToolError::Panicked(panic_message(payload.as_ref())))?;
        let guarded = AssertUnwindSafe(future).catch_unwind();
        let limited = async {
            match self.options.tool_timeout {
                Some(limit) => tokio::time::timeout(limit, guarded)
                    .await
                    .map_err(|_| ToolError::Timeout(limit.as_millis() as u64)),
                None => Ok(guarded.await),
            }
        };

        let finished = tokio::select! {
            finished = limited => finished?,
            _ = abort.cancelled() => return Err(ToolError::Cancelled),
        };
        match finished {
            Ok(result) => result,
            Err(payload) => Err(ToolError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

fn prepare_arguments(spec: &ToolSpec, call: &ToolCall) -> Result<Value, ToolError> {
    let schema = &spec.definition.parameters;
    let arguments = coerce_tool_arguments(schema, parse_tool_arguments(call)?);
    validate_tool_arguments(schema, &arguments)?;
    Ok(arguments)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
