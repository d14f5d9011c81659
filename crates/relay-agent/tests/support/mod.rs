#![allow(dead_code)]

use async_trait::async_trait;
use relay_agent::{Agent, AgentRegistry, ParamType, ToolOutput, ToolSpec};
use relay_llm::{
    Client, LlmError, Message, ProviderAdapter, Request, Response, StreamEventStream, ToolCall,
    Usage,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MODEL: &str = "gpt-4o-mini";

pub enum Step {
    Reply(Response),
    Fail(LlmError),
    Delayed(Duration, Response),
}

pub type Script = Arc<Mutex<VecDeque<Step>>>;
pub type Requests = Arc<Mutex<Vec<Request>>>;

#[derive(Clone)]
pub struct SequenceAdapter {
    pub name: String,
    pub steps: Script,
    pub requests: Requests,
}

#[async_trait]
impl ProviderAdapter for SequenceAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: Request) -> Result<Response, LlmError> {
        self.requests.lock().expect("requests mutex").push(request);
        let step = self
            .steps
            .lock()
            .expect("steps mutex")
            .pop_front()
            .ok_or_else(|| LlmError::configuration("no response queued"))?;
        match step {
            Step::Reply(response) => Ok(response),
            Step::Fail(error) => Err(error),
            Step::Delayed(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
        }
    }

    async fn stream(&self, _request: Request) -> Result<StreamEventStream, LlmError> {
        Ok(Box::pin(futures::stream::empty()))
    }
}

pub fn client_with_adapter() -> (Client, Script, Requests) {
    let steps: Script = Arc::new(Mutex::new(VecDeque::new()));
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let adapter = SequenceAdapter {
        name: "openai".to_string(),
        steps: steps.clone(),
        requests: requests.clone(),
    };
    (Client::with_provider(Arc::new(adapter)), steps, requests)
}

pub fn enqueue(steps: &Script, step: Step) {
    steps.lock().expect("steps mutex").push_back(step);
}

pub fn enqueue_all(steps: &Script, all: impl IntoIterator<Item = Step>) {
    let mut guard = steps.lock().expect("steps mutex");
    guard.extend(all);
}

pub fn recorded(requests: &Requests) -> Vec<Request> {
    requests.lock().expect("requests mutex").clone()
}

fn response(id: &str, message: Message, usage: Usage) -> Response {
    let finish_reason = if message.has_tool_calls() {
        "tool_calls"
    } else {
        "stop"
    };
    Response {
        id: id.to_string(),
        model: MODEL.to_string(),
        provider: "openai".to_string(),
        message,
        finish_reason: finish_reason.to_string(),
        usage,
    }
}

pub fn text_response(id: &str, text: &str) -> Step {
    Step::Reply(response(id, Message::assistant(text), Usage::new(1_000, 100)))
}

pub fn tool_call_response(id: &str, calls: Vec<(&str, &str, serde_json::Value)>) -> Step {
    tool_call_response_with_usage(id, calls, Usage::new(1_000, 100))
}

pub fn tool_call_response_with_usage(
    id: &str,
    calls: Vec<(&str, &str, serde_json::Value)>,
    usage: Usage,
) -> Step {
    let calls = calls
        .into_iter()
        .enumerate()
        .map(|(index, (call_id, name, arguments))| {
            ToolCall::new(call_id, name, arguments.to_string(), index)
        })
        .collect();
    Step::Reply(response(
        id,
        Message::assistant_with_tool_calls(None, calls),
        usage,
    ))
}

pub fn raw_tool_call_response(id: &str, call_id: &str, name: &str, arguments: &str) -> Step {
    Step::Reply(response(
        id,
        Message::assistant_with_tool_calls(None, vec![ToolCall::new(call_id, name, arguments, 0)]),
        Usage::new(1_000, 100),
    ))
}

pub fn delayed_text_response(id: &str, text: &str, delay: Duration) -> Step {
    Step::Delayed(delay, response(id, Message::assistant(text), Usage::new(1_000, 100)))
}

pub fn tool_result_by_call_id<'a>(messages: &'a [Message], call_id: &str) -> Option<&'a Message> {
    messages
        .iter()
        .find(|message| message.tool_call_id.as_deref() == Some(call_id))
}

pub fn weather_tool() -> ToolSpec {
    ToolSpec::builder("get_weather")
        .description("Look up the current weather for a location.")
        .param("location", ParamType::String, "City name")
        .handler(|_args, _ctx| async move { Ok(ToolOutput::text("sunny")) })
}

pub fn weather_registry() -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry
        .register(
            Agent::new("Weather", MODEL)
                .with_instructions("You answer weather questions.")
                .with_tool(weather_tool()),
        )
        .expect("agent should register");
    registry
}
