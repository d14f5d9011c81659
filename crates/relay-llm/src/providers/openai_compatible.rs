//! Adapter for backends speaking the OpenAI chat-completions protocol.
//!
//! Covers OpenAI itself plus the many gateways and local servers (Ollama,
//! vLLM, LiteLLM proxies) that mirror its wire format.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};

use crate::errors::LlmError;
use crate::provider::ProviderAdapter;
use crate::stream::{StreamEvent, StreamEventStream, ToolCallDelta};
use crate::types::{
    Message, Request, Response, Role, ToolCall, ToolChoice, ToolDefinition, Usage,
};
use crate::utils::sse::SseParser;

#[derive(Clone, Debug, PartialEq)]
pub struct OpenAiCompatibleConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for OpenAiCompatibleConfig {
    fn default() -> Self {
        Self {
            name: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            request_timeout_ms: 600_000,
        }
    }
}

pub struct OpenAiCompatibleAdapter {
    config: OpenAiCompatibleConfig,
    http: reqwest::Client,
}

impl OpenAiCompatibleAdapter {
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, LlmError> {
        if config.base_url.trim().is_empty() {
            return Err(LlmError::configuration("base_url must not be empty"));
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|error| LlmError::configuration(error.to_string()))?;
        Ok(Self { config, http })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn post(
        &self,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, LlmError> {
        let mut builder = self.http.post(self.endpoint()).json(body);
        if let Some(api_key) = self.config.api_key.as_deref().filter(|key| !key.is_empty()) {
            builder = builder.bearer_auth(api_key);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(LlmError::provider(Some(status.as_u16()), detail))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(&self, request: Request) -> Result<Response, LlmError> {
        let body = build_request_body(&request, false);
        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let response = self.post(&body, Some(timeout)).await?;
        let payload: Value = response.json().await?;
        parse_completion(&payload, &self.config.name)
    }

    async fn stream(&self, request: Request) -> Result<StreamEventStream, LlmError> {
        let body = build_request_body(&request, true);
        let response = self.post(&body, None).await?;
        Ok(sse_event_stream(Box::pin(response.bytes_stream())))
    }
}

pub fn build_request_body(request: &Request, stream: bool) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": request.messages.iter().map(message_to_wire).collect::<Vec<_>>(),
    });
    let Some(object) = body.as_object_mut() else {
        return body;
    };

    if let Some(tools) = request.tools.as_ref().filter(|tools| !tools.is_empty()) {
        object.insert(
            "tools".to_string(),
            Value::Array(tools.iter().map(tool_to_wire).collect()),
        );
        if let Some(parallel) = request.parallel_tool_calls {
            object.insert("parallel_tool_calls".to_string(), Value::Bool(parallel));
        }
        if let Some(choice) = &request.tool_choice {
            object.insert("tool_choice".to_string(), tool_choice_to_wire(choice));
        }
    }

    if stream {
        object.insert("stream".to_string(), Value::Bool(true));
        object.insert("stream_options".to_string(), json!({ "include_usage": true }));
    }
    body
}

fn message_to_wire(message: &Message) -> Value {
    match message.role {
        Role::Assistant => {
            let mut wire = json!({
                "role": "assistant",
                "content": message.content,
            });
            if message.has_tool_calls() {
                wire["tool_calls"] = Value::Array(
                    message
                        .tool_calls()
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": { "name": call.name, "arguments": call.arguments },
                            })
                        })
                        .collect(),
                );
            }
            wire
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.text(),
        }),
        Role::System | Role::User => json!({
            "role": message.role.as_str(),
            "content": message.text(),
        }),
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn tool_choice_to_wire(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Named(name) => json!({ "type": "function", "function": { "name": name } }),
    }
}

fn parse_usage(value: Option<&Value>) -> Option<Usage> {
    let usage = value?.as_object()?;
    let input = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output = usage
        .get("completion_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let total = usage
        .get("total_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(input + output);
    Some(Usage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: total,
    })
}

pub fn parse_completion(payload: &Value, provider: &str) -> Result<Response, LlmError> {
    if let Some(error) = payload.get("error") {
        return Err(LlmError::provider(None, error.to_string()));
    }
    let choice = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;
    let wire_message = choice
        .get("message")
        .ok_or_else(|| LlmError::InvalidResponse("choice has no message".to_string()))?;

    let content = wire_message
        .get("content")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string);
    let tool_calls = wire_message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(index, call)| parse_tool_call(call, index))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?
        .unwrap_or_default();

    Ok(Response {
        id: payload
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        model: payload
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        provider: provider.to_string(),
        message: Message::assistant_with_tool_calls(content, tool_calls),
        finish_reason: choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .unwrap_or("other")
            .to_string(),
        usage: parse_usage(payload.get("usage")).unwrap_or_default(),
    })
}

fn parse_tool_call(call: &Value, index: usize) -> Result<ToolCall, LlmError> {
    let function = call
        .get("function")
        .ok_or_else(|| LlmError::InvalidResponse("tool call has no function".to_string()))?;
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::InvalidResponse("tool call has no name".to_string()))?;
    // Some gateways send arguments as an already-decoded object.
    let arguments = match function.get("arguments") {
        Some(Value::String(raw)) => raw.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let id = call
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{index}"));
    Ok(ToolCall::new(id, name, arguments, index))
}

/// Translate one streamed chunk into stream events.
pub fn parse_stream_chunk(payload: &Value) -> Result<Vec<StreamEvent>, LlmError> {
    if let Some(error) = payload.get("error") {
        return Err(LlmError::Stream(error.to_string()));
    }
    let mut events = Vec::new();
    let choices = payload
        .get("choices")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for choice in choices {
        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta
                .get("content")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
            {
                events.push(StreamEvent::text_delta(text));
            }
            for (position, call) in delta
                .get("tool_calls")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .enumerate()
            {
                let function = call.get("function");
                events.push(StreamEvent::tool_call_delta(ToolCallDelta {
                    index: call
                        .get("index")
                        .and_then(Value::as_u64)
                        .map(|index| index as usize)
                        .unwrap_or(position),
                    id: call.get("id").and_then(Value::as_str).map(str::to_string),
                    name: function
                        .and_then(|function| function.get("name"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    arguments: function
                        .and_then(|function| function.get("arguments"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                }));
            }
        }
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            events.push(StreamEvent::finish(Some(reason.to_string()), None));
        }
    }

    if let Some(usage) = parse_usage(payload.get("usage")) {
        events.push(StreamEvent::finish(None, Some(usage)));
    }
    Ok(events)
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

struct SseState {
    body: ByteStream,
    parser: Option<SseParser>,
    queue: VecDeque<Result<StreamEvent, LlmError>>,
    done: bool,
}

impl SseState {
    fn enqueue(&mut self, data: &str) {
        if self.done {
            return;
        }
        if data.trim() == "[DONE]" {
            self.done = true;
            return;
        }
        let parsed = serde_json::from_str::<Value>(data)
            .map_err(|error| LlmError::InvalidResponse(format!("malformed stream chunk: {error}")))
            .and_then(|payload| parse_stream_chunk(&payload));
        match parsed {
            Ok(events) => self.queue.extend(events.into_iter().map(Ok)),
            Err(error) => {
                self.queue.push_back(Err(error));
                self.done = true;
            }
        }
    }
}

fn sse_event_stream(body: ByteStream) -> StreamEventStream {
    let state = SseState {
        body,
        parser: Some(SseParser::new()),
        queue: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queue.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let events = match state.parser.as_mut() {
                        Some(parser) => parser.push(&chunk),
                        None => Vec::new(),
                    };
                    for event in events {
                        state.enqueue(&event.data);
                    }
                }
                Some(Err(error)) => {
                    state.queue.push_back(Err(LlmError::Stream(error.to_string())));
                    state.done = true;
                }
                None => {
                    if let Some(event) = state.parser.take().and_then(SseParser::finish) {
                        state.enqueue(&event.data);
                    }
                    state.done = true;
                }
            }
        }
    }))
}
