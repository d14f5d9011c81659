use crate::{Agent, AgentError, ContextVariables};
use async_trait::async_trait;
use relay_llm::{Client, Message, Request, Role};
use std::fmt::Write;

/// Summarises a slice of history into side "world state" text.
#[async_trait]
pub trait StateHook: Send + Sync {
    async fn summarize(
        &self,
        previous: Option<&str>,
        window: &[Message],
    ) -> Result<String, AgentError>;
}

/// State hook backed by a summarising agent: one completion, no tools.
pub struct AgentStateHook {
    client: Client,
    agent: Agent,
}

impl AgentStateHook {
    pub fn new(client: Client, agent: Agent) -> Self {
        Self { client, agent }
    }

    fn build_request(&self, previous: Option<&str>, window: &[Message]) -> Request {
        let mut prompt = String::new();
        if let Some(previous) = previous.filter(|text| !text.trim().is_empty()) {
            let _ = writeln!(prompt, "Previous state:\n{previous}\n");
        }
        prompt.push_str("Recent conversation:\n");
        for message in window {
            render_message(&mut prompt, message);
        }
        prompt.push_str("\nUpdate the state to reflect the conversation above.");

        Request {
            model: self.agent.model().to_string(),
            provider: self.agent.provider().map(str::to_string),
            messages: vec![
                Message::system(self.agent.instructions().render(&ContextVariables::new())),
                Message::user(prompt),
            ],
            ..Request::default()
        }
    }
}

#[async_trait]
impl StateHook for AgentStateHook {
    async fn summarize(
        &self,
        previous: Option<&str>,
        window: &[Message],
    ) -> Result<String, AgentError> {
        let request = self.build_request(previous, window);
        let response = self.client.complete(request).await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Err(AgentError::StateHook(
                "state agent returned empty output".to_string(),
            ));
        }
        Ok(text)
    }
}

fn render_message(out: &mut String, message: &Message) {
    let speaker = match (&message.role, message.sender.as_deref()) {
        (Role::Assistant, Some(sender)) => format!("assistant ({sender})"),
        (Role::Tool, _) => format!("tool {}", message.tool_name.as_deref().unwrap_or("?")),
        (role, _) => role.as_str().to_string(),
    };
    if !message.text().is_empty() {
        let _ = writeln!(out, "[{speaker}] {}", message.text());
    }
    for call in message.tool_calls() {
        let _ = writeln!(out, "[{speaker}] calls {}({})", call.name, call.arguments);
    }
}
