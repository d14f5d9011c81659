use crate::{AgentError, ToolRegistry, ToolSpec};
use relay_llm::ToolChoice;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;

/// Free-form key/value state shared by a run's tools and instructions.
pub type ContextVariables = HashMap<String, Value>;

/// Handle naming an agent inside an [`AgentRegistry`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

pub type InstructionsFn = Arc<dyn Fn(&ContextVariables) -> String + Send + Sync>;

#[derive(Clone)]
pub enum Instructions {
    Static(String),
    Dynamic(InstructionsFn),
}

impl Instructions {
    pub fn render(&self, context: &ContextVariables) -> String {
        match self {
            Self::Static(text) => text.clone(),
            Self::Dynamic(render) => render(context),
        }
    }
}

impl fmt::Debug for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl Default for Instructions {
    fn default() -> Self {
        Self::Static("You are a helpful agent.".to_string())
    }
}

impl From<&str> for Instructions {
    fn from(value: &str) -> Self {
        Self::Static(value.to_string())
    }
}

impl From<String> for Instructions {
    fn from(value: String) -> Self {
        Self::Static(value)
    }
}

/// A named bundle of instructions, a model handle and an exposed tool set.
#[derive(Clone, Debug)]
pub struct Agent {
    name: String,
    instructions: Instructions,
    model: String,
    provider: Option<String>,
    tools: ToolRegistry,
    parallel_tool_calls: bool,
    tool_choice: Option<ToolChoice>,
}

impl Agent {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Instructions::default(),
            model: model.into(),
            provider: None,
            tools: ToolRegistry::default(),
            parallel_tool_calls: true,
            tool_choice: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<Instructions>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_dynamic_instructions<F>(mut self, render: F) -> Self
    where
        F: Fn(&ContextVariables) -> String + Send + Sync + 'static,
    {
        self.instructions = Instructions::Dynamic(Arc::new(render));
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = ToolSpec>) -> Self {
        for tool in tools {
            self.tools.register(tool);
        }
        self
    }

    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = parallel;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    pub fn id(&self) -> AgentId {
        AgentId::new(self.name.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &Instructions {
        &self.instructions
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn parallel_tool_calls(&self) -> bool {
        self.parallel_tool_calls
    }

    pub fn tool_choice(&self) -> Option<&ToolChoice> {
        self.tool_choice.as_ref()
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn set_instructions(&mut self, instructions: impl Into<Instructions>) {
        self.instructions = instructions.into();
    }

    pub fn add_tool(&mut self, tool: ToolSpec) {
        self.tools.register(tool);
    }
}

/// Caller-owned set of agents addressed by [`AgentId`].
///
/// Handoff tools name their target by id, so agents that hand control back
/// and forth never own each other.
#[derive(Clone, Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentId, Agent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: Agent) -> Result<AgentId, AgentError> {
        let id = agent.id();
        if id.as_str().trim().is_empty() {
            return Err(AgentError::invalid_configuration(
                "agent name must not be empty",
            ));
        }
        if self.agents.contains_key(&id) {
            return Err(AgentError::DuplicateAgent(id.to_string()));
        }
        self.agents.insert(id.clone(), agent);
        Ok(id)
    }

    pub fn get(&self, id: &AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn get_mut(&mut self, id: &AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(id)
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }
}
