mod arguments;
mod registry;

pub use arguments::{coerce_tool_arguments, parse_tool_arguments, validate_tool_arguments};
pub use registry::ToolRegistry;

use crate::{AgentId, ContextVariables, ToolError};
use relay_llm::ToolDefinition;
use serde_json::{Map, Value, json};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send>>;
pub type ToolExecutor = Arc<dyn Fn(Value, ToolContext) -> ToolFuture + Send + Sync>;

/// What a tool body sees besides its arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolContext {
    pub call_id: String,
    pub agent: AgentId,
    /// Snapshot of the run's context variables taken at round start.
    pub context_variables: ContextVariables,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ToolValue {
    Text(String),
    /// Hand control to another registered agent for the next round.
    Handoff(AgentId),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    pub value: ToolValue,
    /// Merged into the run's context variables once the batch completes.
    pub context_updates: ContextVariables,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            value: ToolValue::Text(text.into()),
            context_updates: ContextVariables::new(),
        }
    }

    /// Strings are used verbatim, anything else is serialized as JSON.
    pub fn json(value: &Value) -> Self {
        match value {
            Value::String(text) => Self::text(text.clone()),
            other => Self::text(other.to_string()),
        }
    }

    pub fn handoff(target: impl Into<AgentId>) -> Self {
        Self {
            value: ToolValue::Handoff(target.into()),
            context_updates: ContextVariables::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }

    pub fn handoff_target(&self) -> Option<&AgentId> {
        match &self.value {
            ToolValue::Handoff(target) => Some(target),
            ToolValue::Text(_) => None,
        }
    }
}

impl From<String> for ToolOutput {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

impl From<&str> for ToolOutput {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// A callable tool: its model-facing definition plus the executor that runs
/// it. The schema is fixed once the tool is built.
#[derive(Clone)]
pub struct ToolSpec {
    pub definition: ToolDefinition,
    pub executor: ToolExecutor,
}

impl ToolSpec {
    pub fn new(definition: ToolDefinition, executor: ToolExecutor) -> Self {
        Self {
            definition,
            executor,
        }
    }

    pub fn builder(name: impl Into<String>) -> ToolSpecBuilder {
        ToolSpecBuilder {
            name: name.into(),
            description: String::new(),
            properties: Map::new(),
            required: Vec::new(),
            strict: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

pub struct ToolSpecBuilder {
    name: String,
    description: String,
    properties: Map<String, Value>,
    required: Vec<String>,
    strict: bool,
}

impl ToolSpecBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn param(
        self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.add_param(name.into(), param_type, description.into(), true)
    }

    pub fn optional_param(
        self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.add_param(name.into(), param_type, description.into(), false)
    }

    /// Reject arguments the schema does not declare.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    fn add_param(
        mut self,
        name: String,
        param_type: ParamType,
        description: String,
        required: bool,
    ) -> Self {
        let mut property = json!({ "type": param_type.as_str() });
        if !description.is_empty() {
            property["description"] = Value::String(description);
        }
        self.required.retain(|existing| existing != &name);
        if required {
            self.required.push(name.clone());
        }
        self.properties.insert(name, property);
        self
    }

    pub fn schema(&self) -> Value {
        let mut schema = json!({
            "type": "object",
            "properties": Value::Object(self.properties.clone()),
        });
        if !self.required.is_empty() {
            schema["required"] = json!(self.required);
        }
        if self.strict {
            schema["additionalProperties"] = Value::Bool(false);
        }
        schema
    }

    pub fn handler<F, Fut>(self, handler: F) -> ToolSpec
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let executor: ToolExecutor = Arc::new(move |arguments, context| {
            Box::pin(handler(arguments, context)) as ToolFuture
        });
        self.executor(executor)
    }

    pub fn executor(self, executor: ToolExecutor) -> ToolSpec {
        let definition = ToolDefinition {
            parameters: self.schema(),
            name: self.name,
            description: self.description,
        };
        ToolSpec::new(definition, executor)
    }
}

/// Zero-argument handoff tool named `transfer_to_<agent>`.
pub fn transfer_to(target: impl Into<AgentId>, description: impl Into<String>) -> ToolSpec {
    let target = target.into();
    let name = format!("transfer_to_{}", tool_slug(target.as_str()));
    let mut description = description.into();
    if description.trim().is_empty() {
        description = format!("Hand the conversation over to the {target} agent.");
    }
    ToolSpec::builder(name)
        .description(description)
        .handler(move |_arguments, _context| {
            let target = target.clone();
            async move { Ok(ToolOutput::handoff(target)) }
        })
}

fn tool_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_separator = false;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_separator = false;
        } else if !last_was_separator && !slug.is_empty() {
            slug.push('_');
            last_was_separator = true;
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}
