use super::ToolSpec;
use relay_llm::ToolDefinition;
use std::collections::HashMap;

/// Tools exposed by one agent, kept in registration order.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering an existing name replaces that tool in place.
    pub fn register(&mut self, tool: ToolSpec) {
        match self.index.get(tool.name()) {
            Some(&position) => self.tools[position] = tool,
            None => {
                self.index.insert(tool.name().to_string(), self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn unregister(&mut self, name: &str) -> Option<ToolSpec> {
        let position = self.index.remove(name)?;
        let removed = self.tools.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&position| &self.tools[position])
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| tool.definition.clone())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools
            .iter()
            .map(|tool| tool.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
