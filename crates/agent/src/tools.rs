use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::llm::ToolDefinition;

/// Whether a tool can change data. The analytical loop only ever sees tools
/// declared `ReadOnly`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolAccess {
    ReadOnly,
    Mutating,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid tool input: {0}")]
    InvalidInput(String),
    #[error("query rejected ({reason_code}): {message}")]
    Rejected { reason_code: &'static str, message: String },
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error("unknown tool `{0}`")]
    Unknown(String),
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;
    fn access(&self) -> ToolAccess;
    async fn execute(&self, input: Value) -> Result<Value, ToolError>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.register_shared(Arc::new(tool));
    }

    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// A copy of this registry with every mutating tool removed.
    pub fn read_only(&self) -> Self {
        let tools = self
            .tools
            .iter()
            .filter(|(_, tool)| tool.access() == ToolAccess::ReadOnly)
            .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
            .collect();
        Self { tools }
    }

    pub async fn execute(&self, name: &str, input: Value) -> Result<Value, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        tool.execute(input).await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{Tool, ToolAccess, ToolError, ToolRegistry};

    struct Echo;
    struct DropTable;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "Echo the input"
        }
        fn parameters(&self) -> Value {
            json!({ "type": "object" })
        }
        fn access(&self) -> ToolAccess {
            ToolAccess::ReadOnly
        }
        async fn execute(&self, input: Value) -> Result<Value, ToolError> {
            Ok(input)
        }
    }

    #[async_trait]
    impl Tool for DropTable {
        fn name(&self) -> &'static str {
            "drop_table"
        }
        fn description(&self) -> &'static str {
            "Drop a table"
        }
        fn parameters(&self) -> Value {
            json!({ "type": "object" })
        }
        fn access(&self) -> ToolAccess {
            ToolAccess::Mutating
        }
        async fn execute(&self, _input: Value) -> Result<Value, ToolError> {
            Ok(json!({ "dropped": true }))
        }
    }

    #[tokio::test]
    async fn read_only_view_drops_mutating_tools() {
        let mut registry = ToolRegistry::default();
        registry.register(Echo);
        registry.register(DropTable);
        assert_eq!(registry.len(), 2);

        let read_only = registry.read_only();
        assert_eq!(read_only.names(), vec!["echo"]);
        assert!(read_only.definitions().iter().all(|definition| definition.name != "drop_table"));
        assert!(matches!(
            read_only.execute("drop_table", json!({})).await,
            Err(ToolError::Unknown(name)) if name == "drop_table"
        ));
        assert_eq!(read_only.execute("echo", json!({ "a": 1 })).await.expect("echo")["a"], 1);
    }
}
