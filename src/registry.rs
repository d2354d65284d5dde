use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{AgentError, AgentResult};
use crate::models::Tool;

/// A capability that executes one registered tool. Handlers may block or
/// perform network calls; failures are caught at the dispatcher boundary.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> AgentResult<Value>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> AgentResult<Value> + Send + Sync,
{
    async fn call(&self, arguments: Value) -> AgentResult<Value> {
        (self.f)(arguments)
    }
}

/// A tool descriptor paired with its handler.
#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: Tool,
    handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    pub async fn invoke(&self, arguments: Value) -> AgentResult<Value> {
        self.handler.call(arguments).await
    }
}

/// Maps tool names to handlers plus metadata. Populated at agent
/// construction and immutable afterwards; duplicate names are rejected at
/// registration time rather than surfacing as runtime lookup surprises.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry::default()
    }

    pub fn register(&mut self, descriptor: Tool, handler: Arc<dyn ToolHandler>) -> AgentResult<()> {
        let name = descriptor.name.clone();
        if self.tools.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        self.tools.insert(
            name.clone(),
            RegisteredTool {
                descriptor,
                handler,
            },
        );
        self.order.push(name);
        Ok(())
    }

    /// Register a plain function as a tool handler.
    pub fn register_fn<F>(
        &mut self,
        name: &str,
        description: &str,
        input_schema: Value,
        f: F,
    ) -> AgentResult<()>
    where
        F: Fn(Value) -> AgentResult<Value> + Send + Sync + 'static,
    {
        self.register(
            Tool::new(name, description, input_schema),
            Arc::new(FnHandler { f }),
        )
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Tool descriptors in registration order, for binding to a provider
    pub fn descriptors(&self) -> Vec<Tool> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.descriptor.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_schema() -> Value {
        json!({"type": "object", "properties": {"message": {"type": "string"}}})
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn("echo", "Echoes back the input", echo_schema(), |args| {
                Ok(args["message"].clone())
            })
            .unwrap();

        let tool = registry.get("echo").unwrap();
        let result = tool.invoke(json!({"message": "hi"})).await.unwrap();
        assert_eq!(result, json!("hi"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn("echo", "first", echo_schema(), |args| Ok(args))
            .unwrap();
        let err = registry
            .register_fn("echo", "second", echo_schema(), |args| Ok(args))
            .unwrap_err();
        assert_eq!(err, AgentError::DuplicateTool("echo".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_descriptors_in_registration_order() {
        let mut registry = ToolRegistry::new();
        for name in ["add", "sub", "mul"] {
            registry
                .register_fn(name, "arithmetic", echo_schema(), |args| Ok(args))
                .unwrap();
        }
        let names: Vec<_> = registry
            .descriptors()
            .into_iter()
            .map(|tool| tool.name)
            .collect();
        assert_eq!(names, ["add", "sub", "mul"]);
    }
}
