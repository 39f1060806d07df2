//! Tool trait — the abstraction over the assistant's capabilities.
//!
//! Every tool is described by a fixed [`ToolDescriptor`] (name, argument
//! schema, version, cacheability and default failure class) and executed
//! through one polymorphic interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FailureClass, ToolError};

/// Named arguments passed to a tool.
pub type ToolArguments = serde_json::Map<String, serde_json::Value>;

/// A request to execute a named tool, produced by the worker model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Call ID (matches the model's tool_call.id when it provides one)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments keyed by parameter name
    #[serde(default)]
    pub arguments: ToolArguments,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: ToolArguments) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Static description of a tool, sent to the model as part of the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,

    /// Description of what the tool does (sent to the model)
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,

    /// Bumped whenever the tool's semantics change; scopes cached results.
    pub version: String,

    /// Whether results may be served from the response cache.
    pub cacheable: bool,

    /// Class applied to this tool's execution failures unless it says otherwise.
    pub failure_class: FailureClass,
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: &ToolArguments,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// An execution failure carrying this tool's default failure class.
    fn fail(&self, reason: impl Into<String>) -> ToolError
    where
        Self: Sized,
    {
        ToolError::Execution {
            tool_name: self.name().to_string(),
            reason: reason.into(),
            class: self.descriptor().failure_class,
        }
    }
}

/// Render a tool result as message text. Strings are used as-is,
/// everything else as compact JSON (so `4` stays `4`).
pub fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool {
        descriptor: ToolDescriptor,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                descriptor: ToolDescriptor {
                    name: "echo".into(),
                    description: "Echoes back the input".into(),
                    parameters: json!({
                        "type": "object",
                        "properties": { "text": { "type": "string" } },
                        "required": ["text"]
                    }),
                    version: "1".into(),
                    cacheable: true,
                    failure_class: FailureClass::Recoverable,
                },
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(
            &self,
            arguments: &ToolArguments,
        ) -> std::result::Result<serde_json::Value, ToolError> {
            match arguments.get("text") {
                Some(text) => Ok(text.clone()),
                None => Err(self.fail("missing text")),
            }
        }
    }

    #[tokio::test]
    async fn execute_and_fail_with_default_class() {
        let tool = EchoTool::new();
        let mut args = ToolArguments::new();
        args.insert("text".into(), json!("hello"));
        assert_eq!(tool.execute(&args).await.unwrap(), json!("hello"));

        let err = tool.execute(&ToolArguments::new()).await.unwrap_err();
        assert_eq!(err.failure_class(), FailureClass::Recoverable);
        assert!(err.to_string().contains("missing text"));
    }

    #[test]
    fn render_value_keeps_numbers_plain() {
        assert_eq!(render_value(&json!(4)), "4");
        assert_eq!(render_value(&json!("four")), "four");
        assert_eq!(render_value(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn invocation_ids_are_unique() {
        let a = ToolInvocation::new("echo", ToolArguments::new());
        let b = ToolInvocation::new("echo", ToolArguments::new());
        assert_ne!(a.id, b.id);
        assert_eq!(a.with_id("fixed").id, "fixed");
    }
}
