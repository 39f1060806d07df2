//! Tool dispatcher — the fixed catalog of tools the worker may call.
//!
//! The orchestrator uses this to:
//! 1. Hand the tool descriptors to the worker model
//! 2. Route each invocation to its tool, consulting the response cache first

use std::collections::BTreeMap;
use std::sync::Arc;

use orion_core::error::ToolError;
use orion_core::tool::{Tool, ToolDescriptor, ToolInvocation};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::ResponseCache;

/// Result of one dispatched invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub value: Value,
    /// Served from the response cache without executing the tool
    pub cached: bool,
}

pub struct ToolDispatcher {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    catalog: Vec<ToolDescriptor>,
    cache: Option<Arc<ResponseCache>>,
}

impl ToolDispatcher {
    /// Build the catalog. A later tool with the same name replaces an earlier one.
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let tools: BTreeMap<String, Arc<dyn Tool>> = tools
            .into_iter()
            .map(|tool| (tool.name().to_string(), tool))
            .collect();
        let catalog = tools.values().map(|t| t.descriptor().clone()).collect();
        Self {
            tools,
            catalog,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Descriptors of every tool, sorted by name.
    pub fn catalog(&self) -> &[ToolDescriptor] {
        &self.catalog
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Execute an invocation. Unknown tool names fail with [`ToolError::UnknownTool`].
    pub async fn dispatch(&self, call: &ToolInvocation) -> Result<Dispatched, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
        let descriptor = tool.descriptor();

        if let Some(cache) = &self.cache {
            if let Some(value) = cache.get(descriptor, &call.arguments).await {
                return Ok(Dispatched {
                    value,
                    cached: true,
                });
            }
        }

        debug!(tool = %call.name, call_id = %call.id, "Executing tool");
        let value = tool.execute(&call.arguments).await.inspect_err(|e| {
            warn!(tool = %call.name, class = %e.failure_class(), error = %e, "Tool failed");
        })?;

        if let Some(cache) = &self.cache {
            cache.put(descriptor, &call.arguments, value.clone()).await;
        }

        Ok(Dispatched {
            value,
            cached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::CalculatorTool;
    use crate::clock::CurrentTimeTool;
    use async_trait::async_trait;
    use orion_core::error::FailureClass;
    use orion_core::tool::ToolArguments;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Counts executions so cache hits can be observed.
    struct CountingTool {
        descriptor: ToolDescriptor,
        calls: AtomicU32,
    }

    impl CountingTool {
        fn new() -> Self {
            Self {
                descriptor: ToolDescriptor {
                    name: "lookup".into(),
                    description: "test".into(),
                    parameters: json!({}),
                    version: "1".into(),
                    cacheable: true,
                    failure_class: FailureClass::Recoverable,
                },
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(&self, _arguments: &ToolArguments) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!("result"))
        }
    }

    fn calc_call(expr: &str) -> ToolInvocation {
        let mut args = ToolArguments::new();
        args.insert("expression".into(), json!(expr));
        ToolInvocation::new("calculator", args)
    }

    #[test]
    fn catalog_is_sorted() {
        let dispatcher = ToolDispatcher::new(vec![
            Arc::new(CurrentTimeTool::new()),
            Arc::new(CalculatorTool::new()),
        ]);
        let names: Vec<_> = dispatcher.catalog().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["calculator", "current_time"]);
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let dispatcher = ToolDispatcher::new(vec![Arc::new(CalculatorTool::new())]);
        let err = dispatcher
            .dispatch(&ToolInvocation::new("teleport", ToolArguments::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(ref name) if name == "teleport"));
        assert_eq!(err.failure_class(), FailureClass::Unrecoverable);
    }

    #[tokio::test]
    async fn dispatches_calculator() {
        let dispatcher = ToolDispatcher::new(vec![Arc::new(CalculatorTool::new())]);
        let out = dispatcher.dispatch(&calc_call("2+2")).await.unwrap();
        assert_eq!(out.value, json!(4));
        assert!(!out.cached);
    }

    #[tokio::test]
    async fn second_identical_call_is_cached() {
        let tool = Arc::new(CountingTool::new());
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(60), 16));
        let dispatcher = ToolDispatcher::new(vec![tool.clone() as Arc<dyn Tool>]).with_cache(cache);
        let call = ToolInvocation::new("lookup", ToolArguments::new());

        assert!(!dispatcher.dispatch(&call).await.unwrap().cached);
        assert!(dispatcher.dispatch(&call).await.unwrap().cached);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(60), 16));
        let dispatcher =
            ToolDispatcher::new(vec![Arc::new(CalculatorTool::new())]).with_cache(cache.clone());
        assert!(dispatcher.dispatch(&calc_call("1/0")).await.is_err());
        assert!(cache.is_empty().await);
    }
}
