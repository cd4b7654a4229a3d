//! Tool registry — name → tool map with LM-facing dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use sotto_core::types::ToolDefinition;
use tracing::{info, warn};

use super::base::Tool;

/// Stores tools keyed by name and dispatches calls.
///
/// Dispatch never raises: a missing tool or a tool error produces a
/// well-formed error *string* that round-trips into the LM as a tool
/// result, letting the model recover.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Remove a tool by name.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        let removed = self.tools.remove(name);
        if removed.is_some() {
            info!(tool = name, "unregistered tool");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of all registered tools, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// LM-facing definitions for all tools, sorted by name.
    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, params: HashMap<String, serde_json::Value>) -> String {
        let tool = match self.tools.get(name) {
            Some(t) => t,
            None => {
                warn!(tool = name, "tool not found");
                return format!("Error: Tool '{name}' not found");
            }
        };

        match tool.execute(params).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = name, error = %e, "tool execution failed");
                format!("Error executing {name}: {e}")
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            params: HashMap<String, serde_json::Value>,
        ) -> anyhow::Result<String> {
            let text = params.get("text").and_then(|v| v.as_str()).unwrap_or("");
            Ok(format!("Echo: {text}"))
        }
    }

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}, "required": []})
        }
        async fn execute(
            &self,
            _params: HashMap<String, serde_json::Value>,
        ) -> anyhow::Result<String> {
            anyhow::bail!("intentional failure")
        }
    }

    /// Tool that sleeps before returning, for ordering tests.
    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps then returns"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"value": {"type": "string"}}, "required": ["value"]})
        }
        async fn execute(
            &self,
            params: HashMap<String, serde_json::Value>,
        ) -> anyhow::Result<String> {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            let value = params.get("value").and_then(|v| v.as_str()).unwrap_or("");
            Ok(format!("done:{value}"))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        assert!(reg.has("echo"));
        assert!(!reg.has("nope"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_unregister() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        assert!(reg.unregister("echo").is_some());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_definitions_sorted() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(FailTool));
        reg.register(Arc::new(EchoTool));
        let defs = reg.get_definitions();
        assert_eq!(defs[0].function.name, "echo");
        assert_eq!(defs[1].function.name, "fail");
    }

    #[tokio::test]
    async fn test_execute_success() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        let mut params = HashMap::new();
        params.insert("text".into(), json!("hello"));
        assert_eq!(reg.execute("echo", params).await, "Echo: hello");
    }

    #[tokio::test]
    async fn test_execute_not_found_is_error_string() {
        let reg = ToolRegistry::new();
        let result = reg.execute("missing", HashMap::new()).await;
        assert_eq!(result, "Error: Tool 'missing' not found");
    }

    #[tokio::test]
    async fn test_execute_error_caught_as_string() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(FailTool));
        let result = reg.execute("fail", HashMap::new()).await;
        assert!(result.starts_with("Error executing fail:"));
        assert!(result.contains("intentional failure"));
    }

    #[tokio::test]
    async fn test_parallel_execution_preserves_order() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(SlowTool));
        reg.register(Arc::new(EchoTool));

        let mut slow_params = HashMap::new();
        slow_params.insert("value".to_string(), json!("first"));
        let mut echo_params = HashMap::new();
        echo_params.insert("text".to_string(), json!("second"));

        // The slow call is first; results must come back in input order.
        let (r1, r2) = tokio::join!(
            reg.execute("slow", slow_params),
            reg.execute("echo", echo_params)
        );
        assert_eq!(r1, "done:first");
        assert_eq!(r2, "Echo: second");
    }

    #[tokio::test]
    async fn test_parallel_execution_faster_than_sequential() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(SlowTool));

        let make = |v: &str| {
            let mut p = HashMap::new();
            p.insert("value".to_string(), json!(v));
            p
        };

        let start = std::time::Instant::now();
        let (a, b, c) = tokio::join!(
            reg.execute("slow", make("a")),
            reg.execute("slow", make("b")),
            reg.execute("slow", make("c"))
        );
        let elapsed = start.elapsed();

        assert_eq!(a, "done:a");
        assert_eq!(b, "done:b");
        assert_eq!(c, "done:c");
        // Concurrent: ~1x the 30ms delay, not 3x.
        assert!(elapsed < std::time::Duration::from_millis(75));
    }
}
