//! Core memory tools — read and update the persistent scratchpad.
//!
//! Core memory is already inlined into every system prompt; the read tool
//! exists so the agent can double-check a section before rewriting it, and
//! the update tool is the only write path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{optional_string, require_string, Tool};
use crate::memory::core::CoreMemory;

/// Reads core memory, whole or one section.
pub struct CoreMemoryReadTool {
    core_memory: Arc<CoreMemory>,
}

impl CoreMemoryReadTool {
    pub fn new(core_memory: Arc<CoreMemory>) -> Self {
        Self { core_memory }
    }
}

#[async_trait]
impl Tool for CoreMemoryReadTool {
    fn name(&self) -> &str {
        "core_memory_read"
    }

    fn description(&self) -> &str {
        "Read the agent's core memory (persistent scratchpad). Returns all \
         sections or a specific section. Use this to review what you've \
         stored about the user, preferences, and projects."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "section": {
                    "type": "string",
                    "description": "Name of the section to read. Omit to read all sections."
                }
            },
            "required": []
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let section = optional_string(&params, "section");
        Ok(self.core_memory.read(section.as_deref()))
    }
}

/// Rewrites one section of core memory.
pub struct CoreMemoryUpdateTool {
    core_memory: Arc<CoreMemory>,
}

impl CoreMemoryUpdateTool {
    pub fn new(core_memory: Arc<CoreMemory>) -> Self {
        Self { core_memory }
    }
}

#[async_trait]
impl Tool for CoreMemoryUpdateTool {
    fn name(&self) -> &str {
        "core_memory_update"
    }

    fn description(&self) -> &str {
        "Update a section of core memory. Core memory is always visible in \
         your context - use it for key user info, current projects, and \
         important preferences. Creates the section if it does not exist; \
         empty content removes it."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "section": {
                    "type": "string",
                    "description": "Name of the section to update (e.g. 'user', 'preferences', 'current_projects')."
                },
                "content": {
                    "type": "string",
                    "description": "New content for the section. Replaces existing content entirely. \
                                    Keep concise - total core memory is limited to 2000 characters."
                }
            },
            "required": ["section", "content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let section = require_string(&params, "section")?;
        let content = require_string(&params, "content")?;
        // Cap violations come back as tool-result strings so the LM can
        // trim and retry.
        Ok(self.core_memory.update(&section, &content))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> (CoreMemoryReadTool, CoreMemoryUpdateTool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(CoreMemory::new(dir.path()));
        (
            CoreMemoryReadTool::new(memory.clone()),
            CoreMemoryUpdateTool::new(memory),
            dir,
        )
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn test_update_then_read_section() {
        let (read, update, _dir) = tools();

        let result = update
            .execute(params(&[("section", "user"), ("content", "Name: Alice")]))
            .await
            .unwrap();
        assert!(result.contains("Updated core memory section 'user'"));

        let all = read.execute(HashMap::new()).await.unwrap();
        assert!(all.contains("## user"));

        let one = read.execute(params(&[("section", "user")])).await.unwrap();
        assert_eq!(one, "Name: Alice");
    }

    #[tokio::test]
    async fn test_read_empty() {
        let (read, _update, _dir) = tools();
        let result = read.execute(HashMap::new()).await.unwrap();
        assert_eq!(result, "Core memory is empty.");
    }

    #[tokio::test]
    async fn test_update_missing_params() {
        let (_read, update, _dir) = tools();
        assert!(update.execute(HashMap::new()).await.is_err());
        assert!(update
            .execute(params(&[("section", "user")]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_cap_violation_is_tool_result() {
        let (_read, update, _dir) = tools();
        let big = "x".repeat(3000);
        let result = update
            .execute(params(&[("section", "user"), ("content", &big)]))
            .await
            .unwrap();
        assert!(result.starts_with("Error: Core memory limit exceeded"));
    }

    #[test]
    fn test_definitions() {
        let (read, update, _dir) = tools();
        assert_eq!(read.to_definition().function.name, "core_memory_read");
        assert_eq!(update.to_definition().function.name, "core_memory_update");

        let read_params = read.parameters();
        assert!(read_params["required"].as_array().unwrap().is_empty());
        let update_params = update.parameters();
        let required = update_params["required"].as_array().unwrap();
        assert_eq!(required.len(), 2);
    }
}
