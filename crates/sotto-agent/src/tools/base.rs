//! The `Tool` trait — the interface every agent tool implements.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use sotto_core::types::ToolDefinition;

/// Every agent tool implements this trait.
///
/// The LM discovers tools through `to_definition()` and the registry
/// dispatches calls to `execute()`. Output is always a string: the LM reads
/// it as the tool result. Errors returned here are caught at the registry
/// boundary and converted to error strings, so a failing tool never aborts
/// a message.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the LM calls this tool by (e.g. `"read_file"`).
    fn name(&self) -> &str;

    /// Description shown to the LM.
    fn description(&self) -> &str;

    /// JSON Schema for the parameters:
    /// `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> Value;

    /// Execute with the given arguments.
    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String>;

    /// The definition serialized into LM requests.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Extract a required string param.
pub fn require_string(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}

/// Extract an optional string param.
pub fn optional_string(params: &HashMap<String, Value>, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Extract an optional integer param.
pub fn optional_i64(params: &HashMap<String, Value>, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// Extract an optional boolean param (false when absent).
pub fn optional_bool(params: &HashMap<String, Value>, key: &str) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}
