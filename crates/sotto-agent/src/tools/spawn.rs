//! Spawn tools — delegate work to background subagents.
//!
//! `spawn` fires one subagent and returns immediately; the result arrives
//! later as a system announce. `spawn_batch` runs several subagents under
//! the same concurrency gate and blocks until all finish (or the batch
//! times out), returning one combined report.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::warn;

use super::base::{optional_string, require_string, Tool};
use crate::registry::TaskRegistry;
use crate::subagent::{generate_task_id, BatchTask, Origin, SubagentManager};

/// Default wall-clock budget for a batch.
const BATCH_TIMEOUT_SECS: u64 = 300;

// ─────────────────────────────────────────────
// SpawnTool
// ─────────────────────────────────────────────

/// Spawns one background subagent.
pub struct SpawnTool {
    manager: Arc<SubagentManager>,
    registry: Option<Arc<dyn TaskRegistry>>,
    /// Origin context, written by the agent loop before each LM call so
    /// results route back to the right conversation.
    context: Mutex<(String, String)>,
}

impl SpawnTool {
    pub fn new(manager: Arc<SubagentManager>, registry: Option<Arc<dyn TaskRegistry>>) -> Self {
        Self {
            manager,
            registry,
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }

    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        *self.context.lock().await = (channel.to_string(), chat_id.to_string());
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a background subagent for a complex task that can run \
         independently. Use when the work needs many tool calls or the \
         user wants it done in the background. You will be notified with \
         the result when it completes."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task for the subagent to complete"
                },
                "label": {
                    "type": "string",
                    "description": "Optional short label for the task (for display)"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let task = require_string(&params, "task")?;
        let label = optional_string(&params, "label");

        let (channel, chat_id) = self.context.lock().await.clone();

        // With a registry attached, record the task before spawning so the
        // subagent can hand-shake against it.
        let registry_task_id = match &self.registry {
            Some(registry) => {
                let task_id = generate_task_id();
                match registry.create_task(&task_id, &task).await {
                    Ok(()) => Some(task_id),
                    Err(e) => {
                        warn!(error = %e, "registry task creation failed, spawning untracked");
                        None
                    }
                }
            }
            None => None,
        };

        Ok(self
            .manager
            .spawn(
                task,
                label,
                Origin::new(channel, chat_id),
                false,
                registry_task_id,
            )
            .await)
    }
}

// ─────────────────────────────────────────────
// SpawnBatchTool
// ─────────────────────────────────────────────

/// Spawns multiple subagents in parallel and collects their results.
pub struct SpawnBatchTool {
    manager: Arc<SubagentManager>,
    context: Mutex<(String, String)>,
}

impl SpawnBatchTool {
    pub fn new(manager: Arc<SubagentManager>) -> Self {
        Self {
            manager,
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }

    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        *self.context.lock().await = (channel.to_string(), chat_id.to_string());
    }
}

#[async_trait]
impl Tool for SpawnBatchTool {
    fn name(&self) -> &str {
        "spawn_batch"
    }

    fn description(&self) -> &str {
        "Spawn multiple subagents to work on tasks in parallel and wait \
         for all results. Use for batch operations like researching \
         several topics or processing several items."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "description": "List of tasks to execute in parallel",
                    "items": {
                        "type": "object",
                        "properties": {
                            "task": {"type": "string", "description": "The task description"},
                            "label": {"type": "string", "description": "Short label for display"}
                        },
                        "required": ["task"]
                    },
                    "minItems": 1,
                    "maxItems": 10
                }
            },
            "required": ["tasks"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let entries = params
            .get("tasks")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: tasks"))?;

        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            let task = entry
                .get("task")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow::anyhow!("Each batch entry needs a 'task' string"))?;
            let label = entry
                .get("label")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            tasks.push(BatchTask {
                task: task.to_string(),
                label,
            });
        }

        let (channel, chat_id) = self.context.lock().await.clone();
        Ok(self
            .manager
            .spawn_batch(tasks, Origin::new(channel, chat_id), BATCH_TIMEOUT_SECS)
            .await)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
