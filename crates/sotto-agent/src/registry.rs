//! Task-registry capability consumed by subagents.
//!
//! When a registry is attached, a subagent performs a handshake before
//! working, pulses while it runs, submits proof of work, and transitions
//! its task through the state machine. Storage is an adapter concern; the
//! engine only sees this trait. `InMemoryTaskRegistry` backs tests and
//! single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::tools::base::{require_string, Tool};

/// Task lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Agent lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Busy,
    Completed,
    Failed,
}

/// Accepted proof categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofKind {
    Git,
    File,
    Command,
    Test,
    Pr,
}

impl ProofKind {
    pub fn parse(s: &str) -> Option<ProofKind> {
        match s {
            "git" => Some(ProofKind::Git),
            "file" => Some(ProofKind::File),
            "command" => Some(ProofKind::Command),
            "test" => Some(ProofKind::Test),
            "pr" => Some(ProofKind::Pr),
            _ => None,
        }
    }
}

/// Submitted proof of work.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proof {
    pub kind: ProofKind,
    /// Kind-specific fields (commit hash, file path + digest, exit code...).
    pub detail: HashMap<String, String>,
}

/// The registry interface.
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Create a task record before a subagent is spawned for it.
    async fn create_task(&self, task_id: &str, description: &str) -> anyhow::Result<()>;

    /// Handshake: announce an agent, its capabilities, and its tool set.
    async fn register_agent(
        &self,
        agent_id: &str,
        task_id: &str,
        capabilities: &[String],
        tool_names: &[String],
    ) -> anyhow::Result<()>;

    async fn update_task_state(
        &self,
        task_id: &str,
        state: TaskState,
        reason: &str,
    ) -> anyhow::Result<()>;

    async fn update_agent_state(
        &self,
        agent_id: &str,
        state: AgentState,
        reason: &str,
    ) -> anyhow::Result<()>;

    /// Heartbeat recorded by the pulse loop.
    async fn record_pulse(&self, agent_id: &str) -> anyhow::Result<()>;

    async fn submit_proof(&self, task_id: &str, proof: Proof) -> anyhow::Result<()>;
}

// ─────────────────────────────────────────────
// In-memory implementation
// ─────────────────────────────────────────────

#[derive(Default)]
struct RegistryState {
    tasks: HashMap<String, (String, TaskState)>,
    agents: HashMap<String, AgentState>,
    pulses: HashMap<String, usize>,
    proofs: HashMap<String, Vec<Proof>>,
}

/// Process-local registry for tests and single-node runs.
#[derive(Default)]
pub struct InMemoryTaskRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn task_state(&self, task_id: &str) -> Option<TaskState> {
        self.state.read().await.tasks.get(task_id).map(|(_, s)| *s)
    }

    pub async fn task_count(&self) -> usize {
        self.state.read().await.tasks.len()
    }

    pub async fn agent_state(&self, agent_id: &str) -> Option<AgentState> {
        self.state.read().await.agents.get(agent_id).copied()
    }

    pub async fn pulse_count(&self, agent_id: &str) -> usize {
        self.state
            .read()
            .await
            .pulses
            .get(agent_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn proofs_for(&self, task_id: &str) -> Vec<Proof> {
        self.state
            .read()
            .await
            .proofs
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskRegistry for InMemoryTaskRegistry {
    async fn create_task(&self, task_id: &str, description: &str) -> anyhow::Result<()> {
        self.state
            .write()
            .await
            .tasks
            .insert(task_id.to_string(), (description.to_string(), TaskState::Pending));
        Ok(())
    }

    async fn register_agent(
        &self,
        agent_id: &str,
        task_id: &str,
        _capabilities: &[String],
        _tool_names: &[String],
    ) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        if !state.tasks.contains_key(task_id) {
            anyhow::bail!("handshake failed: unknown task {task_id}");
        }
        state.agents.insert(agent_id.to_string(), AgentState::Busy);
        Ok(())
    }

    async fn update_task_state(
        &self,
        task_id: &str,
        new_state: TaskState,
        _reason: &str,
    ) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        match state.tasks.get_mut(task_id) {
            Some((_, s)) => {
                *s = new_state;
                Ok(())
            }
            None => anyhow::bail!("unknown task {task_id}"),
        }
    }

    async fn update_agent_state(
        &self,
        agent_id: &str,
        new_state: AgentState,
        _reason: &str,
    ) -> anyhow::Result<()> {
        self.state
            .write()
            .await
            .agents
            .insert(agent_id.to_string(), new_state);
        Ok(())
    }

    async fn record_pulse(&self, agent_id: &str) -> anyhow::Result<()> {
        *self
            .state
            .write()
            .await
            .pulses
            .entry(agent_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn submit_proof(&self, task_id: &str, proof: Proof) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        if !state.tasks.contains_key(task_id) {
            anyhow::bail!("unknown task {task_id}");
        }
        state
            .proofs
            .entry(task_id.to_string())
            .or_default()
            .push(proof);
        Ok(())
    }
}

// ─────────────────────────────────────────────
// SubmitProofTool
// ─────────────────────────────────────────────

/// Registered into a subagent's tool set when a registry is attached.
pub struct SubmitProofTool {
    registry: Arc<dyn TaskRegistry>,
    task_id: String,
}

impl SubmitProofTool {
    pub fn new(registry: Arc<dyn TaskRegistry>, task_id: impl Into<String>) -> Self {
        Self {
            registry,
            task_id: task_id.into(),
        }
    }
}

#[async_trait]
impl Tool for SubmitProofTool {
    fn name(&self) -> &str {
        "submit_proof"
    }

    fn description(&self) -> &str {
        "Submit proof that the assigned task was completed. Choose the \
         proof type matching your work: git (branch, commit), file (path, \
         sha256), command (command, exit code), test (passed/failed \
         counts), or pr (URL, number, branch)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "type": {
                    "type": "string",
                    "enum": ["git", "file", "command", "test", "pr"],
                    "description": "Proof category"
                },
                "detail": {
                    "type": "object",
                    "description": "Kind-specific fields, e.g. {\"commit\": \"abc123\"}"
                }
            },
            "required": ["type"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let kind_str = require_string(&params, "type")?;
        let kind = ProofKind::parse(&kind_str)
            .ok_or_else(|| anyhow::anyhow!("Unknown proof type: {kind_str}"))?;

        let detail: HashMap<String, String> = params
            .get("detail")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        self.registry
            .submit_proof(&self.task_id, Proof { kind, detail })
            .await?;

        Ok(format!("Proof ({kind_str}) recorded for the current task"))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_task_lifecycle() {
        let registry = InMemoryTaskRegistry::new();
        registry.create_task("t1", "do the thing").await.unwrap();
        assert_eq!(registry.task_state("t1").await, Some(TaskState::Pending));

        registry
            .update_task_state("t1", TaskState::InProgress, "started")
            .await
            .unwrap();
        assert_eq!(registry.task_state("t1").await, Some(TaskState::InProgress));

        registry
            .update_task_state("t1", TaskState::Completed, "done")
            .await
            .unwrap();
        assert_eq!(registry.task_state("t1").await, Some(TaskState::Completed));
    }

    #[tokio::test]
    async fn test_handshake_requires_known_task() {
        let registry = InMemoryTaskRegistry::new();
        let result = registry
            .register_agent("agent-1", "missing", &[], &[])
            .await;
        assert!(result.is_err());

        registry.create_task("t1", "desc").await.unwrap();
        registry
            .register_agent("agent-1", "t1", &["exec".into()], &["exec".into()])
            .await
            .unwrap();
        assert_eq!(registry.agent_state("agent-1").await, Some(AgentState::Busy));
    }

    #[tokio::test]
    async fn test_pulses_accumulate() {
        let registry = InMemoryTaskRegistry::new();
        registry.record_pulse("a").await.unwrap();
        registry.record_pulse("a").await.unwrap();
        assert_eq!(registry.pulse_count("a").await, 2);
        assert_eq!(registry.pulse_count("b").await, 0);
    }

    #[tokio::test]
    async fn test_submit_proof_tool() {
        let registry = Arc::new(InMemoryTaskRegistry::new());
        registry.create_task("t1", "desc").await.unwrap();

        let tool = SubmitProofTool::new(registry.clone(), "t1");
        let mut params = HashMap::new();
        params.insert("type".into(), json!("git"));
        params.insert("detail".into(), json!({"commit": "abc123"}));

        let result = tool.execute(params).await.unwrap();
        assert!(result.contains("git"));

        let proofs = registry.proofs_for("t1").await;
        assert_eq!(proofs.len(), 1);
        assert_eq!(proofs[0].kind, ProofKind::Git);
        assert_eq!(proofs[0].detail["commit"], "abc123");
    }

    #[tokio::test]
    async fn test_submit_proof_tool_rejects_unknown_kind() {
        let registry = Arc::new(InMemoryTaskRegistry::new());
        registry.create_task("t1", "desc").await.unwrap();
        let tool = SubmitProofTool::new(registry, "t1");

        let mut params = HashMap::new();
        params.insert("type".into(), json!("vibes"));
        assert!(tool.execute(params).await.is_err());
    }

    #[test]
    fn test_proof_kind_parse() {
        assert_eq!(ProofKind::parse("git"), Some(ProofKind::Git));
        assert_eq!(ProofKind::parse("pr"), Some(ProofKind::Pr));
        assert_eq!(ProofKind::parse("nope"), None);
    }
}
