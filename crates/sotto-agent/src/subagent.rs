//! Subagent manager — bounded-concurrency background task execution.
//!
//! Subagents are single-purpose agent loops with a restricted tool set (no
//! message tool, no spawning) and an ephemeral history. A counting
//! semaphore is the sole gate on how many run their inner loop at once;
//! excess spawns queue on the permit.
//!
//! Results travel back through the inbound bus as `system`-channel
//! announces, which the main loop summarizes for the originating chat.
//! `spawn_batch` instead collects every result and returns one combined
//! report to the caller.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info};

use sotto_core::bus::{InboundMessage, MessageBus};
use sotto_core::config::ExecGuardConfig;
use sotto_core::types::Message;
use sotto_providers::{LlmProvider, LlmRequestConfig};

use crate::context::ContextBuilder;
use crate::registry::{AgentState, SubmitProofTool, TaskRegistry, TaskState};
use crate::tools::filesystem::{ListDirTool, ReadFileTool, WriteFileTool};
use crate::tools::registry::ToolRegistry;
use crate::tools::shell::ExecTool;
use crate::tools::web::{WebFetchTool, WebSearchTool};

/// Iteration cap for a subagent's LM ↔ tool loop.
const SUBAGENT_MAX_ITERATIONS: usize = 15;

/// Heartbeat interval for registry-attached subagents.
const PULSE_INTERVAL: Duration = Duration::from_secs(60);

/// Where a spawned task reports back to.
#[derive(Clone, Debug)]
pub struct Origin {
    pub channel: String,
    pub chat_id: String,
}

impl Origin {
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
        }
    }
}

/// A task submitted through `spawn_batch`.
#[derive(Clone, Debug)]
pub struct BatchTask {
    pub task: String,
    pub label: Option<String>,
}

/// Record of a running subagent.
#[derive(Clone, Debug)]
pub struct TaskRecord {
    pub id: String,
    pub label: String,
    pub task: String,
    pub origin: Origin,
    pub silent: bool,
    pub registry_task_id: Option<String>,
}

/// Concurrency snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capacity {
    pub running: usize,
    pub max: usize,
    pub available: usize,
}

// ─────────────────────────────────────────────
// SubagentManager
// ─────────────────────────────────────────────

pub struct SubagentManager {
    provider: Arc<dyn LlmProvider>,
    workspace: PathBuf,
    bus: Arc<MessageBus>,
    model: String,
    request_config: LlmRequestConfig,
    exec_config: ExecGuardConfig,
    brave_api_key: Option<String>,
    registry: Option<Arc<dyn TaskRegistry>>,
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
    running: RwLock<HashMap<String, TaskRecord>>,
}

impl SubagentManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        workspace: PathBuf,
        bus: Arc<MessageBus>,
        model: String,
        request_config: LlmRequestConfig,
        exec_config: ExecGuardConfig,
        brave_api_key: Option<String>,
        registry: Option<Arc<dyn TaskRegistry>>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            provider,
            workspace,
            bus,
            model,
            request_config,
            exec_config,
            brave_api_key,
            registry,
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            running: RwLock::new(HashMap::new()),
        }
    }

    // ────────────── Spawn ──────────────

    /// Start a background subagent; returns an immediate status string.
    pub async fn spawn(
        self: &Arc<Self>,
        task: String,
        label: Option<String>,
        origin: Origin,
        silent: bool,
        registry_task_id: Option<String>,
    ) -> String {
        let task_id = generate_task_id();
        let display_label =
            label.unwrap_or_else(|| sotto_core::utils::truncate_string(&task, 30));

        let record = TaskRecord {
            id: task_id.clone(),
            label: display_label.clone(),
            task: task.clone(),
            origin: origin.clone(),
            silent,
            registry_task_id: registry_task_id.clone(),
        };

        let running_now = {
            let mut running = self.running.write().await;
            running.insert(task_id.clone(), record);
            running.len()
        };

        let queued = if running_now > self.max_concurrent {
            format!(
                " (queued — all {} slots busy, will start when a slot opens)",
                self.max_concurrent
            )
        } else {
            String::new()
        };

        let mgr = Arc::clone(self);
        let tid = task_id.clone();
        let lbl = display_label.clone();
        tokio::spawn(async move {
            let result = mgr
                .execute_subagent(&tid, &task, registry_task_id.as_deref())
                .await;

            match result {
                Ok(text) => {
                    if !silent {
                        mgr.announce_result(&tid, &lbl, &task, &text, &origin, true)
                            .await;
                    }
                }
                Err(e) => {
                    error!(task_id = %tid, error = %e, "subagent task failed");
                    if !silent {
                        mgr.announce_result(
                            &tid,
                            &lbl,
                            &task,
                            &format!("Error: {e}"),
                            &origin,
                            false,
                        )
                        .await;
                    }
                }
            }

            mgr.running.write().await.remove(&tid);
            debug!(task_id = %tid, "subagent task cleaned up");
        });

        info!(task_id = %task_id, label = %display_label, "spawned subagent");
        format!(
            "Subagent [{display_label}] started (id: {task_id}).{queued} \
             I'll notify you when it completes."
        )
    }

    /// Run several tasks concurrently and return one combined report.
    ///
    /// Every task runs silent under the shared semaphore; results are
    /// gathered in input order. On timeout the outstanding tasks are
    /// abandoned and an error string is returned.
    pub async fn spawn_batch(
        self: &Arc<Self>,
        tasks: Vec<BatchTask>,
        origin: Origin,
        timeout_s: u64,
    ) -> String {
        if tasks.is_empty() {
            return "Error: no tasks provided".to_string();
        }
        info!(
            tasks = tasks.len(),
            origin = %format!("{}:{}", origin.channel, origin.chat_id),
            "spawning subagent batch"
        );

        let mut handles = Vec::with_capacity(tasks.len());
        for entry in tasks {
            let label = entry
                .label
                .clone()
                .unwrap_or_else(|| sotto_core::utils::truncate_string(&entry.task, 40));
            let task_id = generate_task_id();
            let mgr = Arc::clone(self);
            let task_text = entry.task.clone();
            let handle = tokio::spawn(async move {
                mgr.execute_subagent(&task_id, &task_text, None).await
            });
            handles.push((label, handle));
        }

        let count = handles.len();
        let gathered = tokio::time::timeout(Duration::from_secs(timeout_s), async {
            let mut results = Vec::with_capacity(count);
            for (label, handle) in handles {
                let outcome = match handle.await {
                    Ok(Ok(text)) => (label, true, text),
                    Ok(Err(e)) => (label, false, format!("Error: {e}")),
                    Err(e) => (label, false, format!("Error: subagent aborted: {e}")),
                };
                results.push(outcome);
            }
            results
        })
        .await;

        let results = match gathered {
            Ok(results) => results,
            Err(_) => {
                return format!(
                    "Error: batch timed out after {timeout_s}s. Some tasks may not have completed."
                );
            }
        };

        let ok_count = results.iter().filter(|(_, ok, _)| *ok).count();
        let fail_count = results.len() - ok_count;

        let mut parts = vec![format!(
            "Batch complete: {ok_count}/{} succeeded{}",
            results.len(),
            if fail_count > 0 {
                format!(", {fail_count} failed")
            } else {
                String::new()
            }
        )];
        parts.push(String::new());
        for (i, (label, ok, result)) in results.iter().enumerate() {
            let icon = if *ok { "[OK]" } else { "[FAIL]" };
            parts.push(format!("### {}. {icon} {label}", i + 1));
            parts.push(result.trim().to_string());
            parts.push(String::new());
        }

        parts.join("\n")
    }

    // ────────────── Execution ──────────────

    /// Run one subagent under a semaphore permit.
    async fn execute_subagent(
        &self,
        task_id: &str,
        task: &str,
        registry_task_id: Option<&str>,
    ) -> Result<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| anyhow::anyhow!("subagent manager shut down"))?;
        self.execute_subagent_inner(task_id, task, registry_task_id)
            .await
    }

    /// Inner routine, called while holding the permit.
    async fn execute_subagent_inner(
        &self,
        task_id: &str,
        task: &str,
        registry_task_id: Option<&str>,
    ) -> Result<String> {
        info!(task_id = %task_id, "subagent starting");

        let mut tools = self.build_subagent_tools();

        // Registry integration: handshake, state transitions, pulse, proof.
        let agent_id = format!("subagent-{task_id}");
        let mut pulse: Option<tokio::task::JoinHandle<()>> = None;
        let attached = match (&self.registry, registry_task_id) {
            (Some(registry), Some(rtid)) => {
                let capabilities: Vec<String> =
                    vec!["read_file".into(), "write_file".into(), "exec".into()];
                registry
                    .register_agent(&agent_id, rtid, &capabilities, &tools.tool_names())
                    .await
                    .map_err(|e| anyhow::anyhow!("Handshake failed: {e}"))?;
                registry
                    .update_task_state(rtid, TaskState::InProgress, "subagent started")
                    .await?;

                tools.register(Arc::new(SubmitProofTool::new(registry.clone(), rtid)));

                let reg = registry.clone();
                let aid = agent_id.clone();
                pulse = Some(tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(PULSE_INTERVAL).await;
                        if let Err(e) = reg.record_pulse(&aid).await {
                            debug!(agent = %aid, error = %e, "pulse failed");
                        }
                    }
                }));

                Some((registry.clone(), rtid.to_string()))
            }
            _ => None,
        };

        let result = self
            .run_tool_loop(task_id, task, &tools, attached.is_some())
            .await;

        // Pulse tasks are cancelled and awaited, never leaked.
        if let Some(handle) = pulse {
            handle.abort();
            let _ = handle.await;
        }

        if let Some((registry, rtid)) = attached {
            let (agent_state, task_state) = if result.is_ok() {
                (AgentState::Completed, TaskState::Completed)
            } else {
                (AgentState::Failed, TaskState::Failed)
            };
            let reason = if result.is_ok() { "task finished" } else { "subagent error" };
            let _ = registry
                .update_agent_state(&agent_id, agent_state, reason)
                .await;
            let _ = registry.update_task_state(&rtid, task_state, reason).await;
            let _ = registry
                .update_agent_state(&agent_id, AgentState::Idle, "cleanup")
                .await;
        }

        result
    }

    /// The subagent's LM ↔ tool loop over an ephemeral history.
    async fn run_tool_loop(
        &self,
        task_id: &str,
        task: &str,
        tools: &ToolRegistry,
        has_registry: bool,
    ) -> Result<String> {
        let system_prompt = self.build_subagent_prompt(task, has_registry);
        let mut messages = vec![Message::system(system_prompt), Message::user(task)];
        let tool_defs = tools.get_definitions();
        let mut final_result: Option<String> = None;

        for iteration in 0..SUBAGENT_MAX_ITERATIONS {
            let response = self
                .provider
                .chat(&messages, Some(&tool_defs), &self.model, &self.request_config)
                .await;

            if response.has_tool_calls() {
                let tool_calls = response.tool_calls.clone();
                ContextBuilder::add_assistant_message(
                    &mut messages,
                    response.content.clone(),
                    tool_calls.clone(),
                );

                for tc in &tool_calls {
                    debug!(
                        task_id = %task_id,
                        tool = %tc.function.name,
                        iteration = iteration,
                        "subagent executing tool"
                    );
                    let result = tools.execute(&tc.function.name, tc.parsed_arguments()).await;
                    ContextBuilder::add_tool_result(
                        &mut messages,
                        &tc.id,
                        &tc.function.name,
                        &result,
                    );
                }
            } else {
                final_result = response.content;
                break;
            }
        }

        let result = final_result
            .unwrap_or_else(|| "Task completed but no final response was generated.".into());
        info!(task_id = %task_id, result_len = result.len(), "subagent finished");
        Ok(result)
    }

    /// Restricted tool set: no message tool, no spawning, no file edits.
    fn build_subagent_tools(&self) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        let allowed_root = if self.exec_config.restrict_to_workspace {
            Some(self.workspace.clone())
        } else {
            None
        };

        tools.register(Arc::new(ReadFileTool::new(allowed_root.clone())));
        tools.register(Arc::new(WriteFileTool::new(allowed_root.clone())));
        tools.register(Arc::new(ListDirTool::new(allowed_root)));
        tools.register(Arc::new(ExecTool::new(
            self.workspace.clone(),
            &self.exec_config,
        )));
        tools.register(Arc::new(WebSearchTool::new(self.brave_api_key.clone())));
        tools.register(Arc::new(WebFetchTool::new()));
        tools
    }

    /// Announce a result on the inbound bus as a system message.
    async fn announce_result(
        &self,
        task_id: &str,
        label: &str,
        task: &str,
        result: &str,
        origin: &Origin,
        ok: bool,
    ) {
        let status_text = if ok { "completed successfully" } else { "failed" };
        let content = format!(
            "[Subagent '{label}' {status_text}]\n\n\
             Task: {task}\n\n\
             Result:\n{result}\n\n\
             Summarize this naturally for the user. Keep it brief (1-2 sentences). \
             Do not mention technical details like \"subagent\" or task IDs."
        );

        let msg = InboundMessage::new(
            "system",
            "subagent",
            format!("{}:{}", origin.channel, origin.chat_id),
            content,
        );

        info!(task_id = %task_id, "announcing subagent result");
        if let Err(e) = self.bus.publish_inbound(msg).await {
            error!(task_id = %task_id, error = %e, "failed to announce subagent result");
        }
    }

    fn build_subagent_prompt(&self, task: &str, has_registry: bool) -> String {
        let mut prompt = format!(
            "# Subagent\n\
             You are a subagent spawned by the main agent to complete a specific task.\n\n\
             ## Your Task\n\
             {task}\n\n\
             ## Rules\n\
             1. Stay focused - complete only the assigned task, nothing else\n\
             2. Your final response will be reported back to the main agent\n\
             3. Do not initiate conversations or take on side tasks\n\
             4. Be concise but informative in your findings\n\n\
             ## What You Can Do\n\
             - Read and write files in the workspace\n\
             - Execute commands\n\
             - Search the web and fetch web pages\n\n\
             ## What You Cannot Do\n\
             - Send messages directly to users (no message tool available)\n\
             - Spawn other subagents\n\
             - Access the main agent's conversation history\n\n\
             ## Workspace\n\
             Your workspace is at: {workspace}\n\n\
             When you have completed the task, provide a clear summary of \
             your findings or actions.",
            workspace = self.workspace.display()
        );

        if has_registry {
            prompt.push_str(
                "\n\n## Proof of Work\n\
                 After completing your task, you MUST submit proof using the \
                 submit_proof tool. Choose the appropriate proof type:\n\
                 - git: For code changes (branch, commit hash)\n\
                 - file: For file creation/modification (path, sha256 hash)\n\
                 - command: For shell commands (command, exit code)\n\
                 - test: For test results (passed/failed counts)\n\
                 - pr: For pull requests (PR URL, number, branch)\n\n\
                 ## Code-Change Workflow\n\
                 When the task asks you to change a repository:\n\
                 1. Clone or pull the repo into the workspace\n\
                 2. Create a feature branch\n\
                 3. Make the changes with read_file/write_file\n\
                 4. Run the tests\n\
                 5. Run the linter\n\
                 6. Commit and push\n\
                 7. Open a pull request\n\
                 8. submit_proof with type=pr",
            );
        }

        prompt
    }

    // ────────────── Introspection ──────────────

    /// Records of currently running tasks.
    pub async fn running_tasks(&self) -> Vec<TaskRecord> {
        self.running.read().await.values().cloned().collect()
    }

    pub async fn task_count(&self) -> usize {
        self.running.read().await.len()
    }

    /// Concurrency capacity, used by spawn's queue notice.
    pub async fn get_capacity(&self) -> Capacity {
        let running = self.running.read().await.len();
        Capacity {
            running,
            max: self.max_concurrent,
            available: self.max_concurrent.saturating_sub(running),
        }
    }
}

/// Generate an 8-hex task id from a timestamp-seeded counter mix.
pub(crate) fn generate_task_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = nanos
        .wrapping_mul(6364136223846793005)
        .wrapping_add(count as u64);
    format!("{:08x}", (mixed >> 32) as u32)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
