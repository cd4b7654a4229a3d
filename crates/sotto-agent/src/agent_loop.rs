//! Agent loop — the per-message state machine.
//!
//! One instance consumes the inbound queue: load the session, maybe flush
//! memories and compact the history, build context, then alternate LM
//! calls and tool executions until a tool-free reply appears or the
//! iteration budget runs out. The full tool exchange is persisted so the
//! session replays cleanly.
//!
//! Tool context (`message`, `spawn`, `spawn_batch`) is written before
//! every LM call, which is why exactly one loop may drive a registry.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use sotto_core::bus::{InboundMessage, MessageBus, OutboundMessage, SYSTEM_CHANNEL};
use sotto_core::config::Config;
use sotto_core::restart::check_and_clear_restart_signal;
use sotto_core::session::{CompactionConfig, SessionCompactor, SessionManager};
use sotto_core::types::Message;
use sotto_providers::{LlmProvider, LlmRequestConfig};

use crate::context::ContextBuilder;
use crate::memory::consolidator::MemoryConsolidator;
use crate::memory::entities::EntityStore;
use crate::memory::extractor::MemoryExtractor;
use crate::memory::store::VectorStore;
use crate::registry::TaskRegistry;
use crate::scheduler::Scheduler;
use crate::subagent::SubagentManager;
use crate::tools::core_memory::{CoreMemoryReadTool, CoreMemoryUpdateTool};
use crate::tools::filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
use crate::tools::memory_search::MemorySearchTool;
use crate::tools::message::{MessageTool, SendCallback};
use crate::tools::registry::ToolRegistry;
use crate::tools::shell::ExecTool;
use crate::tools::spawn::{SpawnBatchTool, SpawnTool};
use crate::tools::web::{WebFetchTool, WebSearchTool};

/// Poll deadline for the inbound queue.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Window of turns fed to each extraction pass.
const EXTRACTION_WINDOW: usize = 20;

/// Fallback reply when the iteration budget is exhausted.
const FALLBACK_REPLY: &str = "I've completed processing but have no response to give.";
/// Fallback reply for system-origin processing.
const SYSTEM_FALLBACK_REPLY: &str = "Background task completed.";

/// Optional collaborators, passed explicitly instead of process globals.
#[derive(Default)]
pub struct AgentLoopDeps {
    /// Vector store for recall, extraction, and consolidation.
    pub vector_memory: Option<Arc<dyn VectorStore>>,
    /// Scheduler for post-restart verification jobs.
    pub scheduler: Option<Arc<dyn Scheduler>>,
    /// Task registry handed to subagents.
    pub registry: Option<Arc<dyn TaskRegistry>>,
    /// Entity graph fed from typed facts during consolidation.
    pub entity_store: Option<Arc<EntityStore>>,
    /// Session manager override (defaults to `~/.sotto/sessions/`).
    pub session_manager: Option<SessionManager>,
    /// Data directory holding the restart signal (defaults to `~/.sotto/`).
    pub data_dir: Option<PathBuf>,
    /// Brave API key for the web search tools.
    pub brave_api_key: Option<String>,
}

// ─────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────

pub struct AgentLoop {
    bus: Arc<MessageBus>,
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_iterations: usize,
    request_config: LlmRequestConfig,
    tools: ToolRegistry,
    context: ContextBuilder,
    sessions: SessionManager,
    compactor: SessionCompactor,
    extractor: Option<Arc<MemoryExtractor>>,
    consolidator: Option<Arc<MemoryConsolidator>>,
    entity_store: Option<Arc<EntityStore>>,
    extraction_interval: usize,
    enable_pre_compaction_flush: bool,
    enable_tool_lessons: bool,
    scheduler: Option<Arc<dyn Scheduler>>,
    data_dir: PathBuf,
    message_tool: Arc<MessageTool>,
    spawn_tool: Arc<SpawnTool>,
    spawn_batch_tool: Arc<SpawnBatchTool>,
    subagents: Arc<SubagentManager>,
    running: AtomicBool,
}

impl AgentLoop {
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn LlmProvider>,
        workspace: PathBuf,
        config: &Config,
        deps: AgentLoopDeps,
    ) -> Self {
        let model = if config.agent.model.is_empty() {
            provider.default_model().to_string()
        } else {
            config.agent.model.clone()
        };
        let request_config = LlmRequestConfig {
            max_tokens: config.agent.max_tokens,
            temperature: config.agent.temperature,
        };
        let sessions = deps.session_manager.unwrap_or_else(|| {
            SessionManager::new(None).expect("failed to create session manager")
        });
        let data_dir = deps.data_dir.unwrap_or_else(sotto_core::utils::get_data_path);

        // Context, with recall when a vector store is attached.
        let mut context = ContextBuilder::new(&workspace, "Sotto");
        if let Some(store) = &deps.vector_memory {
            context = context.with_vector_memory(store.clone());
        }

        // Memory pipeline.
        let (extractor, consolidator) = match (&deps.vector_memory, config.memory.enabled) {
            (Some(store), true) => {
                let extractor = Arc::new(MemoryExtractor::new(
                    provider.clone(),
                    config.memory.extraction_model.clone(),
                    config.memory.max_facts_per_extraction,
                ));
                let consolidator = Arc::new(MemoryConsolidator::new(
                    store.clone(),
                    provider.clone(),
                    config.memory.extraction_model.clone(),
                    config.memory.candidate_threshold,
                ));
                (Some(extractor), Some(consolidator))
            }
            _ => (None, None),
        };

        // Tool registry.
        let mut tools = ToolRegistry::new();
        let allowed_root = if config.exec.restrict_to_workspace {
            Some(workspace.clone())
        } else {
            None
        };
        tools.register(Arc::new(ReadFileTool::new(allowed_root.clone())));
        tools.register(Arc::new(WriteFileTool::new(allowed_root.clone())));
        tools.register(Arc::new(EditFileTool::new(allowed_root.clone())));
        tools.register(Arc::new(ListDirTool::new(allowed_root)));
        tools.register(Arc::new(ExecTool::new(workspace.clone(), &config.exec)));
        tools.register(Arc::new(WebSearchTool::new(deps.brave_api_key.clone())));
        tools.register(Arc::new(WebFetchTool::new()));

        if let Some(store) = &deps.vector_memory {
            tools.register(Arc::new(MemorySearchTool::new(store.clone())));
        }

        let core_memory = context.core_memory().clone();
        tools.register(Arc::new(CoreMemoryReadTool::new(core_memory.clone())));
        tools.register(Arc::new(CoreMemoryUpdateTool::new(core_memory)));

        let outbound = bus.clone();
        let send_callback: SendCallback = Arc::new(move |msg| {
            let bus = outbound.clone();
            Box::pin(async move {
                bus.publish_outbound(msg)
                    .await
                    .map_err(|e| anyhow::anyhow!("outbound queue closed: {e}"))
            })
        });
        let message_tool = Arc::new(MessageTool::new(Some(send_callback)));
        tools.register(message_tool.clone());

        let subagents = Arc::new(SubagentManager::new(
            provider.clone(),
            workspace,
            bus.clone(),
            model.clone(),
            request_config.clone(),
            config.exec.clone(),
            deps.brave_api_key,
            deps.registry.clone(),
            config.agent.max_concurrent_subagents,
        ));
        let spawn_tool = Arc::new(SpawnTool::new(subagents.clone(), deps.registry));
        tools.register(spawn_tool.clone());
        let spawn_batch_tool = Arc::new(SpawnBatchTool::new(subagents.clone()));
        tools.register(spawn_batch_tool.clone());

        info!(
            model = %model,
            tools = tools.len(),
            max_iterations = config.agent.max_iterations,
            memory = consolidator.is_some(),
            "agent loop initialized"
        );

        Self {
            bus,
            provider,
            model,
            max_iterations: config.agent.max_iterations,
            request_config,
            tools,
            context,
            sessions,
            compactor: SessionCompactor::new(config.compaction.clone()),
            extractor,
            consolidator,
            entity_store: deps.entity_store,
            extraction_interval: config.agent.extraction_interval,
            enable_pre_compaction_flush: config.memory.enable_pre_compaction_flush,
            enable_tool_lessons: config.memory.enable_tool_lessons,
            scheduler: deps.scheduler,
            data_dir,
            message_tool,
            spawn_tool,
            spawn_batch_tool,
            subagents,
            running: AtomicBool::new(false),
        }
    }

    // ────────────── Event loop ──────────────

    /// Poll the inbound queue until `stop()`.
    ///
    /// Errors while processing a message produce one apology outbound that
    /// carries the original metadata, then the loop continues.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.check_restart_signal().await;
        info!("agent loop started, waiting for messages");

        while self.running.load(Ordering::SeqCst) {
            let msg = match self.bus.consume_inbound_timeout(POLL_INTERVAL).await {
                Err(_) => continue,   // poll deadline, check the flag again
                Ok(None) => break,    // queue closed
                Ok(Some(msg)) => msg,
            };

            debug!(session_key = %msg.session_key(), "received message");
            match self.process_message(&msg).await {
                Ok(response) => {
                    if let Err(e) = self.bus.publish_outbound(response).await {
                        error!(error = %e, "failed to publish outbound message");
                    }
                }
                Err(e) => {
                    error!(error = %e, session_key = %msg.session_key(), "message processing error");
                    let apology = OutboundMessage::reply_to(
                        &msg,
                        format!("Sorry, I encountered an error: {e}"),
                    );
                    let _ = self.bus.publish_outbound(apology).await;
                }
            }
        }

        info!("agent loop exited");
    }

    /// Stop the loop and release memory resources.
    ///
    /// In-flight subagents are abandoned without cancellation; their
    /// announces will sit on the bus unconsumed.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(store) = self.context.vector_memory() {
            if let Err(e) = store.close().await {
                warn!(error = %e, "failed to close vector memory");
            }
        }
        info!("agent loop stopping");
    }

    /// Consume a persisted restart signal and schedule its verification
    /// job. Absence is a no-op; malformed signals never abort startup.
    pub async fn check_restart_signal(&self) {
        let Some(signal) = check_and_clear_restart_signal(&self.data_dir) else {
            return;
        };
        info!(reason = %signal.reason, "restart signal detected");

        let (Some(job), Some(scheduler)) = (signal.verify_job, &self.scheduler) else {
            return;
        };
        let name = job.name.clone();
        match scheduler.schedule_verification(job).await {
            Ok(()) => info!(job = %name, "scheduled verification job"),
            Err(e) => error!(job = %name, error = %e, "failed to schedule verification job"),
        }
    }

    // ────────────── Message processing ──────────────

    /// Process one inbound message into its outbound reply.
    pub async fn process_message(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        if msg.channel == SYSTEM_CHANNEL {
            return self.process_system_message(msg).await;
        }

        info!(channel = %msg.channel, sender = %msg.sender_id, "processing message");
        let session_key = msg.session_key();
        self.set_tool_context(&msg.channel, &msg.chat_id).await;

        let history = self.prepare_history(&session_key).await;
        let messages = self
            .context
            .build_messages(
                &history,
                &msg.content,
                &msg.media,
                msg.channel_context(),
                &session_key,
            )
            .await;

        let (final_content, exchange) = self.run_tool_loop(messages).await?;
        let content = final_content.unwrap_or_else(|| FALLBACK_REPLY.to_string());

        // Persist user turn, the tool exchange, then the final reply, so
        // the session stays replay-safe.
        self.sessions
            .add_message(&session_key, Message::user(&msg.content));
        for turn in exchange {
            self.sessions.add_message(&session_key, turn);
        }
        self.sessions
            .add_message(&session_key, Message::assistant(&content));

        self.maybe_extract_and_consolidate(&session_key).await;

        Ok(OutboundMessage::reply_to(msg, content))
    }

    /// Process a system-channel message (subagent announce or similar):
    /// the origin pair is parsed out of `chat_id`, the reply routes there.
    async fn process_system_message(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        info!(sender = %msg.sender_id, chat_id = %msg.chat_id, "processing system message");

        let (origin_channel, origin_chat_id) = msg
            .chat_id
            .split_once(':')
            .map(|(c, i)| (c.to_string(), i.to_string()))
            .ok_or_else(|| {
                anyhow::anyhow!("Invalid system message chat_id format: {}", msg.chat_id)
            })?;

        let session_key = msg.chat_id.clone();
        self.set_tool_context(&origin_channel, &origin_chat_id).await;

        let history = self.prepare_history(&session_key).await;
        let messages = self
            .context
            .build_messages(&history, &msg.content, &[], None, &session_key)
            .await;

        let (final_content, exchange) = self.run_tool_loop(messages).await?;
        let content = final_content.unwrap_or_else(|| SYSTEM_FALLBACK_REPLY.to_string());

        self.sessions.add_message(
            &session_key,
            Message::user(format!("[System: {}] {}", msg.sender_id, msg.content)),
        );
        for turn in exchange {
            self.sessions.add_message(&session_key, turn);
        }
        self.sessions
            .add_message(&session_key, Message::assistant(&content));

        self.maybe_extract_and_consolidate(&session_key).await;

        let mut response = OutboundMessage::new(origin_channel, origin_chat_id, content);
        response.metadata = msg.metadata.clone();
        Ok(response)
    }

    /// Direct processing for the CLI: wrap text into an inbound message
    /// and return only the reply text.
    pub async fn process_direct(&self, content: &str) -> Result<String> {
        let msg = InboundMessage::new("cli", "user", "direct", content);
        let response = self.process_message(&msg).await?;
        Ok(response.content)
    }

    // ────────────── Internals ──────────────

    async fn set_tool_context(&self, channel: &str, chat_id: &str) {
        self.message_tool.set_context(channel, chat_id).await;
        self.spawn_tool.set_context(channel, chat_id).await;
        self.spawn_batch_tool.set_context(channel, chat_id).await;
    }

    /// Load the session history; flush memories and compact when over the
    /// threshold.
    async fn prepare_history(&self, session_key: &str) -> Vec<Message> {
        let mut history = self.sessions.get_full_history(session_key);
        let threshold = self.compactor.config().threshold;

        if self.enable_pre_compaction_flush
            && history.len() >= threshold
            && self.consolidator.is_some()
        {
            self.pre_compaction_flush(&history, session_key).await;
        }
        if history.len() > threshold {
            history = self.compactor.compact(&history);
        }
        history
    }

    /// Persist facts from the history before compaction squeezes it.
    async fn pre_compaction_flush(&self, history: &[Message], namespace: &str) {
        let (Some(extractor), Some(consolidator)) = (&self.extractor, &self.consolidator) else {
            return;
        };
        if history.len() < 10 {
            return;
        }

        let facts = extractor.extract(history).await;
        if !facts.is_empty() {
            let metrics = consolidator.consolidate(&facts, namespace).await;
            if let Some(graph) = &self.entity_store {
                graph.record_facts(&facts);
            }
            debug!(
                facts = facts.len(),
                added = metrics.added,
                "pre-compaction flush consolidated facts"
            );
        }
    }

    /// The LM ↔ tool loop. Returns the final text (None when the budget
    /// ran out) and the tool-exchange turns produced along the way.
    ///
    /// Tool calls run sequentially in the order the LM returned them; it
    /// may have encoded dependencies in that order.
    async fn run_tool_loop(
        &self,
        mut messages: Vec<Message>,
    ) -> Result<(Option<String>, Vec<Message>)> {
        let tool_defs = self.tools.get_definitions();
        let mut exchange: Vec<Message> = Vec::new();
        let mut final_content: Option<String> = None;

        for iteration in 0..self.max_iterations {
            debug!(iteration = iteration, "LM call");
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
                exchange.push(messages.last().expect("just pushed").clone());

                for tc in &tool_calls {
                    info!(tool = %tc.function.name, iteration = iteration, "executing tool call");
                    let result = self
                        .tools
                        .execute(&tc.function.name, tc.parsed_arguments())
                        .await;
                    debug!(tool = %tc.function.name, result_len = result.len(), "tool result");

                    ContextBuilder::add_tool_result(
                        &mut messages,
                        &tc.id,
                        &tc.function.name,
                        &result,
                    );
                    exchange.push(messages.last().expect("just pushed").clone());
                }
            } else {
                // Transport-level LM failures surface as error content;
                // bubble them so the loop sends the apology reply.
                if let Some(content) = &response.content {
                    if content.starts_with("Error calling LM") {
                        anyhow::bail!("{content}");
                    }
                }
                final_content = response.content;
                break;
            }
        }

        Ok((final_content, exchange))
    }

    /// Every `extraction_interval` user turns, extract facts, lessons,
    /// and tool lessons from the recent window and consolidate them.
    async fn maybe_extract_and_consolidate(&self, session_key: &str) {
        let (Some(extractor), Some(consolidator)) = (&self.extractor, &self.consolidator) else {
            return;
        };

        let session = self.sessions.get_or_create(session_key);
        let user_count = session.user_turn_count();
        if user_count == 0 || user_count % self.extraction_interval != 0 {
            return;
        }

        let history = session.messages;
        let start = history.len().saturating_sub(EXTRACTION_WINDOW);
        let window = &history[start..];

        let facts = extractor.extract(window).await;
        if !facts.is_empty() {
            let metrics = consolidator.consolidate(&facts, session_key).await;
            if let Some(graph) = &self.entity_store {
                graph.record_facts(&facts);
            }
            debug!(count = facts.len(), added = metrics.added, "consolidated facts");
        }

        let lessons = extractor.extract_lessons(window).await;
        if !lessons.is_empty() {
            let metrics = consolidator.consolidate(&lessons, session_key).await;
            debug!(count = lessons.len(), added = metrics.added, "consolidated lessons");
        }

        if self.enable_tool_lessons {
            let tool_lessons = extractor.extract_tool_lessons(window);
            if !tool_lessons.is_empty() {
                let metrics = consolidator.consolidate(&tool_lessons, session_key).await;
                debug!(
                    count = tool_lessons.len(),
                    added = metrics.added,
                    "consolidated tool lessons"
                );
            }
        }
    }

    // ────────────── Accessors ──────────────

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn subagents(&self) -> &Arc<SubagentManager> {
        &self.subagents
    }

    /// The entity graph, when one is attached (external surfaces query it
    /// through this handle).
    pub fn entity_store(&self) -> Option<&Arc<EntityStore>> {
        self.entity_store.as_ref()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn compaction_config(&self) -> &CompactionConfig {
        self.compactor.config()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
