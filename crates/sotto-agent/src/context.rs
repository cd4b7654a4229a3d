//! Context builder — assembles the system prompt and the LM-ready message
//! sequence for each turn.
//!
//! The system prompt is composed of the agent identity, any bootstrap
//! files in the workspace, file-based memory, skills, and — when a vector
//! store is attached — a recall block retrieved for the current message
//! and session namespace.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use sotto_core::bus::MediaAttachment;
use sotto_core::types::{ContentPart, ImageUrl, Message, ToolCall};

use crate::memory::core::CoreMemory;
use crate::memory::daily::FileMemory;
use crate::memory::store::{
    VectorStore, LEARNINGS_NAMESPACE, TOOLS_NAMESPACE, USER_NAMESPACE,
};
use crate::skills::SkillsLoader;

/// Files injected into the system prompt when present in the workspace.
const BOOTSTRAP_FILES: &[&str] = &["AGENTS.md", "SOUL.md", "USER.md", "TOOLS.md", "IDENTITY.md"];

/// Memories retrieved per recall block.
const RECALL_TOP_K: usize = 5;

// ─────────────────────────────────────────────
// ContextBuilder
// ─────────────────────────────────────────────

pub struct ContextBuilder {
    workspace: PathBuf,
    agent_name: String,
    file_memory: FileMemory,
    core_memory: Arc<CoreMemory>,
    skills: SkillsLoader,
    vector_memory: Option<Arc<dyn VectorStore>>,
}

impl ContextBuilder {
    pub fn new(workspace: impl Into<PathBuf>, agent_name: impl Into<String>) -> Self {
        let workspace = workspace.into();
        let file_memory = FileMemory::new(&workspace);
        let core_memory = Arc::new(CoreMemory::new(&workspace));
        let skills = SkillsLoader::new(&workspace);
        Self {
            workspace,
            agent_name: agent_name.into(),
            file_memory,
            core_memory,
            skills,
            vector_memory: None,
        }
    }

    /// Attach a vector store for recall blocks.
    pub fn with_vector_memory(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_memory = Some(store);
        self
    }

    pub fn vector_memory(&self) -> Option<&Arc<dyn VectorStore>> {
        self.vector_memory.as_ref()
    }

    /// The scratchpad shared with the core-memory tools.
    pub fn core_memory(&self) -> &Arc<CoreMemory> {
        &self.core_memory
    }

    /// Namespaces visible from a session: its own plus the shared buckets.
    pub fn recall_namespaces(namespace: &str) -> Vec<String> {
        vec![
            namespace.to_string(),
            USER_NAMESPACE.to_string(),
            LEARNINGS_NAMESPACE.to_string(),
            TOOLS_NAMESPACE.to_string(),
        ]
    }

    // ────────────── Message assembly ──────────────

    /// Build the full LM message sequence:
    /// system prompt, optional out-of-band channel context, history
    /// unmodified, then the current user turn.
    pub async fn build_messages(
        &self,
        history: &[Message],
        current_message: &str,
        media: &[MediaAttachment],
        channel_context: Option<&str>,
        namespace: &str,
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 3);

        messages.push(Message::system(
            self.build_system_prompt(current_message, namespace).await,
        ));

        if let Some(context) = channel_context {
            messages.push(Message::system(format!(
                "[Out-of-band channel context — not part of the conversation]\n{context}"
            )));
        }

        messages.extend_from_slice(history);

        if media.is_empty() {
            messages.push(Message::user(current_message));
        } else {
            messages.push(build_media_user_message(current_message, media));
        }

        messages
    }

    /// Append an assistant turn. With tool calls present the turn carries
    /// them (arguments stay JSON strings); otherwise plain text.
    pub fn add_assistant_message(
        messages: &mut Vec<Message>,
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) {
        if tool_calls.is_empty() {
            if let Some(text) = content {
                messages.push(Message::assistant(text));
            }
        } else {
            messages.push(Message::assistant_tool_calls(content, tool_calls));
        }
    }

    /// Append a tool result turn matched to its call id.
    pub fn add_tool_result(
        messages: &mut Vec<Message>,
        tool_call_id: &str,
        tool_name: &str,
        result: &str,
    ) {
        messages.push(Message::tool_result(tool_call_id, tool_name, result));
    }

    // ────────────── System prompt ──────────────

    async fn build_system_prompt(&self, current_message: &str, namespace: &str) -> String {
        let mut parts: Vec<String> = vec![self.build_identity()];

        for filename in BOOTSTRAP_FILES {
            let path = self.workspace.join(filename);
            if path.is_file() {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    debug!(file = filename, "loaded bootstrap file");
                    parts.push(format!("## {filename}\n\n{content}"));
                }
            }
        }

        if let Some(memory) = self.file_memory.prompt_section() {
            parts.push(memory);
        }

        // Core memory is always visible when non-empty.
        if let Some(core) = self.core_memory.prompt_section() {
            parts.push(core);
        }

        if let Some(always) = self.skills.always_on_section() {
            parts.push(always);
        }
        if let Some(summary) = self.skills.summary_section() {
            parts.push(summary);
        }

        if let Some(recall) = self.build_recall_block(current_message, namespace).await {
            parts.push(recall);
        }

        parts.join("\n\n---\n\n")
    }

    fn build_identity(&self) -> String {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let workspace = self.workspace.display();

        format!(
            "# Identity\n\n\
             You are **{name}**, an AI assistant.\n\n\
             - **Date/time**: {now}\n\
             - **Runtime**: Rust on {os}/{arch}\n\
             - **Workspace**: `{workspace}`\n\n\
             You have access to tools. Prefer using them over guessing. \
             Be concise and helpful.",
            name = self.agent_name,
        )
    }

    /// Retrieve memories relevant to the current message from the session
    /// namespace plus the shared buckets. Failures degrade to no recall.
    async fn build_recall_block(&self, current_message: &str, namespace: &str) -> Option<String> {
        let store = self.vector_memory.as_ref()?;
        if current_message.trim().is_empty() {
            return None;
        }

        let namespaces = Self::recall_namespaces(namespace);
        let hits = match store
            .search_namespaces(&namespaces, current_message, RECALL_TOP_K)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "memory recall failed");
                return None;
            }
        };
        if hits.is_empty() {
            return None;
        }

        let mut lines = vec![
            "# Relevant Memories".to_string(),
            "Recalled from previous conversations; use when helpful.".to_string(),
            String::new(),
        ];
        for hit in hits {
            lines.push(format!("- [{}] {}", hit.entry.namespace, hit.entry.text));
        }
        Some(lines.join("\n"))
    }
}

// ─────────────────────────────────────────────
// Media helpers
// ─────────────────────────────────────────────

/// User turn with text and inline image parts. Audio is skipped — its
/// transcription is already in the text content.
fn build_media_user_message(text: &str, media: &[MediaAttachment]) -> Message {
    let mut parts = Vec::new();

    for attachment in media {
        if attachment.mime_type.starts_with("audio/") {
            continue;
        }
        if let Ok(data) = std::fs::read(&attachment.path) {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!(
                        "data:{};base64,{}",
                        attachment.mime_type,
                        base64_encode(&data)
                    ),
                    detail: None,
                },
            });
        }
    }

    parts.push(ContentPart::Text {
        text: text.to_string(),
    });
    Message::user_parts(parts)
}

/// Standard-alphabet base64, padded.
fn base64_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = Vec::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = if chunk.len() > 1 { chunk[1] as u32 } else { 0 };
        let b2 = if chunk.len() > 2 { chunk[2] as u32 } else { 0 };
        let triple = (b0 << 16) | (b1 << 8) | b2;
        out.push(ALPHABET[((triple >> 18) & 0x3F) as usize]);
        out.push(ALPHABET[((triple >> 12) & 0x3F) as usize]);
        out.push(if chunk.len() > 1 {
            ALPHABET[((triple >> 6) & 0x3F) as usize]
        } else {
            b'='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[(triple & 0x3F) as usize]
        } else {
            b'='
        });
    }
    String::from_utf8(out).unwrap_or_default()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
