//! Layered session compaction.
//!
//! Oversized histories are squeezed into three layers (oldest first):
//! **old** → heuristic key facts, **middle** → a short discussion digest,
//! **recent** → kept verbatim. The facts and digest are folded into one
//! synthetic assistant "recall" turn prepended to the recent slice.
//!
//! The recent boundary never splits an assistant-with-tool-calls turn from
//! its tool results; it widens left until the exchange is whole.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::Message;

/// Marker opening every synthetic recall turn.
pub const RECALL_HEADER: &str = "[Recalling from earlier in our conversation]";

const MIN_QUESTION_LENGTH: usize = 20;
const MIN_CONTENT_LENGTH: usize = 50;
const MIN_SENTENCE_LENGTH: usize = 30;
const MAX_EXTRACT_LENGTH: usize = 150;

/// Compaction thresholds.
///
/// Compaction only reduces message count when the history exceeds the
/// threshold; below it the input is returned unchanged.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompactionConfig {
    pub threshold: usize,
    pub recent_turns_keep: usize,
    pub summary_max_turns: usize,
    pub max_facts: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold: 50,
            recent_turns_keep: 8,
            summary_max_turns: 15,
            max_facts: 10,
        }
    }
}

// ─────────────────────────────────────────────
// SessionCompactor
// ─────────────────────────────────────────────

/// Compacts session history using layered summarization.
pub struct SessionCompactor {
    config: CompactionConfig,
}

impl SessionCompactor {
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Compact a message history. Identity below the threshold.
    pub fn compact(&self, messages: &[Message]) -> Vec<Message> {
        if messages.len() < self.config.threshold {
            debug!(
                len = messages.len(),
                threshold = self.config.threshold,
                "skipping compaction"
            );
            return messages.to_vec();
        }

        let recent_count = self.config.recent_turns_keep * 2;
        let mut recent_start = messages.len().saturating_sub(recent_count);

        // Widen the recent slice until no tool exchange is cut in half:
        // a tool turn at the boundary, or an assistant-with-tool-calls just
        // before it, pulls the boundary left.
        while recent_start > 0
            && (matches!(messages[recent_start], Message::Tool { .. })
                || messages[recent_start - 1].has_tool_calls())
        {
            recent_start -= 1;
        }

        let recent = &messages[recent_start..];

        let middle_count = self.config.summary_max_turns * 2;
        let middle_start = recent_start.saturating_sub(middle_count);
        let middle = &messages[middle_start..recent_start];
        let old = &messages[..middle_start];

        let mut recall_parts: Vec<String> = Vec::new();

        if !old.is_empty() {
            let facts = extract_key_facts(old, self.config.max_facts);
            if !facts.is_empty() {
                let listed: Vec<String> = facts.iter().map(|f| format!("- {f}")).collect();
                recall_parts.push(format!("Key facts:\n{}", listed.join("\n")));
            }
        }

        if !middle.is_empty() {
            let summary = summarize(middle);
            if !summary.is_empty() {
                recall_parts.push(format!("Recent discussion summary:\n{summary}"));
            }
        }

        let mut compacted: Vec<Message> = Vec::with_capacity(recent.len() + 1);
        if !recall_parts.is_empty() {
            let recall_content = format!("{RECALL_HEADER}\n\n{}", recall_parts.join("\n\n"));
            compacted.push(Message::assistant(recall_content));
        }
        compacted.extend_from_slice(recent);

        info!(
            from = messages.len(),
            to = compacted.len(),
            old = old.len(),
            middle = middle.len(),
            recent = recent.len(),
            "compacted session history"
        );

        compacted
    }
}

// ─────────────────────────────────────────────
// Heuristics
// ─────────────────────────────────────────────

/// Phrases that open a fact-bearing user statement.
const FACT_OPENERS: &[&str] = &[
    "my name is",
    "call me",
    "i am ",
    "i'm ",
    "i prefer",
    "i like",
    "i use",
    "i work",
    "we decided",
    "we agreed",
    "we chose",
    "remember that",
    "note that",
    "the project",
];

/// Extract key facts from user turns with simple phrase heuristics.
///
/// Shared by the compactor's recall block and the memory extractor's
/// LM-failure fallback.
pub fn extract_key_facts(messages: &[Message], max_facts: usize) -> Vec<String> {
    let mut facts: Vec<String> = Vec::new();

    for msg in messages {
        if !matches!(msg, Message::User { .. }) {
            continue;
        }
        let Some(content) = msg.text() else { continue };

        for sentence in split_sentences(content) {
            let lower = sentence.to_lowercase();
            if FACT_OPENERS.iter().any(|p| lower.contains(p)) {
                let extracted = clip(sentence, MAX_EXTRACT_LENGTH);
                if !facts.contains(&extracted) {
                    facts.push(extracted);
                    if facts.len() >= max_facts {
                        return facts;
                    }
                }
            }
        }
    }

    facts
}

/// Digest middle-layer messages: up to three distinct user questions and
/// three distinct assistant opening sentences.
fn summarize(messages: &[Message]) -> String {
    let mut user_questions: Vec<String> = Vec::new();
    let mut assistant_conclusions: Vec<String> = Vec::new();

    for msg in messages {
        let Some(content) = msg.text() else { continue };
        if content.is_empty() {
            continue;
        }

        match msg {
            Message::User { .. } => {
                for line in content.lines() {
                    let line = line.trim();
                    if line.ends_with('?') && line.chars().count() > MIN_QUESTION_LENGTH {
                        let extracted = clip(line, MAX_EXTRACT_LENGTH);
                        if !user_questions.contains(&extracted) {
                            user_questions.push(extracted);
                        }
                    }
                }
            }
            Message::Assistant { .. } if content.chars().count() > MIN_CONTENT_LENGTH => {
                for sentence in content.split('.').take(3) {
                    let sentence = sentence.trim();
                    if sentence.chars().count() > MIN_SENTENCE_LENGTH {
                        let extracted = clip(sentence, MAX_EXTRACT_LENGTH);
                        if !assistant_conclusions.contains(&extracted) {
                            assistant_conclusions.push(extracted);
                        }
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    let mut parts: Vec<String> = Vec::new();
    if !user_questions.is_empty() {
        parts.push("User asked about:".to_string());
        for q in user_questions.iter().take(3) {
            parts.push(format!("  - {q}"));
        }
    }
    if !assistant_conclusions.is_empty() {
        parts.push("Assistant responses:".to_string());
        for c in assistant_conclusions.iter().take(3) {
            parts.push(format!("  - {c}"));
        }
    }

    if parts.is_empty() {
        "General discussion continued".to_string()
    } else {
        parts.join("\n")
    }
}

fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn clip(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
