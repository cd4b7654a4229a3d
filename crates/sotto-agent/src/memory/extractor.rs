//! Fact, lesson, and tool-lesson extraction from conversation windows.
//!
//! The LM is the primary extractor: it reads a transcript window and emits
//! a JSON array of facts. When the call fails or the output doesn't parse,
//! a phrase-heuristic fallback keeps extraction alive. Every candidate —
//! from either path — passes the memory filter and validation before it
//! can reach consolidation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tracing::{debug, warn};

use sotto_core::session::compaction::extract_key_facts;
use sotto_core::types::Message;
use sotto_providers::{LlmProvider, LlmRequestConfig};

use super::filters;

/// Turns considered per extraction pass.
const EXTRACTION_WINDOW: usize = 20;

const MIN_FACT_LEN: usize = 4;
const MAX_FACT_LEN: usize = 512;

/// Corrective openers that mark a user turn as a lesson source.
const CORRECTION_PHRASES: &[&str] = &[
    "actually",
    "instead",
    "that's wrong",
    "that is wrong",
    "wrong",
    "no, ",
    "not what i",
];

/// Failure markers inside tool results.
const TOOL_FAILURE_MARKERS: &[&str] = &["not found", "failed", "denied"];

// ─────────────────────────────────────────────
// Fact types
// ─────────────────────────────────────────────

/// Destination class of an extracted fact; drives namespace routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FactType {
    Generic,
    User,
    Preference,
    Project,
    Lesson,
    ToolLesson,
}

impl FactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactType::Generic => "generic",
            FactType::User => "user",
            FactType::Preference => "preference",
            FactType::Project => "project",
            FactType::Lesson => "lesson",
            FactType::ToolLesson => "tool_lesson",
        }
    }

    /// Parse an LM-provided type string; anything unknown is generic.
    pub fn parse(s: &str) -> FactType {
        match s {
            "user" => FactType::User,
            "preference" => FactType::Preference,
            "project" => FactType::Project,
            "lesson" => FactType::Lesson,
            "tool_lesson" => FactType::ToolLesson,
            _ => FactType::Generic,
        }
    }
}

/// Where a fact came from; consolidation can weight by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactSource {
    Llm,
    LlmLesson,
    ToolFailure,
    Heuristic,
}

impl FactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactSource::Llm => "llm",
            FactSource::LlmLesson => "llm_lesson",
            FactSource::ToolFailure => "tool_failure",
            FactSource::Heuristic => "heuristic",
        }
    }
}

/// A fact ready for consolidation.
#[derive(Clone, Debug)]
pub struct ExtractedFact {
    /// Sanitized content, 4–512 chars.
    pub content: String,
    /// Importance in [0, 1].
    pub importance: f32,
    pub source: FactSource,
    pub fact_type: FactType,
    /// E.g. `tool_name`, `project_name`.
    pub metadata: HashMap<String, String>,
}

impl ExtractedFact {
    pub fn new(content: impl Into<String>, importance: f32, source: FactSource) -> Self {
        Self {
            content: content.into(),
            importance: importance.clamp(0.0, 1.0),
            source,
            fact_type: FactType::Generic,
            metadata: HashMap::new(),
        }
    }

    pub fn with_type(mut self, fact_type: FactType) -> Self {
        self.fact_type = fact_type;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Counters for observability.
#[derive(Clone, Debug, Default)]
pub struct ExtractionMetrics {
    pub facts_extracted: usize,
    pub lessons_extracted: usize,
    pub tool_lessons_extracted: usize,
    pub facts_by_type: HashMap<&'static str, usize>,
    pub llm_calls: usize,
    pub llm_failures: usize,
    pub heuristic_fallbacks: usize,
}

// ─────────────────────────────────────────────
// LM output shape
// ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawFact {
    content: String,
    #[serde(default)]
    importance: Option<f32>,
    #[serde(default)]
    fact_type: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

// ─────────────────────────────────────────────
// MemoryExtractor
// ─────────────────────────────────────────────

/// Extracts facts, lessons, and tool lessons from a conversation window.
pub struct MemoryExtractor {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_facts: usize,
    metrics: Mutex<ExtractionMetrics>,
}

impl MemoryExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, max_facts: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            max_facts,
            metrics: Mutex::new(ExtractionMetrics::default()),
        }
    }

    /// Snapshot of the counters.
    pub fn metrics(&self) -> ExtractionMetrics {
        self.metrics.lock().unwrap().clone()
    }

    // ────────────── Facts ──────────────

    /// Extract general facts from the window (LM primary, heuristic fallback).
    pub async fn extract(&self, messages: &[Message]) -> Vec<ExtractedFact> {
        let window = tail(messages, EXTRACTION_WINDOW);
        if window.is_empty() {
            return Vec::new();
        }

        let instruction = format!(
            "Review this conversation and extract durable facts worth \
             remembering across sessions: who the user is, their \
             preferences, and project decisions.\n\
             Respond with ONLY a JSON array, no prose:\n\
             [{{\"content\": \"...\", \"importance\": 0.0-1.0, \
             \"fact_type\": \"generic|user|preference|project\", \
             \"metadata\": {{}}}}]\n\
             For project facts set metadata.project_name. Extract at most \
             {} facts; return [] when nothing is durable.",
            self.max_facts
        );

        let candidates = match self.llm_extract(&instruction, window).await {
            Some(raw) => raw
                .into_iter()
                .map(|r| {
                    let fact_type = r
                        .fact_type
                        .as_deref()
                        .map(FactType::parse)
                        .unwrap_or(FactType::Generic);
                    let mut fact =
                        ExtractedFact::new(r.content, r.importance.unwrap_or(0.5), FactSource::Llm)
                            .with_type(fact_type);
                    if let Some(meta) = r.metadata {
                        fact.metadata = meta;
                    }
                    fact
                })
                .collect(),
            None => self.heuristic_extract(window),
        };

        let facts = self.validate(candidates);
        {
            let mut m = self.metrics.lock().unwrap();
            m.facts_extracted += facts.len();
            for fact in &facts {
                *m.facts_by_type.entry(fact.fact_type.as_str()).or_insert(0) += 1;
            }
        }
        facts
    }

    /// Phrase-heuristic fallback, shared with the compactor's key facts.
    pub fn heuristic_extract(&self, messages: &[Message]) -> Vec<ExtractedFact> {
        extract_key_facts(messages, self.max_facts)
            .into_iter()
            .map(|content| {
                let fact_type = classify_heuristic(&content);
                ExtractedFact::new(content, 0.5, FactSource::Heuristic).with_type(fact_type)
            })
            .collect()
    }

    // ────────────── Lessons ──────────────

    /// Extract lessons from user corrections (LM primary, heuristic fallback).
    pub async fn extract_lessons(&self, messages: &[Message]) -> Vec<ExtractedFact> {
        let window = tail(messages, EXTRACTION_WINDOW);
        if window.is_empty() {
            return Vec::new();
        }

        let instruction = format!(
            "Review this conversation for moments where the user corrected \
             the assistant (phrases like \"actually\", \"instead\", \
             \"wrong\"). For each, state the lesson the assistant should \
             carry forward.\n\
             Respond with ONLY a JSON array:\n\
             [{{\"content\": \"...\", \"importance\": 0.0-1.0}}]\n\
             At most {} lessons; return [] when there were no corrections.",
            self.max_facts
        );

        let candidates = match self.llm_extract(&instruction, window).await {
            Some(raw) => raw
                .into_iter()
                .map(|r| {
                    ExtractedFact::new(r.content, r.importance.unwrap_or(0.7), FactSource::LlmLesson)
                        .with_type(FactType::Lesson)
                })
                .collect(),
            None => heuristic_lessons(window),
        };

        let lessons = self.validate(candidates);
        self.metrics.lock().unwrap().lessons_extracted += lessons.len();
        lessons
    }

    // ────────────── Tool lessons ──────────────

    /// One lesson per failing tool turn in the window. Purely mechanical:
    /// the failure text is already structured, no LM needed.
    pub fn extract_tool_lessons(&self, messages: &[Message]) -> Vec<ExtractedFact> {
        let window = tail(messages, EXTRACTION_WINDOW);
        let mut lessons = Vec::new();

        for msg in window {
            let Message::Tool { content, name, .. } = msg else {
                continue;
            };
            if !is_tool_failure(content) {
                continue;
            }

            let tool_name = if name.is_empty() { "unknown" } else { name };
            let summary: String = content.chars().take(200).collect();
            let fact = ExtractedFact::new(
                format!("Tool '{tool_name}' failure: {summary}"),
                0.6,
                FactSource::ToolFailure,
            )
            .with_type(FactType::ToolLesson)
            .with_metadata("tool_name", tool_name);
            lessons.push(fact);

            if lessons.len() >= self.max_facts {
                break;
            }
        }

        let lessons = self.validate(lessons);
        self.metrics.lock().unwrap().tool_lessons_extracted += lessons.len();
        lessons
    }

    // ────────────── Shared pipeline ──────────────

    /// Run the LM extraction call. `None` means fall back to heuristics.
    async fn llm_extract(&self, instruction: &str, window: &[Message]) -> Option<Vec<RawFact>> {
        {
            self.metrics.lock().unwrap().llm_calls += 1;
        }

        let transcript = render_transcript(window);
        let request = vec![
            Message::system(instruction),
            Message::user(format!("Transcript:\n{transcript}")),
        ];

        let response = self
            .provider
            .chat(&request, None, &self.model, &LlmRequestConfig::default())
            .await;

        let parsed = response
            .content
            .as_deref()
            .filter(|c| !c.starts_with("Error"))
            .and_then(parse_fact_json);

        match parsed {
            Some(facts) => Some(facts),
            None => {
                debug!("LM extraction failed or unparseable, using heuristics");
                let mut m = self.metrics.lock().unwrap();
                m.llm_failures += 1;
                m.heuristic_fallbacks += 1;
                None
            }
        }
    }

    /// Sanitize, bound, filter, and dedupe a candidate batch.
    fn validate(&self, candidates: Vec<ExtractedFact>) -> Vec<ExtractedFact> {
        let mut seen: Vec<String> = Vec::new();
        let mut valid = Vec::new();

        for mut fact in candidates {
            fact.content = collapse_whitespace(&fact.content);

            if !is_valid_fact(&fact.content) {
                continue;
            }
            if filters::sanitize_for_memory(&fact.content).is_none() {
                warn!(
                    snippet = %fact.content.chars().take(60).collect::<String>(),
                    "dropping instruction-like fact"
                );
                continue;
            }

            let key = fact.content.to_lowercase();
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            valid.push(fact);

            if valid.len() >= self.max_facts {
                break;
            }
        }

        valid
    }
}

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

fn tail(messages: &[Message], window: usize) -> &[Message] {
    let start = messages.len().saturating_sub(window);
    &messages[start..]
}

fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .filter_map(|m| m.text().map(|t| format!("{}: {t}", m.role())))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse an LM reply as a JSON fact array, tolerating markdown fences.
fn parse_fact_json(content: &str) -> Option<Vec<RawFact>> {
    let trimmed = content.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();

    // Tolerate prose around the array by slicing to the outermost brackets.
    let start = stripped.find('[')?;
    let end = stripped.rfind(']')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&stripped[start..=end]).ok()
}

/// Length and injection bounds for a sanitized fact.
pub fn is_valid_fact(content: &str) -> bool {
    let len = content.chars().count();
    (MIN_FACT_LEN..=MAX_FACT_LEN).contains(&len) && !filters::is_instruction(content)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn classify_heuristic(content: &str) -> FactType {
    let lower = content.to_lowercase();
    if lower.contains("my name is")
        || lower.contains("call me")
        || lower.contains("i am ")
        || lower.contains("i'm ")
        || lower.contains("i work")
    {
        FactType::User
    } else if lower.contains("prefer") || lower.contains("i like") || lower.contains("i use") {
        FactType::Preference
    } else if lower.contains("we decided")
        || lower.contains("we agreed")
        || lower.contains("we chose")
        || lower.contains("the project")
    {
        FactType::Project
    } else {
        FactType::Generic
    }
}

/// Corrective user turns immediately following an assistant turn.
fn heuristic_lessons(messages: &[Message]) -> Vec<ExtractedFact> {
    let mut lessons = Vec::new();

    for pair in messages.windows(2) {
        let [prev, current] = pair else { continue };
        if !matches!(prev, Message::Assistant { .. }) {
            continue;
        }
        let Message::User { .. } = current else {
            continue;
        };
        let Some(text) = current.text() else { continue };

        let lower = text.to_lowercase();
        if CORRECTION_PHRASES.iter().any(|p| lower.contains(p)) {
            lessons.push(
                ExtractedFact::new(
                    format!("User correction: {text}"),
                    0.7,
                    FactSource::Heuristic,
                )
                .with_type(FactType::Lesson),
            );
        }
    }

    lessons
}

/// Whether a tool result records a failure.
fn is_tool_failure(content: &str) -> bool {
    if content.starts_with("Error") {
        return true;
    }
    let lower = content.to_lowercase();
    TOOL_FAILURE_MARKERS.iter().any(|m| lower.contains(m))
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
