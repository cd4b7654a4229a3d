//! Filters applied to text before it may enter persistent memory.
//!
//! This is the sole gate between conversational text and storage:
//! instruction-like content (the classic prompt-injection shapes) is
//! dropped outright, and PII-looking content is warn-logged but stored
//! unredacted — redaction would destroy the fact being remembered.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

/// Imperative prefixes that signal a behavioral instruction.
const IMPERATIVE_PREFIXES: &[&str] = &[
    "always ",
    "never ",
    "must ",
    "should ",
    "remember to ",
    "make sure ",
    "ensure ",
    "do not ",
    "don't ",
];

/// System-prompt-like phrases.
const SYSTEM_PHRASES: &[&str] = &[
    "you are ",
    "your role is",
    "ignore previous",
    "disregard",
    "override",
];

/// Tool / function invocation phrases.
const TOOL_PHRASES: &[&str] = &["call memory_search", "use tool", "execute", "run command"];

/// Long-horizon manipulation phrases.
const MANIPULATION_PHRASES: &[&str] = &["from now on", "going forward always", "in all future"];

struct PiiPatterns {
    password: Regex,
    api_key: Regex,
    token: Regex,
    secret: Regex,
    credential: Regex,
    credit_card: Regex,
    ssn: Regex,
}

fn pii_patterns() -> &'static PiiPatterns {
    static PATTERNS: OnceLock<PiiPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| PiiPatterns {
        password: Regex::new(r"(?i)(?:password|passwd|pwd)\s*[:=]\s*\S+").unwrap(),
        api_key: Regex::new(r"(?i)api[_\-]?key\s*[:=]\s*\S+").unwrap(),
        token: Regex::new(r"(?i)token\s*[:=]\s*\S+").unwrap(),
        secret: Regex::new(r"(?i)secret\s*[:=]\s*\S+").unwrap(),
        credential: Regex::new(
            r"\b(?:sk-[A-Za-z0-9]{20,}|ghp_[A-Za-z0-9]{36,}|xoxb-[A-Za-z0-9\-]{20,}|xoxp-[A-Za-z0-9\-]{20,})\b",
        )
        .unwrap(),
        credit_card: Regex::new(r"\b\d{4}[\s\-]\d{4}[\s\-]\d{4}[\s\-]\d{4}\b").unwrap(),
        ssn: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
    })
}

/// Whether text looks like a behavioral instruction rather than a fact.
pub fn is_instruction(text: &str) -> bool {
    let lower = text.trim().to_lowercase();

    IMPERATIVE_PREFIXES.iter().any(|p| lower.starts_with(p))
        || SYSTEM_PHRASES.iter().any(|p| lower.contains(p))
        || TOOL_PHRASES.iter().any(|p| lower.contains(p))
        || MANIPULATION_PHRASES.iter().any(|p| lower.contains(p))
}

/// Scan text for PII patterns. Empty result means clean.
pub fn detect_pii(text: &str) -> Vec<&'static str> {
    let patterns = pii_patterns();
    let mut found = Vec::new();

    if patterns.password.is_match(text) {
        found.push("password");
    }
    if patterns.api_key.is_match(text) {
        found.push("api_key");
    }
    if patterns.token.is_match(text) {
        found.push("token");
    }
    if patterns.secret.is_match(text) {
        found.push("secret");
    }
    if patterns.credential.is_match(text) {
        found.push("credential");
    }
    if patterns.credit_card.is_match(text) {
        found.push("credit_card");
    }
    if patterns.ssn.is_match(text) {
        found.push("ssn");
    }

    found
}

/// Main entry point for memory content filtering.
///
/// `None` means the text must be skipped (it is an instruction). Clean text
/// comes back as-is. PII hits are warn-logged, not redacted.
pub fn sanitize_for_memory(text: &str) -> Option<&str> {
    if is_instruction(text) {
        debug!(
            snippet = %snippet(text, 80),
            "skipping instruction-like memory content"
        );
        return None;
    }

    let pii = detect_pii(text);
    if !pii.is_empty() {
        warn!(
            kinds = pii.join(", "),
            snippet = %snippet(text, 60),
            "PII detected in memory content"
        );
    }

    Some(text)
}

fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
