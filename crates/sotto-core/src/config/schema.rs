//! Configuration schema.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case, bridged with
//! `#[serde(rename_all = "camelCase")]`. Every section defaults so a missing
//! or partial config file still yields a working engine.

use serde::{Deserialize, Serialize};

use crate::session::compaction::CompactionConfig;

// ─────────────────────────────────────────────
// Root
// ─────────────────────────────────────────────

/// Root configuration, loaded from `~/.sotto/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentDefaults,
    pub provider: ProviderConfig,
    pub memory: MemoryConfig,
    pub compaction: CompactionConfig,
    pub exec: ExecGuardConfig,
}

// ─────────────────────────────────────────────
// Agent defaults
// ─────────────────────────────────────────────

/// Default agent settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDefaults {
    /// Workspace directory (supports a leading `~`).
    pub workspace: String,
    /// LM model identifier.
    pub model: String,
    /// Maximum tokens per response.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum LM ↔ tool iterations per message.
    pub max_iterations: usize,
    /// Maximum subagents executing at once.
    pub max_concurrent_subagents: usize,
    /// Run memory extraction every N user turns.
    pub extraction_interval: usize,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            workspace: "~/.sotto/workspace".to_string(),
            model: "anthropic/claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            max_iterations: 20,
            max_concurrent_subagents: 5,
            extraction_interval: 10,
        }
    }
}

// ─────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────

/// LM provider credentials and endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: String,
    /// Custom API base URL (overrides the provider default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ─────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────

/// Long-term memory extraction and consolidation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    /// Master switch for vector memory.
    pub enabled: bool,
    /// Model used for text embeddings.
    pub embedding_model: String,
    /// Model used for fact extraction and negation probes.
    pub extraction_model: String,
    /// Similarity floor for update/supersede candidates.
    pub candidate_threshold: f32,
    /// Cap on facts per extraction pass.
    pub max_facts_per_extraction: usize,
    /// Extract and consolidate before compaction squeezes the history.
    pub enable_pre_compaction_flush: bool,
    /// Extract lessons from failing tool turns.
    pub enable_tool_lessons: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            embedding_model: "text-embedding-3-small".to_string(),
            extraction_model: "gpt-4o-mini".to_string(),
            candidate_threshold: 0.80,
            max_facts_per_extraction: 10,
            enable_pre_compaction_flush: true,
            enable_tool_lessons: true,
        }
    }
}

// ─────────────────────────────────────────────
// Exec guard
// ─────────────────────────────────────────────

/// Shell tool guard settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecGuardConfig {
    /// Per-command timeout in seconds.
    pub timeout: u64,
    /// Block commands referencing paths outside the workspace.
    pub restrict_to_workspace: bool,
    /// Extra allow patterns (regex); when set, a command must match one.
    pub allow_patterns: Vec<String>,
    /// Extra deny patterns (regex), merged with the built-ins.
    pub deny_patterns: Vec<String>,
    /// Binary allowlist; when set, only these commands may run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_commands: Option<Vec<String>>,
}

impl Default for ExecGuardConfig {
    fn default() -> Self {
        Self {
            timeout: 60,
            restrict_to_workspace: false,
            allow_patterns: Vec::new(),
            deny_patterns: Vec::new(),
            allowed_commands: None,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.agent.max_iterations, 20);
        assert_eq!(config.agent.max_concurrent_subagents, 5);
        assert_eq!(config.agent.extraction_interval, 10);
        assert_eq!(config.memory.candidate_threshold, 0.80);
        assert_eq!(config.compaction.threshold, 50);
        assert_eq!(config.exec.timeout, 60);
        assert!(!config.provider.is_configured());
    }

    #[test]
    fn test_camel_case_round_trip() {
        let json = r#"{
            "agent": {"maxIterations": 7, "maxConcurrentSubagents": 2},
            "memory": {"enablePreCompactionFlush": false},
            "exec": {"restrictToWorkspace": true}
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.agent.max_iterations, 7);
        assert_eq!(config.agent.max_concurrent_subagents, 2);
        assert!(!config.memory.enable_pre_compaction_flush);
        assert!(config.exec.restrict_to_workspace);
        // Untouched sections keep defaults.
        assert_eq!(config.compaction.threshold, 50);

        let out = serde_json::to_value(&config).unwrap();
        assert_eq!(out["agent"]["maxIterations"], 7);
        assert!(out["agent"].get("max_iterations").is_none());
    }

    #[test]
    fn test_allowed_commands_absent_by_default() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert!(json["exec"].get("allowedCommands").is_none());
    }

    #[test]
    fn test_empty_object_parses() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.agent.max_iterations, 20);
    }
}
