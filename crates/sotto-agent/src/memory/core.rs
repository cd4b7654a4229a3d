//! Core memory — a small section-addressable scratchpad that is always
//! visible in the agent's context.
//!
//! Unlike the vector store (machine-curated) and the markdown files
//! (agent-curated prose), core memory is a hard-capped set of named
//! sections the agent maintains through dedicated tools. The cap keeps it
//! small enough to inline into every system prompt.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Total character budget across all sections (names + contents).
pub const CORE_MEMORY_LIMIT: usize = 2000;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Section {
    name: String,
    content: String,
}

/// Persistent, section-addressable scratchpad.
///
/// Stored as `workspace/memory/core_memory.json`; sections keep their
/// insertion order. Thread-safe behind a mutex, never held across awaits.
pub struct CoreMemory {
    path: PathBuf,
    sections: Mutex<Vec<Section>>,
}

impl CoreMemory {
    pub fn new(workspace: &Path) -> Self {
        let path = workspace.join("memory").join("core_memory.json");
        let sections = load_sections(&path);
        Self {
            path,
            sections: Mutex::new(sections),
        }
    }

    /// Read all sections, or one by name.
    pub fn read(&self, section: Option<&str>) -> String {
        let sections = self.sections.lock().unwrap();

        match section {
            Some(name) => sections
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.content.clone())
                .unwrap_or_else(|| format!("Section '{name}' does not exist.")),
            None => {
                if sections.is_empty() {
                    "Core memory is empty.".to_string()
                } else {
                    sections
                        .iter()
                        .map(|s| format!("## {}\n{}", s.name, s.content))
                        .collect::<Vec<_>>()
                        .join("\n\n")
                }
            }
        }
    }

    /// Replace a section's content, creating the section if needed.
    /// Empty content removes the section.
    ///
    /// Returns a confirmation with the character budget, or an error
    /// string when the update would exceed the cap.
    pub fn update(&self, section: &str, content: &str) -> String {
        let mut sections = self.sections.lock().unwrap();

        let prospective: usize = sections
            .iter()
            .filter(|s| s.name != section)
            .map(|s| s.name.len() + s.content.len())
            .sum::<usize>()
            + if content.is_empty() {
                0
            } else {
                section.len() + content.len()
            };

        if prospective > CORE_MEMORY_LIMIT {
            return format!(
                "Error: Core memory limit exceeded ({prospective}/{CORE_MEMORY_LIMIT} chars). \
                 Trim other sections first."
            );
        }

        if content.is_empty() {
            sections.retain(|s| s.name != section);
        } else {
            match sections.iter_mut().find(|s| s.name == section) {
                Some(existing) => existing.content = content.to_string(),
                None => sections.push(Section {
                    name: section.to_string(),
                    content: content.to_string(),
                }),
            }
        }

        self.persist(&sections);
        let verb = if content.is_empty() { "Cleared" } else { "Updated" };
        format!("{verb} core memory section '{section}' ({prospective}/{CORE_MEMORY_LIMIT} chars used)")
    }

    /// Used character budget.
    pub fn used_chars(&self) -> usize {
        self.sections
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.name.len() + s.content.len())
            .sum()
    }

    /// Section for the system prompt; `None` when empty.
    pub fn prompt_section(&self) -> Option<String> {
        let sections = self.sections.lock().unwrap();
        if sections.is_empty() {
            return None;
        }
        let body = sections
            .iter()
            .map(|s| format!("## {}\n{}", s.name, s.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        Some(format!(
            "# Core Memory\n\n\
             Your persistent scratchpad. Update it with the \
             core_memory_update tool.\n\n{body}"
        ))
    }

    fn persist(&self, sections: &[Section]) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(sections) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    warn!(path = %self.path.display(), error = %e, "failed to persist core memory");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize core memory"),
        }
    }
}

fn load_sections(path: &Path) -> Vec<Section> {
    if !path.exists() {
        return Vec::new();
    }
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(sections) => sections,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid core memory file, starting empty");
                Vec::new()
            }
        },
        Err(e) => {
            debug!(path = %path.display(), error = %e, "could not read core memory");
            Vec::new()
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
