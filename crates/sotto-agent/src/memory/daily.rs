//! File-based agent memory: a long-term `MEMORY.md` plus dated daily
//! notes, folded into the system prompt by the context builder. The agent
//! writes these itself through the filesystem tools; the vector store is
//! the machine-curated complement.

use std::path::{Path, PathBuf};

use chrono::Utc;

/// Long-term memory and daily notes under `workspace/memory/`.
pub struct FileMemory {
    memory_dir: PathBuf,
    memory_file: PathBuf,
}

impl FileMemory {
    /// A handle without touching the filesystem; reads on a missing
    /// directory return empty strings.
    pub fn new(workspace: &Path) -> Self {
        let memory_dir = workspace.join("memory");
        let memory_file = memory_dir.join("MEMORY.md");
        Self {
            memory_dir,
            memory_file,
        }
    }

    pub fn memory_file(&self) -> &Path {
        &self.memory_file
    }

    pub fn memory_dir(&self) -> &Path {
        &self.memory_dir
    }

    /// Long-term memory contents; empty when absent.
    pub fn read_long_term(&self) -> String {
        std::fs::read_to_string(&self.memory_file).unwrap_or_default()
    }

    /// Today's notes; empty when absent.
    pub fn read_today(&self) -> String {
        std::fs::read_to_string(self.today_file()).unwrap_or_default()
    }

    fn today_file(&self) -> PathBuf {
        let today = Utc::now().format("%Y-%m-%d");
        self.memory_dir.join(format!("{today}.md"))
    }

    /// Memory section for the system prompt; `None` when both files are
    /// empty.
    pub fn prompt_section(&self) -> Option<String> {
        let mut sections = Vec::new();

        let long_term = self.read_long_term();
        if !long_term.trim().is_empty() {
            sections.push(format!("## Long-term Memory\n\n{long_term}"));
        }

        let today = self.read_today();
        if !today.trim().is_empty() {
            let date = Utc::now().format("%Y-%m-%d");
            sections.push(format!("## Today's Notes ({date})\n\n{today}"));
        }

        if sections.is_empty() {
            None
        } else {
            Some(format!("# Memory\n\n{}", sections.join("\n\n")))
        }
    }
}
