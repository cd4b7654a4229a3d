//! Filesystem tools — read, write, edit, and list, with optional
//! confinement to an allowed root directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{require_string, Tool};

/// Resolve a user-supplied path, enforcing the allowed root when set.
///
/// Paths are canonicalized when they (or their parent) exist so `..`
/// segments cannot escape the root.
fn resolve_path(path: &str, allowed_root: Option<&Path>) -> anyhow::Result<PathBuf> {
    let expanded = sotto_core::utils::expand_home(path);

    let resolved = if expanded.exists() {
        expanded.canonicalize().unwrap_or(expanded)
    } else if let Some(parent) = expanded.parent().filter(|p| p.exists()) {
        let canon_parent = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
        match expanded.file_name() {
            Some(name) => canon_parent.join(name),
            None => expanded,
        }
    } else {
        expanded
    };

    if let Some(root) = allowed_root {
        let canon_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        if !resolved.starts_with(&canon_root) {
            anyhow::bail!(
                "Access denied: path '{}' is outside allowed directory '{}'",
                resolved.display(),
                canon_root.display()
            );
        }
    }

    Ok(resolved)
}

// ─────────────────────────────────────────────
// ReadFileTool
// ─────────────────────────────────────────────

pub struct ReadFileTool {
    allowed_root: Option<PathBuf>,
}

impl ReadFileTool {
    pub fn new(allowed_root: Option<PathBuf>) -> Self {
        Self { allowed_root }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the file to read"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path = resolve_path(&require_string(&params, "path")?, self.allowed_root.as_deref())?;

        if !path.is_file() {
            anyhow::bail!("File not found: {}", path.display());
        }

        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))
    }
}

// ─────────────────────────────────────────────
// WriteFileTool
// ─────────────────────────────────────────────

pub struct WriteFileTool {
    allowed_root: Option<PathBuf>,
}

impl WriteFileTool {
    pub fn new(allowed_root: Option<PathBuf>) -> Self {
        Self { allowed_root }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it (and parent directories) if \
         needed, overwriting if it exists."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path for the file"},
                "content": {"type": "string", "description": "Content to write"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path = resolve_path(&require_string(&params, "path")?, self.allowed_root.as_deref())?;
        let content = require_string(&params, "content")?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    anyhow::anyhow!("Failed to create directory {}: {e}", parent.display())
                })?;
            }
        }

        let bytes = content.len();
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;
        Ok(format!("Wrote {bytes} bytes to {}", path.display()))
    }
}

// ─────────────────────────────────────────────
// EditFileTool
// ─────────────────────────────────────────────

pub struct EditFileTool {
    allowed_root: Option<PathBuf>,
}

impl EditFileTool {
    pub fn new(allowed_root: Option<PathBuf>) -> Self {
        Self { allowed_root }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing the first occurrence of old_text with \
         new_text. Include enough surrounding context in old_text to make \
         the match unique."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the file to edit"},
                "old_text": {"type": "string", "description": "Exact text to find"},
                "new_text": {"type": "string", "description": "Replacement text"}
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path = resolve_path(&require_string(&params, "path")?, self.allowed_root.as_deref())?;
        let old_text = require_string(&params, "old_text")?;
        let new_text = require_string(&params, "new_text")?;

        if !path.is_file() {
            anyhow::bail!("File not found: {}", path.display());
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;

        let count = content.matches(&old_text).count();
        if count == 0 {
            anyhow::bail!("old_text not found in {}", path.display());
        }

        let updated = content.replacen(&old_text, &new_text, 1);
        tokio::fs::write(&path, updated)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;

        if count > 1 {
            Ok(format!(
                "Warning: old_text appears {count} times; replaced the first occurrence in {}",
                path.display()
            ))
        } else {
            Ok(format!("Edited {}", path.display()))
        }
    }
}

// ─────────────────────────────────────────────
// ListDirTool
// ─────────────────────────────────────────────

pub struct ListDirTool {
    allowed_root: Option<PathBuf>,
}

impl ListDirTool {
    pub fn new(allowed_root: Option<PathBuf>) -> Self {
        Self { allowed_root }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the contents of a directory, marking subdirectories with a trailing slash."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the directory"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path = resolve_path(&require_string(&params, "path")?, self.allowed_root.as_deref())?;

        if !path.is_dir() {
            anyhow::bail!("Not a directory: {}", path.display());
        }

        let mut entries: Vec<String> = Vec::new();
        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list {}: {e}", path.display()))?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                entries.push(format!("{name}/"));
            } else {
                entries.push(name);
            }
        }

        entries.sort();
        if entries.is_empty() {
            Ok("(empty directory)".to_string())
        } else {
            Ok(entries.join("\n"))
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
