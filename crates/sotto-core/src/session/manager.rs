//! Session store with in-memory caching and append-only JSONL persistence.
//!
//! File format: `<sessions_dir>/{safe_key}.jsonl`
//! - Line 1: `{"_type":"metadata","created_at":"...","updated_at":"...","metadata":{}}`
//! - Line 2+: one chat message per line
//!
//! `add_message` appends only the turns past the persisted watermark, so a
//! long session never rewrites its whole file. A corrupt tail line (partial
//! write) is skipped on load.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{Message, Session};
use crate::utils;

/// Metadata header written as the first line of each session file.
#[derive(Debug, Serialize, Deserialize)]
struct SessionMetadata {
    #[serde(rename = "_type")]
    record_type: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

// ─────────────────────────────────────────────
// SessionManager
// ─────────────────────────────────────────────

/// Manages conversation sessions. Thread-safe: shared reads, exclusive
/// writes, with disk appends serialized behind the cache lock.
pub struct SessionManager {
    sessions_dir: PathBuf,
    /// Cached sessions plus the count of messages already on disk.
    cache: RwLock<HashMap<String, CachedSession>>,
}

struct CachedSession {
    session: Session,
    persisted_len: usize,
}

impl SessionManager {
    /// Create a session manager. `sessions_dir` defaults to
    /// `~/.sotto/sessions/`; the directory is created if missing.
    pub fn new(sessions_dir: Option<PathBuf>) -> std::io::Result<Self> {
        let dir = sessions_dir.unwrap_or_else(utils::get_sessions_path);
        std::fs::create_dir_all(&dir)?;
        Ok(SessionManager {
            sessions_dir: dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Get an existing session or create a new empty one.
    ///
    /// Checks the cache, then disk, then creates. Sessions are created
    /// lazily on first reference.
    pub fn get_or_create(&self, key: &str) -> Session {
        {
            let cache = self.cache.read().unwrap();
            if let Some(cached) = cache.get(key) {
                return cached.session.clone();
            }
        }

        let (session, persisted_len) = match self.load_from_disk(key) {
            Some(s) => {
                let len = s.messages.len();
                (s, len)
            }
            None => (Session::new(key), 0),
        };

        let mut cache = self.cache.write().unwrap();
        cache.insert(
            key.to_string(),
            CachedSession {
                session: session.clone(),
                persisted_len,
            },
        );
        session
    }

    /// Append a message to a session and persist it.
    pub fn add_message(&self, key: &str, message: Message) {
        // Warm the cache from disk before taking the write lock.
        self.get_or_create(key);

        let mut cache = self.cache.write().unwrap();
        let cached = cache.entry(key.to_string()).or_insert_with(|| CachedSession {
            session: Session::new(key),
            persisted_len: 0,
        });
        cached.session.messages.push(message);
        cached.session.updated_at = Utc::now();

        if let Err(e) = self.persist(cached) {
            warn!(session = key, error = %e, "failed to persist session");
        }
    }

    /// The last `max_messages` turns, LM-formatted, safe to mutate.
    pub fn get_history(&self, key: &str, max_messages: usize) -> Vec<Message> {
        let session = self.get_or_create(key);
        let len = session.messages.len();
        if len <= max_messages {
            session.messages
        } else {
            session.messages[len - max_messages..].to_vec()
        }
    }

    /// The full history of a session.
    pub fn get_full_history(&self, key: &str) -> Vec<Message> {
        self.get_or_create(key).messages
    }

    /// Clear all messages in a session (full rewrite).
    pub fn clear(&self, key: &str) {
        let mut cache = self.cache.write().unwrap();
        let cached = cache.entry(key.to_string()).or_insert_with(|| CachedSession {
            session: Session::new(key),
            persisted_len: 0,
        });
        cached.session.messages.clear();
        cached.session.updated_at = Utc::now();
        cached.persisted_len = 0;

        if let Err(e) = self.rewrite(&cached.session) {
            warn!(session = key, error = %e, "failed to persist cleared session");
        }
    }

    /// Delete a session from cache and disk. Returns whether a file existed.
    pub fn delete(&self, key: &str) -> bool {
        {
            let mut cache = self.cache.write().unwrap();
            cache.remove(key);
        }

        let path = self.session_path(key);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(error = %e, "failed to delete session file");
                return false;
            }
            debug!(path = %path.display(), "deleted session file");
            true
        } else {
            false
        }
    }

    /// List sessions on disk, newest first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();

        let entries = match std::fs::read_dir(&self.sessions_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to read sessions directory");
                return summaries;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "jsonl") {
                continue;
            }

            let Ok(file) = std::fs::File::open(&path) else {
                continue;
            };
            let reader = std::io::BufReader::new(file);
            let Some(Ok(line)) = reader.lines().next() else {
                continue;
            };
            let Ok(meta) = serde_json::from_str::<SessionMetadata>(&line) else {
                continue;
            };

            // Appends don't touch the header, so prefer the file mtime.
            let updated_at = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from)
                .unwrap_or(meta.updated_at);

            let key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.replacen('_', ":", 1))
                .unwrap_or_default();

            summaries.push(SessionSummary {
                key,
                created_at: meta.created_at,
                updated_at,
                path: path.clone(),
            });
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    // ────────────── Persistence ──────────────

    fn session_path(&self, key: &str) -> PathBuf {
        let safe_key = utils::safe_filename(&key.replace(':', "_"));
        self.sessions_dir.join(format!("{safe_key}.jsonl"))
    }

    /// Append unpersisted messages; falls back to a full write for new files.
    fn persist(&self, cached: &mut CachedSession) -> std::io::Result<()> {
        let path = self.session_path(&cached.session.key);

        if !path.exists() || cached.persisted_len == 0 {
            self.rewrite(&cached.session)?;
            cached.persisted_len = cached.session.messages.len();
            return Ok(());
        }

        let mut file = std::fs::OpenOptions::new().append(true).open(&path)?;
        for msg in &cached.session.messages[cached.persisted_len..] {
            writeln!(file, "{}", serde_json::to_string(msg)?)?;
        }
        cached.persisted_len = cached.session.messages.len();
        Ok(())
    }

    /// Write the whole session file: metadata header, then one message per line.
    fn rewrite(&self, session: &Session) -> std::io::Result<()> {
        let path = self.session_path(&session.key);
        let mut file = std::fs::File::create(&path)?;

        let meta = SessionMetadata {
            record_type: "metadata".to_string(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            metadata: session.metadata.clone(),
        };
        writeln!(file, "{}", serde_json::to_string(&meta)?)?;
        for msg in &session.messages {
            writeln!(file, "{}", serde_json::to_string(msg)?)?;
        }
        Ok(())
    }

    fn load_from_disk(&self, key: &str) -> Option<Session> {
        let path = self.session_path(key);
        if !path.exists() {
            return None;
        }

        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open session file");
                return None;
            }
        };

        let reader = std::io::BufReader::new(file);
        let mut session = Session::new(key);
        let mut messages = Vec::new();

        for line in reader.lines() {
            let Ok(line) = line else { continue };
            if line.trim().is_empty() {
                continue;
            }

            if let Ok(meta) = serde_json::from_str::<SessionMetadata>(&line) {
                if meta.record_type == "metadata" {
                    session.created_at = meta.created_at;
                    session.updated_at = meta.updated_at;
                    session.metadata = meta.metadata;
                    continue;
                }
            }

            match serde_json::from_str::<Message>(&line) {
                Ok(msg) => messages.push(msg),
                // Partial writes leave a corrupt tail; skip it.
                Err(e) => debug!(session = key, error = %e, "skipping corrupt session line"),
            }
        }

        session.messages = messages;
        debug!(
            session = key,
            messages = session.messages.len(),
            "loaded session from disk"
        );
        Some(session)
    }
}

/// Summary record for session listings.
#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub path: PathBuf,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_manager() -> (SessionManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let mgr = SessionManager::new(Some(dir.path().to_path_buf())).unwrap();
        (mgr, dir)
    }

    #[test]
    fn test_get_or_create_new() {
        let (mgr, _dir) = make_manager();
        let session = mgr.get_or_create("cli:direct");
        assert_eq!(session.key, "cli:direct");
        assert!(session.messages.is_empty());
    }

    #[test]
    fn test_add_message_and_history() {
        let (mgr, _dir) = make_manager();
        mgr.add_message("t:1", Message::user("hello"));
        mgr.add_message("t:1", Message::assistant("hi there!"));

        let history = mgr.get_history("t:1", 50);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_get_history_caps_length() {
        let (mgr, _dir) = make_manager();
        for i in 0..10 {
            mgr.add_message("t:1", Message::user(format!("msg {i}")));
        }

        let history = mgr.get_history("t:1", 3);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].text(), Some("msg 7"));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();
        {
            let mgr = SessionManager::new(Some(dir.path().to_path_buf())).unwrap();
            mgr.add_message("chat:42", Message::user("Hello"));
            mgr.add_message("chat:42", Message::assistant("Hi! How can I help?"));
        }
        {
            let mgr = SessionManager::new(Some(dir.path().to_path_buf())).unwrap();
            let session = mgr.get_or_create("chat:42");
            assert_eq!(session.messages.len(), 2);
        }
    }

    #[test]
    fn test_save_appends_instead_of_rewriting() {
        let dir = tempdir().unwrap();
        let mgr = SessionManager::new(Some(dir.path().to_path_buf())).unwrap();

        mgr.add_message("t:1", Message::user("first"));
        let path = dir.path().join("t_1.jsonl");
        let after_first = std::fs::read_to_string(&path).unwrap();

        mgr.add_message("t:1", Message::assistant("second"));
        let after_second = std::fs::read_to_string(&path).unwrap();

        // The earlier content is a strict prefix: appended, not rewritten.
        assert!(after_second.starts_with(&after_first));
        assert_eq!(after_second.trim().lines().count(), 3); // metadata + 2 turns
    }

    #[test]
    fn test_corrupt_tail_line_skipped() {
        let dir = tempdir().unwrap();
        {
            let mgr = SessionManager::new(Some(dir.path().to_path_buf())).unwrap();
            mgr.add_message("t:1", Message::user("good turn"));
            mgr.add_message("t:1", Message::assistant("also good"));
        }

        // Simulate a partial write at the tail.
        let path = dir.path().join("t_1.jsonl");
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"role\":\"assist").unwrap();
        drop(file);

        let mgr = SessionManager::new(Some(dir.path().to_path_buf())).unwrap();
        let session = mgr.get_or_create("t:1");
        assert_eq!(session.messages.len(), 2);
    }

    #[test]
    fn test_file_format() {
        let dir = tempdir().unwrap();
        let mgr = SessionManager::new(Some(dir.path().to_path_buf())).unwrap();
        mgr.add_message("cli:local", Message::user("test message"));

        let content = std::fs::read_to_string(dir.path().join("cli_local.jsonl")).unwrap();
        let lines: Vec<&str> = content.trim().lines().collect();
        assert_eq!(lines.len(), 2);

        let meta: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(meta["_type"], "metadata");
        let msg: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(msg["role"], "user");
    }

    #[test]
    fn test_clear() {
        let (mgr, _dir) = make_manager();
        mgr.add_message("t:1", Message::user("hello"));
        mgr.clear("t:1");
        assert!(mgr.get_or_create("t:1").messages.is_empty());
    }

    #[test]
    fn test_delete() {
        let (mgr, _dir) = make_manager();
        mgr.add_message("t:1", Message::user("hello"));
        assert!(mgr.delete("t:1"));
        assert!(!mgr.delete("t:1"));
        assert!(mgr.get_or_create("t:1").messages.is_empty());
    }

    #[test]
    fn test_list_sessions() {
        let (mgr, _dir) = make_manager();
        mgr.add_message("a:1", Message::user("x"));
        mgr.add_message("b:2", Message::user("y"));

        let sessions = mgr.list_sessions();
        assert_eq!(sessions.len(), 2);
        let keys: Vec<&str> = sessions.iter().map(|s| s.key.as_str()).collect();
        assert!(keys.contains(&"a:1"));
        assert!(keys.contains(&"b:2"));
    }

    #[test]
    fn test_sessions_independent() {
        let (mgr, _dir) = make_manager();
        mgr.add_message("a:1", Message::user("hello a"));
        mgr.add_message("b:2", Message::user("hello b"));
        mgr.add_message("b:2", Message::user("again"));

        assert_eq!(mgr.get_history("a:1", 50).len(), 1);
        assert_eq!(mgr.get_history("b:2", 50).len(), 2);
    }
}
