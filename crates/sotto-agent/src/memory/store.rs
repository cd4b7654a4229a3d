//! Vector-store interface and the in-process index.
//!
//! The engine only consumes the `VectorStore` trait; persistent engines are
//! adapters. `MemoryIndex` is the bundled implementation: cosine ranking
//! over an in-memory table with optional JSONL persistence, enough for
//! single-node deployments and tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Namespace for durable facts about the user.
pub const USER_NAMESPACE: &str = "user";
/// Namespace for lessons learned from user corrections.
pub const LEARNINGS_NAMESPACE: &str = "learnings";
/// Namespace for tool-failure lessons.
pub const TOOLS_NAMESPACE: &str = "tools";
/// Prefix for per-project namespaces (`project:<name>`).
pub const PROJECT_NAMESPACE_PREFIX: &str = "project:";

// ─────────────────────────────────────────────
// Entry types
// ─────────────────────────────────────────────

/// A stored memory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub namespace: String,
    pub text: String,
    /// Typed metadata (`type`, `session_key`, `tool_name`, ...).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// A search hit with its cosine similarity to the query.
#[derive(Clone, Debug)]
pub struct ScoredEntry {
    pub entry: MemoryEntry,
    pub similarity: f32,
}

// ─────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────

/// Text → vector. Implemented by the providers' embedding service and by
/// test stubs.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

#[async_trait]
impl Embedder for sotto_providers::EmbeddingService {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        sotto_providers::EmbeddingService::embed(self, texts).await
    }
}

/// The store interface the consolidator and recall block depend on.
///
/// Implementations must be safe for concurrent reads; writes are serialized
/// by the callers' discipline or an internal lock.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert a new entry; returns its id.
    async fn add(
        &self,
        namespace: &str,
        text: &str,
        metadata: HashMap<String, String>,
    ) -> anyhow::Result<String>;

    /// Replace an entry's text, keeping its id and metadata.
    async fn update(&self, id: &str, text: &str) -> anyhow::Result<()>;

    /// Remove an entry by id.
    async fn delete(&self, id: &str) -> anyhow::Result<bool>;

    /// Top-k nearest entries in one namespace.
    async fn search(
        &self,
        namespace: &str,
        query: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<ScoredEntry>>;

    /// Top-k nearest entries across several namespaces (recall block).
    async fn search_namespaces(
        &self,
        namespaces: &[String],
        query: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<ScoredEntry>>;

    /// Top-k nearest entries across the whole store (memory_search tool).
    async fn search_all(&self, query: &str, top_k: usize) -> anyhow::Result<Vec<ScoredEntry>>;

    /// Number of entries in a namespace.
    async fn count(&self, namespace: &str) -> usize;

    /// Flush and release resources.
    async fn close(&self) -> anyhow::Result<()>;
}

// ─────────────────────────────────────────────
// MemoryIndex
// ─────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    #[serde(flatten)]
    entry: MemoryEntry,
    embedding: Vec<f32>,
}

/// In-process vector index with optional JSONL persistence.
pub struct MemoryIndex {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<(MemoryEntry, Vec<f32>)>>,
    /// When set, every mutation rewrites this JSONL snapshot.
    persist_path: Option<PathBuf>,
    next_id: AtomicU64,
}

impl MemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>, persist_path: Option<PathBuf>) -> Self {
        let (entries, max_id) = load_entries(persist_path.as_deref());
        Self {
            embedder,
            entries: RwLock::new(entries),
            persist_path,
            next_id: AtomicU64::new(max_id + 1),
        }
    }

    async fn persist(&self) {
        let Some(path) = &self.persist_path else { return };
        let entries = self.entries.read().await;
        let mut out = String::new();
        for (entry, embedding) in entries.iter() {
            let record = PersistedEntry {
                entry: entry.clone(),
                embedding: embedding.clone(),
            };
            match serde_json::to_string(&record) {
                Ok(line) => {
                    out.push_str(&line);
                    out.push('\n');
                }
                Err(e) => warn!(error = %e, "failed to serialize memory entry"),
            }
        }
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, out) {
            warn!(path = %path.display(), error = %e, "failed to persist memory index");
        }
    }

    fn fresh_id(&self) -> String {
        format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn rank(
        &self,
        query: &str,
        top_k: usize,
        filter: impl Fn(&MemoryEntry) -> bool,
    ) -> anyhow::Result<Vec<ScoredEntry>> {
        let query_vec = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector"))?;

        let entries = self.entries.read().await;
        let mut scored: Vec<ScoredEntry> = entries
            .iter()
            .filter(|(entry, _)| filter(entry))
            .map(|(entry, embedding)| ScoredEntry {
                entry: entry.clone(),
                similarity: cosine_similarity(&query_vec, embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[async_trait]
impl VectorStore for MemoryIndex {
    async fn add(
        &self,
        namespace: &str,
        text: &str,
        metadata: HashMap<String, String>,
    ) -> anyhow::Result<String> {
        let embedding = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector"))?;

        let entry = MemoryEntry {
            id: self.fresh_id(),
            namespace: namespace.to_string(),
            text: text.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        let id = entry.id.clone();

        self.entries.write().await.push((entry, embedding));
        self.persist().await;
        Ok(id)
    }

    async fn update(&self, id: &str, text: &str) -> anyhow::Result<()> {
        let embedding = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector"))?;

        {
            let mut entries = self.entries.write().await;
            let slot = entries
                .iter_mut()
                .find(|(e, _)| e.id == id)
                .ok_or_else(|| anyhow::anyhow!("no memory entry with id {id}"))?;
            slot.0.text = text.to_string();
            slot.1 = embedding;
        }
        self.persist().await;
        Ok(())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let removed = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|(e, _)| e.id != id);
            entries.len() != before
        };
        if removed {
            self.persist().await;
        }
        Ok(removed)
    }

    async fn search(
        &self,
        namespace: &str,
        query: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<ScoredEntry>> {
        let ns = namespace.to_string();
        self.rank(query, top_k, move |e| e.namespace == ns).await
    }

    async fn search_namespaces(
        &self,
        namespaces: &[String],
        query: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<ScoredEntry>> {
        let set: Vec<String> = namespaces.to_vec();
        self.rank(query, top_k, move |e| set.contains(&e.namespace))
            .await
    }

    async fn search_all(&self, query: &str, top_k: usize) -> anyhow::Result<Vec<ScoredEntry>> {
        self.rank(query, top_k, |_| true).await
    }

    async fn count(&self, namespace: &str) -> usize {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(e, _)| e.namespace == namespace)
            .count()
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.persist().await;
        Ok(())
    }
}

fn load_entries(path: Option<&std::path::Path>) -> (Vec<(MemoryEntry, Vec<f32>)>, u64) {
    let Some(path) = path else {
        return (Vec::new(), 0);
    };
    if !path.exists() {
        return (Vec::new(), 0);
    }
    let Ok(content) = std::fs::read_to_string(path) else {
        warn!(path = %path.display(), "failed to read memory index");
        return (Vec::new(), 0);
    };

    let mut loaded = Vec::new();
    let mut max_id = 0u64;
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PersistedEntry>(line) {
            Ok(p) => {
                if let Some(n) = p
                    .entry
                    .id
                    .strip_prefix("mem-")
                    .and_then(|s| s.parse::<u64>().ok())
                {
                    max_id = max_id.max(n);
                }
                loaded.push((p.entry, p.embedding));
            }
            Err(e) => debug!(error = %e, "skipping corrupt memory line"),
        }
    }

    debug!(entries = loaded.len(), "loaded memory index");
    (loaded, max_id)
}

/// Cosine similarity of two vectors. Zero when either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
