//! Memory consolidation: add, update, delete, or skip extracted facts
//! against the vector store, routed by namespace.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use sotto_core::types::Message;
use sotto_providers::{LlmProvider, LlmRequestConfig};

use super::extractor::{ExtractedFact, FactType};
use super::store::{
    ScoredEntry, VectorStore, LEARNINGS_NAMESPACE, PROJECT_NAMESPACE_PREFIX, TOOLS_NAMESPACE,
    USER_NAMESPACE,
};

/// Similarity at which a substring-compatible duplicate is skipped.
const NOOP_THRESHOLD: f32 = 0.93;
/// Nearest neighbors considered per fact.
const CANDIDATE_TOP_K: usize = 5;

/// What the consolidator did with one fact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Add,
    Update,
    Delete,
    Noop,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Noop => "noop",
        }
    }
}

/// Operation counts for one `consolidate` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsolidationMetrics {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
}

impl ConsolidationMetrics {
    /// Counts keyed by the wire names used in logs and dashboards.
    pub fn to_counts(&self) -> HashMap<&'static str, usize> {
        HashMap::from([
            ("ADD", self.added),
            ("UPDATE", self.updated),
            ("DELETE", self.deleted),
            ("NOOP", self.skipped),
        ])
    }
}

// ─────────────────────────────────────────────
// Namespace routing
// ─────────────────────────────────────────────

/// Destination namespace for a fact. Pure function of the fact's type and
/// metadata; the session namespace is the default bucket.
pub fn namespace_for_fact(fact: &ExtractedFact, session_namespace: &str) -> String {
    match fact.fact_type {
        FactType::User => USER_NAMESPACE.to_string(),
        FactType::Lesson => LEARNINGS_NAMESPACE.to_string(),
        FactType::ToolLesson => TOOLS_NAMESPACE.to_string(),
        FactType::Project => match fact.metadata.get("project_name") {
            Some(name) if !name.is_empty() => format!("{PROJECT_NAMESPACE_PREFIX}{name}"),
            _ => session_namespace.to_string(),
        },
        FactType::Generic | FactType::Preference => session_namespace.to_string(),
    }
}

// ─────────────────────────────────────────────
// MemoryConsolidator
// ─────────────────────────────────────────────

/// Decides, per fact, whether the store gains a new entry, refines an old
/// one, replaces a superseded one, or does nothing.
pub struct MemoryConsolidator {
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn LlmProvider>,
    model: String,
    candidate_threshold: f32,
}

impl MemoryConsolidator {
    pub fn new(
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        candidate_threshold: f32,
    ) -> Self {
        Self {
            store,
            provider,
            model: model.into(),
            candidate_threshold,
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Consolidate a batch of facts into their routed namespaces.
    ///
    /// Store failures (typically embedding errors) abandon the rest of the
    /// batch with a warning; consolidation is never fatal.
    pub async fn consolidate(
        &self,
        facts: &[ExtractedFact],
        session_namespace: &str,
    ) -> ConsolidationMetrics {
        let mut metrics = ConsolidationMetrics::default();

        for fact in facts {
            let namespace = namespace_for_fact(fact, session_namespace);
            match self.consolidate_one(fact, &namespace).await {
                Ok(op) => {
                    debug!(
                        namespace = %namespace,
                        op = op.as_str(),
                        "consolidated fact"
                    );
                    match op {
                        Operation::Add => metrics.added += 1,
                        Operation::Update => metrics.updated += 1,
                        Operation::Delete => {
                            metrics.deleted += 1;
                            metrics.added += 1;
                        }
                        Operation::Noop => metrics.skipped += 1,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "consolidation failed, skipping rest of batch");
                    break;
                }
            }
        }

        metrics
    }

    async fn consolidate_one(
        &self,
        fact: &ExtractedFact,
        namespace: &str,
    ) -> anyhow::Result<Operation> {
        let candidates = self
            .store
            .search(namespace, &fact.content, CANDIDATE_TOP_K)
            .await?;

        let best = candidates.first();

        if let Some(hit) = best {
            if hit.similarity >= NOOP_THRESHOLD && adds_nothing(&hit.entry.text, &fact.content) {
                return Ok(Operation::Noop);
            }

            if hit.similarity >= self.candidate_threshold {
                if refines(&hit.entry.text, &fact.content) {
                    self.store.update(&hit.entry.id, &fact.content).await?;
                    return Ok(Operation::Update);
                }
                if self.supersedes(hit, fact).await {
                    self.store.delete(&hit.entry.id).await?;
                    self.add_fact(fact, namespace).await?;
                    return Ok(Operation::Delete);
                }
            }
        }

        self.add_fact(fact, namespace).await?;
        Ok(Operation::Add)
    }

    async fn add_fact(&self, fact: &ExtractedFact, namespace: &str) -> anyhow::Result<()> {
        let mut metadata = fact.metadata.clone();
        metadata.insert("type".to_string(), fact.fact_type.as_str().to_string());
        metadata.insert("source".to_string(), fact.source.as_str().to_string());
        metadata.insert("importance".to_string(), format!("{:.2}", fact.importance));
        self.store.add(namespace, &fact.content, metadata).await?;
        Ok(())
    }

    /// Ask the LM whether the new fact negates or supersedes the stored
    /// one. Any failure or unclear answer defaults to plain ADD.
    async fn supersedes(&self, hit: &ScoredEntry, fact: &ExtractedFact) -> bool {
        let prompt = format!(
            "STORED: {}\nNEW: {}\n\n\
             Does NEW contradict or supersede STORED (same subject, changed \
             state)? Answer with exactly one word: YES or NO.",
            hit.entry.text, fact.content
        );

        let response = self
            .provider
            .chat(
                &[Message::system(prompt)],
                None,
                &self.model,
                &LlmRequestConfig::default(),
            )
            .await;

        match response.content.as_deref() {
            Some(content) if !content.starts_with("Error") => {
                content.trim().to_uppercase().starts_with("YES")
            }
            _ => false,
        }
    }
}

/// The new text carries nothing beyond the stored one: the stored entry
/// already contains it, case-insensitive.
fn adds_nothing(stored: &str, new: &str) -> bool {
    stored.to_lowercase().contains(&new.to_lowercase())
}

/// The new text extends the stored one with more detail.
fn refines(stored: &str, new: &str) -> bool {
    new.len() > stored.len() && new.to_lowercase().contains(&stored.to_lowercase())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::extractor::FactSource;
    use crate::memory::store::MemoryIndex;
    use crate::testutil::{MockProvider, StubEmbedder};

    fn fact(content: &str, fact_type: FactType) -> ExtractedFact {
        ExtractedFact::new(content, 0.8, FactSource::Llm).with_type(fact_type)
    }

    fn consolidator_with(
        provider: MockProvider,
    ) -> (MemoryConsolidator, Arc<MemoryIndex>) {
        let store = Arc::new(MemoryIndex::new(Arc::new(StubEmbedder), None));
        let consolidator = MemoryConsolidator::new(
            store.clone(),
            Arc::new(provider),
            "mock-model",
            0.80,
        );
        (consolidator, store)
    }

    // ── Namespace routing (pure) ──

    #[test]
    fn test_namespace_routing_table() {
        let session_ns = "session:42";

        assert_eq!(
            namespace_for_fact(&fact("User name is Alice", FactType::User), session_ns),
            "user"
        );
        assert_eq!(
            namespace_for_fact(&fact("Prefer Y over X", FactType::Lesson), session_ns),
            "learnings"
        );
        assert_eq!(
            namespace_for_fact(
                &fact("Avoid paths with spaces", FactType::ToolLesson),
                session_ns
            ),
            "tools"
        );
        assert_eq!(
            namespace_for_fact(
                &fact("Project uses Python", FactType::Project).with_metadata("project_name", "app"),
                session_ns
            ),
            "project:app"
        );
        assert_eq!(
            namespace_for_fact(&fact("Some fact", FactType::Generic), session_ns),
            session_ns
        );
    }

    #[test]
    fn test_project_without_name_falls_back_to_session() {
        assert_eq!(
            namespace_for_fact(&fact("Project fact", FactType::Project), "session:1"),
            "session:1"
        );
    }

    // ── Decision rule ──

    #[tokio::test]
    async fn test_fresh_fact_added() {
        let (consolidator, store) = consolidator_with(MockProvider::simple("NO"));

        let metrics = consolidator
            .consolidate(&[fact("User likes rust", FactType::Generic)], "session:1")
            .await;

        assert_eq!(metrics.added, 1);
        assert_eq!(store.count("session:1").await, 1);
    }

    #[tokio::test]
    async fn test_near_duplicate_is_noop() {
        let (consolidator, store) = consolidator_with(MockProvider::simple("NO"));

        consolidator
            .consolidate(&[fact("User likes rust", FactType::Generic)], "session:1")
            .await;
        let metrics = consolidator
            .consolidate(&[fact("User likes rust", FactType::Generic)], "session:1")
            .await;

        assert_eq!(metrics.skipped, 1);
        assert_eq!(metrics.added, 0);
        assert_eq!(store.count("session:1").await, 1);
    }

    #[tokio::test]
    async fn test_refinement_updates_in_place() {
        let (consolidator, store) = consolidator_with(MockProvider::simple("NO"));

        consolidator
            .consolidate(&[fact("User likes rust", FactType::Generic)], "session:1")
            .await;
        let metrics = consolidator
            .consolidate(
                &[fact(
                    "User likes rust and writes it daily at work",
                    FactType::Generic,
                )],
                "session:1",
            )
            .await;

        assert_eq!(metrics.updated, 1);
        assert_eq!(store.count("session:1").await, 1);
        let hits = store.search("session:1", "rust", 5).await.unwrap();
        assert!(hits[0].entry.text.contains("daily"));
    }

    #[tokio::test]
    async fn test_supersession_deletes_then_adds() {
        // The probe answers YES: the new fact replaces the stored one.
        let (consolidator, store) = consolidator_with(MockProvider::new(vec![
            crate::testutil::text_response("YES"),
        ]));

        consolidator
            .consolidate(&[fact("User drinks coffee black", FactType::Generic)], "s:1")
            .await;
        let metrics = consolidator
            .consolidate(
                &[fact("User quit coffee this month", FactType::Generic)],
                "s:1",
            )
            .await;

        assert_eq!(metrics.deleted, 1);
        assert_eq!(metrics.added, 1);
        assert_eq!(store.count("s:1").await, 1);
        let hits = store.search("s:1", "coffee", 5).await.unwrap();
        assert!(hits[0].entry.text.contains("quit"));
    }

    #[tokio::test]
    async fn test_negation_probe_failure_defaults_to_add() {
        let (consolidator, store) = consolidator_with(MockProvider::failing());

        // Store one entry by hand; the failing provider is only used for
        // the probe, not for adding.
        store
            .add("s:1", "User drinks coffee black", HashMap::new())
            .await
            .unwrap();

        let metrics = consolidator
            .consolidate(
                &[fact("User stopped drinking coffee now", FactType::Generic)],
                "s:1",
            )
            .await;

        assert_eq!(metrics.added, 1);
        assert_eq!(metrics.deleted, 0);
        assert_eq!(store.count("s:1").await, 2);
    }

    #[tokio::test]
    async fn test_facts_routed_to_distinct_namespaces() {
        let (consolidator, store) = consolidator_with(MockProvider::simple("NO"));

        let facts = vec![
            fact("User name is Alice", FactType::User),
            fact("Prefer brevity when asked twice", FactType::Lesson),
            fact("exec chokes on unquoted spaces", FactType::ToolLesson),
            fact("Project app uses Python", FactType::Project).with_metadata("project_name", "app"),
            fact("Some generic chatter detail", FactType::Generic),
        ];
        let metrics = consolidator.consolidate(&facts, "session:42").await;

        assert_eq!(metrics.added, 5);
        assert_eq!(store.count("user").await, 1);
        assert_eq!(store.count("learnings").await, 1);
        assert_eq!(store.count("tools").await, 1);
        assert_eq!(store.count("project:app").await, 1);
        assert_eq!(store.count("session:42").await, 1);
    }

    #[tokio::test]
    async fn test_added_entry_carries_typed_metadata() {
        let (consolidator, store) = consolidator_with(MockProvider::simple("NO"));

        consolidator
            .consolidate(
                &[fact("exec chokes on spaces", FactType::ToolLesson)
                    .with_metadata("tool_name", "exec")],
                "s:1",
            )
            .await;

        let hits = store.search("tools", "exec", 5).await.unwrap();
        let meta = &hits[0].entry.metadata;
        assert_eq!(meta["type"], "tool_lesson");
        assert_eq!(meta["tool_name"], "exec");
        assert!(meta.contains_key("importance"));
    }

    #[tokio::test]
    async fn test_metrics_to_counts_keys() {
        let metrics = ConsolidationMetrics {
            added: 2,
            updated: 1,
            deleted: 0,
            skipped: 3,
        };
        let counts = metrics.to_counts();
        assert_eq!(counts["ADD"], 2);
        assert_eq!(counts["UPDATE"], 1);
        assert_eq!(counts["DELETE"], 0);
        assert_eq!(counts["NOOP"], 3);
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::Add.as_str(), "add");
        assert_eq!(Operation::Update.as_str(), "update");
        assert_eq!(Operation::Delete.as_str(), "delete");
        assert_eq!(Operation::Noop.as_str(), "noop");
    }

    #[test]
    fn test_adds_nothing() {
        assert!(adds_nothing("User likes rust", "user likes rust"));
        assert!(adds_nothing("User likes rust", "likes rust"));
        assert!(!adds_nothing("User likes rust", "User likes rust and go"));
        assert!(!adds_nothing("User likes rust", "User hates go"));
    }

    #[test]
    fn test_refines() {
        assert!(refines("User likes rust", "User likes rust and go"));
        assert!(!refines("User likes rust and go", "User likes rust"));
        assert!(!refines("User likes rust", "Completely different"));
    }
}
