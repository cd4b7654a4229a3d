//! Long-term memory: injection filtering, fact extraction, consolidation,
//! the vector-store interface, the core scratchpad, and the entity graph.

pub mod consolidator;
pub mod core;
pub mod daily;
pub mod entities;
pub mod extractor;
pub mod filters;
pub mod store;

pub use consolidator::{ConsolidationMetrics, MemoryConsolidator, Operation};
pub use self::core::CoreMemory;
pub use daily::FileMemory;
pub use entities::{Entity, EntityStore, EntityView, GraphStats, RelationView};
pub use extractor::{ExtractedFact, ExtractionMetrics, FactSource, FactType, MemoryExtractor};
pub use store::{
    Embedder, MemoryEntry, MemoryIndex, ScoredEntry, VectorStore, LEARNINGS_NAMESPACE,
    PROJECT_NAMESPACE_PREFIX, TOOLS_NAMESPACE, USER_NAMESPACE,
};
