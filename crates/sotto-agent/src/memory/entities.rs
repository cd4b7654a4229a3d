//! Entity store — a lightweight knowledge graph of named entities and
//! relations between them.
//!
//! The vector store answers "what was said"; the graph answers "how things
//! connect" (who works on which project, what a project depends on).
//! Entities are unique by name; attributes merge on upsert; relations are
//! unique per (source, relation, target) triple. The engine feeds the
//! graph from typed facts during consolidation, and external surfaces
//! (dashboards, adapters) query it through this API.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::extractor::{ExtractedFact, FactType};

/// A stored entity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
struct RelationRecord {
    source: String,
    relation: String,
    target: String,
    created_at: DateTime<Utc>,
}

/// A relation as seen from one entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationView {
    pub relation: String,
    /// The entity on the other end.
    pub target: String,
    /// "outgoing" or "incoming".
    pub direction: &'static str,
}

/// An entity together with its relations.
#[derive(Clone, Debug)]
pub struct EntityView {
    pub entity: Entity,
    pub relations: Vec<RelationView>,
}

/// Entity and relation counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relation_count: usize,
}

#[derive(Default, Serialize, Deserialize)]
struct GraphData {
    entities: Vec<Entity>,
    relations: Vec<RelationRecord>,
}

// ─────────────────────────────────────────────
// EntityStore
// ─────────────────────────────────────────────

/// In-process knowledge graph with JSON persistence at
/// `<dir>/entities.json`. Safe for concurrent reads; writes are
/// serialized behind the lock.
pub struct EntityStore {
    path: PathBuf,
    data: RwLock<GraphData>,
}

impl EntityStore {
    pub fn new(dir: &Path) -> Self {
        let path = dir.join("entities.json");
        let data = load_graph(&path);
        Self {
            path,
            data: RwLock::new(data),
        }
    }

    // ────────────── Writes ──────────────

    /// Insert or update an entity. Attributes merge on update; the type
    /// is replaced.
    pub fn upsert_entity(
        &self,
        name: &str,
        entity_type: &str,
        attributes: HashMap<String, String>,
    ) {
        let now = Utc::now();
        let mut data = self.data.write().unwrap();

        match data.entities.iter_mut().find(|e| e.name == name) {
            Some(entity) => {
                entity.entity_type = entity_type.to_string();
                entity.attributes.extend(attributes);
                entity.updated_at = now;
                debug!(entity = name, "updated entity");
            }
            None => {
                data.entities.push(Entity {
                    name: name.to_string(),
                    entity_type: entity_type.to_string(),
                    attributes,
                    created_at: now,
                    updated_at: now,
                });
                debug!(entity = name, "created entity");
            }
        }

        self.persist(&data);
    }

    /// Add a relation between two entities, creating unknown-typed
    /// entities for missing endpoints. Returns false when the triple
    /// already exists.
    pub fn add_relation(&self, source: &str, relation: &str, target: &str) -> bool {
        let now = Utc::now();
        let mut data = self.data.write().unwrap();

        for endpoint in [source, target] {
            if !data.entities.iter().any(|e| e.name == endpoint) {
                data.entities.push(Entity {
                    name: endpoint.to_string(),
                    entity_type: "unknown".to_string(),
                    attributes: HashMap::new(),
                    created_at: now,
                    updated_at: now,
                });
            }
        }

        let exists = data
            .relations
            .iter()
            .any(|r| r.source == source && r.relation == relation && r.target == target);
        if exists {
            debug!(source, relation, target, "relation already exists");
            return false;
        }

        data.relations.push(RelationRecord {
            source: source.to_string(),
            relation: relation.to_string(),
            target: target.to_string(),
            created_at: now,
        });
        debug!(source, relation, target, "added relation");

        self.persist(&data);
        true
    }

    /// Remove an entity and every relation touching it. Returns whether
    /// it existed.
    pub fn remove_entity(&self, name: &str) -> bool {
        let mut data = self.data.write().unwrap();
        let before = data.entities.len();
        data.entities.retain(|e| e.name != name);
        if data.entities.len() == before {
            return false;
        }

        data.relations
            .retain(|r| r.source != name && r.target != name);
        debug!(entity = name, "removed entity");
        self.persist(&data);
        true
    }

    // ────────────── Queries ──────────────

    /// An entity with all its relations, or `None`.
    pub fn query_entity(&self, name: &str) -> Option<EntityView> {
        let data = self.data.read().unwrap();
        let entity = data.entities.iter().find(|e| e.name == name)?.clone();
        let relations = relations_for(&data, name);
        Some(EntityView { entity, relations })
    }

    /// Entities whose name contains `query` (case-insensitive), newest
    /// update first.
    pub fn search_entities(&self, query: &str, limit: usize) -> Vec<Entity> {
        let needle = query.to_lowercase();
        let data = self.data.read().unwrap();

        let mut matches: Vec<Entity> = data
            .entities
            .iter()
            .filter(|e| e.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        matches.truncate(limit);
        matches
    }

    /// All relations touching an entity.
    pub fn get_relations(&self, name: &str) -> Vec<RelationView> {
        let data = self.data.read().unwrap();
        relations_for(&data, name)
    }

    pub fn get_stats(&self) -> GraphStats {
        let data = self.data.read().unwrap();
        GraphStats {
            entity_count: data.entities.len(),
            relation_count: data.relations.len(),
        }
    }

    // ────────────── Fact intake ──────────────

    /// Record graph structure from typed facts: user facts enrich the
    /// `user` entity, project facts enrich their project entity and link
    /// it to the user.
    pub fn record_facts(&self, facts: &[ExtractedFact]) {
        for fact in facts {
            match fact.fact_type {
                FactType::User => {
                    self.upsert_entity(
                        "user",
                        "person",
                        HashMap::from([("latest_fact".to_string(), fact.content.clone())]),
                    );
                }
                FactType::Project => {
                    let Some(project) = fact
                        .metadata
                        .get("project_name")
                        .filter(|name| !name.is_empty())
                    else {
                        continue;
                    };
                    self.upsert_entity(
                        project,
                        "project",
                        HashMap::from([("latest_fact".to_string(), fact.content.clone())]),
                    );
                    self.add_relation("user", "works_on", project);
                }
                _ => {}
            }
        }
    }

    fn persist(&self, data: &GraphData) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(data) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    warn!(path = %self.path.display(), error = %e, "failed to persist entity graph");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize entity graph"),
        }
    }
}

fn relations_for(data: &GraphData, name: &str) -> Vec<RelationView> {
    let mut relations = Vec::new();
    for record in &data.relations {
        if record.source == name {
            relations.push(RelationView {
                relation: record.relation.clone(),
                target: record.target.clone(),
                direction: "outgoing",
            });
        }
        if record.target == name {
            relations.push(RelationView {
                relation: record.relation.clone(),
                target: record.source.clone(),
                direction: "incoming",
            });
        }
    }
    relations
}

fn load_graph(path: &Path) -> GraphData {
    if !path.exists() {
        return GraphData::default();
    }
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid entity graph file, starting empty");
                GraphData::default()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read entity graph");
            GraphData::default()
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
