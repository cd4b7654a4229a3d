//! Memory search tool — semantic recall over the vector store, with
//! optional time-range and type filters.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Utc};
use regex::Regex;
use serde_json::{json, Value};

use super::base::{optional_i64, optional_string, require_string, Tool};
use crate::memory::store::{ScoredEntry, VectorStore};

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 20;

/// Parse a time-range keyword into a cutoff timestamp.
///
/// Supports `today`, `this_week`, `this_month`, and `last_N_days`.
fn parse_time_range(time_range: &str) -> Option<DateTime<Utc>> {
    let now = Utc::now();
    let lower = time_range.trim().to_lowercase();

    let midnight = |dt: DateTime<Utc>| {
        dt.date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
    };

    match lower.as_str() {
        "today" => midnight(now),
        "this_week" => {
            let days_back = now.weekday().num_days_from_monday() as i64;
            midnight(now - Duration::days(days_back))
        }
        "this_month" => now
            .date_naive()
            .with_day(1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc()),
        _ => {
            let re = Regex::new(r"^last_(\d+)_days?$").ok()?;
            let caps = re.captures(&lower)?;
            let days: i64 = caps[1].parse().ok()?;
            Some(now - Duration::days(days))
        }
    }
}

// ─────────────────────────────────────────────
// MemorySearchTool
// ─────────────────────────────────────────────

/// Search extracted facts and past-conversation memories.
pub struct MemorySearchTool {
    store: Arc<dyn VectorStore>,
}

impl MemorySearchTool {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    fn format_results(query: &str, results: &[ScoredEntry]) -> String {
        if results.is_empty() {
            return format!("No memories found matching: {query}");
        }

        let mut output = vec![format!("Found {} relevant memories:\n", results.len())];
        for (i, result) in results.iter().enumerate() {
            let entry_type = result
                .entry
                .metadata
                .get("type")
                .map(|s| s.as_str())
                .unwrap_or("conversation");

            output.push(format!(
                "--- Memory {} (similarity: {:.2}) ---",
                i + 1,
                result.similarity
            ));
            output.push(format!("Type: {entry_type}"));
            output.push(format!("Namespace: {}", result.entry.namespace));
            output.push(format!(
                "Date: {}",
                result.entry.created_at.format("%Y-%m-%d")
            ));
            let text: String = result.entry.text.chars().take(500).collect();
            let ellipsis = if result.entry.text.chars().count() > 500 {
                "..."
            } else {
                ""
            };
            output.push(format!("Content: {text}{ellipsis}"));
            output.push(String::new());
        }
        output.join("\n")
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search past conversations and extracted facts from memory. Use \
         this to recall user preferences, decisions, or context from \
         previous sessions. Supports time and type filters."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What you're looking for; be specific"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum results (default 5)",
                    "minimum": 1,
                    "maximum": 20
                },
                "time_range": {
                    "type": "string",
                    "description": "Optional: 'today', 'this_week', 'this_month', or 'last_N_days'"
                },
                "type_filter": {
                    "type": "string",
                    "description": "Filter by memory type (e.g. 'user', 'lesson') or 'all'"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let query = require_string(&params, "query")?;
        let limit = optional_i64(&params, "limit")
            .map(|n| (n.max(1) as usize).min(MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT);
        let time_range = optional_string(&params, "time_range");
        let type_filter = optional_string(&params, "type_filter").filter(|t| t != "all");

        let mut results = match self.store.search_all(&query, limit).await {
            Ok(results) => results,
            Err(e) => return Ok(format!("Error searching memory: {e}")),
        };

        if let Some(range) = &time_range {
            if let Some(after) = parse_time_range(range) {
                results.retain(|r| r.entry.created_at >= after);
            }
        }
        if let Some(wanted) = &type_filter {
            results.retain(|r| r.entry.metadata.get("type") == Some(wanted));
        }

        if results.is_empty() {
            let mut filters = Vec::new();
            if let Some(range) = &time_range {
                filters.push(format!("time_range={range}"));
            }
            if let Some(wanted) = &type_filter {
                filters.push(format!("type={wanted}"));
            }
            let filter_str = if filters.is_empty() {
                String::new()
            } else {
                format!(" (filters: {})", filters.join(", "))
            };
            return Ok(format!("No memories found matching: {query}{filter_str}"));
        }

        Ok(Self::format_results(&query, &results))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
