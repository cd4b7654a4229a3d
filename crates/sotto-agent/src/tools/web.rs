//! Web tools — Brave search and page fetch.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::base::{optional_i64, require_string, Tool};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)";
const DEFAULT_MAX_RESULTS: usize = 5;
const FETCH_MAX_CHARS: usize = 50_000;

// ─────────────────────────────────────────────
// WebSearchTool
// ─────────────────────────────────────────────

/// Searches the web through the Brave Search API.
pub struct WebSearchTool {
    api_key: Option<String>,
    client: Client,
}

impl WebSearchTool {
    /// `api_key` falls back to the `BRAVE_API_KEY` env var when `None`.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            client: Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("BRAVE_API_KEY").ok())
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns a numbered list of results with titles, URLs, and descriptions."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The search query"},
                "count": {
                    "type": "integer",
                    "description": "Number of results (1-10, default 5)",
                    "minimum": 1,
                    "maximum": 10
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let query = require_string(&params, "query")?;
        let count = optional_i64(&params, "count")
            .map(|n| (n.max(1) as usize).min(10))
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let api_key = self.resolve_api_key().ok_or_else(|| {
            anyhow::anyhow!("No Brave API key configured (set BRAVE_API_KEY)")
        })?;

        debug!(query = %query, count = count, "searching web");

        let resp = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", &api_key)
            .query(&[("q", query.as_str()), ("count", &count.to_string())])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Search request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Search API returned {status}");
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse search response: {e}"))?;

        let results = body["web"]["results"].as_array().cloned().unwrap_or_default();
        if results.is_empty() {
            return Ok(format!("No results found for: {query}"));
        }

        let mut lines = Vec::new();
        for (i, result) in results.iter().take(count).enumerate() {
            let title = result["title"].as_str().unwrap_or("(untitled)");
            let url = result["url"].as_str().unwrap_or("");
            let description = result["description"].as_str().unwrap_or("");
            lines.push(format!("{}. {title}\n   {url}\n   {description}", i + 1));
        }
        Ok(lines.join("\n\n"))
    }
}

// ─────────────────────────────────────────────
// WebFetchTool
// ─────────────────────────────────────────────

/// Fetches a URL and reduces the HTML to readable text.
pub struct WebFetchTool {
    client: Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its text content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "The URL to fetch"}
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let url = require_string(&params, "url")?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("Only http(s) URLs are supported");
        }

        debug!(url = %url, "fetching page");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Fetch failed: {e}"))?;

        if !resp.status().is_success() {
            anyhow::bail!("Fetch returned {}", resp.status());
        }

        let body = resp
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read body: {e}"))?;

        let mut text = html_to_text(&body);
        if text.chars().count() > FETCH_MAX_CHARS {
            text = text.chars().take(FETCH_MAX_CHARS).collect();
            text.push_str("\n... (truncated)");
        }
        Ok(text)
    }
}

/// Strip tags, scripts, and styles; collapse the remaining whitespace.
fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 4);
    let mut in_tag = false;
    let mut tag_buf = String::new();
    // Set while inside a <script> or <style> block.
    let mut skipping: Option<String> = None;

    for c in html.chars() {
        if in_tag {
            if c == '>' {
                in_tag = false;
                let inner = tag_buf.trim();
                let closing = inner.starts_with('/');
                let name = inner
                    .trim_start_matches('/')
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .to_lowercase();

                match &skipping {
                    Some(block) if closing && name == *block => skipping = None,
                    None if name == "script" || name == "style" => skipping = Some(name),
                    _ => {}
                }
                out.push(' ');
            } else if tag_buf.len() < 64 {
                tag_buf.push(c);
            }
        } else if c == '<' {
            in_tag = true;
            tag_buf.clear();
        } else if skipping.is_none() {
            out.push(c);
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
