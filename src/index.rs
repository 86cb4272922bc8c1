//! Vector index clients.
//!
//! The herb knowledge base lives in a managed nearest-neighbour index. The
//! clinic only ever queries it: a symptom vector goes in, the top-K herbs
//! (with their metadata) come back in descending score order.
//!
//! - **[`PineconeIndex`]**: Pinecone data-plane `query`, with the index host
//!   resolved once through the control plane when not configured.
//! - **[`MemoryIndex`]**: brute-force cosine search over a JSON file of
//!   precomputed vectors, for offline runs and tests.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::embedding::cosine_similarity;
use crate::http::{self, ApiError};
use crate::models::{HerbRecord, IndexMatch};
use crate::secrets::{Secrets, PINECONE_API_KEY};

const SERVICE: &str = "pinecone";
const API_VERSION: &str = "2024-07";

/// A nearest-neighbour index over herb vectors.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `top_k` matches for `vector`, best first.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>>;
}

// ============ Pinecone ============

pub struct PineconeIndex {
    client: reqwest::Client,
    name: String,
    control_url: String,
    namespace: Option<String>,
    api_key: String,
    max_retries: u32,
    host: OnceCell<String>,
}

impl PineconeIndex {
    pub fn new(config: &IndexConfig, api_key: String) -> Result<Self> {
        let host = OnceCell::new();
        if let Some(h) = &config.host {
            // Cannot fail on a fresh cell.
            let _ = host.set(http::with_scheme(h));
        }
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            name: config.name.clone(),
            control_url: config.control_url.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone(),
            api_key,
            max_retries: config.max_retries,
            host,
        })
    }

    /// Data-plane base URL, asking the control plane on first use.
    async fn host(&self) -> Result<&str, ApiError> {
        self.host
            .get_or_try_init(|| async {
                let url = format!("{}/indexes/{}", self.control_url, self.name);
                let response = http::send_with_retry(SERVICE, self.max_retries, || {
                    self.client
                        .get(&url)
                        .header("Api-Key", &self.api_key)
                        .header("X-Pinecone-API-Version", API_VERSION)
                })
                .await?;
                let json = http::json_body(SERVICE, response).await?;
                let host = json
                    .get("host")
                    .and_then(|h| h.as_str())
                    .ok_or_else(|| ApiError::malformed(SERVICE, "index description has no host"))?;
                info!(index = %self.name, host, "resolved index host");
                Ok::<String, ApiError>(http::with_scheme(host))
            })
            .await
            .map(String::as_str)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>> {
        let url = format!("{}/query", self.host().await?);

        let mut body = json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        });
        if let Some(ns) = &self.namespace {
            body["namespace"] = json!(ns);
        }

        let response = http::send_with_retry(SERVICE, self.max_retries, || {
            self.client
                .post(&url)
                .header("Api-Key", &self.api_key)
                .header("X-Pinecone-API-Version", API_VERSION)
                .json(&body)
        })
        .await?;

        let json = http::json_body(SERVICE, response).await?;
        let matches = parse_query_response(&json)?;
        debug!(index = %self.name, matches = matches.len(), "index query complete");
        Ok(matches)
    }
}

/// Parse a Pinecone `query` response into ranked matches.
fn parse_query_response(json: &serde_json::Value) -> Result<Vec<IndexMatch>, ApiError> {
    let matches = json
        .get("matches")
        .and_then(|m| m.as_array())
        .ok_or_else(|| ApiError::malformed(SERVICE, "missing matches array"))?;

    let mut out: Vec<IndexMatch> = matches
        .iter()
        .map(|m| IndexMatch {
            id: m
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            score: m.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32,
            herb: m
                .get("metadata")
                .map(HerbRecord::from_metadata)
                .unwrap_or_default(),
        })
        .collect();

    out.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(out)
}

// ============ In-memory ============

/// One stored vector in a [`MemoryIndex`] data file.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

pub struct MemoryIndex {
    records: Vec<MemoryRecord>,
}

impl MemoryIndex {
    pub fn new(records: Vec<MemoryRecord>) -> Self {
        Self { records }
    }

    /// Load a JSON array of `{ "id", "values", "metadata" }` objects.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read index file: {}", path.display()))?;
        let records: Vec<MemoryRecord> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse index file: {}", path.display()))?;
        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>> {
        let mut scored: Vec<IndexMatch> = self
            .records
            .iter()
            .map(|r| IndexMatch {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.values),
                herb: HerbRecord::from_metadata(&r.metadata),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }
}

/// Create the configured [`VectorIndex`].
pub fn create_index(config: &IndexConfig, secrets: &Secrets) -> Result<Arc<dyn VectorIndex>> {
    match config.provider.as_str() {
        "pinecone" => {
            let key = secrets.require(PINECONE_API_KEY)?;
            Ok(Arc::new(PineconeIndex::new(config, key)?))
        }
        "memory" => {
            let path = config
                .path
                .as_ref()
                .context("index.path must be set when index.provider is 'memory'")?;
            let index = MemoryIndex::load(path)?;
            info!(records = index.len(), path = %path.display(), "loaded in-memory index");
            Ok(Arc::new(index))
        }
        other => bail!("Unknown index provider: {}", other),
    }
}
