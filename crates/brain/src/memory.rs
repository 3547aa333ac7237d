//! Long-term memory retrieval.
//!
//! The vector store is an external collaborator; the brain only speaks this
//! small search interface. Retrieval failures degrade to "no memories" so a
//! down collaborator never blocks a turn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use bs_domain::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub id: String,
    #[serde(default = "d_category")]
    pub category: String,
    pub content: String,
}

fn d_category() -> String {
    "general".into()
}

#[async_trait]
pub trait MemoryRetriever: Send + Sync {
    /// Top-K semantic search over long-term memories.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<MemoryHit>>;
}

/// Retriever backed by the vector-store collaborator's HTTP API.
pub struct HttpMemoryRetriever {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMemoryRetriever {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<MemoryHit>,
}

#[async_trait]
impl MemoryRetriever for HttpMemoryRetriever {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<MemoryHit>> {
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .timeout(std::time::Duration::from_secs(5))
            .json(&serde_json::json!({"query": query, "top_k": top_k}))
            .send()
            .await
            .map_err(|e| bs_domain::Error::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(bs_domain::Error::Transient(format!(
                "memory search returned HTTP {}",
                resp.status().as_u16()
            )));
        }
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| bs_domain::Error::Transient(e.to_string()))?;
        Ok(body.hits)
    }
}

/// No-op retriever used when no vector store is configured.
pub struct NoopMemoryRetriever;

#[async_trait]
impl MemoryRetriever for NoopMemoryRetriever {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<MemoryHit>> {
        Ok(Vec::new())
    }
}
