//! Knowledge-base boundary
//!
//! Citation retrieval is best-effort: a failure adds a reason code and
//! never blocks the answer.

use crate::error::AgentError;
use crate::models::Citation;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<Citation>>;
}

/// HTTP-backed retrieval against the knowledge service.
pub struct HttpKnowledgeBase {
    client: Client,
    base_url: String,
}

impl HttpKnowledgeBase {
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("KNOWLEDGE_API_BASE_URL").ok()?;

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;

        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RetrievalResponse {
    #[serde(default)]
    hits: Vec<Citation>,
}

#[async_trait]
impl KnowledgeBase for HttpKnowledgeBase {
    async fn retrieve(
        &self,
        query: &str,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<Citation>> {
        let url = format!("{}/kb/search", self.base_url);

        let response = self
            .client
            .post(url)
            .json(&json!({ "query": query, "filters": filters }))
            .send()
            .await
            .map_err(|e| AgentError::KnowledgeError(format!("transport: {}", e)))?;

        if !response.status().is_success() {
            return Err(AgentError::KnowledgeError(format!(
                "status {}",
                response.status()
            )));
        }

        let body: RetrievalResponse = response
            .json()
            .await
            .map_err(|e| AgentError::KnowledgeError(format!("response parse: {}", e)))?;

        Ok(body.hits)
    }
}

/// Retrieval disabled; used by the demo binary and tests.
pub struct NoopKnowledge;

#[async_trait]
impl KnowledgeBase for NoopKnowledge {
    async fn retrieve(
        &self,
        _query: &str,
        _filters: &BTreeMap<String, String>,
    ) -> Result<Vec<Citation>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_returns_no_citations() {
        let kb = NoopKnowledge;
        let hits = kb.retrieve("budgeting basics", &BTreeMap::new()).await.unwrap();
        assert!(hits.is_empty());
    }
}
