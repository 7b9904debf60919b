//! Knowledge source backends
//!
//! The cascade talks to sources through the [`KnowledgeSource`] trait. A
//! failing source raises a typed error (`SourceTimeout` / `SourceUnavailable`)
//! which the cascade absorbs; raw transport errors never cross into the core.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::types::RawHit;

/// A queryable knowledge source instance
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Return this source's top-k hits for the query. The implementation is
    /// expected to honor `timeout` for its own I/O; the cascade enforces it
    /// externally as well.
    async fn search(&self, query: &str, top_k: usize, timeout: Duration) -> Result<Vec<RawHit>>;
}

/// HTTP client for a remote vector-search instance.
///
/// Speaks a minimal JSON contract: `POST {endpoint}/search` with
/// `{"query": ..., "top_k": ...}`, answered by `{"hits": [{"content", "score"}]}`.
pub struct HttpVectorSource {
    source_id: String,
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Vec<RawHit>,
}

impl HttpVectorSource {
    pub fn new(source_id: impl Into<String>, endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(Error::NetworkError)?;
        Ok(Self {
            source_id: source_id.into(),
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl KnowledgeSource for HttpVectorSource {
    async fn search(&self, query: &str, top_k: usize, timeout: Duration) -> Result<Vec<RawHit>> {
        let url = format!("{}/search", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&SearchRequest { query, top_k })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::SourceTimeout(self.source_id.clone())
                } else {
                    Error::SourceUnavailable {
                        source_id: self.source_id.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::SourceUnavailable {
                source_id: self.source_id.clone(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let body: SearchResponse =
            response
                .json()
                .await
                .map_err(|e| Error::SourceUnavailable {
                    source_id: self.source_id.clone(),
                    reason: format!("invalid response body: {e}"),
                })?;

        debug!(source = %self.source_id, hits = body.hits.len(), "Vector source responded");
        Ok(body.hits)
    }
}

/// In-memory keyword scanner; the terminal (tier 4) fallback source.
///
/// Scores each document by the fraction of query terms it contains. Crude,
/// but it never needs the network and always answers.
#[derive(Debug, Default)]
pub struct KeywordScanSource {
    documents: Vec<String>,
}

impl KeywordScanSource {
    pub fn new(documents: impl IntoIterator<Item = String>) -> Self {
        Self {
            documents: documents.into_iter().collect(),
        }
    }

    pub fn add_document(&mut self, content: impl Into<String>) {
        self.documents.push(content.into());
    }
}

#[async_trait]
impl KnowledgeSource for KeywordScanSource {
    async fn search(&self, query: &str, top_k: usize, _timeout: Duration) -> Result<Vec<RawHit>> {
        let terms: HashSet<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<RawHit> = self
            .documents
            .iter()
            .filter_map(|doc| {
                let lower = doc.to_lowercase();
                let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count();
                if matched == 0 {
                    return None;
                }
                Some(RawHit {
                    content: doc.clone(),
                    score: matched as f64 / terms.len() as f64,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}
