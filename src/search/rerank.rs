//! Cross-encoder-style reranking over an expanded candidate pool.
//!
//! The coordinator hands this stage `candidate_multiplier × top_k`
//! candidates; pairwise (query, passage) relevance scores reorder them
//! and the first `top_k` survive. Scorer failure is absorbed here: the
//! candidates keep their fusion order instead, and the caller learns
//! about it only through [`ModeUsed`](super::ModeUsed).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::SearchResult;

/// Pairwise relevance model: scores each passage against the query.
#[async_trait]
pub trait PairwiseScorer: Send + Sync {
    /// Returns the model identifier (e.g. `"bge-reranker-base"`).
    fn model_name(&self) -> &str;

    /// Score each passage against the query, in passage order.
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f64>>;
}

/// Reranking stage over a [`PairwiseScorer`].
pub struct Reranker {
    scorer: Arc<dyn PairwiseScorer>,
    max_words: usize,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn PairwiseScorer>, max_words: usize) -> Self {
        Self { scorer, max_words }
    }

    /// Re-score and reorder candidates, returning at most `top_k`.
    ///
    /// The returned flag is `true` when the scorer failed and the
    /// pre-rerank ordering (by combined score) was used instead. This
    /// stage never propagates scorer failures.
    pub async fn rerank(
        &self,
        query_text: &str,
        candidates: Vec<SearchResult>,
        top_k: usize,
    ) -> (Vec<SearchResult>, bool) {
        if candidates.is_empty() {
            return (candidates, false);
        }

        let passages: Vec<String> = candidates
            .iter()
            .map(|c| truncate_words(&c.content, self.max_words))
            .collect();

        match self.scorer.score(query_text, &passages).await {
            Ok(scores) if scores.len() == candidates.len() => {
                let mut rescored: Vec<SearchResult> = candidates
                    .into_iter()
                    .zip(scores)
                    .map(|(mut candidate, score)| {
                        candidate.rerank_score = Some(score);
                        candidate
                    })
                    .collect();
                rescored.sort_by(|a, b| {
                    b.rerank_score
                        .partial_cmp(&a.rerank_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                rescored.truncate(top_k);
                (rescored, false)
            }
            Ok(scores) => {
                warn!(
                    "scorer returned {} scores for {} candidates; using fusion order",
                    scores.len(),
                    candidates.len()
                );
                (fallback_order(candidates, top_k), true)
            }
            Err(err) => {
                warn!("rerank model failure ({err}); using fusion order");
                (fallback_order(candidates, top_k), true)
            }
        }
    }
}

/// Pre-rerank ordering: by combined score, descending.
fn fallback_order(mut candidates: Vec<SearchResult>, top_k: usize) -> Vec<SearchResult> {
    candidates.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(top_k);
    candidates
}

/// Cap a passage at `max_words` whitespace-separated words so long
/// chunks do not exceed the scorer's input window.
fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    words[..max_words].join(" ")
}

/// HTTP scorer for TEI-style rerank endpoints.
///
/// Sends `POST {base_url}/rerank` with `{query, texts}` and expects
/// `[{index, score}, …]`. All failures map to [`Error::RerankModel`];
/// the reranker absorbs them.
pub struct HttpRerankClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct RerankDatum {
    index: usize,
    score: f64,
}

impl HttpRerankClient {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl PairwiseScorer for HttpRerankClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f64>> {
        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "texts": passages,
        });

        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::RerankModel(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::RerankModel(format!(
                "rerank API error {status}: {body_text}"
            )));
        }

        let data: Vec<RerankDatum> = response
            .json()
            .await
            .map_err(|e| Error::RerankModel(e.to_string()))?;

        if data.len() != passages.len() {
            return Err(Error::RerankModel(format!(
                "scorer returned {} scores for {} passages",
                data.len(),
                passages.len()
            )));
        }

        let mut scores = vec![0.0; passages.len()];
        for datum in data {
            if datum.index >= scores.len() {
                return Err(Error::RerankModel(format!(
                    "scorer returned out-of-range index {}",
                    datum.index
                )));
            }
            scores[datum.index] = datum.score;
        }
        Ok(scores)
    }
}
