//! Hybrid search: concurrent vector + lexical retrieval with score
//! fusion.
//!
//! # Fusion algorithm
//!
//! 1. Run the vector strategy and the lexical full-text query
//!    concurrently, joined under one deadline.
//! 2. Normalize lexical ranks into `[0, 1]` with min-max normalization
//!    (all-equal sets normalize to `1.0`); vector similarities are
//!    already in `[0, 1]`.
//! 3. Join on chunk id: chunks seen by both channels get
//!    `match_type = Both`; a channel that missed a chunk contributes
//!    `0` to the weighted sum and leaves its score absent.
//! 4. `combined = vector_weight · v + text_weight · t`.
//! 5. Sort descending by combined score, truncate to `k`.
//!
//! A failed sub-query degrades to the healthy channel instead of
//! failing the call; only both channels failing (or the deadline
//! elapsing) surfaces an error for the coordinator to handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::RetrievalConfig;
use crate::error::{Error, Result};
use crate::models::{MatchType, SearchResult};
use crate::store::{RelationalStore, SearchFilter, TextHit};

use super::base::VectorSearch;

/// Which channels actually contributed to a hybrid result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionOutcome {
    Fused,
    VectorOnly,
    TextOnly,
}

pub struct HybridSearch {
    base: VectorSearch,
    store: Arc<dyn RelationalStore>,
    vector_weight: f64,
    text_weight: f64,
    candidate_pool: usize,
    timeout: Duration,
}

impl HybridSearch {
    pub fn new(
        base: VectorSearch,
        store: Arc<dyn RelationalStore>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            base,
            store,
            vector_weight: config.vector_weight,
            text_weight: config.text_weight,
            candidate_pool: config.candidate_pool,
            timeout: Duration::from_millis(config.search_timeout_ms),
        }
    }

    /// Run both channels and fuse.
    ///
    /// Returns the ranked results plus a [`FusionOutcome`] describing
    /// which channels served, so the coordinator can report degradation.
    pub async fn search(
        &self,
        query_text: &str,
        query_vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<(Vec<SearchResult>, FusionOutcome)> {
        let pool = self.candidate_pool.max(k);

        // Each sub-query owns its private result list; they only meet
        // at this join barrier.
        let (vector_result, text_result) = tokio::time::timeout(self.timeout, async {
            tokio::join!(
                self.base.search(query_vector, pool, filter),
                self.store.fulltext_query(query_text, pool, filter),
            )
        })
        .await
        .map_err(|_| Error::Timeout(self.timeout))?;

        match (vector_result, text_result) {
            (Ok(vector_hits), Ok(text_hits)) => {
                Ok((self.fuse(vector_hits, text_hits, k), FusionOutcome::Fused))
            }
            (Ok(mut vector_hits), Err(text_err)) => {
                warn!("fulltext channel unavailable ({text_err}); degrading to vector-only");
                vector_hits.truncate(k);
                Ok((vector_hits, FusionOutcome::VectorOnly))
            }
            (Err(vector_err), Ok(text_hits)) => {
                if matches!(vector_err, Error::DimensionMismatch { .. }) {
                    return Err(vector_err);
                }
                warn!("vector channel unavailable ({vector_err}); degrading to text-only");
                Ok((text_only_results(text_hits, k), FusionOutcome::TextOnly))
            }
            (Err(vector_err), Err(text_err)) => Err(Error::BackendUnavailable {
                backend: "hybrid",
                message: format!("vector: {vector_err}; fulltext: {text_err}"),
            }),
        }
    }

    fn fuse(
        &self,
        vector_hits: Vec<SearchResult>,
        text_hits: Vec<TextHit>,
        k: usize,
    ) -> Vec<SearchResult> {
        let normalized_text = normalize_ranks(&text_hits);

        let mut merged: HashMap<String, SearchResult> = HashMap::new();

        for hit in vector_hits {
            let v = hit.vector_score.unwrap_or(0.0);
            merged.insert(
                hit.chunk_id.clone(),
                SearchResult {
                    combined_score: self.vector_weight * v,
                    ..hit
                },
            );
        }

        for (hit, t) in normalized_text {
            match merged.get_mut(&hit.chunk_id) {
                Some(existing) => {
                    let v = existing.vector_score.unwrap_or(0.0);
                    existing.text_score = Some(t);
                    existing.match_type = MatchType::Both;
                    existing.combined_score = self.vector_weight * v + self.text_weight * t;
                }
                None => {
                    merged.insert(
                        hit.chunk_id.clone(),
                        SearchResult {
                            chunk_id: hit.chunk_id.clone(),
                            content: hit.text.clone(),
                            metadata: serde_json::json!({}),
                            vector_score: None,
                            text_score: Some(t),
                            combined_score: self.text_weight * t,
                            rerank_score: None,
                            match_type: MatchType::Text,
                        },
                    );
                }
            }
        }

        let mut results: Vec<SearchResult> = merged.into_values().collect();
        results.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k);
        results
    }
}

/// Build results from the lexical channel alone (vector channel down).
fn text_only_results(text_hits: Vec<TextHit>, k: usize) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = normalize_ranks(&text_hits)
        .into_iter()
        .map(|(hit, t)| SearchResult {
            chunk_id: hit.chunk_id.clone(),
            content: hit.text.clone(),
            metadata: serde_json::json!({}),
            vector_score: None,
            text_score: Some(t),
            combined_score: t,
            rerank_score: None,
            match_type: MatchType::Text,
        })
        .collect();
    results.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(k);
    results
}

/// Min-max normalize raw lexical ranks to `[0.0, 1.0]`.
///
/// If all ranks are equal, they normalize to `1.0`.
fn normalize_ranks(hits: &[TextHit]) -> Vec<(&TextHit, f64)> {
    if hits.is_empty() {
        return Vec::new();
    }

    let min = hits
        .iter()
        .map(|h| h.raw_rank)
        .fold(f64::INFINITY, f64::min);
    let max = hits
        .iter()
        .map(|h| h.raw_rank)
        .fold(f64::NEG_INFINITY, f64::max);

    hits.iter()
        .map(|hit| {
            let norm = if (max - min).abs() < f64::EPSILON {
                1.0
            } else {
                (hit.raw_rank - min) / (max - min)
            };
            (hit, norm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::models::{Chunk, Document, Source, SourceStatus};
    use crate::store::memory::{MemoryStore, MemoryVectorIndex};
    use crate::store::{VectorIndex, VectorPayload, VectorRecord};
    use async_trait::async_trait;

    fn hit(chunk_id: &str, rank: f64) -> TextHit {
        TextHit {
            chunk_id: chunk_id.to_string(),
            document_id: "doc-1".to_string(),
            raw_rank: rank,
            text: format!("text {chunk_id}"),
        }
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_ranks(&[]).is_empty());
    }

    #[test]
    fn test_normalize_range() {
        let hits = vec![hit("a", 10.0), hit("b", 5.0), hit("c", 0.0)];
        let normalized = normalize_ranks(&hits);
        assert!((normalized[0].1 - 1.0).abs() < 1e-9);
        assert!((normalized[1].1 - 0.5).abs() < 1e-9);
        assert!((normalized[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        let hits = vec![hit("a", 3.0), hit("b", 3.0)];
        for (_, score) in normalize_ranks(&hits) {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }

    async fn seeded_backends() -> (Arc<MemoryVectorIndex>, Arc<MemoryStore>) {
        let index = Arc::new(MemoryVectorIndex::new(2));
        let store = Arc::new(MemoryStore::new());

        store
            .register_source(&Source {
                id: "src-1".into(),
                source_type: crate::models::SourceType::Upload,
                uri: "file:///a".into(),
                status: SourceStatus::Ready,
                created_at: 0,
            })
            .await
            .unwrap();
        store
            .upsert_document(&Document {
                id: "doc-1".into(),
                source_id: "src-1".into(),
                title: None,
                created_at: 0,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();

        // "alpha" matches both channels, "beta" only vector,
        // "gamma" only text.
        for (id, text, vector) in [
            ("alpha", "shared term rust", Some(vec![1.0f32, 0.0])),
            ("beta", "nothing lexical here", Some(vec![0.9, 0.4358899])),
            ("gamma", "rust rust rust", None),
        ] {
            store
                .insert_chunk(&Chunk {
                    id: id.into(),
                    document_id: "doc-1".into(),
                    text: text.into(),
                    token_count: 3,
                    content_hash: id.into(),
                    vector_ref: vector.as_ref().map(|_| id.to_string()),
                })
                .await
                .unwrap();
            if let Some(v) = vector {
                index
                    .upsert(vec![VectorRecord {
                        id: id.into(),
                        vector: v,
                        payload: VectorPayload {
                            document_id: "doc-1".into(),
                            source_id: Some("src-1".into()),
                            content: text.into(),
                            metadata: serde_json::json!({}),
                        },
                    }])
                    .await
                    .unwrap();
            }
        }

        (index, store)
    }

    fn config() -> RetrievalConfig {
        RetrievalConfig::default()
    }

    #[tokio::test]
    async fn test_fused_scores_and_match_types() {
        let (index, store) = seeded_backends().await;
        let hybrid = HybridSearch::new(
            VectorSearch::new(index, 0.05),
            store,
            &config(),
        );

        let (results, outcome) = hybrid
            .search("rust", &[1.0, 0.0], 10, None)
            .await
            .unwrap();
        assert_eq!(outcome, FusionOutcome::Fused);

        let by_id: HashMap<&str, &SearchResult> = results
            .iter()
            .map(|r| (r.chunk_id.as_str(), r))
            .collect();

        let alpha = by_id["alpha"];
        assert_eq!(alpha.match_type, MatchType::Both);
        let expected =
            0.7 * alpha.vector_score.unwrap() + 0.3 * alpha.text_score.unwrap();
        assert!((alpha.combined_score - expected).abs() < 1e-9);

        let beta = by_id["beta"];
        assert_eq!(beta.match_type, MatchType::Vector);
        assert!(beta.text_score.is_none());
        assert!((beta.combined_score - 0.7 * beta.vector_score.unwrap()).abs() < 1e-9);

        let gamma = by_id["gamma"];
        assert_eq!(gamma.match_type, MatchType::Text);
        assert!(gamma.vector_score.is_none());
        assert!((gamma.combined_score - 0.3 * gamma.text_score.unwrap()).abs() < 1e-9);

        // Sorted non-increasing by combined score.
        for pair in results.windows(2) {
            assert!(pair[0].combined_score >= pair[1].combined_score);
        }
    }

    struct DownStore;

    #[async_trait]
    impl RelationalStore for DownStore {
        async fn register_source(&self, _s: &Source) -> Result<()> {
            unreachable!()
        }
        async fn set_source_status(&self, _id: &str, _s: SourceStatus) -> Result<()> {
            unreachable!()
        }
        async fn source(&self, _id: &str) -> Result<Option<Source>> {
            unreachable!()
        }
        async fn upsert_document(&self, _d: &Document) -> Result<()> {
            unreachable!()
        }
        async fn document(&self, _id: &str) -> Result<Option<Document>> {
            unreachable!()
        }
        async fn insert_chunk(&self, _c: &Chunk) -> Result<()> {
            unreachable!()
        }
        async fn chunk_by_hash(&self, _d: &str, _h: &str) -> Result<Option<Chunk>> {
            unreachable!()
        }
        async fn fulltext_query(
            &self,
            _q: &str,
            _l: usize,
            _f: Option<&SearchFilter>,
        ) -> Result<Vec<TextHit>> {
            Err(Error::BackendUnavailable {
                backend: "fulltext",
                message: "index corrupt".into(),
            })
        }
        async fn chunk_count(&self, _d: &str) -> Result<u64> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_lexical_failure_degrades_to_vector_only() {
        let (index, _) = seeded_backends().await;
        let hybrid = HybridSearch::new(
            VectorSearch::new(index, 0.05),
            Arc::new(DownStore),
            &config(),
        );

        let (results, outcome) = hybrid
            .search("rust", &[1.0, 0.0], 10, None)
            .await
            .unwrap();
        assert_eq!(outcome, FusionOutcome::VectorOnly);
        assert!(!results.is_empty());
        for result in &results {
            assert_eq!(result.match_type, MatchType::Vector);
            assert_eq!(result.combined_score, result.vector_score.unwrap());
        }
    }

    #[tokio::test]
    async fn test_vector_failure_degrades_to_text_only() {
        use crate::store::{ScoredVector, VectorQuery};

        struct DownIndex;

        #[async_trait]
        impl VectorIndex for DownIndex {
            async fn upsert(&self, _r: Vec<VectorRecord>) -> Result<()> {
                unreachable!()
            }
            async fn query(&self, _q: &VectorQuery) -> Result<Vec<ScoredVector>> {
                Err(Error::Provider {
                    message: "down".into(),
                    retryable: true,
                })
            }
            async fn delete(&self, _ids: &[String]) -> Result<()> {
                unreachable!()
            }
            async fn contains(&self, _id: &str) -> Result<bool> {
                unreachable!()
            }
        }

        let (_, store) = seeded_backends().await;
        let hybrid = HybridSearch::new(
            VectorSearch::new(Arc::new(DownIndex), 0.05),
            store,
            &config(),
        );

        let (results, outcome) = hybrid
            .search("rust", &[1.0, 0.0], 10, None)
            .await
            .unwrap();
        assert_eq!(outcome, FusionOutcome::TextOnly);
        assert!(!results.is_empty());
        for result in &results {
            assert_eq!(result.match_type, MatchType::Text);
            assert!(result.vector_score.is_none());
        }
    }

    #[tokio::test]
    async fn test_deadline_produces_typed_timeout() {
        struct SlowStore;

        #[async_trait]
        impl RelationalStore for SlowStore {
            async fn register_source(&self, _s: &Source) -> Result<()> {
                unreachable!()
            }
            async fn set_source_status(&self, _id: &str, _s: SourceStatus) -> Result<()> {
                unreachable!()
            }
            async fn source(&self, _id: &str) -> Result<Option<Source>> {
                unreachable!()
            }
            async fn upsert_document(&self, _d: &Document) -> Result<()> {
                unreachable!()
            }
            async fn document(&self, _id: &str) -> Result<Option<Document>> {
                unreachable!()
            }
            async fn insert_chunk(&self, _c: &Chunk) -> Result<()> {
                unreachable!()
            }
            async fn chunk_by_hash(&self, _d: &str, _h: &str) -> Result<Option<Chunk>> {
                unreachable!()
            }
            async fn fulltext_query(
                &self,
                _q: &str,
                _l: usize,
                _f: Option<&SearchFilter>,
            ) -> Result<Vec<TextHit>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Vec::new())
            }
            async fn chunk_count(&self, _d: &str) -> Result<u64> {
                unreachable!()
            }
        }

        let (index, _) = seeded_backends().await;
        let mut cfg = config();
        cfg.search_timeout_ms = 20;
        let hybrid = HybridSearch::new(
            VectorSearch::new(index, 0.05),
            Arc::new(SlowStore),
            &cfg,
        );

        let err = hybrid
            .search("rust", &[1.0, 0.0], 10, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
