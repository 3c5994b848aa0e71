//! Strategy coordination: selection, candidate expansion, and graceful
//! degradation.
//!
//! The coordinator holds an ordered fallback chain — rerank over
//! {hybrid | vector}, hybrid over vector — driven by an immutable
//! [`RetrievalConfig`] captured at construction. Every call reports the
//! strategies that actually executed via [`ModeUsed`].

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::RetrievalConfig;
use crate::error::{Error, Result};
use crate::models::SearchResult;
use crate::store::{RelationalStore, SearchFilter, VectorIndex};

use super::base::VectorSearch;
use super::hybrid::{FusionOutcome, HybridSearch};
use super::rerank::{PairwiseScorer, Reranker};
use super::{ModeUsed, RetrievalMode};

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    /// Query text, used by the lexical channel and the reranker.
    pub query_text: &'a str,
    /// Pre-computed query embedding.
    pub query_vector: &'a [f32],
    /// Number of results to return.
    pub k: usize,
    /// Optional metadata constraints.
    pub filter: Option<SearchFilter>,
    /// Caller-supplied deadline for the whole call, including nested
    /// sub-queries. Falls back to the configured search timeout.
    pub deadline: Option<Duration>,
}

/// Final ranked results plus the mode that actually executed.
#[derive(Debug)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub mode: ModeUsed,
}

pub struct RagCoordinator {
    base: VectorSearch,
    hybrid: HybridSearch,
    reranker: Option<Reranker>,
    config: RetrievalConfig,
}

impl std::fmt::Debug for RagCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RagCoordinator {
    /// Build the strategy chain from backends and configuration.
    ///
    /// Fails fast if `use_reranking` is set without a scorer.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn RelationalStore>,
        scorer: Option<Arc<dyn PairwiseScorer>>,
        config: RetrievalConfig,
    ) -> Result<Self> {
        if config.use_reranking && scorer.is_none() {
            return Err(Error::Config(
                "use_reranking requires a pairwise scorer".into(),
            ));
        }

        let base = VectorSearch::new(Arc::clone(&index), config.similarity_threshold);
        let hybrid = HybridSearch::new(
            VectorSearch::new(index, config.similarity_threshold),
            store,
            &config,
        );
        let reranker = scorer.map(|s| Reranker::new(s, config.rerank_max_words));

        Ok(Self {
            base,
            hybrid,
            reranker,
            config,
        })
    }

    /// Run a search through the configured strategy chain.
    pub async fn search(&self, req: &SearchRequest<'_>) -> Result<SearchOutcome> {
        match req.deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.search_inner(req))
                .await
                .map_err(|_| Error::Timeout(deadline))?,
            None => self.search_inner(req).await,
        }
    }

    async fn search_inner(&self, req: &SearchRequest<'_>) -> Result<SearchOutcome> {
        let k = req.k;
        // Candidate expansion: reranking quality improves with a larger
        // input pool.
        let pool_k = if self.config.use_reranking {
            k.saturating_mul(self.config.candidate_multiplier)
        } else {
            k
        };
        let filter = req.filter.as_ref();

        let (results, retrieval) = if self.config.use_hybrid {
            match self
                .hybrid
                .search(req.query_text, req.query_vector, pool_k, filter)
                .await
            {
                Ok((results, FusionOutcome::Fused)) => (results, RetrievalMode::Hybrid),
                Ok((results, FusionOutcome::VectorOnly)) => {
                    (results, RetrievalMode::VectorDegraded)
                }
                Ok((results, FusionOutcome::TextOnly)) => {
                    (results, RetrievalMode::TextDegraded)
                }
                Err(err) if err.is_degradable() => {
                    warn!("hybrid search unavailable ({err}); retrying vector-only");
                    let results = self.base.search(req.query_vector, pool_k, filter).await?;
                    (results, RetrievalMode::VectorDegraded)
                }
                Err(err) => return Err(err),
            }
        } else {
            let results = self.base.search(req.query_vector, pool_k, filter).await?;
            (results, RetrievalMode::Vector)
        };

        let (mut results, reranked, rerank_fallback) =
            match (&self.reranker, self.config.use_reranking) {
                (Some(reranker), true) => {
                    let (results, fallback) =
                        reranker.rerank(req.query_text, results, k).await;
                    (results, true, fallback)
                }
                _ => (results, false, false),
            };

        results.truncate(k);

        Ok(SearchOutcome {
            results,
            mode: ModeUsed {
                retrieval,
                reranked,
                rerank_fallback,
            },
        })
    }
}
