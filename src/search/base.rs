//! Vector-only similarity search against the [`VectorIndex`].

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{MatchType, SearchResult};
use crate::store::{SearchFilter, VectorIndex, VectorQuery};

/// The base strategy: k-nearest-neighbor search with a minimum
/// similarity cutoff.
///
/// Has no internal fallback — an unreachable index surfaces as a typed
/// error and degradation is the coordinator's responsibility.
pub struct VectorSearch {
    index: Arc<dyn VectorIndex>,
    similarity_threshold: f64,
}

impl VectorSearch {
    pub fn new(index: Arc<dyn VectorIndex>, similarity_threshold: f64) -> Self {
        Self {
            index,
            similarity_threshold,
        }
    }

    /// Query the index for `k` nearest neighbors above the similarity
    /// threshold. The cutoff is applied inside the index query.
    pub async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>> {
        let hits = self
            .index
            .query(&VectorQuery {
                vector: query_vector.to_vec(),
                limit: k,
                min_score: self.similarity_threshold,
                filter: filter.cloned(),
            })
            .await
            .map_err(|err| match err {
                // Configuration errors stay fatal.
                Error::DimensionMismatch { .. } => err,
                other => Error::BackendUnavailable {
                    backend: "vector-index",
                    message: other.to_string(),
                },
            })?;

        Ok(hits
            .into_iter()
            .map(|hit| SearchResult {
                chunk_id: hit.id,
                content: hit.payload.content,
                metadata: hit.payload.metadata,
                vector_score: Some(hit.score),
                text_score: None,
                combined_score: hit.score,
                rerank_score: None,
                match_type: MatchType::Vector,
            })
            .collect())
    }
}
