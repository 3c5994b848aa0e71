//! Storage abstraction for the retrieval engine.
//!
//! The [`VectorIndex`] and [`RelationalStore`] traits define the narrow
//! interfaces the strategies and the ingestion pipeline operate
//! through, enabling pluggable backends (SQLite, in-memory, a remote
//! vector service) without touching strategy logic.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Chunk, Document, Source, SourceStatus};

/// Metadata constraints applied to a search, matched by equality.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub document_id: Option<String>,
    pub source_id: Option<String>,
}

/// A vector plus the payload needed to serve results without a second
/// store round-trip.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

/// Payload stored alongside each vector.
#[derive(Debug, Clone)]
pub struct VectorPayload {
    pub document_id: String,
    pub source_id: Option<String>,
    pub content: String,
    pub metadata: serde_json::Value,
}

/// A k-nearest-neighbor query.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub limit: usize,
    /// Results scoring below this are dropped inside the index.
    pub min_score: f64,
    pub filter: Option<SearchFilter>,
}

/// One scored neighbor returned from a vector query.
#[derive(Debug, Clone)]
pub struct ScoredVector {
    pub id: String,
    pub score: f64,
    pub payload: VectorPayload,
}

/// A candidate chunk returned from lexical full-text search.
///
/// `raw_rank` is the backend's native relevance value, oriented so
/// higher is better; normalization into `[0, 1]` happens at fusion.
#[derive(Debug, Clone)]
pub struct TextHit {
    pub chunk_id: String,
    pub document_id: String,
    pub raw_rank: f64,
    pub text: String,
}

/// Fixed-dimension vector store with payload metadata.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Insert or replace vectors (dimension-checked) |
/// | [`query`](VectorIndex::query) | k-NN with optional filter and score cutoff |
/// | [`delete`](VectorIndex::delete) | Remove vectors (compensation path) |
/// | [`contains`](VectorIndex::contains) | Existence probe for idempotent ingestion |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace vectors. A record whose vector length differs
    /// from the configured dimension is rejected with
    /// `Error::DimensionMismatch` before anything is written.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Query the k nearest neighbors of `query.vector`.
    async fn query(&self, query: &VectorQuery) -> Result<Vec<ScoredVector>>;

    /// Delete vectors by id. Missing ids are not an error.
    async fn delete(&self, ids: &[String]) -> Result<()>;

    /// Whether a vector with this id exists.
    async fn contains(&self, id: &str) -> Result<bool>;
}

/// Relational metadata store with a lexical full-text index.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Register a new source. Idempotent on id.
    async fn register_source(&self, source: &Source) -> Result<()>;

    /// Update a source's lifecycle status.
    async fn set_source_status(&self, source_id: &str, status: SourceStatus) -> Result<()>;

    async fn source(&self, source_id: &str) -> Result<Option<Source>>;

    /// Insert or update a document row.
    async fn upsert_document(&self, doc: &Document) -> Result<()>;

    async fn document(&self, document_id: &str) -> Result<Option<Document>>;

    /// Write a chunk row and its full-text index entry in a single
    /// transaction. Either both land or neither does.
    async fn insert_chunk(&self, chunk: &Chunk) -> Result<()>;

    /// Look up a chunk by its content hash within a document.
    async fn chunk_by_hash(&self, document_id: &str, content_hash: &str)
        -> Result<Option<Chunk>>;

    /// Ranked lexical full-text query.
    async fn fulltext_query(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<TextHit>>;

    /// Number of chunk rows stored for a document.
    async fn chunk_count(&self, document_id: &str) -> Result<u64>;
}

impl SearchFilter {
    /// Whether a payload satisfies every set constraint.
    pub fn matches(&self, document_id: &str, source_id: Option<&str>) -> bool {
        if let Some(ref want) = self.document_id {
            if want != document_id {
                return false;
            }
        }
        if let Some(ref want) = self.source_id {
            if source_id != Some(want.as_str()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = SearchFilter::default();
        assert!(filter.matches("doc-1", None));
        assert!(filter.matches("doc-2", Some("src-9")));
    }

    #[test]
    fn test_document_filter() {
        let filter = SearchFilter {
            document_id: Some("doc-1".into()),
            source_id: None,
        };
        assert!(filter.matches("doc-1", None));
        assert!(!filter.matches("doc-2", None));
    }

    #[test]
    fn test_source_filter_requires_known_source() {
        let filter = SearchFilter {
            document_id: None,
            source_id: Some("src-1".into()),
        };
        assert!(filter.matches("doc-1", Some("src-1")));
        assert!(!filter.matches("doc-1", Some("src-2")));
        assert!(!filter.matches("doc-1", None));
    }
}
