//! In-memory store implementations for testing.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread
//! safety. Vector search is brute-force cosine similarity over all
//! stored vectors; full-text search is term-overlap scoring over
//! whitespace-tokenized text.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{Chunk, Document, Source, SourceStatus};

use super::{
    RelationalStore, ScoredVector, SearchFilter, TextHit, VectorIndex, VectorQuery, VectorRecord,
};

/// Brute-force in-memory [`VectorIndex`].
pub struct MemoryVectorIndex {
    dims: usize,
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl MemoryVectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        for record in &records {
            if record.vector.len() != self.dims {
                return Err(Error::DimensionMismatch {
                    expected: self.dims,
                    actual: record.vector.len(),
                });
            }
        }
        let mut stored = self.records.write().unwrap();
        for record in records {
            stored.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn query(&self, query: &VectorQuery) -> Result<Vec<ScoredVector>> {
        if query.vector.len() != self.dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                actual: query.vector.len(),
            });
        }

        let stored = self.records.read().unwrap();
        let mut scored: Vec<ScoredVector> = stored
            .values()
            .filter(|record| match &query.filter {
                Some(filter) => filter.matches(
                    &record.payload.document_id,
                    record.payload.source_id.as_deref(),
                ),
                None => true,
            })
            .map(|record| ScoredVector {
                id: record.id.clone(),
                score: cosine_similarity(&query.vector, &record.vector).clamp(0.0, 1.0) as f64,
                payload: record.payload.clone(),
            })
            .filter(|sv| sv.score >= query.min_score)
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(query.limit);

        Ok(scored)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut stored = self.records.write().unwrap();
        for id in ids {
            stored.remove(id);
        }
        Ok(())
    }

    async fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.records.read().unwrap().contains_key(id))
    }
}

/// In-memory [`RelationalStore`] with naive term-overlap full-text
/// scoring.
#[derive(Default)]
pub struct MemoryStore {
    sources: RwLock<HashMap<String, Source>>,
    documents: RwLock<HashMap<String, Document>>,
    chunks: RwLock<Vec<Chunk>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn register_source(&self, source: &Source) -> Result<()> {
        self.sources
            .write()
            .unwrap()
            .insert(source.id.clone(), source.clone());
        Ok(())
    }

    async fn set_source_status(&self, source_id: &str, status: SourceStatus) -> Result<()> {
        if let Some(source) = self.sources.write().unwrap().get_mut(source_id) {
            source.status = status;
        }
        Ok(())
    }

    async fn source(&self, source_id: &str) -> Result<Option<Source>> {
        Ok(self.sources.read().unwrap().get(source_id).cloned())
    }

    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        self.documents
            .write()
            .unwrap()
            .insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn document(&self, document_id: &str) -> Result<Option<Document>> {
        Ok(self.documents.read().unwrap().get(document_id).cloned())
    }

    async fn insert_chunk(&self, chunk: &Chunk) -> Result<()> {
        let mut chunks = self.chunks.write().unwrap();
        chunks.retain(|c| c.id != chunk.id);
        chunks.push(chunk.clone());
        Ok(())
    }

    async fn chunk_by_hash(
        &self,
        document_id: &str,
        content_hash: &str,
    ) -> Result<Option<Chunk>> {
        Ok(self
            .chunks
            .read()
            .unwrap()
            .iter()
            .find(|c| c.document_id == document_id && c.content_hash == content_hash)
            .cloned())
    }

    async fn fulltext_query(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<TextHit>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let documents = self.documents.read().unwrap();
        let chunks = self.chunks.read().unwrap();

        let mut hits: Vec<TextHit> = chunks
            .iter()
            .filter(|chunk| match filter {
                Some(f) => {
                    let source_id = documents
                        .get(&chunk.document_id)
                        .map(|d| d.source_id.clone());
                    f.matches(&chunk.document_id, source_id.as_deref())
                }
                None => true,
            })
            .filter_map(|chunk| {
                let tokens = tokenize(&chunk.text);
                let overlap = terms
                    .iter()
                    .map(|term| tokens.iter().filter(|t| *t == term).count())
                    .sum::<usize>();
                if overlap == 0 {
                    return None;
                }
                Some(TextHit {
                    chunk_id: chunk.id.clone(),
                    document_id: chunk.document_id.clone(),
                    raw_rank: overlap as f64,
                    text: chunk.text.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.raw_rank
                .partial_cmp(&a.raw_rank)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);

        Ok(hits)
    }

    async fn chunk_count(&self, document_id: &str) -> Result<u64> {
        Ok(self
            .chunks
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.document_id == document_id)
            .count() as u64)
    }
}
