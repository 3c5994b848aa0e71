//! Ingestion pipeline: pre-chunked text → cached embeddings → both
//! stores, kept consistent.
//!
//! For each chunk the pipeline computes a content hash, consults the
//! relational store for an identical already-ingested chunk (idempotent
//! re-runs), embeds the misses through the batch service, and then
//! writes vector-first: a successful index upsert followed by a single
//! relational transaction for the chunk row and its full-text entry.
//! If the relational write fails after the vector landed, the vector is
//! deleted again (compensating action) so no orphaned vector survives
//! without queryable metadata.
//!
//! Chunks whose embedding failed are reported in
//! [`IngestStats::failure_reasons`] and written to neither store.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::embedding::EmbeddingService;
use crate::error::{Error, Result};
use crate::models::{
    content_hash, estimate_tokens, Chunk, ChunkInput, EmbedOutcome, IngestStats, SourceStatus,
};
use crate::store::{RelationalStore, VectorIndex, VectorPayload, VectorRecord};

pub struct IngestionPipeline {
    embedder: EmbeddingService,
    vectors: Arc<dyn VectorIndex>,
    store: Arc<dyn RelationalStore>,
}

/// Work item for a chunk that needs an embedding.
struct PendingChunk {
    input_index: usize,
    /// Existing chunk id when re-ingesting content whose row survived
    /// but whose vector is missing.
    existing_id: Option<String>,
    hash: String,
}

impl IngestionPipeline {
    pub fn new(
        embedder: EmbeddingService,
        vectors: Arc<dyn VectorIndex>,
        store: Arc<dyn RelationalStore>,
    ) -> Self {
        Self {
            embedder,
            vectors,
            store,
        }
    }

    /// Ingest pre-chunked text for an existing document.
    ///
    /// Re-running with identical content is idempotent: unchanged
    /// chunks are validated present in both stores and skipped without
    /// re-embedding. The only fatal errors are an unknown document and
    /// an embedding dimension mismatch; per-chunk failures land in the
    /// returned [`IngestStats`].
    pub async fn ingest(
        &self,
        document_id: &str,
        chunks: &[ChunkInput],
    ) -> Result<IngestStats> {
        let document = self
            .store
            .document(document_id)
            .await?
            .ok_or_else(|| Error::DocumentNotFound(document_id.to_string()))?;

        let source = self.store.source(&document.source_id).await?;
        if source.is_some() {
            self.store
                .set_source_status(&document.source_id, SourceStatus::Ingesting)
                .await?;
        }

        let mut stats = IngestStats::default();
        let mut pending: Vec<PendingChunk> = Vec::new();

        for (i, chunk) in chunks.iter().enumerate() {
            let hash = content_hash(&chunk.text);
            match self.store.chunk_by_hash(document_id, &hash).await? {
                Some(existing) => {
                    if self.vectors.contains(&existing.id).await? {
                        debug!("chunk {i} unchanged, present in both stores; skipping");
                        stats.succeeded += 1;
                        stats.cache_hits += 1;
                    } else {
                        // Row survived but the vector is gone; repair it.
                        pending.push(PendingChunk {
                            input_index: i,
                            existing_id: Some(existing.id),
                            hash,
                        });
                    }
                }
                None => pending.push(PendingChunk {
                    input_index: i,
                    existing_id: None,
                    hash,
                }),
            }
        }

        if pending.is_empty() {
            self.finish_source_status(&document.source_id, &stats).await?;
            return Ok(stats);
        }

        let texts: Vec<String> = pending
            .iter()
            .map(|p| chunks[p.input_index].text.clone())
            .collect();
        let batch = self.embedder.embed(&texts).await?;

        for (work, outcome) in pending.iter().zip(batch.outcomes.into_iter()) {
            let input = &chunks[work.input_index];
            match outcome {
                EmbedOutcome::Success(vector) => {
                    match self
                        .write_chunk(&document.id, &document.source_id, input, work, vector)
                        .await
                    {
                        Ok(()) => stats.succeeded += 1,
                        Err(Error::DimensionMismatch { expected, actual }) => {
                            return Err(Error::DimensionMismatch { expected, actual });
                        }
                        Err(err) => {
                            stats.failed += 1;
                            stats
                                .failure_reasons
                                .push(format!("chunk {}: {err}", work.input_index));
                        }
                    }
                }
                EmbedOutcome::Failure(reason) => {
                    stats.failed += 1;
                    stats
                        .failure_reasons
                        .push(format!("chunk {}: {reason}", work.input_index));
                }
            }
        }

        self.finish_source_status(&document.source_id, &stats).await?;
        Ok(stats)
    }

    /// Vector write first, then the relational transaction; undo the
    /// vector if the relational side fails.
    async fn write_chunk(
        &self,
        document_id: &str,
        source_id: &str,
        input: &ChunkInput,
        work: &PendingChunk,
        vector: Vec<f32>,
    ) -> Result<()> {
        let chunk_id = work
            .existing_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        self.vectors
            .upsert(vec![VectorRecord {
                id: chunk_id.clone(),
                vector,
                payload: VectorPayload {
                    document_id: document_id.to_string(),
                    source_id: Some(source_id.to_string()),
                    content: input.text.clone(),
                    metadata: input.metadata.clone(),
                },
            }])
            .await?;

        let chunk = Chunk {
            id: chunk_id.clone(),
            document_id: document_id.to_string(),
            text: input.text.clone(),
            token_count: estimate_tokens(&input.text),
            content_hash: work.hash.clone(),
            vector_ref: Some(chunk_id.clone()),
        };

        if let Err(err) = self.store.insert_chunk(&chunk).await {
            warn!("relational write failed after vector upsert; deleting vector {chunk_id}");
            if let Err(cleanup_err) = self.vectors.delete(&[chunk_id.clone()]).await {
                warn!("compensating vector delete failed for {chunk_id}: {cleanup_err}");
            }
            return Err(err);
        }

        Ok(())
    }

    async fn finish_source_status(&self, source_id: &str, stats: &IngestStats) -> Result<()> {
        if self.store.source(source_id).await?.is_none() {
            return Ok(());
        }
        let status = if stats.failed == 0 {
            SourceStatus::Ready
        } else {
            SourceStatus::Failed
        };
        self.store.set_source_status(source_id, status).await
    }
}
