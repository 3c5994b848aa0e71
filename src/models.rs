//! Core data models used throughout the engine.
//!
//! These types represent the sources, documents, chunks, embedding
//! outcomes, and search results that flow through the ingestion and
//! retrieval pipeline.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Approximate characters-per-token ratio used for token estimates.
const CHARS_PER_TOKEN: usize = 4;

/// Where a source's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Upload,
    Crawl,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Upload => "upload",
            SourceType::Crawl => "crawl",
        }
    }

    pub fn parse(s: &str) -> Option<SourceType> {
        match s {
            "upload" => Some(SourceType::Upload),
            "crawl" => Some(SourceType::Crawl),
            _ => None,
        }
    }
}

/// Lifecycle of a registered source.
///
/// Sources are never deleted while documents reference them; status is
/// the only mutable field after registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Registered,
    Ingesting,
    Ready,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Registered => "registered",
            SourceStatus::Ingesting => "ingesting",
            SourceStatus::Ready => "ready",
            SourceStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<SourceStatus> {
        match s {
            "registered" => Some(SourceStatus::Registered),
            "ingesting" => Some(SourceStatus::Ingesting),
            "ready" => Some(SourceStatus::Ready),
            "failed" => Some(SourceStatus::Failed),
            _ => None,
        }
    }
}

/// A registered content source (an upload or a crawl target).
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub source_type: SourceType,
    pub uri: String,
    pub status: SourceStatus,
    pub created_at: i64,
}

impl Source {
    /// New source in the `Registered` state, stamped with the current
    /// time.
    pub fn new(source_type: SourceType, uri: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_type,
            uri: uri.into(),
            status: SourceStatus::Registered,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// A document owned by a source. Immutable once chunks exist, except
/// metadata edits.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source_id: String,
    pub title: Option<String>,
    pub created_at: i64,
    pub metadata: serde_json::Value,
}

impl Document {
    pub fn new(
        source_id: impl Into<String>,
        title: Option<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            title,
            created_at: chrono::Utc::now().timestamp(),
            metadata,
        }
    }
}

/// A pre-chunked unit of text handed in by the parsing stage.
#[derive(Debug, Clone)]
pub struct ChunkInput {
    pub text: String,
    pub metadata: serde_json::Value,
}

/// A stored chunk.
///
/// `vector_ref` is `Some` only after a vector was successfully written
/// to the index; a chunk whose embedding failed keeps `None` rather
/// than pointing at a zero or garbage vector.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub token_count: i64,
    pub content_hash: String,
    pub vector_ref: Option<String>,
}

/// Which retrieval channel(s) produced a search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Vector,
    Text,
    Both,
}

/// A ranked search result.
///
/// `vector_score` and `text_score` are normalized into `[0, 1]` before
/// `combined_score` is computed; a channel that did not see the chunk
/// leaves its score absent.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub content: String,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_score: Option<f64>,
    pub combined_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
    pub match_type: MatchType,
}

/// Why an input could not be embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedFailure {
    /// Transient rate limiting persisted past the retry budget.
    RateLimited { attempts: u32 },
    /// The provider account ran out of quota mid-run.
    QuotaExhausted,
    /// Any other terminal provider failure.
    Provider(String),
}

impl std::fmt::Display for EmbedFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedFailure::RateLimited { attempts } => {
                write!(f, "rate limited after {attempts} attempts")
            }
            EmbedFailure::QuotaExhausted => write!(f, "quota exhausted"),
            EmbedFailure::Provider(msg) => write!(f, "provider failure: {msg}"),
        }
    }
}

/// Outcome for one input of an embedding batch.
#[derive(Debug, Clone)]
pub enum EmbedOutcome {
    Success(Vec<f32>),
    Failure(EmbedFailure),
}

impl EmbedOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, EmbedOutcome::Success(_))
    }
}

/// Per-input outcomes of an embedding run, in input order.
///
/// `outcomes.len()` always equals the number of inputs. Once quota
/// exhaustion is observed, every not-yet-started input is recorded as a
/// failure without being sent to the provider.
#[derive(Debug)]
pub struct EmbeddingBatchResult {
    pub outcomes: Vec<EmbedOutcome>,
}

impl EmbeddingBatchResult {
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.len() - self.successes()
    }
}

/// Summary of one `ingest` call.
///
/// `cache_hits` counts chunks that were already present in both stores
/// and were skipped without re-embedding (a subset of `succeeded`).
/// Silent partial success is disallowed: every failed chunk appears in
/// `failure_reasons`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestStats {
    pub succeeded: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub failure_reasons: Vec<String>,
}

/// SHA-256 of whitespace-normalized text, hex-encoded.
///
/// Used as the embedding cache key and for chunk identity, so a
/// reformatted-but-identical chunk re-uses its cached vector.
pub fn content_hash(text: &str) -> String {
    let normalized = normalize_text(text);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Collapse runs of whitespace and trim the ends.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rough token estimate (4 chars ≈ 1 token).
pub fn estimate_tokens(text: &str) -> i64 {
    (text.len() / CHARS_PER_TOKEN).max(1) as i64
}
