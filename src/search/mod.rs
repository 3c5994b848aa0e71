//! Search strategies: vector-only, hybrid fusion, and reranking.
//!
//! The strategies form a small ordered chain selected by configuration:
//!
//! ```text
//! RagCoordinator
//!   ├── HybridSearch ──┬── VectorSearch ──▶ VectorIndex
//!   │                  └── fulltext ──────▶ RelationalStore
//!   └── Reranker ─────────▶ PairwiseScorer
//! ```
//!
//! Each layer absorbs the failures it knows how to degrade past: the
//! reranker falls back to fusion order, hybrid falls back to a single
//! healthy channel, and the coordinator falls back from hybrid to
//! vector-only. [`ModeUsed`] records what actually executed so callers
//! can report "hybrid requested but unavailable, vector-only used".

pub mod base;
pub mod coordinator;
pub mod hybrid;
pub mod rerank;

use std::fmt;

/// Which retrieval strategy produced the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// Vector-only search, as requested.
    Vector,
    /// Hybrid was requested but only the vector channel served.
    VectorDegraded,
    /// Hybrid was requested but only the lexical channel served.
    TextDegraded,
    /// Both channels served and scores were fused.
    Hybrid,
}

/// What actually executed for a search call, including in-flight
/// degradation. This is the single observable seam for graceful
/// degradation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeUsed {
    pub retrieval: RetrievalMode,
    /// Whether a rerank stage ran.
    pub reranked: bool,
    /// Whether the rerank stage fell back to pre-rerank ordering.
    pub rerank_fallback: bool,
}

impl fmt::Display for ModeUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let retrieval = match self.retrieval {
            RetrievalMode::Vector => "vector-only",
            RetrievalMode::VectorDegraded => "vector-only (degraded)",
            RetrievalMode::TextDegraded => "text-only (degraded)",
            RetrievalMode::Hybrid => "hybrid",
        };
        if self.reranked {
            write!(f, "{retrieval}+rerank")?;
            if self.rerank_fallback {
                write!(f, " (rerank fallback)")?;
            }
            Ok(())
        } else {
            write!(f, "{retrieval}")
        }
    }
}
