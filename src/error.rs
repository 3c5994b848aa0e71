//! Error taxonomy for the retrieval engine.
//!
//! Transient provider failures ([`Error::RateLimited`], retryable
//! [`Error::Provider`], transport errors) are absorbed by the embedding
//! service's retry loop. Quota exhaustion is terminal for an ingestion
//! run and is reported through batch outcomes rather than raised.
//! Backend and rerank failures are absorbed at the strategy layer that
//! knows how to degrade; only non-recoverable configuration errors
//! (dimension mismatch, invalid config) reach the caller as `Err`.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The provider returned HTTP 429. Retried with backoff, bounded.
    #[error("provider rate limited")]
    RateLimited,

    /// The provider account is out of quota. Never retried.
    #[error("provider quota exhausted")]
    QuotaExhausted,

    /// A vector's length does not match the configured embedding
    /// dimension. Rejected before any index write.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A search backend could not serve the request.
    #[error("search backend '{backend}' unavailable: {message}")]
    BackendUnavailable {
        backend: &'static str,
        message: String,
    },

    /// The pairwise relevance scorer failed or returned garbage.
    #[error("rerank model failure: {0}")]
    RerankModel(String),

    /// A joined search deadline elapsed before both channels returned.
    #[error("search timed out after {0:?}")]
    Timeout(Duration),

    /// Any other provider-side error. `retryable` distinguishes server
    /// errors (5xx) from terminal client errors.
    #[error("provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("http transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// True for failures worth another attempt against the provider.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::RateLimited
                | Error::Transport(_)
                | Error::Provider {
                    retryable: true,
                    ..
                }
        )
    }

    /// True for failures the coordinator degrades past rather than
    /// surfacing (one level down the strategy chain).
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable { .. } | Error::Timeout(_) | Error::Database(_)
        )
    }
}
