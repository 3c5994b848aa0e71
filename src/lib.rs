//! # rankfuse
//!
//! A hybrid retrieval engine and embedding ingestion pipeline for
//! retrieval-augmented search services.
//!
//! rankfuse turns pre-chunked text into cached embeddings kept
//! consistent across a vector index and a relational full-text store,
//! and serves ranked retrieval through a configurable strategy chain:
//! vector similarity, lexical + vector score fusion, and cross-encoder
//! reranking, with graceful degradation at every seam.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐    ┌─────────────────┐    ┌───────────────┐
//! │ Chunked docs  │──▶│ IngestionPipeline │──▶│ VectorIndex    │
//! │ (callers)     │    │ hash→cache→embed │    │ RelationalStore│
//! └───────────────┘    └────────┬────────┘    └──────┬────────┘
//!                               │                     │
//!                      ┌────────▼────────┐            │
//!                      │ EmbeddingService │            ▼
//!                      │ batch/retry/quota│    ┌───────────────┐
//!                      └─────────────────┘    │ RagCoordinator │
//!                                             │ base│hybrid│rr │
//!                                             └───────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Typed configuration with TOML parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`cache`] | Embedding cache (content hash → vector) |
//! | [`store`] | Vector index and relational store abstractions |
//! | [`embedding`] | Provider client and batch embedding service |
//! | [`search`] | Base, hybrid, and rerank strategies + coordinator |
//! | [`ingest`] | Dual-store ingestion pipeline |

pub mod cache;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod models;
pub mod search;
pub mod store;

pub use error::{Error, Result};
