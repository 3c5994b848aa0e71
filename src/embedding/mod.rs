//! Embedding generation: provider abstraction and the batch pipeline.
//!
//! [`EmbeddingClient`] is the seam to the external embedding capability;
//! [`HttpEmbeddingClient`](remote::HttpEmbeddingClient) is the wire
//! implementation. [`EmbeddingService`] owns everything around the
//! provider call: cache consultation, batching, a bounded worker pool
//! gated by shared rate-limit permits, per-batch retry with exponential
//! backoff, and the quota-exhaustion short-circuit.
//!
//! Also provides vector utilities shared with the stores:
//! - [`cosine_similarity`] — similarity between two embedding vectors
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes
//! - [`blob_to_vec`] — decode the bytes back into a `Vec<f32>`
//!
//! # Failure model
//!
//! - Rate limiting and server errors are retried per batch, bounded by
//!   `max_retries`, with `base^attempt`-second backoff.
//! - Quota exhaustion is never retried: the shared flag flips, batches
//!   already holding a permit finish, and every not-yet-started input
//!   is recorded as failed without touching the provider.
//! - A vector of the wrong dimension is a fatal configuration error and
//!   is the only way [`EmbeddingService::embed`] returns `Err`.

pub mod backoff;
pub mod remote;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::EmbeddingCache;
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::models::{content_hash, EmbedFailure, EmbedOutcome, EmbeddingBatchResult};

use backoff::RetryPolicy;

/// Client for the external embedding capability.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed one batch of texts, returning vectors in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Result of one worker's batch, keyed by original input index.
enum BatchOutput {
    Outcomes(Vec<(usize, EmbedOutcome)>),
    Fatal(Error),
}

/// Batch embedding pipeline over an [`EmbeddingClient`].
pub struct EmbeddingService {
    client: Arc<dyn EmbeddingClient>,
    cache: Arc<EmbeddingCache>,
    config: EmbeddingConfig,
    permits: Arc<Semaphore>,
}

impl EmbeddingService {
    pub fn new(
        client: Arc<dyn EmbeddingClient>,
        cache: Arc<EmbeddingCache>,
        config: EmbeddingConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_batches.max(1)));
        Self {
            client,
            cache,
            config,
            permits,
        }
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn dims(&self) -> usize {
        self.config.dims
    }

    /// Embed a list of texts.
    ///
    /// Returns one outcome per input, in input order. Cache hits never
    /// reach the provider and never count against its quota. The only
    /// `Err` is a dimension mismatch; every other failure is absorbed
    /// into the per-input outcomes.
    pub async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatchResult> {
        let mut outcomes: Vec<Option<EmbedOutcome>> = (0..texts.len()).map(|_| None).collect();
        let mut hash_by_index: HashMap<usize, String> = HashMap::new();
        let mut pending: Vec<(usize, String)> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let hash = content_hash(text);
            if let Some(vector) = self.cache.get(&hash) {
                outcomes[i] = Some(EmbedOutcome::Success(vector));
            } else {
                hash_by_index.insert(i, hash);
                pending.push((i, text.clone()));
            }
        }

        if !pending.is_empty() {
            let quota_hit = Arc::new(AtomicBool::new(false));
            let mut workers: JoinSet<BatchOutput> = JoinSet::new();

            for batch in pending.chunks(self.config.batch_size) {
                workers.spawn(embed_one_batch(
                    batch.to_vec(),
                    Arc::clone(&self.client),
                    Arc::clone(&self.permits),
                    Arc::clone(&quota_hit),
                    self.config.max_retries,
                    self.config.backoff_base_secs,
                ));
            }

            let mut fatal: Option<Error> = None;
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(BatchOutput::Outcomes(list)) => {
                        for (index, outcome) in list {
                            outcomes[index] = Some(outcome);
                        }
                    }
                    Ok(BatchOutput::Fatal(err)) => {
                        quota_hit.store(true, Ordering::SeqCst);
                        fatal = Some(err);
                    }
                    Err(join_err) => {
                        warn!("embedding worker aborted: {join_err}");
                    }
                }
            }

            if let Some(err) = fatal {
                return Err(err);
            }

            // Dimension is enforced per worker; anything surviving to
            // here is safe to cache.
            for (i, outcome) in outcomes.iter().enumerate() {
                if let (Some(EmbedOutcome::Success(vector)), Some(hash)) =
                    (outcome, hash_by_index.get(&i))
                {
                    self.cache.insert(hash.clone(), vector.clone());
                }
            }
        }

        let outcomes = outcomes
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    EmbedOutcome::Failure(EmbedFailure::Provider(
                        "embedding worker aborted".to_string(),
                    ))
                })
            })
            .collect();

        Ok(EmbeddingBatchResult { outcomes })
    }
}

/// Drive one batch through permit acquisition, the provider call, and
/// the retry state machine.
async fn embed_one_batch(
    batch: Vec<(usize, String)>,
    client: Arc<dyn EmbeddingClient>,
    permits: Arc<Semaphore>,
    quota_hit: Arc<AtomicBool>,
    max_retries: u32,
    backoff_base_secs: u64,
) -> BatchOutput {
    let all_failed = |batch: &[(usize, String)], failure: EmbedFailure| {
        BatchOutput::Outcomes(
            batch
                .iter()
                .map(|(i, _)| (*i, EmbedOutcome::Failure(failure.clone())))
                .collect(),
        )
    };

    if quota_hit.load(Ordering::SeqCst) {
        return all_failed(&batch, EmbedFailure::QuotaExhausted);
    }

    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return all_failed(
                &batch,
                EmbedFailure::Provider("rate limiter closed".to_string()),
            )
        }
    };

    // Re-check after waiting: the flag may have flipped while queued.
    if quota_hit.load(Ordering::SeqCst) {
        return all_failed(&batch, EmbedFailure::QuotaExhausted);
    }

    let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
    let mut retry = RetryPolicy::new(max_retries, backoff_base_secs);

    loop {
        match client.embed_batch(&texts).await {
            Ok(vectors) => {
                if vectors.len() != texts.len() {
                    return all_failed(
                        &batch,
                        EmbedFailure::Provider(format!(
                            "provider returned {} vectors for {} inputs",
                            vectors.len(),
                            texts.len()
                        )),
                    );
                }
                return BatchOutput::Outcomes(
                    batch
                        .iter()
                        .zip(vectors)
                        .map(|((i, _), vector)| (*i, EmbedOutcome::Success(vector)))
                        .collect(),
                );
            }
            Err(Error::QuotaExhausted) => {
                warn!("provider quota exhausted; aborting remaining batches");
                quota_hit.store(true, Ordering::SeqCst);
                return all_failed(&batch, EmbedFailure::QuotaExhausted);
            }
            Err(Error::DimensionMismatch { expected, actual }) => {
                return BatchOutput::Fatal(Error::DimensionMismatch { expected, actual });
            }
            Err(err) if err.is_transient() => match retry.next_delay() {
                Some(delay) => {
                    debug!(
                        "transient embedding failure ({err}), retry {} in {:?}",
                        retry.attempts(),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    let failure = match err {
                        Error::RateLimited => EmbedFailure::RateLimited {
                            attempts: retry.attempts(),
                        },
                        other => EmbedFailure::Provider(other.to_string()),
                    };
                    return all_failed(&batch, failure);
                }
            },
            Err(err) => {
                return all_failed(&batch, EmbedFailure::Provider(err.to_string()));
            }
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values
/// from the byte slice.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Returns `0.0` for empty vectors or
/// vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Scripted provider double: fails on chosen call numbers.
    struct ScriptedClient {
        dims: usize,
        calls: AtomicUsize,
        /// Call number that fails once with `RateLimited`.
        rate_limit_on: Option<usize>,
        /// Call number from which every call fails with `QuotaExhausted`.
        quota_from: Option<usize>,
        /// Call number that returns vectors of the wrong length.
        wrong_dims_on: Option<usize>,
    }

    impl ScriptedClient {
        fn healthy(dims: usize) -> Self {
            Self {
                dims,
                calls: AtomicUsize::new(0),
                rate_limit_on: None,
                quota_from: None,
                wrong_dims_on: None,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn test_vector(text: &str, dims: usize) -> Vec<f32> {
        let seed: u32 = text.bytes().map(u32::from).sum();
        (0..dims)
            .map(|i| ((seed + i as u32) % 10) as f32 / 10.0)
            .collect()
    }

    #[async_trait]
    impl EmbeddingClient for ScriptedClient {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.rate_limit_on == Some(call) {
                return Err(Error::RateLimited);
            }
            if let Some(from) = self.quota_from {
                if call >= from {
                    return Err(Error::QuotaExhausted);
                }
            }
            let dims = if self.wrong_dims_on == Some(call) {
                self.dims + 1
            } else {
                self.dims
            };
            Ok(texts.iter().map(|t| test_vector(t, dims)).collect())
        }
    }

    fn serial_config(dims: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            dims,
            batch_size: 1,
            max_retries: 3,
            backoff_base_secs: 0,
            max_concurrent_batches: 1,
            ..EmbeddingConfig::default()
        }
    }

    fn service(client: Arc<ScriptedClient>, config: EmbeddingConfig) -> EmbeddingService {
        EmbeddingService::new(client, Arc::new(EmbeddingCache::new()), config)
    }

    fn inputs(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text number {i}")).collect()
    }

    #[tokio::test]
    async fn test_all_succeed_in_order() {
        let client = Arc::new(ScriptedClient::healthy(4));
        let svc = service(Arc::clone(&client), serial_config(4));

        let result = svc.embed(&inputs(5)).await.unwrap();
        assert_eq!(result.outcomes.len(), 5);
        assert_eq!(result.successes(), 5);
        assert_eq!(client.call_count(), 5);
    }

    #[tokio::test]
    async fn test_rate_limited_once_then_recovers() {
        let client = Arc::new(ScriptedClient {
            rate_limit_on: Some(5),
            ..ScriptedClient::healthy(4)
        });
        let svc = service(Arc::clone(&client), serial_config(4));

        let result = svc.embed(&inputs(10)).await.unwrap();
        assert_eq!(result.successes(), 10);
        // One extra call for the single retry.
        assert_eq!(client.call_count(), 11);
    }

    #[tokio::test]
    async fn test_rate_limit_budget_exhausted() {
        // Every call rate-limited: the batch fails terminally after
        // max_retries attempts.
        struct AlwaysLimited {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl EmbeddingClient for AlwaysLimited {
            fn model_name(&self) -> &str {
                "limited"
            }
            async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::RateLimited)
            }
        }

        let client = Arc::new(AlwaysLimited {
            calls: AtomicUsize::new(0),
        });
        let svc = EmbeddingService::new(
            Arc::clone(&client) as Arc<dyn EmbeddingClient>,
            Arc::new(EmbeddingCache::new()),
            serial_config(4),
        );

        let result = svc.embed(&inputs(1)).await.unwrap();
        assert_eq!(result.failures(), 1);
        match &result.outcomes[0] {
            EmbedOutcome::Failure(EmbedFailure::RateLimited { attempts }) => {
                assert_eq!(*attempts, 3);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // Initial try plus three retries.
        assert_eq!(client.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_quota_exhaustion_short_circuits_rest() {
        let client = Arc::new(ScriptedClient {
            quota_from: Some(4),
            ..ScriptedClient::healthy(4)
        });
        let svc = service(Arc::clone(&client), serial_config(4));

        let result = svc.embed(&inputs(10)).await.unwrap();
        assert_eq!(result.successes(), 3);
        assert_eq!(result.failures(), 7);
        for outcome in &result.outcomes[3..] {
            assert!(matches!(
                outcome,
                EmbedOutcome::Failure(EmbedFailure::QuotaExhausted)
            ));
        }
        // Exactly one call observed the quota error; later batches
        // never reached the provider.
        assert_eq!(client.call_count(), 4);
    }

    #[tokio::test]
    async fn test_cache_hits_skip_provider() {
        let client = Arc::new(ScriptedClient::healthy(4));
        let svc = service(Arc::clone(&client), serial_config(4));

        let texts = inputs(6);
        let first = svc.embed(&texts).await.unwrap();
        assert_eq!(first.successes(), 6);
        assert_eq!(client.call_count(), 6);

        let second = svc.embed(&texts).await.unwrap();
        assert_eq!(second.successes(), 6);
        assert_eq!(client.call_count(), 6, "cache hits must not call provider");
    }

    #[tokio::test]
    async fn test_whitespace_variants_share_cache_entry() {
        let client = Arc::new(ScriptedClient::healthy(4));
        let svc = service(Arc::clone(&client), serial_config(4));

        svc.embed(&["hello   world".to_string()]).await.unwrap();
        svc.embed(&["hello world".to_string()]).await.unwrap();
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_fatal() {
        let client = Arc::new(ScriptedClient {
            wrong_dims_on: Some(1),
            ..ScriptedClient::healthy(4)
        });
        let svc = service(Arc::clone(&client), serial_config(4));

        let err = svc.embed(&inputs(2)).await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 5 }));
        // Nothing from the poisoned run may enter the cache.
        assert!(svc.cache().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_batches_preserve_input_order() {
        let client = Arc::new(ScriptedClient::healthy(4));
        let config = EmbeddingConfig {
            dims: 4,
            batch_size: 2,
            max_concurrent_batches: 4,
            backoff_base_secs: 0,
            ..EmbeddingConfig::default()
        };
        let svc = service(Arc::clone(&client), config);

        let texts = inputs(9);
        let result = svc.embed(&texts).await.unwrap();
        assert_eq!(result.outcomes.len(), 9);
        for (text, outcome) in texts.iter().zip(&result.outcomes) {
            match outcome {
                EmbedOutcome::Success(vector) => {
                    assert_eq!(vector, &test_vector(text, 4));
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty_or_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
