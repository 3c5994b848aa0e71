//! HTTP embedding client for OpenAI-compatible endpoints.
//!
//! Sends `POST {base_url}/embeddings` and classifies failures for the
//! retry layer:
//! - HTTP 429 → [`Error::RateLimited`] (transient)
//! - HTTP 402, or an `insufficient_quota` error body → [`Error::QuotaExhausted`]
//! - HTTP 5xx → retryable [`Error::Provider`]
//! - other 4xx → terminal [`Error::Provider`]
//! - network errors → [`Error::Transport`] (transient)

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

use super::EmbeddingClient;

#[derive(Debug)]
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| Error::Config("embedding.base_url required".into()))?;
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::Config("embedding.model required".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dims: config.dims,
        })
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let parsed: EmbeddingsResponse = response.json().await?;
            if parsed.data.len() != texts.len() {
                return Err(Error::Provider {
                    message: format!(
                        "provider returned {} embeddings for {} inputs",
                        parsed.data.len(),
                        texts.len()
                    ),
                    retryable: false,
                });
            }

            let mut data = parsed.data;
            data.sort_by_key(|d| d.index);

            let mut vectors = Vec::with_capacity(data.len());
            for datum in data {
                if datum.embedding.len() != self.dims {
                    return Err(Error::DimensionMismatch {
                        expected: self.dims,
                        actual: datum.embedding.len(),
                    });
                }
                vectors.push(datum.embedding);
            }
            return Ok(vectors);
        }

        let body_text = response.text().await.unwrap_or_default();

        if status.as_u16() == 429 {
            return Err(Error::RateLimited);
        }
        if status.as_u16() == 402 || body_text.contains("insufficient_quota") {
            return Err(Error::QuotaExhausted);
        }

        Err(Error::Provider {
            message: format!("embedding API error {status}: {body_text}"),
            retryable: status.is_server_error(),
        })
    }
}
