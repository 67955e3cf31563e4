//! Embedding provider selection and the Voyage AI adapter.
//!
//! Two interchangeable providers sit behind `BaseEmbeddingService`:
//! Voyage AI (1024 dims, preferred when configured) and OpenAI (1536 dims).
//! A project's stored page embeddings and pillar query embeddings must come
//! from the same provider for similarity scores to mean anything, so the
//! choice is made once at worker startup from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use super::ai::OpenAIClient;
use super::BaseEmbeddingService;
use crate::config::Config;

const VOYAGE_EMBEDDING_MODEL: &str = "voyage-3-large";
const VOYAGE_EMBEDDING_DIMENSIONS: usize = 1024;

const MAX_EMBED_RETRIES: u32 = 3;
const EMBED_RETRY_DELAY_MS: u64 = 1000;

#[derive(Debug, Serialize)]
struct VoyageRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct VoyageResponse {
    data: Vec<VoyageEmbedding>,
}

#[derive(Debug, Deserialize)]
struct VoyageEmbedding {
    embedding: Vec<f32>,
}

/// Voyage AI embeddings via their OpenAI-compatible API.
#[derive(Clone)]
pub struct VoyageClient {
    client: reqwest::Client,
    api_key: String,
}

impl VoyageClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[async_trait]
impl BaseEmbeddingService for VoyageClient {
    async fn generate(&self, text: &str) -> Result<Vec<f32>> {
        let request = VoyageRequest {
            input: vec![text.to_string()],
            model: VOYAGE_EMBEDDING_MODEL.to_string(),
        };

        let response = self
            .client
            .post("https://api.voyageai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send embedding request to Voyage AI")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Voyage embedding request failed ({}): {}", status, body);
        }

        let parsed: VoyageResponse = response
            .json()
            .await
            .context("Failed to parse Voyage embedding response")?;

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned from Voyage"))?
            .embedding;

        if embedding.len() != VOYAGE_EMBEDDING_DIMENSIONS {
            anyhow::bail!(
                "Invalid embedding dimension: expected {}, got {}",
                VOYAGE_EMBEDDING_DIMENSIONS,
                embedding.len()
            );
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        VOYAGE_EMBEDDING_DIMENSIONS
    }
}

/// Pick the embedding provider from configuration.
///
/// Precedence: Voyage when its key is present, else OpenAI. Errors when
/// neither is configured - the analyze and match workers cannot run without
/// an embedding provider.
pub fn embedding_service_from_config(config: &Config) -> Result<Arc<dyn BaseEmbeddingService>> {
    if let Some(key) = &config.voyage_api_key {
        tracing::info!(provider = "voyage", "Using Voyage AI embeddings");
        return Ok(Arc::new(VoyageClient::new(key.clone())));
    }
    if let Some(key) = &config.openai_api_key {
        tracing::info!(provider = "openai", "Using OpenAI embeddings");
        return Ok(Arc::new(OpenAIClient::new(key.clone())));
    }
    anyhow::bail!("No embedding provider configured: set VOYAGE_API_KEY or OPENAI_API_KEY")
}

/// Generate an embedding with bounded retry and increasing delay.
///
/// Embedding calls are the flakiest external dependency in the analyze and
/// match paths; a transient failure should not fail the whole item.
pub async fn generate_with_retry(
    service: &dyn BaseEmbeddingService,
    text: &str,
) -> Result<Vec<f32>> {
    let mut retries = 0;

    loop {
        match service.generate(text).await {
            Ok(embedding) => return Ok(embedding),
            Err(e) if retries < MAX_EMBED_RETRIES => {
                retries += 1;
                tracing::warn!(
                    error = %e,
                    retry = retries,
                    max_retries = MAX_EMBED_RETRIES,
                    "Failed to generate embedding, retrying..."
                );
                sleep(Duration::from_millis(EMBED_RETRY_DELAY_MS * retries as u64)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to generate embedding after all retries");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyEmbedder {
        failures_before_success: AtomicU32,
    }

    #[async_trait]
    impl BaseEmbeddingService for FlakyEmbedder {
        async fn generate(&self, _text: &str) -> Result<Vec<f32>> {
            if self.failures_before_success.fetch_update(
                Ordering::SeqCst,
                Ordering::SeqCst,
                |n| n.checked_sub(1),
            ).is_ok()
            {
                anyhow::bail!("transient failure")
            }
            Ok(vec![0.5; 8])
        }

        fn dimensions(&self) -> usize {
            8
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_embedding_failures() {
        let embedder = FlakyEmbedder {
            failures_before_success: AtomicU32::new(2),
        };
        let embedding = generate_with_retry(&embedder, "text").await.unwrap();
        assert_eq!(embedding.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let embedder = FlakyEmbedder {
            failures_before_success: AtomicU32::new(10),
        };
        assert!(generate_with_retry(&embedder, "text").await.is_err());
    }
}
