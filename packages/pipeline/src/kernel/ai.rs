// AI implementation using OpenAI
//
// This is the infrastructure implementation of BaseAI and (optionally)
// BaseEmbeddingService. Business logic (what to prompt for) lives in the
// analyzer and generator services.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{BaseAI, BaseEmbeddingService};

const OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const OPENAI_EMBEDDING_DIMENSIONS: usize = 1536;
const OPENAI_CHAT_MODEL: &str = "gpt-4o";

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    input: String,
    model: String,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingData {
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// OpenAI implementation of AI capabilities
#[derive(Clone)]
pub struct OpenAIClient {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAIClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    /// Generate embeddings using OpenAI's text-embedding-3-small model
    pub async fn create_embedding(&self, text: &str) -> Result<EmbeddingResponse> {
        let request = EmbeddingRequest {
            input: text.to_string(),
            model: OPENAI_EMBEDDING_MODEL.to_string(),
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send embedding request to OpenAI")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI embedding request failed ({}): {}", status, body);
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        Ok(embedding_response)
    }
}

#[async_trait]
impl BaseAI for OpenAIClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        tracing::debug!(
            system_length = system_prompt.len(),
            user_length = user_prompt.len(),
            model = OPENAI_CHAT_MODEL,
            "Calling OpenAI chat completion"
        );

        let request = ChatRequest {
            model: OPENAI_CHAT_MODEL.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt.to_string(),
                },
            ],
            max_tokens: 4096,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to call OpenAI API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI chat request failed ({}): {}", status, body);
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("No completion returned from OpenAI"))?;

        tracing::debug!(response_length = content.len(), "OpenAI response received");

        Ok(content)
    }
}

#[async_trait]
impl BaseEmbeddingService for OpenAIClient {
    async fn generate(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .create_embedding(text)
            .await
            .context("Failed to create embedding")?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned"))?
            .embedding;

        if embedding.len() != OPENAI_EMBEDDING_DIMENSIONS {
            anyhow::bail!(
                "Invalid embedding dimension: expected {}, got {}",
                OPENAI_EMBEDDING_DIMENSIONS,
                embedding.len()
            );
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        OPENAI_EMBEDDING_DIMENSIONS
    }
}
