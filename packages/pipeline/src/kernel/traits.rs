// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic. The services
// (analyzer, matcher, generator) and the workers depend on these seams so
// tests can swap in deterministic mocks.

use anyhow::Result;
use async_trait::async_trait;

// =============================================================================
// Text Generation Trait (Infrastructure - single-turn LLM call)
// =============================================================================

#[async_trait]
pub trait BaseAI: Send + Sync {
    /// Complete a system + user prompt pair with an LLM (returns raw text).
    /// Single-turn, no session state.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

// =============================================================================
// Embedding Service Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseEmbeddingService: Send + Sync {
    /// Generate an embedding vector for text. Dimensionality is fixed per
    /// provider; see `dimensions`.
    async fn generate(&self, text: &str) -> Result<Vec<f32>>;

    /// The fixed vector length this provider returns.
    fn dimensions(&self) -> usize;
}

// =============================================================================
// Page Fetcher Trait (Infrastructure - headless browser)
// =============================================================================

#[async_trait]
pub trait BasePageFetcher: Send + Sync {
    /// Fetch fully-rendered HTML for a URL. Implementations enforce a hard
    /// per-page timeout; a timeout surfaces as an error for that page only.
    async fn fetch(&mut self, url: &str) -> Result<String>;

    /// Release any underlying resource (browser process). Idempotent; must
    /// be called on every exit path of a crawl job.
    async fn close(&mut self);
}
