//! Pillar-to-page matching via vector similarity.
//!
//! One embedding is computed over the pillar's descriptive fields, analyzed
//! pages in the same project are ranked by cosine similarity, and matches
//! at or above the threshold are upserted idempotently.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::kernel::{generate_with_retry, BaseEmbeddingService};
use crate::storage::{with_db_retry, Match, Page, Pillar};

const DEFAULT_MIN_RELEVANCE: f32 = 0.7;
const DEFAULT_MAX_RESULTS: i64 = 100;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MatchConfig {
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,
    #[serde(default = "default_max_results")]
    pub max_results: i64,
}

fn default_min_relevance() -> f32 {
    DEFAULT_MIN_RELEVANCE
}

fn default_max_results() -> i64 {
    DEFAULT_MAX_RESULTS
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_relevance: DEFAULT_MIN_RELEVANCE,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

pub struct Matcher {
    embedder: Arc<dyn BaseEmbeddingService>,
}

impl Matcher {
    pub fn new(embedder: Arc<dyn BaseEmbeddingService>) -> Self {
        Self { embedder }
    }

    /// Rank candidate pages for a pillar and persist matches at or above
    /// the threshold. Returns (page_id, relevance) pairs, best first.
    ///
    /// A missing pillar is job-fatal for the caller; per-page match upserts
    /// ride the usual bounded database retry.
    pub async fn find_matches(
        &self,
        pillar_id: Uuid,
        config: &MatchConfig,
        pool: &PgPool,
    ) -> Result<Vec<(Uuid, f32)>> {
        let pillar = with_db_retry("find_pillar", || Pillar::find_by_id(pillar_id, pool))
            .await
            .context("Failed to load pillar")?
            .ok_or_else(|| anyhow::anyhow!("Pillar {} not found", pillar_id))?;

        tracing::info!(
            pillar_id = %pillar_id,
            pillar_name = %pillar.name,
            min_relevance = config.min_relevance,
            max_results = config.max_results,
            "Finding matching pages for pillar"
        );

        let query_text = pillar.embedding_text();
        let embedding = generate_with_retry(self.embedder.as_ref(), &query_text)
            .await
            .context("Failed to generate pillar embedding")?;

        with_db_retry("cache_pillar_embedding", || {
            Pillar::update_embedding(pillar_id, &embedding, pool)
        })
        .await
        .context("Failed to cache pillar embedding")?;

        let ranked = with_db_retry("search_by_similarity", || {
            Page::search_by_similarity(
                pillar.project_id,
                &embedding,
                config.min_relevance,
                config.max_results,
                pool,
            )
        })
        .await
        .context("Failed to rank pages by similarity")?;

        let mut matches = Vec::with_capacity(ranked.len());
        for (page_id, similarity) in ranked {
            // Float noise from the distance computation can nudge an exact
            // match past 1.0.
            let relevance = similarity.clamp(0.0, 1.0);
            with_db_retry("upsert_match", || {
                Match::upsert(page_id, pillar_id, relevance, pool)
            })
            .await
            .context("Failed to persist match")?;
            matches.push((page_id, relevance));
        }

        tracing::info!(
            pillar_id = %pillar_id,
            match_count = matches.len(),
            "Matching complete"
        );

        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_contract() {
        let config = MatchConfig::default();
        assert_eq!(config.min_relevance, 0.7);
        assert_eq!(config.max_results, 100);
    }
}
