//! Match job handler: rank analyzed pages against a topic pillar.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::job::{Job, JobType};
use super::progress::ItemProgress;
use super::worker::JobHandler;
use crate::matcher::{MatchConfig, Matcher};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchArgs {
    pub pillar_id: Uuid,
    #[serde(flatten)]
    pub config: MatchConfig,
}

pub struct MatchJobHandler {
    matcher: Arc<Matcher>,
}

impl MatchJobHandler {
    pub fn new(matcher: Arc<Matcher>) -> Self {
        Self { matcher }
    }
}

#[async_trait]
impl JobHandler for MatchJobHandler {
    fn job_type(&self) -> JobType {
        JobType::Match
    }

    async fn handle(&self, job: &Job, db: &PgPool) -> Result<()> {
        let args: MatchArgs = serde_json::from_value(
            job.args.clone().context("Match job has no args")?,
        )
        .context("Invalid match args")?;

        // An unknown pillar fails the whole job; there is nothing to
        // partially complete.
        let matches = self
            .matcher
            .find_matches(args.pillar_id, &args.config, db)
            .await?;

        let count = matches.len() as i32;
        let best = matches.first().map(|(_, score)| *score).unwrap_or(0.0);
        let progress = ItemProgress::new(format!("Matched {} pages", count));
        job.mark_completed(count, Some(count), &serde_json::to_value(&progress)?, db)
            .await?;

        info!(
            job_id = %job.id,
            pillar_id = %args.pillar_id,
            matches = count,
            best_score = best,
            "Matching finished"
        );
        Ok(())
    }
}
