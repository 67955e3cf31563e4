//! Generate job handler: one draft per job, built from matched source
//! pages. Unlike the batch workers, any error here fails the job outright.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use super::job::{Job, JobType};
use super::progress::ItemProgress;
use super::worker::JobHandler;
use crate::generator::{GenerateRequest, Generator, SourcePage};
use crate::storage::{with_db_retry, Draft, Page, Pillar};

pub struct GenerateJobHandler {
    generator: Arc<Generator>,
}

impl GenerateJobHandler {
    pub fn new(generator: Arc<Generator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl JobHandler for GenerateJobHandler {
    fn job_type(&self) -> JobType {
        JobType::Generate
    }

    async fn handle(&self, job: &Job, db: &PgPool) -> Result<()> {
        let request: GenerateRequest = serde_json::from_value(
            job.args.clone().context("Generate job has no args")?,
        )
        .context("Invalid generate args")?;

        let pillar = with_db_retry("pillars.find_by_id", || {
            Pillar::find_by_id(request.pillar_id, db)
        })
        .await
        .context("Failed to load pillar")?
        .ok_or_else(|| anyhow::anyhow!("Pillar {} not found", request.pillar_id))?;

        let mut sources = Vec::with_capacity(request.source_page_ids.len());
        for page_id in &request.source_page_ids {
            let page = with_db_retry("pages.find_by_id", || Page::find_by_id(*page_id, db))
                .await
                .context("Failed to load source page")?
                .ok_or_else(|| anyhow::anyhow!("Source page {} not found", page_id))?;
            sources.push(SourcePage {
                title: page.title.clone().unwrap_or_else(|| page.url.clone()),
                url: page.url,
                markdown: page.structured_markdown.unwrap_or_default(),
            });
        }

        let progress = ItemProgress::new(format!(
            "Generating {} for pillar {}",
            request.content_type.as_str(),
            pillar.name
        ));
        job.update_progress(0, Some(1), 0.0, &serde_json::to_value(&progress)?, db)
            .await?;

        let draft = self
            .generator
            .generate_draft(&pillar, &sources, &request)
            .await?;

        let stored = with_db_retry("drafts.insert", || {
            Draft::insert(
                pillar.id,
                request.content_type.as_str(),
                &draft.title,
                &draft.slug,
                &draft.content,
                &draft.schema_recommendations,
                &request.source_page_ids,
                db,
            )
        })
        .await
        .context("Failed to persist draft")?;

        // Source pages fed into a kept draft graduate out of the match pool.
        with_db_retry("pages.mark_used", || {
            Page::mark_used(&request.source_page_ids, db)
        })
        .await
        .context("Failed to mark source pages used")?;

        let progress = ItemProgress::new(format!("Draft '{}' v{} ready", stored.title, stored.version));
        job.mark_completed(1, Some(1), &serde_json::to_value(&progress)?, db)
            .await?;

        info!(
            job_id = %job.id,
            draft_id = %stored.id,
            pillar_id = %pillar.id,
            version = stored.version,
            "Draft generated"
        );
        Ok(())
    }
}
