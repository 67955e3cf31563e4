//! Analyze job handler: enrich crawled pages with topics, a quality score,
//! and an embedding.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, warn};

use super::job::{Job, JobType};
use super::progress::ItemProgress;
use super::worker::JobHandler;
use crate::analyzer::Analyzer;
use crate::storage::{with_db_retry, Page};

pub struct AnalyzeJobHandler {
    analyzer: Arc<Analyzer>,
}

impl AnalyzeJobHandler {
    pub fn new(analyzer: Arc<Analyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl JobHandler for AnalyzeJobHandler {
    fn job_type(&self) -> JobType {
        JobType::Analyze
    }

    async fn handle(&self, job: &Job, db: &PgPool) -> Result<()> {
        let pages = with_db_retry("pages.list_needing_analysis", || {
            Page::list_needing_analysis(job.project_id, db)
        })
        .await
        .context("Failed to list pages needing analysis")?;

        let total = pages.len();
        info!(job_id = %job.id, pages = total, "Starting analysis");

        if total == 0 {
            let progress = ItemProgress::new("No pages awaiting analysis");
            job.mark_completed(0, Some(0), &serde_json::to_value(&progress)?, db)
                .await?;
            return Ok(());
        }

        let mut progress = ItemProgress::new("Analyzing pages");
        let mut analyzed = 0i32;

        for (index, page) in pages.iter().enumerate() {
            let flags = Job::control_flags(job.id, db).await?;
            if flags.cancel_requested {
                info!(job_id = %job.id, analyzed, "Analysis cancelled");
                job.mark_cancelled(db).await?;
                return Ok(());
            }

            progress.current_item = Some(page.url.clone());
            progress.status_message =
                format!("Analyzing page {} of {}", index + 1, total);

            let text = page.plain_text.as_deref().unwrap_or_default();
            match self.analyzer.analyze_page(text).await {
                Ok(analysis) => {
                    with_db_retry("pages.update_analysis", || {
                        Page::update_analysis(
                            page.id,
                            &analysis.topics,
                            analysis.quality_score,
                            &analysis.embedding,
                            db,
                        )
                    })
                    .await
                    .context("Failed to persist page analysis")?;
                    analyzed += 1;
                }
                Err(e) => {
                    // One bad page never sinks the batch.
                    warn!(job_id = %job.id, page_id = %page.id, error = %e, "Analysis failed");
                    progress.record_error(&page.url, &format!("{:#}", e));
                }
            }

            let done = (index + 1) as f64 * 100.0 / total as f64;
            job.update_progress(
                (index + 1) as i32,
                Some(total as i32),
                done,
                &serde_json::to_value(&progress)?,
                db,
            )
            .await?;
        }

        progress.current_item = None;
        progress.status_message = format!("Analyzed {} of {} pages", analyzed, total);
        job.mark_completed(
            total as i32,
            Some(total as i32),
            &serde_json::to_value(&progress)?,
            db,
        )
        .await?;

        info!(job_id = %job.id, analyzed, total, "Analysis finished");
        Ok(())
    }
}
