//! Long-running job consumers, one per job type.
//!
//! Each consumer polls the jobs table for pending work of its type, claims
//! one job at a time via `Job::claim_next`, and runs it to a terminal state.
//! Shutdown is cooperative: the consumer finishes its in-flight job before
//! exiting, so a SIGTERM never abandons a job mid-item.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::job::{Job, JobType};
use crate::storage::with_db_retry;

/// Configuration for one job consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// How long to sleep when no pending jobs are available.
    pub poll_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// A handler runs one claimed job to a terminal state.
///
/// Handlers own their success and pause bookkeeping (`mark_completed`,
/// `return_to_pending`). A returned error means the job failed as a whole;
/// the consumer records it so no job is left stuck in `running`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn handle(&self, job: &Job, db: &PgPool) -> Result<()>;
}

pub struct JobConsumer {
    handler: Arc<dyn JobHandler>,
    db: PgPool,
    config: ConsumerConfig,
}

impl JobConsumer {
    pub fn new(handler: Arc<dyn JobHandler>, db: PgPool) -> Self {
        Self {
            handler,
            db,
            config: ConsumerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Poll-and-dispatch until the token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let job_type = self.handler.job_type();
        info!(job_type = job_type.as_str(), "Job consumer started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let claimed = with_db_retry("jobs.claim_next", || async {
                Job::claim_next(job_type, &self.db).await.map_err(|e| {
                    // claim_next only fails on sqlx errors
                    match e.downcast::<sqlx::Error>() {
                        Ok(sqlx_err) => sqlx_err,
                        Err(other) => sqlx::Error::Protocol(other.to_string()),
                    }
                })
            })
            .await;

            match claimed {
                Ok(Some(job)) => {
                    self.process(job).await;
                    // Immediately look for the next job; the queue may be deep.
                    continue;
                }
                Ok(None) => {
                    debug!(job_type = job_type.as_str(), "No pending jobs");
                }
                Err(e) => {
                    error!(
                        job_type = job_type.as_str(),
                        error = %e,
                        "Failed to claim job"
                    );
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(job_type = job_type.as_str(), "Job consumer stopped");
    }

    async fn process(&self, job: Job) {
        let job_id = job.id;
        info!(
            job_id = %job_id,
            job_type = job.job_type.as_str(),
            project_id = %job.project_id,
            "Processing job"
        );

        match self.handler.handle(&job, &self.db).await {
            Ok(()) => {
                info!(job_id = %job_id, "Job finished");
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Job failed");
                if let Err(mark_err) = job.mark_failed(&format!("{:#}", e), &self.db).await {
                    error!(
                        job_id = %job_id,
                        error = %mark_err,
                        "Failed to record job failure"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        fn job_type(&self) -> JobType {
            JobType::Analyze
        }

        async fn handle(&self, _job: &Job, _db: &PgPool) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn default_poll_interval_is_two_seconds() {
        let config = ConsumerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn consumer_exits_when_token_already_cancelled() {
        let pool = PgPool::connect_lazy("postgres://localhost/unused")
            .expect("lazy pool construction cannot fail");
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
        });
        let consumer = JobConsumer::new(handler.clone(), pool);

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        consumer.run(shutdown).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }
}
