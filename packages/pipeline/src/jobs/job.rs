//! Job model backing the durable Postgres work queue.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::storage::with_db_retry;

pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Crawl,
    Analyze,
    Match,
    Generate,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Crawl => "crawl",
            JobType::Analyze => "analyze",
            JobType::Match => "match",
            JobType::Generate => "generate",
        }
    }
}

// ============================================================================
// Job Model
// ============================================================================

const JOB_COLUMNS: &str = r#"
    id, project_id, job_type, status, args,
    progress, total_items, processed_items, metadata,
    error_message, cancel_requested, pause_requested,
    created_at, started_at, completed_at, updated_at
"#;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub project_id: Uuid,
    pub job_type: JobType,

    #[builder(default)]
    pub status: JobStatus,

    /// Job-type-specific payload (crawl config, generation request, ...).
    #[builder(default, setter(strip_option))]
    pub args: Option<serde_json::Value>,

    // Progress reporting, polled by the UI. `progress` is a percentage.
    #[builder(default = 0.0)]
    pub progress: f64,
    #[builder(default, setter(strip_option))]
    pub total_items: Option<i32>,
    #[builder(default = 0)]
    pub processed_items: i32,
    #[builder(default, setter(strip_option))]
    pub metadata: Option<serde_json::Value>,

    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,

    // Cooperative control flags, checked between items.
    #[builder(default = false)]
    pub cancel_requested: bool,
    #[builder(default = false)]
    pub pause_requested: bool,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Convenience constructor for an immediately-runnable job.
    pub fn new(project_id: Uuid, job_type: JobType, args: serde_json::Value) -> Self {
        Self::builder()
            .project_id(project_id)
            .job_type(job_type)
            .args(args)
            .build()
    }

    pub async fn insert(&self, db: &PgPool) -> Result<Self> {
        let job = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO jobs (
                id, project_id, job_type, status, args,
                progress, total_items, processed_items, metadata,
                error_message, cancel_requested, pause_requested,
                created_at, started_at, completed_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(self.project_id)
        .bind(self.job_type)
        .bind(self.status)
        .bind(&self.args)
        .bind(self.progress)
        .bind(self.total_items)
        .bind(self.processed_items)
        .bind(&self.metadata)
        .bind(&self.error_message)
        .bind(self.cancel_requested)
        .bind(self.pause_requested)
        .bind(self.created_at)
        .bind(self.started_at)
        .bind(self.completed_at)
        .bind(self.updated_at)
        .fetch_one(db)
        .await?;

        Ok(job)
    }

    pub async fn find_by_id(id: Uuid, db: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;

        Ok(job)
    }

    /// Claim the oldest pending job of one type atomically. Concurrent
    /// workers never receive the same job thanks to FOR UPDATE SKIP LOCKED.
    pub async fn claim_next(job_type: JobType, db: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            r#"
            WITH next_job AS (
                SELECT id
                FROM jobs
                WHERE status = 'pending' AND job_type = $1
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running',
                started_at = COALESCE(started_at, NOW()),
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_job)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_type)
        .fetch_optional(db)
        .await?;

        Ok(job)
    }

    /// Refresh the progress columns visible to the polling UI. Idempotent
    /// update, safe to retry on connection loss.
    pub async fn update_progress(
        &self,
        processed_items: i32,
        total_items: Option<i32>,
        progress: f64,
        metadata: &serde_json::Value,
        db: &PgPool,
    ) -> Result<()> {
        with_db_retry("jobs.update_progress", || async {
            sqlx::query(
                r#"
                UPDATE jobs
                SET processed_items = $1,
                    total_items = $2,
                    progress = $3,
                    metadata = $4,
                    updated_at = NOW()
                WHERE id = $5
                "#,
            )
            .bind(processed_items)
            .bind(total_items)
            .bind(progress)
            .bind(metadata)
            .bind(self.id)
            .execute(db)
            .await
        })
        .await?;

        Ok(())
    }

    pub async fn mark_completed(
        &self,
        processed_items: i32,
        total_items: Option<i32>,
        metadata: &serde_json::Value,
        db: &PgPool,
    ) -> Result<()> {
        with_db_retry("jobs.mark_completed", || async {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'completed',
                    progress = 100,
                    processed_items = $1,
                    total_items = $2,
                    metadata = $3,
                    completed_at = NOW(),
                    updated_at = NOW()
                WHERE id = $4
                "#,
            )
            .bind(processed_items)
            .bind(total_items)
            .bind(metadata)
            .bind(self.id)
            .execute(db)
            .await
        })
        .await?;

        Ok(())
    }

    pub async fn mark_failed(&self, error_message: &str, db: &PgPool) -> Result<()> {
        with_db_retry("jobs.mark_failed", || async {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'failed',
                    error_message = $1,
                    completed_at = NOW(),
                    updated_at = NOW()
                WHERE id = $2
                "#,
            )
            .bind(error_message)
            .bind(self.id)
            .execute(db)
            .await
        })
        .await?;

        Ok(())
    }

    /// Return a running job to the pending queue, preserving its progress
    /// columns so a later claim can resume where it left off.
    pub async fn return_to_pending(&self, metadata: &serde_json::Value, db: &PgPool) -> Result<()> {
        with_db_retry("jobs.return_to_pending", || async {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending',
                    pause_requested = false,
                    metadata = $1,
                    updated_at = NOW()
                WHERE id = $2
                "#,
            )
            .bind(metadata)
            .bind(self.id)
            .execute(db)
            .await
        })
        .await?;

        Ok(())
    }

    /// Ask a running job to stop. The worker observes the flag at its next
    /// item boundary; work already persisted stays persisted.
    pub async fn request_cancel(id: Uuid, db: &PgPool) -> Result<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET cancel_requested = true, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    pub async fn request_pause(id: Uuid, db: &PgPool) -> Result<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET pause_requested = true, updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    /// Re-read the control flags mid-run.
    pub async fn control_flags(id: Uuid, db: &PgPool) -> Result<ControlFlags> {
        let flags = with_db_retry("jobs.control_flags", || async {
            sqlx::query_as::<_, ControlFlags>(
                "SELECT cancel_requested, pause_requested FROM jobs WHERE id = $1",
            )
            .bind(id)
            .fetch_one(db)
            .await
        })
        .await?;

        Ok(flags)
    }

    /// Terminal bookkeeping for a cancelled run.
    pub async fn mark_cancelled(&self, db: &PgPool) -> Result<()> {
        self.mark_failed(CANCELLED_MESSAGE, db).await
    }
}

#[derive(FromRow, Debug, Clone, Copy)]
pub struct ControlFlags {
    pub cancel_requested: bool,
    pub pause_requested: bool,
}
