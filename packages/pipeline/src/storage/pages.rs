//! Page and PageLink persistence.
//!
//! A Page's natural key is (project_id, url_hash) where url_hash is the
//! sha256 of the normalized URL - re-crawling the same normalized URL
//! updates the row rather than duplicating it, which is also what makes
//! re-delivered crawl jobs idempotent.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::extractor::ExtractedContent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "page_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    #[default]
    Crawled,
    Analyzed,
    Used,
    Archived,
}

/// One crawled URL within a project.
#[derive(FromRow, Debug, Clone)]
pub struct Page {
    pub id: Uuid,
    pub project_id: Uuid,
    pub url: String,
    pub url_hash: String,
    pub raw_html: Option<String>,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub plain_text: Option<String>,
    pub structured_markdown: Option<String>,
    pub word_count: i32,
    pub content_type: Option<String>,
    pub topics: Vec<String>,
    pub quality_score: Option<f32>,
    pub embedding: Option<Vector>,
    pub depth: i32,
    pub status: PageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written by the crawler on first sight or re-fetch.
#[derive(Debug, Clone)]
pub struct NewPage {
    pub project_id: Uuid,
    pub url: String,
    pub url_hash: String,
    pub raw_html: String,
    pub content: ExtractedContent,
    pub depth: i32,
}

const PAGE_COLUMNS: &str = "id, project_id, url, url_hash, raw_html, title, meta_description, \
     plain_text, structured_markdown, word_count, content_type, topics, quality_score, \
     embedding, depth, status, created_at, updated_at";

impl Page {
    pub async fn find_by_hash(
        project_id: Uuid,
        url_hash: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE project_id = $1 AND url_hash = $2"
        ))
        .bind(project_id)
        .bind(url_hash)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Create on first sight, update on re-fetch. A re-fetched page returns
    /// to `crawled` so the analyzer revisits the fresh content.
    pub async fn upsert(new_page: &NewPage, pool: &PgPool) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO pages (
                id, project_id, url, url_hash, raw_html, title, meta_description,
                plain_text, structured_markdown, word_count, content_type, depth, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'crawled')
            ON CONFLICT (project_id, url_hash) DO UPDATE SET
                raw_html = EXCLUDED.raw_html,
                title = EXCLUDED.title,
                meta_description = EXCLUDED.meta_description,
                plain_text = EXCLUDED.plain_text,
                structured_markdown = EXCLUDED.structured_markdown,
                word_count = EXCLUDED.word_count,
                content_type = EXCLUDED.content_type,
                depth = LEAST(pages.depth, EXCLUDED.depth),
                status = 'crawled',
                updated_at = NOW()
            RETURNING {PAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new_page.project_id)
        .bind(&new_page.url)
        .bind(&new_page.url_hash)
        .bind(&new_page.raw_html)
        .bind(&new_page.content.title)
        .bind(&new_page.content.meta_description)
        .bind(&new_page.content.plain_text)
        .bind(&new_page.content.structured_markdown)
        .bind(new_page.content.word_count as i32)
        .bind(&new_page.content.content_type)
        .bind(new_page.depth)
        .fetch_one(pool)
        .await
    }

    /// Pages with extracted text that the analyzer has not yet enriched.
    pub async fn list_needing_analysis(
        project_id: Uuid,
        pool: &PgPool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {PAGE_COLUMNS} FROM pages
            WHERE project_id = $1
              AND status = 'crawled'
              AND plain_text IS NOT NULL
              AND plain_text <> ''
            ORDER BY depth, created_at
            "#
        ))
        .bind(project_id)
        .fetch_all(pool)
        .await
    }

    /// Write the analyzer's enrichment and advance the lifecycle.
    pub async fn update_analysis(
        id: Uuid,
        topics: &[String],
        quality_score: f32,
        embedding: &[f32],
        pool: &PgPool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE pages
            SET topics = $2, quality_score = $3, embedding = $4,
                status = 'analyzed', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(topics)
        .bind(quality_score)
        .bind(Vector::from(embedding.to_vec()))
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Rank analyzed pages by cosine similarity to a query embedding.
    ///
    /// Returns (page_id, similarity) with similarity = 1 - cosine distance,
    /// filtered to `>= threshold`, capped at `limit`.
    pub async fn search_by_similarity(
        project_id: Uuid,
        query_embedding: &[f32],
        threshold: f32,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<(Uuid, f32)>, sqlx::Error> {
        let vector = Vector::from(query_embedding.to_vec());

        let rows: Vec<(Uuid, f64)> = sqlx::query_as(
            r#"
            SELECT id, 1 - (embedding <=> $2) AS similarity
            FROM pages
            WHERE project_id = $1
              AND embedding IS NOT NULL
              AND status IN ('analyzed', 'used')
              AND 1 - (embedding <=> $2) >= $3
            ORDER BY embedding <=> $2
            LIMIT $4
            "#,
        )
        .bind(project_id)
        .bind(&vector)
        .bind(threshold as f64)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(|(id, s)| (id, s as f32)).collect())
    }

    pub async fn mark_used(ids: &[Uuid], pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE pages SET status = 'used', updated_at = NOW() WHERE id = ANY($1)")
            .bind(ids)
            .execute(pool)
            .await?;
        Ok(())
    }
}

/// Directed edge source page -> target URL, resolved to a Page when known.
#[derive(FromRow, Debug, Clone)]
pub struct PageLink {
    pub id: Uuid,
    pub source_page_id: Uuid,
    pub target_url: String,
    pub target_page_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl PageLink {
    /// Idempotent on (source_page_id, target_url); a later resolution of the
    /// target Page fills in target_page_id without losing the edge.
    pub async fn upsert(
        source_page_id: Uuid,
        target_url: &str,
        target_page_id: Option<Uuid>,
        pool: &PgPool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO page_links (id, source_page_id, target_url, target_page_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (source_page_id, target_url) DO UPDATE SET
                target_page_id = COALESCE(EXCLUDED.target_page_id, page_links.target_page_id)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(source_page_id)
        .bind(target_url)
        .bind(target_page_id)
        .execute(pool)
        .await?;
        Ok(())
    }
}
