//! Pillar, Match and Draft persistence.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A topic cluster; its descriptive fields form the query for matching and
/// the context for generation.
#[derive(FromRow, Debug, Clone)]
pub struct Pillar {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub audience: Option<String>,
    pub themes: Vec<String>,
    pub keywords: Vec<String>,
    pub embedding: Option<Vector>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pillar {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, project_id, name, description, audience, themes, keywords,
                   embedding, created_at, updated_at
            FROM pillars
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// The combined text the matcher embeds as the pillar's query.
    pub fn embedding_text(&self) -> String {
        let mut parts: Vec<String> = vec![self.name.clone()];
        if let Some(description) = &self.description {
            parts.push(description.clone());
        }
        if let Some(audience) = &self.audience {
            parts.push(format!("Audience: {}", audience));
        }
        if !self.themes.is_empty() {
            parts.push(format!("Themes: {}", self.themes.join(", ")));
        }
        if !self.keywords.is_empty() {
            parts.push(format!("Keywords: {}", self.keywords.join(", ")));
        }
        parts.join("\n")
    }

    /// Cache the computed query embedding on the pillar row.
    pub async fn update_embedding(
        id: Uuid,
        embedding: &[f32],
        pool: &PgPool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE pillars SET embedding = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(Vector::from(embedding.to_vec()))
            .execute(pool)
            .await?;
        Ok(())
    }
}

/// A scored (page, pillar) pair.
#[derive(FromRow, Debug, Clone)]
pub struct Match {
    pub id: Uuid,
    pub page_id: Uuid,
    pub pillar_id: Uuid,
    pub relevance_score: f32,
    pub selected: bool,
    pub excluded: bool,
    pub matched_at: DateTime<Utc>,
}

impl Match {
    /// Idempotent on (page_id, pillar_id): re-running matching updates the
    /// score and timestamp, and leaves operator selection flags alone.
    pub async fn upsert(
        page_id: Uuid,
        pillar_id: Uuid,
        relevance_score: f32,
        pool: &PgPool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO matches (id, page_id, pillar_id, relevance_score)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (page_id, pillar_id) DO UPDATE SET
                relevance_score = EXCLUDED.relevance_score,
                matched_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(page_id)
        .bind(pillar_id)
        .bind(relevance_score)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_pillar(
        pillar_id: Uuid,
        pool: &PgPool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, page_id, pillar_id, relevance_score, selected, excluded, matched_at
            FROM matches
            WHERE pillar_id = $1
            ORDER BY relevance_score DESC
            "#,
        )
        .bind(pillar_id)
        .fetch_all(pool)
        .await
    }
}

/// A generated content artifact with versioned history per pillar.
#[derive(FromRow, Debug, Clone)]
pub struct Draft {
    pub id: Uuid,
    pub pillar_id: Uuid,
    pub content_type: String,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub schema_recommendations: serde_json::Value,
    pub source_page_ids: Vec<Uuid>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}

impl Draft {
    /// Insert a new draft version; regeneration appends rather than
    /// overwrites.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        pillar_id: Uuid,
        content_type: &str,
        title: &str,
        slug: &str,
        content: &str,
        schema_recommendations: &serde_json::Value,
        source_page_ids: &[Uuid],
        pool: &PgPool,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO drafts (
                id, pillar_id, content_type, title, slug, content,
                schema_recommendations, source_page_ids, version
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8,
                (SELECT COALESCE(MAX(version), 0) + 1 FROM drafts WHERE pillar_id = $2)
            )
            RETURNING id, pillar_id, content_type, title, slug, content,
                      schema_recommendations, source_page_ids, version, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(pillar_id)
        .bind(content_type)
        .bind(title)
        .bind(slug)
        .bind(content)
        .bind(schema_recommendations)
        .bind(source_page_ids)
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pillar() -> Pillar {
        Pillar {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "Cloud Migration".to_string(),
            description: Some("Moving legacy workloads to the cloud".to_string()),
            audience: Some("IT managers".to_string()),
            themes: vec!["lift and shift".to_string(), "replatforming".to_string()],
            keywords: vec!["cloud".to_string(), "migration".to_string()],
            embedding: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn embedding_text_concatenates_descriptive_fields() {
        let text = sample_pillar().embedding_text();
        assert!(text.contains("Cloud Migration"));
        assert!(text.contains("Moving legacy workloads"));
        assert!(text.contains("Audience: IT managers"));
        assert!(text.contains("Themes: lift and shift, replatforming"));
        assert!(text.contains("Keywords: cloud, migration"));
    }

    #[test]
    fn embedding_text_skips_empty_fields() {
        let pillar = Pillar {
            description: None,
            audience: None,
            themes: vec![],
            keywords: vec![],
            ..sample_pillar()
        };
        assert_eq!(pillar.embedding_text(), "Cloud Migration");
    }
}
