//! Draft generation: deterministic prompt assembly around one external
//! text-generation call, then structured parsing of the response.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kernel::BaseAI;
use crate::storage::Pillar;

/// The five supported output shapes. Exhaustive by construction - adding a
/// sixth forces every match below to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    PillarPage,
    SupportingArticle,
    FaqPage,
    Glossary,
    Comparison,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::PillarPage => "pillar_page",
            ContentType::SupportingArticle => "supporting_article",
            ContentType::FaqPage => "faq_page",
            ContentType::Glossary => "glossary",
            ContentType::Comparison => "comparison",
        }
    }

    /// Type-specific length and structure guidance for the prompt.
    fn instructions(&self) -> &'static str {
        match self {
            ContentType::PillarPage => {
                "Write a comprehensive pillar page of 2000-3000 words. Open with a concise \
                 definition of the topic, then cover every major subtopic with an H2 section \
                 and practical detail. Close with a summary and next steps."
            }
            ContentType::SupportingArticle => {
                "Write a focused supporting article of 800-1200 words covering one subtopic \
                 in depth. Use H2/H3 sections and concrete examples."
            }
            ContentType::FaqPage => {
                "Write an FAQ page with 8-15 questions. Each question is an H2 phrased the \
                 way a user would ask it, followed by a direct 2-4 sentence answer."
            }
            ContentType::Glossary => {
                "Write a glossary of 15-30 terms. Each term is an H2 followed by a one-to-two \
                 sentence plain-language definition, ordered alphabetically."
            }
            ContentType::Comparison => {
                "Write a comparison page of 1000-1500 words. Introduce the options, compare \
                 them in a Markdown table across the dimensions readers care about, then give \
                 a recommendation per audience segment."
            }
        }
    }

    /// Minimal schema.org stub used when the model response carries no
    /// parseable schema block.
    fn default_schema(&self, title: &str) -> serde_json::Value {
        match self {
            ContentType::FaqPage => serde_json::json!({
                "@context": "https://schema.org",
                "@type": "FAQPage",
                "mainEntity": [],
            }),
            ContentType::PillarPage
            | ContentType::SupportingArticle
            | ContentType::Glossary
            | ContentType::Comparison => serde_json::json!({
                "@context": "https://schema.org",
                "@type": "Article",
                "headline": title,
            }),
        }
    }
}

/// Generation request as carried in the job's args payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub pillar_id: Uuid,
    pub content_type: ContentType,
    pub source_page_ids: Vec<Uuid>,
    #[serde(default)]
    pub title_suggestion: Option<String>,
    #[serde(default)]
    pub additional_guidance: Option<String>,
}

/// One source page's contribution to the prompt.
#[derive(Debug, Clone)]
pub struct SourcePage {
    pub title: String,
    pub url: String,
    pub markdown: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedDraft {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub schema_recommendations: serde_json::Value,
}

const SYSTEM_PROMPT: &str = "You are a senior content strategist migrating legacy website \
     content into a structure optimized for AI-powered search. Write clear, factual Markdown \
     grounded strictly in the provided source material. Start your response with the page \
     title as a single `# Title` line. After the content, append a ```json code block with \
     schema.org structured-data recommendations for the page.";

pub struct Generator {
    ai: Arc<dyn BaseAI>,
}

impl Generator {
    pub fn new(ai: Arc<dyn BaseAI>) -> Self {
        Self { ai }
    }

    /// Assemble the prompt, make one generation call, parse the result.
    pub async fn generate_draft(
        &self,
        pillar: &Pillar,
        sources: &[SourcePage],
        request: &GenerateRequest,
    ) -> Result<GeneratedDraft> {
        let user_prompt = build_user_prompt(pillar, sources, request);

        tracing::info!(
            pillar_id = %pillar.id,
            content_type = request.content_type.as_str(),
            source_count = sources.len(),
            prompt_length = user_prompt.len(),
            "Generating draft"
        );

        let response = self
            .ai
            .complete(SYSTEM_PROMPT, &user_prompt)
            .await
            .context("Text generation call failed")?;

        Ok(parse_response(
            &response,
            request.title_suggestion.as_deref(),
            request.content_type,
        ))
    }
}

fn build_user_prompt(
    pillar: &Pillar,
    sources: &[SourcePage],
    request: &GenerateRequest,
) -> String {
    let mut prompt = String::new();

    prompt.push_str("## Topic pillar\n\n");
    prompt.push_str(&pillar.embedding_text());
    prompt.push_str("\n\n## Source material\n\n");

    for (index, source) in sources.iter().enumerate() {
        prompt.push_str(&format!(
            "### Source {} - {} ({})\n\n{}\n\n",
            index + 1,
            source.title,
            source.url,
            source.markdown
        ));
    }

    prompt.push_str("## Task\n\n");
    prompt.push_str(request.content_type.instructions());
    prompt.push('\n');

    if let Some(title) = &request.title_suggestion {
        prompt.push_str(&format!("\nUse this exact title: {}\n", title));
    }
    if let Some(guidance) = &request.additional_guidance {
        prompt.push_str(&format!("\nAdditional guidance: {}\n", guidance));
    }

    prompt
}

/// Parse the model response into a structured draft. An explicit title
/// suggestion wins over the response's `# Title` line.
fn parse_response(
    response: &str,
    title_suggestion: Option<&str>,
    content_type: ContentType,
) -> GeneratedDraft {
    let parsed_title = response
        .lines()
        .find_map(|line| line.trim().strip_prefix("# ").map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty());

    let title = title_suggestion
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or(parsed_title)
        .unwrap_or_else(|| "Untitled draft".to_string());

    let (content, schema) = split_schema_block(response);
    let schema_recommendations =
        schema.unwrap_or_else(|| content_type.default_schema(&title));

    GeneratedDraft {
        slug: slugify(&title),
        title,
        content: content.trim().to_string(),
        schema_recommendations,
    }
}

/// Split a trailing ```json fenced block out of the response, returning the
/// remaining content and the parsed schema if the block parses.
fn split_schema_block(response: &str) -> (String, Option<serde_json::Value>) {
    let Some(fence_start) = response.rfind("```json") else {
        return (response.to_string(), None);
    };
    let after_fence = &response[fence_start + "```json".len()..];
    let Some(fence_end) = after_fence.find("```") else {
        return (response.to_string(), None);
    };

    let block = &after_fence[..fence_end];
    match serde_json::from_str::<serde_json::Value>(block) {
        Ok(schema) => {
            let mut content = response[..fence_start].to_string();
            content.push_str(&after_fence[fence_end + 3..]);
            (content, Some(schema))
        }
        Err(_) => (response.to_string(), None),
    }
}

pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;

    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }

    slug.trim_end_matches('-').to_string()
}
