//! Per-page analysis: embedding, topic extraction, and a deterministic
//! quality score.
//!
//! Topics come from one LLM call and are an enhancement, not a correctness
//! requirement - any call or parse failure yields an empty topic list
//! rather than failing the page. The quality score is pure arithmetic so it
//! is exactly reproducible in tests.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::kernel::{generate_with_retry, BaseAI, BaseEmbeddingService};

const TOPICS_SYSTEM_PROMPT: &str = "You are a content analyst. Extract the main substantive \
     topics covered by a web page. Reply with only a JSON array of 3 to 7 short topic strings, \
     no other text.";

const MAX_TOPICS: usize = 7;

/// Analyzer output for one page.
#[derive(Debug, Clone)]
pub struct PageAnalysis {
    pub embedding: Vec<f32>,
    pub topics: Vec<String>,
    pub quality_score: f32,
}

pub struct Analyzer {
    ai: Arc<dyn BaseAI>,
    embedder: Arc<dyn BaseEmbeddingService>,
}

impl Analyzer {
    pub fn new(ai: Arc<dyn BaseAI>, embedder: Arc<dyn BaseEmbeddingService>) -> Self {
        Self { ai, embedder }
    }

    /// Analyze one page's extracted text (structured Markdown, so the
    /// quality score can see headings and lists).
    pub async fn analyze_page(&self, text: &str) -> Result<PageAnalysis> {
        let embedding = generate_with_retry(self.embedder.as_ref(), text)
            .await
            .context("Failed to generate page embedding")?;

        let topics = self.extract_topics(text).await;
        let quality_score = quality_score(text);

        Ok(PageAnalysis {
            embedding,
            topics,
            quality_score,
        })
    }

    async fn extract_topics(&self, text: &str) -> Vec<String> {
        let response = match self.ai.complete(TOPICS_SYSTEM_PROMPT, text).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Topic extraction call failed, continuing without topics");
                return Vec::new();
            }
        };

        parse_topics(&response)
    }
}

/// Parse an LLM topic response leniently: the array may be wrapped in prose
/// or a code fence. Anything unparseable yields no topics.
fn parse_topics(response: &str) -> Vec<String> {
    let start = match response.find('[') {
        Some(i) => i,
        None => return Vec::new(),
    };
    let end = match response.rfind(']') {
        Some(i) if i > start => i,
        _ => return Vec::new(),
    };

    let parsed: Vec<String> = match serde_json::from_str(&response[start..=end]) {
        Ok(topics) => topics,
        Err(_) => return Vec::new(),
    };

    parsed
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .take(MAX_TOPICS)
        .collect()
}

/// Deterministic heuristic quality score in [0, 1].
///
/// Four weighted sub-scores, capped at 1.0:
/// - word-count band: 0 / 0.1 / 0.2 / 0.3
/// - structural richness (headings and lists): 0.3 / 0.15 / 0
/// - average sentence length band: 0.2 / 0.1 / 0
/// - lexical diversity (unique-word ratio): 0.2 / 0.1 / 0
pub fn quality_score(text: &str) -> f32 {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }

    let mut score = 0.0f32;

    // Word count band
    score += match words.len() {
        n if n >= 1000 => 0.3,
        n if n >= 500 => 0.2,
        n if n >= 200 => 0.1,
        _ => 0.0,
    };

    // Structural richness (Markdown headings and list markers)
    let has_headings = text.lines().any(|l| l.trim_start().starts_with('#'));
    let has_lists = text.lines().any(|l| {
        let trimmed = l.trim_start();
        trimmed.starts_with("- ")
            || trimmed
                .split_once(". ")
                .map(|(n, _)| n.chars().all(|c| c.is_ascii_digit()) && !n.is_empty())
                .unwrap_or(false)
    });
    score += match (has_headings, has_lists) {
        (true, true) => 0.3,
        (true, false) | (false, true) => 0.15,
        (false, false) => 0.0,
    };

    // Sentence length readability band
    let sentence_count = text
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1);
    let avg_words_per_sentence = words.len() as f32 / sentence_count as f32;
    score += if (10.0..=20.0).contains(&avg_words_per_sentence) {
        0.2
    } else if (5.0..=25.0).contains(&avg_words_per_sentence) {
        0.1
    } else {
        0.0
    };

    // Lexical diversity
    let unique: HashSet<String> = words
        .iter()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();
    let diversity = unique.len() as f32 / words.len() as f32;
    score += if diversity > 0.5 {
        0.2
    } else if diversity > 0.3 {
        0.1
    } else {
        0.0
    };

    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedAI {
        response: Result<String, String>,
    }

    #[async_trait]
    impl BaseAI for FixedAI {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            match &self.response {
                Ok(s) => Ok(s.clone()),
                Err(e) => anyhow::bail!("{}", e),
            }
        }
    }

    struct FixedEmbedder;

    #[async_trait]
    impl BaseEmbeddingService for FixedEmbedder {
        async fn generate(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1; 16])
        }

        fn dimensions(&self) -> usize {
            16
        }
    }

    #[test]
    fn quality_score_is_zero_for_empty_text() {
        assert_eq!(quality_score(""), 0.0);
        assert_eq!(quality_score("   \n  "), 0.0);
    }

    #[test]
    fn quality_score_is_deterministic_and_bounded() {
        let samples = [
            "Short text.",
            "# Heading\n\n- item one\n- item two\n\nSome body text follows here.",
            &"word ".repeat(1200),
        ];
        for text in samples {
            let a = quality_score(text);
            let b = quality_score(text);
            assert_eq!(a, b);
            assert!((0.0..=1.0).contains(&a), "score {} out of range", a);
        }
    }

    #[test]
    fn quality_score_rewards_structure() {
        // Identical prose; one variant adds headings and lists.
        let body = "These sentences carry about twelve words each to hit the band nicely. \
                    Another sentence follows with roughly comparable length and different vocabulary. ";
        let plain = body.repeat(20);
        let structured = format!("# Overview\n\n- first point\n- second point\n\n{}", plain);
        assert!(quality_score(&structured) > quality_score(&plain));
    }

    #[test]
    fn quality_score_word_count_bands() {
        // Single repeated word keeps diversity and structure contributions at
        // zero; one long "sentence" keeps readability at zero.
        let text_100 = "word ".repeat(100);
        let text_300 = "word ".repeat(300);
        let text_700 = "word ".repeat(700);
        let text_1500 = "word ".repeat(1500);
        assert_eq!(quality_score(&text_100), 0.0);
        assert_eq!(quality_score(&text_300), 0.1);
        assert_eq!(quality_score(&text_700), 0.2);
        assert_eq!(quality_score(&text_1500), 0.3);
    }

    #[test]
    fn parse_topics_accepts_plain_and_fenced_arrays() {
        assert_eq!(
            parse_topics(r#"["pricing", "support"]"#),
            vec!["pricing".to_string(), "support".to_string()]
        );
        assert_eq!(
            parse_topics("```json\n[\"a\", \"b\"]\n```"),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn parse_topics_caps_at_seven_and_rejects_garbage() {
        let many: Vec<String> = (0..12).map(|i| format!("\"t{}\"", i)).collect();
        let response = format!("[{}]", many.join(","));
        assert_eq!(parse_topics(&response).len(), 7);

        assert!(parse_topics("no array here").is_empty());
        assert!(parse_topics("[not json").is_empty());
        assert!(parse_topics("{\"a\": 1}").is_empty());
    }

    #[tokio::test]
    async fn analyze_page_survives_topic_failure() {
        let analyzer = Analyzer::new(
            Arc::new(FixedAI {
                response: Err("llm down".to_string()),
            }),
            Arc::new(FixedEmbedder),
        );

        let analysis = analyzer
            .analyze_page("# Title\n\nSome page text here.")
            .await
            .unwrap();

        assert!(analysis.topics.is_empty());
        assert_eq!(analysis.embedding.len(), 16);
        assert!(analysis.quality_score > 0.0);
    }

    #[tokio::test]
    async fn analyze_page_collects_topics() {
        let analyzer = Analyzer::new(
            Arc::new(FixedAI {
                response: Ok(r#"["migration", "hosting"]"#.to_string()),
            }),
            Arc::new(FixedEmbedder),
        );

        let analysis = analyzer.analyze_page("Some text").await.unwrap();
        assert_eq!(analysis.topics, vec!["migration", "hosting"]);
    }
}
