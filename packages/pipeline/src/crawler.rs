//! Single-page crawling and link discovery.
//!
//! The crawl worker drives the BFS; this module owns the per-page work:
//! fetch rendered HTML through a `BasePageFetcher`, run the extractor, and
//! enumerate same-origin candidate links. `extract_links_from_html` also
//! runs standalone against already-stored HTML so an incremental re-crawl
//! can continue the BFS without re-fetching.

use std::collections::HashSet;

use anyhow::{Context, Result};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::extractor::{self, ExtractedContent};
use crate::kernel::BasePageFetcher;

/// Crawl knobs carried in the job's args payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Glob-style patterns (`*` wildcard) matched against the URL path. If
    /// any are present a link must match at least one.
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Applied after includes; a matching link is dropped.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Politeness delay between fetches.
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    /// Carried for operator visibility; enforcement is external.
    #[serde(default)]
    pub respect_robots: bool,
}

fn default_max_pages() -> usize {
    100
}

fn default_max_depth() -> usize {
    3
}

fn default_rate_limit_ms() -> u64 {
    1000
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            rate_limit_ms: default_rate_limit_ms(),
            respect_robots: false,
        }
    }
}

/// One fetched page: rendered HTML, extracted content, candidate links.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: String,
    pub html: String,
    pub content: ExtractedContent,
    pub links: Vec<String>,
}

/// Normalize a URL for identity purposes: query string and fragment do not
/// denote distinct pages for migration, and a missing scheme means https.
pub fn normalize_url(url: &str) -> String {
    let candidate = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url.trim())
    };

    match Url::parse(&candidate) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            let trimmed = parsed.path().trim_end_matches('/').to_string();
            parsed.set_path(if trimmed.is_empty() { "/" } else { &trimmed });
            parsed.to_string()
        }
        Err(_) => candidate,
    }
}

/// Hex sha256 of the normalized URL - the natural dedup key for a Page
/// within a project.
pub fn url_hash(url: &str) -> String {
    let normalized = normalize_url(url);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fetch one page via the browser and extract its content and links.
pub async fn crawl_page(
    fetcher: &mut dyn BasePageFetcher,
    url: &str,
    config: &CrawlConfig,
) -> Result<CrawledPage> {
    let url = normalize_url(url);
    tracing::debug!(url = %url, "Fetching page");

    let html = fetcher
        .fetch(&url)
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    let content = extractor::extract(&html, &url);
    let links = extract_links_from_html(&html, &url, config);

    tracing::debug!(
        url = %url,
        word_count = content.word_count,
        links_found = links.len(),
        "Page crawled"
    );

    Ok(CrawledPage {
        url,
        html,
        content,
        links,
    })
}

/// Enumerate same-origin candidate links from HTML, filtered by the crawl
/// config's include/exclude patterns and de-duplicated in discovery order.
pub fn extract_links_from_html(html: &str, base_url: &str, config: &CrawlConfig) -> Vec<String> {
    let base = match Url::parse(&normalize_url(base_url)) {
        Ok(u) => u,
        Err(_) => return Vec::new(),
    };
    let link_selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let document = Html::parse_document(html);
    let mut seen: HashSet<String> = HashSet::new();
    let mut links = Vec::new();

    for href in document
        .select(&link_selector)
        .filter_map(|el| el.value().attr("href"))
    {
        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        if !same_origin(&base, &resolved) {
            continue;
        }
        if !path_allowed(resolved.path(), config) {
            continue;
        }

        let normalized = normalize_url(resolved.as_str());
        if seen.insert(normalized.clone()) {
            links.push(normalized);
        }
    }

    links
}

fn same_origin(base: &Url, candidate: &Url) -> bool {
    base.scheme() == candidate.scheme()
        && base.host_str() == candidate.host_str()
        && base.port_or_known_default() == candidate.port_or_known_default()
}

fn path_allowed(path: &str, config: &CrawlConfig) -> bool {
    if !config.include_patterns.is_empty()
        && !config
            .include_patterns
            .iter()
            .any(|p| wildcard_match(p, path))
    {
        return false;
    }
    !config
        .exclude_patterns
        .iter()
        .any(|p| wildcard_match(p, path))
}

/// Glob-style match supporting `*` as "any run of characters".
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut remainder = text;

    // Anchored prefix.
    let first = parts[0];
    if !remainder.starts_with(first) {
        return false;
    }
    remainder = &remainder[first.len()..];

    // Anchored suffix.
    let last = parts[parts.len() - 1];
    if !remainder.ends_with(last) {
        return false;
    }
    let end = remainder.len() - last.len();
    remainder = &remainder[..end];

    // Middle parts must appear in order.
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match remainder.find(part) {
            Some(idx) => remainder = &remainder[idx + part.len()..],
            None => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    struct StaticFetcher {
        html: String,
    }

    #[async_trait]
    impl BasePageFetcher for StaticFetcher {
        async fn fetch(&mut self, _url: &str) -> Result<String> {
            Ok(self.html.clone())
        }

        async fn close(&mut self) {}
    }

    #[test]
    fn urls_differing_only_by_query_or_fragment_normalize_equal() {
        let a = normalize_url("https://example.com/page?utm=x&b=2");
        let b = normalize_url("https://example.com/page#section");
        let c = normalize_url("https://example.com/page");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn normalize_adds_https_scheme() {
        assert_eq!(normalize_url("example.com/page"), "https://example.com/page");
    }

    #[test]
    fn normalize_trims_trailing_slash_but_keeps_root() {
        assert_eq!(normalize_url("https://example.com/a/"), "https://example.com/a");
        assert_eq!(normalize_url("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn url_hash_is_stable_across_query_strings() {
        assert_eq!(
            url_hash("https://example.com/page?session=123"),
            url_hash("https://example.com/page")
        );
        assert_ne!(
            url_hash("https://example.com/page"),
            url_hash("https://example.com/other")
        );
    }

    #[test]
    fn wildcard_patterns() {
        assert!(wildcard_match("/blog/*", "/blog/post-1"));
        assert!(wildcard_match("*.html", "/about.html"));
        assert!(wildcard_match("/docs/*/api", "/docs/v2/api"));
        assert!(wildcard_match("*", "/anything"));
        assert!(!wildcard_match("/blog/*", "/about"));
        assert!(!wildcard_match("/docs/*/api", "/docs/v2/guide"));
        assert!(wildcard_match("/exact", "/exact"));
        assert!(!wildcard_match("/exact", "/exact/nested"));
    }

    #[test]
    fn extract_links_keeps_same_origin_only() {
        let html = r#"
            <a href="/internal">in</a>
            <a href="https://example.com/other">also in</a>
            <a href="https://elsewhere.com/out">out</a>
            <a href="mailto:hi@example.com">mail</a>
        "#;
        let links = extract_links_from_html(html, "https://example.com", &CrawlConfig::default());
        assert_eq!(
            links,
            vec![
                "https://example.com/internal".to_string(),
                "https://example.com/other".to_string()
            ]
        );
    }

    #[test]
    fn extract_links_applies_include_then_exclude() {
        let html = r#"
            <a href="/blog/a">a</a>
            <a href="/blog/drafts/b">b</a>
            <a href="/about">c</a>
        "#;
        let config = CrawlConfig {
            include_patterns: vec!["/blog/*".to_string()],
            exclude_patterns: vec!["/blog/drafts/*".to_string()],
            ..Default::default()
        };
        let links = extract_links_from_html(html, "https://example.com", &config);
        assert_eq!(links, vec!["https://example.com/blog/a".to_string()]);
    }

    #[test]
    fn extract_links_dedupes_preserving_order() {
        let html = r#"
            <a href="/a">1</a>
            <a href="/b">2</a>
            <a href="/a?tracking=1">3</a>
        "#;
        let links = extract_links_from_html(html, "https://example.com", &CrawlConfig::default());
        assert_eq!(
            links,
            vec![
                "https://example.com/a".to_string(),
                "https://example.com/b".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn crawl_page_extracts_content_and_links() {
        let mut fetcher = StaticFetcher {
            html: r#"<html><head><title>Home</title></head><body>
                <main><h1>Welcome</h1><p>Hello there</p></main>
                <a href="/next">next</a>
            </body></html>"#
                .to_string(),
        };

        let page = crawl_page(&mut fetcher, "https://example.com", &CrawlConfig::default())
            .await
            .unwrap();

        assert_eq!(page.url, "https://example.com/");
        assert_eq!(page.content.title, "Home");
        assert_eq!(page.links, vec!["https://example.com/next".to_string()]);
    }
}
