//! Typed progress payloads serialized into the job's metadata column.
//!
//! The UI polls jobs and renders these directly, so field names are
//! camelCase and shapes stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rolling window of recent scanned pages kept in metadata. The full page
/// set lives in the pages table; this is just a live preview for the UI.
const MAX_SCANNED_PAGES: usize = 100;
/// Rolling window of recent errors kept in metadata.
const MAX_ERRORS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedPage {
    pub title: String,
    pub url: String,
    pub word_count: usize,
    pub links_count: usize,
    pub depth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlError {
    pub url: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Live crawl state, both for the UI and for resuming a paused run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlProgress {
    pub status_message: String,
    #[serde(default)]
    pub current_url: Option<String>,
    pub depth: u32,
    pub queue_size: usize,
    pub links_found: usize,
    #[serde(default)]
    pub last_page_title: Option<String>,
    #[serde(default)]
    pub scanned_pages: Vec<ScannedPage>,
    pub total_links_discovered: usize,
    #[serde(default)]
    pub errors: Vec<CrawlError>,
    pub failed_pages: usize,
    pub pause_requested: bool,
    pub paused: bool,

    // Frontier snapshot, written only when pausing. A resumed run
    // restores its visited set and BFS queue from here.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub visited: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_visit: Vec<(String, u32)>,
}

impl CrawlProgress {
    /// Rolling window: at capacity the oldest entry is evicted so the UI
    /// always shows the most recent pages.
    pub fn record_page(&mut self, page: ScannedPage) {
        self.last_page_title = Some(page.title.clone());
        if self.scanned_pages.len() == MAX_SCANNED_PAGES {
            self.scanned_pages.remove(0);
        }
        self.scanned_pages.push(page);
    }

    pub fn record_error(&mut self, url: &str, error: &str) {
        self.failed_pages += 1;
        if self.errors.len() == MAX_ERRORS {
            self.errors.remove(0);
        }
        self.errors.push(CrawlError {
            url: url.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Human-readable phase label derived from completion percentage.
    pub fn phrase_status(&mut self, processed: usize, max_pages: usize) {
        let pct = if max_pages == 0 {
            0
        } else {
            processed * 100 / max_pages
        };
        self.status_message = match pct {
            0..=4 => "Initializing crawl...".to_string(),
            5..=39 => format!("Exploring site structure ({} pages scanned)", processed),
            40..=79 => format!("Gathering content ({} pages scanned)", processed),
            80..=99 => format!("Crawl nearly complete ({} pages scanned)", processed),
            _ => format!("Crawl complete ({} pages scanned)", processed),
        };
    }
}

/// Per-item progress for the analyze, match, and generate workers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemProgress {
    pub status_message: String,
    #[serde(default)]
    pub current_item: Option<String>,
    #[serde(default)]
    pub errors: Vec<CrawlError>,
}

impl ItemProgress {
    pub fn new(status_message: impl Into<String>) -> Self {
        Self {
            status_message: status_message.into(),
            current_item: None,
            errors: Vec::new(),
        }
    }

    pub fn record_error(&mut self, item: &str, error: &str) {
        if self.errors.len() == MAX_ERRORS {
            self.errors.remove(0);
        }
        self.errors.push(CrawlError {
            url: item.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}
