//! Crawl job handler: breadth-first site traversal through a headless
//! browser, persisting pages and link edges as it goes.
//!
//! The crawl is resumable and incremental. Pausing snapshots the BFS
//! frontier into the job's metadata and returns the job to the pending
//! queue; a later claim restores the frontier and continues. Re-crawling a
//! project reuses stored HTML for already-known pages instead of
//! re-fetching, with at most one fresh fetch per URL per run when the
//! stored copy yields nothing new.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use super::job::{Job, JobType};
use super::progress::{CrawlProgress, ScannedPage};
use super::worker::JobHandler;
use crate::crawler::{self, CrawlConfig, CrawledPage};
use crate::kernel::{BasePageFetcher, BrowserSession};
use crate::storage::{with_db_retry, NewPage, Page, PageLink};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlArgs {
    pub seed_url: String,
    #[serde(flatten)]
    pub config: CrawlConfig,
}

pub struct CrawlJobHandler;

#[async_trait]
impl JobHandler for CrawlJobHandler {
    fn job_type(&self) -> JobType {
        JobType::Crawl
    }

    async fn handle(&self, job: &Job, db: &PgPool) -> Result<()> {
        let args: CrawlArgs = serde_json::from_value(
            job.args.clone().context("Crawl job has no args")?,
        )
        .context("Invalid crawl args")?;

        let mut browser = BrowserSession::new();
        let result = run_crawl(job, &args, &mut browser, db).await;
        // The browser process must not outlive the job, success or not.
        browser.close().await;
        result
    }
}

/// What to do with a URL the queue handed us.
#[derive(Debug, PartialEq, Eq)]
enum FetchDecision {
    /// No stored copy (or an empty one): fetch through the browser.
    Fetch,
    /// Stored HTML still yields unseen links: reuse it without a fetch.
    ReuseStored,
    /// Stored HTML is exhausted and we have not re-fetched this URL yet
    /// this run: fetch once to pick up new content.
    Refetch,
}

fn decide_fetch(
    existing: Option<&Page>,
    stored_links_yield_new: bool,
    already_refetched: bool,
) -> FetchDecision {
    match existing {
        Some(page) if page.raw_html.as_deref().is_some_and(|h| !h.is_empty()) => {
            if stored_links_yield_new || already_refetched {
                FetchDecision::ReuseStored
            } else {
                FetchDecision::Refetch
            }
        }
        _ => FetchDecision::Fetch,
    }
}

pub async fn run_crawl(
    job: &Job,
    args: &CrawlArgs,
    fetcher: &mut dyn BasePageFetcher,
    db: &PgPool,
) -> Result<()> {
    let config = &args.config;
    let seed = crawler::normalize_url(&args.seed_url);

    // Restore a paused run's frontier if the metadata carries one.
    let mut progress: CrawlProgress = job
        .metadata
        .clone()
        .and_then(|m| serde_json::from_value(m).ok())
        .unwrap_or_default();

    let mut visited: HashSet<String> = progress.visited.drain(..).collect();
    let mut queue: VecDeque<(String, u32)> = progress.to_visit.drain(..).collect();
    if queue.is_empty() && visited.is_empty() {
        queue.push_back((seed.clone(), 0));
    } else {
        info!(
            job_id = %job.id,
            visited = visited.len(),
            queued = queue.len(),
            "Resuming paused crawl"
        );
    }
    progress.paused = false;
    progress.pause_requested = false;

    let mut enqueued: HashSet<String> = queue.iter().map(|(u, _)| u.clone()).collect();
    let mut refetched: HashSet<String> = HashSet::new();
    let mut page_ids: HashMap<String, Uuid> = HashMap::new();
    let mut processed = visited.len();
    let mut first_error = progress.errors.first().map(|e| e.error.clone());

    info!(
        job_id = %job.id,
        seed = %seed,
        max_pages = config.max_pages,
        max_depth = config.max_depth,
        "Starting crawl"
    );

    while let Some((url, depth)) = queue.pop_front() {
        if processed >= config.max_pages {
            break;
        }

        let flags = Job::control_flags(job.id, db).await?;
        if flags.cancel_requested {
            info!(job_id = %job.id, "Crawl cancelled");
            progress.status_message = format!("Cancelled after {} pages", processed);
            progress.queue_size = queue.len();
            let metadata = serde_json::to_value(&progress)?;
            job.update_progress(
                processed as i32,
                Some(processed as i32),
                completion_percent(processed, config.max_pages),
                &metadata,
                db,
            )
            .await?;
            job.mark_cancelled(db).await?;
            return Ok(());
        }
        if flags.pause_requested {
            info!(job_id = %job.id, "Crawl pausing, snapshotting frontier");
            queue.push_front((url, depth));
            progress.pause_requested = true;
            progress.paused = true;
            progress.status_message = format!("Paused after {} pages", processed);
            progress.queue_size = queue.len();
            progress.visited = visited.into_iter().collect();
            progress.to_visit = queue.into_iter().collect();
            let metadata = serde_json::to_value(&progress)?;
            job.return_to_pending(&metadata, db).await?;
            return Ok(());
        }

        if visited.contains(&url) {
            continue;
        }
        visited.insert(url.clone());
        progress.current_url = Some(truncate_url(&url));
        progress.depth = depth;

        let hash = crawler::url_hash(&url);
        let existing = with_db_retry("pages.find_by_hash", || {
            Page::find_by_hash(job.project_id, &hash, db)
        })
        .await?;

        // Probe the stored copy's links before deciding to hit the network.
        let stored_links = existing
            .as_ref()
            .and_then(|p| p.raw_html.as_deref())
            .map(|html| crawler::extract_links_from_html(html, &url, config))
            .unwrap_or_default();
        let yields_new = stored_links
            .iter()
            .any(|l| !visited.contains(l) && !enqueued.contains(l));

        let decision = decide_fetch(existing.as_ref(), yields_new, refetched.contains(&url));

        let (page, links, fetched) = match decision {
            FetchDecision::ReuseStored => {
                let page = existing.context("Stored page disappeared mid-crawl")?;
                info!(job_id = %job.id, url = %url, "Reusing stored page");
                (page, stored_links, false)
            }
            FetchDecision::Fetch | FetchDecision::Refetch => {
                if decision == FetchDecision::Refetch {
                    refetched.insert(url.clone());
                }
                match crawler::crawl_page(fetcher, &url, config).await {
                    Ok(crawled) => {
                        let page = persist_page(job, &crawled, depth, db).await?;
                        (page, crawled.links, true)
                    }
                    Err(e) => {
                        warn!(job_id = %job.id, url = %url, error = %e, "Page fetch failed");
                        let message = format!("{:#}", e);
                        if first_error.is_none() {
                            first_error = Some(message.clone());
                        }
                        progress.record_error(&url, &message);
                        progress.queue_size = queue.len();
                        flush_progress(job, &progress, processed, &queue, config, db).await;
                        continue;
                    }
                }
            }
        };

        page_ids.insert(url.clone(), page.id);
        for link in &links {
            // Resolve the edge's target when we already hold that page.
            let target_id = page_ids.get(link).copied();
            with_db_retry("page_links.upsert", || {
                PageLink::upsert(page.id, link, target_id, db)
            })
            .await?;
            if depth < config.max_depth as u32 && !visited.contains(link) && !enqueued.contains(link)
            {
                enqueued.insert(link.clone());
                queue.push_back((link.clone(), depth + 1));
            }
        }

        processed += 1;
        progress.links_found = links.len();
        progress.total_links_discovered += links.len();
        progress.queue_size = queue.len();
        progress.record_page(ScannedPage {
            title: page.title.clone().unwrap_or_default(),
            url: url.clone(),
            word_count: page.word_count.max(0) as usize,
            links_count: links.len(),
            depth,
        });
        progress.phrase_status(processed, config.max_pages);

        // First page immediately, then every other page, so the UI sees
        // movement without a write per item.
        if processed == 1 || processed % 2 == 0 {
            flush_progress(job, &progress, processed, &queue, config, db).await;
        }

        if fetched && !queue.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(config.rate_limit_ms)).await;
        }
    }

    // Zero pages with errors means nothing ever worked; zero pages with no
    // errors (a zero-page budget) is a valid empty run.
    if processed == 0 {
        if let Some(detail) = first_error {
            anyhow::bail!(
                "Crawl produced no pages: {} (if fetches failed immediately, \
                 check that a Chromium binary is available)",
                detail
            );
        }
    }

    progress.current_url = None;
    progress.status_message = format!("Crawl complete ({} pages scanned)", processed);
    let metadata = serde_json::to_value(&progress)?;
    job.mark_completed(processed as i32, Some(processed as i32), &metadata, db)
        .await?;

    info!(
        job_id = %job.id,
        pages = processed,
        failed = progress.failed_pages,
        links = progress.total_links_discovered,
        "Crawl finished"
    );
    Ok(())
}

async fn persist_page(
    job: &Job,
    crawled: &CrawledPage,
    depth: u32,
    db: &PgPool,
) -> Result<Page> {
    let new_page = NewPage {
        project_id: job.project_id,
        url: crawled.url.clone(),
        url_hash: crawler::url_hash(&crawled.url),
        raw_html: crawled.html.clone(),
        content: crawled.content.clone(),
        depth: depth as i32,
    };
    let page = with_db_retry("pages.upsert", || Page::upsert(&new_page, db)).await?;
    Ok(page)
}

/// Best-effort metadata write; a lost progress update never fails the crawl.
async fn flush_progress(
    job: &Job,
    progress: &CrawlProgress,
    processed: usize,
    queue: &VecDeque<(String, u32)>,
    config: &CrawlConfig,
    db: &PgPool,
) {
    let total = (processed + queue.len()).min(config.max_pages);
    let metadata = match serde_json::to_value(progress) {
        Ok(m) => m,
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Progress serialization failed");
            return;
        }
    };
    if let Err(e) = job
        .update_progress(
            processed as i32,
            Some(total as i32),
            completion_percent(processed, config.max_pages),
            &metadata,
            db,
        )
        .await
    {
        warn!(job_id = %job.id, error = %e, "Progress update failed");
    }
}

/// Keep the UI's current-URL field to a sane display length.
fn truncate_url(url: &str) -> String {
    const MAX: usize = 200;
    if url.len() <= MAX {
        return url.to_string();
    }
    let cut = url
        .char_indices()
        .take_while(|(i, _)| *i < MAX)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(MAX);
    format!("{}...", &url[..cut])
}

fn completion_percent(processed: usize, max_pages: usize) -> f64 {
    if max_pages == 0 {
        return 100.0;
    }
    (processed as f64 * 100.0 / max_pages as f64).min(100.0)
}
