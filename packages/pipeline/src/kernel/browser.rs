//! Headless Chrome session for crawl jobs.
//!
//! Launching a browser process is expensive, so one session is owned by one
//! crawl job invocation: lazily launched on the first fetch, never shared
//! across jobs, and closed on every exit path. chromiumoxide pages hold CDP
//! connections that are only released by an explicit async close, so the
//! session closes each page after capturing its content and aborts the CDP
//! event handler task when the browser goes down.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::task::JoinHandle;

use super::BasePageFetcher;

/// Default per-page hard timeout. A slow page is a single-page error, never
/// job-fatal.
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(30);

struct LaunchedBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

/// One crawl job's exclusively-owned browser resource.
pub struct BrowserSession {
    inner: Option<LaunchedBrowser>,
    page_timeout: Duration,
}

impl BrowserSession {
    pub fn new() -> Self {
        Self {
            inner: None,
            page_timeout: DEFAULT_PAGE_TIMEOUT,
        }
    }

    pub fn with_page_timeout(page_timeout: Duration) -> Self {
        Self {
            inner: None,
            page_timeout,
        }
    }

    /// Launch the browser process if it is not already running. Idempotent.
    ///
    /// A launch failure here is job-fatal: it usually means no Chrome or
    /// Chromium binary is installed on the worker host.
    async fn ensure_started(&mut self) -> Result<()> {
        if self.inner.is_some() {
            return Ok(());
        }

        tracing::info!("Launching headless browser");

        let config = BrowserConfig::builder()
            .no_sandbox()
            .build()
            .map_err(|e| anyhow::anyhow!("Invalid browser configuration: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch headless browser (is Chromium installed?)")?;

        // The handler drives the CDP websocket; it must be polled for the
        // browser to make progress, and it ends when the browser closes.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        self.inner = Some(LaunchedBrowser {
            browser,
            handler_task,
        });

        Ok(())
    }
}

impl Default for BrowserSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BasePageFetcher for BrowserSession {
    async fn fetch(&mut self, url: &str) -> Result<String> {
        self.ensure_started().await?;
        let Some(inner) = &self.inner else {
            anyhow::bail!("Browser session not started");
        };

        let timeout = self.page_timeout;
        let html = tokio::time::timeout(timeout, async {
            let page = inner
                .browser
                .new_page(url)
                .await
                .with_context(|| format!("Failed to open page for {}", url))?;

            // Let client-side rendering settle before capturing the DOM.
            page.wait_for_navigation()
                .await
                .with_context(|| format!("Navigation failed for {}", url))?;

            let content = page
                .content()
                .await
                .with_context(|| format!("Failed to read rendered content for {}", url))?;

            // Pages leak CDP connections without an explicit close.
            let _ = page.close().await;

            Ok::<String, anyhow::Error>(content)
        })
        .await
        .map_err(|_| anyhow::anyhow!("Page fetch timed out after {:?} for {}", timeout, url))??;

        Ok(html)
    }

    async fn close(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            tracing::info!("Closing headless browser");
            if let Err(e) = inner.browser.close().await {
                tracing::warn!(error = %e, "Failed to close browser cleanly");
            }
            let _ = inner.browser.wait().await;
            inner.handler_task.abort();
        }
    }
}
