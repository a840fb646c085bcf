//! Page scraping for crawl tasks
//!
//! A [`PageScraper`] fetches one page, extracts its title, description and
//! outbound links, fingerprints the body and reports the outcome as a
//! [`ScrapeReport`]. While a scrape is running its URL is visible through
//! [`ActiveUrl`].

mod fetcher;
mod parser;
mod report;

pub use fetcher::{build_http_client, fetch_url, FetchResult};
pub use parser::{parse_html, ParsedPage};
pub use report::{split_url, PageDetails, ScrapeReport, UNREADABLE_PAGE_HASH};

use crate::config::ScraperConfig;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;

/// Shared view of the URL currently being scraped
#[derive(Debug, Clone, Default)]
pub struct ActiveUrl {
    inner: Arc<Mutex<Option<String>>>,
}

impl ActiveUrl {
    pub fn get(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, url: Option<String>) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = url;
    }

    /// Marks `url` active until the returned guard is dropped
    fn track(&self, url: &str) -> ActiveUrlGuard<'_> {
        self.set(Some(url.to_string()));
        ActiveUrlGuard { active: self }
    }
}

struct ActiveUrlGuard<'a> {
    active: &'a ActiveUrl,
}

impl Drop for ActiveUrlGuard<'_> {
    fn drop(&mut self) {
        self.active.set(None);
    }
}

/// Fetches and scrapes pages for crawl tasks
#[derive(Debug, Clone)]
pub struct PageScraper {
    client: Client,
    active: ActiveUrl,
}

impl PageScraper {
    /// Creates a scraper using the configured user agent and timeout
    pub fn new(config: &ScraperConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
            active: ActiveUrl::default(),
        })
    }

    /// URL currently being scraped, if any
    pub fn active_url(&self) -> Option<String> {
        self.active.get()
    }

    /// Handle for reading the active URL from other contexts
    pub fn active_url_tracker(&self) -> ActiveUrl {
        self.active.clone()
    }

    /// Scrapes `url` for task `task_id`
    ///
    /// Never fails: an unreachable page or a non-200 answer produces an
    /// unsuccessful report with hash [`UNREADABLE_PAGE_HASH`] and no links.
    ///
    /// # Arguments
    ///
    /// * `url` - Page to scrape
    /// * `task_type` - Task kind as assigned by the coordinator (logged only)
    /// * `task_id` - Task identifier carried through to the report
    pub async fn scrape_page(&self, url: &str, task_type: &str, task_id: &str) -> ScrapeReport {
        let _active = self.active.track(url);
        tracing::info!("Scraping {} (task {}, type {})", url, task_id, task_type);

        let body = match fetch_url(&self.client, url).await {
            FetchResult::Success { body } => body,
            FetchResult::HttpError { status_code } => {
                tracing::info!("URL '{}' returned status code {}", url, status_code);
                return unreadable(url, task_id);
            }
            FetchResult::NetworkError { error } => {
                tracing::info!("URL '{}' is unreachable: {}", url, error);
                return unreadable(url, task_id);
            }
        };

        let (domain, url_path) = split_url(url);
        let hash = hex::encode(Sha256::digest(body.as_bytes()));

        let parsed = match Url::parse(url) {
            Ok(base_url) => parse_html(&body, &base_url),
            Err(e) => {
                tracing::warn!("Cannot resolve links for '{}': {}", url, e);
                ParsedPage::default()
            }
        };

        tracing::info!(
            "Scraped '{}': title={:?}, {} links, sha256={}",
            url,
            parsed.title.as_deref().unwrap_or(""),
            parsed.links.len(),
            hash
        );

        ScrapeReport {
            details: PageDetails {
                domain,
                url_path,
                hash,
                title: parsed.title.unwrap_or_default(),
                description: parsed.description.unwrap_or_default(),
            },
            success: true,
            links: parsed.links,
            task_id: task_id.to_string(),
        }
    }
}

fn unreadable(url: &str, task_id: &str) -> ScrapeReport {
    ScrapeReport {
        details: PageDetails::unreadable(url),
        success: false,
        links: Vec::new(),
        task_id: task_id.to_string(),
    }
}
