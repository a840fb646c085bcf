//! Scrape outcome handed to the workflow

use serde::{Deserialize, Serialize};
use url::Url;

/// Hash recorded for pages that could not be read
pub const UNREADABLE_PAGE_HASH: &str = "0X0DEAD";

/// Metadata for a scraped page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDetails {
    /// Scheme and host, e.g. `https://example.com`
    pub domain: String,
    pub url_path: String,
    pub hash: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl PageDetails {
    /// Details for a page that could not be read
    pub fn unreadable(url: &str) -> Self {
        let (domain, url_path) = split_url(url);
        Self {
            domain,
            url_path,
            hash: UNREADABLE_PAGE_HASH.to_string(),
            ..Self::default()
        }
    }
}

/// Outcome of one scrape task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeReport {
    #[serde(default)]
    pub details: PageDetails,
    pub success: bool,
    #[serde(default)]
    pub links: Vec<String>,
    pub task_id: String,
}

/// Splits a URL into its domain (scheme and authority) and path
///
/// The path keeps any query string. URLs that cannot be parsed are returned
/// whole as the domain with a path of `/`.
pub fn split_url(url: &str) -> (String, String) {
    let Ok(parsed) = Url::parse(url) else {
        return (url.to_string(), "/".to_string());
    };

    let Some(host) = parsed.host_str() else {
        return (url.to_string(), "/".to_string());
    };

    let domain = match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    };

    let url_path = match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    };

    (domain, url_path)
}
