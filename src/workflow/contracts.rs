//! Event payloads and peer request bodies

use crate::scraper::ScrapeReport;
use serde::{Deserialize, Serialize};

/// Crawl task assigned by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeTask {
    pub url: String,
    pub task_type: String,
    pub task_id: String,
}

/// Links discovered by a task, waiting to be queued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkBatch {
    pub links: Vec<String>,
    pub task_id: String,
}

/// Task completion report; also the big broker request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub task_id: String,
    pub is_successful: bool,
}

/// `POST /webpage/add` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorePageRequest {
    pub general_settings: GeneralSettings,
    pub metadata: PageMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub domain: String,
    pub url_path: String,
    pub hash: String,
    pub successfully_read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: String,
    #[serde(rename = "abstract")]
    pub summary: String,
}

impl From<&ScrapeReport> for StorePageRequest {
    fn from(report: &ScrapeReport) -> Self {
        Self {
            general_settings: GeneralSettings {
                domain: report.details.domain.clone(),
                url_path: report.details.url_path.clone(),
                hash: report.details.hash.clone(),
                successfully_read: report.success,
            },
            metadata: PageMetadata {
                title: report.details.title.clone(),
                summary: report.details.description.clone(),
            },
        }
    }
}

/// `POST /queue/add` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueLinksRequest {
    pub links: Vec<LinkEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub url: String,
}

impl From<&LinkBatch> for QueueLinksRequest {
    fn from(batch: &LinkBatch) -> Self {
        Self {
            links: batch
                .links
                .iter()
                .map(|url| LinkEntry { url: url.clone() })
                .collect(),
        }
    }
}
