use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PROFILE_ID: &str = "OChapXkAAAAJ";
pub const DEFAULT_SCHOLAR_BASE: &str = "https://scholar.google.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
pub const PAGE_SIZE: usize = 100;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "scholarfolio",
    version,
    about = "Academic portfolio site backed by cached Google Scholar metrics"
)]
pub struct Cli {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Scholar profile whose metrics and publications are scraped.
    #[arg(long, env = "SCHOLAR_PROFILE_ID", default_value = DEFAULT_PROFILE_ID)]
    pub profile_id: String,

    #[arg(long, value_name = "URL", default_value = DEFAULT_SCHOLAR_BASE)]
    pub scholar_base: String,

    #[arg(long, value_name = "MS", default_value_t = 1000)]
    pub page_delay_ms: u64,

    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub request_timeout_secs: u64,

    #[arg(long, value_name = "DIR", default_value = "public")]
    pub public_dir: String,

    #[arg(long, value_name = "DIR", default_value = "img")]
    pub img_dir: String,

    #[arg(long, value_name = "NAME", default_value = "Abbas Sharifi")]
    pub site_owner: String,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub startup_refresh: bool,

    /// Run a single refresh, print the result as JSON and exit.
    #[arg(long, default_value_t = false)]
    pub once: bool,

    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

impl Cli {
    pub fn scholar_config(&self) -> ScholarConfig {
        ScholarConfig {
            base_url: self.scholar_base.trim_end_matches('/').to_string(),
            page_delay: Duration::from_millis(self.page_delay_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            ..ScholarConfig::default()
        }
    }
}

/// Settings for talking to the remote profile listing.
#[derive(Debug, Clone)]
pub struct ScholarConfig {
    pub base_url: String,
    pub page_size: usize,
    /// Pause between consecutive listing windows, never before the first.
    pub page_delay: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for ScholarConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SCHOLAR_BASE.to_string(),
            page_size: PAGE_SIZE,
            page_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("invalid listing URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ScrapeError::Timeout(err.to_string());
        }
        match err.status() {
            Some(status) => ScrapeError::Status {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => ScrapeError::Network(err.to_string()),
        }
    }
}

/// Aggregated profile statistics. Every count is zero until the first
/// successful refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    #[serde(rename = "publications")]
    pub publication_count: u64,
    #[serde(rename = "citations")]
    pub citation_count: u64,
    pub h_index: u64,
    pub i10_index: u64,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MetricsSnapshot {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_populated(&self) -> bool {
        self.last_updated.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationRecord {
    pub title: String,
    pub authors: String,
    pub venue: String,
    pub year: u32,
    #[serde(rename = "citedBy")]
    pub cited_by_count: u64,
    #[serde(rename = "link")]
    pub source_link: String,
}

/// The three headline statistics of the profile summary table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryStats {
    pub citations: u64,
    pub h_index: u64,
    pub i10_index: u64,
}

/// One fetched listing window, reduced to what pagination needs.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub rows: Vec<RowFields>,
    /// `Some(false)` when the "show more" button is rendered disabled.
    pub more_available: Option<bool>,
}

/// Raw text pulled out of a single listing row, before numeric parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFields {
    pub title: String,
    pub href: String,
    pub authors: String,
    pub venue: String,
    pub year: String,
    pub cited_by: String,
}
