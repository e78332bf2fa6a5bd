use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::extract::{parse_listing, parse_summary, row_to_record};
use super::types::{PublicationRecord, RowFields, ScholarConfig, ScrapeError, SummaryStats};

/// Anything that can turn a URL into a page body.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError>;
}

pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(config: &ScholarConfig) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| ScrapeError::Network(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

pub fn summary_url(config: &ScholarConfig, profile_id: &str) -> Result<String, ScrapeError> {
    citations_url(config, &[("user", profile_id), ("hl", "en")])
}

pub fn listing_url(
    config: &ScholarConfig,
    profile_id: &str,
    offset: usize,
) -> Result<String, ScrapeError> {
    let cstart = offset.to_string();
    let pagesize = config.page_size.to_string();
    citations_url(
        config,
        &[
            ("user", profile_id),
            ("hl", "en"),
            ("cstart", &cstart),
            ("pagesize", &pagesize),
        ],
    )
}

fn citations_url(config: &ScholarConfig, params: &[(&str, &str)]) -> Result<String, ScrapeError> {
    let endpoint = format!("{}/citations", config.base_url.trim_end_matches('/'));
    Url::parse_with_params(&endpoint, params)
        .map(|u| u.to_string())
        .map_err(|err| ScrapeError::InvalidUrl(format!("{endpoint}: {err}")))
}

pub async fn fetch_summary(
    source: &dyn PageSource,
    config: &ScholarConfig,
    profile_id: &str,
) -> Result<SummaryStats, ScrapeError> {
    let url = summary_url(config, profile_id)?;
    debug!(%url, "fetching profile summary");
    let html = source.fetch(&url).await?;
    Ok(parse_summary(&html))
}

/// Walks the listing window by window, handing each page's rows to `consume`.
///
/// Stops on an empty page or a short page. With `stop_on_disabled_more` a
/// disabled "show more" button also ends the walk; only the count walk asks
/// for that. Returns the number of pages requested. Any fetch error aborts
/// the walk.
pub async fn paginate<F>(
    source: &dyn PageSource,
    config: &ScholarConfig,
    profile_id: &str,
    stop_on_disabled_more: bool,
    mut consume: F,
) -> Result<usize, ScrapeError>
where
    F: FnMut(Vec<RowFields>) + Send,
{
    let page_size = config.page_size.max(1);
    let mut offset = 0usize;
    let mut pages = 0usize;

    loop {
        if pages > 0 && !config.page_delay.is_zero() {
            tokio::time::sleep(config.page_delay).await;
        }

        let url = listing_url(config, profile_id, offset)?;
        debug!(%url, offset, "fetching listing window");
        let html = source.fetch(&url).await?;
        pages += 1;

        let page = parse_listing(&html);
        let row_count = page.rows.len();
        if row_count == 0 {
            break;
        }
        consume(page.rows);
        offset += page_size;

        let more_disabled = stop_on_disabled_more && page.more_available == Some(false);
        if row_count < page_size || more_disabled {
            break;
        }
    }

    Ok(pages)
}

pub async fn count_publications(
    source: &dyn PageSource,
    config: &ScholarConfig,
    profile_id: &str,
) -> Result<u64, ScrapeError> {
    let mut total = 0u64;
    paginate(source, config, profile_id, true, |rows| {
        total += rows.len() as u64;
    })
    .await?;
    Ok(total)
}

pub async fn collect_publications(
    source: &dyn PageSource,
    config: &ScholarConfig,
    profile_id: &str,
) -> Result<Vec<PublicationRecord>, ScrapeError> {
    let mut records = Vec::new();
    paginate(source, config, profile_id, false, |rows| {
        records.extend(
            rows.into_iter()
                .filter_map(|row| row_to_record(row, &config.base_url)),
        );
    })
    .await?;
    Ok(records)
}
