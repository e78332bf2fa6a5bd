use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{error, info, warn};

use super::cache::ScholarCache;
use super::crawl::{PageSource, collect_publications, count_publications, fetch_summary};
use super::types::{MetricsSnapshot, PublicationRecord, ScholarConfig, ScrapeError};

struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs full scrape cycles and publishes the results into the shared cache.
pub struct MetricsRefresher {
    source: Arc<dyn PageSource>,
    config: ScholarConfig,
    cache: Arc<ScholarCache>,
    profile_id: String,
    in_flight: AtomicBool,
}

impl MetricsRefresher {
    pub fn new(
        source: Arc<dyn PageSource>,
        config: ScholarConfig,
        cache: Arc<ScholarCache>,
        profile_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            config,
            cache,
            profile_id: profile_id.into(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &Arc<ScholarCache> {
        &self.cache
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    /// Refresh the configured profile.
    pub async fn refresh_default(&self) -> MetricsSnapshot {
        let profile_id = self.profile_id.clone();
        self.refresh(&profile_id).await
    }

    /// One end-to-end cycle. Never fails: errors fall back to the last good
    /// snapshot, or to a zeroed snapshot carrying the error message.
    pub async fn refresh(&self, profile_id: &str) -> MetricsSnapshot {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(profile_id, "refresh already in progress, skipping");
            return self.cache.read();
        }
        let _guard = ClearOnDrop(&self.in_flight);

        info!(profile_id, "refreshing scholar metrics");
        match self.run_cycle(profile_id).await {
            Ok((mut metrics, publications)) => {
                let previous = self.cache.read().last_updated;
                metrics.last_updated = Some(next_stamp(previous, Utc::now()));
                info!(
                    publications = metrics.publication_count,
                    citations = metrics.citation_count,
                    h_index = metrics.h_index,
                    i10_index = metrics.i10_index,
                    listed = publications.len(),
                    "scholar metrics updated"
                );
                self.cache.replace(metrics.clone(), publications);
                metrics
            }
            Err(err) => {
                error!(profile_id, error = %err, "scholar refresh failed");
                let current = self.cache.read();
                if let Some(stamp) = current.last_updated {
                    warn!(last_updated = %stamp, "serving cached scholar metrics");
                    current
                } else {
                    MetricsSnapshot::failed(err.to_string())
                }
            }
        }
    }

    async fn run_cycle(
        &self,
        profile_id: &str,
    ) -> Result<(MetricsSnapshot, Vec<PublicationRecord>), ScrapeError> {
        let source = self.source.as_ref();
        let summary = fetch_summary(source, &self.config, profile_id).await?;
        let publication_count = count_publications(source, &self.config, profile_id).await?;
        let publications = collect_publications(source, &self.config, profile_id).await?;

        let metrics = MetricsSnapshot {
            publication_count,
            citation_count: summary.citations,
            h_index: summary.h_index,
            i10_index: summary.i10_index,
            last_updated: None,
            error: None,
        };
        Ok((metrics, publications))
    }
}

/// Successive successful refreshes must carry strictly increasing stamps.
fn next_stamp(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if now <= prev => prev + TimeDelta::milliseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::app::crawl::fake::ScriptedSource;
    use crate::app::extract::fixtures::{numbered_rows, summary_page};

    fn config() -> ScholarConfig {
        ScholarConfig {
            page_delay: Duration::ZERO,
            ..ScholarConfig::default()
        }
    }

    fn successful_cycle(source: ScriptedSource, rows: usize) -> ScriptedSource {
        source
            .page(summary_page("1,234", "10", "5"))
            .page(numbered_rows(rows))
            .page(numbered_rows(rows))
    }

    fn refresher(source: ScriptedSource) -> (MetricsRefresher, Arc<ScriptedSource>) {
        let source = Arc::new(source);
        let refresher = MetricsRefresher::new(
            source.clone(),
            config(),
            Arc::new(ScholarCache::new()),
            "OChapXkAAAAJ",
        );
        (refresher, source)
    }

    #[tokio::test]
    async fn successful_cycle_populates_cache() {
        let (refresher, source) = refresher(successful_cycle(ScriptedSource::new(), 42));
        let before = Utc::now();
        let snapshot = refresher.refresh_default().await;

        assert_eq!(snapshot.publication_count, 42);
        assert_eq!(snapshot.citation_count, 1234);
        assert_eq!(snapshot.h_index, 10);
        assert_eq!(snapshot.i10_index, 5);
        assert!(snapshot.error.is_none());
        assert!(snapshot.last_updated.unwrap() >= before);

        assert_eq!(refresher.cache().read(), snapshot);
        assert_eq!(refresher.cache().read_publications().len(), 42);
        assert_eq!(source.requested().len(), 3);
    }

    #[tokio::test]
    async fn failure_without_prior_cache_reports_error() {
        let (refresher, _) = refresher(ScriptedSource::new().timeout());
        let snapshot = refresher.refresh("OChapXkAAAAJ").await;

        assert_eq!(snapshot.publication_count, 0);
        assert_eq!(snapshot.citation_count, 0);
        assert!(snapshot.last_updated.is_none());
        let message = snapshot.error.expect("error message");
        assert!(message.contains("timed out"), "{message}");

        assert_eq!(refresher.cache().read(), MetricsSnapshot::default());
        assert!(refresher.cache().read_publications().is_empty());
    }

    #[tokio::test]
    async fn failure_keeps_previous_snapshot() {
        let source = successful_cycle(ScriptedSource::new(), 42).timeout();
        let (refresher, _) = refresher(source);

        let good = refresher.refresh_default().await;
        let after_failure = refresher.refresh_default().await;

        assert_eq!(after_failure, good);
        assert_eq!(refresher.cache().read().publication_count, 42);
        assert_eq!(refresher.cache().read().last_updated, good.last_updated);
        assert_eq!(refresher.cache().read_publications().len(), 42);
    }

    #[tokio::test]
    async fn failure_in_listing_walk_aborts_cycle() {
        let source = ScriptedSource::new()
            .page(summary_page("9", "1", "0"))
            .page(numbered_rows(5))
            .timeout();
        let (refresher, _) = refresher(source);
        let snapshot = refresher.refresh_default().await;

        assert!(snapshot.error.is_some());
        assert_eq!(snapshot.citation_count, 0);
        assert!(!refresher.cache().read().is_populated());
    }

    #[tokio::test]
    async fn successive_refreshes_strictly_increase_stamp() {
        let source = successful_cycle(successful_cycle(ScriptedSource::new(), 3), 4);
        let (refresher, _) = refresher(source);

        let first = refresher.refresh_default().await;
        let second = refresher.refresh_default().await;
        assert!(second.last_updated > first.last_updated);
        assert_eq!(second.publication_count, 4);
        assert_eq!(refresher.cache().read_publications().len(), 4);
    }

    #[tokio::test]
    async fn overlapping_refresh_is_skipped() {
        let (refresher, source) = refresher(ScriptedSource::new());
        refresher.in_flight.store(true, Ordering::Release);

        let snapshot = refresher.refresh_default().await;
        assert_eq!(snapshot, MetricsSnapshot::default());
        assert!(source.requested().is_empty());
    }

    #[tokio::test]
    async fn guard_is_released_after_failure() {
        let (refresher, _) = refresher(ScriptedSource::new().timeout());
        refresher.refresh_default().await;
        assert!(!refresher.in_flight.load(Ordering::Acquire));
    }

    #[test]
    fn stamp_moves_forward_on_clock_tie() {
        let now = Utc::now();
        assert_eq!(next_stamp(None, now), now);
        assert_eq!(next_stamp(Some(now), now), now + TimeDelta::milliseconds(1));
        let later = now + TimeDelta::seconds(5);
        assert_eq!(next_stamp(Some(now), later), later);
    }
}
