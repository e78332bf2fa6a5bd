use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta, TimeZone};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::refresh::MetricsRefresher;

const FULL_DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Real time left until the next midnight after `now` in `now`'s zone.
/// A `now` exactly on midnight waits a full day. Days that gain or lose an
/// hour to a DST change are 25 or 23 hours long.
pub fn until_next_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let tz = now.timezone();
    let next = now.date_naive().succ_opt().and_then(|day| {
        // Zones that skip midnight start the day at the first valid hour.
        (0..=3).find_map(|hour| {
            day.and_hms_opt(hour, 0, 0)
                .and_then(|local| tz.from_local_datetime(&local).earliest())
        })
    });
    match next {
        Some(next) => next.signed_duration_since(now).to_std().unwrap_or(FULL_DAY),
        None => FULL_DAY,
    }
}

/// Kicks off a refresh in the background and returns immediately.
pub fn spawn_refresh(refresher: Arc<MetricsRefresher>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let snapshot = refresher.refresh_default().await;
        debug!(populated = snapshot.is_populated(), "background refresh finished");
    })
}

/// Refresh once now, then every day at local midnight.
pub fn spawn_daily(refresher: Arc<MetricsRefresher>, refresh_on_start: bool) -> JoinHandle<()> {
    if refresh_on_start {
        spawn_refresh(refresher.clone());
    }

    tokio::spawn(run_daily(Local::now, move || {
        let refresher = refresher.clone();
        async move {
            refresher.refresh_default().await;
        }
    }))
}

async fn run_daily<Tz, C, R, Fut>(clock: C, mut refresh: R)
where
    Tz: TimeZone,
    Tz::Offset: Display,
    C: Fn() -> DateTime<Tz>,
    R: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let now = clock();
        let wait = until_next_midnight(&now);
        let next_run = now + TimeDelta::from_std(wait).unwrap_or(TimeDelta::zero());
        info!(next_run = %next_run.format("%Y-%m-%d %H:%M:%S %:z"), "next scholar refresh scheduled");
        tokio::time::sleep(wait).await;

        info!("running scheduled scholar refresh");
        refresh().await;
        // Sleep granularity can wake a hair before midnight.
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
