use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use super::cache::ScholarCache;
use super::crawl::HttpPageSource;
use super::refresh::MetricsRefresher;
use super::scheduler::spawn_daily;
use super::server::{SiteState, build_router, serve};
use super::types::{Cli, MetricsSnapshot, PublicationRecord};

#[derive(Serialize)]
struct HeadlessReport<'a> {
    metrics: &'a MetricsSnapshot,
    publications: &'a [PublicationRecord],
}

fn init_tracing(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();
}

pub async fn run() -> io::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = cli.scholar_config();
    let source = HttpPageSource::new(&config).map_err(io::Error::other)?;
    let cache = Arc::new(ScholarCache::new());
    let refresher = Arc::new(MetricsRefresher::new(
        Arc::new(source),
        config,
        cache.clone(),
        cli.profile_id.clone(),
    ));

    if cli.once {
        return run_headless(&refresher).await;
    }

    spawn_daily(refresher.clone(), cli.startup_refresh);

    let public_dir = PathBuf::from(&cli.public_dir);
    let state = SiteState::new(cache, &cli.site_owner, &public_dir).map_err(io::Error::other)?;
    let app = build_router(state, public_dir, PathBuf::from(&cli.img_dir));

    let addr = format!("{}:{}", cli.host, cli.port);
    info!(
        profile_id = refresher.profile_id(),
        %addr,
        "starting portfolio server"
    );
    serve(&addr, app).await
}

async fn run_headless(refresher: &MetricsRefresher) -> io::Result<()> {
    let metrics = refresher.refresh_default().await;
    let publications = refresher.cache().read_publications();
    let report = HeadlessReport {
        metrics: &metrics,
        publications: publications.as_slice(),
    };
    let json = serde_json::to_string_pretty(&report).map_err(io::Error::other)?;
    println!("{json}");

    info!(
        publications = metrics.publication_count,
        citations = metrics.citation_count,
        listed = publications.len(),
        "finished headless refresh"
    );
    match metrics.error {
        Some(err) => Err(io::Error::other(err)),
        None => Ok(()),
    }
}
