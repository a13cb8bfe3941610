mod api;
mod config;
mod db;
mod error;
mod fetcher;
mod normalize;
mod pipeline;
mod sources;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::{IngestWriter, Storage};
use crate::error::Result;
use crate::fetcher::page_fetchers;
use crate::pipeline::{Pipeline, Scheduler};
use crate::sources::SourceRegistry;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let storage = Storage::connect(&cfg.db_path).await?;
    info!("{} records on file", storage.count().await?);

    // --- Sources ---
    let registry = SourceRegistry::from_config(&cfg);
    if registry.is_empty() {
        warn!("No sources enabled; check SOURCES. Cycles will ingest nothing.");
    } else {
        let names: Vec<_> = registry.iter().map(|p| p.name()).collect();
        info!("Sources enabled ({}): {}", names.len(), names.join(", "));
    }
    if cfg.serpapi_key.is_empty() && registry.get("AmazonRenewed").is_some() {
        warn!("SERPAPI_KEY not set; AmazonRenewed will fail every cycle.");
    }

    let pipeline = Arc::new(Pipeline::new(
        registry,
        IngestWriter::new(storage.clone()),
        page_fetchers(&cfg.webdriver_url),
        Arc::new(HealthState::new()),
    ));

    // Optional cycle at startup, in the background so the API comes up immediately
    if cfg.run_on_start {
        let startup = Arc::clone(&pipeline);
        tokio::spawn(async move {
            if let Err(e) = startup.run_all_scrapers().await {
                error!("Startup cycle failed: {e}");
            }
        });
    }

    // Scheduled cycles
    info!("Scheduling a full cycle every {}h", cfg.scrape_interval_hours);
    let scheduler = Scheduler::new(Arc::clone(&pipeline), cfg.scrape_interval);
    tokio::spawn(async move { scheduler.run().await });

    // HTTP API server
    let app = router(ApiState { storage, pipeline });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
