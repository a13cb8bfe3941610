use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::db::IngestWriter;
use crate::error::{AppError, Result};
use crate::fetcher::FetcherFactory;
use crate::sources::{SourceParser, SourceRegistry};
use crate::types::{CycleReport, DeviceListing, SourceOutcome};

/// Runs sources and hands their listings to the ingest writer.
///
/// Shared by the scheduler and the HTTP trigger. Only one cycle runs at a
/// time; a second request while one is in flight gets `CycleInProgress`.
/// Each source run gets its own fetcher from `new_fetcher`.
pub struct Pipeline {
    registry: SourceRegistry,
    writer: IngestWriter,
    new_fetcher: FetcherFactory,
    health: Arc<HealthState>,
}

/// Clears the in-flight flag however the cycle ends.
struct CycleGuard<'a> {
    health: &'a HealthState,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.health.end_cycle();
    }
}

impl Pipeline {
    pub fn new(
        registry: SourceRegistry,
        writer: IngestWriter,
        new_fetcher: FetcherFactory,
        health: Arc<HealthState>,
    ) -> Self {
        Self { registry, writer, new_fetcher, health }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Scrapes every registered source in order, then ingests everything in one batch.
    pub async fn run_all_scrapers(&self) -> Result<CycleReport> {
        let _guard = self.begin_cycle()?;
        info!("[CYCLE] starting full cycle over {} sources", self.registry.len());
        self.run(self.registry.iter().collect()).await
    }

    /// Scrapes and ingests a single source by (case-insensitive) name.
    pub async fn run_source(&self, name: &str) -> Result<CycleReport> {
        let parser = self
            .registry
            .get(name)
            .ok_or_else(|| AppError::UnknownSource(name.to_string()))?;
        let _guard = self.begin_cycle()?;
        info!("[CYCLE] starting single-source run: {}", parser.name());
        self.run(vec![parser]).await
    }

    /// [`run_all_scrapers`](Self::run_all_scrapers) on its own task, so the
    /// cycle finishes and is ingested even if the caller stops waiting.
    pub async fn run_all_detached(self: Arc<Self>) -> Result<CycleReport> {
        tokio::spawn(async move { self.run_all_scrapers().await }).await?
    }

    /// [`run_source`](Self::run_source) on its own task.
    pub async fn run_source_detached(self: Arc<Self>, name: String) -> Result<CycleReport> {
        tokio::spawn(async move { self.run_source(&name).await }).await?
    }

    fn begin_cycle(&self) -> Result<CycleGuard<'_>> {
        if !self.health.try_begin_cycle() {
            return Err(AppError::CycleInProgress);
        }
        Ok(CycleGuard { health: &self.health })
    }

    async fn run(&self, parsers: Vec<&dyn SourceParser>) -> Result<CycleReport> {
        let started_at = Utc::now();
        let mut sources = Vec::with_capacity(parsers.len());
        let mut listings: Vec<DeviceListing> = Vec::new();

        for parser in parsers {
            let (outcome, found) = self.scrape_source(parser).await;
            sources.push(outcome);
            listings.extend(found);
        }

        let inserted = self.writer.ingest(&listings).await;
        let finished_at = Utc::now();
        self.health.record_cycle(finished_at.timestamp_millis(), inserted as u64);

        let report = CycleReport {
            started_at,
            finished_at,
            sources,
            total_listings: listings.len(),
            inserted,
        };
        let failed = report.sources.iter().filter(|s| s.error.is_some()).count();
        info!(
            total_listings = report.total_listings,
            inserted = report.inserted,
            failed_sources = failed,
            "[CYCLE] done in {}s: {} listings, {} new, {failed} failed sources",
            (finished_at - started_at).num_seconds(),
            report.total_listings,
            report.inserted,
        );
        Ok(report)
    }

    /// One source with its own fetcher. Errors become an outcome with zero listings.
    async fn scrape_source(&self, parser: &dyn SourceParser) -> (SourceOutcome, Vec<DeviceListing>) {
        let name = parser.name();
        let mut outcome = SourceOutcome {
            source: name.to_string(),
            listings: 0,
            pages: 0,
            skipped: 0,
            error: None,
        };

        let mut fetcher = match (self.new_fetcher)() {
            Ok(f) => f,
            Err(e) => {
                error!(source = name, "[CYCLE] could not build fetcher: {e}");
                outcome.error = Some(e.to_string());
                return (outcome, Vec::new());
            }
        };

        let result = parser.scrape(fetcher.as_mut()).await;
        if let Err(e) = fetcher.close().await {
            warn!(source = name, "[CYCLE] closing fetcher failed: {e}");
        }

        match result {
            Ok(scrape) => {
                outcome.listings = scrape.listings.len();
                outcome.pages = scrape.pages;
                outcome.skipped = scrape.skipped;
                info!(
                    source = name,
                    listings = outcome.listings,
                    pages = outcome.pages,
                    skipped = outcome.skipped,
                    "[CYCLE] {name}: {} listings from {} pages",
                    outcome.listings,
                    outcome.pages,
                );
                (outcome, scrape.listings)
            }
            Err(e) => {
                error!(source = name, "[CYCLE] {name} failed: {e}");
                outcome.error = Some(e.to_string());
                (outcome, Vec::new())
            }
        }
    }
}

/// Re-runs the full cycle on a fixed interval.
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    every: Duration,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, every: Duration) -> Self {
        Self { pipeline, every }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick is immediate; the first scheduled run is one interval out

        loop {
            ticker.tick().await;
            match self.pipeline.run_all_scrapers().await {
                Ok(_) => {}
                Err(AppError::CycleInProgress) => warn!("[SCHEDULER] previous cycle still running; skipping"),
                Err(e) => error!("[SCHEDULER] cycle failed: {e}"),
            }
        }
    }
}
