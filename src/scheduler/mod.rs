//! Scrape scheduler
//!
//! Runs one fetch-parse-store cycle at startup and then one per interval.
//! A cycle that overruns its tick delays the next one instead of queueing
//! another behind it.
//!
//! Within a cycle every collection is handled independently:
//! 1. fetch rows from the [`RowSource`]
//! 2. parse each row; failures are reported and the row dropped
//! 3. stamp all documents with one capture time
//! 4. commit them in one transaction
//! 5. forward the stored documents to the backup channel

mod source;
mod telemetry;

pub use source::{
    HttpSourceConfig, HttpTableSource, RowSource, TableExtractor, TablePage, COUNTRIES_URL,
    STATES_URL,
};

use crate::backup::BackupSender;
use crate::clock::CaptureClock;
use crate::collection::Collection;
use crate::document::Document;
use crate::record::parse_row;
use crate::reporter::ErrorReporter;
use crate::store::TimeSeriesStore;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest interval the scheduler accepts.
pub const MIN_SCRAPE_INTERVAL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    interval: Duration,
}

impl SchedulerConfig {
    /// Reject intervals below [`MIN_SCRAPE_INTERVAL`].
    pub fn new(interval: Duration) -> Result<Self> {
        if interval < MIN_SCRAPE_INTERVAL {
            return Err(Error::Config(format!(
                "scrape interval {:?} is below the minimum of {:?}",
                interval, MIN_SCRAPE_INTERVAL
            )));
        }
        Ok(Self { interval })
    }

    /// Skip the minimum check. Tests only.
    pub fn unchecked(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Outcome of one collection within a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionCycle {
    /// Rows returned by the source, including skipped ones.
    pub rows: usize,
    pub parsed: usize,
    pub rejected: usize,
    pub stored: usize,
    pub fetch_failed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub countries: CollectionCycle,
    pub states: CollectionCycle,
}

impl CycleReport {
    pub fn get(&self, collection: Collection) -> &CollectionCycle {
        match collection {
            Collection::Countries => &self.countries,
            Collection::States => &self.states,
        }
    }

    fn set(&mut self, collection: Collection, cycle: CollectionCycle) {
        match collection {
            Collection::Countries => self.countries = cycle,
            Collection::States => self.states = cycle,
        }
    }

    pub fn stored(&self) -> usize {
        self.countries.stored + self.states.stored
    }
}

/// Periodically scrapes both collections into the store.
pub struct ScrapeScheduler {
    config: SchedulerConfig,
    source: Arc<dyn RowSource>,
    store: Arc<TimeSeriesStore>,
    backup: Option<BackupSender>,
    reporter: ErrorReporter,
    clock: Arc<CaptureClock>,
}

impl ScrapeScheduler {
    pub fn new(
        config: SchedulerConfig,
        source: Arc<dyn RowSource>,
        store: Arc<TimeSeriesStore>,
        reporter: ErrorReporter,
    ) -> Self {
        Self {
            config,
            source,
            store,
            backup: None,
            reporter,
            clock: Arc::new(CaptureClock::new()),
        }
    }

    pub fn with_backup(mut self, backup: BackupSender) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn with_clock(mut self, clock: Arc<CaptureClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run until cancelled. Returns the number of cycles run.
    pub async fn run(&self, cancel: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles = 0;

        info!(interval_secs = self.config.interval.as_secs(), "Scrape scheduler started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.run_cycle(&cancel).await;
                    cycles += 1;
                    info!(
                        countries = report.countries.stored,
                        states = report.states.stored,
                        next_in_secs = self.config.interval.as_secs(),
                        "Scrape cycle complete"
                    );
                }
            }
        }
        info!(cycles, "Scrape scheduler stopped");
        cycles
    }

    /// Scrape both collections once.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();
        for collection in Collection::ALL {
            if cancel.is_cancelled() {
                break;
            }
            report.set(collection, self.scrape_collection(collection, cancel).await);
        }
        telemetry::record_cycle(started.elapsed().as_secs_f64());
        report
    }

    async fn scrape_collection(
        &self,
        collection: Collection,
        cancel: &CancellationToken,
    ) -> CollectionCycle {
        let mut cycle = CollectionCycle::default();
        debug!(%collection, "Scraping");

        let fetched = tokio::select! {
            _ = cancel.cancelled() => return cycle,
            rows = self.source.fetch_rows(collection) => rows,
        };
        let rows = match fetched {
            Ok(rows) => rows,
            Err(e) => {
                cycle.fetch_failed = true;
                telemetry::record_fetch_failure(collection.as_str());
                self.reporter.report("scrape.fetch", e);
                return cycle;
            }
        };
        cycle.rows = rows.len();

        let captured_at = self.clock.now();
        let mut docs = Vec::with_capacity(rows.len());
        for row in rows.iter().filter(|row| row.len() > 1) {
            let parsed = parse_row(collection, row)
                .and_then(|record| Document::from_record(record, captured_at));
            match parsed {
                Ok(doc) => docs.push(doc),
                Err(e) => {
                    cycle.rejected += 1;
                    self.reporter.report("scrape.parse", e);
                }
            }
        }
        cycle.parsed = docs.len();
        telemetry::record_rows(collection.as_str(), "parsed", cycle.parsed as u64);
        telemetry::record_rows(collection.as_str(), "rejected", cycle.rejected as u64);
        if docs.is_empty() {
            warn!(%collection, rows = cycle.rows, "Scrape produced no documents");
            return cycle;
        }

        let store = Arc::clone(&self.store);
        let stored = tokio::task::spawn_blocking(move || {
            store.bulk_upsert(collection, &docs).map(|n| (n, docs))
        })
        .await
        .map_err(|e| Error::Internal(format!("store task failed: {}", e)))
        .and_then(|r| r);

        let docs = match stored {
            Ok((n, docs)) => {
                cycle.stored = n;
                docs
            }
            Err(e) => {
                self.reporter.report("scrape.store", e);
                return cycle;
            }
        };

        if let Some(backup) = &self.backup {
            for doc in docs {
                if cancel.is_cancelled() {
                    break;
                }
                backup.forward(doc).await;
            }
        }
        cycle
    }
}
