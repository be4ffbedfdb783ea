//! Bulk import of store snapshots
//!
//! An import job copies every document of a snapshot file into the live
//! store:
//!
//! ```text
//! snapshot ──> countries reader ──┐
//!                                 ├──> bounded channel ──> batching writer ──> store
//! snapshot ──> states reader ─────┘
//! ```
//!
//! Readers run on the blocking pool inside one snapshot read transaction and
//! re-parse every body with the legacy-aware decoder. The single writer keeps
//! one batch per collection and commits it through `bulk_upsert` once full,
//! then commits the remainders after both readers finish.
//!
//! Cancellation stops readers and writer at their next channel operation or
//! before the next commit. Batches already committed stay committed.

mod batch;
mod telemetry;

pub use batch::ImportBatches;

use crate::collection::Collection;
use crate::document::Document;
use crate::reporter::ErrorReporter;
use crate::store::{StoreConfig, TimeSeriesStore, DEFAULT_LOCK_TIMEOUT};
use crate::{Error, Result};
use serde::Serialize;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Payloads buffered between the readers and the writer.
pub const IMPORT_CHANNEL_CAPACITY: usize = 50;

/// Documents committed per write transaction.
pub const IMPORT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub channel_capacity: usize,
    pub batch_size: usize,
    /// How long to wait for the snapshot file lock.
    pub snapshot_lock_timeout: Duration,
    /// Remove the snapshot file after a successful import.
    pub delete_snapshot: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            channel_capacity: IMPORT_CHANNEL_CAPACITY,
            batch_size: IMPORT_BATCH_SIZE,
            snapshot_lock_timeout: DEFAULT_LOCK_TIMEOUT,
            delete_snapshot: true,
        }
    }
}

/// Lifecycle of an import job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ImportState {
    Opening,
    Draining,
    Flushing,
    Closed,
    Failed { reason: String },
}

impl ImportState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportState::Closed | ImportState::Failed { .. })
    }
}

/// A document tagged with its destination collection.
#[derive(Debug)]
pub struct ImportPayload {
    pub document: Document,
    pub collection: Collection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectionCounts {
    /// Bodies read from the snapshot.
    pub read: u64,
    /// Bodies that failed to parse and were reported.
    pub skipped: u64,
    /// Documents committed to the store.
    pub flushed: u64,
    /// Write transactions committed.
    pub batches: u64,
}

/// Outcome of a completed import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub countries: CollectionCounts,
    pub states: CollectionCounts,
    pub snapshot_deleted: bool,
}

impl ImportReport {
    pub fn counts(&self, collection: Collection) -> &CollectionCounts {
        match collection {
            Collection::Countries => &self.countries,
            Collection::States => &self.states,
        }
    }

    fn counts_mut(&mut self, collection: Collection) -> &mut CollectionCounts {
        match collection {
            Collection::Countries => &mut self.countries,
            Collection::States => &mut self.states,
        }
    }

    pub fn documents_read(&self) -> u64 {
        self.countries.read + self.states.read
    }

    pub fn documents_flushed(&self) -> u64 {
        self.countries.flushed + self.states.flushed
    }

    pub fn batches_committed(&self) -> u64 {
        self.countries.batches + self.states.batches
    }
}

/// A running import job.
#[derive(Debug)]
pub struct ImportHandle {
    id: Uuid,
    state: watch::Receiver<ImportState>,
    join: JoinHandle<Result<ImportReport>>,
}

impl ImportHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state of the job.
    pub fn state(&self) -> ImportState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<ImportState> {
        self.state.clone()
    }

    /// Wait for the job to finish.
    pub async fn wait(self) -> Result<ImportReport> {
        self.join
            .await
            .map_err(|e| Error::Internal(format!("import job {} panicked: {}", self.id, e)))?
    }
}

/// Copies snapshot files into the live store.
#[derive(Debug, Clone)]
pub struct ImportPipeline {
    store: Arc<TimeSeriesStore>,
    reporter: ErrorReporter,
    config: ImportConfig,
}

impl ImportPipeline {
    pub fn new(store: Arc<TimeSeriesStore>, reporter: ErrorReporter) -> Self {
        Self {
            store,
            reporter,
            config: ImportConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ImportConfig) -> Self {
        self.config = config;
        self
    }

    /// Start importing `snapshot_path` in the background.
    pub fn start(
        &self,
        snapshot_path: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> ImportHandle {
        let id = Uuid::new_v4();
        let (state_tx, state_rx) = watch::channel(ImportState::Opening);
        let pipeline = self.clone();
        let snapshot_path = snapshot_path.into();

        let join = tokio::spawn(async move {
            pipeline
                .run_job(id, &snapshot_path, &cancel, &state_tx)
                .await
        });

        ImportHandle {
            id,
            state: state_rx,
            join,
        }
    }

    /// Import `snapshot_path` and wait for the result.
    pub async fn run(
        &self,
        snapshot_path: impl AsRef<Path>,
        cancel: CancellationToken,
    ) -> Result<ImportReport> {
        let (state_tx, _state_rx) = watch::channel(ImportState::Opening);
        self.run_job(Uuid::new_v4(), snapshot_path.as_ref(), &cancel, &state_tx)
            .await
    }

    async fn run_job(
        &self,
        id: Uuid,
        snapshot_path: &Path,
        cancel: &CancellationToken,
        state: &watch::Sender<ImportState>,
    ) -> Result<ImportReport> {
        let started = Instant::now();
        info!(job_id = %id, snapshot = %snapshot_path.display(), "Starting import");

        let mut report = match self.drain(snapshot_path, cancel, state).await {
            Ok(report) => report,
            Err(e) => {
                error!(job_id = %id, error = %e, "Import failed");
                state.send_replace(ImportState::Failed {
                    reason: e.to_string(),
                });
                telemetry::record_job("failed");
                return Err(e);
            }
        };
        state.send_replace(ImportState::Closed);
        telemetry::record_job("closed");

        if self.config.delete_snapshot {
            match tokio::fs::remove_file(snapshot_path).await {
                Ok(()) => report.snapshot_deleted = true,
                Err(e) => {
                    warn!(
                        job_id = %id,
                        snapshot = %snapshot_path.display(),
                        error = %e,
                        "Failed to remove snapshot"
                    );
                    self.reporter.report("import.cleanup", e.into());
                }
            }
        }

        info!(
            job_id = %id,
            read = report.documents_read(),
            flushed = report.documents_flushed(),
            batches = report.batches_committed(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Import complete"
        );
        Ok(report)
    }

    async fn drain(
        &self,
        snapshot_path: &Path,
        cancel: &CancellationToken,
        state: &watch::Sender<ImportState>,
    ) -> Result<ImportReport> {
        let snapshot_config = StoreConfig::new(snapshot_path)
            .with_lock_timeout(self.config.snapshot_lock_timeout);
        let snapshot =
            tokio::task::spawn_blocking(move || TimeSeriesStore::open_existing(snapshot_config))
                .await
                .map_err(join_error)??;
        let snapshot = Arc::new(snapshot);

        state.send_replace(ImportState::Draining);
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));

        let writer = tokio::spawn(write_batches(
            Arc::clone(&self.store),
            rx,
            self.config.batch_size,
            cancel.clone(),
        ));

        let readers: Vec<_> = Collection::ALL
            .into_iter()
            .map(|collection| {
                let snapshot = Arc::clone(&snapshot);
                let tx = tx.clone();
                let cancel = cancel.clone();
                let reporter = self.reporter.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    read_collection(&snapshot, collection, &tx, &cancel, &reporter)
                });
                (collection, handle)
            })
            .collect();
        drop(tx);

        let mut report = ImportReport::default();
        let mut reader_error = None;
        for (collection, handle) in readers {
            match handle.await.map_err(join_error).and_then(|r| r) {
                Ok(counts) => {
                    let entry = report.counts_mut(collection);
                    entry.read = counts.read;
                    entry.skipped = counts.skipped;
                }
                Err(e) => {
                    warn!(%collection, error = %e, "Import reader stopped");
                    reader_error.get_or_insert(e);
                }
            }
        }
        drop(snapshot);

        state.send_replace(ImportState::Flushing);
        let written = writer.await.map_err(join_error)??;
        if let Some(e) = reader_error {
            return Err(e);
        }

        for collection in Collection::ALL {
            let entry = report.counts_mut(collection);
            let flushed = written.counts(collection);
            entry.flushed = flushed.flushed;
            entry.batches = flushed.batches;
        }
        Ok(report)
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Internal(format!("import task failed: {}", e))
}

#[derive(Debug, Default)]
struct ReadCounts {
    read: u64,
    skipped: u64,
}

fn read_collection(
    snapshot: &TimeSeriesStore,
    collection: Collection,
    tx: &mpsc::Sender<ImportPayload>,
    cancel: &CancellationToken,
    reporter: &ErrorReporter,
) -> Result<ReadCounts> {
    let mut counts = ReadCounts::default();
    let mut stopped = None;

    snapshot.scan_collection(collection, |key, timestamp, body| {
        if cancel.is_cancelled() {
            stopped = Some(Error::ImportCancelled);
            return ControlFlow::Break(());
        }
        counts.read += 1;

        let document = match Document::parse_stored(collection, body) {
            Ok(document) => document,
            Err(e) => {
                counts.skipped += 1;
                debug!(
                    %collection,
                    key,
                    timestamp,
                    error = %e,
                    "Skipping unparsable snapshot document"
                );
                reporter.report("import.parse", e);
                return ControlFlow::Continue(());
            }
        };

        if tx
            .blocking_send(ImportPayload {
                document,
                collection,
            })
            .is_err()
        {
            // The writer only drops its receiver when cancelled or failed.
            stopped = Some(if cancel.is_cancelled() {
                Error::ImportCancelled
            } else {
                Error::Internal(format!("import writer stopped while reading {}", collection))
            });
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    })?;

    telemetry::record_documents(collection.as_str(), "read", counts.read - counts.skipped);
    telemetry::record_documents(collection.as_str(), "skipped", counts.skipped);
    match stopped {
        Some(e) => Err(e),
        None => Ok(counts),
    }
}

async fn write_batches(
    store: Arc<TimeSeriesStore>,
    mut rx: mpsc::Receiver<ImportPayload>,
    batch_size: usize,
    cancel: CancellationToken,
) -> Result<ImportReport> {
    let mut batches = ImportBatches::new(batch_size);
    let mut written = ImportReport::default();

    loop {
        let payload = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::ImportCancelled),
            payload = rx.recv() => payload,
        };
        let Some(ImportPayload {
            document,
            collection,
        }) = payload
        else {
            break;
        };
        if let Some(batch) = batches.push(collection, document) {
            flush_batch(&store, collection, batch, &cancel, &mut written).await?;
        }
    }

    for (collection, batch) in batches.take_remaining() {
        flush_batch(&store, collection, batch, &cancel, &mut written).await?;
    }
    Ok(written)
}

async fn flush_batch(
    store: &Arc<TimeSeriesStore>,
    collection: Collection,
    batch: Vec<Document>,
    cancel: &CancellationToken,
    written: &mut ImportReport,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::ImportCancelled);
    }

    let started = Instant::now();
    let store = Arc::clone(store);
    let count = tokio::task::spawn_blocking(move || store.bulk_upsert(collection, &batch))
        .await
        .map_err(join_error)??;

    let counts = written.counts_mut(collection);
    counts.flushed += count as u64;
    counts.batches += 1;
    telemetry::record_documents(collection.as_str(), "flushed", count as u64);
    telemetry::record_batch_flush(collection.as_str(), started.elapsed().as_secs_f64());
    debug!(%collection, documents = count, "Imported batch");
    Ok(())
}
