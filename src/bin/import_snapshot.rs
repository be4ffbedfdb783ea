//! Offline snapshot import
//!
//! Copies every document of a snapshot file into the store. Ctrl+C stops the
//! import after the batch being committed; committed batches are kept.

use coviddy::config::{parse_duration, ComponentFactory};
use coviddy::import::{
    ImportConfig, ImportPipeline, IMPORT_BATCH_SIZE, IMPORT_CHANNEL_CAPACITY,
};
use coviddy::reporter::{error_channel, run_error_reporter, DEFAULT_REPORT_CAPACITY};
use coviddy::telemetry::Telemetry;
use coviddy::Error;

use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Import a store snapshot into the coviddy store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Snapshot file to import
    snapshot: PathBuf,

    /// Directory holding the target store
    #[arg(long, env = "STORAGE_DIR", default_value = "/var/lib/coviddy")]
    storage_dir: PathBuf,

    /// Documents per write transaction
    #[arg(long, default_value_t = IMPORT_BATCH_SIZE)]
    batch_size: usize,

    /// Payloads buffered between readers and writer
    #[arg(long, default_value_t = IMPORT_CHANNEL_CAPACITY)]
    channel_capacity: usize,

    /// How long to wait for store and snapshot file locks
    #[arg(long, default_value = "5s")]
    lock_timeout: String,

    /// Keep the snapshot file after a successful import
    #[arg(long)]
    keep_snapshot: bool,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let _telemetry = Telemetry::init_for_component("coviddy-import", &args.log_level)?;

    let lock_timeout = parse_duration(&args.lock_timeout)?;
    let store = ComponentFactory::open_store(&args.storage_dir, lock_timeout)?;

    let (reporter, report_rx) = error_channel(DEFAULT_REPORT_CAPACITY);
    let reporter_task = tokio::spawn(run_error_reporter(report_rx));

    let pipeline = ImportPipeline::new(store, reporter).with_config(ImportConfig {
        channel_capacity: args.channel_capacity,
        batch_size: args.batch_size,
        snapshot_lock_timeout: lock_timeout,
        delete_snapshot: !args.keep_snapshot,
    });

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping import");
            signal_cancel.cancel();
        }
    });

    info!(snapshot = %args.snapshot.display(), "Starting import");
    let result = pipeline.run(&args.snapshot, cancel).await;
    drop(pipeline);
    let reported = reporter_task.await?;

    match result {
        Ok(report) => {
            info!(
                read = report.documents_read(),
                flushed = report.documents_flushed(),
                batches = report.batches_committed(),
                snapshot_deleted = report.snapshot_deleted,
                reported,
                "Import complete"
            );
            Ok(())
        }
        Err(Error::ImportCancelled) => {
            warn!(reported, "Import cancelled; committed batches were kept");
            Err(Error::ImportCancelled.into())
        }
        Err(e) => Err(e.into()),
    }
}
