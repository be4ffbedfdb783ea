//! coviddy daemon
//!
//! Scrapes both collections on a schedule, streams stored documents to the
//! backup store and serves the HTTP API.

use coviddy::api::{self, ApiServerConfig, ApiState, Credentials, ImportRegistry};
use coviddy::backup::{
    backup_channel, BackupStreamer, DEFAULT_BACKUP_CAPACITY, DEFAULT_SEND_TIMEOUT,
};
use coviddy::clock::CaptureClock;
use coviddy::config::{parse_duration, ComponentFactory};
use coviddy::import::ImportPipeline;
use coviddy::reporter::{error_channel, run_error_reporter, DEFAULT_REPORT_CAPACITY};
use coviddy::scheduler::{HttpSourceConfig, SchedulerConfig, ScrapeScheduler};
use coviddy::store::DEFAULT_LOCK_TIMEOUT;
use coviddy::telemetry::Telemetry;
use coviddy::{BackupProvider, BackupStorageConfig, Error};

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// coviddy scraper and API server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: SocketAddr,

    /// Directory holding the store file and uploaded snapshots
    #[arg(long, env = "STORAGE_DIR", default_value = "/var/lib/coviddy")]
    storage_dir: PathBuf,

    /// Scrape interval, e.g. 30m or 1h (minimum 30m)
    #[arg(long, env = "SCRAPE_INTERVAL", default_value = "1h")]
    scrape_interval: String,

    /// Comma-separated user:password pairs for the internal API
    #[arg(long, env = "CREDENTIALS", default_value = "", hide_env_values = true)]
    credentials: String,

    /// Backup store: s3 or memory
    #[arg(long, env = "BACKUP_PROVIDER", default_value = "s3")]
    backup_provider: BackupProvider,

    /// Backup bucket, optionally with a key prefix (bucket/prefix)
    #[arg(long, env = "S3_BUCKET", default_value = "coviddy-backups")]
    bucket: String,

    /// S3 region
    #[arg(long, env = "S3_REGION", default_value = "us-east-1")]
    region: String,

    /// S3 endpoint (for MinIO)
    #[arg(long, env = "S3_ENDPOINT")]
    endpoint: Option<String>,

    /// S3 access key
    #[arg(long, env = "S3_ACCESS_KEY", hide_env_values = true)]
    access_key: Option<String>,

    /// S3 secret key
    #[arg(long, env = "S3_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// How long to wait for the store file lock at startup
    #[arg(long, env = "STORE_LOCK_TIMEOUT", default_value = "1s")]
    lock_timeout: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let telemetry = Telemetry::init_for_component("coviddy", &args.log_level)?;

    info!(
        service = %telemetry.config().service_name,
        run_id = telemetry.config().run_id.as_deref().unwrap_or("none"),
        "Starting coviddy"
    );

    let scheduler_config = SchedulerConfig::new(parse_duration(&args.scrape_interval)?)?;
    let credentials: Credentials = args.credentials.parse()?;
    if credentials.is_empty() {
        warn!("No CREDENTIALS configured; internal API will reject every request");
    }
    let lock_timeout = parse_duration_or(&args.lock_timeout, DEFAULT_LOCK_TIMEOUT)?;

    let store = ComponentFactory::open_store(&args.storage_dir, lock_timeout)?;
    let clock = Arc::new(CaptureClock::new());
    if let Some(latest) = store.latest_capture()? {
        info!(latest = %latest, "Seeding capture clock");
        clock.observe(latest);
    }

    let cancel = CancellationToken::new();
    let (reporter, report_rx) = error_channel(DEFAULT_REPORT_CAPACITY);
    let reporter_task = tokio::spawn(run_error_reporter(report_rx));

    // Backup streamer
    let target = ComponentFactory::create_backup_target(&BackupStorageConfig {
        provider: args.backup_provider,
        bucket: args.bucket.clone(),
        region: args.region.clone(),
        endpoint: args.endpoint.clone(),
        access_key_id: args.access_key.clone(),
        secret_access_key: args.secret.clone(),
        ..Default::default()
    })?;
    let (backup, backup_rx) =
        backup_channel(DEFAULT_BACKUP_CAPACITY, DEFAULT_SEND_TIMEOUT, reporter.clone());
    let streamer =
        BackupStreamer::new(target.store, reporter.clone()).with_prefix(target.prefix);
    let backup_cancel = cancel.clone();
    let backup_task = tokio::spawn(async move { streamer.run(backup_rx, backup_cancel).await });

    // Scheduler
    let source =
        ComponentFactory::create_row_source(HttpSourceConfig::default(), cancel.clone())?;
    let scheduler = ScrapeScheduler::new(
        scheduler_config,
        source,
        Arc::clone(&store),
        reporter.clone(),
    )
    .with_backup(backup.clone())
    .with_clock(clock);
    let scheduler_cancel = cancel.clone();
    let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_cancel).await });

    // HTTP API
    let state = ApiState {
        store: Arc::clone(&store),
        importer: ImportPipeline::new(Arc::clone(&store), reporter.clone()),
        imports: ImportRegistry::default(),
        backup: Some(backup),
        storage_dir: args.storage_dir.clone(),
        shutdown: cancel.clone(),
        reporter: reporter.clone(),
    };
    let router = api::build_http_router(state, credentials, &ApiServerConfig::default());
    let listener = TcpListener::bind(args.listen_addr).await?;

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_cancel.cancel();
    });

    info!(listen_addr = %args.listen_addr, "coviddy ready");

    let http_cancel = cancel.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { http_cancel.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("HTTP server error: {e}")))?;

    cancel.cancel();
    let cycles = scheduler_task.await?;
    let stats = backup_task.await?;
    drop(reporter);
    let reported = tokio::time::timeout(Duration::from_secs(5), reporter_task)
        .await
        .unwrap_or(Ok(0))?;

    info!(
        cycles,
        uploaded = stats.uploaded,
        upload_failures = stats.failed,
        reported,
        "coviddy shutting down"
    );

    Ok(())
}

fn parse_duration_or(raw: &str, default: Duration) -> coviddy::Result<Duration> {
    if raw.trim().is_empty() {
        return Ok(default);
    }
    parse_duration(raw)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
