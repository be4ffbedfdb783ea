//! Backup streaming to object storage
//!
//! Every stored document is teed into a bounded channel. The streamer drains
//! it and writes one gzip-compressed JSON object per document:
//!
//! ```text
//! {prefix}/{storage key}/{YYYY-MM-DD}/{HH}/{RFC3339 timestamp}.json.gz
//! ```
//!
//! Delivery is at most once. Uploads retry with bounded backoff and are
//! reported and dropped once retries run out; the local store stays the
//! copy of record.

mod telemetry;

use crate::document::{CollectionEntry, Document};
use crate::reporter::ErrorReporter;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::{Error, Result};
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Documents buffered between producers and the streamer.
pub const DEFAULT_BACKUP_CAPACITY: usize = 1024;

/// Longest a producer waits for room in the backup channel.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Object key for a document's backup copy.
pub fn backup_key<D: CollectionEntry + ?Sized>(prefix: &str, doc: &D) -> Result<Path> {
    let key = doc.storage_key()?;
    let when = doc.when();
    let object = format!(
        "{}/{}/{}.json.gz",
        key,
        when.format("%Y-%m-%d/%H"),
        doc.timestamp_key()
    );
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        Ok(Path::from(object))
    } else {
        Ok(Path::from(format!("{}/{}", prefix, object)))
    }
}

/// Gzip the canonical body followed by a newline.
pub fn encode_backup<D: CollectionEntry + ?Sized>(doc: &D) -> Result<Bytes> {
    let body = doc.to_bytes()?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    encoder.write_all(&body)?;
    encoder.write_all(b"\n")?;
    Ok(Bytes::from(encoder.finish()?))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupStats {
    pub uploaded: u64,
    pub failed: u64,
}

/// Producer side of the backup channel.
#[derive(Debug, Clone)]
pub struct BackupSender {
    tx: mpsc::Sender<Document>,
    send_timeout: Duration,
    reporter: ErrorReporter,
}

/// Create the backup channel.
pub fn backup_channel(
    capacity: usize,
    send_timeout: Duration,
    reporter: ErrorReporter,
) -> (BackupSender, mpsc::Receiver<Document>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        BackupSender {
            tx,
            send_timeout,
            reporter,
        },
        rx,
    )
}

impl BackupSender {
    /// Queue a document for backup, waiting at most the send timeout.
    ///
    /// Returns false when the document was dropped.
    pub async fn forward(&self, doc: Document) -> bool {
        match self.tx.send_timeout(doc, self.send_timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(doc)) => {
                telemetry::record_dropped("timeout");
                self.reporter.report(
                    "backup.forward",
                    Error::Internal(format!(
                        "backup queue full for {:?}; dropped {} at {}",
                        self.send_timeout,
                        doc.name(),
                        doc.timestamp_key()
                    )),
                );
                false
            }
            Err(SendTimeoutError::Closed(doc)) => {
                telemetry::record_dropped("closed");
                warn!(name = doc.name(), "Backup streamer stopped; dropping document");
                false
            }
        }
    }
}

/// Uploads queued documents to an object store.
#[derive(Debug, Clone)]
pub struct BackupStreamer {
    target: Arc<dyn ObjectStore>,
    prefix: String,
    retry: RetryPolicy,
    reporter: ErrorReporter,
}

impl BackupStreamer {
    pub fn new(target: Arc<dyn ObjectStore>, reporter: ErrorReporter) -> Self {
        Self {
            target,
            prefix: String::new(),
            retry: RetryPolicy::default(),
            reporter,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Upload one document, retrying transient failures.
    pub async fn upload<D: CollectionEntry + ?Sized>(
        &self,
        doc: &D,
        cancel: &CancellationToken,
    ) -> Result<Path> {
        let path = backup_key(&self.prefix, doc)?;
        let body = encode_backup(doc)?;
        let size = body.len() as u64;
        let started = Instant::now();

        let result = retry_with_backoff(&self.retry, cancel, || {
            let target = Arc::clone(&self.target);
            let path = path.clone();
            let payload = PutPayload::from(body.clone());
            async move {
                target
                    .put(&path, payload)
                    .await
                    .map(|_| ())
                    .map_err(Error::from)
            }
        })
        .await;

        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok(()) => {
                telemetry::record_upload("success", elapsed, size);
                Ok(path)
            }
            Err(e) => {
                telemetry::record_upload("failure", elapsed, size);
                Err(e)
            }
        }
    }

    /// Drain `rx` until it closes or `cancel` fires.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<Document>,
        cancel: CancellationToken,
    ) -> BackupStats {
        let mut stats = BackupStats::default();
        info!(prefix = %self.prefix, "Backup streamer started");

        loop {
            let doc = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                doc = rx.recv() => match doc {
                    Some(doc) => doc,
                    None => break,
                },
            };

            match self.upload(&doc, &cancel).await {
                Ok(path) => {
                    stats.uploaded += 1;
                    debug!(%path, "Uploaded backup");
                }
                Err(e) => {
                    stats.failed += 1;
                    self.reporter.report("backup.upload", e);
                }
            }
        }

        info!(
            uploaded = stats.uploaded,
            failed = stats.failed,
            "Backup streamer stopped"
        );
        stats
    }
}
