//! Component factory
//!
//! Builds the backup object store, the embedded store and the scrape source
//! from resolved configuration, so both binaries wire components the same way.

use crate::scheduler::{HttpSourceConfig, HttpTableSource, RowSource};
use crate::store::{StoreConfig, TimeSeriesStore};
use crate::{BackupProvider, BackupStorageConfig, Error, Result};
use object_store::{aws::AmazonS3Builder, memory::InMemory, ClientOptions, ObjectStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// File name of the store inside the storage directory.
pub const STORE_FILE_NAME: &str = "coviddy.redb";

/// Object store plus the key prefix backups are written under.
#[derive(Debug, Clone)]
pub struct BackupTarget {
    pub store: Arc<dyn ObjectStore>,
    pub prefix: String,
}

pub struct ComponentFactory;

impl ComponentFactory {
    /// Create the backup object store.
    ///
    /// With the `s3` provider, `bucket` may carry a key prefix
    /// (`bucket/path/prefix`). A custom endpoint enables plain HTTP, for
    /// MinIO and similar.
    pub fn create_backup_target(config: &BackupStorageConfig) -> Result<BackupTarget> {
        let (bucket, prefix) = split_bucket_path(&config.bucket);

        match config.provider {
            BackupProvider::Memory => {
                info!("Using in-memory backup store (development mode)");
                Ok(BackupTarget {
                    store: Arc::new(InMemory::new()),
                    prefix,
                })
            }
            BackupProvider::S3 => {
                if bucket.is_empty() {
                    return Err(Error::Config(
                        "S3_BUCKET required for the s3 backup provider".to_string(),
                    ));
                }
                info!(%bucket, %prefix, region = %config.region, "Using S3 backup store");

                let client_options = ClientOptions::new()
                    .with_connect_timeout(config.connect_timeout)
                    .with_timeout(config.request_timeout);
                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(&bucket)
                    .with_region(&config.region)
                    .with_client_options(client_options);

                if let Some(endpoint) = &config.endpoint {
                    info!(%endpoint, "Using custom S3 endpoint");
                    builder = builder.with_endpoint(endpoint).with_allow_http(true);
                }
                if let Some(key) = &config.access_key_id {
                    builder = builder.with_access_key_id(key);
                }
                if let Some(secret) = &config.secret_access_key {
                    builder = builder.with_secret_access_key(secret);
                }

                Ok(BackupTarget {
                    store: Arc::new(builder.build()?),
                    prefix,
                })
            }
        }
    }

    /// Open or create the store at `storage_dir/coviddy.redb`.
    pub fn open_store(
        storage_dir: &Path,
        lock_timeout: Duration,
    ) -> Result<Arc<TimeSeriesStore>> {
        std::fs::create_dir_all(storage_dir)?;
        let path = storage_dir.join(STORE_FILE_NAME);
        info!(path = %path.display(), "Opening store");
        let config = StoreConfig::new(path).with_lock_timeout(lock_timeout);
        Ok(Arc::new(TimeSeriesStore::open(config)?))
    }

    /// Create the scrape source for the live pages.
    pub fn create_row_source(
        config: HttpSourceConfig,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn RowSource>> {
        let source = HttpTableSource::new(config)?.with_cancellation(cancel);
        Ok(Arc::new(source))
    }
}

/// Split `bucket/key/prefix` into the bucket name and the key prefix.
pub fn split_bucket_path(raw: &str) -> (String, String) {
    let trimmed = raw.trim().trim_matches('/');
    match trimmed.split_once('/') {
        Some((bucket, prefix)) => (bucket.to_string(), prefix.trim_matches('/').to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

/// Parse durations such as `90s`, `30m`, `1h` or `1h 30m`.
///
/// A bare number is taken as seconds. Values too large for a
/// [`Duration`] are rejected.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::Config("empty duration".to_string()));
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw)
        .map_err(|e| Error::Config(format!("invalid duration '{}': {}", raw, e)))
}
