//! # coviddy
//!
//! Scrapes per-country and per-US-state epidemiological counters into an
//! embedded time-series store and streams a copy of every stored document to
//! object storage.
//!
//! ## Architecture
//!
//! - **Record parser**: turns a scraped table row into a typed record
//! - **Document model**: capture time plus record, with storage and timestamp keys
//! - **Store**: redb file with a master index per collection and one bucket per entity
//! - **Import pipeline**: two snapshot readers feeding one batching writer
//! - **Backup streamer**: gzipped JSON uploads with bounded retries
//! - **Scheduler**: periodic fetch-parse-store cycles
//! - **API**: read endpoints plus authenticated upsert and import

pub mod api;
pub mod backup;
pub mod clock;
pub mod collection;
pub mod config;
pub mod document;
pub mod import;
pub mod record;
pub mod reporter;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod telemetry;

mod error;

pub use error::{Error, Result};

use std::time::Duration;

/// Backup object storage configuration
#[derive(Debug, Clone)]
pub struct BackupStorageConfig {
    /// Where backups go.
    pub provider: BackupProvider,
    /// Bucket name, optionally followed by a key prefix (`bucket/prefix`).
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores.
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for BackupStorageConfig {
    fn default() -> Self {
        Self {
            provider: BackupProvider::S3,
            bucket: "coviddy-backups".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Supported backup object stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupProvider {
    Memory,
    S3,
}

impl BackupProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::S3 => "s3",
        }
    }
}

impl std::str::FromStr for BackupProvider {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "s3" | "aws" => Ok(Self::S3),
            other => Err(format!(
                "unknown backup provider '{}'; expected one of memory, s3",
                other
            )),
        }
    }
}

/// Re-exports for convenience
pub mod prelude {
    pub use crate::backup::{backup_channel, BackupSender, BackupStreamer};
    pub use crate::collection::Collection;
    pub use crate::document::{CollectionEntry, Document};
    pub use crate::import::{ImportHandle, ImportPipeline, ImportReport, ImportState};
    pub use crate::record::{parse_row, Record};
    pub use crate::reporter::{error_channel, ErrorReporter};
    pub use crate::scheduler::{RowSource, SchedulerConfig, ScrapeScheduler};
    pub use crate::store::{StoreConfig, TimeRange, TimeSeriesStore};
    pub use crate::{BackupProvider, BackupStorageConfig, Error, Result};
}
