//! Error types for coviddy

use crate::collection::Collection;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for coviddy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for coviddy
#[derive(Debug)]
pub enum Error {
    /// Embedded store errors
    Storage(redb::Error),
    /// Object store errors
    ObjectStore(object_store::Error),
    /// HTTP client errors
    Http(reqwest::Error),
    /// IO errors
    Io(std::io::Error),
    /// Serialization errors
    Serialization(String),
    /// Configuration errors
    Config(String),
    /// Scrape row does not match the expected record shape
    Schema(String),
    /// A numeric cell could not be parsed
    Parse { field: &'static str, value: String },
    /// Name normalizes to an empty storage key
    EmptyName,
    /// Document has no timestamp
    MissingTimestamp,
    /// Document timestamp predates the first reported cases
    InvalidTimestamp(DateTime<Utc>),
    /// Caller assumed the entity had been stored before
    EntityNotFound { collection: Collection, key: String },
    /// Import job observed cancellation
    ImportCancelled,
    /// Another process holds the store file lock
    StoreLocked { path: PathBuf, waited: Duration },
    /// Bounded retries exhausted
    RetriesExhausted { attempts: u32, source: Box<Error> },
    /// Internal error
    Internal(String),
}

impl Error {
    /// Whether the error was caused by malformed input rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Schema(_)
                | Error::Parse { .. }
                | Error::EmptyName
                | Error::MissingTimestamp
                | Error::InvalidTimestamp(_)
                | Error::Serialization(_)
        )
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Storage(e) => Some(e),
            Error::ObjectStore(e) => Some(e),
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::RetriesExhausted { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Storage(e) => write!(f, "Storage error: {}", e),
            Error::ObjectStore(e) => write!(f, "Object store error: {}", e),
            Error::Http(e) => write!(f, "HTTP error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Schema(msg) => write!(f, "Schema error: {}", msg),
            Error::Parse { field, value } => {
                write!(f, "Failed to parse {} from '{}'", field, value)
            }
            Error::EmptyName => write!(f, "Name is empty after normalization"),
            Error::MissingTimestamp => write!(f, "Document does not have a timestamp"),
            Error::InvalidTimestamp(when) => write!(
                f,
                "Document timestamp {} is earlier than 2019-12-31",
                when.to_rfc3339()
            ),
            Error::EntityNotFound { collection, key } => {
                write!(f, "Entity '{}' not found in {}", key, collection)
            }
            Error::ImportCancelled => write!(f, "Import was cancelled"),
            Error::StoreLocked { path, waited } => write!(
                f,
                "Store {} is locked by another process (waited {:?})",
                path.display(),
                waited
            ),
            Error::RetriesExhausted { attempts, source } => {
                write!(f, "Gave up after {} attempts: {}", attempts, source)
            }
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<redb::Error> for Error {
    fn from(e: redb::Error) -> Self {
        Error::Storage(e)
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Error::Storage(e.into())
    }
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Error::Storage(e.into())
    }
}

impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Self {
        Error::Storage(e.into())
    }
}

impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Self {
        Error::Storage(e.into())
    }
}

impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Self {
        Error::Storage(e.into())
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        Error::ObjectStore(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
