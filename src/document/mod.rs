//! Document model
//!
//! A [`Document`] is a parsed record stamped with its capture time. Documents
//! are stored under two keys:
//! - the storage key, derived from the entity name, picks the entity bucket
//! - the timestamp key, RFC3339 at second precision, orders documents within it

mod stored;

use crate::collection::Collection;
use crate::record::Record;
use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use stored::StoredDocument;

/// 2019-12-31T00:00:00Z, the earliest capture time a document may carry.
pub const EARLIEST_CAPTURE_SECS: i64 = 1_577_750_400;

/// Minimal capability the store and the backup streamer rely on.
pub trait CollectionEntry: Send + Sync {
    fn when(&self) -> DateTime<Utc>;

    /// Collection the entry belongs in.
    fn collection(&self) -> Collection;

    fn name(&self) -> &str;

    /// Canonical serialized body.
    fn to_bytes(&self) -> Result<Vec<u8>>;

    fn storage_key(&self) -> Result<String> {
        storage_key(self.name())
    }

    fn timestamp_key(&self) -> String {
        timestamp_key(self.when())
    }
}

/// A record captured at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    when: DateTime<Utc>,
    record: Record,
}

impl Document {
    /// Wrap a record with its capture time.
    ///
    /// The name is trimmed and must yield a non-empty storage key. The
    /// capture time is truncated to whole seconds and must not predate
    /// 2019-12-31.
    pub fn from_record(mut record: Record, captured_at: DateTime<Utc>) -> Result<Self> {
        let trimmed = record.name().trim();
        if trimmed.len() != record.name().len() {
            let trimmed = trimmed.to_string();
            record.set_name(trimmed);
        }
        storage_key(record.name())?;

        let when = validate_timestamp(captured_at)?;
        Ok(Self { when, record })
    }

    /// Decode a body previously stored in `collection`.
    ///
    /// Accepts the current schema and the legacy schema written before
    /// bodies carried a `kind`.
    pub fn parse_stored(collection: Collection, bytes: &[u8]) -> Result<Self> {
        let stored = StoredDocument::decode(bytes)?;
        let when = stored.captured_at()?;
        let record = stored.into_record(collection)?;
        Self::from_record(record, when)
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn into_record(self) -> Record {
        self.record
    }

}

impl CollectionEntry for Document {
    fn when(&self) -> DateTime<Utc> {
        self.when
    }

    fn collection(&self) -> Collection {
        self.record.collection()
    }

    fn name(&self) -> &str {
        self.record.name()
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        StoredDocument::from(self).serialize(serializer)
    }
}

/// Derive the bucket identifier for an entity name.
///
/// Lowercases the name, maps whitespace and `.` to `_`, collapses runs of
/// `_` and trims them from both ends. Applying it twice changes nothing.
pub fn storage_key(name: &str) -> Result<String> {
    let mut key = String::with_capacity(name.len());
    for ch in name.trim().chars().flat_map(char::to_lowercase) {
        let ch = if ch.is_whitespace() || ch == '.' { '_' } else { ch };
        if ch == '_' && key.ends_with('_') {
            continue;
        }
        key.push(ch);
    }

    let key = key.trim_matches('_');
    if key.is_empty() {
        return Err(Error::EmptyName);
    }
    Ok(key.to_string())
}

/// Sortable key of a capture time: RFC3339, whole seconds, `Z` suffix.
pub fn timestamp_key(when: DateTime<Utc>) -> String {
    when.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn validate_timestamp(when: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let secs = when.timestamp();
    if secs < EARLIEST_CAPTURE_SECS {
        return Err(Error::InvalidTimestamp(when));
    }
    Ok(DateTime::from_timestamp(secs, 0).unwrap_or(when))
}
