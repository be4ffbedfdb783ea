//! Embedded time-series store
//!
//! Documents live in a single redb file laid out as nested buckets:
//!
//! ```text
//! "Countries"          master index: storage key -> storage key
//! "Countries/usa"      entity bucket: timestamp key -> JSON body
//! "States"
//! "States/texas"
//! ```
//!
//! redb serializes write transactions and gives every read transaction a
//! stable snapshot, so the store itself holds no locks. All methods block;
//! async callers go through `tokio::task::spawn_blocking`.

mod telemetry;

use crate::collection::Collection;
use crate::document::{storage_key, timestamp_key, CollectionEntry, Document};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use redb::{
    Database, DatabaseError, ReadTransaction, ReadableTable, ReadableTableMetadata,
    TableDefinition, TableError, WriteTransaction,
};
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long `open` waits for another process to release the file.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

type MasterTable<'a> = TableDefinition<'a, &'static str, &'static str>;
type EntityTable<'a> = TableDefinition<'a, &'static str, &'static [u8]>;

fn master_table(collection: Collection) -> MasterTable<'static> {
    TableDefinition::new(collection.as_str())
}

fn entity_table(name: &str) -> EntityTable<'_> {
    TableDefinition::new(name)
}

/// Store file location and open behaviour.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Fail with [`Error::StoreLocked`] once this has elapsed.
    pub lock_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

/// Inclusive capture-time bounds for [`TimeSeriesStore::range_scan`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    /// Unbounded below when `None`.
    pub from: Option<DateTime<Utc>>,
    /// Defaults to now when `None`.
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    pub fn all() -> Self {
        Self::default()
    }
}

/// Document prepared for a write: key and body computed outside the transaction.
struct PreparedWrite {
    key: String,
    timestamp: String,
    body: Vec<u8>,
}

impl PreparedWrite {
    fn new<D: CollectionEntry>(collection: Collection, doc: &D) -> Result<Self> {
        if doc.collection() != collection {
            return Err(Error::Schema(format!(
                "{} document '{}' cannot be written to {}",
                doc.collection(),
                doc.name(),
                collection
            )));
        }
        Ok(Self {
            key: doc.storage_key()?,
            timestamp: doc.timestamp_key(),
            body: doc.to_bytes()?,
        })
    }
}

/// Two-level time-series index over one embedded database file.
pub struct TimeSeriesStore {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for TimeSeriesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeriesStore")
            .field("path", &self.path)
            .finish()
    }
}

impl TimeSeriesStore {
    /// Open or create the store, creating both master indexes.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let db = open_with_timeout(&config, |path| Database::create(path))?;
        let store = Self {
            db,
            path: config.path,
        };

        let txn = store.db.begin_write()?;
        for collection in Collection::ALL {
            txn.open_table(master_table(collection))?;
        }
        txn.commit()?;

        info!(path = %store.path.display(), "Opened time-series store");
        Ok(store)
    }

    /// Open a store file that must already exist, such as an import snapshot.
    pub fn open_existing(config: StoreConfig) -> Result<Self> {
        if !config.path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("store file {} does not exist", config.path.display()),
            )));
        }
        let db = open_with_timeout(&config, |path| Database::open(path))?;
        Ok(Self {
            db,
            path: config.path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one document, creating its master entry and bucket on first use.
    ///
    /// Re-upserting the same entity and timestamp overwrites the body.
    pub fn upsert<D: CollectionEntry>(&self, collection: Collection, doc: &D) -> Result<()> {
        let write = PreparedWrite::new(collection, doc)?;
        let started = Instant::now();

        let txn = self.db.begin_write()?;
        {
            let mut master = txn.open_table(master_table(collection))?;
            master.insert(write.key.as_str(), write.key.as_str())?;
        }
        insert_body(&txn, collection, &write)?;
        txn.commit()?;

        telemetry::record_write("upsert", collection.as_str(), 1, started.elapsed().as_secs_f64());
        debug!(%collection, key = %write.key, timestamp = %write.timestamp, "Upserted document");
        Ok(())
    }

    /// Like [`upsert`](Self::upsert) but refuses to create a new entity.
    pub fn upsert_if_entity_exists<D: CollectionEntry>(
        &self,
        collection: Collection,
        doc: &D,
    ) -> Result<()> {
        let write = PreparedWrite::new(collection, doc)?;
        let started = Instant::now();

        let txn = self.db.begin_write()?;
        let known = {
            let master = txn.open_table(master_table(collection))?;
            let known = master.get(write.key.as_str())?.is_some();
            known
        };
        if !known {
            txn.abort()?;
            return Err(Error::EntityNotFound {
                collection,
                key: write.key,
            });
        }
        insert_body(&txn, collection, &write)?;
        txn.commit()?;

        telemetry::record_write(
            "upsert_if_entity_exists",
            collection.as_str(),
            1,
            started.elapsed().as_secs_f64(),
        );
        Ok(())
    }

    /// Write many documents in one transaction.
    ///
    /// Callers bound the batch size. Documents whose name yields no storage
    /// key are skipped with a warning. Returns the number written.
    pub fn bulk_upsert<D: CollectionEntry>(
        &self,
        collection: Collection,
        docs: &[D],
    ) -> Result<usize> {
        let mut writes = Vec::with_capacity(docs.len());
        for doc in docs {
            match PreparedWrite::new(collection, doc) {
                Ok(write) => writes.push(write),
                Err(Error::EmptyName) => {
                    warn!(
                        %collection,
                        when = %doc.timestamp_key(),
                        "Skipping document with empty name"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        if writes.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let txn = self.db.begin_write()?;
        {
            let mut master = txn.open_table(master_table(collection))?;
            for write in &writes {
                master.insert(write.key.as_str(), write.key.as_str())?;
            }
        }
        for write in &writes {
            insert_body(&txn, collection, write)?;
        }
        txn.commit()?;

        telemetry::record_write(
            "bulk_upsert",
            collection.as_str(),
            writes.len() as u64,
            started.elapsed().as_secs_f64(),
        );
        debug!(%collection, documents = writes.len(), "Bulk upsert committed");
        Ok(writes.len())
    }

    /// Storage keys of every known entity, in key order.
    pub fn list_entities(&self, collection: Collection) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        master_keys(&txn, collection)
    }

    pub fn entity_exists(&self, collection: Collection, name: &str) -> Result<bool> {
        let key = storage_key(name)?;
        let txn = self.db.begin_read()?;
        let master = match txn.open_table(master_table(collection)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let exists = master.get(key.as_str())?.is_some();
        Ok(exists)
    }

    /// Documents of one entity with capture times inside `range`, keyed by timestamp key.
    ///
    /// `name` may be a display name or a storage key. An unknown entity
    /// yields an empty map. Bodies that fail to decode are skipped.
    pub fn range_scan(
        &self,
        collection: Collection,
        name: &str,
        range: TimeRange,
    ) -> Result<BTreeMap<String, Document>> {
        let key = storage_key(name)?;
        // Keys hold whole seconds; a fractional lower bound excludes its own second.
        let from = range.from.map(|from| {
            if from.timestamp_subsec_nanos() > 0 {
                timestamp_key(from + chrono::Duration::seconds(1))
            } else {
                timestamp_key(from)
            }
        });
        let to = timestamp_key(range.to.unwrap_or_else(Utc::now));

        let mut docs = BTreeMap::new();
        if from.as_deref().is_some_and(|from| from > to.as_str()) {
            return Ok(docs);
        }

        let txn = self.db.begin_read()?;
        let table_name = collection.entity_table_name(&key);
        let bucket = match txn.open_table(entity_table(&table_name)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(docs),
            Err(e) => return Err(e.into()),
        };

        let entries = match from.as_deref() {
            Some(from) => bucket.range::<&str>(from..=to.as_str())?,
            None => bucket.range::<&str>(..=to.as_str())?,
        };
        for entry in entries {
            let (timestamp, body) = entry?;
            match Document::parse_stored(collection, body.value()) {
                Ok(doc) => {
                    docs.insert(timestamp.value().to_string(), doc);
                }
                Err(e) => {
                    telemetry::record_corrupt_document(collection.as_str());
                    warn!(
                        %collection,
                        key = %key,
                        timestamp = timestamp.value(),
                        error = %e,
                        "Skipping undecodable document"
                    );
                }
            }
        }
        Ok(docs)
    }

    /// Total documents across every entity bucket of a collection.
    pub fn document_count(&self, collection: Collection) -> Result<u64> {
        let mut total = 0;
        self.scan_collection(collection, |_, _, _| {
            total += 1;
            ControlFlow::Continue(())
        })?;
        Ok(total)
    }

    /// Visit every stored body of a collection inside one read snapshot.
    ///
    /// The visitor receives the storage key, the timestamp key and the raw
    /// body, and may stop the scan early. A master entry without its bucket
    /// is [`Error::EntityNotFound`]. Returns the number of bodies visited.
    pub fn scan_collection<F>(&self, collection: Collection, mut visitor: F) -> Result<u64>
    where
        F: FnMut(&str, &str, &[u8]) -> ControlFlow<()>,
    {
        let txn = self.db.begin_read()?;
        let keys = master_keys(&txn, collection)?;

        let mut visited = 0;
        for key in keys {
            let table_name = collection.entity_table_name(&key);
            let bucket = match txn.open_table(entity_table(&table_name)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => {
                    return Err(Error::EntityNotFound { collection, key });
                }
                Err(e) => return Err(e.into()),
            };
            for entry in bucket.iter()? {
                let (timestamp, body) = entry?;
                visited += 1;
                if visitor(&key, timestamp.value(), body.value()).is_break() {
                    return Ok(visited);
                }
            }
        }
        Ok(visited)
    }

    /// Latest capture time stored in any bucket, used to seed the capture clock.
    pub fn latest_capture(&self) -> Result<Option<DateTime<Utc>>> {
        let txn = self.db.begin_read()?;
        let mut latest: Option<String> = None;

        for collection in Collection::ALL {
            for key in master_keys(&txn, collection)? {
                let table_name = collection.entity_table_name(&key);
                let bucket = match txn.open_table(entity_table(&table_name)) {
                    Ok(table) => table,
                    Err(TableError::TableDoesNotExist(_)) => continue,
                    Err(e) => return Err(e.into()),
                };
                let last = bucket.last()?;
                if let Some((timestamp, _)) = last {
                    let timestamp = timestamp.value();
                    if latest.as_deref().map_or(true, |l| timestamp > l) {
                        latest = Some(timestamp.to_string());
                    }
                }
            }
        }

        Ok(latest.and_then(|ts| {
            DateTime::parse_from_rfc3339(&ts)
                .ok()
                .map(|when| when.with_timezone(&Utc))
        }))
    }

    /// Number of documents stored for one entity.
    pub fn entity_len(&self, collection: Collection, name: &str) -> Result<u64> {
        let key = storage_key(name)?;
        let txn = self.db.begin_read()?;
        let table_name = collection.entity_table_name(&key);
        match txn.open_table(entity_table(&table_name)) {
            Ok(table) => Ok(table.len()?),
            Err(TableError::TableDoesNotExist(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

fn open_with_timeout<F>(config: &StoreConfig, open: F) -> Result<Database>
where
    F: Fn(&Path) -> std::result::Result<Database, DatabaseError>,
{
    let started = Instant::now();
    loop {
        match open(&config.path) {
            Ok(db) => return Ok(db),
            Err(DatabaseError::DatabaseAlreadyOpen) => {
                let waited = started.elapsed();
                if waited >= config.lock_timeout {
                    return Err(Error::StoreLocked {
                        path: config.path.clone(),
                        waited,
                    });
                }
                std::thread::sleep(LOCK_RETRY_INTERVAL.min(config.lock_timeout - waited));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn master_keys(txn: &ReadTransaction, collection: Collection) -> Result<Vec<String>> {
    let master = match txn.open_table(master_table(collection)) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut keys = Vec::new();
    for entry in master.iter()? {
        let (key, _) = entry?;
        keys.push(key.value().to_string());
    }
    Ok(keys)
}

fn insert_body(
    txn: &WriteTransaction,
    collection: Collection,
    write: &PreparedWrite,
) -> Result<()> {
    let table_name = collection.entity_table_name(&write.key);
    let mut bucket = txn.open_table(entity_table(&table_name))?;
    bucket.insert(write.timestamp.as_str(), write.body.as_slice())?;
    Ok(())
}
