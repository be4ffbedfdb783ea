//! Bulk import pipeline tests
//!
//! Snapshots are real redb files written either through the store or, for
//! legacy bodies, directly through redb tables laid out the same way.

use chrono::{DateTime, Duration, TimeZone, Utc};
use coviddy::collection::Collection;
use coviddy::document::{CollectionEntry, Document};
use coviddy::import::{ImportConfig, ImportPipeline, ImportState};
use coviddy::record::{CountryRecord, Record, StateRecord};
use coviddy::reporter::{error_channel, ErrorReporter};
use coviddy::store::{StoreConfig, TimeRange, TimeSeriesStore};
use coviddy::Error;
use redb::{Database, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 4, 1, 0, 0, 0).unwrap()
}

fn sample_documents(countries: usize, states: usize) -> (Vec<Document>, Vec<Document>) {
    let countries = (0..countries)
        .map(|i| {
            let record = Record::Country(CountryRecord {
                name: format!("Country {}", i % 17),
                total_cases: i as u64,
                ..CountryRecord::default()
            });
            Document::from_record(record, base() + Duration::hours(i as i64)).unwrap()
        })
        .collect();
    let states = (0..states)
        .map(|i| {
            let record = Record::State(StateRecord {
                name: format!("State {}", i % 9),
                total_cases: i as u64,
                ..StateRecord::default()
            });
            Document::from_record(record, base() + Duration::hours(i as i64)).unwrap()
        })
        .collect();
    (countries, states)
}

fn write_snapshot(path: &Path, countries: &[Document], states: &[Document]) {
    let snapshot = TimeSeriesStore::open(StoreConfig::new(path)).unwrap();
    snapshot.bulk_upsert(Collection::Countries, countries).unwrap();
    snapshot.bulk_upsert(Collection::States, states).unwrap();
}

fn target(dir: &TempDir) -> Arc<TimeSeriesStore> {
    Arc::new(TimeSeriesStore::open(StoreConfig::new(dir.path().join("coviddy.redb"))).unwrap())
}

fn snapshot_path(dir: &TempDir) -> PathBuf {
    dir.path().join("import-snapshot.redb")
}

fn config(batch_size: usize) -> ImportConfig {
    ImportConfig {
        batch_size,
        ..ImportConfig::default()
    }
}

#[tokio::test]
async fn test_import_copies_every_document() {
    let dir = TempDir::new().unwrap();
    let (countries, states) = sample_documents(250, 130);
    let path = snapshot_path(&dir);
    write_snapshot(&path, &countries, &states);

    let store = target(&dir);
    let pipeline =
        ImportPipeline::new(Arc::clone(&store), ErrorReporter::log_only()).with_config(config(100));
    let handle = pipeline.start(&path, CancellationToken::new());
    let state = handle.subscribe();
    let report = handle.wait().await.unwrap();

    assert_eq!(*state.borrow(), ImportState::Closed);
    assert_eq!(report.documents_read(), 380);
    assert_eq!(report.documents_flushed(), 380);
    assert_eq!(report.counts(Collection::Countries).batches, 3);
    assert_eq!(report.counts(Collection::States).batches, 2);
    assert!(report.snapshot_deleted);
    assert!(!path.exists());

    assert_eq!(store.document_count(Collection::Countries).unwrap(), 250);
    assert_eq!(store.document_count(Collection::States).unwrap(), 130);
    for doc in &states {
        let found = store
            .range_scan(Collection::States, doc.name(), TimeRange::all())
            .unwrap();
        assert_eq!(found.get(&doc.timestamp_key()), Some(doc));
    }
}

#[tokio::test]
async fn test_reimport_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let (countries, states) = sample_documents(40, 20);
    let path = snapshot_path(&dir);
    write_snapshot(&path, &countries, &states);

    let store = target(&dir);
    let pipeline = ImportPipeline::new(Arc::clone(&store), ErrorReporter::log_only()).with_config(
        ImportConfig {
            delete_snapshot: false,
            ..config(7)
        },
    );
    for _ in 0..2 {
        let report = pipeline.run(&path, CancellationToken::new()).await.unwrap();
        assert_eq!(report.documents_flushed(), 60);
        assert!(!report.snapshot_deleted);
    }

    assert!(path.exists());
    assert_eq!(store.document_count(Collection::Countries).unwrap(), 40);
    assert_eq!(store.document_count(Collection::States).unwrap(), 20);
}

#[tokio::test]
async fn test_legacy_bodies_are_repaired_and_garbage_is_reported() {
    const COUNTRIES: TableDefinition<&str, &str> = TableDefinition::new("Countries");
    const ITALY: TableDefinition<&str, &[u8]> = TableDefinition::new("Countries/italy");

    let dir = TempDir::new().unwrap();
    let path = snapshot_path(&dir);
    {
        let db = Database::create(&path).unwrap();
        let txn = db.begin_write().unwrap();
        {
            let mut master = txn.open_table(COUNTRIES).unwrap();
            master.insert("italy", "italy").unwrap();
            let mut bucket = txn.open_table(ITALY).unwrap();
            bucket
                .insert(
                    "2020-04-02T10:00:00Z",
                    br#"{"name":"Italy","when":"2020-04-02T10:00:00Z","total_cases":0,"cases_per_1m":110574}"#
                        .as_slice(),
                )
                .unwrap();
            bucket
                .insert("2020-04-03T10:00:00Z", b"{broken".as_slice())
                .unwrap();
            bucket
                .insert(
                    "2020-04-04T10:00:00Z",
                    br#"{"name":"Italy","total_cases":1}"#.as_slice(),
                )
                .unwrap();
        }
        txn.commit().unwrap();
    }

    let store = target(&dir);
    let (reporter, mut reported) = error_channel(16);
    let report = ImportPipeline::new(Arc::clone(&store), reporter)
        .run(&path, CancellationToken::new())
        .await
        .unwrap();

    let counts = report.counts(Collection::Countries);
    assert_eq!(counts.read, 3);
    assert_eq!(counts.skipped, 2);
    assert_eq!(counts.flushed, 1);

    let italy = store
        .range_scan(Collection::Countries, "Italy", TimeRange::all())
        .unwrap();
    assert_eq!(italy.len(), 1);
    assert_eq!(italy["2020-04-02T10:00:00Z"].record().total_cases(), 110_574);

    let first = reported.try_recv().unwrap();
    assert_eq!(first.context, "import.parse");
    assert!(first.error.is_client_error());
    let second = reported.try_recv().unwrap();
    assert!(matches!(second.error, Error::MissingTimestamp));
}

#[tokio::test]
async fn test_cancelled_before_start_commits_nothing() {
    let dir = TempDir::new().unwrap();
    let (countries, states) = sample_documents(30, 30);
    let path = snapshot_path(&dir);
    write_snapshot(&path, &countries, &states);

    let store = target(&dir);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let handle = ImportPipeline::new(Arc::clone(&store), ErrorReporter::log_only())
        .with_config(config(10))
        .start(&path, cancel);
    let state = handle.subscribe();
    let err = handle.wait().await.unwrap_err();

    assert!(matches!(err, Error::ImportCancelled));
    assert!(matches!(*state.borrow(), ImportState::Failed { .. }));
    assert!(path.exists(), "snapshot must survive a cancelled import");
    assert_eq!(store.document_count(Collection::Countries).unwrap(), 0);
    assert_eq!(store.document_count(Collection::States).unwrap(), 0);
}

#[tokio::test]
async fn test_cancellation_keeps_committed_prefix() {
    let dir = TempDir::new().unwrap();
    let (countries, states) = sample_documents(600, 400);
    let path = snapshot_path(&dir);
    write_snapshot(&path, &countries, &states);

    let store = target(&dir);
    let cancel = CancellationToken::new();
    let handle = ImportPipeline::new(Arc::clone(&store), ErrorReporter::log_only())
        .with_config(ImportConfig {
            channel_capacity: 1,
            ..config(25)
        })
        .start(&path, cancel.clone());

    // Cancel as soon as the first batch lands.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    while store.document_count(Collection::Countries).unwrap()
        + store.document_count(Collection::States).unwrap()
        == 0
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    cancel.cancel();
    let result = handle.wait().await;

    let stored_countries = store.document_count(Collection::Countries).unwrap();
    let stored_states = store.document_count(Collection::States).unwrap();
    match result {
        Err(Error::ImportCancelled) => {
            assert!(path.exists());
            assert!(stored_countries + stored_states < 1000);
        }
        Ok(report) => {
            // The import won the race; everything must be there.
            assert_eq!(report.documents_flushed(), 1000);
            assert_eq!(stored_countries + stored_states, 1000);
        }
        Err(other) => panic!("unexpected error: {other}"),
    }
    // Committed batches are whole: documents land in multiples of the batch size.
    assert_eq!(stored_countries % 25, 0);
    assert_eq!(stored_states % 25, 0);

    // Everything committed is an exact copy of a snapshot document.
    for doc in &countries {
        let found = store
            .range_scan(Collection::Countries, doc.name(), TimeRange::all())
            .unwrap();
        if let Some(stored) = found.get(&doc.timestamp_key()) {
            assert_eq!(stored, doc);
        }
    }
}

#[tokio::test]
async fn test_missing_snapshot_fails() {
    let dir = TempDir::new().unwrap();
    let store = target(&dir);
    let handle = ImportPipeline::new(store, ErrorReporter::log_only())
        .start(dir.path().join("nope.redb"), CancellationToken::new());
    let state = handle.subscribe();

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(matches!(*state.borrow(), ImportState::Failed { .. }));
}
