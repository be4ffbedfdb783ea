//! HTTP API tests
//!
//! Requests go straight into the router with `oneshot`; the store is a real
//! redb file in a temporary directory.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use coviddy::api::{build_http_router, ApiServerConfig, ApiState, Credentials, ImportRegistry};
use coviddy::backup::backup_channel;
use coviddy::collection::Collection;
use coviddy::document::{CollectionEntry, Document};
use coviddy::import::ImportPipeline;
use coviddy::record::{CountryRecord, Record, StateRecord};
use coviddy::reporter::ErrorReporter;
use coviddy::store::{StoreConfig, TimeRange, TimeSeriesStore};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct TestApi {
    _dir: TempDir,
    dir_path: std::path::PathBuf,
    store: Arc<TimeSeriesStore>,
    router: Router,
    backups: mpsc::Receiver<Document>,
    imports: ImportRegistry,
}

impl TestApi {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let dir_path = dir.path().to_path_buf();
        let store = Arc::new(
            TimeSeriesStore::open(StoreConfig::new(dir.path().join("coviddy.redb"))).unwrap(),
        );
        let reporter = ErrorReporter::log_only();
        let (backup, backups) = backup_channel(16, Duration::from_secs(1), reporter.clone());
        let imports = ImportRegistry::default();

        let state = ApiState {
            store: Arc::clone(&store),
            importer: ImportPipeline::new(Arc::clone(&store), reporter.clone()),
            imports: imports.clone(),
            backup: Some(backup),
            storage_dir: dir.path().to_path_buf(),
            shutdown: CancellationToken::new(),
            reporter,
        };
        let credentials = Credentials::new().with_user("admin", "hunter2");
        let router = build_http_router(state, credentials, &ApiServerConfig::default());

        Self {
            _dir: dir,
            dir_path,
            store,
            router,
            backups,
            imports,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post_internal(&self, uri: &str, body: Vec<u8>) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header(header::AUTHORIZATION, basic("admin", "hunter2"))
            .body(Body::from(body))
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }
}

fn basic(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 7, day, 12, 0, 0).unwrap()
}

fn country(name: &str, cases: u64, when: DateTime<Utc>) -> Document {
    let record = Record::Country(CountryRecord {
        name: name.to_string(),
        total_cases: cases,
        ..CountryRecord::default()
    });
    Document::from_record(record, when).unwrap()
}

fn state(name: &str, cases: u64, when: DateTime<Utc>) -> Document {
    let record = Record::State(StateRecord {
        name: name.to_string(),
        total_cases: cases,
        ..StateRecord::default()
    });
    Document::from_record(record, when).unwrap()
}

#[tokio::test]
async fn test_health() {
    let api = TestApi::new();
    let (status, body) = api
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn test_list_entities() {
    let api = TestApi::new();
    let docs = vec![country("Peru", 1, at(1)), country("Brazil", 2, at(1))];
    api.store.bulk_upsert(Collection::Countries, &docs).unwrap();

    let (status, body) = api.get_json("/api/v1/countries").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!(["brazil", "peru"]));

    let (status, body) = api.get_json("/api/v1/states").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([]));

    let (status, body) = api.get_json("/api/v1/planets").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_entity_documents_with_bounds() {
    let api = TestApi::new();
    for day in 1..=5 {
        api.store
            .upsert(Collection::States, &state("New York", day as u64, at(day)))
            .unwrap();
    }

    let (status, body) = api.get_json("/api/v1/states/New%20York").await;
    assert_eq!(status, StatusCode::OK);
    let docs = body.as_object().unwrap();
    assert_eq!(docs.len(), 5);
    assert_eq!(docs["2020-07-03T12:00:00Z"]["name"], "New York");
    assert_eq!(docs["2020-07-03T12:00:00Z"]["total_cases"], 3);

    let (status, body) = api
        .get_json("/api/v1/states/new_york?after=2020-07-02T12:00:00Z&before=2020-07-04T12:00:00Z")
        .await;
    assert_eq!(status, StatusCode::OK);
    let keys: Vec<_> = body.as_object().unwrap().keys().cloned().collect();
    assert_eq!(
        keys,
        vec![
            "2020-07-02T12:00:00Z",
            "2020-07-03T12:00:00Z",
            "2020-07-04T12:00:00Z"
        ]
    );

    let (status, body) = api.get_json("/api/v1/states/new_york?after=&before=").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_object().unwrap().len(), 5);
}

#[tokio::test]
async fn test_entity_documents_errors() {
    let api = TestApi::new();
    api.store
        .upsert(Collection::Countries, &country("Georgia", 1, at(1)))
        .unwrap();

    let (status, body) = api.get_json("/api/v1/states/Georgia").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "state 'Georgia' not found");

    let (status, _) = api.get_json("/api/v1/countries/Georgia?after=last-week").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_internal_routes_require_credentials() {
    let api = TestApi::new();
    let body = country("Peru", 1, at(1)).to_bytes().unwrap();

    for authorization in [None, Some(basic("admin", "wrong")), Some("Bearer x".to_string())] {
        let mut request = Request::post("/api/internal/v1/countries");
        if let Some(value) = authorization {
            request = request.header(header::AUTHORIZATION, value);
        }
        let response = api
            .router
            .clone()
            .oneshot(request.body(Body::from(body.clone())).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            r#"Basic realm="Restricted""#
        );
    }
    assert!(api.store.list_entities(Collection::Countries).unwrap().is_empty());
}

#[tokio::test]
async fn test_upsert_document() {
    let mut api = TestApi::new();

    // Unknown entity
    let body = country("Peru", 10, at(2)).to_bytes().unwrap();
    let (status, _) = api.post_internal("/api/internal/v1/countries", body.clone()).await;
    assert_eq!(status, StatusCode::FAILED_DEPENDENCY);

    api.store
        .upsert(Collection::Countries, &country("Peru", 1, at(1)))
        .unwrap();
    let (status, response) = api.post_internal("/api/internal/v1/countries", body).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(response["key"], "peru");
    assert_eq!(response["timestamp"], "2020-07-02T12:00:00Z");

    let stored = api
        .store
        .range_scan(Collection::Countries, "peru", TimeRange::all())
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored["2020-07-02T12:00:00Z"].record().total_cases(), 10);

    let forwarded = api.backups.try_recv().unwrap();
    assert_eq!(forwarded.timestamp_key(), "2020-07-02T12:00:00Z");
}

#[tokio::test]
async fn test_upsert_rejects_bad_bodies() {
    let api = TestApi::new();
    api.store
        .upsert(Collection::States, &state("Ohio", 1, at(1)))
        .unwrap();

    let (status, body) = api
        .post_internal("/api/internal/v1/states", b"{not json".to_vec())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());

    let missing_when = br#"{"name": "Ohio", "total_cases": 3}"#.to_vec();
    let (status, _) = api.post_internal("/api/internal/v1/states", missing_when).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A country body posted to the states collection
    let wrong_kind = country("Ohio", 3, at(2)).to_bytes().unwrap();
    let (status, _) = api.post_internal("/api/internal/v1/states", wrong_kind).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = api
        .post_internal("/api/internal/v1/planets", state("Ohio", 3, at(2)).to_bytes().unwrap())
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_snapshot_import() {
    let api = TestApi::new();

    let snapshot = api.dir_path.join("upload.redb");
    {
        let source = TimeSeriesStore::open(StoreConfig::new(&snapshot)).unwrap();
        let countries: Vec<_> = (1..=3).map(|d| country("Chile", d as u64, at(d))).collect();
        source.bulk_upsert(Collection::Countries, &countries).unwrap();
        source
            .bulk_upsert(Collection::States, &[state("Utah", 9, at(1))])
            .unwrap();
    }
    let bytes = std::fs::read(&snapshot).unwrap();

    let (status, body) = api
        .post_internal("/api/internal/v1/boltdb/import", bytes)
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["id"].as_str().unwrap().to_string();
    assert!(body["state"].is_string());
    assert_eq!(api.imports.len(), 1);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let status_uri = format!("/api/internal/v1/imports/{}", id);
    let final_state = loop {
        let request = Request::get(status_uri.as_str())
            .header(header::AUTHORIZATION, basic("admin", "hunter2"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = api.send(request).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        let state = body["state"].as_str().unwrap().to_string();
        if state == "closed" || state == "failed" || tokio::time::Instant::now() > deadline {
            break state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(final_state, "closed");

    assert_eq!(api.store.entity_len(Collection::Countries, "Chile").unwrap(), 3);
    assert_eq!(api.store.entity_len(Collection::States, "Utah").unwrap(), 1);
}

fn uploads_in(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir.join("imports"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_failed_import_removes_upload() {
    let api = TestApi::new();

    let (status, body) = api
        .post_internal("/api/internal/v1/boltdb/import", b"not a redb file".to_vec())
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let status_uri = format!("/api/internal/v1/imports/{}", body["id"].as_str().unwrap());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let final_state = loop {
        let request = Request::get(status_uri.as_str())
            .header(header::AUTHORIZATION, basic("admin", "hunter2"))
            .body(Body::empty())
            .unwrap();
        let (_, body) = api.send(request).await;
        let body: Value = serde_json::from_slice(&body).unwrap();
        let state = body["state"].as_str().unwrap().to_string();
        if state == "failed" || state == "closed" || tokio::time::Instant::now() > deadline {
            break state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(final_state, "failed");

    while uploads_in(&api.dir_path) > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(uploads_in(&api.dir_path), 0);
}

#[tokio::test]
async fn test_snapshot_import_errors() {
    let api = TestApi::new();

    let (status, _) = api
        .post_internal("/api/internal/v1/boltdb/import", Vec::new())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::get(format!("/api/internal/v1/imports/{}", uuid::Uuid::new_v4()))
        .header(header::AUTHORIZATION, basic("admin", "hunter2"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = api.send(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(api.imports.is_empty());
}
