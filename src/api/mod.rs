//! HTTP API
//!
//! Public routes:
//! - `GET /api/v1/:collection` lists entity storage keys
//! - `GET /api/v1/:collection/:name` returns an entity's documents by timestamp
//!
//! Internal routes, behind Basic auth:
//! - `POST /api/internal/v1/:collection` upserts one document for a known entity
//! - `POST /api/internal/v1/boltdb/import` uploads a snapshot and starts an import
//! - `GET /api/internal/v1/imports/:id` reports the state of an import

mod auth;
mod entities;
mod internal;
mod telemetry;

pub use auth::Credentials;

use crate::backup::BackupSender;
use crate::collection::Collection;
use crate::import::{ImportPipeline, ImportState};
use crate::reporter::ErrorReporter;
use crate::store::TimeSeriesStore;
use crate::Error;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{middleware, Json, Router};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};
use uuid::Uuid;

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Maximum snapshot upload size
    pub max_snapshot_size: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            max_snapshot_size: 512 * 1024 * 1024,
        }
    }
}

/// How long a finished import stays queryable.
pub const DEFAULT_IMPORT_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
struct TrackedImport {
    state: watch::Receiver<ImportState>,
    /// When the registry first saw the job in a terminal state.
    finished_at: Option<Instant>,
}

/// Import jobs started through the API, by id.
///
/// Finished jobs are evicted once they have been terminal for longer than
/// the retention window.
#[derive(Debug, Clone)]
pub struct ImportRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, TrackedImport>>>,
    retention: Duration,
}

impl Default for ImportRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_IMPORT_RETENTION)
    }
}

impl ImportRegistry {
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            jobs: Arc::default(),
            retention,
        }
    }

    pub fn register(&self, id: Uuid, state: watch::Receiver<ImportState>) {
        let mut jobs = self.jobs.lock();
        self.evict_finished(&mut jobs);
        jobs.insert(
            id,
            TrackedImport {
                state,
                finished_at: None,
            },
        );
    }

    pub fn state(&self, id: &Uuid) -> Option<ImportState> {
        let mut jobs = self.jobs.lock();
        self.evict_finished(&mut jobs);
        jobs.get(id).map(|job| job.state.borrow().clone())
    }

    pub fn len(&self) -> usize {
        let mut jobs = self.jobs.lock();
        self.evict_finished(&mut jobs);
        jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_finished(&self, jobs: &mut HashMap<Uuid, TrackedImport>) {
        let now = Instant::now();
        jobs.retain(|id, job| {
            if job.finished_at.is_none() && job.state.borrow().is_terminal() {
                job.finished_at = Some(now);
            }
            let keep = job
                .finished_at
                .map_or(true, |finished| now.duration_since(finished) < self.retention);
            if !keep {
                debug!(%id, "Evicting finished import");
            }
            keep
        });
    }
}

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<TimeSeriesStore>,
    pub importer: ImportPipeline,
    pub imports: ImportRegistry,
    pub backup: Option<BackupSender>,
    /// Directory uploaded snapshots are written under.
    pub storage_dir: PathBuf,
    /// Parent token for background work started by requests.
    pub shutdown: CancellationToken,
    pub reporter: ErrorReporter,
}

/// Error response rendered as `{"message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            e if e.is_client_error() => Self::bad_request(e.to_string()),
            e @ Error::EntityNotFound { .. } => {
                Self::new(StatusCode::FAILED_DEPENDENCY, e.to_string())
            }
            e @ Error::StoreLocked { .. } => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            e => {
                error!(error = %e, "Request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "message": self.message })),
        )
            .into_response()
    }
}

/// Build the HTTP API router
pub fn build_http_router(
    state: ApiState,
    credentials: Credentials,
    config: &ApiServerConfig,
) -> Router {
    use axum::routing::{get, post};

    let internal = Router::new()
        .route(
            "/api/internal/v1/boltdb/import",
            post(internal::import_snapshot)
                .layer(DefaultBodyLimit::max(config.max_snapshot_size)),
        )
        .route("/api/internal/v1/imports/:id", get(internal::import_status))
        .route("/api/internal/v1/:collection", post(internal::upsert_document))
        .route_layer(middleware::from_fn_with_state(
            Arc::new(credentials),
            auth::basic_auth,
        ));

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .route("/api/v1/:collection", get(entities::list_entities))
        .route("/api/v1/:collection/:name", get(entities::entity_documents))
        .merge(internal)
        .with_state(state)
        .layer(middleware::from_fn(telemetry::http_observability_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
}

/// Run a store call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("store task failed: {}", e)))?
        .map_err(ApiError::from)
}

/// Parse a `:collection` path segment; unknown collections are 404.
fn collection_segment(segment: &str) -> Result<Collection, ApiError> {
    segment.parse().map_err(ApiError::not_found)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
