//! Authenticated write endpoints.

use super::{blocking, collection_segment, ApiError, ApiState};
use crate::document::{CollectionEntry, Document};
use crate::import::ImportState;
use crate::Error;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// Import job id with its state flattened in, e.g.
/// `{"id": "...", "state": "failed", "reason": "..."}`.
#[derive(Debug, Serialize)]
pub struct ImportStatus {
    pub id: Uuid,
    #[serde(flatten)]
    pub state: ImportState,
}

/// `POST /api/internal/v1/:collection`
///
/// Stores one document for an entity that already has history.
pub async fn upsert_document(
    State(state): State<ApiState>,
    Path(collection): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let collection = collection_segment(&collection)?;
    let doc = Document::parse_stored(collection, &body)?;
    let key = doc.storage_key()?;
    let timestamp = doc.timestamp_key();

    let store = Arc::clone(&state.store);
    let doc = blocking(move || {
        store
            .upsert_if_entity_exists(collection, &doc)
            .map(|()| doc)
    })
    .await?;

    if let Some(backup) = &state.backup {
        backup.forward(doc).await;
    }
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "key": key, "timestamp": timestamp })),
    )
        .into_response())
}

/// `POST /api/internal/v1/boltdb/import`
///
/// Persists the uploaded snapshot and imports it in the background. The
/// job outlives the request and stops only on server shutdown.
pub async fn import_snapshot(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("empty snapshot body"));
    }

    let upload_id = Uuid::new_v4();
    let path = write_snapshot(&state.storage_dir, upload_id, &body).await?;
    info!(path = %path.display(), bytes = body.len(), "Snapshot uploaded");

    let handle = state
        .importer
        .start(path.clone(), state.shutdown.child_token());
    let id = handle.id();
    state.imports.register(id, handle.subscribe());
    let initial = handle.state();

    let reporter = state.reporter.clone();
    tokio::spawn(async move {
        let failed = match handle.wait().await {
            Ok(report) => {
                info!(
                    %id,
                    flushed = report.documents_flushed(),
                    batches = report.batches_committed(),
                    snapshot_deleted = report.snapshot_deleted,
                    "Import finished"
                );
                false
            }
            Err(Error::ImportCancelled) => {
                warn!(%id, "Import cancelled");
                true
            }
            Err(e) => {
                reporter.report("import.job", e);
                true
            }
        };
        // Uploads are only kept on success, where the job removes them itself.
        if failed {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(%id, path = %path.display(), error = %e, "Failed to remove upload");
                }
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ImportStatus {
            id,
            state: initial,
        }),
    )
        .into_response())
}

/// `GET /api/internal/v1/imports/:id`
pub async fn import_status(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let job_state = state
        .imports
        .state(&id)
        .ok_or_else(|| ApiError::not_found(format!("import {} not found", id)))?;
    Ok(Json(ImportStatus {
        id,
        state: job_state,
    })
    .into_response())
}

async fn write_snapshot(
    storage_dir: &std::path::Path,
    id: Uuid,
    body: &[u8],
) -> crate::Result<PathBuf> {
    let dir = storage_dir.join("imports");
    tokio::fs::create_dir_all(&dir).await?;

    let path = dir.join(format!("import-{}.redb", id));
    let mut file = tokio::fs::File::create(&path).await?;
    file.write_all(body).await?;
    file.sync_all().await?;
    Ok(path)
}
