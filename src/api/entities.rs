//! Public read endpoints.

use super::{blocking, collection_segment, ApiError, ApiState};
use crate::document::Document;
use crate::store::TimeRange;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Time bounds for an entity query, both RFC3339 and inclusive.
#[derive(Debug, Default, Deserialize)]
pub struct RangeParams {
    /// Lower bound
    pub after: Option<String>,
    /// Upper bound; defaults to now
    pub before: Option<String>,
}

impl RangeParams {
    fn time_range(&self) -> Result<TimeRange, ApiError> {
        Ok(TimeRange::new(
            parse_bound("after", self.after.as_deref())?,
            parse_bound("before", self.before.as_deref())?,
        ))
    }
}

fn parse_bound(param: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|when| Some(when.with_timezone(&Utc)))
        .map_err(|e| ApiError::bad_request(format!("invalid '{}' bound '{}': {}", param, raw, e)))
}

/// `GET /api/v1/:collection`
pub async fn list_entities(
    State(state): State<ApiState>,
    Path(collection): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let collection = collection_segment(&collection)?;
    let store = Arc::clone(&state.store);
    let entities = blocking(move || store.list_entities(collection)).await?;
    Ok(Json(entities))
}

/// `GET /api/v1/:collection/:name`
pub async fn entity_documents(
    State(state): State<ApiState>,
    Path((collection, name)): Path<(String, String)>,
    Query(params): Query<RangeParams>,
) -> Result<Json<BTreeMap<String, Document>>, ApiError> {
    let collection = collection_segment(&collection)?;
    let range = params.time_range()?;

    let store = Arc::clone(&state.store);
    let lookup = name.clone();
    let docs = blocking(move || {
        if !store.entity_exists(collection, &lookup)? {
            return Ok(None);
        }
        store.range_scan(collection, &lookup, range).map(Some)
    })
    .await?;

    docs.map(Json).ok_or_else(|| {
        let shape = match collection {
            crate::collection::Collection::Countries => "country",
            crate::collection::Collection::States => "state",
        };
        ApiError::not_found(format!("{} '{}' not found", shape, name))
    })
}
