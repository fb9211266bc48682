//! Point upload endpoint: validate, deduplicate, persist
//!
//! The upload body is the raw JSON array of points; validation runs in
//! best-effort mode, so structurally valid batches always succeed and the
//! response reports which points were rejected or were already persisted.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::ingest::{DuplicateFilter, SchemaValidator, ValidationMode};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Username of the uploading participant.
    pub username: String,
    /// Observer version the batch was built against; latest when absent.
    pub version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct InvalidQuery {
    #[serde(default = "default_page")]
    pub page: i64,
}

fn default_page() -> i64 {
    1
}

/// POST /api/observers/:id/data?username=
///
/// Run one upload batch through the ingestion pipeline.
pub async fn upload_points(
    State(state): State<AppState>,
    Path(observer_id): Path<String>,
    Query(query): Query<UploadQuery>,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let observer = db::observers::load_observer(&state.db, &observer_id, query.version)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No such observer: {}", observer_id)))?;

    // Validate; in best-effort mode only a payload that is not a JSON
    // array fails the whole batch
    let validator = SchemaValidator::new(&observer);
    let outcome = validator
        .validate_batch(&body, ValidationMode::BestEffort)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    // Prune points whose identifier is already persisted
    let filter = DuplicateFilter::new(state.db.clone());
    let dedup = filter
        .filter_duplicates(&query.username, &observer.id, outcome.accepted)
        .await?;

    let accepted = dedup.surviving.len();
    db::points::store_points(&state.db, &query.username, &observer.id, &dedup.surviving).await?;
    db::points::store_invalid_points(
        &state.db,
        &query.username,
        &observer.id,
        observer.version,
        &outcome.invalid,
    )
    .await?;

    info!(
        observer = %observer.id,
        username = %query.username,
        accepted,
        duplicates = dedup.duplicate_count,
        invalid = outcome.invalid.len(),
        "Processed upload batch"
    );

    Ok(Json(json!({
        "result": "success",
        "accepted": accepted,
        "duplicates": dedup.duplicate_count,
        "invalid": outcome.invalid,
    })))
}

/// GET /api/observers/:id/invalid
///
/// Page through stored invalid points, newest first.
pub async fn list_invalid_points(
    State(state): State<AppState>,
    Path(observer_id): Path<String>,
    Query(query): Query<InvalidQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let (total, points) =
        db::points::fetch_invalid_points(&state.db, &observer_id, query.page).await?;

    Ok(Json(json!({
        "result": "success",
        "total": total,
        "page": query.page.max(1),
        "page_size": db::points::INVALID_PAGE_SIZE,
        "invalid": points,
    })))
}

/// Build upload routes
pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/api/observers/:id/data", post(upload_points))
        .route("/api/observers/:id/invalid", get(list_invalid_points))
}
