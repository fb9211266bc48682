//! Observer definition registration and retrieval

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::Observer;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterQuery {
    /// Username of the registering owner.
    pub owner: String,
}

#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    /// Specific version to fetch; latest when absent.
    pub version: Option<i64>,
}

/// POST /api/observers?owner=
///
/// Register a new observer definition (or a new version of an existing
/// one). The version rules are enforced by storage; violations come back
/// as 400s.
pub async fn register_observer(
    State(state): State<AppState>,
    Query(query): Query<RegisterQuery>,
    Json(observer): Json<Observer>,
) -> ApiResult<Json<serde_json::Value>> {
    let unchanged = db::observers::register_observer(&state.db, &query.owner, &observer).await?;

    Ok(Json(json!({
        "result": "success",
        "observer_id": observer.id,
        "version": observer.version,
        "unchanged_streams": unchanged,
    })))
}

/// GET /api/observers/:id
///
/// Fetch an observer definition, latest version by default.
pub async fn get_observer(
    State(state): State<AppState>,
    Path(observer_id): Path<String>,
    Query(query): Query<FetchQuery>,
) -> ApiResult<Json<Observer>> {
    let observer = db::observers::load_observer(&state.db, &observer_id, query.version)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No such observer: {}", observer_id)))?;

    Ok(Json(observer))
}

/// Build observer definition routes
pub fn observer_routes() -> Router<AppState> {
    Router::new()
        .route("/api/observers", post(register_observer))
        .route("/api/observers/:id", get(get_observer))
}
