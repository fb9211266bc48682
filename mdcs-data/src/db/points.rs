//! Survey response and invalid point storage
//!
//! Points are persisted in their flat form: one `survey_responses` row per
//! prompt response. The read pipeline fetches the rows back with a stable
//! `ORDER BY epoch_millis, id`, which makes the roll-up's last-write-wins
//! behavior deterministic.

use std::collections::HashSet;

use mdcs_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use crate::models::{DataPoint, FlatResponseRow, InvalidPoint, PromptType};

/// Upper bound on flat rows fetched per read request. Keeps the transient
/// flat form bounded; callers narrow with filters when they hit it.
pub const MAX_READ_ROWS: i64 = 10_000;

/// Page size for invalid-point listing.
pub const INVALID_PAGE_SIZE: i64 = 100;

/// Filter for the flat-row fetch backing the read pipeline.
#[derive(Debug, Clone, Default)]
pub struct ResponseFilter {
    pub observer_id: String,
    pub username: Option<String>,
    pub survey_id: Option<String>,
}

/// Persist validated points, one row per prompt response.
///
/// Returns the number of rows written.
pub async fn store_points(
    pool: &SqlitePool,
    username: &str,
    observer_id: &str,
    points: &[DataPoint],
) -> Result<u64> {
    let mut rows_written = 0u64;
    for point in points {
        for response in &point.responses {
            sqlx::query(
                r#"
                INSERT INTO survey_responses (
                    username, observer_id, survey_id, survey_version, point_id,
                    epoch_millis, timezone, client,
                    repeatable_set_id, repeatable_set_iteration,
                    prompt_id, prompt_type, display_label, unit, response
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(username)
            .bind(observer_id)
            .bind(&point.stream_id)
            .bind(point.stream_version)
            .bind(&point.point_id)
            .bind(point.epoch_millis())
            .bind(&point.timezone)
            .bind(&point.client)
            .bind(&response.repeatable_set_id)
            .bind(response.repeatable_set_iteration)
            .bind(&response.prompt_id)
            .bind(response.metadata.prompt_type.as_str())
            .bind(&response.metadata.display_label)
            .bind(&response.metadata.unit)
            .bind(encode_response(&response.value))
            .execute(pool)
            .await?;
            rows_written += 1;
        }
    }

    tracing::debug!(
        username,
        observer_id,
        points = points.len(),
        rows = rows_written,
        "Stored survey responses"
    );
    Ok(rows_written)
}

/// Persisted identifiers among `candidates` for one (user, survey, version).
///
/// The lookup is scoped to the survey's current version; the same
/// identifier under another version is not treated as a duplicate.
pub async fn existing_point_ids(
    pool: &SqlitePool,
    username: &str,
    observer_id: &str,
    survey_id: &str,
    survey_version: i64,
    candidates: &[String],
) -> Result<HashSet<String>> {
    if candidates.is_empty() {
        return Ok(HashSet::new());
    }

    // sqlx has no array bind for SQLite; build the placeholder list
    let placeholders = vec!["?"; candidates.len()].join(", ");
    let sql = format!(
        "SELECT DISTINCT point_id FROM survey_responses \
         WHERE username = ? AND observer_id = ? AND survey_id = ? \
           AND survey_version = ? AND point_id IN ({})",
        placeholders
    );

    let mut query = sqlx::query_scalar(&sql)
        .bind(username)
        .bind(observer_id)
        .bind(survey_id)
        .bind(survey_version);
    for candidate in candidates {
        query = query.bind(candidate);
    }

    let ids: Vec<String> = query.fetch_all(pool).await?;
    Ok(ids.into_iter().collect())
}

/// Write rejected points to the invalid-point sink.
pub async fn store_invalid_points(
    pool: &SqlitePool,
    username: &str,
    observer_id: &str,
    observer_version: i64,
    points: &[InvalidPoint],
) -> Result<()> {
    for point in points {
        sqlx::query(
            r#"
            INSERT INTO invalid_points (
                username, observer_id, observer_version, point_index, data, reason
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(username)
        .bind(observer_id)
        .bind(observer_version)
        .bind(point.index as i64)
        .bind(&point.data)
        .bind(&point.reason)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Page through stored invalid points for an observer, newest first.
///
/// Returns (total count, page of points).
pub async fn fetch_invalid_points(
    pool: &SqlitePool,
    observer_id: &str,
    page: i64,
) -> Result<(i64, Vec<InvalidPoint>)> {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM invalid_points WHERE observer_id = ?")
            .bind(observer_id)
            .fetch_one(pool)
            .await?;

    let offset = (page.max(1) - 1) * INVALID_PAGE_SIZE;
    let rows = sqlx::query(
        "SELECT point_index, data, reason FROM invalid_points \
         WHERE observer_id = ? ORDER BY id DESC LIMIT ? OFFSET ?",
    )
    .bind(observer_id)
    .bind(INVALID_PAGE_SIZE)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let points = rows
        .iter()
        .map(|row| {
            InvalidPoint::new(
                row.get::<i64, _>(0) as usize,
                row.get(1),
                row.get(2),
                None,
            )
        })
        .collect();

    Ok((total, points))
}

/// Fetch flat response rows for the read pipeline.
pub async fn fetch_flat_rows(
    pool: &SqlitePool,
    filter: &ResponseFilter,
) -> Result<Vec<FlatResponseRow>> {
    let mut sql = String::from(
        "SELECT username, client, epoch_millis, timezone, survey_id, \
                repeatable_set_id, repeatable_set_iteration, \
                prompt_id, prompt_type, display_label, unit, response \
         FROM survey_responses WHERE observer_id = ?",
    );
    if filter.username.is_some() {
        sql.push_str(" AND username = ?");
    }
    if filter.survey_id.is_some() {
        sql.push_str(" AND survey_id = ?");
    }
    sql.push_str(" ORDER BY epoch_millis, id LIMIT ?");

    let mut query = sqlx::query(&sql).bind(&filter.observer_id);
    if let Some(username) = &filter.username {
        query = query.bind(username);
    }
    if let Some(survey_id) = &filter.survey_id {
        query = query.bind(survey_id);
    }
    query = query.bind(MAX_READ_ROWS);

    let rows = query.fetch_all(pool).await?;

    rows.iter()
        .map(|row| {
            let type_text: String = row.get(8);
            let prompt_type = PromptType::parse(&type_text).ok_or_else(|| {
                Error::Internal(format!("Unknown stored prompt type: {}", type_text))
            })?;
            Ok(FlatResponseRow {
                username: row.get(0),
                client: row.get(1),
                epoch_millis: row.get(2),
                timezone: row.get(3),
                survey_id: row.get(4),
                repeatable_set_id: row.get(5),
                repeatable_set_iteration: row.get(6),
                prompt_id: row.get(7),
                prompt_type,
                display_label: row.get(9),
                unit: row.get(10),
                response: row.get(11),
            })
        })
        .collect()
}

/// Encode a response value for the TEXT column: strings (including the
/// sentinels) are stored raw, everything else as compact JSON.
fn encode_response(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
