//! Observer definition storage

use mdcs_common::{Error, Result};
use sqlx::SqlitePool;

use crate::models::{observer::verify_new_observer, Observer, UnchangedStream};

/// Greatest registered version for an observer id, if any.
pub async fn greatest_version(pool: &SqlitePool, observer_id: &str) -> Result<Option<i64>> {
    // MAX() over zero rows yields NULL, hence the Option scalar
    let version: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(version) FROM observers WHERE observer_id = ?",
    )
    .bind(observer_id)
    .fetch_one(pool)
    .await?;
    Ok(version)
}

/// Load one observer definition; the latest version when `version` is None.
pub async fn load_observer(
    pool: &SqlitePool,
    observer_id: &str,
    version: Option<i64>,
) -> Result<Option<Observer>> {
    let row: Option<(String,)> = match version {
        Some(v) => {
            sqlx::query_as(
                "SELECT definition FROM observers WHERE observer_id = ? AND version = ?",
            )
            .bind(observer_id)
            .bind(v)
            .fetch_optional(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                "SELECT definition FROM observers WHERE observer_id = ? \
                 ORDER BY version DESC LIMIT 1",
            )
            .bind(observer_id)
            .fetch_optional(pool)
            .await?
        }
    };

    match row {
        Some((definition,)) => {
            let observer = serde_json::from_str(&definition).map_err(|e| {
                Error::Internal(format!(
                    "Stored observer definition does not parse: {}",
                    e
                ))
            })?;
            Ok(Some(observer))
        }
        None => Ok(None),
    }
}

/// Validate and store a new observer version.
///
/// Version rules are checked against the latest stored definition; on
/// success the definition is stored verbatim and the streams whose version
/// did not change are returned.
pub async fn register_observer(
    pool: &SqlitePool,
    owner: &str,
    observer: &Observer,
) -> Result<Vec<UnchangedStream>> {
    let stored = load_observer(pool, &observer.id, None).await?;

    let unchanged = verify_new_observer(observer, stored.as_ref())
        .map_err(|e| Error::InvalidInput(e.to_string()))?;

    let definition = serde_json::to_string(observer)
        .map_err(|e| Error::Internal(format!("Failed to serialize observer: {}", e)))?;

    sqlx::query(
        "INSERT INTO observers (observer_id, version, owner, definition) VALUES (?, ?, ?, ?)",
    )
    .bind(&observer.id)
    .bind(observer.version)
    .bind(owner)
    .bind(&definition)
    .execute(pool)
    .await?;

    tracing::info!(
        observer = %observer.id,
        version = observer.version,
        unchanged_streams = unchanged.len(),
        "Registered observer definition"
    );

    Ok(unchanged)
}
