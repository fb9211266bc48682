//! Duplicate filtering for uploaded points
//!
//! A duplicate is a point whose client-supplied identifier is already
//! persisted for the same user and the same survey at its current version.
//! Duplicates are pruned silently; dropping one is expected behavior, not a
//! failure. Two points sharing an identifier within a single upload are
//! both kept, since only persisted history is consulted.

use std::collections::HashMap;
use std::collections::HashSet;

use mdcs_common::Result;
use sqlx::SqlitePool;
use tracing::debug;

use crate::db;
use crate::models::DataPoint;

/// Outcome of one duplicate-filter pass.
#[derive(Debug)]
pub struct DedupOutcome {
    pub surviving: Vec<DataPoint>,
    pub duplicate_count: usize,
}

/// Prunes already-persisted points from upload batches.
pub struct DuplicateFilter {
    db: SqlitePool,
}

impl DuplicateFilter {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Remove points whose identifier already exists for (username, survey,
    /// version). Points without an identifier always survive.
    pub async fn filter_duplicates(
        &self,
        username: &str,
        observer_id: &str,
        points: Vec<DataPoint>,
    ) -> Result<DedupOutcome> {
        // Group candidate identifiers by (survey, version)
        let mut candidates: HashMap<(String, i64), Vec<String>> = HashMap::new();
        for point in &points {
            if let Some(id) = &point.point_id {
                candidates
                    .entry((point.stream_id.clone(), point.stream_version))
                    .or_default()
                    .push(id.clone());
            }
        }

        // Fetch the persisted identifiers that collide with this batch
        let mut persisted: HashSet<(String, i64, String)> = HashSet::new();
        for ((survey_id, version), ids) in &candidates {
            let existing = db::points::existing_point_ids(
                &self.db, username, observer_id, survey_id, *version, ids,
            )
            .await?;
            for id in existing {
                persisted.insert((survey_id.clone(), *version, id));
            }
        }

        let original_count = points.len();
        let surviving: Vec<DataPoint> = points
            .into_iter()
            .filter(|point| match &point.point_id {
                Some(id) => !persisted.contains(&(
                    point.stream_id.clone(),
                    point.stream_version,
                    id.clone(),
                )),
                None => true,
            })
            .collect();

        let duplicate_count = original_count - surviving.len();
        if duplicate_count > 0 {
            debug!(
                username,
                observer_id, duplicate_count, "Pruned duplicate points from upload"
            );
        }

        Ok(DedupOutcome {
            surviving,
            duplicate_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PromptResponse, PromptResponseMetadata, PromptType};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        pool
    }

    fn point(point_id: Option<&str>, survey: &str, version: i64) -> DataPoint {
        DataPoint {
            stream_id: survey.to_string(),
            stream_version: version,
            point_id: point_id.map(String::from),
            timestamp: Utc.timestamp_opt(1000, 0).unwrap(),
            timezone: "UTC".to_string(),
            client: None,
            responses: vec![PromptResponse {
                prompt_id: "hours".to_string(),
                repeatable_set_id: None,
                repeatable_set_iteration: None,
                metadata: PromptResponseMetadata {
                    prompt_type: PromptType::Number,
                    display_label: "Hours".to_string(),
                    unit: None,
                },
                value: json!(7),
            }],
        }
    }

    #[tokio::test]
    async fn persisted_identifier_is_pruned() {
        let pool = setup_test_db().await;
        db::points::store_points(&pool, "alice", "org.mdcs.daily", &[point(Some("p1"), "s", 1)])
            .await
            .unwrap();

        let filter = DuplicateFilter::new(pool);
        let outcome = filter
            .filter_duplicates(
                "alice",
                "org.mdcs.daily",
                vec![point(Some("p1"), "s", 1), point(Some("p2"), "s", 1)],
            )
            .await
            .unwrap();

        assert_eq!(outcome.duplicate_count, 1);
        assert_eq!(outcome.surviving.len(), 1);
        assert_eq!(outcome.surviving[0].point_id.as_deref(), Some("p2"));
    }

    #[tokio::test]
    async fn points_without_identifier_always_survive() {
        let pool = setup_test_db().await;
        db::points::store_points(&pool, "alice", "org.mdcs.daily", &[point(None, "s", 1)])
            .await
            .unwrap();

        let filter = DuplicateFilter::new(pool);
        let outcome = filter
            .filter_duplicates("alice", "org.mdcs.daily", vec![point(None, "s", 1)])
            .await
            .unwrap();

        assert_eq!(outcome.duplicate_count, 0);
        assert_eq!(outcome.surviving.len(), 1);
    }

    #[tokio::test]
    async fn in_batch_repeats_are_both_kept() {
        let pool = setup_test_db().await;
        let filter = DuplicateFilter::new(pool);

        let outcome = filter
            .filter_duplicates(
                "alice",
                "org.mdcs.daily",
                vec![point(Some("p1"), "s", 1), point(Some("p1"), "s", 1)],
            )
            .await
            .unwrap();

        assert_eq!(outcome.duplicate_count, 0);
        assert_eq!(outcome.surviving.len(), 2);
    }

    #[tokio::test]
    async fn other_user_history_does_not_count() {
        let pool = setup_test_db().await;
        db::points::store_points(&pool, "bob", "org.mdcs.daily", &[point(Some("p1"), "s", 1)])
            .await
            .unwrap();

        let filter = DuplicateFilter::new(pool);
        let outcome = filter
            .filter_duplicates("alice", "org.mdcs.daily", vec![point(Some("p1"), "s", 1)])
            .await
            .unwrap();

        assert_eq!(outcome.duplicate_count, 0);
    }

    #[tokio::test]
    async fn other_version_history_does_not_count() {
        let pool = setup_test_db().await;
        db::points::store_points(&pool, "alice", "org.mdcs.daily", &[point(Some("p1"), "s", 1)])
            .await
            .unwrap();

        let filter = DuplicateFilter::new(pool);
        let outcome = filter
            .filter_duplicates("alice", "org.mdcs.daily", vec![point(Some("p1"), "s", 2)])
            .await
            .unwrap();

        assert_eq!(outcome.duplicate_count, 0);
        assert_eq!(outcome.surviving.len(), 1);
    }
}
