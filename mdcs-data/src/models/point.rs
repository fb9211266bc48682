//! Upload points and their normalized/flat forms
//!
//! An upload carries a JSON array of raw points. Validation turns each raw
//! point into a `DataPoint` whose prompt responses are already flattened to
//! one entry per (prompt, repeatable-set iteration); persistence writes one
//! `survey_responses` row per entry. The read pipeline gets the rows back
//! as `FlatResponseRow` values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::observer::PromptType;

/// Response sentinel: the participant skipped the prompt.
pub const SENTINEL_SKIPPED: &str = "SKIPPED";

/// Response sentinel: the prompt's display condition never triggered.
pub const SENTINEL_NOT_DISPLAYED: &str = "NOT_DISPLAYED";

/// Per-point metadata supplied by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointMetadata {
    /// Client-supplied unique identifier, used for deduplication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// When the submission was recorded on the device.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Name of the uploading client application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

/// One raw point as it appears in the upload array.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadPoint {
    pub stream: String,
    pub version: i64,
    pub metadata: PointMetadata,
    pub data: serde_json::Value,
}

/// Metadata describing one prompt response, carried alongside the value
/// through persistence and roll-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptResponseMetadata {
    pub prompt_type: PromptType,
    pub display_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// One flattened prompt response inside a validated point.
#[derive(Debug, Clone)]
pub struct PromptResponse {
    pub prompt_id: String,
    pub repeatable_set_id: Option<String>,
    pub repeatable_set_iteration: Option<i64>,
    pub metadata: PromptResponseMetadata,
    /// Response value as uploaded; sentinels stay strings, custom-choice
    /// responses stay the full JSON object until read-side normalization.
    pub value: serde_json::Value,
}

/// A validated, normalized point ready for persistence.
#[derive(Debug, Clone)]
pub struct DataPoint {
    pub stream_id: String,
    pub stream_version: i64,
    pub point_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub timezone: String,
    pub client: Option<String>,
    pub responses: Vec<PromptResponse>,
}

impl DataPoint {
    pub fn epoch_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// An invalid point in an upload: the index in the upload array, the raw
/// data for that index, the reason it was rejected, and optionally the
/// rendered underlying cause. Terminal; written to the invalid-point sink
/// and never re-validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidPoint {
    pub index: usize,
    pub data: String,
    pub reason: String,
    #[serde(skip)]
    pub cause: Option<String>,
}

impl InvalidPoint {
    pub fn new(index: usize, data: String, reason: String, cause: Option<String>) -> Self {
        Self {
            index,
            data,
            reason,
            cause,
        }
    }
}

/// One persisted prompt-response row, as fetched by the read pipeline.
///
/// (username, epoch_millis, survey_id, repeatable_set_id,
/// repeatable_set_iteration) is the roll-up grouping key; the remaining
/// fields are the response value and its metadata.
#[derive(Debug, Clone)]
pub struct FlatResponseRow {
    pub username: String,
    pub client: Option<String>,
    pub epoch_millis: i64,
    pub timezone: String,
    pub survey_id: String,
    pub repeatable_set_id: Option<String>,
    pub repeatable_set_iteration: Option<i64>,
    pub prompt_id: String,
    pub prompt_type: PromptType,
    pub display_label: String,
    pub unit: Option<String>,
    pub response: String,
}

impl FlatResponseRow {
    pub fn metadata(&self) -> PromptResponseMetadata {
        PromptResponseMetadata {
            prompt_type: self.prompt_type,
            display_label: self.display_label.clone(),
            unit: self.unit.clone(),
        }
    }
}

/// True when a stored response text is one of the two sentinels.
pub fn is_sentinel(value: &str) -> bool {
    value == SENTINEL_SKIPPED || value == SENTINEL_NOT_DISPLAYED
}
