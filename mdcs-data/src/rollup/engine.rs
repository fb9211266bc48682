//! Roll-up of flat response rows into per-submission aggregates
//!
//! Storage returns one row per prompt response, interleaved arbitrarily
//! across submissions. Rows sharing the composite key (username,
//! epoch_millis, survey_id, repeatable_set_id, repeatable_set_iteration)
//! belong to one submission and collapse into one `IndexedResult`.
//!
//! Grouping uses an insertion-ordered map keyed by the 5-tuple, so emission
//! order is the first-appearance order of each key and a repeated
//! (key, prompt_id) pair overwrites the earlier value (last-write-wins).

use indexmap::map::Entry;
use indexmap::IndexMap;
use serde_json::Value;

use crate::models::{point, FlatResponseRow, PromptResponseMetadata, PromptType};

/// Composite grouping key identifying one survey submission.
///
/// The repeatable-set fields are absent for non-repeating surveys; two keys
/// only match when both sides agree on presence and value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponseKey {
    pub username: String,
    pub epoch_millis: i64,
    pub survey_id: String,
    pub repeatable_set_id: Option<String>,
    pub repeatable_set_iteration: Option<i64>,
}

impl ResponseKey {
    fn from_row(row: &FlatResponseRow) -> Self {
        Self {
            username: row.username.clone(),
            epoch_millis: row.epoch_millis,
            survey_id: row.survey_id.clone(),
            repeatable_set_id: row.repeatable_set_id.clone(),
            repeatable_set_iteration: row.repeatable_set_iteration,
        }
    }
}

/// One rolled-up survey submission: the grouping key plus per-prompt
/// response values and metadata, in first-seen prompt order.
#[derive(Debug, Clone)]
pub struct IndexedResult {
    pub key: ResponseKey,
    pub client: Option<String>,
    pub timezone: String,
    pub responses: IndexMap<String, Value>,
    pub metadata: IndexMap<String, PromptResponseMetadata>,
}

impl IndexedResult {
    fn from_row(row: FlatResponseRow) -> Self {
        let key = ResponseKey::from_row(&row);
        let mut result = Self {
            key,
            client: row.client.clone(),
            timezone: row.timezone.clone(),
            responses: IndexMap::new(),
            metadata: IndexMap::new(),
        };
        result.append_row(row);
        result
    }

    /// Add one prompt response. A repeated prompt id keeps its original
    /// position but takes the newer value.
    fn append_row(&mut self, row: FlatResponseRow) {
        let value = response_value(row.prompt_type, &row.response);
        self.metadata.insert(row.prompt_id.clone(), row.metadata());
        self.responses.insert(row.prompt_id, value);
    }
}

/// Group flat rows into indexed results, in first-appearance key order.
///
/// Takes the rows by value: the flat form can be large and is dropped here,
/// so only the rolled-up form survives the pass.
pub fn roll_up(rows: Vec<FlatResponseRow>) -> Vec<IndexedResult> {
    let mut grouped: IndexMap<ResponseKey, IndexedResult> = IndexMap::new();

    for row in rows {
        match grouped.entry(ResponseKey::from_row(&row)) {
            Entry::Occupied(mut entry) => entry.get_mut().append_row(row),
            Entry::Vacant(entry) => {
                entry.insert(IndexedResult::from_row(row));
            }
        }
    }

    grouped.into_values().collect()
}

/// Decode a stored response text into its JSON value.
///
/// Sentinels stay strings. Typed prompts parse back to the JSON shape they
/// were uploaded with; custom-choice responses stay raw text here because
/// glossary normalization parses and rewrites them afterwards. A value that
/// fails to parse falls back to the raw string rather than failing the
/// read.
fn response_value(prompt_type: PromptType, raw: &str) -> Value {
    if point::is_sentinel(raw) {
        return Value::String(raw.to_string());
    }
    match prompt_type {
        PromptType::Number | PromptType::SingleChoice | PromptType::MultiChoice => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        }
        PromptType::Text | PromptType::Timestamp => Value::String(raw.to_string()),
        PromptType::SingleChoiceCustom | PromptType::MultiChoiceCustom => {
            Value::String(raw.to_string())
        }
    }
}
