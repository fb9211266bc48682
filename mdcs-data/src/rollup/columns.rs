//! Output column catalog and projection
//!
//! Columns are addressed by URN. `urn:ohmage:special:all` (in first
//! position) expands to the whole catalog, and `urn:ohmage:prompt:response`
//! expands to one concrete `urn:ohmage:prompt:id:<id>` column per distinct
//! prompt appearing in the result set.

use chrono::{TimeZone, Utc};
use indexmap::IndexSet;
use serde_json::Value;

use crate::rollup::engine::IndexedResult;

pub const COLUMN_USER_ID: &str = "urn:ohmage:user:id";
pub const COLUMN_CLIENT: &str = "urn:ohmage:context:client";
pub const COLUMN_TIMESTAMP: &str = "urn:ohmage:context:timestamp";
pub const COLUMN_TIMEZONE: &str = "urn:ohmage:context:timezone";
pub const COLUMN_SURVEY_ID: &str = "urn:ohmage:survey:id";
pub const COLUMN_REPEATABLE_SET_ID: &str = "urn:ohmage:repeatable_set:id";
pub const COLUMN_REPEATABLE_SET_ITERATION: &str = "urn:ohmage:repeatable_set:iteration";
pub const COLUMN_PROMPT_RESPONSE: &str = "urn:ohmage:prompt:response";
pub const COLUMN_ALL: &str = "urn:ohmage:special:all";

const PROMPT_ID_PREFIX: &str = "urn:ohmage:prompt:id:";

/// The full declared column catalog, in output order.
pub const COLUMN_CATALOG: [&str; 8] = [
    COLUMN_USER_ID,
    COLUMN_CLIENT,
    COLUMN_TIMESTAMP,
    COLUMN_TIMEZONE,
    COLUMN_SURVEY_ID,
    COLUMN_REPEATABLE_SET_ID,
    COLUMN_REPEATABLE_SET_ITERATION,
    COLUMN_PROMPT_RESPONSE,
];

/// Column name for one concrete prompt.
pub fn prompt_column(prompt_id: &str) -> String {
    format!("{}{}", PROMPT_ID_PREFIX, prompt_id)
}

/// Resolve the requested column list against a result set.
///
/// When the first requested column is the all-columns sentinel the whole
/// catalog is used. If the request asks for prompt responses (explicitly or
/// via the sentinel), one column per distinct prompt id in the results is
/// appended, in first-seen order, and the literal prompt-response column is
/// removed since the concrete columns replace it.
pub fn expand_columns(requested: &[String], results: &[IndexedResult]) -> Vec<String> {
    let all = requested.first().map(|c| c == COLUMN_ALL).unwrap_or(false);

    let mut output: Vec<String> = if all {
        COLUMN_CATALOG.iter().map(|c| c.to_string()).collect()
    } else {
        requested.to_vec()
    };

    if all || requested.iter().any(|c| c == COLUMN_PROMPT_RESPONSE) {
        let mut prompt_ids: IndexSet<&str> = IndexSet::new();
        for result in results {
            for prompt_id in result.responses.keys() {
                prompt_ids.insert(prompt_id.as_str());
            }
        }
        output.extend(prompt_ids.iter().map(|id| prompt_column(id)));
    }

    output.retain(|c| c != COLUMN_PROMPT_RESPONSE);
    output
}

/// Value of one output column for one rolled-up result.
///
/// Unknown column names yield null rather than failing the request.
pub fn column_value(column: &str, result: &IndexedResult) -> Value {
    if let Some(prompt_id) = column.strip_prefix(PROMPT_ID_PREFIX) {
        return result.responses.get(prompt_id).cloned().unwrap_or(Value::Null);
    }

    match column {
        COLUMN_USER_ID => Value::String(result.key.username.clone()),
        COLUMN_CLIENT => result
            .client
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
        COLUMN_TIMESTAMP => {
            let ts = Utc.timestamp_millis_opt(result.key.epoch_millis).single();
            ts.map(|t| Value::String(t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)))
                .unwrap_or(Value::Null)
        }
        COLUMN_TIMEZONE => Value::String(result.timezone.clone()),
        COLUMN_SURVEY_ID => Value::String(result.key.survey_id.clone()),
        COLUMN_REPEATABLE_SET_ID => result
            .key
            .repeatable_set_id
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
        COLUMN_REPEATABLE_SET_ITERATION => result
            .key
            .repeatable_set_iteration
            .map(|i| Value::Number(i.into()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}
