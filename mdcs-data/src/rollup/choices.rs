//! Custom-choice normalization and glossary construction
//!
//! Custom-choice responses are stored with the client's whole choice
//! catalog embedded in each response. On read, the catalog entries are
//! unified into one glossary per prompt and each response is rewritten to
//! carry only the chosen value(s).
//!
//! Choice ids below `CUSTOM_CHOICE_INDEX_START` belong to the fixed global
//! catalog and keep their original id; user-added choices are renumbered
//! sequentially from that threshold, per prompt, in first-seen order.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::models::point;
use crate::rollup::engine::IndexedResult;

/// First surrogate id available for user-added choices. Everything below is
/// reserved for the global catalog.
pub const CUSTOM_CHOICE_INDEX_START: i64 = 100;

/// Where a choice came from: the fixed global catalog or a user addition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChoiceProvenance {
    Global,
    Custom,
}

/// One unified choice-glossary entry.
///
/// Equality deliberately ignores the surrogate `id` and the owning
/// username: two entries are the same choice when their original id,
/// display value, and provenance agree.
#[derive(Debug, Clone, Serialize)]
pub struct CustomChoiceItem {
    #[serde(rename = "choice_id")]
    pub id: i64,
    #[serde(skip)]
    pub original_id: i64,
    #[serde(skip)]
    pub username: String,
    #[serde(rename = "choice_value")]
    pub value: String,
    #[serde(rename = "type")]
    pub provenance: ChoiceProvenance,
}

impl PartialEq for CustomChoiceItem {
    fn eq(&self, other: &Self) -> bool {
        self.original_id == other.original_id
            && self.value == other.value
            && self.provenance == other.provenance
    }
}

/// Glossary: prompt id → unique choice items in first-seen order.
pub type ChoiceGlossary = IndexMap<String, Vec<CustomChoiceItem>>;

/// Normalization failures. These indicate stored data the validator never
/// accepted (or pre-validator legacy rows) and abort the read request.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("custom-choice response for prompt '{prompt_id}' is not a JSON object")]
    NotAnObject { prompt_id: String },

    #[error("custom-choice response for prompt '{prompt_id}' is missing 'value'")]
    MissingValue { prompt_id: String },

    #[error("custom-choice response for prompt '{prompt_id}' is missing 'custom_choices'")]
    MissingChoices { prompt_id: String },

    #[error("malformed custom_choices entry for prompt '{prompt_id}': {entry}")]
    MalformedChoice { prompt_id: String, entry: String },
}

/// Builds one choice glossary per read request.
///
/// Constructed fresh for every request and consumed by `normalize`; the
/// per-prompt surrogate counters live here, not in any shared state.
#[derive(Debug, Default)]
pub struct GlossaryBuilder {
    glossary: ChoiceGlossary,
    next_index: HashMap<String, i64>,
}

impl GlossaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite custom-choice responses in place and return the glossary.
    ///
    /// Sentinel responses are left untouched. A response that is not a
    /// string was already normalized (the chosen-value projection) and is
    /// skipped, which together with the equality-based containment check
    /// makes a second pass over the same results a no-op.
    pub fn normalize(
        mut self,
        results: &mut [IndexedResult],
    ) -> Result<ChoiceGlossary, NormalizeError> {
        for result in results.iter_mut() {
            let custom_prompts: Vec<String> = result
                .metadata
                .iter()
                .filter(|(_, meta)| meta.prompt_type.is_custom_choice())
                .map(|(id, _)| id.clone())
                .collect();

            for prompt_id in custom_prompts {
                let raw = match result.responses.get(&prompt_id) {
                    Some(Value::String(s)) => s.clone(),
                    _ => continue,
                };
                if point::is_sentinel(&raw) {
                    continue;
                }

                let parsed: Value = serde_json::from_str(&raw).map_err(|_| {
                    NormalizeError::NotAnObject {
                        prompt_id: prompt_id.clone(),
                    }
                })?;
                let obj = parsed.as_object().ok_or_else(|| NormalizeError::NotAnObject {
                    prompt_id: prompt_id.clone(),
                })?;

                let selected = obj.get("value").cloned().ok_or_else(|| {
                    NormalizeError::MissingValue {
                        prompt_id: prompt_id.clone(),
                    }
                })?;
                let entries = obj
                    .get("custom_choices")
                    .and_then(Value::as_array)
                    .ok_or_else(|| NormalizeError::MissingChoices {
                        prompt_id: prompt_id.clone(),
                    })?;

                for entry in entries {
                    let (original_id, choice_value) = entry
                        .as_object()
                        .and_then(|e| {
                            Some((
                                e.get("choice_id")?.as_i64()?,
                                e.get("choice_value")?.as_str()?,
                            ))
                        })
                        .ok_or_else(|| NormalizeError::MalformedChoice {
                            prompt_id: prompt_id.clone(),
                            entry: entry.to_string(),
                        })?;
                    self.register(
                        &prompt_id,
                        original_id,
                        &result.key.username,
                        choice_value,
                    );
                }

                // Only the chosen value(s) survive; the embedded catalog is
                // now represented by the glossary.
                result.responses.insert(prompt_id, selected);
            }
        }

        debug!(prompts = self.glossary.len(), "Choice glossary built");
        Ok(self.glossary)
    }

    /// Register one choice for a prompt, deduplicating by structural
    /// equality and assigning surrogate ids.
    fn register(&mut self, prompt_id: &str, original_id: i64, username: &str, value: &str) {
        let provenance = if original_id < CUSTOM_CHOICE_INDEX_START {
            ChoiceProvenance::Global
        } else {
            ChoiceProvenance::Custom
        };
        let candidate = CustomChoiceItem {
            id: original_id,
            original_id,
            username: username.to_string(),
            value: value.to_string(),
            provenance,
        };

        let items = self.glossary.entry(prompt_id.to_string()).or_default();
        if items.contains(&candidate) {
            return;
        }

        let id = match provenance {
            // Global choices always keep their catalog id
            ChoiceProvenance::Global => original_id,
            ChoiceProvenance::Custom => {
                let next = self
                    .next_index
                    .entry(prompt_id.to_string())
                    .or_insert(CUSTOM_CHOICE_INDEX_START - 1);
                *next += 1;
                *next
            }
        };
        items.push(CustomChoiceItem { id, ..candidate });
    }
}
