//! Schema validation for uploaded points
//!
//! Checks every raw point of an upload batch against the observer's stream
//! definitions and flattens conforming points into `DataPoint` values. A
//! payload that is not a JSON array fails the whole batch; everything else
//! is a per-point violation. In best-effort mode (the upload endpoint's
//! default) violations become `InvalidPoint` records and the batch
//! continues; in strict mode the first violation aborts.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{
    point, DataPoint, InvalidPoint, Observer, PromptDefinition, PromptResponse,
    PromptResponseMetadata, UploadPoint,
};

/// How the validator reacts to per-point violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Abort the batch on the first violation.
    Strict,
    /// Collect violations as invalid points and keep going.
    BestEffort,
}

/// Validation failures.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("the upload payload is not well-formed JSON")]
    MalformedInput(#[source] serde_json::Error),

    #[error("the upload payload must be a JSON array of points")]
    NotAnArray,

    #[error("point is not a well-formed point object: {reason}")]
    MalformedPoint { reason: String },

    #[error("point references unknown stream '{stream_id}'")]
    UnknownStream { stream_id: String },

    #[error("stream '{stream_id}' has version {expected}, point was built against version {actual}")]
    VersionMismatch {
        stream_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("point data must be a JSON object")]
    DataNotAnObject,

    #[error("response references unknown prompt '{prompt_id}'")]
    UnknownPrompt { prompt_id: String },

    #[error("missing response for prompt '{prompt_id}'")]
    MissingPrompt { prompt_id: String },

    #[error("prompt '{prompt_id}' expects {expected}: {detail}")]
    SchemaMismatch {
        prompt_id: String,
        expected: &'static str,
        detail: String,
    },

    #[error("repeatable set '{set_id}' must be an array of iteration objects")]
    MalformedRepeatableSet { set_id: String },
}

impl ValidationError {
    fn mismatch(prompt_id: &str, expected: &'static str, detail: impl Into<String>) -> Self {
        ValidationError::SchemaMismatch {
            prompt_id: prompt_id.to_string(),
            expected,
            detail: detail.into(),
        }
    }
}

/// Outcome of validating one upload batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub accepted: Vec<DataPoint>,
    pub invalid: Vec<InvalidPoint>,
}

/// Validates raw upload batches against one observer's stream definitions.
pub struct SchemaValidator<'a> {
    observer: &'a Observer,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(observer: &'a Observer) -> Self {
        Self { observer }
    }

    /// Validate a whole upload payload.
    ///
    /// The payload must parse as a JSON array; that failure (and only that
    /// failure) is fatal to the batch in both modes.
    pub fn validate_batch(
        &self,
        raw: &str,
        mode: ValidationMode,
    ) -> Result<BatchOutcome, ValidationError> {
        let parsed: Value =
            serde_json::from_str(raw).map_err(ValidationError::MalformedInput)?;
        let points = parsed.as_array().ok_or(ValidationError::NotAnArray)?;

        let mut outcome = BatchOutcome::default();
        for (index, raw_point) in points.iter().enumerate() {
            match self.validate_point(raw_point) {
                Ok(point) => outcome.accepted.push(point),
                Err(e) => match mode {
                    ValidationMode::Strict => return Err(e),
                    ValidationMode::BestEffort => {
                        warn!(
                            observer = %self.observer.id,
                            index,
                            "Rejecting invalid point: {}",
                            e
                        );
                        let cause = std::error::Error::source(&e).map(|c| c.to_string());
                        outcome.invalid.push(InvalidPoint::new(
                            index,
                            raw_point.to_string(),
                            e.to_string(),
                            cause,
                        ));
                    }
                },
            }
        }

        debug!(
            observer = %self.observer.id,
            accepted = outcome.accepted.len(),
            invalid = outcome.invalid.len(),
            "Batch validation complete"
        );
        Ok(outcome)
    }

    /// Validate one raw point and flatten it into a `DataPoint`.
    pub fn validate_point(&self, raw: &Value) -> Result<DataPoint, ValidationError> {
        let point: UploadPoint = serde_json::from_value(raw.clone()).map_err(|e| {
            ValidationError::MalformedPoint {
                reason: e.to_string(),
            }
        })?;

        let stream = self.observer.stream(&point.stream).ok_or_else(|| {
            ValidationError::UnknownStream {
                stream_id: point.stream.clone(),
            }
        })?;
        if point.version != stream.version {
            return Err(ValidationError::VersionMismatch {
                stream_id: stream.id.clone(),
                expected: stream.version,
                actual: point.version,
            });
        }

        let data = point.data.as_object().ok_or(ValidationError::DataNotAnObject)?;

        // Reject keys that name neither a prompt nor a repeatable set.
        for key in data.keys() {
            if stream.prompt(key).is_none() && stream.repeatable_set(key).is_none() {
                return Err(ValidationError::UnknownPrompt {
                    prompt_id: key.clone(),
                });
            }
        }

        let mut responses = Vec::new();

        // Top-level prompts are required, in definition order.
        for prompt in &stream.prompts {
            let value = data.get(&prompt.id).ok_or_else(|| {
                ValidationError::MissingPrompt {
                    prompt_id: prompt.id.clone(),
                }
            })?;
            validate_value(prompt, value)?;
            responses.push(PromptResponse {
                prompt_id: prompt.id.clone(),
                repeatable_set_id: None,
                repeatable_set_iteration: None,
                metadata: prompt_metadata(prompt),
                value: value.clone(),
            });
        }

        // Repeatable sets may be absent (zero iterations); when present,
        // every iteration must carry every member prompt.
        for set in &stream.repeatable_sets {
            let iterations = match data.get(&set.id) {
                Some(v) => v.as_array().ok_or_else(|| {
                    ValidationError::MalformedRepeatableSet {
                        set_id: set.id.clone(),
                    }
                })?,
                None => continue,
            };

            for (iteration, entry) in iterations.iter().enumerate() {
                let entry = entry.as_object().ok_or_else(|| {
                    ValidationError::MalformedRepeatableSet {
                        set_id: set.id.clone(),
                    }
                })?;
                for prompt in &set.prompts {
                    let value = entry.get(&prompt.id).ok_or_else(|| {
                        ValidationError::MissingPrompt {
                            prompt_id: prompt.id.clone(),
                        }
                    })?;
                    validate_value(prompt, value)?;
                    responses.push(PromptResponse {
                        prompt_id: prompt.id.clone(),
                        repeatable_set_id: Some(set.id.clone()),
                        repeatable_set_iteration: Some(iteration as i64),
                        metadata: prompt_metadata(prompt),
                        value: value.clone(),
                    });
                }
            }
        }

        Ok(DataPoint {
            stream_id: stream.id.clone(),
            stream_version: stream.version,
            point_id: point.metadata.id,
            timestamp: point.metadata.timestamp,
            timezone: point.metadata.timezone.unwrap_or_else(|| "UTC".to_string()),
            client: point.metadata.client,
            responses,
        })
    }
}

fn prompt_metadata(prompt: &PromptDefinition) -> PromptResponseMetadata {
    PromptResponseMetadata {
        prompt_type: prompt.prompt_type,
        display_label: prompt.display_label.clone(),
        unit: prompt.unit.clone(),
    }
}

/// Check one response value against its prompt's declared type and domain.
fn validate_value(prompt: &PromptDefinition, value: &Value) -> Result<(), ValidationError> {
    // Any prompt may carry a sentinel instead of an answer.
    if let Some(s) = value.as_str() {
        if point::is_sentinel(s) {
            return Ok(());
        }
    }

    use crate::models::PromptType::*;
    match prompt.prompt_type {
        Number => {
            let n = value.as_f64().ok_or_else(|| {
                ValidationError::mismatch(&prompt.id, "a number", format!("got {}", value))
            })?;
            if let Some(min) = prompt.min {
                if n < min {
                    return Err(ValidationError::mismatch(
                        &prompt.id,
                        "a number",
                        format!("{} is below the minimum {}", n, min),
                    ));
                }
            }
            if let Some(max) = prompt.max {
                if n > max {
                    return Err(ValidationError::mismatch(
                        &prompt.id,
                        "a number",
                        format!("{} is above the maximum {}", n, max),
                    ));
                }
            }
            Ok(())
        }
        Text => {
            if value.is_string() {
                Ok(())
            } else {
                Err(ValidationError::mismatch(
                    &prompt.id,
                    "a string",
                    format!("got {}", value),
                ))
            }
        }
        Timestamp => {
            let s = value.as_str().ok_or_else(|| {
                ValidationError::mismatch(&prompt.id, "an RFC 3339 timestamp", format!("got {}", value))
            })?;
            chrono::DateTime::parse_from_rfc3339(s).map_err(|e| {
                ValidationError::mismatch(
                    &prompt.id,
                    "an RFC 3339 timestamp",
                    format!("'{}' does not parse: {}", s, e),
                )
            })?;
            Ok(())
        }
        SingleChoice => {
            let key = value.as_i64().ok_or_else(|| {
                ValidationError::mismatch(&prompt.id, "a choice key", format!("got {}", value))
            })?;
            if prompt.has_choice_key(key) {
                Ok(())
            } else {
                Err(ValidationError::mismatch(
                    &prompt.id,
                    "a choice key",
                    format!("{} is not in the choice catalog", key),
                ))
            }
        }
        MultiChoice => {
            let keys = value.as_array().ok_or_else(|| {
                ValidationError::mismatch(&prompt.id, "an array of choice keys", format!("got {}", value))
            })?;
            for key in keys {
                let key = key.as_i64().ok_or_else(|| {
                    ValidationError::mismatch(
                        &prompt.id,
                        "an array of choice keys",
                        format!("{} is not an integer", key),
                    )
                })?;
                if !prompt.has_choice_key(key) {
                    return Err(ValidationError::mismatch(
                        &prompt.id,
                        "an array of choice keys",
                        format!("{} is not in the choice catalog", key),
                    ));
                }
            }
            Ok(())
        }
        SingleChoiceCustom | MultiChoiceCustom => {
            validate_custom_choice(prompt, value)
        }
    }
}

/// Custom-choice responses are objects carrying the selected `value` plus
/// the client's `custom_choices` catalog, which read-side normalization
/// later strips.
fn validate_custom_choice(prompt: &PromptDefinition, value: &Value) -> Result<(), ValidationError> {
    let obj = value.as_object().ok_or_else(|| {
        ValidationError::mismatch(
            &prompt.id,
            "a custom-choice object",
            format!("got {}", value),
        )
    })?;

    let selected = obj.get("value").ok_or_else(|| {
        ValidationError::mismatch(&prompt.id, "a custom-choice object", "missing 'value'")
    })?;
    let single = prompt.prompt_type == crate::models::PromptType::SingleChoiceCustom;
    if single && !selected.is_i64() {
        return Err(ValidationError::mismatch(
            &prompt.id,
            "a custom-choice object",
            "'value' must be an integer for single-choice prompts",
        ));
    }
    if !single && !selected.is_array() {
        return Err(ValidationError::mismatch(
            &prompt.id,
            "a custom-choice object",
            "'value' must be an array for multi-choice prompts",
        ));
    }

    let choices = obj
        .get("custom_choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| {
            ValidationError::mismatch(
                &prompt.id,
                "a custom-choice object",
                "missing 'custom_choices' array",
            )
        })?;
    for choice in choices {
        let ok = choice
            .as_object()
            .map(|c| {
                c.get("choice_id").map(Value::is_i64).unwrap_or(false)
                    && c.get("choice_value").map(Value::is_string).unwrap_or(false)
            })
            .unwrap_or(false);
        if !ok {
            return Err(ValidationError::mismatch(
                &prompt.id,
                "a custom-choice object",
                format!("malformed custom_choices entry {}", choice),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChoiceOption, PromptType, RepeatableSetDefinition, StreamDefinition};
    use serde_json::json;

    fn test_observer() -> Observer {
        Observer {
            id: "org.mdcs.daily".to_string(),
            version: 1,
            streams: vec![StreamDefinition {
                id: "daily_survey".to_string(),
                version: 2,
                prompts: vec![
                    PromptDefinition {
                        id: "hours_slept".to_string(),
                        prompt_type: PromptType::Number,
                        display_label: "Hours slept".to_string(),
                        unit: Some("hours".to_string()),
                        min: Some(0.0),
                        max: Some(24.0),
                        choices: Vec::new(),
                    },
                    PromptDefinition {
                        id: "mood".to_string(),
                        prompt_type: PromptType::SingleChoice,
                        display_label: "Mood".to_string(),
                        unit: None,
                        min: None,
                        max: None,
                        choices: vec![
                            ChoiceOption { key: 0, label: "Bad".to_string() },
                            ChoiceOption { key: 1, label: "Good".to_string() },
                        ],
                    },
                    PromptDefinition {
                        id: "snack".to_string(),
                        prompt_type: PromptType::SingleChoiceCustom,
                        display_label: "Snack".to_string(),
                        unit: None,
                        min: None,
                        max: None,
                        choices: Vec::new(),
                    },
                ],
                repeatable_sets: vec![RepeatableSetDefinition {
                    id: "naps".to_string(),
                    prompts: vec![PromptDefinition {
                        id: "nap_minutes".to_string(),
                        prompt_type: PromptType::Number,
                        display_label: "Nap length".to_string(),
                        unit: Some("minutes".to_string()),
                        min: Some(0.0),
                        max: None,
                        choices: Vec::new(),
                    }],
                }],
            }],
        }
    }

    fn valid_point() -> serde_json::Value {
        json!({
            "stream": "daily_survey",
            "version": 2,
            "metadata": {
                "id": "point-1",
                "timestamp": "2024-03-01T08:30:00Z",
                "timezone": "America/Los_Angeles",
                "client": "mdcs-android"
            },
            "data": {
                "hours_slept": 7.5,
                "mood": 1,
                "snack": {
                    "value": 3,
                    "custom_choices": [
                        {"choice_id": 3, "choice_value": "Apple"},
                        {"choice_id": 101, "choice_value": "Seaweed"}
                    ]
                },
                "naps": [
                    {"nap_minutes": 20},
                    {"nap_minutes": 45}
                ]
            }
        })
    }

    #[test]
    fn valid_point_is_flattened() {
        let observer = test_observer();
        let validator = SchemaValidator::new(&observer);
        let point = validator.validate_point(&valid_point()).unwrap();

        assert_eq!(point.stream_id, "daily_survey");
        assert_eq!(point.point_id.as_deref(), Some("point-1"));
        assert_eq!(point.timezone, "America/Los_Angeles");
        // 3 top-level prompts + 2 nap iterations
        assert_eq!(point.responses.len(), 5);

        let nap_rows: Vec<_> = point
            .responses
            .iter()
            .filter(|r| r.repeatable_set_id.as_deref() == Some("naps"))
            .collect();
        assert_eq!(nap_rows.len(), 2);
        assert_eq!(nap_rows[0].repeatable_set_iteration, Some(0));
        assert_eq!(nap_rows[1].repeatable_set_iteration, Some(1));
    }

    #[test]
    fn malformed_payload_fails_batch() {
        let observer = test_observer();
        let validator = SchemaValidator::new(&observer);
        let err = validator
            .validate_batch("not json at all", ValidationMode::BestEffort)
            .unwrap_err();
        assert!(matches!(err, ValidationError::MalformedInput(_)));
    }

    #[test]
    fn non_array_payload_fails_batch() {
        let observer = test_observer();
        let validator = SchemaValidator::new(&observer);
        let err = validator
            .validate_batch("{}", ValidationMode::BestEffort)
            .unwrap_err();
        assert!(matches!(err, ValidationError::NotAnArray));
    }

    #[test]
    fn best_effort_collects_invalid_points_and_continues() {
        let observer = test_observer();
        let validator = SchemaValidator::new(&observer);

        let mut bad = valid_point();
        bad["data"]["hours_slept"] = json!(30); // above max

        let batch = serde_json::to_string(&vec![bad, valid_point()]).unwrap();
        let outcome = validator
            .validate_batch(&batch, ValidationMode::BestEffort)
            .unwrap();

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.invalid.len(), 1);
        assert_eq!(outcome.invalid[0].index, 0);
        assert!(outcome.invalid[0].reason.contains("hours_slept"));
    }

    #[test]
    fn strict_mode_aborts_on_first_violation() {
        let observer = test_observer();
        let validator = SchemaValidator::new(&observer);

        let mut bad = valid_point();
        bad["data"]["mood"] = json!(9); // not in catalog

        let batch = serde_json::to_string(&vec![bad, valid_point()]).unwrap();
        let err = validator
            .validate_batch(&batch, ValidationMode::Strict)
            .unwrap_err();
        assert!(matches!(err, ValidationError::SchemaMismatch { .. }));
    }

    #[test]
    fn unknown_stream_is_rejected() {
        let observer = test_observer();
        let validator = SchemaValidator::new(&observer);
        let mut point = valid_point();
        point["stream"] = json!("other_survey");
        let err = validator.validate_point(&point).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownStream { .. }));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let observer = test_observer();
        let validator = SchemaValidator::new(&observer);
        let mut point = valid_point();
        point["version"] = json!(1);
        let err = validator.validate_point(&point).unwrap_err();
        assert!(matches!(err, ValidationError::VersionMismatch { .. }));
    }

    #[test]
    fn unknown_prompt_key_is_rejected() {
        let observer = test_observer();
        let validator = SchemaValidator::new(&observer);
        let mut point = valid_point();
        point["data"]["extra"] = json!(1);
        let err = validator.validate_point(&point).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownPrompt { .. }));
    }

    #[test]
    fn missing_prompt_is_rejected() {
        let observer = test_observer();
        let validator = SchemaValidator::new(&observer);
        let mut point = valid_point();
        point["data"].as_object_mut().unwrap().remove("mood");
        let err = validator.validate_point(&point).unwrap_err();
        assert!(matches!(err, ValidationError::MissingPrompt { .. }));
    }

    #[test]
    fn sentinel_values_pass_any_prompt() {
        let observer = test_observer();
        let validator = SchemaValidator::new(&observer);
        let mut point = valid_point();
        point["data"]["hours_slept"] = json!("SKIPPED");
        point["data"]["snack"] = json!("NOT_DISPLAYED");
        assert!(validator.validate_point(&point).is_ok());
    }

    #[test]
    fn timestamp_prompt_requires_rfc3339() {
        let prompt = PromptDefinition {
            id: "woke_at".to_string(),
            prompt_type: PromptType::Timestamp,
            display_label: "Woke at".to_string(),
            unit: None,
            min: None,
            max: None,
            choices: Vec::new(),
        };
        assert!(validate_value(&prompt, &json!("2024-03-01T08:30:00Z")).is_ok());
        assert!(validate_value(&prompt, &json!("yesterday")).is_err());
    }

    #[test]
    fn multi_choice_custom_requires_array_value() {
        let prompt = PromptDefinition {
            id: "snacks".to_string(),
            prompt_type: PromptType::MultiChoiceCustom,
            display_label: "Snacks".to_string(),
            unit: None,
            min: None,
            max: None,
            choices: Vec::new(),
        };
        let good = json!({
            "value": [1, 101],
            "custom_choices": [{"choice_id": 101, "choice_value": "Seaweed"}]
        });
        assert!(validate_value(&prompt, &good).is_ok());

        let bad = json!({
            "value": 1,
            "custom_choices": []
        });
        assert!(validate_value(&prompt, &bad).is_err());
    }

    #[test]
    fn repeatable_set_may_be_absent() {
        let observer = test_observer();
        let validator = SchemaValidator::new(&observer);
        let mut point = valid_point();
        point["data"].as_object_mut().unwrap().remove("naps");
        let parsed = validator.validate_point(&point).unwrap();
        assert_eq!(parsed.responses.len(), 3);
    }
}
