//! Observer and stream definitions
//!
//! An observer is a versioned bundle of stream (survey) definitions. Once a
//! version is published it never changes; schema evolution happens by
//! registering a new observer version whose streams either keep their
//! version (and stay byte-for-byte identical) or increase it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prompt answer types supported by the schema validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    Number,
    Text,
    Timestamp,
    SingleChoice,
    MultiChoice,
    SingleChoiceCustom,
    MultiChoiceCustom,
}

impl PromptType {
    /// Custom-choice types carry their own choice catalog in each response
    /// and go through glossary normalization on read.
    pub fn is_custom_choice(self) -> bool {
        matches!(self, PromptType::SingleChoiceCustom | PromptType::MultiChoiceCustom)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PromptType::Number => "number",
            PromptType::Text => "text",
            PromptType::Timestamp => "timestamp",
            PromptType::SingleChoice => "single_choice",
            PromptType::MultiChoice => "multi_choice",
            PromptType::SingleChoiceCustom => "single_choice_custom",
            PromptType::MultiChoiceCustom => "multi_choice_custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "number" => Some(PromptType::Number),
            "text" => Some(PromptType::Text),
            "timestamp" => Some(PromptType::Timestamp),
            "single_choice" => Some(PromptType::SingleChoice),
            "multi_choice" => Some(PromptType::MultiChoice),
            "single_choice_custom" => Some(PromptType::SingleChoiceCustom),
            "multi_choice_custom" => Some(PromptType::MultiChoiceCustom),
            _ => None,
        }
    }
}

/// One entry of a fixed choice catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub key: i64,
    pub label: String,
}

/// One question/field within a stream definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub prompt_type: PromptType,
    pub display_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Inclusive lower bound for number prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound for number prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Fixed catalog for single_choice/multi_choice prompts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<ChoiceOption>,
}

impl PromptDefinition {
    pub fn has_choice_key(&self, key: i64) -> bool {
        self.choices.iter().any(|c| c.key == key)
    }
}

/// A sub-group of prompts that can recur multiple times within one
/// submission, distinguished by an iteration index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatableSetDefinition {
    pub id: String,
    pub prompts: Vec<PromptDefinition>,
}

/// A versioned survey/sensor schema: an ordered set of prompts plus any
/// repeatable sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDefinition {
    pub id: String,
    pub version: i64,
    #[serde(default)]
    pub prompts: Vec<PromptDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repeatable_sets: Vec<RepeatableSetDefinition>,
}

impl StreamDefinition {
    pub fn prompt(&self, id: &str) -> Option<&PromptDefinition> {
        self.prompts.iter().find(|p| p.id == id)
    }

    pub fn repeatable_set(&self, id: &str) -> Option<&RepeatableSetDefinition> {
        self.repeatable_sets.iter().find(|s| s.id == id)
    }
}

/// A versioned bundle of stream definitions owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observer {
    pub id: String,
    pub version: i64,
    pub streams: Vec<StreamDefinition>,
}

impl Observer {
    pub fn stream(&self, id: &str) -> Option<&StreamDefinition> {
        self.streams.iter().find(|s| s.id == id)
    }
}

/// A stream whose version did not change across an observer update. Storage
/// reuses the existing definition row for these instead of writing a copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnchangedStream {
    pub id: String,
    pub version: i64,
}

/// Rejection reasons for an observer version transition.
#[derive(Debug, Error)]
pub enum ObserverVersionError {
    #[error("observer version must increase: new version {new} is not greater than stored version {stored}")]
    VersionNotIncreased { new: i64, stored: i64 },

    #[error("stream '{stream_id}' version decreased: new version {new} is less than stored version {stored}")]
    StreamVersionDecreased {
        stream_id: String,
        new: i64,
        stored: i64,
    },

    #[error("stream '{stream_id}' changed without a version increase")]
    StreamChangedWithoutVersionBump { stream_id: String },
}

/// Validate a new observer definition against the currently stored one.
///
/// Rules:
/// - the observer version must strictly increase;
/// - a contained stream's version must not decrease relative to the stored
///   stream with the same id;
/// - a stream whose version is unchanged must serialize byte-for-byte
///   identically to the stored definition;
/// - streams the stored observer never had are accepted as-is.
///
/// Returns the streams whose version did not change.
pub fn verify_new_observer(
    new: &Observer,
    stored: Option<&Observer>,
) -> Result<Vec<UnchangedStream>, ObserverVersionError> {
    let stored = match stored {
        Some(s) => s,
        None => return Ok(Vec::new()),
    };

    if new.version <= stored.version {
        return Err(ObserverVersionError::VersionNotIncreased {
            new: new.version,
            stored: stored.version,
        });
    }

    let mut unchanged = Vec::new();
    for stream in &new.streams {
        let prior = match stored.stream(&stream.id) {
            Some(p) => p,
            None => continue,
        };

        if stream.version < prior.version {
            return Err(ObserverVersionError::StreamVersionDecreased {
                stream_id: stream.id.clone(),
                new: stream.version,
                stored: prior.version,
            });
        }

        if stream.version == prior.version {
            // Unchanged version requires an unchanged definition. Compared
            // on the canonical serde_json serialization of both sides.
            let new_text = serde_json::to_string(stream).unwrap_or_default();
            let prior_text = serde_json::to_string(prior).unwrap_or_default();
            if new_text != prior_text {
                return Err(ObserverVersionError::StreamChangedWithoutVersionBump {
                    stream_id: stream.id.clone(),
                });
            }
            unchanged.push(UnchangedStream {
                id: stream.id.clone(),
                version: stream.version,
            });
        }
    }

    Ok(unchanged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number_prompt(id: &str) -> PromptDefinition {
        PromptDefinition {
            id: id.to_string(),
            prompt_type: PromptType::Number,
            display_label: format!("Label for {}", id),
            unit: None,
            min: Some(0.0),
            max: Some(10.0),
            choices: Vec::new(),
        }
    }

    fn observer_v(version: i64, stream_version: i64) -> Observer {
        Observer {
            id: "org.mdcs.sleep".to_string(),
            version,
            streams: vec![StreamDefinition {
                id: "sleep_survey".to_string(),
                version: stream_version,
                prompts: vec![number_prompt("hours")],
                repeatable_sets: Vec::new(),
            }],
        }
    }

    #[test]
    fn first_registration_has_no_unchanged_streams() {
        let unchanged = verify_new_observer(&observer_v(1, 1), None).unwrap();
        assert!(unchanged.is_empty());
    }

    #[test]
    fn observer_version_must_increase() {
        let stored = observer_v(2, 1);
        let err = verify_new_observer(&observer_v(2, 1), Some(&stored)).unwrap_err();
        assert!(matches!(err, ObserverVersionError::VersionNotIncreased { .. }));
    }

    #[test]
    fn stream_version_must_not_decrease() {
        let stored = observer_v(1, 3);
        let mut new = observer_v(2, 2);
        new.streams[0].version = 2;
        let err = verify_new_observer(&new, Some(&stored)).unwrap_err();
        assert!(matches!(err, ObserverVersionError::StreamVersionDecreased { .. }));
    }

    #[test]
    fn unchanged_stream_version_requires_identical_definition() {
        let stored = observer_v(1, 1);
        let mut new = observer_v(2, 1);
        new.streams[0].prompts[0].max = Some(24.0);
        let err = verify_new_observer(&new, Some(&stored)).unwrap_err();
        assert!(matches!(
            err,
            ObserverVersionError::StreamChangedWithoutVersionBump { .. }
        ));
    }

    #[test]
    fn unchanged_streams_are_reported() {
        let stored = observer_v(1, 1);
        let new = observer_v(2, 1);
        let unchanged = verify_new_observer(&new, Some(&stored)).unwrap();
        assert_eq!(
            unchanged,
            vec![UnchangedStream {
                id: "sleep_survey".to_string(),
                version: 1
            }]
        );
    }

    #[test]
    fn new_streams_are_accepted_without_report() {
        let stored = observer_v(1, 1);
        let mut new = observer_v(2, 2);
        new.streams.push(StreamDefinition {
            id: "mood_survey".to_string(),
            version: 1,
            prompts: vec![number_prompt("mood")],
            repeatable_sets: Vec::new(),
        });
        let unchanged = verify_new_observer(&new, Some(&stored)).unwrap();
        assert!(unchanged.is_empty());
    }

    #[test]
    fn prompt_type_round_trips_through_snake_case() {
        for t in [
            PromptType::Number,
            PromptType::Text,
            PromptType::Timestamp,
            PromptType::SingleChoice,
            PromptType::MultiChoice,
            PromptType::SingleChoiceCustom,
            PromptType::MultiChoiceCustom,
        ] {
            assert_eq!(PromptType::parse(t.as_str()), Some(t));
        }
        assert_eq!(PromptType::parse("photo"), None);
    }
}
