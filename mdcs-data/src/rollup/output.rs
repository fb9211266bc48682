//! Output encoding for the read pipeline
//!
//! One encoder per output format, all consuming the same normalized result
//! set and column projection. Errors are always rendered as the JSON error
//! envelope, whatever format was requested.

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::rollup::choices::ChoiceGlossary;
use crate::rollup::columns::column_value;
use crate::rollup::engine::IndexedResult;

/// Delimiter between entries of a multi-value field in CSV output.
const CSV_LIST_DELIMITER: char = ';';

/// The supported output encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    JsonRows,
    JsonColumns,
    Csv,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "json-rows" => Some(OutputFormat::JsonRows),
            "json-columns" => Some(OutputFormat::JsonColumns),
            "csv" => Some(OutputFormat::Csv),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::JsonRows | OutputFormat::JsonColumns => "application/json",
            OutputFormat::Csv => "text/csv",
        }
    }

    /// CSV downloads are served as attachments.
    pub fn is_attachment(self) -> bool {
        matches!(self, OutputFormat::Csv)
    }
}

/// Everything an encoder needs for one response.
pub struct EncoderInput<'a> {
    /// Number of rolled-up survey submissions.
    pub result_count: usize,
    /// Number of flat prompt-response rows the submissions came from.
    pub total_row_count: usize,
    pub columns: &'a [String],
    pub results: &'a [IndexedResult],
    pub glossary: &'a ChoiceGlossary,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize output: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Build the success payload for one read request.
pub fn build(format: OutputFormat, input: &EncoderInput) -> Result<String, EncodeError> {
    match format {
        OutputFormat::JsonRows => build_json_rows(input),
        OutputFormat::JsonColumns => build_json_columns(input),
        OutputFormat::Csv => Ok(build_csv(input)),
    }
}

/// The generic error envelope. Emitted for every format: errors are never
/// CSV-encoded, even for CSV requests.
pub fn error_envelope(code: &str, text: &str) -> String {
    json!({
        "result": "failure",
        "errors": [{"code": code, "text": text}]
    })
    .to_string()
}

fn metadata_object(input: &EncoderInput, with_glossary: bool) -> Value {
    let mut metadata = Map::new();
    metadata.insert("number_of_surveys".to_string(), json!(input.result_count));
    metadata.insert("number_of_prompts".to_string(), json!(input.total_row_count));
    if with_glossary && !input.glossary.is_empty() {
        let glossary: Map<String, Value> = input
            .glossary
            .iter()
            .map(|(prompt_id, items)| (prompt_id.clone(), json!(items)))
            .collect();
        metadata.insert("choice_glossary".to_string(), Value::Object(glossary));
    }
    Value::Object(metadata)
}

/// One JSON object per survey submission, keys = output columns.
fn build_json_rows(input: &EncoderInput) -> Result<String, EncodeError> {
    let data: Vec<Value> = input
        .results
        .iter()
        .map(|result| {
            let row: Map<String, Value> = input
                .columns
                .iter()
                .map(|column| (column.clone(), column_value(column, result)))
                .collect();
            Value::Object(row)
        })
        .collect();

    let payload = json!({
        "result": "success",
        "metadata": metadata_object(input, false),
        "data": data,
    });
    Ok(serde_json::to_string(&payload)?)
}

/// Column-major layout: one array per output column, aligned by row index.
fn build_json_columns(input: &EncoderInput) -> Result<String, EncodeError> {
    let mut data = Map::new();
    for column in input.columns {
        let values: Vec<Value> = input
            .results
            .iter()
            .map(|result| column_value(column, result))
            .collect();
        data.insert(column.clone(), Value::Array(values));
    }

    let payload = json!({
        "result": "success",
        "metadata": metadata_object(input, true),
        "data": Value::Object(data),
    });
    Ok(serde_json::to_string(&payload)?)
}

/// Header row plus one data row per submission. Multi-value answers render
/// as a `;`-delimited sub-list within a single field.
fn build_csv(input: &EncoderInput) -> String {
    let mut out = String::new();
    out.push_str(&input.columns.join(","));
    out.push('\n');

    for result in input.results {
        let fields: Vec<String> = input
            .columns
            .iter()
            .map(|column| csv_escape(&render_csv_value(&column_value(column, result))))
            .collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }

    out
}

/// Render one JSON value as CSV field text.
fn render_csv_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(render_csv_value)
            .collect::<Vec<_>>()
            .join(&CSV_LIST_DELIMITER.to_string()),
        Value::Object(_) => value.to_string(),
    }
}

/// Quote a field when it contains comma, quote, or newline; internal quotes
/// are doubled.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlatResponseRow, PromptType};
    use crate::rollup::choices::GlossaryBuilder;
    use crate::rollup::columns::{expand_columns, COLUMN_ALL, COLUMN_SURVEY_ID, COLUMN_USER_ID};
    use crate::rollup::engine::roll_up;
    use serde_json::json;

    fn row(prompt_id: &str, prompt_type: PromptType, response: &str) -> FlatResponseRow {
        FlatResponseRow {
            username: "alice".to_string(),
            client: Some("mdcs-android".to_string()),
            epoch_millis: 1_700_000_000_000,
            timezone: "UTC".to_string(),
            survey_id: "s1".to_string(),
            repeatable_set_id: None,
            repeatable_set_iteration: None,
            prompt_id: prompt_id.to_string(),
            prompt_type,
            display_label: format!("Label {}", prompt_id),
            unit: None,
            response: response.to_string(),
        }
    }

    fn encoded(format: OutputFormat, rows: Vec<FlatResponseRow>, requested: &[String]) -> String {
        let total_row_count = rows.len();
        let mut results = roll_up(rows);
        let glossary = GlossaryBuilder::new().normalize(&mut results).unwrap();
        let columns = expand_columns(requested, &results);
        let input = EncoderInput {
            result_count: results.len(),
            total_row_count,
            columns: &columns,
            results: &results,
            glossary: &glossary,
        };
        build(format, &input).unwrap()
    }

    #[test]
    fn json_rows_one_object_per_submission() {
        let payload = encoded(
            OutputFormat::JsonRows,
            vec![
                row("p1", PromptType::Number, "5"),
                row("p2", PromptType::Text, "hello"),
            ],
            &[COLUMN_ALL.to_string()],
        );
        let parsed: Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(parsed["result"], "success");
        assert_eq!(parsed["metadata"]["number_of_surveys"], 1);
        assert_eq!(parsed["metadata"]["number_of_prompts"], 2);
        let data = parsed["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["urn:ohmage:user:id"], "alice");
        assert_eq!(data[0]["urn:ohmage:prompt:id:p1"], 5);
        assert_eq!(data[0]["urn:ohmage:prompt:id:p2"], "hello");
    }

    #[test]
    fn json_columns_aligned_by_row_index() {
        let mut rows = vec![row("p1", PromptType::Number, "5")];
        let mut second = row("p1", PromptType::Number, "7");
        second.username = "bob".to_string();
        rows.push(second);

        let payload = encoded(
            OutputFormat::JsonColumns,
            rows,
            &[
                COLUMN_USER_ID.to_string(),
                "urn:ohmage:prompt:id:p1".to_string(),
            ],
        );
        let parsed: Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(parsed["data"][COLUMN_USER_ID], json!(["alice", "bob"]));
        assert_eq!(parsed["data"]["urn:ohmage:prompt:id:p1"], json!([5, 7]));
    }

    #[test]
    fn json_columns_metadata_carries_glossary() {
        let custom = r#"{"value":3,"custom_choices":[{"choice_id":3,"choice_value":"Red"},{"choice_id":101,"choice_value":"Mauve"}]}"#;
        let payload = encoded(
            OutputFormat::JsonColumns,
            vec![row("p3", PromptType::SingleChoiceCustom, custom)],
            &[COLUMN_ALL.to_string()],
        );
        let parsed: Value = serde_json::from_str(&payload).unwrap();

        let glossary = &parsed["metadata"]["choice_glossary"]["p3"];
        assert_eq!(glossary[0]["choice_id"], 3);
        assert_eq!(glossary[0]["type"], "global");
        assert_eq!(glossary[1]["choice_id"], 100);
        assert_eq!(glossary[1]["choice_value"], "Mauve");
        // The response itself holds only the chosen value
        assert_eq!(parsed["data"]["urn:ohmage:prompt:id:p3"], json!([3]));
    }

    #[test]
    fn csv_header_and_rows() {
        let payload = encoded(
            OutputFormat::Csv,
            vec![row("p1", PromptType::Number, "5")],
            &[
                COLUMN_USER_ID.to_string(),
                COLUMN_SURVEY_ID.to_string(),
                "urn:ohmage:prompt:id:p1".to_string(),
            ],
        );
        let lines: Vec<&str> = payload.lines().collect();
        assert_eq!(
            lines[0],
            "urn:ohmage:user:id,urn:ohmage:survey:id,urn:ohmage:prompt:id:p1"
        );
        assert_eq!(lines[1], "alice,s1,5");
    }

    #[test]
    fn csv_multi_value_field_uses_sublist_delimiter() {
        let multi = r#"{"value":[1,101],"custom_choices":[{"choice_id":1,"choice_value":"Chips"},{"choice_id":101,"choice_value":"Seaweed"}]}"#;
        let payload = encoded(
            OutputFormat::Csv,
            vec![row("p5", PromptType::MultiChoiceCustom, multi)],
            &["urn:ohmage:prompt:id:p5".to_string()],
        );
        let lines: Vec<&str> = payload.lines().collect();
        assert_eq!(lines[1], "1;101");
    }

    #[test]
    fn csv_escapes_embedded_delimiters() {
        let payload = encoded(
            OutputFormat::Csv,
            vec![row("p1", PromptType::Text, "hello, \"world\"")],
            &["urn:ohmage:prompt:id:p1".to_string()],
        );
        let lines: Vec<&str> = payload.lines().collect();
        assert_eq!(lines[1], "\"hello, \"\"world\"\"\"");
    }

    #[test]
    fn zero_results_produce_valid_envelopes() {
        for format in [OutputFormat::JsonRows, OutputFormat::JsonColumns] {
            let payload = encoded(format, Vec::new(), &[COLUMN_USER_ID.to_string()]);
            let parsed: Value = serde_json::from_str(&payload).unwrap();
            assert_eq!(parsed["result"], "success");
            assert_eq!(parsed["metadata"]["number_of_surveys"], 0);
        }

        let csv = encoded(OutputFormat::Csv, Vec::new(), &[COLUMN_USER_ID.to_string()]);
        assert_eq!(csv, "urn:ohmage:user:id\n");
    }

    #[test]
    fn error_envelope_shape() {
        let payload = error_envelope("encoding_failure", "something broke");
        let parsed: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["result"], "failure");
        assert_eq!(parsed["errors"][0]["code"], "encoding_failure");
        assert_eq!(parsed["errors"][0]["text"], "something broke");
    }

    #[test]
    fn format_parsing_and_content_types() {
        assert_eq!(OutputFormat::parse("json-rows"), Some(OutputFormat::JsonRows));
        assert_eq!(OutputFormat::parse("json-columns"), Some(OutputFormat::JsonColumns));
        assert_eq!(OutputFormat::parse("csv"), Some(OutputFormat::Csv));
        assert_eq!(OutputFormat::parse("xml"), None);

        assert_eq!(OutputFormat::JsonRows.content_type(), "application/json");
        assert_eq!(OutputFormat::Csv.content_type(), "text/csv");
        assert!(OutputFormat::Csv.is_attachment());
        assert!(!OutputFormat::JsonColumns.is_attachment());
    }
}
