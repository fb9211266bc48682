//! Survey response read endpoint
//!
//! Drives the read pipeline: fetch flat rows, roll up, normalize custom
//! choices, project columns, encode. The transport status is always 200;
//! failure is signaled in the payload as the JSON error envelope, whatever
//! output format was requested. Existing export consumers depend on that
//! behavior.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{error, info};

use crate::db::{self, points::ResponseFilter};
use crate::rollup::output::{build, error_envelope, EncoderInput};
use crate::rollup::{columns, roll_up, GlossaryBuilder, OutputFormat};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    pub observer_id: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    /// Comma-joined column URNs.
    #[serde(default = "default_columns")]
    pub columns: String,
    pub username: Option<String>,
    pub survey_id: Option<String>,
}

fn default_output_format() -> String {
    "json-rows".to_string()
}

fn default_columns() -> String {
    columns::COLUMN_ALL.to_string()
}

/// A read-pipeline failure, rendered into the error envelope.
struct ReadFailure {
    code: &'static str,
    text: String,
}

impl ReadFailure {
    fn new(code: &'static str, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }
}

/// GET /api/responses
pub async fn read_responses(State(state): State<AppState>, Query(query): Query<ReadQuery>) -> Response {
    // The requested format decides the success headers; an unknown format
    // is itself a payload-level failure.
    let format = OutputFormat::parse(&query.output_format);

    let built = match format {
        Some(format) => run_pipeline(&state, &query, format).await.map(|p| (format, p)),
        None => Err(ReadFailure::new(
            "invalid_query",
            format!("Unknown output format: {}", query.output_format),
        )),
    };

    match built {
        Ok((format, payload)) => {
            let mut response = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, format.content_type());
            if format.is_attachment() {
                response = response.header(
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"export.csv\"",
                );
            }
            response
                .body(payload.into())
                .unwrap_or_else(|_| Response::new(String::new().into()))
        }
        Err(failure) => {
            error!(code = failure.code, "Read request failed: {}", failure.text);
            state.record_error(failure.text.clone()).await;
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/json")
                .body(error_envelope(failure.code, &failure.text).into())
                .unwrap_or_else(|_| Response::new(String::new().into()))
        }
    }
}

/// Fetch, roll up, normalize, project, and encode one read request.
async fn run_pipeline(
    state: &AppState,
    query: &ReadQuery,
    format: OutputFormat,
) -> Result<String, ReadFailure> {
    let filter = ResponseFilter {
        observer_id: query.observer_id.clone(),
        username: query.username.clone(),
        survey_id: query.survey_id.clone(),
    };
    let rows = db::points::fetch_flat_rows(&state.db, &filter)
        .await
        .map_err(|e| ReadFailure::new("storage_failure", e.to_string()))?;
    let total_row_count = rows.len();

    // roll_up consumes the flat rows; only the rolled-up form lives on
    let mut results = roll_up(rows);

    let glossary = GlossaryBuilder::new()
        .normalize(&mut results)
        .map_err(|e| ReadFailure::new("encoding_failure", e.to_string()))?;

    let requested: Vec<String> = query
        .columns
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    let output_columns = columns::expand_columns(&requested, &results);

    let input = EncoderInput {
        result_count: results.len(),
        total_row_count,
        columns: &output_columns,
        results: &results,
        glossary: &glossary,
    };
    let payload =
        build(format, &input).map_err(|e| ReadFailure::new("encoding_failure", e.to_string()))?;

    info!(
        observer = %query.observer_id,
        surveys = results.len(),
        rows = total_row_count,
        columns = output_columns.len(),
        "Generated survey response read output"
    );
    Ok(payload)
}

/// Build read routes
pub fn response_routes() -> Router<AppState> {
    Router::new().route("/api/responses", get(read_responses))
}
