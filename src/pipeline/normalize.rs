//! Normalisation: model JSON text → fixed-width attendance table.
//!
//! Even in structured-output mode the model's JSON varies: fences around the
//! payload, a bare array instead of `{"records": [...]}`, numbers where
//! strings were asked for, too many or too few date columns. This stage
//! absorbs the harmless variations and rejects the rest.
//!
//! ## Failure policy
//!
//! Malformed output is expected, not exceptional, so [`normalize`] returns
//! `None` instead of an error. It is also fail-closed: if any record cannot
//! be read, the whole table is discarded rather than returned with rows
//! silently missing. The caller turns `None` into a single user-facing
//! error with the raw output attached.

use crate::output::{AttendanceMark, AttendanceRecord, AttendanceTable};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Upper bound on date columns a table may be built with.
pub const MAX_DATE_COLUMNS: usize = 1000;

/// Normalise raw model output into a table with `expected_columns` date columns.
///
/// Returns `None` when the text is not JSON, has no records, any record
/// is malformed, or `expected_columns` exceeds [`MAX_DATE_COLUMNS`].
pub fn normalize(response_text: &str, expected_columns: usize) -> Option<AttendanceTable> {
    if expected_columns > MAX_DATE_COLUMNS {
        warn!("Refusing to build {expected_columns} date columns (max {MAX_DATE_COLUMNS})");
        return None;
    }

    let cleaned = strip_code_fences(response_text);

    let payload: ModelPayload = match serde_json::from_str(&cleaned) {
        Ok(p) => p,
        Err(e) => {
            warn!("JSON parsing failed: {e}");
            return None;
        }
    };

    let raw_records = payload.into_records();
    if raw_records.is_empty() {
        debug!("Model output contained no records");
        return None;
    }

    let mut records = Vec::with_capacity(raw_records.len());
    for (index, raw) in raw_records.iter().enumerate() {
        match normalize_record(raw, expected_columns) {
            Ok(record) => records.push(record),
            Err(reason) => {
                warn!("Post-processing error in record {}: {}", index + 1, reason);
                return None;
            }
        }
    }

    debug!(
        "Normalised {} records × {} date columns",
        records.len(),
        expected_columns
    );
    Some(AttendanceTable::new(expected_columns, records))
}

// ── Fence stripping ──────────────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:json)?").unwrap());

/// Remove every "```json" / "```" marker and trim.
fn strip_code_fences(input: &str) -> String {
    RE_FENCE.replace_all(input, "").trim().to_string()
}

// ── Payload shape ────────────────────────────────────────────────────────

/// The two shapes the model produces. Variant order matters: an object is
/// tried first, then a bare list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelPayload {
    Wrapped {
        #[serde(default)]
        records: Vec<Value>,
    },
    Bare(Vec<Value>),
}

impl ModelPayload {
    fn into_records(self) -> Vec<Value> {
        match self {
            ModelPayload::Wrapped { records } => records,
            ModelPayload::Bare(records) => records,
        }
    }
}

// ── Per-record normalisation ─────────────────────────────────────────────

fn normalize_record(raw: &Value, expected_columns: usize) -> Result<AttendanceRecord, String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| format!("expected an object, got {}", type_name(raw)))?;

    let text_field = |name: &str| {
        obj.get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let marks = match obj.get("attendance") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(parse_mark)
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => {
            return Err(format!("'attendance' must be a list, got {}", type_name(other)));
        }
    };

    Ok(AttendanceRecord {
        s_no: text_field("s_no"),
        roll_no: text_field("roll_no"),
        name: text_field("name"),
        attendance: fit_to_width(marks, expected_columns),
    })
}

fn parse_mark(value: &Value) -> Result<AttendanceMark, String> {
    match value {
        Value::String(s) => Ok(s.parse().unwrap_or(AttendanceMark::Unknown)),
        Value::Null => Ok(AttendanceMark::Unknown),
        Value::Bool(_) | Value::Number(_) => Ok(AttendanceMark::Unrecognised(value.to_string())),
        Value::Array(_) | Value::Object(_) => {
            Err(format!("attendance mark must be a scalar, got {}", type_name(value)))
        }
    }
}

/// Pad with [`AttendanceMark::Unknown`] or truncate to exactly `width`.
fn fit_to_width(mut marks: Vec<AttendanceMark>, width: usize) -> Vec<AttendanceMark> {
    marks.resize(width, AttendanceMark::Unknown);
    marks
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
