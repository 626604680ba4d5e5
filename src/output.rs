//! Result types: attendance marks, records and the fixed-schema table.
//!
//! The table schema is always `S.No, Roll Number, Name, Date 1 … Date n`
//! where `n` is supplied by the caller. Every row carries exactly `3 + n`
//! fields regardless of what the model returned.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Leading, non-date columns of every table.
pub const FIXED_COLUMNS: [&str; 3] = ["S.No", "Roll Number", "Name"];

/// One cell of the date grid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttendanceMark {
    Present,
    Absent,
    /// Filler for columns the model did not report. Never produced by the model.
    Unknown,
    /// Model text that is not one of the known marks, kept verbatim.
    Unrecognised(String),
}

impl AttendanceMark {
    pub fn as_str(&self) -> &str {
        match self {
            AttendanceMark::Present => "Present",
            AttendanceMark::Absent => "Absent",
            AttendanceMark::Unknown => "Unknown",
            AttendanceMark::Unrecognised(s) => s,
        }
    }
}

impl FromStr for AttendanceMark {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mark = match s.trim().to_ascii_lowercase().as_str() {
            "present" => AttendanceMark::Present,
            "absent" => AttendanceMark::Absent,
            "unknown" => AttendanceMark::Unknown,
            _ => AttendanceMark::Unrecognised(s.to_string()),
        };
        Ok(mark)
    }
}

impl fmt::Display for AttendanceMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AttendanceMark {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One student row after normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub s_no: String,
    pub roll_no: String,
    pub name: String,
    /// Exactly `expected_columns` marks.
    pub attendance: Vec<AttendanceMark>,
}

impl AttendanceRecord {
    /// Flatten into table cells: `[s_no, roll_no, name, mark…]`.
    pub fn to_row(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(FIXED_COLUMNS.len() + self.attendance.len());
        row.push(self.s_no.clone());
        row.push(self.roll_no.clone());
        row.push(self.name.clone());
        row.extend(self.attendance.iter().map(|m| m.as_str().to_string()));
        row
    }
}

/// The normalised attendance table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceTable {
    expected_columns: usize,
    records: Vec<AttendanceRecord>,
}

impl AttendanceTable {
    /// Records must already hold exactly `expected_columns` marks each;
    /// the normaliser guarantees this.
    pub(crate) fn new(expected_columns: usize, records: Vec<AttendanceRecord>) -> Self {
        debug_assert!(records.iter().all(|r| r.attendance.len() == expected_columns));
        Self {
            expected_columns,
            records,
        }
    }

    pub fn expected_columns(&self) -> usize {
        self.expected_columns
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `["S.No", "Roll Number", "Name", "Date 1", …, "Date n"]`.
    pub fn columns(&self) -> Vec<String> {
        header(self.expected_columns)
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.records.iter().map(AttendanceRecord::to_row).collect()
    }

    /// Render as CSV with a header row.
    pub fn to_csv(&self) -> Result<String, csv::Error> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(self.columns())?;
        for row in self.rows() {
            writer.write_record(&row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))?;
        // Every field came from a Rust `String`, so the output is valid UTF-8.
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Render as a GFM pipe table.
    pub fn to_markdown(&self) -> String {
        let columns = self.columns();
        let mut out = String::new();
        push_markdown_row(&mut out, &columns);
        out.push('|');
        for _ in &columns {
            out.push_str(" --- |");
        }
        out.push('\n');
        for row in self.rows() {
            push_markdown_row(&mut out, &row);
        }
        out
    }

    /// Render in the requested format.
    pub fn render(&self, format: OutputFormat) -> Result<String, crate::error::AttendanceError> {
        match format {
            OutputFormat::Csv => self
                .to_csv()
                .map_err(|e| crate::error::AttendanceError::Internal(format!("csv: {e}"))),
            OutputFormat::Markdown => Ok(self.to_markdown()),
            OutputFormat::Json => serde_json::to_string_pretty(self)
                .map(|mut s| {
                    s.push('\n');
                    s
                })
                .map_err(|e| crate::error::AttendanceError::Internal(format!("json: {e}"))),
        }
    }
}

impl Serialize for AttendanceTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("AttendanceTable", 2)?;
        s.serialize_field("columns", &self.columns())?;
        s.serialize_field("rows", &self.rows())?;
        s.end()
    }
}

/// Fixed header for a table with `expected_columns` date columns.
pub fn header(expected_columns: usize) -> Vec<String> {
    FIXED_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain((1..=expected_columns).map(|i| format!("Date {i}")))
        .collect()
}

fn push_markdown_row(out: &mut String, cells: &[String]) {
    out.push('|');
    for cell in cells {
        out.push(' ');
        out.push_str(&cell.replace('|', "\\|").replace('\n', " "));
        out.push_str(" |");
    }
    out.push('\n');
}

/// Serialisation format for a rendered table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Csv,
    Markdown,
    Json,
}

impl OutputFormat {
    /// Conventional file extension.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
        }
    }
}
