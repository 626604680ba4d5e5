//! # edgequake-attendance
//!
//! Convert photographed or scanned attendance sheets into structured tables
//! using a Vision Language Model.
//!
//! ## Why this crate?
//!
//! Handwritten registers defeat classic OCR: ticks, initials, scribbles and
//! crossed-out cells carry the meaning, not printed glyphs. This crate sends
//! the sheet to a multimodal model in structured-output mode, then turns the
//! model's JSON into a table with a fixed, predictable column layout no
//! matter how many columns the model actually reported.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image
//!  │
//!  ├─ 1. Input       local file or URL download
//!  ├─ 2. Preprocess  cap the long edge, optional grayscale
//!  ├─ 3. Encode      re-encode in the upload's format, base64
//!  ├─ 4. Recognize   Gemini generateContent, failover across API keys
//!  └─ 5. Normalize   tolerant JSON → S.No, Roll Number, Name, Date 1..n
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_attendance::{process_file, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Keys are read from GOOGLE_API_KEYS ("key1,key2,…"), or from ./.env.
//!     let config = ExtractionConfig::default();
//!     let table = process_file("register.jpg", 6, None, &config).await?;
//!     print!("{}", table.to_csv()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `sheet2csv` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod credentials;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, DEFAULT_ENDPOINT, DEFAULT_MODEL};
pub use credentials::{
    resolve_credentials, CredentialPool, CredentialSource, DotEnvFile, EnvCredentials, SecretsFile,
    StaticCredentials,
};
pub use error::{AttemptError, AttendanceError};
pub use output::{AttendanceMark, AttendanceRecord, AttendanceTable, OutputFormat};
pub use pipeline::normalize::{normalize, MAX_DATE_COLUMNS};
pub use pipeline::preprocess::{ImagePreprocessor, Passthrough, SheetPreprocessor};
pub use pipeline::recognize::{HttpReply, InferenceTransport, RecognitionClient, TransportError};
pub use process::{process, process_file, process_sync, process_to_file};
pub use progress::{NoopProgressCallback, ProgressCallback, RecognitionProgressCallback};
