//! Error types for the edgequake-attendance library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`AttendanceError`] — **Fatal**: the extraction cannot produce a table
//!   (no credentials, unreadable image, every credential rejected, model
//!   output unusable). Returned as `Err(AttendanceError)` from the
//!   top-level `process*` functions.
//!
//! * [`AttemptError`] — **Non-fatal**: one credential failed (network blip,
//!   rate limit, safety block) but the next credential may still succeed.
//!   Attempts are absorbed by the failover loop and only surface, in order,
//!   inside [`AttendanceError::AllCredentialsFailed`].
//!
//! Credential values never appear in any message; attempts refer to keys by
//! their 1-based position in the pool.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-attendance library.
#[derive(Debug, Error)]
pub enum AttendanceError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read but are not a decodable image.
    #[error("Could not decode image '{name}': {detail}")]
    ImageDecode { name: String, detail: String },

    // ── Recognition errors ────────────────────────────────────────────────
    /// No credential could be assembled from the explicit value or any source.
    #[error("No API keys found. {hint}")]
    NoCredentials { hint: String },

    /// The normalised image could not be re-encoded for transmission.
    #[error("Failed to encode image as {format}: {detail}")]
    ImageEncoding { format: String, detail: String },

    /// Every credential in the pool failed. Attempts are kept in pool order.
    #[error("All {} keys failed.\nLog:\n{}", .attempts.len(), format_attempts(.attempts))]
    AllCredentialsFailed { attempts: Vec<AttemptError> },

    /// The model answered but no table could be built from its output.
    #[error("No table could be parsed from model output. Model output (truncated):\n{snippet}")]
    NoTableParsed { snippet: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// A secrets file was named but could not be read or parsed.
    #[error("Failed to read secrets file '{path}': {detail}")]
    SecretsUnreadable { path: PathBuf, detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output table file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_attempts(attempts: &[AttemptError]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// A single credential's failure inside the failover loop.
///
/// `key` is the 1-based position of the credential in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AttemptError {
    /// The request never produced an HTTP response (DNS, TLS, timeout, reset).
    #[error("Key #{key} Network Error: {detail}")]
    Network { key: usize, detail: String },

    /// HTTP 200, but the body had no usable candidate text.
    #[error("Key #{key} Parse Error: Blocked/Empty. Reason: {reason}")]
    Parse { key: usize, reason: String },

    /// HTTP 429 / 500 / 503.
    #[error("Key #{key} Server Error: {status}")]
    ServerTransient { key: usize, status: u16 },

    /// Any other non-200 status. `body` is an excerpt of the response body.
    #[error("Key #{key} Client Error: {status} {body}")]
    Client { key: usize, status: u16, body: String },
}

impl AttemptError {
    /// Stable tag naming the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptError::Network { .. } => "network",
            AttemptError::Parse { .. } => "parse",
            AttemptError::ServerTransient { .. } => "server-transient",
            AttemptError::Client { .. } => "client",
        }
    }

    /// 1-based position of the credential that failed.
    pub fn key(&self) -> usize {
        match self {
            AttemptError::Network { key, .. }
            | AttemptError::Parse { key, .. }
            | AttemptError::ServerTransient { key, .. }
            | AttemptError::Client { key, .. } => *key,
        }
    }
}
