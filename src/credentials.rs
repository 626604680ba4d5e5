//! Credential pool assembly.
//!
//! A recognition call tries an ordered pool of API keys until one succeeds.
//! The pool is built from, in order of precedence:
//!
//! 1. the **explicit** key passed by the caller (ignored when blank);
//! 2. the comma-separated value held by the **first** configured
//!    [`CredentialSource`] that defines one. Sources are consulted in order
//!    and the search stops at the first hit, so a secrets file shadows the
//!    environment rather than being merged with it. The default order is
//!    the `GOOGLE_API_KEYS` environment variable, then a `.env` file in the
//!    working directory.
//!
//! Keys are trimmed, empties dropped and duplicates removed while keeping the
//! first occurrence. Resolution is a pure function over the sources, so tests
//! can drive it with [`StaticCredentials`] instead of touching the process
//! environment.

use crate::error::AttendanceError;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the variable/secret holding the comma-separated key list.
pub const DEFAULT_KEYS_VAR: &str = "GOOGLE_API_KEYS";

/// Somewhere a comma-separated credential list may be stored.
pub trait CredentialSource: Send + Sync + fmt::Debug {
    /// Short label used in log lines (never the value itself).
    fn describe(&self) -> String;

    /// Raw value, or `None` when this source does not define one.
    fn lookup(&self) -> Option<String>;
}

/// Reads the key list from a process environment variable.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new(DEFAULT_KEYS_VAR)
    }
}

impl CredentialSource for EnvCredentials {
    fn describe(&self) -> String {
        format!("env:{}", self.var)
    }

    fn lookup(&self) -> Option<String> {
        std::env::var(&self.var).ok()
    }
}

/// Reads the key list from a TOML secrets file with a top-level string entry:
///
/// ```toml
/// GOOGLE_API_KEYS = "key-one, key-two"
/// ```
///
/// A missing or malformed file is treated as "not defined" so resolution
/// falls through to the next source.
#[derive(Debug, Clone)]
pub struct SecretsFile {
    path: PathBuf,
    key: String,
}

impl SecretsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: DEFAULT_KEYS_VAR.to_string(),
        }
    }

    /// Look up a different top-level entry.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and look up the entry, reporting why it failed.
    pub fn read(&self) -> Result<Option<String>, AttendanceError> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            AttendanceError::SecretsUnreadable {
                path: self.path.clone(),
                detail: e.to_string(),
            }
        })?;
        let table: toml::Table =
            toml::from_str(&text).map_err(|e| AttendanceError::SecretsUnreadable {
                path: self.path.clone(),
                detail: e.to_string(),
            })?;
        Ok(table.get(&self.key).and_then(key_list_from_secret))
    }
}

/// Secrets files may hold unrelated tables; only string or string-array
/// entries can carry keys.
fn key_list_from_secret(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Array(items) => items
            .iter()
            .map(|item| item.as_str())
            .collect::<Option<Vec<_>>>()
            .map(|keys| keys.join(",")),
        _ => None,
    }
}

impl CredentialSource for SecretsFile {
    fn describe(&self) -> String {
        format!("secrets:{}#{}", self.path.display(), self.key)
    }

    fn lookup(&self) -> Option<String> {
        match self.read() {
            Ok(value) => value,
            Err(e) => {
                warn!("{e}; falling back to the next credential source");
                None
            }
        }
    }
}

/// Reads the key list from a dotenv file (`GOOGLE_API_KEYS=k1,k2`).
///
/// The file is parsed on each lookup and the process environment is left
/// untouched. A missing file is the common case and is silently treated as
/// "not defined"; a malformed one logs a warning first.
#[derive(Debug, Clone)]
pub struct DotEnvFile {
    path: PathBuf,
    key: String,
}

impl DotEnvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: DEFAULT_KEYS_VAR.to_string(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// First assignment of the entry, or `None` if the file does not set it.
    pub fn read(&self) -> Result<Option<String>, dotenvy::Error> {
        for item in dotenvy::from_path_iter(&self.path)? {
            let (name, value) = item?;
            if name == self.key {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

impl Default for DotEnvFile {
    fn default() -> Self {
        Self::new(".env")
    }
}

impl CredentialSource for DotEnvFile {
    fn describe(&self) -> String {
        format!("dotenv:{}#{}", self.path.display(), self.key)
    }

    fn lookup(&self) -> Option<String> {
        match self.read() {
            Ok(value) => value,
            Err(e) if e.not_found() => None,
            Err(e) => {
                warn!(
                    "Failed to read {}: {e}; falling back to the next credential source",
                    self.path.display()
                );
                None
            }
        }
    }
}

/// A fixed value, for library callers that manage secrets themselves.
#[derive(Clone)]
pub struct StaticCredentials(String);

impl StaticCredentials {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticCredentials(<redacted>)")
    }
}

impl CredentialSource for StaticCredentials {
    fn describe(&self) -> String {
        "static".to_string()
    }

    fn lookup(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Ordered, deduplicated API keys for one recognition call.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialPool {
    keys: Vec<String>,
}

impl CredentialPool {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.keys
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.keys.iter().map(|k| mask(k)))
            .finish()
    }
}

/// `AIza…wxyz` style masking for diagnostics.
fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

/// Split a comma-separated key list, trimming and dropping empties.
pub fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build the credential pool for one call.
///
/// # Errors
/// [`AttendanceError::NoCredentials`] when neither the explicit key nor any
/// source yields a usable key.
pub fn resolve_credentials(
    explicit: Option<&str>,
    sources: &[Arc<dyn CredentialSource>],
) -> Result<CredentialPool, AttendanceError> {
    let mut candidates = Vec::new();

    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        candidates.push(key.to_string());
    }

    for source in sources {
        if let Some(raw) = source.lookup() {
            let keys = parse_key_list(&raw);
            debug!("Credential source {} supplied {} key(s)", source.describe(), keys.len());
            candidates.extend(keys);
            break;
        }
    }

    let mut seen = HashSet::new();
    candidates.retain(|k| seen.insert(k.clone()));

    if candidates.is_empty() {
        let searched = sources
            .iter()
            .map(|s| s.describe())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(AttendanceError::NoCredentials {
            hint: if searched.is_empty() {
                "Please provide an API key.".to_string()
            } else {
                format!("Please provide an API key (searched: {searched}).")
            },
        });
    }

    Ok(CredentialPool { keys: candidates })
}
