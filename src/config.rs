//! Configuration types for attendance-sheet extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The model name is an ordinary field
//! resolved by the caller (the CLI reads `GOOGLE_GEMINI_MODEL`), never a
//! process-wide constant, so two configs with different models can coexist.

use crate::credentials::{CredentialSource, DotEnvFile, EnvCredentials};
use crate::error::AttendanceError;
use crate::pipeline::preprocess::ImagePreprocessor;
use crate::pipeline::recognize::InferenceTransport;
use crate::progress::ProgressCallback;
use std::fmt;
use std::sync::Arc;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Base URL of the Generative Language API.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Configuration for one or more extraction runs.
///
/// # Example
/// ```rust
/// use edgequake_attendance::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .model("gemini-2.5-pro")
///     .api_timeout_secs(90)
///     .build()
///     .unwrap();
/// assert_eq!(config.model, "gemini-2.5-pro");
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Model identifier inserted into the endpoint path. Default: `gemini-2.5-flash`.
    pub model: String,

    /// Scheme + host of the inference API, without a trailing slash.
    pub endpoint: String,

    /// Sampling temperature. Default: 0.2.
    ///
    /// Reading a sheet is transcription; low temperature keeps the marks
    /// faithful to what is on the paper.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 8192.
    ///
    /// A 60-student sheet with 31 date columns serialises to roughly 6 000
    /// tokens of JSON; a lower cap truncates the array and the response no
    /// longer parses.
    pub max_output_tokens: u32,

    /// Per-request timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Pause after a 429/500/503 before moving to the next key. Default: 1000.
    pub transient_backoff_ms: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Where the comma-separated key list is looked up, in precedence order.
    /// Default: the `GOOGLE_API_KEYS` environment variable, then `./.env`.
    pub credential_sources: Vec<Arc<dyn CredentialSource>>,

    /// Image normalisation applied before encoding.
    /// If None, uses [`crate::pipeline::preprocess::SheetPreprocessor::default`].
    pub preprocessor: Option<Arc<dyn ImagePreprocessor>>,

    /// Pre-constructed transport. If None, a `reqwest`-backed transport is used.
    pub transport: Option<Arc<dyn InferenceTransport>>,

    /// Optional per-attempt progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            temperature: 0.2,
            max_output_tokens: 8192,
            api_timeout_secs: 60,
            transient_backoff_ms: 1000,
            download_timeout_secs: 120,
            credential_sources: vec![
                Arc::new(EnvCredentials::default()),
                Arc::new(DotEnvFile::default()),
            ],
            preprocessor: None,
            transport: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("transient_backoff_ms", &self.transient_backoff_ms)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("credential_sources", &self.credential_sources)
            .field("preprocessor", &self.preprocessor.as_ref().map(|p| p.name()))
            .field("transport", &self.transport.as_ref().map(|_| "<dyn InferenceTransport>"))
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn transient_backoff_ms(mut self, ms: u64) -> Self {
        self.config.transient_backoff_ms = ms;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Replace the credential sources (consulted in the given order).
    pub fn credential_sources(mut self, sources: Vec<Arc<dyn CredentialSource>>) -> Self {
        self.config.credential_sources = sources;
        self
    }

    /// Insert a source ahead of the existing ones.
    pub fn prepend_credential_source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.config.credential_sources.insert(0, source);
        self
    }

    pub fn preprocessor(mut self, preprocessor: Arc<dyn ImagePreprocessor>) -> Self {
        self.config.preprocessor = Some(preprocessor);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn InferenceTransport>) -> Self {
        self.config.transport = Some(transport);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, AttendanceError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(AttendanceError::InvalidConfig("Model name must not be empty".into()));
        }
        if !(c.endpoint.starts_with("http://") || c.endpoint.starts_with("https://")) {
            return Err(AttendanceError::InvalidConfig(format!(
                "Endpoint must be an HTTP(S) URL, got '{}'",
                c.endpoint
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(AttendanceError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_output_tokens == 0 {
            return Err(AttendanceError::InvalidConfig(
                "Max output tokens must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
