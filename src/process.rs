//! Pipeline entry points.
//!
//! [`process`] is the core: preprocess → recognise → normalise for an
//! already-decoded image. The other functions are conveniences layered on
//! top of it: load from a path/URL, write straight to a file, or block on a
//! private runtime for synchronous callers.
//!
//! Work is strictly sequential. The only awaits are the optional download,
//! the per-key HTTP requests and the backoff pauses between them.

use crate::config::ExtractionConfig;
use crate::error::AttendanceError;
use crate::output::{AttendanceTable, OutputFormat};
use crate::pipeline::preprocess::{ImagePreprocessor, SheetPreprocessor};
use crate::pipeline::recognize::RecognitionClient;
use crate::pipeline::normalize::MAX_DATE_COLUMNS;
use crate::pipeline::{input, normalize};
use image::DynamicImage;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Longest slice of raw model output attached to [`AttendanceError::NoTableParsed`].
pub const MAX_SNIPPET_CHARS: usize = 4000;

/// Extract an attendance table from a decoded sheet image.
///
/// # Arguments
/// * `image` — the sheet as decoded pixels
/// * `file_name` — original file name; its extension selects the upload format
/// * `expected_columns` — number of date columns on the sheet
/// * `explicit_credential` — API key tried before any configured key
///
/// # Errors
/// [`AttendanceError::InvalidConfig`] when `expected_columns` exceeds
/// [`MAX_DATE_COLUMNS`]; credential, encoding and all-keys-failed errors
/// from recognition; or
/// [`AttendanceError::NoTableParsed`] when the model output cannot be
/// turned into a table.
pub async fn process(
    image: DynamicImage,
    file_name: &str,
    expected_columns: usize,
    explicit_credential: Option<&str>,
    config: &ExtractionConfig,
) -> Result<AttendanceTable, AttendanceError> {
    if expected_columns > MAX_DATE_COLUMNS {
        return Err(AttendanceError::InvalidConfig(format!(
            "Expected columns must be at most {MAX_DATE_COLUMNS}, got {expected_columns}"
        )));
    }

    let start = Instant::now();

    let image = match &config.preprocessor {
        Some(p) => p.normalize(image),
        None => SheetPreprocessor::default().normalize(image),
    };
    debug!("Preprocessed to {}x{}", image.width(), image.height());

    let client = RecognitionClient::new(config);
    let output = client
        .recognize(&image, expected_columns, file_name, explicit_credential)
        .await?;

    let table = normalize::normalize(&output, expected_columns).ok_or_else(|| {
        AttendanceError::NoTableParsed {
            snippet: snippet(&output),
        }
    })?;

    info!(
        "Extracted {} students × {} dates from '{}' in {:?}",
        table.len(),
        expected_columns,
        file_name,
        start.elapsed()
    );
    Ok(table)
}

/// Load a sheet from a local path or HTTP(S) URL, then [`process`] it.
pub async fn process_file(
    input_str: impl AsRef<str>,
    expected_columns: usize,
    explicit_credential: Option<&str>,
    config: &ExtractionConfig,
) -> Result<AttendanceTable, AttendanceError> {
    let loaded = input::load_image(input_str.as_ref(), config.download_timeout_secs).await?;
    process(
        loaded.image,
        &loaded.file_name,
        expected_columns,
        explicit_credential,
        config,
    )
    .await
}

/// Process a sheet and write the rendered table to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn process_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    format: OutputFormat,
    expected_columns: usize,
    explicit_credential: Option<&str>,
    config: &ExtractionConfig,
) -> Result<AttendanceTable, AttendanceError> {
    let table = process_file(input_str, expected_columns, explicit_credential, config).await?;
    let rendered = table.render(format)?;
    write_atomic(output_path.as_ref(), &rendered).await?;
    Ok(table)
}

/// Synchronous wrapper around [`process_file`].
///
/// Creates a temporary single-threaded tokio runtime internally.
pub fn process_sync(
    input_str: impl AsRef<str>,
    expected_columns: usize,
    explicit_credential: Option<&str>,
    config: &ExtractionConfig,
) -> Result<AttendanceTable, AttendanceError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| AttendanceError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process_file(input_str, expected_columns, explicit_credential, config))
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), AttendanceError> {
    let write_error = |source: std::io::Error| AttendanceError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    let written = match tokio::fs::write(&tmp_path, contents).await {
        Ok(()) => tokio::fs::rename(&tmp_path, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        // Never leave a stray `<output>.tmp` behind.
        if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
            debug!("Could not remove {}: {}", tmp_path.display(), cleanup);
        }
        return Err(write_error(e));
    }
    Ok(())
}

/// Raw output truncated for error reports.
fn snippet(output: &str) -> String {
    if output.is_empty() {
        return "<empty output from recognition>".to_string();
    }
    output.chars().take(MAX_SNIPPET_CHARS).collect()
}
