//! Input resolution: load a sheet image from a local path or a URL.
//!
//! Besides the decoded image, resolution yields the file name used later to
//! choose the upload MIME type, so a URL ending in `.png` is sent as PNG.

use crate::error::AttendanceError;
use image::DynamicImage;
use std::path::Path;
use tracing::{debug, info};

/// File name assumed when a URL has no usable last segment.
const FALLBACK_FILE_NAME: &str = "sheet.jpg";

/// A decoded sheet image and the name it was loaded under.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub image: DynamicImage,
    pub file_name: String,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load the image named by `input`, downloading it if it is a URL.
pub async fn load_image(input: &str, timeout_secs: u64) -> Result<LoadedImage, AttendanceError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        load_local(Path::new(input)).await
    }
}

async fn load_local(path: &Path) -> Result<LoadedImage, AttendanceError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(AttendanceError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(AttendanceError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());

    debug!("Read {} bytes from {}", bytes.len(), path.display());
    decode(&bytes, file_name)
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<LoadedImage, AttendanceError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AttendanceError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            AttendanceError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            AttendanceError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(AttendanceError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AttendanceError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    decode(&bytes, file_name_from_url(url))
}

fn decode(bytes: &[u8], file_name: String) -> Result<LoadedImage, AttendanceError> {
    let image = image::load_from_memory(bytes).map_err(|e| AttendanceError::ImageDecode {
        name: file_name.clone(),
        detail: e.to_string(),
    })?;
    Ok(LoadedImage { image, file_name })
}

/// Last path segment of the URL if it looks like a file name.
pub fn file_name_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    FALLBACK_FILE_NAME.to_string()
}
