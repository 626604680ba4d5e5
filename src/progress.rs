//! Progress-callback trait for credential-failover events.
//!
//! Inject an [`Arc<dyn RecognitionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to observe
//! the recognition loop as it walks the credential pool. The CLI uses this
//! to drive its spinner; services can forward events to their own telemetry.
//!
//! # Example
//!
//! ```rust
//! use edgequake_attendance::{AttemptError, ExtractionConfig, RecognitionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FailureCounter {
//!     failures: AtomicUsize,
//! }
//!
//! impl RecognitionProgressCallback for FailureCounter {
//!     fn on_attempt_failed(&self, key: usize, total: usize, error: &AttemptError) {
//!         self.failures.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("key {key}/{total} failed: {error}");
//!     }
//! }
//!
//! let counter = Arc::new(FailureCounter { failures: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn RecognitionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::AttemptError;
use std::sync::Arc;

/// Called by the recognition client as it tries each credential.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Key positions are 1-based.
pub trait RecognitionProgressCallback: Send + Sync {
    /// Called once the credential pool is known, before any request.
    fn on_recognition_start(&self, total_keys: usize) {
        let _ = total_keys;
    }

    /// Called just before the request for key `key` is sent.
    fn on_attempt_start(&self, key: usize, total_keys: usize) {
        let _ = (key, total_keys);
    }

    /// Called when a key fails; the loop then moves to the next key.
    fn on_attempt_failed(&self, key: usize, total_keys: usize, error: &AttemptError) {
        let _ = (key, total_keys, error);
    }

    /// Called when a key returns usable text.
    ///
    /// # Arguments
    /// * `text_len` — byte length of the raw model output
    fn on_recognition_complete(&self, key: usize, total_keys: usize, text_len: usize) {
        let _ = (key, total_keys, text_len);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RecognitionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn RecognitionProgressCallback>;
