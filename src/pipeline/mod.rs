//! Pipeline stages for sheet-to-table extraction.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and swapped (e.g. a different preprocessor) without
//! touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ preprocess ──▶ encode ──▶ recognize ──▶ normalize
//! (path/URL)  (resize)     (base64)   (VLM, keys)   (JSON → rows)
//! ```
//!
//! 1. [`input`]      — load a local image or download one from a URL
//! 2. [`preprocess`] — normalise the image before transmission
//! 3. [`encode`]     — re-encode in the file's format and base64-wrap it
//! 4. [`recognize`]  — call the model, failing over across the key pool;
//!    the only stage with network I/O besides URL download
//! 5. [`normalize`]  — tolerant JSON parsing into a fixed-width table

pub mod encode;
pub mod input;
pub mod normalize;
pub mod preprocess;
pub mod recognize;
