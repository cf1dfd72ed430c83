//! Error types for the lp-transcribe library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`TranscribeError`] — **Fatal**: the job cannot produce a transcript
//!   (no browser could be launched, every load strategy failed, the capture
//!   produced nothing). Returned as `Err(TranscribeError)` from the
//!   top-level `transcribe*` functions.
//!
//! * [`SliceError`] — **Non-fatal**: OCR for a single slice failed but the
//!   other slices are fine. Stored inside [`crate::output::OcrResult`] so
//!   callers can inspect partial success.
//!
//! * [`DriverError`] — a single browser or page operation failed. The layer
//!   that can recover (launch chain, capture fallback, load escalation)
//!   absorbs it; otherwise it is folded into a [`TranscribeError`].

use crate::config::LoadStrategy;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the lp-transcribe library.
#[derive(Debug, Error)]
pub enum TranscribeError {
    // ── Target errors ─────────────────────────────────────────────────────
    /// Local target path does not exist.
    #[error("Target not found: '{path}'\nCheck the path exists and is readable.")]
    TargetNotFound { path: PathBuf },

    /// A directory target contains neither `index.html` nor `index.htm`.
    #[error("Directory '{dir}' has no index.html or index.htm")]
    NoEntryDocument { dir: PathBuf },

    /// The input string is neither an existing path nor an HTTP/HTTPS URL.
    #[error("Invalid target '{input}': not a local page or a valid HTTP/HTTPS URL")]
    InvalidTarget { input: String },

    // ── Browser errors ────────────────────────────────────────────────────
    /// Every configured launch strategy failed.
    #[error(
        "No headless browser could be started ({attempts} strategies tried).\n\
         Last strategy '{last_strategy}' failed: {last_error}"
    )]
    BrowserUnavailable {
        attempts: usize,
        last_strategy: String,
        last_error: String,
    },

    /// The runtime home for the browser could not be prepared.
    #[error("Failed to prepare browser runtime directory '{path}': {source}")]
    RuntimeHomeFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Load / capture errors ─────────────────────────────────────────────
    /// Every load strategy failed for the target.
    #[error(
        "Page could not be loaded and captured: last strategy '{last_strategy}' failed: {last_error}\n\
         First error: {first_error}"
    )]
    PageLoadFailed {
        last_strategy: LoadStrategy,
        last_error: String,
        first_error: String,
    },

    /// The static-render fallback could not fetch the document.
    #[error("Failed to fetch '{url}': {reason}")]
    FetchFailed { url: String, reason: String },

    /// Static fetch exceeded the configured timeout.
    #[error("Fetch timed out after {secs}s for '{url}'")]
    FetchTimeout { url: String, secs: u64 },

    /// Both the sliced and the segmented capture failed.
    #[error("Capture failed: {detail}")]
    CaptureFailed { detail: String },

    /// The document has no capturable height.
    #[error("Capture produced zero slices (document height {page_height}px)")]
    NoSlices { page_height: u32 },

    /// A browser operation failed where no fallback exists.
    #[error(transparent)]
    Driver(#[from] DriverError),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an artifact in the run directory.
    #[error("Failed to write artifact '{path}': {source}")]
    ArtifactWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// No OCR provider could be created. The job logs this and continues
    /// without OCR; it is only returned from [`crate::pipeline::llm::resolve_provider`].
    #[error("OCR provider '{provider}' not configured: {hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed browser or page operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// The browser process could not be started.
    #[error("launch failed: {0}")]
    Launch(String),

    /// A DevTools protocol command failed.
    #[error("devtools command failed: {0}")]
    Cdp(String),

    /// An operation exceeded its deadline.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    /// The browser returned data that could not be decoded.
    #[error("could not decode browser response: {0}")]
    Decode(String),
}

/// A non-fatal error for a single slice.
///
/// Stored alongside [`crate::output::OcrResult`]; the slice's text is left
/// empty and the job continues.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum SliceError {
    /// The slice image could not be read back from disk.
    #[error("Slice {slice}: image unreadable: {detail}")]
    ImageUnreadable { slice: usize, detail: String },

    /// OCR call failed after retries.
    #[error("Slice {slice}: OCR failed after {retries} retries: {detail}")]
    OcrFailed {
        slice: usize,
        retries: u32,
        detail: String,
    },

    /// OCR call timed out on its final attempt.
    #[error("Slice {slice}: OCR timed out after {secs}s")]
    Timeout { slice: usize, secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_unavailable_names_last_strategy() {
        let e = TranscribeError::BrowserUnavailable {
            attempts: 4,
            last_strategy: "edge".into(),
            last_error: "executable not found".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("4 strategies"), "got: {msg}");
        assert!(msg.contains("'edge'"), "got: {msg}");
        assert!(msg.contains("executable not found"), "got: {msg}");
    }

    #[test]
    fn page_load_failed_carries_both_causes() {
        let e = TranscribeError::PageLoadFailed {
            last_strategy: LoadStrategy::StaticRender,
            last_error: "HTTP 403".into(),
            first_error: "navigation reset".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("static-render"), "got: {msg}");
        assert!(msg.contains("HTTP 403"));
        assert!(msg.contains("navigation reset"));
    }

    #[test]
    fn driver_error_converts_transparently() {
        let e: TranscribeError = DriverError::Timeout {
            operation: "screenshot",
            secs: 30,
        }
        .into();
        assert_eq!(e.to_string(), "screenshot timed out after 30s");
    }

    #[test]
    fn slice_error_display() {
        let e = SliceError::OcrFailed {
            slice: 2,
            retries: 3,
            detail: "HTTP 503".into(),
        };
        assert!(e.to_string().starts_with("Slice 2"));
        assert!(e.to_string().contains("HTTP 503"));
    }
}
