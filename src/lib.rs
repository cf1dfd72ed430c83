//! # lp-transcribe
//!
//! Capture a marketing landing page in a headless browser and transcribe it
//! into ordered, deduplicated text with a vision LLM.
//!
//! ## Why this crate?
//!
//! Landing pages hide their copy in canvas banners, background images,
//! lazy-loaded sections and text baked into hero graphics. Scraping the DOM
//! misses most of it. Instead this crate renders the page like a visitor
//! would, cuts the full-height screenshot into overlapping slices and lets a
//! vision model read each slice, then stitches the fragments back into one
//! top-to-bottom transcript.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL / local HTML
//!  │
//!  ├─ 1. Browser  launch chain: chromium → chrome → headless-shell → msedge/brave
//!  ├─ 2. Load     interactive → scripting-disabled → static-render escalation
//!  ├─ 3. Capture  overlapping slices + merged full_page.png (segmented fallback)
//!  ├─ 4. OCR      concurrent vision calls with retry/backoff
//!  ├─ 5. Stitch   paragraph grouping, overlap dedup, page-text fallback
//!  └─ 6. Output   transcript.json + website_transcription.{md,txt}
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lp_transcribe::{transcribe, TranscriberConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = TranscriberConfig::default();
//!     let transcript = transcribe("https://example.com", &config).await?;
//!     println!("{}", transcript.combined_text);
//!     eprintln!("{} slices, {} failed, saved to {}",
//!         transcript.slices.len(),
//!         transcript.failed_slices().count(),
//!         transcript.artifacts.run_dir.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Without OCR
//!
//! When no provider can be resolved (or `disable_ocr(true)` is set) the job
//! still captures the page and falls back to the browser's own `innerText`;
//! `Transcript::text_source` says which source was used.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod report;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    LoadStrategy, PauseTimings, StitchPolicy, TranscriberConfig, TranscriberConfigBuilder, Viewport,
};
pub use error::{DriverError, SliceError, TranscribeError};
pub use job::{transcribe, transcribe_html, transcribe_sync, TranscriptionJob};
pub use output::{
    CaptureArtifacts, CaptureMethod, OcrResult, PageMetadata, Slice, TextSource, Transcript,
    TranscriptStats,
};
pub use pipeline::browser::LaunchStrategy;
pub use pipeline::capture::plan_slices;
pub use pipeline::ocr::{OcrBackend, OcrRequest, OcrResponse};
pub use pipeline::stitch::TextStitcher;
pub use pipeline::target::CaptureTarget;
pub use progress::{
    JobStage, JobStatus, NoopProgressCallback, ProgressCallback, StatusTracker,
    TranscriptionProgressCallback,
};
pub use stream::{transcribe_many, transcribe_stream, TranscriptStream};
