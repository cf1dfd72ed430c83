//! Pipeline stages for landing-page transcription.
//!
//! Each submodule implements one step. Browser access goes through the
//! [`driver::PageDriver`] and [`browser::BrowserLauncher`] traits, so every
//! stage above them can be tested against in-memory pages.
//!
//! ## Data Flow
//!
//! ```text
//! target ──▶ browser ──▶ loader ──▶ capture ──▶ ocr ──▶ stitch
//! (URL/path) (launch)   (escalate) (slices)   (VLM)   (dedup)
//! ```
//!
//! 1. [`target`]  resolve the input to a URL or a local document
//! 2. [`browser`] walk the launch chain until a browser starts
//! 3. [`loader`]  navigate, trigger lazy loading, read metadata
//! 4. [`capture`] overlapping slices and the merged image; the merge runs in
//!    `spawn_blocking`
//! 5. [`ocr`]     bounded fan-out over an [`ocr::OcrBackend`]; [`llm`] and
//!    [`encode`] implement the vision-LLM backend
//! 6. [`stitch`]  deterministic cleanup and cross-slice deduplication

pub mod browser;
pub mod capture;
pub mod driver;
pub mod encode;
pub mod llm;
pub mod loader;
pub mod ocr;
pub mod stitch;
pub mod target;

#[cfg(test)]
pub(crate) mod fake;
