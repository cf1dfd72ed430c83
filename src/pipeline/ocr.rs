//! OCR fan-out: send every slice to a vision backend, a few at a time.
//!
//! ## Concurrency
//!
//! Slices are independent, so they are submitted through
//! `buffer_unordered(ocr_workers)`. Completion order is whatever the
//! backend's latency makes it; [`restore_slice_order`] puts the results
//! back in slice order before anyone else sees them.
//!
//! ## Degradation
//!
//! OCR is optional. When no backend can be resolved (OCR disabled, no
//! credentials in the environment) every slice gets an empty result and the
//! job falls back to the page's own text. A single failed slice is recorded
//! as a [`SliceError`] on its result; the others are unaffected.

use crate::config::TranscriberConfig;
use crate::error::SliceError;
use crate::output::{OcrResult, Slice};
use crate::pipeline::encode::read_slice_image;
use crate::pipeline::llm::{resolve_provider, VisionLlmBackend};
use crate::pipeline::stitch::TextStitcher;
use crate::progress::ProgressCallback;
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One slice submitted for recognition.
#[derive(Debug, Clone)]
pub struct OcrRequest {
    /// 1-based slice index.
    pub slice: usize,
    pub total: usize,
    /// PNG bytes of the slice.
    pub image_png: Vec<u8>,
    /// Transcription instructions.
    pub instruction: Arc<str>,
}

/// Text recognised in one slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrResponse {
    pub text: String,
    /// Attempts beyond the first.
    pub retries: u32,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A service that turns one image plus instructions into free text.
///
/// Implementations own their retry policy and report a final failure as a
/// [`SliceError`].
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    async fn recognize(&self, request: OcrRequest) -> Result<OcrResponse, SliceError>;
}

/// Pick the OCR backend for a job, most specific first:
///
/// 1. `config.ocr_backend`
/// 2. a vision backend over `config.provider`, `config.provider_name` or the
///    environment (see [`resolve_provider`])
///
/// Returns `None` when OCR is disabled or no provider is configured.
pub fn resolve_backend(config: &TranscriberConfig) -> Option<Arc<dyn OcrBackend>> {
    if config.disable_ocr {
        info!("OCR disabled by configuration");
        return None;
    }
    if let Some(backend) = &config.ocr_backend {
        return Some(Arc::clone(backend));
    }
    match resolve_provider(config) {
        Ok((label, provider)) => Some(Arc::new(VisionLlmBackend::new(label, provider, config))),
        Err(e) => {
            warn!("OCR unavailable, slices will have no text: {}", e);
            None
        }
    }
}

/// Runs OCR over a job's slices.
pub struct OcrOrchestrator {
    backend: Option<Arc<dyn OcrBackend>>,
    workers: usize,
    instruction: Arc<str>,
    stitcher: TextStitcher,
    progress: Option<ProgressCallback>,
}

impl OcrOrchestrator {
    /// Orchestrator with the backend resolved from `config`.
    pub fn new(config: &TranscriberConfig) -> Self {
        Self::with_backend(config, resolve_backend(config))
    }

    pub fn with_backend(config: &TranscriberConfig, backend: Option<Arc<dyn OcrBackend>>) -> Self {
        let instruction = config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        Self {
            backend,
            workers: config.ocr_workers.max(1),
            instruction: Arc::from(instruction),
            stitcher: TextStitcher::new(config.stitch.clone()),
            progress: config.progress_callback.clone(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// One result per slice, in slice order.
    pub async fn transcribe(&self, slices: &[Slice]) -> Vec<OcrResult> {
        let Some(backend) = &self.backend else {
            debug!("No OCR backend; {} slices left empty", slices.len());
            return slices.iter().map(|s| OcrResult::empty(s, None)).collect();
        };

        let total = slices.len();
        info!(
            "OCR: {} slices via '{}' ({} workers)",
            total,
            backend.name(),
            self.workers
        );

        let jobs: Vec<_> = slices
            .iter()
            .map(|slice| {
                let backend = Arc::clone(backend);
                async move { self.transcribe_one(backend.as_ref(), slice, total).await }
            })
            .collect();
        let results: Vec<OcrResult> = stream::iter(jobs)
        .buffer_unordered(self.workers)
        .collect()
        .await;

        restore_slice_order(results)
    }

    async fn transcribe_one(&self, backend: &dyn OcrBackend, slice: &Slice, total: usize) -> OcrResult {
        if let Some(cb) = &self.progress {
            cb.on_slice_start(slice.index, total);
        }
        let start = Instant::now();

        let outcome = match read_slice_image(slice.index, &slice.path).await {
            Ok(image_png) => {
                backend
                    .recognize(OcrRequest {
                        slice: slice.index,
                        total,
                        image_png,
                        instruction: Arc::clone(&self.instruction),
                    })
                    .await
            }
            Err(e) => Err(e),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(response) => {
                let clean_text = self.stitcher.clean(&response.text);
                if let Some(cb) = &self.progress {
                    cb.on_slice_complete(slice.index, total, clean_text.len());
                }
                OcrResult {
                    index: slice.index,
                    top: slice.top,
                    bottom: slice.bottom,
                    image_path: slice.path.clone(),
                    raw_text: response.text,
                    clean_text,
                    input_tokens: response.input_tokens,
                    output_tokens: response.output_tokens,
                    duration_ms,
                    retries: response.retries,
                    error: None,
                }
            }
            Err(e) => {
                warn!("{}", e);
                if let Some(cb) = &self.progress {
                    cb.on_slice_error(slice.index, total, &e.to_string());
                }
                let retries = match &e {
                    SliceError::OcrFailed { retries, .. } => *retries,
                    _ => 0,
                };
                OcrResult {
                    duration_ms,
                    retries,
                    ..OcrResult::empty(slice, Some(e))
                }
            }
        }
    }
}

/// Sort results by slice index.
pub fn restore_slice_order(mut results: Vec<OcrResult>) -> Vec<OcrResult> {
    results.sort_by_key(|r| r.index);
    results
}
