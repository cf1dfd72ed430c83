//! Output types produced by a transcription job.
//!
//! Everything here is plain data: created once by the stage that owns it,
//! never mutated by a later stage, and serialisable so a finished
//! [`Transcript`] can be written to `transcript.json` unchanged.

use crate::config::LoadStrategy;
use crate::error::SliceError;
use crate::pipeline::target::CaptureTarget;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One vertical segment of the captured page.
///
/// `index` is 1-based and contiguous within a capture. `bottom - top`
/// equals the pixel height of the stored image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    pub index: usize,
    pub top: u32,
    pub bottom: u32,
    pub path: PathBuf,
}

impl Slice {
    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// OCR outcome for a single slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    /// 1-indexed slice number.
    pub index: usize,
    pub top: u32,
    pub bottom: u32,
    pub image_path: PathBuf,
    /// Text exactly as the OCR service returned it. Empty on failure.
    pub raw_text: String,
    /// Paragraph-grouped, deduplicated text derived from `raw_text`.
    pub clean_text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
    /// Attempts beyond the first.
    pub retries: u32,
    /// Set when OCR failed for this slice; the text fields are then empty.
    pub error: Option<SliceError>,
}

impl OcrResult {
    /// An empty result for a slice that was never sent or whose call failed.
    pub fn empty(slice: &Slice, error: Option<SliceError>) -> Self {
        Self {
            index: slice.index,
            top: slice.top,
            bottom: slice.bottom,
            image_path: slice.path.clone(),
            raw_text: String::new(),
            clean_text: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
            retries: 0,
            error,
        }
    }
}

/// Page-level metadata. Every field is optional; absence is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
}

/// Which capture method produced the slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMethod {
    /// Viewport resized to the slice height and stepped through the page.
    Sliced,
    /// Fixed-part fallback at the loading viewport's height.
    Segmented,
}

impl CaptureMethod {
    pub fn label(&self) -> &'static str {
        match self {
            CaptureMethod::Sliced => "sliced",
            CaptureMethod::Segmented => "segmented",
        }
    }
}

/// Where `Transcript::combined_text` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextSource {
    Ocr,
    PageText,
    Empty,
}

/// Files a job left in its run directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureArtifacts {
    pub run_dir: PathBuf,
    pub merged_image: PathBuf,
    pub slice_images: Vec<PathBuf>,
    /// False once slice images were deleted after OCR.
    pub slice_images_retained: bool,
    pub markdown: Option<PathBuf>,
    pub plain_text: Option<PathBuf>,
    pub json: Option<PathBuf>,
}

/// Timing and usage statistics for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptStats {
    pub page_height: u32,
    pub slice_height: u32,
    pub overlap: u32,
    pub slice_count: usize,
    pub ocr_failed_slices: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub load_duration_ms: u64,
    pub capture_duration_ms: u64,
    pub ocr_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// The final structured output of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub run_id: String,
    pub target: CaptureTarget,
    /// URL the browser was pointed at (`file://` for local targets).
    pub source_url: String,
    pub created_at: DateTime<Utc>,
    pub metadata: PageMetadata,
    /// Directly-extracted `innerText`, when enabled and available.
    pub page_text: Option<String>,
    /// Per-slice OCR results, ordered by slice index.
    pub slices: Vec<OcrResult>,
    /// Ordered, deduplicated text of the whole page.
    pub combined_text: String,
    pub text_source: TextSource,
    pub launch_strategy: String,
    pub load_strategy: LoadStrategy,
    pub capture_method: CaptureMethod,
    pub artifacts: CaptureArtifacts,
    pub stats: TranscriptStats,
}

impl Transcript {
    /// Slices whose OCR call failed.
    pub fn failed_slices(&self) -> impl Iterator<Item = &OcrResult> {
        self.slices.iter().filter(|s| s.error.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_mirrors_slice() {
        let slice = Slice {
            index: 2,
            top: 1280,
            bottom: 2680,
            path: PathBuf::from("segments/segment_0002.png"),
        };
        let r = OcrResult::empty(&slice, None);
        assert_eq!(r.index, 2);
        assert_eq!(r.top, 1280);
        assert_eq!(r.bottom, 2680);
        assert!(r.raw_text.is_empty() && r.clean_text.is_empty());
        assert_eq!(slice.height(), 1400);
    }

    #[test]
    fn capture_method_serialises_kebab_case() {
        assert_eq!(
            serde_json::to_string(&CaptureMethod::Segmented).unwrap(),
            "\"segmented\""
        );
        assert_eq!(serde_json::to_string(&TextSource::PageText).unwrap(), "\"page-text\"");
    }
}
