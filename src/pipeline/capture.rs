//! Page capture: overlapping slices plus a merged full-page image.
//!
//! ## Primary method: sliced
//!
//! The viewport is resized to the slice height and stepped down the page,
//! advancing `slice_height - overlap` each time:
//!
//! ```text
//! total 3000, slice 1400, overlap 120
//!
//!    0 ┬──────────── slice 1
//!      │
//! 1280 ┼─┬────────── slice 2
//! 1400 ┴─│
//!        │
//! 2560   ┼─┬──────── slice 3
//! 2680   ┴─│
//! 3000     ┴
//! ```
//!
//! Every screenshot is a document-coordinate clip, so `bottom - top` is
//! exactly the stored image's height even for the short last slice.
//!
//! ## Fallback: segmented
//!
//! Sticky headers, viewport-height sections and flaky compositors can make
//! resized-viewport capture throw. The fallback keeps the loading viewport
//! and captures a fixed number of viewport-sized parts instead. A failing
//! part is skipped; one part is enough.
//!
//! Merging decodes every slice and stacks them on a white canvas. That work
//! is CPU-bound and runs on the blocking pool.

use crate::config::{PauseTimings, TranscriberConfig, Viewport};
use crate::error::{DriverError, TranscribeError};
use crate::output::{CaptureMethod, Slice};
use crate::pipeline::driver::{Clip, PageDriver};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Sub-directory of the run directory holding slice images.
pub const SEGMENTS_DIR: &str = "segments";

/// File name of the merged image inside the run directory.
pub const MERGED_IMAGE: &str = "full_page.png";

/// A planned vertical span, in document pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceSpan {
    pub top: u32,
    pub bottom: u32,
}

impl SliceSpan {
    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// Plan the primary capture.
///
/// Starts at 0 and advances by `slice_height - overlap` while `top < total`;
/// each span is `min(slice_height, total - top)` tall. Returns no spans for
/// an empty document or an invalid overlap.
pub fn plan_slices(total_height: u32, slice_height: u32, overlap: u32) -> Vec<SliceSpan> {
    if slice_height == 0 || overlap >= slice_height {
        return Vec::new();
    }
    let stride = slice_height - overlap;
    let mut spans = Vec::new();
    let mut top = 0u32;
    while top < total_height {
        let height = slice_height.min(total_height - top);
        spans.push(SliceSpan {
            top,
            bottom: top + height,
        });
        top = top.saturating_add(stride);
    }
    spans
}

/// Plan the segmented fallback.
///
/// `parts = max(min_parts, ceil(total / viewport_height))`, parts are spaced
/// `max(total / parts, viewport_height)` apart and clamped so none runs past
/// the end. Identical consecutive spans (short pages) are captured once.
pub fn plan_segments(total_height: u32, viewport_height: u32, min_parts: u32) -> Vec<SliceSpan> {
    if total_height == 0 || viewport_height == 0 {
        return Vec::new();
    }
    let parts = min_parts.max(total_height.div_ceil(viewport_height)).max(1) as u64;
    let step = (total_height as u64 / parts).max(viewport_height as u64);
    let last_top = total_height.saturating_sub(viewport_height) as u64;

    let mut spans: Vec<SliceSpan> = Vec::new();
    for i in 0..parts {
        let top = (i * step).min(last_top) as u32;
        let height = viewport_height.min(total_height - top);
        if height == 0 {
            break;
        }
        let span = SliceSpan {
            top,
            bottom: top + height,
        };
        if spans.last() != Some(&span) {
            spans.push(span);
        }
    }
    spans
}

/// Result of a capture.
#[derive(Debug, Clone)]
pub struct CaptureOutput {
    pub merged_image: PathBuf,
    /// Non-empty, ordered by index.
    pub slices: Vec<Slice>,
    pub method: CaptureMethod,
    /// Document height the slices cover.
    pub page_height: u32,
}

/// Produces slices and the merged image for a loaded page.
#[derive(Debug, Clone)]
pub struct CaptureEngine {
    slice_height: u32,
    overlap: u32,
    fallback_parts: u32,
    pauses: PauseTimings,
    screenshot_timeout: Duration,
}

impl CaptureEngine {
    pub fn new(config: &TranscriberConfig) -> Self {
        Self {
            slice_height: config.slice_height,
            overlap: config.overlap,
            fallback_parts: config.fallback_parts,
            pauses: config.pauses,
            screenshot_timeout: Duration::from_secs(config.screenshot_timeout_secs),
        }
    }

    /// Capture `page` into `run_dir`, falling back to segmented capture if
    /// the sliced method fails for any reason.
    pub async fn capture<P: PageDriver>(
        &self,
        page: &P,
        run_dir: &Path,
    ) -> Result<CaptureOutput, TranscribeError> {
        let segments_dir = run_dir.join(SEGMENTS_DIR);
        let merged_image = run_dir.join(MERGED_IMAGE);
        reset_dir(&segments_dir).await?;

        let loading_viewport = page.viewport().await?;

        match self.capture_sliced(page, loading_viewport, &segments_dir).await {
            Ok((slices, page_height)) => {
                let paths: Vec<PathBuf> = slices.iter().map(|s| s.path.clone()).collect();
                match merge_slices(paths, merged_image.clone()).await {
                    Ok((w, h)) => {
                        info!(
                            "Captured {} slices of {}px page, merged {}x{}",
                            slices.len(),
                            page_height,
                            w,
                            h
                        );
                        return Ok(CaptureOutput {
                            merged_image,
                            slices,
                            method: CaptureMethod::Sliced,
                            page_height,
                        });
                    }
                    Err(e) => warn!("Merging slices failed, trying segmented capture: {}", e),
                }
            }
            Err(e) => warn!("Sliced capture failed, trying segmented capture: {}", e),
        }

        if let Err(e) = page.set_viewport(loading_viewport).await {
            debug!("Restoring viewport before fallback failed: {}", e);
        }
        reset_dir(&segments_dir).await?;

        let (slices, page_height) = self
            .capture_segmented(page, loading_viewport, &segments_dir)
            .await?;
        let paths: Vec<PathBuf> = slices.iter().map(|s| s.path.clone()).collect();
        let (w, h) = merge_slices(paths, merged_image.clone()).await?;
        info!(
            "Segmented capture: {} parts of {}px page, merged {}x{}",
            slices.len(),
            page_height,
            w,
            h
        );

        Ok(CaptureOutput {
            merged_image,
            slices,
            method: CaptureMethod::Segmented,
            page_height,
        })
    }

    /// Primary method. Any error aborts it; the viewport is restored either way.
    async fn capture_sliced<P: PageDriver>(
        &self,
        page: &P,
        loading_viewport: Viewport,
        segments_dir: &Path,
    ) -> Result<(Vec<Slice>, u32), TranscribeError> {
        page.set_viewport(Viewport {
            width: loading_viewport.width,
            height: self.slice_height,
        })
        .await?;

        let result = self
            .capture_sliced_inner(page, loading_viewport.width, segments_dir)
            .await;

        if let Err(e) = page.set_viewport(loading_viewport).await {
            warn!("Restoring viewport failed: {}", e);
        }
        if let Err(e) = page.scroll_to(0, false).await {
            debug!("Scroll to top after capture failed: {}", e);
        }
        result
    }

    async fn capture_sliced_inner<P: PageDriver>(
        &self,
        page: &P,
        width: u32,
        segments_dir: &Path,
    ) -> Result<(Vec<Slice>, u32), TranscribeError> {
        let total = page.document_height().await?;
        let spans = plan_slices(total, self.slice_height, self.overlap);
        if spans.is_empty() {
            return Err(TranscribeError::NoSlices { page_height: total });
        }
        debug!(
            "Slicing {}px page into {} slices ({}px, {}px overlap)",
            total,
            spans.len(),
            self.slice_height,
            self.overlap
        );

        let mut slices = Vec::with_capacity(spans.len());
        for (i, span) in spans.iter().enumerate() {
            // Clips are in document coordinates; a failed scroll only costs
            // scroll-triggered content.
            if let Err(e) = page.scroll_to(span.top, false).await {
                debug!("Scroll to {}px failed: {}", span.top, e);
            }
            pause(self.pauses.slice_ms).await;
            let slice = self.shoot(page, i + 1, *span, width, segments_dir).await?;
            slices.push(slice);
        }
        Ok((slices, total))
    }

    /// Fallback method. Failing parts are skipped; indices stay contiguous.
    async fn capture_segmented<P: PageDriver>(
        &self,
        page: &P,
        viewport: Viewport,
        segments_dir: &Path,
    ) -> Result<(Vec<Slice>, u32), TranscribeError> {
        let total = page.document_height().await?;
        let spans = plan_segments(total, viewport.height, self.fallback_parts);
        if spans.is_empty() {
            return Err(TranscribeError::NoSlices { page_height: total });
        }

        let mut slices: Vec<Slice> = Vec::with_capacity(spans.len());
        let mut last_error: Option<TranscribeError> = None;
        for span in &spans {
            if let Err(e) = page.scroll_to(span.top, false).await {
                debug!("Scroll to {}px failed: {}", span.top, e);
            }
            pause(self.pauses.fallback_part_ms).await;
            match self
                .shoot(page, slices.len() + 1, *span, viewport.width, segments_dir)
                .await
            {
                Ok(slice) => slices.push(slice),
                Err(e) => {
                    warn!("Segment at {}px failed, skipping: {}", span.top, e);
                    last_error = Some(e);
                }
            }
        }

        if slices.is_empty() {
            let detail = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no parts captured".to_string());
            return Err(TranscribeError::CaptureFailed {
                detail: format!("every segment failed: {detail}"),
            });
        }
        Ok((slices, total))
    }

    async fn shoot<P: PageDriver>(
        &self,
        page: &P,
        index: usize,
        span: SliceSpan,
        width: u32,
        segments_dir: &Path,
    ) -> Result<Slice, TranscribeError> {
        let clip = Clip {
            x: 0,
            y: span.top,
            width,
            height: span.height(),
        };
        let png = timeout(self.screenshot_timeout, page.screenshot(clip))
            .await
            .map_err(|_| DriverError::Timeout {
                operation: "screenshot",
                secs: self.screenshot_timeout.as_secs(),
            })??;

        let path = segments_dir.join(slice_file_name(index));
        tokio::fs::write(&path, &png)
            .await
            .map_err(|e| TranscribeError::ArtifactWriteFailed {
                path: path.clone(),
                source: e,
            })?;
        debug!("Slice {}: {}..{} → {}", index, span.top, span.bottom, path.display());

        Ok(Slice {
            index,
            top: span.top,
            bottom: span.bottom,
            path,
        })
    }
}

/// `segment_0001.png`, `segment_0002.png`, …
pub fn slice_file_name(index: usize) -> String {
    format!("segment_{:04}.png", index)
}

async fn pause(ms: u64) {
    if ms > 0 {
        sleep(Duration::from_millis(ms)).await;
    }
}

async fn reset_dir(dir: &Path) -> Result<(), TranscribeError> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(dir)
            .await
            .map_err(|e| TranscribeError::ArtifactWriteFailed {
                path: dir.to_path_buf(),
                source: e,
            })?;
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| TranscribeError::ArtifactWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })
}

/// Stack slice images top to bottom on a white canvas as wide as the
/// widest slice and write it to `output`. Returns the canvas size.
pub async fn merge_slices(paths: Vec<PathBuf>, output: PathBuf) -> Result<(u32, u32), TranscribeError> {
    tokio::task::spawn_blocking(move || merge_slices_blocking(&paths, &output))
        .await
        .map_err(|e| TranscribeError::Internal(format!("Merge task panicked: {}", e)))?
}

fn merge_slices_blocking(paths: &[PathBuf], output: &Path) -> Result<(u32, u32), TranscribeError> {
    if paths.is_empty() {
        return Err(TranscribeError::CaptureFailed {
            detail: "no slices to merge".into(),
        });
    }

    let images = paths
        .iter()
        .map(|p| {
            image::open(p).map(|img| img.to_rgb8()).map_err(|e| TranscribeError::CaptureFailed {
                detail: format!("cannot decode {}: {}", p.display(), e),
            })
        })
        .collect::<Result<Vec<RgbImage>, _>>()?;

    let width = images.iter().map(|i| i.width()).max().unwrap_or(0);
    let height: u64 = images.iter().map(|i| i.height() as u64).sum();
    if width == 0 || height == 0 || height > u32::MAX as u64 {
        return Err(TranscribeError::CaptureFailed {
            detail: format!("cannot merge into a {}x{} canvas", width, height),
        });
    }
    let height = height as u32;

    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let mut y: i64 = 0;
    for img in &images {
        image::imageops::replace(&mut canvas, img, 0, y);
        y += img.height() as i64;
    }

    canvas.save(output).map_err(|e| TranscribeError::CaptureFailed {
        detail: format!("cannot write {}: {}", output.display(), e),
    })?;
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fake::{solid_png, FakePage};

    fn engine(slice: u32, overlap: u32) -> CaptureEngine {
        let config = TranscriberConfig::builder()
            .slice_height(slice)
            .overlap(overlap)
            .pauses(PauseTimings::none())
            .build()
            .unwrap();
        CaptureEngine::new(&config)
    }

    fn narrow_page(height: u32) -> FakePage {
        FakePage::new(
            height,
            Viewport {
                width: 64,
                height: 900,
            },
        )
    }

    #[test]
    fn landing_page_slices_at_expected_offsets() {
        let spans = plan_slices(3000, 1400, 120);
        let tops: Vec<u32> = spans.iter().map(|s| s.top).collect();
        let bottoms: Vec<u32> = spans.iter().map(|s| s.bottom).collect();
        assert_eq!(tops, vec![0, 1280, 2560]);
        assert_eq!(bottoms, vec![1400, 2680, 3000]);
    }

    #[test]
    fn slice_plan_covers_page_for_many_shapes() {
        for total in [1u32, 119, 120, 1279, 1280, 1400, 1401, 2999, 3000, 8765, 20000] {
            for (slice, overlap) in [(1400u32, 120u32), (1400, 0), (500, 499), (1, 0), (900, 300)] {
                let spans = plan_slices(total, slice, overlap);
                let stride = slice - overlap;

                assert!(!spans.is_empty());
                assert_eq!(spans[0].top, 0);
                assert_eq!(spans.last().unwrap().bottom, total, "total={total} slice={slice} overlap={overlap}");
                for pair in spans.windows(2) {
                    assert_eq!(pair[1].top, pair[0].top + stride);
                    assert!(pair[1].top <= pair[0].bottom, "gap between slices");
                    if overlap > 0 {
                        assert!(pair[1].top < pair[0].bottom);
                    }
                }
                for s in &spans {
                    assert!(s.height() > 0 && s.height() <= slice);
                }

                let expected = total.div_ceil(stride) as usize;
                assert!(spans.len().abs_diff(expected) <= 1);
            }
        }
    }

    #[test]
    fn empty_page_has_no_slices() {
        assert!(plan_slices(0, 1400, 120).is_empty());
        assert!(plan_segments(0, 900, 2).is_empty());
    }

    #[test]
    fn invalid_overlap_plans_nothing() {
        assert!(plan_slices(3000, 100, 100).is_empty());
    }

    #[test]
    fn segment_plan_uses_viewport_sized_parts() {
        let spans = plan_segments(3000, 900, 2);
        let tops: Vec<u32> = spans.iter().map(|s| s.top).collect();
        assert_eq!(tops, vec![0, 900, 1800, 2100]);
        assert!(spans.iter().all(|s| s.height() == 900));
        assert_eq!(spans.last().unwrap().bottom, 3000);
    }

    #[test]
    fn short_page_segment_captured_once() {
        let spans = plan_segments(500, 900, 2);
        assert_eq!(spans, vec![SliceSpan { top: 0, bottom: 500 }]);
    }

    #[tokio::test]
    async fn sliced_capture_writes_slices_and_merged_image() {
        let dir = tempfile::tempdir().unwrap();
        let page = narrow_page(3000);

        let out = engine(1400, 120).capture(&page, dir.path()).await.unwrap();

        assert_eq!(out.method, CaptureMethod::Sliced);
        assert_eq!(out.page_height, 3000);
        let idx: Vec<usize> = out.slices.iter().map(|s| s.index).collect();
        assert_eq!(idx, vec![1, 2, 3]);
        for s in &out.slices {
            assert!(s.path.ends_with(slice_file_name(s.index)));
            let img = image::open(&s.path).unwrap();
            assert_eq!(img.height(), s.height());
        }

        let merged = image::open(&out.merged_image).unwrap();
        assert_eq!(merged.width(), 64);
        assert_eq!(merged.height(), 1400 + 1400 + 440);

        // Viewport resized for slicing, then restored.
        let set = page.viewports_set.lock().unwrap().clone();
        assert_eq!(set.first().map(|v| v.height), Some(1400));
        assert_eq!(set.last().map(|v| v.height), Some(900));
    }

    #[tokio::test]
    async fn failing_primary_falls_back_to_segments() {
        let dir = tempfile::tempdir().unwrap();
        let page = narrow_page(2000).failing_screenshots(1);

        let out = engine(1400, 120).capture(&page, dir.path()).await.unwrap();

        assert_eq!(out.method, CaptureMethod::Segmented);
        assert!(!out.slices.is_empty());
        assert!(out.merged_image.is_file());
        let idx: Vec<usize> = out.slices.iter().map(|s| s.index).collect();
        assert_eq!(idx, (1..=out.slices.len()).collect::<Vec<_>>());
        // Fallback parts use the loading viewport height.
        assert!(page.shot_log().iter().all(|c| c.height <= 900));
    }

    #[tokio::test]
    async fn failing_segment_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        // First call breaks the primary, second breaks segment one.
        let page = narrow_page(2000).failing_screenshots(2);

        let out = engine(1400, 120).capture(&page, dir.path()).await.unwrap();
        assert_eq!(out.method, CaptureMethod::Segmented);
        assert_eq!(out.slices[0].index, 1);
        assert_eq!(out.slices[0].top, 900);
    }

    #[tokio::test]
    async fn zero_height_page_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let page = narrow_page(0);
        let err = engine(1400, 120).capture(&page, dir.path()).await.unwrap_err();
        assert!(matches!(err, TranscribeError::NoSlices { page_height: 0 }));
    }

    #[tokio::test]
    async fn stale_primary_slices_do_not_leak_into_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let segments = dir.path().join(SEGMENTS_DIR);
        std::fs::create_dir_all(&segments).unwrap();
        std::fs::write(segments.join("segment_0099.png"), b"stale").unwrap();

        let page = narrow_page(800);
        engine(1400, 120).capture(&page, dir.path()).await.unwrap();
        assert!(!segments.join("segment_0099.png").exists());
    }

    #[tokio::test]
    async fn merge_pads_narrow_slices_with_white() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        std::fs::write(&a, solid_png(40, 10)).unwrap();
        std::fs::write(&b, solid_png(20, 5)).unwrap();
        let out = dir.path().join("merged.png");

        let (w, h) = merge_slices(vec![a, b], out.clone()).await.unwrap();
        assert_eq!((w, h), (40, 15));
        let merged = image::open(&out).unwrap().to_rgb8();
        assert_eq!(merged.get_pixel(39, 14), &Rgb([255, 255, 255]));
        assert_eq!(merged.get_pixel(0, 0), &Rgb([210, 210, 210]));
    }
}
