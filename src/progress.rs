//! Progress-callback trait for job stage events.
//!
//! Inject an [`Arc<dyn TranscriptionProgressCallback>`] via
//! [`crate::config::TranscriberConfigBuilder::progress_callback`] to receive
//! events as the job moves through load, capture, OCR and save.
//!
//! Hosts that poll instead of listening (an HTTP status endpoint, a GUI
//! timer) can use [`StatusTracker`], which folds the events into a
//! [`JobStatus`] snapshot published on a `tokio::sync::watch` channel.
//!
//! # Example
//!
//! ```rust
//! use lp_transcribe::{StatusTracker, TranscriberConfig, TranscriptionProgressCallback};
//! use std::sync::Arc;
//!
//! let tracker = Arc::new(StatusTracker::new());
//! let mut status = tracker.subscribe();
//!
//! let config = TranscriberConfig::builder()
//!     .progress_callback(tracker.clone() as Arc<dyn TranscriptionProgressCallback>)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(status.borrow_and_update().progress, 0);
//! ```

use crate::config::LoadStrategy;
use crate::output::CaptureMethod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

/// Called by the job as it moves through its stages.
///
/// Implementations must be `Send + Sync`: the slice events fire from
/// concurrent OCR workers. All methods have default no-op implementations
/// so callers only override what they care about.
pub trait TranscriptionProgressCallback: Send + Sync {
    /// Called once before the browser is launched.
    fn on_job_start(&self, target: &str) {
        let _ = target;
    }

    /// Called when a launch strategy produced a working browser.
    fn on_browser_ready(&self, strategy: &str) {
        let _ = strategy;
    }

    /// Called when a load tier failed and the job escalates to the next one.
    fn on_load_strategy_failed(&self, strategy: LoadStrategy, error: &str) {
        let _ = (strategy, error);
    }

    /// Called when the page has loaded and metadata was read.
    fn on_page_loaded(&self, strategy: LoadStrategy) {
        let _ = strategy;
    }

    /// Called once the slices and the merged image exist on disk.
    fn on_slices_captured(&self, slice_count: usize, method: CaptureMethod) {
        let _ = (slice_count, method);
    }

    /// Called just before the OCR request for a slice is sent.
    fn on_slice_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called when a slice was transcribed.
    ///
    /// * `text_len` — byte length of the cleaned text
    fn on_slice_complete(&self, index: usize, total: usize, text_len: usize) {
        let _ = (index, total, text_len);
    }

    /// Called when OCR for a slice failed after all retries.
    fn on_slice_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once every slice has a result.
    fn on_ocr_complete(&self, transcribed: usize, failed: usize) {
        let _ = (transcribed, failed);
    }

    /// Called after the reports were written to the run directory.
    fn on_artifacts_written(&self, run_dir: &Path) {
        let _ = run_dir;
    }

    /// Called once when the transcript is ready.
    fn on_job_complete(&self, slice_count: usize, failed_slices: usize) {
        let _ = (slice_count, failed_slices);
    }

    /// Called once when the job aborts with a fatal error.
    fn on_job_failed(&self, error: &str) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl TranscriptionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::TranscriberConfig`].
pub type ProgressCallback = Arc<dyn TranscriptionProgressCallback>;

// ── Polling status ───────────────────────────────────────────────────────

/// Coarse stage of a job, as reported to pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    Loading,
    Capturing,
    Transcribing,
    Saving,
    Completed,
    Failed,
}

/// Snapshot of a job's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub stage: JobStage,
    /// 0–100.
    pub progress: u8,
    pub message: String,
    pub slices_done: usize,
    pub slices_total: usize,
    pub updated_at: DateTime<Utc>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self {
            stage: JobStage::Queued,
            progress: 0,
            message: "queued".to_string(),
            slices_done: 0,
            slices_total: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Progress milestones: page load starts at 10 %, capture done at 50 %,
/// OCR fills 50–80 %, saving at 80 %.
const PROGRESS_LOADING: u8 = 10;
const PROGRESS_CAPTURED: u8 = 50;
const PROGRESS_SAVING: u8 = 80;

/// A [`TranscriptionProgressCallback`] that publishes [`JobStatus`]
/// snapshots on a watch channel.
pub struct StatusTracker {
    tx: watch::Sender<JobStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(JobStatus::default());
        Self { tx }
    }

    /// A receiver that always observes the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.tx.subscribe()
    }

    /// The current snapshot.
    pub fn current(&self) -> JobStatus {
        self.tx.borrow().clone()
    }

    fn update(&self, f: impl FnOnce(&mut JobStatus)) {
        self.tx.send_modify(|status| {
            f(status);
            status.updated_at = Utc::now();
        });
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptionProgressCallback for StatusTracker {
    fn on_job_start(&self, target: &str) {
        self.update(|s| {
            s.stage = JobStage::Loading;
            s.progress = PROGRESS_LOADING;
            s.message = format!("loading {target}");
        });
    }

    fn on_load_strategy_failed(&self, strategy: LoadStrategy, error: &str) {
        self.update(|s| s.message = format!("{strategy} failed: {error}"));
    }

    fn on_page_loaded(&self, strategy: LoadStrategy) {
        self.update(|s| {
            s.stage = JobStage::Capturing;
            s.message = format!("page loaded ({strategy}), capturing");
        });
    }

    fn on_slices_captured(&self, slice_count: usize, _method: CaptureMethod) {
        self.update(|s| {
            s.stage = JobStage::Transcribing;
            s.progress = PROGRESS_CAPTURED;
            s.slices_total = slice_count;
            s.slices_done = 0;
            s.message = format!("captured {slice_count} slices");
        });
    }

    fn on_slice_complete(&self, _index: usize, total: usize, _text_len: usize) {
        self.update(|s| advance_slice(s, total));
    }

    fn on_slice_error(&self, _index: usize, total: usize, _error: &str) {
        self.update(|s| advance_slice(s, total));
    }

    fn on_ocr_complete(&self, transcribed: usize, failed: usize) {
        self.update(|s| {
            s.stage = JobStage::Saving;
            s.progress = PROGRESS_SAVING;
            s.message = format!("OCR complete: {transcribed} transcribed, {failed} failed");
        });
    }

    fn on_artifacts_written(&self, run_dir: &Path) {
        self.update(|s| {
            s.stage = JobStage::Saving;
            s.progress = PROGRESS_SAVING;
            s.message = format!("saved to {}", run_dir.display());
        });
    }

    fn on_job_complete(&self, slice_count: usize, failed_slices: usize) {
        self.update(|s| {
            s.stage = JobStage::Completed;
            s.progress = 100;
            s.message = format!("completed: {slice_count} slices, {failed_slices} failed");
        });
    }

    fn on_job_failed(&self, error: &str) {
        self.update(|s| {
            s.stage = JobStage::Failed;
            s.message = error.to_string();
        });
    }
}

fn advance_slice(status: &mut JobStatus, total: usize) {
    status.slices_done += 1;
    status.slices_total = total;
    let span = (PROGRESS_SAVING - PROGRESS_CAPTURED) as usize;
    let done = status.slices_done.min(total.max(1));
    status.progress = PROGRESS_CAPTURED + (span * done / total.max(1)) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        slice_starts: AtomicUsize,
        slice_completes: AtomicUsize,
        slice_errors: AtomicUsize,
    }

    impl TranscriptionProgressCallback for TrackingCallback {
        fn on_slice_start(&self, _index: usize, _total: usize) {
            self.slice_starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_slice_complete(&self, _index: usize, _total: usize, _text_len: usize) {
            self.slice_completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_slice_error(&self, _index: usize, _total: usize, _error: &str) {
            self.slice_errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_job_start("https://example.com");
        cb.on_browser_ready("chromium");
        cb.on_page_loaded(LoadStrategy::Interactive);
        cb.on_slices_captured(3, CaptureMethod::Sliced);
        cb.on_slice_error(2, 3, "timeout");
        cb.on_job_complete(3, 1);
    }

    #[test]
    fn tracking_callback_receives_slice_events() {
        let tracker = TrackingCallback {
            slice_starts: AtomicUsize::new(0),
            slice_completes: AtomicUsize::new(0),
            slice_errors: AtomicUsize::new(0),
        };
        tracker.on_slice_start(1, 2);
        tracker.on_slice_complete(1, 2, 120);
        tracker.on_slice_start(2, 2);
        tracker.on_slice_error(2, 2, "HTTP 503");

        assert_eq!(tracker.slice_starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.slice_completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.slice_errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn status_tracker_walks_through_milestones() {
        let tracker = StatusTracker::new();
        let rx = tracker.subscribe();

        tracker.on_job_start("https://example.com");
        assert_eq!(rx.borrow().stage, JobStage::Loading);
        assert_eq!(rx.borrow().progress, 10);

        tracker.on_slices_captured(4, CaptureMethod::Sliced);
        assert_eq!(tracker.current().progress, 50);
        assert_eq!(tracker.current().slices_total, 4);

        tracker.on_slice_complete(1, 4, 10);
        tracker.on_slice_error(2, 4, "boom");
        let mid = tracker.current();
        assert_eq!(mid.slices_done, 2);
        assert_eq!(mid.progress, 65);

        tracker.on_artifacts_written(Path::new("output/run_x"));
        assert_eq!(tracker.current().stage, JobStage::Saving);

        tracker.on_job_complete(4, 1);
        let done = tracker.current();
        assert_eq!(done.stage, JobStage::Completed);
        assert_eq!(done.progress, 100);
    }

    #[test]
    fn status_tracker_records_failure_message() {
        let tracker = StatusTracker::new();
        tracker.on_job_failed("no browser");
        let s = tracker.current();
        assert_eq!(s.stage, JobStage::Failed);
        assert_eq!(s.message, "no browser");
    }

    #[tokio::test]
    async fn subscriber_is_notified() {
        let tracker = Arc::new(StatusTracker::new());
        let mut rx = tracker.subscribe();
        let t = Arc::clone(&tracker);
        tokio::spawn(async move { t.on_job_start("page.html") });
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().stage, JobStage::Loading);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn TranscriptionProgressCallback> = Arc::new(StatusTracker::new());
        cb.on_slice_start(1, 1);
        cb.on_slice_complete(1, 1, 5);
    }
}
