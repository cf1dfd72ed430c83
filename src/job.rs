//! Eager (whole-page) transcription entry points.
//!
//! A [`TranscriptionJob`] runs one target through the full pipeline and
//! returns only when the transcript and its reports exist:
//!
//! ```text
//!  for each load tier (interactive → scripting-disabled → static-render):
//!      acquire browser ─► open tab ─► load ─► capture ─► close browser
//!      └─ first tier that captures wins; failures escalate
//!
//!  OCR (worker pool) ─► stitch ─► reports ─► slice cleanup
//! ```
//!
//! The browser is closed before OCR starts; slice images on disk are all
//! the later stages need.

use crate::config::{LoadStrategy, TranscriberConfig};
use crate::error::TranscribeError;
use crate::output::{CaptureArtifacts, Transcript, TranscriptStats};
use crate::pipeline::browser::{
    AcquiredBrowser, BrowserHandle, BrowserLauncher, BrowserSession, ChromiumLauncher,
};
use crate::pipeline::capture::{CaptureEngine, CaptureOutput};
use crate::pipeline::driver::{PageDriver, PageOptions, ANTI_AUTOMATION_SCRIPT};
use crate::pipeline::loader::{LoadedPage, PageLoader};
use crate::pipeline::ocr::OcrOrchestrator;
use crate::pipeline::stitch::TextStitcher;
use crate::pipeline::target::{fetch_static_document, CaptureTarget};
use crate::report;
use chrono::Utc;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// What one successful load tier produced.
struct CapturedPage {
    launch_strategy: String,
    load_strategy: LoadStrategy,
    loaded: LoadedPage,
    capture: CaptureOutput,
    load_duration_ms: u64,
    capture_duration_ms: u64,
}

/// One capture-and-transcription run over a single target.
///
/// The launcher is a type parameter so tests can drive the whole pipeline
/// against in-memory browsers.
pub struct TranscriptionJob<L: BrowserLauncher = ChromiumLauncher> {
    config: TranscriberConfig,
    launcher: L,
    ocr: OcrOrchestrator,
}

impl TranscriptionJob<ChromiumLauncher> {
    /// A job that launches real Chromium-family browsers.
    pub fn new(config: TranscriberConfig) -> Self {
        let launcher = ChromiumLauncher::new(&config);
        Self::with_launcher(config, launcher)
    }
}

impl<L: BrowserLauncher> TranscriptionJob<L> {
    pub fn with_launcher(config: TranscriberConfig, launcher: L) -> Self {
        let ocr = OcrOrchestrator::new(&config);
        Self {
            config,
            launcher,
            ocr,
        }
    }

    pub fn config(&self) -> &TranscriberConfig {
        &self.config
    }

    /// Run the pipeline for `target`.
    ///
    /// # Returns
    /// `Ok(Transcript)` even when some or all slices failed OCR; check
    /// [`Transcript::failed_slices`] and `text_source`.
    ///
    /// # Errors
    /// Only fatal conditions: no browser could be started, every load tier
    /// failed, nothing was captured, or a report could not be written.
    pub async fn run(&self, target: &CaptureTarget) -> Result<Transcript, TranscribeError> {
        let result = self.run_inner(target).await;
        if let Some(cb) = &self.config.progress_callback {
            match &result {
                Ok(t) => cb.on_job_complete(t.slices.len(), t.failed_slices().count()),
                Err(e) => cb.on_job_failed(&e.to_string()),
            }
        }
        result
    }

    async fn run_inner(&self, target: &CaptureTarget) -> Result<Transcript, TranscribeError> {
        let total_start = Instant::now();
        let config = &self.config;
        info!("Starting transcription: {}", target);
        if let Some(cb) = &config.progress_callback {
            cb.on_job_start(&target.to_string());
        }

        // ── Step 1: Run directory ────────────────────────────────────────
        let run_id = new_run_id();
        let run_dir = config.output_root.join(&run_id);
        tokio::fs::create_dir_all(&run_dir)
            .await
            .map_err(|e| TranscribeError::ArtifactWriteFailed {
                path: run_dir.clone(),
                source: e,
            })?;

        // ── Step 2: Load and capture, escalating through the tiers ──────
        let session = BrowserSession::prepare(config, &self.launcher).await?;
        let captured = self.load_and_capture(&session, target, &run_dir).await?;
        let slices = &captured.capture.slices;

        // ── Step 3: OCR ──────────────────────────────────────────────────
        let ocr_start = Instant::now();
        let results = self.ocr.transcribe(slices).await;
        let ocr_duration_ms = ocr_start.elapsed().as_millis() as u64;
        let failed = results.iter().filter(|r| r.error.is_some()).count();
        if let Some(cb) = &config.progress_callback {
            cb.on_ocr_complete(results.len() - failed, failed);
        }

        // ── Step 4: Stitch ───────────────────────────────────────────────
        let stitcher = TextStitcher::new(config.stitch.clone());
        let (combined_text, text_source) =
            stitcher.combine_or_fallback(&results, captured.loaded.page_text.as_deref());
        info!(
            "Combined text: {} chars from {:?}",
            combined_text.chars().count(),
            text_source
        );

        // ── Step 5: Slice cleanup ────────────────────────────────────────
        let slice_images_retained =
            config.keep_slice_images || !report::remove_slice_images(&run_dir).await;

        // ── Step 6: Assemble and write reports ───────────────────────────
        let stats = TranscriptStats {
            page_height: captured.capture.page_height,
            slice_height: config.slice_height,
            overlap: config.overlap,
            slice_count: results.len(),
            ocr_failed_slices: failed,
            total_input_tokens: results.iter().map(|r| r.input_tokens as u64).sum(),
            total_output_tokens: results.iter().map(|r| r.output_tokens as u64).sum(),
            load_duration_ms: captured.load_duration_ms,
            capture_duration_ms: captured.capture_duration_ms,
            ocr_duration_ms,
            total_duration_ms: 0,
        };

        let mut transcript = Transcript {
            run_id,
            target: target.clone(),
            source_url: target.navigation_url()?,
            created_at: Utc::now(),
            metadata: captured.loaded.metadata,
            page_text: captured.loaded.page_text,
            artifacts: CaptureArtifacts {
                run_dir: run_dir.clone(),
                merged_image: captured.capture.merged_image.clone(),
                slice_images: slices.iter().map(|s| s.path.clone()).collect(),
                slice_images_retained,
                markdown: None,
                plain_text: None,
                json: None,
            },
            slices: results,
            combined_text,
            text_source,
            launch_strategy: captured.launch_strategy,
            load_strategy: captured.load_strategy,
            capture_method: captured.capture.method,
            stats,
        };
        transcript.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        report::write_artifacts(&mut transcript, config).await?;
        if let Some(cb) = &config.progress_callback {
            cb.on_artifacts_written(&run_dir);
        }

        info!(
            "Transcription complete: {} slices ({} failed), {}ms total, saved to {}",
            transcript.stats.slice_count,
            failed,
            transcript.stats.total_duration_ms,
            run_dir.display()
        );
        Ok(transcript)
    }

    /// Walk the load tiers until one produces a capture.
    ///
    /// Every tier gets a freshly acquired browser. Running out of launch
    /// strategies or failing to write to the run directory ends the walk
    /// immediately; anything else escalates to the next tier.
    async fn load_and_capture(
        &self,
        session: &BrowserSession<'_, L>,
        target: &CaptureTarget,
        run_dir: &Path,
    ) -> Result<CapturedPage, TranscribeError> {
        let mut first_error: Option<String> = None;
        let mut last: Option<(LoadStrategy, String)> = None;

        for &tier in &self.config.load_strategies {
            match self.attempt_tier(session, tier, target, run_dir).await {
                Ok(captured) => return Ok(captured),
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    let msg = e.to_string();
                    warn!("Load strategy '{}' failed: {}", tier, msg);
                    if let Some(cb) = &self.config.progress_callback {
                        cb.on_load_strategy_failed(tier, &msg);
                    }
                    first_error.get_or_insert_with(|| msg.clone());
                    last = Some((tier, msg));
                }
            }
        }

        let (last_strategy, last_error) = last.unwrap_or((
            LoadStrategy::Interactive,
            "no load strategies configured".to_string(),
        ));
        Err(TranscribeError::PageLoadFailed {
            last_strategy,
            last_error,
            first_error: first_error.unwrap_or_default(),
        })
    }

    async fn attempt_tier(
        &self,
        session: &BrowserSession<'_, L>,
        tier: LoadStrategy,
        target: &CaptureTarget,
        run_dir: &Path,
    ) -> Result<CapturedPage, TranscribeError> {
        // Static render needs the markup before any browser is started.
        let markup = match tier {
            LoadStrategy::StaticRender => Some(
                fetch_static_document(target, &self.config.user_agent, self.config.fetch_timeout_secs)
                    .await?,
            ),
            _ => None,
        };

        let AcquiredBrowser {
            mut browser,
            strategy,
        } = session.acquire().await?;
        let launch_strategy = strategy.label();
        if let Some(cb) = &self.config.progress_callback {
            cb.on_browser_ready(&launch_strategy);
        }

        let options = PageOptions {
            viewport: self.config.viewport,
            user_agent: self.config.user_agent.clone(),
            javascript_enabled: tier.javascript_enabled(),
            init_script: tier.javascript_enabled().then_some(ANTI_AUTOMATION_SCRIPT),
        };

        let result = match browser.open_page(&options).await {
            Ok(page) => {
                let result = self
                    .load_and_capture_on(&page, tier, target, markup.as_ref().map(|d| d.html.as_str()), run_dir)
                    .await;
                page.close().await;
                result
            }
            Err(e) => Err(e.into()),
        };
        browser.close().await;

        let (loaded, capture, load_duration_ms, capture_duration_ms) = result?;
        Ok(CapturedPage {
            launch_strategy,
            load_strategy: tier,
            loaded,
            capture,
            load_duration_ms,
            capture_duration_ms,
        })
    }

    async fn load_and_capture_on<P: PageDriver>(
        &self,
        page: &P,
        tier: LoadStrategy,
        target: &CaptureTarget,
        markup: Option<&str>,
        run_dir: &Path,
    ) -> Result<(LoadedPage, CaptureOutput, u64, u64), TranscribeError> {
        let loader = PageLoader::new(&self.config);

        let load_start = Instant::now();
        let loaded = match markup {
            Some(html) => loader.load_markup(page, html).await?,
            None => loader.load(page, target).await?,
        };
        let load_duration_ms = load_start.elapsed().as_millis() as u64;
        info!("Page loaded via '{}' in {}ms", tier, load_duration_ms);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_page_loaded(tier);
        }

        let capture_start = Instant::now();
        let capture = CaptureEngine::new(&self.config).capture(page, run_dir).await?;
        let capture_duration_ms = capture_start.elapsed().as_millis() as u64;
        if let Some(cb) = &self.config.progress_callback {
            cb.on_slices_captured(capture.slices.len(), capture.method);
        }

        Ok((loaded, capture, load_duration_ms, capture_duration_ms))
    }
}

/// Errors no later load tier can fix.
fn is_fatal(e: &TranscribeError) -> bool {
    matches!(
        e,
        TranscribeError::BrowserUnavailable { .. }
            | TranscribeError::RuntimeHomeFailed { .. }
            | TranscribeError::ArtifactWriteFailed { .. }
            | TranscribeError::InvalidConfig(_)
            | TranscribeError::InvalidTarget { .. }
    )
}

/// `run_<YYYYmmdd_HHMMSS>_<8 hex chars>`.
fn new_run_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("run_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &id[..8])
}

// ── Convenience entry points ─────────────────────────────────────────────

/// Transcribe a URL or local page.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `input` — HTTP/HTTPS URL, local HTML file, or directory containing
///   `index.html`
/// * `config` — job configuration
///
/// # Example
/// ```rust,no_run
/// use lp_transcribe::{transcribe, TranscriberConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TranscriberConfig::builder().output_root("output").build()?;
/// let transcript = transcribe("https://example.com", &config).await?;
/// println!("{}", transcript.combined_text);
/// # Ok(())
/// # }
/// ```
pub async fn transcribe(
    input: impl AsRef<str>,
    config: &TranscriberConfig,
) -> Result<Transcript, TranscribeError> {
    let target = CaptureTarget::resolve(input.as_ref())?;
    TranscriptionJob::new(config.clone()).run(&target).await
}

/// Synchronous wrapper around [`transcribe`].
///
/// Creates a temporary tokio runtime internally.
pub fn transcribe_sync(
    input: impl AsRef<str>,
    config: &TranscriberConfig,
) -> Result<Transcript, TranscribeError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TranscribeError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(transcribe(input, config))
}

/// Transcribe markup held in memory.
///
/// The HTML is written to a managed temporary directory as `index.html`
/// and transcribed as a local page; relative assets will not resolve.
pub async fn transcribe_html(
    html: &str,
    config: &TranscriberConfig,
) -> Result<Transcript, TranscribeError> {
    let dir = tempfile::tempdir().map_err(|e| TranscribeError::Internal(format!("tempdir: {e}")))?;
    let path = dir.path().join("index.html");
    std::fs::File::create(&path)
        .and_then(|mut f| f.write_all(html.as_bytes()))
        .map_err(|e| TranscribeError::Internal(format!("tempfile write: {e}")))?;
    let target = CaptureTarget::local(dir.path())?;
    // `dir` is removed when this function returns
    TranscriptionJob::new(config.clone()).run(&target).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PauseTimings;
    use crate::error::{DriverError, SliceError};
    use crate::output::{CaptureMethod, TextSource};
    use crate::pipeline::browser::LaunchStrategy;
    use crate::pipeline::fake::{FakeLauncher, FakePage};
    use crate::pipeline::ocr::{OcrBackend, OcrRequest, OcrResponse};
    use crate::progress::{JobStage, StatusTracker, TranscriptionProgressCallback};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EchoBackend;

    #[async_trait]
    impl OcrBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        async fn recognize(&self, request: OcrRequest) -> Result<OcrResponse, SliceError> {
            // Neighbouring slices repeat the boundary paragraph.
            Ok(OcrResponse {
                text: format!("Section {}!\nSection {}!", request.slice, request.slice + 1),
                retries: 0,
                input_tokens: 10,
                output_tokens: 5,
            })
        }
    }

    fn base_config(dir: &Path) -> crate::config::TranscriberConfigBuilder {
        TranscriberConfig::builder()
            .output_root(dir.join("output"))
            .runtime_home(dir.join("home"))
            .browser_cache_dir(dir.join("cache"))
            .launch_strategies(vec![LaunchStrategy::Chromium])
            .viewport(64, 900)
            .pauses(PauseTimings::none())
            .network_idle_timeout_secs(0)
    }

    fn page_with_text(opts: &PageOptions) -> FakePage {
        FakePage::new(3000, opts.viewport)
            .with_title("Clinic LP")
            .with_attribute("meta[name=\"description\"]", "content", "Straight teeth fast")
            .with_text("Hero headline\n\n\n\nBook a consultation")
    }

    #[tokio::test]
    async fn ocr_unavailable_falls_back_to_page_text() {
        let dir = tempfile::tempdir().unwrap();
        let config = base_config(dir.path()).disable_ocr(true).build().unwrap();
        let launcher = FakeLauncher::with_pages(&[], page_with_text);
        let job = TranscriptionJob::with_launcher(config, launcher);
        let target = CaptureTarget::Remote {
            url: "https://example.com/lp".into(),
        };

        let t = job.run(&target).await.unwrap();

        assert_eq!(t.slices.len(), 3);
        assert!(t.slices.iter().all(|s| s.raw_text.is_empty() && s.clean_text.is_empty()));
        assert_eq!(t.text_source, TextSource::PageText);
        assert_eq!(t.combined_text, "Hero headline\n\nBook a consultation");
        assert_eq!(t.metadata.title.as_deref(), Some("Clinic LP"));
        assert_eq!(t.metadata.description.as_deref(), Some("Straight teeth fast"));
        assert_eq!(t.load_strategy, LoadStrategy::Interactive);
        assert_eq!(t.capture_method, CaptureMethod::Sliced);
        assert_eq!(t.launch_strategy, "chromium");
    }

    #[tokio::test]
    async fn ocr_text_is_stitched_and_reports_written() {
        let dir = tempfile::tempdir().unwrap();
        let config = base_config(dir.path())
            .ocr_backend(Arc::new(EchoBackend))
            .build()
            .unwrap();
        let job = TranscriptionJob::with_launcher(config, FakeLauncher::with_pages(&[], page_with_text));
        let target = CaptureTarget::Remote {
            url: "https://example.com/lp".into(),
        };

        let t = job.run(&target).await.unwrap();

        assert_eq!(t.text_source, TextSource::Ocr);
        assert_eq!(
            t.combined_text,
            "Section 1!\n\nSection 2!\n\nSection 3!\n\nSection 4!"
        );
        assert_eq!(t.stats.total_input_tokens, 30);

        let run_dir = &t.artifacts.run_dir;
        assert!(run_dir.file_name().unwrap().to_string_lossy().starts_with("run_"));
        assert!(t.artifacts.merged_image.is_file());
        assert!(t.artifacts.markdown.as_ref().unwrap().is_file());
        assert!(t.artifacts.plain_text.as_ref().unwrap().is_file());
        assert!(t.artifacts.json.as_ref().unwrap().is_file());
        // Slice images are removed after OCR by default.
        assert!(!t.artifacts.slice_images_retained);
        assert!(t.artifacts.slice_images.iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn keep_slice_images_retains_segments() {
        let dir = tempfile::tempdir().unwrap();
        let config = base_config(dir.path())
            .disable_ocr(true)
            .keep_slice_images(true)
            .build()
            .unwrap();
        let job = TranscriptionJob::with_launcher(config, FakeLauncher::with_pages(&[], page_with_text));
        let t = job
            .run(&CaptureTarget::Remote {
                url: "https://example.com".into(),
            })
            .await
            .unwrap();
        assert!(t.artifacts.slice_images_retained);
        assert!(t.artifacts.slice_images.iter().all(|p| p.is_file()));
    }

    #[tokio::test]
    async fn failed_interactive_load_escalates_to_scripting_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = base_config(dir.path()).disable_ocr(true).build().unwrap();
        let launcher = FakeLauncher::with_pages(&[], |opts| {
            let page = page_with_text(opts);
            if opts.javascript_enabled {
                page.failing_navigation(DriverError::Cdp("net::ERR_CONNECTION_RESET".into()))
            } else {
                page
            }
        });
        let job = TranscriptionJob::with_launcher(config, launcher);

        let t = job
            .run(&CaptureTarget::Remote {
                url: "https://example.com".into(),
            })
            .await
            .unwrap();

        assert_eq!(t.load_strategy, LoadStrategy::ScriptingDisabled);
        let opened = job.launcher.opened_pages();
        assert_eq!(opened.len(), 2);
        assert!(opened[0].javascript_enabled && opened[0].init_script.is_some());
        assert!(!opened[1].javascript_enabled && opened[1].init_script.is_none());
        assert_eq!(job.launcher.attempts(), vec!["chromium", "chromium"]);
    }

    #[tokio::test]
    async fn local_target_reaches_static_render() {
        let dir = tempfile::tempdir().unwrap();
        let site = dir.path().join("site");
        std::fs::create_dir_all(&site).unwrap();
        std::fs::write(
            site.join("index.html"),
            "<html><head><title>Local</title></head><body><script>x()</script>Hi</body></html>",
        )
        .unwrap();

        let config = base_config(dir.path()).disable_ocr(true).build().unwrap();
        let launcher = FakeLauncher::with_pages(&[], |opts| {
            FakePage::new(1200, opts.viewport)
                .failing_navigation(DriverError::Cdp("navigation refused".into()))
        });
        let job = TranscriptionJob::with_launcher(config, launcher);
        let target = CaptureTarget::local(&site).unwrap();

        let t = job.run(&target).await.unwrap();
        assert_eq!(t.load_strategy, LoadStrategy::StaticRender);
        assert_eq!(t.text_source, TextSource::Empty);
        assert!(t.combined_text.is_empty());
        assert_eq!(t.slices.len(), 1);

        let opened = job.launcher.opened_pages();
        let static_page = opened.last().unwrap();
        assert!(static_page.javascript_enabled && static_page.init_script.is_some());
        assert!(opened.iter().any(|o| !o.javascript_enabled));
    }

    #[tokio::test]
    async fn every_tier_failing_reports_first_and_last_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = base_config(dir.path())
            .disable_ocr(true)
            .load_strategies(vec![LoadStrategy::Interactive, LoadStrategy::ScriptingDisabled])
            .build()
            .unwrap();
        let launcher = FakeLauncher::with_pages(&[], |opts| {
            let reason = if opts.javascript_enabled { "first cause" } else { "last cause" };
            FakePage::new(1000, opts.viewport).failing_navigation(DriverError::Cdp(reason.into()))
        });
        let tracker = Arc::new(StatusTracker::new());
        let config = TranscriberConfig {
            progress_callback: Some(tracker.clone() as Arc<dyn TranscriptionProgressCallback>),
            ..config
        };
        let job = TranscriptionJob::with_launcher(config, launcher);

        let err = job
            .run(&CaptureTarget::Remote {
                url: "https://example.com".into(),
            })
            .await
            .unwrap_err();

        match err {
            TranscribeError::PageLoadFailed {
                last_strategy,
                last_error,
                first_error,
            } => {
                assert_eq!(last_strategy, LoadStrategy::ScriptingDisabled);
                assert!(last_error.contains("last cause"));
                assert!(first_error.contains("first cause"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tracker.current().stage, JobStage::Failed);
    }

    #[tokio::test]
    async fn no_browser_is_fatal_without_escalation() {
        let dir = tempfile::tempdir().unwrap();
        let config = base_config(dir.path()).disable_ocr(true).build().unwrap();
        let job = TranscriptionJob::with_launcher(config, FakeLauncher::failing(&["chromium"]));

        let err = job
            .run(&CaptureTarget::Remote {
                url: "https://example.com".into(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TranscribeError::BrowserUnavailable { attempts: 1, .. }));
        assert_eq!(job.launcher.attempts(), vec!["chromium"]);
    }

    #[tokio::test]
    async fn status_tracker_reaches_completed() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(StatusTracker::new());
        let config = base_config(dir.path())
            .ocr_backend(Arc::new(EchoBackend))
            .progress_callback(tracker.clone() as Arc<dyn TranscriptionProgressCallback>)
            .build()
            .unwrap();
        let job = TranscriptionJob::with_launcher(config, FakeLauncher::with_pages(&[], page_with_text));
        job.run(&CaptureTarget::Remote {
            url: "https://example.com".into(),
        })
        .await
        .unwrap();

        let status = tracker.current();
        assert_eq!(status.stage, JobStage::Completed);
        assert_eq!(status.progress, 100);
        assert_eq!(status.slices_done, 3);
    }

    #[test]
    fn run_id_has_timestamp_and_short_id() {
        let id = new_run_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts[0], "run");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
    }
}
