//! Configuration types for page capture and transcription.
//!
//! All job behaviour is controlled through [`TranscriberConfig`], built via
//! its [`TranscriberConfigBuilder`]. The config is created once, passed by
//! reference into every stage, and never mutated during a job; no stage
//! reads environment variables or other ambient state on its own.

use crate::error::TranscribeError;
use crate::pipeline::browser::LaunchStrategy;
use crate::pipeline::ocr::OcrBackend;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Desktop Chrome user agent presented by every browser tier and by the
/// static fetch.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36";

/// Referrer sent with navigations and static fetches.
pub const DEFAULT_REFERER: &str = "https://www.google.com/";

/// Configuration for a capture-and-transcription job.
///
/// Built via [`TranscriberConfig::builder()`] or using
/// [`TranscriberConfig::default()`].
///
/// # Example
/// ```rust
/// use lp_transcribe::TranscriberConfig;
///
/// let config = TranscriberConfig::builder()
///     .slice_height(1400)
///     .overlap(120)
///     .ocr_workers(3)
///     .output_root("output")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct TranscriberConfig {
    /// Height of each captured slice in CSS pixels. Default: 1400.
    ///
    /// Vision models read a 1400px band of a 1400px-wide page reliably;
    /// taller slices start to lose small print.
    pub slice_height: u32,

    /// Pixels shared by two adjacent slices. Must be `< slice_height`. Default: 120.
    ///
    /// A line of text cut by a slice boundary appears whole in at least one
    /// of the two slices; the stitcher removes the duplicate paragraph.
    pub overlap: u32,

    /// Browser viewport used while loading. Default: 1400×900.
    pub viewport: Viewport,

    /// User agent for every tab and the static fetch.
    pub user_agent: String,

    /// Directory under which each job creates its `run_*` directory. Default: `output`.
    pub output_root: PathBuf,

    /// Isolated HOME for launched browsers. Default: `<cache>/lp-transcribe/browser-home`.
    pub runtime_home: Option<PathBuf>,

    /// Local browser cache searched for headless-shell builds and cleared of
    /// quarantine attributes on macOS. Default: `<cache>/ms-playwright`.
    pub browser_cache_dir: Option<PathBuf>,

    /// Explicit launch strategies. If None, the default chain is used.
    pub launch_strategies: Option<Vec<LaunchStrategy>>,

    /// Per-strategy launch timeout in seconds. Default: 30.
    pub launch_timeout_secs: u64,

    /// Load escalation tiers, tried in order. Default: interactive,
    /// scripting-disabled, static-render.
    pub load_strategies: Vec<LoadStrategy>,

    /// Navigation timeout in seconds. Default: 60.
    ///
    /// Marketing pages with endless trackers never go network-idle; on
    /// timeout the loader proceeds with whatever has rendered.
    pub navigation_timeout_secs: u64,

    /// Upper bound for the network-idle heuristic after navigation. Default: 10.
    pub network_idle_timeout_secs: u64,

    /// Timeout for the static-render HTTP fetch. Default: 30.
    pub fetch_timeout_secs: u64,

    /// Timeout for one screenshot call. Default: 60.
    pub screenshot_timeout_secs: u64,

    /// Pauses used while scrolling and capturing.
    pub pauses: PauseTimings,

    /// Minimum number of parts for the segmented fallback capture. Default: 2.
    pub fallback_parts: u32,

    /// Collect `document.body.innerText` as a fallback transcript. Default: true.
    pub extract_page_text: bool,

    /// LLM model identifier, e.g. "gemini-2.0-flash", "gpt-4.1-nano".
    /// If None, a per-provider default is used.
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "anthropic").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed OCR backend. Takes precedence over every provider setting.
    pub ocr_backend: Option<Arc<dyn OcrBackend>>,

    /// Skip OCR entirely; every slice gets empty text. Default: false.
    pub disable_ocr: bool,

    /// Sampling temperature for the OCR completion. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate per slice. Default: 4096.
    pub max_tokens: usize,

    /// Maximum retry attempts on a failed OCR call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 1000.
    ///
    /// Doubles after each attempt: 1 s → 2 s → 4 s.
    pub retry_backoff_ms: u64,

    /// Per-OCR-call timeout in seconds. Default: 90.
    pub api_timeout_secs: u64,

    /// Concurrent OCR calls. Default: 3.
    pub ocr_workers: usize,

    /// Custom OCR instruction prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Paragraph-grouping heuristics used by the text stitcher.
    pub stitch: StitchPolicy,

    /// Keep `segments/*.png` after OCR. Default: false.
    pub keep_slice_images: bool,

    /// Write `website_transcription.md`. Default: true.
    pub write_markdown: bool,

    /// Write `website_transcription.txt`. Default: true.
    pub write_plain_text: bool,

    /// Write `transcript.json`. Default: true.
    pub write_json: bool,

    /// Optional progress callback receiving stage events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            slice_height: 1400,
            overlap: 120,
            viewport: Viewport::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            output_root: PathBuf::from("output"),
            runtime_home: None,
            browser_cache_dir: None,
            launch_strategies: None,
            launch_timeout_secs: 30,
            load_strategies: LoadStrategy::default_chain(),
            navigation_timeout_secs: 60,
            network_idle_timeout_secs: 10,
            fetch_timeout_secs: 30,
            screenshot_timeout_secs: 60,
            pauses: PauseTimings::default(),
            fallback_parts: 2,
            extract_page_text: true,
            model: None,
            provider_name: None,
            provider: None,
            ocr_backend: None,
            disable_ocr: false,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 1000,
            api_timeout_secs: 90,
            ocr_workers: 3,
            system_prompt: None,
            stitch: StitchPolicy::default(),
            keep_slice_images: false,
            write_markdown: true,
            write_plain_text: true,
            write_json: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for TranscriberConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriberConfig")
            .field("slice_height", &self.slice_height)
            .field("overlap", &self.overlap)
            .field("viewport", &self.viewport)
            .field("output_root", &self.output_root)
            .field("runtime_home", &self.runtime_home)
            .field("launch_strategies", &self.launch_strategies)
            .field("load_strategies", &self.load_strategies)
            .field("navigation_timeout_secs", &self.navigation_timeout_secs)
            .field("pauses", &self.pauses)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("ocr_backend", &self.ocr_backend.as_ref().map(|b| b.name().to_string()))
            .field("disable_ocr", &self.disable_ocr)
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .field("ocr_workers", &self.ocr_workers)
            .field("stitch", &self.stitch)
            .field("keep_slice_images", &self.keep_slice_images)
            .finish()
    }
}

impl TranscriberConfig {
    /// Create a new builder for `TranscriberConfig`.
    pub fn builder() -> TranscriberConfigBuilder {
        TranscriberConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`TranscriberConfig`].
#[derive(Debug)]
pub struct TranscriberConfigBuilder {
    config: TranscriberConfig,
}

impl TranscriberConfigBuilder {
    pub fn slice_height(mut self, px: u32) -> Self {
        self.config.slice_height = px;
        self
    }

    pub fn overlap(mut self, px: u32) -> Self {
        self.config.overlap = px;
        self
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.config.viewport = Viewport { width, height };
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn output_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_root = dir.into();
        self
    }

    pub fn runtime_home(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.runtime_home = Some(dir.into());
        self
    }

    pub fn browser_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.browser_cache_dir = Some(dir.into());
        self
    }

    pub fn launch_strategies(mut self, strategies: Vec<LaunchStrategy>) -> Self {
        self.config.launch_strategies = Some(strategies);
        self
    }

    pub fn launch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.launch_timeout_secs = secs.max(1);
        self
    }

    pub fn load_strategies(mut self, tiers: Vec<LoadStrategy>) -> Self {
        self.config.load_strategies = tiers;
        self
    }

    pub fn navigation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.navigation_timeout_secs = secs.max(1);
        self
    }

    pub fn network_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.config.network_idle_timeout_secs = secs;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs.max(1);
        self
    }

    pub fn screenshot_timeout_secs(mut self, secs: u64) -> Self {
        self.config.screenshot_timeout_secs = secs.max(1);
        self
    }

    pub fn pauses(mut self, pauses: PauseTimings) -> Self {
        self.config.pauses = pauses;
        self
    }

    pub fn fallback_parts(mut self, parts: u32) -> Self {
        self.config.fallback_parts = parts.max(1);
        self
    }

    pub fn extract_page_text(mut self, v: bool) -> Self {
        self.config.extract_page_text = v;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn ocr_backend(mut self, backend: Arc<dyn OcrBackend>) -> Self {
        self.config.ocr_backend = Some(backend);
        self
    }

    pub fn disable_ocr(mut self, v: bool) -> Self {
        self.config.disable_ocr = v;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn ocr_workers(mut self, n: usize) -> Self {
        self.config.ocr_workers = n.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn stitch_policy(mut self, policy: StitchPolicy) -> Self {
        self.config.stitch = policy;
        self
    }

    pub fn keep_slice_images(mut self, v: bool) -> Self {
        self.config.keep_slice_images = v;
        self
    }

    pub fn write_markdown(mut self, v: bool) -> Self {
        self.config.write_markdown = v;
        self
    }

    pub fn write_plain_text(mut self, v: bool) -> Self {
        self.config.write_plain_text = v;
        self
    }

    pub fn write_json(mut self, v: bool) -> Self {
        self.config.write_json = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<TranscriberConfig, TranscribeError> {
        let c = &self.config;
        if c.slice_height == 0 {
            return Err(TranscribeError::InvalidConfig(
                "slice height must be > 0".into(),
            ));
        }
        if c.overlap >= c.slice_height {
            return Err(TranscribeError::InvalidConfig(format!(
                "overlap ({}) must be smaller than slice height ({})",
                c.overlap, c.slice_height
            )));
        }
        if c.viewport.width == 0 || c.viewport.height == 0 {
            return Err(TranscribeError::InvalidConfig(format!(
                "viewport must be non-empty, got {}x{}",
                c.viewport.width, c.viewport.height
            )));
        }
        if c.load_strategies.is_empty() {
            return Err(TranscribeError::InvalidConfig(
                "at least one load strategy is required".into(),
            ));
        }
        if matches!(&c.launch_strategies, Some(list) if list.is_empty()) {
            return Err(TranscribeError::InvalidConfig(
                "launch strategy list is empty".into(),
            ));
        }
        if c.stitch.max_line_chars == 0 {
            return Err(TranscribeError::InvalidConfig(
                "stitch max_line_chars must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Value types ──────────────────────────────────────────────────────────

/// Browser viewport in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1400,
            height: 900,
        }
    }
}

/// Pauses inserted while the page settles, in milliseconds.
///
/// Lazy-loading widgets react to scroll position with a delay; these waits
/// give them time to fetch and paint before the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseTimings {
    /// Wait at each 25/50/75/100 % scroll checkpoint. Default: 1500.
    pub scroll_checkpoint_ms: u64,
    /// Wait after scrolling back to the top. Default: 1000.
    pub settle_ms: u64,
    /// Wait between scrolling to a slice and capturing it. Default: 300.
    pub slice_ms: u64,
    /// Wait before each segmented-fallback part. Default: 1500.
    pub fallback_part_ms: u64,
}

impl Default for PauseTimings {
    fn default() -> Self {
        Self {
            scroll_checkpoint_ms: 1500,
            settle_ms: 1000,
            slice_ms: 300,
            fallback_part_ms: 1500,
        }
    }
}

impl PauseTimings {
    /// All pauses zero. Used by tests and offline fixtures.
    pub fn none() -> Self {
        Self {
            scroll_checkpoint_ms: 0,
            settle_ms: 0,
            slice_ms: 0,
            fallback_part_ms: 0,
        }
    }
}

/// Paragraph-grouping heuristics for cleaning raw OCR text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StitchPolicy {
    /// Characters that close a paragraph when they end a line.
    pub terminal_marks: Vec<char>,
    /// A line longer than this (in chars) closes its paragraph. Default: 40.
    pub max_line_chars: usize,
}

impl Default for StitchPolicy {
    fn default() -> Self {
        Self {
            terminal_marks: vec!['。', '！', '？', '!', '?'],
            max_line_chars: 40,
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// One tier of the page-load escalation chain.
///
/// | Tier | Browser state | Document source |
/// |------|---------------|-----------------|
/// | `Interactive` | scripts on, anti-automation init script | navigation |
/// | `ScriptingDisabled` | scripts off | navigation |
/// | `StaticRender` | scripts on, anti-automation init script | plain HTTP GET (or disk), scripts stripped |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadStrategy {
    Interactive,
    ScriptingDisabled,
    StaticRender,
}

impl LoadStrategy {
    /// The default escalation order.
    pub fn default_chain() -> Vec<LoadStrategy> {
        vec![
            LoadStrategy::Interactive,
            LoadStrategy::ScriptingDisabled,
            LoadStrategy::StaticRender,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            LoadStrategy::Interactive => "interactive",
            LoadStrategy::ScriptingDisabled => "scripting-disabled",
            LoadStrategy::StaticRender => "static-render",
        }
    }

    /// Whether page scripts run in this tier. Static render keeps them on:
    /// its markup has no `<script>` left, and inline handlers and the
    /// document's own layout code still need the engine.
    pub fn javascript_enabled(&self) -> bool {
        !matches!(self, LoadStrategy::ScriptingDisabled)
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = TranscriberConfig::default();
        assert_eq!(c.slice_height, 1400);
        assert_eq!(c.overlap, 120);
        assert_eq!(c.viewport, Viewport { width: 1400, height: 900 });
        assert_eq!(c.ocr_workers, 3);
        assert_eq!(c.load_strategies.len(), 3);
        assert!(!c.keep_slice_images);
    }

    #[test]
    fn overlap_must_be_smaller_than_slice() {
        let err = TranscriberConfig::builder()
            .slice_height(500)
            .overlap(500)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("overlap"), "got: {err}");
    }

    #[test]
    fn zero_slice_height_rejected() {
        assert!(TranscriberConfig::builder().slice_height(0).overlap(0).build().is_err());
    }

    #[test]
    fn empty_load_chain_rejected() {
        assert!(TranscriberConfig::builder().load_strategies(vec![]).build().is_err());
    }

    #[test]
    fn empty_launch_chain_rejected() {
        assert!(TranscriberConfig::builder().launch_strategies(vec![]).build().is_err());
    }

    #[test]
    fn workers_clamped_to_one() {
        let c = TranscriberConfig::builder().ocr_workers(0).build().unwrap();
        assert_eq!(c.ocr_workers, 1);
    }

    #[test]
    fn load_strategy_labels() {
        assert_eq!(LoadStrategy::ScriptingDisabled.to_string(), "scripting-disabled");
        assert!(LoadStrategy::Interactive.javascript_enabled());
        assert!(!LoadStrategy::ScriptingDisabled.javascript_enabled());
        assert!(LoadStrategy::StaticRender.javascript_enabled());
        let json = serde_json::to_string(&LoadStrategy::StaticRender).unwrap();
        assert_eq!(json, "\"static-render\"");
    }

    #[test]
    fn debug_hides_provider() {
        let c = TranscriberConfig::default();
        let dbg = format!("{:?}", c);
        assert!(dbg.contains("slice_height"));
    }
}
