//! Browser acquisition: an ordered chain of launch strategies.
//!
//! Headless Chrome fails to start for mundane reasons (missing binary,
//! sandbox refusal, crashpad permissions, quarantined downloads). Rather than
//! nest fallbacks, every way of starting a browser is a [`LaunchStrategy`]
//! value and [`BrowserSession::acquire`] walks the list with one loop,
//! trying each strategy exactly once. The first success wins; it is not
//! remembered, so the next acquisition starts from the top again.
//!
//! ## Default chain
//!
//! ```text
//! chromium        auto-detected Chromium/Chrome, new headless mode
//! chrome          Google Chrome stable channel
//! headless-shell  chrome-headless-shell from the local browser cache (if present)
//! msedge, brave   other Chromium-family engines
//! ```
//!
//! The DevTools driver only speaks to Chromium-family engines, so the last
//! resorts are Edge and Brave rather than Firefox or WebKit.

use crate::config::{TranscriberConfig, Viewport};
use crate::error::{DriverError, TranscribeError};
use crate::pipeline::driver::{ChromePage, PageDriver, PageOptions};
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One concrete way of starting a headless browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchStrategy {
    /// Chromium located by the driver's own detection.
    Chromium,
    /// An installed Google Chrome release channel.
    Channel { channel: BrowserChannel },
    /// A `chrome-headless-shell` build.
    HeadlessShell { executable: PathBuf },
    /// Another Chromium-family browser.
    AlternateEngine { engine: AlternateEngine },
    /// A caller-supplied executable.
    Executable { path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserChannel {
    Chrome,
    ChromeBeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlternateEngine {
    Edge,
    Brave,
}

impl LaunchStrategy {
    pub fn label(&self) -> String {
        match self {
            LaunchStrategy::Chromium => "chromium".to_string(),
            LaunchStrategy::Channel { channel: BrowserChannel::Chrome } => "chrome".to_string(),
            LaunchStrategy::Channel { channel: BrowserChannel::ChromeBeta } => "chrome-beta".to_string(),
            LaunchStrategy::HeadlessShell { .. } => "headless-shell".to_string(),
            LaunchStrategy::AlternateEngine { engine: AlternateEngine::Edge } => "msedge".to_string(),
            LaunchStrategy::AlternateEngine { engine: AlternateEngine::Brave } => "brave".to_string(),
            LaunchStrategy::Executable { path } => format!("executable:{}", path.display()),
        }
    }

    /// Executable to start, `Ok(None)` when the driver should detect one.
    pub fn resolve_executable(&self) -> Result<Option<PathBuf>, DriverError> {
        let candidates = match self {
            LaunchStrategy::Chromium => return Ok(None),
            LaunchStrategy::HeadlessShell { executable } | LaunchStrategy::Executable { path: executable } => {
                vec![executable.clone()]
            }
            LaunchStrategy::Channel { channel } => channel_candidates(*channel),
            LaunchStrategy::AlternateEngine { engine } => engine_candidates(*engine),
        };
        candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .map(Some)
            .ok_or_else(|| DriverError::Launch(format!("{} executable not found", self.label())))
    }

    /// The headless shell predates the new headless mode flag.
    fn uses_new_headless(&self) -> bool {
        !matches!(self, LaunchStrategy::HeadlessShell { .. })
    }
}

fn channel_candidates(channel: BrowserChannel) -> Vec<PathBuf> {
    let paths: &[&str] = match channel {
        BrowserChannel::Chrome if cfg!(target_os = "macos") => {
            &["/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"]
        }
        BrowserChannel::Chrome if cfg!(target_os = "windows") => &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ],
        BrowserChannel::Chrome => &["/opt/google/chrome/chrome", "/usr/bin/google-chrome-stable", "/usr/bin/google-chrome"],
        BrowserChannel::ChromeBeta if cfg!(target_os = "macos") => {
            &["/Applications/Google Chrome Beta.app/Contents/MacOS/Google Chrome Beta"]
        }
        BrowserChannel::ChromeBeta if cfg!(target_os = "windows") => {
            &[r"C:\Program Files\Google\Chrome Beta\Application\chrome.exe"]
        }
        BrowserChannel::ChromeBeta => &["/opt/google/chrome-beta/chrome", "/usr/bin/google-chrome-beta"],
    };
    paths.iter().map(PathBuf::from).collect()
}

fn engine_candidates(engine: AlternateEngine) -> Vec<PathBuf> {
    let paths: &[&str] = match engine {
        AlternateEngine::Edge if cfg!(target_os = "macos") => {
            &["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"]
        }
        AlternateEngine::Edge if cfg!(target_os = "windows") => {
            &[r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe"]
        }
        AlternateEngine::Edge => &["/opt/microsoft/msedge/msedge", "/usr/bin/microsoft-edge"],
        AlternateEngine::Brave if cfg!(target_os = "macos") => {
            &["/Applications/Brave Browser.app/Contents/MacOS/Brave Browser"]
        }
        AlternateEngine::Brave if cfg!(target_os = "windows") => {
            &[r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe"]
        }
        AlternateEngine::Brave => &["/opt/brave.com/brave/brave", "/usr/bin/brave-browser"],
    };
    paths.iter().map(PathBuf::from).collect()
}

/// Relative locations of the shell binary inside a cached build directory.
const HEADLESS_SHELL_BINARIES: [&str; 7] = [
    "chrome-headless-shell-linux64/chrome-headless-shell",
    "chrome-linux/headless_shell",
    "chrome-headless-shell-mac-arm64/chrome-headless-shell",
    "chrome-headless-shell-mac-x64/chrome-headless-shell",
    "chrome-mac/headless_shell",
    "chrome-headless-shell-win64/chrome-headless-shell.exe",
    "chrome-win/headless_shell.exe",
];

const HEADLESS_SHELL_DIR_PREFIX: &str = "chromium_headless_shell-";

/// Newest headless-shell binary under `cache_dir`, if any.
///
/// Build directories are named `chromium_headless_shell-<revision>`; the
/// highest revision with a binary present wins.
pub fn find_headless_shell(cache_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(cache_dir).ok()?;
    let mut builds: Vec<(u64, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let revision = name.strip_prefix(HEADLESS_SHELL_DIR_PREFIX)?;
            Some((revision.parse::<u64>().unwrap_or(0), e.path()))
        })
        .collect();
    builds.sort_by(|a, b| b.0.cmp(&a.0));

    builds.iter().find_map(|(_, dir)| {
        HEADLESS_SHELL_BINARIES
            .iter()
            .map(|rel| dir.join(rel))
            .find(|p| p.is_file())
    })
}

/// The default launch chain. The headless shell is included only when a
/// build exists in `cache_dir`.
pub fn default_launch_strategies(cache_dir: Option<&Path>) -> Vec<LaunchStrategy> {
    let mut strategies = vec![
        LaunchStrategy::Chromium,
        LaunchStrategy::Channel {
            channel: BrowserChannel::Chrome,
        },
    ];
    if let Some(executable) = cache_dir.and_then(find_headless_shell) {
        strategies.push(LaunchStrategy::HeadlessShell { executable });
    }
    strategies.push(LaunchStrategy::AlternateEngine {
        engine: AlternateEngine::Edge,
    });
    strategies.push(LaunchStrategy::AlternateEngine {
        engine: AlternateEngine::Brave,
    });
    strategies
}

// ── Runtime home ─────────────────────────────────────────────────────────

/// Isolated HOME shared by every browser a job launches.
///
/// Each launch gets its own throw-away profile directory inside it, so
/// concurrent jobs and successive tiers never share cookies or storage.
#[derive(Debug, Clone)]
pub struct RuntimeHome {
    root: PathBuf,
    crash_dumps: PathBuf,
}

impl RuntimeHome {
    pub async fn prepare(root: impl Into<PathBuf>) -> Result<Self, TranscribeError> {
        let root = root.into();
        let crash_dumps = root.join("crashpad");
        tokio::fs::create_dir_all(&crash_dumps)
            .await
            .map_err(|e| TranscribeError::RuntimeHomeFailed {
                path: crash_dumps.clone(),
                source: e,
            })?;
        tokio::fs::create_dir_all(root.join("profiles"))
            .await
            .map_err(|e| TranscribeError::RuntimeHomeFailed {
                path: root.join("profiles"),
                source: e,
            })?;
        Ok(Self { root, crash_dumps })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn crash_dumps(&self) -> &Path {
        &self.crash_dumps
    }

    /// A fresh profile directory, removed when dropped.
    pub fn new_profile(&self) -> Result<TempDir, DriverError> {
        tempfile::Builder::new()
            .prefix("profile-")
            .tempdir_in(self.root.join("profiles"))
            .map_err(|e| DriverError::Launch(format!("profile directory: {e}")))
    }
}

fn default_runtime_home() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("lp-transcribe").join("browser-home"))
        .unwrap_or_else(|| std::env::temp_dir().join("lp-transcribe-browser-home"))
}

fn default_browser_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("ms-playwright"))
}

/// Remove the macOS download quarantine flag from browser builds, which
/// otherwise makes Gatekeeper refuse to start them. No-op elsewhere.
pub async fn clear_quarantine(paths: &[&Path]) {
    if !cfg!(target_os = "macos") {
        return;
    }
    for path in paths.iter().filter(|p| p.exists()) {
        let status = tokio::process::Command::new("xattr")
            .args(["-dr", "com.apple.quarantine"])
            .arg(path)
            .status()
            .await;
        match status {
            Ok(s) if s.success() => debug!("Cleared quarantine on {}", path.display()),
            Ok(s) => debug!("xattr exited with {} for {}", s, path.display()),
            Err(e) => debug!("xattr unavailable: {}", e),
        }
    }
}

// ── Launcher seam ────────────────────────────────────────────────────────

/// Starts a browser for one strategy.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    type Browser: BrowserHandle;

    async fn launch(
        &self,
        strategy: &LaunchStrategy,
        runtime: &RuntimeHome,
    ) -> Result<Self::Browser, DriverError>;
}

/// A running browser owned by exactly one job.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    type Page: PageDriver;

    async fn open_page(&self, options: &PageOptions) -> Result<Self::Page, DriverError>;

    /// Shut the browser down. Safe to call more than once.
    async fn close(&mut self);
}

/// Flags applied to every Chromium launch.
fn base_args(runtime: &RuntimeHome) -> Vec<String> {
    vec![
        "--disable-crash-reporter".to_string(),
        "--disable-features=CrashReporting".to_string(),
        format!("--crash-dumps-dir={}", runtime.crash_dumps().display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        "--hide-scrollbars".to_string(),
        "--mute-audio".to_string(),
    ]
}

/// Launches Chromium-family browsers over the DevTools protocol.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    launch_timeout: Duration,
    window: Viewport,
}

impl ChromiumLauncher {
    pub fn new(config: &TranscriberConfig) -> Self {
        Self {
            launch_timeout: Duration::from_secs(config.launch_timeout_secs),
            window: config.viewport,
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    type Browser = ChromiumBrowser;

    async fn launch(
        &self,
        strategy: &LaunchStrategy,
        runtime: &RuntimeHome,
    ) -> Result<ChromiumBrowser, DriverError> {
        let executable = strategy.resolve_executable()?;
        let profile = runtime.new_profile()?;

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .user_data_dir(profile.path())
            .window_size(self.window.width, self.window.height)
            .launch_timeout(self.launch_timeout)
            .request_timeout(self.launch_timeout)
            .env("HOME", runtime.root().to_string_lossy().to_string());
        if strategy.uses_new_headless() {
            builder = builder.new_headless_mode();
        }
        if let Some(exe) = &executable {
            builder = builder.chrome_executable(exe);
        }
        for arg in base_args(runtime) {
            builder = builder.arg(arg);
        }
        let config = builder.build().map_err(DriverError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler event error: {}", e);
                }
            }
        });

        Ok(ChromiumBrowser {
            browser,
            handler_task,
            closed: false,
            _profile: profile,
        })
    }
}

/// A launched Chromium process and its event-handler task.
pub struct ChromiumBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
    closed: bool,
    _profile: TempDir,
}

#[async_trait]
impl BrowserHandle for ChromiumBrowser {
    type Page = ChromePage;

    async fn open_page(&self, options: &PageOptions) -> Result<ChromePage, DriverError> {
        ChromePage::open(&self.browser, options).await
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.browser.close().await {
            debug!("Browser close failed: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Waiting for browser exit failed: {}", e);
        }
        self.handler_task.abort();
    }
}

impl Drop for ChromiumBrowser {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

// ── Session ──────────────────────────────────────────────────────────────

/// A browser together with the strategy that produced it.
pub struct AcquiredBrowser<B> {
    pub browser: B,
    pub strategy: LaunchStrategy,
}

/// Per-job browser acquisition over an ordered strategy list.
pub struct BrowserSession<'a, L: BrowserLauncher> {
    launcher: &'a L,
    strategies: Vec<LaunchStrategy>,
    runtime: RuntimeHome,
}

impl<'a, L: BrowserLauncher> BrowserSession<'a, L> {
    /// Prepare the runtime home and resolve the strategy list. Runs once,
    /// before the first launch attempt.
    pub async fn prepare(config: &TranscriberConfig, launcher: &'a L) -> Result<Self, TranscribeError> {
        let root = config.runtime_home.clone().unwrap_or_else(default_runtime_home);
        let runtime = RuntimeHome::prepare(root).await?;

        let cache_dir = config.browser_cache_dir.clone().or_else(default_browser_cache_dir);
        let mut quarantined: Vec<&Path> = vec![runtime.root()];
        if let Some(dir) = cache_dir.as_deref() {
            quarantined.push(dir);
        }
        clear_quarantine(&quarantined).await;

        let strategies = config
            .launch_strategies
            .clone()
            .unwrap_or_else(|| default_launch_strategies(cache_dir.as_deref()));
        debug!(
            "Launch chain: {}",
            strategies.iter().map(|s| s.label()).collect::<Vec<_>>().join(" → ")
        );

        Ok(Self {
            launcher,
            strategies,
            runtime,
        })
    }

    pub fn strategies(&self) -> &[LaunchStrategy] {
        &self.strategies
    }

    pub fn runtime(&self) -> &RuntimeHome {
        &self.runtime
    }

    /// Try each strategy once, in order; the first browser that starts wins.
    pub async fn acquire(&self) -> Result<AcquiredBrowser<L::Browser>, TranscribeError> {
        let total = self.strategies.len();
        let mut last: Option<(String, String)> = None;

        for (i, strategy) in self.strategies.iter().enumerate() {
            debug!("Launching browser via '{}' ({}/{})", strategy.label(), i + 1, total);
            match self.launcher.launch(strategy, &self.runtime).await {
                Ok(browser) => {
                    info!("Browser ready via '{}'", strategy.label());
                    return Ok(AcquiredBrowser {
                        browser,
                        strategy: strategy.clone(),
                    });
                }
                Err(e) => {
                    warn!("Launch strategy '{}' failed: {}", strategy.label(), e);
                    last = Some((strategy.label(), e.to_string()));
                }
            }
        }

        let (last_strategy, last_error) =
            last.unwrap_or_else(|| ("none".to_string(), "no launch strategies configured".to_string()));
        Err(TranscribeError::BrowserUnavailable {
            attempts: total,
            last_strategy,
            last_error,
        })
    }
}
