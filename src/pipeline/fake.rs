//! In-memory browser, launcher and page used by unit tests.

use crate::config::Viewport;
use crate::error::DriverError;
use crate::pipeline::browser::{BrowserHandle, BrowserLauncher, LaunchStrategy, RuntimeHome};
use crate::pipeline::driver::{Clip, PageDriver, PageOptions};
use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A page of fixed height that renders solid PNGs of the requested size.
pub struct FakePage {
    height: u32,
    viewport: Mutex<Viewport>,
    title: Option<String>,
    attributes: HashMap<(String, String), String>,
    text: Option<String>,
    navigate_error: Option<DriverError>,
    navigate_delay: Duration,
    idle: bool,
    screenshot_failures: AtomicUsize,
    pub scrolls: Mutex<Vec<u32>>,
    pub viewports_set: Mutex<Vec<Viewport>>,
    pub shots: Mutex<Vec<Clip>>,
    pub content: Mutex<Option<String>>,
    pub navigated: Mutex<Vec<String>>,
    pub closed: AtomicBool,
}

impl FakePage {
    pub fn new(height: u32, viewport: Viewport) -> Self {
        Self {
            height,
            viewport: Mutex::new(viewport),
            title: None,
            attributes: HashMap::new(),
            text: None,
            navigate_error: None,
            navigate_delay: Duration::ZERO,
            idle: true,
            screenshot_failures: AtomicUsize::new(0),
            scrolls: Mutex::new(Vec::new()),
            viewports_set: Mutex::new(Vec::new()),
            shots: Mutex::new(Vec::new()),
            content: Mutex::new(None),
            navigated: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn with_attribute(mut self, selector: &str, attribute: &str, value: &str) -> Self {
        self.attributes
            .insert((selector.to_string(), attribute.to_string()), value.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn failing_navigation(mut self, error: DriverError) -> Self {
        self.navigate_error = Some(error);
        self
    }

    pub fn slow_navigation(mut self, delay: Duration) -> Self {
        self.navigate_delay = delay;
        self
    }

    pub fn never_idle(mut self) -> Self {
        self.idle = false;
        self
    }

    /// The first `n` screenshot calls fail.
    pub fn failing_screenshots(self, n: usize) -> Self {
        self.screenshot_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn scroll_log(&self) -> Vec<u32> {
        self.scrolls.lock().unwrap().clone()
    }

    pub fn shot_log(&self) -> Vec<Clip> {
        self.shots.lock().unwrap().clone()
    }

    fn current_viewport(&self) -> Viewport {
        *self.viewport.lock().unwrap()
    }
}

pub fn solid_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([210, 210, 210]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

#[async_trait]
impl PageDriver for FakePage {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.navigated.lock().unwrap().push(url.to_string());
        if !self.navigate_delay.is_zero() {
            tokio::time::sleep(self.navigate_delay).await;
        }
        match &self.navigate_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> bool {
        self.idle
    }

    async fn set_content(&self, html: &str) -> Result<(), DriverError> {
        *self.content.lock().unwrap() = Some(html.to_string());
        Ok(())
    }

    async fn document_height(&self) -> Result<u32, DriverError> {
        Ok(self.height)
    }

    async fn viewport(&self) -> Result<Viewport, DriverError> {
        Ok(self.current_viewport())
    }

    async fn set_viewport(&self, viewport: Viewport) -> Result<(), DriverError> {
        *self.viewport.lock().unwrap() = viewport;
        self.viewports_set.lock().unwrap().push(viewport);
        Ok(())
    }

    async fn scroll_to(&self, y: u32, _smooth: bool) -> Result<(), DriverError> {
        self.scrolls.lock().unwrap().push(y);
        Ok(())
    }

    async fn title(&self) -> Option<String> {
        self.title.clone()
    }

    async fn query_attribute(&self, selector: &str, attribute: &str) -> Option<String> {
        self.attributes
            .get(&(selector.to_string(), attribute.to_string()))
            .cloned()
    }

    async fn visible_text(&self) -> Option<String> {
        self.text.clone()
    }

    async fn screenshot(&self, clip: Clip) -> Result<Vec<u8>, DriverError> {
        let remaining = self.screenshot_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.screenshot_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DriverError::Cdp("screenshot refused".into()));
        }
        self.shots.lock().unwrap().push(clip);
        Ok(solid_png(clip.width, clip.height))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

type PageFactory = Arc<dyn Fn(&PageOptions) -> FakePage + Send + Sync>;

/// Launcher whose strategies fail by label and whose browsers hand out
/// pages built by a factory.
pub struct FakeLauncher {
    failing: HashSet<String>,
    attempts: Mutex<Vec<String>>,
    factory: PageFactory,
    pub opened: Arc<Mutex<Vec<PageOptions>>>,
}

impl FakeLauncher {
    pub fn failing(labels: &[&str]) -> Self {
        Self::with_pages(labels, |opts| FakePage::new(1000, opts.viewport))
    }

    pub fn with_pages(
        labels: &[&str],
        factory: impl Fn(&PageOptions) -> FakePage + Send + Sync + 'static,
    ) -> Self {
        Self {
            failing: labels.iter().map(|s| s.to_string()).collect(),
            attempts: Mutex::new(Vec::new()),
            factory: Arc::new(factory),
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn opened_pages(&self) -> Vec<PageOptions> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    type Browser = FakeBrowser;

    async fn launch(
        &self,
        strategy: &LaunchStrategy,
        _runtime: &RuntimeHome,
    ) -> Result<FakeBrowser, DriverError> {
        let label = strategy.label();
        self.attempts.lock().unwrap().push(label.clone());
        if self.failing.contains(&label) {
            return Err(DriverError::Launch(format!("{label} refused to start")));
        }
        Ok(FakeBrowser {
            factory: Arc::clone(&self.factory),
            opened: Arc::clone(&self.opened),
            closed: false,
        })
    }
}

pub struct FakeBrowser {
    factory: PageFactory,
    opened: Arc<Mutex<Vec<PageOptions>>>,
    pub closed: bool,
}

#[async_trait]
impl BrowserHandle for FakeBrowser {
    type Page = FakePage;

    async fn open_page(&self, options: &PageOptions) -> Result<FakePage, DriverError> {
        self.opened.lock().unwrap().push(options.clone());
        Ok((self.factory)(options))
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
