//! Page driver: the narrow set of tab operations the loader and the capture
//! engine need, and its Chrome DevTools implementation.
//!
//! Stages talk to a [`PageDriver`], never to chromiumoxide directly, so the
//! scroll/slice/merge arithmetic can be exercised against an in-memory page.
//! [`ChromePage`] is the production implementation; every method maps to one
//! CDP command or one `Runtime.evaluate`.

use crate::config::{Viewport, DEFAULT_REFERER};
use crate::error::DriverError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetScriptExecutionDisabledParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, CaptureScreenshotParams,
    NavigateParams, SetBypassCspParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, Page};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// A rectangle in document coordinates (CSS pixels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clip {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// How a fresh tab is prepared before anything is loaded into it.
#[derive(Debug, Clone)]
pub struct PageOptions {
    pub viewport: Viewport,
    pub user_agent: String,
    pub javascript_enabled: bool,
    /// Script evaluated in every new document, before page scripts run.
    pub init_script: Option<&'static str>,
}

/// Neutralises pop-up and self-closing tricks and hides the automation flag.
pub const ANTI_AUTOMATION_SCRIPT: &str = r#"(() => {
  window.close = () => {};
  window.open = () => null;
  try {
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
  } catch (_) {}
})();"#;

/// Tab operations used by the pipeline.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Start navigation and wait for the load event. A load event that
    /// never arrives is reported as [`DriverError::Timeout`].
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Wait until the document is complete and the resource count is
    /// stable. Returns `false` when `timeout` elapsed first.
    async fn wait_for_network_idle(&self, timeout: Duration) -> bool;

    /// Replace the document with `html`.
    async fn set_content(&self, html: &str) -> Result<(), DriverError>;

    /// Full scrollable height of the document.
    async fn document_height(&self) -> Result<u32, DriverError>;

    async fn viewport(&self) -> Result<Viewport, DriverError>;

    async fn set_viewport(&self, viewport: Viewport) -> Result<(), DriverError>;

    async fn scroll_to(&self, y: u32, smooth: bool) -> Result<(), DriverError>;

    async fn title(&self) -> Option<String>;

    /// Attribute of the first element matching `selector`.
    async fn query_attribute(&self, selector: &str, attribute: &str) -> Option<String>;

    /// Rendered text of the body.
    async fn visible_text(&self) -> Option<String>;

    /// PNG bytes of `clip`, which may extend past the viewport.
    async fn screenshot(&self, clip: Clip) -> Result<Vec<u8>, DriverError>;

    async fn close(&self);
}

// ── Chrome DevTools implementation ───────────────────────────────────────

const DOCUMENT_HEIGHT_JS: &str = "Math.max(\
document.body ? document.body.scrollHeight : 0, \
document.documentElement ? document.documentElement.scrollHeight : 0)";

const VIEWPORT_JS: &str = "({ width: window.innerWidth, height: window.innerHeight })";

const VISIBLE_TEXT_JS: &str = "document.body ? document.body.innerText : ''";

/// Deadline chromiumoxide applies to every navigation request.
const DRIVER_NAVIGATION_SECS: u64 = 30;

fn cdp_err(e: impl std::fmt::Display) -> DriverError {
    DriverError::Cdp(e.to_string())
}

/// A tab in a chromiumoxide-driven browser.
pub struct ChromePage {
    page: Page,
    viewport: Mutex<Viewport>,
}

impl ChromePage {
    /// Open a blank tab and apply `options` before any content loads.
    pub async fn open(browser: &Browser, options: &PageOptions) -> Result<Self, DriverError> {
        let page = browser.new_page("about:blank").await.map_err(cdp_err)?;

        page.execute(SetUserAgentOverrideParams::new(options.user_agent.clone()))
            .await
            .map_err(cdp_err)?;
        page.execute(SetBypassCspParams::new(true))
            .await
            .map_err(cdp_err)?;

        if options.javascript_enabled {
            if let Some(script) = options.init_script {
                page.execute(AddScriptToEvaluateOnNewDocumentParams::new(script))
                    .await
                    .map_err(cdp_err)?;
            }
        } else {
            page.execute(SetScriptExecutionDisabledParams::new(true))
                .await
                .map_err(cdp_err)?;
        }

        let this = Self {
            page,
            viewport: Mutex::new(options.viewport),
        };
        this.set_viewport(options.viewport).await?;
        Ok(this)
    }

    fn cached_viewport(&self) -> Viewport {
        match self.viewport.lock() {
            Ok(v) => *v,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    async fn evaluate_json(&self, script: &str) -> Result<serde_json::Value, DriverError> {
        let result = self.page.evaluate(script).await.map_err(cdp_err)?;
        result
            .into_value::<serde_json::Value>()
            .map_err(|e| DriverError::Decode(e.to_string()))
    }

    async fn layout_content_height(&self) -> Result<u32, DriverError> {
        let lm = self.page.layout_metrics().await.map_err(cdp_err)?;
        Ok(lm.css_content_size.height.max(0.0).ceil() as u32)
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let params = NavigateParams::builder()
            .url(url)
            .referrer(DEFAULT_REFERER)
            .build()
            .map_err(DriverError::Cdp)?;
        match self.page.goto(params).await {
            Ok(_) => Ok(()),
            Err(CdpError::Timeout) => Err(DriverError::Timeout {
                operation: "navigation",
                secs: DRIVER_NAVIGATION_SECS,
            }),
            Err(e) => Err(cdp_err(e)),
        }
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> bool {
        let timeout_ms = timeout.as_millis().min(u128::from(u64::MAX)) as u64;
        let js = format!(
            r#"(async () => {{
                const timeoutMs = {timeout_ms};
                const idleMs = 1000;
                const interval = 250;
                const start = Date.now();
                let lastCount = 0;
                let stableMs = 0;
                try {{ lastCount = performance.getEntriesByType('resource').length; }} catch (_) {{ lastCount = 0; }}
                while (Date.now() - start < timeoutMs) {{
                    await new Promise(r => setTimeout(r, interval));
                    let curCount = lastCount;
                    try {{ curCount = performance.getEntriesByType('resource').length; }} catch (_) {{ curCount = lastCount; }}
                    if (document.readyState === 'complete' && curCount === lastCount) {{
                        stableMs += interval;
                        if (stableMs >= idleMs) {{
                            return {{ ok: true, resourceCount: curCount, waitedMs: Date.now() - start }};
                        }}
                    }} else {{
                        stableMs = 0;
                    }}
                    lastCount = curCount;
                }}
                return {{ ok: false, resourceCount: lastCount, waitedMs: Date.now() - start }};
            }})()"#
        );

        match self.evaluate_json(&js).await {
            Ok(info) => {
                let ok = info.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
                let waited = info.get("waitedMs").and_then(|v| v.as_u64()).unwrap_or(0);
                let resources = info.get("resourceCount").and_then(|v| v.as_u64()).unwrap_or(0);
                debug!(
                    "Network-idle heuristic: ok={}, resources={}, waited={}ms",
                    ok, resources, waited
                );
                ok
            }
            Err(e) => {
                warn!("Network-idle heuristic failed: {}", e);
                false
            }
        }
    }

    async fn set_content(&self, html: &str) -> Result<(), DriverError> {
        self.page.set_content(html).await.map_err(cdp_err)?;
        Ok(())
    }

    async fn document_height(&self) -> Result<u32, DriverError> {
        // Layout metrics cover a detached or zero-height body.
        match self.evaluate_json(DOCUMENT_HEIGHT_JS).await {
            Ok(v) => match v.as_f64() {
                Some(h) if h > 0.0 => Ok(h.ceil() as u32),
                _ => self.layout_content_height().await,
            },
            Err(e) => {
                debug!("Height query failed ({}), using layout metrics", e);
                self.layout_content_height().await
            }
        }
    }

    async fn viewport(&self) -> Result<Viewport, DriverError> {
        let cached = self.cached_viewport();
        let measured = self.evaluate_json(VIEWPORT_JS).await.ok().and_then(|v| {
            let width = v.get("width")?.as_u64()? as u32;
            let height = v.get("height")?.as_u64()? as u32;
            (width > 0 && height > 0).then_some(Viewport { width, height })
        });
        Ok(measured.unwrap_or(cached))
    }

    async fn set_viewport(&self, viewport: Viewport) -> Result<(), DriverError> {
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width as i64)
            .height(viewport.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(DriverError::Cdp)?;
        self.page.execute(params).await.map_err(cdp_err)?;

        if let Ok(mut v) = self.viewport.lock() {
            *v = viewport;
        }
        Ok(())
    }

    async fn scroll_to(&self, y: u32, smooth: bool) -> Result<(), DriverError> {
        let behavior = if smooth { "smooth" } else { "instant" };
        let js = format!("window.scrollTo({{ top: {y}, left: 0, behavior: '{behavior}' }})");
        self.page.evaluate(js).await.map_err(cdp_err)?;
        Ok(())
    }

    async fn title(&self) -> Option<String> {
        self.page.get_title().await.ok().flatten()
    }

    async fn query_attribute(&self, selector: &str, attribute: &str) -> Option<String> {
        let selector = serde_json::to_string(selector).ok()?;
        let attribute = serde_json::to_string(attribute).ok()?;
        let js = format!(
            "(() => {{ const el = document.querySelector({selector}); \
             return el ? el.getAttribute({attribute}) : null; }})()"
        );
        match self.evaluate_json(&js).await {
            Ok(serde_json::Value::String(s)) => Some(s),
            Ok(_) => None,
            Err(e) => {
                debug!("Attribute read {} failed: {}", selector, e);
                None
            }
        }
    }

    async fn visible_text(&self) -> Option<String> {
        match self.evaluate_json(VISIBLE_TEXT_JS).await {
            Ok(serde_json::Value::String(s)) => Some(s),
            Ok(_) => None,
            Err(e) => {
                debug!("innerText read failed: {}", e);
                None
            }
        }
    }

    async fn screenshot(&self, clip: Clip) -> Result<Vec<u8>, DriverError> {
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .from_surface(true)
            .capture_beyond_viewport(true)
            .clip(chromiumoxide::cdp::browser_protocol::page::Viewport {
                x: clip.x as f64,
                y: clip.y as f64,
                width: clip.width as f64,
                height: clip.height as f64,
                scale: 1.0,
            })
            .build();

        let resp = self.page.execute(params).await.map_err(cdp_err)?;
        let data_b64: &str = resp.data.as_ref();
        STANDARD
            .decode(data_b64.as_bytes())
            .map_err(|e| DriverError::Decode(format!("base64 decode failed: {}", e)))
    }

    async fn close(&self) {
        if let Err(e) = self.page.clone().close().await {
            debug!("Closing tab failed: {}", e);
        }
    }
}
