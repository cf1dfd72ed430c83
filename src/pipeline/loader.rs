//! Page loading: navigate, coax lazy content into the DOM, read metadata.
//!
//! Landing pages defer images and whole sections until they scroll into
//! view, so a plain navigation captures half-empty slices. After navigating,
//! the loader scrolls through 25/50/75/100 % of the document with a pause at
//! each checkpoint, then returns to the top and lets the layout settle.
//!
//! Navigation and network-idle timeouts are recoverable: long-polling
//! trackers keep many pages from ever going idle, and whatever has rendered
//! by then is usually complete enough to capture.

use crate::config::TranscriberConfig;
use crate::error::{DriverError, TranscribeError};
use crate::output::PageMetadata;
use crate::pipeline::driver::PageDriver;
use crate::pipeline::target::CaptureTarget;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Scroll checkpoints as fractions of the document height.
const SCROLL_CHECKPOINTS: [f64; 4] = [0.25, 0.5, 0.75, 1.0];

/// Where one metadata value may be read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaSource {
    /// `document.title`.
    DocumentTitle,
    /// An attribute of the first element matching `selector`.
    Attribute {
        selector: &'static str,
        attribute: &'static str,
    },
}

/// Title rules, highest priority first.
pub const TITLE_RULES: &[MetaSource] = &[
    MetaSource::DocumentTitle,
    MetaSource::Attribute {
        selector: r#"meta[property="og:title"]"#,
        attribute: "content",
    },
    MetaSource::Attribute {
        selector: r#"meta[name="twitter:title"]"#,
        attribute: "content",
    },
];

/// Description rules, highest priority first.
pub const DESCRIPTION_RULES: &[MetaSource] = &[
    MetaSource::Attribute {
        selector: r#"meta[name="description"]"#,
        attribute: "content",
    },
    MetaSource::Attribute {
        selector: r#"meta[property="og:description"]"#,
        attribute: "content",
    },
    MetaSource::Attribute {
        selector: r#"meta[name="twitter:description"]"#,
        attribute: "content",
    },
];

/// Keyword rules, highest priority first.
pub const KEYWORD_RULES: &[MetaSource] = &[MetaSource::Attribute {
    selector: r#"meta[name="keywords"]"#,
    attribute: "content",
}];

/// How the document got into the tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// Navigation finished within the timeout.
    Completed,
    /// Navigation timed out; the page is captured as rendered so far.
    TimedOut,
    /// Markup was injected directly (static render).
    Rendered,
}

/// A loaded page, ready for capture.
#[derive(Debug, Clone)]
pub struct LoadedPage {
    pub metadata: PageMetadata,
    /// Directly-extracted body text, blank-line runs collapsed.
    pub page_text: Option<String>,
    pub navigation: NavigationOutcome,
}

/// Loads targets into a tab according to a [`TranscriberConfig`].
pub struct PageLoader<'a> {
    config: &'a TranscriberConfig,
}

impl<'a> PageLoader<'a> {
    pub fn new(config: &'a TranscriberConfig) -> Self {
        Self { config }
    }

    /// Navigate to `target`, trigger lazy loading and read metadata.
    ///
    /// # Errors
    /// Only a navigation that fails outright (DNS, connection refused,
    /// crashed tab) is an error. Timeouts are logged and ignored.
    pub async fn load<P: PageDriver>(
        &self,
        page: &P,
        target: &CaptureTarget,
    ) -> Result<LoadedPage, TranscribeError> {
        let url = target.navigation_url()?;
        info!("Loading {}", url);

        let nav_timeout = Duration::from_secs(self.config.navigation_timeout_secs);
        let navigation = match timeout(nav_timeout, page.navigate(&url)).await {
            Ok(Ok(())) => NavigationOutcome::Completed,
            Ok(Err(DriverError::Timeout { secs, .. })) => {
                warn!(
                    "Navigation to {} gave no load event within {}s, continuing with rendered content",
                    url, secs
                );
                NavigationOutcome::TimedOut
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!(
                    "Navigation to {} timed out after {}s, continuing with rendered content",
                    url, self.config.navigation_timeout_secs
                );
                NavigationOutcome::TimedOut
            }
        };

        if self.config.network_idle_timeout_secs > 0 {
            let idle_timeout = Duration::from_secs(self.config.network_idle_timeout_secs);
            if !page.wait_for_network_idle(idle_timeout).await {
                debug!("Network did not go idle within {:?}", idle_timeout);
            }
        }

        self.progressive_scroll(page).await;
        Ok(self.inspect(page, navigation).await)
    }

    /// Render already-fetched markup and read metadata from it.
    pub async fn load_markup<P: PageDriver>(
        &self,
        page: &P,
        html: &str,
    ) -> Result<LoadedPage, TranscribeError> {
        page.set_content(html).await?;
        pause(self.config.pauses.settle_ms).await;
        Ok(self.inspect(page, NavigationOutcome::Rendered).await)
    }

    /// Scroll through the checkpoints, then back to the top.
    async fn progressive_scroll<P: PageDriver>(&self, page: &P) {
        let height = match page.document_height().await {
            Ok(h) => h,
            Err(e) => {
                warn!("Could not measure document for scrolling: {}", e);
                return;
            }
        };

        for fraction in SCROLL_CHECKPOINTS {
            let y = (height as f64 * fraction).round() as u32;
            if let Err(e) = page.scroll_to(y, true).await {
                warn!("Scroll to {}px failed: {}", y, e);
                break;
            }
            pause(self.config.pauses.scroll_checkpoint_ms).await;
        }

        if let Err(e) = page.scroll_to(0, false).await {
            warn!("Scroll back to top failed: {}", e);
        }
        pause(self.config.pauses.settle_ms).await;
    }

    async fn inspect<P: PageDriver>(&self, page: &P, navigation: NavigationOutcome) -> LoadedPage {
        let metadata = extract_metadata(page).await;
        let page_text = if self.config.extract_page_text {
            page.visible_text()
                .await
                .map(|t| normalize_page_text(&t))
                .filter(|t| !t.is_empty())
        } else {
            None
        };
        debug!(
            "Metadata: title={:?}, description={}, keywords={}, page text {} chars",
            metadata.title,
            metadata.description.is_some(),
            metadata.keywords.is_some(),
            page_text.as_ref().map(|t| t.chars().count()).unwrap_or(0)
        );
        LoadedPage {
            metadata,
            page_text,
            navigation,
        }
    }
}

async fn pause(ms: u64) {
    if ms > 0 {
        sleep(Duration::from_millis(ms)).await;
    }
}

/// Read title, description and keywords using the rule lists.
pub async fn extract_metadata<P: PageDriver>(page: &P) -> PageMetadata {
    PageMetadata {
        title: first_match(page, TITLE_RULES).await,
        description: first_match(page, DESCRIPTION_RULES).await,
        keywords: first_match(page, KEYWORD_RULES).await,
    }
}

/// First non-empty value produced by `rules`, trimmed.
async fn first_match<P: PageDriver>(page: &P, rules: &[MetaSource]) -> Option<String> {
    for rule in rules {
        let value = match rule {
            MetaSource::DocumentTitle => page.title().await,
            MetaSource::Attribute {
                selector,
                attribute,
            } => page.query_attribute(selector, attribute).await,
        };
        if let Some(v) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            return Some(v);
        }
    }
    None
}

/// Trim every line and collapse runs of blank lines into one.
pub fn normalize_page_text(raw: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut previous_blank = true;
    for line in raw.lines().map(str::trim) {
        let blank = line.is_empty();
        if blank && previous_blank {
            continue;
        }
        out.push(line);
        previous_blank = blank;
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}
