//! Target resolution: normalise a user-supplied URL or path to a
//! [`CaptureTarget`], and fetch raw markup for the static-render tier.
//!
//! Local pages are opened through a `file://` URL so relative assets next to
//! the document resolve exactly as they would when served. A directory
//! resolves to its `index.html` (or `index.htm`); anything else is an error
//! before a browser is ever launched.

use crate::config::DEFAULT_REFERER;
use crate::error::TranscribeError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// What a job captures: exactly one of a remote URL or a local document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureTarget {
    Remote { url: String },
    Local { path: PathBuf },
}

/// Entry documents tried, in order, when a directory is given.
const INDEX_DOCUMENTS: [&str; 2] = ["index.html", "index.htm"];

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

impl CaptureTarget {
    /// Resolve a user-supplied string: HTTP(S) URLs become remote targets,
    /// existing paths become local targets.
    pub fn resolve(input: &str) -> Result<Self, TranscribeError> {
        let input = input.trim();
        if is_url(input) {
            let parsed = reqwest::Url::parse(input).map_err(|_| TranscribeError::InvalidTarget {
                input: input.to_string(),
            })?;
            return Ok(CaptureTarget::Remote {
                url: parsed.to_string(),
            });
        }
        if input.is_empty() {
            return Err(TranscribeError::InvalidTarget {
                input: input.to_string(),
            });
        }
        Self::local(input)
    }

    /// Resolve a local file or directory.
    pub fn local(path: impl AsRef<Path>) -> Result<Self, TranscribeError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TranscribeError::TargetNotFound {
                path: path.to_path_buf(),
            });
        }

        let document = if path.is_dir() {
            INDEX_DOCUMENTS
                .iter()
                .map(|name| path.join(name))
                .find(|candidate| candidate.is_file())
                .ok_or_else(|| TranscribeError::NoEntryDocument {
                    dir: path.to_path_buf(),
                })?
        } else {
            path.to_path_buf()
        };

        let absolute = std::fs::canonicalize(&document).map_err(|_| {
            TranscribeError::TargetNotFound {
                path: document.clone(),
            }
        })?;
        debug!("Resolved local page: {}", absolute.display());
        Ok(CaptureTarget::Local { path: absolute })
    }

    /// URL handed to the browser.
    pub fn navigation_url(&self) -> Result<String, TranscribeError> {
        match self {
            CaptureTarget::Remote { url } => Ok(url.clone()),
            CaptureTarget::Local { path } => reqwest::Url::from_file_path(path)
                .map(|u| u.to_string())
                .map_err(|_| TranscribeError::InvalidTarget {
                    input: path.display().to_string(),
                }),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, CaptureTarget::Local { .. })
    }
}

impl fmt::Display for CaptureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureTarget::Remote { url } => f.write_str(url),
            CaptureTarget::Local { path } => write!(f, "{}", path.display()),
        }
    }
}

// ── Static render ────────────────────────────────────────────────────────

/// Markup fetched without a browser, ready for `set_content`.
#[derive(Debug, Clone)]
pub struct StaticDocument {
    pub html: String,
    /// Base URL relative assets resolve against.
    pub base_url: String,
}

/// Fetch the target's markup without a browser.
///
/// Remote targets use a plain GET with the desktop user agent and a Google
/// referrer; local targets are read from disk. `<script>` elements are
/// stripped before rendering.
pub async fn fetch_static_document(
    target: &CaptureTarget,
    user_agent: &str,
    timeout_secs: u64,
) -> Result<StaticDocument, TranscribeError> {
    let base_url = target.navigation_url()?;
    let raw = match target {
        CaptureTarget::Remote { url } => fetch_remote(url, user_agent, timeout_secs).await?,
        CaptureTarget::Local { path } => tokio::fs::read_to_string(path).await.map_err(|e| {
            TranscribeError::FetchFailed {
                url: base_url.clone(),
                reason: e.to_string(),
            }
        })?,
    };

    let html = sanitize_for_static_render(&raw, &base_url);
    debug!(
        "Static document for {}: {} bytes raw, {} bytes sanitised",
        base_url,
        raw.len(),
        html.len()
    );
    Ok(StaticDocument { html, base_url })
}

async fn fetch_remote(url: &str, user_agent: &str, timeout_secs: u64) -> Result<String, TranscribeError> {
    info!("Fetching static markup from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(user_agent)
        .build()
        .map_err(|e| TranscribeError::FetchFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client
        .get(url)
        .header(reqwest::header::REFERER, DEFAULT_REFERER)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                TranscribeError::FetchTimeout {
                    url: url.to_string(),
                    secs: timeout_secs,
                }
            } else {
                TranscribeError::FetchFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

    if !response.status().is_success() {
        return Err(TranscribeError::FetchFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    response.text().await.map_err(|e| TranscribeError::FetchFailed {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

static RE_SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<script\b[^>]*/>").unwrap());
static RE_HEAD_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<head\b[^>]*>").unwrap());
static RE_BASE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<base\b").unwrap());

/// Strip `<script>` elements and make relative URLs resolve against
/// `base_url` by injecting a `<base href>` (unless the page has one).
pub fn sanitize_for_static_render(html: &str, base_url: &str) -> String {
    let stripped = RE_SCRIPT.replace_all(html, "");
    if RE_BASE_TAG.is_match(&stripped) {
        return stripped.into_owned();
    }

    let base_tag = format!("<base href=\"{}\">", base_url.replace('"', "&quot;"));
    match RE_HEAD_OPEN.find(&stripped) {
        Some(m) => {
            let mut out = String::with_capacity(stripped.len() + base_tag.len());
            out.push_str(&stripped[..m.end()]);
            out.push_str(&base_tag);
            out.push_str(&stripped[m.end()..]);
            out
        }
        None => format!("{}{}", base_tag, stripped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/lp"));
        assert!(is_url("http://example.com"));
        assert!(!is_url("/tmp/index.html"));
        assert!(!is_url("index.html"));
        assert!(!is_url(""));
    }

    #[test]
    fn resolves_remote_url() {
        let t = CaptureTarget::resolve("https://example.com/lp?x=1").unwrap();
        assert_eq!(
            t,
            CaptureTarget::Remote {
                url: "https://example.com/lp?x=1".into()
            }
        );
        assert!(!t.is_local());
    }

    #[test]
    fn directory_resolves_to_index_html() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.htm"), "<p>htm</p>").unwrap();
        std::fs::write(dir.path().join("index.html"), "<p>html</p>").unwrap();

        let t = CaptureTarget::resolve(dir.path().to_str().unwrap()).unwrap();
        match &t {
            CaptureTarget::Local { path } => assert!(path.ends_with("index.html")),
            other => panic!("expected local target, got {other:?}"),
        }
        assert!(t.navigation_url().unwrap().starts_with("file://"));
    }

    #[test]
    fn directory_falls_back_to_index_htm() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.htm"), "<p>htm</p>").unwrap();
        let t = CaptureTarget::local(dir.path()).unwrap();
        match t {
            CaptureTarget::Local { path } => assert!(path.ends_with("index.htm")),
            other => panic!("expected local target, got {other:?}"),
        }
    }

    #[test]
    fn directory_without_index_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("about.html"), "<p/>").unwrap();
        let err = CaptureTarget::local(dir.path()).unwrap_err();
        assert!(matches!(err, TranscribeError::NoEntryDocument { .. }));
    }

    #[test]
    fn missing_path_is_rejected() {
        let err = CaptureTarget::resolve("/definitely/not/here/page.html").unwrap_err();
        assert!(matches!(err, TranscribeError::TargetNotFound { .. }));
    }

    #[test]
    fn sanitize_strips_scripts_and_injects_base() {
        let html = r#"<html><HEAD lang="ja"><title>T</title><script src="a.js"></script></HEAD>
<body><SCRIPT type="text/javascript">
window.location = "/elsewhere";
</SCRIPT><p>copy</p><script src="b.js"/></body></html>"#;
        let out = sanitize_for_static_render(html, "https://example.com/lp/");
        assert!(!out.to_lowercase().contains("<script"), "got: {out}");
        assert!(out.contains(r#"<HEAD lang="ja"><base href="https://example.com/lp/">"#));
        assert!(out.contains("<p>copy</p>"));
    }

    #[test]
    fn sanitize_prepends_base_without_head() {
        let out = sanitize_for_static_render("<p>hi</p>", "file:///tmp/site/index.html");
        assert!(out.starts_with(r#"<base href="file:///tmp/site/index.html">"#));
    }

    #[test]
    fn sanitize_keeps_existing_base() {
        let html = r#"<head><base href="/root/"></head><p>x</p>"#;
        let out = sanitize_for_static_render(html, "https://example.com/");
        assert_eq!(out.matches("<base").count(), 1);
        assert!(out.contains(r#"href="/root/""#));
    }

    #[tokio::test]
    async fn local_static_document_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("index.html");
        std::fs::write(&page, "<head></head><script>x()</script><h1>Hello</h1>").unwrap();

        let target = CaptureTarget::local(&page).unwrap();
        let doc = fetch_static_document(&target, "ua", 5).await.unwrap();
        assert!(doc.base_url.starts_with("file://"));
        assert!(doc.html.contains("<h1>Hello</h1>"));
        assert!(!doc.html.contains("x()"));
    }
}
