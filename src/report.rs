//! Run-directory reports: `website_transcription.md`, `website_transcription.txt`
//! and `transcript.json`.
//!
//! Every file is written atomically (temp file + rename) so a crashed job
//! never leaves a half-written report behind for a downstream reader.

use crate::config::TranscriberConfig;
use crate::error::TranscribeError;
use crate::output::Transcript;
use crate::pipeline::capture::SEGMENTS_DIR;
use crate::pipeline::target::CaptureTarget;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const MARKDOWN_REPORT: &str = "website_transcription.md";
pub const PLAIN_TEXT_REPORT: &str = "website_transcription.txt";
pub const JSON_REPORT: &str = "transcript.json";

/// Render the human-readable report.
pub fn render_markdown(t: &Transcript) -> String {
    let mut md = String::from("# Landing page transcription\n\n");

    let _ = writeln!(md, "**Source:** {}\n", t.source_url);
    let _ = writeln!(md, "**Captured:** {}\n", t.created_at.to_rfc3339());
    if let Some(name) = t.artifacts.merged_image.file_name() {
        let _ = writeln!(md, "**Merged image:** {}\n", name.to_string_lossy());
    }
    if let CaptureTarget::Local { path } = &t.target {
        let _ = writeln!(md, "**Local document:** {}\n", path.display());
    }
    let _ = writeln!(
        md,
        "**Slices:** {} ({}, {}px, {}px overlap)\n",
        t.slices.len(),
        t.capture_method.label(),
        t.stats.slice_height,
        t.stats.overlap
    );

    let meta = &t.metadata;
    if meta.title.is_some() || meta.description.is_some() || meta.keywords.is_some() {
        md.push_str("## Metadata\n\n");
        let _ = writeln!(md, "- Title: {}", meta.title.as_deref().unwrap_or(""));
        if let Some(d) = &meta.description {
            let _ = writeln!(md, "- Description: {}", d.trim());
        }
        if let Some(k) = &meta.keywords {
            let _ = writeln!(md, "- Keywords: {}", k.trim());
        }
        md.push('\n');
    }

    if !t.combined_text.is_empty() {
        md.push_str("## Transcript\n\n");
        md.push_str(&t.combined_text);
        md.push_str("\n\n");
    }

    md.push_str("## Slices\n\n");
    for s in &t.slices {
        let _ = writeln!(md, "### Slice {:02}\n", s.index);
        if let Some(name) = s.image_path.file_name() {
            let _ = writeln!(md, "- File: {}", name.to_string_lossy());
        }
        let _ = writeln!(md, "- Position: {}px to {}px", s.top, s.bottom);
        if let Some(e) = &s.error {
            let _ = writeln!(md, "- Error: {}", e);
        }
        md.push('\n');

        if !s.clean_text.is_empty() {
            let _ = write!(md, "**Cleaned text**\n\n```\n{}\n```\n\n", s.clean_text);
        }
        if !s.raw_text.is_empty() && s.raw_text != s.clean_text {
            let _ = write!(md, "**Raw OCR text**\n\n```\n{}\n```\n\n", s.raw_text);
        }
    }

    md
}

/// The combined text alone.
pub fn render_plain_text(t: &Transcript) -> String {
    t.combined_text.clone()
}

/// Write the enabled reports into the run directory and record their paths
/// on `transcript.artifacts`.
pub async fn write_artifacts(
    transcript: &mut Transcript,
    config: &TranscriberConfig,
) -> Result<(), TranscribeError> {
    let run_dir = transcript.artifacts.run_dir.clone();
    transcript.artifacts.markdown = config.write_markdown.then(|| run_dir.join(MARKDOWN_REPORT));
    transcript.artifacts.plain_text = config.write_plain_text.then(|| run_dir.join(PLAIN_TEXT_REPORT));
    transcript.artifacts.json = config.write_json.then(|| run_dir.join(JSON_REPORT));

    if let Some(path) = &transcript.artifacts.markdown {
        write_atomic(path, render_markdown(transcript).as_bytes()).await?;
    }
    if let Some(path) = &transcript.artifacts.plain_text {
        write_atomic(path, render_plain_text(transcript).as_bytes()).await?;
    }
    if let Some(path) = &transcript.artifacts.json {
        let json = serde_json::to_vec_pretty(&*transcript)
            .map_err(|e| TranscribeError::Internal(format!("Transcript serialisation failed: {}", e)))?;
        write_atomic(path, &json).await?;
    }
    debug!("Reports written to {}", run_dir.display());
    Ok(())
}

/// Delete the run's `segments/` directory. Returns whether it is gone.
pub async fn remove_slice_images(run_dir: &Path) -> bool {
    let dir = run_dir.join(SEGMENTS_DIR);
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => {
            debug!("Removed slice images in {}", dir.display());
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!("Could not remove slice images in {}: {}", dir.display(), e);
            false
        }
    }
}

/// Write `bytes` to `path` via a sibling temp file and a rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), TranscribeError> {
    let fail = |source| TranscribeError::ArtifactWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }
    let tmp_path = tmp_sibling(path);
    tokio::fs::write(&tmp_path, bytes).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(fail)
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
