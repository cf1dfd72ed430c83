//! Multi-target API: run several complete pipelines concurrently.
//!
//! Browser handles are never shared, so parallelism across targets means
//! one whole [`TranscriptionJob`] (own browser, own run directory) per
//! target. [`transcribe_many`] waits for all of them and keeps input order;
//! [`transcribe_stream`] yields each transcript as soon as it is ready,
//! tagged with its input position.

use crate::config::TranscriberConfig;
use crate::error::TranscribeError;
use crate::job::TranscriptionJob;
use crate::output::Transcript;
use crate::pipeline::browser::{BrowserLauncher, ChromiumLauncher};
use crate::pipeline::target::CaptureTarget;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of `(input index, result)` pairs in completion order.
pub type TranscriptStream =
    Pin<Box<dyn Stream<Item = (usize, Result<Transcript, TranscribeError>)> + Send>>;

/// Transcribe several targets, at most `parallel` at a time.
///
/// Results are returned in input order. An input that cannot be resolved
/// yields an error in its slot; the other targets still run.
///
/// # Example
/// ```rust,no_run
/// use lp_transcribe::{transcribe_many, TranscriberConfig};
///
/// # #[tokio::main]
/// # async fn main() {
/// let config = TranscriberConfig::default();
/// let results = transcribe_many(["https://a.example", "./lp/index.html"], &config, 2).await;
/// for r in results {
///     match r {
///         Ok(t) => println!("{}: {} chars", t.source_url, t.combined_text.len()),
///         Err(e) => eprintln!("Error: {e}"),
///     }
/// }
/// # }
/// ```
pub async fn transcribe_many<I, S>(
    inputs: I,
    config: &TranscriberConfig,
    parallel: usize,
) -> Vec<Result<Transcript, TranscribeError>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let targets = resolve_all(inputs);
    info!("Transcribing {} targets, {} at a time", targets.len(), parallel.max(1));
    run_in_order(targets, config, parallel, |_| ChromiumLauncher::new(config)).await
}

/// Transcribe several targets, yielding results as they complete.
///
/// Each item carries the input's position so callers can re-associate it.
pub fn transcribe_stream<I, S>(
    inputs: I,
    config: &TranscriberConfig,
    parallel: usize,
) -> TranscriptStream
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let launcher_config = config.clone();
    stream_jobs(resolve_all(inputs), config, parallel, move |_| {
        ChromiumLauncher::new(&launcher_config)
    })
}

fn resolve_all<I, S>(inputs: I) -> Vec<Result<CaptureTarget, TranscribeError>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    inputs
        .into_iter()
        .map(|s| CaptureTarget::resolve(s.as_ref()))
        .collect()
}

async fn run_in_order<L, F>(
    targets: Vec<Result<CaptureTarget, TranscribeError>>,
    config: &TranscriberConfig,
    parallel: usize,
    make_launcher: F,
) -> Vec<Result<Transcript, TranscribeError>>
where
    L: BrowserLauncher,
    F: Fn(usize) -> L,
{
    stream::iter(targets.into_iter().enumerate().map(|(i, target)| {
        let job = TranscriptionJob::with_launcher(config.clone(), make_launcher(i));
        async move { job.run(&target?).await }
    }))
    .buffered(parallel.max(1))
    .collect()
    .await
}

fn stream_jobs<L, F>(
    targets: Vec<Result<CaptureTarget, TranscribeError>>,
    config: &TranscriberConfig,
    parallel: usize,
    make_launcher: F,
) -> TranscriptStream
where
    L: BrowserLauncher + 'static,
    F: Fn(usize) -> L + Send + 'static,
{
    let config = config.clone();
    let s = stream::iter(targets.into_iter().enumerate().map(move |(i, target)| {
        let job = TranscriptionJob::with_launcher(config.clone(), make_launcher(i));
        async move {
            let result = match target {
                Ok(target) => job.run(&target).await,
                Err(e) => Err(e),
            };
            (i, result)
        }
    }))
    .buffer_unordered(parallel.max(1));
    Box::pin(s)
}
