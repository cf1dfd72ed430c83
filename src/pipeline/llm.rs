//! Vision-LLM OCR backend: one chat completion per slice.
//!
//! Prompt text lives in [`crate::prompts`]; this module only builds the
//! messages, calls the provider and retries.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent when
//! several slices are in flight. Exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`) spreads the retries out: with the
//! default 1 s base and 3 retries the waits are 1 s → 2 s → 4 s. Every
//! attempt is also bounded by `api_timeout_secs` so one stuck connection
//! cannot hold a worker forever.

use crate::config::TranscriberConfig;
use crate::error::{SliceError, TranscribeError};
use crate::pipeline::encode::encode_png;
use crate::pipeline::ocr::{OcrBackend, OcrRequest, OcrResponse};
use crate::prompts::slice_position_note;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Model used when a provider is named without one.
fn default_model(provider_name: &str) -> &'static str {
    match provider_name {
        "gemini" | "google" => "gemini-2.0-flash",
        _ => "gpt-4.1-nano",
    }
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`), created through
///    [`ProviderFactory::create_llm_provider`], which reads the matching API
///    key from the environment.
/// 3. **Auto-detection** ([`ProviderFactory::from_env`]).
///
/// Returns a log label alongside the provider.
pub fn resolve_provider(
    config: &TranscriberConfig,
) -> Result<(String, Arc<dyn LLMProvider>), TranscribeError> {
    if let Some(provider) = &config.provider {
        return Ok(("custom".to_string(), Arc::clone(provider)));
    }

    if let Some(name) = &config.provider_name {
        let model = config.model.as_deref().unwrap_or(default_model(name));
        let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            TranscribeError::ProviderNotConfigured {
                provider: name.clone(),
                hint: format!("{e}"),
            }
        })?;
        return Ok((format!("{name}/{model}"), provider));
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| TranscribeError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment. \
                 Set OPENAI_API_KEY, GEMINI_API_KEY or ANTHROPIC_API_KEY. Error: {}",
                e
            ),
        })?;
    Ok(("auto".to_string(), provider))
}

/// Retry settings for one slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &TranscriberConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
            call_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Wait before retry `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// Run `call` until it succeeds, at most `1 + max_retries` times.
///
/// Returns the value and the number of retries it took. If the last attempt
/// timed out the error is [`SliceError::Timeout`], otherwise
/// [`SliceError::OcrFailed`] with the last error message.
pub async fn call_with_retries<T, E, F, Fut>(
    slice: usize,
    policy: RetryPolicy,
    mut call: F,
) -> Result<(T, u32), SliceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut last_err = String::from("Unknown error");
    let mut last_timed_out = false;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff(attempt);
            warn!(
                "Slice {}: retry {}/{} after {}ms",
                slice,
                attempt,
                policy.max_retries,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        match timeout(policy.call_timeout, call()).await {
            Ok(Ok(value)) => return Ok((value, attempt)),
            Ok(Err(e)) => {
                last_err = e.to_string();
                last_timed_out = false;
                warn!("Slice {}: attempt {} failed: {}", slice, attempt + 1, last_err);
            }
            Err(_) => {
                last_err = format!("no response within {}s", policy.call_timeout.as_secs());
                last_timed_out = true;
                warn!("Slice {}: attempt {} timed out", slice, attempt + 1);
            }
        }
    }

    if last_timed_out {
        Err(SliceError::Timeout {
            slice,
            secs: policy.call_timeout.as_secs(),
        })
    } else {
        Err(SliceError::OcrFailed {
            slice,
            retries: policy.max_retries,
            detail: last_err,
        })
    }
}

/// [`OcrBackend`] over an `edgequake-llm` vision provider.
///
/// ## Message Layout
///
/// 1. **System message**: the transcription instructions
/// 2. **User message**: the slice position ("Slice 2 of 5 ...") with the
///    slice PNG attached
pub struct VisionLlmBackend {
    label: String,
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    retry: RetryPolicy,
}

impl VisionLlmBackend {
    pub fn new(label: impl Into<String>, provider: Arc<dyn LLMProvider>, config: &TranscriberConfig) -> Self {
        Self {
            label: label.into(),
            provider,
            options: build_options(config),
            retry: RetryPolicy::from_config(config),
        }
    }
}

#[async_trait]
impl OcrBackend for VisionLlmBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn recognize(&self, request: OcrRequest) -> Result<OcrResponse, SliceError> {
        let messages = vec![
            ChatMessage::system(&*request.instruction),
            ChatMessage::user_with_images(
                slice_position_note(request.slice, request.total),
                vec![encode_png(&request.image_png)],
            ),
        ];

        let (response, retries) = call_with_retries(request.slice, self.retry, || {
            self.provider.chat(&messages, Some(&self.options))
        })
        .await?;

        debug!(
            "Slice {}: {} input tokens, {} output tokens",
            request.slice, response.prompt_tokens, response.completion_tokens
        );

        Ok(OcrResponse {
            text: response.content,
            retries,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Build `CompletionOptions` from the job config.
fn build_options(config: &TranscriberConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
