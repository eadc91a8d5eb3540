//! Model interaction: the [`LanguageModel`] seam, provider resolution, and
//! the retry loop every stage goes through.
//!
//! Prompt text lives in [`crate::prompts`]; this module only knows how to
//! send a request and survive transient failures.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are frequent under concurrent load. Each attempt is
//! bounded by `api_timeout_secs`, and failed attempts back off exponentially
//! (`retry_backoff_ms * 2^(attempt-1)`): with 1 s base and 3 retries the wait
//! sequence is 1 s → 2 s → 4 s. An empty answer counts as a failed attempt.

use crate::config::CourseConfig;
use crate::error::{CourseError, EnhancementError, ModelError};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// One model request: a system prompt, a user turn, optional images.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub images: Vec<ImageData>,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            images: Vec::new(),
            temperature: 0.1,
            max_tokens: 4096,
        }
    }

    pub fn with_images(mut self, images: Vec<ImageData>) -> Self {
        self.images = images;
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn with_max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = n;
        self
    }
}

/// A model answer with token accounting.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Anything that can answer a [`CompletionRequest`].
///
/// The production implementation is [`ProviderModel`]; tests inject fakes
/// through [`CourseConfig::models`].
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logs.
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ModelError>;
}

/// [`LanguageModel`] backed by an `edgequake_llm` provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    name: String,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
        }
    }
}

#[async_trait::async_trait]
impl LanguageModel for ProviderModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ModelError> {
        let mut messages = vec![ChatMessage::system(request.system.as_str())];
        if request.images.is_empty() {
            messages.push(ChatMessage::user(request.user.as_str()));
        } else {
            messages.push(ChatMessage::user_with_images(
                &request.user,
                request.images.clone(),
            ));
        }

        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ModelError::Api(e.to_string()))?;

        Ok(Completion {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// The three model roles used by the pipeline.
#[derive(Clone)]
pub struct ModelSet {
    /// Rewriting, summarization, structure inference, synthesis.
    pub text: Arc<dyn LanguageModel>,
    /// Captions and PNG-assisted repair.
    pub vision: Arc<dyn LanguageModel>,
    /// Cheap per-slide proofreading.
    pub mini: Arc<dyn LanguageModel>,
}

impl ModelSet {
    /// Use one model for every role.
    pub fn uniform(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            text: Arc::clone(&model),
            vision: Arc::clone(&model),
            mini: model,
        }
    }
}

impl fmt::Debug for ModelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSet")
            .field("text", &self.text.name())
            .field("vision", &self.vision.name())
            .field("mini", &self.mini.name())
            .finish()
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

const DEFAULT_TEXT_MODEL: &str = "gpt-4.1-mini";
const DEFAULT_MINI_MODEL: &str = "gpt-4.1-nano";

/// OpenRouter routes by vendor-prefixed ids.
fn default_model(provider: &str, mini: bool) -> String {
    let base = if mini {
        DEFAULT_MINI_MODEL
    } else {
        DEFAULT_TEXT_MODEL
    };
    if provider == "openrouter" {
        format!("openai/{base}")
    } else {
        base.to_string()
    }
}

fn create_model(provider_name: &str, model: &str) -> Result<Arc<dyn LanguageModel>, CourseError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        CourseError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(ProviderModel::new(
        provider,
        format!("{provider_name}/{model}"),
    )))
}

fn models_for(provider_name: &str, config: &CourseConfig) -> Result<ModelSet, CourseError> {
    let text_name = config
        .text_model
        .clone()
        .unwrap_or_else(|| default_model(provider_name, false));
    let vision_name = config
        .vision_model
        .clone()
        .unwrap_or_else(|| text_name.clone());
    let mini_name = config
        .mini_model
        .clone()
        .unwrap_or_else(|| default_model(provider_name, true));

    let text = create_model(provider_name, &text_name)?;
    let vision = if vision_name == text_name {
        Arc::clone(&text)
    } else {
        create_model(provider_name, &vision_name)?
    };
    let mini = create_model(provider_name, &mini_name)?;
    Ok(ModelSet { text, vision, mini })
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Resolve the models, from most-specific to least-specific.
///
/// 1. **Injected models** (`config.models`) are used as-is.
/// 2. **Named provider** (`config.provider_name`) with the configured or
///    default model names.
/// 3. `EDGEQUAKE_LLM_PROVIDER` (+ `EDGEQUAKE_MODEL` as the text model).
/// 4. `OPENROUTER_API_KEY` selects OpenRouter.
/// 5. `OPENAI_API_KEY` selects OpenAI.
/// 6. [`ProviderFactory::from_env`] auto-detection, one model for all roles.
pub fn resolve_models(config: &CourseConfig) -> Result<ModelSet, CourseError> {
    if let Some(ref models) = config.models {
        return Ok(models.clone());
    }

    // The OpenAI-compatible providers read their endpoint from the environment.
    if let Some(ref url) = config.base_url {
        debug!("Using base URL {}", url);
        std::env::set_var("OPENAI_BASE_URL", url);
    }

    if let Some(ref name) = config.provider_name {
        return models_for(name, config);
    }

    if let Some(prov) = non_empty_env("EDGEQUAKE_LLM_PROVIDER") {
        let mut config = config.clone();
        if config.text_model.is_none() {
            config.text_model = non_empty_env("EDGEQUAKE_MODEL");
        }
        return models_for(&prov, &config);
    }

    if non_empty_env("OPENROUTER_API_KEY").is_some() {
        return models_for("openrouter", config);
    }

    if non_empty_env("OPENAI_API_KEY").is_some() {
        return models_for("openai", config);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| CourseError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENROUTER_API_KEY, OPENAI_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;
    info!("Using auto-detected provider for every model role");
    Ok(ModelSet::uniform(Arc::new(ProviderModel::new(
        llm_provider,
        "auto",
    ))))
}

// ── Retry ────────────────────────────────────────────────────────────────

/// Retry and timeout budget for model calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &CourseConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
        }
    }
}

/// Call `model` until it returns a non-empty answer or the budget runs out.
pub async fn complete_with_retry(
    model: &dyn LanguageModel,
    request: &CompletionRequest,
    policy: RetryPolicy,
    stage: &str,
) -> Result<Completion, EnhancementError> {
    let start = Instant::now();
    let mut last_err: Option<String> = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff_ms.saturating_mul(2u64.saturating_pow(attempt - 1));
            warn!(
                "{}: retry {}/{} after {}ms",
                stage, attempt, policy.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let call = model.complete(request);
        let result = match timeout(Duration::from_secs(policy.timeout_secs), call).await {
            Ok(r) => r,
            Err(_) => Err(ModelError::Timeout {
                secs: policy.timeout_secs,
            }),
        };

        match result {
            Ok(completion) if !completion.content.trim().is_empty() => {
                debug!(
                    "{}: via {} — {} input tokens, {} output tokens, {:?}",
                    stage,
                    model.name(),
                    completion.input_tokens,
                    completion.output_tokens,
                    start.elapsed()
                );
                return Ok(completion);
            }
            Ok(_) => {
                warn!("{}: attempt {} returned an empty answer", stage, attempt + 1);
                last_err = Some("empty answer".to_string());
            }
            Err(e) => {
                warn!("{}: attempt {} failed — {}", stage, attempt + 1, e);
                last_err = Some(e.to_string());
            }
        }
    }

    match last_err.as_deref() {
        Some("empty answer") => Err(EnhancementError::Empty {
            stage: stage.to_string(),
        }),
        _ => Err(EnhancementError::Failed {
            stage: stage.to_string(),
            retries: policy.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails `failures` times, then answers "ok".
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
        empty: bool,
    }

    #[async_trait::async_trait]
    impl LanguageModel for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, ModelError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.empty {
                return Ok(Completion::default());
            }
            if n < self.failures {
                Err(ModelError::Api("429 Too Many Requests".into()))
            } else {
                Ok(Completion {
                    content: "ok".into(),
                    ..Default::default()
                })
            }
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_ms: 1,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let model = Flaky {
            failures: 2,
            calls: AtomicUsize::new(0),
            empty: false,
        };
        let req = CompletionRequest::new("sys", "user");
        let out = complete_with_retry(&model, &req, fast_policy(3), "test")
            .await
            .unwrap();
        assert_eq!(out.content, "ok");
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let model = Flaky {
            failures: 10,
            calls: AtomicUsize::new(0),
            empty: false,
        };
        let req = CompletionRequest::new("sys", "user");
        let err = complete_with_retry(&model, &req, fast_policy(2), "caption")
            .await
            .unwrap_err();
        assert!(matches!(err, EnhancementError::Failed { retries: 2, .. }));
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_answers_are_failures() {
        let model = Flaky {
            failures: 0,
            calls: AtomicUsize::new(0),
            empty: true,
        };
        let req = CompletionRequest::new("sys", "user");
        let err = complete_with_retry(&model, &req, fast_policy(1), "summary")
            .await
            .unwrap_err();
        assert!(matches!(err, EnhancementError::Empty { .. }));
    }

    #[test]
    fn openrouter_defaults_are_vendor_prefixed() {
        assert_eq!(default_model("openrouter", false), "openai/gpt-4.1-mini");
        assert_eq!(default_model("openai", true), "gpt-4.1-nano");
    }

    #[test]
    fn injected_models_win() {
        let model: Arc<dyn LanguageModel> = Arc::new(Flaky {
            failures: 0,
            calls: AtomicUsize::new(0),
            empty: false,
        });
        let config = CourseConfig::builder()
            .models(ModelSet::uniform(model))
            .build()
            .unwrap();
        let set = resolve_models(&config).unwrap();
        assert_eq!(set.text.name(), "flaky");
        assert_eq!(set.mini.name(), "flaky");
    }
}
