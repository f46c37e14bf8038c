//! Language-model boundary: chat turns in, text out.
//!
//! [`LanguageModel`] is the only thing extraction and chat depend on, so
//! tests can script replies without a provider. [`EdgequakeModel`] adapts any
//! `edgequake_llm` provider.
//!
//! ## Retry Strategy
//!
//! Local inference servers and hosted APIs both fail transiently (model still
//! loading, HTTP 429/503). [`complete_with_retry`] retries with exponential
//! backoff (`retry_backoff_ms * 2^(attempt-1)`): with a 500 ms base and two
//! retries the waits are 500 ms then 1 s. Each attempt is bounded by
//! `api_timeout_secs`. Each wait is capped at [`MAX_BACKOFF_MS`]. After the
//! last attempt the last error is returned and the caller degrades per its
//! own policy.

use crate::config::PipelineConfig;
use crate::error::{ExtractionError, PipelineError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Default model when the provider is Ollama.
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

/// Default model for every other provider.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Longest single wait between model call attempts.
pub const MAX_BACKOFF_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// What the reply must look like.
///
/// `Json` asks the provider for a JSON object (Ollama `format: "json"`,
/// OpenAI `response_format: json_object`); `Text` leaves it free-form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyFormat {
    #[default]
    Text,
    Json,
}

/// A model reply with token usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// A chat-completion model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model name for logs.
    fn name(&self) -> String;

    async fn complete(
        &self,
        turns: &[ChatTurn],
        format: ReplyFormat,
    ) -> Result<ModelReply, ExtractionError>;
}

/// [`LanguageModel`] backed by an `edgequake_llm` provider.
pub struct EdgequakeModel {
    provider: Arc<dyn LLMProvider>,
    label: String,
    options: CompletionOptions,
}

impl EdgequakeModel {
    /// `label` names the provider/model pair in logs, e.g. "ollama/llama3.2".
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        label: impl Into<String>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            provider,
            label: label.into(),
            options: build_options(config),
        }
    }
}

impl std::fmt::Debug for EdgequakeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgequakeModel")
            .field("label", &self.label)
            .finish()
    }
}

#[async_trait]
impl LanguageModel for EdgequakeModel {
    fn name(&self) -> String {
        self.label.clone()
    }

    async fn complete(
        &self,
        turns: &[ChatTurn],
        format: ReplyFormat,
    ) -> Result<ModelReply, ExtractionError> {
        let messages: Vec<ChatMessage> = turns
            .iter()
            .map(|t| match t.role {
                ChatRole::System => ChatMessage::system(&t.content),
                ChatRole::User => ChatMessage::user(&t.content),
                ChatRole::Assistant => ChatMessage::assistant(&t.content),
            })
            .collect();

        let response = self
            .provider
            .chat(&messages, Some(&options_for(&self.options, format)))
            .await
            .map_err(|e| ExtractionError::ModelCall(e.to_string()))?;

        Ok(ModelReply {
            content: response.content,
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
        })
    }
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Per-call options: the base options plus the reply format.
fn options_for(base: &CompletionOptions, format: ReplyFormat) -> CompletionOptions {
    let mut options = base.clone();
    options.response_format = match format {
        ReplyFormat::Json => Some("json_object".to_string()),
        ReplyFormat::Text => None,
    };
    options
}

/// Wait before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

/// Default model for a provider name.
pub fn default_model_for(provider: &str) -> &'static str {
    if provider.eq_ignore_ascii_case("ollama") {
        DEFAULT_OLLAMA_MODEL
    } else {
        DEFAULT_MODEL
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PipelineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model` or the
///    provider's default model.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **`OPENAI_API_KEY`** present → OpenAI.
/// 5. **Auto-detection** via `ProviderFactory::from_env`.
///
/// Returns the provider and a `provider/model` label for logs.
pub fn resolve_provider(
    config: &PipelineConfig,
) -> Result<(Arc<dyn LLMProvider>, String), PipelineError> {
    if let Some(ref provider) = config.provider {
        let label = config.model.clone().unwrap_or_else(|| "custom".to_string());
        return Ok((Arc::clone(provider), label));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or_else(|| default_model_for(name));
        return Ok((create_provider(name, model)?, format!("{name}/{model}")));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return Ok((create_provider(&prov, &model)?, format!("{prov}/{model}")));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return Ok((create_provider("openai", model)?, format!("openai/{model}")));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Run a local Ollama server with --provider ollama, or set OPENAI_API_KEY.\n\
                Error: {}",
                e
            ),
        })?;

    Ok((llm_provider, "auto".to_string()))
}

/// Resolve the provider and wrap it as a [`LanguageModel`].
pub fn resolve_model(config: &PipelineConfig) -> Result<Arc<dyn LanguageModel>, PipelineError> {
    let (provider, label) = resolve_provider(config)?;
    info!("Using model {}", label);
    Ok(Arc::new(EdgequakeModel::new(provider, label, config)))
}

/// Call the model with a per-attempt timeout and bounded retries.
pub async fn complete_with_retry(
    model: &dyn LanguageModel,
    turns: &[ChatTurn],
    format: ReplyFormat,
    config: &PipelineConfig,
) -> Result<ModelReply, ExtractionError> {
    let start = Instant::now();
    let per_call = Duration::from_secs(config.api_timeout_secs);
    let mut last_err = ExtractionError::ModelCall("no attempt made".into());

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_delay(config.retry_backoff_ms, attempt);
            warn!(
                "Model {}: retry {}/{} after {}ms",
                model.name(),
                attempt,
                config.max_retries,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        let result = match timeout(per_call, model.complete(turns, format)).await {
            Ok(r) => r,
            Err(_) => Err(ExtractionError::Timeout {
                secs: config.api_timeout_secs,
            }),
        };

        match result {
            Ok(reply) => {
                debug!(
                    "Model {}: {} input tokens, {} output tokens, {:?}",
                    model.name(),
                    reply.prompt_tokens,
                    reply.completion_tokens,
                    start.elapsed()
                );
                return Ok(reply);
            }
            Err(e) => {
                warn!("Model {}: attempt {} failed: {}", model.name(), attempt + 1, e);
                last_err = e;
            }
        }
    }

    Err(last_err)
}
