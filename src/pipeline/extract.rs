//! The extraction port and its vision-LLM implementation.
//!
//! [`InvoiceExtractor`] is the seam the orchestrator calls through: one
//! normalized PNG in, one [`ExtractedInvoice`] out. The orchestrator never
//! knows which provider sits behind it — tests inject a scripted
//! implementation, production resolves one from configuration.
//!
//! The provider contract is strict JSON, but models disobey often enough
//! that the reply passes through a deterministic cleanup (strip a fenced
//! wrapper, trim chatter) before deserialization. "The call failed" and
//! "the reply did not match the schema" stay distinct in [`ExtractError`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::{Doc2OrderError, ExtractError};
use crate::invoice::ExtractedInvoice;
use crate::pipeline::encode;
use crate::prompts::DEFAULT_SYSTEM_PROMPT;

/// Turns one normalized invoice image into a structured record.
#[async_trait]
pub trait InvoiceExtractor: Send + Sync {
    async fn extract(&self, png: &[u8]) -> Result<ExtractedInvoice, ExtractError>;
}

/// Production extractor over an [`LLMProvider`] vision model.
pub struct VlmExtractor {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
}

impl VlmExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        VlmExtractor {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl InvoiceExtractor for VlmExtractor {
    async fn extract(&self, png: &[u8]) -> Result<ExtractedInvoice, ExtractError> {
        let start = Instant::now();
        let image = encode::encode_png(png);

        // System prompt carries the schema; the user turn carries the image.
        let messages = vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user_with_images("Extract the invoice fields.", vec![image]),
        ];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| {
                warn!("extraction provider call failed: {e}");
                ExtractError::Provider {
                    detail: e.to_string(),
                }
            })?;

        debug!(
            input_tokens = response.prompt_tokens,
            output_tokens = response.completion_tokens,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "extraction reply received"
        );

        parse_reply(&response.content)
    }
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n?(.*?)\n?```\s*$").unwrap());

/// Parse a provider reply into an invoice record.
///
/// Strips a single outer code fence if the model wrapped its JSON despite
/// the prompt, then deserializes. Any mismatch with the record shape is an
/// [`ExtractError::Schema`] carrying serde's field-level message.
pub fn parse_reply(content: &str) -> Result<ExtractedInvoice, ExtractError> {
    let trimmed = content.trim();
    let cleaned = match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    };

    serde_json::from_str(&cleaned).map_err(|e| ExtractError::Schema {
        detail: format!("{e}; reply began with: {:.80}", cleaned),
    })
}

/// Resolve the extractor, from most-specific to least-specific.
///
/// 1. **Pre-built extractor** (`config.extractor`) — tests and embedders
///    supply the whole implementation.
/// 2. **Named provider** (`config.provider_name`) + optional model — the
///    factory reads the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`) —
///    execution-environment level choice, honoured before auto-detection.
/// 4. **Full auto-detection** (`ProviderFactory::from_env`) — scans the
///    known API-key variables and takes the first available provider, with
///    OpenAI preferred when several keys are present.
pub fn resolve_extractor(
    config: &PipelineConfig,
) -> Result<Arc<dyn InvoiceExtractor>, Doc2OrderError> {
    if let Some(ref extractor) = config.extractor {
        return Ok(Arc::clone(extractor));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(VlmExtractor::new(provider, config)))
}

fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, Doc2OrderError> {
    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    // Prefer OpenAI explicitly when its key is present so multi-key
    // environments stay predictable.
    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Doc2OrderError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from the environment.\n\
                 Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                 Error: {e}"
            ),
        })?;
    Ok(llm_provider)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Doc2OrderError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Doc2OrderError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
