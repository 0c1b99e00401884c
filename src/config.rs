//! Configuration for the invoice pipeline.
//!
//! Every knob lives in one [`PipelineConfig`] built via its builder, so a
//! pipeline's behaviour can be shared across tasks, logged, and diffed
//! between two runs. Defaults are deliberately boring: a local SQLite file,
//! a local upload directory, a 20 MB cap, and provider auto-detection from
//! the environment.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Doc2OrderError;
use crate::pipeline::extract::InvoiceExtractor;

/// Configuration for [`crate::ingest::InvoicePipeline`].
///
/// # Example
/// ```rust
/// use doc2order::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .db_path("data/app.db")
///     .upload_dir("data/uploads")
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// SQLite database file; created (with parent directories) if missing.
    pub db_path: PathBuf,

    /// Directory uploaded bytes are stored under.
    pub upload_dir: PathBuf,

    /// Upload size cap in bytes. Default: 20 MB.
    ///
    /// Vision APIs reject payloads around this size anyway; rejecting early
    /// gives the caller a clear error instead of a provider-side one
    /// minutes later.
    pub max_upload_bytes: usize,

    /// Vision provider name (e.g. "openai", "anthropic"). If `None` along
    /// with `extractor`, the provider factory auto-detects from API-key
    /// environment variables.
    pub provider_name: Option<String>,

    /// Model identifier, e.g. "gpt-4.1-nano", "claude-sonnet-4-20250514".
    /// If `None`, the provider default is used.
    pub model: Option<String>,

    /// Pre-constructed extractor. Takes precedence over `provider_name` —
    /// this is the seam tests and embedders inject through.
    pub extractor: Option<Arc<dyn InvoiceExtractor>>,

    /// Sampling temperature for the extraction call. Default: 0.0.
    ///
    /// Reading fields off a page is transcription, not creativity; zero
    /// keeps the model deterministic and faithful.
    pub temperature: f32,

    /// Maximum tokens the model may generate for the record. Default: 4096.
    pub max_tokens: usize,

    /// Custom extraction system prompt. If `None`, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Longest-edge cap (pixels) when rasterising a PDF page. Default: 2000.
    ///
    /// Caps memory regardless of physical page size and lands in the
    /// image-size sweet spot for vision models.
    pub max_pixels: u32,

    /// Per-subscriber event buffer. Default: 32.
    ///
    /// A full buffer drops events for that observer rather than ever
    /// blocking the pipeline.
    pub event_buffer: usize,

    /// Download timeout for URL ingestion in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/doc2order.db"),
            upload_dir: PathBuf::from("data/uploads"),
            max_upload_bytes: 20 * 1024 * 1024,
            provider_name: None,
            model: None,
            extractor: None,
            temperature: 0.0,
            max_tokens: 4096,
            system_prompt: None,
            max_pixels: 2000,
            event_buffer: 32,
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("db_path", &self.db_path)
            .field("upload_dir", &self.upload_dir)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field(
                "extractor",
                &self.extractor.as_ref().map(|_| "<dyn InvoiceExtractor>"),
            )
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_pixels", &self.max_pixels)
            .field("event_buffer", &self.event_buffer)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build a config from `DOC2ORDER_*` environment variables, falling back
    /// to the defaults above. Provider API keys are read later by the
    /// provider factory, not here.
    pub fn from_env() -> Result<Self, Doc2OrderError> {
        let mut builder = Self::builder();
        if let Ok(db) = std::env::var("DOC2ORDER_DB") {
            builder = builder.db_path(db);
        }
        if let Ok(dir) = std::env::var("DOC2ORDER_UPLOAD_DIR") {
            builder = builder.upload_dir(dir);
        }
        if let Ok(mb) = std::env::var("DOC2ORDER_MAX_UPLOAD_MB") {
            let mb: usize = mb.parse().map_err(|_| {
                Doc2OrderError::InvalidConfig(format!("DOC2ORDER_MAX_UPLOAD_MB: '{mb}' is not a number"))
            })?;
            builder = builder.max_upload_bytes(mb * 1024 * 1024);
        }
        if let Ok(provider) = std::env::var("DOC2ORDER_PROVIDER") {
            if !provider.is_empty() {
                builder = builder.provider_name(provider);
            }
        }
        if let Ok(model) = std::env::var("DOC2ORDER_MODEL") {
            if !model.is_empty() {
                builder = builder.model(model);
            }
        }
        builder.build()
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.db_path = path.into();
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn InvoiceExtractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_pixels(mut self, px: u32) -> Self {
        self.config.max_pixels = px.max(100);
        self
    }

    pub fn event_buffer(mut self, n: usize) -> Self {
        self.config.event_buffer = n.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Doc2OrderError> {
        let c = &self.config;
        if c.max_upload_bytes == 0 {
            return Err(Doc2OrderError::InvalidConfig(
                "max_upload_bytes must be > 0".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(Doc2OrderError::InvalidConfig("max_tokens must be > 0".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = PipelineConfig::default();
        assert_eq!(c.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(c.event_buffer, 32);
        assert_eq!(c.temperature, 0.0);
        assert!(c.provider_name.is_none());
    }

    #[test]
    fn builder_clamps_out_of_range_values() {
        let c = PipelineConfig::builder()
            .temperature(9.0)
            .max_pixels(1)
            .event_buffer(0)
            .build()
            .unwrap();
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.max_pixels, 100);
        assert_eq!(c.event_buffer, 1);
    }

    #[test]
    fn zero_upload_cap_is_rejected() {
        let err = PipelineConfig::builder().max_upload_bytes(0).build();
        assert!(matches!(err, Err(Doc2OrderError::InvalidConfig(_))));
    }
}
