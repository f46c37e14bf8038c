//! Configuration for the extraction pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! [`PipelineConfigBuilder`]. One struct for every knob keeps configs easy to
//! share across worker tasks and to log when comparing two runs.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default recognition service endpoint (PaddleOCR-serving style).
pub const DEFAULT_OCR_ENDPOINT: &str = "http://127.0.0.1:8866/ocr";

/// Default VIN decoder base URL (NHTSA vPIC).
pub const DEFAULT_VIN_DECODER_URL: &str = "https://vpic.nhtsa.dot.gov/api/vehicles/decodevin";

/// Upper bound accepted for [`PipelineConfig::max_retries`].
pub const MAX_RETRIES: u32 = 10;

/// Configuration for an extraction run.
///
/// # Example
/// ```rust
/// use contractiq::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .dpi(150)
///     .model("llama3.2")
///     .provider_name("ollama")
///     .build()
///     .unwrap();
/// assert_eq!(config.vin_timeout_secs, 10);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rendering DPI used when rasterising each page. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Longest-edge cap in pixels for a rendered page. Default: 4000.
    ///
    /// A letter page at 150 DPI is 1275 × 1650 px; the cap only bites on
    /// oversized pages (drawings, posters) that would otherwise exhaust memory.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Explicit path to the pdfium shared library.
    /// If None, `PDFIUM_LIB_PATH` is consulted, then the system library.
    pub pdfium_library: Option<PathBuf>,

    /// Recognition service endpoint. Default: [`DEFAULT_OCR_ENDPOINT`].
    pub ocr_endpoint: String,

    /// Per-page recognition timeout in seconds. Default: 120.
    pub ocr_timeout_secs: u64,

    /// LLM model identifier, e.g. "llama3.2", "gpt-4.1-nano".
    /// If None, uses the provider's default for extraction.
    pub model: Option<String>,

    /// LLM provider name (e.g. "ollama", "openai", "anthropic").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Field extraction wants the same answer for the same contract every time.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 2048.
    pub max_tokens: usize,

    /// Retry attempts on a failed model call. Range: 0–[`MAX_RETRIES`]. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per model call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Override for the extraction instructions. If None, uses the built-in prompt.
    pub system_prompt: Option<String>,

    /// Run VIN enrichment after extraction. Default: true.
    pub enrich: bool,

    /// VIN decoder base URL. Default: [`DEFAULT_VIN_DECODER_URL`].
    pub vin_decoder_url: String,

    /// VIN decoder timeout in seconds. Default: 10.
    pub vin_timeout_secs: u64,

    /// Documents processed concurrently in batch mode. Default: 1.
    pub batch_concurrency: usize,

    /// Receives batch progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 4000,
            password: None,
            pdfium_library: None,
            ocr_endpoint: DEFAULT_OCR_ENDPOINT.to_string(),
            ocr_timeout_secs: 120,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 2048,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            system_prompt: None,
            enrich: true,
            vin_decoder_url: DEFAULT_VIN_DECODER_URL.to_string(),
            vin_timeout_secs: 10,
            batch_concurrency: 1,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("pdfium_library", &self.pdfium_library)
            .field("ocr_endpoint", &self.ocr_endpoint)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("enrich", &self.enrich)
            .field("vin_decoder_url", &self.vin_decoder_url)
            .field("vin_timeout_secs", &self.vin_timeout_secs)
            .field("batch_concurrency", &self.batch_concurrency)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn ocr_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.ocr_endpoint = url.into();
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
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

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn enrich(mut self, v: bool) -> Self {
        self.config.enrich = v;
        self
    }

    pub fn vin_decoder_url(mut self, url: impl Into<String>) -> Self {
        self.config.vin_decoder_url = url.into();
        self
    }

    pub fn vin_timeout_secs(mut self, secs: u64) -> Self {
        self.config.vin_timeout_secs = secs;
        self
    }

    pub fn batch_concurrency(mut self, n: usize) -> Self {
        self.config.batch_concurrency = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(PipelineError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.batch_concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "Batch concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_retries > MAX_RETRIES {
            return Err(PipelineError::InvalidConfig(format!(
                "max_retries must be at most {MAX_RETRIES}, got {}",
                c.max_retries
            )));
        }
        if c.api_timeout_secs == 0 || c.ocr_timeout_secs == 0 || c.vin_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "Timeouts must be at least 1 second".into(),
            ));
        }
        for (name, url) in [
            ("OCR endpoint", &c.ocr_endpoint),
            ("VIN decoder URL", &c.vin_decoder_url),
        ] {
            if reqwest::Url::parse(url).is_err() {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} is not a valid URL: '{url}'"
                )));
            }
        }
        Ok(self.config)
    }
}
