//! Recognition engine boundary and per-page recognition.
//!
//! The engine is an external capability: the crate ships an HTTP client for
//! a PaddleOCR-serving style endpoint, and anything else can plug in by
//! implementing [`RecognitionEngine`].
//!
//! ## Engine lifecycle
//!
//! Loading an OCR model is expensive, so one instance serves every document
//! run. [`EngineHandle`] owns it: the first [`EngineHandle::get`] builds the
//! engine, later calls share it, and [`EngineHandle::shutdown`] unloads it.
//! A `get` after shutdown builds a fresh one.
//!
//! ## Failure policy
//!
//! A failed or timed-out recognition call degrades that page to zero spans.
//! Pages are recognised one after another; a document's pages never run
//! concurrently against the engine.

use crate::error::{PageError, PipelineError};
use crate::output::{DocumentOcrResult, PageResult};
use crate::pipeline::encode::encode_page;
use crate::pipeline::layout::{normalize, RecognitionResult};
use crate::pipeline::render::RasterPage;
use async_trait::async_trait;
use image::DynamicImage;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// An OCR engine: one page image in, one raw result out.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Recognise the text on one page image.
    async fn recognize(&self, page: usize, image: &DynamicImage)
        -> Result<RecognitionResult, PageError>;

    /// Release model resources. Called once by [`EngineHandle::shutdown`].
    async fn unload(&self) {}
}

/// Builds the engine on first use.
pub type EngineFactory =
    Arc<dyn Fn() -> Result<Arc<dyn RecognitionEngine>, PipelineError> + Send + Sync>;

/// Owner of the single shared recognition engine instance.
pub struct EngineHandle {
    factory: EngineFactory,
    slot: Mutex<Option<Arc<dyn RecognitionEngine>>>,
}

impl EngineHandle {
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            factory,
            slot: Mutex::new(None),
        }
    }

    /// Wrap an already-built engine. After a shutdown the same instance is
    /// handed out again.
    pub fn from_engine(engine: Arc<dyn RecognitionEngine>) -> Self {
        Self::new(Arc::new(
            move || -> Result<Arc<dyn RecognitionEngine>, PipelineError> {
                Ok(Arc::clone(&engine))
            },
        ))
    }

    /// The engine, initialising it if needed.
    pub fn get(&self) -> Result<Arc<dyn RecognitionEngine>, PipelineError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| PipelineError::Internal("recognition engine lock poisoned".into()))?;
        if let Some(engine) = slot.as_ref() {
            return Ok(Arc::clone(engine));
        }
        let engine = (self.factory)()?;
        info!("Recognition engine '{}' initialised", engine.name());
        *slot = Some(Arc::clone(&engine));
        Ok(engine)
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Unload the engine if one is loaded.
    pub async fn shutdown(&self) {
        let engine = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(engine) = engine {
            engine.unload().await;
            info!("Recognition engine '{}' unloaded", engine.name());
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Client for an HTTP OCR service.
///
/// Request: `POST {endpoint}` with `{"file": <base64 PNG>, "fileType": 1}`.
/// Response: any shape [`RecognitionResult::from_json`] understands, usually
/// `{"errorCode": 0, "result": {"ocrResults": [{"prunedResult": {...}}]}}`.
#[derive(Debug, Clone)]
pub struct HttpRecognitionEngine {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRecognitionEngine {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PipelineError::RecognitionUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl RecognitionEngine for HttpRecognitionEngine {
    fn name(&self) -> &str {
        "http"
    }

    async fn recognize(
        &self,
        page: usize,
        image: &DynamicImage,
    ) -> Result<RecognitionResult, PageError> {
        let failed = |detail: String| PageError::RecognitionFailed { page, detail };

        let b64 = encode_page(image).map_err(|e| failed(format!("PNG encoding: {e}")))?;
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "file": b64, "fileType": 1 }))
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {}", status.as_u16())));
        }

        let body: Value = resp.json().await.map_err(|e| failed(e.to_string()))?;
        if let Some(code) = body.get("errorCode").and_then(Value::as_i64) {
            if code != 0 {
                let msg = body
                    .get("errorMsg")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(failed(format!("service error {code}: {msg}")));
            }
        }

        Ok(RecognitionResult::from_json(&body))
    }
}

/// Recognise one page, degrading any failure to an empty page.
///
/// The error, if any, is returned alongside so callers can count it.
pub async fn recognize_page(
    engine: &dyn RecognitionEngine,
    page: &RasterPage,
    timeout_secs: u64,
) -> (PageResult, Option<PageError>) {
    let call = engine.recognize(page.page, &page.image);
    let err = match tokio::time::timeout(Duration::from_secs(timeout_secs), call).await {
        Ok(Ok(result)) => return (normalize(page.page, &result), None),
        Ok(Err(e)) => e,
        Err(_) => PageError::Timeout {
            page: page.page,
            secs: timeout_secs,
        },
    };
    warn!("{}; page kept with no text", err);
    (PageResult::empty(page.page), Some(err))
}

/// Recognise every page in order. Always returns one result per page.
pub async fn recognize_pages(
    engine: &dyn RecognitionEngine,
    pages: &[RasterPage],
    timeout_secs: u64,
) -> (DocumentOcrResult, Vec<PageError>) {
    let mut results = Vec::with_capacity(pages.len());
    let mut errors = Vec::new();
    for page in pages {
        let (result, err) = recognize_page(engine, page, timeout_secs).await;
        debug!("Page {}: {} spans", result.page, result.lines.len());
        results.push(result);
        errors.extend(err);
    }
    (results, errors)
}
