//! Single-document (interactive) processing.
//!
//! [`Pipeline`] owns every collaborator a run needs (rasterizer, recognition
//! engine, language model, VIN decoder) and sequences the stages:
//!
//! ```text
//! validate ─▶ render ─▶ recognize ─▶ flatten ─▶ extract ─▶ enrich
//! ```
//!
//! Rendering failures and extraction failures end the run with an error;
//! a page whose recognition fails is kept with no text, and a failed VIN
//! lookup just leaves the record unenriched.
//!
//! Dropping the future returned by [`Pipeline::process`] stops the run at
//! the next stage boundary. A rasterisation already running on the blocking
//! pool completes and its pages are discarded.

use crate::config::PipelineConfig;
use crate::error::{ExtractionError, PageError, PipelineError};
use crate::output::{DocumentOcrResult, PageResult, ProcessOutput, ProcessStats, StoredExtraction};
use crate::pipeline::enrich::{enrich, NhtsaDecoder, VinDecoder};
use crate::pipeline::extract::{extract_fields, Extraction};
use crate::pipeline::flatten::{flatten_text, span_count};
use crate::pipeline::input::{self, PdfSource};
use crate::pipeline::llm::{resolve_model, LanguageModel};
use crate::pipeline::recognize::{
    recognize_pages, EngineHandle, HttpRecognitionEngine, RecognitionEngine,
};
use crate::pipeline::render::{render_pages, PdfiumRasterizer, Rasterizer};
use crate::store::{run_blocking, SharedStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// OCR half of a run: one [`PageResult`] per page plus what went wrong.
#[derive(Debug, Clone)]
pub struct OcrRun {
    pub pages: DocumentOcrResult,
    pub page_errors: Vec<PageError>,
    pub render_duration_ms: u64,
    pub ocr_duration_ms: u64,
}

/// The extraction pipeline and its collaborators.
pub struct Pipeline {
    config: PipelineConfig,
    rasterizer: Arc<dyn Rasterizer>,
    engine: EngineHandle,
    model: Arc<dyn LanguageModel>,
    decoder: Option<Arc<dyn VinDecoder>>,
}

impl Pipeline {
    /// Production wiring: pdfium, the HTTP recognition service, the resolved
    /// LLM provider and the NHTSA decoder (when enrichment is on).
    ///
    /// The recognition engine is created lazily on the first document.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let rasterizer = Arc::new(PdfiumRasterizer::new(&config));

        let endpoint = config.ocr_endpoint.clone();
        let timeout_secs = config.ocr_timeout_secs;
        let engine = EngineHandle::new(Arc::new(
            move || -> Result<Arc<dyn RecognitionEngine>, PipelineError> {
                Ok(Arc::new(HttpRecognitionEngine::new(&endpoint, timeout_secs)?))
            },
        ));

        let model = resolve_model(&config)?;
        let decoder: Option<Arc<dyn VinDecoder>> = if config.enrich {
            Some(Arc::new(NhtsaDecoder::from_config(&config)?))
        } else {
            None
        };

        Ok(Self::with_components(config, rasterizer, engine, model, decoder))
    }

    /// Wire a pipeline from explicit parts.
    pub fn with_components(
        config: PipelineConfig,
        rasterizer: Arc<dyn Rasterizer>,
        engine: EngineHandle,
        model: Arc<dyn LanguageModel>,
        decoder: Option<Arc<dyn VinDecoder>>,
    ) -> Self {
        Self {
            config,
            rasterizer,
            engine,
            model,
            decoder,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<dyn LanguageModel> {
        &self.model
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Rasterise a PDF and recognise every page.
    pub async fn run_ocr(&self, source: &PdfSource) -> Result<OcrRun, PipelineError> {
        let name = source.display_name();

        // ── Step 1: Validate input ───────────────────────────────────────
        input::validate(source)?;

        // ── Step 2: Rasterise pages ──────────────────────────────────────
        let render_start = Instant::now();
        let rasters = render_pages(Arc::clone(&self.rasterizer), source.clone()).await?;
        let render_duration_ms = render_start.elapsed().as_millis() as u64;
        info!(
            "Rendered {} pages of '{}' in {}ms",
            rasters.len(),
            name,
            render_duration_ms
        );

        // ── Step 3: Recognise text, page by page ─────────────────────────
        let engine = self.engine.get()?;
        let ocr_start = Instant::now();
        let (pages, page_errors) =
            recognize_pages(engine.as_ref(), &rasters, self.config.ocr_timeout_secs).await;
        let ocr_duration_ms = ocr_start.elapsed().as_millis() as u64;

        if !page_errors.is_empty() {
            warn!(
                "'{}': {} of {} pages failed recognition and were left empty",
                name,
                page_errors.len(),
                pages.len()
            );
        }
        info!(
            "Recognised {} spans on {} pages of '{}' in {}ms",
            span_count(&pages),
            pages.len(),
            name,
            ocr_duration_ms
        );

        Ok(OcrRun {
            pages,
            page_errors,
            render_duration_ms,
            ocr_duration_ms,
        })
    }

    /// Flatten an OCR result, extract fields and enrich them.
    pub async fn extract(&self, ocr: &[PageResult]) -> Result<Extraction, ExtractionError> {
        let text = flatten_text(ocr);
        let mut extraction = extract_fields(self.model.as_ref(), &text, &self.config).await?;

        if self.config.enrich {
            if let Some(ref decoder) = self.decoder {
                enrich(decoder.as_ref(), &mut extraction.fields).await;
            }
        }
        Ok(extraction)
    }

    /// Run the whole pipeline on one document.
    pub async fn process(&self, source: PdfSource) -> Result<ProcessOutput, PipelineError> {
        let total_start = Instant::now();
        info!("Processing {}", source.display_name());

        let ocr = self.run_ocr(&source).await?;

        // ── Step 4: Extract and enrich ───────────────────────────────────
        let llm_start = Instant::now();
        let extraction = self.extract(&ocr.pages).await?;
        let llm_duration_ms = llm_start.elapsed().as_millis() as u64;

        // ── Step 5: Compute stats ────────────────────────────────────────
        let stats = ProcessStats {
            page_count: ocr.pages.len(),
            span_count: span_count(&ocr.pages),
            empty_pages: ocr.pages.iter().filter(|p| p.is_empty()).count(),
            failed_pages: ocr.page_errors.len(),
            input_tokens: extraction.prompt_tokens as u64,
            output_tokens: extraction.completion_tokens as u64,
            render_duration_ms: ocr.render_duration_ms,
            ocr_duration_ms: ocr.ocr_duration_ms,
            llm_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };
        info!(
            "Processed {} pages in {}ms ({} spans, {} empty pages)",
            stats.page_count, stats.total_duration_ms, stats.span_count, stats.empty_pages
        );

        Ok(ProcessOutput {
            ocr: ocr.pages,
            extraction: extraction.fields,
            stats,
        })
    }

    /// Process one upload and persist it as a new record.
    pub async fn process_and_store(
        &self,
        filename: &str,
        source: PdfSource,
        store: &SharedStore,
    ) -> Result<StoredExtraction, PipelineError> {
        let ProcessOutput {
            ocr, extraction, ..
        } = self.process(source).await?;

        let name = filename.to_string();
        let fields = extraction.clone();
        let id = run_blocking(store, move |s| s.insert(&name, &ocr, &fields)).await?;
        info!("Stored '{}' as document {}", filename, id);
        Ok(StoredExtraction {
            id,
            filename: filename.to_string(),
            extraction,
        })
    }

    /// Unload the recognition engine. The next run re-initialises it.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("model", &self.model.name())
            .field("enrich", &self.decoder.is_some())
            .finish()
    }
}
