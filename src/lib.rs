//! # contractiq
//!
//! Turn scanned vehicle purchase and financing contracts into structured,
//! checkable records.
//!
//! ## Why this crate?
//!
//! Dealer paperwork arrives as scans: there is no text layer to parse, and
//! the numbers that matter (APR, amount financed, monthly payment, VIN) are
//! scattered across pages in varying layouts. This crate OCRs every page,
//! hands the recognised text to a language model with a fixed extraction
//! schema, and decodes the VIN against the NHTSA registry, so every contract
//! ends up as the same JSON record with an explicit `"Not Found"` for
//! anything missing.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      path or upload bytes, `%PDF` check
//!  ├─ 2. Render     rasterise pages at 150 DPI via pdfium (spawn_blocking)
//!  ├─ 3. Recognise  OCR each page, normalise spans (text, box, confidence)
//!  ├─ 4. Flatten    join span texts in page order
//!  ├─ 5. Extract    LLM → JSON object → ExtractedFields
//!  └─ 6. Enrich     VIN → make / model / year via NHTSA vPIC
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use contractiq::{PdfSource, Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .provider_name("ollama")
//!         .build()?;
//!     let pipeline = Pipeline::new(config)?;
//!     let output = pipeline.process(PdfSource::from_path("contract.pdf")).await?;
//!     println!("{}", serde_json::to_string_pretty(&output.extraction)?);
//!     pipeline.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! Directory mode writes one `<stem>_ocr.json` per PDF and a consolidated
//! `extraction_results.json`; see [`batch::process_directory`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `contractiq` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! contractiq = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod chat;
pub mod config;
pub mod error;
pub mod fields;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{process_directory, BatchSummary};
pub use chat::chat_with_document;
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{EnrichmentError, ExtractionError, PageError, PipelineError, StoreError};
pub use fields::{ExtractedFields, ExtractionOutcome, FieldValue, VinDetails, NOT_FOUND};
pub use output::{
    BoundingBox, DocumentOcrResult, PageResult, Point, ProcessOutput, ProcessStats,
    StoredExtraction, TextSpan,
};
pub use pipeline::input::PdfSource;
pub use pipeline::llm::{ChatRole, ChatTurn, LanguageModel, ReplyFormat};
pub use process::Pipeline;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{DocumentRecord, DocumentStore, DocumentSummary, SharedStore, SqliteStore};
