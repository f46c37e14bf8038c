//! Error types for the contractiq library.
//!
//! The pipeline distinguishes failures by how far they reach:
//!
//! * [`PipelineError`] — **Fatal** for the run it occurs in: the PDF cannot be
//!   rasterised, the recognition engine cannot be brought up, the model call
//!   failed on an interactive request, or an output file cannot be written.
//!   Returned as `Err(PipelineError)` from [`crate::Pipeline`] entry points.
//!
//! * [`PageError`] — **Non-fatal**: recognition failed on one page. The page
//!   degrades to zero spans and the rest of the document carries on.
//!
//! * [`ExtractionError`] — the model call or its JSON parse failed. Batch
//!   runs store it inline as `{"Error": "..."}`; interactive runs surface it
//!   wrapped in [`PipelineError::Extraction`].
//!
//! * [`EnrichmentError`] — VIN lookup failed. Logged and swallowed by the
//!   enrichment step; it never reaches callers.
//!
//! * [`StoreError`] — persistence failures, reported to the caller as-is.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the contractiq library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input was read, but is not a PDF.
    #[error("Input '{source_name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { source_name: String, magic: Vec<u8> },

    // ── Conversion (rasterisation) errors ─────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{source_name}' is corrupt: {detail}")]
    CorruptPdf { source_name: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{source_name}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { source_name: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{source_name}'")]
    WrongPassword { source_name: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Recognition errors ────────────────────────────────────────────────
    /// The recognition engine could not be initialised.
    #[error("Recognition engine unavailable: {0}")]
    RecognitionUnavailable(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Structured extraction failed for an interactive request.
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    // ── Batch / I/O errors ────────────────────────────────────────────────
    /// Batch input directory does not exist.
    #[error("Input directory '{path}' not found")]
    InputDirNotFound { path: PathBuf },

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An OCR artifact exists but could not be read or parsed.
    #[error("Failed to read OCR artifact '{path}': {detail}")]
    ArtifactReadFailed { path: PathBuf, detail: String },

    // ── Store errors ──────────────────────────────────────────────────────
    /// No stored document has the given id.
    #[error("Document {id} not found")]
    DocumentNotFound { id: i64 },

    /// The stored document has no recognised text to chat about.
    #[error("Document {id} has no OCR text")]
    NoDocumentText { id: i64 },

    /// The document store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// True for failures of the PDF → raster conversion stage.
    ///
    /// These abort a single-document run with no partial output.
    pub fn is_conversion_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::FileNotFound { .. }
                | PipelineError::PermissionDenied { .. }
                | PipelineError::NotAPdf { .. }
                | PipelineError::CorruptPdf { .. }
                | PipelineError::PasswordRequired { .. }
                | PipelineError::WrongPassword { .. }
                | PipelineError::RasterisationFailed { .. }
                | PipelineError::PdfiumBindingFailed(_)
        )
    }
}

/// A non-fatal error for a single page.
///
/// The page is kept in the OCR result with an empty span list.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The recognition engine returned an error for this page.
    #[error("Page {page}: recognition failed: {detail}")]
    RecognitionFailed { page: usize, detail: String },

    /// The recognition call did not return in time.
    #[error("Page {page}: recognition timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

/// Failure of the structured extraction step.
///
/// The `Display` text is what ends up under the `Error` key of an
/// error-only extraction record.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    /// The model call itself failed (connection, API error, …).
    #[error("model call failed: {0}")]
    ModelCall(String),

    /// The model call did not return in time.
    #[error("model call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The model returned no content.
    #[error("model returned an empty response")]
    EmptyResponse,

    /// The response was not valid JSON.
    #[error("model response is not valid JSON: {0}")]
    InvalidJson(String),

    /// The response was JSON, but not an object.
    #[error("model response is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

/// Failure of the VIN enrichment lookup. Never propagated past enrichment.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    /// VIN rejected before any network call.
    #[error("invalid VIN '{vin}': expected 17 characters, got {len}")]
    InvalidVin { vin: String, len: usize },

    /// VIN has characters outside `[A-HJ-NPR-Z0-9]`.
    #[error("invalid VIN '{vin}': only letters (except I, O, Q) and digits are allowed")]
    MalformedVin { vin: String },

    /// Transport-level failure (DNS, connect, timeout, body read).
    #[error("VIN decoder request failed: {0}")]
    Http(String),

    /// Decoder answered with a non-2xx status.
    #[error("VIN decoder returned HTTP {0}")]
    Status(u16),

    /// Decoder answered 2xx with a body of the wrong shape.
    #[error("unexpected VIN decoder payload: {0}")]
    UnexpectedPayload(String),
}

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to (de)serialise stored document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("document store lock poisoned")]
    Poisoned,
}
