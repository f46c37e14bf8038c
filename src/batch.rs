//! Batch (directory) mode.
//!
//! Two phases over an input directory of PDFs:
//!
//! 1. **OCR**: each `<stem>.pdf` gets an artifact `<stem>_ocr.json` in the
//!    output directory. If that artifact already exists and is non-empty the
//!    document is skipped; the check is by presence only, so a changed PDF
//!    with an unchanged name reuses the stale artifact.
//! 2. **Extraction**: every `*_ocr.json` in the output directory (not just the
//!    ones written by this run) is flattened, extracted and enriched. Results
//!    go to one `extraction_results.json` keyed by source file name.
//!
//! A failing document is recorded as `{"Error": "..."}` under its name and
//! the batch carries on. Only a missing input directory or an unwritable
//! output directory fails the whole run.

use crate::error::PipelineError;
use crate::fields::ExtractionOutcome;
use crate::output::DocumentOcrResult;
use crate::pipeline::input::{has_pdf_extension, PdfSource};
use crate::process::Pipeline;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Suffix of per-document OCR artifacts.
pub const ARTIFACT_SUFFIX: &str = "_ocr.json";

/// Name of the consolidated extraction file.
pub const RESULTS_FILE: &str = "extraction_results.json";

/// Counters for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// PDFs found in the input directory.
    pub documents: usize,
    /// Documents whose OCR ran in this batch.
    pub ocr_processed: usize,
    /// Documents skipped because their artifact already existed.
    pub ocr_skipped: usize,
    /// Pages recognised by the OCR runs of this batch.
    pub ocr_pages: usize,
    pub ocr_failed: usize,
    pub extracted: usize,
    pub extraction_failed: usize,
    pub results_path: PathBuf,
}

enum OcrStatus {
    Processed { pages: usize },
    Skipped,
    Failed(String),
}

struct OcrOutcome {
    filename: String,
    artifact: String,
    status: OcrStatus,
}

/// Artifact path for a source PDF: `<output_dir>/<stem>_ocr.json`.
pub fn artifact_path(output_dir: &Path, pdf: &Path) -> PathBuf {
    let stem = pdf
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{stem}{ARTIFACT_SUFFIX}"))
}

/// True when `path` exists with non-zero size.
pub fn artifact_is_present(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

/// Run both batch phases over `input_dir`, writing into `output_dir`.
pub async fn process_directory(
    pipeline: &Pipeline,
    input_dir: &Path,
    output_dir: &Path,
) -> Result<BatchSummary, PipelineError> {
    let config = pipeline.config();
    let callback = config.progress_callback.clone();

    // ── Step 1: Enumerate inputs ─────────────────────────────────────────
    if !input_dir.is_dir() {
        return Err(PipelineError::InputDirNotFound {
            path: input_dir.to_path_buf(),
        });
    }
    std::fs::create_dir_all(output_dir).map_err(|e| PipelineError::OutputWriteFailed {
        path: output_dir.to_path_buf(),
        source: e,
    })?;

    let pdfs = list_pdfs(input_dir)?;
    info!(
        "Batch: {} PDFs in {}, output to {}",
        pdfs.len(),
        input_dir.display(),
        output_dir.display()
    );
    if let Some(ref cb) = callback {
        cb.on_batch_start(pdfs.len());
    }

    // ── Step 2: OCR phase ────────────────────────────────────────────────
    let concurrency = config.batch_concurrency.max(1);
    let ocr_outcomes: Vec<OcrOutcome> = stream::iter(pdfs.iter())
        .map(|pdf| ocr_document(pipeline, pdf, output_dir))
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut summary = BatchSummary {
        documents: pdfs.len(),
        ..Default::default()
    };
    let mut source_names: HashMap<String, String> = HashMap::new();
    let mut results: BTreeMap<String, ExtractionOutcome> = BTreeMap::new();

    for outcome in ocr_outcomes {
        match outcome.status {
            OcrStatus::Processed { pages } => {
                summary.ocr_processed += 1;
                summary.ocr_pages += pages;
            }
            OcrStatus::Skipped => summary.ocr_skipped += 1,
            OcrStatus::Failed(msg) => {
                summary.ocr_failed += 1;
                results.insert(outcome.filename.clone(), ExtractionOutcome::failed(msg));
            }
        }
        source_names.insert(outcome.artifact, outcome.filename);
    }

    // ── Step 3: Extraction phase over every artifact present ─────────────
    let artifacts = list_artifacts(output_dir)?;
    info!("Batch: extracting from {} OCR artifacts", artifacts.len());

    let extracted: Vec<(String, ExtractionOutcome)> = stream::iter(artifacts.iter())
        .map(|artifact| {
            let artifact_name = file_name(artifact);
            let key = source_names
                .get(&artifact_name)
                .cloned()
                .unwrap_or_else(|| source_name_for(&artifact_name));
            async move {
                let outcome = extract_artifact(pipeline, artifact).await;
                (key, outcome)
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    for (key, outcome) in extracted {
        if let ExtractionOutcome::Failed { ref error } = outcome {
            error!("Extraction failed for {}: {}", key, error);
        }
        results.insert(key, outcome);
    }
    summary.extraction_failed = results.values().filter(|o| o.is_failed()).count();
    summary.extracted = results.len() - summary.extraction_failed;

    // ── Step 4: Write consolidated results ───────────────────────────────
    let results_path = output_dir.join(RESULTS_FILE);
    write_json_atomic(&results_path, &results).await?;
    summary.results_path = results_path;

    if let Some(ref cb) = callback {
        cb.on_batch_complete(summary.extracted, summary.extraction_failed);
    }
    info!(
        "Batch complete: {} OCR'd, {} skipped, {} extracted, {} failed → {}",
        summary.ocr_processed,
        summary.ocr_skipped,
        summary.extracted,
        summary.extraction_failed,
        summary.results_path.display()
    );
    Ok(summary)
}

async fn ocr_document(pipeline: &Pipeline, pdf: &Path, output_dir: &Path) -> OcrOutcome {
    let callback = pipeline.config().progress_callback.as_ref();
    let filename = file_name(pdf);
    let artifact = artifact_path(output_dir, pdf);
    let artifact_name = file_name(&artifact);

    let outcome = |status| OcrOutcome {
        filename: filename.clone(),
        artifact: artifact_name.clone(),
        status,
    };

    if artifact_is_present(&artifact) {
        debug!("Skipping OCR for {}: {} exists", filename, artifact.display());
        if let Some(cb) = callback {
            cb.on_document_skipped(&filename);
        }
        return outcome(OcrStatus::Skipped);
    }

    if let Some(cb) = callback {
        cb.on_document_start(&filename);
    }

    let result = match pipeline.run_ocr(&PdfSource::from_path(pdf)).await {
        Ok(run) => write_json_atomic(&artifact, &run.pages)
            .await
            .map(|()| run.pages.len()),
        Err(e) => Err(e),
    };

    match result {
        Ok(pages) => {
            info!("OCR done for {} ({} pages) → {}", filename, pages, artifact.display());
            if let Some(cb) = callback {
                cb.on_document_complete(&filename, pages);
            }
            outcome(OcrStatus::Processed { pages })
        }
        Err(e) => {
            error!("OCR failed for {}: {}", filename, e);
            if let Some(cb) = callback {
                cb.on_document_error(&filename, e.to_string());
            }
            outcome(OcrStatus::Failed(e.to_string()))
        }
    }
}

async fn extract_artifact(pipeline: &Pipeline, artifact: &Path) -> ExtractionOutcome {
    let pages = match read_artifact(artifact).await {
        Ok(pages) => pages,
        Err(e) => {
            warn!("{}", e);
            return ExtractionOutcome::failed(e);
        }
    };
    pipeline
        .extract(&pages)
        .await
        .map(|extraction| extraction.fields)
        .into()
}

/// Load an OCR artifact.
pub async fn read_artifact(path: &Path) -> Result<DocumentOcrResult, PipelineError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::ArtifactReadFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    serde_json::from_slice(&bytes).map_err(|e| PipelineError::ArtifactReadFailed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    list_files(dir, |p| has_pdf_extension(p))
}

/// Artifacts eligible for extraction. Empty files are leftovers of an
/// interrupted write, the same ones the OCR phase redoes.
fn list_artifacts(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    list_files(dir, |p| {
        file_name(p).ends_with(ARTIFACT_SUFFIX) && artifact_is_present(p)
    })
}

/// Regular files in `dir` matching `keep`, sorted by file name.
fn list_files(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>, PipelineError> {
    let entries = std::fs::read_dir(dir).map_err(|_| PipelineError::InputDirNotFound {
        path: dir.to_path_buf(),
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && keep(p))
        .collect();
    files.sort_by_key(|p| file_name(p));
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `<stem>_ocr.json` → `<stem>.pdf`, for artifacts with no known source.
fn source_name_for(artifact_name: &str) -> String {
    let stem = artifact_name
        .strip_suffix(ARTIFACT_SUFFIX)
        .unwrap_or(artifact_name);
    format!("{stem}.pdf")
}

/// Serialise with 4-space indentation.
fn to_json_pretty<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}

/// Write JSON via a temp file in the same directory, then rename into place,
/// so readers never see a partial file.
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let write_failed = |e: std::io::Error| PipelineError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let bytes = to_json_pretty(value).map_err(|e| write_failed(std::io::Error::other(e)))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let target = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("Write task panicked: {}", e)))?
    .map_err(write_failed)
}
