//! Integration tests for the contract pipeline.
//!
//! The rasterizer, recognition engine, language model and VIN decoder are
//! replaced by in-process fakes, so these run without pdfium, an OCR
//! service or an LLM. The live test at the bottom is gated behind
//! `E2E_ENABLED`.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use contractiq::pipeline::enrich::VinDecoder;
use contractiq::pipeline::flatten::flatten_text;
use contractiq::pipeline::layout::RecognitionResult;
use contractiq::pipeline::llm::ModelReply;
use contractiq::pipeline::recognize::{EngineHandle, RecognitionEngine};
use contractiq::pipeline::render::{RasterPage, Rasterizer};
use contractiq::{
    process_directory, ChatTurn, DocumentOcrResult, DocumentRecord, DocumentStore,
    DocumentSummary, EnrichmentError, ExtractedFields, ExtractionError, FieldValue,
    LanguageModel, PageError, PdfSource, Pipeline, PipelineConfig, PipelineError, ReplyFormat,
    SharedStore, SqliteStore, StoreError, VinDetails, NOT_FOUND,
};
use image::DynamicImage;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Produces `pages` blank pages; any source whose name contains "broken"
/// fails like an unreadable PDF.
struct FakeRasterizer {
    pages: usize,
}

impl Rasterizer for FakeRasterizer {
    fn rasterize(&self, source: &PdfSource) -> Result<Vec<RasterPage>, PipelineError> {
        let name = source.display_name();
        if name.contains("broken") {
            return Err(PipelineError::CorruptPdf {
                source_name: name,
                detail: "xref table not found".into(),
            });
        }
        Ok((1..=self.pages)
            .map(|page| RasterPage {
                page,
                image: DynamicImage::new_rgb8(4, 4),
            })
            .collect())
    }
}

/// Returns scripted texts per page (cycling) and counts calls.
#[derive(Default)]
struct ScriptedEngine {
    pages: Vec<Vec<&'static str>>,
    failing_pages: Vec<usize>,
    calls: AtomicUsize,
}

#[async_trait]
impl RecognitionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn recognize(
        &self,
        page: usize,
        _image: &DynamicImage,
    ) -> Result<RecognitionResult, PageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_pages.contains(&page) {
            return Err(PageError::RecognitionFailed {
                page,
                detail: "engine crashed".into(),
            });
        }
        if self.pages.is_empty() {
            return Ok(RecognitionResult::empty());
        }
        let texts = &self.pages[(page - 1) % self.pages.len()];
        Ok(RecognitionResult::from_json(&json!({
            "rec_texts": texts,
            "rec_boxes": texts.iter().map(|_| json!([0, 0, 100, 20])).collect::<Vec<_>>(),
            "rec_scores": texts.iter().map(|_| json!(0.98)).collect::<Vec<_>>(),
        })))
    }
}

/// Answers every call with the same content and records the prompts and
/// requested reply formats.
struct ScriptedModel {
    reply: String,
    prompts: Mutex<Vec<Vec<ChatTurn>>>,
    formats: Mutex<Vec<ReplyFormat>>,
}

impl ScriptedModel {
    fn new(reply: Value) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
            formats: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> String {
        "scripted/test".into()
    }

    async fn complete(
        &self,
        turns: &[ChatTurn],
        format: ReplyFormat,
    ) -> Result<ModelReply, ExtractionError> {
        self.prompts.lock().unwrap().push(turns.to_vec());
        self.formats.lock().unwrap().push(format);
        Ok(ModelReply {
            content: self.reply.clone(),
            prompt_tokens: 120,
            completion_tokens: 40,
        })
    }
}

#[derive(Default)]
struct CountingDecoder {
    calls: AtomicUsize,
}

#[async_trait]
impl VinDecoder for CountingDecoder {
    async fn decode(&self, _vin: &str) -> Result<VinDetails, EnrichmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(VinDetails {
            make: Some("HONDA".into()),
            model: Some("Accord".into()),
            year: Some("2003".into()),
            vehicle_type: Some("PASSENGER CAR".into()),
            manufacturer: Some("AMERICAN HONDA MOTOR CO., INC.".into()),
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn contract_reply() -> Value {
    json!({
        "APR": "5.9%",
        "Finance_Charge": NOT_FOUND,
        "Amount_Financed": NOT_FOUND,
        "Total_Sale_Price": NOT_FOUND,
        "VIN": "1HGCM82633A004352",
        "Monthly_Payment": NOT_FOUND,
        "Graduation_Date": NOT_FOUND,
    })
}

struct Harness {
    pipeline: Pipeline,
    engine: Arc<ScriptedEngine>,
    model: Arc<ScriptedModel>,
    decoder: Arc<CountingDecoder>,
}

fn harness(pages: usize, engine: ScriptedEngine, reply: Value) -> Harness {
    let config = PipelineConfig::builder()
        .max_retries(0)
        .build()
        .expect("valid config");
    let engine = Arc::new(engine);
    let model = Arc::new(ScriptedModel::new(reply));
    let decoder = Arc::new(CountingDecoder::default());
    let pipeline = Pipeline::with_components(
        config,
        Arc::new(FakeRasterizer { pages }),
        EngineHandle::from_engine(engine.clone()),
        model.clone(),
        Some(decoder.clone()),
    );
    Harness {
        pipeline,
        engine,
        model,
        decoder,
    }
}

fn contract_engine() -> ScriptedEngine {
    ScriptedEngine {
        pages: vec![
            vec!["Total Sale Price $25,000 VIN 1HGCM82633A004352"],
            vec!["APR 5.9%"],
        ],
        ..Default::default()
    }
}

fn write_pdf(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"%PDF-1.4\n%fake\n").unwrap();
    path
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

// ── Interactive mode ─────────────────────────────────────────────────────────

#[tokio::test]
async fn two_page_contract_is_extracted_and_enriched() {
    let h = harness(2, contract_engine(), contract_reply());
    let source = PdfSource::from_bytes("deal.pdf", b"%PDF-1.7\n".to_vec());

    let output = h.pipeline.process(source).await.unwrap();

    assert_eq!(output.ocr.len(), 2);
    assert_eq!(output.ocr[0].page, 1);
    assert_eq!(output.ocr[1].page, 2);

    let text = flatten_text(&output.ocr);
    assert_eq!(text, "Total Sale Price $25,000 VIN 1HGCM82633A004352 APR 5.9% ");

    // The model saw exactly that text and was asked for JSON.
    let prompts = h.model.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].iter().any(|t| t.content.contains(&text)));
    drop(prompts);
    assert_eq!(*h.model.formats.lock().unwrap(), vec![ReplyFormat::Json]);

    let fields = &output.extraction;
    assert_eq!(fields.apr, FieldValue::Found("5.9%".into()));
    assert_eq!(fields.vin, FieldValue::Found("1HGCM82633A004352".into()));
    for (key, value) in fields.mandatory() {
        if key != "APR" && key != "VIN" {
            assert_eq!(value, &FieldValue::NotFound, "{key}");
        }
    }
    assert_eq!(h.decoder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        fields.vin_details.as_ref().and_then(|d| d.make.as_deref()),
        Some("HONDA")
    );

    let json = serde_json::to_value(fields).unwrap();
    assert_eq!(json["Total_Sale_Price"], NOT_FOUND);
    assert_eq!(json["Monthly_Payment"], NOT_FOUND);
    assert_eq!(json["vin_details"]["Year"], "2003");

    assert_eq!(output.stats.page_count, 2);
    assert_eq!(output.stats.span_count, 2);
    assert_eq!(output.stats.input_tokens, 120);
}

#[tokio::test]
async fn every_page_gets_a_result_even_when_blank() {
    let h = harness(5, ScriptedEngine::default(), contract_reply());
    let source = PdfSource::from_bytes("blank.pdf", b"%PDF-1.7\n".to_vec());

    let run = h.pipeline.run_ocr(&source).await.unwrap();

    assert_eq!(run.pages.len(), 5);
    assert!(run.pages.iter().all(|p| p.lines.is_empty()));
    let numbers: Vec<usize> = run.pages.iter().map(|p| p.page).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    assert_eq!(h.engine.calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn failed_page_is_kept_empty_and_the_run_continues() {
    let engine = ScriptedEngine {
        pages: vec![vec!["APR 5.9%"]],
        failing_pages: vec![2],
        ..Default::default()
    };
    let h = harness(3, engine, contract_reply());
    let source = PdfSource::from_bytes("deal.pdf", b"%PDF-1.7\n".to_vec());

    let output = h.pipeline.process(source).await.unwrap();

    assert_eq!(output.ocr.len(), 3);
    assert!(output.ocr[1].is_empty());
    assert_eq!(output.ocr[2].lines[0].text, "APR 5.9%");
    assert_eq!(output.stats.failed_pages, 1);
    assert_eq!(h.model.calls(), 1);
}

#[tokio::test]
async fn non_pdf_upload_is_rejected_before_rendering() {
    let h = harness(1, contract_engine(), contract_reply());
    let source = PdfSource::from_bytes("notes.txt", b"just text".to_vec());

    let err = h.pipeline.process(source).await.unwrap_err();

    assert!(matches!(err, PipelineError::NotAPdf { .. }));
    assert_eq!(h.engine.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn short_vin_never_reaches_the_decoder() {
    let mut reply = contract_reply();
    reply["VIN"] = json!("1HGCM8263");
    let h = harness(1, contract_engine(), reply);
    let source = PdfSource::from_bytes("deal.pdf", b"%PDF-1.7\n".to_vec());

    let output = h.pipeline.process(source).await.unwrap();

    assert_eq!(h.decoder.calls.load(Ordering::SeqCst), 0);
    assert!(output.extraction.vin_details.is_none());
    assert_eq!(output.extraction.vin, FieldValue::Found("1HGCM8263".into()));
}

#[tokio::test]
async fn non_object_model_reply_fails_the_document() {
    let h = harness(1, contract_engine(), json!(["APR", "5.9%"]));
    let source = PdfSource::from_bytes("deal.pdf", b"%PDF-1.7\n".to_vec());

    let err = h.pipeline.process(source).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Extraction(ExtractionError::NotAnObject(_))
    ));
}

#[tokio::test]
async fn engine_is_loaded_once_and_unloaded_on_shutdown() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let handle = EngineHandle::new(Arc::new(
        move || -> Result<Arc<dyn RecognitionEngine>, PipelineError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(contract_engine()))
        },
    ));
    let pipeline = Pipeline::with_components(
        PipelineConfig::default(),
        Arc::new(FakeRasterizer { pages: 2 }),
        handle,
        Arc::new(ScriptedModel::new(contract_reply())),
        None,
    );

    for name in ["a.pdf", "b.pdf"] {
        let source = PdfSource::from_bytes(name, b"%PDF-1.7\n".to_vec());
        pipeline.process(source).await.unwrap();
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    pipeline.shutdown().await;
    assert!(!pipeline.engine().is_loaded());

    let source = PdfSource::from_bytes("c.pdf", b"%PDF-1.7\n".to_vec());
    pipeline.process(source).await.unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

// ── Storage ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn processed_upload_is_stored_and_ids_restart_when_empty() {
    let h = harness(2, contract_engine(), contract_reply());
    let store: SharedStore = Arc::new(SqliteStore::open_in_memory().unwrap());

    let first = h
        .pipeline
        .process_and_store(
            "deal.pdf",
            PdfSource::from_bytes("deal.pdf", b"%PDF-1.7\n".to_vec()),
            &store,
        )
        .await
        .unwrap();
    assert_eq!(first.id, 1);

    let record = store.get(first.id).unwrap().unwrap();
    assert_eq!(record.filename, "deal.pdf");
    assert_eq!(record.ocr_data.len(), 2);
    assert_eq!(record.extracted_data.apr, FieldValue::Found("5.9%".into()));

    assert!(store.delete(first.id).unwrap());
    assert!(store.list().unwrap().is_empty());

    let second = h
        .pipeline
        .process_and_store(
            "again.pdf",
            PdfSource::from_bytes("again.pdf", b"%PDF-1.7\n".to_vec()),
            &store,
        )
        .await
        .unwrap();
    assert_eq!(second.id, 1);
}

#[tokio::test]
async fn chat_answers_from_stored_ocr_text() {
    let h = harness(2, contract_engine(), contract_reply());
    let store: SharedStore = Arc::new(SqliteStore::open_in_memory().unwrap());
    let stored = h
        .pipeline
        .process_and_store(
            "deal.pdf",
            PdfSource::from_bytes("deal.pdf", b"%PDF-1.7\n".to_vec()),
            &store,
        )
        .await
        .unwrap();

    let reply = contractiq::chat_with_document(
        &store,
        h.model.as_ref(),
        h.pipeline.config(),
        stored.id,
        "Is the APR fair?",
        &[],
    )
    .await
    .unwrap();

    assert_eq!(reply.role, contractiq::ChatRole::Assistant);
    // JSON mode for the extraction, free text for the chat answer.
    assert_eq!(
        *h.model.formats.lock().unwrap(),
        vec![ReplyFormat::Json, ReplyFormat::Text]
    );
    let prompts = h.model.prompts.lock().unwrap();
    let chat_prompt = prompts.last().unwrap();
    assert!(chat_prompt[0].content.contains("APR 5.9%"));
    assert_eq!(chat_prompt.last().unwrap(), &ChatTurn::user("Is the APR fair?"));
}

/// Wraps a real store; `insert` reports that it started and then waits for
/// the test to open the gate.
struct GatedStore {
    inner: SqliteStore,
    started: Mutex<mpsc::Sender<()>>,
    gate: Mutex<mpsc::Receiver<()>>,
}

impl DocumentStore for GatedStore {
    fn insert(
        &self,
        filename: &str,
        ocr_data: &DocumentOcrResult,
        extracted_data: &ExtractedFields,
    ) -> Result<i64, StoreError> {
        self.started.lock().unwrap().send(()).unwrap();
        self.gate
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| StoreError::Poisoned)?;
        self.inner.insert(filename, ocr_data, extracted_data)
    }

    fn get(&self, id: i64) -> Result<Option<DocumentRecord>, StoreError> {
        self.inner.get(id)
    }

    fn list(&self) -> Result<Vec<DocumentSummary>, StoreError> {
        self.inner.list()
    }

    fn delete(&self, id: i64) -> Result<bool, StoreError> {
        self.inner.delete(id)
    }
}

#[tokio::test]
async fn store_insert_runs_off_the_async_executor() {
    let (started_tx, started_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel();
    let store: SharedStore = Arc::new(GatedStore {
        inner: SqliteStore::open_in_memory().unwrap(),
        started: Mutex::new(started_tx),
        gate: Mutex::new(gate_rx),
    });
    let h = harness(1, contract_engine(), contract_reply());

    // On a current-thread runtime this task can only open the gate while
    // the insert waits on another thread.
    let opener = async move {
        while started_rx.try_recv().is_err() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        gate_tx.send(()).unwrap();
    };
    let (stored, ()) = tokio::join!(
        h.pipeline.process_and_store(
            "deal.pdf",
            PdfSource::from_bytes("deal.pdf", b"%PDF-1.7\n".to_vec()),
            &store,
        ),
        opener
    );

    assert_eq!(stored.unwrap().id, 1);
}

// ── Batch mode ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_run_writes_artifacts_and_results() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_pdf(input.path(), "alpha.pdf");
    write_pdf(input.path(), "Beta.PDF");
    std::fs::write(input.path().join("readme.txt"), "ignored").unwrap();

    let h = harness(2, contract_engine(), contract_reply());
    let summary = process_directory(&h.pipeline, input.path(), output.path())
        .await
        .unwrap();

    assert_eq!(summary.documents, 2);
    assert_eq!(summary.ocr_processed, 2);
    assert_eq!(summary.ocr_pages, 4);
    assert_eq!(summary.extracted, 2);
    assert!(output.path().join("alpha_ocr.json").is_file());
    assert!(output.path().join("Beta_ocr.json").is_file());

    let artifact = read_json(&output.path().join("alpha_ocr.json"));
    assert_eq!(artifact.as_array().unwrap().len(), 2);

    let results = read_json(&summary.results_path);
    let keys: Vec<&String> = results.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["Beta.PDF", "alpha.pdf"]);
    assert_eq!(results["alpha.pdf"]["APR"], "5.9%");
}

#[tokio::test]
async fn second_batch_run_reuses_artifacts() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_pdf(input.path(), "alpha.pdf");
    write_pdf(input.path(), "beta.pdf");

    let h = harness(1, contract_engine(), contract_reply());
    process_directory(&h.pipeline, input.path(), output.path())
        .await
        .unwrap();
    let engine_calls = h.engine.calls.load(Ordering::SeqCst);
    assert_eq!(engine_calls, 2);

    let summary = process_directory(&h.pipeline, input.path(), output.path())
        .await
        .unwrap();

    assert_eq!(summary.ocr_skipped, 2);
    assert_eq!(summary.ocr_processed, 0);
    assert_eq!(h.engine.calls.load(Ordering::SeqCst), engine_calls);
    // Extraction always re-runs over every artifact.
    assert_eq!(h.model.calls(), 4);
    assert_eq!(summary.extracted, 2);
}

#[tokio::test]
async fn unreadable_pdf_is_recorded_as_error_entry() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_pdf(input.path(), "good.pdf");
    write_pdf(input.path(), "broken.pdf");

    let h = harness(1, contract_engine(), contract_reply());
    let summary = process_directory(&h.pipeline, input.path(), output.path())
        .await
        .unwrap();

    assert_eq!(summary.ocr_failed, 1);
    assert_eq!(summary.extraction_failed, 1);
    assert!(!output.path().join("broken_ocr.json").exists());

    let results = read_json(&summary.results_path);
    let broken = results["broken.pdf"].as_object().unwrap();
    assert_eq!(broken.len(), 1);
    assert!(broken["Error"].as_str().unwrap().contains("xref"));
    assert_eq!(results["good.pdf"]["VIN"], "1HGCM82633A004352");
}

#[tokio::test]
async fn stale_empty_artifact_does_not_mask_ocr_error() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_pdf(input.path(), "broken.pdf");
    std::fs::write(output.path().join("broken_ocr.json"), b"").unwrap();

    let h = harness(1, contract_engine(), contract_reply());
    let summary = process_directory(&h.pipeline, input.path(), output.path())
        .await
        .unwrap();

    assert_eq!(summary.ocr_failed, 1);
    assert_eq!(h.model.calls(), 0);
    let results = read_json(&summary.results_path);
    assert_eq!(results["broken.pdf"].as_object().unwrap().len(), 1);
    let error = results["broken.pdf"]["Error"].as_str().unwrap();
    assert!(error.contains("xref"), "{error}");
}

#[tokio::test]
async fn empty_artifact_is_ocred_again() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_pdf(input.path(), "alpha.pdf");
    std::fs::write(output.path().join("alpha_ocr.json"), b"").unwrap();

    let h = harness(1, contract_engine(), contract_reply());
    let summary = process_directory(&h.pipeline, input.path(), output.path())
        .await
        .unwrap();

    assert_eq!(summary.ocr_processed, 1);
    assert_eq!(h.engine.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_input_dir_is_an_error() {
    let output = tempfile::tempdir().unwrap();
    let h = harness(1, contract_engine(), contract_reply());
    let err = process_directory(&h.pipeline, Path::new("/no/such/dir"), output.path())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InputDirNotFound { .. }));
}

// ── Live ─────────────────────────────────────────────────────────────────────

/// Full run against pdfium, the OCR service and a real LLM.
///
///   E2E_ENABLED=1 CONTRACTIQ_E2E_PDF=./contract.pdf cargo test --test pipeline live -- --nocapture
#[tokio::test]
async fn live_contract_extraction() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP — set E2E_ENABLED=1 to run live tests");
        return;
    }
    let Ok(pdf) = std::env::var("CONTRACTIQ_E2E_PDF") else {
        println!("SKIP — set CONTRACTIQ_E2E_PDF to a contract scan");
        return;
    };

    let pipeline = Pipeline::new(PipelineConfig::default()).expect("pipeline");
    let output = pipeline
        .process(PdfSource::from_path(&pdf))
        .await
        .expect("process");
    pipeline.shutdown().await;

    assert!(!output.ocr.is_empty());
    let json = serde_json::to_value(&output.extraction).unwrap();
    for key in contractiq::fields::MANDATORY_FIELDS {
        assert!(json.get(key).is_some(), "missing {key}");
    }
    println!("{}", serde_json::to_string_pretty(&json).unwrap());
}
