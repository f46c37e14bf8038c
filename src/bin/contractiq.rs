//! CLI binary for contractiq.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs one subcommand and prints results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use contractiq::pipeline::llm::resolve_model;
use contractiq::{
    chat_with_document, process_directory, BatchProgressCallback, ChatTurn, DocumentStore,
    PdfSource, Pipeline, PipelineConfig, ProgressCallback, SharedStore, SqliteStore,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── Batch progress callback using indicatif ──────────────────────────────────

/// Live progress bar over the documents of a batch run. With
/// `--concurrency > 1` documents finish out of order; the bar only counts.
struct CliBatchProgress {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliBatchProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Scanning");
        bar.set_message("Listing PDFs…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliBatchProgress {
    fn on_batch_start(&self, total_documents: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_length(total_documents as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("OCR");
        self.bar.set_message("");
    }

    fn on_document_start(&self, filename: &str) {
        self.bar.set_message(filename.to_string());
    }

    fn on_document_skipped(&self, filename: &str) {
        self.bar
            .println(format!("  {} {}  {}", dim("↷"), filename, dim("artifact exists")));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, filename: &str, pages: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            filename,
            dim(&format!("{pages} pages"))
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, filename: &str, error: String) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = if error.len() > 80 {
            let cut = error
                .char_indices()
                .map(|(i, _)| i)
                .take_while(|&i| i < 79)
                .last()
                .unwrap_or(0);
            format!("{}\u{2026}", &error[..cut])
        } else {
            error
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), filename, red(&msg)));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, extracted: usize, failed: usize) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!("{} {} documents extracted", green("✔"), bold(&extracted.to_string()));
        } else {
            eprintln!(
                "{} {} extracted  ({} failed)",
                cyan("⚠"),
                bold(&extracted.to_string()),
                red(&failed.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one contract (prints the JSON record)
  contractiq process deal.pdf

  # Extract and save it to the document database
  contractiq process deal.pdf --store

  # Whole directory; OCR artifacts are reused on re-runs
  contractiq batch ./contracts ./out

  # Browse stored documents
  contractiq list
  contractiq show 3

  # Ask about a stored contract
  contractiq chat 3 "Is the APR reasonable?"

  # Local model via Ollama
  contractiq --provider ollama --model llama3.2 process deal.pdf

OCR SERVICE:
  Pages are sent as PNG to a PaddleOCR-serving style endpoint
  (POST {"file": <base64>, "fileType": 1}). Default: http://127.0.0.1:8866/ocr

ENVIRONMENT VARIABLES:
  CONTRACTIQ_DB            Document database path
  CONTRACTIQ_OCR_ENDPOINT  Recognition service URL
  EDGEQUAKE_LLM_PROVIDER   Provider (ollama, openai, anthropic, gemini)
  EDGEQUAKE_MODEL          Model ID
  OPENAI_API_KEY           OpenAI API key
  PDFIUM_LIB_PATH          Path to libpdfium
"#;

/// Extract structured fields from scanned vehicle contracts.
#[derive(Parser, Debug)]
#[command(
    name = "contractiq",
    version,
    about = "Extract structured financing and vehicle fields from scanned PDF contracts",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Document database file.
    #[arg(long, global = true, env = "CONTRACTIQ_DB", default_value = "contracts.db")]
    db: PathBuf,

    /// LLM model ID (e.g. llama3.2, gpt-4.1-nano).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: ollama, openai, anthropic, gemini.
    #[arg(long, global = true, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Recognition service endpoint.
    #[arg(long, global = true, env = "CONTRACTIQ_OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, global = true, env = "CONTRACTIQ_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Skip VIN decoding.
    #[arg(long, global = true, env = "CONTRACTIQ_NO_ENRICH")]
    no_enrich: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, global = true, env = "CONTRACTIQ_PASSWORD")]
    password: Option<String>,

    /// Per model call timeout in seconds.
    #[arg(long, global = true, env = "CONTRACTIQ_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Retries on model call failure (0–10).
    #[arg(long, global = true, env = "CONTRACTIQ_MAX_RETRIES", default_value_t = 2,
          value_parser = clap::value_parser!(u32).range(0..=10))]
    max_retries: u32,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "CONTRACTIQ_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "CONTRACTIQ_QUIET")]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "CONTRACTIQ_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// OCR and extract a single PDF.
    Process {
        pdf: PathBuf,
        /// Save the result to the document database.
        #[arg(long)]
        store: bool,
        /// Print the full output (OCR pages, extraction, stats).
        #[arg(long)]
        json: bool,
    },
    /// OCR every PDF in a directory, then extract from all artifacts.
    Batch {
        input_dir: PathBuf,
        output_dir: PathBuf,
        /// Documents processed concurrently.
        #[arg(short, long, env = "CONTRACTIQ_CONCURRENCY", default_value_t = 1)]
        concurrency: usize,
    },
    /// List stored documents, newest first.
    List,
    /// Print a stored document.
    Show {
        id: i64,
        /// Include the OCR pages.
        #[arg(long)]
        ocr: bool,
    },
    /// Delete a stored document.
    Delete { id: i64 },
    /// Ask a question about a stored document.
    Chat {
        id: i64,
        message: String,
        /// JSON file with prior turns: [{"role": "user", "content": "..."}].
        #[arg(long)]
        history: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress =
        !cli.quiet && !cli.no_progress && matches!(cli.command, Command::Batch { .. });
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Process { pdf, store, json } => run_process(&cli, pdf, *store, *json).await,
        Command::Batch {
            input_dir,
            output_dir,
            concurrency,
        } => run_batch(&cli, input_dir, output_dir, *concurrency, show_progress).await,
        Command::List => run_list(&cli),
        Command::Show { id, ocr } => run_show(&cli, *id, *ocr),
        Command::Delete { id } => run_delete(&cli, *id),
        Command::Chat {
            id,
            message,
            history,
        } => run_chat(&cli, *id, message, history.as_deref()).await,
    }
}

async fn run_process(cli: &Cli, pdf: &Path, store: bool, json: bool) -> Result<()> {
    let config = build_config(cli, 1, None)?;
    let pipeline = Pipeline::new(config).context("Failed to set up pipeline")?;
    let source = PdfSource::from_path(pdf);

    let output = if store {
        let db: SharedStore = Arc::new(open_store(cli)?);
        let filename = pdf
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| pdf.display().to_string());
        let stored = pipeline
            .process_and_store(&filename, source, &db)
            .await
            .context("Processing failed")?;
        if !cli.quiet {
            eprintln!("{} stored as document {}", green("✔"), bold(&stored.id.to_string()));
        }
        serde_json::to_string_pretty(&stored).context("Failed to serialise output")?
    } else {
        let output = pipeline
            .process(source)
            .await
            .context("Processing failed")?;
        if !cli.quiet {
            eprintln!(
                "   {} pages, {} spans  /  {} tokens in, {} out  —  {}ms total",
                output.stats.page_count,
                output.stats.span_count,
                dim(&output.stats.input_tokens.to_string()),
                dim(&output.stats.output_tokens.to_string()),
                output.stats.total_duration_ms,
            );
        }
        if json {
            serde_json::to_string_pretty(&output)
        } else {
            serde_json::to_string_pretty(&output.extraction)
        }
        .context("Failed to serialise output")?
    };

    pipeline.shutdown().await;
    println!("{output}");
    Ok(())
}

async fn run_batch(
    cli: &Cli,
    input_dir: &Path,
    output_dir: &Path,
    concurrency: usize,
    show_progress: bool,
) -> Result<()> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliBatchProgress::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, concurrency, progress)?;
    let pipeline = Pipeline::new(config).context("Failed to set up pipeline")?;

    let summary = process_directory(&pipeline, input_dir, output_dir)
        .await
        .context("Batch run failed")?;
    pipeline.shutdown().await;

    if !cli.quiet {
        eprintln!(
            "   {} OCR'd ({} pages), {} reused, {} OCR failures  →  {}",
            summary.ocr_processed,
            summary.ocr_pages,
            summary.ocr_skipped,
            summary.ocr_failed,
            bold(&summary.results_path.display().to_string()),
        );
    }
    Ok(())
}

fn run_list(cli: &Cli) -> Result<()> {
    let db = open_store(cli)?;
    let docs = db.list().context("Failed to list documents")?;
    if docs.is_empty() {
        eprintln!("{}", dim("no documents stored"));
        return Ok(());
    }
    for doc in docs {
        println!(
            "{:>5}  {}  {}",
            doc.id,
            doc.upload_timestamp.format("%Y-%m-%d %H:%M:%S"),
            doc.filename
        );
    }
    Ok(())
}

fn run_show(cli: &Cli, id: i64, include_ocr: bool) -> Result<()> {
    let db = open_store(cli)?;
    let record = db
        .get(id)
        .context("Failed to read document")?
        .with_context(|| format!("Document {id} not found"))?;

    let json = if include_ocr {
        serde_json::to_string_pretty(&record)
    } else {
        serde_json::to_string_pretty(&serde_json::json!({
            "id": record.id,
            "filename": record.filename,
            "upload_timestamp": record.upload_timestamp,
            "extracted_data": record.extracted_data,
        }))
    }
    .context("Failed to serialise document")?;
    println!("{json}");
    Ok(())
}

fn run_delete(cli: &Cli, id: i64) -> Result<()> {
    let db = open_store(cli)?;
    if db.delete(id).context("Failed to delete document")? {
        if !cli.quiet {
            eprintln!("{} document {} deleted", green("✔"), id);
        }
        Ok(())
    } else {
        anyhow::bail!("Document {id} not found")
    }
}

async fn run_chat(cli: &Cli, id: i64, message: &str, history: Option<&Path>) -> Result<()> {
    let history: Vec<ChatTurn> = match history {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read chat history from {:?}", path))?;
            serde_json::from_str(&raw).context("Chat history must be a JSON array of turns")?
        }
        None => Vec::new(),
    };

    let config = build_config(cli, 1, None)?;
    let model = resolve_model(&config).context("Failed to set up model")?;
    let db: SharedStore = Arc::new(open_store(cli)?);

    let reply = chat_with_document(&db, model.as_ref(), &config, id, message, &history)
        .await
        .context("Chat failed")?;
    println!("{}", reply.content);
    Ok(())
}

fn open_store(cli: &Cli) -> Result<SqliteStore> {
    SqliteStore::open(&cli.db)
        .with_context(|| format!("Failed to open document database {:?}", cli.db))
}

/// Map CLI args to `PipelineConfig`.
fn build_config(
    cli: &Cli,
    concurrency: usize,
    progress: Option<ProgressCallback>,
) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .dpi(cli.dpi)
        .enrich(!cli.no_enrich)
        .api_timeout_secs(cli.api_timeout)
        .max_retries(cli.max_retries)
        .batch_concurrency(concurrency);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref endpoint) = cli.ocr_endpoint {
        builder = builder.ocr_endpoint(endpoint);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
