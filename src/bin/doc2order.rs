//! CLI binary for doc2order.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`,
//! drives one pipeline operation per invocation, and prints results as JSON
//! lines so the output composes with `jq`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doc2order::{DocEvent, DocStatus, InvoicePipeline, PipelineConfig};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Upload an invoice and watch extraction live
  doc2order ingest scans/invoice_0042.png --watch

  # Upload a PDF from a URL
  doc2order ingest https://example.com/invoices/march.pdf

  # Poll a document's status
  doc2order status 42

  # Confirm the extraction (optionally hand-edited) as a sales order
  doc2order status 42 | jq .extracted > edited.json
  doc2order save 42 --payload edited.json

  # Browse committed orders
  doc2order orders --limit 20
  doc2order order 7

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, …)
  EDGEQUAKE_MODEL         Override model ID
  DOC2ORDER_DB            SQLite database path
  DOC2ORDER_UPLOAD_DIR    Upload storage directory
  PDFIUM_LIB_PATH         Path to an existing libpdfium

SETUP:
  1. Set an API key:   export OPENAI_API_KEY=sk-...
  2. Upload:           doc2order ingest invoice.png --watch
"#;

/// Turn invoice documents into structured sales orders using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "doc2order",
    version,
    about = "Turn invoice documents (images and PDFs) into structured sales orders",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// SQLite database path.
    #[arg(long, env = "DOC2ORDER_DB", default_value = "data/doc2order.db", global = true)]
    db: PathBuf,

    /// Directory uploaded bytes are stored under.
    #[arg(long, env = "DOC2ORDER_UPLOAD_DIR", default_value = "data/uploads", global = true)]
    upload_dir: PathBuf,

    /// Vision provider: openai, anthropic, gemini, ollama, azure.
    /// Auto-detected from API-key env vars if not set.
    #[arg(long, env = "DOC2ORDER_PROVIDER", global = true)]
    provider: Option<String>,

    /// Model ID (e.g. gpt-4.1-nano, claude-sonnet-4-20250514).
    #[arg(long, env = "DOC2ORDER_MODEL", global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file or URL and start extraction.
    Ingest {
        /// Local file path or HTTP/HTTPS URL.
        input: String,

        /// Declared content type; guessed from the extension if omitted.
        #[arg(long)]
        content_type: Option<String>,

        /// Stay attached and print progress events until extraction settles.
        #[arg(long)]
        watch: bool,
    },

    /// Print one document's lifecycle state as JSON.
    Status {
        doc_id: i64,
    },

    /// Attach to a document's live event stream.
    Watch {
        doc_id: i64,
    },

    /// Confirm an extraction payload as a sales order.
    Save {
        doc_id: i64,

        /// JSON file with the (possibly edited) invoice payload.
        #[arg(long)]
        payload: PathBuf,
    },

    /// List committed orders, newest first.
    Orders {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Print one order aggregate (header + details) as JSON.
    Order {
        order_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut builder = PipelineConfig::builder()
        .db_path(&cli.db)
        .upload_dir(&cli.upload_dir);
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.as_str());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.as_str());
    }
    let config = builder.build()?;

    let pipeline = InvoicePipeline::new(config)
        .await
        .context("failed to start the pipeline")?;

    let outcome = run(&pipeline, cli.command).await;
    pipeline.close().await;
    outcome
}

async fn run(pipeline: &InvoicePipeline, command: Command) -> Result<()> {
    match command {
        Command::Ingest {
            input,
            content_type,
            watch,
        } => {
            let doc_id = if input.starts_with("http://") || input.starts_with("https://") {
                pipeline.ingest_url(&input).await?
            } else {
                let path = Path::new(&input);
                let bytes = std::fs::read(path)
                    .with_context(|| format!("could not read '{input}'"))?;
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| input.clone());
                let content_type =
                    content_type.unwrap_or_else(|| guess_content_type(path).to_string());
                pipeline.ingest(&filename, &content_type, bytes).await?
            };

            eprintln!("{} document {}", green("✔"), bold(&doc_id.to_string()));
            println!("{}", serde_json::json!({ "document_id": doc_id }));

            if watch {
                watch_document(pipeline, doc_id).await?;
            }
        }

        Command::Status { doc_id } => {
            let view = pipeline.document(doc_id).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }

        Command::Watch { doc_id } => {
            // Make sure the id exists before sitting on a silent stream.
            pipeline.document(doc_id).await?;
            watch_document(pipeline, doc_id).await?;
        }

        Command::Save { doc_id, payload } => {
            let raw = std::fs::read_to_string(&payload)
                .with_context(|| format!("could not read '{}'", payload.display()))?;
            let value: serde_json::Value =
                serde_json::from_str(&raw).context("payload is not valid JSON")?;
            let order_id = pipeline.save(doc_id, value).await?;
            eprintln!("{} sales order {}", green("✔"), bold(&order_id.to_string()));
            println!("{}", serde_json::json!({ "sales_order_id": order_id }));
        }

        Command::Orders { limit } => {
            let orders = pipeline.list_orders(limit).await?;
            println!("{}", serde_json::to_string_pretty(&orders)?);
        }

        Command::Order { order_id } => {
            let order = pipeline.order(order_id).await?;
            println!("{}", serde_json::to_string_pretty(&order)?);
        }
    }
    Ok(())
}

/// Print a document's events as JSON lines until extraction settles.
///
/// Events are best-effort: if the task already finished before we attached,
/// no further events arrive, so the loop also polls the status projection
/// and exits once the document is terminal.
async fn watch_document(pipeline: &InvoicePipeline, doc_id: i64) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("watching document {doc_id}"));
    spinner.enable_steady_tick(Duration::from_millis(80));

    let mut events = pipeline.watch(doc_id);
    let mut poll = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                spinner.println(serde_json::to_string(&event)?);
                match &event {
                    DocEvent::Error { message } => {
                        spinner.finish_and_clear();
                        eprintln!("{} {}", red("✗"), message);
                        return Ok(());
                    }
                    DocEvent::Status { status } if status == "extracted" => {
                        spinner.finish_and_clear();
                        eprintln!(
                            "{} extraction complete — confirm with: doc2order save {doc_id} --payload edited.json",
                            green("✔")
                        );
                        return Ok(());
                    }
                    _ => {}
                }
            }
            _ = poll.tick() => {
                let view = pipeline.document(doc_id).await?;
                if view.status.is_terminal() {
                    spinner.finish_and_clear();
                    match view.status {
                        DocStatus::Failed => eprintln!(
                            "{} {}",
                            red("✗"),
                            view.error.as_deref().unwrap_or("extraction failed")
                        ),
                        _ => eprintln!("{} document {} is {}", green("✔"), doc_id, view.status),
                    }
                    println!("{}", serde_json::to_string_pretty(&view)?);
                    return Ok(());
                }
            }
        }
    }

    spinner.finish_and_clear();
    Ok(())
}

/// Content type from the file extension; the pipeline re-checks magic bytes
/// anyway, so a wrong guess only affects logging.
fn guess_content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}
