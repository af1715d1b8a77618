//! DocNav command line
//!
//! Answers a question from a local PDF or text document:
//! - `docnav ask --question <Q> --document <PATH>`
//! - `docnav query <free-form text>` (read from stdin when omitted)
//!
//! Logs go to stderr; the answer, verdict, cited fragments and the audit
//! record location go to stdout.

use anyhow::Context;
use clap::{Parser, Subcommand};
use docnav_common::{config::AppConfig, metrics, Result, VERSION};
use docnav_context::{QueryEngine, QueryOutcome};
use tokio::io::AsyncReadExt;
use tracing::{info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "docnav", version, about = "Citation-tracked answers from long documents")]
struct Cli {
    /// Configuration file (defaults to config/default, config/$APP_ENV, config/local and APP__ variables)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask a question about a document
    Ask {
        #[arg(short, long)]
        question: String,

        /// Path of a .pdf, .txt or .md file
        #[arg(short, long)]
        document: String,
    },
    /// Free-form request naming both the question and the document path
    Query {
        text: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .context("failed to load configuration")?;

    init_tracing(&config);
    info!("Starting DocNav v{}", VERSION);

    metrics::register_metrics();

    let engine = QueryEngine::from_config(&config).context("failed to initialize query engine")?;

    let span = info_span!("docnav", service = %config.observability.service_name);
    let outcome = dispatch(&engine, cli.command).instrument(span).await?;

    match outcome {
        Ok(outcome) => {
            print_outcome(&outcome);
            Ok(())
        }
        Err(err) => {
            eprintln!("error [{}]: {}", err.code().as_code(), err);
            std::process::exit(1);
        }
    }
}

async fn dispatch(engine: &QueryEngine, command: Command) -> anyhow::Result<Result<QueryOutcome>> {
    match command {
        Command::Ask { question, document } => Ok(engine.answer(&question, &document).await),
        Command::Query { text } => {
            let text = match text {
                Some(text) => text,
                None => read_stdin().await?,
            };
            Ok(engine.ask(&text).await)
        }
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn read_stdin() -> anyhow::Result<String> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("failed to read query from stdin")?;
    Ok(input)
}

fn print_outcome(outcome: &QueryOutcome) {
    match outcome {
        QueryOutcome::Answered {
            answer,
            verification,
            cited_fragments,
            record_location,
        } => {
            println!("{}\n", answer.text);
            println!(
                "Verification: {} ({})",
                if verification.is_correct { "correct" } else { "not confirmed" },
                verification.reasoning
            );
            if !cited_fragments.is_empty() {
                println!("\nCited fragments:");
                for fragment in cited_fragments {
                    println!("[#{}] {}: {}", fragment.id, fragment.char_range, fragment.text.trim());
                }
            }
            println!("\nRecord: {}", record_location.display());
        }
        QueryOutcome::NoRelevantContent { record_location } => {
            println!("No relevant content was found in the document.");
            println!("\nRecord: {}", record_location.display());
        }
    }
}
