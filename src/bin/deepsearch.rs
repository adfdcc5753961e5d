#![forbid(unsafe_code)]

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use deepsearch_harness::gateway::{ChatModel, ProviderGateway};
use deepsearch_harness::research::{
    JsonlProgressSink, ResearchConfig, ResearchMode, ResearchOrchestrator,
};
use deepsearch_harness::{CollectionHandle, GatewayGenerator, HttpRetriever};

const DEFAULT_OPENROUTER_MODEL: &str = "deepseek/deepseek-r1";
const DEFAULT_OLLAMA_MODEL: &str = "deepseek-r1:1.5b";

#[derive(Parser)]
#[command(name = "deepsearch", version, about = "Deep search research loop CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Provider {
    Openrouter,
    Ollama,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Adaptive,
    Sequential,
}

impl From<Mode> for ResearchMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Adaptive => ResearchMode::Adaptive,
            Mode::Sequential => ResearchMode::Sequential,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question against a document collection
    Run {
        #[arg(long)]
        question: String,
        /// Collection to search (falls back to the config file)
        #[arg(long)]
        collection: Option<String>,
        /// Base URL of the search service
        #[arg(long, env = "DEEPSEARCH_RETRIEVER_URL")]
        retriever_url: String,
        #[arg(long, value_enum, default_value = "openrouter")]
        provider: Provider,
        /// Model id (default depends on provider)
        #[arg(long)]
        model: Option<String>,
        /// JSON research config; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Question scheduling (default from the config file, else adaptive)
        #[arg(long, value_enum)]
        mode: Option<Mode>,
        #[arg(long)]
        max_iterations: Option<usize>,
        #[arg(long)]
        token_budget: Option<usize>,
        #[arg(long)]
        results_per_query: Option<usize>,
        /// Write the full result as JSON
        #[arg(long)]
        out: Option<PathBuf>,
        /// Stream per-iteration progress as JSONL
        #[arg(long)]
        progress: Option<PathBuf>,
    },
    /// Print the default research config as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config => {
            println!(
                "{}",
                serde_json::to_string_pretty(&ResearchConfig::default())?
            );
        }
        Commands::Run {
            question,
            collection,
            retriever_url,
            provider,
            model,
            config,
            mode,
            max_iterations,
            token_budget,
            results_per_query,
            out,
            progress,
        } => {
            let mut cfg = match config {
                Some(path) => ResearchConfig::from_json_file(path)?,
                None => ResearchConfig::default(),
            };
            if let Some(mode) = mode {
                cfg.mode = mode.into();
            }
            if let Some(n) = max_iterations {
                cfg.max_iterations = n;
            }
            if let Some(n) = token_budget {
                cfg.token_budget = n;
            }
            if let Some(n) = results_per_query {
                cfg.results_per_query = n;
            }
            cfg.validate()
                .map_err(|e| format!("invalid config: {e}"))?;

            let collection = collection
                .or_else(|| cfg.collection.clone())
                .ok_or("run requires --collection (or \"collection\" in --config)")?;

            let retriever = Arc::new(HttpRetriever::new(&retriever_url)?);
            let (gateway, chat_model) = match provider {
                Provider::Openrouter => (
                    ProviderGateway::openrouter_from_env()?,
                    ChatModel::openrouter(model.unwrap_or_else(|| DEFAULT_OPENROUTER_MODEL.into())),
                ),
                Provider::Ollama => (
                    ProviderGateway::ollama_from_env()?,
                    ChatModel::ollama(model.unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.into())),
                ),
            };
            let generator = Arc::new(GatewayGenerator::new(Arc::new(gateway), chat_model));

            let mut orchestrator = ResearchOrchestrator::new(generator, retriever, cfg);
            let mut worker = None;
            if let Some(path) = &progress {
                let (sink, w) = JsonlProgressSink::new(path)?;
                orchestrator = orchestrator.with_observer(Arc::new(sink));
                worker = Some(w);
            }

            let outcome = orchestrator
                .run(&question, CollectionHandle::new(collection))
                .await;
            // Flush whatever progress was written, even when the run failed.
            drop(orchestrator);
            if let Some(worker) = worker {
                worker.join()?;
            }
            let result = outcome?;

            if let Some(path) = out {
                let mut file = File::create(&path)?;
                serde_json::to_writer_pretty(&mut file, &result)?;
                file.write_all(b"\n")?;
                info!(path = %path.display(), "result written");
            }

            println!("{}", result.answer);
        }
    }

    Ok(())
}
