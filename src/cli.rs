//! Command Line Interface
//!
//! `marginalia analyze <file>` runs an analysis over a markdown file and
//! prints the result as JSON on stdout. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use marginalia_llm::{HttpProvider, LlmProvider};
use marginalia_tools::ToolTable;

use crate::models::document::split_blocks;
use crate::services::{
    AnalysisOutcome, AnalysisRequest, Analyzer, BlockAnalyzer, CheckpointManager,
};
use crate::storage::config::ConfigService;
use crate::storage::database::Database;
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Parser)]
#[command(name = "marginalia", version, about = "AI marginal annotations for notes")]
pub struct Cli {
    /// Config file (default: ~/.marginalia/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Annotate a markdown file
    Analyze {
        /// Markdown file to analyze
        file: PathBuf,
        /// Document title (default: file stem)
        #[arg(long)]
        title: Option<String>,
        /// Conversation key (default: the file path)
        #[arg(long)]
        document_id: Option<String>,
        /// One-shot mode: a single JSON answer keyed by block, no tool calls
        #[arg(long)]
        blocks: bool,
    },
}

/// Cancel `token` on Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

pub async fn execute(cli: Cli) -> AppResult<()> {
    let config_service = match &cli.config {
        Some(path) => ConfigService::open(path)?,
        None => ConfigService::new()?,
    };
    let config = config_service.get_config().clone();
    if !config.has_credentials() {
        return Err(AppError::config(format!(
            "No API key for {}: set {} or provider.api_key in {}",
            config.provider.provider,
            crate::models::settings::API_KEY_ENV,
            config_service.path().display()
        )));
    }

    match cli.command {
        Commands::Analyze {
            file,
            title,
            document_id,
            blocks,
        } => {
            let content = std::fs::read_to_string(&file)?;
            let provider: Arc<dyn LlmProvider> =
                Arc::new(HttpProvider::new(config.provider.clone())?);
            tracing::info!(
                provider = provider.name(),
                model = provider.model(),
                file = %file.display(),
                "Analyzing"
            );

            let token = CancellationToken::new();
            cancel_on_interrupt(token.clone());

            let output = if blocks {
                let analyzer = BlockAnalyzer::new(provider, config.analyzer.clone());
                let outcome = analyzer
                    .analyze(&split_blocks(&content), &content, token, None)
                    .await?;
                serde_json::to_string_pretty(&outcome)?
            } else {
                let document_id =
                    document_id.unwrap_or_else(|| file.to_string_lossy().into_owned());
                let title = title.or_else(|| {
                    file.file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                });

                let store = if config.persistence.any() {
                    Some(Database::new()?)
                } else {
                    None
                };
                let mut analyzer =
                    Analyzer::new(provider, ToolTable::annotation(), config.analyzer.clone());
                if config.persistence.conversations {
                    if let Some(store) = &store {
                        analyzer = analyzer.with_store(store.clone());
                    }
                }
                let checkpoints = CheckpointManager::from_config(&config.persistence, store);

                // A file on disk has no edit history, so the whole text is the patch
                let mut request = AnalysisRequest::new(&document_id, &content, &content);
                request.title = title;
                let outcome = analyzer.analyze_with_cancellation(request, token).await?;

                if let AnalysisOutcome::Completed { annotations, .. } = &outcome {
                    if let Some(index) = analyzer.last_message_index(&document_id)? {
                        let spans = annotations
                            .iter()
                            .map(|a| a.text_span().to_string())
                            .collect();
                        checkpoints.create(&document_id, index, content.clone(), spans)?;
                    }
                }
                serde_json::to_string_pretty(&outcome)?
            };

            println!("{}", output);
            Ok(())
        }
    }
}
