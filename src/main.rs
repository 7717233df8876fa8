use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use media_ingest::config::AppConfig;
use media_ingest::logging::{init_logging, OperationTimer};
use media_ingest::metrics::register_metrics;
use media_ingest::server::{self, AppState};
use media_ingest::storage::SupabaseStorage;
use media_ingest::validation::InputValidator;
use media_ingest::{Database, ManagementAction, ManagementRequest, WebhookDispatcher};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to config.toml and config/local.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the webhook and management endpoints
    Serve {
        /// Override the configured bind address (host:port)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one repair action and print the JSON response
    Repair {
        /// redownload, validate, repair-storage-paths, repair-media-groups or repair-processing-flow
        action: String,

        /// Restrict the action to these message ids
        #[arg(long = "message-id")]
        message_ids: Vec<String>,

        /// Media group for specific group repair
        #[arg(long)]
        media_group_id: Option<String>,

        /// Maximum number of messages to touch
        #[arg(short, long)]
        limit: Option<usize>,

        /// Group repair mode: full, specific or standard
        #[arg(long)]
        mode: Option<String>,

        /// Accepted caption message for specific group repair
        #[arg(long)]
        source_message_id: Option<String>,

        /// Rewrite group members even when they already match
        #[arg(long)]
        force: bool,

        /// Carry the source's analysis history onto group members
        #[arg(long)]
        sync_edit_history: bool,

        /// Validate oldest messages first
        #[arg(long)]
        oldest_first: bool,
    },
    /// Print processing statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load_from(cli.config.as_deref())?;

    // Initialize logging; the guard flushes the file writer on exit
    let _guard = init_logging(
        Some(&config.get_log_level()),
        config.logging.file_path.as_deref().map(Path::new),
        &config.logging.format,
    )?;
    register_metrics();

    info!("Starting media-ingest");

    InputValidator::validate_database_url(&config.get_database_url())?;
    let db = Database::with_pool(
        &config.get_database_url(),
        config.database.max_connections,
        Duration::from_secs(config.database.connection_timeout_secs),
    )
    .context("Failed to open database")?;

    let storage = Arc::new(SupabaseStorage::new(&config.storage));
    let dispatcher = WebhookDispatcher::from_config(&config, db, storage);

    match cli.command {
        Commands::Serve { bind } => {
            let address = bind.unwrap_or_else(|| config.bind_address());
            let state = AppState {
                dispatcher: Arc::new(dispatcher),
                webhook_secret: config.server.webhook_secret.clone(),
            };
            server::serve(&address, state).await?;
        }
        Commands::Repair {
            action,
            message_ids,
            media_group_id,
            limit,
            mode,
            source_message_id,
            force,
            sync_edit_history,
            oldest_first,
        } => {
            let action: ManagementAction = action.parse()?;
            let mut request = ManagementRequest::new(action);
            request.message_ids = (!message_ids.is_empty()).then_some(message_ids);
            request.media_group_id = media_group_id;
            request.limit = limit;
            request.options.mode = mode;
            request.options.source_message_id = source_message_id;
            request.options.force = force;
            request.options.sync_edit_history = sync_edit_history;
            request.options.only_newest = !oldest_first;

            let timer = OperationTimer::new(action.as_str());
            let response = dispatcher.handle_management(request).await;
            timer.finish();

            print_json(&response)?;
            if !response.success {
                anyhow::bail!(
                    "{} failed: {}",
                    action.as_str(),
                    response.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Commands::Stats => {
            let stats = dispatcher.repair().stats().await?;
            print_json(&stats)?;
        }
    }

    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
