use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::prelude::*;

mod cli;
mod config;

use crate::config::ClientConfig;

#[derive(Parser)]
#[command(name = "ragchat")]
#[command(about = "Chat with your documents from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom config directory (defaults to the platform config dir + /ragchat)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Backend API base URL (overrides config.toml and RAGCHAT_API__BASE_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage conversations
    #[command(subcommand)]
    Conversations(ConversationCommands),

    /// Manage uploaded documents
    #[command(subcommand)]
    Documents(DocumentCommands),

    /// Open the interactive chat pane
    Chat(ChatArgs),
}

#[derive(Subcommand)]
enum ConversationCommands {
    /// List conversations, most recently updated first
    List {
        /// Only show conversations whose title contains this text
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Create an empty conversation
    Create {
        #[arg(short, long)]
        title: Option<String>,
    },
    /// Delete a conversation and its messages
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum DocumentCommands {
    /// List uploaded documents
    List,
    /// Upload a document for retrieval
    Upload { path: PathBuf },
    /// Delete a document
    Delete { id: i64 },
}

#[derive(Parser)]
struct ChatArgs {
    /// Conversation to open (default: create a new one)
    conversation: Option<i64>,
}

fn init_tracing(debug: bool) {
    let default_directive = if debug {
        "ragchat=debug,chat_sync=debug,info"
    } else {
        "ragchat=info,chat_sync=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = ClientConfig::new(cli.config_dir, cli.api_url)?;
    debug!(
        config_file = %config.config_toml_path().display(),
        api = %config.api.base_url,
        realtime = config.realtime.enabled,
        "configuration loaded"
    );

    match cli.command {
        Commands::Conversations(cmd) => match cmd {
            ConversationCommands::List { search } => {
                cli::list_conversations(&config, search.as_deref()).await
            }
            ConversationCommands::Create { title } => {
                cli::create_conversation(&config, title.as_deref()).await
            }
            ConversationCommands::Delete { id } => cli::delete_conversation(&config, id).await,
        },
        Commands::Documents(cmd) => match cmd {
            DocumentCommands::List => cli::list_documents(&config).await,
            DocumentCommands::Upload { path } => cli::upload_document(&config, &path).await,
            DocumentCommands::Delete { id } => cli::delete_document(&config, id).await,
        },
        Commands::Chat(args) => cli::chat::run(&config, args.conversation).await,
    }
}
