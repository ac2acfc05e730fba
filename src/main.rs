//! # ragchat CLI
//!
//! ## Usage
//!
//! ```bash
//! ragchat --config ./config/ragchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragchat init` | Create the SQLite database and run schema migrations |
//! | `ragchat serve` | Start the HTTP API server |
//! | `ragchat user add <name> <email>` | Create a user (or look up by email) |
//! | `ragchat chat start --user <id> <message>` | Start a conversation |
//! | `ragchat chat send <conversation> <message>` | Send a message |
//! | `ragchat chat show <conversation>` | Print a conversation |
//! | `ragchat chat list --user <id>` | List a user's conversations |
//! | `ragchat chat delete <conversation>` | Delete a conversation |
//! | `ragchat upload <conversation> <file>` | Upload a PDF, DOCX or TXT document |
//!
//! Logs go to stderr; set `RUST_LOG` (default `ragchat=info`) to adjust.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ragchat::{commands, config, migrate, server};

/// ragchat: conversations with rolling summaries and document-grounded answers.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(name = "ragchat", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables.
    /// Safe to run more than once.
    Init,

    /// Start the HTTP API server on `[server].bind`.
    Serve,

    /// Manage users.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Start, continue, inspect and delete conversations.
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },

    /// Upload a document (PDF, DOCX or TXT) to a conversation.
    Upload {
        conversation: String,
        file: PathBuf,
        /// Display title; defaults to the file name.
        #[arg(long)]
        title: Option<String>,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user. An existing email returns the existing user.
    Add { name: String, email: String },
}

#[derive(Subcommand)]
enum ChatAction {
    /// Start a conversation with its first message.
    Start {
        #[arg(long)]
        user: String,
        /// `chat` or `document`.
        #[arg(long, default_value = "chat")]
        mode: String,
        message: String,
    },
    /// Send a message and print the reply.
    Send {
        conversation: String,
        message: String,
    },
    /// Print a conversation's turns, summary and documents.
    Show { conversation: String },
    /// List a user's conversations, most recently active first.
    List {
        #[arg(long)]
        user: String,
    },
    /// Delete a conversation with its turns and documents.
    Delete { conversation: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ragchat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::User { action } => match action {
            UserAction::Add { name, email } => {
                commands::run_user_add(&cfg, &name, &email).await?;
            }
        },
        Commands::Chat { action } => match action {
            ChatAction::Start {
                user,
                mode,
                message,
            } => {
                commands::run_chat_start(&cfg, &user, &mode, &message).await?;
            }
            ChatAction::Send {
                conversation,
                message,
            } => {
                commands::run_chat_send(&cfg, &conversation, &message).await?;
            }
            ChatAction::Show { conversation } => {
                commands::run_chat_show(&cfg, &conversation).await?;
            }
            ChatAction::List { user } => {
                commands::run_chat_list(&cfg, &user).await?;
            }
            ChatAction::Delete { conversation } => {
                commands::run_chat_delete(&cfg, &conversation).await?;
            }
        },
        Commands::Upload {
            conversation,
            file,
            title,
        } => {
            commands::run_upload(&cfg, &conversation, &file, title.as_deref()).await?;
        }
    }

    Ok(())
}
