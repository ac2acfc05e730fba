//! CLI command implementations.
//!
//! Each `run_*` function opens the configured SQLite store, performs one
//! [`Orchestrator`] operation, and prints a human-readable result to stdout.
//! The first line of every creating command is `key: value` so scripts can
//! pick up generated ids.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::models::{Mode, Turn};
use crate::orchestrator::{Orchestrator, Reply};
use crate::store::SqliteStore;

/// Connect to the database and build an orchestrator from config.
///
/// The schema must already exist (`ragchat init`).
pub async fn open(config: &Config) -> Result<Orchestrator> {
    let pool = db::connect(&config.db.path).await?;
    let store = Arc::new(SqliteStore::new(pool));
    Orchestrator::from_config(config, store)
}

fn print_reply(reply: &Reply) {
    println!("{}", reply.text);
    if reply.degraded {
        println!("(generation unavailable; fallback reply)");
    }
    if reply.summarized {
        println!("(conversation summarized)");
    }
}

fn print_turn(turn: &Turn) {
    println!(
        "[{}] {} ({}):",
        turn.seq,
        turn.role,
        turn.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("{}", turn.content);
    println!();
}

pub async fn run_user_add(config: &Config, name: &str, email: &str) -> Result<()> {
    let orchestrator = open(config).await?;
    let registration = orchestrator.create_user(name, email).await?;
    println!("user_id: {}", registration.user.id);
    if registration.created {
        println!("Created user {} <{}>", registration.user.name, registration.user.email);
    } else {
        println!("User already exists: {} <{}>", registration.user.name, registration.user.email);
    }
    Ok(())
}

pub async fn run_chat_start(config: &Config, user_id: &str, mode: &str, message: &str) -> Result<()> {
    let mode: Mode = mode.parse()?;
    let orchestrator = open(config).await?;
    let started = orchestrator.start_conversation(user_id, message, mode).await?;
    println!("conversation_id: {}", started.conversation.id);
    println!();
    print_reply(&started.reply);
    Ok(())
}

pub async fn run_chat_send(config: &Config, conversation_id: &str, message: &str) -> Result<()> {
    let orchestrator = open(config).await?;
    let reply = orchestrator.send_message(conversation_id, message).await?;
    print_reply(&reply);
    Ok(())
}

pub async fn run_chat_show(config: &Config, conversation_id: &str) -> Result<()> {
    let orchestrator = open(config).await?;
    let detail = orchestrator.conversation_detail(conversation_id).await?;
    let conv = &detail.conversation;

    println!("Conversation: {}", conv.id);
    println!("Title: {}", conv.title);
    println!("Mode: {}", conv.mode);
    println!(
        "Last updated: {}",
        conv.last_updated.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(summary) = &conv.summary {
        println!("Summary:\n{}", summary);
    }
    println!();

    for turn in &detail.turns {
        print_turn(turn);
    }

    let documents = orchestrator.list_documents(conversation_id).await?;
    if !documents.is_empty() {
        println!("Documents:");
        for doc in documents {
            println!("  {}  {} ({} chunks)", doc.id, doc.title, doc.chunks_count);
        }
    }
    Ok(())
}

pub async fn run_chat_list(config: &Config, user_id: &str) -> Result<()> {
    let orchestrator = open(config).await?;
    let conversations = orchestrator.list_conversations(user_id).await?;
    if conversations.is_empty() {
        println!("No conversations.");
        return Ok(());
    }
    for conv in conversations {
        println!(
            "{}  [{}]  {}  {}",
            conv.id,
            conv.mode,
            conv.last_updated.format("%Y-%m-%d %H:%M"),
            conv.title
        );
    }
    Ok(())
}

pub async fn run_chat_delete(config: &Config, conversation_id: &str) -> Result<()> {
    let orchestrator = open(config).await?;
    orchestrator.delete_conversation(conversation_id).await?;
    println!("Deleted conversation {}", conversation_id);
    Ok(())
}

pub async fn run_upload(
    config: &Config,
    conversation_id: &str,
    file: &Path,
    title: Option<&str>,
) -> Result<()> {
    let bytes = std::fs::read(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let orchestrator = open(config).await?;
    let report = orchestrator
        .upload_document(conversation_id, &filename, &bytes, title)
        .await?;

    println!("document_id: {}", report.document_id);
    println!("Title: {}", report.title);
    println!("Characters: {}", report.text_length);
    println!("Chunks: {}", report.chunks_count);
    println!("Embeddings: {}", report.embeddings_count);
    if report.degraded_embeddings > 0 {
        println!(
            "Warning: {} embeddings fell back to zero vectors",
            report.degraded_embeddings
        );
    }
    Ok(())
}
