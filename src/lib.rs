//! # ragchat
//!
//! A conversational backend with rolling summaries and document-grounded
//! answers.
//!
//! Conversations run in one of two modes. In **chat** mode the model sees a
//! rolling summary plus the latest turns. In **document** mode an uploaded
//! file is chunked and embedded once, and every question is answered from
//! the chunks most similar to it.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────────────┐
//! │   Upload   │──▶│ Chunk+Embed  │──▶│ DocumentArtifact │
//! │ PDF/DOCX/… │   │  (fail-soft) │   │   (SQLite)       │
//! └────────────┘   └──────────────┘   └────────┬────────┘
//!                                              │ retrieve
//! ┌────────────┐   ┌──────────────┐   ┌────────▼────────┐
//! │  Message   │──▶│ Orchestrator │──▶│ Compose+Generate │
//! └────────────┘   │  summarize   │   └─────────────────┘
//!                  └──────┬───────┘
//!                ┌────────┴────────┐
//!                ▼                 ▼
//!          ┌──────────┐      ┌──────────┐
//!          │   CLI    │      │   HTTP   │
//!          │(ragchat) │      │  (axum)  │
//!          └──────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragchat init
//! ragchat user add "Ada" ada@example.com
//! ragchat chat start --user <user_id> --mode document "Tell me about the report"
//! ragchat upload <conversation_id> ./report.pdf
//! ragchat chat send <conversation_id> "What were the Q3 numbers?"
//! ragchat serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed errors |
//! | [`extract`] | PDF / DOCX / TXT text extraction |
//! | [`chunk`] | Whitespace-token chunking |
//! | [`embedding`] | Embedding providers and the fail-soft embedder |
//! | [`retrieval`] | Cosine ranking and context selection |
//! | [`compose`] | Prompt assembly |
//! | [`generation`] | Generation providers |
//! | [`summarize`] | Rolling summaries |
//! | [`ingest`] | Upload pipeline |
//! | [`store`] | Persistence trait, SQLite and in-memory backends |
//! | [`orchestrator`] | Per-message conversation workflow |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod commands;
pub mod compose;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
mod http;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod retrieval;
pub mod server;
pub mod store;
pub mod summarize;
