//! Conversation workflow tests with scripted providers.
//!
//! Every scenario runs against the in-memory store; the persistence-heavy
//! ones run against a temporary SQLite database as well.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use ragchat::compose::Prompt;
use ragchat::config::EmbeddingConfig;
use ragchat::embedding::{DisabledProvider, Embedder, EmbeddingProvider};
use ragchat::error::ChatError;
use ragchat::generation::GenerationProvider;
use ragchat::models::{Mode, Role};
use ragchat::orchestrator::{
    Orchestrator, Settings, CHAT_FALLBACK_REPLY, DOCUMENT_FALLBACK_REPLY, UPLOAD_PROMPT_REPLY,
};
use ragchat::retrieval::RetrievalSource;
use ragchat::store::{ConversationStore, InMemoryStore, SqliteStore};
use ragchat::summarize::FALLBACK_SUMMARY;
use ragchat::{db, migrate};

// ============ Fakes ============

/// Puts "apple", "banana" and everything else on separate axes.
struct Fruit;

#[async_trait]
impl EmbeddingProvider for Fruit {
    fn model_name(&self) -> &str {
        "fruit"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                if t.contains("apple") {
                    vec![1.0, 0.0, 0.0]
                } else if t.contains("banana") {
                    vec![0.0, 1.0, 0.0]
                } else {
                    vec![0.0, 0.0, 1.0]
                }
            })
            .collect())
    }
}

/// Records every prompt. Summary requests get `SUMMARY-<n>`, everything
/// else `reply-<n>`.
#[derive(Default)]
struct Recorder {
    prompts: Mutex<Vec<Prompt>>,
    summaries: Mutex<usize>,
}

impl Recorder {
    fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }

    fn last_prompt(&self) -> Prompt {
        self.prompts().pop().expect("no prompt recorded")
    }
}

#[async_trait]
impl GenerationProvider for Recorder {
    fn model_name(&self) -> &str {
        "recorder"
    }
    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let is_summary = prompt
            .messages
            .first()
            .map(|m| m.content.starts_with("Summarize this conversation"))
            .unwrap_or(false);
        let mut prompts = self.prompts.lock().unwrap();
        prompts.push(prompt.clone());
        if is_summary {
            let mut n = self.summaries.lock().unwrap();
            *n += 1;
            Ok(format!("SUMMARY-{}", n))
        } else {
            Ok(format!("reply-{}", prompts.len()))
        }
    }
}

struct Broken;

#[async_trait]
impl GenerationProvider for Broken {
    fn model_name(&self) -> &str {
        "broken"
    }
    async fn generate(&self, _prompt: &Prompt) -> Result<String> {
        bail!("model offline")
    }
}

// ============ Harness ============

fn embedder(provider: Arc<dyn EmbeddingProvider>) -> Arc<Embedder> {
    let config = EmbeddingConfig {
        min_interval_ms: 0,
        timeout_secs: 5,
        ..EmbeddingConfig::default()
    };
    Arc::new(Embedder::new(provider, &config))
}

fn settings() -> Settings {
    Settings {
        generation_timeout: Duration::from_secs(5),
        ..Settings::default()
    }
}

fn orchestrator(
    store: Arc<dyn ConversationStore>,
    generator: Arc<dyn GenerationProvider>,
    settings: Settings,
) -> Orchestrator {
    Orchestrator::new(store, embedder(Arc::new(Fruit)), generator, settings)
}

async fn sqlite_store() -> (TempDir, Arc<dyn ConversationStore>) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect(&tmp.path().join("data/test.sqlite"))
        .await
        .unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, Arc::new(SqliteStore::new(pool)))
}

fn memory_store() -> Arc<dyn ConversationStore> {
    Arc::new(InMemoryStore::new())
}

fn words(n: usize) -> String {
    (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
}

async fn user(orch: &Orchestrator) -> String {
    orch.create_user("Ada", "ada@example.com")
        .await
        .unwrap()
        .user
        .id
}

// ============ Scenarios ============

/// 1200 words at 500 tokens per chunk → 3 chunks, 3 vectors.
async fn upload_makes_three_chunks(store: Arc<dyn ConversationStore>) {
    let gen = Arc::new(Recorder::default());
    let orch = orchestrator(store.clone(), gen, settings());
    let uid = user(&orch).await;
    let started = orch
        .start_conversation(&uid, "About my file", Mode::Document)
        .await
        .unwrap();
    let cid = started.conversation.id;

    let report = orch
        .upload_document(&cid, "essay.txt", words(1200).as_bytes(), None)
        .await
        .unwrap();
    assert_eq!(report.chunks_count, 3);
    assert_eq!(report.embeddings_count, 3);
    assert_eq!(report.text_length, words(1200).chars().count());

    let artifact = store.get_document(&cid).await.unwrap().unwrap();
    assert_eq!(artifact.chunks().len(), 3);
    assert_eq!(artifact.vectors().len(), 3);
    assert!(artifact.vectors().iter().all(|v| v.len() == 3));
    assert_eq!(artifact.chunks()[0].split_whitespace().count(), 500);

    let docs = orch.list_documents(&cid).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].chunks_count, 3);
}

/// Document mode without an upload: NoDocument, user turn kept, no generation.
async fn document_mode_without_upload(store: Arc<dyn ConversationStore>) {
    let gen = Arc::new(Recorder::default());
    let orch = orchestrator(store.clone(), gen.clone(), settings());
    let uid = user(&orch).await;

    let started = orch
        .start_conversation(&uid, "Summarize the contract", Mode::Document)
        .await
        .unwrap();
    assert_eq!(started.reply.text, UPLOAD_PROMPT_REPLY);
    assert!(gen.prompts().is_empty());
    let cid = started.conversation.id;

    let err = orch
        .send_message(&cid, "What is the term?")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NoDocument(ref id) if id == &cid));
    assert!(gen.prompts().is_empty());

    let turns = store.list_turns(&cid).await.unwrap();
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[2].role, Role::User);
    assert_eq!(turns[2].content, "What is the term?");
}

/// Summary at 15 turns, carried as prefix afterwards, extended at 45.
async fn summary_cadence(store: Arc<dyn ConversationStore>) {
    let gen = Arc::new(Recorder::default());
    let orch = orchestrator(store.clone(), gen.clone(), settings());
    let uid = user(&orch).await;

    // start: turns 1-2; each send adds a user turn (odd count) and a reply.
    let cid = orch
        .start_conversation(&uid, "message 0", Mode::Chat)
        .await
        .unwrap()
        .conversation
        .id;

    for i in 1..=6 {
        let reply = orch.send_message(&cid, &format!("message {}", i)).await.unwrap();
        assert!(!reply.summarized);
    }

    // 7th send makes the turn count 15.
    let reply = orch.send_message(&cid, "message 7").await.unwrap();
    assert!(reply.summarized);
    let conv = orch.conversation_detail(&cid).await.unwrap().conversation;
    assert_eq!(conv.summary.as_deref(), Some("SUMMARY-1"));

    // The summary request covered the latest 15 turns, oldest first.
    let summary_prompt = gen
        .prompts()
        .into_iter()
        .find(|p| p.messages[0].content.starts_with("Summarize"))
        .unwrap();
    assert!(summary_prompt.messages[0].content.contains("user: message 0\n"));
    assert!(summary_prompt.messages[0].content.contains("user: message 7\n"));

    // Reply prompt leads with the summary exchange, then 10 turns.
    let prompt = gen.last_prompt();
    assert_eq!(
        prompt.messages[0].content,
        "Previous conversation summary: SUMMARY-1"
    );
    assert_eq!(prompt.messages[1].content, "I understand the context.");
    assert_eq!(prompt.messages.len(), 12);
    assert_eq!(prompt.messages[11].content, "message 7");

    // 16th/17th turns: no new summary, prefix kept.
    let reply = orch.send_message(&cid, "message 8").await.unwrap();
    assert!(!reply.summarized);
    assert_eq!(
        gen.last_prompt().messages[0].content,
        "Previous conversation summary: SUMMARY-1"
    );

    // Next user turn landing on a multiple of 15 is turn 45 (send 22).
    for i in 9..=21 {
        let reply = orch.send_message(&cid, &format!("message {}", i)).await.unwrap();
        assert!(!reply.summarized, "unexpected summary at send {}", i);
    }
    let reply = orch.send_message(&cid, "message 22").await.unwrap();
    assert!(reply.summarized);
    let conv = orch.conversation_detail(&cid).await.unwrap().conversation;
    assert_eq!(conv.summary.as_deref(), Some("SUMMARY-1\n\nSUMMARY-2"));
}

#[tokio::test]
async fn upload_makes_three_chunks_in_memory() {
    upload_makes_three_chunks(memory_store()).await;
}

#[tokio::test]
async fn upload_makes_three_chunks_sqlite() {
    let (_tmp, store) = sqlite_store().await;
    upload_makes_three_chunks(store).await;
}

#[tokio::test]
async fn document_mode_without_upload_in_memory() {
    document_mode_without_upload(memory_store()).await;
}

#[tokio::test]
async fn document_mode_without_upload_sqlite() {
    let (_tmp, store) = sqlite_store().await;
    document_mode_without_upload(store).await;
}

#[tokio::test]
async fn summary_cadence_in_memory() {
    summary_cadence(memory_store()).await;
}

#[tokio::test]
async fn summary_cadence_sqlite() {
    let (_tmp, store) = sqlite_store().await;
    summary_cadence(store).await;
}

// ============ Focused behavior ============

#[tokio::test]
async fn retrieval_grounds_answer_in_most_similar_chunk() {
    let gen = Arc::new(Recorder::default());
    let orch = orchestrator(
        memory_store(),
        gen.clone(),
        Settings {
            max_tokens: 2,
            top_k: 1,
            ..settings()
        },
    );
    let uid = user(&orch).await;
    let cid = orch
        .start_conversation(&uid, "fruit facts", Mode::Document)
        .await
        .unwrap()
        .conversation
        .id;
    orch.upload_document(
        &cid,
        "fruit.txt",
        b"apple apple banana banana cherry cherry",
        Some("Fruit"),
    )
    .await
    .unwrap();

    let reply = orch
        .send_message(&cid, "tell me about banana")
        .await
        .unwrap();
    assert_eq!(reply.retrieval, Some(RetrievalSource::Ranked));
    assert!(!reply.degraded);

    let prompt = gen.last_prompt();
    assert_eq!(prompt.messages.len(), 1);
    assert_eq!(
        prompt.messages[0].content,
        "Context from documents: banana banana\n\nQuestion: tell me about banana\n\nAnswer based only on the context above."
    );
}

#[tokio::test]
async fn earliest_document_is_used() {
    let gen = Arc::new(Recorder::default());
    let orch = orchestrator(
        memory_store(),
        gen.clone(),
        Settings {
            top_k: 1,
            ..settings()
        },
    );
    let uid = user(&orch).await;
    let cid = orch
        .start_conversation(&uid, "docs", Mode::Document)
        .await
        .unwrap()
        .conversation
        .id;
    orch.upload_document(&cid, "first.txt", b"apple pie", None)
        .await
        .unwrap();
    orch.upload_document(&cid, "second.txt", b"banana bread", None)
        .await
        .unwrap();

    orch.send_message(&cid, "banana?").await.unwrap();
    assert!(gen.last_prompt().messages[0]
        .content
        .starts_with("Context from documents: apple pie"));
}

#[tokio::test]
async fn failed_query_embedding_falls_back_to_document_order() {
    let store = memory_store();
    let gen = Arc::new(Recorder::default());
    let healthy = orchestrator(store.clone(), gen.clone(), Settings { max_tokens: 2, top_k: 2, ..settings() });
    let uid = user(&healthy).await;
    let cid = healthy
        .start_conversation(&uid, "docs", Mode::Document)
        .await
        .unwrap()
        .conversation
        .id;
    healthy
        .upload_document(&cid, "a.txt", b"one two three four five six", None)
        .await
        .unwrap();

    let offline = Orchestrator::new(
        store,
        embedder(Arc::new(DisabledProvider::new(3))),
        gen.clone(),
        Settings { top_k: 2, ..settings() },
    );
    let reply = offline.send_message(&cid, "anything").await.unwrap();
    assert_eq!(reply.retrieval, Some(RetrievalSource::DocumentOrder));
    assert!(gen
        .last_prompt()
        .messages[0]
        .content
        .starts_with("Context from documents: one two\n\nthree four\n\nQuestion: anything"));
}

#[tokio::test]
async fn generation_failure_yields_fallback_replies() {
    let store = memory_store();
    let orch = orchestrator(store.clone(), Arc::new(Broken), settings());
    let uid = user(&orch).await;

    let started = orch
        .start_conversation(&uid, "hello", Mode::Chat)
        .await
        .unwrap();
    assert!(started.reply.degraded);
    assert_eq!(started.reply.text, CHAT_FALLBACK_REPLY);

    let cid = orch
        .start_conversation(&uid, "doc chat", Mode::Document)
        .await
        .unwrap()
        .conversation
        .id;
    orch.upload_document(&cid, "a.txt", b"apple facts", None)
        .await
        .unwrap();
    let reply = orch.send_message(&cid, "apple?").await.unwrap();
    assert!(reply.degraded);
    assert_eq!(reply.text, DOCUMENT_FALLBACK_REPLY);

    let turns = store.list_turns(&cid).await.unwrap();
    assert_eq!(turns.last().unwrap().content, DOCUMENT_FALLBACK_REPLY);
}

#[tokio::test]
async fn failed_summary_uses_fallback_text() {
    let orch = orchestrator(
        memory_store(),
        Arc::new(Broken),
        Settings {
            summarize_every: 3,
            ..settings()
        },
    );
    let uid = user(&orch).await;
    let cid = orch
        .start_conversation(&uid, "hi", Mode::Chat)
        .await
        .unwrap()
        .conversation
        .id;

    let reply = orch.send_message(&cid, "again").await.unwrap();
    assert!(reply.summarized);
    let conv = orch.conversation_detail(&cid).await.unwrap().conversation;
    assert_eq!(conv.summary.as_deref(), Some(FALLBACK_SUMMARY));
}

#[tokio::test]
async fn start_conversation_titles_and_validates() {
    let orch = orchestrator(memory_store(), Arc::new(Recorder::default()), settings());
    let uid = user(&orch).await;

    let long = "x".repeat(80);
    let started = orch.start_conversation(&uid, &long, Mode::Chat).await.unwrap();
    assert_eq!(started.conversation.title.chars().count(), 50);
    assert_eq!(started.reply.turn.seq, 2);

    assert!(matches!(
        orch.start_conversation(&uid, "   ", Mode::Chat).await,
        Err(ChatError::EmptyMessage)
    ));
    assert!(matches!(
        orch.start_conversation("ghost", "hi", Mode::Chat).await,
        Err(ChatError::UserNotFound(_))
    ));
    assert!(matches!(
        orch.send_message("ghost", "hi").await,
        Err(ChatError::ConversationNotFound(_))
    ));
    assert!(matches!(
        orch.send_message(&started.conversation.id, "").await,
        Err(ChatError::EmptyMessage)
    ));
}

#[tokio::test]
async fn users_are_idempotent_by_email() {
    let orch = orchestrator(memory_store(), Arc::new(Recorder::default()), settings());
    let first = orch.create_user("Ada", "ada@example.com").await.unwrap();
    assert!(first.created);
    let again = orch.create_user("Someone", "ada@example.com").await.unwrap();
    assert!(!again.created);
    assert_eq!(again.user.id, first.user.id);
    assert_eq!(again.user.name, "Ada");

    assert!(matches!(
        orch.create_user("", "x@example.com").await,
        Err(ChatError::MissingField("name"))
    ));
    assert!(matches!(
        orch.get_user("missing").await,
        Err(ChatError::UserNotFound(_))
    ));
}

#[tokio::test]
async fn conversations_list_latest_first_and_delete_cascades() {
    let (_tmp, store) = sqlite_store().await;
    let orch = orchestrator(store.clone(), Arc::new(Recorder::default()), settings());
    let uid = user(&orch).await;

    let a = orch
        .start_conversation(&uid, "first", Mode::Chat)
        .await
        .unwrap()
        .conversation
        .id;
    let b = orch
        .start_conversation(&uid, "second", Mode::Document)
        .await
        .unwrap()
        .conversation
        .id;
    orch.upload_document(&b, "b.txt", b"banana", None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    orch.send_message(&a, "bump").await.unwrap();

    let listed: Vec<String> = orch
        .list_conversations(&uid)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(listed, vec![a.clone(), b.clone()]);

    orch.delete_conversation(&b).await.unwrap();
    assert!(store.get_document(&b).await.unwrap().is_none());
    assert!(store.list_turns(&b).await.unwrap().is_empty());
    assert!(matches!(
        orch.delete_conversation(&b).await,
        Err(ChatError::ConversationNotFound(_))
    ));
    assert!(matches!(
        orch.list_documents(&b).await,
        Err(ChatError::ConversationNotFound(_))
    ));
}

#[tokio::test]
async fn blank_and_unsupported_uploads_store_nothing() {
    let store = memory_store();
    let orch = orchestrator(store.clone(), Arc::new(Recorder::default()), settings());
    let uid = user(&orch).await;
    let cid = orch
        .start_conversation(&uid, "docs", Mode::Document)
        .await
        .unwrap()
        .conversation
        .id;

    assert!(matches!(
        orch.upload_document(&cid, "empty.txt", b"  \n ", None).await,
        Err(ChatError::EmptyDocument)
    ));
    assert!(orch
        .upload_document(&cid, "deck.pptx", b"data", None)
        .await
        .is_err());
    assert!(store.get_document(&cid).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_sends_summarize_once() {
    let (_tmp, store) = sqlite_store().await;
    let gen = Arc::new(Recorder::default());
    let orch = orchestrator(
        store,
        gen.clone(),
        Settings {
            summarize_every: 3,
            ..settings()
        },
    );
    let uid = user(&orch).await;
    let cid = orch
        .start_conversation(&uid, "hi", Mode::Chat)
        .await
        .unwrap()
        .conversation
        .id;

    let (a, b) = tokio::join!(
        orch.send_message(&cid, "first"),
        orch.send_message(&cid, "second")
    );
    let summarized = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|r| r.summarized)
        .count();
    assert_eq!(summarized, 1);

    let conv = orch.conversation_detail(&cid).await.unwrap().conversation;
    assert_eq!(conv.summary.as_deref(), Some("SUMMARY-1"));
}

#[test]
fn generation_deadline_covers_provider_retries() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("ragchat.toml");
    std::fs::write(
        &path,
        "[db]\npath = \"ragchat.sqlite\"\n\n[generation]\ntimeout_secs = 10\nmax_retries = 2\n",
    )
    .unwrap();
    let config = ragchat::config::load_config(&path).unwrap();

    let settings = Settings::from_config(&config);
    // three 10s attempts plus 1s and 2s of backoff
    assert_eq!(settings.generation_timeout, Duration::from_secs(33));
}
