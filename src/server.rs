//! HTTP API server.
//!
//! Exposes the [`Orchestrator`] operations as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/api/users` | Create a user (idempotent by email) |
//! | `GET`    | `/api/users/{id}` | Fetch a user |
//! | `POST`   | `/api/conversations` | Start a conversation with its first message |
//! | `GET`    | `/api/conversations?user_id=` | List a user's conversations |
//! | `GET`    | `/api/conversations/{id}` | Conversation with all turns |
//! | `DELETE` | `/api/conversations/{id}` | Delete a conversation and its documents |
//! | `POST`   | `/api/conversations/{id}/messages` | Send a message, get the reply |
//! | `POST`   | `/api/conversations/{id}/documents` | Upload a document (multipart `file`, optional `title`) |
//! | `GET`    | `/api/conversations/{id}/documents` | List uploaded documents |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "no_document", "message": "no document uploaded for conversation 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unsupported_format` (400),
//! `no_document` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::error::ChatError;
use crate::extract::ExtractError;
use crate::ingest::UploadReport;
use crate::migrate;
use crate::models::{Conversation, ConversationDetail, DocumentInfo, Mode, User};
use crate::orchestrator::{Orchestrator, Reply};
use crate::retrieval::RetrievalSource;
use crate::store::SqliteStore;

/// Upload size cap for `POST /api/conversations/{id}/documents`.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
type AppState = Arc<Orchestrator>;

/// Starts the HTTP server on `[server].bind`.
///
/// Opens the SQLite database, applies migrations, builds the configured
/// providers, and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::apply(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));
    let orchestrator = Arc::new(Orchestrator::from_config(config, store)?);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("server listening on http://{}", bind_addr);
    println!("ragchat server listening on http://{}", bind_addr);

    axum::serve(listener, router(orchestrator)).await?;
    Ok(())
}

/// Build the application router around an orchestrator.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/users", post(handle_create_user))
        .route("/api/users/{id}", get(handle_get_user))
        .route(
            "/api/conversations",
            post(handle_start_conversation).get(handle_list_conversations),
        )
        .route(
            "/api/conversations/{id}",
            get(handle_get_conversation).delete(handle_delete_conversation),
        )
        .route("/api/conversations/{id}/messages", post(handle_send_message))
        .route(
            "/api/conversations/{id}/documents",
            post(handle_upload_document).get(handle_list_documents),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(orchestrator)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        let message = err.to_string();
        match err {
            ChatError::ConversationNotFound(_) | ChatError::UserNotFound(_) => {
                AppError::new(StatusCode::NOT_FOUND, "not_found", message)
            }
            ChatError::NoDocument(_) => {
                AppError::new(StatusCode::BAD_REQUEST, "no_document", message)
            }
            ChatError::Extract(ExtractError::UnsupportedFormat(_)) => {
                AppError::new(StatusCode::BAD_REQUEST, "unsupported_format", message)
            }
            e if e.is_input_error() => bad_request(message),
            e => {
                tracing::error!("request failed: {:#}", e);
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Users ============

#[derive(Deserialize)]
struct CreateUserRequest {
    name: String,
    email: String,
}

#[derive(Serialize)]
struct UserResponse {
    #[serde(flatten)]
    user: User,
    created: bool,
}

async fn handle_create_user(
    State(orchestrator): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let registration = orchestrator.create_user(&req.name, &req.email).await?;
    let status = if registration.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(UserResponse {
            user: registration.user,
            created: registration.created,
        }),
    ))
}

async fn handle_get_user(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, AppError> {
    Ok(Json(orchestrator.get_user(&id).await?))
}

// ============ Conversations ============

#[derive(Deserialize)]
struct StartConversationRequest {
    user_id: String,
    first_message: String,
    #[serde(default)]
    mode: Option<String>,
}

/// Reply payload shared by conversation start and message send.
#[derive(Serialize)]
struct ReplyResponse {
    conversation_id: String,
    response: String,
    degraded: bool,
    summarized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    retrieval: Option<RetrievalSource>,
}

impl From<Reply> for ReplyResponse {
    fn from(reply: Reply) -> Self {
        Self {
            conversation_id: reply.conversation_id,
            response: reply.text,
            degraded: reply.degraded,
            summarized: reply.summarized,
            retrieval: reply.retrieval,
        }
    }
}

async fn handle_start_conversation(
    State(orchestrator): State<AppState>,
    Json(req): Json<StartConversationRequest>,
) -> Result<(StatusCode, Json<ReplyResponse>), AppError> {
    let mode = match req.mode.as_deref() {
        Some(m) => m.parse::<Mode>()?,
        None => Mode::default(),
    };
    let started = orchestrator
        .start_conversation(&req.user_id, &req.first_message, mode)
        .await?;
    Ok((StatusCode::CREATED, Json(started.reply.into())))
}

#[derive(Deserialize)]
struct ListConversationsQuery {
    user_id: String,
}

async fn handle_list_conversations(
    State(orchestrator): State<AppState>,
    Query(query): Query<ListConversationsQuery>,
) -> Result<Json<Vec<Conversation>>, AppError> {
    Ok(Json(orchestrator.list_conversations(&query.user_id).await?))
}

async fn handle_get_conversation(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetail>, AppError> {
    Ok(Json(orchestrator.conversation_detail(&id).await?))
}

async fn handle_delete_conversation(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    orchestrator.delete_conversation(&id).await?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

#[derive(Deserialize)]
struct SendMessageRequest {
    content: String,
}

async fn handle_send_message(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<ReplyResponse>, AppError> {
    let reply = orchestrator.send_message(&id, &req.content).await?;
    Ok(Json(reply.into()))
}

// ============ Documents ============

#[derive(Serialize)]
struct UploadResponse {
    status: &'static str,
    #[serde(flatten)]
    report: UploadReport,
}

async fn handle_upload_document(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut title: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| bad_request("file field must carry a filename"))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("title") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("failed to read title: {}", e)))?;
                title = Some(text);
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| bad_request("missing multipart field: file"))?;
    let report = orchestrator
        .upload_document(&id, &filename, &bytes, title.as_deref())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            status: "uploaded",
            report,
        }),
    ))
}

async fn handle_list_documents(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<DocumentInfo>>, AppError> {
    Ok(Json(orchestrator.list_documents(&id).await?))
}
