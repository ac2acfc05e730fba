//! SQLite-backed [`ConversationStore`].
//!
//! Timestamps are stored as Unix milliseconds. Multi-row writes (turn
//! append, document save, conversation delete) each run in one transaction.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::ConversationStore;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{
    ArtifactHeader, Conversation, DocumentArtifact, DocumentInfo, Mode, Role, Turn, User,
};

/// SQLite implementation of [`ConversationStore`].
///
/// Expects the schema created by [`crate::migrate::apply`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        created_at: from_millis(row.get("created_at")),
    }
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation> {
    let mode: String = row.get("mode");
    Ok(Conversation {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        mode: mode.parse::<Mode>()?,
        summary: row.get("summary"),
        created_at: from_millis(row.get("created_at")),
        last_updated: from_millis(row.get("last_updated")),
    })
}

fn turn_from_row(row: &SqliteRow) -> Result<Turn> {
    let role: String = row.get("role");
    Ok(Turn {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        seq: row.get("seq"),
        role: role.parse::<Role>()?,
        content: row.get("content"),
        created_at: from_millis(row.get("created_at")),
    })
}

const CONVERSATION_COLUMNS: &str =
    "id, user_id, title, mode, summary, created_at, last_updated";
const TURN_COLUMNS: &str = "id, conversation_id, seq, role, content, created_at";

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (id, name, email, created_at) VALUES (?, ?, ?, ?)")
            .bind(&user.id)
            .bind(&user.name)
            .bind(&user.email)
            .bind(user.created_at.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, name, email, created_at FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, name, email, created_at FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, title, mode, summary, created_at, last_updated)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&conversation.id)
        .bind(&conversation.user_id)
        .bind(&conversation.title)
        .bind(conversation.mode.as_str())
        .bind(&conversation.summary)
        .bind(conversation.created_at.timestamp_millis())
        .bind(conversation.last_updated.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM conversations WHERE id = ?",
            CONVERSATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM conversations WHERE user_id = ? ORDER BY last_updated DESC, created_at DESC",
            CONVERSATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(conversation_from_row).collect()
    }

    async fn append_turn(&self, conversation_id: &str, role: Role, content: &str) -> Result<Turn> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE conversations SET last_updated = ? WHERE id = ?")
            .bind(now.timestamp_millis())
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            bail!("conversation not found: {}", conversation_id);
        }

        let seq: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) + 1 FROM turns WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_one(&mut *tx)
                .await?;

        let turn = Turn {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            seq,
            role,
            content: content.to_string(),
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO turns (id, conversation_id, seq, role, content, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&turn.id)
        .bind(&turn.conversation_id)
        .bind(turn.seq)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(now.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(turn)
    }

    async fn recent_turns(&self, conversation_id: &str, limit: usize) -> Result<Vec<Turn>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM turns WHERE conversation_id = ? ORDER BY seq DESC LIMIT ?",
            TURN_COLUMNS
        ))
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = rows.iter().map(turn_from_row).collect::<Result<Vec<_>>>()?;
        turns.reverse();
        Ok(turns)
    }

    async fn list_turns(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM turns WHERE conversation_id = ? ORDER BY seq ASC",
            TURN_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(turn_from_row).collect()
    }

    async fn update_summary(&self, conversation_id: &str, summary: &str) -> Result<()> {
        let result = sqlx::query("UPDATE conversations SET summary = ? WHERE id = ?")
            .bind(summary)
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("conversation not found: {}", conversation_id);
        }
        Ok(())
    }

    async fn save_document(&self, artifact: &DocumentArtifact) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, conversation_id, title, preview, content_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&artifact.id)
        .bind(&artifact.conversation_id)
        .bind(&artifact.title)
        .bind(&artifact.preview)
        .bind(&artifact.content_hash)
        .bind(artifact.created_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        for (i, (text, vector)) in artifact
            .chunks()
            .iter()
            .zip(artifact.vectors())
            .enumerate()
        {
            sqlx::query(
                "INSERT INTO document_chunks (id, document_id, chunk_index, text, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&artifact.id)
            .bind(i as i64)
            .bind(text)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_document(&self, conversation_id: &str) -> Result<Option<DocumentArtifact>> {
        let row = sqlx::query(
            r#"
            SELECT id, conversation_id, title, preview, content_hash, created_at
            FROM documents
            WHERE conversation_id = ?
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let header = ArtifactHeader {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            title: row.get("title"),
            preview: row.get("preview"),
            content_hash: row.get("content_hash"),
            created_at: from_millis(row.get("created_at")),
        };

        let chunk_rows = sqlx::query(
            "SELECT text, embedding FROM document_chunks WHERE document_id = ? ORDER BY chunk_index ASC",
        )
        .bind(&header.id)
        .fetch_all(&self.pool)
        .await?;

        let mut chunks = Vec::with_capacity(chunk_rows.len());
        let mut vectors = Vec::with_capacity(chunk_rows.len());
        for row in &chunk_rows {
            chunks.push(row.get::<String, _>("text"));
            let blob: Vec<u8> = row.get("embedding");
            vectors.push(blob_to_vec(&blob));
        }

        Ok(Some(DocumentArtifact::new(header, chunks, vectors)?))
    }

    async fn list_documents(&self, conversation_id: &str) -> Result<Vec<DocumentInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.title, d.created_at, COUNT(c.id) AS chunks_count
            FROM documents d
            LEFT JOIN document_chunks c ON c.document_id = d.id
            WHERE d.conversation_id = ?
            GROUP BY d.id
            ORDER BY d.created_at ASC, d.rowid ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DocumentInfo {
                id: row.get("id"),
                title: row.get("title"),
                chunks_count: row.get::<i64, _>("chunks_count") as usize,
                created_at: from_millis(row.get("created_at")),
            })
            .collect())
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM document_chunks WHERE document_id IN (SELECT id FROM documents WHERE conversation_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM documents WHERE conversation_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM turns WHERE conversation_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }
}
