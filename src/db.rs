//! SQLite database connection management.
//!
//! Provides a connection pool with WAL mode and foreign-key enforcement.
//! The database file and its parent directories are created automatically
//! if they don't exist.
//!
//! # Write-Ahead Logging (WAL)
//!
//! WAL mode allows concurrent readers and a single writer without blocking,
//! so HTTP requests for different conversations do not serialize on reads.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Create a connection pool to the SQLite database at `db_path`.
///
/// # Errors
///
/// Returns an error if the database cannot be created or connected to.
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
