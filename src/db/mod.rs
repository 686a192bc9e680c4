//! Database module for SQLite persistence.
//!
//! SQLite is the source of truth for users, topics, votes and sessions.

mod repository;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE CHECK (length(username) > 0),
            email TEXT,
            passwd TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS topic (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            description TEXT NOT NULL CHECK (length(description) > 0),
            post_date TEXT NOT NULL,
            author_id INTEGER NOT NULL REFERENCES user(id),
            votes INTEGER NOT NULL DEFAULT 0 CHECK (votes >= 0)
        );
        "#,
    )
    .execute(pool)
    .await?;

    // One row per (user, topic) pair: the primary key is what stops double voting.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_topic (
            user_id INTEGER NOT NULL REFERENCES user(id),
            topic_id INTEGER NOT NULL REFERENCES topic(id),
            PRIMARY KEY (user_id, topic_id)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session (
            token TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES user(id),
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_topic_post_date ON topic(post_date);
        CREATE INDEX IF NOT EXISTS idx_topic_author ON topic(author_id);
        CREATE INDEX IF NOT EXISTS idx_user_topic_topic ON user_topic(topic_id);
        CREATE INDEX IF NOT EXISTS idx_session_expires_at ON session(expires_at);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
