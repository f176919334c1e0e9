use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    info!(path = %config.db.path.display(), "migrations complete");
    Ok(())
}

/// Create the schema on an open pool. Safe to run repeatedly.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name TEXT NOT NULL,
            language TEXT NOT NULL,
            raw_content_ref TEXT,
            normalized_content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            trigram_vector TEXT,
            trigrams_generated INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Backs insert-or-ignore on duplicate content
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_content_hash ON documents(content_hash)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_language ON documents(language, id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_pending ON documents(trigrams_generated, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
