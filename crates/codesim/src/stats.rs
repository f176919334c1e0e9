//! Corpus statistics.
//!
//! A quick summary of what is stored: document count, how many documents
//! already carry a trigram vector, and a per-language breakdown. Used by
//! `codesim stats`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageStats {
    pub language: String,
    pub doc_count: i64,
    pub vectorized_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusStats {
    pub total_docs: i64,
    pub vectorized: i64,
    pub by_language: Vec<LanguageStats>,
}

pub async fn collect(pool: &SqlitePool) -> Result<CorpusStats> {
    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;

    let vectorized: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE trigrams_generated = 1")
            .fetch_one(pool)
            .await?;

    let rows = sqlx::query(
        r#"
        SELECT
            language,
            COUNT(*) AS doc_count,
            SUM(CASE WHEN trigrams_generated = 1 THEN 1 ELSE 0 END) AS vectorized_count
        FROM documents
        GROUP BY language
        ORDER BY doc_count DESC, language
        "#,
    )
    .fetch_all(pool)
    .await?;

    let by_language = rows
        .iter()
        .map(|row| LanguageStats {
            language: row.get("language"),
            doc_count: row.get("doc_count"),
            vectorized_count: row.get("vectorized_count"),
        })
        .collect();

    Ok(CorpusStats {
        total_docs,
        vectorized,
        by_language,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("codesim corpus stats");
    println!("====================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", stats.total_docs);
    println!(
        "  Vectorized:  {} / {} ({}%)",
        stats.vectorized,
        stats.total_docs,
        if stats.total_docs > 0 {
            (stats.vectorized * 100) / stats.total_docs
        } else {
            0
        }
    );

    if !stats.by_language.is_empty() {
        println!();
        println!("  By language:");
        println!("  {:<12} {:>8} {:>12}", "LANGUAGE", "DOCS", "VECTORIZED");
        println!("  {}", "-".repeat(34));
        for l in &stats.by_language {
            println!(
                "  {:<12} {:>8} {:>12}",
                l.language, l.doc_count, l.vectorized_count
            );
        }
    }

    println!();
    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
