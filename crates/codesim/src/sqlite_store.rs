//! SQLite-backed [`Store`] implementation.
//!
//! Trigram vectors are stored as JSON text. Duplicate content is rejected by
//! the unique index on `content_hash`; every insert uses
//! `ON CONFLICT(content_hash) DO NOTHING`, so concurrent batches race safely.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use codesim_core::models::{Document, NewDocument, Page, PageRequest, TrigramVector};
use codesim_core::store::Store;
use codesim_core::Language;

/// Rows per multi-row INSERT, well under SQLite's bound-parameter limit.
const MAX_ROWS_PER_INSERT: usize = 500;

const DOCUMENT_COLUMNS: &str = "id, file_name, language, raw_content_ref, normalized_content, \
     content_hash, trigram_vector, trigrams_generated, created_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let language: String = row.get("language");
    let vector_json: Option<String> = row.get("trigram_vector");
    let trigram_vector = vector_json
        .map(|json| serde_json::from_str::<TrigramVector>(&json))
        .transpose()
        .context("corrupt trigram_vector column")?;
    let created_at: i64 = row.get("created_at");

    Ok(Document {
        id: row.get("id"),
        file_name: row.get("file_name"),
        language: language.parse::<Language>()?,
        raw_content_ref: row.get("raw_content_ref"),
        normalized_content: row.get("normalized_content"),
        content_hash: row.get("content_hash"),
        trigram_vector,
        trigrams_generated: row.get::<i64, _>("trigrams_generated") != 0,
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_else(Utc::now),
    })
}

fn rows_to_documents(rows: &[SqliteRow]) -> Result<Vec<Document>> {
    rows.iter().map(row_to_document).collect()
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn find_by_language(
        &self,
        language: Option<Language>,
        page: PageRequest,
    ) -> Result<Page<Document>> {
        let lang = language.map(|l| l.as_str());

        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE (? IS NULL OR language = ?) \
             ORDER BY id LIMIT ? OFFSET ?",
            DOCUMENT_COLUMNS
        ))
        .bind(lang)
        .bind(lang)
        .bind(page.size as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let total = self.count_by_language(language).await?;
        Ok(Page::new(rows_to_documents(&rows)?, page, total))
    }

    async fn find_all_by_id_and_language(
        &self,
        ids: &[i64],
        language: Option<Language>,
    ) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM documents WHERE id IN (",
            DOCUMENT_COLUMNS
        ));
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        if let Some(lang) = language {
            qb.push(" AND language = ").push_bind(lang.as_str());
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut by_id: HashMap<i64, Document> = rows_to_documents(&rows)?
            .into_iter()
            .map(|d| (d.id, d))
            .collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE content_hash = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn bulk_insert_ignoring_duplicate_hash(&self, docs: &[NewDocument]) -> Result<Vec<i64>> {
        let mut inserted = Vec::with_capacity(docs.len());

        for chunk in docs.chunks(MAX_ROWS_PER_INSERT) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO documents (file_name, language, raw_content_ref, \
                 normalized_content, content_hash, trigrams_generated, created_at) ",
            );
            qb.push_values(chunk, |mut b, doc| {
                b.push_bind(doc.file_name.as_str())
                    .push_bind(doc.language.as_str())
                    .push_bind(doc.raw_content_ref.as_deref())
                    .push_bind(doc.normalized_content.as_str())
                    .push_bind(doc.content_hash.as_str())
                    .push_bind(0_i64)
                    .push_bind(doc.created_at.timestamp());
            });
            qb.push(" ON CONFLICT(content_hash) DO NOTHING RETURNING id");

            let rows = qb.build().fetch_all(&self.pool).await?;
            inserted.extend(rows.iter().map(|r| r.get::<i64, _>("id")));
        }

        Ok(inserted)
    }

    async fn insert_ignoring_duplicate_hash(&self, doc: &NewDocument) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
            INSERT INTO documents (file_name, language, raw_content_ref,
                                   normalized_content, content_hash,
                                   trigrams_generated, created_at)
            VALUES (?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(content_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&doc.file_name)
        .bind(doc.language.as_str())
        .bind(&doc.raw_content_ref)
        .bind(&doc.normalized_content)
        .bind(&doc.content_hash)
        .bind(doc.created_at.timestamp())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    /// Only the vector columns are mutable after insert, so only they are
    /// written.
    async fn save(&self, doc: &Document) -> Result<Document> {
        let vector_json = doc
            .trigram_vector
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            "UPDATE documents SET trigram_vector = ?, trigrams_generated = ? WHERE id = ?",
        )
        .bind(vector_json)
        .bind(doc.trigrams_generated as i64)
        .bind(doc.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("cannot save document {}: not found", doc.id);
        }
        Ok(doc.clone())
    }

    async fn count_by_language(&self, language: Option<Language>) -> Result<u64> {
        let lang = language.map(|l| l.as_str());
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE (? IS NULL OR language = ?)")
                .bind(lang)
                .bind(lang)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn find_pending_vectorization(&self, limit: usize) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE trigrams_generated = 0 ORDER BY id LIMIT ?",
            DOCUMENT_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows_to_documents(&rows)
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
