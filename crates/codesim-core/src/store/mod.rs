//! Storage abstraction for codesim.
//!
//! The [`Store`] trait is the whole contract the comparison service and the
//! ingestion pipeline need from persistence: lookup by id, paged lookup by
//! language, lookup by hash, insert-or-ignore on duplicate hash, and saving a
//! lazily generated vector. Backends must not assume any SQL dialect on the
//! caller's side.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::language::Language;
use crate::models::{Document, NewDocument, Page, PageRequest};

/// Abstract corpus store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_by_id`](Store::find_by_id) | Fetch one document |
/// | [`find_by_language`](Store::find_by_language) | One page of the corpus, optionally filtered |
/// | [`find_all_by_id_and_language`](Store::find_all_by_id_and_language) | Bounded id lookup with filter |
/// | [`find_by_hash`](Store::find_by_hash) / [`exists_by_hash`](Store::exists_by_hash) | Dedup lookups |
/// | [`bulk_insert_ignoring_duplicate_hash`](Store::bulk_insert_ignoring_duplicate_hash) | One round-trip per batch |
/// | [`insert_ignoring_duplicate_hash`](Store::insert_ignoring_duplicate_hash) | One-by-one fallback |
/// | [`save`](Store::save) | Persist a document's lazily generated vector |
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Document>>;

    /// One page of documents ordered by id, filtered by language when given.
    /// `total_elements` counts every matching document, not just the page.
    async fn find_by_language(
        &self,
        language: Option<Language>,
        page: PageRequest,
    ) -> Result<Page<Document>>;

    /// Documents whose id is in `ids` (and whose language matches, when given),
    /// in the order the ids were requested. Unknown ids are skipped.
    async fn find_all_by_id_and_language(
        &self,
        ids: &[i64],
        language: Option<Language>,
    ) -> Result<Vec<Document>>;

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<Document>>;

    async fn exists_by_hash(&self, content_hash: &str) -> Result<bool> {
        Ok(self.find_by_hash(content_hash).await?.is_some())
    }

    /// Insert every document whose hash is not already stored, as one
    /// operation. Conflicting rows are skipped silently. Returns the ids of
    /// the rows actually inserted.
    async fn bulk_insert_ignoring_duplicate_hash(&self, docs: &[NewDocument]) -> Result<Vec<i64>>;

    /// Single-row variant of the bulk insert. `None` when the hash exists.
    async fn insert_ignoring_duplicate_hash(&self, doc: &NewDocument) -> Result<Option<i64>>;

    /// Persist an existing document (by id) and return it as stored.
    async fn save(&self, doc: &Document) -> Result<Document>;

    async fn count_by_language(&self, language: Option<Language>) -> Result<u64>;

    /// Documents still waiting for their trigram vector, oldest first.
    async fn find_pending_vectorization(&self, limit: usize) -> Result<Vec<Document>>;

    /// Remove every document. Ids are not reused afterwards.
    async fn delete_all(&self) -> Result<u64>;
}
