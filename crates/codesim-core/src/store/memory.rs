//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Documents live in a `BTreeMap` keyed by id, with a hash index for
//! deduplication, all behind one `std::sync::RwLock`. Each bulk insert takes
//! the write lock once, so concurrent batches can never both insert the same
//! content hash.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::language::Language;
use crate::models::{Document, NewDocument, Page, PageRequest};

use super::Store;

#[derive(Default)]
struct Inner {
    docs: BTreeMap<i64, Document>,
    by_hash: HashMap<String, i64>,
    next_id: i64,
}

impl Inner {
    fn insert(&mut self, doc: &NewDocument) -> Option<i64> {
        if self.by_hash.contains_key(&doc.content_hash) {
            return None;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.by_hash.insert(doc.content_hash.clone(), id);
        self.docs.insert(id, doc.clone().into_document(id));
        Some(id)
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn matches(doc: &Document, language: Option<Language>) -> bool {
    language.map_or(true, |l| doc.language == l)
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Document>> {
        Ok(self.read().docs.get(&id).cloned())
    }

    async fn find_by_language(
        &self,
        language: Option<Language>,
        page: PageRequest,
    ) -> Result<Page<Document>> {
        let inner = self.read();
        let matching = inner.docs.values().filter(|d| matches(d, language));
        let total = matching.clone().count() as u64;
        let content = matching
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .cloned()
            .collect();
        Ok(Page::new(content, page, total))
    }

    async fn find_all_by_id_and_language(
        &self,
        ids: &[i64],
        language: Option<Language>,
    ) -> Result<Vec<Document>> {
        let inner = self.read();
        Ok(ids
            .iter()
            .filter_map(|id| inner.docs.get(id))
            .filter(|d| matches(d, language))
            .cloned()
            .collect())
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        let inner = self.read();
        Ok(inner
            .by_hash
            .get(content_hash)
            .and_then(|id| inner.docs.get(id))
            .cloned())
    }

    async fn bulk_insert_ignoring_duplicate_hash(&self, docs: &[NewDocument]) -> Result<Vec<i64>> {
        let mut inner = self.write();
        Ok(docs.iter().filter_map(|d| inner.insert(d)).collect())
    }

    async fn insert_ignoring_duplicate_hash(&self, doc: &NewDocument) -> Result<Option<i64>> {
        Ok(self.write().insert(doc))
    }

    async fn save(&self, doc: &Document) -> Result<Document> {
        let mut inner = self.write();
        match inner.docs.get_mut(&doc.id) {
            Some(stored) => {
                *stored = doc.clone();
                Ok(doc.clone())
            }
            None => bail!("cannot save document {}: not found", doc.id),
        }
    }

    async fn count_by_language(&self, language: Option<Language>) -> Result<u64> {
        Ok(self
            .read()
            .docs
            .values()
            .filter(|d| matches(d, language))
            .count() as u64)
    }

    async fn find_pending_vectorization(&self, limit: usize) -> Result<Vec<Document>> {
        Ok(self
            .read()
            .docs
            .values()
            .filter(|d| !d.trigrams_generated)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_all(&self) -> Result<u64> {
        let mut inner = self.write();
        let removed = inner.docs.len() as u64;
        inner.docs.clear();
        inner.by_hash.clear();
        Ok(removed)
    }
}
