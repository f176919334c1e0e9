//! Core data models used throughout codesim.
//!
//! These types represent the documents, vectors, and comparison results that
//! flow through ingestion and comparison.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::language::Language;

/// Sparse trigram → occurrence count map.
///
/// Keys are unique 3-character strings, counts are positive, order is
/// irrelevant. An empty vector is legal for content shorter than three
/// characters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrigramVector(HashMap<String, u32>);

impl TrigramVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, trigram: &str) -> u32 {
        self.0.get(trigram).copied().unwrap_or(0)
    }

    pub(crate) fn increment(&mut self, trigram: String) {
        *self.0.entry(trigram).or_insert(0) += 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Sum of all counts (the number of windows observed).
    pub fn total(&self) -> u64 {
        self.0.values().map(|&v| v as u64).sum()
    }
}

impl FromIterator<(String, u32)> for TrigramVector {
    fn from_iter<I: IntoIterator<Item = (String, u32)>>(iter: I) -> Self {
        TrigramVector(iter.into_iter().collect())
    }
}

/// A persisted document in the corpus.
///
/// `id` is assigned by the store. Everything is immutable after insert except
/// `trigram_vector` / `trigrams_generated`, which move once from unset to set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub file_name: String,
    pub language: Language,
    /// Where the raw upload came from (batch-scoped name), if known.
    pub raw_content_ref: Option<String>,
    pub normalized_content: String,
    /// Hex SHA-256 of `normalized_content`.
    pub content_hash: String,
    pub trigram_vector: Option<TrigramVector>,
    pub trigrams_generated: bool,
    pub created_at: DateTime<Utc>,
}

/// A document that has not been persisted yet (no id).
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    pub file_name: String,
    pub language: Language,
    pub raw_content_ref: Option<String>,
    pub normalized_content: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl NewDocument {
    /// Materialize with a store-assigned id and no vector yet.
    pub fn into_document(self, id: i64) -> Document {
        Document {
            id,
            file_name: self.file_name,
            language: self.language,
            raw_content_ref: self.raw_content_ref,
            normalized_content: self.normalized_content,
            content_hash: self.content_hash,
            trigram_vector: None,
            trigrams_generated: false,
            created_at: self.created_at,
        }
    }
}

/// One row of a comparison result. Ephemeral: cached, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub document_id: i64,
    pub file_name: String,
    pub language: Language,
    /// Percentage in `[0, 100]`, rounded to two decimals.
    pub score: f64,
}

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn new(page: u32, size: u32) -> Self {
        Self { page, size }
    }

    pub fn offset(&self) -> u64 {
        self.page as u64 * self.size as u64
    }
}

/// One page of results plus the total number of matching elements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_elements: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: PageRequest, total_elements: u64) -> Self {
        Self {
            content,
            page: request.page,
            size: request.size,
            total_elements,
        }
    }

    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            return 0;
        }
        self.total_elements.div_ceil(self.size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_math() {
        let req = PageRequest::new(2, 10);
        assert_eq!(req.offset(), 20);
        let page: Page<u8> = Page::new(vec![], req, 21);
        assert_eq!(page.total_pages(), 3);
        let empty: Page<u8> = Page::new(vec![], PageRequest::new(0, 0), 5);
        assert_eq!(empty.total_pages(), 0);
    }

    #[test]
    fn test_vector_counts() {
        let v: TrigramVector = vec![("abc".to_string(), 2), ("bcd".to_string(), 1)]
            .into_iter()
            .collect();
        assert_eq!(v.get("abc"), 2);
        assert_eq!(v.get("zzz"), 0);
        assert_eq!(v.total(), 3);
        assert_eq!(v.len(), 2);
    }
}
