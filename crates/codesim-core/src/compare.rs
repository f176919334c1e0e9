//! Comparison service: pairwise, corpus-wide and batch similarity.
//!
//! Every comparison goes through [`ComparisonService::ensure_vector`], which
//! is the get-or-compute-and-persist step for trigram vectors. A document
//! ingested without a vector gets one the first time it is compared, and the
//! vector is saved before the comparison returns. The step is idempotent:
//! two concurrent callers may both compute the vector, and both write the
//! same value.
//!
//! # Corpus comparison
//!
//! 1. Validate the language filter and minimum score.
//! 2. Load and vectorize the target.
//! 3. Fetch one page of the corpus from the store (never the whole corpus).
//! 4. Score every candidate except the target, `concurrency` at a time.
//! 5. Drop scores below the minimum, stable-sort descending.
//! 6. Report the store's filtered total, minus the target when it is in scope.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info};

use crate::cache::{CorpusKey, ResultCache};
use crate::error::{Error, Result};
use crate::language::{parse_filter, Language};
use crate::models::{Document, Page, PageRequest, SimilarityResult, TrigramVector};
use crate::similarity::{cosine, to_percentage};
use crate::store::Store;
use crate::trigram::{vectorize, DEFAULT_MAX_CONTENT_LENGTH};

/// Tuning for the comparison service, decoupled from application config.
#[derive(Debug, Clone)]
pub struct CompareSettings {
    /// Characters vectorized per document.
    pub max_content_length: usize,
    /// Upper bound on candidate ids in one batch comparison.
    pub max_batch_ids: usize,
    /// Candidates scored concurrently.
    pub concurrency: usize,
}

impl Default for CompareSettings {
    fn default() -> Self {
        Self {
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            max_batch_ids: 100,
            concurrency: 8,
        }
    }
}

/// Parameters of one corpus comparison.
#[derive(Debug, Clone, Default)]
pub struct CorpusQuery {
    pub page: u32,
    pub size: u32,
    pub language: Option<String>,
    pub min_similarity: Option<f64>,
}

/// Batch comparison request as received from a caller. Every field is
/// optional so that malformed requests can be rejected with a precise
/// message instead of failing to parse.
#[derive(Debug, Clone, Default)]
pub struct BatchCompareRequest {
    pub target_id: Option<i64>,
    pub candidate_ids: Option<Vec<Option<i64>>>,
    pub language: Option<String>,
    pub min_similarity: Option<f64>,
}

/// A batch request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidBatch {
    pub target_id: i64,
    /// Distinct ids, first occurrence order.
    pub candidate_ids: Vec<i64>,
    pub language: Option<Language>,
    pub min_similarity: f64,
}

impl BatchCompareRequest {
    pub fn new(target_id: i64, candidate_ids: &[i64]) -> Self {
        Self {
            target_id: Some(target_id),
            candidate_ids: Some(candidate_ids.iter().copied().map(Some).collect()),
            language: None,
            min_similarity: None,
        }
    }

    /// Check the request without touching the store.
    pub fn validate(&self, max_ids: usize) -> Result<ValidBatch> {
        let target_id = self
            .target_id
            .ok_or_else(|| Error::invalid("target id must not be null"))?;

        let ids = match &self.candidate_ids {
            Some(ids) if !ids.is_empty() => ids,
            _ => return Err(Error::invalid("file ids must not be null or empty")),
        };
        if ids.len() > max_ids {
            return Err(Error::invalid(format!(
                "Too many file ids; max is {}",
                max_ids
            )));
        }

        let mut candidate_ids = Vec::with_capacity(ids.len());
        for id in ids {
            let id = id.ok_or_else(|| Error::invalid("file ids cannot contain null values"))?;
            if !candidate_ids.contains(&id) {
                candidate_ids.push(id);
            }
        }

        Ok(ValidBatch {
            target_id,
            candidate_ids,
            language: parse_filter(self.language.as_deref())?,
            min_similarity: check_min_similarity(self.min_similarity)?,
        })
    }
}

/// Outcome of [`ComparisonService::backfill_vectors`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub generated: usize,
    /// Documents whose content was too short to produce any trigram.
    pub empty: usize,
}

fn check_min_similarity(min: Option<f64>) -> Result<f64> {
    let min = min.unwrap_or(0.0);
    if min.is_nan() || !(0.0..=100.0).contains(&min) {
        return Err(Error::invalid(format!(
            "minimum similarity must be between 0 and 100, got {}",
            min
        )));
    }
    Ok(min)
}

pub struct ComparisonService<S: Store + ?Sized> {
    store: Arc<S>,
    cache: Arc<ResultCache>,
    settings: CompareSettings,
}

impl<S: Store + ?Sized> ComparisonService<S> {
    pub fn new(store: Arc<S>, cache: Arc<ResultCache>, settings: CompareSettings) -> Self {
        Self {
            store,
            cache,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn settings(&self) -> &CompareSettings {
        &self.settings
    }

    /// Return `doc` with its trigram vector, computing and persisting it first
    /// when it has not been generated yet. Calling this again on the result
    /// is a no-op.
    pub async fn ensure_vector(&self, mut doc: Document) -> Result<Document> {
        if doc.trigrams_generated && doc.trigram_vector.is_some() {
            return Ok(doc);
        }

        let vector = vectorize(&doc.normalized_content, self.settings.max_content_length);
        debug!(
            document_id = doc.id,
            trigrams = vector.len(),
            "generated trigram vector"
        );
        doc.trigram_vector = Some(vector);
        doc.trigrams_generated = true;
        Ok(self.store.save(&doc).await?)
    }

    async fn load(&self, id: i64) -> Result<Document> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(Error::NotFound(id))
    }

    /// Load `id` and return its vector, failing when it is empty.
    async fn target_vector(&self, id: i64) -> Result<(Document, TrigramVector)> {
        let mut doc = self.ensure_vector(self.load(id).await?).await?;
        match doc.trigram_vector.take() {
            Some(v) if !v.is_empty() => Ok((doc, v)),
            _ => {
                error!(document_id = id, "trigram vector missing or empty");
                Err(Error::StateInconsistency {
                    id,
                    reason: "trigram vector not found or empty".into(),
                })
            }
        }
    }

    /// Similarity of two documents as a percentage rounded to two decimals.
    pub async fn similarity(&self, a: i64, b: i64) -> Result<f64> {
        if let Some(score) = self.cache.pair_score(a, b) {
            debug!(a, b, score, "pair cache hit");
            return Ok(score);
        }

        let (_, va) = self.target_vector(a).await?;
        let (_, vb) = self.target_vector(b).await?;
        let score = to_percentage(cosine(&va, &vb));
        self.cache.put_pair_score(a, b, score);
        debug!(a, b, score, "computed similarity");
        Ok(score)
    }

    /// Score one candidate against the target. Candidates that cannot be
    /// vectorized or persisted are logged and skipped.
    async fn score_candidate(
        &self,
        target_id: i64,
        target: &TrigramVector,
        doc: Document,
    ) -> Option<SimilarityResult> {
        let score = match self.cache.pair_score(target_id, doc.id) {
            Some(score) => score,
            None => {
                let doc_id = doc.id;
                let vectorized = match self.ensure_vector(doc.clone()).await {
                    Ok(d) => d,
                    Err(e) => {
                        error!(document_id = doc_id, error = %e, "failed to vectorize candidate");
                        return None;
                    }
                };
                let vector = match vectorized.trigram_vector.as_ref() {
                    Some(v) if !v.is_empty() => v,
                    _ => {
                        error!(document_id = doc_id, "trigram vector missing or empty, skipping");
                        return None;
                    }
                };
                let score = to_percentage(cosine(target, vector));
                self.cache.put_pair_score(target_id, doc_id, score);
                score
            }
        };

        Some(SimilarityResult {
            document_id: doc.id,
            file_name: doc.file_name,
            language: doc.language,
            score,
        })
    }

    async fn score_all(
        &self,
        target_id: i64,
        target: &TrigramVector,
        candidates: Vec<Document>,
        min_similarity: f64,
    ) -> Vec<SimilarityResult> {
        let concurrency = self.settings.concurrency.max(1);
        let mut results: Vec<SimilarityResult> = stream::iter(candidates)
            .filter(|doc| futures::future::ready(doc.id != target_id))
            .map(|doc| self.score_candidate(target_id, target, doc))
            .buffered(concurrency)
            .filter_map(futures::future::ready)
            .filter(|r| futures::future::ready(r.score >= min_similarity))
            .collect()
            .await;
        // stable: ties keep fetch order
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results
    }

    /// Compare the target against one page of the (optionally filtered)
    /// corpus.
    pub async fn compare_against_corpus(
        &self,
        target_id: i64,
        query: &CorpusQuery,
    ) -> Result<Page<SimilarityResult>> {
        let language = parse_filter(query.language.as_deref())?;
        let min_similarity = check_min_similarity(query.min_similarity)?;
        if query.size == 0 {
            return Err(Error::invalid("page size must be positive"));
        }

        let key = CorpusKey::new(target_id, query.page, query.size, language, min_similarity);
        if let Some(page) = self.cache.corpus_page(&key) {
            debug!(target_id, page = query.page, "corpus page cache hit");
            return Ok(page);
        }
        let generation = self.cache.generation();

        info!(
            target_id,
            page = query.page,
            size = query.size,
            language = ?language,
            min_similarity,
            "comparing against corpus"
        );

        let (target, vector) = self.target_vector(target_id).await?;
        let request = PageRequest::new(query.page, query.size);
        let candidates = self.store.find_by_language(language, request).await?;

        let target_in_scope = language.map_or(true, |l| l == target.language);
        let total = if target_in_scope {
            candidates.total_elements.saturating_sub(1)
        } else {
            candidates.total_elements
        };

        let results = self
            .score_all(target_id, &vector, candidates.content, min_similarity)
            .await;
        info!(target_id, results = results.len(), "corpus page scored");

        let page = Page::new(results, request, total);
        self.cache.put_corpus_page(key, page.clone(), generation);
        Ok(page)
    }

    /// Compare the target against an explicit, bounded list of ids.
    pub async fn compare_batch(&self, request: &BatchCompareRequest) -> Result<Vec<SimilarityResult>> {
        let batch = request.validate(self.settings.max_batch_ids)?;
        info!(
            target_id = batch.target_id,
            candidates = batch.candidate_ids.len(),
            "batch comparing"
        );

        let (_, vector) = self.target_vector(batch.target_id).await?;
        let candidates = self
            .store
            .find_all_by_id_and_language(&batch.candidate_ids, batch.language)
            .await?;

        Ok(self
            .score_all(batch.target_id, &vector, candidates, batch.min_similarity)
            .await)
    }

    /// Vectorize up to `limit` documents that have no vector yet.
    pub async fn backfill_vectors(&self, limit: usize) -> Result<BackfillReport> {
        let pending = self.store.find_pending_vectorization(limit).await?;
        let mut report = BackfillReport::default();
        for doc in pending {
            let doc = self.ensure_vector(doc).await?;
            if doc.trigram_vector.as_ref().map_or(true, |v| v.is_empty()) {
                report.empty += 1;
            } else {
                report.generated += 1;
            }
        }
        info!(
            generated = report.generated,
            empty = report.empty,
            "vector backfill finished"
        );
        Ok(report)
    }

    /// Delete every stored document and drop all cached results.
    pub async fn delete_all(&self) -> Result<u64> {
        let removed = self.store.delete_all().await?;
        self.cache.clear();
        info!(removed, "corpus purged");
        Ok(removed)
    }
}
