//! Comparison result cache.
//!
//! Two bounded maps behind `RwLock`s:
//!
//! - **pair scores**, keyed by the unordered pair of document ids. A pair's
//!   score never changes (documents are immutable), so entries are only
//!   evicted for capacity.
//! - **corpus pages**, keyed by the full corpus query. These go stale when
//!   new documents land, so ingestion calls [`ResultCache::invalidate_corpus`].
//!   A generation counter stops a page computed before an invalidation from
//!   being stored after it.
//!
//! Eviction is FIFO by insertion order.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::language::Language;
use crate::models::{Page, SimilarityResult};

/// Default number of entries kept per map.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

struct Bounded<K, V> {
    map: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V: Clone> Bounded<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        self.map.get(key).cloned()
    }

    fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        if self.map.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        while self.map.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.map.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Cache key for one corpus comparison page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorpusKey {
    pub target_id: i64,
    pub page: u32,
    pub size: u32,
    pub language: Option<Language>,
    /// `min_similarity` as raw bits, so the key stays `Eq + Hash`.
    pub min_similarity_bits: u64,
}

impl CorpusKey {
    pub fn new(
        target_id: i64,
        page: u32,
        size: u32,
        language: Option<Language>,
        min_similarity: f64,
    ) -> Self {
        Self {
            target_id,
            page,
            size,
            language,
            min_similarity_bits: min_similarity.to_bits(),
        }
    }
}

pub struct ResultCache {
    pairs: RwLock<Bounded<(i64, i64), f64>>,
    pages: RwLock<Bounded<CorpusKey, Page<SimilarityResult>>>,
    generation: AtomicU64,
}

fn pair_key(a: i64, b: i64) -> (i64, i64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            pairs: RwLock::new(Bounded::new(capacity)),
            pages: RwLock::new(Bounded::new(capacity)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn pair_score(&self, a: i64, b: i64) -> Option<f64> {
        self.pairs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pair_key(a, b))
    }

    pub fn put_pair_score(&self, a: i64, b: i64, score: f64) {
        self.pairs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pair_key(a, b), score);
    }

    /// Current corpus generation; pass it back to [`put_corpus_page`](Self::put_corpus_page).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn corpus_page(&self, key: &CorpusKey) -> Option<Page<SimilarityResult>> {
        self.pages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
    }

    /// Store a page computed while the corpus was at `generation`. Dropped
    /// if the corpus changed in the meantime.
    pub fn put_corpus_page(&self, key: CorpusKey, page: Page<SimilarityResult>, generation: u64) {
        let mut pages = self.pages.write().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::Acquire) == generation {
            pages.insert(key, page);
        }
    }

    /// Forget every cached corpus page. Pair scores stay valid.
    pub fn invalidate_corpus(&self) {
        let mut pages = self.pages.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::AcqRel);
        pages.clear();
    }

    /// Drop pair scores and corpus pages.
    pub fn clear(&self) {
        self.pairs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.invalidate_corpus();
    }

    pub fn len(&self) -> usize {
        self.pairs.read().unwrap_or_else(PoisonError::into_inner).len()
            + self.pages.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
