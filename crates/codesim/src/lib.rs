//! # codesim
//!
//! **Source-code similarity detection over a SQLite corpus.**
//!
//! Uploaded files are normalized (comments, keywords, literals and
//! punctuation removed), fingerprinted as character-trigram count vectors and
//! compared by cosine similarity.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────────┐   ┌──────────┐
//! │ producer │──▶│  queue   │──▶│ worker pool   │──▶│  SQLite  │
//! │ validate │   │ (mpsc)   │   │ norm + hash   │   │ corpus   │
//! │ + stage  │   └──────────┘   └───────────────┘   └────┬─────┘
//! └──────────┘                                           │
//!                                      ┌─────────────────┘
//!                                      ▼
//!                              ┌───────────────┐
//!                              │ comparison    │ lazy vectors,
//!                              │ service       │ result cache
//!                              └───────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. [`ingest::BatchProducer`] validates a batch, creates a job and stages
//!    the bytes under a batch-scoped directory ([`staging`]).
//! 2. [`ingest::IngestionPipeline`] reads, normalizes and hashes each file on
//!    a bounded worker pool and bulk-inserts the results, skipping content
//!    that is already stored.
//! 3. [`codesim_core::compare::ComparisonService`] computes trigram vectors on
//!    first use, persists them, and scores pairs, batches and corpus pages.
//!
//! The algorithms live in `codesim-core`; this crate supplies configuration,
//! the SQLite store, the staging area, the ingestion runtime and the CLI.

pub mod commands;
pub mod config;
pub mod db;
pub mod ingest;
pub mod migrate;
pub mod sqlite_store;
pub mod staging;
pub mod stats;

use std::sync::Arc;

use anyhow::Result;

use codesim_core::cache::ResultCache;
use codesim_core::compare::ComparisonService;
use codesim_core::jobs::JobTracker;

use crate::config::Config;
use crate::ingest::IngestionPipeline;
use crate::sqlite_store::SqliteStore;
use crate::staging::StagingArea;

/// Everything a command needs, wired from one configuration.
pub struct App {
    pub store: Arc<SqliteStore>,
    pub tracker: Arc<JobTracker>,
    pub cache: Arc<ResultCache>,
    pub compare: ComparisonService<SqliteStore>,
    pub pipeline: Arc<IngestionPipeline<SqliteStore>>,
}

impl App {
    /// Connect to the database, run migrations and build the services.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate(&pool).await?;

        let store = Arc::new(SqliteStore::new(pool));
        let tracker = Arc::new(JobTracker::new());
        let cache = Arc::new(ResultCache::new(config.compare.cache_capacity));

        let compare = ComparisonService::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            config.compare.settings(),
        );
        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::clone(&store),
            Arc::clone(&tracker),
            Arc::clone(&cache),
            StagingArea::new(config.staging.dir.clone()),
            config.ingest.clone(),
            config.compare.max_content_length,
        ));

        Ok(Self {
            store,
            tracker,
            cache,
            compare,
            pipeline,
        })
    }

    pub async fn close(&self) {
        self.store.pool().close().await;
    }
}
