//! Batch ingestion: validate → stage → enqueue → normalize/hash → persist.
//!
//! A caller hands a batch of files to [`BatchProducer::submit`], which
//! validates them, creates a job, stages the bytes on disk and enqueues one
//! [`BatchMessage`]. [`IngestionPipeline::run_consumer`] drains the queue,
//! handling up to `consumers` batches at once.
//!
//! Each batch is split into sub-batches of `batch_size` files. Every file is
//! read, deleted from staging, normalized and hashed by a task holding a
//! permit from a single worker semaphore shared by all batches. The
//! semaphore hands out permits in FIFO order, so a large batch cannot starve
//! batches that arrive after it.
//!
//! Accepted documents go to the store with one insert-or-ignore call per
//! sub-batch, falling back to row-by-row inserts if that call fails. Vectors
//! are not computed here; they are filled in on first comparison.
//!
//! A file counts as processed once it is persisted or recognized as a
//! duplicate, and as failed if it cannot be read, normalizes to nothing, or
//! cannot be stored.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use codesim_core::cache::ResultCache;
use codesim_core::jobs::{IngestionJob, JobTracker};
use codesim_core::models::{Document, NewDocument};
use codesim_core::normalize::{content_hash, Normalizer};
use codesim_core::store::Store;
use codesim_core::trigram::vectorize;
use codesim_core::{Error, Language};

use crate::config::IngestConfig;
use crate::staging::{self, StagedFile, StagingArea, UploadFile};

/// Queue message for one staged batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMessage {
    pub job_id: String,
    pub language: Language,
    pub files: Vec<StagedFile>,
    pub timestamp: DateTime<Utc>,
}

fn validate_file(file: &UploadFile, language: Language, max_file_bytes: u64) -> codesim_core::Result<()> {
    if file.content.is_empty() {
        return Err(Error::invalid(format!("File {} is empty", file.name)));
    }
    if file.size() > max_file_bytes {
        return Err(Error::invalid(format!(
            "File {} exceeds maximum size of {} bytes",
            file.name, max_file_bytes
        )));
    }
    if !language.accepts_file_name(&file.name) {
        return Err(Error::invalid(format!(
            "Invalid file extension for {}; expected one of: {}",
            file.name,
            language.extensions().join(", ")
        )));
    }
    Ok(())
}

/// Check a whole batch before anything is written. Any bad file rejects the
/// batch.
pub fn validate_batch(
    files: &[UploadFile],
    language: &str,
    max_file_bytes: u64,
) -> codesim_core::Result<Language> {
    if files.is_empty() {
        return Err(Error::invalid("No files provided"));
    }
    let language: Language = language.parse()?;
    for file in files {
        validate_file(file, language, max_file_bytes)?;
    }
    Ok(language)
}

/// Submitting side of the ingestion queue.
#[derive(Clone)]
pub struct BatchProducer {
    sender: mpsc::Sender<BatchMessage>,
    tracker: Arc<JobTracker>,
    staging: StagingArea,
    max_file_bytes: u64,
}

impl BatchProducer {
    /// Validate, stage and enqueue a batch. Returns the job id to poll.
    pub async fn submit(&self, files: Vec<UploadFile>, language: &str) -> codesim_core::Result<String> {
        let language = validate_batch(&files, language, self.max_file_bytes)?;

        let job_id = Uuid::new_v4().to_string();
        self.tracker
            .create_job(&job_id, language, files.len() as u64);

        let staged = match self.staging.stage(&job_id, &files).await {
            Ok(staged) => staged,
            Err(e) => {
                let message = format!("{:#}", e);
                self.tracker.mark_failed(&job_id, message.clone());
                self.staging.cleanup(&job_id).await;
                return Err(Error::Io(std::io::Error::other(message)));
            }
        };

        let message = BatchMessage {
            job_id: job_id.clone(),
            language,
            files: staged,
            timestamp: Utc::now(),
        };
        if self.sender.send(message).await.is_err() {
            self.tracker.mark_failed(&job_id, "ingestion queue closed");
            self.staging.cleanup(&job_id).await;
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::BrokenPipe,
                "ingestion queue closed",
            )));
        }

        info!(job_id = %job_id, %language, files = files.len(), "batch enqueued");
        Ok(job_id)
    }
}

/// Per-sub-batch tallies.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    processed: u64,
    failed: u64,
    inserted: u64,
}

pub struct IngestionPipeline<S: Store + ?Sized> {
    store: Arc<S>,
    tracker: Arc<JobTracker>,
    cache: Arc<ResultCache>,
    staging: StagingArea,
    normalizer: Arc<Normalizer>,
    workers: Arc<Semaphore>,
    config: IngestConfig,
    max_content_length: usize,
}

impl<S: Store + ?Sized + 'static> IngestionPipeline<S> {
    pub fn new(
        store: Arc<S>,
        tracker: Arc<JobTracker>,
        cache: Arc<ResultCache>,
        staging: StagingArea,
        config: IngestConfig,
        max_content_length: usize,
    ) -> Self {
        Self {
            store,
            tracker,
            cache,
            staging,
            normalizer: Arc::new(Normalizer::default()),
            workers: Arc::new(Semaphore::new(config.workers.max(1))),
            config,
            max_content_length,
        }
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Arc::new(normalizer);
        self
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// A producer bound to a new queue, without a consumer. Pair with
    /// [`run_consumer`](Self::run_consumer), or use [`start`](Self::start).
    pub fn channel(&self) -> (BatchProducer, mpsc::Receiver<BatchMessage>) {
        let (sender, receiver) = mpsc::channel(self.config.queue_capacity.max(1));
        let producer = BatchProducer {
            sender,
            tracker: Arc::clone(&self.tracker),
            staging: self.staging.clone(),
            max_file_bytes: self.config.max_file_bytes,
        };
        (producer, receiver)
    }

    /// Create the queue and spawn its consumer. The consumer stops once every
    /// producer clone has been dropped and in-flight batches have finished.
    pub fn start(self: Arc<Self>) -> (BatchProducer, JoinHandle<()>) {
        let (producer, receiver) = self.channel();
        let handle = tokio::spawn(self.run_consumer(receiver));
        (producer, handle)
    }

    pub async fn run_consumer(self: Arc<Self>, mut receiver: mpsc::Receiver<BatchMessage>) {
        let slots = Arc::new(Semaphore::new(self.config.consumers.max(1)));
        let mut in_flight = JoinSet::new();

        while let Some(message) = receiver.recv().await {
            let permit = match Arc::clone(&slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let pipeline = Arc::clone(&self);
            in_flight.spawn(async move {
                pipeline.process_batch(message).await;
                drop(permit);
            });

            while let Some(done) = in_flight.try_join_next() {
                if let Err(e) = done {
                    error!(error = %e, "batch task aborted");
                }
            }
        }

        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                error!(error = %e, "batch task aborted");
            }
        }
        debug!("ingestion consumer stopped");
    }

    /// Handle one batch end to end. Never returns an error: the outcome is
    /// recorded on the job. Staging is cleaned up in every case.
    pub async fn process_batch(&self, message: BatchMessage) {
        let job_id = message.job_id.clone();
        self.tracker.start(&job_id);
        info!(job_id = %job_id, files = message.files.len(), "processing batch");

        if let Err(e) = self.run_batch(&message).await {
            let reason = format!("{:#}", e);
            error!(job_id = %job_id, error = %reason, "batch failed");
            self.tracker.mark_failed(&job_id, reason);
        }

        self.staging.cleanup(&job_id).await;
    }

    async fn run_batch(&self, message: &BatchMessage) -> anyhow::Result<()> {
        let dir = self.staging.batch_dir(&message.job_id);
        if !message.files.is_empty() {
            tokio::fs::metadata(&dir)
                .await
                .with_context(|| format!("staging directory unusable: {}", dir.display()))?;
        }

        let mut seen = HashSet::new();
        let mut total = Tally::default();
        for chunk in message.files.chunks(self.config.batch_size.max(1)) {
            let tally = self
                .process_sub_batch(&message.job_id, message.language, chunk, &mut seen)
                .await;
            total.processed += tally.processed;
            total.failed += tally.failed;
            total.inserted += tally.inserted;
            self.tracker
                .update_progress(&message.job_id, total.processed, total.failed);
            debug!(
                job_id = %message.job_id,
                processed = total.processed,
                failed = total.failed,
                "sub-batch done"
            );
        }
        if message.files.is_empty() {
            self.tracker.update_progress(&message.job_id, 0, 0);
        }

        if total.inserted > 0 {
            self.cache.invalidate_corpus();
        }
        info!(
            job_id = %message.job_id,
            inserted = total.inserted,
            duplicates = total.processed - total.inserted,
            failed = total.failed,
            "batch persisted"
        );
        Ok(())
    }

    async fn process_sub_batch(
        &self,
        job_id: &str,
        language: Language,
        files: &[StagedFile],
        seen: &mut HashSet<String>,
    ) -> Tally {
        let handles: Vec<JoinHandle<Option<NewDocument>>> = files
            .iter()
            .cloned()
            .map(|file| {
                let workers = Arc::clone(&self.workers);
                let normalizer = Arc::clone(&self.normalizer);
                tokio::spawn(async move {
                    let _permit = workers.acquire_owned().await.ok()?;
                    prepare_file(&normalizer, file, language).await
                })
            })
            .collect();

        let mut tally = Tally::default();
        let mut docs = Vec::with_capacity(files.len());
        let mut held = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Some(doc)) => {
                    if seen.insert(doc.content_hash.clone()) {
                        docs.push(doc);
                    } else {
                        debug!(job_id, file = %doc.file_name, "duplicate within batch");
                        held.push(doc);
                    }
                }
                Ok(None) => tally.failed += 1,
                Err(e) => {
                    error!(job_id, error = %e, "file task aborted");
                    tally.failed += 1;
                }
            }
        }

        let (inserted, failed_hashes) = self.persist(job_id, &docs).await;
        tally.inserted = inserted;
        tally.failed += failed_hashes.len() as u64;
        tally.processed = (docs.len() - failed_hashes.len()) as u64;

        // Content that never reached the store is not a duplicate: later
        // copies get their own attempt.
        for hash in &failed_hashes {
            seen.remove(hash);
        }
        for doc in held {
            if !seen.insert(doc.content_hash.clone()) {
                tally.processed += 1;
                continue;
            }
            match self.store.insert_ignoring_duplicate_hash(&doc).await {
                Ok(id) => {
                    tally.inserted += u64::from(id.is_some());
                    tally.processed += 1;
                }
                Err(e) => {
                    error!(job_id, file = %doc.file_name, error = %e, "failed to persist file");
                    seen.remove(&doc.content_hash);
                    tally.failed += 1;
                }
            }
        }
        tally
    }

    /// Insert-or-ignore the accepted documents. Returns the number inserted
    /// and the hashes that could not be stored.
    async fn persist(&self, job_id: &str, docs: &[NewDocument]) -> (u64, HashSet<String>) {
        let mut failed = HashSet::new();
        if docs.is_empty() {
            return (0, failed);
        }

        match self.store.bulk_insert_ignoring_duplicate_hash(docs).await {
            Ok(ids) => return (ids.len() as u64, failed),
            Err(e) => {
                warn!(job_id, error = %e, "bulk insert failed, falling back to single inserts");
            }
        }

        let mut inserted = 0;
        for doc in docs {
            match self.store.insert_ignoring_duplicate_hash(doc).await {
                Ok(Some(_)) => inserted += 1,
                Ok(None) => {}
                Err(e) => {
                    error!(job_id, file = %doc.file_name, error = %e, "failed to persist file");
                    failed.insert(doc.content_hash.clone());
                }
            }
        }
        (inserted, failed)
    }

    /// Validate, normalize, vectorize and persist one file immediately.
    /// Returns the existing document when the content is already stored.
    pub async fn ingest_one(&self, file: UploadFile, language: &str) -> codesim_core::Result<Document> {
        let language: Language = language.parse()?;
        validate_file(&file, language, self.config.max_file_bytes)?;

        let content = String::from_utf8_lossy(&file.content);
        let normalized = self.normalizer.normalize(&content, language);
        if normalized.is_empty() {
            return Err(Error::invalid(format!(
                "File {} has no content after normalization",
                file.name
            )));
        }

        let hash = content_hash(&normalized);
        if let Some(existing) = self.store.find_by_hash(&hash).await? {
            info!(document_id = existing.id, file = %file.name, "duplicate upload, returning existing document");
            return Ok(existing);
        }

        let vector = vectorize(&normalized, self.max_content_length);
        if vector.is_empty() {
            return Err(Error::invalid(format!(
                "File {} is too short to fingerprint",
                file.name
            )));
        }

        let new_doc = NewDocument {
            file_name: file.name.clone(),
            language,
            raw_content_ref: None,
            normalized_content: normalized,
            content_hash: hash.clone(),
            created_at: Utc::now(),
        };

        let id = match self.store.insert_ignoring_duplicate_hash(&new_doc).await? {
            Some(id) => id,
            // lost a race with another insert of the same content
            None => {
                return self
                    .store
                    .find_by_hash(&hash)
                    .await?
                    .ok_or_else(|| Error::StateInconsistency {
                        id: 0,
                        reason: format!("content hash {} vanished after conflict", hash),
                    })
            }
        };

        let mut doc = new_doc.into_document(id);
        doc.trigram_vector = Some(vector);
        doc.trigrams_generated = true;
        let doc = self.store.save(&doc).await?;
        self.cache.invalidate_corpus();

        info!(document_id = doc.id, file = %doc.file_name, %language, "document uploaded");
        Ok(doc)
    }
}

/// Read one staged file, delete it, normalize and hash. `None` marks the
/// file as failed.
async fn prepare_file(normalizer: &Normalizer, file: StagedFile, language: Language) -> Option<NewDocument> {
    let read = tokio::fs::read(&file.staged_path).await;
    staging::discard(&file).await;

    let bytes = match read {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(file = %file.original_name, error = %e, "failed to read staged file");
            return None;
        }
    };

    let normalized = normalizer.normalize(&String::from_utf8_lossy(&bytes), language);
    if normalized.is_empty() {
        warn!(file = %file.original_name, "no content after normalization");
        return None;
    }

    let raw_content_ref = file
        .staged_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());

    Some(NewDocument {
        file_name: file.original_name,
        language,
        raw_content_ref,
        content_hash: content_hash(&normalized),
        normalized_content: normalized,
        created_at: Utc::now(),
    })
}

/// Periodically drop finished jobs older than `retention`.
pub fn spawn_reaper(tracker: Arc<JobTracker>, interval: Duration, retention: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tracker.reap(retention);
        }
    })
}

/// Poll until the job reaches a terminal state. `None` if the job is unknown.
pub async fn wait_for_job(tracker: &JobTracker, job_id: &str, poll: Duration) -> Option<IngestionJob> {
    loop {
        let job = tracker.get(job_id)?;
        if job.is_terminal() {
            return Some(job);
        }
        tokio::time::sleep(poll).await;
    }
}
