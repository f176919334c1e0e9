use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use codesim::config::{load_config, Config, IngestConfig};
use codesim::ingest::{spawn_reaper, wait_for_job, IngestionPipeline};
use codesim::staging::{StagingArea, UploadFile};
use codesim::App;
use codesim_core::cache::ResultCache;
use codesim_core::compare::{BatchCompareRequest, CorpusQuery};
use codesim_core::jobs::{JobStatus, JobTracker};
use codesim_core::models::{Document, NewDocument, Page, PageRequest};
use codesim_core::store::memory::InMemoryStore;
use codesim_core::store::Store;
use codesim_core::{Error, Language};

/// Digits are stripped by normalization, so distinct files need distinct words.
const WORDS: [&str; 5] = ["alpha", "bravo", "charlie", "delta", "echo"];

fn write_config(root: &Path) -> Config {
    let config_path = root.join("codesim.toml");
    std::fs::write(
        &config_path,
        format!(
            "[db]\npath = '{}'\n\n[staging]\ndir = '{}'\n\n[ingest]\nbatch_size = 2\nworkers = 3\n",
            root.join("data/codesim.sqlite").display(),
            root.join("staging").display()
        ),
    )
    .unwrap();
    load_config(&config_path).unwrap()
}

async fn open_app() -> (TempDir, Config, App) {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    let app = App::open(&config).await.unwrap();
    (tmp, config, app)
}

/// Submit through the queue and process the message in-line.
async fn ingest(app: &App, files: Vec<UploadFile>, language: &str) -> String {
    let (producer, mut receiver) = app.pipeline.channel();
    let job_id = producer.submit(files, language).await.unwrap();
    let message = receiver.recv().await.unwrap();
    assert_eq!(message.job_id, job_id);
    app.pipeline.process_batch(message).await;
    job_id
}

#[tokio::test]
async fn test_duplicate_content_within_batch_is_stored_once() {
    let (_tmp, _config, app) = open_app().await;
    let files = vec![
        UploadFile::new("A.java", "public class Test { }"),
        UploadFile::new("B.java", "public class Test {\n  // same thing\n}"),
        UploadFile::new("C.java", "class Other { int x = 1; }"),
    ];
    let job_id = ingest(&app, files, "JAVA").await;

    let job = app.tracker.get(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_files, 3);
    assert_eq!(job.failed_files, 0);
    assert_eq!(app.store.count_by_language(None).await.unwrap(), 2);
}

#[tokio::test]
async fn test_duplicate_content_across_batches_is_stored_once() {
    let (_tmp, _config, app) = open_app().await;
    ingest(
        &app,
        vec![UploadFile::new("first.py", "def helper(x):\n    return x\n")],
        "python",
    )
    .await;
    let second = ingest(
        &app,
        vec![
            UploadFile::new("copy.py", "# copied\ndef helper(x):\n    return x\n"),
            UploadFile::new("new.py", "def other(y):\n    print(y)\n"),
        ],
        "python",
    )
    .await;

    let job = app.tracker.get(&second).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_files, 2);
    assert_eq!(app.store.count_by_language(Some(Language::Python)).await.unwrap(), 2);
}

#[tokio::test]
async fn test_unreadable_file_is_counted_as_failed() {
    let (_tmp, config, app) = open_app().await;
    let (producer, mut receiver) = app.pipeline.channel();
    let job_id = producer
        .submit(
            vec![
                UploadFile::new("One.java", "class One { void a() {} }"),
                UploadFile::new("Two.java", "class Two { void b() {} }"),
                UploadFile::new("Three.java", "class Three { void c() {} }"),
            ],
            "JAVA",
        )
        .await
        .unwrap();

    let message = receiver.recv().await.unwrap();
    std::fs::remove_file(&message.files[1].staged_path).unwrap();
    app.pipeline.process_batch(message).await;

    let job = app.tracker.get(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_files, 2);
    assert_eq!(job.failed_files, 1);
    assert_eq!(job.progress(), 100.0);
    assert_eq!(app.store.count_by_language(None).await.unwrap(), 2);
    assert!(!config.staging.dir.join(format!("batch_{}", job_id)).exists());
}

#[tokio::test]
async fn test_missing_staging_directory_fails_job() {
    let (_tmp, config, app) = open_app().await;
    let (producer, mut receiver) = app.pipeline.channel();
    let job_id = producer
        .submit(vec![UploadFile::new("A.go", "func main() {}")], "GO")
        .await
        .unwrap();

    let message = receiver.recv().await.unwrap();
    std::fs::remove_dir_all(config.staging.dir.join(format!("batch_{}", job_id))).unwrap();
    app.pipeline.process_batch(message).await;

    let job = app.tracker.get(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("staging directory unusable"));
}

#[tokio::test]
async fn test_invalid_batch_creates_no_job() {
    let (_tmp, _config, app) = open_app().await;
    let (producer, _receiver) = app.pipeline.channel();
    let err = producer
        .submit(vec![UploadFile::new("a.rb", "puts 1")], "JAVA")
        .await
        .unwrap_err();
    assert!(err.is_client_error());
    assert!(app.tracker.is_empty());

    let err = producer.submit(Vec::new(), "JAVA").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_queue_consumer_end_to_end() {
    let (_tmp, _config, app) = open_app().await;
    let (producer, consumer) = Arc::clone(&app.pipeline).start();

    let mut jobs = Vec::new();
    for batch in ["red", "green", "blue"] {
        let files = WORDS
            .iter()
            .map(|word| {
                UploadFile::new(
                    format!("{}_{}.java", batch, word),
                    format!("class {}{} {{ void {}() {{}} }}", batch, word, word),
                )
            })
            .collect();
        jobs.push(producer.submit(files, "JAVA").await.unwrap());
    }

    for job_id in &jobs {
        let job = wait_for_job(&app.tracker, job_id, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_files, 5);
    }
    drop(producer);
    consumer.await.unwrap();
    assert_eq!(app.store.count_by_language(None).await.unwrap(), 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_overlapping_batches_store_each_hash_once() {
    let (_tmp, _config, app) = open_app().await;
    let (producer, consumer) = Arc::clone(&app.pipeline).start();

    let submissions = (0..6).map(|batch| {
        let producer = producer.clone();
        async move {
            let files = WORDS
                .iter()
                .map(|word| {
                    UploadFile::new(
                        format!("copy{}_{}.java", batch, word),
                        format!("class {} {{ void {}() {{}} }}", word, word),
                    )
                })
                .collect();
            producer.submit(files, "JAVA").await.unwrap()
        }
    });
    let jobs = futures::future::join_all(submissions).await;

    for job_id in &jobs {
        let job = wait_for_job(&app.tracker, job_id, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_files, 5);
        assert_eq!(job.failed_files, 0);
    }
    drop(producer);
    consumer.await.unwrap();
    assert_eq!(app.store.count_by_language(None).await.unwrap(), 5);
}

#[tokio::test]
async fn test_lazy_vectors_are_persisted_on_first_comparison() {
    let (_tmp, _config, app) = open_app().await;
    ingest(
        &app,
        vec![
            UploadFile::new("A.java", "public class Test { // c\n}"),
            UploadFile::new("B.java", "class Test {}\n"),
        ],
        "JAVA",
    )
    .await;

    let a = app.store.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(a.normalized_content, "class test");
    assert!(!a.trigrams_generated);

    // both normalize to "class test", so the second was deduplicated
    assert!(app.store.find_by_id(2).await.unwrap().is_none());

    let uploaded = app
        .pipeline
        .ingest_one(
            UploadFile::new("C.java", "public class Test { void run() {} }"),
            "JAVA",
        )
        .await
        .unwrap();
    assert!(uploaded.trigrams_generated);

    let score = app.compare.similarity(1, uploaded.id).await.unwrap();
    assert!(score > 0.0 && score < 100.0, "score {}", score);

    let a = app.store.find_by_id(1).await.unwrap().unwrap();
    assert!(a.trigrams_generated);
    let vector = a.trigram_vector.clone().unwrap();
    assert_eq!(vector.get("cla"), 1);

    app.compare.similarity(1, uploaded.id).await.unwrap();
    let again = app.store.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(again.trigram_vector.unwrap(), vector);
}

#[tokio::test]
async fn test_upload_returns_existing_duplicate_and_rejects_short_content() {
    let (_tmp, _config, app) = open_app().await;
    let first = app
        .pipeline
        .ingest_one(UploadFile::new("a.ts", "function add(a, b) { return a + b; }"), "typescript")
        .await
        .unwrap();
    let second = app
        .pipeline
        .ingest_one(
            UploadFile::new("b.ts", "// same\nfunction add(a, b) { return a + b; }"),
            "TYPESCRIPT",
        )
        .await
        .unwrap();
    assert_eq!(first.id, second.id);

    let err = app
        .pipeline
        .ingest_one(UploadFile::new("c.ts", "if (x) {}"), "typescript")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_corpus_pages_never_include_target() {
    let (_tmp, _config, app) = open_app().await;
    let files = WORDS
        .iter()
        .map(|word| {
            UploadFile::new(
                format!("{}.go", word),
                format!("package main\nfunc {}() {{ {}() }}", word, word),
            )
        })
        .collect();
    ingest(&app, files, "GO").await;

    let mut seen = Vec::new();
    for page in 0..3 {
        let query = CorpusQuery {
            page,
            size: 2,
            ..Default::default()
        };
        let results = app.compare.compare_against_corpus(1, &query).await.unwrap();
        assert_eq!(results.total_elements, 4);
        seen.extend(results.content.iter().map(|r| r.document_id));
    }
    seen.sort();
    assert_eq!(seen, vec![2, 3, 4, 5]);

    let batch = app
        .compare
        .compare_batch(&BatchCompareRequest::new(1, &[5, 1, 3]))
        .await
        .unwrap();
    let mut ids: Vec<i64> = batch.iter().map(|r| r.document_id).collect();
    ids.sort();
    assert_eq!(ids, vec![3, 5]);
}

#[tokio::test]
async fn test_new_ingestion_invalidates_corpus_cache() {
    let (_tmp, _config, app) = open_app().await;
    ingest(
        &app,
        vec![
            UploadFile::new("a.rb", "def greet(name)\n  puts name\nend\n"),
            UploadFile::new("b.rb", "def greet(person)\n  puts person\nend\n"),
        ],
        "RUBY",
    )
    .await;

    let query = CorpusQuery {
        size: 10,
        ..Default::default()
    };
    let before = app.compare.compare_against_corpus(1, &query).await.unwrap();
    assert_eq!(before.total_elements, 1);

    ingest(
        &app,
        vec![UploadFile::new("c.rb", "def farewell(name)\n  puts name\nend\n")],
        "RUBY",
    )
    .await;
    let after = app.compare.compare_against_corpus(1, &query).await.unwrap();
    assert_eq!(after.total_elements, 2);
}

#[tokio::test]
async fn test_reaper_drops_finished_jobs() {
    let tracker = Arc::new(JobTracker::new());
    tracker.create_job("done", Language::Java, 1);
    tracker.update_progress("done", 1, 0);
    tracker.create_job("running", Language::Java, 2);

    let reaper = spawn_reaper(
        Arc::clone(&tracker),
        Duration::from_millis(10),
        Duration::from_millis(0),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    reaper.abort();

    assert!(tracker.get("done").is_none());
    assert!(tracker.get("running").is_some());
}

/// Store whose bulk insert always fails, to exercise the row-by-row path.
/// The first `single_failures` single inserts fail as well.
struct BulkFailingStore {
    inner: InMemoryStore,
    single_inserts: AtomicUsize,
    single_failures: AtomicUsize,
}

impl BulkFailingStore {
    fn new(single_failures: usize) -> Self {
        Self {
            inner: InMemoryStore::new(),
            single_inserts: AtomicUsize::new(0),
            single_failures: AtomicUsize::new(single_failures),
        }
    }
}

#[async_trait]
impl Store for BulkFailingStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Document>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_language(
        &self,
        language: Option<Language>,
        page: PageRequest,
    ) -> Result<Page<Document>> {
        self.inner.find_by_language(language, page).await
    }

    async fn find_all_by_id_and_language(
        &self,
        ids: &[i64],
        language: Option<Language>,
    ) -> Result<Vec<Document>> {
        self.inner.find_all_by_id_and_language(ids, language).await
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        self.inner.find_by_hash(content_hash).await
    }

    async fn bulk_insert_ignoring_duplicate_hash(&self, _docs: &[NewDocument]) -> Result<Vec<i64>> {
        bail!("database is locked")
    }

    async fn insert_ignoring_duplicate_hash(&self, doc: &NewDocument) -> Result<Option<i64>> {
        self.single_inserts.fetch_add(1, Ordering::SeqCst);
        if self
            .single_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("disk I/O error");
        }
        self.inner.insert_ignoring_duplicate_hash(doc).await
    }

    async fn save(&self, doc: &Document) -> Result<Document> {
        self.inner.save(doc).await
    }

    async fn count_by_language(&self, language: Option<Language>) -> Result<u64> {
        self.inner.count_by_language(language).await
    }

    async fn find_pending_vectorization(&self, limit: usize) -> Result<Vec<Document>> {
        self.inner.find_pending_vectorization(limit).await
    }

    async fn delete_all(&self) -> Result<u64> {
        self.inner.delete_all().await
    }
}

#[tokio::test]
async fn test_bulk_insert_failure_falls_back_to_single_inserts() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(BulkFailingStore::new(0));
    let tracker = Arc::new(JobTracker::new());
    let pipeline = IngestionPipeline::new(
        Arc::clone(&store),
        Arc::clone(&tracker),
        Arc::new(ResultCache::default()),
        StagingArea::new(tmp.path()),
        IngestConfig::default(),
        50_000,
    );

    let (producer, mut receiver) = pipeline.channel();
    let job_id = producer
        .submit(
            vec![
                UploadFile::new("a.cpp", "int add(int a, int b) { return a + b; }"),
                UploadFile::new("b.hpp", "struct Point { int x; int y; };"),
            ],
            "CPP",
        )
        .await
        .unwrap();
    pipeline.process_batch(receiver.recv().await.unwrap()).await;

    let job = tracker.get(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_files, 2);
    assert_eq!(store.single_inserts.load(Ordering::SeqCst), 2);
    assert_eq!(store.inner.len(), 2);
}

#[tokio::test]
async fn test_copy_of_unstored_content_gets_its_own_insert() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(BulkFailingStore::new(1));
    let tracker = Arc::new(JobTracker::new());
    let pipeline = IngestionPipeline::new(
        Arc::clone(&store),
        Arc::clone(&tracker),
        Arc::new(ResultCache::default()),
        StagingArea::new(tmp.path()),
        IngestConfig::default(),
        50_000,
    );

    let (producer, mut receiver) = pipeline.channel();
    let job_id = producer
        .submit(
            vec![
                UploadFile::new("first.rb", "def greet(name)\n  puts name\nend\n"),
                UploadFile::new("second.rb", "# same body\ndef greet(name)\n  puts name\nend\n"),
            ],
            "ruby",
        )
        .await
        .unwrap();
    pipeline.process_batch(receiver.recv().await.unwrap()).await;

    let job = tracker.get(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.failed_files, 1);
    assert_eq!(job.processed_files, 1);
    assert_eq!(store.single_inserts.load(Ordering::SeqCst), 2);
    assert_eq!(store.inner.len(), 1);
}
