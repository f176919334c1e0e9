//! CLI command implementations.
//!
//! Each `run_*` function opens the application from a config, does one
//! thing, and prints a human-readable result to stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use codesim_core::compare::{BatchCompareRequest, CorpusQuery};
use codesim_core::language::parse_filter;
use codesim_core::models::{PageRequest, SimilarityResult};
use codesim_core::store::Store;
use codesim_core::Language;

use crate::config::Config;
use crate::ingest::{spawn_reaper, wait_for_job};
use crate::staging::UploadFile;
use crate::App;

/// Collect every file under `paths` whose extension belongs to `language`.
pub fn collect_files(paths: &[PathBuf], language: Language) -> Result<Vec<UploadFile>> {
    let mut files = Vec::new();
    for root in paths {
        if !root.exists() {
            bail!("Path does not exist: {}", root.display());
        }
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let name = display_name(path);
            if !language.accepts_file_name(&name) {
                debug!(path = %path.display(), "skipping file with foreign extension");
                continue;
            }
            let content = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if content.is_empty() {
                warn!(path = %path.display(), "skipping empty file");
                continue;
            }
            files.push(UploadFile::new(name, content));
        }
    }
    Ok(files)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub async fn run_ingest(config: &Config, language: &str, paths: &[PathBuf]) -> Result<()> {
    let lang: Language = language.parse()?;
    let files = collect_files(paths, lang)?;
    if files.is_empty() {
        println!("No {} files found.", lang);
        return Ok(());
    }

    let app = App::open(config).await?;
    let reaper = spawn_reaper(
        Arc::clone(&app.tracker),
        config.jobs.reap_interval(),
        config.jobs.retention(),
    );
    let (producer, consumer) = Arc::clone(&app.pipeline).start();

    let job_id = producer.submit(files, language).await?;
    let job = wait_for_job(&app.tracker, &job_id, Duration::from_millis(50)).await;
    drop(producer);
    consumer.await.context("ingestion consumer panicked")?;
    reaper.abort();

    match job {
        Some(job) => {
            println!(
                "Job {}: {} (processed {}, failed {}, total {})",
                job.job_id, job.status, job.processed_files, job.failed_files, job.total_files
            );
            if let Some(msg) = &job.error_message {
                println!("  error: {}", msg);
            }
        }
        None => println!("Job {} is no longer tracked.", job_id),
    }

    app.close().await;
    Ok(())
}

pub async fn run_upload(config: &Config, language: &str, path: &Path) -> Result<()> {
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let app = App::open(config).await?;
    let doc = app
        .pipeline
        .ingest_one(UploadFile::new(display_name(path), content), language)
        .await?;

    println!(
        "Document {}: {} ({}, {} trigrams)",
        doc.id,
        doc.file_name,
        doc.language,
        doc.trigram_vector.as_ref().map_or(0, |v| v.len())
    );
    app.close().await;
    Ok(())
}

pub async fn run_compare(config: &Config, a: i64, b: i64) -> Result<()> {
    let app = App::open(config).await?;
    let score = app.compare.similarity(a, b).await?;
    println!("{:.2}%", score);
    app.close().await;
    Ok(())
}

pub async fn run_corpus(
    config: &Config,
    target: i64,
    page: u32,
    size: Option<u32>,
    language: Option<String>,
    min_similarity: Option<f64>,
) -> Result<()> {
    let app = App::open(config).await?;
    let query = CorpusQuery {
        page,
        size: size.unwrap_or(config.compare.page_size),
        language,
        min_similarity,
    };
    let results = app.compare.compare_against_corpus(target, &query).await?;

    print_results(&results.content);
    println!();
    println!(
        "Page {} of {} ({} candidates)",
        results.page + 1,
        results.total_pages().max(1),
        results.total_elements
    );
    app.close().await;
    Ok(())
}

pub async fn run_batch(
    config: &Config,
    target: i64,
    ids: Vec<i64>,
    language: Option<String>,
    min_similarity: Option<f64>,
) -> Result<()> {
    let app = App::open(config).await?;
    let mut request = BatchCompareRequest::new(target, &ids);
    request.language = language;
    request.min_similarity = min_similarity;

    let results = app.compare.compare_batch(&request).await?;
    print_results(&results);
    app.close().await;
    Ok(())
}

pub async fn run_list(
    config: &Config,
    page: u32,
    size: u32,
    language: Option<String>,
) -> Result<()> {
    let language = parse_filter(language.as_deref())?;
    let app = App::open(config).await?;
    let docs = app
        .store
        .find_by_language(language, PageRequest::new(page, size))
        .await?;

    if docs.content.is_empty() {
        println!("No documents.");
    } else {
        println!("  {:>6}  {:<12} {:<10} FILE", "ID", "LANGUAGE", "VECTOR");
        println!("  {}", "-".repeat(56));
        for doc in &docs.content {
            println!(
                "  {:>6}  {:<12} {:<10} {}",
                doc.id,
                doc.language,
                if doc.trigrams_generated { "yes" } else { "pending" },
                doc.file_name
            );
        }
    }
    println!();
    println!(
        "Page {} of {} ({} documents)",
        docs.page + 1,
        docs.total_pages().max(1),
        docs.total_elements
    );
    app.close().await;
    Ok(())
}

pub async fn run_vectorize(config: &Config, limit: usize) -> Result<()> {
    let app = App::open(config).await?;
    let report = app.compare.backfill_vectors(limit).await?;
    println!(
        "Vectorized {} documents ({} too short to fingerprint).",
        report.generated, report.empty
    );
    app.close().await;
    Ok(())
}

pub async fn run_purge(config: &Config, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("purge deletes every document; pass --yes to confirm");
    }
    let app = App::open(config).await?;
    let removed = app.compare.delete_all().await?;
    println!("Deleted {} documents.", removed);
    app.close().await;
    Ok(())
}

fn print_results(results: &[SimilarityResult]) {
    if results.is_empty() {
        println!("No matches.");
        return;
    }
    println!("  {:>6}  {:>8}  {:<12} FILE", "ID", "SCORE", "LANGUAGE");
    println!("  {}", "-".repeat(56));
    for r in results {
        println!(
            "  {:>6}  {:>7.2}%  {:<12} {}",
            r.document_id, r.score, r.language, r.file_name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_files_filters_by_extension() {
        let tmp = tempfile::TempDir::new().unwrap();
        let nested = tmp.path().join("src/pkg");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("A.java"), "class A {}").unwrap();
        std::fs::write(nested.join("b.py"), "x = 1").unwrap();
        std::fs::write(tmp.path().join("Empty.java"), "").unwrap();

        let files = collect_files(&[tmp.path().to_path_buf()], Language::Java).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "A.java");

        assert!(collect_files(&[tmp.path().join("missing")], Language::Java).is_err());
    }
}
