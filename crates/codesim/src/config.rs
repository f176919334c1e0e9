use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use codesim_core::compare::CompareSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub compare: CompareConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StagingConfig {
    /// Scratch root; each batch gets its own subdirectory.
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
        }
    }
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("codesim-staging")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Files per persistence round-trip.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Files processed concurrently across all batches.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Batches handled concurrently by the consumer.
    #[serde(default = "default_consumers")]
    pub consumers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            consumers: default_consumers(),
            queue_capacity: default_queue_capacity(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}
fn default_workers() -> usize {
    10
}
fn default_consumers() -> usize {
    5
}
fn default_queue_capacity() -> usize {
    64
}
fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompareConfig {
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    #[serde(default = "default_max_batch_ids")]
    pub max_batch_ids: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            max_content_length: default_max_content_length(),
            max_batch_ids: default_max_batch_ids(),
            concurrency: default_concurrency(),
            cache_capacity: default_cache_capacity(),
            page_size: default_page_size(),
        }
    }
}

fn default_max_content_length() -> usize {
    50_000
}
fn default_max_batch_ids() -> usize {
    100
}
fn default_concurrency() -> usize {
    8
}
fn default_cache_capacity() -> usize {
    10_000
}
fn default_page_size() -> u32 {
    20
}

impl CompareConfig {
    pub fn settings(&self) -> CompareSettings {
        CompareSettings {
            max_content_length: self.max_content_length,
            max_batch_ids: self.max_batch_ids,
            concurrency: self.concurrency,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

fn default_retention_secs() -> u64 {
    3600
}
fn default_reap_interval_secs() -> u64 {
    60
}

impl JobsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.ingest.batch_size == 0 {
        bail!("ingest.batch_size must be > 0");
    }
    if config.ingest.workers == 0 {
        bail!("ingest.workers must be > 0");
    }
    if config.ingest.consumers == 0 {
        bail!("ingest.consumers must be > 0");
    }
    if config.ingest.queue_capacity == 0 {
        bail!("ingest.queue_capacity must be > 0");
    }
    if config.ingest.max_file_bytes == 0 {
        bail!("ingest.max_file_bytes must be > 0");
    }

    if config.compare.max_content_length < 3 {
        bail!("compare.max_content_length must be >= 3");
    }
    if config.compare.max_batch_ids == 0 {
        bail!("compare.max_batch_ids must be > 0");
    }
    if config.compare.concurrency == 0 {
        bail!("compare.concurrency must be > 0");
    }
    if config.compare.page_size == 0 {
        bail!("compare.page_size must be > 0");
    }

    if config.jobs.reap_interval_secs == 0 {
        bail!("jobs.reap_interval_secs must be > 0");
    }
    Ok(())
}
