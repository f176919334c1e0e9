//! Scratch area for uploaded bytes awaiting ingestion.
//!
//! Each batch gets `<root>/batch_<job_id>/`, and each file inside it is named
//! `<uuid>_<original name>` so two uploads with the same name never collide.
//! Only the last path component of the original name is kept.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// A file as received from a caller.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// A file written to the staging area, as carried in a batch message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFile {
    pub staged_path: PathBuf,
    pub original_name: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

fn base_name(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn batch_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("batch_{}", job_id))
    }

    /// Write every file of a batch in parallel. Fails as a whole if the
    /// directory or any file cannot be written.
    pub async fn stage(&self, job_id: &str, files: &[UploadFile]) -> Result<Vec<StagedFile>> {
        let dir = self.batch_dir(job_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create staging directory {}", dir.display()))?;

        let writes = files.iter().map(|file| {
            let path = dir.join(format!("{}_{}", Uuid::new_v4(), base_name(&file.name)));
            async move {
                tokio::fs::write(&path, &file.content)
                    .await
                    .with_context(|| format!("Failed to stage {}", path.display()))?;
                Ok::<_, anyhow::Error>(StagedFile {
                    staged_path: path,
                    original_name: file.name.clone(),
                    size: file.size(),
                })
            }
        });

        let staged = try_join_all(writes).await?;
        debug!(job_id, files = staged.len(), dir = %dir.display(), "batch staged");
        Ok(staged)
    }

    /// Remove a batch directory and whatever is left in it. Missing
    /// directories are fine.
    pub async fn cleanup(&self, job_id: &str) {
        let dir = self.batch_dir(job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(job_id, "staging directory removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(job_id, dir = %dir.display(), error = %e, "failed to remove staging directory"),
        }
    }
}

/// Delete one staged file once it has been read.
pub async fn discard(file: &StagedFile) {
    if let Err(e) = tokio::fs::remove_file(&file.staged_path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %file.staged_path.display(), error = %e, "failed to delete staged file");
        }
    }
}
