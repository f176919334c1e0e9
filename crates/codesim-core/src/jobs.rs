//! Ingestion job tracking.
//!
//! A [`JobTracker`] is a concurrent map from job id to [`IngestionJob`]. The
//! ingestion pipeline is the only writer for a given job; any number of
//! callers may read. Progress counters only move forward, and a job that has
//! reached a terminal state ignores further updates.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::language::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one ingestion batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub job_id: String,
    pub language: Language,
    pub status: JobStatus,
    pub total_files: u64,
    pub processed_files: u64,
    pub failed_files: u64,
    pub error_message: Option<String>,
    pub start_time: DateTime<Utc>,
    /// Set once the job reaches `COMPLETED` or `FAILED`.
    pub end_time: Option<DateTime<Utc>>,
}

impl IngestionJob {
    /// Percentage of files handled so far, `(processed + failed) / total * 100`.
    pub fn progress(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        (self.processed_files + self.failed_files) as f64 / self.total_files as f64 * 100.0
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }
}

#[derive(Default)]
pub struct JobTracker {
    jobs: RwLock<HashMap<String, IngestionJob>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new `QUEUED` job. An existing job with the same id is
    /// replaced.
    pub fn create_job(&self, job_id: &str, language: Language, total_files: u64) -> IngestionJob {
        let job = IngestionJob {
            job_id: job_id.to_string(),
            language,
            status: JobStatus::Queued,
            total_files,
            processed_files: 0,
            failed_files: 0,
            error_message: None,
            start_time: Utc::now(),
            end_time: None,
        };
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_string(), job.clone());
        debug!(job_id, total_files, "job created");
        job
    }

    /// Move a queued job to `PROCESSING`. No-op for unknown or terminal jobs.
    pub fn start(&self, job_id: &str) {
        self.with_job(job_id, |job| {
            if job.status == JobStatus::Queued {
                job.status = JobStatus::Processing;
            }
        });
    }

    /// Record cumulative counts. Counts never decrease; the job completes
    /// once `processed + failed` reaches `total`.
    pub fn update_progress(&self, job_id: &str, processed: u64, failed: u64) {
        self.with_job(job_id, |job| {
            job.processed_files = job.processed_files.max(processed);
            job.failed_files = job.failed_files.max(failed);
            if job.status == JobStatus::Queued {
                job.status = JobStatus::Processing;
            }
            if job.processed_files + job.failed_files >= job.total_files {
                job.finish(JobStatus::Completed);
                info!(
                    job_id,
                    processed = job.processed_files,
                    failed = job.failed_files,
                    "job completed"
                );
            }
        });
    }

    pub fn mark_failed(&self, job_id: &str, message: impl Into<String>) {
        let message = message.into();
        self.with_job(job_id, |job| {
            warn!(job_id, error = %message, "job failed");
            job.error_message = Some(message.clone());
            job.finish(JobStatus::Failed);
        });
    }

    pub fn get(&self, job_id: &str) -> Option<IngestionJob> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop terminal jobs that ended more than `retention` ago.
    pub fn reap(&self, retention: Duration) -> usize {
        self.reap_at(Utc::now(), retention)
    }

    /// [`reap`](Self::reap) against an explicit clock.
    pub fn reap_at(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, job| match job.end_time {
            Some(end) => match (now - end).to_std() {
                Ok(age) => age <= retention,
                // ended in the future relative to `now`
                Err(_) => true,
            },
            None => true,
        });
        let removed = before - jobs.len();
        if removed > 0 {
            debug!(removed, "reaped finished jobs");
        }
        removed
    }

    fn with_job(&self, job_id: &str, f: impl FnOnce(&mut IngestionJob)) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        match jobs.get_mut(job_id) {
            Some(job) if job.is_terminal() => {
                debug!(job_id, status = %job.status, "ignoring update to finished job");
            }
            Some(job) => f(job),
            None => warn!(job_id, "update for unknown job"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_and_progress() {
        let tracker = JobTracker::new();
        let job = tracker.create_job("j1", Language::Java, 4);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress(), 0.0);

        tracker.start("j1");
        assert_eq!(tracker.get("j1").unwrap().status, JobStatus::Processing);

        tracker.update_progress("j1", 1, 1);
        let job = tracker.get("j1").unwrap();
        assert_eq!(job.progress(), 50.0);
        assert!(job.end_time.is_none());

        tracker.update_progress("j1", 3, 1);
        let job = tracker.get("j1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress(), 100.0);
        assert!(job.end_time.is_some());
    }

    #[test]
    fn test_progress_never_decreases() {
        let tracker = JobTracker::new();
        tracker.create_job("j", Language::Go, 10);
        tracker.update_progress("j", 5, 2);
        tracker.update_progress("j", 3, 1);
        let job = tracker.get("j").unwrap();
        assert_eq!(job.processed_files, 5);
        assert_eq!(job.failed_files, 2);
    }

    #[test]
    fn test_terminal_jobs_ignore_updates() {
        let tracker = JobTracker::new();
        tracker.create_job("j", Language::Ruby, 3);
        tracker.mark_failed("j", "staging directory unusable");
        tracker.update_progress("j", 3, 0);
        let job = tracker.get("j").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.processed_files, 0);
        assert_eq!(job.error_message.as_deref(), Some("staging directory unusable"));
    }

    #[test]
    fn test_reap_drops_only_old_terminal_jobs() {
        let tracker = JobTracker::new();
        tracker.create_job("done", Language::Java, 1);
        tracker.update_progress("done", 1, 0);
        tracker.create_job("running", Language::Java, 5);

        let retention = Duration::from_secs(60);
        assert_eq!(tracker.reap_at(Utc::now(), retention), 0);

        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(tracker.reap_at(later, retention), 1);
        assert!(tracker.get("done").is_none());
        assert!(tracker.get("running").is_some());
    }

    #[test]
    fn test_status_serializes_upper_case() {
        assert_eq!(JobStatus::Processing.to_string(), "PROCESSING");
        assert!(JobStatus::Completed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }
}
