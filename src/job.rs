//! Batch job ledger types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::RecordStatus;

/// Lifecycle status of a batch job. A job fails only on a systemic error;
/// individual record outcomes never fail the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Counts of terminal record statuses, monotonic until job completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub completed: u64,
    pub manual_review: u64,
    pub failed: u64,
}

impl JobMetrics {
    /// Count one record's terminal status. Exactly one call per record.
    pub fn record(&mut self, status: RecordStatus) {
        match status {
            RecordStatus::Completed => self.completed += 1,
            RecordStatus::ManualReview => self.manual_review += 1,
            RecordStatus::Failed => self.failed += 1,
            other => {
                // Non-terminal statuses indicate a bug in the caller.
                tracing::warn!(status = %other, "ignoring non-terminal status in job metrics");
            }
        }
    }

    pub fn total(&self) -> u64 {
        self.completed + self.manual_review + self.failed
    }
}

/// One batch job: the fixed record set plus its running metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub record_ids: Vec<String>,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metrics: JobMetrics,
    /// Error classification string, present on failed jobs.
    pub error: Option<String>,
}

impl Job {
    pub fn new(record_ids: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            record_ids,
            status: JobStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            metrics: JobMetrics::default(),
            error: None,
        }
    }

    pub fn total_records(&self) -> usize {
        self.record_ids.len()
    }
}

/// Reporting view over a finished (or running) job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total_records: usize,
    pub completed: u64,
    pub manual_review: u64,
    pub failed: u64,
    pub auto_resolve_rate: f64,
    pub review_rate: f64,
    pub duration_ms: i64,
}

impl JobSummary {
    pub fn from_job(job: &Job) -> Self {
        let total = job.total_records().max(1) as f64;
        let end = job.completed_at.unwrap_or_else(Utc::now);
        Self {
            job_id: job.id,
            status: job.status,
            total_records: job.total_records(),
            completed: job.metrics.completed,
            manual_review: job.metrics.manual_review,
            failed: job.metrics.failed,
            auto_resolve_rate: job.metrics.completed as f64 / total * 100.0,
            review_rate: job.metrics.manual_review as f64 / total * 100.0,
            duration_ms: (end - job.started_at).num_milliseconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_is_running() {
        let job = Job::new(vec!["P001".into(), "P002".into()]);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.total_records(), 2);
        assert!(job.completed_at.is_none());
        assert_eq!(job.metrics, JobMetrics::default());
    }

    #[test]
    fn metrics_count_terminal_statuses() {
        let mut metrics = JobMetrics::default();
        metrics.record(RecordStatus::Completed);
        metrics.record(RecordStatus::Completed);
        metrics.record(RecordStatus::ManualReview);
        metrics.record(RecordStatus::Failed);
        assert_eq!(metrics.completed, 2);
        assert_eq!(metrics.manual_review, 1);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.total(), 4);
    }

    #[test]
    fn metrics_ignore_non_terminal_statuses() {
        let mut metrics = JobMetrics::default();
        metrics.record(RecordStatus::Validation);
        assert_eq!(metrics.total(), 0);
    }

    #[test]
    fn summary_rates() {
        let mut job = Job::new(vec!["a".into(), "b".into(), "c".into(), "d".into()]);
        job.metrics.completed = 3;
        job.metrics.manual_review = 1;
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());

        let summary = JobSummary::from_job(&job);
        assert_eq!(summary.total_records, 4);
        assert!((summary.auto_resolve_rate - 75.0).abs() < 1e-9);
        assert!((summary.review_rate - 25.0).abs() < 1e-9);
    }

    #[test]
    fn job_serialization_roundtrip() {
        let job = Job::new(vec!["P001".into()]);
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.status, JobStatus::Running);
    }
}
