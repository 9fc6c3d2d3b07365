//! Persistence boundary consumed by the job manager and workflow queue.
//!
//! The production deployment backs this with a real database; the crate
//! ships [`MemoryStore`], a reference implementation that keeps every
//! operation atomic behind a single async mutex. Schema contract only —
//! storage engine internals are out of scope.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::Job;
use crate::record::ProviderRecord;

/// Review lifecycle of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Assigned,
    Resolved,
}

/// One manual-review backlog entry. Entries are immutable from the
/// caller's perspective: resolution removes them from the live queue and
/// retains them in an audit log; re-enqueuing a record creates a fresh
/// entry rather than updating the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub record_id: String,
    /// Higher is more urgent. Derived from the QA risk score.
    pub priority: i64,
    pub enqueued_at: DateTime<Utc>,
    pub review_status: ReviewStatus,
    pub assigned_to: Option<String>,
    /// Store-assigned insertion sequence; breaks ordering ties after
    /// priority and enqueue time.
    pub seq: u64,
}

impl QueueEntry {
    pub fn new(record_id: &str, priority: i64) -> Self {
        Self {
            record_id: record_id.to_string(),
            priority,
            enqueued_at: Utc::now(),
            review_status: ReviewStatus::Pending,
            assigned_to: None,
            seq: 0,
        }
    }
}

/// Durable storage interface. All operations are atomic with respect to
/// concurrent callers.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Persist a record, enforcing an optimistic version check: the saved
    /// record's `version` must match what the store holds. Returns the new
    /// version.
    async fn save_record(&self, record: &ProviderRecord) -> Result<u64, StoreError>;

    async fn load_record(&self, id: &str) -> Result<Option<ProviderRecord>, StoreError>;

    async fn save_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn load_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    async fn enqueue_review(&self, entry: QueueEntry) -> Result<(), StoreError>;

    /// Atomically claim the most urgent pending entry for `reviewer`,
    /// flipping it from pending to assigned. No two callers ever receive
    /// the same entry.
    async fn claim_next(&self, reviewer: &str) -> Result<Option<QueueEntry>, StoreError>;

    /// Remove the live entry for a record, keeping it in the audit log.
    /// Idempotent: resolving an already-resolved record is a no-op.
    async fn mark_resolved(&self, record_id: &str) -> Result<(), StoreError>;

    /// Live (pending or assigned) entries in dequeue order.
    async fn pending_reviews(&self, limit: usize) -> Result<Vec<QueueEntry>, StoreError>;

    /// Whether a live entry exists for the record.
    async fn live_entry_exists(&self, record_id: &str) -> Result<bool, StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    records: HashMap<String, ProviderRecord>,
    jobs: HashMap<Uuid, Job>,
    queue: Vec<QueueEntry>,
    resolved: Vec<QueueEntry>,
    next_seq: u64,
}

/// In-memory store. A single mutex over all state makes every trait
/// operation atomic, which is what the claim semantics require.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolved entries, oldest first. Audit use only.
    pub async fn resolved_entries(&self) -> Vec<QueueEntry> {
        self.inner.lock().await.resolved.clone()
    }
}

/// Dequeue order: priority descending, then enqueue time ascending, then
/// insertion sequence.
fn more_urgent(a: &QueueEntry, b: &QueueEntry) -> bool {
    (a.priority, std::cmp::Reverse(a.enqueued_at), std::cmp::Reverse(a.seq))
        > (b.priority, std::cmp::Reverse(b.enqueued_at), std::cmp::Reverse(b.seq))
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn save_record(&self, record: &ProviderRecord) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.records.get(&record.id)
            && existing.version != record.version
        {
            return Err(StoreError::VersionConflict {
                id: record.id.clone(),
                expected: record.version,
                found: existing.version,
            });
        }
        let mut stored = record.clone();
        stored.version = record.version + 1;
        let version = stored.version;
        inner.records.insert(record.id.clone(), stored);
        Ok(version)
    }

    async fn load_record(&self, id: &str) -> Result<Option<ProviderRecord>, StoreError> {
        Ok(self.inner.lock().await.records.get(id).cloned())
    }

    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.lock().await.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn load_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn enqueue_review(&self, mut entry: QueueEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_seq += 1;
        entry.seq = inner.next_seq;
        inner.queue.push(entry);
        Ok(())
    }

    async fn claim_next(&self, reviewer: &str) -> Result<Option<QueueEntry>, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut best: Option<usize> = None;
        for (i, entry) in inner.queue.iter().enumerate() {
            if entry.review_status != ReviewStatus::Pending {
                continue;
            }
            match best {
                None => best = Some(i),
                Some(b) if more_urgent(entry, &inner.queue[b]) => best = Some(i),
                Some(_) => {}
            }
        }
        let Some(i) = best else {
            return Ok(None);
        };
        let entry = &mut inner.queue[i];
        entry.review_status = ReviewStatus::Assigned;
        entry.assigned_to = Some(reviewer.to_string());
        Ok(Some(entry.clone()))
    }

    async fn mark_resolved(&self, record_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let queue = std::mem::take(&mut inner.queue);
        let (resolved, kept): (Vec<_>, Vec<_>) =
            queue.into_iter().partition(|e| e.record_id == record_id);
        inner.queue = kept;
        for mut entry in resolved {
            entry.review_status = ReviewStatus::Resolved;
            inner.resolved.push(entry);
        }
        Ok(())
    }

    async fn pending_reviews(&self, limit: usize) -> Result<Vec<QueueEntry>, StoreError> {
        let inner = self.inner.lock().await;
        let mut live = inner.queue.clone();
        live.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.enqueued_at.cmp(&b.enqueued_at))
                .then(a.seq.cmp(&b.seq))
        });
        live.truncate(limit);
        Ok(live)
    }

    async fn live_entry_exists(&self, record_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .queue
            .iter()
            .any(|e| e.record_id == record_id))
    }
}
