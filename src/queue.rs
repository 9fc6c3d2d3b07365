//! Workflow queue: durable, priority-ordered backlog of records awaiting
//! manual review.

use std::sync::Arc;

use crate::error::OrchestratorError;
use crate::state_machine::RecordStatus;
use crate::store::{PersistenceStore, QueueEntry};

/// Typed facade over the store's review-queue operations. Enforces the
/// one-live-entry-per-record invariant on top of the store's atomic claim.
#[derive(Clone)]
pub struct WorkflowQueue {
    store: Arc<dyn PersistenceStore>,
}

impl WorkflowQueue {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self { store }
    }

    /// Enqueue a record for review. A record with a live entry is not
    /// enqueued twice; resolution always clears the way for a fresh entry.
    pub async fn enqueue(&self, record_id: &str, priority: i64) -> Result<(), OrchestratorError> {
        if self.store.live_entry_exists(record_id).await? {
            tracing::debug!(record = record_id, "already queued for review, skipping");
            return Ok(());
        }
        self.store
            .enqueue_review(QueueEntry::new(record_id, priority))
            .await?;
        tracing::info!(record = record_id, priority, "queued for manual review");
        Ok(())
    }

    /// Claim the most urgent pending entry for `reviewer`, or `None` when
    /// the backlog is empty. Safe under concurrent callers.
    pub async fn dequeue(&self, reviewer: &str) -> Result<Option<QueueEntry>, OrchestratorError> {
        Ok(self.store.claim_next(reviewer).await?)
    }

    /// Resolve a record's review: drop its live entry and complete the
    /// record. Idempotent.
    pub async fn resolve(&self, record_id: &str) -> Result<(), OrchestratorError> {
        self.store.mark_resolved(record_id).await?;

        if let Some(mut record) = self.store.load_record(record_id).await?
            && record.status == RecordStatus::ManualReview
        {
            record.transition(RecordStatus::Completed)?;
            self.store.save_record(&record).await?;
            tracing::info!(record = record_id, "review resolved, record completed");
        }
        Ok(())
    }

    /// Live entries in dequeue order, for inspection.
    pub async fn pending(&self, limit: usize) -> Result<Vec<QueueEntry>, OrchestratorError> {
        Ok(self.store.pending_reviews(limit).await?)
    }
}
