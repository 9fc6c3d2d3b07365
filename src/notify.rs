//! Outbound notification boundary.
//!
//! Notifications are fire-and-forget: the interface is infallible from
//! the core's point of view, so a broken notifier can never change a
//! routing outcome. Implementations swallow and log their own failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Events the core signals to the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    AutoResolved,
    ManualReviewRequired,
    JobCompleted,
}

impl std::fmt::Display for NotifyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyEvent::AutoResolved => write!(f, "auto_resolved"),
            NotifyEvent::ManualReviewRequired => write!(f, "manual_review_required"),
            NotifyEvent::JobCompleted => write!(f, "job_completed"),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject_id: &str, event: NotifyEvent);
}

/// Default notifier: emits a tracing event and nothing else.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject_id: &str, event: NotifyEvent) {
        tracing::info!(subject = subject_id, event = %event, "notification");
    }
}

/// Silent notifier for tests.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _subject_id: &str, _event: NotifyEvent) {}
}
