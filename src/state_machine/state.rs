use std::fmt;

use serde::{Deserialize, Serialize};

/// The per-record states of the processing state machine.
///
/// Records flow PENDING → VALIDATION → ENRICHMENT → QA → ROUTING and then
/// branch into CORRECTION or MANUAL_REVIEW before reaching COMPLETED.
/// FAILED is reserved for systemic errors; a stage failure on its own
/// never fails a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Validation,
    Enrichment,
    Qa,
    Routing,
    Correction,
    ManualReview,
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordStatus::Completed | RecordStatus::Failed)
    }

    /// The legal-transition table. Every status change a record ever makes
    /// is checked against this.
    pub fn can_transition(self, to: RecordStatus) -> bool {
        use RecordStatus::*;
        match (self, to) {
            // Terminal states never transition.
            (Completed | Failed, _) => false,
            // Systemic failure can strike any live record.
            (_, Failed) => true,
            (Pending, Validation) => true,
            (Validation, Enrichment) => true,
            (Enrichment, Qa) => true,
            (Qa, Routing) => true,
            // Exhausted retries, invalid input or job cancellation divert
            // a live record to manual review.
            (Pending | Validation | Enrichment | Qa, ManualReview) => true,
            (Routing, Correction | ManualReview | Completed) => true,
            (Correction, Completed | ManualReview) => true,
            // A reviewer resolving the queue entry completes the record.
            (ManualReview, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Pending => write!(f, "PENDING"),
            RecordStatus::Validation => write!(f, "VALIDATION"),
            RecordStatus::Enrichment => write!(f, "ENRICHMENT"),
            RecordStatus::Qa => write!(f, "QA"),
            RecordStatus::Routing => write!(f, "ROUTING"),
            RecordStatus::Correction => write!(f, "CORRECTION"),
            RecordStatus::ManualReview => write!(f, "MANUAL_REVIEW"),
            RecordStatus::Completed => write!(f, "COMPLETED"),
            RecordStatus::Failed => write!(f, "FAILED"),
        }
    }
}
