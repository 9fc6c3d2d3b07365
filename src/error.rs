use thiserror::Error;
use uuid::Uuid;

use crate::stage::StageKind;
use crate::state_machine::RecordStatus;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job {0} terminated without reporting a status")]
    JobInterrupted(Uuid),

    #[error("Empty batch: a job needs at least one record")]
    EmptyBatch,

    #[error("Duplicate record id in batch: {0}")]
    DuplicateRecord(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: RecordStatus,
        to: RecordStatus,
    },

    #[error("Fatal failure in {stage} stage: {message}")]
    StageFatal { stage: StageKind, message: String },

    #[error("Worker pool closed")]
    PoolClosed,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors surfaced by the persistence boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version conflict for record {id}: saved with {expected}, store holds {found}")]
    VersionConflict {
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Classification used by the retry path. Only optimistic version
    /// conflicts are worth retrying; everything else is systemic.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            StoreError::VersionConflict { .. } => FailureKind::Transient,
            _ => FailureKind::Fatal,
        }
    }
}

/// Classifies a stage failure for retry and routing decisions.
///
/// Transient failures are eligible for the retry policy; invalid input is
/// never retried and diverts the record straight to manual review; fatal
/// failures abort the whole record run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Infrastructure failure (network timeout, rate limit, version conflict).
    Transient,
    /// The stage reported malformed input it cannot process.
    Invalid,
    /// Systemic failure that no amount of retrying will fix.
    Fatal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Invalid => write!(f, "invalid"),
            FailureKind::Fatal => write!(f, "fatal"),
        }
    }
}
