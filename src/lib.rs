//! Provflow — healthcare provider data quality orchestrator.
//!
//! Drives provider records through a fixed sequence of quality stages
//! (validation, enrichment, quality assessment, correction) and decides,
//! per record, whether the outcome can be applied automatically or must
//! wait for a human reviewer.
//!
//! The concrete stage logic lives behind the [`stage::StageExecutor`]
//! capability trait; this crate owns only the orchestration core: the
//! per-record state machine, the retry policy, the routing engine, the
//! batch job ledger and the manual-review workflow queue.

pub mod cli;
pub mod config;
pub mod error;
pub mod job;
pub mod notify;
pub mod orchestrator;
pub mod queue;
pub mod record;
pub mod retry;
pub mod routing;
pub mod stage;
pub mod state_machine;
pub mod store;
pub mod ui;

pub use config::OrchestratorConfig;
pub use error::{FailureKind, OrchestratorError};
pub use job::{Job, JobStatus, JobSummary};
pub use orchestrator::{JobManager, RecordSeed};
pub use queue::WorkflowQueue;
pub use record::{ProviderFields, ProviderRecord};
pub use routing::{RoutingAction, RoutingDecision, RoutingEngine};
pub use stage::{StageExecutor, StageKind, StageResult, StageSet};
pub use state_machine::{RecordStatus, StateMachine};
pub use store::{MemoryStore, PersistenceStore};
