//! Batch job manager: runs many state machines under a bounded worker
//! pool and keeps the job ledger consistent while they finish in any
//! order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::job::{Job, JobStatus, JobSummary};
use crate::notify::{Notifier, NotifyEvent};
use crate::queue::WorkflowQueue;
use crate::record::{ProviderFields, ProviderRecord};
use crate::retry::RetryPolicy;
use crate::routing::RoutingEngine;
use crate::stage::StageSet;
use crate::state_machine::{RecordStatus, RunControl, StateMachine};
use crate::store::PersistenceStore;

/// Batch submission shape: an optional stable identifier plus the initial
/// field values. Records without an id get a generated one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSeed {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub fields: ProviderFields,
}

impl RecordSeed {
    pub fn new(id: &str, fields: ProviderFields) -> Self {
        Self {
            id: Some(id.to_string()),
            fields,
        }
    }

    fn into_record(self) -> ProviderRecord {
        let id = self.id.unwrap_or_else(|| {
            format!("P{}", Uuid::new_v4().simple().to_string()[..8].to_uppercase())
        });
        ProviderRecord::new(id, self.fields)
    }
}

/// Per-job control handle kept in memory alongside the durable ledger.
struct JobHandle {
    control: Arc<RunControl>,
    done: watch::Receiver<JobStatus>,
}

/// Creates batch jobs, runs their records concurrently and aggregates
/// terminal statuses into job metrics.
pub struct JobManager {
    store: Arc<dyn PersistenceStore>,
    queue: WorkflowQueue,
    machine: Arc<StateMachine>,
    notifier: Arc<dyn Notifier>,
    workers: usize,
    jobs: Mutex<HashMap<Uuid, JobHandle>>,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn PersistenceStore>,
        stages: StageSet,
        notifier: Arc<dyn Notifier>,
        config: &OrchestratorConfig,
    ) -> Self {
        let queue = WorkflowQueue::new(store.clone());
        let machine = Arc::new(StateMachine::new(
            stages,
            RetryPolicy::from_config(&config.retry),
            RoutingEngine::new(config.routing.clone()),
            store.clone(),
            queue.clone(),
            notifier.clone(),
        ));
        Self {
            store,
            queue,
            machine,
            notifier,
            workers: config.pool.workers.max(1),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn queue(&self) -> &WorkflowQueue {
        &self.queue
    }

    /// Create a job for the batch and start processing in the background.
    ///
    /// Systemic problems — an empty batch, duplicate ids, a store that is
    /// unreachable at job start — fail here, before any record runs.
    pub async fn submit(&self, seeds: Vec<RecordSeed>) -> Result<Uuid, OrchestratorError> {
        if seeds.is_empty() {
            return Err(OrchestratorError::EmptyBatch);
        }

        let mut records: Vec<ProviderRecord> =
            seeds.into_iter().map(RecordSeed::into_record).collect();
        let mut seen = std::collections::HashSet::new();
        for record in &records {
            if !seen.insert(record.id.clone()) {
                return Err(OrchestratorError::DuplicateRecord(record.id.clone()));
            }
        }

        let job = Job::new(records.iter().map(|r| r.id.clone()).collect());
        let job_id = job.id;
        self.store.save_job(&job).await?;
        for record in &mut records {
            record.version = self.store.save_record(record).await?;
        }
        tracing::info!(job = %job_id, records = records.len(), "job submitted");

        let control = Arc::new(RunControl::bounded(self.workers));
        let (done_tx, done_rx) = watch::channel(JobStatus::Running);
        {
            let mut jobs = self.jobs.lock().expect("jobs lock poisoned");
            // Sweep handles whose supervisor has already closed the ledger;
            // their state lives on in the store.
            jobs.retain(|_, handle| *handle.done.borrow() == JobStatus::Running);
            jobs.insert(
                job_id,
                JobHandle {
                    control: control.clone(),
                    done: done_rx,
                },
            );
        }

        tokio::spawn(run_batch(
            job,
            records,
            self.machine.clone(),
            self.store.clone(),
            self.notifier.clone(),
            control,
            done_tx,
        ));

        Ok(job_id)
    }

    pub async fn status(&self, job_id: Uuid) -> Result<Job, OrchestratorError> {
        self.store
            .load_job(job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound(job_id))
    }

    pub async fn summary(&self, job_id: Uuid) -> Result<JobSummary, OrchestratorError> {
        Ok(JobSummary::from_job(&self.status(job_id).await?))
    }

    /// Stop scheduling further stages for the job's records. In-flight
    /// stage calls finish; their records then divert to manual review.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), OrchestratorError> {
        let jobs = self.jobs.lock().expect("jobs lock poisoned");
        let handle = jobs
            .get(&job_id)
            .ok_or(OrchestratorError::JobNotFound(job_id))?;
        handle.control.cancel();
        tracing::info!(job = %job_id, "job cancellation requested");
        Ok(())
    }

    /// Wait until the job reaches a terminal status and return its ledger
    /// entry. The job's control handle is released; later `status` and
    /// `summary` calls read from the store.
    pub async fn wait(&self, job_id: Uuid) -> Result<Job, OrchestratorError> {
        let mut done = {
            let jobs = self.jobs.lock().expect("jobs lock poisoned");
            jobs.get(&job_id)
                .ok_or(OrchestratorError::JobNotFound(job_id))?
                .done
                .clone()
        };
        done.wait_for(|status| *status != JobStatus::Running)
            .await
            .map_err(|_| OrchestratorError::JobInterrupted(job_id))?;
        // Terminal: the in-memory handle has nothing left to control.
        self.jobs.lock().expect("jobs lock poisoned").remove(&job_id);
        self.status(job_id).await
    }
}

/// Supervisor task for one job: fans records out, folds terminal statuses
/// into the metrics as they arrive and closes the ledger entry.
async fn run_batch(
    mut job: Job,
    records: Vec<ProviderRecord>,
    machine: Arc<StateMachine>,
    store: Arc<dyn PersistenceStore>,
    notifier: Arc<dyn Notifier>,
    control: Arc<RunControl>,
    done: watch::Sender<JobStatus>,
) {
    let mut set = JoinSet::new();
    for mut record in records {
        let machine = machine.clone();
        let store = store.clone();
        let control = control.clone();
        set.spawn(async move {
            match machine.run(&mut record, &control).await {
                Ok(status) => status,
                Err(err) => {
                    // Systemic per-record failure: the record is failed,
                    // the job keeps going.
                    tracing::error!(record = %record.id, error = %err, "record run failed");
                    if record.transition(RecordStatus::Failed).is_ok() {
                        let _ = store.save_record(&record).await;
                    }
                    RecordStatus::Failed
                }
            }
        });
    }

    while let Some(joined) = set.join_next().await {
        let status = match joined {
            Ok(status) => status,
            Err(err) => {
                tracing::error!(job = %job.id, error = %err, "record task panicked");
                RecordStatus::Failed
            }
        };
        job.metrics.record(status);
        // Keep the ledger consistent at every observation point.
        if let Err(err) = store.save_job(&job).await {
            tracing::error!(job = %job.id, error = %err, "failed to persist job metrics");
        }
    }

    job.status = JobStatus::Completed;
    job.completed_at = Some(Utc::now());
    if let Err(err) = store.save_job(&job).await {
        tracing::error!(job = %job.id, error = %err, "failed to persist completed job");
    }
    notifier
        .notify(&job.id.to_string(), NotifyEvent::JobCompleted)
        .await;
    tracing::info!(
        job = %job.id,
        completed = job.metrics.completed,
        manual_review = job.metrics.manual_review,
        failed = job.metrics.failed,
        "job completed"
    );
    let _ = done.send(JobStatus::Completed);
}
