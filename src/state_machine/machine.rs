use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::sleep;

use crate::error::{FailureKind, OrchestratorError, StoreError};
use crate::notify::{Notifier, NotifyEvent};
use crate::queue::WorkflowQueue;
use crate::record::ProviderRecord;
use crate::retry::RetryPolicy;
use crate::routing::{RoutingAction, RoutingEngine};
use crate::stage::{StageKind, StageOutcome, StageResult, StageSet};
use crate::state_machine::RecordStatus;
use crate::store::PersistenceStore;

/// Queue priority when no QA risk score is available (exhausted or
/// cancelled records).
const DEFAULT_REVIEW_PRIORITY: i64 = 50;

fn review_priority(risk: f64) -> i64 {
    (risk * 100.0).round() as i64
}

/// Shared per-job controls: the bounded worker pool and the cooperative
/// cancellation flag.
///
/// Permits bound concurrent stage invocations, not records: a record
/// holds a permit only while a stage call is in flight, so backoff waits
/// never occupy a worker slot.
pub struct RunControl {
    workers: Semaphore,
    cancelled: AtomicBool,
}

impl RunControl {
    pub fn bounded(workers: usize) -> Self {
        Self {
            workers: Semaphore::new(workers),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn unbounded() -> Self {
        Self::bounded(Semaphore::MAX_PERMITS)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn checkout(&self) -> Result<SemaphorePermit<'_>, OrchestratorError> {
        self.workers
            .acquire()
            .await
            .map_err(|_| OrchestratorError::PoolClosed)
    }
}

/// Outcome of driving one stage to completion, retries included.
enum StageRun {
    /// The stage eventually succeeded.
    Completed(StageResult),
    /// Retries exhausted or input invalid; the record must go to review
    /// carrying this red flag.
    Diverted(String),
}

/// Drives one provider record through the ordered stages, applying the
/// retry policy and the routing engine, and ending in a terminal status.
///
/// Stage-level failures never escape `run` as errors; they always resolve
/// into a record status. Only systemic failures surface as `Err`.
pub struct StateMachine {
    stages: StageSet,
    retry: RetryPolicy,
    routing: RoutingEngine,
    store: Arc<dyn PersistenceStore>,
    queue: WorkflowQueue,
    notifier: Arc<dyn Notifier>,
}

impl StateMachine {
    pub fn new(
        stages: StageSet,
        retry: RetryPolicy,
        routing: RoutingEngine,
        store: Arc<dyn PersistenceStore>,
        queue: WorkflowQueue,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            stages,
            retry,
            routing,
            store,
            queue,
            notifier,
        }
    }

    /// Run the record to a terminal per-record outcome: `Completed`,
    /// `ManualReview` (enqueued) or, via `Err`, the caller-side `Failed`.
    pub async fn run(
        &self,
        record: &mut ProviderRecord,
        control: &RunControl,
    ) -> Result<RecordStatus, OrchestratorError> {
        let mut results: Vec<StageResult> = Vec::new();

        for stage in StageKind::PIPELINE {
            // Cancellation is cooperative: checked between stages, never
            // mid-call.
            if control.is_cancelled() {
                return self
                    .divert(record, "job_cancelled", DEFAULT_REVIEW_PRIORITY)
                    .await;
            }

            record.transition(stage.status())?;
            self.persist(record).await?;

            match self.run_stage(stage, record, control).await? {
                StageRun::Completed(result) => {
                    record.fold(&result);
                    self.persist(record).await?;
                    results.push(result);
                }
                StageRun::Diverted(flag) => {
                    return self.divert(record, &flag, DEFAULT_REVIEW_PRIORITY).await;
                }
            }
        }

        record.transition(RecordStatus::Routing)?;
        let decision = self.routing.decide_results(&results);
        tracing::debug!(
            record = %record.id,
            action = %decision.action,
            confidence = decision.confidence_score,
            risk = decision.risk_score,
            "routing decision"
        );
        record.routing = Some(decision.clone());
        self.persist(record).await?;

        match decision.action {
            RoutingAction::AutoResolve => {
                if control.is_cancelled() {
                    return self
                        .divert(record, "job_cancelled", DEFAULT_REVIEW_PRIORITY)
                        .await;
                }
                record.transition(RecordStatus::Correction)?;
                self.persist(record).await?;

                match self.run_stage(StageKind::Correction, record, control).await? {
                    StageRun::Completed(result) => {
                        record.fold(&result);
                        record.transition(RecordStatus::Completed)?;
                        self.persist(record).await?;
                        self.notifier
                            .notify(&record.id, NotifyEvent::AutoResolved)
                            .await;
                        Ok(RecordStatus::Completed)
                    }
                    // Correction failures are never silently dropped.
                    StageRun::Diverted(flag) => {
                        self.divert(record, &flag, review_priority(decision.risk_score))
                            .await
                    }
                }
            }
            RoutingAction::Reject => {
                // Conservative default: no field mutation on reject.
                record.red_flags.insert("rejected".to_string());
                record.transition(RecordStatus::Completed)?;
                self.persist(record).await?;
                Ok(RecordStatus::Completed)
            }
            RoutingAction::ManualReview => {
                let priority = review_priority(decision.risk_score);
                self.divert_without_flag(record, priority).await
            }
        }
    }

    /// Run one stage under the retry policy. A worker permit is held only
    /// for the duration of each attempt; backoff happens without one.
    async fn run_stage(
        &self,
        stage: StageKind,
        record: &mut ProviderRecord,
        control: &RunControl,
    ) -> Result<StageRun, OrchestratorError> {
        let executor = self.stages.get(stage);
        loop {
            let attempt = record.begin_attempt(stage);
            tracing::debug!(record = %record.id, stage = %stage, attempt, "stage attempt");

            let result = {
                let _permit = control.checkout().await?;
                executor.execute(record).await
            };

            let failure = match &result.outcome {
                StageOutcome::Success { .. } => return Ok(StageRun::Completed(result)),
                StageOutcome::Failure(failure) => failure.clone(),
            };

            match failure.kind {
                FailureKind::Fatal => {
                    return Err(OrchestratorError::StageFatal {
                        stage,
                        message: failure.message,
                    });
                }
                FailureKind::Invalid => {
                    tracing::warn!(
                        record = %record.id,
                        stage = %stage,
                        reason = %failure.message,
                        "invalid input, diverting to review"
                    );
                    return Ok(StageRun::Diverted(format!(
                        "invalid_input:{}",
                        stage.as_lower()
                    )));
                }
                FailureKind::Transient => match self.retry.next_delay(attempt, failure.kind) {
                    Some(delay) => {
                        tracing::warn!(
                            record = %record.id,
                            stage = %stage,
                            attempt,
                            max = self.retry.max_attempts(),
                            delay_ms = delay.as_millis() as u64,
                            reason = %failure.message,
                            "retrying stage"
                        );
                        sleep(delay).await;
                    }
                    None => {
                        tracing::warn!(
                            record = %record.id,
                            stage = %stage,
                            attempt,
                            "retries exhausted, diverting to review"
                        );
                        return Ok(StageRun::Diverted(format!("stage_exhausted:{stage}")));
                    }
                },
            }
        }
    }

    async fn divert(
        &self,
        record: &mut ProviderRecord,
        flag: &str,
        priority: i64,
    ) -> Result<RecordStatus, OrchestratorError> {
        record.red_flags.insert(flag.to_string());
        self.divert_without_flag(record, priority).await
    }

    async fn divert_without_flag(
        &self,
        record: &mut ProviderRecord,
        priority: i64,
    ) -> Result<RecordStatus, OrchestratorError> {
        record.transition(RecordStatus::ManualReview)?;
        self.persist(record).await?;
        self.queue.enqueue(&record.id, priority).await?;
        self.notifier
            .notify(&record.id, NotifyEvent::ManualReviewRequired)
            .await;
        Ok(RecordStatus::ManualReview)
    }

    /// Persist the record, absorbing optimistic version conflicts through
    /// the same retry path as stage failures.
    async fn persist(&self, record: &mut ProviderRecord) -> Result<(), OrchestratorError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.store.save_record(record).await {
                Ok(version) => {
                    record.version = version;
                    return Ok(());
                }
                Err(err) => match self.retry.next_delay(attempt, err.failure_kind()) {
                    Some(delay) => {
                        if let StoreError::VersionConflict { found, .. } = &err {
                            record.version = *found;
                        }
                        tracing::warn!(record = %record.id, error = %err, "retrying record save");
                        sleep(delay).await;
                    }
                    None => return Err(err.into()),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::notify::NoopNotifier;
    use crate::store::MemoryStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed script of results, then succeeds forever.
    struct ScriptedStage {
        kind: StageKind,
        script: Mutex<VecDeque<StageResult>>,
    }

    impl ScriptedStage {
        fn new(kind: StageKind, script: Vec<StageResult>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                script: Mutex::new(script.into()),
            })
        }

        fn ok(kind: StageKind) -> Arc<Self> {
            Self::new(kind, Vec::new())
        }
    }

    #[async_trait::async_trait]
    impl crate::stage::StageExecutor for ScriptedStage {
        fn kind(&self) -> StageKind {
            self.kind
        }

        async fn execute(&self, _record: &ProviderRecord) -> StageResult {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| StageResult::success(self.kind))
        }
    }

    fn machine_over(stages: StageSet) -> (StateMachine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let machine = StateMachine::new(
            stages,
            RetryPolicy::default(),
            RoutingEngine::default(),
            store.clone(),
            WorkflowQueue::new(store.clone()),
            Arc::new(NoopNotifier),
        );
        (machine, store)
    }

    fn record() -> ProviderRecord {
        let mut fields = crate::record::ProviderFields::default();
        fields.name = Some("Dr. Smith".into());
        fields.npi = Some("1234567890".into());
        ProviderRecord::new("P001".into(), fields)
    }

    fn scoring_pipeline(qa: Arc<ScriptedStage>) -> StageSet {
        StageSet::new(
            ScriptedStage::new(
                StageKind::Validation,
                vec![StageResult::success(StageKind::Validation).with_confidence(0.9)],
            ),
            ScriptedStage::new(
                StageKind::Enrichment,
                vec![StageResult::success(StageKind::Enrichment).with_confidence(0.9)],
            ),
            qa,
            ScriptedStage::ok(StageKind::Correction),
        )
    }

    #[tokio::test]
    async fn auto_resolve_happy_path() {
        let qa = ScriptedStage::new(
            StageKind::Qa,
            vec![
                StageResult::success(StageKind::Qa)
                    .with_confidence(0.92)
                    .with_risk(0.1),
            ],
        );
        let (machine, store) = machine_over(scoring_pipeline(qa));
        let mut rec = record();

        let status = machine.run(&mut rec, &RunControl::unbounded()).await.unwrap();

        assert_eq!(status, RecordStatus::Completed);
        assert_eq!(rec.status, RecordStatus::Completed);
        let decision = rec.routing.as_ref().unwrap();
        assert_eq!(decision.action, RoutingAction::AutoResolve);

        // Status path: no skipped or reversed states.
        let path: Vec<String> = rec.snapshots.iter().map(|s| s.stage.clone()).collect();
        assert_eq!(
            path,
            vec![
                "VALIDATION",
                "VALIDATION",
                "ENRICHMENT",
                "ENRICHMENT",
                "QA",
                "QA",
                "ROUTING",
                "CORRECTION",
                "CORRECTION",
                "COMPLETED",
            ]
        );
        assert!(store.pending_reviews(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reject_completes_without_field_changes() {
        let qa = ScriptedStage::new(
            StageKind::Qa,
            vec![
                StageResult::success(StageKind::Qa)
                    .with_confidence(0.9)
                    .with_risk(0.6)
                    .with_red_flag("inactive_license"),
            ],
        );
        let (machine, store) = machine_over(scoring_pipeline(qa));
        let mut rec = record();
        let fields_before = rec.fields.clone();

        let status = machine.run(&mut rec, &RunControl::unbounded()).await.unwrap();

        assert_eq!(status, RecordStatus::Completed);
        assert_eq!(rec.routing.as_ref().unwrap().action, RoutingAction::Reject);
        assert!(rec.red_flags.contains("rejected"));
        assert!(rec.red_flags.contains("inactive_license"));
        assert_eq!(rec.fields, fields_before);
        // Correction never ran.
        assert_eq!(rec.attempts_for(StageKind::Correction), 0);
        assert!(store.pending_reviews(10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_exhaustion_diverts_to_review() {
        let timeout = || {
            StageResult::failure(StageKind::Validation, FailureKind::Transient, "timeout")
        };
        let stages = StageSet::new(
            ScriptedStage::new(StageKind::Validation, vec![timeout(), timeout(), timeout()]),
            ScriptedStage::ok(StageKind::Enrichment),
            ScriptedStage::ok(StageKind::Qa),
            ScriptedStage::ok(StageKind::Correction),
        );
        let (machine, store) = machine_over(stages);
        let mut rec = record();

        let started = tokio::time::Instant::now();
        let status = machine.run(&mut rec, &RunControl::unbounded()).await.unwrap();

        assert_eq!(status, RecordStatus::ManualReview);
        assert!(rec.red_flags.contains("stage_exhausted:VALIDATION"));
        assert_eq!(rec.attempts_for(StageKind::Validation), 3);
        // Backoff was exactly 1s + 2s on the paused clock.
        assert_eq!(started.elapsed(), std::time::Duration::from_secs(3));

        let pending = store.pending_reviews(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record_id, "P001");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers_on_retry() {
        let stages = StageSet::new(
            ScriptedStage::new(
                StageKind::Validation,
                vec![
                    StageResult::failure(StageKind::Validation, FailureKind::Transient, "timeout"),
                    StageResult::success(StageKind::Validation).with_confidence(0.9),
                ],
            ),
            ScriptedStage::ok(StageKind::Enrichment),
            ScriptedStage::new(
                StageKind::Qa,
                vec![
                    StageResult::success(StageKind::Qa)
                        .with_confidence(0.9)
                        .with_risk(0.0),
                ],
            ),
            ScriptedStage::ok(StageKind::Correction),
        );
        let (machine, _store) = machine_over(stages);
        let mut rec = record();

        let status = machine.run(&mut rec, &RunControl::unbounded()).await.unwrap();
        assert_eq!(status, RecordStatus::Completed);
        assert_eq!(rec.attempts_for(StageKind::Validation), 2);
    }

    #[tokio::test]
    async fn invalid_input_diverts_without_retry() {
        let stages = StageSet::new(
            ScriptedStage::new(
                StageKind::Validation,
                vec![StageResult::failure(
                    StageKind::Validation,
                    FailureKind::Invalid,
                    "garbled row",
                )],
            ),
            ScriptedStage::ok(StageKind::Enrichment),
            ScriptedStage::ok(StageKind::Qa),
            ScriptedStage::ok(StageKind::Correction),
        );
        let (machine, _store) = machine_over(stages);
        let mut rec = record();

        let status = machine.run(&mut rec, &RunControl::unbounded()).await.unwrap();
        assert_eq!(status, RecordStatus::ManualReview);
        assert!(rec.red_flags.contains("invalid_input:validation"));
        assert_eq!(rec.attempts_for(StageKind::Validation), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn correction_failure_is_never_dropped() {
        let fail = || {
            StageResult::failure(StageKind::Correction, FailureKind::Transient, "api down")
        };
        let qa = ScriptedStage::new(
            StageKind::Qa,
            vec![
                StageResult::success(StageKind::Qa)
                    .with_confidence(0.95)
                    .with_risk(0.05),
            ],
        );
        let stages = StageSet::new(
            ScriptedStage::ok(StageKind::Validation),
            ScriptedStage::ok(StageKind::Enrichment),
            qa,
            ScriptedStage::new(StageKind::Correction, vec![fail(), fail(), fail()]),
        );
        let (machine, store) = machine_over(stages);
        let mut rec = record();

        let status = machine.run(&mut rec, &RunControl::unbounded()).await.unwrap();
        assert_eq!(status, RecordStatus::ManualReview);
        assert!(rec.red_flags.contains("stage_exhausted:CORRECTION"));
        assert_eq!(store.pending_reviews(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn manual_review_priority_tracks_risk() {
        let qa = ScriptedStage::new(
            StageKind::Qa,
            vec![
                StageResult::success(StageKind::Qa)
                    .with_confidence(0.6)
                    .with_risk(0.42),
            ],
        );
        let (machine, store) = machine_over(scoring_pipeline(qa));
        let mut rec = record();

        let status = machine.run(&mut rec, &RunControl::unbounded()).await.unwrap();
        assert_eq!(status, RecordStatus::ManualReview);
        let pending = store.pending_reviews(10).await.unwrap();
        assert_eq!(pending[0].priority, 42);
    }

    #[tokio::test]
    async fn cancelled_record_skips_all_stages() {
        let (machine, store) = machine_over(StageSet::simulated());
        let mut rec = record();
        let control = RunControl::unbounded();
        control.cancel();

        let status = machine.run(&mut rec, &control).await.unwrap();
        assert_eq!(status, RecordStatus::ManualReview);
        assert!(rec.red_flags.contains("job_cancelled"));
        assert_eq!(rec.attempts_for(StageKind::Validation), 0);
        assert_eq!(store.pending_reviews(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fatal_stage_failure_propagates() {
        let stages = StageSet::new(
            ScriptedStage::new(
                StageKind::Validation,
                vec![StageResult::failure(
                    StageKind::Validation,
                    FailureKind::Fatal,
                    "store gone",
                )],
            ),
            ScriptedStage::ok(StageKind::Enrichment),
            ScriptedStage::ok(StageKind::Qa),
            ScriptedStage::ok(StageKind::Correction),
        );
        let (machine, _store) = machine_over(stages);
        let mut rec = record();

        let err = machine
            .run(&mut rec, &RunControl::unbounded())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::StageFatal {
                stage: StageKind::Validation,
                ..
            }
        ));
    }
}
