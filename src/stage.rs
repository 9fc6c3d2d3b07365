//! Stage capability interface and the results stages produce.
//!
//! The concrete validation/enrichment/QA/correction logic lives outside
//! this crate behind [`StageExecutor`]. A stage never mutates the record
//! it is given; it returns a [`StageResult`] that the state machine folds
//! into the record.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;
use crate::record::ProviderRecord;
use crate::state_machine::RecordStatus;

/// The four processing stages, in pipeline order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Validation,
    Enrichment,
    Qa,
    Correction,
}

impl StageKind {
    /// The scoring stages that run before routing, in order.
    pub const PIPELINE: [StageKind; 3] =
        [StageKind::Validation, StageKind::Enrichment, StageKind::Qa];

    /// The record status a record enters while this stage runs.
    pub fn status(self) -> RecordStatus {
        match self {
            StageKind::Validation => RecordStatus::Validation,
            StageKind::Enrichment => RecordStatus::Enrichment,
            StageKind::Qa => RecordStatus::Qa,
            StageKind::Correction => RecordStatus::Correction,
        }
    }

    /// Lowercase name used in red-flag codes such as `invalid_input:qa`.
    pub fn as_lower(self) -> &'static str {
        match self {
            StageKind::Validation => "validation",
            StageKind::Enrichment => "enrichment",
            StageKind::Qa => "qa",
            StageKind::Correction => "correction",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Validation => write!(f, "VALIDATION"),
            StageKind::Enrichment => write!(f, "ENRICHMENT"),
            StageKind::Qa => write!(f, "QA"),
            StageKind::Correction => write!(f, "CORRECTION"),
        }
    }
}

/// A stage failure with its retry classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.message)
    }
}

/// The outcome of one stage attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageOutcome {
    Success {
        /// Partial field updates, keyed by field name. May be empty.
        output_fields: BTreeMap<String, String>,
        /// Record-level confidence in [0,1], when the stage scores one.
        confidence: Option<f64>,
        /// Record-level risk in [0,1]; only QA reports this.
        risk: Option<f64>,
        /// Detected inconsistency codes.
        red_flags: BTreeSet<String>,
    },
    Failure(StageFailure),
}

/// Immutable result of a single stage attempt, consumed by the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub outcome: StageOutcome,
}

impl StageResult {
    pub fn success(stage: StageKind) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Success {
                output_fields: BTreeMap::new(),
                confidence: None,
                risk: None,
                red_flags: BTreeSet::new(),
            },
        }
    }

    pub fn failure(stage: StageKind, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Failure(StageFailure {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        if let StageOutcome::Success { output_fields, .. } = &mut self.outcome {
            output_fields.insert(name.to_string(), value.to_string());
        }
        self
    }

    pub fn with_confidence(mut self, score: f64) -> Self {
        if let StageOutcome::Success { confidence, .. } = &mut self.outcome {
            *confidence = Some(score);
        }
        self
    }

    pub fn with_risk(mut self, score: f64) -> Self {
        if let StageOutcome::Success { risk, .. } = &mut self.outcome {
            *risk = Some(score);
        }
        self
    }

    pub fn with_red_flag(mut self, flag: &str) -> Self {
        if let StageOutcome::Success { red_flags, .. } = &mut self.outcome {
            red_flags.insert(flag.to_string());
        }
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StageOutcome::Success { .. })
    }

    pub fn confidence(&self) -> Option<f64> {
        match &self.outcome {
            StageOutcome::Success { confidence, .. } => *confidence,
            StageOutcome::Failure(_) => None,
        }
    }

    pub fn risk(&self) -> Option<f64> {
        match &self.outcome {
            StageOutcome::Success { risk, .. } => *risk,
            StageOutcome::Failure(_) => None,
        }
    }

    pub fn red_flags(&self) -> Option<&BTreeSet<String>> {
        match &self.outcome {
            StageOutcome::Success { red_flags, .. } => Some(red_flags),
            StageOutcome::Failure(_) => None,
        }
    }
}

/// Capability interface implemented by the external stage logic.
///
/// `execute` must not mutate the record; it returns a [`StageResult`]
/// the core folds in.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn execute(&self, record: &ProviderRecord) -> StageResult;
}

/// One executor per stage, wired at construction so stages can come from
/// independent processes or test doubles without touching the state machine.
#[derive(Clone)]
pub struct StageSet {
    validation: Arc<dyn StageExecutor>,
    enrichment: Arc<dyn StageExecutor>,
    qa: Arc<dyn StageExecutor>,
    correction: Arc<dyn StageExecutor>,
}

impl StageSet {
    pub fn new(
        validation: Arc<dyn StageExecutor>,
        enrichment: Arc<dyn StageExecutor>,
        qa: Arc<dyn StageExecutor>,
        correction: Arc<dyn StageExecutor>,
    ) -> Self {
        Self {
            validation,
            enrichment,
            qa,
            correction,
        }
    }

    /// Deterministic rule-based stage set used by the demo and tests.
    pub fn simulated() -> Self {
        Self::new(
            Arc::new(SimulatedValidation),
            Arc::new(SimulatedEnrichment),
            Arc::new(SimulatedQa),
            Arc::new(SimulatedCorrection),
        )
    }

    pub fn get(&self, kind: StageKind) -> &dyn StageExecutor {
        match kind {
            StageKind::Validation => self.validation.as_ref(),
            StageKind::Enrichment => self.enrichment.as_ref(),
            StageKind::Qa => self.qa.as_ref(),
            StageKind::Correction => self.correction.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulated stages. These stand in for the external agents so the demo and
// the end-to-end tests run without network access. Scoring weights follow
// the production QA rules: inactive license 0.40, missing NPI 0.30,
// license/practice state mismatch 0.25.

struct SimulatedValidation;

#[async_trait]
impl StageExecutor for SimulatedValidation {
    fn kind(&self) -> StageKind {
        StageKind::Validation
    }

    async fn execute(&self, record: &ProviderRecord) -> StageResult {
        let fields = &record.fields;
        let present = [
            &fields.name,
            &fields.npi,
            &fields.phone,
            &fields.address,
            &fields.specialty,
            &fields.state,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count();

        if present == 0 {
            return StageResult::failure(
                StageKind::Validation,
                FailureKind::Invalid,
                "record has no contact fields",
            );
        }

        let mut result =
            StageResult::success(StageKind::Validation).with_confidence(present as f64 / 6.0);

        // Normalize the phone number to bare digits.
        if let Some(phone) = &fields.phone {
            let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits != *phone {
                result = result.with_field("phone", &digits);
            }
        }

        result
    }
}

struct SimulatedEnrichment;

#[async_trait]
impl StageExecutor for SimulatedEnrichment {
    fn kind(&self) -> StageKind {
        StageKind::Enrichment
    }

    async fn execute(&self, record: &ProviderRecord) -> StageResult {
        let mut result = StageResult::success(StageKind::Enrichment).with_confidence(0.75);
        if record.fields.specialty.is_none() {
            result = result.with_field("specialty", "General");
        }
        result
    }
}

struct SimulatedQa;

#[async_trait]
impl StageExecutor for SimulatedQa {
    fn kind(&self) -> StageKind {
        StageKind::Qa
    }

    async fn execute(&self, record: &ProviderRecord) -> StageResult {
        let fields = &record.fields;
        let license_status = fields.extra.get("license_status").map(String::as_str);
        let license_state = fields.extra.get("license_state").map(String::as_str);

        let mut result = StageResult::success(StageKind::Qa);
        let mut risk: f64 = 0.0;

        if license_status == Some("inactive") {
            result = result.with_red_flag("inactive_license");
            risk += 0.40;
        }
        if fields.npi.is_none() {
            result = result.with_red_flag("missing_npi");
            risk += 0.30;
        }
        if let (Some(ls), Some(ps)) = (license_state, fields.state.as_deref())
            && ls != ps
        {
            result = result.with_red_flag("license_state_mismatch");
            risk += 0.25;
        }

        let mut confidence: f64 = 0.0;
        if fields.npi.is_some() {
            confidence += 0.25;
        }
        if license_status == Some("active") {
            confidence += 0.25;
        }
        if fields.name.is_some() {
            confidence += 0.20;
        }
        if fields.phone.is_some() {
            confidence += 0.15;
        }
        if fields.address.is_some() {
            confidence += 0.15;
        }

        result
            .with_confidence(confidence.min(1.0))
            .with_risk(risk.min(1.0))
    }
}

struct SimulatedCorrection;

#[async_trait]
impl StageExecutor for SimulatedCorrection {
    fn kind(&self) -> StageKind {
        StageKind::Correction
    }

    async fn execute(&self, record: &ProviderRecord) -> StageResult {
        let mut result = StageResult::success(StageKind::Correction);
        if let Some(state) = &record.fields.state {
            let upper = state.to_uppercase();
            if upper != *state {
                result = result.with_field("state", &upper);
            }
        }
        if let Some(name) = &record.fields.name {
            let trimmed = name.trim();
            if trimmed != name {
                result = result.with_field("name", trimmed);
            }
        }
        result
    }
}
