//! Provider record model: tagged field structure, audit snapshots and
//! per-stage attempt counters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::routing::RoutingDecision;
use crate::stage::{StageKind, StageOutcome, StageResult};
use crate::state_machine::RecordStatus;

/// The known provider fields plus a spillover map for anything else.
///
/// A fixed structure instead of a loose dictionary, so a typo in a field
/// name cannot silently propagate through the stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFields {
    pub name: Option<String>,
    pub npi: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub specialty: Option<String>,
    pub state: Option<String>,
    /// Extra attributes that do not map to a known field.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ProviderFields {
    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            "name" => self.name.as_deref(),
            "npi" => self.npi.as_deref(),
            "phone" => self.phone.as_deref(),
            "address" => self.address.as_deref(),
            "specialty" => self.specialty.as_deref(),
            "state" => self.state.as_deref(),
            other => self.extra.get(other).map(String::as_str),
        }
    }

    pub fn set(&mut self, name: &str, value: String) {
        match name {
            "name" => self.name = Some(value),
            "npi" => self.npi = Some(value),
            "phone" => self.phone = Some(value),
            "address" => self.address = Some(value),
            "specialty" => self.specialty = Some(value),
            "state" => self.state = Some(value),
            other => {
                self.extra.insert(other.to_string(), value);
            }
        }
    }

    pub fn apply(&mut self, updates: &BTreeMap<String, String>) {
        for (name, value) in updates {
            self.set(name, value.clone());
        }
    }
}

/// One entry in the append-only audit trail. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub stage: String,
    pub before: ProviderFields,
    pub after: ProviderFields,
    pub timestamp: DateTime<Utc>,
}

/// A healthcare provider record moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: String,
    pub fields: ProviderFields,
    /// Per-field confidence scores in [0,1], set by the scoring stages.
    pub field_confidence: BTreeMap<String, f64>,
    /// Append-only audit trail; one entry per transition or stage fold.
    pub snapshots: Vec<Snapshot>,
    pub status: RecordStatus,
    /// Attempt counts per stage, monotonic over the record's lifetime.
    pub attempts: BTreeMap<StageKind, u32>,
    /// Union of red flags raised by stages and by the orchestration core.
    pub red_flags: std::collections::BTreeSet<String>,
    /// The routing decision, stored alongside the terminal snapshot.
    pub routing: Option<RoutingDecision>,
    /// Optimistic concurrency version, bumped by the store on save.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderRecord {
    pub fn new(id: String, fields: ProviderFields) -> Self {
        let now = Utc::now();
        Self {
            id,
            fields,
            field_confidence: BTreeMap::new(),
            snapshots: Vec::new(),
            status: RecordStatus::Pending,
            attempts: BTreeMap::new(),
            red_flags: std::collections::BTreeSet::new(),
            routing: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `to`, validating against the transition table and appending
    /// an audit snapshot. Transitions are never reverted.
    pub fn transition(&mut self, to: RecordStatus) -> Result<(), OrchestratorError> {
        if !self.status.can_transition(to) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        self.snapshots.push(Snapshot {
            stage: to.to_string(),
            before: self.fields.clone(),
            after: self.fields.clone(),
            timestamp: self.updated_at,
        });
        Ok(())
    }

    /// Increment and return the attempt number for a stage (1 = first try).
    pub fn begin_attempt(&mut self, stage: StageKind) -> u32 {
        let count = self.attempts.entry(stage).or_insert(0);
        *count += 1;
        *count
    }

    pub fn attempts_for(&self, stage: StageKind) -> u32 {
        self.attempts.get(&stage).copied().unwrap_or(0)
    }

    /// Fold a successful stage result into the record: apply field updates,
    /// record per-field confidence and red flags, append a snapshot.
    ///
    /// Failed results are not folded; the retry path owns those.
    pub fn fold(&mut self, result: &StageResult) {
        let StageOutcome::Success {
            output_fields,
            confidence,
            red_flags,
            ..
        } = &result.outcome
        else {
            return;
        };

        let before = self.fields.clone();
        self.fields.apply(output_fields);
        if let Some(score) = confidence {
            for field in output_fields.keys() {
                self.field_confidence.insert(field.clone(), *score);
            }
        }
        self.red_flags.extend(red_flags.iter().cloned());
        self.updated_at = Utc::now();
        self.snapshots.push(Snapshot {
            stage: result.stage.to_string(),
            before,
            after: self.fields.clone(),
            timestamp: self.updated_at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageResult;

    fn sample_fields() -> ProviderFields {
        let mut fields = ProviderFields::default();
        fields.name = Some("Dr. Smith".into());
        fields.npi = Some("1234567890".into());
        fields.state = Some("CA".into());
        fields
    }

    #[test]
    fn fields_route_unknown_names_to_extra() {
        let mut fields = ProviderFields::default();
        fields.set("phone", "5551234".into());
        fields.set("license_status", "active".into());

        assert_eq!(fields.get("phone"), Some("5551234"));
        assert_eq!(fields.get("license_status"), Some("active"));
        assert_eq!(fields.extra.get("license_status").unwrap(), "active");
        assert_eq!(fields.get("missing"), None);
    }

    #[test]
    fn new_record_starts_pending() {
        let record = ProviderRecord::new("P001".into(), sample_fields());
        assert_eq!(record.status, RecordStatus::Pending);
        assert!(record.snapshots.is_empty());
        assert_eq!(record.version, 0);
        assert_eq!(record.attempts_for(StageKind::Validation), 0);
    }

    #[test]
    fn transition_appends_snapshot_and_validates() {
        let mut record = ProviderRecord::new("P001".into(), sample_fields());
        record.transition(RecordStatus::Validation).unwrap();
        assert_eq!(record.status, RecordStatus::Validation);
        assert_eq!(record.snapshots.len(), 1);
        assert_eq!(record.snapshots[0].stage, "VALIDATION");

        // QA cannot follow VALIDATION directly.
        let err = record.transition(RecordStatus::Qa).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidTransition {
                from: RecordStatus::Validation,
                to: RecordStatus::Qa,
            }
        ));
        // Failed transition leaves no trace.
        assert_eq!(record.snapshots.len(), 1);
    }

    #[test]
    fn attempts_are_monotonic() {
        let mut record = ProviderRecord::new("P001".into(), sample_fields());
        assert_eq!(record.begin_attempt(StageKind::Validation), 1);
        assert_eq!(record.begin_attempt(StageKind::Validation), 2);
        assert_eq!(record.begin_attempt(StageKind::Qa), 1);
        assert_eq!(record.attempts_for(StageKind::Validation), 2);
    }

    #[test]
    fn fold_applies_updates_and_snapshots() {
        let mut record = ProviderRecord::new("P001".into(), sample_fields());
        let result = StageResult::success(StageKind::Validation)
            .with_field("phone", "5551234")
            .with_confidence(0.9)
            .with_red_flag("missing_address");

        record.fold(&result);

        assert_eq!(record.fields.phone.as_deref(), Some("5551234"));
        assert_eq!(record.field_confidence.get("phone"), Some(&0.9));
        assert!(record.red_flags.contains("missing_address"));
        assert_eq!(record.snapshots.len(), 1);
        let snap = &record.snapshots[0];
        assert_eq!(snap.stage, "VALIDATION");
        assert_eq!(snap.before.phone, None);
        assert_eq!(snap.after.phone.as_deref(), Some("5551234"));
    }

    #[test]
    fn fold_ignores_failures() {
        let mut record = ProviderRecord::new("P001".into(), sample_fields());
        let result = StageResult::failure(
            StageKind::Validation,
            crate::error::FailureKind::Transient,
            "timeout",
        );
        record.fold(&result);
        assert!(record.snapshots.is_empty());
    }

    #[test]
    fn record_serialization_roundtrip() {
        let mut record = ProviderRecord::new("P001".into(), sample_fields());
        record.begin_attempt(StageKind::Validation);
        record.transition(RecordStatus::Validation).unwrap();

        let json = serde_json::to_string(&record).unwrap();
        let back: ProviderRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "P001");
        assert_eq!(back.status, RecordStatus::Validation);
        assert_eq!(back.attempts_for(StageKind::Validation), 1);
    }
}
