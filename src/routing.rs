//! Routing engine: maps accumulated scores and red flags to a decision.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::stage::{StageKind, StageResult};

/// What happens to a record after quality assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingAction {
    AutoResolve,
    ManualReview,
    Reject,
}

impl std::fmt::Display for RoutingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingAction::AutoResolve => write!(f, "auto_resolve"),
            RoutingAction::ManualReview => write!(f, "manual_review"),
            RoutingAction::Reject => write!(f, "reject"),
        }
    }
}

/// Deployment-tunable thresholds. Product has quoted 85/90/95% for
/// auto-resolution in different places, so nothing here is compiled in;
/// override per environment via `provflow.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingThresholds {
    /// Minimum confidence for auto-resolution.
    #[serde(default = "default_auto_resolve_confidence")]
    pub auto_resolve_confidence: f64,
    /// Maximum risk tolerated for auto-resolution.
    #[serde(default = "default_auto_resolve_max_risk")]
    pub auto_resolve_max_risk: f64,
    /// Risk at or above which flagged records are rejected outright.
    #[serde(default = "default_reject_min_risk")]
    pub reject_min_risk: f64,
}

fn default_auto_resolve_confidence() -> f64 {
    0.85
}

fn default_auto_resolve_max_risk() -> f64 {
    0.30
}

fn default_reject_min_risk() -> f64 {
    0.50
}

impl Default for RoutingThresholds {
    fn default() -> Self {
        Self {
            auto_resolve_confidence: default_auto_resolve_confidence(),
            auto_resolve_max_risk: default_auto_resolve_max_risk(),
            reject_min_risk: default_reject_min_risk(),
        }
    }
}

/// The decision and the aggregated inputs that produced it. Computed once
/// per record and stored alongside the terminal snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub action: RoutingAction,
    pub confidence_score: f64,
    pub risk_score: f64,
    pub red_flags: BTreeSet<String>,
}

/// Pure decision function over confidence, risk and red flags.
///
/// Deterministic: identical inputs always yield identical output.
#[derive(Debug, Clone, Default)]
pub struct RoutingEngine {
    thresholds: RoutingThresholds,
}

impl RoutingEngine {
    pub fn new(thresholds: RoutingThresholds) -> Self {
        Self { thresholds }
    }

    /// Decision table, first match wins:
    /// 1. flags present and risk at or above the reject line -> reject;
    /// 2. confident, low-risk and unflagged -> auto-resolve;
    /// 3. everything else -> manual review.
    pub fn decide(
        &self,
        confidence: f64,
        risk: f64,
        red_flags: BTreeSet<String>,
    ) -> RoutingDecision {
        let action = if !red_flags.is_empty() && risk >= self.thresholds.reject_min_risk {
            RoutingAction::Reject
        } else if confidence >= self.thresholds.auto_resolve_confidence
            && risk <= self.thresholds.auto_resolve_max_risk
            && red_flags.is_empty()
        {
            RoutingAction::AutoResolve
        } else {
            RoutingAction::ManualReview
        };

        RoutingDecision {
            action,
            confidence_score: confidence,
            risk_score: risk,
            red_flags,
        }
    }

    /// Aggregate the accumulated stage results and decide.
    ///
    /// QA scores are authoritative when reported; otherwise confidence
    /// falls back to the mean of the prior stage confidences and risk to
    /// the highest risk any stage reported.
    pub fn decide_results(&self, results: &[StageResult]) -> RoutingDecision {
        let qa = results
            .iter()
            .find(|r| r.stage == StageKind::Qa && r.is_success());

        let confidence = match qa.and_then(StageResult::confidence) {
            Some(score) => score,
            None => {
                let scores: Vec<f64> = results.iter().filter_map(StageResult::confidence).collect();
                if scores.is_empty() {
                    0.0
                } else {
                    scores.iter().sum::<f64>() / scores.len() as f64
                }
            }
        };

        let risk = match qa.and_then(StageResult::risk) {
            Some(score) => score,
            None => results
                .iter()
                .filter_map(StageResult::risk)
                .fold(0.0, f64::max),
        };

        let red_flags: BTreeSet<String> = results
            .iter()
            .filter_map(StageResult::red_flags)
            .flatten()
            .cloned()
            .collect();

        self.decide(confidence, risk, red_flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageResult;

    fn flags(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn confident_clean_record_auto_resolves() {
        let engine = RoutingEngine::default();
        let decision = engine.decide(0.92, 0.1, BTreeSet::new());
        assert_eq!(decision.action, RoutingAction::AutoResolve);
        assert_eq!(decision.confidence_score, 0.92);
    }

    #[test]
    fn flagged_high_risk_rejects() {
        let engine = RoutingEngine::default();
        let decision = engine.decide(0.9, 0.6, flags(&["inactive_license"]));
        assert_eq!(decision.action, RoutingAction::Reject);
    }

    #[test]
    fn high_risk_without_flags_goes_to_review() {
        // Rule 1 requires explicit flags; bare risk is a review case.
        let engine = RoutingEngine::default();
        let decision = engine.decide(0.9, 0.7, BTreeSet::new());
        assert_eq!(decision.action, RoutingAction::ManualReview);
    }

    #[test]
    fn flags_disqualify_auto_resolve() {
        let engine = RoutingEngine::default();
        let decision = engine.decide(0.95, 0.1, flags(&["missing_npi"]));
        assert_eq!(decision.action, RoutingAction::ManualReview);
    }

    #[test]
    fn low_confidence_goes_to_review() {
        let engine = RoutingEngine::default();
        let decision = engine.decide(0.5, 0.1, BTreeSet::new());
        assert_eq!(decision.action, RoutingAction::ManualReview);
    }

    #[test]
    fn decision_is_deterministic() {
        let engine = RoutingEngine::default();
        let a = engine.decide(0.87, 0.25, flags(&["state_mismatch"]));
        let b = engine.decide(0.87, 0.25, flags(&["state_mismatch"]));
        assert_eq!(a, b);
    }

    #[test]
    fn thresholds_are_overridable() {
        let engine = RoutingEngine::new(RoutingThresholds {
            auto_resolve_confidence: 0.95,
            auto_resolve_max_risk: 0.10,
            reject_min_risk: 0.90,
        });
        // Would auto-resolve under defaults; stricter deployment reviews it.
        assert_eq!(
            engine.decide(0.90, 0.2, BTreeSet::new()).action,
            RoutingAction::ManualReview
        );
        // Would reject under defaults; higher reject line reviews it.
        assert_eq!(
            engine.decide(0.5, 0.6, flags(&["inactive_license"])).action,
            RoutingAction::ManualReview
        );
    }

    #[test]
    fn qa_scores_are_authoritative() {
        let engine = RoutingEngine::default();
        let results = vec![
            StageResult::success(StageKind::Validation).with_confidence(0.4),
            StageResult::success(StageKind::Enrichment).with_confidence(0.5),
            StageResult::success(StageKind::Qa)
                .with_confidence(0.92)
                .with_risk(0.1),
        ];
        let decision = engine.decide_results(&results);
        assert_eq!(decision.confidence_score, 0.92);
        assert_eq!(decision.risk_score, 0.1);
        assert_eq!(decision.action, RoutingAction::AutoResolve);
    }

    #[test]
    fn missing_qa_scores_fall_back_to_prior_stages() {
        let engine = RoutingEngine::default();
        let results = vec![
            StageResult::success(StageKind::Validation).with_confidence(0.9),
            StageResult::success(StageKind::Enrichment).with_confidence(0.8),
            StageResult::success(StageKind::Qa),
        ];
        let decision = engine.decide_results(&results);
        assert!((decision.confidence_score - 0.85).abs() < 1e-9);
        assert_eq!(decision.risk_score, 0.0);
    }

    #[test]
    fn red_flags_union_across_stages() {
        let engine = RoutingEngine::default();
        let results = vec![
            StageResult::success(StageKind::Validation).with_red_flag("bad_phone"),
            StageResult::success(StageKind::Qa)
                .with_confidence(0.9)
                .with_risk(0.6)
                .with_red_flag("inactive_license"),
        ];
        let decision = engine.decide_results(&results);
        assert_eq!(decision.action, RoutingAction::Reject);
        assert_eq!(decision.red_flags, flags(&["bad_phone", "inactive_license"]));
    }
}
