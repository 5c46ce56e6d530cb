use serde::{Deserialize, Serialize};

use crate::config::RiskThresholds;
use crate::context::ExecutionContext;
use crate::report::{ComplianceReport, FinalDecision, FraudReport, FraudVerdict, RiskReport, StageReport};
use crate::types::StageKind;

/// Condition half of a [`DecisionRule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum RuleCondition {
    RiskScoreAbove { threshold: u8 },
    ComplianceRejected,
    FraudVerdictIs { verdict: FraudVerdict },
    FraudUnresolved,
    Always,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRule {
    pub condition: RuleCondition,
    pub outcome: FinalDecision,
}

/// Reports the final decision is resolved from.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionInputs<'a> {
    pub fraud: Option<&'a FraudReport>,
    pub risk: Option<&'a RiskReport>,
    pub compliance: Option<&'a ComplianceReport>,
}

impl<'a> DecisionInputs<'a> {
    pub fn from_context(context: &'a ExecutionContext) -> Self {
        Self {
            fraud: context.report(StageKind::Fraud).and_then(StageReport::as_fraud),
            risk: context.report(StageKind::Risk).and_then(StageReport::as_risk),
            compliance: context
                .report(StageKind::Compliance)
                .and_then(StageReport::as_compliance),
        }
    }
}

impl RuleCondition {
    pub fn matches(&self, inputs: &DecisionInputs<'_>) -> bool {
        match self {
            Self::RiskScoreAbove { threshold } => {
                inputs.risk.is_some_and(|r| r.risk_score > *threshold)
            }
            Self::ComplianceRejected => inputs.compliance.is_some_and(|c| !c.compliance_approved),
            Self::FraudVerdictIs { verdict } => inputs.fraud.is_some_and(|f| f.verdict == *verdict),
            Self::FraudUnresolved => inputs.fraud.is_none(),
            Self::Always => true,
        }
    }
}

/// Ordered rule list; the first matching rule wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRules {
    rules: Vec<DecisionRule>,
}

impl DecisionRules {
    pub fn new(rules: Vec<DecisionRule>) -> Self {
        Self { rules }
    }

    /// Severity first: a blocking risk score beats compliance escalation.
    pub fn standard(risk: &RiskThresholds) -> Self {
        let rule = |condition, outcome| DecisionRule { condition, outcome };
        Self::new(vec![
            rule(
                RuleCondition::RiskScoreAbove {
                    threshold: risk.block_above,
                },
                FinalDecision::BlockImmediately,
            ),
            rule(
                RuleCondition::ComplianceRejected,
                FinalDecision::EscalateToAuthorities,
            ),
            rule(
                RuleCondition::FraudVerdictIs {
                    verdict: FraudVerdict::Fraud,
                },
                FinalDecision::FraudDetectedMonitor,
            ),
            rule(
                RuleCondition::FraudVerdictIs {
                    verdict: FraudVerdict::CheckRequired,
                },
                FinalDecision::RequireManualReview,
            ),
            rule(RuleCondition::FraudUnresolved, FinalDecision::RequireManualReview),
            rule(RuleCondition::Always, FinalDecision::SafeApproved),
        ])
    }

    pub fn rules(&self) -> &[DecisionRule] {
        &self.rules
    }

    /// Falls back to manual review if no rule matches.
    pub fn resolve(&self, inputs: &DecisionInputs<'_>) -> FinalDecision {
        self.rules
            .iter()
            .find(|rule| rule.condition.matches(inputs))
            .map(|rule| rule.outcome)
            .unwrap_or(FinalDecision::RequireManualReview)
    }
}

impl Default for DecisionRules {
    fn default() -> Self {
        Self::standard(&RiskThresholds::default())
    }
}

/// Which stage receives a delegation from which.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRoutes {
    routes: Vec<(StageKind, StageKind)>,
}

impl EscalationRoutes {
    pub fn successor(&self, from: StageKind) -> Option<StageKind> {
        self.routes
            .iter()
            .find(|(source, _)| *source == from)
            .map(|(_, target)| *target)
    }
}

impl Default for EscalationRoutes {
    fn default() -> Self {
        Self {
            routes: vec![
                (StageKind::Fraud, StageKind::Risk),
                (StageKind::Risk, StageKind::Compliance),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn fraud(verdict: FraudVerdict) -> FraudReport {
        FraudReport {
            verdict,
            confidence: 0.0,
            anomaly_count: 0,
            detection: Value::Null,
            anomalies: Value::Null,
            escalate_to_risk: verdict != FraudVerdict::Safe,
            error: None,
        }
    }

    fn risk(score: u8) -> RiskReport {
        RiskReport {
            fraud_verdict: None,
            risk_score: score,
            severity: "HIGH".into(),
            recommendations: vec![],
            escalate_to_compliance: score > 70,
            block_immediately: score > 80,
            evidence: Default::default(),
            error: None,
        }
    }

    fn compliance(violations: &[&str]) -> ComplianceReport {
        ComplianceReport {
            aml_kyc_status: "CHECKED".into(),
            violations: violations.iter().map(|v| v.to_string()).collect(),
            required_actions: vec![],
            compliance_approved: violations.is_empty(),
            evidence: Default::default(),
            error: None,
        }
    }

    #[test]
    fn safe_input_is_approved() {
        let f = fraud(FraudVerdict::Safe);
        let inputs = DecisionInputs {
            fraud: Some(&f),
            ..Default::default()
        };
        assert_eq!(DecisionRules::default().resolve(&inputs), FinalDecision::SafeApproved);
    }

    #[test]
    fn block_beats_compliance_escalation() {
        let (f, r, c) = (fraud(FraudVerdict::Fraud), risk(85), compliance(&["AML"]));
        let inputs = DecisionInputs {
            fraud: Some(&f),
            risk: Some(&r),
            compliance: Some(&c),
        };
        assert_eq!(DecisionRules::default().resolve(&inputs), FinalDecision::BlockImmediately);
    }

    #[test]
    fn violations_escalate_to_authorities() {
        let (f, r, c) = (fraud(FraudVerdict::Fraud), risk(75), compliance(&["AML"]));
        let inputs = DecisionInputs {
            fraud: Some(&f),
            risk: Some(&r),
            compliance: Some(&c),
        };
        assert_eq!(
            DecisionRules::default().resolve(&inputs),
            FinalDecision::EscalateToAuthorities
        );
    }

    #[test]
    fn confirmed_fraud_without_violations_is_monitored() {
        let (f, r, c) = (fraud(FraudVerdict::Fraud), risk(75), compliance(&[]));
        let inputs = DecisionInputs {
            fraud: Some(&f),
            risk: Some(&r),
            compliance: Some(&c),
        };
        assert_eq!(
            DecisionRules::default().resolve(&inputs),
            FinalDecision::FraudDetectedMonitor
        );
    }

    #[test]
    fn check_required_with_moderate_risk_needs_review() {
        let (f, r) = (fraud(FraudVerdict::CheckRequired), risk(65));
        let inputs = DecisionInputs {
            fraud: Some(&f),
            risk: Some(&r),
            compliance: None,
        };
        assert_eq!(
            DecisionRules::default().resolve(&inputs),
            FinalDecision::RequireManualReview
        );
    }

    #[test]
    fn missing_fraud_report_needs_review() {
        assert_eq!(
            DecisionRules::default().resolve(&DecisionInputs::default()),
            FinalDecision::RequireManualReview
        );
    }

    #[test]
    fn thresholds_flow_into_rules() {
        let rules = DecisionRules::standard(&RiskThresholds {
            escalate_above: 50,
            block_above: 60,
        });
        let (f, r) = (fraud(FraudVerdict::CheckRequired), risk(65));
        let inputs = DecisionInputs {
            fraud: Some(&f),
            risk: Some(&r),
            compliance: None,
        };
        assert_eq!(rules.resolve(&inputs), FinalDecision::BlockImmediately);
    }

    #[test]
    fn routes_follow_escalation_order() {
        let routes = EscalationRoutes::default();
        assert_eq!(routes.successor(StageKind::Fraud), Some(StageKind::Risk));
        assert_eq!(routes.successor(StageKind::Risk), Some(StageKind::Compliance));
        assert_eq!(routes.successor(StageKind::Compliance), None);
        assert_eq!(routes.successor(StageKind::MemoryConsolidation), None);
    }
}
