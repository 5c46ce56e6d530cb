use std::collections::BTreeSet;

use finguard_capability::{Plan, Step};
use finguard_policy::ActionKey;
use serde_json::json;

use super::{number, scope, strings, text, AgentProfile, Stage, StageResults};
use crate::config::RiskThresholds;
use crate::context::ExecutionContext;
use crate::report::{FraudVerdict, RiskReport, StageReport};
use crate::types::{SessionRequest, StageKind};

const CALCULATE_RISK_SCORE: &str = "calculate_risk_score";
const ASSESS_IMPACT: &str = "assess_impact";
const EVIDENCE_ACTION: &str = "detect_deepfakes";

/// Risk score recorded when the stage cannot complete.
pub const DEGRADED_RISK_SCORE: u8 = 50;

#[derive(Debug, Clone)]
pub struct RiskStage {
    profile: AgentProfile,
    thresholds: RiskThresholds,
}

impl RiskStage {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self {
            profile: AgentProfile::isolated(StageKind::Risk),
            thresholds,
        }
    }

    fn severity_for(score: u8) -> &'static str {
        match score {
            81..=u8::MAX => "CRITICAL",
            71..=80 => "HIGH",
            41..=70 => "MEDIUM",
            _ => "LOW",
        }
    }
}

impl Default for RiskStage {
    fn default() -> Self {
        Self::new(RiskThresholds::default())
    }
}

fn fraud_verdict(context: &ExecutionContext) -> Option<FraudVerdict> {
    context
        .report(StageKind::Fraud)
        .and_then(StageReport::as_fraud)
        .map(|r| r.verdict)
}

impl Stage for RiskStage {
    fn kind(&self) -> StageKind {
        StageKind::Risk
    }

    fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn build_plan(&self, request: &SessionRequest, context: &ExecutionContext) -> Plan {
        let fraud = context.report(StageKind::Fraud).and_then(StageReport::as_fraud);
        let verdict = fraud.map(|r| r.verdict);
        let multiplier = if verdict == Some(FraudVerdict::Fraud) { 1.5 } else { 1.0 };
        let indicators = json!({
            "verdict": verdict,
            "confidence": fraud.map(|r| r.confidence),
            "anomaly_count": fraud.map(|r| r.anomaly_count),
            "detection": fraud.map(|r| r.detection.clone()),
        });

        let ns = StageKind::Risk.name();
        Plan::new("Quantify financial risk of the fraud finding")
            .step(
                Step::new(ns, CALCULATE_RISK_SCORE)
                    .with_params(json!({
                        "session_id": context.session_id(),
                        "fraud_indicators": indicators,
                        "severity_multiplier": multiplier,
                        "metadata": request.metadata,
                    }))
                    .with_description("Score exposure 0-100 from fraud indicators"),
            )
            .step(
                Step::new(ns, ASSESS_IMPACT)
                    .with_params(json!({
                        "session_id": context.session_id(),
                        "threat_type": verdict,
                        "media_type": request.media_type,
                        "metadata": request.metadata,
                    }))
                    .with_description("Assess impact severity and recommendations"),
            )
    }

    fn decide(&self, results: &StageResults, context: &ExecutionContext) -> StageReport {
        let ns = StageKind::Risk.name();
        let score_output = results.output(ns, CALCULATE_RISK_SCORE);
        let impact = results.output(ns, ASSESS_IMPACT);

        let risk_score = number(score_output, "risk_score")
            .unwrap_or(0.0)
            .clamp(0.0, 100.0)
            .round() as u8;
        let severity = text(impact, "severity")
            .unwrap_or_else(|| Self::severity_for(risk_score).to_string());

        StageReport::Risk(RiskReport {
            fraud_verdict: fraud_verdict(context),
            risk_score,
            severity,
            recommendations: strings(impact, "recommendations"),
            escalate_to_compliance: false,
            block_immediately: risk_score > self.thresholds.block_above,
            evidence: results.delegated_evidence(),
            error: None,
        })
    }

    fn next_allowed_actions(&self, report: &StageReport) -> Option<BTreeSet<ActionKey>> {
        let risk = report.as_risk()?;
        if risk.risk_score > self.thresholds.escalate_above && risk.error.is_none() {
            // Re-delegated from the scope received from the fraud stage.
            Some(scope(StageKind::Fraud, &[EVIDENCE_ACTION]))
        } else {
            None
        }
    }

    fn degraded(&self, error: &str, context: &ExecutionContext) -> StageReport {
        StageReport::Risk(RiskReport {
            fraud_verdict: fraud_verdict(context),
            risk_score: DEGRADED_RISK_SCORE,
            severity: Self::severity_for(DEGRADED_RISK_SCORE).to_string(),
            recommendations: vec!["Manual risk assessment required".to_string()],
            escalate_to_compliance: false,
            block_immediately: false,
            evidence: Default::default(),
            error: Some(error.to_string()),
        })
    }
}
