use std::collections::BTreeSet;

use finguard_capability::{Plan, Step};
use finguard_policy::ActionKey;
use serde_json::json;

use super::{strings, text, AgentProfile, Stage, StageResults};
use crate::context::ExecutionContext;
use crate::report::{ComplianceReport, StageReport};
use crate::types::{SessionRequest, StageKind};

const CHECK_AML_KYC: &str = "check_aml_kyc";
const VALIDATE_REGULATIONS: &str = "validate_regulations";

/// Last escalation stage: AML/KYC status and regulatory violations.
#[derive(Debug, Clone)]
pub struct ComplianceStage {
    profile: AgentProfile,
}

impl ComplianceStage {
    pub fn new() -> Self {
        Self {
            profile: AgentProfile::isolated(StageKind::Compliance),
        }
    }
}

impl Default for ComplianceStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for ComplianceStage {
    fn kind(&self) -> StageKind {
        StageKind::Compliance
    }

    fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn build_plan(&self, request: &SessionRequest, context: &ExecutionContext) -> Plan {
        let fraud_level = context
            .report(StageKind::Fraud)
            .and_then(StageReport::as_fraud)
            .map(|r| r.verdict);
        let risk = context.report(StageKind::Risk).and_then(StageReport::as_risk);

        let ns = StageKind::Compliance.name();
        Plan::new("Validate regulatory compliance of the escalated case")
            .step(
                Step::new(ns, CHECK_AML_KYC)
                    .with_params(json!({
                        "session_id": context.session_id(),
                        "fraud_level": fraud_level,
                        "risk_score": risk.map(|r| r.risk_score),
                        "metadata": request.metadata,
                    }))
                    .with_description("Check AML and KYC status"),
            )
            .step(
                Step::new(ns, VALIDATE_REGULATIONS)
                    .with_params(json!({
                        "session_id": context.session_id(),
                        "risk_score": risk.map(|r| r.risk_score),
                        "severity": risk.map(|r| r.severity.clone()),
                        "media_type": request.media_type,
                        "metadata": request.metadata,
                    }))
                    .with_description("List regulatory violations and required actions"),
            )
    }

    fn decide(&self, results: &StageResults, _context: &ExecutionContext) -> StageReport {
        let ns = StageKind::Compliance.name();
        let aml = results.output(ns, CHECK_AML_KYC);
        let regulations = results.output(ns, VALIDATE_REGULATIONS);
        let violations = strings(regulations, "violations");

        StageReport::Compliance(ComplianceReport {
            aml_kyc_status: text(aml, "aml_status").unwrap_or_else(|| "UNKNOWN".to_string()),
            compliance_approved: violations.is_empty(),
            violations,
            required_actions: strings(regulations, "required_actions"),
            evidence: results.delegated_evidence(),
            error: None,
        })
    }

    fn next_allowed_actions(&self, _report: &StageReport) -> Option<BTreeSet<ActionKey>> {
        None
    }

    fn degraded(&self, error: &str, _context: &ExecutionContext) -> StageReport {
        StageReport::Compliance(ComplianceReport {
            aml_kyc_status: "UNAVAILABLE".to_string(),
            violations: Vec::new(),
            required_actions: vec!["Manual compliance review".to_string()],
            compliance_approved: false,
            evidence: Default::default(),
            error: Some(error.to_string()),
        })
    }
}
