use std::collections::BTreeSet;

use finguard_capability::{Plan, Step};
use finguard_policy::ActionKey;
use serde_json::json;

use super::{AgentProfile, Stage, StageResults};
use crate::context::ExecutionContext;
use crate::report::{ConsolidationStatus, MemoryReport, StageReport};
use crate::types::{SessionRequest, StageKind};

const CONSOLIDATE_FINDINGS: &str = "consolidate_findings";
const GENERATE_AUDIT_TRAIL: &str = "generate_audit_trail";

/// Always-run closing stage. Merges everything recorded so far.
#[derive(Debug, Clone)]
pub struct MemoryConsolidationStage {
    profile: AgentProfile,
}

impl MemoryConsolidationStage {
    pub fn new() -> Self {
        Self {
            profile: AgentProfile::isolated(StageKind::MemoryConsolidation),
        }
    }

    fn report(
        context: &ExecutionContext,
        status: ConsolidationStatus,
        error: Option<String>,
    ) -> StageReport {
        StageReport::MemoryConsolidation(MemoryReport {
            session_id: context.session_id().clone(),
            stages_consolidated: context
                .reports()
                .map(|r| r.kind().name().to_string())
                .collect(),
            total_audit_entries: context.audit_trail().len(),
            blocked_actions_count: context.blocked_actions().len(),
            errors_count: context.errors().len(),
            consolidation_status: status,
            error,
        })
    }
}

impl Default for MemoryConsolidationStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for MemoryConsolidationStage {
    fn kind(&self) -> StageKind {
        StageKind::MemoryConsolidation
    }

    fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn build_plan(&self, request: &SessionRequest, context: &ExecutionContext) -> Plan {
        let reports: Vec<_> = context.reports().collect();
        let ns = StageKind::MemoryConsolidation.name();
        Plan::new("Consolidate session findings and audit trail")
            .step(
                Step::new(ns, CONSOLIDATE_FINDINGS)
                    .with_params(json!({
                        "session_id": context.session_id(),
                        "mode": request.mode,
                        "media_type": request.media_type,
                        "reports": reports,
                        "blocked_actions": context.blocked_actions(),
                        "errors": context.errors(),
                    }))
                    .with_description("Merge stage reports into long-term memory"),
            )
            .step(
                Step::new(ns, GENERATE_AUDIT_TRAIL)
                    .with_params(json!({
                        "session_id": context.session_id(),
                        "audit_trail": context.audit_trail(),
                    }))
                    .with_description("Persist the ordered audit trail"),
            )
    }

    fn decide(&self, results: &StageResults, context: &ExecutionContext) -> StageReport {
        let status = match (results.outputs.len(), results.blocked.len()) {
            (_, 0) => ConsolidationStatus::Success,
            (0, _) => ConsolidationStatus::Failed,
            _ => ConsolidationStatus::Partial,
        };
        Self::report(context, status, None)
    }

    fn next_allowed_actions(&self, _report: &StageReport) -> Option<BTreeSet<ActionKey>> {
        None
    }

    fn degraded(&self, error: &str, context: &ExecutionContext) -> StageReport {
        Self::report(context, ConsolidationStatus::Failed, Some(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AuditStatus;
    use crate::types::{ExecutionMode, MediaType, SessionId};

    fn context() -> ExecutionContext {
        let mut ctx =
            ExecutionContext::new(SessionId::generate(), ExecutionMode::Ask, MediaType::Audio);
        ctx.record_audit("fraud_agent", "fraud_agent/detect_deepfakes", AuditStatus::Executed, json!({}));
        ctx
    }

    #[test]
    fn counts_context_contents() {
        let ctx = context();
        let report = MemoryConsolidationStage::new().decide(&StageResults::default(), &ctx);
        let memory = report.as_memory().unwrap();
        assert_eq!(memory.total_audit_entries, 1);
        assert_eq!(memory.consolidation_status, ConsolidationStatus::Success);
        assert_eq!(&memory.session_id, ctx.session_id());
    }

    #[test]
    fn blocked_steps_mark_consolidation_failed() {
        let mut results = StageResults::default();
        results
            .blocked
            .push(ActionKey::new("memory_agent", CONSOLIDATE_FINDINGS).unwrap());
        let report = MemoryConsolidationStage::new().decide(&results, &context());
        assert_eq!(
            report.as_memory().unwrap().consolidation_status,
            ConsolidationStatus::Failed
        );
    }

    #[test]
    fn plan_carries_audit_trail() {
        let ctx = context();
        let request = SessionRequest::new("x", MediaType::Audio, ExecutionMode::Ask);
        let plan = MemoryConsolidationStage::new().build_plan(&request, &ctx);
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].params["audit_trail"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn never_delegates() {
        let stage = MemoryConsolidationStage::new();
        let report = stage.degraded("x", &context());
        assert!(stage.next_allowed_actions(&report).is_none());
        assert_eq!(
            report.as_memory().unwrap().consolidation_status,
            ConsolidationStatus::Failed
        );
    }
}
