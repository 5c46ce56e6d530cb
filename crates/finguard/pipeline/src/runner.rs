use std::collections::BTreeSet;

use finguard_capability::{
    CapabilityToken, Delegation, DelegationManager, InvocationGate, TokenIssuer,
};
use finguard_policy::ActionKey;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::context::{AuditStatus, ExecutionContext};
use crate::error::PipelineError;
use crate::flow::StageMachine;
use crate::report::StageReport;
use crate::stages::{Stage, StageResults};
use crate::types::{SessionRequest, StageKind};

/// Outcome of one stage run, before the orchestrator settles escalation.
#[derive(Debug)]
pub struct StageRun {
    pub report: StageReport,
    pub machine: StageMachine,
    /// Token the stage may delegate from: its received delegation if any,
    /// otherwise its own root token. `None` when the stage aborted.
    pub authority: Option<CapabilityToken>,
    pub proposed_scope: Option<BTreeSet<ActionKey>>,
}

/// Executes a stage: plan, token, delegated evidence, own steps, decision.
pub struct StageRunner<'g> {
    gate: &'g mut InvocationGate,
    issuer: TokenIssuer,
    delegations: DelegationManager,
    token_validity_secs: u64,
}

impl<'g> StageRunner<'g> {
    pub fn new(gate: &'g mut InvocationGate, token_validity_secs: u64) -> Self {
        Self {
            gate,
            issuer: TokenIssuer::new(),
            delegations: DelegationManager::new(),
            token_validity_secs,
        }
    }

    pub async fn execute(
        &mut self,
        stage: &dyn Stage,
        request: &SessionRequest,
        context: &mut ExecutionContext,
        received: Option<&Delegation>,
    ) -> StageRun {
        let kind = stage.kind();
        let mut machine = StageMachine::new(kind);
        info!(
            session_id = %context.session_id(),
            stage = kind.name(),
            delegated = received.is_some(),
            "Stage started"
        );

        match self.try_execute(stage, request, context, received, &mut machine).await {
            Ok(run) => run,
            Err(err) => {
                context.record_error(kind.name(), &err);
                if let Err(order) = machine.abort() {
                    context.record_error(kind.name(), &order);
                }
                warn!(
                    session_id = %context.session_id(),
                    stage = kind.name(),
                    error = %err,
                    "Stage aborted with degraded report"
                );
                StageRun {
                    report: stage.degraded(&err.to_string(), context),
                    machine,
                    authority: None,
                    proposed_scope: None,
                }
            }
        }
    }

    async fn try_execute(
        &mut self,
        stage: &dyn Stage,
        request: &SessionRequest,
        context: &mut ExecutionContext,
        received: Option<&Delegation>,
        machine: &mut StageMachine,
    ) -> Result<StageRun, PipelineError> {
        let kind = stage.kind();
        let profile = stage.profile();

        let plan = stage.build_plan(request, context);
        machine.mark_plan_captured()?;
        debug!(stage = kind.name(), goal = %plan.goal, steps = plan.steps.len(), "Plan captured");

        let token = match self.issuer.issue(
            &profile.id,
            &plan,
            &profile.policy,
            self.token_validity_secs,
        ) {
            Ok(token) => token,
            Err(err) => {
                context.record_audit(
                    kind.name(),
                    "TOKEN_ISSUE",
                    AuditStatus::Failed,
                    json!({ "error": err.kind().name(), "reason": err.to_string() }),
                );
                return Err(err.into());
            }
        };
        token.verify_plan(&plan)?;
        machine.mark_token_issued()?;
        context.record_audit(
            kind.name(),
            "TOKEN_ISSUED",
            AuditStatus::Executed,
            json!({
                "token_id": token.token_id(),
                "plan_fingerprint": token.plan_fingerprint(),
                "allowed_actions": token.allowed_actions(),
                "expires_at": token.expires_at(),
            }),
        );

        let mut results = StageResults::default();

        if let Some(delegation) = received {
            self.delegations.accept(delegation, &profile.id)?;
            let evidence_params = json!({
                "session_id": context.session_id(),
                "delegation_id": delegation.delegation_id,
                "purpose": "evidence_review",
            });
            for action in delegation.allowed_actions() {
                if let Some(value) = self
                    .attempt(kind, &delegation.token, action, &evidence_params, context, &mut results)
                    .await?
                {
                    results.delegated.insert(action.clone(), value);
                }
            }
        }

        let keys = plan.validate()?;
        for (step, action) in plan.steps.iter().zip(keys) {
            if let Some(value) = self
                .attempt(kind, &token, &action, &step.params, context, &mut results)
                .await?
            {
                results.outputs.insert(action, value);
            }
        }
        machine.mark_actions_invoked()?;

        let report = stage.decide(&results, context);
        machine.mark_decision_made()?;
        let proposed_scope = stage.next_allowed_actions(&report);

        info!(
            session_id = %context.session_id(),
            stage = kind.name(),
            executed = results.outputs.len() + results.delegated.len(),
            blocked = results.blocked.len(),
            escalation_proposed = proposed_scope.is_some(),
            "Stage decision made"
        );

        let authority = received.map(|d| d.token.clone()).unwrap_or(token);
        Ok(StageRun {
            report,
            machine: machine.clone(),
            authority: Some(authority),
            proposed_scope,
        })
    }

    /// One invocation and its single audit entry. Action-local rejections
    /// yield `Ok(None)`; service failures abort the stage.
    async fn attempt(
        &mut self,
        kind: StageKind,
        token: &CapabilityToken,
        action: &ActionKey,
        params: &Value,
        context: &mut ExecutionContext,
        results: &mut StageResults,
    ) -> Result<Option<Value>, PipelineError> {
        let caller = token.holder().clone();
        context.begin_attempt(action);
        let outcome = self.gate.invoke(&caller, token, action, params).await;
        context.take_in_flight();
        match outcome {
            Ok(value) => {
                context.record_audit(
                    kind.name(),
                    action.to_string(),
                    AuditStatus::Executed,
                    json!({ "token_id": token.token_id(), "result": value }),
                );
                Ok(Some(value))
            }
            Err(err) if err.is_action_local() => {
                context.record_blocked(kind, action, &err);
                results.blocked.push(action.clone());
                Ok(None)
            }
            Err(err) => {
                context.record_audit(
                    kind.name(),
                    action.to_string(),
                    AuditStatus::Failed,
                    json!({ "error": err.kind().name(), "reason": err.to_string() }),
                );
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::FraudStage;
    use crate::types::{ExecutionMode, MediaType, SessionId};
    use finguard_capability::mocks::MockCapabilityService;
    use finguard_capability::ServiceCallPolicy;
    use std::sync::Arc;
    use std::time::Duration;

    fn gate(service: MockCapabilityService) -> InvocationGate {
        InvocationGate::new(
            Arc::new(service),
            ServiceCallPolicy {
                timeout: Duration::from_millis(100),
                retry_once: true,
                retry_backoff: Duration::from_millis(1),
            },
        )
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new(SessionId::generate(), ExecutionMode::Command, MediaType::Text)
    }

    fn request() -> SessionRequest {
        SessionRequest::new("Regular bank transfer", MediaType::Text, ExecutionMode::Command)
    }

    #[tokio::test]
    async fn runs_every_step_and_decides() {
        let mut gate = gate(
            MockCapabilityService::new()
                .respond("fraud_agent/detect_deepfakes", json!({"confidence": 0.9})),
        );
        let mut ctx = context();
        let run = StageRunner::new(&mut gate, 3600)
            .execute(&FraudStage::default(), &request(), &mut ctx, None)
            .await;

        assert!(!run.report.is_degraded());
        assert!(run.authority.is_some());
        assert!(run.proposed_scope.is_some());
        assert_eq!(run.machine.state(), crate::flow::StageState::DecisionMade);
        // TOKEN_ISSUED + two executed steps
        assert_eq!(ctx.audit_trail().len(), 3);
        assert!(ctx.errors().is_empty());
    }

    #[tokio::test]
    async fn service_failure_aborts_with_degraded_report() {
        let mut gate = gate(MockCapabilityService::new().fail("fraud_agent/detect_deepfakes", "503"));
        let mut ctx = context();
        let run = StageRunner::new(&mut gate, 3600)
            .execute(&FraudStage::default(), &request(), &mut ctx, None)
            .await;

        assert!(run.report.is_degraded());
        assert!(run.authority.is_none());
        assert_eq!(ctx.errors().len(), 1);
        assert_eq!(
            ctx.audit_trail().last().map(|e| e.status),
            Some(AuditStatus::Failed)
        );
        assert_eq!(run.machine.state(), crate::flow::StageState::Terminal);
    }

    #[tokio::test]
    async fn received_delegation_is_read_before_own_steps() {
        use crate::stages::RiskStage;
        use finguard_capability::{AgentId, DelegationManager, Plan, Step, TokenIssuer};

        let fraud = FraudStage::default();
        let plan = Plan::new("detect").step(Step::new("fraud_agent", "detect_deepfakes"));
        let parent = TokenIssuer::new()
            .issue(&fraud.profile().id, &plan, &fraud.profile().policy, 3600)
            .unwrap();
        let scope = crate::stages::scope(StageKind::Fraud, &["detect_deepfakes"]);
        let delegation = DelegationManager::new()
            .delegate(&parent, &AgentId::new("risk_agent"), 1800, scope)
            .unwrap();

        let mut gate = gate(MockCapabilityService::new().respond(
            "fraud_agent/detect_deepfakes",
            json!({"confidence": 0.9}),
        ));
        let mut ctx = context();
        let run = StageRunner::new(&mut gate, 3600)
            .execute(&RiskStage::default(), &request(), &mut ctx, Some(&delegation))
            .await;

        let risk = run.report.as_risk().unwrap();
        assert!(risk.evidence.contains_key("fraud_agent/detect_deepfakes"));
        assert_eq!(ctx.audit_trail()[1].action, "fraud_agent/detect_deepfakes");
        assert_eq!(run.authority.unwrap().token_id(), delegation.token.token_id());
    }

    #[tokio::test]
    async fn delegation_for_another_stage_is_refused() {
        use finguard_capability::{AgentId, DelegationManager, Plan, Step, TokenIssuer};

        let fraud = FraudStage::default();
        let plan = Plan::new("detect").step(Step::new("fraud_agent", "detect_deepfakes"));
        let parent = TokenIssuer::new()
            .issue(&fraud.profile().id, &plan, &fraud.profile().policy, 3600)
            .unwrap();
        let scope = crate::stages::scope(StageKind::Fraud, &["detect_deepfakes"]);
        let delegation = DelegationManager::new()
            .delegate(&parent, &AgentId::new("compliance_agent"), 1800, scope)
            .unwrap();

        let mut gate = gate(MockCapabilityService::new());
        let mut ctx = context();
        let run = StageRunner::new(&mut gate, 3600)
            .execute(&crate::stages::RiskStage::default(), &request(), &mut ctx, Some(&delegation))
            .await;

        assert!(run.report.is_degraded());
        assert_eq!(ctx.errors()[0].error, crate::error::ErrorClass::Verification);
        assert!(run.authority.is_none());
    }
}
