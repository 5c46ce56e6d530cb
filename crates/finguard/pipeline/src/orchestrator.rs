//! Session orchestration.
//!
//! The orchestrator drives one session through Fraud, then Risk and
//! Compliance while escalation continues, and always closes with
//! MemoryConsolidation. It never fails outward: every run yields a
//! [`SessionReport`], degraded where stages could not complete.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use finguard_capability::{
    CapabilityService, CapabilityToken, Delegation, DelegationManager, InvocationGate,
};
use finguard_policy::ActionKey;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::confirmation::{
    AutoApprove, ConfirmationHandler, EscalationProposal, EscalationVerdict, FinalVerdict,
};
use crate::context::{AuditStatus, ExecutionContext, ORCHESTRATOR};
use crate::decision::{DecisionInputs, DecisionRules, EscalationRoutes};
use crate::error::PipelineError;
use crate::report::{FinalDecision, SessionReport, StageReport};
use crate::runner::{StageRun, StageRunner};
use crate::stages::{ComplianceStage, FraudStage, MemoryConsolidationStage, RiskStage, Stage};
use crate::types::{ExecutionMode, MediaType, SessionId, SessionRequest, StageKind};

/// Create a linked cancellation pair for [`Orchestrator::run_with_cancellation`].
pub fn cancellation() -> (CancellationHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancellationHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

#[derive(Debug, Clone)]
pub struct CancellationHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the handle
    /// was dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Sequences the stages of a session. Cheap to clone; share one per process.
#[derive(Clone)]
pub struct Orchestrator {
    service: Arc<dyn CapabilityService>,
    config: PipelineConfig,
    stages: BTreeMap<StageKind, Arc<dyn Stage>>,
    routes: EscalationRoutes,
    rules: DecisionRules,
    confirmation: Arc<dyn ConfirmationHandler>,
    delegations: DelegationManager,
}

pub struct OrchestratorBuilder {
    service: Arc<dyn CapabilityService>,
    config: PipelineConfig,
    stages: BTreeMap<StageKind, Arc<dyn Stage>>,
    rules: Option<DecisionRules>,
    confirmation: Arc<dyn ConfirmationHandler>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn confirmation(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = handler;
        self
    }

    /// Replace the default implementation for the stage's kind.
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.insert(stage.kind(), stage);
        self
    }

    pub fn rules(mut self, rules: DecisionRules) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn build(self) -> Result<Orchestrator, PipelineError> {
        self.config.validate()?;
        let config = self.config;

        Ok(Orchestrator {
            service: self.service,
            rules: self
                .rules
                .unwrap_or_else(|| DecisionRules::standard(&config.risk)),
            config,
            stages: self.stages,
            routes: EscalationRoutes::default(),
            confirmation: self.confirmation,
            delegations: DelegationManager::new(),
        })
    }
}

impl Orchestrator {
    pub fn builder(service: Arc<dyn CapabilityService>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            service,
            config: PipelineConfig::default(),
            stages: BTreeMap::new(),
            rules: None,
            confirmation: Arc::new(AutoApprove),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Parse the string-typed boundary and run one session.
    pub async fn run(
        &self,
        input: &str,
        media_type: &str,
        mode: &str,
        metadata: Value,
    ) -> Result<SessionReport, PipelineError> {
        let media_type: MediaType = media_type.parse()?;
        let mode: ExecutionMode = mode.parse()?;
        let request = SessionRequest::new(input, media_type, mode).with_metadata(metadata);
        Ok(self.run_request(request).await)
    }

    pub async fn run_request(&self, request: SessionRequest) -> SessionReport {
        self.run_with_cancellation(request, CancelSignal::never()).await
    }

    pub async fn run_with_cancellation(
        &self,
        request: SessionRequest,
        mut cancel: CancelSignal,
    ) -> SessionReport {
        let mut context = ExecutionContext::new(SessionId::generate(), request.mode, request.media_type);
        let mut gate = InvocationGate::new(self.service.clone(), self.config.service.call_policy());
        info!(
            session_id = %context.session_id(),
            mode = %request.mode,
            media_type = %request.media_type,
            "Session started"
        );

        let mut next = Some(StageKind::Fraud);
        let mut received: Option<Delegation> = None;
        let mut cancelled = false;

        while let Some(kind) = next.take() {
            let stage = self.stage(kind);
            let run = {
                let mut runner = StageRunner::new(&mut gate, self.config.tokens.validity_secs);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    run = runner.execute(stage.as_ref(), &request, &mut context, received.as_ref()) => Some(run),
                }
            };

            let Some(run) = run else {
                let err = PipelineError::Cancelled(format!("session cancelled during {kind}"));
                warn!(session_id = %context.session_id(), stage = kind.name(), "Session cancelled");
                if let Some(action) = context.take_in_flight() {
                    context.record_audit(
                        kind.name(),
                        action.to_string(),
                        AuditStatus::Failed,
                        json!({ "error": err.class(), "reason": err.to_string() }),
                    );
                }
                context.record_error(kind.name(), &err);
                let report = stage.degraded(&err.to_string(), &context);
                self.store_report(&mut context, report);
                cancelled = true;
                break;
            };

            let successor = self.routes.successor(kind);
            let delegation = self.settle(&mut context, kind, successor, run).await;
            next = delegation.as_ref().and(successor);
            received = delegation;
        }

        let proposed = self.rules.resolve(&DecisionInputs::from_context(&context));
        let (final_decision, overridden_from) = if cancelled {
            (proposed, None)
        } else {
            self.confirm_final(&mut context, proposed).await
        };
        context.record_audit(
            ORCHESTRATOR,
            "FINAL_DECISION",
            AuditStatus::Executed,
            json!({ "decision": final_decision, "overridden_from": overridden_from }),
        );

        self.consolidate(&mut context, &request, &mut gate).await;

        let report = context.into_session_report(final_decision, overridden_from);
        info!(
            session_id = %report.session_id,
            final_decision = %report.final_decision,
            stages = report.stage_reports.len(),
            blocked = report.blocked_actions.len(),
            errors = report.errors.len(),
            "Session completed"
        );
        report
    }

    fn stage(&self, kind: StageKind) -> Arc<dyn Stage> {
        self.stages
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| default_stage(kind, &self.config))
    }

    /// Record a stage's report and delegate onward if it proposed escalation.
    async fn settle(
        &self,
        context: &mut ExecutionContext,
        kind: StageKind,
        successor: Option<StageKind>,
        run: StageRun,
    ) -> Option<Delegation> {
        let StageRun {
            mut report,
            mut machine,
            authority,
            proposed_scope,
        } = run;

        let mut delegation = None;
        if let (Some(scope), Some(to), Some(authority)) = (proposed_scope, successor, authority) {
            if self.escalation_confirmed(context, kind, to, &scope, &report).await {
                match self.delegate(context, kind, to, &authority, scope) {
                    Ok(created) => {
                        if let Err(err) = machine.mark_delegated() {
                            context.record_error(kind.name(), &err);
                        }
                        delegation = Some(created);
                    }
                    Err(err) => {
                        warn!(
                            session_id = %context.session_id(),
                            stage = kind.name(),
                            error = %err,
                            "Delegation failed, stage degraded"
                        );
                        context.record_error(kind.name(), &err);
                        if let Err(order) = machine.abort() {
                            context.record_error(kind.name(), &order);
                        }
                        report = self.stage(kind).degraded(&err.to_string(), context);
                    }
                }
            }
        }

        if !machine.state().is_final() {
            if let Err(err) = machine.mark_terminal() {
                context.record_error(kind.name(), &err);
            }
        }
        report.set_escalated(delegation.is_some());
        self.store_report(context, report);
        delegation
    }

    async fn escalation_confirmed(
        &self,
        context: &mut ExecutionContext,
        from: StageKind,
        to: StageKind,
        scope: &BTreeSet<ActionKey>,
        report: &StageReport,
    ) -> bool {
        if context.mode() != ExecutionMode::Ask {
            return true;
        }
        let proposal = EscalationProposal {
            session_id: context.session_id().clone(),
            from,
            to,
            scope: scope.iter().map(ToString::to_string).collect(),
            report: serde_json::to_value(report).unwrap_or_default(),
        };
        match self.confirmation.confirm_escalation(&proposal).await {
            EscalationVerdict::Proceed => true,
            EscalationVerdict::Block { rationale } => {
                info!(
                    session_id = %context.session_id(),
                    from = from.name(),
                    to = to.name(),
                    %rationale,
                    "Escalation blocked by confirmation"
                );
                context.record_audit(
                    from.name(),
                    "USER_OVERRIDE",
                    AuditStatus::Executed,
                    json!({
                        "override": "ESCALATION_BLOCKED",
                        "to": to.name(),
                        "scope": proposal.scope,
                        "rationale": rationale,
                    }),
                );
                false
            }
        }
    }

    fn delegate(
        &self,
        context: &mut ExecutionContext,
        from: StageKind,
        to: StageKind,
        authority: &CapabilityToken,
        scope: BTreeSet<ActionKey>,
    ) -> Result<Delegation, PipelineError> {
        let delegate = self.stage(to).profile().id.clone();
        // A re-delegated token may not outlive the one it was narrowed from.
        let remaining = (authority.expires_at() - Utc::now())
            .num_seconds()
            .saturating_sub(1)
            .max(0) as u64;
        let validity = self.config.tokens.delegation_validity_secs.min(remaining);
        let delegation = self
            .delegations
            .delegate(authority, &delegate, validity, scope)?;
        context.record_audit(
            from.name(),
            "DELEGATION_CREATED",
            AuditStatus::Executed,
            json!({
                "delegation_id": delegation.delegation_id,
                "delegate": delegation.delegate,
                "allowed_actions": delegation.allowed_actions(),
                "lineage": delegation.token.lineage(),
                "expires_at": delegation.expires_at(),
            }),
        );
        info!(
            session_id = %context.session_id(),
            from = from.name(),
            to = to.name(),
            delegation_id = %delegation.delegation_id,
            "Escalated to next stage"
        );
        Ok(delegation)
    }

    async fn confirm_final(
        &self,
        context: &mut ExecutionContext,
        proposed: FinalDecision,
    ) -> (FinalDecision, Option<FinalDecision>) {
        if context.mode() != ExecutionMode::Ask {
            return (proposed, None);
        }
        match self
            .confirmation
            .confirm_final(context.session_id(), proposed)
            .await
        {
            FinalVerdict::Accept => (proposed, None),
            // Overriding with the proposed decision is a plain accept.
            FinalVerdict::Override { decision, .. } if decision == proposed => (proposed, None),
            FinalVerdict::Override { decision, rationale } => {
                info!(
                    session_id = %context.session_id(),
                    %proposed,
                    %decision,
                    "Final decision overridden"
                );
                context.record_audit(
                    ORCHESTRATOR,
                    "USER_OVERRIDE",
                    AuditStatus::Executed,
                    json!({
                        "override": "FINAL_DECISION",
                        "proposed": proposed,
                        "decision": decision,
                        "rationale": rationale,
                    }),
                );
                (decision, Some(proposed))
            }
        }
    }

    /// MemoryConsolidation runs unconditionally and is not cancellable.
    async fn consolidate(
        &self,
        context: &mut ExecutionContext,
        request: &SessionRequest,
        gate: &mut InvocationGate,
    ) {
        let stage = self.stage(StageKind::MemoryConsolidation);
        let run = StageRunner::new(gate, self.config.tokens.validity_secs)
            .execute(stage.as_ref(), request, context, None)
            .await;
        self.settle(context, StageKind::MemoryConsolidation, None, run)
            .await;
    }

    fn store_report(&self, context: &mut ExecutionContext, report: StageReport) {
        let kind = report.kind();
        if let Err(err) = context.add_report(report) {
            context.record_error(kind.name(), &err);
        }
    }
}

fn default_stage(kind: StageKind, config: &PipelineConfig) -> Arc<dyn Stage> {
    match kind {
        StageKind::Fraud => Arc::new(FraudStage::new(config.fraud.clone())),
        StageKind::Risk => Arc::new(RiskStage::new(config.risk.clone())),
        StageKind::Compliance => Arc::new(ComplianceStage::new()),
        StageKind::MemoryConsolidation => Arc::new(MemoryConsolidationStage::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finguard_capability::mocks::MockCapabilityService;
    use std::time::Duration;

    fn orchestrator(service: MockCapabilityService) -> Orchestrator {
        Orchestrator::builder(Arc::new(service)).build().unwrap()
    }

    #[tokio::test]
    async fn rejects_unknown_media_type_at_boundary() {
        let err = orchestrator(MockCapabilityService::new())
            .run("x", "hologram", "COMMAND", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidMediaType(_)));
    }

    #[tokio::test]
    async fn rejects_unknown_mode_at_boundary() {
        let err = orchestrator(MockCapabilityService::new())
            .run("x", "text", "maybe", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidMode(_)));
    }

    #[test]
    fn invalid_config_fails_build() {
        let mut config = PipelineConfig::default();
        config.risk.block_above = 10;
        let result = Orchestrator::builder(Arc::new(MockCapabilityService::new()))
            .config(config)
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancel_signal_fires_after_handle_cancels() {
        let (handle, mut signal) = cancellation();
        assert!(!signal.is_cancelled());
        handle.cancel();
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn never_signal_does_not_fire() {
        let mut signal = CancelSignal::never();
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn every_stage_ends_in_a_final_state() {
        let report = orchestrator(MockCapabilityService::new())
            .run("Regular bank transfer", "text", "command", Value::Null)
            .await
            .unwrap();
        assert_eq!(report.final_decision, FinalDecision::SafeApproved);
        assert!(report.memory().is_some());
        assert!(report.errors.is_empty());
        assert_eq!(
            report.audit_trail.last().map(|e| e.stage.as_str()),
            Some("memory_agent")
        );
    }
}
