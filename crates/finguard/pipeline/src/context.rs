use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use finguard_capability::CapabilityError;
use finguard_policy::ActionKey;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{ErrorClass, PipelineError};
use crate::report::{FinalDecision, SessionReport, StageReport};
use crate::types::{ExecutionMode, MediaType, SessionId, StageKind};

/// Stage label used for entries the orchestrator itself records.
pub const ORCHESTRATOR: &str = "orchestrator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Executed,
    Blocked,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub stage: String,
    pub action: String,
    pub status: AuditStatus,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedAction {
    pub timestamp: DateTime<Utc>,
    pub stage: String,
    pub action: String,
    pub reason: String,
    pub error: ErrorClass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub stage: String,
    pub error: ErrorClass,
    pub message: String,
}

/// Session-scoped accumulator threaded through every stage by `&mut`.
#[derive(Debug)]
pub struct ExecutionContext {
    session_id: SessionId,
    mode: ExecutionMode,
    media_type: MediaType,
    started_at: DateTime<Utc>,
    audit_trail: Vec<AuditEntry>,
    blocked_actions: Vec<BlockedAction>,
    errors: Vec<ErrorRecord>,
    reports: BTreeMap<StageKind, StageReport>,
    in_flight: Option<ActionKey>,
}

impl ExecutionContext {
    pub fn new(session_id: SessionId, mode: ExecutionMode, media_type: MediaType) -> Self {
        Self {
            session_id,
            mode,
            media_type,
            started_at: Utc::now(),
            audit_trail: Vec::new(),
            blocked_actions: Vec::new(),
            errors: Vec::new(),
            reports: BTreeMap::new(),
            in_flight: None,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn audit_trail(&self) -> &[AuditEntry] {
        &self.audit_trail
    }

    pub fn blocked_actions(&self) -> &[BlockedAction] {
        &self.blocked_actions
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn report(&self, kind: StageKind) -> Option<&StageReport> {
        self.reports.get(&kind)
    }

    pub fn reports(&self) -> impl Iterator<Item = &StageReport> {
        self.reports.values()
    }

    /// Next timestamp, clamped so the trail never goes backwards.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.audit_trail.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        }
    }

    pub fn record_audit(
        &mut self,
        stage: &str,
        action: impl Into<String>,
        status: AuditStatus,
        details: Value,
    ) -> &AuditEntry {
        let entry = AuditEntry {
            sequence: self.audit_trail.len() as u64 + 1,
            timestamp: self.next_timestamp(),
            stage: stage.to_string(),
            action: action.into(),
            status,
            details,
        };
        debug!(
            session_id = %self.session_id,
            stage,
            action = %entry.action,
            status = ?status,
            "Audit entry recorded"
        );
        self.audit_trail.push(entry);
        &self.audit_trail[self.audit_trail.len() - 1]
    }

    /// Mark an invocation as started. The slot stays set until the attempt
    /// is audited, so an attempt dropped mid-call can still be recorded.
    pub fn begin_attempt(&mut self, action: &ActionKey) {
        self.in_flight = Some(action.clone());
    }

    /// Clear and return the invocation that has not been audited yet.
    pub fn take_in_flight(&mut self) -> Option<ActionKey> {
        self.in_flight.take()
    }

    /// Record a rejected invocation: one BLOCKED audit entry plus a blocked action.
    pub fn record_blocked(&mut self, stage: StageKind, action: &ActionKey, error: &CapabilityError) {
        warn!(
            session_id = %self.session_id,
            stage = stage.name(),
            action = %action,
            error = %error,
            "Action blocked"
        );
        let class = ErrorClass::from(error.kind());
        let entry = self.record_audit(
            stage.name(),
            action.to_string(),
            AuditStatus::Blocked,
            json!({ "error": error.kind().name(), "reason": error.to_string() }),
        );
        let timestamp = entry.timestamp;
        self.blocked_actions.push(BlockedAction {
            timestamp,
            stage: stage.name().to_string(),
            action: action.to_string(),
            reason: error.to_string(),
            error: class,
        });
    }

    pub fn record_error(&mut self, stage: &str, error: &PipelineError) {
        warn!(
            session_id = %self.session_id,
            stage,
            error = %error,
            "Stage error recorded"
        );
        self.errors.push(ErrorRecord {
            timestamp: Utc::now(),
            stage: stage.to_string(),
            error: error.class(),
            message: error.to_string(),
        });
    }

    /// Append a stage report. A stage reports at most once per session.
    pub fn add_report(&mut self, report: StageReport) -> Result<(), PipelineError> {
        let kind = report.kind();
        if self.reports.contains_key(&kind) {
            return Err(PipelineError::stage_order(
                "first report",
                &format!("duplicate {} report", kind.name()),
            ));
        }
        self.reports.insert(kind, report);
        Ok(())
    }

    /// Consume the context into the caller-facing report.
    pub fn into_session_report(
        self,
        final_decision: FinalDecision,
        overridden_from: Option<FinalDecision>,
    ) -> SessionReport {
        SessionReport {
            session_id: self.session_id,
            mode: self.mode,
            media_type: self.media_type,
            final_decision,
            overridden_from,
            stage_reports: self
                .reports
                .into_iter()
                .map(|(kind, report)| (kind.name().to_string(), report))
                .collect(),
            audit_trail: self.audit_trail,
            blocked_actions: self.blocked_actions,
            errors: self.errors,
            started_at: self.started_at,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{FraudReport, FraudVerdict};

    fn context() -> ExecutionContext {
        ExecutionContext::new(SessionId::generate(), ExecutionMode::Command, MediaType::Text)
    }

    fn fraud_report() -> StageReport {
        StageReport::Fraud(FraudReport {
            verdict: FraudVerdict::Safe,
            confidence: 0.1,
            anomaly_count: 0,
            detection: Value::Null,
            anomalies: Value::Null,
            escalate_to_risk: false,
            error: None,
        })
    }

    #[test]
    fn audit_sequence_and_timestamps_are_monotonic() {
        let mut ctx = context();
        for i in 0..20 {
            ctx.record_audit("fraud_agent", format!("step_{i}"), AuditStatus::Executed, json!({}));
        }
        let trail = ctx.audit_trail();
        assert!(trail.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert!(trail.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(trail[0].sequence, 1);
    }

    #[test]
    fn blocked_action_produces_exactly_one_audit_entry() {
        let mut ctx = context();
        let action = ActionKey::parse("risk_agent/calculate_risk_score").unwrap();
        let err = CapabilityError::policy_violation(&action, "deny-list match (risk_agent/*)");

        ctx.record_blocked(StageKind::Fraud, &action, &err);

        assert_eq!(ctx.audit_trail().len(), 1);
        assert_eq!(ctx.audit_trail()[0].status, AuditStatus::Blocked);
        assert_eq!(ctx.blocked_actions().len(), 1);
        assert_eq!(ctx.blocked_actions()[0].error, ErrorClass::PolicyViolation);
        assert_eq!(ctx.blocked_actions()[0].action, "risk_agent/calculate_risk_score");
    }

    #[test]
    fn in_flight_attempt_is_taken_once() {
        let mut ctx = context();
        let action = ActionKey::parse("fraud_agent/detect_deepfakes").unwrap();
        assert!(ctx.take_in_flight().is_none());

        ctx.begin_attempt(&action);
        assert_eq!(ctx.take_in_flight(), Some(action));
        assert!(ctx.take_in_flight().is_none());
    }

    #[test]
    fn reports_are_append_once() {
        let mut ctx = context();
        assert!(ctx.add_report(fraud_report()).is_ok());
        assert!(matches!(
            ctx.add_report(fraud_report()),
            Err(PipelineError::StageOrder { .. })
        ));
    }

    #[test]
    fn session_report_keys_by_agent_name() {
        let mut ctx = context();
        ctx.add_report(fraud_report()).unwrap();
        let report = ctx.into_session_report(FinalDecision::SafeApproved, None);
        assert!(report.stage_reports.contains_key("fraud_agent"));
        assert!(report.fraud().is_some());
        assert!(report.risk().is_none());
        assert!(report.completed_at >= report.started_at);
    }
}
