use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use finguard_policy::{authorize, ActionKey, Authorization, Policy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::CapabilityError;
use crate::plan::{Plan, PlanFingerprint};

/// Stable identity of a stage agent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Plan-scoped, expiring authorization.
///
/// Immutable once issued. `plan_actions` is everything the originating plan
/// declared; `allowed_actions` is the subset the policy accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityToken {
    token_id: String,
    holder: AgentId,
    plan_fingerprint: PlanFingerprint,
    plan_actions: BTreeSet<ActionKey>,
    allowed_actions: BTreeSet<ActionKey>,
    policy: Policy,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    lineage: Vec<String>,
}

impl CapabilityToken {
    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn holder(&self) -> &AgentId {
        &self.holder
    }

    pub fn plan_fingerprint(&self) -> &PlanFingerprint {
        &self.plan_fingerprint
    }

    pub fn plan_actions(&self) -> &BTreeSet<ActionKey> {
        &self.plan_actions
    }

    pub fn allowed_actions(&self) -> &BTreeSet<ActionKey> {
        &self.allowed_actions
    }

    /// Policy snapshot the token was issued under.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Ancestor token ids, root first. Empty for root tokens.
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    pub fn is_delegated(&self) -> bool {
        !self.lineage.is_empty()
    }

    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn ensure_unexpired(&self, at: DateTime<Utc>) -> Result<(), CapabilityError> {
        if self.is_expired_at(at) {
            return Err(CapabilityError::TokenExpired {
                token_id: self.token_id.clone(),
                expired_at: self.expires_at,
            });
        }
        Ok(())
    }

    /// Recompute the plan fingerprint and compare.
    pub fn verify_plan(&self, plan: &Plan) -> Result<(), CapabilityError> {
        let fingerprint = plan.fingerprint()?;
        if fingerprint != self.plan_fingerprint {
            return Err(CapabilityError::verification(
                &plan.goal,
                format!(
                    "plan fingerprint mismatch (token {}, plan {})",
                    self.plan_fingerprint.short(),
                    fingerprint.short()
                ),
            ));
        }
        Ok(())
    }

    /// Derive a narrower token for `delegate`. Scope and expiry are checked by
    /// the delegation manager before calling this.
    pub(crate) fn derive(
        &self,
        delegate: AgentId,
        allowed_actions: BTreeSet<ActionKey>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let mut lineage = self.lineage.clone();
        lineage.push(self.token_id.clone());
        Self {
            token_id: uuid::Uuid::new_v4().to_string(),
            holder: delegate,
            plan_fingerprint: self.plan_fingerprint.clone(),
            plan_actions: allowed_actions.clone(),
            allowed_actions,
            policy: self.policy.clone(),
            issued_at,
            expires_at,
            lineage,
        }
    }
}

pub(crate) fn expiry_after(
    start: DateTime<Utc>,
    validity_seconds: u64,
) -> Result<DateTime<Utc>, String> {
    i64::try_from(validity_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|d| start.checked_add_signed(d))
        .ok_or_else(|| format!("validity of {validity_seconds}s is out of range"))
}

/// Issues root tokens from a plan and the holder's policy.
#[derive(Debug, Clone, Default)]
pub struct TokenIssuer;

impl TokenIssuer {
    pub fn new() -> Self {
        Self
    }

    pub fn issue(
        &self,
        holder: &AgentId,
        plan: &Plan,
        policy: &Policy,
        validity_seconds: u64,
    ) -> Result<CapabilityToken, CapabilityError> {
        let declared = plan.validate()?;
        let fingerprint = plan.fingerprint()?;

        let mut allowed = BTreeSet::new();
        for action in &declared {
            match authorize(policy, action) {
                Authorization::Allowed => {
                    allowed.insert(action.clone());
                }
                Authorization::Denied(reason) => {
                    debug!(
                        holder = %holder,
                        action = %action,
                        reason = %reason,
                        "Plan step filtered by policy"
                    );
                }
            }
        }

        if allowed.is_empty() {
            warn!(holder = %holder, policy = policy.name(), "No plan step survived policy");
            return Err(CapabilityError::Authorization {
                holder: holder.to_string(),
                reason: format!(
                    "none of {} declared action(s) allowed by policy '{}'",
                    declared.len(),
                    policy.name()
                ),
            });
        }

        let issued_at = Utc::now();
        let expires_at = expiry_after(issued_at, validity_seconds)
            .map_err(CapabilityError::PlanValidation)?;

        let token = CapabilityToken {
            token_id: uuid::Uuid::new_v4().to_string(),
            holder: holder.clone(),
            plan_fingerprint: fingerprint,
            plan_actions: declared.into_iter().collect(),
            allowed_actions: allowed,
            policy: policy.clone(),
            issued_at,
            expires_at,
            lineage: Vec::new(),
        };

        info!(
            token_id = %token.token_id,
            holder = %holder,
            plan = token.plan_fingerprint.short(),
            allowed = token.allowed_actions.len(),
            expires_at = %token.expires_at,
            "Capability token issued"
        );

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Step;

    fn fraud_policy() -> Policy {
        Policy::from_patterns("fraud_agent", ["fraud_agent/*"], ["risk_agent/*"]).unwrap()
    }

    fn plan() -> Plan {
        Plan::new("detect fraud")
            .step(Step::new("fraud_agent", "detect_deepfakes"))
            .step(Step::new("fraud_agent", "analyze_anomalies"))
            .step(Step::new("risk_agent", "calculate_risk_score"))
    }

    #[test]
    fn allowed_actions_are_plan_intersect_policy() {
        let holder = AgentId::new("fraud_agent");
        let token = TokenIssuer::new()
            .issue(&holder, &plan(), &fraud_policy(), 3600)
            .unwrap();

        assert_eq!(token.plan_actions().len(), 3);
        assert_eq!(token.allowed_actions().len(), 2);
        assert!(token
            .allowed_actions()
            .contains(&ActionKey::parse("fraud_agent/detect_deepfakes").unwrap()));
        assert!(!token
            .allowed_actions()
            .contains(&ActionKey::parse("risk_agent/calculate_risk_score").unwrap()));
        assert!(token.allowed_actions().is_subset(token.plan_actions()));
        assert_eq!(token.expires_at() - token.issued_at(), Duration::seconds(3600));
        assert!(!token.is_delegated());
    }

    #[test]
    fn rejects_plan_with_no_surviving_action() {
        let plan = Plan::new("escalate").step(Step::new("risk_agent", "calculate_risk_score"));
        let err = TokenIssuer::new()
            .issue(&AgentId::new("fraud_agent"), &plan, &fraud_policy(), 60)
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Authorization { .. }));
    }

    #[test]
    fn rejects_invalid_plan_before_policy() {
        let err = TokenIssuer::new()
            .issue(&AgentId::new("fraud_agent"), &Plan::new("empty"), &fraud_policy(), 60)
            .unwrap_err();
        assert!(matches!(err, CapabilityError::PlanValidation(_)));
    }

    #[test]
    fn verify_plan_detects_tampering() {
        let token = TokenIssuer::new()
            .issue(&AgentId::new("fraud_agent"), &plan(), &fraud_policy(), 60)
            .unwrap();
        assert!(token.verify_plan(&plan()).is_ok());

        let tampered = plan().step(Step::new("fraud_agent", "exfiltrate"));
        assert!(matches!(
            token.verify_plan(&tampered),
            Err(CapabilityError::Verification { .. })
        ));
    }

    #[test]
    fn zero_validity_token_is_immediately_expired() {
        let token = TokenIssuer::new()
            .issue(&AgentId::new("fraud_agent"), &plan(), &fraud_policy(), 0)
            .unwrap();
        assert!(token.is_expired());
        assert!(matches!(
            token.ensure_unexpired(Utc::now()),
            Err(CapabilityError::TokenExpired { .. })
        ));
    }
}
