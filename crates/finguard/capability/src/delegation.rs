use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use finguard_policy::ActionKey;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CapabilityError;
use crate::token::{expiry_after, AgentId, CapabilityToken};

/// Narrowed token handed from one stage to exactly one successor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub delegation_id: String,
    pub delegator: AgentId,
    pub delegate: AgentId,
    pub token: CapabilityToken,
    pub created_at: DateTime<Utc>,
}

impl Delegation {
    pub fn allowed_actions(&self) -> &BTreeSet<ActionKey> {
        self.token.allowed_actions()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.token.expires_at()
    }
}

/// Derives and validates delegations.
#[derive(Debug, Clone, Default)]
pub struct DelegationManager;

impl DelegationManager {
    pub fn new() -> Self {
        Self
    }

    /// Derive a delegation from `parent`.
    ///
    /// The requested scope must be a non-empty subset of the parent's allowed
    /// actions and the derived expiry may not outlive the parent.
    pub fn delegate(
        &self,
        parent: &CapabilityToken,
        delegate: &AgentId,
        validity_seconds: u64,
        allowed_actions: BTreeSet<ActionKey>,
    ) -> Result<Delegation, CapabilityError> {
        let now = Utc::now();

        if parent.is_expired_at(now) {
            return Err(CapabilityError::Delegation(format!(
                "parent token {} expired at {}",
                parent.token_id(),
                parent.expires_at()
            )));
        }

        if allowed_actions.is_empty() {
            return Err(CapabilityError::Delegation("empty delegation scope".into()));
        }

        if !allowed_actions.is_subset(parent.allowed_actions()) {
            let excess: Vec<String> = allowed_actions
                .difference(parent.allowed_actions())
                .map(ToString::to_string)
                .collect();
            warn!(
                delegator = %parent.holder(),
                delegate = %delegate,
                excess = ?excess,
                "Delegation scope exceeds parent token"
            );
            return Err(CapabilityError::Delegation(format!(
                "privilege escalation attempt: {} not held by delegator",
                excess.join(", ")
            )));
        }

        let expires_at = expiry_after(now, validity_seconds).map_err(CapabilityError::Delegation)?;
        if expires_at > parent.expires_at() {
            return Err(CapabilityError::Delegation(format!(
                "requested expiry {} outlives parent token expiry {}",
                expires_at,
                parent.expires_at()
            )));
        }

        let token = parent.derive(delegate.clone(), allowed_actions, now, expires_at);
        let delegation = Delegation {
            delegation_id: uuid::Uuid::new_v4().to_string(),
            delegator: parent.holder().clone(),
            delegate: delegate.clone(),
            token,
            created_at: now,
        };

        info!(
            delegation_id = %delegation.delegation_id,
            delegator = %delegation.delegator,
            delegate = %delegation.delegate,
            actions = delegation.allowed_actions().len(),
            depth = delegation.token.lineage().len(),
            "Delegation created"
        );

        Ok(delegation)
    }

    /// Validate a received delegation before the successor uses it.
    pub fn accept(&self, delegation: &Delegation, identity: &AgentId) -> Result<(), CapabilityError> {
        if &delegation.delegate != identity || delegation.token.holder() != identity {
            return Err(CapabilityError::verification(
                &delegation.delegation_id,
                format!(
                    "delegation bound to '{}', presented by '{}'",
                    delegation.delegate, identity
                ),
            ));
        }
        delegation.token.ensure_unexpired(Utc::now())
    }
}
