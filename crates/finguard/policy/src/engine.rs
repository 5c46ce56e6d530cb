use serde::{Deserialize, Serialize};

use crate::action::ActionKey;
use crate::policy::Policy;

/// Outcome of evaluating a single action against a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Authorization {
    Allowed,
    Denied(DenialReason),
}

impl Authorization {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialReason {
    DenyListMatch { pattern: String },
    NotInAllowList,
}

impl DenialReason {
    /// Short machine-stable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::DenyListMatch { .. } => "deny-list match",
            Self::NotInAllowList => "not in allow-list",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DenyListMatch { pattern } => write!(f, "deny-list match ({pattern})"),
            Self::NotInAllowList => write!(f, "not in allow-list"),
        }
    }
}

/// Evaluate `action` under `policy`.
///
/// Deny rules are consulted first and always win.
pub fn authorize(policy: &Policy, action: &ActionKey) -> Authorization {
    if let Some(matcher) = policy.deny_matchers().find(|m| m.matches(action)) {
        return Authorization::Denied(DenialReason::DenyListMatch {
            pattern: matcher.to_string(),
        });
    }

    if policy.allow_matchers().any(|m| m.matches(action)) {
        Authorization::Allowed
    } else {
        Authorization::Denied(DenialReason::NotInAllowList)
    }
}
