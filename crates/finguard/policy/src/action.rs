use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Normalized `namespace/action` key.
///
/// Keys are trimmed and lowercased on construction so that policy matching
/// never depends on caller formatting.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionKey {
    namespace: String,
    action: String,
}

impl ActionKey {
    pub fn new(namespace: &str, action: &str) -> Result<Self, PolicyError> {
        let namespace = normalize_segment(namespace);
        let action = normalize_segment(action);
        let raw = format!("{namespace}/{action}");

        if namespace.is_empty() {
            return Err(PolicyError::action_key(&raw, "empty namespace"));
        }
        if action.is_empty() {
            return Err(PolicyError::action_key(&raw, "empty action"));
        }
        if namespace.contains('/') || action.contains('/') {
            return Err(PolicyError::action_key(&raw, "expected exactly one '/'"));
        }
        if namespace.contains('*') || action.contains('*') {
            return Err(PolicyError::action_key(&raw, "wildcards are not allowed in keys"));
        }

        Ok(Self { namespace, action })
    }

    /// Parse a `namespace/action` string.
    pub fn parse(raw: &str) -> Result<Self, PolicyError> {
        let (namespace, action) = raw
            .trim()
            .split_once('/')
            .ok_or_else(|| PolicyError::action_key(raw, "missing '/' separator"))?;
        Self::new(namespace, action)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

fn normalize_segment(segment: &str) -> String {
    segment.trim().to_ascii_lowercase()
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.action)
    }
}

impl FromStr for ActionKey {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ActionKey {
    type Error = PolicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ActionKey> for String {
    fn from(key: ActionKey) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        let key = ActionKey::parse("  Fraud_Agent/Detect_Deepfakes ").unwrap();
        assert_eq!(key.namespace(), "fraud_agent");
        assert_eq!(key.action(), "detect_deepfakes");
        assert_eq!(key.to_string(), "fraud_agent/detect_deepfakes");
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(ActionKey::parse("no-separator").is_err());
        assert!(ActionKey::parse("/action").is_err());
        assert!(ActionKey::parse("ns/").is_err());
        assert!(ActionKey::parse("a/b/c").is_err());
        assert!(ActionKey::parse("ns/*").is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let key = ActionKey::parse("risk_agent/assess_impact").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"risk_agent/assess_impact\"");
        let back: ActionKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
