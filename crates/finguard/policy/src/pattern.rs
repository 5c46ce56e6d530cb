use std::fmt;

use serde::{Deserialize, Serialize};

use crate::action::ActionKey;
use crate::error::PolicyError;

/// Compiled glob over `namespace/action` keys.
///
/// Supported forms: `*`, `*/*`, `ns/*`, `*/action`, `ns/prefix*`, `ns/action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Matcher {
    Any,
    Namespace(String),
    ActionInAnyNamespace(String),
    ActionPrefix { namespace: String, prefix: String },
    Exact(ActionKey),
}

impl Matcher {
    pub fn compile(pattern: &str) -> Result<Self, PolicyError> {
        let normalized = pattern.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(PolicyError::pattern(pattern, "empty pattern"));
        }
        if normalized == "*" || normalized == "*/*" {
            return Ok(Self::Any);
        }

        let (namespace, action) = normalized
            .split_once('/')
            .ok_or_else(|| PolicyError::pattern(pattern, "missing '/' separator"))?;

        if namespace.is_empty() || action.is_empty() || action.contains('/') {
            return Err(PolicyError::pattern(pattern, "expected 'namespace/action'"));
        }

        if namespace == "*" {
            if action.contains('*') {
                return Err(PolicyError::pattern(
                    pattern,
                    "action wildcard not supported with namespace wildcard",
                ));
            }
            return Ok(Self::ActionInAnyNamespace(action.to_string()));
        }
        if namespace.contains('*') {
            return Err(PolicyError::pattern(
                pattern,
                "namespace wildcard must be the whole segment",
            ));
        }

        if action == "*" {
            return Ok(Self::Namespace(namespace.to_string()));
        }

        match action.find('*') {
            Some(idx) if idx == action.len() - 1 => Ok(Self::ActionPrefix {
                namespace: namespace.to_string(),
                prefix: action[..idx].to_string(),
            }),
            Some(_) => Err(PolicyError::pattern(
                pattern,
                "wildcard only allowed as trailing character",
            )),
            None => Ok(Self::Exact(ActionKey::new(namespace, action)?)),
        }
    }

    pub fn matches(&self, key: &ActionKey) -> bool {
        match self {
            Self::Any => true,
            Self::Namespace(ns) => key.namespace() == ns,
            Self::ActionInAnyNamespace(action) => key.action() == action,
            Self::ActionPrefix { namespace, prefix } => {
                key.namespace() == namespace && key.action().starts_with(prefix.as_str())
            }
            Self::Exact(exact) => exact == key,
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Namespace(ns) => write!(f, "{ns}/*"),
            Self::ActionInAnyNamespace(action) => write!(f, "*/{action}"),
            Self::ActionPrefix { namespace, prefix } => write!(f, "{namespace}/{prefix}*"),
            Self::Exact(key) => write!(f, "{key}"),
        }
    }
}

impl TryFrom<String> for Matcher {
    type Error = PolicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::compile(&value)
    }
}

impl From<Matcher> for String {
    fn from(matcher: Matcher) -> Self {
        matcher.to_string()
    }
}
