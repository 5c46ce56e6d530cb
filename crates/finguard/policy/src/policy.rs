use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::pattern::Matcher;

/// A single compiled policy rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyRule {
    Allow(Matcher),
    Deny(Matcher),
}

/// Static allow/deny rule set for one stage agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicyDocument", into = "PolicyDocument")]
pub struct Policy {
    name: String,
    rules: Vec<PolicyRule>,
    constraints: PolicyConstraints,
}

impl Policy {
    pub fn builder(name: impl Into<String>) -> PolicyBuilder {
        PolicyBuilder {
            name: name.into(),
            allow: Vec::new(),
            deny: Vec::new(),
            constraints: PolicyConstraints::default(),
        }
    }

    /// Build a policy from raw pattern lists.
    pub fn from_patterns<A, D>(name: impl Into<String>, allow: A, deny: D) -> Result<Self, PolicyError>
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        let mut builder = Self::builder(name);
        for pattern in allow {
            builder = builder.allow(pattern.as_ref());
        }
        for pattern in deny {
            builder = builder.deny(pattern.as_ref());
        }
        builder.build()
    }

    /// Allow every action in `own` and deny every action in `denied`.
    pub fn namespace_scoped(name: impl Into<String>, own: &str, denied: &[&str]) -> Self {
        let namespace = |ns: &str| Matcher::Namespace(ns.trim().to_ascii_lowercase());
        let mut rules: Vec<PolicyRule> = denied
            .iter()
            .map(|ns| PolicyRule::Deny(namespace(ns)))
            .collect();
        rules.push(PolicyRule::Allow(namespace(own)));
        Self {
            name: name.into(),
            rules,
            constraints: PolicyConstraints::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: PolicyConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn constraints(&self) -> &PolicyConstraints {
        &self.constraints
    }

    pub fn deny_matchers(&self) -> impl Iterator<Item = &Matcher> {
        self.rules.iter().filter_map(|rule| match rule {
            PolicyRule::Deny(m) => Some(m),
            PolicyRule::Allow(_) => None,
        })
    }

    pub fn allow_matchers(&self) -> impl Iterator<Item = &Matcher> {
        self.rules.iter().filter_map(|rule| match rule {
            PolicyRule::Allow(m) => Some(m),
            PolicyRule::Deny(_) => None,
        })
    }
}

/// Incremental policy construction; patterns are compiled in `build`.
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    name: String,
    allow: Vec<String>,
    deny: Vec<String>,
    constraints: PolicyConstraints,
}

impl PolicyBuilder {
    pub fn allow(mut self, pattern: impl Into<String>) -> Self {
        self.allow.push(pattern.into());
        self
    }

    pub fn deny(mut self, pattern: impl Into<String>) -> Self {
        self.deny.push(pattern.into());
        self
    }

    pub fn max_invocations(mut self, limit: u32) -> Self {
        self.constraints.max_invocations = Some(limit);
        self
    }

    pub fn active_hours(mut self, window: HourWindow) -> Self {
        self.constraints.active_hours = Some(window);
        self
    }

    pub fn build(self) -> Result<Policy, PolicyError> {
        self.constraints.validate()?;

        let mut rules = Vec::with_capacity(self.allow.len() + self.deny.len());
        for pattern in &self.deny {
            rules.push(PolicyRule::Deny(Matcher::compile(pattern)?));
        }
        for pattern in &self.allow {
            rules.push(PolicyRule::Allow(Matcher::compile(pattern)?));
        }

        Ok(Policy {
            name: self.name,
            rules,
            constraints: self.constraints,
        })
    }
}

/// Optional rate and time limits applied at invocation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConstraints {
    /// Maximum successful dispatches per token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_invocations: Option<u32>,
    /// UTC hours during which invocations are accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_hours: Option<HourWindow>,
}

impl PolicyConstraints {
    pub fn is_unconstrained(&self) -> bool {
        self.max_invocations.is_none() && self.active_hours.is_none()
    }

    fn validate(&self) -> Result<(), PolicyError> {
        if let Some(window) = &self.active_hours {
            window.validate()?;
        }
        Ok(())
    }

    /// Evaluate constraints against the caller-supplied usage count and time.
    pub fn check(&self, invocations_so_far: u32, at: DateTime<Utc>) -> Result<(), ConstraintViolation> {
        if let Some(limit) = self.max_invocations {
            if invocations_so_far >= limit {
                return Err(ConstraintViolation::RateLimitExceeded { limit });
            }
        }
        if let Some(window) = &self.active_hours {
            let hour = at.hour() as u8;
            if !window.contains(hour) {
                return Err(ConstraintViolation::OutsideActiveHours {
                    hour,
                    window: *window,
                });
            }
        }
        Ok(())
    }
}

/// Half-open UTC hour window `[start_hour, end_hour)`; wraps past midnight
/// when `start_hour > end_hour`. Equal bounds cover the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl HourWindow {
    pub fn new(start_hour: u8, end_hour: u8) -> Result<Self, PolicyError> {
        let window = Self {
            start_hour,
            end_hour,
        };
        window.validate()?;
        Ok(window)
    }

    fn validate(&self) -> Result<(), PolicyError> {
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err(PolicyError::InvalidConstraint(format!(
                "hour window {}..{} out of range 0..=23",
                self.start_hour, self.end_hour
            )));
        }
        Ok(())
    }

    pub fn contains(&self, hour: u8) -> bool {
        match self.start_hour.cmp(&self.end_hour) {
            std::cmp::Ordering::Equal => true,
            std::cmp::Ordering::Less => hour >= self.start_hour && hour < self.end_hour,
            std::cmp::Ordering::Greater => hour >= self.start_hour || hour < self.end_hour,
        }
    }
}

/// Why a constraint rejected an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintViolation {
    RateLimitExceeded { limit: u32 },
    OutsideActiveHours { hour: u8, window: HourWindow },
}

impl std::fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimitExceeded { limit } => {
                write!(f, "rate limit exceeded ({limit} invocations per token)")
            }
            Self::OutsideActiveHours { hour, window } => write!(
                f,
                "hour {hour} outside active window {}..{}",
                window.start_hour, window.end_hour
            ),
        }
    }
}

/// Wire form of a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PolicyDocument {
    name: String,
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    deny: Vec<String>,
    #[serde(default, skip_serializing_if = "PolicyConstraints::is_unconstrained")]
    constraints: PolicyConstraints,
}

impl TryFrom<PolicyDocument> for Policy {
    type Error = PolicyError;

    fn try_from(doc: PolicyDocument) -> Result<Self, Self::Error> {
        let mut builder = Policy::builder(doc.name);
        builder.allow = doc.allow;
        builder.deny = doc.deny;
        builder.constraints = doc.constraints;
        builder.build()
    }
}

impl From<Policy> for PolicyDocument {
    fn from(policy: Policy) -> Self {
        let allow = policy.allow_matchers().map(ToString::to_string).collect();
        let deny = policy.deny_matchers().map(ToString::to_string).collect();
        Self {
            name: policy.name,
            allow,
            deny,
            constraints: policy.constraints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn builder_rejects_bad_patterns() {
        let err = Policy::builder("p").allow("fraud_agent/*").deny("bad").build();
        assert!(matches!(err, Err(PolicyError::InvalidPattern { .. })));
    }

    #[test]
    fn json_document_round_trip() {
        let policy = Policy::from_patterns(
            "fraud",
            ["fraud_agent/*"],
            ["risk_agent/*", "compliance_agent/*"],
        )
        .unwrap();

        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["allow"], serde_json::json!(["fraud_agent/*"]));
        assert_eq!(
            json["deny"],
            serde_json::json!(["risk_agent/*", "compliance_agent/*"])
        );
        assert!(json.get("constraints").is_none());

        let back: Policy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn namespace_scoped_matches_pattern_form() {
        let scoped = Policy::namespace_scoped("risk", "risk_agent", &["fraud_agent", "memory_agent"]);
        let parsed =
            Policy::from_patterns("risk", ["risk_agent/*"], ["fraud_agent/*", "memory_agent/*"])
                .unwrap();
        assert_eq!(scoped, parsed);
    }

    #[test]
    fn hour_window_wraps_midnight() {
        let window = HourWindow::new(22, 6).unwrap();
        assert!(window.contains(23));
        assert!(window.contains(0));
        assert!(window.contains(5));
        assert!(!window.contains(6));
        assert!(!window.contains(12));
        assert!(HourWindow::new(0, 24).is_err());
    }

    #[test]
    fn constraints_enforce_rate_and_window() {
        let constraints = PolicyConstraints {
            max_invocations: Some(2),
            active_hours: Some(HourWindow::new(9, 17).unwrap()),
        };
        let noon = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let night = Utc.with_ymd_and_hms(2026, 3, 2, 21, 0, 0).unwrap();

        assert!(constraints.check(0, noon).is_ok());
        assert!(constraints.check(1, noon).is_ok());
        assert_eq!(
            constraints.check(2, noon),
            Err(ConstraintViolation::RateLimitExceeded { limit: 2 })
        );
        assert!(matches!(
            constraints.check(0, night),
            Err(ConstraintViolation::OutsideActiveHours { hour: 21, .. })
        ));
    }
}
