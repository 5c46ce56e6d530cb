//! FinGuard Policy - allow/deny matching over `namespace/action` keys
//!
//! Each stage agent carries one static [`Policy`]. [`authorize`] is a pure
//! function: deny rules are evaluated first, then allow rules. Callers are
//! responsible for logging the outcome.

#![deny(unsafe_code)]

pub mod action;
pub mod engine;
pub mod error;
pub mod pattern;
pub mod policy;

pub use action::ActionKey;
pub use engine::{authorize, Authorization, DenialReason};
pub use error::PolicyError;
pub use pattern::Matcher;
pub use policy::{ConstraintViolation, HourWindow, Policy, PolicyBuilder, PolicyConstraints, PolicyRule};
