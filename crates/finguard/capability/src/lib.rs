//! FinGuard Capability - plan-scoped authorization
//!
//! A stage declares a [`Plan`]; the [`TokenIssuer`] intersects it with the
//! stage's policy into an expiring [`CapabilityToken`]. Every action then goes
//! through the [`InvocationGate`], which re-checks expiry, scope and policy
//! before dispatching to a [`CapabilityService`]. The [`DelegationManager`]
//! derives narrower tokens for handoff between stages.

#![deny(unsafe_code)]

pub mod delegation;
pub mod error;
pub mod gate;
pub mod mocks;
pub mod plan;
pub mod service;
pub mod token;

pub use delegation::{Delegation, DelegationManager};
pub use error::{CapabilityError, ErrorKind};
pub use gate::InvocationGate;
pub use plan::{Plan, PlanFingerprint, Step};
pub use service::{CapabilityService, ServiceCallPolicy, ServiceFailure};
pub use token::{AgentId, CapabilityToken, TokenIssuer};
