//! The policy evaluation and decision engine.
//!
//! A [`Registry`] holds an ordered set of [`Approver`]s. For each request, the
//! [`Bindings`] resolver finds the policies that select the request and that
//! the requester may `use`; the [`Aggregator`] evaluates each of those
//! policies against every approver and approves the request if any single
//! policy is approved by all approvers.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod aggregate;
pub mod approver;
pub mod bindings;
pub mod decision;
mod engine;
mod error;
pub mod evaluate;
pub mod registry;
pub mod request;
pub mod validate;
pub mod wildcard;


pub use self::{
    aggregate::Aggregator,
    approver::{Approver, Prepare, Readiness, Validation, Verdict},
    bindings::{Authorize, Bindings, Policies},
    decision::{Decision, Denial},
    engine::{Config, Engine},
    error::Error,
    evaluate::{Evaluator, PolicyVerdict},
    registry::Registry,
    request::{Attributes, Identity, Issuer, KeyAlgorithm, PublicKey, Request},
};
pub use approver_policy_k8s_api as k8s;
