//! Kubernetes bindings for the decision engine: watches, the reconciliation
//! loop that writes decisions, and policy readiness status.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod authorize;
pub mod index;
mod leadership;
mod metrics;
mod policy_status;
pub mod queue;
mod reconcile;
mod store;

#[cfg(test)]
mod tests;

pub use self::{
    authorize::SubjectAccessReviewer,
    index::{PolicyIndex, RequestIndex, SharedPolicyIndex, SharedRequestIndex},
    leadership::{LeaseLeadership, Leadership},
    metrics::ControllerMetrics,
    policy_status::PolicyStatus,
    queue::{Backoff, WorkQueue},
    reconcile::{Outcome, Reconciler, RetryConfig},
    store::{KubeRequestStore, RequestStore, StoreError},
};
