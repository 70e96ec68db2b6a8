use crate::{
    approver::{Approver, Readiness},
    error::Error,
    k8s::{CertificateRequestPolicy, ResourceExt},
    registry::Registry,
    request::Request,
};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::trace;

/// The outcome of evaluating one policy against one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyVerdict {
    /// Every approver approved.
    Approved,

    /// The first approver to deny, and why.
    Denied {
        approver: &'static str,
        reason: String,
    },

    /// An approver's prerequisites for the policy are unmet; the policy is
    /// excluded from this decision.
    NotReady {
        approver: &'static str,
        reason: String,
    },
}

/// Runs every registered approver against a single policy.
#[derive(Clone, Debug)]
pub struct Evaluator {
    registry: Arc<Registry>,
    timeout: Duration,
}

// === impl Evaluator ===

impl Evaluator {
    pub fn new(registry: Arc<Registry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Checks readiness with every approver, then evaluates with each in
    /// registration order, stopping at the first denial.
    ///
    /// An approver error aborts the evaluation of this policy; it is not a
    /// denial.
    pub async fn evaluate(
        &self,
        policy: &CertificateRequestPolicy,
        request: &Request,
    ) -> Result<PolicyVerdict, Error> {
        let name = policy.name_any();

        for approver in self.registry.approvers() {
            let readiness = self
                .bounded(approver, "readiness check", &name, approver.ready(policy))
                .await?
                .map_err(|source| Error::Readiness {
                    approver: approver.name(),
                    policy: name.clone(),
                    source,
                })?;
            if let Readiness::NotReady(reason) = readiness {
                trace!(policy = %name, approver = approver.name(), %reason, "Policy not ready");
                return Ok(PolicyVerdict::NotReady {
                    approver: approver.name(),
                    reason,
                });
            }
        }

        for approver in self.registry.approvers() {
            let verdict = self
                .bounded(approver, "evaluation", &name, approver.evaluate(policy, request))
                .await?
                .map_err(|source| Error::Evaluation {
                    approver: approver.name(),
                    policy: name.clone(),
                    source,
                })?;
            if !verdict.approved {
                let reason = verdict
                    .reason
                    .unwrap_or_else(|| "request denied".to_string());
                trace!(policy = %name, approver = approver.name(), %reason, "Policy denied request");
                return Ok(PolicyVerdict::Denied {
                    approver: approver.name(),
                    reason,
                });
            }
        }

        Ok(PolicyVerdict::Approved)
    }

    async fn bounded<T>(
        &self,
        approver: &dyn Approver,
        operation: &str,
        policy: &str,
        call: impl Future<Output = T>,
    ) -> Result<T, Error> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| Error::Timeout {
                operation: format!(
                    "{operation} of policy {policy:?} by approver {:?}",
                    approver.name()
                ),
                timeout: self.timeout,
            })
    }
}
