use crate::{
    decision::{Decision, Denial, NOT_READY_REASON},
    error::Error,
    evaluate::{Evaluator, PolicyVerdict},
    k8s::{CertificateRequestPolicy, ResourceExt},
    request::Request,
};
use futures::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

/// Combines per-policy verdicts into a decision: a request is approved if
/// any bound policy approves it.
#[derive(Clone, Debug)]
pub struct Aggregator {
    evaluator: Evaluator,
    concurrency: usize,
}

// === impl Aggregator ===

impl Aggregator {
    /// `concurrency` bounds how many policies are evaluated at once for a
    /// single request.
    pub fn new(evaluator: Evaluator, concurrency: usize) -> Self {
        Self {
            evaluator,
            concurrency: concurrency.max(1),
        }
    }

    /// Evaluates `bound` policies in order, with bounded concurrency, and
    /// returns as soon as one approves. Results are consumed in policy order,
    /// so the approving policy reported is always the first approving one in
    /// that order; dropping the stream cancels evaluations still in flight.
    ///
    /// If no policy approves but some policy failed to evaluate, the decision
    /// cannot be made and the first error is returned.
    pub async fn decide(
        &self,
        request: &Request,
        bound: &[Arc<CertificateRequestPolicy>],
    ) -> Result<Decision, Error> {
        if bound.is_empty() {
            debug!(requester = %request.identity, "Requester is bound to no policy");
            return Ok(Decision::Denied(Denial::Unbound));
        }

        let mut verdicts = stream::iter(bound.iter())
            .map(|policy| async move {
                let verdict = self.evaluator.evaluate(policy, request).await;
                (policy.name_any(), verdict)
            })
            .buffered(self.concurrency);

        let mut rejections = Vec::with_capacity(bound.len());
        let mut failure = None;
        while let Some((policy, verdict)) = verdicts.next().await {
            match verdict {
                Ok(PolicyVerdict::Approved) => {
                    info!(%policy, request = %request.id, "Policy approved request");
                    return Ok(Decision::approved(policy));
                }
                Ok(PolicyVerdict::Denied { approver, reason }) => {
                    rejections.push(format!("{policy}: {approver}: {reason}"));
                }
                Ok(PolicyVerdict::NotReady { approver, reason }) => {
                    debug!(%policy, approver, %reason, "Excluding policy that is not ready");
                    rejections.push(format!("{policy}: {NOT_READY_REASON}"));
                }
                Err(error) => {
                    debug!(%policy, %error, "Policy evaluation failed");
                    failure.get_or_insert(error);
                }
            }
        }

        if let Some(error) = failure {
            return Err(error);
        }
        Ok(Decision::Denied(Denial::Rejected(rejections)))
    }
}
