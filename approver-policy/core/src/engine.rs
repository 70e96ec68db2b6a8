use crate::{
    aggregate::Aggregator,
    bindings::{Authorize, Bindings, Policies},
    decision::Decision,
    error::Error,
    evaluate::Evaluator,
    k8s::CertificateRequest,
    registry::Registry,
    request::Request,
};
use std::{sync::Arc, time::Duration};
use tracing::info;

#[derive(Clone, Debug)]
pub struct Config {
    /// Bounds each approver call.
    pub evaluation_timeout: Duration,

    /// Bounds each authorization check.
    pub authorization_timeout: Duration,

    /// Bounds the policies evaluated, and the authorization checks issued, in
    /// parallel for one request.
    pub policy_concurrency: usize,
}

/// Decides requests: resolves bindings, then aggregates policy verdicts.
pub struct Engine {
    bindings: Bindings,
    aggregator: Aggregator,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            evaluation_timeout: Duration::from_secs(5),
            authorization_timeout: Duration::from_secs(5),
            policy_concurrency: 4,
        }
    }
}

// === impl Engine ===

impl Engine {
    pub fn new(
        registry: Arc<Registry>,
        policies: Arc<dyn Policies>,
        authz: Arc<dyn Authorize>,
        config: Config,
    ) -> Self {
        let Config {
            evaluation_timeout,
            authorization_timeout,
            policy_concurrency,
        } = config;
        Self {
            bindings: Bindings::new(policies, authz, authorization_timeout, policy_concurrency),
            aggregator: Aggregator::new(
                Evaluator::new(registry, evaluation_timeout),
                policy_concurrency,
            ),
        }
    }

    /// Decides the request, or fails with a transient error.
    ///
    /// A request that cannot be decoded is denied outright, since retrying
    /// cannot change the outcome.
    pub async fn decide(&self, resource: &CertificateRequest) -> Result<Decision, Error> {
        let request = match Request::from_resource(resource) {
            Ok(request) => request,
            Err(error) => {
                info!(%error, "Denying undecodable request");
                return Ok(Decision::malformed(error));
            }
        };

        let bound = self.bindings.resolve(&request).await?;
        self.aggregator.decide(&request, &bound).await
    }
}
