use crate::{
    error::Error,
    k8s::{
        policy::{IssuerRefSelector, NamespaceSelector, Selector},
        CertificateRequestPolicy, Labels, ResourceExt,
    },
    request::{Identity, Request},
    wildcard,
};
use futures::prelude::*;
use std::{sync::Arc, time::Duration};
use tracing::{debug, trace};

/// The cluster's authorization subsystem.
#[async_trait::async_trait]
pub trait Authorize: Send + Sync {
    /// Returns whether `identity` may perform `use` on the named policy, for
    /// requests in `namespace`.
    async fn can_use(
        &self,
        identity: &Identity,
        namespace: &str,
        policy: &str,
    ) -> anyhow::Result<bool>;
}

/// A read-only view of the known policies and namespaces.
pub trait Policies: Send + Sync {
    /// All known policies, ordered by name.
    fn policies(&self) -> Vec<Arc<CertificateRequestPolicy>>;

    fn namespace_labels(&self, namespace: &str) -> Option<Labels>;
}

/// Resolves the policies a request's requester is bound to.
///
/// Authorization is checked afresh for every request so that revoked bindings
/// take effect immediately.
pub struct Bindings {
    policies: Arc<dyn Policies>,
    authz: Arc<dyn Authorize>,
    timeout: Duration,
    concurrency: usize,
}

// === impl Bindings ===

impl Bindings {
    pub fn new(
        policies: Arc<dyn Policies>,
        authz: Arc<dyn Authorize>,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            policies,
            authz,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Returns the policies that select the request and that the requester is
    /// authorized to use, in name order. An unbound requester yields an empty
    /// list; an unreachable authorization subsystem yields an error.
    pub async fn resolve(
        &self,
        request: &Request,
    ) -> Result<Vec<Arc<CertificateRequestPolicy>>, Error> {
        let ns_labels = self
            .policies
            .namespace_labels(&request.id.namespace)
            .unwrap_or_default();

        let candidates = self
            .policies
            .policies()
            .into_iter()
            .filter(|p| selects(&p.spec.selector, request, &ns_labels))
            .collect::<Vec<_>>();
        trace!(candidates = candidates.len(), "Selected candidate policies");

        let checks = stream::iter(candidates)
            .map(|policy| async move {
                let name = policy.name_any();
                let allowed = self.check(request, &name).await?;
                if !allowed {
                    debug!(policy = %name, requester = %request.identity, "Requester may not use policy");
                }
                Ok::<_, Error>(allowed.then_some(policy))
            })
            .buffered(self.concurrency)
            .try_collect::<Vec<_>>()
            .await?;

        Ok(checks.into_iter().flatten().collect())
    }

    async fn check(&self, request: &Request, policy: &str) -> Result<bool, Error> {
        let check = self
            .authz
            .can_use(&request.identity, &request.id.namespace, policy);
        match tokio::time::timeout(self.timeout, check).await {
            Ok(Ok(allowed)) => Ok(allowed),
            Ok(Err(source)) => Err(Error::Authorization {
                policy: policy.to_string(),
                source,
            }),
            Err(_) => Err(Error::Timeout {
                operation: format!("authorization check for policy {policy:?}"),
                timeout: self.timeout,
            }),
        }
    }
}

/// Returns true if the selector applies to the request.
///
/// A selector with neither an issuer nor a namespace term selects nothing;
/// such policies are rejected at admission.
pub fn selects(selector: &Selector, request: &Request, ns_labels: &Labels) -> bool {
    if selector.issuer_ref.is_none() && selector.namespace.is_none() {
        return false;
    }

    if let Some(issuer) = selector.issuer_ref.as_ref() {
        if !selects_issuer(issuer, request) {
            return false;
        }
    }

    if let Some(ns) = selector.namespace.as_ref() {
        if !selects_namespace(ns, &request.id.namespace, ns_labels) {
            return false;
        }
    }

    true
}

fn selects_issuer(sel: &IssuerRefSelector, request: &Request) -> bool {
    let field = |pattern: &Option<String>, value: &str| {
        pattern
            .as_deref()
            .map_or(true, |p| wildcard::matches(p, value))
    };
    field(&sel.name, &request.issuer.name)
        && field(&sel.kind, &request.issuer.kind)
        && field(&sel.group, &request.issuer.group)
}

fn selects_namespace(sel: &NamespaceSelector, namespace: &str, labels: &Labels) -> bool {
    if let Some(names) = sel.match_names.as_ref() {
        if !wildcard::matches_any(names, namespace) {
            return false;
        }
    }
    if let Some(required) = sel.match_labels.as_ref() {
        if !labels.contains_all(required) {
            return false;
        }
    }
    true
}
