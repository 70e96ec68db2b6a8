//! The approvers built into every deployment.
//!
//! [`Allowed`] restricts which X.509 attributes may be requested;
//! [`Constraints`] bounds certificate lifetimes and private keys. Both are
//! stateless and always ready.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod allowed;
mod constraints;

pub use self::{allowed::Allowed, constraints::Constraints};
use approver_policy_core::Approver;

/// The built-in approvers in evaluation order.
pub fn default_approvers() -> Vec<Box<dyn Approver>> {
    vec![Box::new(Allowed), Box::new(Constraints)]
}

#[cfg(test)]
pub(crate) mod test_util {
    use approver_policy_core::{
        k8s::{
            policy::{IssuerRefSelector, Selector},
            CertificateRequestPolicy, CertificateRequestPolicySpec, ResourceId,
        },
        Attributes, Identity, Issuer, Request,
    };

    pub fn policy(spec: CertificateRequestPolicySpec) -> CertificateRequestPolicy {
        CertificateRequestPolicy::new(
            "test",
            CertificateRequestPolicySpec {
                selector: Selector {
                    issuer_ref: Some(IssuerRefSelector::default()),
                    namespace: None,
                },
                ..spec
            },
        )
    }

    pub fn request(attributes: Attributes) -> Request {
        Request {
            id: ResourceId::new("default", "app-1"),
            identity: Identity {
                username: "alice".to_string(),
                ..Default::default()
            },
            issuer: Issuer {
                name: "ca".to_string(),
                kind: "Issuer".to_string(),
                group: "cert-manager.io".to_string(),
            },
            attributes,
        }
    }
}
