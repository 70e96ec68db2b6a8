#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod certificate_request;
pub mod condition;
pub mod duration;
pub mod labels;
pub mod policy;

pub use self::{
    certificate_request::{CertificateRequest, CertificateRequestSpec, CertificateRequestStatus},
    condition::Condition,
    labels::Labels,
    policy::{CertificateRequestPolicy, CertificateRequestPolicySpec},
};
pub use k8s_openapi::{
    api::{self, core::v1::Namespace},
    ByteString,
};
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt},
    runtime::watcher,
    Client, Error, Resource,
};

/// The API group of the policy resources, also used as the reason on every
/// decision condition this controller writes.
pub const POLICY_API_GROUP: &str = "policy.cert-manager.io";

/// Identifies a namespaced resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn of<T: ResourceExt>(resource: &T) -> Self {
        Self {
            namespace: resource.namespace().unwrap_or_default(),
            name: resource.name_any(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
