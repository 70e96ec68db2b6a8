use crate::condition::{self, Condition};
use k8s_openapi::ByteString;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A cert-manager request for a signed X.509 certificate.
///
/// This type is owned by cert-manager; only the fields the approver reads or
/// writes are modeled.
#[derive(Clone, Debug, Default, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "CertificateRequest",
    namespaced,
    status = "CertificateRequestStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestSpec {
    /// PEM-encoded PKCS#10 certificate signing request.
    pub request: ByteString,

    pub issuer_ref: IssuerRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    #[serde(default, rename = "isCA")]
    pub is_ca: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usages: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<ByteString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_time: Option<String>,
}

/// The approval state of a request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ApprovalState {
    Pending,
    Approved,
    Denied,
}

// === impl IssuerRef ===

impl IssuerRef {
    /// cert-manager defaults an unset kind to `Issuer`.
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or("Issuer")
    }

    /// cert-manager defaults an unset group to `cert-manager.io`.
    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or("cert-manager.io")
    }
}

// === impl CertificateRequest ===

impl CertificateRequest {
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    /// A request is decided once it carries a true `Approved` or `Denied`
    /// condition. Decided requests must never be decided again.
    pub fn approval_state(&self) -> ApprovalState {
        let conditions = self.conditions();
        let is_set = |t| condition::find(conditions, t).is_some_and(Condition::is_true);
        if is_set(condition::DENIED) {
            return ApprovalState::Denied;
        }
        if is_set(condition::APPROVED) {
            return ApprovalState::Approved;
        }
        ApprovalState::Pending
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.approval_state() == ApprovalState::Pending
    }
}
