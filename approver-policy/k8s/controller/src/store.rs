use approver_policy_core::{
    k8s::{
        condition::{self, Condition},
        Api, CertificateRequest, Client, Patch, PatchParams, ResourceExt, ResourceId,
        POLICY_API_GROUP,
    },
    Decision,
};
use chrono::Utc;

/// Reads and decides certificate requests.
#[async_trait::async_trait]
pub trait RequestStore: Send + Sync {
    /// Returns the current state of the request, or `None` if it was deleted.
    async fn get(&self, id: &ResourceId) -> anyhow::Result<Option<CertificateRequest>>;

    /// Records the decision, conditional on `request` still being the latest
    /// version of the object.
    async fn write_decision(
        &self,
        request: &CertificateRequest,
        decision: &Decision,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("the request was modified since it was read")]
    Conflict,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Reads requests from, and writes decisions to, the Kubernetes API.
#[derive(Clone)]
pub struct KubeRequestStore {
    client: Client,
}

// === impl KubeRequestStore ===

impl KubeRequestStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<CertificateRequest> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl RequestStore for KubeRequestStore {
    async fn get(&self, id: &ResourceId) -> anyhow::Result<Option<CertificateRequest>> {
        let request = self.api(&id.namespace).get_opt(&id.name).await?;
        Ok(request)
    }

    async fn write_decision(
        &self,
        request: &CertificateRequest,
        decision: &Decision,
    ) -> Result<(), StoreError> {
        let id = ResourceId::of(request);
        let patch = decision_patch(request, decision, Utc::now());
        match self
            .api(&id.namespace)
            .patch_status(
                &id.name,
                &PatchParams::default(),
                &Patch::Merge(patch),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(error)) if error.code == 409 => Err(StoreError::Conflict),
            Err(error) => Err(StoreError::Other(error.into())),
        }
    }
}

/// Builds a status merge patch that sets the decision condition.
///
/// The patch carries the observed resource version so that the API server
/// rejects it if the request changed in the meantime.
pub(crate) fn decision_patch(
    request: &CertificateRequest,
    decision: &Decision,
    now: chrono::DateTime<Utc>,
) -> serde_json::Value {
    let mut conditions = request.conditions().to_vec();
    condition::upsert(
        &mut conditions,
        Condition::new(
            decision.condition_type(),
            true,
            POLICY_API_GROUP,
            decision.message(),
        )
        .at(now),
    );

    serde_json::json!({
        "metadata": {
            "resourceVersion": request.resource_version(),
        },
        "status": {
            "conditions": conditions,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approver_policy_core::k8s::{CertificateRequestSpec, CertificateRequestStatus, ObjectMeta};
    use chrono::DateTime;
    use pretty_assertions::assert_eq;

    #[test]
    fn decision_patch_is_conditional() {
        let request = CertificateRequest {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("app-1".to_string()),
                resource_version: Some("42".to_string()),
                ..Default::default()
            },
            spec: CertificateRequestSpec::default(),
            status: Some(CertificateRequestStatus {
                conditions: vec![Condition::new("Ready", false, "Pending", "waiting")],
                ..Default::default()
            }),
        };
        let now = DateTime::from_timestamp(0, 0).unwrap();

        let patch = decision_patch(&request, &Decision::approved("policy-1"), now);
        assert_eq!(
            patch,
            serde_json::json!({
                "metadata": { "resourceVersion": "42" },
                "status": {
                    "conditions": [
                        {
                            "type": "Ready",
                            "status": "False",
                            "reason": "Pending",
                            "message": "waiting",
                        },
                        {
                            "type": "Approved",
                            "status": "True",
                            "reason": "policy.cert-manager.io",
                            "message": "Approved by CertificateRequestPolicy: \"policy-1\"",
                            "lastTransitionTime": "1970-01-01T00:00:00Z",
                        },
                    ],
                },
            })
        );
    }
}
