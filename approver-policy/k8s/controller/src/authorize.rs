use anyhow::Result;
use approver_policy_core::{
    k8s::{Api, Client, PostParams, POLICY_API_GROUP},
    Authorize, Identity,
};
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec,
};
use tracing::trace;

const RESOURCE: &str = "certificaterequestpolicies";
const VERB: &str = "use";

/// Checks bindings with a `SubjectAccessReview` per policy.
#[derive(Clone)]
pub struct SubjectAccessReviewer {
    api: Api<SubjectAccessReview>,
}

// === impl SubjectAccessReviewer ===

impl SubjectAccessReviewer {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait::async_trait]
impl Authorize for SubjectAccessReviewer {
    async fn can_use(&self, identity: &Identity, namespace: &str, policy: &str) -> Result<bool> {
        let review = self
            .api
            .create(&PostParams::default(), &review(identity, namespace, policy))
            .await?;
        let allowed = review.status.is_some_and(|s| s.allowed);
        trace!(user = %identity, %namespace, %policy, allowed, "Reviewed access");
        Ok(allowed)
    }
}

/// The review is namespaced to the request so that both cluster-wide and
/// namespaced role bindings can grant `use`.
fn review(identity: &Identity, namespace: &str, policy: &str) -> SubjectAccessReview {
    SubjectAccessReview {
        metadata: Default::default(),
        spec: SubjectAccessReviewSpec {
            user: Some(identity.username.clone()),
            uid: identity.uid.clone(),
            groups: Some(identity.groups.clone()),
            extra: Some(identity.extra.clone()),
            resource_attributes: Some(ResourceAttributes {
                group: Some(POLICY_API_GROUP.to_string()),
                resource: Some(RESOURCE.to_string()),
                name: Some(policy.to_string()),
                namespace: Some(namespace.to_string()),
                verb: Some(VERB.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        status: None,
    }
}
