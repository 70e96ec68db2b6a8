use anyhow::Result;
use approver_policy_core::k8s::{self, Api, ObjectMeta, Patch, PatchParams};
use k8s_openapi::api::coordination::v1::Lease;
use kubert::lease::{Claim, ClaimParams, LeaseManager};
use std::sync::Arc;
use tokio::{sync::watch, time::Duration};
use tracing::{debug, info};

const FIELD_MANAGER: &str = "approver-policy";

/// Decision writes stop within this window after another replica takes over.
const CLAIM: ClaimParams = ClaimParams {
    lease_duration: Duration::from_secs(30),
    renew_grace_period: Duration::from_secs(1),
};

/// Competes for the decision-write lease as `hostname`, returning the
/// stream of claims.
pub async fn init<T>(
    runtime: &kubert::Runtime<T>,
    ns: &str,
    name: &str,
    hostname: &str,
) -> Result<watch::Receiver<Arc<Claim>>> {
    let api = Api::<Lease>::namespaced(runtime.client(), ns);
    ensure_exists(&api, ns, name).await?;

    let (claims, _task) = LeaseManager::init(api, name)
        .await?
        .spawn(hostname, CLAIM)
        .await?;
    info!(%ns, %name, %hostname, "Competing for lease");
    Ok(claims)
}

async fn ensure_exists(api: &Api<Lease>, ns: &str, name: &str) -> Result<()> {
    let params = PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };
    match api.patch(name, &params, &Patch::Apply(empty(ns, name))).await {
        Ok(_) => info!(%ns, %name, "Created lease"),
        // Any existing Lease, whoever created it, is left untouched.
        Err(k8s::Error::Api(_)) => debug!(%ns, %name, "Lease exists"),
        Err(error) => return Err(error.into()),
    }
    Ok(())
}

/// An unclaimed Lease, applied only if absent (resource version "0").
fn empty(ns: &str, name: &str) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            resource_version: Some("0".to_string()),
            labels: Some(
                [(
                    "app.kubernetes.io/name".to_string(),
                    "approver-policy".to_string(),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        spec: None,
    }
}
