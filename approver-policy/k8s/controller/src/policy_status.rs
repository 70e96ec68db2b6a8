use crate::{index::SharedPolicyIndex, leadership::Leadership};
use anyhow::{Context, Result};
use approver_policy_core::{
    k8s::{
        condition::{self, Condition},
        Api, CertificateRequestPolicy, Client, Patch, PatchParams, ResourceExt,
    },
    Policies, Readiness, Registry,
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::time;
use tracing::{debug, info, warn};

const READY_REASON: &str = "Ready";
const NOT_READY_REASON: &str = "NotReady";

/// Maintains the `Ready` condition of every policy.
pub struct PolicyStatus {
    index: SharedPolicyIndex,
    registry: Arc<Registry>,
    api: Api<CertificateRequestPolicy>,
    leadership: Arc<dyn Leadership>,
    resync: Duration,
    timeout: Duration,
}

// === impl PolicyStatus ===

impl PolicyStatus {
    pub fn new(
        index: SharedPolicyIndex,
        registry: Arc<Registry>,
        client: Client,
        leadership: Arc<dyn Leadership>,
        resync: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            index,
            registry,
            api: Api::all(client),
            leadership,
            resync,
            timeout,
        }
    }

    /// Recomputes readiness whenever policies change and on every resync tick.
    pub async fn run(self) {
        let changes = self.index.read().changes();
        let mut interval = time::interval(self.resync);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = changes.notified() => {}
            }

            if !self.leadership.is_leader() {
                continue;
            }

            for policy in self.index.policies() {
                if let Err(error) = self.sync(&policy).await {
                    warn!(policy = %policy.name_any(), %error, "Failed to update policy status");
                }
            }
        }
    }

    async fn sync(&self, policy: &CertificateRequestPolicy) -> Result<()> {
        let ready = time::timeout(self.timeout, ready_condition(&self.registry, policy))
            .await
            .context("readiness check timed out")??;
        if !needs_update(policy, &ready) {
            return Ok(());
        }

        let name = policy.name_any();
        let mut conditions = policy
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        condition::upsert(&mut conditions, ready.at(Utc::now()));
        let patch = serde_json::json!({ "status": { "conditions": conditions } });

        // The lease may have been lost while checking readiness.
        if !self.leadership.is_leader() {
            debug!(%name, "Not leader; skipping status update");
            return Ok(());
        }
        self.api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        info!(%name, "Updated policy readiness");
        Ok(())
    }
}

/// Asks every approver whether the policy is ready.
pub async fn ready_condition(
    registry: &Registry,
    policy: &CertificateRequestPolicy,
) -> Result<Condition> {
    let mut not_ready = Vec::new();
    for approver in registry.approvers() {
        let readiness = approver
            .ready(policy)
            .await
            .with_context(|| format!("approver {:?} failed to check readiness", approver.name()))?;
        if let Readiness::NotReady(reason) = readiness {
            not_ready.push(format!("{}: {reason}", approver.name()));
        }
    }

    let condition = if not_ready.is_empty() {
        Condition::new(
            condition::READY,
            true,
            READY_REASON,
            "CertificateRequestPolicy is ready for approval evaluation",
        )
    } else {
        Condition::new(
            condition::READY,
            false,
            NOT_READY_REASON,
            format!(
                "CertificateRequestPolicy is not ready for approval evaluation: {}",
                not_ready.join("; ")
            ),
        )
    };
    Ok(condition.with_generation(policy.metadata.generation))
}

fn needs_update(policy: &CertificateRequestPolicy, ready: &Condition) -> bool {
    match policy.ready_condition() {
        Some(current) => {
            !current.same_state(ready) || current.observed_generation != ready.observed_generation
        }
        None => true,
    }
}
