use crate::queue::WorkQueue;
use approver_policy_core::{
    k8s::{
        CertificateRequest, CertificateRequestPolicy, Labels, Namespace, ResourceExt, ResourceId,
    },
    Policies,
};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::Notify, time};
use tracing::{debug, trace};

pub type SharedRequestIndex = Arc<RwLock<RequestIndex>>;
pub type SharedPolicyIndex = Arc<RwLock<PolicyIndex>>;

/// Tracks undecided certificate requests and feeds them to the work queue.
pub struct RequestIndex {
    queue: WorkQueue<ResourceId>,
    pending: HashSet<ResourceId>,
}

/// Caches policies and namespace labels for binding resolution.
#[derive(Default)]
pub struct PolicyIndex {
    policies: BTreeMap<String, Arc<CertificateRequestPolicy>>,
    namespaces: HashMap<String, Labels>,
    changed: Arc<Notify>,
}

// === impl RequestIndex ===

impl RequestIndex {
    pub fn shared(queue: WorkQueue<ResourceId>) -> SharedRequestIndex {
        Arc::new(RwLock::new(Self {
            queue,
            pending: HashSet::new(),
        }))
    }

    pub fn pending(&self) -> impl Iterator<Item = &ResourceId> + '_ {
        self.pending.iter()
    }

    /// Re-enqueues every undecided request each `period`, so requests whose
    /// reconciliation was dropped (for instance while not leading) are picked
    /// up again.
    pub async fn resync(index: SharedRequestIndex, period: Duration) {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick completes immediately; the watch has just enqueued
        // everything.
        interval.tick().await;
        loop {
            interval.tick().await;
            let index = index.read();
            debug!(pending = index.pending.len(), "Resyncing requests");
            for id in index.pending.iter() {
                index.queue.add(id.clone());
            }
        }
    }
}

impl kubert::index::IndexNamespacedResource<CertificateRequest> for RequestIndex {
    fn apply(&mut self, request: CertificateRequest) {
        let id = ResourceId::of(&request);
        if request.is_pending() {
            trace!(%id, "Enqueueing undecided request");
            self.pending.insert(id.clone());
            self.queue.add(id);
        } else {
            self.pending.remove(&id);
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.pending.remove(&ResourceId::new(namespace, name));
    }
}

// === impl PolicyIndex ===

impl PolicyIndex {
    pub fn shared() -> SharedPolicyIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Notified whenever a policy is added, changed or removed.
    pub fn changes(&self) -> Arc<Notify> {
        self.changed.clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CertificateRequestPolicy>> {
        self.policies.get(name).cloned()
    }
}

impl Policies for RwLock<PolicyIndex> {
    fn policies(&self) -> Vec<Arc<CertificateRequestPolicy>> {
        self.read().policies.values().cloned().collect()
    }

    fn namespace_labels(&self, namespace: &str) -> Option<Labels> {
        self.read().namespaces.get(namespace).cloned()
    }
}

impl kubert::index::IndexClusterResource<CertificateRequestPolicy> for PolicyIndex {
    fn apply(&mut self, policy: CertificateRequestPolicy) {
        let name = policy.name_unchecked();
        let policy = Arc::new(policy);
        if self.policies.get(&name) == Some(&policy) {
            return;
        }
        debug!(%name, "Indexed policy");
        self.policies.insert(name, policy);
        self.changed.notify_one();
    }

    fn delete(&mut self, name: String) {
        if self.policies.remove(&name).is_some() {
            debug!(%name, "Removed policy");
            self.changed.notify_one();
        }
    }
}

impl kubert::index::IndexClusterResource<Namespace> for PolicyIndex {
    fn apply(&mut self, ns: Namespace) {
        let name = ns.name_unchecked();
        self.namespaces.insert(name, ns.metadata.labels.into());
    }

    fn delete(&mut self, name: String) {
        self.namespaces.remove(&name);
    }
}
