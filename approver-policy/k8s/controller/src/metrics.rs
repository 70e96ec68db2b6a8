use approver_policy_core::{Decision, Denial};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    decisions: Family<DecisionLabels, Counter>,
    retries: Counter,
    conflicts: Counter,
    queue_depth: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DecisionLabels {
    decision: &'static str,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let decisions = Family::default();
        prom.register(
            "decisions",
            "Count of decisions written to certificate requests",
            decisions.clone(),
        );

        let retries = Counter::default();
        prom.register(
            "retries",
            "Count of reconciliations requeued after a transient failure",
            retries.clone(),
        );

        let conflicts = Counter::default();
        prom.register(
            "conflicts",
            "Count of decision writes rejected by optimistic concurrency",
            conflicts.clone(),
        );

        let queue_depth = Gauge::default();
        prom.register(
            "queue_depth",
            "Number of certificate requests waiting to be reconciled",
            queue_depth.clone(),
        );

        Self {
            decisions,
            retries,
            conflicts,
            queue_depth,
        }
    }

    pub(crate) fn decided(&self, decision: &Decision) {
        let decision = match decision {
            Decision::Approved { .. } => "approved",
            Decision::Denied(Denial::Rejected(_)) => "denied",
            Decision::Denied(Denial::Unbound) => "unbound",
            Decision::Denied(Denial::Unavailable(_)) => "unavailable",
            Decision::Denied(Denial::Malformed(_)) => "malformed",
        };
        self.decisions
            .get_or_create(&DecisionLabels { decision })
            .inc();
    }

    pub(crate) fn retried(&self) {
        self.retries.inc();
    }

    pub(crate) fn conflicted(&self) {
        self.conflicts.inc();
    }

    pub(crate) fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }
}
