use crate::{
    leadership::Leadership,
    metrics::ControllerMetrics,
    queue::{Backoff, WorkQueue},
    store::{RequestStore, StoreError},
};
use anyhow::anyhow;
use approver_policy_core::{
    k8s::{CertificateRequest, ResourceId},
    Decision, Engine,
};
use futures::{future, FutureExt};
use std::{panic::AssertUnwindSafe, sync::Arc};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How many times a decision write is retried against a fresher version of a
/// request that is still pending.
const MAX_CONFLICT_RETRIES: usize = 3;

#[derive(Copy, Clone, Debug)]
pub struct RetryConfig {
    /// Transient failures tolerated per request before it is denied.
    pub max_retries: u32,
    pub backoff: Backoff,
}

/// Drives undecided requests to a terminal decision.
pub struct Reconciler {
    engine: Arc<Engine>,
    store: Arc<dyn RequestStore>,
    leadership: Arc<dyn Leadership>,
    queue: WorkQueue<ResourceId>,
    retry: RetryConfig,
    metrics: ControllerMetrics,
}

/// The result of a single reconciliation.
#[derive(Debug)]
pub enum Outcome {
    /// This process does not hold the write lease.
    NotLeader,

    /// The request no longer exists.
    Gone,

    /// The request already carries a terminal decision.
    AlreadyDecided,

    /// The decision was written.
    Decided(Decision),

    /// Another writer decided the request first; the local result is dropped.
    Discarded,

    /// A transient failure; the request should be retried.
    Retry(anyhow::Error),
}

// === impl Reconciler ===

impl Reconciler {
    pub fn new(
        engine: Arc<Engine>,
        store: Arc<dyn RequestStore>,
        leadership: Arc<dyn Leadership>,
        queue: WorkQueue<ResourceId>,
        retry: RetryConfig,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            engine,
            store,
            leadership,
            queue,
            retry,
            metrics,
        }
    }

    /// Processes keys with `workers` parallel workers until `drain` is
    /// signaled, then waits for in-flight reconciliations to finish.
    pub async fn run(self: Arc<Self>, workers: usize, drain: drain::Watch) {
        let tasks = (0..workers.max(1))
            .map(|worker| {
                let reconciler = self.clone();
                tokio::spawn(
                    async move {
                        while let Some(id) = reconciler.queue.next().await {
                            // A panic must not leak the key or take the worker down.
                            let processed = AssertUnwindSafe(reconciler.process(id.clone()))
                                .catch_unwind()
                                .await;
                            if processed.is_err() {
                                error!(%id, "Reconciliation panicked");
                                reconciler.queue.done(&id);
                            }
                        }
                        debug!("Worker stopped");
                    }
                    .instrument(info_span!("worker", worker)),
                )
            })
            .collect::<Vec<_>>();
        info!(workers = tasks.len(), "Reconciler started");

        let release = drain.signaled().await;
        info!("Stopping reconciler");
        self.queue.shutdown();
        release.release_after(future::join_all(tasks)).await;
    }

    /// Reconciles one key and schedules whatever follows from the outcome.
    pub async fn process(&self, id: ResourceId) {
        let outcome = self
            .reconcile(&id)
            .instrument(info_span!("reconcile", namespace = %id.namespace, name = %id.name))
            .await;

        match outcome {
            Outcome::Retry(error) => {
                let failures = self.queue.record_failure(&id);
                let delay = self.retry.backoff.delay(failures);
                warn!(%id, %error, failures, ?delay, "Requeueing request");
                self.metrics.retried();
                self.queue.add_after(id.clone(), delay);
            }
            Outcome::Decided(decision) => {
                info!(%id, approved = decision.is_approved(), message = %decision, "Decided request");
                self.metrics.decided(&decision);
                self.queue.forget(&id);
            }
            outcome => {
                debug!(%id, ?outcome, "Reconciled");
                self.queue.forget(&id);
            }
        }

        self.queue.done(&id);
        self.metrics.set_queue_depth(self.queue.len());
    }

    /// Runs the pending → decided state machine for one request.
    pub async fn reconcile(&self, id: &ResourceId) -> Outcome {
        if !self.leadership.is_leader() {
            return Outcome::NotLeader;
        }

        let request = match self.store.get(id).await {
            Ok(Some(request)) => request,
            Ok(None) => return Outcome::Gone,
            Err(error) => return Outcome::Retry(error),
        };
        if !request.is_pending() {
            return Outcome::AlreadyDecided;
        }

        let decision = match self.engine.decide(&request).await {
            Ok(decision) => decision,
            Err(error) => {
                let failures = self.queue.failures(id);
                if failures < self.retry.max_retries {
                    return Outcome::Retry(error.into());
                }
                warn!(%error, failures, "Retries exhausted; denying request");
                Decision::unavailable(error)
            }
        };

        self.write(request, decision).await
    }

    async fn write(&self, mut request: CertificateRequest, decision: Decision) -> Outcome {
        for _ in 0..=MAX_CONFLICT_RETRIES {
            // The lease may have been lost while evaluating.
            if !self.leadership.is_leader() {
                return Outcome::NotLeader;
            }

            match self.store.write_decision(&request, &decision).await {
                Ok(()) => return Outcome::Decided(decision),
                Err(StoreError::Other(error)) => return Outcome::Retry(error),
                Err(StoreError::Conflict) => {
                    self.metrics.conflicted();
                    let id = ResourceId::of(&request);
                    request = match self.store.get(&id).await {
                        Ok(Some(fresh)) if fresh.is_pending() => {
                            debug!("Request changed while deciding; retrying write");
                            fresh
                        }
                        Ok(Some(_)) => return Outcome::Discarded,
                        Ok(None) => return Outcome::Gone,
                        Err(error) => return Outcome::Retry(error),
                    };
                }
            }
        }

        Outcome::Retry(anyhow!(
            "decision write conflicted {} times",
            MAX_CONFLICT_RETRIES + 1
        ))
    }
}
