use crate::{
    leadership::Leadership,
    metrics::ControllerMetrics,
    queue::{Backoff, WorkQueue},
    reconcile::{Outcome, Reconciler, RetryConfig},
    store::{RequestStore, StoreError},
};
use anyhow::{bail, Result};
use approver_policy_core::{
    k8s::{
        certificate_request::{ApprovalState, IssuerRef},
        condition::{self, Condition},
        policy::{IssuerRefSelector, Selector},
        ByteString, CertificateRequest, CertificateRequestPolicy, CertificateRequestPolicySpec,
        CertificateRequestSpec, CertificateRequestStatus, Labels, ObjectMeta, ResourceExt,
        ResourceId, POLICY_API_GROUP,
    },
    Approver, Authorize, Config, Decision, Engine, Identity, Policies, Readiness, Registry,
    Request, Validation, Verdict,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

const RSA_CSR: &str = include_str!("../../../core/src/testdata/rsa.csr");

#[tokio::test]
async fn decides_pending_requests() {
    let store = FakeStore::with(pending("app-1"));
    let reconciler = reconciler(Approve(true), FakeAuthz::ok(), store.clone(), 5);

    let outcome = reconciler.reconcile(&id("app-1")).await;
    assert!(
        matches!(outcome, Outcome::Decided(Decision::Approved { ref policy }) if policy == "policy-1"),
        "{outcome:?}"
    );
    assert_eq!(store.state("app-1"), ApprovalState::Approved);
    assert_eq!(
        store.condition("app-1", condition::APPROVED).reason.as_deref(),
        Some(POLICY_API_GROUP)
    );
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn denials_are_written_with_reasons() {
    let store = FakeStore::with(pending("app-1"));
    let reconciler = reconciler(Approve(false), FakeAuthz::ok(), store.clone(), 5);

    let outcome = reconciler.reconcile(&id("app-1")).await;
    assert!(matches!(outcome, Outcome::Decided(_)), "{outcome:?}");
    assert_eq!(store.state("app-1"), ApprovalState::Denied);
    assert_eq!(
        store.condition("app-1", condition::DENIED).message.as_deref(),
        Some("No policy approved this request:\npolicy-1: fake: SAN not permitted")
    );
}

#[tokio::test]
async fn decisions_are_never_rewritten() {
    let store = FakeStore::with(pending("app-1"));
    let reconciler = reconciler(Approve(true), FakeAuthz::ok(), store.clone(), 5);

    assert!(matches!(
        reconciler.reconcile(&id("app-1")).await,
        Outcome::Decided(_)
    ));
    for _ in 0..3 {
        assert!(matches!(
            reconciler.reconcile(&id("app-1")).await,
            Outcome::AlreadyDecided
        ));
    }
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn followers_do_not_write() {
    let store = FakeStore::with(pending("app-1"));
    let leader = FakeLeader::new(false);
    let reconciler = Reconciler::new(
        engine(Approve(true), FakeAuthz::ok()),
        Arc::new(store.clone()),
        Arc::new(leader.clone()),
        WorkQueue::new(),
        retry(5),
        ControllerMetrics::default(),
    );

    assert!(matches!(
        reconciler.reconcile(&id("app-1")).await,
        Outcome::NotLeader
    ));
    assert_eq!(store.writes(), 0);

    leader.set(true);
    assert!(matches!(
        reconciler.reconcile(&id("app-1")).await,
        Outcome::Decided(_)
    ));
}

#[tokio::test]
async fn deleted_requests_are_gone() {
    let store = FakeStore::default();
    let reconciler = reconciler(Approve(true), FakeAuthz::ok(), store, 5);
    assert!(matches!(
        reconciler.reconcile(&id("app-1")).await,
        Outcome::Gone
    ));
}

#[tokio::test]
async fn losing_a_write_race_discards_the_local_decision() {
    let store = FakeStore::with(pending("app-1"));
    // Another writer denies the request just before our write lands.
    store.race_with(Some(condition::DENIED));
    let reconciler = reconciler(Approve(true), FakeAuthz::ok(), store.clone(), 5);

    let outcome = reconciler.reconcile(&id("app-1")).await;
    assert!(matches!(outcome, Outcome::Discarded), "{outcome:?}");
    assert_eq!(store.state("app-1"), ApprovalState::Denied);
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn writes_are_retried_while_the_request_is_still_pending() {
    let store = FakeStore::with(pending("app-1"));
    // An unrelated update bumps the resource version mid-flight.
    store.race_with(None);
    let reconciler = reconciler(Approve(true), FakeAuthz::ok(), store.clone(), 5);

    let outcome = reconciler.reconcile(&id("app-1")).await;
    assert!(matches!(outcome, Outcome::Decided(_)), "{outcome:?}");
    assert_eq!(store.state("app-1"), ApprovalState::Approved);
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let store = FakeStore::with(pending("app-1"));
    let reconciler = reconciler(Approve(true), FakeAuthz::failing(), store.clone(), 5);

    let outcome = reconciler.reconcile(&id("app-1")).await;
    assert!(matches!(outcome, Outcome::Retry(_)), "{outcome:?}");
    assert_eq!(store.state("app-1"), ApprovalState::Pending);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_closed() {
    let store = FakeStore::with(pending("app-1"));
    let authz = FakeAuthz::failing();
    let queue = WorkQueue::new();
    let reconciler = Arc::new(Reconciler::new(
        engine(Approve(true), authz.clone()),
        Arc::new(store.clone()),
        Arc::new(FakeLeader::new(true)),
        queue.clone(),
        retry(3),
        ControllerMetrics::default(),
    ));
    let (signal, watch) = drain::channel();
    let run = tokio::spawn(reconciler.run(1, watch));

    queue.add(id("app-1"));
    wait_for_decision(&store, "app-1").await;

    assert_eq!(store.state("app-1"), ApprovalState::Denied);
    let message = store
        .condition("app-1", condition::DENIED)
        .message
        .unwrap_or_default();
    assert!(
        message.starts_with("policy evaluation unavailable: "),
        "{message}"
    );
    // One initial attempt and three retries.
    assert_eq!(authz.calls(), 4);

    signal.drain().await;
    run.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn concurrent_reconciliation_writes_once() {
    let store = FakeStore::with(pending("app-1"));
    let queue = WorkQueue::new();
    let reconciler = Arc::new(Reconciler::new(
        engine(Approve(true), FakeAuthz::ok()),
        Arc::new(store.clone()),
        Arc::new(FakeLeader::new(true)),
        queue.clone(),
        retry(5),
        ControllerMetrics::default(),
    ));
    let (signal, watch) = drain::channel();
    let run = tokio::spawn(reconciler.run(4, watch));

    for _ in 0..20 {
        queue.add(id("app-1"));
        tokio::task::yield_now().await;
    }
    wait_for_decision(&store, "app-1").await;
    for _ in 0..20 {
        queue.add(id("app-1"));
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(store.writes(), 1);

    signal.drain().await;
    run.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn out_of_range_durations_are_denied_without_stalling_workers() {
    let mut huge = pending("app-1");
    huge.spec.duration = Some("100000000000000000000h".to_string());
    let store = FakeStore::with(huge);
    store.insert(pending("app-2"));
    let queue = WorkQueue::new();
    let reconciler = Arc::new(Reconciler::new(
        engine(Approve(true), FakeAuthz::ok()),
        Arc::new(store.clone()),
        Arc::new(FakeLeader::new(true)),
        queue.clone(),
        retry(5),
        ControllerMetrics::default(),
    ));
    let (signal, watch) = drain::channel();
    let run = tokio::spawn(reconciler.run(1, watch));

    queue.add(id("app-1"));
    queue.add(id("app-2"));
    wait_for_decision(&store, "app-1").await;
    wait_for_decision(&store, "app-2").await;

    assert_eq!(store.state("app-1"), ApprovalState::Denied);
    let message = store
        .condition("app-1", condition::DENIED)
        .message
        .unwrap_or_default();
    assert!(
        message.starts_with("invalid certificate request: "),
        "{message}"
    );
    assert_eq!(store.state("app-2"), ApprovalState::Approved);

    signal.drain().await;
    run.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn a_panicking_reconciliation_releases_its_key() {
    let store = FakeStore::with(pending("app-1"));
    let queue = WorkQueue::new();
    let reconciler = Arc::new(Reconciler::new(
        engine(Approve(true), FakeAuthz::ok()),
        Arc::new(store.clone()),
        Arc::new(PanicsOnce::default()),
        queue.clone(),
        retry(5),
        ControllerMetrics::default(),
    ));
    let (signal, watch) = drain::channel();
    let run = tokio::spawn(reconciler.run(1, watch));

    queue.add(id("app-1"));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.state("app-1"), ApprovalState::Pending);

    // The same worker picks the key up again.
    queue.add(id("app-1"));
    wait_for_decision(&store, "app-1").await;
    assert_eq!(store.state("app-1"), ApprovalState::Approved);

    signal.drain().await;
    run.await.unwrap();
}

// === helpers ===

fn id(name: &str) -> ResourceId {
    ResourceId::new("default", name)
}

fn pending(name: &str) -> CertificateRequest {
    CertificateRequest {
        metadata: ObjectMeta {
            namespace: Some("default".to_string()),
            name: Some(name.to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: CertificateRequestSpec {
            request: ByteString(RSA_CSR.as_bytes().to_vec()),
            issuer_ref: IssuerRef {
                name: "ca".to_string(),
                ..Default::default()
            },
            username: Some("alice".to_string()),
            ..Default::default()
        },
        status: None,
    }
}

fn retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        backoff: Backoff {
            base: Duration::from_millis(250),
            max: Duration::from_secs(30),
        },
    }
}

fn engine(approver: Approve, authz: FakeAuthz) -> Arc<Engine> {
    let registry = Registry::builder()
        .push(approver)
        .unwrap()
        .build()
        .unwrap();
    let policy = CertificateRequestPolicy::new(
        "policy-1",
        CertificateRequestPolicySpec {
            selector: Selector {
                issuer_ref: Some(IssuerRefSelector::default()),
                namespace: None,
            },
            ..Default::default()
        },
    );
    Arc::new(Engine::new(
        Arc::new(registry),
        Arc::new(StaticPolicies(vec![Arc::new(policy)])),
        Arc::new(authz),
        Config::default(),
    ))
}

fn reconciler(approver: Approve, authz: FakeAuthz, store: FakeStore, retries: u32) -> Reconciler {
    Reconciler::new(
        engine(approver, authz),
        Arc::new(store),
        Arc::new(FakeLeader::new(true)),
        WorkQueue::new(),
        retry(retries),
        ControllerMetrics::default(),
    )
}

async fn wait_for_decision(store: &FakeStore, name: &str) {
    for _ in 0..1_000 {
        if store.state(name) != ApprovalState::Pending {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("request {name} was never decided");
}

/// Approves or denies everything.
struct Approve(bool);

#[async_trait::async_trait]
impl Approver for Approve {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn ready(&self, _: &CertificateRequestPolicy) -> Result<Readiness> {
        Ok(Readiness::Ready)
    }

    async fn validate(&self, _: &CertificateRequestPolicy) -> Result<Validation> {
        Ok(Validation::valid())
    }

    async fn evaluate(&self, _: &CertificateRequestPolicy, _: &Request) -> Result<Verdict> {
        if self.0 {
            return Ok(Verdict::approve());
        }
        Ok(Verdict::deny("SAN not permitted"))
    }
}

#[derive(Clone)]
struct FakeAuthz {
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl FakeAuthz {
    fn ok() -> Self {
        Self {
            fail: false,
            calls: Default::default(),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            calls: Default::default(),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Authorize for FakeAuthz {
    async fn can_use(&self, _: &Identity, _: &str, _: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("authorization subsystem unreachable");
        }
        Ok(true)
    }
}

struct StaticPolicies(Vec<Arc<CertificateRequestPolicy>>);

impl Policies for StaticPolicies {
    fn policies(&self) -> Vec<Arc<CertificateRequestPolicy>> {
        self.0.clone()
    }

    fn namespace_labels(&self, _: &str) -> Option<Labels> {
        None
    }
}

#[derive(Clone)]
struct FakeLeader(Arc<AtomicBool>);

impl FakeLeader {
    fn new(leader: bool) -> Self {
        Self(Arc::new(AtomicBool::new(leader)))
    }

    fn set(&self, leader: bool) {
        self.0.store(leader, Ordering::SeqCst);
    }
}

impl Leadership for FakeLeader {
    fn is_leader(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Panics the first time leadership is checked.
#[derive(Default)]
struct PanicsOnce(AtomicBool);

impl Leadership for PanicsOnce {
    fn is_leader(&self) -> bool {
        if !self.0.swap(true, Ordering::SeqCst) {
            panic!("leadership check failed");
        }
        true
    }
}

/// An in-memory store with resource-version checks.
#[derive(Clone, Default)]
struct FakeStore {
    requests: Arc<Mutex<HashMap<ResourceId, CertificateRequest>>>,
    writes: Arc<AtomicUsize>,
    /// When set, the next write is preceded by a concurrent update that sets
    /// the given condition, if any, and bumps the resource version.
    race: Arc<Mutex<Option<Option<&'static str>>>>,
}

impl FakeStore {
    fn with(request: CertificateRequest) -> Self {
        let store = Self::default();
        store
            .requests
            .lock()
            .insert(ResourceId::of(&request), request);
        store
    }

    fn insert(&self, request: CertificateRequest) {
        self.requests
            .lock()
            .insert(ResourceId::of(&request), request);
    }

    fn race_with(&self, condition: Option<&'static str>) {
        *self.race.lock() = Some(condition);
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn state(&self, name: &str) -> ApprovalState {
        self.requests
            .lock()
            .get(&id(name))
            .map(|r| r.approval_state())
            .expect("request must exist")
    }

    fn condition(&self, name: &str, type_: &str) -> Condition {
        let requests = self.requests.lock();
        let request = requests.get(&id(name)).expect("request must exist");
        condition::find(request.conditions(), type_)
            .cloned()
            .expect("condition must be set")
    }
}

fn bump(request: &mut CertificateRequest) {
    let version = request
        .resource_version()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    request.metadata.resource_version = Some((version + 1).to_string());
}

fn set_condition(request: &mut CertificateRequest, condition: Condition) {
    let status = request
        .status
        .get_or_insert_with(CertificateRequestStatus::default);
    condition::upsert(&mut status.conditions, condition);
}

#[async_trait::async_trait]
impl RequestStore for FakeStore {
    async fn get(&self, id: &ResourceId) -> Result<Option<CertificateRequest>> {
        Ok(self.requests.lock().get(id).cloned())
    }

    async fn write_decision(
        &self,
        request: &CertificateRequest,
        decision: &Decision,
    ) -> Result<(), StoreError> {
        let mut requests = self.requests.lock();
        let current = requests
            .get_mut(&ResourceId::of(request))
            .ok_or_else(|| StoreError::Other(anyhow::anyhow!("not found")))?;

        if let Some(race) = self.race.lock().take() {
            if let Some(type_) = race {
                set_condition(current, Condition::new(type_, true, "other", "other writer"));
            }
            bump(current);
        }

        if current.resource_version() != request.resource_version() {
            return Err(StoreError::Conflict);
        }
        set_condition(
            current,
            Condition::new(
                decision.condition_type(),
                true,
                POLICY_API_GROUP,
                decision.message(),
            ),
        );
        bump(current);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
