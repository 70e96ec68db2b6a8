use crate::{admission::Admission, lease};
use anyhow::{bail, Context, Result};
use approver_policy_core::{
    k8s::{watcher, CertificateRequest, CertificateRequestPolicy, Namespace},
    registry::{self, Registry as Approvers},
    Config, Engine, Prepare,
};
use approver_policy_k8s_controller::{
    Backoff, ControllerMetrics, KubeRequestStore, LeaseLeadership, PolicyIndex, PolicyStatus,
    Reconciler, RequestIndex, RetryConfig, SubjectAccessReviewer, WorkQueue,
};
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "approver-policy",
    about = "Approves certificate requests that match a CertificateRequestPolicy"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "approver_policy=info,warn",
        env = "APPROVER_POLICY_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// Namespace of the Lease that guards decision writes.
    #[clap(long, default_value = "cert-manager")]
    leader_election_namespace: String,

    #[clap(long, default_value = "policy.cert-manager.io")]
    lease_name: String,

    /// Number of requests reconciled in parallel.
    #[clap(long, default_value = "2")]
    workers: usize,

    /// Transient failures tolerated per request before it is denied.
    #[clap(long, default_value = "5")]
    max_retries: u32,

    #[clap(long, default_value = "250")]
    retry_base_delay_ms: u64,

    #[clap(long, default_value = "30000")]
    retry_max_delay_ms: u64,

    #[clap(long, default_value = "5000")]
    evaluation_timeout_ms: u64,

    #[clap(long, default_value = "5000")]
    authorization_timeout_ms: u64,

    /// Policies evaluated in parallel for a single request.
    #[clap(long, default_value = "4")]
    policy_concurrency: usize,

    /// Interval at which undecided requests and policy readiness are
    /// revisited.
    #[clap(long, default_value = "60")]
    resync_period_secs: u64,
}

impl Args {
    /// Parses the command line, including flags declared by approvers, and
    /// runs the controller.
    pub async fn parse_and_run() -> Result<()> {
        let mut approvers = Approvers::builder();
        for approver in approver_policy_approvers::default_approvers() {
            approvers = approvers.push_boxed(approver)?;
        }
        let matches = approvers.register_flags(Self::command()).get_matches();
        let args = Self::from_arg_matches(&matches)?;
        args.run(approvers, matches).await
    }

    pub async fn run(self, mut approvers: registry::Builder, flags: ArgMatches) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            server,
            admin,
            admission_controller_disabled,
            leader_election_namespace,
            lease_name,
            workers,
            max_retries,
            retry_base_delay_ms,
            retry_max_delay_ms,
            evaluation_timeout_ms,
            authorization_timeout_ms,
            policy_concurrency,
            resync_period_secs,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };
        let resync = Duration::from_secs(resync_period_secs);
        let config = Config {
            evaluation_timeout: Duration::from_millis(evaluation_timeout_ms),
            authorization_timeout: Duration::from_millis(authorization_timeout_ms),
            policy_concurrency,
        };
        let retry = RetryConfig {
            max_retries,
            backoff: Backoff {
                base: Duration::from_millis(retry_base_delay_ms),
                max: Duration::from_millis(retry_max_delay_ms),
            },
        };

        let mut prom = <Registry>::default();
        let metrics = ControllerMetrics::register(prom.sub_registry_with_prefix("approver_policy"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        approvers
            .prepare(&Prepare {
                flags: &flags,
                client: runtime.client(),
            })
            .await?;
        let registry = Arc::new(approvers.build()?);
        info!(approvers = ?registry, "Registered approvers");

        let hostname =
            std::env::var("HOSTNAME").context("failed to read `HOSTNAME` environment variable")?;
        let claims = lease::init(&runtime, &leader_election_namespace, &lease_name, &hostname)
            .await?;
        let leadership = Arc::new(LeaseLeadership::new(&hostname, claims));

        // Spawn resource watches.

        let policy_index = PolicyIndex::shared();
        let policies = runtime.watch_all::<CertificateRequestPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(policy_index.clone(), policies)
                .instrument(info_span!("certificaterequestpolicies")),
        );

        let namespaces = runtime.watch_all::<Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(policy_index.clone(), namespaces)
                .instrument(info_span!("namespaces")),
        );

        let queue = WorkQueue::new();
        let request_index = RequestIndex::shared(queue.clone());
        let requests = runtime.watch_all::<CertificateRequest>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(request_index.clone(), requests)
                .instrument(info_span!("certificaterequests")),
        );
        tokio::spawn(RequestIndex::resync(request_index, resync).instrument(info_span!("resync")));

        let engine = Arc::new(Engine::new(
            registry.clone(),
            policy_index.clone(),
            Arc::new(SubjectAccessReviewer::new(runtime.client())),
            config,
        ));
        let reconciler = Arc::new(Reconciler::new(
            engine,
            Arc::new(KubeRequestStore::new(runtime.client())),
            leadership.clone(),
            queue,
            retry,
            metrics,
        ));
        tokio::spawn(
            reconciler
                .run(workers, runtime.shutdown_handle())
                .instrument(info_span!("reconciler")),
        );

        let status = PolicyStatus::new(
            policy_index,
            registry.clone(),
            runtime.client(),
            leadership,
            resync,
            Duration::from_millis(evaluation_timeout_ms),
        );
        tokio::spawn(status.run().instrument(info_span!("policy_status")));

        let runtime = runtime.spawn_server(move || Admission::new(registry.clone()));

        // Block the main thread on the shutdown signal. Once it fires, wait for
        // the background tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
