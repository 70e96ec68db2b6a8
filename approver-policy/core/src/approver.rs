use crate::{k8s::CertificateRequestPolicy, request::Request};
use anyhow::Result;

/// A pluggable decision unit.
///
/// Every registered approver is consulted for every policy: a policy approves
/// a request only when all approvers approve it. Approvers interpret only the
/// policy fields they own and ignore the rest.
///
/// `ready`, `validate` and `evaluate` must not mutate cluster state, and
/// `validate` and `evaluate` must be deterministic for the same inputs.
#[async_trait::async_trait]
pub trait Approver: Send + Sync + 'static {
    /// A stable identifier, unique within a registry.
    fn name(&self) -> &'static str;

    /// Declares command-line arguments consumed in [`Approver::prepare`].
    fn register_flags(&self, cmd: clap::Command) -> clap::Command {
        cmd
    }

    /// One-time setup before any evaluation. Failure aborts startup.
    async fn prepare(&mut self, _ctx: &Prepare<'_>) -> Result<()> {
        Ok(())
    }

    /// Reports whether this approver's prerequisites for the given policy are
    /// satisfied.
    async fn ready(&self, policy: &CertificateRequestPolicy) -> Result<Readiness>;

    /// Statically checks the policy fields this approver owns.
    async fn validate(&self, policy: &CertificateRequestPolicy) -> Result<Validation>;

    /// Decides whether `policy` permits `request`.
    async fn evaluate(
        &self,
        policy: &CertificateRequestPolicy,
        request: &Request,
    ) -> Result<Verdict>;
}

/// Inputs available to approvers while preparing.
pub struct Prepare<'a> {
    pub flags: &'a clap::ArgMatches,
    pub client: crate::k8s::Client,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(String),
}

/// The outcome of a manifest check. An empty violation list is valid.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Validation {
    pub violations: Vec<String>,
}

/// A single approver's outcome for one policy and request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub approved: bool,
    pub reason: Option<String>,
}

// === impl Readiness ===

impl Readiness {
    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

// === impl Validation ===

impl Validation {
    #[inline]
    pub fn valid() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

impl FromIterator<String> for Validation {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self {
            violations: iter.into_iter().collect(),
        }
    }
}

// === impl Verdict ===

impl Verdict {
    pub fn approve() -> Self {
        Self {
            approved: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl ToString) -> Self {
        Self {
            approved: false,
            reason: Some(reason.to_string()),
        }
    }

    /// Denies with all reasons joined, or approves if there are none.
    pub fn from_violations(violations: Vec<String>) -> Self {
        if violations.is_empty() {
            return Self::approve();
        }
        Self::deny(violations.join(", "))
    }
}
