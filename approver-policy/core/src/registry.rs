use crate::approver::{Approver, Prepare};
use anyhow::{Context, Result};
use tracing::info;

/// An immutable, ordered set of approvers.
///
/// Registration order is evaluation order, so denial reasons are reported
/// reproducibly. A registry is frozen once built and is shared by reference
/// between the reconciler and the admission webhook.
pub struct Registry {
    approvers: Vec<Box<dyn Approver>>,
}

/// Collects and prepares approvers before the registry is frozen.
#[derive(Default)]
pub struct Builder {
    approvers: Vec<Box<dyn Approver>>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("approver {0:?} is registered more than once")]
    Duplicate(&'static str),

    #[error("at least one approver must be registered")]
    Empty,
}

// === impl Builder ===

impl Builder {
    pub fn push(self, approver: impl Approver) -> Result<Self, RegistryError> {
        self.push_boxed(Box::new(approver))
    }

    pub fn push_boxed(mut self, approver: Box<dyn Approver>) -> Result<Self, RegistryError> {
        let name = approver.name();
        if self.approvers.iter().any(|a| a.name() == name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.approvers.push(approver);
        Ok(self)
    }

    /// Lets every approver declare its flags on the command.
    pub fn register_flags(&self, cmd: clap::Command) -> clap::Command {
        self.approvers
            .iter()
            .fold(cmd, |cmd, approver| approver.register_flags(cmd))
    }

    pub async fn prepare(&mut self, ctx: &Prepare<'_>) -> Result<()> {
        for approver in self.approvers.iter_mut() {
            info!(approver = approver.name(), "Preparing approver");
            approver
                .prepare(ctx)
                .await
                .with_context(|| format!("failed to prepare approver {:?}", approver.name()))?;
        }
        info!("All approvers prepared");
        Ok(())
    }

    pub fn build(self) -> Result<Registry, RegistryError> {
        if self.approvers.is_empty() {
            return Err(RegistryError::Empty);
        }
        Ok(Registry {
            approvers: self.approvers,
        })
    }
}

// === impl Registry ===

impl Registry {
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub fn approvers(&self) -> impl Iterator<Item = &dyn Approver> + '_ {
        self.approvers.iter().map(|a| a.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.approvers.iter().map(|a| a.name())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.approvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.approvers.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
