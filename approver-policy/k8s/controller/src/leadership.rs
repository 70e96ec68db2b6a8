use chrono::Utc;
use kubert::lease::Claim;
use std::sync::Arc;
use tokio::sync::watch;

/// Answers whether this process may currently write to the cluster.
pub trait Leadership: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Leadership backed by a kubert lease claim.
#[derive(Clone, Debug)]
pub struct LeaseLeadership {
    hostname: String,
    claims: watch::Receiver<Arc<Claim>>,
}

// === impl LeaseLeadership ===

impl LeaseLeadership {
    pub fn new(hostname: impl ToString, claims: watch::Receiver<Arc<Claim>>) -> Self {
        Self {
            hostname: hostname.to_string(),
            claims,
        }
    }
}

impl Leadership for LeaseLeadership {
    fn is_leader(&self) -> bool {
        let claim = self.claims.borrow();
        claim.holder == self.hostname && claim.expiry > Utc::now()
    }
}
