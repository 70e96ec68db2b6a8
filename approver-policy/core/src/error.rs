use std::time::Duration;

/// Failures while deciding a request.
///
/// None of these say anything about whether the request should be approved;
/// they are all transient and the request is retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("authorization check for policy {policy:?} failed: {source}")]
    Authorization {
        policy: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("approver {approver:?} failed to check readiness of policy {policy:?}: {source}")]
    Readiness {
        approver: &'static str,
        policy: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("approver {approver:?} failed to evaluate policy {policy:?}: {source}")]
    Evaluation {
        approver: &'static str,
        policy: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },
}
