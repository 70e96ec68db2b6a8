use std::fmt;

pub const NO_POLICY_MESSAGE: &str = "no policy permits this requester";
pub const UNAVAILABLE_MESSAGE: &str = "policy evaluation unavailable";
pub const NOT_READY_REASON: &str = "policy not ready";

/// The terminal outcome for a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Approved { policy: String },
    Denied(Denial),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Denial {
    /// The requester is bound to no policy that selects the request.
    Unbound,

    /// Every bound policy rejected the request; one line per policy.
    Rejected(Vec<String>),

    /// Evaluation kept failing until the retry budget ran out.
    Unavailable(String),

    /// The request could not be decoded.
    Malformed(String),
}

// === impl Decision ===

impl Decision {
    pub fn approved(policy: impl ToString) -> Self {
        Self::Approved {
            policy: policy.to_string(),
        }
    }

    pub fn unavailable(error: impl fmt::Display) -> Self {
        Self::Denied(Denial::Unavailable(error.to_string()))
    }

    pub fn malformed(error: impl fmt::Display) -> Self {
        Self::Denied(Denial::Malformed(error.to_string()))
    }

    #[inline]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }

    /// The condition type that records this decision.
    pub fn condition_type(&self) -> &'static str {
        match self {
            Self::Approved { .. } => crate::k8s::condition::APPROVED,
            Self::Denied(_) => crate::k8s::condition::DENIED,
        }
    }

    /// A human-readable explanation, sufficient to tell which policy was tried
    /// and which approver produced the verdict.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved { policy } => {
                write!(f, "Approved by CertificateRequestPolicy: {policy:?}")
            }
            Self::Denied(Denial::Unbound) => f.write_str(NO_POLICY_MESSAGE),
            Self::Denied(Denial::Rejected(lines)) => {
                f.write_str("No policy approved this request:")?;
                for line in lines {
                    write!(f, "\n{line}")?;
                }
                Ok(())
            }
            Self::Denied(Denial::Unavailable(error)) => {
                write!(f, "{UNAVAILABLE_MESSAGE}: {error}")
            }
            Self::Denied(Denial::Malformed(error)) => {
                write!(f, "invalid certificate request: {error}")
            }
        }
    }
}
