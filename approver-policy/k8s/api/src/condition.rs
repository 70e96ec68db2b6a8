use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const APPROVED: &str = "Approved";
pub const DENIED: &str = "Denied";
pub const READY: &str = "Ready";

const TRUE: &str = "True";
const FALSE: &str = "False";

/// A status condition, in the shape used by both cert-manager requests and
/// policies.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    /// One of `True`, `False` or `Unknown`.
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// RFC 3339 timestamp of the last status change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

// === impl Condition ===

impl Condition {
    pub fn new(
        type_: impl ToString,
        status: bool,
        reason: impl ToString,
        message: impl ToString,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status: if status { TRUE } else { FALSE }.to_string(),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            last_transition_time: None,
            observed_generation: None,
        }
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.last_transition_time = Some(time.to_rfc3339_opts(SecondsFormat::Secs, true));
        self
    }

    pub fn with_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    #[inline]
    pub fn is_true(&self) -> bool {
        self.status == TRUE
    }

    /// Compares type, status, reason and message, ignoring timestamps.
    pub fn same_state(&self, other: &Self) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

pub fn find<'c>(conditions: &'c [Condition], type_: &str) -> Option<&'c Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Replaces the condition of the same type, or appends it.
pub fn upsert(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_by_type() {
        let mut conditions = vec![Condition::new(READY, false, "NotReady", "waiting")];
        upsert(&mut conditions, Condition::new(READY, true, "Ready", "ok"));
        upsert(&mut conditions, Condition::new(APPROVED, true, "x", "y"));

        assert_eq!(conditions.len(), 2);
        assert!(find(&conditions, READY).unwrap().is_true());
        assert!(find(&conditions, DENIED).is_none());
    }

    #[test]
    fn same_state_ignores_time() {
        let epoch = DateTime::from_timestamp(0, 0).unwrap();
        let a = Condition::new(READY, true, "Ready", "ok").at(epoch);
        let b = Condition::new(READY, true, "Ready", "ok").at(epoch + chrono::Duration::hours(1));
        assert!(a.same_state(&b));
        assert!(!a.same_state(&Condition::new(READY, false, "Ready", "ok")));
    }
}
