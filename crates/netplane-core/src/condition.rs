//! Status conditions shared by VlanStatus and ClusterNetwork.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Condition type reporting whether a network is serving traffic.
pub const READY: &str = "ready";

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Display, EnumString,
)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// Kubernetes-style status condition.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time status or message changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

/// Lookup and mutation helpers over a condition list.
pub trait Conditions {
    fn condition(&self, type_: &str) -> Option<&Condition>;

    /// Set `type_` to `status` with `message`. Returns `false` without touching
    /// the timestamp when the condition already holds exactly that value.
    fn set_condition(&mut self, type_: &str, status: ConditionStatus, message: &str) -> bool;

    fn is_ready(&self) -> bool {
        self.condition(READY)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Explicitly `False`; an absent or `Unknown` condition is not unready.
    fn is_unready(&self) -> bool {
        self.condition(READY)
            .is_some_and(|c| c.status == ConditionStatus::False)
    }

    fn set_ready(&mut self, ready: bool, message: &str) -> bool {
        self.set_condition(READY, ready.into(), message)
    }
}

impl Conditions for Vec<Condition> {
    fn condition(&self, type_: &str) -> Option<&Condition> {
        self.iter().find(|c| c.type_ == type_)
    }

    fn set_condition(&mut self, type_: &str, status: ConditionStatus, message: &str) -> bool {
        match self.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) if existing.status == status && existing.message == message => false,
            Some(existing) => {
                existing.status = status;
                existing.message = message.to_string();
                existing.last_update_time = Some(Utc::now());
                true
            }
            None => {
                self.push(Condition {
                    type_: type_.to_string(),
                    status,
                    reason: String::new(),
                    message: message.to_string(),
                    last_update_time: Some(Utc::now()),
                });
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_ready_is_idempotent() {
        let mut conditions = Vec::new();
        assert!(!conditions.is_ready());
        assert!(!conditions.is_unready());

        assert!(conditions.set_ready(true, ""));
        let stamped = conditions[0].last_update_time;
        assert!(conditions.is_ready());

        assert!(!conditions.set_ready(true, ""));
        assert_eq!(conditions[0].last_update_time, stamped);
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_message_change_is_a_change() {
        let mut conditions = Vec::new();
        conditions.set_ready(false, "bond failed");
        assert!(conditions.is_unready());
        assert!(conditions.set_ready(false, "bridge failed"));
        assert_eq!(conditions[0].message, "bridge failed");
    }

    #[test]
    fn test_condition_status_wire_format() {
        assert_eq!(ConditionStatus::True.to_string(), "True");
        assert_eq!(
            serde_json::to_string(&ConditionStatus::False).unwrap(),
            "\"False\""
        );
        assert_eq!(ConditionStatus::default(), ConditionStatus::Unknown);
    }
}
