//! Status conditions
//!
//! Cluster-API style conditions stored on `Server` status. A condition keeps
//! its `lastTransitionTime` while its status, reason and message stay the same;
//! deleting it and setting it again always produces a fresh timestamp.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Condition state is not known
    Unknown,
}

/// A single observed condition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. `PowerCycle`
    #[serde(rename = "type")]
    pub type_: String,

    /// Current status
    pub status: ConditionStatus,

    /// Machine readable reason for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// When the condition last changed
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// A `True` condition without reason.
    #[must_use]
    pub fn true_(type_: &str, now: DateTime<Utc>) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::True,
            reason: None,
            message: None,
            last_transition_time: now,
        }
    }

    /// A `False` condition with a reason and message.
    #[must_use]
    pub fn false_(type_: &str, reason: &str, message: &str, now: DateTime<Utc>) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::False,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            last_transition_time: now,
        }
    }
}

/// Finds the condition of the given type.
#[must_use]
pub fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Whether a condition of the given type is present, whatever its status.
#[must_use]
pub fn has(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_).is_some()
}

/// Whether the condition is present and `False`.
#[must_use]
pub fn is_false(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_).is_some_and(|c| c.status == ConditionStatus::False)
}

/// Whether the condition is present and `True`.
#[must_use]
pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Inserts or replaces a condition.
///
/// If a condition of the same type exists with identical status, reason and
/// message, its transition time is kept.
pub fn set(conditions: &mut Vec<Condition>, mut condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        if existing.status == condition.status
            && existing.reason == condition.reason
            && existing.message == condition.message
        {
            condition.last_transition_time = existing.last_transition_time;
        }
        *existing = condition;
        return;
    }

    conditions.push(condition);
}

/// Removes the condition of the given type, if any.
pub fn delete(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}
