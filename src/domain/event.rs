//! Event record types for observability.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{generate_event_id, now_ms};

/// Event type constants
pub mod event_types {
    pub const EXECUTION_STARTED: &str = "execution.started";
    pub const EXECUTION_STATUS_CHANGE: &str = "execution.status_change";
    pub const EXECUTION_ESCALATED: &str = "execution.escalated";
    pub const EXECUTION_ABORTED: &str = "execution.aborted";
    pub const PHASE_COMPLETED: &str = "phase.completed";
    pub const PHASE_ADVANCED: &str = "phase.advanced";
    pub const SKILL_COMPLETED: &str = "skill.completed";
    pub const SKILL_SKIPPED: &str = "skill.skipped";
    pub const SKILL_FAILED: &str = "skill.failed";
    pub const GATE_APPROVED: &str = "gate.approved";
    pub const GATE_REJECTED: &str = "gate.rejected";
}

/// General-purpose event log for observability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    /// Unique event identifier
    pub id: String,
    /// Event type (e.g., "phase.advanced", "gate.approved")
    pub event_type: String,
    /// Associated execution ID (if any)
    pub execution_id: Option<String>,
    /// Event-specific payload data
    pub payload: Value,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
}

impl EventRecord {
    /// Create a new event with the given type and payload
    pub fn new(event_type: &str, execution_id: Option<String>, payload: Value) -> Self {
        Self {
            id: generate_event_id(),
            event_type: event_type.to_string(),
            execution_id,
            payload,
            created_at: now_ms(),
        }
    }

    /// Create an execution.started event
    pub fn execution_started(execution_id: &str, loop_id: &str, project: &str) -> Self {
        Self::new(
            event_types::EXECUTION_STARTED,
            Some(execution_id.to_string()),
            serde_json::json!({ "loop_id": loop_id, "project": project }),
        )
    }

    /// Create an execution.status_change event
    pub fn status_change(execution_id: &str, old_status: &str, new_status: &str) -> Self {
        Self::new(
            event_types::EXECUTION_STATUS_CHANGE,
            Some(execution_id.to_string()),
            serde_json::json!({ "from": old_status, "to": new_status }),
        )
    }

    /// Create an execution.escalated event
    pub fn escalated(execution_id: &str, reason: &str) -> Self {
        Self::new(
            event_types::EXECUTION_ESCALATED,
            Some(execution_id.to_string()),
            serde_json::json!({ "reason": reason }),
        )
    }

    /// Create an execution.aborted event
    pub fn aborted(execution_id: &str, reason: Option<&str>) -> Self {
        Self::new(
            event_types::EXECUTION_ABORTED,
            Some(execution_id.to_string()),
            serde_json::json!({ "reason": reason }),
        )
    }

    /// Create a phase.completed event
    pub fn phase_completed(execution_id: &str, phase: &str) -> Self {
        Self::new(
            event_types::PHASE_COMPLETED,
            Some(execution_id.to_string()),
            serde_json::json!({ "phase": phase }),
        )
    }

    /// Create a phase.advanced event
    pub fn phase_advanced(execution_id: &str, from: &str, to: Option<&str>) -> Self {
        Self::new(
            event_types::PHASE_ADVANCED,
            Some(execution_id.to_string()),
            serde_json::json!({ "from": from, "to": to }),
        )
    }

    /// Create a skill.completed event
    pub fn skill_completed(execution_id: &str, phase: &str, skill_id: &str) -> Self {
        Self::new(
            event_types::SKILL_COMPLETED,
            Some(execution_id.to_string()),
            serde_json::json!({ "phase": phase, "skill_id": skill_id }),
        )
    }

    /// Create a skill.skipped event
    pub fn skill_skipped(execution_id: &str, phase: &str, skill_id: &str, reason: &str) -> Self {
        Self::new(
            event_types::SKILL_SKIPPED,
            Some(execution_id.to_string()),
            serde_json::json!({ "phase": phase, "skill_id": skill_id, "reason": reason }),
        )
    }

    /// Create a skill.failed event
    pub fn skill_failed(execution_id: &str, phase: &str, skill_id: &str, retry_count: u32) -> Self {
        Self::new(
            event_types::SKILL_FAILED,
            Some(execution_id.to_string()),
            serde_json::json!({ "phase": phase, "skill_id": skill_id, "retry_count": retry_count }),
        )
    }

    /// Create a gate.approved event
    pub fn gate_approved(execution_id: &str, gate_id: &str, approved_by: Option<&str>) -> Self {
        Self::new(
            event_types::GATE_APPROVED,
            Some(execution_id.to_string()),
            serde_json::json!({ "gate_id": gate_id, "approved_by": approved_by }),
        )
    }

    /// Create a gate.rejected event
    pub fn gate_rejected(execution_id: &str, gate_id: &str, feedback: &str) -> Self {
        Self::new(
            event_types::GATE_REJECTED,
            Some(execution_id.to_string()),
            serde_json::json!({ "gate_id": gate_id, "feedback": feedback }),
        )
    }
}
