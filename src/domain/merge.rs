//! Merge request records for the merge queue
//!
//! A merge request sequences the integration of an agent set's work back
//! into the shared trunk. Status transitions are monotonic along
//! pending → checking → approved → merging → merged, with conflict and
//! rejected as terminal failure states.

use serde::{Deserialize, Serialize};

use crate::id::{generate_merge_id, now_ms};

/// Status of a merge request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeRequestStatus {
    /// Queued, not yet checked
    Pending,
    /// Conflict check in progress
    Checking,
    /// Clear to merge
    Approved,
    /// Overlapping in-flight work found
    Conflict,
    /// Merge in progress
    Merging,
    /// Integrated into trunk
    Merged,
    /// Withdrawn or refused
    Rejected,
}

impl MergeRequestStatus {
    /// Statuses reachable from this one
    pub fn allowed_transitions(&self) -> &'static [MergeRequestStatus] {
        use MergeRequestStatus::*;
        match self {
            Pending => &[Checking, Rejected],
            Checking => &[Approved, Conflict, Rejected],
            Approved => &[Merging, Rejected],
            Merging => &[Merged],
            Conflict => &[],
            Merged => &[],
            Rejected => &[],
        }
    }

    pub fn can_transition_to(&self, target: MergeRequestStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Returns true once the request is retired
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MergeRequestStatus::Merged | MergeRequestStatus::Conflict | MergeRequestStatus::Rejected
        )
    }

    /// Returns true while the request occupies the queue for its module
    pub fn is_in_queue(&self) -> bool {
        matches!(
            self,
            MergeRequestStatus::Checking | MergeRequestStatus::Approved | MergeRequestStatus::Merging
        )
    }
}

/// A queued request to integrate an agent set's work into trunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Unique identifier ("mrg-1738300800123-a1b2")
    pub id: String,
    pub collaborator_id: String,
    pub agent_set_id: String,
    /// Module whose work is being merged
    pub module_id: String,
    pub status: MergeRequestStatus,
    /// Ids of requests/reservations this one conflicts with
    pub conflict_with: Vec<String>,
    /// Rejection reason, when rejected
    pub rejection_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    /// When the merge landed (Unix ms)
    pub merged_at: Option<i64>,
}

impl MergeRequest {
    pub fn new(
        collaborator_id: impl Into<String>,
        agent_set_id: impl Into<String>,
        module_id: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: generate_merge_id(),
            collaborator_id: collaborator_id.into(),
            agent_set_id: agent_set_id.into(),
            module_id: module_id.into(),
            status: MergeRequestStatus::Pending,
            conflict_with: Vec::new(),
            rejection_reason: None,
            created_at: now,
            updated_at: now,
            merged_at: None,
        }
    }

    /// Apply a status transition, enforcing monotonicity. Returns the
    /// rejected target on an illegal jump.
    pub fn transition(&mut self, target: MergeRequestStatus) -> Result<(), MergeRequestStatus> {
        if !self.status.can_transition_to(target) {
            return Err(target);
        }
        self.status = target;
        self.updated_at = now_ms();
        if target == MergeRequestStatus::Merged {
            self.merged_at = Some(self.updated_at);
        }
        Ok(())
    }
}
