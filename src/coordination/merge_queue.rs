//! Merge queue
//!
//! Sequences trunk integration per module. A request passes through
//! pending → checking → approved → merging → merged; the intermediate
//! checking/merging steps are validated in memory and only the outcome is
//! persisted, so a failure mid-operation leaves the stored record at its
//! last stable status (retryable) rather than stuck in between.

use std::sync::Arc;

use crate::domain::{MergeRequest, MergeRequestStatus, ReservationKind};
use crate::error::{CadenceError, Result};
use crate::storage::{Storage, collections::MERGE_REQUESTS};

use super::reservations::ReservationManager;

/// Queue of trunk-integration requests.
pub struct MergeQueue<S: Storage> {
    storage: Arc<S>,
    reservations: Arc<ReservationManager<S>>,
}

impl<S: Storage> MergeQueue<S> {
    pub fn new(storage: Arc<S>, reservations: Arc<ReservationManager<S>>) -> Self {
        Self {
            storage,
            reservations,
        }
    }

    /// Enqueue a merge request for a module.
    pub fn request_merge(
        &self,
        collaborator_id: &str,
        agent_set_id: &str,
        module_id: &str,
    ) -> Result<MergeRequest> {
        if module_id.trim().is_empty() {
            return Err(CadenceError::Validation("module_id must not be empty".into()));
        }

        let request = MergeRequest::new(collaborator_id, agent_set_id, module_id);
        self.storage.create(MERGE_REQUESTS, &request)?;

        tracing::info!(
            request_id = %request.id,
            module_id,
            collaborator_id,
            "merge requested"
        );

        Ok(request)
    }

    /// Run the conflict check: pending → checking → approved | conflict.
    ///
    /// A request conflicts when another request for an overlapping module
    /// is already occupying the queue (checking/approved/merging), or an
    /// unexpired exclusive reservation on the module is held by a
    /// different collaborator.
    pub fn check_merge_conflicts(&self, id: &str) -> Result<MergeRequest> {
        let mut request = self.load(id)?;

        if request.status != MergeRequestStatus::Pending {
            return Err(CadenceError::InvalidState(format!(
                "merge request '{}' is {:?}, expected pending",
                id, request.status
            )));
        }
        request
            .transition(MergeRequestStatus::Checking)
            .map_err(|target| illegal_transition(id, request.status, target))?;

        let mut conflict_with = Vec::new();

        let others: Vec<MergeRequest> = self.storage.list(MERGE_REQUESTS)?;
        for other in others {
            if other.id != request.id
                && other.status.is_in_queue()
                && modules_overlap(&other.module_id, &request.module_id)
            {
                conflict_with.push(other.id);
            }
        }

        for reservation in self
            .reservations
            .check_resource_blocked(ReservationKind::Module, &request.module_id)?
        {
            if reservation.exclusive && reservation.collaborator_id != request.collaborator_id {
                conflict_with.push(reservation.id);
            }
        }

        let target = if conflict_with.is_empty() {
            MergeRequestStatus::Approved
        } else {
            request.conflict_with = conflict_with;
            MergeRequestStatus::Conflict
        };
        request
            .transition(target)
            .map_err(|target| illegal_transition(id, request.status, target))?;

        self.storage.update(MERGE_REQUESTS, &request)?;
        Ok(request)
    }

    /// Execute an approved merge: approved → merging → merged. If the
    /// final persist fails the stored record remains approved and the call
    /// can be retried.
    pub fn execute_merge(&self, id: &str) -> Result<MergeRequest> {
        let mut request = self.load(id)?;

        if request.status != MergeRequestStatus::Approved {
            return Err(CadenceError::InvalidState(format!(
                "merge request '{}' is {:?}, expected approved",
                id, request.status
            )));
        }
        request
            .transition(MergeRequestStatus::Merging)
            .map_err(|target| illegal_transition(id, request.status, target))?;
        request
            .transition(MergeRequestStatus::Merged)
            .map_err(|target| illegal_transition(id, request.status, target))?;

        self.storage.update(MERGE_REQUESTS, &request)?;

        tracing::info!(request_id = %request.id, module_id = %request.module_id, "merge executed");

        Ok(request)
    }

    /// Retire a request that will not merge.
    pub fn reject_merge(&self, id: &str, reason: &str) -> Result<MergeRequest> {
        let mut request = self.load(id)?;

        request
            .transition(MergeRequestStatus::Rejected)
            .map_err(|target| illegal_transition(id, request.status, target))?;
        request.rejection_reason = Some(reason.to_string());

        self.storage.update(MERGE_REQUESTS, &request)?;
        Ok(request)
    }

    /// Get a merge request by id.
    pub fn get_merge_request(&self, id: &str) -> Result<MergeRequest> {
        self.load(id)
    }

    /// List merge requests, optionally by status.
    pub fn list_merge_requests(
        &self,
        status: Option<MergeRequestStatus>,
    ) -> Result<Vec<MergeRequest>> {
        let all: Vec<MergeRequest> = self.storage.list(MERGE_REQUESTS)?;
        Ok(match status {
            Some(status) => all.into_iter().filter(|r| r.status == status).collect(),
            None => all,
        })
    }

    fn load(&self, id: &str) -> Result<MergeRequest> {
        self.storage
            .get(MERGE_REQUESTS, id)?
            .ok_or_else(|| CadenceError::MergeRequestNotFound(id.to_string()))
    }
}

fn illegal_transition(
    id: &str,
    from: MergeRequestStatus,
    to: MergeRequestStatus,
) -> CadenceError {
    CadenceError::InvalidState(format!(
        "merge request '{}' cannot move {:?} → {:?}",
        id, from, to
    ))
}

/// Module ids overlap when equal or nested.
fn modules_overlap(a: &str, b: &str) -> bool {
    a == b || a.starts_with(&format!("{}/", b)) || b.starts_with(&format!("{}/", a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::ReservationOutcome;
    use crate::storage::JsonlStore;
    use tempfile::TempDir;

    fn queue() -> (TempDir, Arc<ReservationManager<JsonlStore>>, MergeQueue<JsonlStore>) {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(JsonlStore::open(temp.path()).unwrap());
        let reservations = Arc::new(ReservationManager::new(storage.clone()));
        let queue = MergeQueue::new(storage, reservations.clone());
        (temp, reservations, queue)
    }

    #[test]
    fn test_request_merge_is_pending() {
        let (_temp, _res, queue) = queue();
        let request = queue.request_merge("c1", "agents-a", "core").unwrap();
        assert_eq!(request.status, MergeRequestStatus::Pending);
    }

    #[test]
    fn test_check_approves_without_contention() {
        let (_temp, _res, queue) = queue();
        let request = queue.request_merge("c1", "a", "core").unwrap();

        let checked = queue.check_merge_conflicts(&request.id).unwrap();
        assert_eq!(checked.status, MergeRequestStatus::Approved);
        assert!(checked.conflict_with.is_empty());
    }

    #[test]
    fn test_check_conflicts_with_queued_request() {
        let (_temp, _res, queue) = queue();
        let first = queue.request_merge("c1", "a", "core").unwrap();
        queue.check_merge_conflicts(&first.id).unwrap(); // approved, occupies queue

        let second = queue.request_merge("c2", "b", "core").unwrap();
        let checked = queue.check_merge_conflicts(&second.id).unwrap();

        assert_eq!(checked.status, MergeRequestStatus::Conflict);
        assert_eq!(checked.conflict_with, vec![first.id]);
        assert!(checked.status.is_terminal());
    }

    #[test]
    fn test_check_ignores_retired_requests() {
        let (_temp, _res, queue) = queue();
        let first = queue.request_merge("c1", "a", "core").unwrap();
        queue.check_merge_conflicts(&first.id).unwrap();
        queue.execute_merge(&first.id).unwrap(); // merged, leaves the queue

        let second = queue.request_merge("c2", "b", "core").unwrap();
        let checked = queue.check_merge_conflicts(&second.id).unwrap();
        assert_eq!(checked.status, MergeRequestStatus::Approved);
    }

    #[test]
    fn test_nested_modules_conflict() {
        let (_temp, _res, queue) = queue();
        let outer = queue.request_merge("c1", "a", "core").unwrap();
        queue.check_merge_conflicts(&outer.id).unwrap();

        let inner = queue.request_merge("c2", "b", "core/engine").unwrap();
        let checked = queue.check_merge_conflicts(&inner.id).unwrap();
        assert_eq!(checked.status, MergeRequestStatus::Conflict);
    }

    #[test]
    fn test_disjoint_modules_approved() {
        let (_temp, _res, queue) = queue();
        let first = queue.request_merge("c1", "a", "core").unwrap();
        queue.check_merge_conflicts(&first.id).unwrap();

        let second = queue.request_merge("c2", "b", "tools").unwrap();
        let checked = queue.check_merge_conflicts(&second.id).unwrap();
        assert_eq!(checked.status, MergeRequestStatus::Approved);
    }

    #[test]
    fn test_exclusive_foreign_reservation_conflicts() {
        let (_temp, reservations, queue) = queue();
        let ReservationOutcome::Granted(held) = reservations
            .create_reservation("other", "b", ReservationKind::Module, "core", true, 60_000, "busy")
            .unwrap()
        else {
            panic!("expected grant");
        };

        let request = queue.request_merge("c1", "a", "core").unwrap();
        let checked = queue.check_merge_conflicts(&request.id).unwrap();

        assert_eq!(checked.status, MergeRequestStatus::Conflict);
        assert_eq!(checked.conflict_with, vec![held.id]);
    }

    #[test]
    fn test_own_reservation_does_not_conflict() {
        let (_temp, reservations, queue) = queue();
        reservations
            .create_reservation("c1", "a", ReservationKind::Module, "core", true, 60_000, "mine")
            .unwrap();

        let request = queue.request_merge("c1", "a", "core").unwrap();
        let checked = queue.check_merge_conflicts(&request.id).unwrap();
        assert_eq!(checked.status, MergeRequestStatus::Approved);
    }

    #[test]
    fn test_execute_requires_approved() {
        let (_temp, _res, queue) = queue();
        let request = queue.request_merge("c1", "a", "core").unwrap();

        let result = queue.execute_merge(&request.id);
        assert!(matches!(result, Err(CadenceError::InvalidState(_))));

        // The stored record is untouched and still checkable
        let stored = queue.get_merge_request(&request.id).unwrap();
        assert_eq!(stored.status, MergeRequestStatus::Pending);
    }

    #[test]
    fn test_execute_merges() {
        let (_temp, _res, queue) = queue();
        let request = queue.request_merge("c1", "a", "core").unwrap();
        queue.check_merge_conflicts(&request.id).unwrap();

        let merged = queue.execute_merge(&request.id).unwrap();
        assert_eq!(merged.status, MergeRequestStatus::Merged);
        assert!(merged.merged_at.is_some());

        // Terminal: cannot execute twice
        assert!(queue.execute_merge(&request.id).is_err());
    }

    #[test]
    fn test_check_twice_is_invalid() {
        let (_temp, _res, queue) = queue();
        let request = queue.request_merge("c1", "a", "core").unwrap();
        queue.check_merge_conflicts(&request.id).unwrap();

        let result = queue.check_merge_conflicts(&request.id);
        assert!(matches!(result, Err(CadenceError::InvalidState(_))));
    }

    #[test]
    fn test_reject_merge() {
        let (_temp, _res, queue) = queue();
        let request = queue.request_merge("c1", "a", "core").unwrap();

        let rejected = queue.reject_merge(&request.id, "superseded").unwrap();
        assert_eq!(rejected.status, MergeRequestStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("superseded"));

        // Terminal: cannot check afterwards
        assert!(queue.check_merge_conflicts(&request.id).is_err());
    }

    #[test]
    fn test_reject_merged_request_fails() {
        let (_temp, _res, queue) = queue();
        let request = queue.request_merge("c1", "a", "core").unwrap();
        queue.check_merge_conflicts(&request.id).unwrap();
        queue.execute_merge(&request.id).unwrap();

        assert!(queue.reject_merge(&request.id, "too late").is_err());
    }

    #[test]
    fn test_list_by_status() {
        let (_temp, _res, queue) = queue();
        let a = queue.request_merge("c1", "a", "core").unwrap();
        let _b = queue.request_merge("c2", "b", "tools").unwrap();
        queue.check_merge_conflicts(&a.id).unwrap();

        let pending = queue
            .list_merge_requests(Some(MergeRequestStatus::Pending))
            .unwrap();
        assert_eq!(pending.len(), 1);

        let approved = queue
            .list_merge_requests(Some(MergeRequestStatus::Approved))
            .unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].id, a.id);

        assert_eq!(queue.list_merge_requests(None).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_request_errors() {
        let (_temp, _res, queue) = queue();
        assert!(matches!(
            queue.check_merge_conflicts("mrg-missing"),
            Err(CadenceError::MergeRequestNotFound(_))
        ));
    }
}
