//! Reservation management
//!
//! Conflicts are expected, frequent conditions: `create_reservation`
//! returns them as a structured outcome naming every blocking claim, not
//! as an error. Expiry is lazy; reads filter out lapsed claims, and the
//! stored records are pruned on the next create.

use std::sync::Arc;

use glob::Pattern;

use crate::domain::{Reservation, ReservationKind};
use crate::error::{CadenceError, Result};
use crate::id::now_ms;
use crate::storage::{Storage, collections::RESERVATIONS};

/// Result of a reservation request.
#[derive(Debug, Clone)]
pub enum ReservationOutcome {
    Granted(Reservation),
    /// The request overlapped existing claims; nothing was created
    Conflict { blocking: Vec<Reservation> },
}

impl ReservationOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, ReservationOutcome::Granted(_))
    }
}

/// Manages time-bounded claims over shared resources.
pub struct ReservationManager<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> ReservationManager<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Request a claim on a resource. Grants unless an unexpired
    /// overlapping reservation is exclusive, or the request is exclusive
    /// and any unexpired overlap exists.
    pub fn create_reservation(
        &self,
        collaborator_id: &str,
        agent_set_id: &str,
        kind: ReservationKind,
        target: &str,
        exclusive: bool,
        duration_ms: i64,
        reason: &str,
    ) -> Result<ReservationOutcome> {
        if target.trim().is_empty() {
            return Err(CadenceError::Validation("target must not be empty".into()));
        }
        if duration_ms <= 0 {
            return Err(CadenceError::Validation(
                "duration_ms must be positive".into(),
            ));
        }
        if kind == ReservationKind::PathPattern && Pattern::new(target).is_err() {
            return Err(CadenceError::Validation(format!(
                "invalid glob pattern '{}'",
                target
            )));
        }

        self.prune_expired();

        let active = self.unexpired()?;
        let blocking: Vec<Reservation> = active
            .into_iter()
            .filter(|existing| existing.overlaps(kind, target))
            .filter(|existing| existing.exclusive || exclusive)
            .collect();

        if !blocking.is_empty() {
            tracing::debug!(
                collaborator_id,
                target,
                blocked_by = blocking.len(),
                "reservation conflict"
            );
            return Ok(ReservationOutcome::Conflict { blocking });
        }

        let reservation = Reservation::new(
            collaborator_id,
            agent_set_id,
            kind,
            target,
            exclusive,
            duration_ms,
            reason,
        );
        self.storage.create(RESERVATIONS, &reservation)?;

        Ok(ReservationOutcome::Granted(reservation))
    }

    /// All unexpired reservations whose target overlaps the given one.
    /// Pure read; exclusive overlaps are hard blocks, shared ones advisory.
    pub fn check_resource_blocked(
        &self,
        kind: ReservationKind,
        target: &str,
    ) -> Result<Vec<Reservation>> {
        let active = self.unexpired()?;
        Ok(active
            .into_iter()
            .filter(|existing| existing.overlaps(kind, target))
            .collect())
    }

    /// Explicit early release of a claim.
    pub fn release_reservation(&self, id: &str) -> Result<()> {
        let existing: Option<Reservation> = self.storage.get(RESERVATIONS, id)?;
        if existing.is_none() {
            return Err(CadenceError::ReservationNotFound(id.to_string()));
        }
        self.storage.delete(RESERVATIONS, id)
    }

    /// Extend an unexpired claim by `extra_ms`.
    pub fn extend_reservation(&self, id: &str, extra_ms: i64) -> Result<Reservation> {
        if extra_ms <= 0 {
            return Err(CadenceError::Validation("extra_ms must be positive".into()));
        }

        let mut reservation: Reservation = self
            .storage
            .get(RESERVATIONS, id)?
            .ok_or_else(|| CadenceError::ReservationNotFound(id.to_string()))?;

        if reservation.is_expired(now_ms()) {
            return Err(CadenceError::InvalidState(format!(
                "reservation '{}' has expired",
                id
            )));
        }

        reservation.expires_at += extra_ms;
        self.storage.update(RESERVATIONS, &reservation)?;
        Ok(reservation)
    }

    /// All unexpired reservations.
    pub fn list_reservations(&self) -> Result<Vec<Reservation>> {
        self.unexpired()
    }

    /// Load reservations that have not lapsed. Reads never write: lapsed
    /// records stay on disk until the next `create_reservation` prunes them.
    fn unexpired(&self) -> Result<Vec<Reservation>> {
        let now = now_ms();
        let all: Vec<Reservation> = self.storage.list(RESERVATIONS)?;
        Ok(all.into_iter().filter(|r| !r.is_expired(now)).collect())
    }

    /// Drop lapsed records from storage. Best-effort; the unexpired filter
    /// already guarantees absence.
    fn prune_expired(&self) {
        let now = now_ms();
        let all: Vec<Reservation> = match self.storage.list(RESERVATIONS) {
            Ok(all) => all,
            Err(e) => {
                tracing::warn!(error = %e, "failed to scan reservations for pruning");
                return;
            }
        };
        for reservation in all {
            if reservation.is_expired(now) {
                if let Err(e) = self.storage.delete(RESERVATIONS, &reservation.id) {
                    tracing::warn!(id = %reservation.id, error = %e, "failed to drop expired reservation");
                }
            }
        }
    }
}
