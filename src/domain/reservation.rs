//! Reservation records for multi-agent coordination
//!
//! A reservation is a time-bounded claim on a module, file, or path
//! pattern. Expiry is lazy: expired reservations are treated as absent at
//! query time, no background sweep runs.

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::id::{generate_reservation_id, now_ms};

/// What kind of resource a reservation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReservationKind {
    /// A module identifier, matched by path-prefix membership
    Module,
    /// A single file, matched exactly
    File,
    /// A glob over paths, matched by pattern intersection
    PathPattern,
}

/// A time-bounded claim on a shared resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique identifier ("rsv-1738300800123-a1b2")
    pub id: String,
    /// Collaborator holding the claim
    pub collaborator_id: String,
    /// Agent set working under the claim
    pub agent_set_id: String,
    pub kind: ReservationKind,
    /// Module id, file path, or glob depending on `kind`
    pub target: String,
    /// Exclusive claims conflict with any overlap
    pub exclusive: bool,
    /// Why the claim is held
    pub reason: String,
    /// When the claim was created (Unix ms)
    pub created_at: i64,
    /// When the claim lapses (Unix ms)
    pub expires_at: i64,
}

impl Reservation {
    pub fn new(
        collaborator_id: impl Into<String>,
        agent_set_id: impl Into<String>,
        kind: ReservationKind,
        target: impl Into<String>,
        exclusive: bool,
        duration_ms: i64,
        reason: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: generate_reservation_id(),
            collaborator_id: collaborator_id.into(),
            agent_set_id: agent_set_id.into(),
            kind,
            target: target.into(),
            exclusive,
            reason: reason.into(),
            created_at: now,
            expires_at: now + duration_ms,
        }
    }

    /// Whether the claim has lapsed as of `now`
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    /// Whether this reservation's target overlaps another target.
    pub fn overlaps(&self, kind: ReservationKind, target: &str) -> bool {
        targets_overlap(self.kind, &self.target, kind, target)
    }
}

/// Whether two reservation targets cover overlapping resources.
///
/// Files match exactly; modules match by path-prefix membership (a file
/// inside a module overlaps it, nested modules overlap); path patterns
/// match by glob intersection, approximated by matching each pattern
/// against the other target and comparing literal prefixes.
pub fn targets_overlap(
    a_kind: ReservationKind,
    a_target: &str,
    b_kind: ReservationKind,
    b_target: &str,
) -> bool {
    use ReservationKind::*;

    match (a_kind, b_kind) {
        (File, File) => a_target == b_target,
        (Module, Module) => prefix_overlap(a_target, b_target),
        (Module, File) => within_prefix(b_target, a_target),
        (File, Module) => within_prefix(a_target, b_target),
        (PathPattern, PathPattern) => {
            pattern_covers(a_target, b_target)
                || pattern_covers(b_target, a_target)
                || prefix_overlap(literal_prefix(a_target), literal_prefix(b_target))
        }
        (PathPattern, File) | (PathPattern, Module) => {
            pattern_covers(a_target, b_target)
                || prefix_overlap(literal_prefix(a_target), b_target)
        }
        (File, PathPattern) | (Module, PathPattern) => {
            pattern_covers(b_target, a_target)
                || prefix_overlap(literal_prefix(b_target), a_target)
        }
    }
}

/// Equal paths, or one is a directory prefix of the other.
fn prefix_overlap(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || a.starts_with(&format!("{}/", b)) || b.starts_with(&format!("{}/", a))
}

/// Whether `path` lies at or under `prefix`.
fn within_prefix(path: &str, prefix: &str) -> bool {
    path == prefix || path.starts_with(&format!("{}/", prefix))
}

/// The literal path segment before the first wildcard in a glob.
fn literal_prefix(pattern: &str) -> &str {
    let cut = pattern
        .find(|c| matches!(c, '*' | '?' | '['))
        .unwrap_or(pattern.len());
    pattern[..cut].trim_end_matches('/')
}

fn pattern_covers(pattern: &str, target: &str) -> bool {
    Pattern::new(pattern)
        .map(|p| p.matches(target))
        .unwrap_or(false)
}
