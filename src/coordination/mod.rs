//! Multi-agent coordination
//!
//! Prevents concurrently running agent sets from stepping on the same
//! resources, and sequences merges of their work back to a shared trunk.
//! Reservations advise rather than lock: callers are expected to check
//! `check_resource_blocked` before beginning work and hold a reservation
//! for the duration. The merge queue serializes again at merge time,
//! independent of reservations.

mod merge_queue;
mod reservations;

pub use merge_queue::MergeQueue;
pub use reservations::{ReservationManager, ReservationOutcome};
