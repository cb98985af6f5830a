//! Execution Engine - the phase/gate/skill state machine
//!
//! Creates executions from loop definitions, advances phases, completes and
//! skips skills, approves and rejects gates, and enforces lifecycle
//! invariants. Every operation validates all preconditions before
//! committing any state change; concurrent calls against the same
//! execution are serialized through a per-execution lock registry.

mod execution_engine;
mod locks;

pub use execution_engine::ExecutionEngine;
pub use locks::LockRegistry;
