//! Error types for Cadence
//!
//! Centralized error handling using thiserror. Precondition failures
//! (gate not approved, phase incomplete, terminal-state mutation) are
//! recoverable: callers resolve the precondition and retry. Resource
//! conflicts are NOT errors — the coordinator returns them as structured
//! outcomes so callers can branch without exception machinery.

use thiserror::Error;

/// All error types that can occur in Cadence
#[derive(Debug, Error)]
pub enum CadenceError {
    /// Loop definition not found in the catalog
    #[error("Loop definition not found: {0}")]
    LoopNotFound(String),

    /// Execution not found in storage
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// Reservation not found in storage
    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    /// Merge request not found in storage
    #[error("Merge request not found: {0}")]
    MergeRequestNotFound(String),

    /// A required gate for the current phase is not approved
    #[error("Gate not approved: {0}")]
    GateNotApproved(String),

    /// The current phase has required skills neither completed nor skipped
    #[error("Phase incomplete: {0}")]
    PhaseIncomplete(String),

    /// Mutation attempted on a completed or failed execution
    #[error("Execution is terminal: {0}")]
    ExecutionTerminal(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Bad input shape or unknown reference; no state was mutated
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Skill execution delegate error
    #[error("Skill error: {0}")]
    Skill(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error (config, loop definition files)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CadenceError {
    /// Stable machine-readable kind for the tool layer.
    pub fn kind(&self) -> &'static str {
        match self {
            CadenceError::LoopNotFound(_) => "loop_not_found",
            CadenceError::ExecutionNotFound(_) => "execution_not_found",
            CadenceError::ReservationNotFound(_) => "reservation_not_found",
            CadenceError::MergeRequestNotFound(_) => "merge_request_not_found",
            CadenceError::GateNotApproved(_) => "gate_not_approved",
            CadenceError::PhaseIncomplete(_) => "phase_incomplete",
            CadenceError::ExecutionTerminal(_) => "execution_terminal",
            CadenceError::InvalidState(_) => "invalid_state",
            CadenceError::Validation(_) => "validation",
            CadenceError::Skill(_) => "skill",
            CadenceError::Storage(_) => "storage",
            CadenceError::Io(_) => "io",
            CadenceError::Json(_) => "json",
            CadenceError::Yaml(_) => "yaml",
        }
    }

    /// True for precondition failures the caller can resolve and retry.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            CadenceError::GateNotApproved(_)
                | CadenceError::PhaseIncomplete(_)
                | CadenceError::ExecutionTerminal(_)
                | CadenceError::InvalidState(_)
        )
    }
}

/// Result type alias for Cadence operations
pub type Result<T> = std::result::Result<T, CadenceError>;
