//! Tagged request/response records for the command surface.

use serde::{Deserialize, Serialize};

use crate::autonomous::{AutonomousConfig, TickResult};
use crate::domain::{
    AutonomyLevel, Execution, ExecutionMode, ExecutionStatus, LoopSummary, MergeRequest,
    MergeRequestStatus, Reservation, ReservationKind, SkillOutcome,
};
use crate::error::CadenceError;

/// One variant per operation. The `op` tag carries the wire name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ToolRequest {
    StartExecution {
        loop_id: String,
        project: String,
        mode: Option<ExecutionMode>,
        autonomy: Option<AutonomyLevel>,
    },
    AdvancePhase {
        execution_id: String,
    },
    CompletePhase {
        execution_id: String,
    },
    CompleteSkill {
        execution_id: String,
        skill_id: String,
        #[serde(default)]
        deliverables: Vec<String>,
        outcome: Option<SkillOutcome>,
    },
    SkipSkill {
        execution_id: String,
        skill_id: String,
        reason: String,
    },
    ApproveGate {
        execution_id: String,
        gate_id: String,
        approved_by: Option<String>,
    },
    RejectGate {
        execution_id: String,
        gate_id: String,
        feedback: String,
    },
    PauseExecution {
        execution_id: String,
    },
    ResumeExecution {
        execution_id: String,
    },
    AbortExecution {
        execution_id: String,
        reason: Option<String>,
    },
    GetExecution {
        execution_id: String,
    },
    ListExecutions {
        status: Option<ExecutionStatus>,
        loop_id: Option<String>,
    },
    ListLoops,
    StartAutonomous,
    StopAutonomous,
    PauseAutonomous,
    ResumeAutonomous,
    Tick,
    ConfigureAutonomous {
        tick_interval_ms: Option<u64>,
        max_skill_retries: Option<u32>,
        max_parallel_executions: Option<usize>,
    },
    CreateReservation {
        collaborator_id: String,
        agent_set_id: String,
        kind: ReservationKind,
        target: String,
        #[serde(default)]
        exclusive: bool,
        duration_ms: i64,
        #[serde(default)]
        reason: String,
    },
    ReleaseReservation {
        reservation_id: String,
    },
    ExtendReservation {
        reservation_id: String,
        extra_ms: i64,
    },
    CheckResourceBlocked {
        kind: ReservationKind,
        target: String,
    },
    ListReservations,
    RequestMerge {
        collaborator_id: String,
        agent_set_id: String,
        module_id: String,
    },
    CheckMergeConflicts {
        merge_id: String,
    },
    ExecuteMerge {
        merge_id: String,
    },
    RejectMerge {
        merge_id: String,
        reason: String,
    },
    ListMergeRequests {
        status: Option<MergeRequestStatus>,
    },
}

/// Structured response per operation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ToolResponse {
    Execution { execution: Box<Execution> },
    Executions { executions: Vec<Execution> },
    Loops { loops: Vec<LoopSummary> },
    TickResults { results: Vec<TickResult> },
    AutonomousConfig { config: AutonomousConfig },
    Reservation { reservation: Box<Reservation> },
    ReservationConflict { blocking: Vec<Reservation> },
    Reservations { reservations: Vec<Reservation> },
    Merge { merge_request: Box<MergeRequest> },
    Merges { merge_requests: Vec<MergeRequest> },
    Ack,
}

/// Structured error object: machine-readable kind + human message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: String,
    pub message: String,
}

impl From<CadenceError> for ToolError {
    fn from(err: CadenceError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}
