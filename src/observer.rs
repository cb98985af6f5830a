//! Learning/memory recorder seam
//!
//! Fire-and-forget notifications emitted by the tool layer around engine
//! operations. The engine itself has no dependency on these; recorders
//! observe events and must never fail the operation that produced them.

use crate::domain::Execution;

/// Observer of skill and gate outcomes.
pub trait ExecutionRecorder: Send + Sync {
    /// A skill completed (or was recorded as failing) in an execution.
    fn capture_skill_signal(
        &self,
        execution: &Execution,
        skill_id: &str,
        success: bool,
        score: Option<f32>,
    );

    /// A gate was approved or rejected.
    fn record_gate_outcome(
        &self,
        execution: &Execution,
        gate_id: &str,
        approved: bool,
        actor: Option<&str>,
    );
}

/// Recorder that emits structured tracing events.
#[derive(Debug, Default)]
pub struct TracingRecorder;

impl ExecutionRecorder for TracingRecorder {
    fn capture_skill_signal(
        &self,
        execution: &Execution,
        skill_id: &str,
        success: bool,
        score: Option<f32>,
    ) {
        tracing::info!(
            execution_id = %execution.id,
            loop_id = %execution.loop_id,
            skill_id,
            success,
            score,
            "skill signal"
        );
    }

    fn record_gate_outcome(
        &self,
        execution: &Execution,
        gate_id: &str,
        approved: bool,
        actor: Option<&str>,
    ) {
        tracing::info!(
            execution_id = %execution.id,
            loop_id = %execution.loop_id,
            gate_id,
            approved,
            actor,
            "gate outcome"
        );
    }
}
