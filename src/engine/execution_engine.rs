//! Execution engine implementation
//!
//! The engine owns every mutation of Execution records. Each operation:
//! acquires the execution's lock, loads the record, validates all
//! preconditions, applies the change, persists, and appends an audit
//! event. A failed precondition leaves the stored record untouched.

use std::sync::Arc;

use crate::catalog::LoopStore;
use crate::domain::{
    EventRecord, Execution, ExecutionStatus, GateDecision, LoopDefinition, SkillExecution,
    SkillOutcome, SkillSkip,
};
use crate::domain::execution::{AutonomyLevel, ExecutionMode};
use crate::error::{CadenceError, Result};
use crate::id::now_ms;
use crate::storage::{Filter, Storage, collections::EVENTS, collections::EXECUTIONS};

use super::locks::LockRegistry;

/// The phase/gate/skill state machine over a storage backend and a
/// read-only loop definition store.
pub struct ExecutionEngine<S: Storage, D: LoopStore> {
    storage: Arc<S>,
    loops: Arc<D>,
    locks: LockRegistry,
}

impl<S: Storage, D: LoopStore> ExecutionEngine<S, D> {
    /// Create a new engine with the given dependencies.
    pub fn new(storage: Arc<S>, loops: Arc<D>) -> Self {
        Self {
            storage,
            loops,
            locks: LockRegistry::new(),
        }
    }

    //=== Lifecycle operations ===

    /// Create and activate an execution of a loop definition.
    pub async fn start_execution(
        &self,
        loop_id: &str,
        project: &str,
        mode: Option<ExecutionMode>,
        autonomy: Option<AutonomyLevel>,
    ) -> Result<Execution> {
        if project.trim().is_empty() {
            return Err(CadenceError::Validation("project must not be empty".into()));
        }

        let definition = self
            .loops
            .get_loop(loop_id)
            .ok_or_else(|| CadenceError::LoopNotFound(loop_id.to_string()))?;

        let mode = mode.unwrap_or(ExecutionMode::Greenfield);
        let autonomy = autonomy.unwrap_or(AutonomyLevel::Supervised);

        let phase_names: Vec<String> = definition
            .effective_phases(mode)
            .into_iter()
            .map(|p| p.name.clone())
            .collect();
        if phase_names.is_empty() {
            return Err(CadenceError::Validation(format!(
                "definition '{}' has no effective phase for the requested mode",
                loop_id
            )));
        }
        let gate_ids: Vec<String> = definition
            .effective_gates(mode)
            .into_iter()
            .map(|g| g.id.clone())
            .collect();

        let mut execution = Execution::new(
            loop_id,
            definition.version,
            project,
            mode,
            autonomy,
            phase_names,
            gate_ids,
        );
        execution.status = ExecutionStatus::Active;

        self.storage.create(EXECUTIONS, &execution)?;
        self.record_event(EventRecord::execution_started(
            &execution.id,
            loop_id,
            project,
        ));

        tracing::info!(
            execution_id = %execution.id,
            loop_id,
            project,
            "execution started"
        );

        Ok(execution)
    }

    /// Mark the current phase's progress record complete. Does not move
    /// `current_phase`; gate approval happens between "work done" and
    /// "phase left".
    pub async fn complete_phase(&self, execution_id: &str) -> Result<Execution> {
        let _guard = self.locks.acquire(execution_id).await;
        let mut execution = self.load(execution_id)?;

        self.require_active(&execution)?;
        let definition = self.definition_for(&execution)?;
        let current = self.current_phase_name(&execution)?;

        let progress = execution
            .progress_for(&current)
            .ok_or_else(|| CadenceError::InvalidState(format!("no progress record for phase '{}'", current)))?;
        if progress.is_complete() {
            return Ok(execution);
        }

        let phase = definition
            .phase(&current)
            .ok_or_else(|| CadenceError::InvalidState(format!("phase '{}' not in definition", current)))?;
        let missing: Vec<&String> = phase
            .required_skills
            .iter()
            .filter(|skill| !progress.accounts_for(skill))
            .collect();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
            return Err(CadenceError::PhaseIncomplete(format!(
                "phase '{}' has unfinished required skills: {}",
                current,
                names.join(", ")
            )));
        }

        let now = now_ms();
        if let Some(progress) = execution.progress_for_mut(&current) {
            progress.completed_at = Some(now);
        }
        execution.touch();
        self.persist(&execution)?;
        self.record_event(EventRecord::phase_completed(execution_id, &current));

        Ok(execution)
    }

    /// Move `current_phase` to the next effective phase, or complete the
    /// execution if none remain. Requires the current phase complete and
    /// every required gate keyed to it approved.
    pub async fn advance_phase(&self, execution_id: &str) -> Result<Execution> {
        let _guard = self.locks.acquire(execution_id).await;
        let mut execution = self.load(execution_id)?;

        // Advancing a completed execution is an idempotent no-op
        if execution.status == ExecutionStatus::Completed {
            return Ok(execution);
        }
        self.require_active(&execution)?;

        let definition = self.definition_for(&execution)?;
        let current = self.current_phase_name(&execution)?;

        let progress = execution
            .progress_for(&current)
            .ok_or_else(|| CadenceError::InvalidState(format!("no progress record for phase '{}'", current)))?;
        if !progress.is_complete() {
            return Err(CadenceError::PhaseIncomplete(format!(
                "phase '{}' is not marked complete",
                current
            )));
        }

        let unapproved: Vec<String> = definition
            .gates_after(&current, execution.mode)
            .into_iter()
            .filter(|gate| gate.required)
            .filter(|gate| {
                execution
                    .gate_record(&gate.id)
                    .map(|record| record.decision != GateDecision::Approved)
                    .unwrap_or(true)
            })
            .map(|gate| gate.id.clone())
            .collect();
        if !unapproved.is_empty() {
            return Err(CadenceError::GateNotApproved(unapproved.join(", ")));
        }

        match definition.next_phase(execution.mode, &current) {
            Some(next) => {
                let next_name = next.name.clone();
                execution.current_phase = Some(next_name.clone());
                execution.touch();
                self.persist(&execution)?;
                self.record_event(EventRecord::phase_advanced(
                    execution_id,
                    &current,
                    Some(&next_name),
                ));
                tracing::debug!(execution_id, from = %current, to = %next_name, "phase advanced");
            }
            None => {
                execution.status = ExecutionStatus::Completed;
                execution.current_phase = None;
                execution.completed_at = Some(now_ms());
                execution.touch();
                self.persist(&execution)?;
                self.record_event(EventRecord::phase_advanced(execution_id, &current, None));
                self.record_event(EventRecord::status_change(execution_id, "active", "completed"));
                // Terminal: the lock entry is no longer needed
                self.locks.retire(execution_id).await;
                tracing::info!(execution_id, "execution completed");
            }
        }

        Ok(execution)
    }

    //=== Skill operations ===

    /// Record a completed skill in the current phase. Idempotent by skill
    /// id within a phase: re-completion overwrites the existing record.
    pub async fn complete_skill(
        &self,
        execution_id: &str,
        skill_id: &str,
        deliverables: Vec<String>,
        outcome: Option<SkillOutcome>,
    ) -> Result<Execution> {
        let _guard = self.locks.acquire(execution_id).await;
        let mut execution = self.load(execution_id)?;

        self.require_not_terminal(&execution)?;
        let definition = self.definition_for(&execution)?;
        let current = self.current_phase_name(&execution)?;
        self.require_skill_in_phase(&definition, &current, skill_id)?;

        let outcome = outcome.unwrap_or_default();
        let now = now_ms();
        let slot = execution
            .skills
            .iter()
            .position(|s| s.phase == current && s.skill_id == skill_id);
        match slot {
            Some(idx) => {
                let record = &mut execution.skills[idx];
                record.deliverables = deliverables;
                record.outcome = outcome;
                record.updated_at = now;
            }
            None => {
                execution.skills.push(SkillExecution {
                    skill_id: skill_id.to_string(),
                    phase: current.clone(),
                    version: None,
                    deliverables,
                    outcome,
                    retry_count: 0,
                    updated_at: now,
                });
            }
        }

        if let Some(progress) = execution.progress_for_mut(&current) {
            progress.skipped_skills.retain(|s| s.skill_id != skill_id);
            if !progress.completed_skills.iter().any(|s| s == skill_id) {
                progress.completed_skills.push(skill_id.to_string());
            }
        }

        execution.touch();
        self.persist(&execution)?;
        self.record_event(EventRecord::skill_completed(execution_id, &current, skill_id));

        Ok(execution)
    }

    /// Mark a skill explicitly skipped. The reason is mandatory.
    pub async fn skip_skill(
        &self,
        execution_id: &str,
        skill_id: &str,
        reason: &str,
    ) -> Result<Execution> {
        if reason.trim().is_empty() {
            return Err(CadenceError::Validation(
                "a skip reason is required".to_string(),
            ));
        }

        let _guard = self.locks.acquire(execution_id).await;
        let mut execution = self.load(execution_id)?;

        self.require_not_terminal(&execution)?;
        let definition = self.definition_for(&execution)?;
        let current = self.current_phase_name(&execution)?;
        self.require_skill_in_phase(&definition, &current, skill_id)?;

        if let Some(progress) = execution.progress_for_mut(&current) {
            progress.completed_skills.retain(|s| s != skill_id);
            let slot = progress
                .skipped_skills
                .iter()
                .position(|s| s.skill_id == skill_id);
            match slot {
                Some(idx) => progress.skipped_skills[idx].reason = reason.to_string(),
                None => progress.skipped_skills.push(SkillSkip {
                    skill_id: skill_id.to_string(),
                    reason: reason.to_string(),
                }),
            }
        }

        execution.touch();
        self.persist(&execution)?;
        self.record_event(EventRecord::skill_skipped(
            execution_id,
            &current,
            skill_id,
            reason,
        ));

        Ok(execution)
    }

    /// Record one failed attempt of a skill in the current phase and return
    /// the updated retry count. Used by the autonomous driver's retry loop.
    pub async fn record_skill_failure(
        &self,
        execution_id: &str,
        skill_id: &str,
    ) -> Result<u32> {
        let _guard = self.locks.acquire(execution_id).await;
        let mut execution = self.load(execution_id)?;

        self.require_not_terminal(&execution)?;
        let definition = self.definition_for(&execution)?;
        let current = self.current_phase_name(&execution)?;
        self.require_skill_in_phase(&definition, &current, skill_id)?;

        let now = now_ms();
        let slot = execution
            .skills
            .iter()
            .position(|s| s.phase == current && s.skill_id == skill_id);
        let retry_count = match slot {
            Some(idx) => {
                let record = &mut execution.skills[idx];
                record.retry_count += 1;
                record.outcome.success = false;
                record.updated_at = now;
                record.retry_count
            }
            None => {
                execution.skills.push(SkillExecution {
                    skill_id: skill_id.to_string(),
                    phase: current.clone(),
                    version: None,
                    deliverables: Vec::new(),
                    outcome: SkillOutcome {
                        success: false,
                        score: None,
                    },
                    retry_count: 1,
                    updated_at: now,
                });
                1
            }
        };

        execution.touch();
        self.persist(&execution)?;
        self.record_event(EventRecord::skill_failed(
            execution_id,
            &current,
            skill_id,
            retry_count,
        ));

        Ok(retry_count)
    }

    //=== Gate operations ===

    /// Approve a gate. Commutative with skill completion within a phase.
    pub async fn approve_gate(
        &self,
        execution_id: &str,
        gate_id: &str,
        approved_by: Option<&str>,
    ) -> Result<Execution> {
        let _guard = self.locks.acquire(execution_id).await;
        let mut execution = self.load(execution_id)?;

        self.require_not_terminal(&execution)?;

        let record = execution
            .gate_record_mut(gate_id)
            .ok_or_else(|| CadenceError::Validation(format!("unknown gate '{}'", gate_id)))?;
        record.decision = GateDecision::Approved;
        record.approved_by = approved_by.map(|s| s.to_string());
        record.feedback = None;
        record.decided_at = Some(now_ms());

        execution.touch();
        self.persist(&execution)?;
        self.record_event(EventRecord::gate_approved(execution_id, gate_id, approved_by));

        Ok(execution)
    }

    /// Reject a gate with feedback. Rejecting a required gate blocks an
    /// active execution; blocked is recoverable via `resume_execution`.
    pub async fn reject_gate(
        &self,
        execution_id: &str,
        gate_id: &str,
        feedback: &str,
    ) -> Result<Execution> {
        if feedback.trim().is_empty() {
            return Err(CadenceError::Validation(
                "rejection feedback is required".to_string(),
            ));
        }

        let _guard = self.locks.acquire(execution_id).await;
        let mut execution = self.load(execution_id)?;

        self.require_not_terminal(&execution)?;
        let definition = self.definition_for(&execution)?;

        let record = execution
            .gate_record_mut(gate_id)
            .ok_or_else(|| CadenceError::Validation(format!("unknown gate '{}'", gate_id)))?;
        record.decision = GateDecision::Rejected;
        record.approved_by = None;
        record.feedback = Some(feedback.to_string());
        record.decided_at = Some(now_ms());

        let gate_required = definition.gate(gate_id).map(|g| g.required).unwrap_or(false);
        if gate_required && execution.status == ExecutionStatus::Active {
            execution.status = ExecutionStatus::Blocked;
            execution.blocked_reason = Some(format!("gate '{}' rejected: {}", gate_id, feedback));
            self.record_event(EventRecord::status_change(execution_id, "active", "blocked"));
        }

        execution.touch();
        self.persist(&execution)?;
        self.record_event(EventRecord::gate_rejected(execution_id, gate_id, feedback));

        Ok(execution)
    }

    //=== Pause / resume / abort / escalate ===

    /// Suspend an active execution without touching phase/skill/gate state.
    pub async fn pause_execution(&self, execution_id: &str) -> Result<Execution> {
        let _guard = self.locks.acquire(execution_id).await;
        let mut execution = self.load(execution_id)?;

        self.require_not_terminal(&execution)?;
        if execution.status != ExecutionStatus::Active {
            return Err(CadenceError::InvalidState(format!(
                "cannot pause execution in status {:?}",
                execution.status
            )));
        }

        execution.status = ExecutionStatus::Paused;
        execution.touch();
        self.persist(&execution)?;
        self.record_event(EventRecord::status_change(execution_id, "active", "paused"));

        Ok(execution)
    }

    /// Reactivate a paused or blocked execution.
    pub async fn resume_execution(&self, execution_id: &str) -> Result<Execution> {
        let _guard = self.locks.acquire(execution_id).await;
        let mut execution = self.load(execution_id)?;

        self.require_not_terminal(&execution)?;
        if !execution.status.is_resumable() {
            return Err(CadenceError::InvalidState(format!(
                "cannot resume execution in status {:?}",
                execution.status
            )));
        }

        let old = if execution.status == ExecutionStatus::Paused {
            "paused"
        } else {
            "blocked"
        };
        execution.status = ExecutionStatus::Active;
        execution.blocked_reason = None;
        execution.touch();
        self.persist(&execution)?;
        self.record_event(EventRecord::status_change(execution_id, old, "active"));

        Ok(execution)
    }

    /// One-way transition to failed from any non-terminal state. Aborting
    /// an already-failed execution is a no-op returning the stored record,
    /// so an operator abort cannot race an autonomous tick into an error.
    pub async fn abort_execution(
        &self,
        execution_id: &str,
        reason: Option<&str>,
    ) -> Result<Execution> {
        let _guard = self.locks.acquire(execution_id).await;
        let mut execution = self.load(execution_id)?;

        if execution.status == ExecutionStatus::Failed {
            return Ok(execution);
        }
        if execution.status == ExecutionStatus::Completed {
            return Err(CadenceError::ExecutionTerminal(execution_id.to_string()));
        }

        execution.status = ExecutionStatus::Failed;
        execution.abort_reason = reason.map(|s| s.to_string());
        execution.completed_at = Some(now_ms());
        execution.touch();
        self.persist(&execution)?;
        self.record_event(EventRecord::aborted(execution_id, reason));
        self.locks.retire(execution_id).await;

        tracing::warn!(execution_id, reason, "execution aborted");

        Ok(execution)
    }

    /// Escalate to blocked, recording why. State is preserved for a human
    /// to abort or resume after remediation.
    pub async fn escalate_execution(
        &self,
        execution_id: &str,
        reason: &str,
    ) -> Result<Execution> {
        let _guard = self.locks.acquire(execution_id).await;
        let mut execution = self.load(execution_id)?;

        self.require_not_terminal(&execution)?;

        let old = execution.status;
        execution.status = ExecutionStatus::Blocked;
        execution.blocked_reason = Some(reason.to_string());
        execution.touch();
        self.persist(&execution)?;
        self.record_event(EventRecord::escalated(execution_id, reason));
        if old != ExecutionStatus::Blocked {
            self.record_event(EventRecord::status_change(
                execution_id,
                &format!("{:?}", old).to_lowercase(),
                "blocked",
            ));
        }

        tracing::warn!(execution_id, reason, "execution escalated to blocked");

        Ok(execution)
    }

    //=== Read surface ===

    /// Get an execution by id.
    pub async fn get_execution(&self, execution_id: &str) -> Result<Execution> {
        self.load(execution_id)
    }

    /// List executions, optionally filtered by status and/or loop id.
    pub async fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
        loop_id: Option<&str>,
    ) -> Result<Vec<Execution>> {
        let mut filters = Vec::new();
        if let Some(status) = status {
            filters.push(Filter::eq("status", status));
        }
        if let Some(loop_id) = loop_id {
            filters.push(Filter::eq("loop_id", loop_id));
        }
        self.storage.query(EXECUTIONS, &filters)
    }

    /// Resolve the definition an execution is bound to, checking the
    /// version still matches.
    pub fn definition_for(&self, execution: &Execution) -> Result<LoopDefinition> {
        let definition = self
            .loops
            .get_loop(&execution.loop_id)
            .ok_or_else(|| CadenceError::LoopNotFound(execution.loop_id.clone()))?;
        if definition.version != execution.loop_version {
            return Err(CadenceError::InvalidState(format!(
                "execution '{}' is bound to '{}' v{} but the catalog has v{}",
                execution.id, execution.loop_id, execution.loop_version, definition.version
            )));
        }
        Ok(definition)
    }

    //=== Internals ===

    fn load(&self, execution_id: &str) -> Result<Execution> {
        self.storage
            .get(EXECUTIONS, execution_id)?
            .ok_or_else(|| CadenceError::ExecutionNotFound(execution_id.to_string()))
    }

    fn persist(&self, execution: &Execution) -> Result<()> {
        self.storage.update(EXECUTIONS, execution)
    }

    fn require_not_terminal(&self, execution: &Execution) -> Result<()> {
        if execution.status.is_terminal() {
            return Err(CadenceError::ExecutionTerminal(execution.id.clone()));
        }
        Ok(())
    }

    fn require_active(&self, execution: &Execution) -> Result<()> {
        self.require_not_terminal(execution)?;
        if execution.status != ExecutionStatus::Active {
            return Err(CadenceError::InvalidState(format!(
                "execution '{}' is {:?}, not active",
                execution.id, execution.status
            )));
        }
        Ok(())
    }

    fn current_phase_name(&self, execution: &Execution) -> Result<String> {
        execution
            .current_phase
            .clone()
            .ok_or_else(|| CadenceError::InvalidState(format!("execution '{}' has no current phase", execution.id)))
    }

    fn require_skill_in_phase(
        &self,
        definition: &LoopDefinition,
        phase_name: &str,
        skill_id: &str,
    ) -> Result<()> {
        let phase = definition
            .phase(phase_name)
            .ok_or_else(|| CadenceError::InvalidState(format!("phase '{}' not in definition", phase_name)))?;
        if !phase.all_skills().any(|s| s == skill_id) {
            return Err(CadenceError::Validation(format!(
                "skill '{}' is not part of phase '{}'",
                skill_id, phase_name
            )));
        }
        Ok(())
    }

    /// Append an audit event. Best-effort: a failed event write is logged
    /// and never fails the operation that produced it.
    fn record_event(&self, event: EventRecord) {
        if let Err(e) = self.storage.create(EVENTS, &event) {
            tracing::warn!(event_type = %event.event_type, error = %e, "failed to record event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LoopCatalog;
    use crate::storage::JsonlStore;
    use tempfile::TempDir;

    fn engine() -> (TempDir, ExecutionEngine<JsonlStore, LoopCatalog>) {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(JsonlStore::open(temp.path()).unwrap());
        let catalog = Arc::new(LoopCatalog::builtin());
        (temp, ExecutionEngine::new(storage, catalog))
    }

    async fn started(engine: &ExecutionEngine<JsonlStore, LoopCatalog>) -> Execution {
        engine
            .start_execution("engineering-loop", "proj-x", None, None)
            .await
            .unwrap()
    }

    /// Complete every required INIT skill, complete the phase, approve the
    /// INIT gate, and advance into ARCHITECT.
    async fn through_init(
        engine: &ExecutionEngine<JsonlStore, LoopCatalog>,
        execution_id: &str,
    ) -> Execution {
        for skill in ["intake-brief", "scaffold-workspace"] {
            engine
                .complete_skill(execution_id, skill, vec![], None)
                .await
                .unwrap();
        }
        engine.complete_phase(execution_id).await.unwrap();
        engine
            .approve_gate(execution_id, "gate-init-review", Some("tester"))
            .await
            .unwrap();
        engine.advance_phase(execution_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_start_execution_initializes_state() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        assert_eq!(exec.status, ExecutionStatus::Active);
        assert_eq!(exec.current_phase.as_deref(), Some("INIT"));
        assert_eq!(exec.loop_id, "engineering-loop");
        // Greenfield: HARDEN and the enterprise release gate are excluded
        assert!(exec.progress_for("HARDEN").is_none());
        assert!(exec.gate_record("gate-release").is_none());
        assert!(exec.gate_record("gate-init-review").is_some());
    }

    #[tokio::test]
    async fn test_start_execution_unknown_loop() {
        let (_temp, engine) = engine();
        let result = engine
            .start_execution("missing-loop", "proj-x", None, None)
            .await;
        assert!(matches!(result, Err(CadenceError::LoopNotFound(_))));
    }

    #[tokio::test]
    async fn test_start_execution_empty_project() {
        let (_temp, engine) = engine();
        let result = engine
            .start_execution("engineering-loop", "  ", None, None)
            .await;
        assert!(matches!(result, Err(CadenceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_enterprise_mode_includes_harden() {
        let (_temp, engine) = engine();
        let exec = engine
            .start_execution(
                "engineering-loop",
                "proj-x",
                Some(ExecutionMode::BrownfieldEnterprise),
                None,
            )
            .await
            .unwrap();
        assert!(exec.progress_for("HARDEN").is_some());
        assert!(exec.gate_record("gate-release").is_some());
    }

    #[tokio::test]
    async fn test_complete_phase_requires_skills() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        let result = engine.complete_phase(&exec.id).await;
        match result {
            Err(CadenceError::PhaseIncomplete(msg)) => {
                assert!(msg.contains("intake-brief"));
                assert!(msg.contains("scaffold-workspace"));
            }
            other => panic!("expected PhaseIncomplete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_skill_updates_progress() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        let updated = engine
            .complete_skill(&exec.id, "intake-brief", vec!["brief.md".to_string()], None)
            .await
            .unwrap();

        let progress = updated.progress_for("INIT").unwrap();
        assert!(progress.completed_skills.contains(&"intake-brief".to_string()));
        let record = updated.skill_execution("INIT", "intake-brief").unwrap();
        assert_eq!(record.deliverables, vec!["brief.md".to_string()]);
        assert!(record.outcome.success);
    }

    #[tokio::test]
    async fn test_complete_skill_is_idempotent_by_id() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        engine
            .complete_skill(&exec.id, "intake-brief", vec!["v1.md".to_string()], None)
            .await
            .unwrap();
        let updated = engine
            .complete_skill(&exec.id, "intake-brief", vec!["v2.md".to_string()], None)
            .await
            .unwrap();

        let records: Vec<_> = updated
            .skills
            .iter()
            .filter(|s| s.skill_id == "intake-brief")
            .collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].deliverables, vec!["v2.md".to_string()]);

        let progress = updated.progress_for("INIT").unwrap();
        let count = progress
            .completed_skills
            .iter()
            .filter(|s| *s == "intake-brief")
            .count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_complete_skill_unknown_skill() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        let result = engine
            .complete_skill(&exec.id, "not-a-skill", vec![], None)
            .await;
        assert!(matches!(result, Err(CadenceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_skip_skill_requires_reason() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        let result = engine.skip_skill(&exec.id, "intake-brief", "   ").await;
        assert!(matches!(result, Err(CadenceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_skip_skill_counts_toward_completion() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        engine
            .complete_skill(&exec.id, "intake-brief", vec![], None)
            .await
            .unwrap();
        engine
            .skip_skill(&exec.id, "scaffold-workspace", "workspace already exists")
            .await
            .unwrap();

        let updated = engine.complete_phase(&exec.id).await.unwrap();
        assert!(updated.progress_for("INIT").unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_complete_overrides_skip() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        engine
            .skip_skill(&exec.id, "intake-brief", "thought unnecessary")
            .await
            .unwrap();
        let updated = engine
            .complete_skill(&exec.id, "intake-brief", vec![], None)
            .await
            .unwrap();

        let progress = updated.progress_for("INIT").unwrap();
        assert!(progress.completed_skills.contains(&"intake-brief".to_string()));
        assert!(!progress.skipped_skills.iter().any(|s| s.skill_id == "intake-brief"));
    }

    #[tokio::test]
    async fn test_advance_requires_complete_phase() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        let result = engine.advance_phase(&exec.id).await;
        assert!(matches!(result, Err(CadenceError::PhaseIncomplete(_))));
    }

    #[tokio::test]
    async fn test_advance_requires_gate_approval() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        for skill in ["intake-brief", "scaffold-workspace"] {
            engine.complete_skill(&exec.id, skill, vec![], None).await.unwrap();
        }
        engine.complete_phase(&exec.id).await.unwrap();

        let result = engine.advance_phase(&exec.id).await;
        match result {
            Err(CadenceError::GateNotApproved(msg)) => assert!(msg.contains("gate-init-review")),
            other => panic!("expected GateNotApproved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_init_scenario_advances_to_architect() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;
        assert_eq!(exec.current_phase.as_deref(), Some("INIT"));

        let advanced = through_init(&engine, &exec.id).await;
        assert_eq!(advanced.current_phase.as_deref(), Some("ARCHITECT"));
        assert_eq!(advanced.status, ExecutionStatus::Active);
        assert!(advanced.progress_for("INIT").unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_run_to_completion_and_idempotent_advance() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;
        through_init(&engine, &exec.id).await;

        // ARCHITECT
        for skill in ["design-outline", "interface-contracts"] {
            engine.complete_skill(&exec.id, skill, vec![], None).await.unwrap();
        }
        engine.complete_phase(&exec.id).await.unwrap();
        engine
            .approve_gate(&exec.id, "gate-design-review", Some("tester"))
            .await
            .unwrap();
        engine.advance_phase(&exec.id).await.unwrap();

        // BUILD (gate-build-check is optional, no approval needed)
        for skill in ["implement-core", "implement-edges", "write-tests"] {
            engine.complete_skill(&exec.id, skill, vec![], None).await.unwrap();
        }
        engine.complete_phase(&exec.id).await.unwrap();
        engine.advance_phase(&exec.id).await.unwrap();

        // VALIDATE
        for skill in ["run-test-suite", "review-findings"] {
            engine.complete_skill(&exec.id, skill, vec![], None).await.unwrap();
        }
        engine.complete_phase(&exec.id).await.unwrap();
        engine
            .approve_gate(&exec.id, "gate-validation", Some("tester"))
            .await
            .unwrap();
        engine.advance_phase(&exec.id).await.unwrap();

        // SHIP: last greenfield phase, no required gate
        for skill in ["package-release", "handoff-notes"] {
            engine.complete_skill(&exec.id, skill, vec![], None).await.unwrap();
        }
        engine.complete_phase(&exec.id).await.unwrap();
        let done = engine.advance_phase(&exec.id).await.unwrap();

        assert_eq!(done.status, ExecutionStatus::Completed);
        assert!(done.current_phase.is_none());
        assert!(done.completed_at.is_some());

        // Advancing a completed execution is a no-op, not an error
        let again = engine.advance_phase(&exec.id).await.unwrap();
        assert_eq!(again.status, ExecutionStatus::Completed);
        assert_eq!(again.completed_at, done.completed_at);
    }

    #[tokio::test]
    async fn test_reject_required_gate_blocks() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        let updated = engine
            .reject_gate(&exec.id, "gate-init-review", "brief is missing scope")
            .await
            .unwrap();

        assert_eq!(updated.status, ExecutionStatus::Blocked);
        assert!(updated.blocked_reason.as_deref().unwrap().contains("gate-init-review"));
        let record = updated.gate_record("gate-init-review").unwrap();
        assert_eq!(record.decision, GateDecision::Rejected);
        assert_eq!(record.feedback.as_deref(), Some("brief is missing scope"));
    }

    #[tokio::test]
    async fn test_reject_optional_gate_does_not_block() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        let updated = engine
            .reject_gate(&exec.id, "gate-build-check", "flaky check")
            .await
            .unwrap();
        assert_eq!(updated.status, ExecutionStatus::Active);
    }

    #[tokio::test]
    async fn test_blocked_recovery_scenario() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        for skill in ["intake-brief", "scaffold-workspace"] {
            engine.complete_skill(&exec.id, skill, vec![], None).await.unwrap();
        }
        engine.complete_phase(&exec.id).await.unwrap();

        let blocked = engine
            .reject_gate(&exec.id, "gate-init-review", "needs rework")
            .await
            .unwrap();
        assert_eq!(blocked.status, ExecutionStatus::Blocked);

        // Advancing while blocked is a precondition error
        let result = engine.advance_phase(&exec.id).await;
        assert!(matches!(result, Err(CadenceError::InvalidState(_))));

        // Fresh approval, resume, then advance succeeds
        engine
            .approve_gate(&exec.id, "gate-init-review", Some("reviewer"))
            .await
            .unwrap();
        let resumed = engine.resume_execution(&exec.id).await.unwrap();
        assert_eq!(resumed.status, ExecutionStatus::Active);

        let advanced = engine.advance_phase(&exec.id).await.unwrap();
        assert_eq!(advanced.current_phase.as_deref(), Some("ARCHITECT"));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        let paused = engine.pause_execution(&exec.id).await.unwrap();
        assert_eq!(paused.status, ExecutionStatus::Paused);
        // Pause leaves phase state untouched
        assert_eq!(paused.current_phase.as_deref(), Some("INIT"));

        // Pausing a paused execution is invalid
        assert!(engine.pause_execution(&exec.id).await.is_err());

        let resumed = engine.resume_execution(&exec.id).await.unwrap();
        assert_eq!(resumed.status, ExecutionStatus::Active);
    }

    #[tokio::test]
    async fn test_resume_active_is_invalid() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;
        assert!(engine.resume_execution(&exec.id).await.is_err());
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        let failed = engine
            .abort_execution(&exec.id, Some("operator abort"))
            .await
            .unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(failed.abort_reason.as_deref(), Some("operator abort"));

        let again = engine.abort_execution(&exec.id, Some("second")).await.unwrap();
        assert_eq!(again.status, ExecutionStatus::Failed);
        // The first abort's reason is preserved
        assert_eq!(again.abort_reason.as_deref(), Some("operator abort"));
    }

    #[tokio::test]
    async fn test_abort_completed_is_terminal_error() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;
        through_init(&engine, &exec.id).await;

        // Drive to completion
        for (phase_skills, gate) in [
            (vec!["design-outline", "interface-contracts"], Some("gate-design-review")),
            (vec!["implement-core", "implement-edges", "write-tests"], None),
            (vec!["run-test-suite", "review-findings"], Some("gate-validation")),
            (vec!["package-release", "handoff-notes"], None),
        ] {
            for skill in phase_skills {
                engine.complete_skill(&exec.id, skill, vec![], None).await.unwrap();
            }
            engine.complete_phase(&exec.id).await.unwrap();
            if let Some(gate) = gate {
                engine.approve_gate(&exec.id, gate, Some("tester")).await.unwrap();
            }
            engine.advance_phase(&exec.id).await.unwrap();
        }

        let result = engine.abort_execution(&exec.id, None).await;
        assert!(matches!(result, Err(CadenceError::ExecutionTerminal(_))));
    }

    #[tokio::test]
    async fn test_terminal_executions_refuse_mutation() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;
        engine.abort_execution(&exec.id, None).await.unwrap();

        assert!(matches!(
            engine.complete_skill(&exec.id, "intake-brief", vec![], None).await,
            Err(CadenceError::ExecutionTerminal(_))
        ));
        assert!(matches!(
            engine.approve_gate(&exec.id, "gate-init-review", None).await,
            Err(CadenceError::ExecutionTerminal(_))
        ));
        assert!(matches!(
            engine.pause_execution(&exec.id).await,
            Err(CadenceError::ExecutionTerminal(_))
        ));
        assert!(matches!(
            engine.advance_phase(&exec.id).await,
            Err(CadenceError::ExecutionTerminal(_))
        ));
    }

    #[tokio::test]
    async fn test_escalate_blocks_with_reason() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        let escalated = engine
            .escalate_execution(&exec.id, "skill 'intake-brief' exhausted 3 retries")
            .await
            .unwrap();
        assert_eq!(escalated.status, ExecutionStatus::Blocked);
        assert!(escalated.blocked_reason.as_deref().unwrap().contains("3 retries"));
    }

    #[tokio::test]
    async fn test_record_skill_failure_increments() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        assert_eq!(engine.record_skill_failure(&exec.id, "intake-brief").await.unwrap(), 1);
        assert_eq!(engine.record_skill_failure(&exec.id, "intake-brief").await.unwrap(), 2);

        let updated = engine.get_execution(&exec.id).await.unwrap();
        let record = updated.skill_execution("INIT", "intake-brief").unwrap();
        assert_eq!(record.retry_count, 2);
        assert!(!record.outcome.success);
    }

    #[tokio::test]
    async fn test_list_executions_filters() {
        let (_temp, engine) = engine();
        let a = started(&engine).await;
        let _b = started(&engine).await;
        engine.abort_execution(&a.id, None).await.unwrap();

        let active = engine
            .list_executions(Some(ExecutionStatus::Active), None)
            .await
            .unwrap();
        assert_eq!(active.len(), 1);

        let failed = engine
            .list_executions(Some(ExecutionStatus::Failed), Some("engineering-loop"))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, a.id);
    }

    #[tokio::test]
    async fn test_failed_operation_leaves_record_unchanged() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;

        let before = engine.get_execution(&exec.id).await.unwrap();
        let _ = engine.advance_phase(&exec.id).await; // PhaseIncomplete
        let after = engine.get_execution(&exec.id).await.unwrap();

        assert_eq!(before.updated_at, after.updated_at);
        assert_eq!(before.current_phase, after.current_phase);
        assert_eq!(before.status, after.status);
    }

    #[tokio::test]
    async fn test_events_are_recorded() {
        let (_temp, engine) = engine();
        let exec = started(&engine).await;
        engine
            .complete_skill(&exec.id, "intake-brief", vec![], None)
            .await
            .unwrap();

        let events: Vec<EventRecord> = engine.storage.list(EVENTS).unwrap();
        assert!(events.iter().any(|e| e.event_type == "execution.started"));
        assert!(events.iter().any(|e| e.event_type == "skill.completed"));
    }
}
