//! Execution records and related types
//!
//! An Execution is one running instance of a loop bound to a project. It is
//! created by `start_execution`, mutated exclusively through engine
//! operations, and becomes immutable once completed or failed.

use serde::{Deserialize, Serialize};

use crate::id::{generate_execution_id, now_ms};

/// Delivery mode of a project; selects which optional phases/gates apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    Greenfield,
    BrownfieldPolish,
    BrownfieldEnterprise,
}

/// How much of the execution runs unattended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutonomyLevel {
    /// Gates and skill retries run unattended where policy allows
    Full,
    /// Only explicitly auto-eligible gates are approved unattended
    Supervised,
    /// Every engine call is human-issued
    Manual,
}

/// Status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Created, not yet activated
    Pending,
    /// Progressing through phases
    Active,
    /// User-initiated pause (resumable)
    Paused,
    /// Needs intervention: required gate rejected or retry budget exhausted
    Blocked,
    /// Advanced past the final phase
    Completed,
    /// Aborted
    Failed,
}

impl ExecutionStatus {
    /// Returns true if the execution can no longer be mutated
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    /// Returns true if the execution can be resumed to active
    pub fn is_resumable(&self) -> bool {
        matches!(self, ExecutionStatus::Paused | ExecutionStatus::Blocked)
    }
}

/// Decision state of a gate within an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateDecision {
    Pending,
    Approved,
    Rejected,
}

/// Per-gate state within an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRecord {
    /// Gate id from the bound definition
    pub gate_id: String,
    pub decision: GateDecision,
    /// Who approved (user id, or "autonomous")
    pub approved_by: Option<String>,
    /// Rejection feedback
    pub feedback: Option<String>,
    /// When the decision was made (Unix ms)
    pub decided_at: Option<i64>,
}

impl GateRecord {
    pub fn pending(gate_id: impl Into<String>) -> Self {
        Self {
            gate_id: gate_id.into(),
            decision: GateDecision::Pending,
            approved_by: None,
            feedback: None,
            decided_at: None,
        }
    }
}

/// A skill explicitly skipped with a mandatory reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSkip {
    pub skill_id: String,
    pub reason: String,
}

/// Per-phase progress within an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseProgress {
    /// Phase name from the bound definition
    pub phase: String,
    /// Skills completed in this phase
    pub completed_skills: Vec<String>,
    /// Skills explicitly skipped in this phase
    pub skipped_skills: Vec<SkillSkip>,
    /// When the phase was marked complete (Unix ms)
    pub completed_at: Option<i64>,
}

impl PhaseProgress {
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            completed_skills: Vec::new(),
            skipped_skills: Vec::new(),
            completed_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Whether a skill is accounted for (completed or skipped)
    pub fn accounts_for(&self, skill_id: &str) -> bool {
        self.completed_skills.iter().any(|s| s == skill_id)
            || self.skipped_skills.iter().any(|s| s.skill_id == skill_id)
    }
}

/// Result of a single skill execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillOutcome {
    pub success: bool,
    /// Optional quality score in [0, 1]
    pub score: Option<f32>,
}

impl Default for SkillOutcome {
    fn default() -> Self {
        Self {
            success: true,
            score: None,
        }
    }
}

/// Record of one skill's execution within a phase.
///
/// Keyed by (phase, skill_id): re-completing a skill overwrites this record
/// rather than appending a duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillExecution {
    pub skill_id: String,
    /// Phase the skill ran in
    pub phase: String,
    /// Skill version used, if the delegate reports one
    pub version: Option<String>,
    /// Paths or identifiers of produced deliverables
    pub deliverables: Vec<String>,
    pub outcome: SkillOutcome,
    /// Failed attempts so far (autonomous retry bookkeeping)
    pub retry_count: u32,
    pub updated_at: i64,
}

/// One running instance of a loop bound to a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    //=== Identity ===
    /// Unique identifier ("exe-1738300800123-a1b2")
    pub id: String,
    /// Bound definition id
    pub loop_id: String,
    /// Bound definition version
    pub loop_version: u32,
    /// Project this execution works on
    pub project: String,

    //=== Policy ===
    pub mode: ExecutionMode,
    pub autonomy: AutonomyLevel,

    //=== Runtime State ===
    pub status: ExecutionStatus,
    /// Current phase name; None once the execution has completed
    pub current_phase: Option<String>,
    /// One record per effective phase, in ordinal order
    pub phase_progress: Vec<PhaseProgress>,
    /// One record per effective gate
    pub gates: Vec<GateRecord>,
    /// Skill execution records, one per (phase, skill)
    pub skills: Vec<SkillExecution>,
    /// Why the execution is blocked, when it is
    pub blocked_reason: Option<String>,
    /// Abort reason, when aborted
    pub abort_reason: Option<String>,

    //=== Timestamps ===
    pub started_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Execution {
    /// Create a new execution bound to a definition. The caller supplies the
    /// effective phase names (ordinal order) and gate ids for the mode.
    pub fn new(
        loop_id: impl Into<String>,
        loop_version: u32,
        project: impl Into<String>,
        mode: ExecutionMode,
        autonomy: AutonomyLevel,
        phase_names: Vec<String>,
        gate_ids: Vec<String>,
    ) -> Self {
        let now = now_ms();
        let current_phase = phase_names.first().cloned();

        Self {
            id: generate_execution_id(),
            loop_id: loop_id.into(),
            loop_version,
            project: project.into(),
            mode,
            autonomy,
            status: ExecutionStatus::Pending,
            current_phase,
            phase_progress: phase_names.into_iter().map(PhaseProgress::new).collect(),
            gates: gate_ids.into_iter().map(GateRecord::pending).collect(),
            skills: Vec::new(),
            blocked_reason: None,
            abort_reason: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Update the timestamp
    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }

    /// Progress record for a phase
    pub fn progress_for(&self, phase: &str) -> Option<&PhaseProgress> {
        self.phase_progress.iter().find(|p| p.phase == phase)
    }

    /// Mutable progress record for a phase
    pub fn progress_for_mut(&mut self, phase: &str) -> Option<&mut PhaseProgress> {
        self.phase_progress.iter_mut().find(|p| p.phase == phase)
    }

    /// Gate record by gate id
    pub fn gate_record(&self, gate_id: &str) -> Option<&GateRecord> {
        self.gates.iter().find(|g| g.gate_id == gate_id)
    }

    /// Mutable gate record by gate id
    pub fn gate_record_mut(&mut self, gate_id: &str) -> Option<&mut GateRecord> {
        self.gates.iter_mut().find(|g| g.gate_id == gate_id)
    }

    /// Skill execution record for (phase, skill)
    pub fn skill_execution(&self, phase: &str, skill_id: &str) -> Option<&SkillExecution> {
        self.skills
            .iter()
            .find(|s| s.phase == phase && s.skill_id == skill_id)
    }

    /// Mutable skill execution record for (phase, skill)
    pub fn skill_execution_mut(&mut self, phase: &str, skill_id: &str) -> Option<&mut SkillExecution> {
        self.skills
            .iter_mut()
            .find(|s| s.phase == phase && s.skill_id == skill_id)
    }
}
