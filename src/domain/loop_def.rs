//! Loop definition templates
//!
//! A LoopDefinition is an immutable template: an ordered list of phases,
//! each with required skills, and the gates that must be approved between
//! phases. Definitions are consumed, never mutated, by the engine.

use serde::{Deserialize, Serialize};

use crate::domain::execution::ExecutionMode;

/// How a gate may be approved without a human issuing the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateApprovalType {
    /// Unattended approval permitted under supervised or full autonomy
    Auto,
    /// Unattended approval permitted under full autonomy only
    Review,
    /// Requires human sign-off, never auto-approved
    Human,
}

/// A named stage within a loop containing one or more skills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    /// Phase name, unique within the definition (e.g. "INIT")
    pub name: String,
    /// Position in the loop; unique and strictly increasing
    pub ordinal: u32,
    /// Skills that must be completed or explicitly skipped
    pub required_skills: Vec<String>,
    /// Skills that may be completed but do not block the phase
    #[serde(default)]
    pub optional_skills: Vec<String>,
    /// Whether this phase's skills may run concurrently
    #[serde(default)]
    pub parallel_allowed: bool,
    /// Required phases apply to every execution mode
    #[serde(default = "default_true")]
    pub required: bool,
    /// Modes an optional phase applies to; empty means all modes
    #[serde(default)]
    pub modes: Vec<ExecutionMode>,
}

/// An approval checkpoint keyed to the phase it follows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gate {
    /// Gate id, unique within the definition
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Name of the phase this gate follows
    pub after_phase: String,
    /// Required gates block `advance_phase` until approved
    #[serde(default = "default_true")]
    pub required: bool,
    /// Approval policy for unattended operation
    pub approval_type: GateApprovalType,
    /// Deliverables expected to exist when the gate is reviewed
    #[serde(default)]
    pub expected_deliverables: Vec<String>,
    /// Modes this gate applies to; empty means all modes
    #[serde(default)]
    pub modes: Vec<ExecutionMode>,
}

fn default_true() -> bool {
    true
}

/// Immutable template describing phases, skills, and gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDefinition {
    /// Definition id (e.g. "engineering-loop")
    pub id: String,
    /// Definition version; executions bind to id+version
    pub version: u32,
    /// Human-readable name
    pub name: String,
    /// What this loop is for
    #[serde(default)]
    pub description: String,
    /// Phases in ordinal order
    pub phases: Vec<Phase>,
    /// Gates between phases
    #[serde(default)]
    pub gates: Vec<Gate>,
}

/// Summary row for listing definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSummary {
    pub id: String,
    pub version: u32,
    pub name: String,
    pub phase_count: usize,
    pub gate_count: usize,
}

impl Phase {
    /// Whether this phase is part of an execution running in `mode`.
    pub fn applies_to(&self, mode: ExecutionMode) -> bool {
        self.required || self.modes.is_empty() || self.modes.contains(&mode)
    }

    /// All skills belonging to this phase, required first.
    pub fn all_skills(&self) -> impl Iterator<Item = &String> {
        self.required_skills.iter().chain(self.optional_skills.iter())
    }
}

impl Gate {
    /// Whether this gate is part of an execution running in `mode`.
    pub fn applies_to(&self, mode: ExecutionMode) -> bool {
        self.modes.is_empty() || self.modes.contains(&mode)
    }
}

impl LoopDefinition {
    /// Phases that apply to the given mode, in ordinal order.
    pub fn effective_phases(&self, mode: ExecutionMode) -> Vec<&Phase> {
        let mut phases: Vec<&Phase> = self.phases.iter().filter(|p| p.applies_to(mode)).collect();
        phases.sort_by_key(|p| p.ordinal);
        phases
    }

    /// Gates that apply to the given mode.
    pub fn effective_gates(&self, mode: ExecutionMode) -> Vec<&Gate> {
        self.gates.iter().filter(|g| g.applies_to(mode)).collect()
    }

    /// Look up a phase by name.
    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Look up a gate by id.
    pub fn gate(&self, id: &str) -> Option<&Gate> {
        self.gates.iter().find(|g| g.id == id)
    }

    /// The first effective phase for the given mode.
    pub fn first_phase(&self, mode: ExecutionMode) -> Option<&Phase> {
        self.effective_phases(mode).into_iter().next()
    }

    /// The effective phase following `current` for the given mode.
    pub fn next_phase(&self, mode: ExecutionMode, current: &str) -> Option<&Phase> {
        let phases = self.effective_phases(mode);
        let idx = phases.iter().position(|p| p.name == current)?;
        phases.into_iter().nth(idx + 1)
    }

    /// Gates keyed to the given phase for the given mode.
    pub fn gates_after(&self, phase: &str, mode: ExecutionMode) -> Vec<&Gate> {
        self.gates
            .iter()
            .filter(|g| g.after_phase == phase && g.applies_to(mode))
            .collect()
    }

    /// Summary row for listings.
    pub fn summary(&self) -> LoopSummary {
        LoopSummary {
            id: self.id.clone(),
            version: self.version,
            name: self.name.clone(),
            phase_count: self.phases.len(),
            gate_count: self.gates.len(),
        }
    }

    /// Check structural invariants not expressible in the type system:
    /// - at least one phase
    /// - phase names unique
    /// - phase ordinals unique and strictly increasing
    /// - gate ids unique
    /// - every gate's `after_phase` references an existing phase
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.phases.is_empty() {
            errors.push(format!("{}: definition has no phases", self.id));
        }

        let mut seen_names = std::collections::HashSet::new();
        for phase in &self.phases {
            if !seen_names.insert(phase.name.as_str()) {
                errors.push(format!("{}: duplicate phase name '{}'", self.id, phase.name));
            }
        }

        for pair in self.phases.windows(2) {
            if pair[1].ordinal <= pair[0].ordinal {
                errors.push(format!(
                    "{}: phase ordinals must be strictly increasing ('{}' {} after '{}' {})",
                    self.id, pair[1].name, pair[1].ordinal, pair[0].name, pair[0].ordinal
                ));
            }
        }

        let mut seen_gates = std::collections::HashSet::new();
        for gate in &self.gates {
            if !seen_gates.insert(gate.id.as_str()) {
                errors.push(format!("{}: duplicate gate id '{}'", self.id, gate.id));
            }
            if self.phase(&gate.after_phase).is_none() {
                errors.push(format!(
                    "{}: gate '{}' references unknown phase '{}'",
                    self.id, gate.id, gate.after_phase
                ));
            }
        }

        errors
    }
}
