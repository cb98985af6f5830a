//! Loop definition store
//!
//! Definitions are immutable templates: consumed, never mutated, by the
//! engine. The catalog holds the built-in definitions and any loaded from
//! a YAML directory; invalid files are rejected at load time.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::domain::{
    ExecutionMode, Gate, GateApprovalType, LoopDefinition, LoopSummary, Phase,
};
use crate::error::{CadenceError, Result};

/// Read-only definition lookup, the engine's view of the catalog.
pub trait LoopStore: Send + Sync {
    /// Resolve a definition by id.
    fn get_loop(&self, id: &str) -> Option<LoopDefinition>;

    /// Summaries of every known definition.
    fn list_loops(&self) -> Vec<LoopSummary>;
}

/// In-memory catalog of loop definitions.
pub struct LoopCatalog {
    definitions: HashMap<String, LoopDefinition>,
}

impl LoopCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
        }
    }

    /// Catalog seeded with the built-in definitions.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog
            .insert(engineering_loop())
            .expect("builtin definition is valid");
        catalog
    }

    /// Add a definition, validating its structure first.
    pub fn insert(&mut self, definition: LoopDefinition) -> Result<()> {
        let errors = definition.validate();
        if !errors.is_empty() {
            return Err(CadenceError::Validation(errors.join("; ")));
        }
        self.definitions.insert(definition.id.clone(), definition);
        Ok(())
    }

    /// Load every `*.yml`/`*.yaml` definition from a directory.
    ///
    /// Returns the number of definitions loaded. A file that fails to parse
    /// or validate fails the whole load; partial catalogs hide errors.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(0);
        }

        let mut loaded = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yml" || e == "yaml");
            if !is_yaml {
                continue;
            }

            let content = fs::read_to_string(&path)?;
            let definition: LoopDefinition = serde_yaml::from_str(&content)?;
            tracing::debug!(id = %definition.id, path = %path.display(), "loaded loop definition");
            self.insert(definition)?;
            loaded += 1;
        }

        Ok(loaded)
    }

    /// Number of definitions in the catalog.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for LoopCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LoopStore for LoopCatalog {
    fn get_loop(&self, id: &str) -> Option<LoopDefinition> {
        self.definitions.get(id).cloned()
    }

    fn list_loops(&self) -> Vec<LoopSummary> {
        let mut summaries: Vec<LoopSummary> =
            self.definitions.values().map(|d| d.summary()).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }
}

fn phase(
    name: &str,
    ordinal: u32,
    required_skills: &[&str],
    optional_skills: &[&str],
    parallel_allowed: bool,
) -> Phase {
    Phase {
        name: name.to_string(),
        ordinal,
        required_skills: required_skills.iter().map(|s| s.to_string()).collect(),
        optional_skills: optional_skills.iter().map(|s| s.to_string()).collect(),
        parallel_allowed,
        required: true,
        modes: vec![],
    }
}

/// The built-in engineering loop: INIT → ARCHITECT → BUILD → VALIDATE → SHIP,
/// with a hardening phase for enterprise brownfield work.
pub fn engineering_loop() -> LoopDefinition {
    let mut harden = phase(
        "HARDEN",
        5,
        &["security-review", "load-test"],
        &[],
        true,
    );
    harden.required = false;
    harden.modes = vec![ExecutionMode::BrownfieldEnterprise];

    LoopDefinition {
        id: "engineering-loop".to_string(),
        version: 1,
        name: "Engineering Loop".to_string(),
        description: "Standard delivery loop from project intake to ship".to_string(),
        phases: vec![
            phase(
                "INIT",
                1,
                &["intake-brief", "scaffold-workspace"],
                &["survey-prior-art"],
                false,
            ),
            phase(
                "ARCHITECT",
                2,
                &["design-outline", "interface-contracts"],
                &[],
                false,
            ),
            phase(
                "BUILD",
                3,
                &["implement-core", "implement-edges", "write-tests"],
                &["refactor-pass"],
                true,
            ),
            phase("VALIDATE", 4, &["run-test-suite", "review-findings"], &[], false),
            harden,
            phase("SHIP", 6, &["package-release", "handoff-notes"], &[], false),
        ],
        gates: vec![
            Gate {
                id: "gate-init-review".to_string(),
                name: "Intake review".to_string(),
                after_phase: "INIT".to_string(),
                required: true,
                approval_type: GateApprovalType::Auto,
                expected_deliverables: vec!["brief.md".to_string()],
                modes: vec![],
            },
            Gate {
                id: "gate-design-review".to_string(),
                name: "Design review".to_string(),
                after_phase: "ARCHITECT".to_string(),
                required: true,
                approval_type: GateApprovalType::Review,
                expected_deliverables: vec!["design.md".to_string()],
                modes: vec![],
            },
            Gate {
                id: "gate-build-check".to_string(),
                name: "Build checkpoint".to_string(),
                after_phase: "BUILD".to_string(),
                required: false,
                approval_type: GateApprovalType::Auto,
                expected_deliverables: vec![],
                modes: vec![],
            },
            Gate {
                id: "gate-validation".to_string(),
                name: "Validation sign-off".to_string(),
                after_phase: "VALIDATE".to_string(),
                required: true,
                approval_type: GateApprovalType::Review,
                expected_deliverables: vec!["test-report.md".to_string()],
                modes: vec![],
            },
            Gate {
                id: "gate-release".to_string(),
                name: "Release approval".to_string(),
                after_phase: "SHIP".to_string(),
                required: true,
                approval_type: GateApprovalType::Human,
                expected_deliverables: vec!["release-notes.md".to_string()],
                modes: vec![ExecutionMode::BrownfieldEnterprise],
            },
        ],
    }
}
