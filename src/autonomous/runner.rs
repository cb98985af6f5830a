//! Skill execution delegates
//!
//! The autonomous driver completes skills through the SkillRunner trait.
//! The delegate is an opaque, potentially slow collaborator; its internal
//! mechanism (human-in-the-loop, sub-agent invocation) is not this
//! crate's concern. CommandSkillRunner maps skill ids to configured shell
//! commands for installations that script their skills.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::domain::Execution;
use crate::error::{CadenceError, Result};

/// What a skill execution produced.
#[derive(Debug, Clone)]
pub struct SkillReport {
    pub success: bool,
    /// Paths or identifiers of produced deliverables
    pub deliverables: Vec<String>,
    /// Optional quality score in [0, 1]
    pub score: Option<f32>,
    /// Free-form detail (command output, failure message)
    pub detail: Option<String>,
}

impl SkillReport {
    pub fn success() -> Self {
        Self {
            success: true,
            deliverables: Vec::new(),
            score: None,
            detail: None,
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            deliverables: Vec::new(),
            score: None,
            detail: Some(detail.into()),
        }
    }

    pub fn with_deliverables(mut self, deliverables: Vec<String>) -> Self {
        self.deliverables = deliverables;
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }
}

/// Trait for executing a skill on behalf of an execution.
#[async_trait]
pub trait SkillRunner: Send + Sync {
    /// Execute one skill. May block or be slow; the driver isolates
    /// executions so siblings keep progressing.
    async fn execute_skill(&self, execution: &Execution, skill_id: &str) -> Result<SkillReport>;
}

/// Skill runner that executes configured shell commands.
pub struct CommandSkillRunner {
    /// Skill id → shell command
    commands: HashMap<String, String>,
    /// Working directory for commands
    workdir: PathBuf,
    /// Timeout in milliseconds per skill
    timeout_ms: u64,
}

impl CommandSkillRunner {
    pub fn new(commands: HashMap<String, String>, workdir: PathBuf, timeout_ms: u64) -> Self {
        Self {
            commands,
            workdir,
            timeout_ms,
        }
    }

    async fn run_command(&self, command: &str, execution: &Execution) -> Result<std::process::Output> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd.current_dir(&self.workdir);
        cmd.env("CADENCE_EXECUTION_ID", &execution.id);
        cmd.env("CADENCE_PROJECT", &execution.project);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let child = cmd.spawn()?;

        let timeout = tokio::time::Duration::from_millis(self.timeout_ms);
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CadenceError::Skill(format!(
                "command timed out after {}ms",
                self.timeout_ms
            ))),
        }
    }
}

#[async_trait]
impl SkillRunner for CommandSkillRunner {
    async fn execute_skill(&self, execution: &Execution, skill_id: &str) -> Result<SkillReport> {
        let command = self
            .commands
            .get(skill_id)
            .ok_or_else(|| CadenceError::Skill(format!("no command configured for skill '{}'", skill_id)))?;

        tracing::debug!(execution_id = %execution.id, skill_id, command, "running skill command");

        let output = self.run_command(command, execution).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

        if output.status.success() {
            let mut report = SkillReport::success();
            if !stdout.is_empty() {
                report.detail = Some(stdout);
            }
            Ok(report)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Ok(SkillReport::failure(format!(
                "command exited with {:?}: {}",
                output.status.code(),
                if stderr.is_empty() { stdout } else { stderr }
            )))
        }
    }
}
