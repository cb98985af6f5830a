//! Autonomous executor implementation
//!
//! Each tick selects eligible executions (active, not manual, not already
//! in flight), processes at most `max_parallel_executions` of them
//! concurrently, and per execution: auto-approves eligible gates, runs
//! outstanding skills through the delegate with a bounded retry budget,
//! and completes/advances the phase as preconditions become satisfied.
//! One execution's failure never aborts the tick for its siblings.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::catalog::LoopStore;
use crate::domain::{Execution, GateDecision, SkillOutcome};
use crate::engine::ExecutionEngine;
use crate::error::{CadenceError, Result};
use crate::storage::Storage;

use super::policy::{can_auto_approve, is_eligible};
use super::runner::{SkillReport, SkillRunner};

/// Configuration for the autonomous executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomousConfig {
    /// Interval between scheduled ticks in milliseconds
    pub tick_interval_ms: u64,
    /// Failed attempts allowed per skill before escalation
    pub max_skill_retries: u32,
    /// Executions processed concurrently per tick
    pub max_parallel_executions: usize,
}

impl Default for AutonomousConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5000,
            max_skill_retries: 3,
            max_parallel_executions: 3,
        }
    }
}

/// What happened to one execution during a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickAction {
    /// A gate was auto-approved under the autonomy policy
    GateApproved(String),
    /// A skill completed through the delegate
    SkillCompleted(String),
    /// A skill exhausted its retry budget
    SkillExhausted { skill_id: String, retry_count: u32 },
    /// The current phase was marked complete
    PhaseCompleted(String),
    /// The execution advanced; None means it completed
    Advanced { to: Option<String> },
    /// Advancement is waiting on the named gates
    AwaitingApproval(String),
    /// The execution was escalated to blocked
    Escalated(String),
}

/// Per-execution outcome of a tick. Errors are captured here, never
/// propagated across executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickResult {
    pub execution_id: String,
    pub actions: Vec<TickAction>,
    pub error: Option<String>,
}

impl TickResult {
    fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            actions: Vec::new(),
            error: None,
        }
    }
}

enum SkillRunOutcome {
    Completed,
    Exhausted { retry_count: u32 },
}

/// Polling driver over the execution engine.
pub struct AutonomousExecutor<S: Storage, D: LoopStore, R: SkillRunner> {
    engine: Arc<ExecutionEngine<S, D>>,
    runner: Arc<R>,
    config: RwLock<AutonomousConfig>,
    /// Executions currently being processed by some tick
    in_flight: Mutex<HashSet<String>>,
    paused: AtomicBool,
    task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl<S, D, R> AutonomousExecutor<S, D, R>
where
    S: Storage + 'static,
    D: LoopStore + 'static,
    R: SkillRunner + 'static,
{
    pub fn new(engine: Arc<ExecutionEngine<S, D>>, runner: Arc<R>, config: AutonomousConfig) -> Self {
        Self {
            engine,
            runner,
            config: RwLock::new(config),
            in_flight: Mutex::new(HashSet::new()),
            paused: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Current configuration snapshot.
    pub async fn config(&self) -> AutonomousConfig {
        self.config.read().await.clone()
    }

    /// Adjust configuration at runtime. Retry and parallelism changes apply
    /// on the next tick; a tick-interval change applies on the next start.
    pub async fn configure(
        &self,
        tick_interval_ms: Option<u64>,
        max_skill_retries: Option<u32>,
        max_parallel_executions: Option<usize>,
    ) -> AutonomousConfig {
        let mut config = self.config.write().await;
        if let Some(interval) = tick_interval_ms {
            config.tick_interval_ms = interval;
        }
        if let Some(retries) = max_skill_retries {
            config.max_skill_retries = retries;
        }
        if let Some(parallel) = max_parallel_executions {
            config.max_parallel_executions = parallel;
        }
        config.clone()
    }

    /// Run one tick over every eligible execution.
    pub async fn tick(&self) -> Result<Vec<TickResult>> {
        let config = self.config.read().await.clone();

        let executions = self
            .engine
            .list_executions(Some(crate::domain::ExecutionStatus::Active), None)
            .await?;

        let mut selected = Vec::new();
        {
            let mut in_flight = self.in_flight.lock().await;
            for execution in executions {
                if selected.len() >= config.max_parallel_executions {
                    break;
                }
                if !is_eligible(&execution) || in_flight.contains(&execution.id) {
                    continue;
                }
                in_flight.insert(execution.id.clone());
                selected.push(execution);
            }
        }

        let results = join_all(
            selected
                .iter()
                .map(|execution| self.drive(execution, &config)),
        )
        .await;

        {
            let mut in_flight = self.in_flight.lock().await;
            for execution in &selected {
                in_flight.remove(&execution.id);
            }
        }

        Ok(results)
    }

    /// Process one execution, capturing any error into its TickResult.
    async fn drive(&self, execution: &Execution, config: &AutonomousConfig) -> TickResult {
        let mut result = TickResult::new(&execution.id);
        if let Err(e) = self.drive_inner(&execution.id, config, &mut result).await {
            tracing::error!(execution_id = %execution.id, error = %e, "tick failed for execution");
            result.error = Some(e.to_string());
        }
        result
    }

    async fn drive_inner(
        &self,
        execution_id: &str,
        config: &AutonomousConfig,
        result: &mut TickResult,
    ) -> Result<()> {
        // Reload: the listing snapshot may be stale
        let execution = self.engine.get_execution(execution_id).await?;
        if !is_eligible(&execution) {
            return Ok(());
        }
        let definition = self.engine.definition_for(&execution)?;
        let Some(current) = execution.current_phase.clone() else {
            return Ok(());
        };

        // Auto-approve pending gates for the current phase
        for gate in definition.gates_after(&current, execution.mode) {
            let pending = execution
                .gate_record(&gate.id)
                .map(|record| record.decision == GateDecision::Pending)
                .unwrap_or(false);
            if pending && can_auto_approve(gate.approval_type, execution.autonomy) {
                self.engine
                    .approve_gate(execution_id, &gate.id, Some("autonomous"))
                    .await?;
                result.actions.push(TickAction::GateApproved(gate.id.clone()));
            }
        }

        // Run outstanding required skills with bounded retry
        let phase = definition.phase(&current).ok_or_else(|| {
            CadenceError::InvalidState(format!("phase '{}' not in definition", current))
        })?;
        let progress = execution.progress_for(&current).ok_or_else(|| {
            CadenceError::InvalidState(format!("no progress record for phase '{}'", current))
        })?;
        let outstanding: Vec<String> = phase
            .required_skills
            .iter()
            .filter(|skill| !progress.accounts_for(skill))
            .cloned()
            .collect();

        let mut exhausted: Vec<(String, u32)> = Vec::new();
        if phase.parallel_allowed {
            let outcomes = join_all(outstanding.iter().map(|skill| {
                self.run_skill(&execution, skill, config.max_skill_retries)
            }))
            .await;
            for (skill, outcome) in outstanding.iter().zip(outcomes) {
                match outcome? {
                    SkillRunOutcome::Completed => {
                        result.actions.push(TickAction::SkillCompleted(skill.clone()));
                    }
                    SkillRunOutcome::Exhausted { retry_count } => {
                        result.actions.push(TickAction::SkillExhausted {
                            skill_id: skill.clone(),
                            retry_count,
                        });
                        exhausted.push((skill.clone(), retry_count));
                    }
                }
            }
        } else {
            for skill in &outstanding {
                match self
                    .run_skill(&execution, skill, config.max_skill_retries)
                    .await?
                {
                    SkillRunOutcome::Completed => {
                        result.actions.push(TickAction::SkillCompleted(skill.clone()));
                    }
                    SkillRunOutcome::Exhausted { retry_count } => {
                        result.actions.push(TickAction::SkillExhausted {
                            skill_id: skill.clone(),
                            retry_count,
                        });
                        exhausted.push((skill.clone(), retry_count));
                        break;
                    }
                }
            }
        }

        if !exhausted.is_empty() {
            let summary: Vec<String> = exhausted
                .iter()
                .map(|(skill, count)| format!("skill '{}' failed after {} attempts", skill, count))
                .collect();
            let reason = summary.join("; ");
            self.engine.escalate_execution(execution_id, &reason).await?;
            result.actions.push(TickAction::Escalated(reason));
            return Ok(());
        }

        // Complete and advance as preconditions allow
        match self.engine.complete_phase(execution_id).await {
            Ok(_) => result.actions.push(TickAction::PhaseCompleted(current.clone())),
            Err(e) if e.is_precondition() => return Ok(()),
            Err(e) => return Err(e),
        }
        match self.engine.advance_phase(execution_id).await {
            Ok(updated) => {
                result.actions.push(TickAction::Advanced {
                    to: updated.current_phase.clone(),
                });
            }
            Err(CadenceError::GateNotApproved(gates)) => {
                result.actions.push(TickAction::AwaitingApproval(gates));
            }
            Err(e) if e.is_precondition() => {}
            Err(e) => return Err(e),
        }

        Ok(())
    }

    /// Attempt a skill until it succeeds or its retry budget is exhausted.
    /// A delegate error counts as a failed attempt.
    async fn run_skill(
        &self,
        execution: &Execution,
        skill_id: &str,
        max_retries: u32,
    ) -> Result<SkillRunOutcome> {
        loop {
            let report = match self.runner.execute_skill(execution, skill_id).await {
                Ok(report) => report,
                Err(e) => SkillReport::failure(e.to_string()),
            };

            if report.success {
                let outcome = SkillOutcome {
                    success: true,
                    score: report.score,
                };
                self.engine
                    .complete_skill(&execution.id, skill_id, report.deliverables, Some(outcome))
                    .await?;
                return Ok(SkillRunOutcome::Completed);
            }

            let retry_count = self
                .engine
                .record_skill_failure(&execution.id, skill_id)
                .await?;
            tracing::warn!(
                execution_id = %execution.id,
                skill_id,
                retry_count,
                detail = report.detail.as_deref().unwrap_or(""),
                "skill attempt failed"
            );
            if retry_count >= max_retries {
                return Ok(SkillRunOutcome::Exhausted { retry_count });
            }
        }
    }

    //=== Scheduler lifecycle ===

    /// Start the periodic scheduler. Errors if already running.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(CadenceError::InvalidState(
                "autonomous executor already running".to_string(),
            ));
        }

        let interval_ms = self.config.read().await.tick_interval_ms.max(1);
        let (tx, mut rx) = watch::channel(false);
        let this = Arc::clone(&self);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if this.paused.load(Ordering::SeqCst) {
                            continue;
                        }
                        match this.tick().await {
                            Ok(results) => {
                                for result in &results {
                                    if let Some(error) = &result.error {
                                        tracing::error!(
                                            execution_id = %result.execution_id,
                                            error,
                                            "execution errored during scheduled tick"
                                        );
                                    }
                                }
                            }
                            Err(e) => tracing::error!(error = %e, "scheduled tick failed"),
                        }
                    }
                }
            }
        });

        *task = Some((tx, handle));
        tracing::info!(interval_ms, "autonomous executor started");
        Ok(())
    }

    /// Stop the scheduler. An in-flight tick finishes first.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        if let Some((tx, handle)) = task.take() {
            let _ = tx.send(true);
            let _ = handle.await;
            tracing::info!("autonomous executor stopped");
        }
    }

    /// Halt new scheduled ticks without cancelling an in-flight one.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Re-enable scheduled ticks.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }
}
