//! CLI command definitions using clap.
//!
//! Subcommands mirror the tool-layer operations: execution lifecycle,
//! autonomous driver controls, and coordinator (reservation/merge) calls.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cadence::domain::{AutonomyLevel, ExecutionMode, ExecutionStatus, ReservationKind};

fn parse_enum<T: serde::de::DeserializeOwned>(kind: &str, s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| format!("invalid {} '{}'", kind, s))
}

pub fn parse_mode(s: &str) -> Result<ExecutionMode, String> {
    parse_enum("mode", s)
}

pub fn parse_autonomy(s: &str) -> Result<AutonomyLevel, String> {
    parse_enum("autonomy level", s)
}

pub fn parse_status(s: &str) -> Result<ExecutionStatus, String> {
    parse_enum("status", s)
}

pub fn parse_kind(s: &str) -> Result<ReservationKind, String> {
    parse_enum("reservation kind", s)
}

/// Cadence - phase/gate loop execution engine
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an execution of a loop definition
    Start {
        /// Loop definition id (e.g. engineering-loop)
        loop_id: String,

        /// Project identifier
        project: String,

        /// Execution mode (greenfield, brownfield-polish, brownfield-enterprise)
        #[arg(short, long, value_parser = parse_mode)]
        mode: Option<ExecutionMode>,

        /// Autonomy level (full, supervised, manual)
        #[arg(short, long, value_parser = parse_autonomy)]
        autonomy: Option<AutonomyLevel>,
    },

    /// Advance an execution past its current phase
    Advance {
        /// Execution id
        id: String,
    },

    /// Mark the current phase's work complete
    CompletePhase {
        /// Execution id
        id: String,
    },

    /// Record a completed skill in the current phase
    CompleteSkill {
        /// Execution id
        id: String,

        /// Skill id
        skill: String,

        /// Deliverables produced (repeatable)
        #[arg(short, long = "deliverable")]
        deliverables: Vec<String>,

        /// Quality score in [0, 1]
        #[arg(short, long)]
        score: Option<f32>,
    },

    /// Mark a skill explicitly skipped
    SkipSkill {
        /// Execution id
        id: String,

        /// Skill id
        skill: String,

        /// Why the skill is skipped (mandatory)
        #[arg(short, long)]
        reason: String,
    },

    /// Approve a gate
    Approve {
        /// Execution id
        id: String,

        /// Gate id
        gate: String,

        /// Approver identity
        #[arg(short, long)]
        by: Option<String>,
    },

    /// Reject a gate with feedback
    Reject {
        /// Execution id
        id: String,

        /// Gate id
        gate: String,

        /// Rejection feedback (mandatory)
        #[arg(short, long)]
        feedback: String,
    },

    /// Pause an active execution
    Pause {
        /// Execution id
        id: String,
    },

    /// Resume a paused or blocked execution
    Resume {
        /// Execution id
        id: String,
    },

    /// Abort an execution
    Abort {
        /// Execution id
        id: String,

        /// Abort reason
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Show one execution
    Status {
        /// Execution id
        id: String,
    },

    /// List executions
    List {
        /// Filter by status (pending, active, paused, blocked, completed, failed)
        #[arg(short, long, value_parser = parse_status)]
        status: Option<ExecutionStatus>,

        /// Filter by loop definition id
        #[arg(short, long)]
        loop_id: Option<String>,
    },

    /// List loop definitions
    Loops,

    /// Autonomous driver controls
    Auto {
        #[command(subcommand)]
        command: AutoCommands,
    },

    /// Claim a resource for an agent set
    Reserve {
        /// Collaborator id
        collaborator: String,

        /// Agent set id
        agent_set: String,

        /// Target kind (module, file, path-pattern)
        #[arg(value_parser = parse_kind)]
        kind: ReservationKind,

        /// Target (module id, file path, or glob)
        target: String,

        /// Exclusive claim
        #[arg(short, long)]
        exclusive: bool,

        /// Lifetime in milliseconds (defaults from config)
        #[arg(short, long)]
        duration_ms: Option<i64>,

        /// Why the claim is held
        #[arg(short, long, default_value = "")]
        reason: String,
    },

    /// Release a reservation early
    Release {
        /// Reservation id
        id: String,
    },

    /// Extend an unexpired reservation
    Extend {
        /// Reservation id
        id: String,

        /// Additional lifetime in milliseconds
        extra_ms: i64,
    },

    /// Show unexpired reservations blocking a resource
    Blocked {
        /// Target kind (module, file, path-pattern)
        #[arg(value_parser = parse_kind)]
        kind: ReservationKind,

        /// Target to check
        target: String,
    },

    /// List unexpired reservations
    Reservations,

    /// Merge queue commands
    Merge {
        #[command(subcommand)]
        command: MergeCommands,
    },
}

/// Autonomous driver subcommands
#[derive(Subcommand, Debug)]
pub enum AutoCommands {
    /// Run the scheduler in the foreground until interrupted
    Run,

    /// Run a single tick
    Tick,

    /// Adjust driver settings
    Configure {
        /// Interval between scheduled ticks in milliseconds
        #[arg(long)]
        tick_interval_ms: Option<u64>,

        /// Failed attempts allowed per skill before escalation
        #[arg(long)]
        max_skill_retries: Option<u32>,

        /// Executions processed concurrently per tick
        #[arg(long)]
        max_parallel_executions: Option<usize>,
    },
}

/// Merge queue subcommands
#[derive(Subcommand, Debug)]
pub enum MergeCommands {
    /// Enqueue a merge request
    Request {
        /// Collaborator id
        collaborator: String,

        /// Agent set id
        agent_set: String,

        /// Module to merge
        module: String,
    },

    /// Run the conflict check for a request
    Check {
        /// Merge request id
        id: String,
    },

    /// Execute an approved merge
    Execute {
        /// Merge request id
        id: String,
    },

    /// Retire a request that will not merge
    Reject {
        /// Merge request id
        id: String,

        /// Rejection reason
        #[arg(short, long)]
        reason: String,
    },

    /// List merge requests
    List,
}
