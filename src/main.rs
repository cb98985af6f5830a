use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, TimeZone};
use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;

mod cli;

use cadence::autonomous::{AutonomousConfig, AutonomousExecutor, CommandSkillRunner};
use cadence::catalog::LoopCatalog;
use cadence::config::Config;
use cadence::coordination::{MergeQueue, ReservationManager};
use cadence::domain::{Execution, GateDecision, MergeRequest, Reservation};
use cadence::engine::ExecutionEngine;
use cadence::observer::TracingRecorder;
use cadence::storage::JsonlStore;
use cadence::tools::{ToolError, ToolRequest, ToolResponse, ToolService};
use cli::Cli;
use cli::commands::{AutoCommands, Commands, MergeCommands};

type Service = ToolService<JsonlStore, CommandSkillRunner>;
type Executor = AutonomousExecutor<JsonlStore, LoopCatalog, CommandSkillRunner>;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadence")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("cadence.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Build the full service stack from configuration.
fn build_service(config: &Config) -> Result<(Service, Arc<Executor>)> {
    let storage = Arc::new(
        JsonlStore::open(&config.storage.data_dir)
            .map_err(|e| eyre!("failed to open storage: {}", e))?,
    );

    let mut catalog = LoopCatalog::builtin();
    if let Some(dir) = &config.loops.definitions_dir {
        let loaded = catalog
            .load_dir(dir)
            .map_err(|e| eyre!("failed to load loop definitions: {}", e))?;
        info!("Loaded {} loop definitions from {}", loaded, dir.display());
    }
    let catalog = Arc::new(catalog);

    let engine = Arc::new(ExecutionEngine::new(storage.clone(), catalog.clone()));
    let runner = Arc::new(CommandSkillRunner::new(
        config.skills.commands.clone(),
        config.skills.workdir.clone(),
        config.skills.timeout_ms,
    ));
    let executor = Arc::new(AutonomousExecutor::new(
        engine.clone(),
        runner,
        AutonomousConfig {
            tick_interval_ms: config.autonomous.tick_interval_ms,
            max_skill_retries: config.autonomous.max_skill_retries,
            max_parallel_executions: config.autonomous.max_parallel_executions,
        },
    ));
    let reservations = Arc::new(ReservationManager::new(storage.clone()));
    let merges = Arc::new(MergeQueue::new(storage, reservations.clone()));

    let service = ToolService::new(
        engine,
        executor.clone(),
        reservations,
        merges,
        catalog,
        Arc::new(TracingRecorder),
    );
    Ok((service, executor))
}

fn fmt_ts(ms: i64) -> String {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn print_execution(execution: &Execution) {
    println!(
        "{} {} [{}]",
        "Execution".green().bold(),
        execution.id,
        serde_json::to_value(execution.status)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default()
    );
    println!("  loop:    {} v{}", execution.loop_id, execution.loop_version);
    println!("  project: {}", execution.project);
    match &execution.current_phase {
        Some(phase) => println!("  phase:   {}", phase.cyan()),
        None => println!("  phase:   {}", "(completed)".dimmed()),
    }
    if let Some(reason) = &execution.blocked_reason {
        println!("  blocked: {}", reason.red());
    }
    if let Some(reason) = &execution.abort_reason {
        println!("  aborted: {}", reason.red());
    }
    println!("  started: {}", fmt_ts(execution.started_at));

    for progress in &execution.phase_progress {
        let marker = if progress.is_complete() {
            "✓".green()
        } else if execution.current_phase.as_deref() == Some(progress.phase.as_str()) {
            "▶".cyan()
        } else {
            "·".dimmed()
        };
        let mut parts = Vec::new();
        if !progress.completed_skills.is_empty() {
            parts.push(format!("{} done", progress.completed_skills.len()));
        }
        if !progress.skipped_skills.is_empty() {
            parts.push(format!("{} skipped", progress.skipped_skills.len()));
        }
        let detail = if parts.is_empty() {
            String::new()
        } else {
            format!(" ({})", parts.join(", "))
        };
        println!("  {} {}{}", marker, progress.phase, detail);
    }

    for gate in &execution.gates {
        let decision = match gate.decision {
            GateDecision::Pending => "pending".yellow(),
            GateDecision::Approved => "approved".green(),
            GateDecision::Rejected => "rejected".red(),
        };
        println!("  gate {} → {}", gate.gate_id, decision);
    }
}

fn print_reservation(reservation: &Reservation) {
    let mode = if reservation.exclusive {
        "exclusive".red()
    } else {
        "shared".green()
    };
    println!(
        "{} {} {} {:?}:{} (held by {}, expires {})",
        "Reservation".green().bold(),
        reservation.id,
        mode,
        reservation.kind,
        reservation.target,
        reservation.collaborator_id,
        fmt_ts(reservation.expires_at)
    );
}

fn print_merge(request: &MergeRequest) {
    println!(
        "{} {} module={} status={:?}",
        "Merge".green().bold(),
        request.id,
        request.module_id,
        request.status
    );
    if !request.conflict_with.is_empty() {
        println!("  conflicts: {}", request.conflict_with.join(", ").red());
    }
    if let Some(reason) = &request.rejection_reason {
        println!("  rejected: {}", reason);
    }
}

fn print_response(response: ToolResponse) {
    match response {
        ToolResponse::Execution { execution } => print_execution(&execution),
        ToolResponse::Executions { executions } => {
            if executions.is_empty() {
                println!("{}", "No executions".dimmed());
            }
            for execution in &executions {
                let status = format!("{:?}", execution.status).to_lowercase();
                println!(
                    "{}  {:<12} {:<24} {}",
                    execution.id,
                    status,
                    execution.loop_id,
                    execution.current_phase.as_deref().unwrap_or("-")
                );
            }
        }
        ToolResponse::Loops { loops } => {
            for summary in &loops {
                println!(
                    "{} v{} — {} ({} phases, {} gates)",
                    summary.id.cyan(),
                    summary.version,
                    summary.name,
                    summary.phase_count,
                    summary.gate_count
                );
            }
        }
        ToolResponse::TickResults { results } => {
            if results.is_empty() {
                println!("{}", "Nothing to drive".dimmed());
            }
            for result in &results {
                match &result.error {
                    Some(error) => {
                        println!("{} {}: {}", "✗".red(), result.execution_id, error)
                    }
                    None => {
                        println!("{} {}", "✓".green(), result.execution_id);
                        for action in &result.actions {
                            println!("    {:?}", action);
                        }
                    }
                }
            }
        }
        ToolResponse::AutonomousConfig { config } => {
            println!(
                "tick_interval_ms={} max_skill_retries={} max_parallel_executions={}",
                config.tick_interval_ms, config.max_skill_retries, config.max_parallel_executions
            );
        }
        ToolResponse::Reservation { reservation } => print_reservation(&reservation),
        ToolResponse::ReservationConflict { blocking } => {
            println!("{}", "Conflict — blocked by:".red().bold());
            for reservation in &blocking {
                print_reservation(reservation);
            }
        }
        ToolResponse::Reservations { reservations } => {
            if reservations.is_empty() {
                println!("{}", "No reservations".dimmed());
            }
            for reservation in &reservations {
                print_reservation(reservation);
            }
        }
        ToolResponse::Merge { merge_request } => print_merge(&merge_request),
        ToolResponse::Merges { merge_requests } => {
            if merge_requests.is_empty() {
                println!("{}", "No merge requests".dimmed());
            }
            for request in &merge_requests {
                print_merge(request);
            }
        }
        ToolResponse::Ack => println!("{}", "ok".green()),
    }
}

fn tool_err(error: ToolError) -> eyre::Report {
    eyre!("{} ({})", error.message, error.kind)
}

async fn dispatch(service: &Service, request: ToolRequest) -> Result<()> {
    let response = service.handle(request).await.map_err(tool_err)?;
    print_response(response);
    Ok(())
}

async fn run_application(cli: Cli, config: Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let (service, executor) = build_service(&config)?;

    let request = match cli.command {
        Commands::Start {
            loop_id,
            project,
            mode,
            autonomy,
        } => ToolRequest::StartExecution {
            loop_id,
            project,
            mode,
            autonomy,
        },
        Commands::Advance { id } => ToolRequest::AdvancePhase { execution_id: id },
        Commands::CompletePhase { id } => ToolRequest::CompletePhase { execution_id: id },
        Commands::CompleteSkill {
            id,
            skill,
            deliverables,
            score,
        } => ToolRequest::CompleteSkill {
            execution_id: id,
            skill_id: skill,
            deliverables,
            outcome: score.map(|score| cadence::domain::SkillOutcome {
                success: true,
                score: Some(score),
            }),
        },
        Commands::SkipSkill { id, skill, reason } => ToolRequest::SkipSkill {
            execution_id: id,
            skill_id: skill,
            reason,
        },
        Commands::Approve { id, gate, by } => ToolRequest::ApproveGate {
            execution_id: id,
            gate_id: gate,
            approved_by: by,
        },
        Commands::Reject { id, gate, feedback } => ToolRequest::RejectGate {
            execution_id: id,
            gate_id: gate,
            feedback,
        },
        Commands::Pause { id } => ToolRequest::PauseExecution { execution_id: id },
        Commands::Resume { id } => ToolRequest::ResumeExecution { execution_id: id },
        Commands::Abort { id, reason } => ToolRequest::AbortExecution {
            execution_id: id,
            reason,
        },
        Commands::Status { id } => ToolRequest::GetExecution { execution_id: id },
        Commands::List { status, loop_id } => ToolRequest::ListExecutions { status, loop_id },
        Commands::Loops => ToolRequest::ListLoops,
        Commands::Auto { command } => {
            return match command {
                AutoCommands::Tick => dispatch(&service, ToolRequest::Tick).await,
                AutoCommands::Configure {
                    tick_interval_ms,
                    max_skill_retries,
                    max_parallel_executions,
                } => {
                    dispatch(
                        &service,
                        ToolRequest::ConfigureAutonomous {
                            tick_interval_ms,
                            max_skill_retries,
                            max_parallel_executions,
                        },
                    )
                    .await
                }
                AutoCommands::Run => {
                    println!(
                        "{} (interval {}ms, ctrl-c to stop)",
                        "Autonomous driver running".cyan(),
                        config.autonomous.tick_interval_ms
                    );
                    executor
                        .clone()
                        .start()
                        .await
                        .map_err(|e| eyre!("failed to start driver: {}", e))?;
                    tokio::signal::ctrl_c()
                        .await
                        .context("failed to wait for ctrl-c")?;
                    executor.stop().await;
                    println!("{}", "Stopped".yellow());
                    Ok(())
                }
            };
        }
        Commands::Reserve {
            collaborator,
            agent_set,
            kind,
            target,
            exclusive,
            duration_ms,
            reason,
        } => ToolRequest::CreateReservation {
            collaborator_id: collaborator,
            agent_set_id: agent_set,
            kind,
            target,
            exclusive,
            duration_ms: duration_ms.unwrap_or(config.coordination.default_reservation_ms),
            reason,
        },
        Commands::Release { id } => ToolRequest::ReleaseReservation { reservation_id: id },
        Commands::Extend { id, extra_ms } => ToolRequest::ExtendReservation {
            reservation_id: id,
            extra_ms,
        },
        Commands::Blocked { kind, target } => ToolRequest::CheckResourceBlocked { kind, target },
        Commands::Reservations => ToolRequest::ListReservations,
        Commands::Merge { command } => match command {
            MergeCommands::Request {
                collaborator,
                agent_set,
                module,
            } => ToolRequest::RequestMerge {
                collaborator_id: collaborator,
                agent_set_id: agent_set,
                module_id: module,
            },
            MergeCommands::Check { id } => ToolRequest::CheckMergeConflicts { merge_id: id },
            MergeCommands::Execute { id } => ToolRequest::ExecuteMerge { merge_id: id },
            MergeCommands::Reject { id, reason } => ToolRequest::RejectMerge {
                merge_id: id,
                reason,
            },
            MergeCommands::List => ToolRequest::ListMergeRequests { status: None },
        },
    };

    dispatch(&service, request).await
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(cli, config).await.context("Application failed")?;

    Ok(())
}
