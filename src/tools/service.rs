//! Tool request dispatcher
//!
//! Routes each request to the engine, autonomous executor, or coordinator,
//! and notifies the learning recorder around skill and gate operations.
//! Parsing and domain logic stay separate: by the time a request reaches
//! the state machine it is a typed record.

use std::sync::Arc;

use crate::autonomous::{AutonomousExecutor, SkillRunner};
use crate::catalog::{LoopCatalog, LoopStore};
use crate::coordination::{MergeQueue, ReservationManager, ReservationOutcome};
use crate::engine::ExecutionEngine;
use crate::observer::ExecutionRecorder;
use crate::storage::Storage;

use super::requests::{ToolError, ToolRequest, ToolResponse};

/// Dispatcher over every subsystem the command surface exposes.
pub struct ToolService<S: Storage, R: SkillRunner> {
    engine: Arc<ExecutionEngine<S, LoopCatalog>>,
    autonomous: Arc<AutonomousExecutor<S, LoopCatalog, R>>,
    reservations: Arc<ReservationManager<S>>,
    merges: Arc<MergeQueue<S>>,
    catalog: Arc<LoopCatalog>,
    recorder: Arc<dyn ExecutionRecorder>,
}

impl<S, R> ToolService<S, R>
where
    S: Storage + 'static,
    R: SkillRunner + 'static,
{
    pub fn new(
        engine: Arc<ExecutionEngine<S, LoopCatalog>>,
        autonomous: Arc<AutonomousExecutor<S, LoopCatalog, R>>,
        reservations: Arc<ReservationManager<S>>,
        merges: Arc<MergeQueue<S>>,
        catalog: Arc<LoopCatalog>,
        recorder: Arc<dyn ExecutionRecorder>,
    ) -> Self {
        Self {
            engine,
            autonomous,
            reservations,
            merges,
            catalog,
            recorder,
        }
    }

    /// Dispatch one request.
    pub async fn handle(&self, request: ToolRequest) -> Result<ToolResponse, ToolError> {
        match request {
            ToolRequest::StartExecution {
                loop_id,
                project,
                mode,
                autonomy,
            } => {
                let execution = self
                    .engine
                    .start_execution(&loop_id, &project, mode, autonomy)
                    .await?;
                Ok(ToolResponse::Execution {
                    execution: Box::new(execution),
                })
            }
            ToolRequest::AdvancePhase { execution_id } => {
                let execution = self.engine.advance_phase(&execution_id).await?;
                Ok(ToolResponse::Execution {
                    execution: Box::new(execution),
                })
            }
            ToolRequest::CompletePhase { execution_id } => {
                let execution = self.engine.complete_phase(&execution_id).await?;
                Ok(ToolResponse::Execution {
                    execution: Box::new(execution),
                })
            }
            ToolRequest::CompleteSkill {
                execution_id,
                skill_id,
                deliverables,
                outcome,
            } => {
                let success = outcome.as_ref().map(|o| o.success).unwrap_or(true);
                let score = outcome.as_ref().and_then(|o| o.score);
                let execution = self
                    .engine
                    .complete_skill(&execution_id, &skill_id, deliverables, outcome)
                    .await?;
                self.recorder
                    .capture_skill_signal(&execution, &skill_id, success, score);
                Ok(ToolResponse::Execution {
                    execution: Box::new(execution),
                })
            }
            ToolRequest::SkipSkill {
                execution_id,
                skill_id,
                reason,
            } => {
                let execution = self
                    .engine
                    .skip_skill(&execution_id, &skill_id, &reason)
                    .await?;
                Ok(ToolResponse::Execution {
                    execution: Box::new(execution),
                })
            }
            ToolRequest::ApproveGate {
                execution_id,
                gate_id,
                approved_by,
            } => {
                let execution = self
                    .engine
                    .approve_gate(&execution_id, &gate_id, approved_by.as_deref())
                    .await?;
                self.recorder.record_gate_outcome(
                    &execution,
                    &gate_id,
                    true,
                    approved_by.as_deref(),
                );
                Ok(ToolResponse::Execution {
                    execution: Box::new(execution),
                })
            }
            ToolRequest::RejectGate {
                execution_id,
                gate_id,
                feedback,
            } => {
                let execution = self
                    .engine
                    .reject_gate(&execution_id, &gate_id, &feedback)
                    .await?;
                self.recorder
                    .record_gate_outcome(&execution, &gate_id, false, None);
                Ok(ToolResponse::Execution {
                    execution: Box::new(execution),
                })
            }
            ToolRequest::PauseExecution { execution_id } => {
                let execution = self.engine.pause_execution(&execution_id).await?;
                Ok(ToolResponse::Execution {
                    execution: Box::new(execution),
                })
            }
            ToolRequest::ResumeExecution { execution_id } => {
                let execution = self.engine.resume_execution(&execution_id).await?;
                Ok(ToolResponse::Execution {
                    execution: Box::new(execution),
                })
            }
            ToolRequest::AbortExecution {
                execution_id,
                reason,
            } => {
                let execution = self
                    .engine
                    .abort_execution(&execution_id, reason.as_deref())
                    .await?;
                Ok(ToolResponse::Execution {
                    execution: Box::new(execution),
                })
            }
            ToolRequest::GetExecution { execution_id } => {
                let execution = self.engine.get_execution(&execution_id).await?;
                Ok(ToolResponse::Execution {
                    execution: Box::new(execution),
                })
            }
            ToolRequest::ListExecutions { status, loop_id } => {
                let executions = self
                    .engine
                    .list_executions(status, loop_id.as_deref())
                    .await?;
                Ok(ToolResponse::Executions { executions })
            }
            ToolRequest::ListLoops => Ok(ToolResponse::Loops {
                loops: self.catalog.list_loops(),
            }),
            ToolRequest::StartAutonomous => {
                self.autonomous.clone().start().await?;
                Ok(ToolResponse::Ack)
            }
            ToolRequest::StopAutonomous => {
                self.autonomous.stop().await;
                Ok(ToolResponse::Ack)
            }
            ToolRequest::PauseAutonomous => {
                self.autonomous.pause();
                Ok(ToolResponse::Ack)
            }
            ToolRequest::ResumeAutonomous => {
                self.autonomous.resume();
                Ok(ToolResponse::Ack)
            }
            ToolRequest::Tick => {
                let results = self.autonomous.tick().await?;
                Ok(ToolResponse::TickResults { results })
            }
            ToolRequest::ConfigureAutonomous {
                tick_interval_ms,
                max_skill_retries,
                max_parallel_executions,
            } => {
                let config = self
                    .autonomous
                    .configure(tick_interval_ms, max_skill_retries, max_parallel_executions)
                    .await;
                Ok(ToolResponse::AutonomousConfig { config })
            }
            ToolRequest::CreateReservation {
                collaborator_id,
                agent_set_id,
                kind,
                target,
                exclusive,
                duration_ms,
                reason,
            } => {
                let outcome = self.reservations.create_reservation(
                    &collaborator_id,
                    &agent_set_id,
                    kind,
                    &target,
                    exclusive,
                    duration_ms,
                    &reason,
                )?;
                Ok(match outcome {
                    ReservationOutcome::Granted(reservation) => ToolResponse::Reservation {
                        reservation: Box::new(reservation),
                    },
                    ReservationOutcome::Conflict { blocking } => {
                        ToolResponse::ReservationConflict { blocking }
                    }
                })
            }
            ToolRequest::ReleaseReservation { reservation_id } => {
                self.reservations.release_reservation(&reservation_id)?;
                Ok(ToolResponse::Ack)
            }
            ToolRequest::ExtendReservation {
                reservation_id,
                extra_ms,
            } => {
                let reservation = self
                    .reservations
                    .extend_reservation(&reservation_id, extra_ms)?;
                Ok(ToolResponse::Reservation {
                    reservation: Box::new(reservation),
                })
            }
            ToolRequest::CheckResourceBlocked { kind, target } => {
                let reservations = self.reservations.check_resource_blocked(kind, &target)?;
                Ok(ToolResponse::Reservations { reservations })
            }
            ToolRequest::ListReservations => {
                let reservations = self.reservations.list_reservations()?;
                Ok(ToolResponse::Reservations { reservations })
            }
            ToolRequest::RequestMerge {
                collaborator_id,
                agent_set_id,
                module_id,
            } => {
                let merge_request =
                    self.merges
                        .request_merge(&collaborator_id, &agent_set_id, &module_id)?;
                Ok(ToolResponse::Merge {
                    merge_request: Box::new(merge_request),
                })
            }
            ToolRequest::CheckMergeConflicts { merge_id } => {
                let merge_request = self.merges.check_merge_conflicts(&merge_id)?;
                Ok(ToolResponse::Merge {
                    merge_request: Box::new(merge_request),
                })
            }
            ToolRequest::ExecuteMerge { merge_id } => {
                let merge_request = self.merges.execute_merge(&merge_id)?;
                Ok(ToolResponse::Merge {
                    merge_request: Box::new(merge_request),
                })
            }
            ToolRequest::RejectMerge { merge_id, reason } => {
                let merge_request = self.merges.reject_merge(&merge_id, &reason)?;
                Ok(ToolResponse::Merge {
                    merge_request: Box::new(merge_request),
                })
            }
            ToolRequest::ListMergeRequests { status } => {
                let merge_requests = self.merges.list_merge_requests(status)?;
                Ok(ToolResponse::Merges { merge_requests })
            }
        }
    }

    /// RPC-style entry: parse a JSON request, dispatch it, serialize the
    /// response. Errors come back as `{ "error": { kind, message } }`.
    pub async fn handle_json(&self, request: serde_json::Value) -> serde_json::Value {
        let parsed: Result<ToolRequest, _> = serde_json::from_value(request);
        let outcome = match parsed {
            Ok(request) => self.handle(request).await,
            Err(e) => Err(ToolError {
                kind: "validation".to_string(),
                message: format!("malformed request: {}", e),
            }),
        };

        match outcome {
            Ok(response) => serde_json::to_value(&response)
                .unwrap_or_else(|e| serde_json::json!({ "error": { "kind": "json", "message": e.to_string() } })),
            Err(error) => serde_json::json!({ "error": error }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autonomous::{AutonomousConfig, SkillReport};
    use crate::domain::Execution;
    use crate::error::Result;
    use crate::observer::TracingRecorder;
    use crate::storage::JsonlStore;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct NoopRunner;

    #[async_trait]
    impl SkillRunner for NoopRunner {
        async fn execute_skill(&self, _execution: &Execution, _skill_id: &str) -> Result<SkillReport> {
            Ok(SkillReport::success())
        }
    }

    fn service() -> (TempDir, ToolService<JsonlStore, NoopRunner>) {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(JsonlStore::open(temp.path()).unwrap());
        let catalog = Arc::new(LoopCatalog::builtin());
        let engine = Arc::new(ExecutionEngine::new(storage.clone(), catalog.clone()));
        let autonomous = Arc::new(AutonomousExecutor::new(
            engine.clone(),
            Arc::new(NoopRunner),
            AutonomousConfig::default(),
        ));
        let reservations = Arc::new(ReservationManager::new(storage.clone()));
        let merges = Arc::new(MergeQueue::new(storage, reservations.clone()));
        let service = ToolService::new(
            engine,
            autonomous,
            reservations,
            merges,
            catalog,
            Arc::new(TracingRecorder),
        );
        (temp, service)
    }

    async fn start_execution(service: &ToolService<JsonlStore, NoopRunner>) -> String {
        let response = service
            .handle(ToolRequest::StartExecution {
                loop_id: "engineering-loop".to_string(),
                project: "proj-x".to_string(),
                mode: None,
                autonomy: None,
            })
            .await
            .unwrap();
        match response {
            ToolResponse::Execution { execution } => execution.id,
            other => panic!("wrong response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_and_get_execution() {
        let (_temp, service) = service();
        let id = start_execution(&service).await;

        let response = service
            .handle(ToolRequest::GetExecution { execution_id: id.clone() })
            .await
            .unwrap();
        match response {
            ToolResponse::Execution { execution } => {
                assert_eq!(execution.id, id);
                assert_eq!(execution.current_phase.as_deref(), Some("INIT"));
            }
            other => panic!("wrong response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_execution_is_structured_error() {
        let (_temp, service) = service();
        let error = service
            .handle(ToolRequest::AdvancePhase {
                execution_id: "exe-missing".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(error.kind, "execution_not_found");
        assert!(error.message.contains("exe-missing"));
    }

    #[tokio::test]
    async fn test_list_loops() {
        let (_temp, service) = service();
        let response = service.handle(ToolRequest::ListLoops).await.unwrap();
        match response {
            ToolResponse::Loops { loops } => {
                assert_eq!(loops.len(), 1);
                assert_eq!(loops[0].id, "engineering-loop");
            }
            other => panic!("wrong response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reservation_conflict_is_a_response_not_error() {
        let (_temp, service) = service();

        let grant = |collab: &str| ToolRequest::CreateReservation {
            collaborator_id: collab.to_string(),
            agent_set_id: "a".to_string(),
            kind: crate::domain::ReservationKind::Module,
            target: "core".to_string(),
            exclusive: true,
            duration_ms: 60_000,
            reason: "work".to_string(),
        };

        let first = service.handle(grant("c1")).await.unwrap();
        assert!(matches!(first, ToolResponse::Reservation { .. }));

        let second = service.handle(grant("c2")).await.unwrap();
        match second {
            ToolResponse::ReservationConflict { blocking } => {
                assert_eq!(blocking.len(), 1);
            }
            other => panic!("wrong response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_merge_flow_through_tools() {
        let (_temp, service) = service();

        let ToolResponse::Merge { merge_request } = service
            .handle(ToolRequest::RequestMerge {
                collaborator_id: "c1".to_string(),
                agent_set_id: "a".to_string(),
                module_id: "core".to_string(),
            })
            .await
            .unwrap()
        else {
            panic!("wrong response");
        };

        let ToolResponse::Merge { merge_request } = service
            .handle(ToolRequest::CheckMergeConflicts {
                merge_id: merge_request.id.clone(),
            })
            .await
            .unwrap()
        else {
            panic!("wrong response");
        };
        assert_eq!(merge_request.status, crate::domain::MergeRequestStatus::Approved);

        let ToolResponse::Merge { merge_request } = service
            .handle(ToolRequest::ExecuteMerge {
                merge_id: merge_request.id.clone(),
            })
            .await
            .unwrap()
        else {
            panic!("wrong response");
        };
        assert_eq!(merge_request.status, crate::domain::MergeRequestStatus::Merged);
    }

    #[tokio::test]
    async fn test_pause_resume_autonomous() {
        let (_temp, service) = service();

        let response = service.handle(ToolRequest::PauseAutonomous).await.unwrap();
        assert!(matches!(response, ToolResponse::Ack));
        assert!(service.autonomous.is_paused());

        let response = service.handle(ToolRequest::ResumeAutonomous).await.unwrap();
        assert!(matches!(response, ToolResponse::Ack));
        assert!(!service.autonomous.is_paused());
    }

    #[tokio::test]
    async fn test_configure_autonomous() {
        let (_temp, service) = service();
        let response = service
            .handle(ToolRequest::ConfigureAutonomous {
                tick_interval_ms: Some(250),
                max_skill_retries: None,
                max_parallel_executions: Some(8),
            })
            .await
            .unwrap();
        match response {
            ToolResponse::AutonomousConfig { config } => {
                assert_eq!(config.tick_interval_ms, 250);
                assert_eq!(config.max_parallel_executions, 8);
                assert_eq!(config.max_skill_retries, 3);
            }
            other => panic!("wrong response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_json_roundtrip() {
        let (_temp, service) = service();
        let value = service
            .handle_json(json!({
                "op": "start_execution",
                "loop_id": "engineering-loop",
                "project": "proj-x",
            }))
            .await;

        assert_eq!(value["result"], "execution");
        assert_eq!(value["execution"]["current_phase"], "INIT");
    }

    #[tokio::test]
    async fn test_handle_json_malformed_request() {
        let (_temp, service) = service();
        let value = service.handle_json(json!({ "op": "no_such_op" })).await;
        assert_eq!(value["error"]["kind"], "validation");
    }

    #[tokio::test]
    async fn test_handle_json_precondition_error() {
        let (_temp, service) = service();
        let id = start_execution(&service).await;

        let value = service
            .handle_json(json!({ "op": "advance_phase", "execution_id": id }))
            .await;
        assert_eq!(value["error"]["kind"], "phase_incomplete");
    }
}
