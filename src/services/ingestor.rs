//! Result ingestion.
//!
//! Agents post result envelopes; the ingestor validates them against known
//! tasks, persists findings as stage results, advances the task state
//! machine, and forwards the envelope into a bounded queue for the ETL
//! pipeline. A full queue rejects the envelope with `Busy` *before* any
//! state is mutated, so the agent can safely retry the whole delivery.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentTask, ReportedStatus, ResultEnvelope, StageResult, TaskStatus};
use crate::domain::ports::{AgentRegistry, StageResultRepository, TaskRepository};

/// Outcome of one envelope delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// The task id is not known to this master; rejected.
    UnknownTask,
    /// The task already reached a terminal status; re-delivery is a no-op.
    AlreadyTerminal,
    /// The ETL queue is full; the caller should apply backpressure
    /// (HTTP surfaces map this to 503) and the agent retries.
    Busy,
}

pub struct Ingestor {
    tasks: Arc<dyn TaskRepository>,
    results: Arc<dyn StageResultRepository>,
    agents: Arc<dyn AgentRegistry>,
    etl_tx: mpsc::Sender<ResultEnvelope>,
}

impl Ingestor {
    /// Build the ingestor and hand back the consuming end of the ETL queue.
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        results: Arc<dyn StageResultRepository>,
        agents: Arc<dyn AgentRegistry>,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<ResultEnvelope>) {
        let (etl_tx, etl_rx) = mpsc::channel(queue_capacity.max(1));
        (
            Self {
                tasks,
                results,
                agents,
                etl_tx,
            },
            etl_rx,
        )
    }

    pub async fn ingest(&self, envelope: ResultEnvelope) -> DomainResult<IngestOutcome> {
        let Some(task) = self.tasks.get(envelope.task_id).await? else {
            warn!(task_id = %envelope.task_id, "result envelope for unknown task rejected");
            return Ok(IngestOutcome::UnknownTask);
        };

        if task.is_terminal() {
            debug!(task_id = %task.id, status = task.status.as_str(), "re-delivered result for terminal task ignored");
            return Ok(IngestOutcome::AlreadyTerminal);
        }

        match envelope.status {
            ReportedStatus::Running => {
                if self.tasks.transition(task.id, TaskStatus::Dispatched, TaskStatus::Running).await? {
                    debug!(task_id = %task.id, "task reported running");
                }
                Ok(IngestOutcome::Accepted)
            }
            ReportedStatus::Finished | ReportedStatus::Failed => {
                // Backpressure check first: nothing is mutated when the
                // ETL queue cannot take the envelope.
                match self.etl_tx.try_send(envelope.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(task_id = %task.id, "etl queue full, pushing back on agent");
                        return Ok(IngestOutcome::Busy);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        warn!(task_id = %task.id, "etl queue consumer is gone; recording results without forwarding");
                    }
                }

                self.persist_findings(&task, &envelope).await?;
                self.finish_task(&task, &envelope).await?;

                if let Some(agent_id) = &task.agent_id {
                    if let Err(err) = self.agents.adjust_load(agent_id, -1).await {
                        warn!(agent_id = %agent_id, error = %err, "failed to drop agent load counter");
                    }
                }
                Ok(IngestOutcome::Accepted)
            }
        }
    }

    async fn persist_findings(&self, task: &AgentTask, envelope: &ResultEnvelope) -> DomainResult<()> {
        if envelope.findings.is_empty() {
            return Ok(());
        }

        let agent_id = task.agent_id.clone().unwrap_or_else(|| "unknown".to_string());
        let records: Vec<StageResult> = envelope
            .findings
            .iter()
            .map(|finding| {
                let target_value = if finding.target_value.is_empty() {
                    task.target_value.clone()
                } else {
                    finding.target_value.clone()
                };
                StageResult::new(task.project_id, task.workflow_id, task.stage_id, agent_id.clone(), target_value)
                    .with_result_type(finding.result_type.clone())
                    .with_target_type(finding.target_type.clone())
                    .with_attributes(finding.attributes.clone())
            })
            .collect();

        self.results.insert_batch(&records).await?;
        info!(task_id = %task.id, count = records.len(), "stage results recorded");
        Ok(())
    }

    async fn finish_task(&self, task: &AgentTask, envelope: &ResultEnvelope) -> DomainResult<()> {
        // Agents may report a terminal status without an intermediate
        // running report; normalize through `running` first.
        let _ = self.tasks.transition(task.id, TaskStatus::Dispatched, TaskStatus::Running).await?;

        let moved = match envelope.status {
            ReportedStatus::Finished => {
                self.tasks.transition(task.id, TaskStatus::Running, TaskStatus::Finished).await?
            }
            ReportedStatus::Failed => {
                let reason = envelope
                    .error_message
                    .clone()
                    .or_else(|| envelope.exit_code.map(|code| format!("exit code {code}")))
                    .unwrap_or_else(|| "agent reported failure".to_string());
                self.tasks.fail(task.id, TaskStatus::Running, &reason).await?
            }
            ReportedStatus::Running => false,
        };

        if moved {
            info!(task_id = %task.id, status = envelope.status.as_str(), "task completed");
        } else {
            warn!(task_id = %task.id, "result recorded but task was not in a completable state");
        }
        Ok(())
    }
}
