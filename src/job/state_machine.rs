//! Five-phase job runner
//!
//! ```text
//!   Validate ──► UpdateInMemory ──► Persist ──► Commit ──► notify
//!      │               │               │          │
//!      └───────────────┴───────┬───────┘          └─ failure: Timeout etc.,
//!                              ▼                     no rollback
//!                          Rollback ──► notify
//! ```
//!
//! Rollback aborts the job's transaction only when the failed phase could
//! have opened one and the handle is still open. An abort failure is logged
//! and counted; the job keeps the error that sent it to rollback. Every job
//! produces exactly one notification.

use super::metrics::JobMetrics;
use super::operation::{JobContext, JobOperation};
use crate::config::OrchestratorConfig;
use crate::domain::{
    ArrayEvent, JobActionState, JobNotification, JobQueueElement, KeyManagerRef,
    NotificationSinkRef,
};
use crate::error::{Error, Result};
use crate::graph::GraphClient;
use crate::ops::JobKind;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub struct JobStateMachine {
    graph: GraphClient,
    notifier: NotificationSinkRef,
    keys: KeyManagerRef,
    config: Arc<OrchestratorConfig>,
    metrics: Option<Arc<JobMetrics>>,
}

impl JobStateMachine {
    pub fn new(
        graph: GraphClient,
        notifier: NotificationSinkRef,
        keys: KeyManagerRef,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        Self {
            graph,
            notifier,
            keys,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<JobMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one job to its terminal state and return the finished element
    pub async fn run(&self, element: JobQueueElement) -> JobQueueElement {
        let started = Instant::now();
        let mut op = JobKind::from_command(&element.command);
        let mut ctx = JobContext::new(
            element,
            self.graph.clone(),
            Arc::clone(&self.keys),
            Arc::clone(&self.config),
        );

        info!(
            job_number = %ctx.job_number(),
            job_type = %ctx.element.job_type,
            "Job started"
        );

        match self.run_phases(&mut op, &mut ctx).await {
            Ok(()) => self.commit(&mut op, &mut ctx).await,
            Err(err) => {
                ctx.element.fail(&err);
                self.rollback(&mut op, &mut ctx, &err).await;
            }
        }

        self.notify(&op, &ctx).await;
        ctx.element.enter(JobActionState::Done);

        if let Some(metrics) = &self.metrics {
            metrics.record_finished(ctx.element.job_type, ctx.element.status, started.elapsed());
        }
        info!(
            job_number = %ctx.job_number(),
            status = %ctx.element.status,
            error_code = %ctx.element.error_code,
            object_id = %ctx.element.object_id,
            "Job finished"
        );
        ctx.element
    }

    async fn run_phases(&self, op: &mut JobKind, ctx: &mut JobContext) -> Result<()> {
        ctx.element.enter(JobActionState::Validate);
        check_payload(op, ctx)?;
        op.validate(ctx).await?;

        ctx.element.enter(JobActionState::UpdateInMemory);
        check_payload(op, ctx)?;
        op.update_in_memory(ctx).await?;

        ctx.element.enter(JobActionState::Persist);
        check_payload(op, ctx)?;
        op.persist(ctx).await
    }

    async fn commit(&self, op: &mut JobKind, ctx: &mut JobContext) {
        ctx.element.enter(JobActionState::Commit);
        match op.commit(ctx).await {
            Ok(()) => ctx.element.succeed(),
            Err(err) => {
                // the persisted change stands
                warn!(
                    job_number = %ctx.job_number(),
                    phase = %JobActionState::Commit,
                    "Commit failed after persist: {}",
                    err
                );
                ctx.element.fail(&err);
            }
        }
    }

    async fn rollback(&self, op: &mut JobKind, ctx: &mut JobContext, cause: &Error) {
        let failed_phase = ctx.element.current_state;
        ctx.element.enter(JobActionState::Rollback);
        warn!(
            job_number = %ctx.job_number(),
            phase = %failed_phase,
            error_code = %ctx.element.error_code,
            "Job failed, rolling back: {}",
            cause
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_rollback(ctx.element.job_type, &failed_phase.to_string());
        }

        if ctx.element.previous_state.may_hold_transaction() && ctx.transaction.is_open() {
            let aborted = ctx.transaction.abort().await;
            if let Err(err) = &aborted {
                error!(job_number = %ctx.job_number(), "Abort during rollback failed: {}", err);
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_abort(aborted.is_ok());
            }
        } else {
            debug!(
                job_number = %ctx.job_number(),
                previous_state = %ctx.element.previous_state,
                "No transaction to abort"
            );
        }

        if let Err(err) = op.rollback(ctx).await {
            warn!(job_number = %ctx.job_number(), "Operation rollback failed: {}", err);
        }
    }

    async fn notify(&self, op: &JobKind, ctx: &JobContext) {
        let class_id = op.class_id();
        let notification = JobNotification {
            job_number: ctx.element.job_number,
            job_type: ctx.element.job_type,
            status: ctx.element.status,
            error_code: ctx.element.error_code,
            object_id: ctx.element.object_id,
            class_id,
            object_type: class_id.object_type(),
            timestamp: Utc::now(),
        };
        if let Err(err) = self
            .notifier
            .publish(
                ctx.element.object_id,
                ArrayEvent::JobActionStateChanged(notification),
            )
            .await
        {
            error!(
                job_number = %ctx.job_number(),
                sink = self.notifier.name(),
                "Failed to publish job notification: {}",
                err
            );
        }
    }
}

fn check_payload(op: &JobKind, ctx: &JobContext) -> Result<()> {
    if op.job_type() != ctx.element.command.job_type() || op.job_type() != ctx.element.job_type {
        return Err(Error::MalformedRequest(format!(
            "job {} carries a {} payload for a {} job",
            ctx.job_number(),
            ctx.element.command.job_type(),
            ctx.element.job_type
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::domain::{
        JobCommand, JobNumber, JobStatus, JobType, LunCreateRequest, LunNumber, RaidGroupNumber,
    };
    use crate::error::JobErrorCode;
    use crate::job::notify::{InMemoryNotifier, NotifyingKeyManager};
    use crate::sim::SimulatedArray;
    use crate::transport::ChannelTransport;
    use tokio_util::sync::CancellationToken;

    fn runner(sim: Arc<SimulatedArray>) -> (JobStateMachine, Arc<InMemoryNotifier>) {
        let (transport, _) =
            ChannelTransport::spawn(sim, &TransportConfig::default(), CancellationToken::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let keys = Arc::new(NotifyingKeyManager::new(notifier.clone()));
        let machine = JobStateMachine::new(
            GraphClient::new(transport),
            notifier.clone(),
            keys,
            Arc::new(OrchestratorConfig::default()),
        );
        (machine, notifier)
    }

    fn lun_job(number: u64, rg: u32, lun: u32) -> JobQueueElement {
        JobQueueElement::new(
            JobNumber(number),
            JobCommand::LunCreate(LunCreateRequest::new(
                RaidGroupNumber(rg),
                LunNumber(lun),
                0x1000,
            )),
        )
    }

    #[tokio::test]
    async fn test_successful_job_notifies_once() {
        let sim = Arc::new(SimulatedArray::demo());
        let (machine, notifier) = runner(Arc::clone(&sim));

        let done = machine.run(lun_job(1, 5, 10)).await;

        assert_eq!(done.status, JobStatus::Ok);
        assert_eq!(done.current_state, JobActionState::Done);
        assert_eq!(done.previous_state, JobActionState::Commit);
        assert_eq!(notifier.len(), 1);
        let event = notifier.events().remove(0);
        let job = event.as_job().unwrap();
        assert_eq!(job.job_type, JobType::LunCreate);
        assert_eq!(job.object_id, done.object_id);
    }

    #[tokio::test]
    async fn test_validate_failure_skips_abort() {
        let sim = Arc::new(SimulatedArray::demo());
        let (machine, notifier) = runner(Arc::clone(&sim));

        let done = machine.run(lun_job(1, 99, 10)).await;

        assert_eq!(done.status, JobStatus::Failure);
        assert_eq!(done.error_code, JobErrorCode::UnknownId);
        assert!(sim.transaction_starts().is_empty());
        assert_eq!(sim.opcode_count("transaction_abort"), 0);
        assert_eq!(notifier.len(), 1);
    }

    #[tokio::test]
    async fn test_persist_failure_aborts_and_keeps_original_error() {
        let sim = Arc::new(SimulatedArray::demo());
        let (machine, notifier) = runner(Arc::clone(&sim));
        let metrics = Arc::new(JobMetrics::new().unwrap());
        let machine = machine.with_metrics(Arc::clone(&metrics));

        sim.fail_next("transaction_commit", 1);
        sim.fail_next("transaction_abort", 1);
        let done = machine.run(lun_job(1, 5, 10)).await;

        assert_eq!(done.status, JobStatus::Failure);
        assert_eq!(done.error_code, JobErrorCode::InternalError);
        assert!(done.failure.as_deref().unwrap().contains("commit"));
        assert_eq!(sim.opcode_count("transaction_abort"), 1);
        assert_eq!(metrics.aborts(), 1);
        assert_eq!(notifier.len(), 1);
    }
}
