//! The five-phase operation interface and the context threaded through it

use super::retry::RetryPolicy;
use super::transaction::TransactionCoordinator;
use crate::config::{OrchestratorConfig, LIFECYCLE_POLL_INTERVAL};
use crate::domain::{ClassId, JobNumber, JobQueueElement, JobType, KeyManagerRef, LifecycleState, ObjectId};
use crate::error::Result;
use crate::graph::GraphClient;
use crate::layout::PrivateSpaceLayout;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Everything a phase may touch
pub struct JobContext {
    pub element: JobQueueElement,
    pub graph: GraphClient,
    pub transaction: TransactionCoordinator,
    pub keys: KeyManagerRef,
    pub config: Arc<OrchestratorConfig>,
    pub layout: &'static PrivateSpaceLayout,
}

impl JobContext {
    pub fn new(
        element: JobQueueElement,
        graph: GraphClient,
        keys: KeyManagerRef,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        let transaction = TransactionCoordinator::new(graph.clone(), element.job_number);
        Self {
            element,
            graph,
            transaction,
            keys,
            config,
            layout: PrivateSpaceLayout::standard(),
        }
    }

    pub fn job_number(&self) -> JobNumber {
        self.element.job_number
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config.retry)
    }

    /// Commit-phase wait: when the job asked for it, block until `object`
    /// reaches `expected` within the job's timeout
    pub async fn wait_if_requested(&self, object: ObjectId, expected: LifecycleState) -> Result<()> {
        if !self.element.need_to_wait {
            return Ok(());
        }
        info!(
            job_number = %self.job_number(),
            object_id = %object,
            %expected,
            "Waiting for lifecycle"
        );
        self.graph
            .wait_for_lifecycle(
                object,
                expected,
                self.element.wait_timeout(),
                LIFECYCLE_POLL_INTERVAL,
            )
            .await
    }
}

/// One job type's phase functions
///
/// The runner calls `validate`, `update_in_memory` and `persist` in order and
/// routes the first failure to `rollback`; `commit` runs only after a
/// successful persist. Aborting the transaction is the runner's job, so
/// `rollback` only undoes operation-local state.
#[async_trait]
pub trait JobOperation: Send {
    fn job_type(&self) -> JobType;

    /// Class reported in this job's notification
    fn class_id(&self) -> ClassId;

    /// Read-only checks; never opens a transaction
    async fn validate(&mut self, ctx: &mut JobContext) -> Result<()>;

    /// Open the transaction and stage graph mutations
    async fn update_in_memory(&mut self, ctx: &mut JobContext) -> Result<()>;

    /// Make the staged mutations durable
    async fn persist(&mut self, ctx: &mut JobContext) -> Result<()> {
        ctx.transaction.commit().await
    }

    /// Post-persist confirmation, typically a bounded lifecycle wait
    async fn commit(&mut self, ctx: &mut JobContext) -> Result<()>;

    async fn rollback(&mut self, _ctx: &mut JobContext) -> Result<()> {
        Ok(())
    }
}
