//! Extent pool LUN create

use crate::domain::{
    ClassId, EdgeFlags, ExtPoolLunCreateRequest, JobType, LifecycleState, ObjectId, Placement,
    LBA_INVALID,
};
use crate::error::{Error, JobErrorCode, Result};
use crate::job::{JobContext, JobOperation};
use crate::transport::{CapacityQuery, EdgeSpec, ExtPoolLunObjectConfig};
use async_trait::async_trait;
use tracing::info;

pub struct ExtPoolLunCreate {
    request: ExtPoolLunCreateRequest,
    pool: ObjectId,
    offset: u64,
}

impl ExtPoolLunCreate {
    pub fn new(request: ExtPoolLunCreateRequest) -> Self {
        Self {
            request,
            pool: ObjectId::INVALID,
            offset: LBA_INVALID,
        }
    }
}

#[async_trait]
impl JobOperation for ExtPoolLunCreate {
    fn job_type(&self) -> JobType {
        JobType::ExtPoolLunCreate
    }

    fn class_id(&self) -> ClassId {
        ClassId::ExtentPoolLun
    }

    async fn validate(&mut self, ctx: &mut JobContext) -> Result<()> {
        let request = &self.request;
        let pool = ctx.graph.lookup_ext_pool(request.pool_id).await?;

        if let Some(existing) = ctx
            .graph
            .lookup_ext_pool_lun(request.pool_id, request.lun_id)
            .await?
        {
            return Err(Error::validation(
                JobErrorCode::LunIdInUse,
                format!(
                    "LUN {} of pool {} is bound as {}",
                    request.lun_id, request.pool_id, existing
                ),
            ));
        }

        let stats = ctx.graph.database_stats().await?;
        if stats.user_luns >= stats.max_user_luns {
            return Err(Error::SystemLimitsExceeded {
                limit: "user LUNs",
                current: stats.user_luns,
                max: stats.max_user_luns,
            });
        }

        let state = ctx.graph.lifecycle_state(pool).await?;
        if state != LifecycleState::Ready {
            return Err(Error::ObjectNotReady {
                object_id: pool,
                state,
            });
        }

        let placed = ctx
            .graph
            .validate_capacity(
                pool,
                CapacityQuery {
                    requested_capacity: request.capacity,
                    placement: Placement::FirstFit,
                    offset: 0,
                    ignore_offset: true,
                },
            )
            .await?;
        if placed.offset == LBA_INVALID || placed.available_capacity < request.capacity {
            return Err(Error::BeyondCapacity {
                requested: request.capacity,
                available: placed.available_capacity,
            });
        }

        self.pool = pool;
        self.offset = placed.offset;
        Ok(())
    }

    async fn update_in_memory(&mut self, ctx: &mut JobContext) -> Result<()> {
        let txn = ctx.transaction.start().await?;
        let config = ExtPoolLunObjectConfig {
            pool_id: self.request.pool_id,
            lun_id: self.request.lun_id,
            capacity: self.request.capacity,
            world_wide_name: self.request.world_wide_name.clone(),
            user_defined_name: self.request.user_defined_name.clone(),
        };
        let lun = ctx.graph.create_ext_pool_lun(txn, config).await?;
        ctx.element.object_id = lun;

        ctx.graph
            .create_edge(
                txn,
                EdgeSpec {
                    server_id: self.pool,
                    client_id: lun,
                    client_index: 0,
                    capacity: self.request.capacity,
                    offset: self.offset,
                    flags: EdgeFlags::NONE,
                },
            )
            .await?;
        info!(job_number = %ctx.job_number(), %lun, pool = %self.pool, "Extent pool LUN staged");
        Ok(())
    }

    async fn commit(&mut self, ctx: &mut JobContext) -> Result<()> {
        ctx.wait_if_requested(ctx.element.object_id, LifecycleState::Ready)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobCommand, JobStatus, PoolId};
    use crate::ops::test_support::Harness;
    use crate::sim::SimulatedArray;

    fn request(pool: u32, lun_id: u32, capacity: u64) -> ExtPoolLunCreateRequest {
        ExtPoolLunCreateRequest {
            pool_id: PoolId(pool),
            lun_id,
            capacity,
            world_wide_name: String::new(),
            user_defined_name: format!("pool-lun-{}", lun_id),
            wait_ready: true,
            ready_timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn test_create_and_duplicate() {
        let harness = Harness::new(SimulatedArray::demo());

        let done = harness.run(JobCommand::ExtPoolLunCreate(request(1, 0, 0x1000))).await;
        assert_eq!(done.status, JobStatus::Ok);
        assert_eq!(
            harness.graph.lifecycle_state(done.object_id).await.unwrap(),
            LifecycleState::Ready
        );

        let dup = harness.run(JobCommand::ExtPoolLunCreate(request(1, 0, 0x1000))).await;
        assert_eq!(dup.error_code, JobErrorCode::LunIdInUse);
    }

    #[tokio::test]
    async fn test_unknown_pool_and_capacity() {
        let harness = Harness::new(SimulatedArray::demo());

        let done = harness.run(JobCommand::ExtPoolLunCreate(request(9, 0, 0x1000))).await;
        assert_eq!(done.error_code, JobErrorCode::UnknownId);

        let done = harness
            .run(JobCommand::ExtPoolLunCreate(request(1, 1, 0x0100_0000)))
            .await;
        assert_eq!(done.error_code, JobErrorCode::RequestBeyondCurrentRgCapacity);
        assert!(harness.sim.transaction_starts().is_empty());
    }

    #[tokio::test]
    async fn test_user_lun_limit_counts_pool_luns() {
        let harness = Harness::new(SimulatedArray::demo());
        harness.sim.set_max_user_luns(1);

        let done = harness.run(JobCommand::ExtPoolLunCreate(request(1, 0, 0x1000))).await;
        assert_eq!(done.status, JobStatus::Ok);
        let done = harness.run(JobCommand::ExtPoolLunCreate(request(1, 1, 0x1000))).await;
        assert_eq!(done.error_code, JobErrorCode::SystemLimitsExceeded);
    }
}
