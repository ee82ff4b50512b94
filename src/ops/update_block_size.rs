//! Update the configured block size of a provision drive

use super::pvd_destroy::require_provision_drive;
use crate::domain::{BlockSize, ClassId, JobType, UpdateBlockSizeRequest};
use crate::error::{Error, JobErrorCode, Result};
use crate::job::{JobContext, JobOperation};
use crate::transport::PvdConfigUpdate;
use async_trait::async_trait;
use tracing::info;

pub struct UpdateBlockSize {
    request: UpdateBlockSizeRequest,
    block_size: BlockSize,
}

impl UpdateBlockSize {
    pub fn new(request: UpdateBlockSizeRequest) -> Self {
        let block_size = BlockSize::from_bytes(request.block_size);
        Self {
            request,
            block_size,
        }
    }
}

#[async_trait]
impl JobOperation for UpdateBlockSize {
    fn job_type(&self) -> JobType {
        JobType::UpdateProvisionDriveBlockSize
    }

    fn class_id(&self) -> ClassId {
        ClassId::ProvisionDrive
    }

    async fn validate(&mut self, ctx: &mut JobContext) -> Result<()> {
        let pvd = self.request.object_id;
        ctx.element.object_id = pvd;

        if self.block_size == BlockSize::Invalid {
            return Err(Error::validation(
                JobErrorCode::InvalidBlockSize,
                format!("{} is not a supported block size", self.request.block_size),
            ));
        }

        require_provision_drive(&ctx.graph, pvd).await?;

        let consumers = ctx.graph.upstream_edges(pvd).await?;
        if !consumers.is_empty() {
            return Err(Error::validation(
                JobErrorCode::PvdIsInUseForRaidGroup,
                format!("{} feeds {} consumer(s)", pvd, consumers.len()),
            ));
        }
        Ok(())
    }

    async fn update_in_memory(&mut self, ctx: &mut JobContext) -> Result<()> {
        let txn = ctx.transaction.start().await?;
        ctx.graph
            .update_provision_drive(
                txn,
                self.request.object_id,
                PvdConfigUpdate::BlockSize(self.block_size),
            )
            .await?;
        info!(
            job_number = %ctx.job_number(),
            pvd = %self.request.object_id,
            block_size = self.request.block_size,
            "Block size update staged"
        );
        Ok(())
    }

    async fn commit(&mut self, _ctx: &mut JobContext) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobCommand, JobStatus, ObjectId};
    use crate::ops::test_support::Harness;
    use crate::sim::SimulatedArray;

    fn update(object_id: ObjectId, block_size: u32) -> JobCommand {
        JobCommand::UpdateProvisionDriveBlockSize(UpdateBlockSizeRequest {
            object_id,
            block_size,
        })
    }

    #[tokio::test]
    async fn test_update_unconsumed_drive() {
        let harness = Harness::new(SimulatedArray::demo());
        let pvd = harness.graph.lookup_pvd_by_serial("USR-0009").await.unwrap().unwrap();

        let done = harness.run(update(pvd, 4160)).await;
        assert_eq!(done.status, JobStatus::Ok);
        let info = harness.graph.provision_drive_info(pvd).await.unwrap();
        assert_eq!(info.configured_block_size, BlockSize::Bytes4160);
    }

    #[tokio::test]
    async fn test_rejections() {
        let harness = Harness::new(SimulatedArray::demo());
        let consumed = harness.graph.lookup_pvd_by_serial("USR-0000").await.unwrap().unwrap();
        let free = harness.graph.lookup_pvd_by_serial("USR-0009").await.unwrap().unwrap();

        let done = harness.run(update(free, 512)).await;
        assert_eq!(done.error_code, JobErrorCode::InvalidBlockSize);

        let done = harness.run(update(consumed, 520)).await;
        assert_eq!(done.error_code, JobErrorCode::PvdIsInUseForRaidGroup);
        assert!(harness.sim.transaction_starts().is_empty());
    }
}
