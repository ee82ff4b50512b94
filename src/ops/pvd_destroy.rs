//! Provision drive destroy

use crate::domain::{
    ClassId, JobType, LifecycleState, ObjectId, ProvisionDriveDestroyRequest,
};
use crate::error::{Error, JobErrorCode, Result};
use crate::graph::GraphClient;
use crate::job::{JobContext, JobOperation};
use crate::layout::PrivateSpaceLayout;
use async_trait::async_trait;
use tracing::info;

pub struct ProvisionDriveDestroy {
    request: ProvisionDriveDestroyRequest,
}

impl ProvisionDriveDestroy {
    pub fn new(request: ProvisionDriveDestroyRequest) -> Self {
        Self { request }
    }
}

/// Fails with `BadPvdConfiguration` unless `object_id` is a provision drive
pub(crate) async fn require_provision_drive(graph: &GraphClient, object_id: ObjectId) -> Result<()> {
    let class = graph.class_of(object_id).await?;
    if class != ClassId::ProvisionDrive {
        return Err(Error::validation(
            JobErrorCode::BadPvdConfiguration,
            format!("{} is a {:?}, not a provision drive", object_id, class),
        ));
    }
    Ok(())
}

pub(crate) fn reject_system_drive(layout: &PrivateSpaceLayout, object_id: ObjectId) -> Result<()> {
    if layout.is_system_pvd(object_id) {
        return Err(Error::validation(
            JobErrorCode::PvdIsSystemDrive,
            format!("{} is a system drive", object_id),
        ));
    }
    Ok(())
}

#[async_trait]
impl JobOperation for ProvisionDriveDestroy {
    fn job_type(&self) -> JobType {
        JobType::ProvisionDriveDestroy
    }

    fn class_id(&self) -> ClassId {
        ClassId::ProvisionDrive
    }

    async fn validate(&mut self, ctx: &mut JobContext) -> Result<()> {
        let pvd = self.request.object_id;
        ctx.element.object_id = pvd;

        require_provision_drive(&ctx.graph, pvd).await?;
        reject_system_drive(ctx.layout, pvd)?;

        let upstream = ctx.graph.upstream_edges(pvd).await?;
        if !upstream.is_empty() {
            return Err(Error::HasUpstreamEdges {
                object_id: pvd,
                count: upstream.len(),
            });
        }
        Ok(())
    }

    async fn update_in_memory(&mut self, ctx: &mut JobContext) -> Result<()> {
        let txn = ctx.transaction.start().await?;
        ctx.graph.destroy_object(txn, self.request.object_id).await?;
        info!(job_number = %ctx.job_number(), pvd = %self.request.object_id, %txn, "Provision drive destroy staged");
        Ok(())
    }

    async fn commit(&mut self, ctx: &mut JobContext) -> Result<()> {
        ctx.wait_if_requested(self.request.object_id, LifecycleState::NotExist)
            .await
    }
}
