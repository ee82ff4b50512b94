//! Single-attribute provision drive update

use super::pvd_destroy::require_provision_drive;
use crate::domain::{
    ClassId, JobType, ProvisionDriveInfo, PvdConfigType, PvdUpdate, UpdateProvisionDriveRequest,
};
use crate::error::{Error, JobErrorCode, Result};
use crate::job::{JobContext, JobOperation};
use crate::transport::PvdConfigUpdate;
use async_trait::async_trait;
use tracing::{info, warn};

pub struct UpdateProvisionDrive {
    request: UpdateProvisionDriveRequest,
}

impl UpdateProvisionDrive {
    pub fn new(request: UpdateProvisionDriveRequest) -> Self {
        Self { request }
    }

    fn config_update(&self) -> PvdConfigUpdate {
        match &self.request.update {
            PvdUpdate::ConfigType(target) => PvdConfigUpdate::ConfigType(*target),
            PvdUpdate::SniffVerify(enabled) => PvdConfigUpdate::SniffVerify(*enabled),
            PvdUpdate::PoolId(pool_id) => PvdConfigUpdate::PoolId(*pool_id),
            PvdUpdate::SerialNumber(serial) => PvdConfigUpdate::SerialNumber(serial.clone()),
        }
    }
}

/// Error code for a request to move a drive to the type it already has
fn already_configured(current: PvdConfigType) -> JobErrorCode {
    match current {
        PvdConfigType::Unconsumed => JobErrorCode::PvdIsConfiguredAsUnconsumed,
        PvdConfigType::Raid => JobErrorCode::PvdIsConfiguredAsRaid,
        PvdConfigType::TestReservedSpare => JobErrorCode::PvdIsConfiguredAsSpare,
        PvdConfigType::Invalid | PvdConfigType::ExtPool => JobErrorCode::PvdIsNotConfigured,
    }
}

/// Checks a config type change against the drive's current state. `consumers`
/// is the number of upstream edges on the drive.
fn check_config_type(
    info: &ProvisionDriveInfo,
    target: PvdConfigType,
    consumers: usize,
) -> std::result::Result<(), JobErrorCode> {
    if info.end_of_life && target == PvdConfigType::TestReservedSpare {
        return Err(JobErrorCode::PvdIsInEndOfLifeState);
    }
    if info.config_type == target {
        return Err(already_configured(target));
    }
    match target {
        PvdConfigType::Unconsumed | PvdConfigType::TestReservedSpare
            if info.config_type == PvdConfigType::Raid && consumers != 0 =>
        {
            Err(JobErrorCode::PvdIsInUseForRaidGroup)
        }
        PvdConfigType::Unconsumed | PvdConfigType::TestReservedSpare | PvdConfigType::Raid => {
            Ok(())
        }
        PvdConfigType::Invalid | PvdConfigType::ExtPool => Err(JobErrorCode::PvdInvalidConfigType),
    }
}

#[async_trait]
impl JobOperation for UpdateProvisionDrive {
    fn job_type(&self) -> JobType {
        JobType::UpdateProvisionDrive
    }

    fn class_id(&self) -> ClassId {
        ClassId::ProvisionDrive
    }

    async fn validate(&mut self, ctx: &mut JobContext) -> Result<()> {
        let pvd = self.request.object_id;
        ctx.element.object_id = pvd;
        require_provision_drive(&ctx.graph, pvd).await?;

        if let PvdUpdate::ConfigType(target) = self.request.update {
            let info = ctx.graph.provision_drive_info(pvd).await?;
            let consumers = ctx.graph.upstream_edges(pvd).await?.len();
            if let Err(code) = check_config_type(&info, target, consumers) {
                warn!(
                    job_number = %ctx.job_number(),
                    %pvd,
                    current = %info.config_type,
                    %target,
                    error_code = %code,
                    "Config type change rejected"
                );
                return Err(Error::validation(
                    code,
                    format!("{} cannot move from {} to {}", pvd, info.config_type, target),
                ));
            }
        }
        Ok(())
    }

    async fn update_in_memory(&mut self, ctx: &mut JobContext) -> Result<()> {
        let txn = ctx.transaction.start().await?;
        ctx.graph
            .update_provision_drive(txn, self.request.object_id, self.config_update())
            .await?;
        info!(
            job_number = %ctx.job_number(),
            pvd = %self.request.object_id,
            update = ?self.request.update,
            "Provision drive update staged"
        );
        Ok(())
    }

    async fn commit(&mut self, _ctx: &mut JobContext) -> Result<()> {
        Ok(())
    }
}
