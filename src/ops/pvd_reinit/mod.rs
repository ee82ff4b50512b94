//! Provision drive reinitialize
//!
//! Re-binds an existing provision drive to a replacement physical drive in
//! the same slot. The replacement is vetted with the sparing hard rules, the
//! upstream RAID groups are asked to rebuild the position, and after the
//! commit the drive is reconnected and its chassis records refreshed.
//!
//! ```text
//!  validate          update_in_memory            persist (after commit)
//!  ────────          ────────────────            ──────────────────────
//!  spare rules       destroy stale PVD           connect drives
//!  upstream consent  mark needs-rebuild (retry)  wait for downstream edge
//!                    rebind identity             FRU serial + signature
//!                    old key removal             new key request
//! ```

mod keys;

pub use keys::{notify_key_manager, upstream_raid_groups, UpstreamRaidGroup};

use crate::domain::{
    BlockSize, ClassId, DriveLocation, DriveType, EncryptionMode, JobType, KeyState, Lba,
    LifecycleState, ObjectId, PathState, PoolId, ProvisionDriveReinitRequest, TransactionId,
};
use crate::error::{Error, JobErrorCode, Result};
use crate::job::{retry_bounded, JobContext, JobOperation};
use crate::layout::{PrivateSpaceLayout, DEFAULT_PVD_EXPORTED_OFFSET, NUMBER_OF_SYSTEM_DRIVES};
use crate::sparing::{check_hard_rules, SpareSelectionInfo};
use crate::transport::{EventLogEntry, PvdConfigUpdate};
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct ProvisionDriveReinit {
    request: ProvisionDriveReinitRequest,
    upstream: Vec<UpstreamRaidGroup>,
    encrypted: bool,
    /// Requested capacity clamped to what the new drive offers
    capacity: Lba,
}

impl ProvisionDriveReinit {
    pub fn new(request: ProvisionDriveReinitRequest) -> Self {
        Self {
            request,
            upstream: Vec::new(),
            encrypted: false,
            capacity: 0,
        }
    }

    /// What the drive looked like before it was replaced
    async fn desired_drive(&self, ctx: &JobContext) -> Result<SpareSelectionInfo> {
        let pvd = self.request.object_id;
        let info = ctx.graph.provision_drive_info(pvd).await?;
        let mut desired = SpareSelectionInfo {
            object_id: pvd,
            location: info.location,
            drive_type: info.drive_type,
            block_size: info.configured_block_size,
            capacity: info.configured_capacity,
            exported_offset: info.exported_offset,
            lifecycle: ctx.graph.lifecycle_state(pvd).await?,
            path_state: PathState::Enabled,
            pool_id: info.pool_id,
            is_system_drive: ctx.layout.is_system_pvd(pvd),
            end_of_life: info.end_of_life,
            slf: info.slf,
        };
        if desired.is_system_drive {
            correct_system_drive(ctx, &mut desired).await?;
        }
        Ok(desired)
    }

    /// The physical drive now sitting where `desired` used to be
    async fn replacement_drive(
        &self,
        ctx: &JobContext,
        desired: &SpareSelectionInfo,
    ) -> Result<(ObjectId, SpareSelectionInfo)> {
        let pdo = ctx
            .graph
            .physical_drive_by_location(desired.location)
            .await?
            .ok_or_else(|| {
                Error::Internal(format!("no physical drive at {}", desired.location))
            })?;
        let physical = ctx.graph.physical_drive_info(pdo).await?;
        let usable = physical
            .gross_capacity
            .saturating_sub(DEFAULT_PVD_EXPORTED_OFFSET);

        let candidate = SpareSelectionInfo {
            object_id: self.request.object_id,
            location: physical.location,
            drive_type: physical.drive_type,
            block_size: BlockSize::from_bytes(self.request.configured_block_size),
            capacity: self.request.configured_capacity.min(usable),
            exported_offset: DEFAULT_PVD_EXPORTED_OFFSET,
            lifecycle: ctx.graph.lifecycle_state(pdo).await?,
            path_state: PathState::Enabled,
            pool_id: PoolId::INVALID,
            is_system_drive: desired.is_system_drive,
            end_of_life: false,
            slf: false,
        };
        Ok((pdo, candidate))
    }

    /// Best-effort: log the incompatible drive and light its fault LED
    async fn report_incompatible(&self, ctx: &JobContext, pdo: ObjectId, location: DriveLocation) {
        if let Err(err) = ctx
            .graph
            .log_event(EventLogEntry::IncompatibleReplacedSystemDrive { location })
            .await
        {
            warn!(job_number = %ctx.job_number(), %location, error = %err, "Failed to log incompatible drive");
        }
        if let Err(err) = ctx.graph.set_drive_fault(pdo).await {
            warn!(job_number = %ctx.job_number(), %pdo, error = %err, "Failed to light drive fault");
        }
    }

    /// A different user provision drive already claims the new serial number.
    /// System drives are never treated as stale.
    async fn destroy_stale_drive(&self, ctx: &JobContext, txn: TransactionId) -> Result<()> {
        let pvd = self.request.object_id;
        let stale = match ctx.graph.lookup_pvd_by_serial(&self.request.serial_number).await? {
            Some(stale) if stale == pvd => return Ok(()),
            Some(stale) if ctx.layout.is_system_pvd(stale) => {
                warn!(job_number = %ctx.job_number(), %stale, serial = %self.request.serial_number, "Serial belongs to a system drive; keeping it");
                return Ok(());
            }
            Some(stale) => stale,
            None => return Ok(()),
        };
        for edge in ctx.graph.upstream_edges(stale).await? {
            ctx.graph
                .destroy_edge(txn, edge.client_id, edge.client_index)
                .await?;
        }
        ctx.graph.destroy_object(txn, stale).await?;
        info!(job_number = %ctx.job_number(), %stale, serial = %self.request.serial_number, "Destroyed stale provision drive");
        Ok(())
    }

    async fn mark_needs_rebuild(&self, ctx: &JobContext) -> Result<()> {
        let pvd = self.request.object_id;
        for group in &self.upstream {
            let rg = group.raid_group;
            let vd = if ctx.layout.is_system_rg(rg) {
                None
            } else {
                group.virtual_drive
            };
            let graph = &ctx.graph;
            retry_bounded(ctx.retry_policy(), "mark_needs_rebuild", || async move {
                if graph.mark_needs_rebuild(rg, vd, pvd).await? {
                    Ok(())
                } else {
                    Err(Error::Busy {
                        opcode: "mark_needs_rebuild".into(),
                    })
                }
            })
            .await?;
            debug!(job_number = %ctx.job_number(), raid_group = %rg, %pvd, "Position marked needs-rebuild");
        }
        Ok(())
    }

    async fn wait_for_downstream_edge(&self, ctx: &JobContext) -> Result<()> {
        let pvd = self.request.object_id;
        let (timeout, poll) = ctx.config.reinit.edge_wait();
        let deadline = Instant::now() + timeout;
        loop {
            if !ctx.graph.downstream_edges(pvd).await?.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::WaitTimeout {
                    what: format!("{} downstream connection", pvd),
                    after: timeout,
                });
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn refresh_chassis_records(&self, ctx: &JobContext, pdo: ObjectId) -> Result<()> {
        let pvd = self.request.object_id;
        if let Some(slot) = ctx.layout.system_drive_slot(pvd) {
            if slot >= NUMBER_OF_SYSTEM_DRIVES {
                return Err(Error::Internal(format!("system drive slot {} out of range", slot)));
            }
            let mut fru = ctx.graph.fru_descriptor().await?;
            let slot = slot as usize;
            if fru.system_drive_serial_numbers.len() <= slot {
                fru.system_drive_serial_numbers.resize(slot + 1, String::new());
            }
            fru.system_drive_serial_numbers[slot] = self.request.serial_number.clone();
            ctx.graph.set_fru_descriptor(fru).await?;
        }
        let location = ctx.graph.physical_drive_info(pdo).await?.location;
        ctx.graph.stamp_fru_signature(location).await
    }

    async fn post_commit(&self, ctx: &JobContext) -> Result<()> {
        let pvd = self.request.object_id;
        ctx.graph.connect_drives(vec![pvd]).await?;
        let pdo = ctx
            .graph
            .physical_drive_by_serial(&self.request.serial_number)
            .await?
            .ok_or_else(|| {
                Error::Internal(format!("no physical drive with serial {}", self.request.serial_number))
            })?;
        self.wait_for_downstream_edge(ctx).await?;
        self.refresh_chassis_records(ctx, pdo).await?;

        if self.encrypted {
            let (timeout, poll) = ctx.config.reinit.key_wait();
            ctx.graph
                .wait_for_any_lifecycle(
                    pvd,
                    &[LifecycleState::Activate, LifecycleState::Ready],
                    timeout,
                    poll,
                )
                .await?;
            notify_key_manager(ctx, pvd, &self.upstream, KeyState::NewKeyRequired).await?;
        }
        Ok(())
    }
}

/// System drives live at fixed slots. A record that drifted from its slot,
/// or lost its drive type, is repaired from the layout and a sibling.
async fn correct_system_drive(ctx: &JobContext, desired: &mut SpareSelectionInfo) -> Result<()> {
    let layout: &PrivateSpaceLayout = ctx.layout;
    if let Some(location) = layout.system_drive_location(desired.object_id) {
        if desired.location != location {
            warn!(pvd = %desired.object_id, stale = %desired.location, %location, "Correcting system drive location");
            desired.location = location;
        }
    }
    if desired.drive_type == DriveType::Invalid {
        for sibling in layout.system_pvd_ids().filter(|id| *id != desired.object_id) {
            let drive_type = match ctx.graph.provision_drive_info(sibling).await {
                Ok(info) => info.drive_type,
                Err(err) => {
                    debug!(%sibling, error = %err, "Sibling system drive unavailable");
                    continue;
                }
            };
            if drive_type != DriveType::Invalid {
                warn!(pvd = %desired.object_id, %sibling, ?drive_type, "Borrowing system drive type");
                desired.drive_type = drive_type;
                break;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl JobOperation for ProvisionDriveReinit {
    fn job_type(&self) -> JobType {
        JobType::ProvisionDriveReinitialize
    }

    fn class_id(&self) -> ClassId {
        ClassId::ProvisionDrive
    }

    async fn validate(&mut self, ctx: &mut JobContext) -> Result<()> {
        let pvd = self.request.object_id;
        ctx.element.object_id = pvd;

        let desired = self.desired_drive(ctx).await?;
        let (pdo, candidate) = self.replacement_drive(ctx, &desired).await?;
        let required: Lba = desired.capacity;
        if let Err(violation) = check_hard_rules(&desired, &candidate, required) {
            warn!(
                job_number = %ctx.job_number(),
                %pvd,
                location = %desired.location,
                %violation,
                "Replacement drive rejected"
            );
            self.report_incompatible(ctx, pdo, desired.location).await;
            return Err(Error::SwapValidation {
                object_id: pvd,
                reason: violation.to_string(),
            });
        }

        self.capacity = candidate.capacity;

        self.upstream = upstream_raid_groups(&ctx.graph, ctx.layout, pvd).await?;
        for group in &self.upstream {
            let allowed = ctx
                .graph
                .can_pvd_get_reinitialized(group.raid_group, pvd)
                .await
                .map_err(|err| {
                    Error::validation(
                        JobErrorCode::InternalError,
                        format!("{} did not answer reinit check: {}", group.raid_group, err),
                    )
                })?;
            if !allowed {
                return Err(Error::validation(
                    JobErrorCode::InternalError,
                    format!("{} refused reinitialization of {}", group.raid_group, pvd),
                ));
            }
        }

        self.encrypted = ctx.graph.encryption_mode().await? == EncryptionMode::Encrypted;
        Ok(())
    }

    async fn update_in_memory(&mut self, ctx: &mut JobContext) -> Result<()> {
        let txn = ctx.transaction.start().await?;
        self.destroy_stale_drive(ctx, txn).await?;
        self.mark_needs_rebuild(ctx).await?;

        let block_size = BlockSize::from_bytes(self.request.configured_block_size);
        ctx.graph
            .update_provision_drive(
                txn,
                self.request.object_id,
                PvdConfigUpdate::Identity {
                    configured_capacity: self.capacity,
                    configured_block_size: block_size,
                    serial_number: self.request.serial_number.clone(),
                },
            )
            .await?;

        if self.encrypted {
            notify_key_manager(
                ctx,
                self.request.object_id,
                &self.upstream,
                KeyState::OldKeyNeedsRemoval,
            )
            .await?;
        }
        info!(
            job_number = %ctx.job_number(),
            pvd = %self.request.object_id,
            serial = %self.request.serial_number,
            %txn,
            "Provision drive reinit staged"
        );
        Ok(())
    }

    async fn persist(&mut self, ctx: &mut JobContext) -> Result<()> {
        ctx.transaction.commit().await?;
        self.post_commit(ctx).await.map_err(|err| {
            warn!(job_number = %ctx.job_number(), pvd = %self.request.object_id, error = %err, "Reinit failed after commit");
            Error::Internal(format!("post-commit reinit step failed: {}", err))
        })
    }

    async fn commit(&mut self, _ctx: &mut JobContext) -> Result<()> {
        Ok(())
    }
}
