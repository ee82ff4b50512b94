//! LUN create
//!
//! Binds a LUN on a RAID group: validate the request against limits,
//! readiness and free capacity, then create the LUN object and its edge to
//! the RAID group in one transaction. System LUNs come from the private
//! space layout and bind at their fixed offset.

pub mod capacity;

use crate::domain::{
    ClassId, EdgeFlags, JobType, Lba, LifecycleState, LunCreateRequest, ObjectId, Placement,
    EdgeIndex, LBA_INVALID,
};
use crate::error::{Error, JobErrorCode, Result};
use crate::job::{JobContext, JobOperation};
use crate::layout::{SystemLun, TRIPLE_MIRROR_RG};
use crate::transport::{CapacityQuery, EdgeSpec, LunConfigFlags, LunObjectConfig};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

/// Where the LUN lands, decided in validate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LunPlacement {
    raid_group: ObjectId,
    /// Requested capacity plus the zero bitmap reservation
    exported_capacity: Lba,
    imported_capacity: Lba,
    offset: Lba,
    client_index: EdgeIndex,
}

pub struct LunCreate {
    request: LunCreateRequest,
    system_lun: Option<SystemLun>,
    placement: Option<LunPlacement>,
}

impl LunCreate {
    pub fn new(request: LunCreateRequest) -> Self {
        Self {
            request,
            system_lun: None,
            placement: None,
        }
    }

    pub fn config_flags(request: &LunCreateRequest) -> LunConfigFlags {
        let mut flags = LunConfigFlags::NONE;
        if request.ndb {
            flags |= LunConfigFlags::NO_USER_ZERO;
            flags |= LunConfigFlags::NO_INITIAL_VERIFY;
        }
        if request.noinitialverify {
            flags |= LunConfigFlags::NO_INITIAL_VERIFY;
        }
        if request.export_lun {
            flags |= LunConfigFlags::EXPORT_LUN;
        }
        flags
    }

    fn edge_flags(&self) -> EdgeFlags {
        let mut flags = EdgeFlags::NONE;
        if self.request.ndb {
            flags = flags | EdgeFlags::NDB;
        }
        if self.request.ndb || self.request.noinitialverify {
            flags = flags | EdgeFlags::NO_INITIAL_VERIFY;
        }
        flags
    }

    fn object_config(&self, exported: Lba, imported: Lba, object_id: Option<ObjectId>) -> LunObjectConfig {
        LunObjectConfig {
            object_id,
            lun_number: self.request.lun_number,
            exported_capacity: exported,
            imported_capacity: imported,
            config_flags: Self::config_flags(&self.request),
            world_wide_name: self.request.world_wide_name.clone(),
            user_defined_name: self.request.user_defined_name.clone(),
            bind_time: self.request.bind_time.unwrap_or_else(Utc::now),
            user_private: self.request.user_private,
        }
    }

    async fn check_limits(&self, ctx: &JobContext, raid_group: ObjectId) -> Result<()> {
        if !self.request.is_system_lun {
            let stats = ctx.graph.database_stats().await?;
            if stats.user_luns >= stats.max_user_luns {
                return Err(Error::SystemLimitsExceeded {
                    limit: "user LUNs",
                    current: stats.user_luns,
                    max: stats.max_user_luns,
                });
            }
        }

        let bound = ctx.graph.upstream_objects(raid_group).await?.len() as u32;
        let max = ctx.config.limits.max_luns_per_raid_group;
        if bound >= max {
            return Err(Error::SystemLimitsExceeded {
                limit: "LUNs per RAID group",
                current: bound,
                max,
            });
        }
        Ok(())
    }

    async fn check_database_redundancy(&self, ctx: &JobContext) -> Result<()> {
        let info = ctx.graph.raid_group_info(TRIPLE_MIRROR_RG).await?;
        if info.rebuilding_positions() >= 2 {
            return Err(Error::DoubleDegraded);
        }
        Ok(())
    }

    async fn place(
        &self,
        ctx: &JobContext,
        raid_group: ObjectId,
        exported: Lba,
        imported: Lba,
    ) -> Result<LunPlacement> {
        let request = &self.request;
        if request.ndb {
            // an NDB bind must land exactly on the extent it describes
            let query = CapacityQuery {
                requested_capacity: imported,
                placement: Placement::SpecificLocation,
                offset: request.addroffset,
                ignore_offset: false,
            };
            let invalid = || Error::InvalidAddressOffset {
                offset: request.addroffset,
                requested: imported,
            };
            let placed = ctx
                .graph
                .validate_capacity(raid_group, query)
                .await
                .map_err(|err| {
                    debug!(job_number = %ctx.job_number(), "NDB capacity check failed: {}", err);
                    invalid()
                })?;
            if placed.available_capacity != imported {
                return Err(invalid());
            }
            return Ok(LunPlacement {
                raid_group,
                exported_capacity: exported,
                imported_capacity: imported,
                offset: request.addroffset,
                client_index: placed.client_index,
            });
        }

        let query = CapacityQuery {
            requested_capacity: imported,
            placement: request.placement,
            offset: request.addroffset,
            ignore_offset: request.placement == Placement::FirstFit,
        };
        let placed = ctx
            .graph
            .validate_capacity(raid_group, query)
            .await
            .map_err(|err| {
                debug!(job_number = %ctx.job_number(), placement = ?request.placement, "Capacity check failed: {}", err);
                Error::BeyondCapacity {
                    requested: imported,
                    available: 0,
                }
            })?;
        if placed.offset == LBA_INVALID || placed.available_capacity < imported {
            return Err(Error::BeyondCapacity {
                requested: imported,
                available: placed.available_capacity,
            });
        }
        Ok(LunPlacement {
            raid_group,
            exported_capacity: exported,
            imported_capacity: imported,
            offset: placed.offset,
            client_index: placed.client_index,
        })
    }

    fn planned(&self) -> Result<LunPlacement> {
        self.placement
            .ok_or_else(|| Error::Internal("LUN placement was not computed".into()))
    }
}

#[async_trait]
impl JobOperation for LunCreate {
    fn job_type(&self) -> JobType {
        JobType::LunCreate
    }

    fn class_id(&self) -> ClassId {
        ClassId::Lun
    }

    async fn validate(&mut self, ctx: &mut JobContext) -> Result<()> {
        let request = self.request.clone();

        if request.is_system_lun {
            let lun = ctx.layout.lun_by_number(request.lun_number).copied().ok_or_else(|| {
                Error::validation(
                    JobErrorCode::InvalidValue,
                    format!("LUN {} is not a system LUN", request.lun_number),
                )
            })?;
            self.system_lun = Some(lun);
        } else if let Some(existing) = ctx.graph.lookup_lun(request.lun_number).await? {
            return Err(Error::validation(
                JobErrorCode::LunIdInUse,
                format!("LUN {} is bound as {}", request.lun_number, existing),
            ));
        }

        let raid_group = ctx.graph.lookup_raid_group(request.raid_group_id).await?;
        self.check_limits(ctx, raid_group).await?;

        let state = ctx.graph.lifecycle_state(raid_group).await?;
        if !matches!(state, LifecycleState::Ready | LifecycleState::Hibernate) {
            return Err(Error::ObjectNotReady {
                object_id: raid_group,
                state,
            });
        }

        if let Some(lun) = self.system_lun {
            debug!(job_number = %ctx.job_number(), lun = lun.name, "System LUN validated");
            return Ok(());
        }

        self.check_database_redundancy(ctx).await?;

        let info = ctx.graph.raid_group_info(raid_group).await?;
        let imported = capacity::imported_capacity(request.capacity, info.lun_align_size)?;
        let exported = capacity::zero_bitmap_blocks(request.capacity, info.lun_align_size)?
            .checked_add(request.capacity)
            .ok_or_else(|| Error::validation(JobErrorCode::InvalidCapacity, "LUN capacity overflows"))?;
        let placement = self.place(ctx, raid_group, exported, imported).await?;

        info!(
            job_number = %ctx.job_number(),
            raid_group = %raid_group,
            imported_capacity = placement.imported_capacity,
            offset = placement.offset,
            "LUN create validated"
        );
        self.placement = Some(placement);
        Ok(())
    }

    async fn update_in_memory(&mut self, ctx: &mut JobContext) -> Result<()> {
        let txn = ctx.transaction.start().await?;

        let (lun_id, edge) = match self.system_lun {
            Some(lun) => {
                let config = self.object_config(
                    lun.external_capacity,
                    lun.internal_capacity,
                    Some(lun.object_id),
                );
                let lun_id = ctx.graph.create_lun(txn, config).await?;
                let edge = EdgeSpec {
                    server_id: lun.raid_group_id,
                    client_id: lun_id,
                    client_index: 0,
                    capacity: lun.internal_capacity,
                    offset: lun.raid_group_offset,
                    flags: EdgeFlags::NONE,
                };
                (lun_id, edge)
            }
            None => {
                let plan = self.planned()?;
                let config = self.object_config(plan.exported_capacity, plan.imported_capacity, None);
                let lun_id = ctx.graph.create_lun(txn, config).await?;
                let edge = EdgeSpec {
                    server_id: plan.raid_group,
                    client_id: lun_id,
                    client_index: plan.client_index,
                    capacity: plan.imported_capacity,
                    offset: plan.offset,
                    flags: self.edge_flags(),
                };
                (lun_id, edge)
            }
        };

        ctx.element.object_id = lun_id;
        ctx.graph.create_edge(txn, edge).await?;
        info!(job_number = %ctx.job_number(), lun = %lun_id, %txn, "LUN staged");
        Ok(())
    }

    async fn commit(&mut self, ctx: &mut JobContext) -> Result<()> {
        ctx.wait_if_requested(ctx.element.object_id, LifecycleState::Ready)
            .await
    }
}
