//! RAID group destroy
//!
//! Tears down a RAID group and, for RAID10, its mid-tier mirrors in one
//! transaction. A virtual drive goes too only when the object it feeds
//! agrees it can be removed; virtual drives shared with another RAID group
//! stay. Provision drives left with no consumers return to the unconsumed
//! pool. System RAID groups sit directly on the system drives, so only the
//! group object itself is destroyed.

pub mod context;

pub use context::{RaidGroupDestroyContext, VirtualDriveCandidate};

use crate::domain::{
    ClassId, DownstreamHealth, JobType, LifecycleState, ObjectId, PvdConfigType,
    RaidGroupDestroyRequest, RaidType, TransactionId,
};
use crate::error::{Error, Result};
use crate::job::{JobContext, JobOperation};
use crate::layout::TRIPLE_MIRROR_RG;
use crate::transport::PvdConfigUpdate;
use async_trait::async_trait;
use tracing::{debug, info, warn};

pub struct RaidGroupDestroy {
    request: RaidGroupDestroyRequest,
    context: Option<RaidGroupDestroyContext>,
}

impl RaidGroupDestroy {
    pub fn new(request: RaidGroupDestroyRequest) -> Self {
        Self {
            request,
            context: None,
        }
    }

    pub fn context(&self) -> Option<&RaidGroupDestroyContext> {
        self.context.as_ref()
    }

    async fn check_database_redundancy(&self, ctx: &JobContext, raid_group: ObjectId) -> Result<()> {
        let info = ctx.graph.raid_group_info(TRIPLE_MIRROR_RG).await?;
        if info.rebuilding_positions() < 2 {
            return Ok(());
        }
        if !self.request.allow_destroy_broken_rg {
            return Err(Error::DoubleDegraded);
        }
        let health = ctx.graph.downstream_health(raid_group).await?;
        if matches!(health, DownstreamHealth::Broken | DownstreamHealth::Disabled) {
            warn!(
                job_number = %ctx.job_number(),
                %raid_group,
                ?health,
                "Database is double degraded; destroying broken RAID group"
            );
            Ok(())
        } else {
            Err(Error::DoubleDegraded)
        }
    }

    /// Ask `parent` about each drive under it and record the verdict
    async fn collect_virtual_drives(
        &self,
        ctx: &JobContext,
        destroy: &mut RaidGroupDestroyContext,
        parent: ObjectId,
    ) -> Result<()> {
        for vd in ctx.graph.downstream_objects(parent).await? {
            let removable = ctx.graph.can_object_be_removed(vd, parent).await?;
            let provision_drives = ctx.graph.downstream_objects(vd).await?;
            debug!(job_number = %ctx.job_number(), %vd, %parent, removable, "Virtual drive candidate");
            destroy.add_virtual_drive(
                vd,
                VirtualDriveCandidate {
                    parent,
                    destroy: removable,
                    provision_drives,
                },
            );
        }
        Ok(())
    }

    /// Return a provision drive to the unconsumed pool once nothing consumes
    /// it. Failures are logged only.
    async fn reclaim_provision_drive(&self, ctx: &JobContext, txn: TransactionId, pvd: ObjectId) {
        let remaining = match ctx.graph.upstream_edges(pvd).await {
            Ok(edges) => edges.len(),
            Err(err) => {
                warn!(job_number = %ctx.job_number(), %pvd, "Cannot read upstream edges: {}", err);
                return;
            }
        };
        if remaining > 0 {
            debug!(job_number = %ctx.job_number(), %pvd, remaining, "Provision drive still consumed");
            return;
        }
        match ctx
            .graph
            .update_provision_drive(txn, pvd, PvdConfigUpdate::ConfigType(PvdConfigType::Unconsumed))
            .await
        {
            Ok(()) => info!(job_number = %ctx.job_number(), %pvd, "Provision drive reclaimed"),
            Err(err) => warn!(job_number = %ctx.job_number(), %pvd, "Reclaim failed: {}", err),
        }
    }
}

#[async_trait]
impl JobOperation for RaidGroupDestroy {
    fn job_type(&self) -> JobType {
        JobType::RaidGroupDestroy
    }

    fn class_id(&self) -> ClassId {
        self.context
            .as_ref()
            .map(|c| c.raid_type.class_id())
            .unwrap_or(ClassId::Invalid)
    }

    async fn validate(&mut self, ctx: &mut JobContext) -> Result<()> {
        let raid_group = ctx.graph.lookup_raid_group(self.request.raid_group_id).await?;
        ctx.element.object_id = raid_group;

        self.check_database_redundancy(ctx, raid_group).await?;

        let upstream = ctx.graph.upstream_edges(raid_group).await?;
        if !upstream.is_empty() {
            return Err(Error::HasUpstreamEdges {
                object_id: raid_group,
                count: upstream.len(),
            });
        }

        let info = ctx.graph.raid_group_info(raid_group).await?;
        let mut destroy = RaidGroupDestroyContext::new(raid_group, info.raid_type);

        if info.raid_type == RaidType::Raid10 {
            for mirror in ctx.graph.downstream_objects(raid_group).await? {
                destroy.add_mirror(mirror);
                self.collect_virtual_drives(ctx, &mut destroy, mirror).await?;
            }
        } else if !ctx.layout.is_system_rg(raid_group) {
            self.collect_virtual_drives(ctx, &mut destroy, raid_group)
                .await?;
        }

        let max = ctx.config.limits.max_objects_per_destroy;
        if destroy.total_objects > max {
            return Err(Error::SystemLimitsExceeded {
                limit: "objects per destroy",
                current: destroy.total_objects as u32,
                max: max as u32,
            });
        }

        info!(
            job_number = %ctx.job_number(),
            %raid_group,
            raid_type = ?destroy.raid_type,
            mirrors = destroy.mirrors.len(),
            virtual_drives = destroy.virtual_drives.len(),
            total_objects = destroy.total_objects,
            "RAID group destroy validated"
        );
        self.context = Some(destroy);
        Ok(())
    }

    async fn update_in_memory(&mut self, ctx: &mut JobContext) -> Result<()> {
        let txn = ctx.transaction.start().await?;
        let destroy = self
            .context
            .as_mut()
            .ok_or_else(|| Error::Internal("destroy context missing".into()))?;
        destroy.transaction = Some(txn);
        let destroy = destroy.clone();

        ctx.graph.destroy_object(txn, destroy.raid_group).await?;
        for mirror in &destroy.mirrors {
            ctx.graph.destroy_object(txn, *mirror).await?;
        }

        for (vd, candidate) in destroy.flagged() {
            ctx.graph.destroy_object(txn, *vd).await?;
            for pvd in &candidate.provision_drives {
                self.reclaim_provision_drive(ctx, txn, *pvd).await;
            }
        }
        for (vd, candidate) in destroy.retained() {
            info!(
                job_number = %ctx.job_number(),
                %vd,
                parent = %candidate.parent,
                "Virtual drive has other upstream consumers; keeping it"
            );
        }
        Ok(())
    }

    async fn commit(&mut self, ctx: &mut JobContext) -> Result<()> {
        ctx.wait_if_requested(ctx.element.object_id, LifecycleState::NotExist)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::domain::{DriveLocation, DriveType, JobCommand, JobStatus, LunNumber, RaidGroupNumber};
    use crate::error::JobErrorCode;
    use crate::layout::{PrivateSpaceLayout, VAULT_RG};
    use crate::ops::test_support::Harness;
    use crate::sim::{PvdSpec, RaidGroupTopology, SimulatedArray};

    fn array_with_raid10() -> (SimulatedArray, RaidGroupTopology, Vec<ObjectId>) {
        let sim = SimulatedArray::with_system_topology();
        let pvds: Vec<_> = (0..4)
            .map(|slot| {
                let location = DriveLocation::new(0, 1, slot);
                let serial = format!("R10-{}", slot);
                sim.add_physical_drive(location, &serial, DriveType::Sas, 0x0100_0000);
                sim.add_provision_drive(PvdSpec::new(location, serial))
            })
            .collect();
        let topo = sim.add_raid_group(RaidGroupNumber(10), RaidType::Raid10, &pvds, 0x8000, 8);
        (sim, topo, pvds)
    }

    fn destroy(number: u32) -> JobCommand {
        JobCommand::RaidGroupDestroy(RaidGroupDestroyRequest::new(RaidGroupNumber(number)))
    }

    #[tokio::test]
    async fn test_raid10_destroys_everything_unshared() {
        let (sim, topo, pvds) = array_with_raid10();
        let harness = Harness::new(sim);

        let done = harness.run(destroy(10)).await;
        assert_eq!(done.status, JobStatus::Ok);
        assert_eq!(done.object_id, topo.raid_group);

        for id in std::iter::once(topo.raid_group)
            .chain(topo.mirrors.iter().copied())
            .chain(topo.virtual_drives.iter().copied())
        {
            assert!(!harness.sim.exists(id), "{} survived", id);
        }
        for pvd in pvds {
            let info = harness.graph.provision_drive_info(pvd).await.unwrap();
            assert_eq!(info.config_type, PvdConfigType::Unconsumed);
        }

        let committed = harness.sim.committed_transactions();
        assert_eq!(committed.len(), 1);
        let destroyed: Vec<_> = committed[0]
            .entries
            .iter()
            .filter(|e| e.opcode == "destroy_object")
            .map(|e| e.object_id)
            .collect();
        assert_eq!(destroyed[0], topo.raid_group);
        assert_eq!(&destroyed[1..3], topo.mirrors.as_slice());
        assert_eq!(destroyed.len(), 7);
    }

    #[tokio::test]
    async fn test_shared_virtual_drive_survives() {
        let (sim, topo, pvds) = array_with_raid10();
        let spare = sim.add_provision_drive(PvdSpec::new(DriveLocation::new(0, 1, 9), "R10-9"));
        let other = sim.add_raid_group(RaidGroupNumber(11), RaidType::Raid0, &[spare], 0x4000, 8);
        assert!(sim.share_virtual_drive(topo.virtual_drives[0], other.raid_group, 1));
        let harness = Harness::new(sim);

        let done = harness.run(destroy(10)).await;
        assert_eq!(done.status, JobStatus::Ok);

        // 1 striper + 2 mirrors + 3 of 4 virtual drives
        let committed = harness.sim.committed_transactions();
        let destroyed = committed[0]
            .entries
            .iter()
            .filter(|e| e.opcode == "destroy_object")
            .count();
        assert_eq!(destroyed, 6);

        assert!(harness.sim.exists(topo.virtual_drives[0]));
        assert_eq!(
            harness.sim.upstream_objects(topo.virtual_drives[0]),
            vec![other.raid_group]
        );
        let kept = harness.graph.provision_drive_info(pvds[0]).await.unwrap();
        assert_eq!(kept.config_type, PvdConfigType::Raid);
    }

    #[tokio::test]
    async fn test_removal_verdict_gates_each_virtual_drive() {
        let (sim, topo, pvds) = array_with_raid10();
        sim.set_removal_override(topo.virtual_drives[2], Some(false));
        let harness = Harness::new(sim);

        let done = harness.run(destroy(10)).await;
        assert_eq!(done.status, JobStatus::Ok);
        assert!(harness.sim.exists(topo.virtual_drives[2]));
        assert!(!harness.sim.exists(topo.virtual_drives[3]));

        let kept = harness.graph.provision_drive_info(pvds[2]).await.unwrap();
        assert_eq!(kept.config_type, PvdConfigType::Raid);
        assert_eq!(harness.sim.upstream_edge_count(pvds[2]), 1);
    }

    #[tokio::test]
    async fn test_upstream_edges_block_destroy() {
        let harness = Harness::new(SimulatedArray::demo());
        let rg = harness.graph.lookup_raid_group(RaidGroupNumber(5)).await.unwrap();
        harness.sim.add_lun(rg, LunNumber(3), 0x100);

        let done = harness.run(destroy(5)).await;
        assert_eq!(done.error_code, JobErrorCode::RequestObjectHasUpstreamEdges);
        assert!(harness.sim.transaction_starts().is_empty());
    }

    #[tokio::test]
    async fn test_broken_override_requires_broken_group() {
        let harness = Harness::new(SimulatedArray::demo());
        harness
            .sim
            .set_rebuild_checkpoints(TRIPLE_MIRROR_RG, vec![0, 0, 0]);

        let done = harness.run(destroy(5)).await;
        assert_eq!(done.error_code, JobErrorCode::DbDriveDoubleDegraded);

        let mut request = RaidGroupDestroyRequest::new(RaidGroupNumber(5));
        request.allow_destroy_broken_rg = true;
        let done = harness.run(JobCommand::RaidGroupDestroy(request.clone())).await;
        assert_eq!(done.error_code, JobErrorCode::DbDriveDoubleDegraded);

        let rg = harness.graph.lookup_raid_group(RaidGroupNumber(5)).await.unwrap();
        harness.sim.set_health(rg, DownstreamHealth::Broken);
        let done = harness.run(JobCommand::RaidGroupDestroy(request)).await;
        assert_eq!(done.status, JobStatus::Ok);
    }

    #[tokio::test]
    async fn test_destroy_list_limit() {
        let (sim, _, _) = array_with_raid10();
        let mut config = OrchestratorConfig::default();
        config.limits.max_objects_per_destroy = 4;
        let harness = Harness::with_config(sim, config);

        let done = harness.run(destroy(10)).await;
        assert_eq!(done.error_code, JobErrorCode::SystemLimitsExceeded);
    }

    #[tokio::test]
    async fn test_wait_for_destroyed_group() {
        let (sim, topo, _) = array_with_raid10();
        let harness = Harness::new(sim);

        let mut request = RaidGroupDestroyRequest::new(RaidGroupNumber(10));
        request.wait_destroy = true;
        request.destroy_timeout_ms = 1_000;
        let done = harness.run(JobCommand::RaidGroupDestroy(request)).await;

        assert_eq!(done.status, JobStatus::Ok);
        assert!(harness.sim.opcode_count("get_lifecycle_state") >= 1);
        assert_eq!(
            harness.graph.lifecycle_state(topo.raid_group).await.unwrap(),
            LifecycleState::NotExist
        );
    }

    #[tokio::test]
    async fn test_no_wait_skips_lifecycle_poll() {
        let (sim, _, _) = array_with_raid10();
        let harness = Harness::new(sim);

        let done = harness.run(destroy(10)).await;
        assert_eq!(done.status, JobStatus::Ok);
        assert_eq!(harness.sim.opcode_count("get_lifecycle_state"), 0);
    }

    #[tokio::test]
    async fn test_system_group_destroys_only_itself() {
        let sim = SimulatedArray::with_system_topology();
        sim.remove_object(ObjectId(0x41));
        sim.remove_object(ObjectId(0x42));
        let harness = Harness::new(sim);

        let mut request = RaidGroupDestroyRequest::new(RaidGroupNumber(1001));
        request.wait_destroy = true;
        let done = harness.run(JobCommand::RaidGroupDestroy(request)).await;
        assert_eq!(done.status, JobStatus::Ok, "{:?}", done.failure);
        assert_eq!(done.object_id, VAULT_RG);
        assert!(!harness.sim.exists(VAULT_RG));

        let committed = harness.sim.committed_transactions();
        let destroyed: Vec<_> = committed[0]
            .entries
            .iter()
            .filter(|e| e.opcode == "destroy_object")
            .map(|e| e.object_id)
            .collect();
        assert_eq!(destroyed, vec![VAULT_RG]);
        assert_eq!(harness.sim.opcode_count("can_object_be_removed"), 0);

        for pvd in PrivateSpaceLayout::standard().system_pvd_ids() {
            assert!(harness.sim.exists(pvd));
            assert_eq!(harness.sim.upstream_edge_count(pvd), 1);
        }
    }
}
