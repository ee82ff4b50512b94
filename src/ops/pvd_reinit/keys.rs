//! RAID groups above a provision drive and the key manager requests for them

use crate::domain::{KeyNotification, KeyState, ObjectId, SwapCommand};
use crate::error::{Error, Result};
use crate::graph::GraphClient;
use crate::job::JobContext;
use crate::layout::{PrivateSpaceLayout, VAULT_RG};
use tracing::{debug, info};

/// A RAID group consuming the drive, directly or through a virtual drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamRaidGroup {
    pub raid_group: ObjectId,
    /// `None` when the group sits directly on the drive (system groups)
    pub virtual_drive: Option<ObjectId>,
}

impl UpstreamRaidGroup {
    /// Object the group sees at the drive's position
    pub fn server(&self, pvd: ObjectId) -> ObjectId {
        self.virtual_drive.unwrap_or(pvd)
    }
}

/// System groups consume provision drives directly; user groups go through
/// one virtual drive per position.
pub async fn upstream_raid_groups(
    graph: &GraphClient,
    layout: &PrivateSpaceLayout,
    pvd: ObjectId,
) -> Result<Vec<UpstreamRaidGroup>> {
    let mut groups = Vec::new();
    for upstream in graph.upstream_objects(pvd).await? {
        if layout.is_system_rg(upstream) {
            groups.push(UpstreamRaidGroup {
                raid_group: upstream,
                virtual_drive: None,
            });
            continue;
        }
        match graph.upstream_objects(upstream).await?.first() {
            Some(raid_group) => groups.push(UpstreamRaidGroup {
                raid_group: *raid_group,
                virtual_drive: Some(upstream),
            }),
            None => debug!(vd = %upstream, %pvd, "Virtual drive has no consumer"),
        }
    }
    Ok(groups)
}

/// Tell the key manager about the drive's positions. Only the vault among
/// the system groups carries keys.
pub async fn notify_key_manager(
    ctx: &JobContext,
    pvd: ObjectId,
    groups: &[UpstreamRaidGroup],
    state: KeyState,
) -> Result<()> {
    for group in groups {
        if ctx.layout.is_system_rg(group.raid_group) && group.raid_group != VAULT_RG {
            continue;
        }
        let position = ctx
            .graph
            .drive_position_by_server(group.raid_group, group.server(pvd))
            .await?
            .ok_or_else(|| {
                Error::Internal(format!(
                    "{} has no position for {} in {}",
                    pvd,
                    group.server(pvd),
                    group.raid_group
                ))
            })?;
        let control_number = ctx.graph.raid_group_number(group.raid_group).await?;

        info!(
            job_number = %ctx.job_number(),
            raid_group = %group.raid_group,
            position,
            %state,
            "Notifying key manager"
        );
        ctx.keys
            .notify(KeyNotification {
                raid_group_id: group.raid_group,
                control_number,
                position,
                state,
                swap_command: SwapCommand::PermanentSpare,
            })
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::domain::RaidGroupNumber;
    use crate::layout::TRIPLE_MIRROR_RG;
    use crate::sim::SimulatedArray;
    use crate::transport::ChannelTransport;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn client(sim: SimulatedArray) -> GraphClient {
        let (transport, _) = ChannelTransport::spawn(
            Arc::new(sim),
            &TransportConfig::default(),
            CancellationToken::new(),
        );
        GraphClient::new(transport)
    }

    #[tokio::test]
    async fn test_system_drive_groups() {
        let graph = client(SimulatedArray::with_system_topology());
        let layout = PrivateSpaceLayout::standard();

        let groups = upstream_raid_groups(&graph, layout, ObjectId(1)).await.unwrap();
        let ids: Vec<ObjectId> = groups.iter().map(|g| g.raid_group).collect();
        assert!(ids.contains(&TRIPLE_MIRROR_RG));
        assert!(ids.contains(&VAULT_RG));
        assert!(groups.iter().all(|g| g.virtual_drive.is_none()));
    }

    #[tokio::test]
    async fn test_user_drive_goes_through_virtual_drive() {
        let graph = client(SimulatedArray::demo());
        let layout = PrivateSpaceLayout::standard();
        let pvd = graph.lookup_pvd_by_serial("USR-0001").await.unwrap().unwrap();
        let rg = graph.lookup_raid_group(RaidGroupNumber(5)).await.unwrap();

        let groups = upstream_raid_groups(&graph, layout, pvd).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].raid_group, rg);
        let vd = groups[0].virtual_drive.unwrap();
        assert_eq!(groups[0].server(pvd), vd);
        assert_eq!(graph.drive_position_by_server(rg, vd).await.unwrap(), Some(1));
    }
}
