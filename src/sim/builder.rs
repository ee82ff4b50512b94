//! Topology construction for the simulated array

use super::arena::{ArrayObject, ExtPoolRecord, ObjectKind, PhysicalDriveRecord, RaidGroupRecord};
use super::SimulatedArray;
use crate::domain::{
    BlockSize, ClassId, DownstreamHealth, DriveLocation, DriveType, Edge, EdgeFlags, Lba,
    LifecycleState, LunNumber, ObjectId, PathState, PhysicalDriveInfo, PoolId, ProvisionDriveInfo,
    PvdConfigType, RaidGroupNumber, RaidType, LBA_INVALID,
};
use crate::layout::{PrivateSpaceLayout, DEFAULT_PVD_EXPORTED_OFFSET, NUMBER_OF_SYSTEM_DRIVES};
use crate::transport::{FruDescriptor, LunConfigFlags, LunObjectConfig};
use chrono::Utc;

/// Gross capacity of every simulated drive
pub const SIM_DRIVE_CAPACITY: Lba = 0x0100_0000;

/// Provision drive to add to the simulation
#[derive(Debug, Clone)]
pub struct PvdSpec {
    pub location: DriveLocation,
    pub serial_number: String,
    pub drive_type: DriveType,
    pub capacity: Lba,
    pub config_type: PvdConfigType,
}

impl PvdSpec {
    pub fn new(location: DriveLocation, serial_number: impl Into<String>) -> Self {
        Self {
            location,
            serial_number: serial_number.into(),
            drive_type: DriveType::Sas,
            capacity: SIM_DRIVE_CAPACITY - DEFAULT_PVD_EXPORTED_OFFSET,
            config_type: PvdConfigType::Unconsumed,
        }
    }
}

/// Objects created for one RAID group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidGroupTopology {
    pub raid_group: ObjectId,
    /// RAID10 mirrors, in striper position order
    pub mirrors: Vec<ObjectId>,
    /// One per member drive, in drive order
    pub virtual_drives: Vec<ObjectId>,
}

fn raid_group_record(
    number: Option<RaidGroupNumber>,
    raid_type: RaidType,
    width: u32,
    exported_capacity: Lba,
    lun_align_size: Lba,
    mid_tier: bool,
) -> RaidGroupRecord {
    RaidGroupRecord {
        number,
        raid_type,
        width,
        exported_capacity,
        lun_align_size,
        rebuild_checkpoints: vec![LBA_INVALID; width as usize],
        health: DownstreamHealth::Optimal,
        mid_tier,
        allow_pvd_reinit: true,
        nr_busy: 0,
        nr_refusals: 0,
        marked_needs_rebuild: Vec::new(),
    }
}

fn edge(server_id: ObjectId, client_id: ObjectId, client_index: u32, capacity: Lba, offset: Lba) -> Edge {
    Edge {
        server_id,
        client_id,
        client_index,
        capacity,
        offset,
        flags: EdgeFlags::NONE,
        path_state: PathState::Enabled,
    }
}

impl SimulatedArray {
    /// Array with the four system drives, the system RAID groups and the
    /// system LUNs from the private space layout
    pub fn with_system_topology() -> Self {
        let sim = Self::new();
        let layout = PrivateSpaceLayout::standard();

        let mut serials = Vec::new();
        for pvd_id in layout.system_pvd_ids() {
            let slot = pvd_id.0 - 1;
            let location = DriveLocation::new(0, 0, slot);
            let serial = format!("SYS-{:04}", slot);
            sim.add_physical_drive(location, &serial, DriveType::SasFlashHe, SIM_DRIVE_CAPACITY);
            sim.insert_provision_drive(
                pvd_id,
                PvdSpec {
                    drive_type: DriveType::SasFlashHe,
                    config_type: PvdConfigType::Raid,
                    ..PvdSpec::new(location, serial.clone())
                },
            );
            serials.push(serial);
        }

        {
            let mut state = sim.state.lock();
            for region in layout.regions() {
                state.arena.insert(ArrayObject {
                    id: region.raid_group_id,
                    class: region.raid_type.class_id(),
                    lifecycle: LifecycleState::Ready,
                    kind: ObjectKind::RaidGroup(raid_group_record(
                        Some(region.raid_group_number),
                        region.raid_type,
                        region.width,
                        region.size_in_blocks,
                        1,
                        false,
                    )),
                });
                for (position, pvd_id) in layout
                    .system_pvd_ids()
                    .take(region.width as usize)
                    .enumerate()
                {
                    let _ = state.arena.add_edge(edge(
                        pvd_id,
                        region.raid_group_id,
                        position as u32,
                        region.size_in_blocks,
                        region.starting_block_address,
                    ));
                }
            }

            for lun in layout.luns() {
                state.arena.insert(ArrayObject {
                    id: lun.object_id,
                    class: ClassId::Lun,
                    lifecycle: LifecycleState::Ready,
                    kind: ObjectKind::Lun(LunObjectConfig {
                        object_id: Some(lun.object_id),
                        lun_number: lun.lun_number,
                        exported_capacity: lun.external_capacity,
                        imported_capacity: lun.internal_capacity,
                        config_flags: LunConfigFlags::NONE,
                        world_wide_name: String::new(),
                        user_defined_name: lun.name.to_string(),
                        bind_time: Utc::now(),
                        user_private: false,
                    }),
                });
                let _ = state.arena.add_edge(edge(
                    lun.raid_group_id,
                    lun.object_id,
                    0,
                    lun.internal_capacity,
                    lun.raid_group_offset,
                ));
            }

            state.fru = FruDescriptor {
                system_drive_serial_numbers: serials,
                wwn_seed: 0x5a5a,
                chassis_replacement_movement: 0,
            };
        }
        sim
    }

    /// System topology plus a handful of user objects for the binary's
    /// standalone mode:
    /// - RAID5 group 5 on enclosure 1 slots 0-2
    /// - RAID10 group 7 on slots 3-6
    /// - extent pool 1
    /// - unconsumed drives in slots 7-9
    pub fn demo() -> Self {
        let sim = Self::with_system_topology();
        let pvds: Vec<ObjectId> = (0..10)
            .map(|slot| {
                let location = DriveLocation::new(0, 1, slot);
                let serial = format!("USR-{:04}", slot);
                sim.add_physical_drive(location, &serial, DriveType::Sas, SIM_DRIVE_CAPACITY);
                sim.add_provision_drive(PvdSpec::new(location, serial))
            })
            .collect();

        sim.add_raid_group(RaidGroupNumber(5), RaidType::Raid5, &pvds[0..3], 0x0100_0000, 8);
        sim.add_raid_group(RaidGroupNumber(7), RaidType::Raid10, &pvds[3..7], 0x0080_0000, 8);
        sim.add_ext_pool(PoolId(1), 0x0040_0000);
        sim
    }

    // =========================================================================
    // Object Creation
    // =========================================================================

    pub fn add_physical_drive(
        &self,
        location: DriveLocation,
        serial_number: &str,
        drive_type: DriveType,
        gross_capacity: Lba,
    ) -> ObjectId {
        let mut state = self.state.lock();
        let id = state.arena.allocate_id();
        state.arena.insert(ArrayObject {
            id,
            class: ClassId::PhysicalDrive,
            lifecycle: LifecycleState::Ready,
            kind: ObjectKind::PhysicalDrive(PhysicalDriveRecord {
                info: PhysicalDriveInfo {
                    location,
                    serial_number: serial_number.to_string(),
                    drive_type,
                    gross_capacity,
                    block_size: 520,
                },
                fault_lit: false,
            }),
        });
        id
    }

    /// Remove a physical drive as if it were pulled from its slot
    pub fn remove_physical_drive(&self, pdo: ObjectId) {
        let mut state = self.state.lock();
        for edge in state.arena.upstream_edges(pdo) {
            state.arena.remove_edge(edge.client_id, edge.client_index);
            if let Some(object) = state.arena.get_mut(edge.client_id) {
                object.lifecycle = LifecycleState::Fail;
            }
        }
        let _ = state.arena.remove(pdo);
    }

    /// Add a user provision drive, bound to the physical drive with the same
    /// serial number when one is present
    pub fn add_provision_drive(&self, spec: PvdSpec) -> ObjectId {
        let id = self.state.lock().arena.allocate_id();
        self.insert_provision_drive(id, spec);
        id
    }

    fn insert_provision_drive(&self, id: ObjectId, spec: PvdSpec) {
        let mut state = self.state.lock();
        let pdo = state.arena.objects().find_map(|o| {
            o.physical_drive()
                .filter(|pdo| pdo.info.serial_number == spec.serial_number)
                .map(|pdo| (o.id, pdo.info.gross_capacity))
        });
        state.arena.insert(ArrayObject {
            id,
            class: ClassId::ProvisionDrive,
            lifecycle: if pdo.is_some() {
                LifecycleState::Ready
            } else {
                LifecycleState::Fail
            },
            kind: ObjectKind::ProvisionDrive(ProvisionDriveInfo {
                config_type: spec.config_type,
                drive_type: spec.drive_type,
                location: spec.location,
                serial_number: spec.serial_number,
                configured_capacity: spec.capacity,
                configured_block_size: BlockSize::Bytes520,
                exported_offset: DEFAULT_PVD_EXPORTED_OFFSET,
                pool_id: PoolId::INVALID,
                end_of_life: false,
                slf: false,
                sniff_verify: true,
            }),
        });
        if let Some((pdo_id, capacity)) = pdo {
            let _ = state.arena.add_edge(edge(pdo_id, id, 0, capacity, 0));
        }
    }

    /// Build a RAID group over `pvds`, one virtual drive per drive. RAID10
    /// pairs consecutive drives under mirrors.
    pub fn add_raid_group(
        &self,
        number: RaidGroupNumber,
        raid_type: RaidType,
        pvds: &[ObjectId],
        exported_capacity: Lba,
        lun_align_size: Lba,
    ) -> RaidGroupTopology {
        let mut state = self.state.lock();
        let per_drive = exported_capacity / pvds.len().max(1) as Lba;

        let mut virtual_drives = Vec::new();
        for pvd in pvds {
            let vd = state.arena.allocate_id();
            state.arena.insert(ArrayObject {
                id: vd,
                class: ClassId::VirtualDrive,
                lifecycle: LifecycleState::Ready,
                kind: ObjectKind::VirtualDrive {
                    removal_override: None,
                },
            });
            let _ = state
                .arena
                .add_edge(edge(*pvd, vd, 0, per_drive, DEFAULT_PVD_EXPORTED_OFFSET));
            if let Some(info) = state.arena.get_mut(*pvd).and_then(|o| o.provision_drive_mut()) {
                info.config_type = PvdConfigType::Raid;
            }
            virtual_drives.push(vd);
        }

        let raid_group = state.arena.allocate_id();
        let mut mirrors = Vec::new();
        if raid_type == RaidType::Raid10 {
            for pair in virtual_drives.chunks(2) {
                let mirror = state.arena.allocate_id();
                state.arena.insert(ArrayObject {
                    id: mirror,
                    class: ClassId::Mirror,
                    lifecycle: LifecycleState::Ready,
                    kind: ObjectKind::RaidGroup(raid_group_record(
                        None,
                        RaidType::Raid1,
                        pair.len() as u32,
                        per_drive,
                        1,
                        true,
                    )),
                });
                for (index, vd) in pair.iter().enumerate() {
                    let _ = state
                        .arena
                        .add_edge(edge(*vd, mirror, index as u32, per_drive, 0));
                }
                mirrors.push(mirror);
            }
        }

        state.arena.insert(ArrayObject {
            id: raid_group,
            class: raid_type.class_id(),
            lifecycle: LifecycleState::Ready,
            kind: ObjectKind::RaidGroup(raid_group_record(
                Some(number),
                raid_type,
                if mirrors.is_empty() {
                    virtual_drives.len() as u32
                } else {
                    mirrors.len() as u32
                },
                exported_capacity,
                lun_align_size,
                false,
            )),
        });
        let members = if mirrors.is_empty() {
            &virtual_drives
        } else {
            &mirrors
        };
        for (index, member) in members.iter().enumerate() {
            let _ = state
                .arena
                .add_edge(edge(*member, raid_group, index as u32, per_drive, 0));
        }

        RaidGroupTopology {
            raid_group,
            mirrors,
            virtual_drives,
        }
    }

    /// Attach another consumer to an existing virtual drive
    pub fn share_virtual_drive(&self, vd: ObjectId, raid_group: ObjectId, position: u32) -> bool {
        let mut state = self.state.lock();
        state
            .arena
            .add_edge(edge(vd, raid_group, position, 0x1000, 0x0080_0000))
            .is_ok()
    }

    /// Bind a user LUN directly, outside any transaction
    pub fn add_lun(&self, raid_group: ObjectId, lun_number: LunNumber, capacity: Lba) -> ObjectId {
        let mut state = self.state.lock();
        let offset = state
            .arena
            .upstream_edges(raid_group)
            .iter()
            .map(|e| e.offset + e.capacity)
            .max()
            .unwrap_or(0);
        let id = state.arena.allocate_id();
        state.arena.insert(ArrayObject {
            id,
            class: ClassId::Lun,
            lifecycle: LifecycleState::Ready,
            kind: ObjectKind::Lun(LunObjectConfig {
                object_id: None,
                lun_number,
                exported_capacity: capacity,
                imported_capacity: capacity,
                config_flags: LunConfigFlags::NONE,
                world_wide_name: String::new(),
                user_defined_name: String::new(),
                bind_time: Utc::now(),
                user_private: false,
            }),
        });
        let _ = state.arena.add_edge(edge(raid_group, id, 0, capacity, offset));
        id
    }

    pub fn add_ext_pool(&self, pool_id: PoolId, capacity: Lba) -> ObjectId {
        let mut state = self.state.lock();
        let id = state.arena.allocate_id();
        state.arena.insert(ArrayObject {
            id,
            class: ClassId::ExtentPool,
            lifecycle: LifecycleState::Ready,
            kind: ObjectKind::ExtPool(ExtPoolRecord { pool_id, capacity }),
        });
        id
    }

    /// Drop an object and every edge touching it, outside any transaction
    pub fn remove_object(&self, id: ObjectId) {
        let mut state = self.state.lock();
        for edge in state.arena.upstream_edges(id) {
            state.arena.remove_edge(edge.client_id, edge.client_index);
        }
        let _ = state.arena.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{TRIPLE_MIRROR_RG, VAULT_RG};

    #[test]
    fn test_system_topology() {
        let sim = SimulatedArray::with_system_topology();
        assert_eq!(
            sim.downstream_objects(TRIPLE_MIRROR_RG),
            vec![ObjectId(1), ObjectId(2), ObjectId(3)]
        );
        assert_eq!(sim.downstream_objects(VAULT_RG).len(), NUMBER_OF_SYSTEM_DRIVES as usize);
        assert_eq!(sim.fru_descriptor().system_drive_serial_numbers.len(), 4);
        assert!(sim.exists(ObjectId(0x40)));
    }

    #[test]
    fn test_raid10_layout() {
        let sim = SimulatedArray::new();
        let pvds: Vec<_> = (0..4)
            .map(|slot| sim.add_provision_drive(PvdSpec::new(DriveLocation::new(0, 1, slot), format!("S{}", slot))))
            .collect();
        let topo = sim.add_raid_group(RaidGroupNumber(9), RaidType::Raid10, &pvds, 0x8000, 8);

        assert_eq!(topo.mirrors.len(), 2);
        assert_eq!(sim.downstream_objects(topo.raid_group), topo.mirrors);
        assert_eq!(
            sim.downstream_objects(topo.mirrors[1]),
            vec![topo.virtual_drives[2], topo.virtual_drives[3]]
        );
        assert_eq!(sim.upstream_objects(pvds[0]), vec![topo.virtual_drives[0]]);
    }

    #[test]
    fn test_lun_packing() {
        let sim = SimulatedArray::new();
        let pvd = sim.add_provision_drive(PvdSpec::new(DriveLocation::new(0, 1, 0), "S0"));
        let topo = sim.add_raid_group(RaidGroupNumber(1), RaidType::Raid0, &[pvd], 0x8000, 8);
        sim.add_lun(topo.raid_group, LunNumber(1), 0x100);
        sim.add_lun(topo.raid_group, LunNumber(2), 0x100);
        assert_eq!(sim.upstream_edge_count(topo.raid_group), 2);
    }
}
