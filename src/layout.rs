//! Private space layout
//!
//! Fixed object id ranges and the static table of system RAID groups and
//! system LUNs carved out of the first four drives. Read-only.

use crate::domain::{DriveLocation, Lba, LunNumber, ObjectId, RaidGroupNumber, RaidType};

pub const NUMBER_OF_SYSTEM_DRIVES: u32 = 4;

pub const PVD_FIRST: ObjectId = ObjectId(0x1);
pub const PVD_LAST: ObjectId = ObjectId(0x4);
pub const VD_FIRST: ObjectId = ObjectId(0x10);
pub const VD_LAST: ObjectId = ObjectId(0x1f);
pub const RG_FIRST: ObjectId = ObjectId(0x20);
pub const RG_LAST: ObjectId = ObjectId(0x3f);
pub const LUN_FIRST: ObjectId = ObjectId(0x40);
pub const LUN_LAST: ObjectId = ObjectId(0x7f);

/// First id handed out to user-created objects
pub const FIRST_USER_OBJECT_ID: ObjectId = ObjectId(0x100);

/// Triple mirror holding the configuration database
pub const TRIPLE_MIRROR_RG: ObjectId = ObjectId(0x20);
/// Vault RAID group, the only system RG whose positions take key requests
pub const VAULT_RG: ObjectId = ObjectId(0x21);

/// Default exported offset of a freshly initialized provision drive
pub const DEFAULT_PVD_EXPORTED_OFFSET: Lba = 0x10000;

/// A system RAID group carved from the system drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemRegion {
    pub name: &'static str,
    pub raid_group_id: ObjectId,
    pub raid_group_number: RaidGroupNumber,
    pub raid_type: RaidType,
    pub width: u32,
    pub starting_block_address: Lba,
    pub size_in_blocks: Lba,
}

/// A system LUN bound at a fixed offset of a system RAID group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemLun {
    pub name: &'static str,
    pub object_id: ObjectId,
    pub lun_number: LunNumber,
    pub raid_group_id: ObjectId,
    pub raid_group_offset: Lba,
    pub internal_capacity: Lba,
    pub external_capacity: Lba,
}

const REGIONS: &[SystemRegion] = &[
    SystemRegion {
        name: "TRIPLE_MIRROR",
        raid_group_id: TRIPLE_MIRROR_RG,
        raid_group_number: RaidGroupNumber(1000),
        raid_type: RaidType::RawMirror,
        width: 3,
        starting_block_address: 0x10000,
        size_in_blocks: 0x40000,
    },
    SystemRegion {
        name: "VAULT",
        raid_group_id: VAULT_RG,
        raid_group_number: RaidGroupNumber(1001),
        raid_type: RaidType::Raid5,
        width: 4,
        starting_block_address: 0x50000,
        size_in_blocks: 0x80000,
    },
];

const LUNS: &[SystemLun] = &[
    SystemLun {
        name: "DATABASE",
        object_id: ObjectId(0x40),
        lun_number: LunNumber(8190),
        raid_group_id: TRIPLE_MIRROR_RG,
        raid_group_offset: 0,
        internal_capacity: 0x10000,
        external_capacity: 0xF000,
    },
    SystemLun {
        name: "VAULT",
        object_id: ObjectId(0x41),
        lun_number: LunNumber(8191),
        raid_group_id: VAULT_RG,
        raid_group_offset: 0,
        internal_capacity: 0x20000,
        external_capacity: 0x1F000,
    },
    SystemLun {
        name: "SYSTEM_DUMP",
        object_id: ObjectId(0x42),
        lun_number: LunNumber(8192),
        raid_group_id: VAULT_RG,
        raid_group_offset: 0x20000,
        internal_capacity: 0x8000,
        external_capacity: 0x7C00,
    },
];

/// Lookup surface over the fixed layout
#[derive(Debug)]
pub struct PrivateSpaceLayout {
    regions: &'static [SystemRegion],
    luns: &'static [SystemLun],
}

static STANDARD: PrivateSpaceLayout = PrivateSpaceLayout {
    regions: REGIONS,
    luns: LUNS,
};

impl PrivateSpaceLayout {
    pub fn standard() -> &'static PrivateSpaceLayout {
        &STANDARD
    }

    pub fn regions(&self) -> &[SystemRegion] {
        self.regions
    }

    pub fn luns(&self) -> &[SystemLun] {
        self.luns
    }

    pub fn region_by_raid_group(&self, raid_group_id: ObjectId) -> Option<&SystemRegion> {
        self.regions.iter().find(|r| r.raid_group_id == raid_group_id)
    }

    pub fn region_by_number(&self, number: RaidGroupNumber) -> Option<&SystemRegion> {
        self.regions.iter().find(|r| r.raid_group_number == number)
    }

    pub fn lun_by_number(&self, lun_number: LunNumber) -> Option<&SystemLun> {
        self.luns.iter().find(|l| l.lun_number == lun_number)
    }

    pub fn lun_by_object_id(&self, object_id: ObjectId) -> Option<&SystemLun> {
        self.luns.iter().find(|l| l.object_id == object_id)
    }

    pub fn is_system_pvd(&self, id: ObjectId) -> bool {
        (PVD_FIRST..=PVD_LAST).contains(&id)
    }

    pub fn is_system_vd(&self, id: ObjectId) -> bool {
        (VD_FIRST..=VD_LAST).contains(&id)
    }

    pub fn is_system_rg(&self, id: ObjectId) -> bool {
        (RG_FIRST..=RG_LAST).contains(&id)
    }

    pub fn is_system_lun(&self, id: ObjectId) -> bool {
        (LUN_FIRST..=LUN_LAST).contains(&id)
    }

    /// Slot index of a system drive, if `id` is one
    pub fn system_drive_slot(&self, id: ObjectId) -> Option<u32> {
        self.is_system_pvd(id).then(|| id.0 - PVD_FIRST.0)
    }

    /// Fixed location of a system drive: port 0, enclosure 0, its slot
    pub fn system_drive_location(&self, id: ObjectId) -> Option<DriveLocation> {
        self.system_drive_slot(id).map(|slot| DriveLocation::new(0, 0, slot))
    }

    pub fn system_pvd_ids(&self) -> impl Iterator<Item = ObjectId> {
        (PVD_FIRST.0..=PVD_LAST.0).map(ObjectId)
    }
}
