//! Topology vocabulary: object classes, lifecycle states, edges and drive
//! descriptors as seen by the orchestrator.

use super::ids::{EdgeIndex, Lba, ObjectId, PoolId, RaidGroupNumber};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Object Classes
// =============================================================================

/// Concrete class of a topology object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassId {
    Lun,
    ExtentPoolLun,
    ExtentPool,
    Parity,
    Mirror,
    Striper,
    VirtualDrive,
    ProvisionDrive,
    PhysicalDrive,
    Invalid,
}

/// Broad object type used in notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Lun,
    RaidGroup,
    VirtualDrive,
    ProvisionDrive,
    ExtentPool,
    PhysicalDrive,
    Invalid,
}

impl ClassId {
    pub fn object_type(&self) -> ObjectType {
        match self {
            ClassId::Lun | ClassId::ExtentPoolLun => ObjectType::Lun,
            ClassId::ExtentPool => ObjectType::ExtentPool,
            ClassId::Parity | ClassId::Mirror | ClassId::Striper => ObjectType::RaidGroup,
            ClassId::VirtualDrive => ObjectType::VirtualDrive,
            ClassId::ProvisionDrive => ObjectType::ProvisionDrive,
            ClassId::PhysicalDrive => ObjectType::PhysicalDrive,
            ClassId::Invalid => ObjectType::Invalid,
        }
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClassId::Lun => "lun",
            ClassId::ExtentPoolLun => "extent_pool_lun",
            ClassId::ExtentPool => "extent_pool",
            ClassId::Parity => "parity",
            ClassId::Mirror => "mirror",
            ClassId::Striper => "striper",
            ClassId::VirtualDrive => "virtual_drive",
            ClassId::ProvisionDrive => "provision_drive",
            ClassId::PhysicalDrive => "physical_drive",
            ClassId::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// Lifecycle state reported by a live object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Specialize,
    Activate,
    Ready,
    Hibernate,
    Fail,
    Destroy,
    NotExist,
}

impl LifecycleState {
    /// Ready or hibernating objects accept new clients
    pub fn is_usable(&self) -> bool {
        matches!(self, LifecycleState::Ready | LifecycleState::Hibernate)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Specialize => "specialize",
            LifecycleState::Activate => "activate",
            LifecycleState::Ready => "ready",
            LifecycleState::Hibernate => "hibernate",
            LifecycleState::Fail => "fail",
            LifecycleState::Destroy => "destroy",
            LifecycleState::NotExist => "not_exist",
        };
        f.write_str(name)
    }
}

/// RAID type of a RAID group object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaidType {
    Raid0,
    Raid1,
    Raid3,
    Raid5,
    Raid6,
    Raid10,
    /// Internal triple mirror backing the configuration database
    RawMirror,
    Unknown,
}

impl RaidType {
    pub fn class_id(&self) -> ClassId {
        match self {
            RaidType::Raid0 | RaidType::Raid10 => ClassId::Striper,
            RaidType::Raid1 | RaidType::RawMirror => ClassId::Mirror,
            RaidType::Raid3 | RaidType::Raid5 | RaidType::Raid6 => ClassId::Parity,
            RaidType::Unknown => ClassId::Invalid,
        }
    }
}

impl fmt::Display for RaidType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RaidType::Raid0 => "raid0",
            RaidType::Raid1 => "raid1",
            RaidType::Raid3 => "raid3",
            RaidType::Raid5 => "raid5",
            RaidType::Raid6 => "raid6",
            RaidType::Raid10 => "raid10",
            RaidType::RawMirror => "raw_mirror",
            RaidType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Edges
// =============================================================================

/// Edge attribute flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeFlags(pub u32);

impl EdgeFlags {
    pub const NONE: EdgeFlags = EdgeFlags(0);
    pub const NO_INITIAL_VERIFY: EdgeFlags = EdgeFlags(0x1);
    pub const NDB: EdgeFlags = EdgeFlags(0x2);

    pub fn contains(&self, other: EdgeFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for EdgeFlags {
    type Output = EdgeFlags;

    fn bitor(self, rhs: EdgeFlags) -> EdgeFlags {
        EdgeFlags(self.0 | rhs.0)
    }
}

/// Path state of an edge as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathState {
    Enabled,
    Slumber,
    Disabled,
    Broken,
    Invalid,
}

/// A capacity-import relation: `client_id` consumes `capacity` blocks of
/// `server_id` starting at `offset`, attached at `client_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub server_id: ObjectId,
    pub client_id: ObjectId,
    pub client_index: EdgeIndex,
    pub capacity: Lba,
    pub offset: Lba,
    #[serde(default)]
    pub flags: EdgeFlags,
    pub path_state: PathState,
}

/// Aggregate health of an object's downstream edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownstreamHealth {
    Optimal,
    Degraded,
    Disabled,
    Broken,
}

/// Placement policy for capacity validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    #[default]
    FirstFit,
    SpecificLocation,
}

/// Result of a capacity validation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityPlacement {
    pub offset: Lba,
    pub client_index: EdgeIndex,
    pub available_capacity: Lba,
}

// =============================================================================
// Drives
// =============================================================================

/// Media type of a physical drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveType {
    Invalid,
    SasFlashHe,
    SasFlashMe,
    SasFlashLe,
    SasFlashRi,
    SataFlash,
    Sas,
    SasNl,
    Sata,
}

/// Performance tier used by the sparing rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTier {
    Flash,
    Performance,
    Capacity,
    Unknown,
}

impl DriveType {
    pub fn performance_tier(&self) -> PerformanceTier {
        match self {
            DriveType::SasFlashHe
            | DriveType::SasFlashMe
            | DriveType::SasFlashLe
            | DriveType::SasFlashRi
            | DriveType::SataFlash => PerformanceTier::Flash,
            DriveType::Sas => PerformanceTier::Performance,
            DriveType::SasNl | DriveType::Sata => PerformanceTier::Capacity,
            DriveType::Invalid => PerformanceTier::Unknown,
        }
    }
}

/// Configured block size of a provision drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSize {
    Bytes520,
    Bytes4160,
    Invalid,
}

impl BlockSize {
    pub fn from_bytes(bytes: u32) -> Self {
        match bytes {
            520 => BlockSize::Bytes520,
            4160 => BlockSize::Bytes4160,
            _ => BlockSize::Invalid,
        }
    }

    pub fn bytes(&self) -> Option<u32> {
        match self {
            BlockSize::Bytes520 => Some(520),
            BlockSize::Bytes4160 => Some(4160),
            BlockSize::Invalid => None,
        }
    }
}

/// How a provision drive is currently consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PvdConfigType {
    Invalid,
    Unconsumed,
    TestReservedSpare,
    Raid,
    ExtPool,
}

impl fmt::Display for PvdConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PvdConfigType::Invalid => "invalid",
            PvdConfigType::Unconsumed => "unconsumed",
            PvdConfigType::TestReservedSpare => "test_reserved_spare",
            PvdConfigType::Raid => "raid",
            PvdConfigType::ExtPool => "ext_pool",
        };
        f.write_str(name)
    }
}

/// System-wide encryption mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    #[default]
    Unencrypted,
    Encrypted,
}

/// Physical slot address: port, enclosure, slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DriveLocation {
    pub port: u32,
    pub enclosure: u32,
    pub slot: u32,
}

impl DriveLocation {
    pub fn new(port: u32, enclosure: u32, slot: u32) -> Self {
        Self {
            port,
            enclosure,
            slot,
        }
    }
}

impl fmt::Display for DriveLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.port, self.enclosure, self.slot)
    }
}

// =============================================================================
// Object Descriptors
// =============================================================================

/// Geometry and rebuild status of a RAID group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidGroupInfo {
    pub raid_type: RaidType,
    pub width: u32,
    pub exported_capacity: Lba,
    pub lun_align_size: Lba,
    /// One checkpoint per position; anything other than `LBA_INVALID` is rebuilding
    pub rebuild_checkpoints: Vec<Lba>,
    pub raid_group_number: Option<RaidGroupNumber>,
}

impl RaidGroupInfo {
    pub fn rebuilding_positions(&self) -> usize {
        self.rebuild_checkpoints
            .iter()
            .filter(|c| **c != super::ids::LBA_INVALID)
            .count()
    }
}

/// Persisted and live attributes of a provision drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionDriveInfo {
    pub config_type: PvdConfigType,
    pub drive_type: DriveType,
    pub location: DriveLocation,
    pub serial_number: String,
    pub configured_capacity: Lba,
    pub configured_block_size: BlockSize,
    pub exported_offset: Lba,
    pub pool_id: PoolId,
    pub end_of_life: bool,
    pub slf: bool,
    pub sniff_verify: bool,
}

/// Attributes of a discovered physical drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalDriveInfo {
    pub location: DriveLocation,
    pub serial_number: String,
    pub drive_type: DriveType,
    pub gross_capacity: Lba,
    pub block_size: u32,
}

/// Counters kept by the configuration database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub user_luns: u32,
    pub max_user_luns: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_object_types() {
        assert_eq!(RaidType::Raid10.class_id(), ClassId::Striper);
        assert_eq!(RaidType::Raid5.class_id().object_type(), ObjectType::RaidGroup);
        assert_eq!(ClassId::ExtentPoolLun.object_type(), ObjectType::Lun);
    }

    #[test]
    fn test_performance_tiers() {
        assert_eq!(DriveType::SasFlashHe.performance_tier(), PerformanceTier::Flash);
        assert_eq!(DriveType::SasNl.performance_tier(), DriveType::Sata.performance_tier());
        assert_ne!(DriveType::Sas.performance_tier(), DriveType::SasNl.performance_tier());
    }

    #[test]
    fn test_block_size_parse() {
        assert_eq!(BlockSize::from_bytes(520), BlockSize::Bytes520);
        assert_eq!(BlockSize::from_bytes(4160).bytes(), Some(4160));
        assert_eq!(BlockSize::from_bytes(512), BlockSize::Invalid);
    }

    #[test]
    fn test_rebuilding_positions() {
        let info = RaidGroupInfo {
            raid_type: RaidType::RawMirror,
            width: 3,
            exported_capacity: 0x10000,
            lun_align_size: 1,
            rebuild_checkpoints: vec![super::super::ids::LBA_INVALID, 0x100, 0],
            raid_group_number: None,
        };
        assert_eq!(info.rebuilding_positions(), 2);
    }

    #[test]
    fn test_edge_flags() {
        let flags = EdgeFlags::NDB | EdgeFlags::NO_INITIAL_VERIFY;
        assert!(flags.contains(EdgeFlags::NDB));
        assert!(!EdgeFlags::NONE.contains(EdgeFlags::NDB));
        assert_eq!(DriveLocation::new(0, 0, 3).to_string(), "0_0_3");
    }
}
