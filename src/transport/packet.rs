//! Packets exchanged with the array: one request payload in, one reply out

use crate::domain::{
    BlockSize, CapacityPlacement, DatabaseStats, DownstreamHealth, DriveLocation, Edge, EdgeFlags,
    EdgeIndex, EncryptionMode, JobNumber, Lba, LifecycleState, LunNumber, ObjectId, PhysicalDriveInfo,
    Placement, PoolId, ProvisionDriveInfo, PvdConfigType, RaidGroupInfo, RaidGroupNumber, ClassId,
    TransactionId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Service a packet is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    /// Configuration database: transactions, persisted objects and edges
    Database,
    /// Topology service: live object queries
    Topology,
    /// Physical drive management
    Physical,
    EventLog,
    /// A specific live object
    Object(ObjectId),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Database => write!(f, "database"),
            Target::Topology => write!(f, "topology"),
            Target::Physical => write!(f, "physical"),
            Target::EventLog => write!(f, "event_log"),
            Target::Object(id) => write!(f, "object {}", id),
        }
    }
}

/// LUN attribute flags persisted with the object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LunConfigFlags(pub u32);

impl LunConfigFlags {
    pub const NONE: LunConfigFlags = LunConfigFlags(0);
    pub const NO_USER_ZERO: LunConfigFlags = LunConfigFlags(0x1);
    pub const NO_INITIAL_VERIFY: LunConfigFlags = LunConfigFlags(0x2);
    pub const EXPORT_LUN: LunConfigFlags = LunConfigFlags(0x4);

    pub fn contains(&self, other: LunConfigFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOrAssign for LunConfigFlags {
    fn bitor_assign(&mut self, rhs: LunConfigFlags) {
        self.0 |= rhs.0;
    }
}

/// Persisted configuration of a RAID-group LUN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LunObjectConfig {
    /// Fixed id for system LUNs; user LUNs get the next free id
    pub object_id: Option<ObjectId>,
    pub lun_number: LunNumber,
    pub exported_capacity: Lba,
    pub imported_capacity: Lba,
    pub config_flags: LunConfigFlags,
    pub world_wide_name: String,
    pub user_defined_name: String,
    pub bind_time: DateTime<Utc>,
    pub user_private: bool,
}

/// Persisted configuration of an extent-pool LUN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtPoolLunObjectConfig {
    pub pool_id: PoolId,
    pub lun_id: u32,
    pub capacity: Lba,
    pub world_wide_name: String,
    pub user_defined_name: String,
}

/// Edge to create in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub server_id: ObjectId,
    pub client_id: ObjectId,
    pub client_index: EdgeIndex,
    pub capacity: Lba,
    pub offset: Lba,
    pub flags: EdgeFlags,
}

/// Persisted provision drive attribute change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PvdConfigUpdate {
    ConfigType(PvdConfigType),
    SniffVerify(bool),
    PoolId(PoolId),
    SerialNumber(String),
    BlockSize(BlockSize),
    /// Re-bind to a new physical drive
    Identity {
        configured_capacity: Lba,
        configured_block_size: BlockSize,
        serial_number: String,
    },
}

/// Chassis-resident record of the system drives
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FruDescriptor {
    pub system_drive_serial_numbers: Vec<String>,
    pub wwn_seed: u32,
    pub chassis_replacement_movement: u32,
}

/// Capacity validation query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityQuery {
    pub requested_capacity: Lba,
    pub placement: Placement,
    pub offset: Lba,
    pub ignore_offset: bool,
}

/// Event log entry written on best-effort paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventLogEntry {
    IncompatibleReplacedSystemDrive { location: DriveLocation },
    SwapRejected { object_id: ObjectId, reason: String },
}

/// Request body; the variant is the opcode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    // -- database --
    TransactionStart { job_number: JobNumber },
    TransactionCommit { txn: TransactionId },
    TransactionAbort { txn: TransactionId },
    CreateLun { txn: TransactionId, config: LunObjectConfig },
    CreateExtPoolLun { txn: TransactionId, config: ExtPoolLunObjectConfig },
    DestroyObject { txn: TransactionId, object_id: ObjectId },
    CreateEdge { txn: TransactionId, edge: EdgeSpec },
    DestroyEdge { txn: TransactionId, client_id: ObjectId, client_index: EdgeIndex },
    UpdateProvisionDrive { txn: TransactionId, object_id: ObjectId, update: PvdConfigUpdate },
    LookupRaidGroup { number: RaidGroupNumber },
    LookupLun { number: LunNumber },
    LookupExtPool { pool_id: PoolId },
    LookupExtPoolLun { pool_id: PoolId, lun_id: u32 },
    LookupProvisionDriveBySerial { serial_number: String },
    LookupRaidGroupNumber { object_id: ObjectId },
    GetDatabaseStats,
    GetEncryptionMode,
    ConnectDrives { object_ids: Vec<ObjectId> },
    GetFruDescriptor,
    SetFruDescriptor { descriptor: FruDescriptor },
    StampFruSignature { location: DriveLocation },
    // -- topology / object --
    GetClass,
    GetLifecycleState,
    GetUpstreamObjects,
    GetDownstreamObjects,
    GetUpstreamEdges,
    GetDownstreamEdges,
    ValidateCapacity(CapacityQuery),
    GetRaidGroupInfo,
    GetDownstreamHealth,
    CanObjectBeRemoved { upstream_id: ObjectId },
    CanPvdGetReinitialized { pvd_id: ObjectId },
    MarkNeedsRebuild { vd_id: Option<ObjectId>, pvd_id: ObjectId },
    GetDrivePositionByServer { server_id: ObjectId },
    GetProvisionDriveInfo,
    // -- physical --
    GetPhysicalDriveByLocation { location: DriveLocation },
    GetPhysicalDriveBySerial { serial_number: String },
    GetPhysicalDriveInfo,
    SetDriveFault,
    // -- event log --
    LogEvent(EventLogEntry),
}

impl Payload {
    pub fn opcode(&self) -> &'static str {
        match self {
            Payload::TransactionStart { .. } => "transaction_start",
            Payload::TransactionCommit { .. } => "transaction_commit",
            Payload::TransactionAbort { .. } => "transaction_abort",
            Payload::CreateLun { .. } => "create_lun",
            Payload::CreateExtPoolLun { .. } => "create_ext_pool_lun",
            Payload::DestroyObject { .. } => "destroy_object",
            Payload::CreateEdge { .. } => "create_edge",
            Payload::DestroyEdge { .. } => "destroy_edge",
            Payload::UpdateProvisionDrive { .. } => "update_provision_drive",
            Payload::LookupRaidGroup { .. } => "lookup_raid_group",
            Payload::LookupLun { .. } => "lookup_lun",
            Payload::LookupExtPool { .. } => "lookup_ext_pool",
            Payload::LookupExtPoolLun { .. } => "lookup_ext_pool_lun",
            Payload::LookupProvisionDriveBySerial { .. } => "lookup_pvd_by_serial",
            Payload::LookupRaidGroupNumber { .. } => "lookup_raid_group_number",
            Payload::GetDatabaseStats => "get_database_stats",
            Payload::GetEncryptionMode => "get_encryption_mode",
            Payload::ConnectDrives { .. } => "connect_drives",
            Payload::GetFruDescriptor => "get_fru_descriptor",
            Payload::SetFruDescriptor { .. } => "set_fru_descriptor",
            Payload::StampFruSignature { .. } => "stamp_fru_signature",
            Payload::GetClass => "get_class",
            Payload::GetLifecycleState => "get_lifecycle_state",
            Payload::GetUpstreamObjects => "get_upstream_objects",
            Payload::GetDownstreamObjects => "get_downstream_objects",
            Payload::GetUpstreamEdges => "get_upstream_edges",
            Payload::GetDownstreamEdges => "get_downstream_edges",
            Payload::ValidateCapacity(_) => "validate_capacity",
            Payload::GetRaidGroupInfo => "get_raid_group_info",
            Payload::GetDownstreamHealth => "get_downstream_health",
            Payload::CanObjectBeRemoved { .. } => "can_object_be_removed",
            Payload::CanPvdGetReinitialized { .. } => "can_pvd_get_reinitialized",
            Payload::MarkNeedsRebuild { .. } => "mark_needs_rebuild",
            Payload::GetDrivePositionByServer { .. } => "get_drive_position_by_server",
            Payload::GetProvisionDriveInfo => "get_provision_drive_info",
            Payload::GetPhysicalDriveByLocation { .. } => "get_physical_drive_by_location",
            Payload::GetPhysicalDriveBySerial { .. } => "get_physical_drive_by_serial",
            Payload::GetPhysicalDriveInfo => "get_physical_drive_info",
            Payload::SetDriveFault => "set_drive_fault",
            Payload::LogEvent(_) => "log_event",
        }
    }
}

/// A request in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u64,
    pub target: Target,
    pub payload: Payload,
}

/// Completion status of a packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketStatus {
    Ok,
    NoObject,
    Busy,
    Failed(String),
}

/// Response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Done,
    Transaction(TransactionId),
    Object(ObjectId),
    MaybeObject(Option<ObjectId>),
    RaidGroupNumber(Option<RaidGroupNumber>),
    Objects(Vec<ObjectId>),
    Edges(Vec<Edge>),
    Class(ClassId),
    Lifecycle(LifecycleState),
    Placement(CapacityPlacement),
    RaidGroup(RaidGroupInfo),
    Health(DownstreamHealth),
    Flag(bool),
    Position(Option<EdgeIndex>),
    Stats(DatabaseStats),
    Encryption(EncryptionMode),
    ProvisionDrive(ProvisionDriveInfo),
    PhysicalDrive(PhysicalDriveInfo),
    Fru(FruDescriptor),
}

/// The single reply to a packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: PacketStatus,
    pub response: Response,
}

impl Reply {
    pub fn ok(response: Response) -> Self {
        Self {
            status: PacketStatus::Ok,
            response,
        }
    }

    pub fn done() -> Self {
        Self::ok(Response::Done)
    }

    pub fn no_object() -> Self {
        Self {
            status: PacketStatus::NoObject,
            response: Response::Done,
        }
    }

    pub fn busy() -> Self {
        Self {
            status: PacketStatus::Busy,
            response: Response::Done,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: PacketStatus::Failed(reason.into()),
            response: Response::Done,
        }
    }
}
