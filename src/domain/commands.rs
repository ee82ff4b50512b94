//! Typed job requests
//!
//! Every job type carries its own request struct; [`JobCommand`] is the sum
//! type the job service queues and the binary loads from YAML job lists.

use super::ids::{Lba, LunNumber, ObjectId, PoolId, RaidGroupNumber};
use super::job::JobType;
use super::topology::{Placement, PvdConfigType, RaidType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_ready_timeout_ms() -> u64 {
    120_000
}

// =============================================================================
// LUN Requests
// =============================================================================

/// Bind a LUN on a RAID group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LunCreateRequest {
    #[serde(default = "default_raid_type")]
    pub raid_type: RaidType,
    pub raid_group_id: RaidGroupNumber,
    pub lun_number: LunNumber,
    /// Exported capacity in blocks
    pub capacity: Lba,
    #[serde(default)]
    pub placement: Placement,
    /// Caller-supplied RAID group offset; only honored for NDB binds
    #[serde(default)]
    pub addroffset: Lba,
    #[serde(default)]
    pub ndb: bool,
    #[serde(default)]
    pub noinitialverify: bool,
    #[serde(default)]
    pub world_wide_name: String,
    #[serde(default)]
    pub user_defined_name: String,
    #[serde(default)]
    pub bind_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_private: bool,
    #[serde(default)]
    pub is_system_lun: bool,
    #[serde(default)]
    pub export_lun: bool,
    #[serde(default)]
    pub wait_ready: bool,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

fn default_raid_type() -> RaidType {
    RaidType::Unknown
}

impl LunCreateRequest {
    pub fn new(raid_group_id: RaidGroupNumber, lun_number: LunNumber, capacity: Lba) -> Self {
        Self {
            raid_type: RaidType::Unknown,
            raid_group_id,
            lun_number,
            capacity,
            placement: Placement::FirstFit,
            addroffset: 0,
            ndb: false,
            noinitialverify: false,
            world_wide_name: String::new(),
            user_defined_name: String::new(),
            bind_time: None,
            user_private: false,
            is_system_lun: false,
            export_lun: false,
            wait_ready: false,
            ready_timeout_ms: default_ready_timeout_ms(),
        }
    }
}

/// Bind a LUN inside an extent pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtPoolLunCreateRequest {
    pub pool_id: PoolId,
    pub lun_id: u32,
    pub capacity: Lba,
    #[serde(default)]
    pub world_wide_name: String,
    #[serde(default)]
    pub user_defined_name: String,
    #[serde(default)]
    pub wait_ready: bool,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

// =============================================================================
// Destroy Requests
// =============================================================================

/// Destroy a RAID group and, where safe, its virtual drives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidGroupDestroyRequest {
    pub raid_group_id: RaidGroupNumber,
    #[serde(default)]
    pub allow_destroy_broken_rg: bool,
    #[serde(default)]
    pub wait_destroy: bool,
    #[serde(default = "default_ready_timeout_ms")]
    pub destroy_timeout_ms: u64,
}

impl RaidGroupDestroyRequest {
    pub fn new(raid_group_id: RaidGroupNumber) -> Self {
        Self {
            raid_group_id,
            allow_destroy_broken_rg: false,
            wait_destroy: false,
            destroy_timeout_ms: default_ready_timeout_ms(),
        }
    }
}

/// Destroy an unconsumed provision drive object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionDriveDestroyRequest {
    pub object_id: ObjectId,
    #[serde(default)]
    pub wait_destroy: bool,
    #[serde(default = "default_ready_timeout_ms")]
    pub destroy_timeout_ms: u64,
}

// =============================================================================
// Provision Drive Requests
// =============================================================================

/// Re-bind a provision drive to the physical drive now sitting in its slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionDriveReinitRequest {
    pub object_id: ObjectId,
    /// Serial number of the newly inserted drive
    pub serial_number: String,
    pub configured_capacity: Lba,
    pub configured_block_size: u32,
}

/// Change the configured block size of an unconsumed provision drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBlockSizeRequest {
    pub object_id: ObjectId,
    pub block_size: u32,
}

/// Single-attribute update of a provision drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PvdUpdate {
    ConfigType(PvdConfigType),
    SniffVerify(bool),
    PoolId(PoolId),
    SerialNumber(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProvisionDriveRequest {
    pub object_id: ObjectId,
    pub update: PvdUpdate,
}

// =============================================================================
// Job Command
// =============================================================================

/// A queued job request, keyed by job type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobCommand {
    LunCreate(LunCreateRequest),
    ExtPoolLunCreate(ExtPoolLunCreateRequest),
    RaidGroupDestroy(RaidGroupDestroyRequest),
    ProvisionDriveDestroy(ProvisionDriveDestroyRequest),
    ProvisionDriveReinitialize(ProvisionDriveReinitRequest),
    UpdateProvisionDriveBlockSize(UpdateBlockSizeRequest),
    UpdateProvisionDrive(UpdateProvisionDriveRequest),
}

impl JobCommand {
    pub fn job_type(&self) -> JobType {
        match self {
            JobCommand::LunCreate(_) => JobType::LunCreate,
            JobCommand::ExtPoolLunCreate(_) => JobType::ExtPoolLunCreate,
            JobCommand::RaidGroupDestroy(_) => JobType::RaidGroupDestroy,
            JobCommand::ProvisionDriveDestroy(_) => JobType::ProvisionDriveDestroy,
            JobCommand::ProvisionDriveReinitialize(_) => JobType::ProvisionDriveReinitialize,
            JobCommand::UpdateProvisionDriveBlockSize(_) => JobType::UpdateProvisionDriveBlockSize,
            JobCommand::UpdateProvisionDrive(_) => JobType::UpdateProvisionDrive,
        }
    }

    /// Parse a YAML list of job commands
    pub fn list_from_yaml(source: &str) -> crate::Result<Vec<JobCommand>> {
        Ok(serde_yaml::from_str(source)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_list_from_yaml() {
        let yaml = r#"
- type: lun_create
  raid_group_id: 5
  lun_number: 12
  capacity: 4096
  wait_ready: true
- type: raid_group_destroy
  raid_group_id: 5
- type: update_provision_drive
  object_id: 261
  update:
    kind: config_type
    value: unconsumed
"#;
        let jobs = JobCommand::list_from_yaml(yaml).unwrap();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].job_type(), JobType::LunCreate);
        match &jobs[0] {
            JobCommand::LunCreate(req) => {
                assert_eq!(req.capacity, 0x1000);
                assert!(req.wait_ready);
                assert!(!req.ndb);
                assert_eq!(req.placement, Placement::FirstFit);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(
            jobs[2],
            JobCommand::UpdateProvisionDrive(UpdateProvisionDriveRequest {
                object_id: ObjectId(261),
                update: PvdUpdate::ConfigType(PvdConfigType::Unconsumed),
            })
        );
    }

    #[test]
    fn test_unknown_job_type_rejected() {
        let yaml = "- type: format_array\n  force: true\n";
        assert!(JobCommand::list_from_yaml(yaml).is_err());
    }
}
