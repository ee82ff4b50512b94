//! Notifications produced by the orchestrator

use super::ids::{EdgeIndex, JobNumber, ObjectId, RaidGroupNumber};
use super::job::{JobStatus, JobType};
use super::topology::{ClassId, ObjectType};
use crate::error::JobErrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal state change of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobNotification {
    pub job_number: JobNumber,
    pub job_type: JobType,
    pub status: JobStatus,
    pub error_code: JobErrorCode,
    pub object_id: ObjectId,
    pub class_id: ClassId,
    pub object_type: ObjectType,
    pub timestamp: DateTime<Utc>,
}

/// Key lifecycle request for one RAID group position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    OldKeyNeedsRemoval,
    NewKeyRequired,
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyState::OldKeyNeedsRemoval => write!(f, "old_key_needs_removal"),
            KeyState::NewKeyRequired => write!(f, "new_key_required"),
        }
    }
}

/// Reason a drive position changes hands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapCommand {
    PermanentSpare,
    ProactiveSpare,
    UserCopy,
}

/// Request to the key manager for one RAID group position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyNotification {
    pub raid_group_id: ObjectId,
    pub control_number: Option<RaidGroupNumber>,
    pub position: EdgeIndex,
    pub state: KeyState,
    pub swap_command: SwapCommand,
}

/// Everything the orchestrator publishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ArrayEvent {
    JobActionStateChanged(JobNotification),
    EncryptionStateChanged(KeyNotification),
}

impl ArrayEvent {
    /// Object the event is published against
    pub fn object_id(&self) -> ObjectId {
        match self {
            ArrayEvent::JobActionStateChanged(n) => n.object_id,
            ArrayEvent::EncryptionStateChanged(n) => n.raid_group_id,
        }
    }

    pub fn job_number(&self) -> Option<JobNumber> {
        match self {
            ArrayEvent::JobActionStateChanged(n) => Some(n.job_number),
            ArrayEvent::EncryptionStateChanged(_) => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ArrayEvent::JobActionStateChanged(_) => "job_action_state_changed",
            ArrayEvent::EncryptionStateChanged(_) => "encryption_state_changed",
        }
    }

    pub fn as_job(&self) -> Option<&JobNotification> {
        match self {
            ArrayEvent::JobActionStateChanged(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<&KeyNotification> {
        match self {
            ArrayEvent::EncryptionStateChanged(n) => Some(n),
            _ => None,
        }
    }
}
