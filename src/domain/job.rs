//! Job queue element and the phase/state vocabulary of the job pipeline

use super::commands::JobCommand;
use super::ids::{JobNumber, ObjectId};
use crate::error::{Error, JobErrorCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Kind of structural change a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    LunCreate,
    ExtPoolLunCreate,
    RaidGroupDestroy,
    ProvisionDriveDestroy,
    ProvisionDriveReinitialize,
    UpdateProvisionDriveBlockSize,
    UpdateProvisionDrive,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::LunCreate => "lun_create",
            JobType::ExtPoolLunCreate => "ext_pool_lun_create",
            JobType::RaidGroupDestroy => "raid_group_destroy",
            JobType::ProvisionDriveDestroy => "provision_drive_destroy",
            JobType::ProvisionDriveReinitialize => "provision_drive_reinitialize",
            JobType::UpdateProvisionDriveBlockSize => "update_provision_drive_block_size",
            JobType::UpdateProvisionDrive => "update_provision_drive",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of the job pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobActionState {
    Init,
    Validate,
    UpdateInMemory,
    Persist,
    Rollback,
    Commit,
    Done,
}

impl JobActionState {
    /// Phases after which the job may hold an open transaction
    pub fn may_hold_transaction(&self) -> bool {
        matches!(self, JobActionState::UpdateInMemory | JobActionState::Persist)
    }
}

impl fmt::Display for JobActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobActionState::Init => "init",
            JobActionState::Validate => "validate",
            JobActionState::UpdateInMemory => "update_in_memory",
            JobActionState::Persist => "persist",
            JobActionState::Rollback => "rollback",
            JobActionState::Commit => "commit",
            JobActionState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Final status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Ok,
    Failure,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Ok => write!(f, "ok"),
            JobStatus::Failure => write!(f, "failure"),
        }
    }
}

/// One job as it travels through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobQueueElement {
    pub job_number: JobNumber,
    pub job_type: JobType,
    pub status: JobStatus,
    pub error_code: JobErrorCode,
    pub previous_state: JobActionState,
    pub current_state: JobActionState,
    /// Object the job produced or acted on
    pub object_id: ObjectId,
    pub need_to_wait: bool,
    pub timeout_ms: u64,
    pub command: JobCommand,
    pub queued_at: DateTime<Utc>,
    /// Description of the failure, if any
    pub failure: Option<String>,
}

impl JobQueueElement {
    pub fn new(job_number: JobNumber, command: JobCommand) -> Self {
        let (need_to_wait, timeout_ms) = match &command {
            JobCommand::LunCreate(req) => (req.wait_ready, req.ready_timeout_ms),
            JobCommand::ExtPoolLunCreate(req) => (req.wait_ready, req.ready_timeout_ms),
            JobCommand::RaidGroupDestroy(req) => (req.wait_destroy, req.destroy_timeout_ms),
            JobCommand::ProvisionDriveDestroy(req) => (req.wait_destroy, req.destroy_timeout_ms),
            _ => (false, 0),
        };
        Self {
            job_number,
            job_type: command.job_type(),
            status: JobStatus::Pending,
            error_code: JobErrorCode::NoError,
            previous_state: JobActionState::Init,
            current_state: JobActionState::Init,
            object_id: ObjectId::INVALID,
            need_to_wait,
            timeout_ms,
            command,
            queued_at: Utc::now(),
            failure: None,
        }
    }

    /// Advance to the next phase, remembering the one just left
    pub fn enter(&mut self, state: JobActionState) {
        self.previous_state = self.current_state;
        self.current_state = state;
    }

    /// Record a failure of the current phase
    pub fn fail(&mut self, err: &Error) {
        self.status = JobStatus::Failure;
        self.error_code = err.job_error_code();
        self.failure = Some(err.to_string());
    }

    pub fn succeed(&mut self) {
        self.status = JobStatus::Ok;
        self.error_code = JobErrorCode::NoError;
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::commands::RaidGroupDestroyRequest;
    use crate::domain::ids::RaidGroupNumber;

    #[test]
    fn test_enter_tracks_previous_state() {
        let cmd = JobCommand::RaidGroupDestroy(RaidGroupDestroyRequest::new(RaidGroupNumber(3)));
        let mut element = JobQueueElement::new(JobNumber(1), cmd);
        assert_eq!(element.job_type, JobType::RaidGroupDestroy);

        element.enter(JobActionState::Validate);
        element.enter(JobActionState::UpdateInMemory);
        element.enter(JobActionState::Rollback);
        assert_eq!(element.previous_state, JobActionState::UpdateInMemory);
        assert!(element.previous_state.may_hold_transaction());
    }

    #[test]
    fn test_fail_records_code() {
        let cmd = JobCommand::RaidGroupDestroy(RaidGroupDestroyRequest::new(RaidGroupNumber(3)));
        let mut element = JobQueueElement::new(JobNumber(2), cmd);
        element.fail(&Error::DoubleDegraded);
        assert_eq!(element.status, JobStatus::Failure);
        assert_eq!(element.error_code, JobErrorCode::DbDriveDoubleDegraded);
        assert!(element.failure.is_some());
    }
}
