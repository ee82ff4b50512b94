//! Error types for the storage job orchestrator
//!
//! Provides the crate-wide [`Error`] enum used by the graph client, the
//! transaction coordinator, the job state machine and every operation, plus
//! the user-visible [`JobErrorCode`] that lands in job notifications.

use crate::domain::ids::{JobNumber, ObjectId};
use crate::domain::topology::LifecycleState;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the orchestrator
#[derive(Error, Debug, Clone)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Malformed job request: {0}")]
    MalformedRequest(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation failed ({code}): {reason}")]
    Validation { code: JobErrorCode, reason: String },

    #[error("Unknown {kind} number {number}")]
    UnknownNumber { kind: &'static str, number: u64 },

    #[error("Object {object_id} is not ready: {state}")]
    ObjectNotReady {
        object_id: ObjectId,
        state: LifecycleState,
    },

    #[error("System limit exceeded: {limit} ({current}/{max})")]
    SystemLimitsExceeded {
        limit: &'static str,
        current: u32,
        max: u32,
    },

    #[error("System database RAID group is double degraded")]
    DoubleDegraded,

    #[error("Object {object_id} still has {count} upstream edge(s)")]
    HasUpstreamEdges { object_id: ObjectId, count: usize },

    #[error("Requested capacity {requested:#x} exceeds available {available:#x}")]
    BeyondCapacity { requested: u64, available: u64 },

    #[error("Address offset {offset:#x} cannot hold {requested:#x} blocks")]
    InvalidAddressOffset { offset: u64, requested: u64 },

    #[error("Swap validation failed for {object_id}: {reason}")]
    SwapValidation { object_id: ObjectId, reason: String },

    // =========================================================================
    // Transaction Errors
    // =========================================================================
    #[error("Transaction {operation} failed for job {job_number}: {reason}")]
    Transaction {
        operation: &'static str,
        job_number: JobNumber,
        reason: String,
    },

    // =========================================================================
    // Graph Errors
    // =========================================================================
    #[error("Object {0} does not exist")]
    NoSuchObject(ObjectId),

    #[error("Graph request {opcode} failed: {reason}")]
    RequestFailed { opcode: String, reason: String },

    #[error("Graph request {opcode} refused: target busy")]
    Busy { opcode: String },

    #[error("Unexpected response to {opcode}: {response}")]
    UnexpectedResponse { opcode: String, response: String },

    #[error("{operation} gave up after {attempts} attempt(s)")]
    RetriesExhausted { operation: String, attempts: u32 },

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("Transport closed")]
    TransportClosed,

    #[error("Request {opcode} timed out after {after:?}")]
    RequestTimeout { opcode: String, after: Duration },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Object {object_id} did not reach {expected} within {after:?}")]
    LifecycleTimeout {
        object_id: ObjectId,
        expected: LifecycleState,
        after: Duration,
    },

    #[error("Condition '{what}' not met within {after:?}")]
    WaitTimeout { what: String, after: Duration },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    YamlParse(String),

    #[error("Dump decode error: {0}")]
    DumpDecode(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::YamlParse(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Metrics(err.to_string())
    }
}

/// User-visible outcome carried by every job notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorCode {
    NoError,
    InvalidValue,
    InvalidId,
    UnknownId,
    LunIdInUse,
    SystemLimitsExceeded,
    RaidGroupNotReady,
    DbDriveDoubleDegraded,
    InternalError,
    InvalidCapacity,
    InvalidAddressOffset,
    RequestBeyondCurrentRgCapacity,
    RequestObjectHasUpstreamEdges,
    SwapValidationFail,
    Timeout,
    BadPvdConfiguration,
    PvdIsInEndOfLifeState,
    PvdIsConfiguredAsUnconsumed,
    PvdIsConfiguredAsRaid,
    PvdIsConfiguredAsSpare,
    PvdIsNotConfigured,
    PvdIsInUseForRaidGroup,
    PvdInvalidConfigType,
    PvdIsSystemDrive,
    InvalidBlockSize,
}

impl JobErrorCode {
    pub fn is_error(&self) -> bool {
        !matches!(self, JobErrorCode::NoError)
    }
}

impl std::fmt::Display for JobErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobErrorCode::NoError => "no_error",
            JobErrorCode::InvalidValue => "invalid_value",
            JobErrorCode::InvalidId => "invalid_id",
            JobErrorCode::UnknownId => "unknown_id",
            JobErrorCode::LunIdInUse => "lun_id_in_use",
            JobErrorCode::SystemLimitsExceeded => "system_limits_exceeded",
            JobErrorCode::RaidGroupNotReady => "raid_group_not_ready",
            JobErrorCode::DbDriveDoubleDegraded => "db_drive_double_degraded",
            JobErrorCode::InternalError => "internal_error",
            JobErrorCode::InvalidCapacity => "invalid_capacity",
            JobErrorCode::InvalidAddressOffset => "invalid_address_offset",
            JobErrorCode::RequestBeyondCurrentRgCapacity => "request_beyond_current_rg_capacity",
            JobErrorCode::RequestObjectHasUpstreamEdges => "request_object_has_upstream_edges",
            JobErrorCode::SwapValidationFail => "swap_validation_fail",
            JobErrorCode::Timeout => "timeout",
            JobErrorCode::BadPvdConfiguration => "bad_pvd_configuration",
            JobErrorCode::PvdIsInEndOfLifeState => "pvd_is_in_end_of_life_state",
            JobErrorCode::PvdIsConfiguredAsUnconsumed => "pvd_is_configured_as_unconsumed",
            JobErrorCode::PvdIsConfiguredAsRaid => "pvd_is_configured_as_raid",
            JobErrorCode::PvdIsConfiguredAsSpare => "pvd_is_configured_as_spare",
            JobErrorCode::PvdIsNotConfigured => "pvd_is_not_configured",
            JobErrorCode::PvdIsInUseForRaidGroup => "pvd_is_in_use_for_raid_group",
            JobErrorCode::PvdInvalidConfigType => "pvd_invalid_config_type",
            JobErrorCode::PvdIsSystemDrive => "pvd_is_system_drive",
            JobErrorCode::InvalidBlockSize => "invalid_block_size",
        };
        f.write_str(name)
    }
}

/// Action to take when a graph request fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry under the bounded-retry policy
    Retry,
    /// Retry after a specific duration
    RetryAfter(Duration),
    /// Give up and fail the job
    Fail,
}

impl Error {
    /// Shorthand for a validation failure with an explicit code
    pub fn validation(code: JobErrorCode, reason: impl Into<String>) -> Self {
        Error::Validation {
            code,
            reason: reason.into(),
        }
    }

    /// Map this error onto the code reported to the job submitter
    pub fn job_error_code(&self) -> JobErrorCode {
        match self {
            Error::Validation { code, .. } => *code,
            Error::UnknownNumber { .. } | Error::NoSuchObject(_) => JobErrorCode::UnknownId,
            Error::ObjectNotReady { .. } => JobErrorCode::RaidGroupNotReady,
            Error::SystemLimitsExceeded { .. } => JobErrorCode::SystemLimitsExceeded,
            Error::DoubleDegraded => JobErrorCode::DbDriveDoubleDegraded,
            Error::HasUpstreamEdges { .. } => JobErrorCode::RequestObjectHasUpstreamEdges,
            Error::BeyondCapacity { .. } => JobErrorCode::RequestBeyondCurrentRgCapacity,
            Error::InvalidAddressOffset { .. } => JobErrorCode::InvalidAddressOffset,
            Error::SwapValidation { .. } => JobErrorCode::SwapValidationFail,
            Error::LifecycleTimeout { .. } | Error::WaitTimeout { .. } => JobErrorCode::Timeout,
            Error::MalformedRequest(_)
            | Error::Internal(_)
            | Error::Configuration(_)
            | Error::Transaction { .. }
            | Error::RequestFailed { .. }
            | Error::Busy { .. }
            | Error::UnexpectedResponse { .. }
            | Error::RetriesExhausted { .. }
            | Error::TransportClosed
            | Error::RequestTimeout { .. }
            | Error::YamlParse(_)
            | Error::DumpDecode(_)
            | Error::Metrics(_)
            | Error::Io(_) => JobErrorCode::InternalError,
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            Error::Busy { .. } => ErrorAction::Retry,
            Error::RequestTimeout { after, .. } => ErrorAction::RetryAfter(*after),
            _ => ErrorAction::Fail,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::Fail)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Busy { .. })
    }
}

/// Result type alias for the orchestrator
pub type Result<T> = std::result::Result<T, Error>;
