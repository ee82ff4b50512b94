//! Storage Job Orchestrator - Transactional Array Control Plane
//!
//! Runs configuration-changing jobs against a storage array's object graph
//! (provision drives, virtual drives, RAID groups, LUNs, extent pools). Each
//! job passes through a fixed phase machine and stages its graph mutations
//! in a single database transaction that is committed or aborted as a unit.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              Job Service                                     │
//! │        bounded queue  ·  one worker  ·  completed-record broadcast           │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                           Job State Machine                                  │
//! │   Validate → UpdateInMemory → Persist → Commit      (failure → Rollback)     │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │   Operations    │  │  Transaction    │  │   Notification Emitter      │  │
//! │  │ LUN / RG / PVD  │  │  Coordinator    │  │   (one event per job)       │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────────────────────┘  │
//! │           └────────────────────┼─────────────────────────────────────────── │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │     Graph Client      │                                │
//! │                    └───────────┬───────────┘                                │
//! ├────────────────────────────────┼────────────────────────────────────────────┤
//! │                    ┌───────────┴───────────┐                                │
//! │                    │  Packet Transport     │  request/reply, timeouts       │
//! │                    └───────────┬───────────┘                                │
//! │          database · topology · physical services (or the simulator)         │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`job`]: phase interface, runner, transaction coordinator, queue service
//! - [`ops`]: one algorithm per job type
//! - [`graph`]: typed client over the packet transport
//! - [`transport`]: packet model and the channel transport
//! - [`sparing`]: drive spare selection rules
//! - [`layout`]: fixed private-space layout of system objects
//! - [`sim`]: in-process simulated array
//! - [`dump`]: system dump header codec
//! - [`domain`]: core domain types and ports
//! - [`error`]: error types and job error codes

pub mod config;
pub mod domain;
pub mod dump;
pub mod error;
pub mod graph;
pub mod job;
pub mod layout;
pub mod ops;
pub mod sim;
pub mod sparing;
pub mod transport;

// Re-export commonly used types
pub use config::OrchestratorConfig;

pub use domain::{
    ArrayEvent, JobCommand, JobNotification, JobNumber, JobQueueElement, JobStatus, JobType,
    KeyManager, KeyNotification, NotificationSink, ObjectId,
};

pub use error::{Error, ErrorAction, JobErrorCode, Result};

pub use graph::GraphClient;

pub use job::{
    BroadcastNotifier, CompositeNotifier, InMemoryNotifier, JobMetrics, JobRecord, JobService,
    JobStateMachine, LoggingNotifier, NotifyingKeyManager,
};

pub use ops::JobKind;

pub use sim::SimulatedArray;

pub use transport::ChannelTransport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
