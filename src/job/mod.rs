//! Job pipeline: phase interface, transaction coordination, the runner and
//! the queueing service in front of it

pub mod metrics;
pub mod notify;
pub mod operation;
pub mod retry;
pub mod service;
pub mod state_machine;
pub mod transaction;

pub use metrics::JobMetrics;
pub use notify::{
    BroadcastNotifier, CompositeNotifier, InMemoryNotifier, LoggingNotifier, NotifyingKeyManager,
};
pub use operation::{JobContext, JobOperation};
pub use retry::{retry_bounded, RetryPolicy};
pub use service::{JobRecord, JobService};
pub use state_machine::JobStateMachine;
pub use transaction::{TransactionCoordinator, TransactionHandle, TransactionState};
