//! Domain Ports - boundaries between the orchestrator and its collaborators
//!
//! Notification delivery and key management are owned by other services;
//! these traits are what the job pipeline calls into.

use super::events::{ArrayEvent, KeyNotification};
use super::ids::ObjectId;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// Notification Sink Port
// =============================================================================

/// Port for publishing orchestrator events
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Publish an event against an object
    async fn publish(&self, object_id: ObjectId, event: ArrayEvent) -> Result<()>;

    /// Sink name for logging
    fn name(&self) -> &str;
}

// =============================================================================
// Key Manager Port
// =============================================================================

/// Port for requesting key lifecycle changes on RAID group positions
#[async_trait]
pub trait KeyManager: Send + Sync {
    async fn notify(&self, request: KeyNotification) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type NotificationSinkRef = Arc<dyn NotificationSink>;
pub type KeyManagerRef = Arc<dyn KeyManager>;
