//! Notification emitter backends
//!
//! Implements the `NotificationSink` port with logging, in-memory,
//! broadcast and composite backends, plus a key manager that forwards key
//! requests as encryption notifications.

use crate::domain::{
    ArrayEvent, KeyManager, KeyNotification, NotificationSink, NotificationSinkRef, ObjectId,
};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Logs every event as JSON
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier {
    info_level: bool,
}

impl LoggingNotifier {
    pub fn info_level() -> Self {
        Self { info_level: true }
    }

    pub fn debug_level() -> Self {
        Self { info_level: false }
    }
}

#[async_trait]
impl NotificationSink for LoggingNotifier {
    async fn publish(&self, object_id: ObjectId, event: ArrayEvent) -> Result<()> {
        let event_type = event.event_type();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        if self.info_level {
            info!(event_type, %object_id, event = %json, "Notification");
        } else {
            debug!(event_type, %object_id, event = %json, "Notification");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Collects events for later inspection
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    events: RwLock<Vec<(ObjectId, ArrayEvent)>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ArrayEvent> {
        self.events.read().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Events paired with the object they were published against
    pub fn published(&self) -> Vec<(ObjectId, ArrayEvent)> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<ArrayEvent> {
        self.events
            .read()
            .iter()
            .filter(|(_, e)| e.event_type() == event_type)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn key_requests(&self) -> Vec<KeyNotification> {
        self.events
            .read()
            .iter()
            .filter_map(|(_, e)| e.as_key().cloned())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotifier {
    async fn publish(&self, object_id: ObjectId, event: ArrayEvent) -> Result<()> {
        self.events.write().push((object_id, event));
        Ok(())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

/// Fans events out to any number of subscribers
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<ArrayEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArrayEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotifier {
    async fn publish(&self, _object_id: ObjectId, event: ArrayEvent) -> Result<()> {
        // no subscribers is not an error
        let _ = self.tx.send(event);
        Ok(())
    }

    fn name(&self) -> &str {
        "broadcast"
    }
}

/// Publishes to several sinks in order
#[derive(Default)]
pub struct CompositeNotifier {
    sinks: Vec<NotificationSinkRef>,
}

impl CompositeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: NotificationSinkRef) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl std::fmt::Debug for CompositeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeNotifier")
            .field("sinks", &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl NotificationSink for CompositeNotifier {
    async fn publish(&self, object_id: ObjectId, event: ArrayEvent) -> Result<()> {
        for sink in &self.sinks {
            sink.publish(object_id, event.clone()).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "composite"
    }
}

/// Key manager that publishes requests as `EncryptionStateChanged` events
pub struct NotifyingKeyManager {
    sink: NotificationSinkRef,
}

impl NotifyingKeyManager {
    pub fn new(sink: NotificationSinkRef) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl KeyManager for NotifyingKeyManager {
    async fn notify(&self, request: KeyNotification) -> Result<()> {
        info!(
            raid_group = %request.raid_group_id,
            position = request.position,
            state = %request.state,
            "Key manager request"
        );
        self.sink
            .publish(
                request.raid_group_id,
                ArrayEvent::EncryptionStateChanged(request),
            )
            .await
    }
}
