//! Request transport between the orchestrator and the array
//!
//! Phases see one awaited call per request. Underneath, packets travel over a
//! channel to a dispatcher task and the single reply is routed back through a
//! pending-request table.

pub mod channel;
pub mod packet;

pub use channel::ChannelTransport;
pub use packet::*;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Client side: send one packet, suspend until its reply arrives
#[async_trait]
pub trait GraphTransport: Send + Sync {
    async fn request(&self, target: Target, payload: Payload) -> Result<Reply>;

    /// Requests sent but not yet answered
    fn in_flight(&self) -> usize;
}

/// Server side: whatever answers packets (the array, or a simulation of it)
#[async_trait]
pub trait PacketHandler: Send + Sync {
    async fn handle(&self, packet: Packet) -> Reply;
}

pub type GraphTransportRef = Arc<dyn GraphTransport>;
pub type PacketHandlerRef = Arc<dyn PacketHandler>;
