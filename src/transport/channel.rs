//! Channel-backed transport with a pending-request table

use super::packet::{Packet, Payload, Reply, Target};
use super::{GraphTransport, PacketHandlerRef};
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Transport whose far end is a dispatcher task feeding a [`PacketHandler`](super::PacketHandler)
pub struct ChannelTransport {
    tx: mpsc::Sender<Packet>,
    pending: Arc<DashMap<u64, oneshot::Sender<Reply>>>,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl ChannelTransport {
    /// Start the dispatcher and return the client half
    pub fn spawn(
        handler: PacketHandlerRef,
        config: &TransportConfig,
        cancel: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.channel_depth);
        let pending = Arc::new(DashMap::new());

        let transport = Arc::new(Self {
            tx,
            pending: Arc::clone(&pending),
            next_id: AtomicU64::new(1),
            request_timeout: config.request_timeout(),
        });

        let dispatcher = tokio::spawn(dispatch_loop(rx, handler, pending, cancel));
        (transport, dispatcher)
    }
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<Packet>,
    handler: PacketHandlerRef,
    pending: Arc<DashMap<u64, oneshot::Sender<Reply>>>,
    cancel: CancellationToken,
) {
    loop {
        let packet = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Transport dispatcher cancelled");
                break;
            }
            packet = rx.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };

        let handler = Arc::clone(&handler);
        let pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let id = packet.id;
            let reply = handler.handle(packet).await;
            match pending.remove(&id) {
                Some((_, reply_tx)) => {
                    if reply_tx.send(reply).is_err() {
                        trace!("Requester for packet {} went away", id);
                    }
                }
                None => trace!("Late reply for packet {} dropped", id),
            }
        });
    }
}

#[async_trait]
impl GraphTransport for ChannelTransport {
    async fn request(&self, target: Target, payload: Payload) -> Result<Reply> {
        let opcode = payload.opcode();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(id, reply_tx);

        trace!(packet = id, %target, opcode, "Sending packet");
        if self.tx.send(Packet { id, target, payload }).await.is_err() {
            self.pending.remove(&id);
            return Err(Error::TransportClosed);
        }

        match timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::TransportClosed),
            Err(_) => {
                self.pending.remove(&id);
                warn!(packet = id, %target, opcode, "Packet timed out");
                Err(Error::RequestTimeout {
                    opcode: opcode.to_string(),
                    after: self.request_timeout,
                })
            }
        }
    }

    fn in_flight(&self) -> usize {
        self.pending.len()
    }
}
