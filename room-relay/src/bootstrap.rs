use std::sync::Arc;

use axum::{extract::ws::WebSocketUpgrade, response::Response};
use tracing::{info, warn};

use crate::{
    config::RelayConfig,
    hub::{HubHandle, PeerId},
    peer::Peer,
    transport::{Transport, WebSocketTransport},
};

/// Socket limits taken from the relay configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketSettings {
    pub read_buffer_size: usize,
    pub max_message_size: usize,
}

impl From<&RelayConfig> for SocketSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            read_buffer_size: config.inbound_buffer_size,
            max_message_size: config.max_message_size,
        }
    }
}

impl SocketSettings {
    pub fn apply<F>(self, ws: WebSocketUpgrade<F>) -> WebSocketUpgrade<F> {
        ws.read_buffer_size(self.read_buffer_size)
            .max_message_size(self.max_message_size)
    }
}

/// Completes the upgrade and serves the resulting socket as a peer of `hub`.
pub fn upgrade(ws: WebSocketUpgrade, hub: HubHandle, config: Arc<RelayConfig>) -> Response {
    let room = hub.room().to_owned();
    SocketSettings::from(config.as_ref())
        .apply(ws)
        .on_failed_upgrade(move |err| {
            warn!(room = %room, error = ?err, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            serve_connection(
                WebSocketTransport::new(socket),
                hub,
                config.outbound_queue_capacity,
            )
            .await;
        })
}

pub async fn serve_connection<T: Transport>(
    transport: T,
    hub: HubHandle,
    outbox_capacity: usize,
) -> PeerId {
    run_peer(Peer::new(transport, hub, outbox_capacity)).await
}

/// The peer's leave has been submitted when this returns.
pub async fn run_peer<T: Transport>(peer: Peer<T>) -> PeerId {
    let id = peer.id();
    let room = peer.room().to_owned();

    let (inbound, outbound) = peer.register().await;
    info!(room = %room, peer = %id, "peer joined");

    tokio::spawn(outbound.run());
    inbound.run().await;

    info!(room = %room, peer = %id, "peer left");
    id
}
