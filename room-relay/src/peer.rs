use std::sync::Arc;

use bytes::Bytes;
use tokio::{
    select,
    sync::{mpsc, oneshot, watch},
};
use tracing::{debug, warn};

use crate::{
    hub::{HubHandle, Member, PeerId},
    transport::{MessageReader, MessageWriter, Transport},
};

/// States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PeerState {
    Unregistered,
    Registered,
    Closing,
    Closed,
}

#[derive(Clone)]
struct StateCell(Arc<watch::Sender<PeerState>>);

impl StateCell {
    fn new() -> Self {
        let (tx, _) = watch::channel(PeerState::Unregistered);
        Self(Arc::new(tx))
    }

    fn advance(&self, next: PeerState) {
        self.0.send_if_modified(|state| {
            if *state < next {
                *state = next;
                true
            } else {
                false
            }
        });
    }
}

pub struct Peer<T: Transport> {
    id: PeerId,
    transport: T,
    member: Member,
    outbox: mpsc::Receiver<Bytes>,
    hub: HubHandle,
    state: StateCell,
}

impl<T: Transport> Peer<T> {
    pub fn new(transport: T, hub: HubHandle, outbox_capacity: usize) -> Self {
        let id = PeerId::next();
        let (outbox_tx, outbox) = mpsc::channel(outbox_capacity.max(1));
        Self {
            id,
            transport,
            member: Member::new(id, outbox_tx),
            outbox,
            hub,
            state: StateCell::new(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn room(&self) -> &str {
        self.hub.room()
    }

    pub fn watch_state(&self) -> watch::Receiver<PeerState> {
        self.state.0.subscribe()
    }

    pub(crate) async fn register(self) -> (InboundPump<T::Reader>, OutboundPump<T::Writer>) {
        let Peer {
            id,
            transport,
            member,
            outbox,
            hub,
            state,
        } = self;

        // A refused member is already dropped, so its outbox is closed and
        // both pumps wind down straight away.
        if hub.join(member).await {
            state.advance(PeerState::Registered);
        } else {
            warn!(room = hub.room(), peer = %id, "join refused by hub");
        }

        let (reader, writer) = transport.split();
        let (done_tx, done_rx) = oneshot::channel();

        let inbound = InboundPump {
            id,
            reader,
            hub,
            outbound_done: done_rx,
            state: state.clone(),
        };
        let outbound = OutboundPump {
            id,
            writer,
            outbox,
            _done: done_tx,
            state,
        };
        (inbound, outbound)
    }
}

pub(crate) struct InboundPump<R> {
    id: PeerId,
    reader: R,
    hub: HubHandle,
    outbound_done: oneshot::Receiver<()>,
    state: StateCell,
}

impl<R: MessageReader> InboundPump<R> {
    pub(crate) async fn run(self) {
        let InboundPump {
            id,
            mut reader,
            hub,
            mut outbound_done,
            state,
        } = self;

        loop {
            select! {
                read = reader.read_message() => match read {
                    Ok(Some(message)) => hub.forward(message).await,
                    Ok(None) => {
                        debug!(room = hub.room(), peer = %id, "stream closed by remote");
                        break;
                    }
                    Err(err) => {
                        debug!(room = hub.room(), peer = %id, error = ?err, "read failed");
                        break;
                    }
                },
                _ = &mut outbound_done => {
                    debug!(room = hub.room(), peer = %id, "outbound pump stopped");
                    break;
                }
            }
        }

        state.advance(PeerState::Closing);
        hub.leave(id);
    }
}

pub(crate) struct OutboundPump<W> {
    id: PeerId,
    writer: W,
    outbox: mpsc::Receiver<Bytes>,
    // Dropped on exit, which wakes the inbound pump.
    _done: oneshot::Sender<()>,
    state: StateCell,
}

impl<W: MessageWriter> OutboundPump<W> {
    pub(crate) async fn run(mut self) {
        while let Some(message) = self.outbox.recv().await {
            if let Err(err) = self.writer.write_message(message).await {
                debug!(peer = %self.id, error = ?err, "write failed");
                break;
            }
        }

        self.state.advance(PeerState::Closing);
        self.writer.close().await;
        self.state.advance(PeerState::Closed);
    }
}
