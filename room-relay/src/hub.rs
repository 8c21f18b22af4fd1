use std::{
    collections::HashMap,
    fmt,
    ops::ControlFlow,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use tokio::{
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot, watch,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::config::{DeliveryPolicy, RelayConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// The hub holds the only sender, so dropping a `Member` closes its outbox.
#[derive(Debug)]
pub struct Member {
    id: PeerId,
    outbox: mpsc::Sender<Bytes>,
}

impl Member {
    pub fn new(id: PeerId, outbox: mpsc::Sender<Bytes>) -> Self {
        Self { id, outbox }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }
}

enum Control {
    Join(Member, oneshot::Sender<bool>),
    Leave(PeerId),
    Members(oneshot::Sender<Vec<PeerId>>),
}

/// Requests submitted after the hub stopped are dropped.
#[derive(Clone)]
pub struct HubHandle {
    room: Arc<str>,
    control: mpsc::UnboundedSender<Control>,
    forward: mpsc::Sender<Bytes>,
    stop: Arc<watch::Sender<bool>>,
}

impl HubHandle {
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Returns `true` once the control loop has registered `member`, or
    /// `false` if the id was already taken or the hub stopped first.
    pub async fn join(&self, member: Member) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.submit(Control::Join(member, ack_tx));
        ack_rx.await.unwrap_or(false)
    }

    pub fn leave(&self, id: PeerId) {
        self.submit(Control::Leave(id));
    }

    /// Suspends while the forward queue is full.
    pub async fn forward(&self, message: Bytes) {
        if self.forward.send(message).await.is_err() {
            debug!(room = %self.room, "hub stopped; dropping forwarded message");
        }
    }

    pub async fn members(&self) -> Vec<PeerId> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(Control::Members(reply_tx));
        reply_rx.await.unwrap_or_default()
    }

    /// Stops the control loop, even mid-delivery to a stalled member, and
    /// closes every remaining outbox.
    pub fn shutdown(&self) {
        self.stop.send_replace(true);
    }

    fn submit(&self, control: Control) {
        if self.control.send(control).is_err() {
            debug!(room = %self.room, "hub stopped; dropping control request");
        }
    }
}

pub struct Hub {
    room: Arc<str>,
    policy: DeliveryPolicy,
    members: HashMap<PeerId, Member>,
    control: mpsc::UnboundedReceiver<Control>,
    forward: mpsc::Receiver<Bytes>,
    stop: watch::Receiver<bool>,
}

impl Hub {
    pub fn new(room: &str, config: &RelayConfig) -> (Self, HubHandle) {
        let room: Arc<str> = Arc::from(room);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (forward_tx, forward_rx) = mpsc::channel(config.forward_queue_capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);

        let hub = Self {
            room: Arc::clone(&room),
            policy: config.delivery_policy,
            members: HashMap::new(),
            control: control_rx,
            forward: forward_rx,
            stop: stop_rx,
        };
        let handle = HubHandle {
            room,
            control: control_tx,
            forward: forward_tx,
            stop: Arc::new(stop_tx),
        };
        (hub, handle)
    }

    pub fn spawn(room: &str, config: &RelayConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(room, config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Runs until [`HubHandle::shutdown`] is called or every handle is gone.
    pub async fn run(mut self) {
        info!(room = %self.room, policy = ?self.policy, "hub started");

        loop {
            select! {
                control = self.control.recv() => match control {
                    Some(control) => self.handle_control(control),
                    None => break,
                },
                Some(message) = self.forward.recv() => {
                    if self.deliver(message).await.is_break() {
                        break;
                    }
                }
                // Fires on shutdown, or with an error once every handle is gone.
                _ = self.stop.changed() => break,
            }
        }

        let remaining = self.members.len();
        // Dropping the members closes their outboxes.
        self.members.clear();
        info!(room = %self.room, remaining, "hub stopped");
    }

    fn handle_control(&mut self, control: Control) {
        match control {
            Control::Join(member, ack) => {
                let _ = ack.send(self.handle_join(member));
            }
            Control::Leave(id) => self.handle_leave(id),
            Control::Members(reply) => {
                let mut ids: Vec<PeerId> = self.members.keys().copied().collect();
                ids.sort_unstable();
                let _ = reply.send(ids);
            }
        }
    }

    fn handle_join(&mut self, member: Member) -> bool {
        let id = member.id();
        if self.members.contains_key(&id) {
            warn!(room = %self.room, peer = %id, "peer already registered; ignoring join");
            return false;
        }
        self.members.insert(id, member);
        debug!(room = %self.room, peer = %id, members = self.members.len(), "peer registered");
        true
    }

    fn handle_leave(&mut self, id: PeerId) {
        if self.members.remove(&id).is_some() {
            debug!(room = %self.room, peer = %id, members = self.members.len(), "peer deregistered");
        }
    }

    async fn deliver(&mut self, message: Bytes) -> ControlFlow<()> {
        for member in self.members.values() {
            match self.policy {
                DeliveryPolicy::Block => select! {
                    sent = member.outbox.send(message.clone()) => {
                        if sent.is_err() {
                            debug!(room = %self.room, peer = %member.id, "outbox closed; skipping");
                        }
                    }
                    _ = self.stop.changed() => {
                        warn!(room = %self.room, peer = %member.id, "hub stopped during delivery");
                        return ControlFlow::Break(());
                    }
                },
                DeliveryPolicy::DropNewest => match member.outbox.try_send(message.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(room = %self.room, peer = %member.id, "outbox full; dropping message");
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(room = %self.room, peer = %member.id, "outbox closed; skipping");
                    }
                },
            }
        }
        ControlFlow::Continue(())
    }
}
