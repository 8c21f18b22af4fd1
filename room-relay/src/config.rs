use anyhow::{Result, ensure};
use clap::ValueEnum;

pub const DEFAULT_INBOUND_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_FORWARD_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// What the hub does when a member's outbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DeliveryPolicy {
    /// Wait for room in the outbox. A stalled peer stalls the whole room.
    #[default]
    Block,
    /// Drop the message for that member only and keep going.
    DropNewest,
}

/// Tunables shared by every room of a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Transport-level read buffer per connection, in bytes.
    pub inbound_buffer_size: usize,
    /// Messages a peer may have pending before delivery to it backs up.
    pub outbound_queue_capacity: usize,
    /// Forwarded messages a hub buffers ahead of its control loop.
    pub forward_queue_capacity: usize,
    /// Largest message accepted from a client, in bytes.
    pub max_message_size: usize,
    pub delivery_policy: DeliveryPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            inbound_buffer_size: DEFAULT_INBOUND_BUFFER_SIZE,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            forward_queue_capacity: DEFAULT_FORWARD_QUEUE_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            delivery_policy: DeliveryPolicy::default(),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.inbound_buffer_size > 0,
            "inbound buffer size must be positive"
        );
        // tokio channels panic on a zero capacity.
        ensure!(
            self.outbound_queue_capacity > 0,
            "outbound queue capacity must be positive"
        );
        ensure!(
            self.forward_queue_capacity > 0,
            "forward queue capacity must be positive"
        );
        ensure!(
            self.max_message_size > 0,
            "max message size must be positive"
        );
        Ok(())
    }
}
