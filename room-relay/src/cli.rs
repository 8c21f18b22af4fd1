use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    DEFAULT_FORWARD_QUEUE_CAPACITY, DEFAULT_INBOUND_BUFFER_SIZE, DEFAULT_MAX_MESSAGE_SIZE,
    DEFAULT_OUTBOUND_QUEUE_CAPACITY, DeliveryPolicy, RelayConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, serving every room over WebSocket.
    Serve(ServeArgs),
    /// Connect to a room and exchange lines from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Room to host, reachable at /room/<name>. Repeat for more rooms.
    #[arg(long = "room", default_value = "room")]
    pub rooms: Vec<String>,

    /// Transport read buffer per connection, in bytes.
    #[arg(long, default_value_t = DEFAULT_INBOUND_BUFFER_SIZE)]
    pub inbound_buffer_size: usize,

    /// Messages queued per peer before delivery to it backs up.
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_QUEUE_CAPACITY)]
    pub outbound_queue_capacity: usize,

    /// Forwarded messages buffered ahead of each room's control loop.
    #[arg(long, default_value_t = DEFAULT_FORWARD_QUEUE_CAPACITY)]
    pub forward_queue_capacity: usize,

    /// Largest accepted message, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,

    /// What to do when a peer's queue is full.
    #[arg(long, value_enum, default_value_t = DeliveryPolicy::Block)]
    pub delivery_policy: DeliveryPolicy,
}

impl ServeArgs {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            inbound_buffer_size: self.inbound_buffer_size,
            outbound_queue_capacity: self.outbound_queue_capacity,
            forward_queue_capacity: self.forward_queue_capacity,
            max_message_size: self.max_message_size,
            delivery_policy: self.delivery_policy,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// WebSocket URL of the room to join.
    #[arg(long, default_value = "ws://127.0.0.1:8080/room/room")]
    pub url: String,
}
