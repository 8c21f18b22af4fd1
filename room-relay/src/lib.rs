//! Room-based WebSocket broadcast relay.
//!
//! Every message a client sends to a room is relayed, whole and unchanged,
//! to every client currently in that room, the sender included. Each module
//! owns one concern:
//!
//! - [`hub`] runs one control loop per room that owns the member set and
//!   fans forwarded messages out to each member's outbox.
//! - [`peer`] wraps one connection with an inbound and an outbound pump.
//! - [`bootstrap`] turns an upgraded connection into a registered peer.
//! - [`transport`] abstracts the message-framed duplex stream, with an axum
//!   WebSocket implementation and an in-memory double for tests.
//! - [`rooms`] and [`server`] start the hubs and expose them over HTTP.
//! - [`cli`], [`config`] and [`client`] cover the binary: argument parsing,
//!   tunables, and a terminal client for a room.

pub mod bootstrap;
pub mod cli;
pub mod client;
pub mod config;
pub mod hub;
pub mod peer;
pub mod rooms;
pub mod server;
pub mod transport;
