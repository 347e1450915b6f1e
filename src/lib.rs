//! sockline: a per-connection TCP I/O engine.
//!
//! Each accepted socket is owned by a [`ConnectionHandle`] which:
//! - keeps one read armed on a fixed-size receive buffer
//! - copies every completed read out and hands it to a [`MessageSink`]
//! - reports exactly one disconnect when the peer closes, a read fails,
//!   or the handle is closed locally
//! - writes outbound messages on request
//!
//! The [`Server`] accepts TCP connections, assigns identifiers through a
//! [`ConnectionRegistry`], and deregisters handles as they disconnect.

pub mod config;
pub mod connection;
pub mod echo;
pub mod error;
pub mod registry;
pub mod server;

#[cfg(test)]
mod testutil;

pub use connection::{
    ByteChannel, ConnState, ConnectionHandle, ConnectionId, ConnectionOptions, DisconnectReason,
    FrameBuffer, MessageSink, StatsSnapshot,
};
pub use error::ConnectionError;
pub use registry::ConnectionRegistry;
pub use server::Server;
