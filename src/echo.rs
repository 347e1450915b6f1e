//! Echo dispatcher.
//!
//! Writes every received message back on the connection it arrived on.
//! Used by the `sockline` binary for throughput and I/O testing.

use crate::connection::{ConnectionHandle, MessageSink};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

/// Sink that echoes each message to its sender.
#[derive(Debug, Default)]
pub struct EchoSink;

#[async_trait]
impl MessageSink for EchoSink {
    async fn on_message(&self, conn: &ConnectionHandle, message: Bytes) {
        trace!(conn_id = %conn.id(), bytes = message.len(), "Echoing message");
        conn.send(&message).await;
    }

    async fn on_disconnect(&self, conn: &ConnectionHandle) {
        debug!(conn_id = %conn.id(), peer = ?conn.peer_addr(), "Client disconnected");
    }
}
