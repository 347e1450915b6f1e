//! Message sink interface implemented by dispatchers.

use async_trait::async_trait;
use bytes::Bytes;

use super::ConnectionHandle;

/// Receiver of a connection's messages and its disconnect notification.
///
/// For one connection, `on_message` calls are made one at a time in arrival
/// order, and `on_disconnect` is made exactly once after the last of them.
/// The next read may already be in flight while `on_message` runs.
/// Calls for different connections run concurrently, so implementations
/// shared across connections must synchronize their own state.
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    /// One read completion's worth of bytes. `message` is owned and may be retained.
    ///
    /// The bytes are not aligned to any application framing: a message may
    /// hold several application frames or only part of one.
    async fn on_message(&self, conn: &ConnectionHandle, message: Bytes);

    /// The connection has closed. Called once; the handle should be released.
    async fn on_disconnect(&self, conn: &ConnectionHandle);
}
