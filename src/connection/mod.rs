//! Per-connection I/O engine.
//!
//! A `ConnectionHandle` owns one accepted channel and drives two tasks:
//!
//! - **Receive loop**: owns the read half and the `FrameBuffer`. Each read
//!   completion is copied out into an owned `Bytes` and queued, then the
//!   next read is armed immediately. A zero-length read, a read fault, or a
//!   local `close()` ends the loop.
//! - **Dispatch loop**: drains the queue and calls the `MessageSink` in
//!   arrival order. The disconnect notification is queued last, so it is
//!   always the final callback for the connection.
//!
//! Sends go straight to the write half under an async mutex and never
//! change connection state. Disconnect detection belongs to the receive loop.
//! Once the connection closes, a send still blocked on the channel is
//! abandoned so the disconnect path can shut the write half down.

mod buffer;
mod channel;
mod sink;
mod state;

pub use buffer::FrameBuffer;
pub use channel::ByteChannel;
pub use sink::MessageSink;
pub use state::{ConnState, ConnectionId, DisconnectReason, StatsSnapshot};

use crate::error::ConnectionError;
use bytes::Bytes;
use state::{AtomicConnState, ConnectionStats};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Default bound on messages copied out but not yet dispatched.
pub const DEFAULT_PENDING_MESSAGES: usize = 1024;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Per-connection tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Receive buffer capacity; also bounds the kernel send/receive buffers.
    pub max_message_size: usize,
    /// Messages that may wait for the sink before the receive loop pauses.
    pub pending_messages: usize,
}

impl ConnectionOptions {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            pending_messages: DEFAULT_PENDING_MESSAGES,
        }
    }

    pub fn with_pending_messages(mut self, pending_messages: usize) -> Self {
        self.pending_messages = pending_messages;
        self
    }
}

/// Event passed from the receive loop to the dispatch loop.
enum Inbound {
    Message(Bytes),
    Closed(DisconnectReason),
}

struct Inner {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    max_message_size: usize,
    state: AtomicConnState,
    /// Set exactly once, by whoever delivers the disconnect notification.
    disconnect: OnceLock<DisconnectReason>,
    /// `None` once the channel has been shut down.
    writer: Mutex<Option<BoxedWriter>>,
    /// Cancelled on close; aborts the armed read and any in-flight send.
    closing: CancellationToken,
    stats: ConnectionStats,
}

/// Handle to one live connection. Clones refer to the same connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl ConnectionHandle {
    /// Take ownership of `channel` and arm the first read.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open<C: ByteChannel>(
        id: ConnectionId,
        channel: C,
        sink: Arc<dyn MessageSink>,
        max_message_size: usize,
    ) -> Result<Self, ConnectionError> {
        Self::open_with(id, channel, sink, ConnectionOptions::new(max_message_size))
    }

    /// Like [`ConnectionHandle::open`] with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidBufferSize`] for a zero max message
    /// size and [`ConnectionError::Configure`] if the channel rejects its
    /// socket options. No tasks are started in either case.
    pub fn open_with<C: ByteChannel>(
        id: ConnectionId,
        channel: C,
        sink: Arc<dyn MessageSink>,
        options: ConnectionOptions,
    ) -> Result<Self, ConnectionError> {
        let peer_addr = channel.peer_addr();

        if options.max_message_size == 0 {
            warn!(conn_id = %id, peer = ?peer_addr, "Rejecting connection with zero buffer size");
            return Err(ConnectionError::InvalidBufferSize(options.max_message_size));
        }

        if let Err(e) = channel.configure(options.max_message_size) {
            warn!(conn_id = %id, peer = ?peer_addr, error = %e, "Failed to configure channel");
            return Err(ConnectionError::Configure(e));
        }

        let (reader, writer) = tokio::io::split(channel);
        let handle = ConnectionHandle {
            inner: Arc::new(Inner {
                id,
                peer_addr,
                max_message_size: options.max_message_size,
                state: AtomicConnState::new(),
                disconnect: OnceLock::new(),
                writer: Mutex::new(Some(Box::new(writer))),
                closing: CancellationToken::new(),
                stats: ConnectionStats::default(),
            }),
        };

        let (queue_tx, queue_rx) = mpsc::channel(options.pending_messages.max(1));
        let buffer = FrameBuffer::new(options.max_message_size);

        tokio::spawn(dispatch_loop(handle.clone(), sink, queue_rx));
        tokio::spawn(receive_loop(handle.clone(), reader, buffer, queue_tx));

        debug!(
            conn_id = %id,
            peer = ?peer_addr,
            max_message_size = options.max_message_size,
            "Connection opened"
        );

        Ok(handle)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    pub fn max_message_size(&self) -> usize {
        self.inner.max_message_size
    }

    pub fn state(&self) -> ConnState {
        self.inner.state.load()
    }

    /// True until the receive loop observes closure or `close()` is called.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnState::Open
    }

    /// Why the connection closed, once the disconnect notification has been issued.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.inner.disconnect.get().copied()
    }

    /// True when both handles refer to the same connection.
    pub fn same_as(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Write `message` and flush. Fire-and-forget.
    ///
    /// Does nothing when the connection is closed. Write faults are logged
    /// and dropped; the receive loop reports the broken connection.
    pub async fn send(&self, message: &[u8]) {
        match self.try_send(message).await {
            Ok(()) => {}
            Err(e) if e.is_closed() => {}
            Err(e) => {
                warn!(conn_id = %self.id(), bytes = message.len(), error = %e, "Send failed");
            }
        }
    }

    /// Write `message` and flush, reporting the outcome.
    ///
    /// A failed write does not close the connection. A send still waiting
    /// on the channel when the connection closes is abandoned.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Closed`] if the connection is not open, or
    /// [`ConnectionError::Io`] if the write or flush fails.
    pub async fn try_send(&self, message: &[u8]) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::Closed);
        }

        let write = async {
            let mut guard = self.inner.writer.lock().await;
            let writer = guard.as_mut().ok_or(ConnectionError::Closed)?;
            writer.write_all(message).await.map_err(ConnectionError::Io)?;
            writer.flush().await.map_err(ConnectionError::Io)
        };

        // Dropping the write future releases the writer for the disconnect path
        tokio::select! {
            result = write => result?,
            _ = self.inner.closing.cancelled() => return Err(ConnectionError::Closed),
        }

        self.inner.stats.record_sent(message.len());
        trace!(conn_id = %self.id(), bytes = message.len(), "Sent message");
        Ok(())
    }

    /// Close the connection locally. Safe to call any number of times.
    ///
    /// The receive loop stops without re-arming and the sink gets its single
    /// `on_disconnect` after any messages already queued.
    pub fn close(&self) {
        if self.inner.state.close() {
            debug!(conn_id = %self.id(), "Closing connection");
        }
        self.inner.closing.cancel();
    }

    /// Shut down and drop the write half. Idempotent.
    async fn close_channel(&self) {
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                trace!(conn_id = %self.id(), error = %e, "Shutdown after close failed");
            }
        }
    }

    /// Single disconnect path: close the channel, then notify the sink once.
    async fn notify_disconnect(&self, reason: DisconnectReason, sink: &Arc<dyn MessageSink>) {
        if self.inner.disconnect.set(reason).is_err() {
            return;
        }

        self.inner.state.close();
        self.inner.closing.cancel();
        self.close_channel().await;

        let stats = self.stats();
        debug!(
            conn_id = %self.id(),
            peer = ?self.peer_addr(),
            reason = %reason,
            messages_received = stats.messages_received,
            messages_sent = stats.messages_sent,
            "Connection closed"
        );

        let sink = Arc::clone(sink);
        let conn = self.clone();
        if let Err(e) = tokio::spawn(async move { sink.on_disconnect(&conn).await }).await {
            error!(conn_id = %self.id(), error = %e, "Disconnect handler panicked");
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

async fn receive_loop<R>(
    handle: ConnectionHandle,
    mut reader: R,
    mut buffer: FrameBuffer,
    queue: mpsc::Sender<Inbound>,
) where
    R: AsyncRead + Unpin,
{
    let inner = &handle.inner;

    let reason = loop {
        let completion = tokio::select! {
            result = reader.read(buffer.as_mut_slice()) => result,
            _ = inner.closing.cancelled() => break DisconnectReason::LocalClose,
        };

        if !handle.is_connected() {
            break DisconnectReason::LocalClose;
        }

        match completion {
            Ok(0) => break DisconnectReason::PeerClosed,
            Ok(n) => {
                // Copy out before the buffer is offered to the next read
                let message = buffer.copy_out(n);
                inner.stats.record_received(n);
                trace!(conn_id = %inner.id, bytes = n, "Received message");

                let queued = tokio::select! {
                    sent = queue.send(Inbound::Message(message)) => sent.is_ok(),
                    _ = inner.closing.cancelled() => false,
                };
                if !queued {
                    break DisconnectReason::LocalClose;
                }
            }
            Err(e) => {
                debug!(conn_id = %inner.id, error = %e, "Read failed");
                break DisconnectReason::Fault(e.kind());
            }
        }
    };

    // Closed from here on; abandon sends still waiting on the channel
    inner.state.close();
    inner.closing.cancel();
    drop(reader);

    // The dispatch loop holds the receiver until it has handled this event
    if queue.send(Inbound::Closed(reason)).await.is_err() {
        trace!(conn_id = %inner.id, reason = %reason, "Dispatch loop already stopped");
    }
}

async fn dispatch_loop(
    handle: ConnectionHandle,
    sink: Arc<dyn MessageSink>,
    mut queue: mpsc::Receiver<Inbound>,
) {
    while let Some(event) = queue.recv().await {
        match event {
            Inbound::Message(message) => {
                let sink = Arc::clone(&sink);
                let conn = handle.clone();
                let delivered =
                    tokio::spawn(async move { sink.on_message(&conn, message).await }).await;
                if let Err(e) = delivered {
                    error!(conn_id = %handle.id(), error = %e, "Message handler panicked");
                }
            }
            Inbound::Closed(reason) => {
                handle.notify_disconnect(reason, &sink).await;
                return;
            }
        }
    }

    // Receive loop ended without reporting a reason
    handle
        .notify_disconnect(DisconnectReason::LocalClose, &sink)
        .await;
}
