//! Connection identity, lifecycle state, and counters.

use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Identifier assigned by the acceptor. Immutable for the handle's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<usize> for ConnectionId {
    fn from(id: usize) -> Self {
        ConnectionId(id)
    }
}

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    /// A read is armed (or about to be re-armed).
    Open = 0,
    /// Terminal. No further reads or writes are attempted.
    Closed = 1,
}

/// Atomic cell holding a `ConnState`.
///
/// The only transition is `Open -> Closed`, so every caller that observes
/// `Closed` sees it forever after.
#[derive(Debug)]
pub(crate) struct AtomicConnState(AtomicU8);

impl AtomicConnState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ConnState::Open as u8))
    }

    pub(crate) fn load(&self) -> ConnState {
        match self.0.load(Ordering::Acquire) {
            0 => ConnState::Open,
            _ => ConnState::Closed,
        }
    }

    /// Move to `Closed`. Returns true only for the call that performed the transition.
    pub(crate) fn close(&self) -> bool {
        self.0
            .compare_exchange(
                ConnState::Open as u8,
                ConnState::Closed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Why a connection reached the closed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer shut down its side (zero-length read).
    PeerClosed,
    /// Closed locally via `ConnectionHandle::close`.
    LocalClose,
    /// A read failed.
    Fault(io::ErrorKind),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::PeerClosed => write!(f, "peer closed"),
            DisconnectReason::LocalClose => write!(f, "closed locally"),
            DisconnectReason::Fault(kind) => write!(f, "read fault ({kind})"),
        }
    }
}

/// Point-in-time copy of a connection's traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub bytes_sent: u64,
}

/// Traffic counters updated by the receive loop and the send path.
#[derive(Debug, Default)]
pub(crate) struct ConnectionStats {
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl ConnectionStats {
    pub(crate) fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}
