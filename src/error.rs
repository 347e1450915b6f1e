//! Error types for connection handling.

use std::io;

/// Errors produced while opening, registering, or writing to a connection.
#[derive(Debug)]
pub enum ConnectionError {
    /// The configured maximum message size is unusable.
    InvalidBufferSize(usize),
    /// Applying socket options to the accepted channel failed.
    Configure(io::Error),
    /// The connection is no longer open.
    Closed,
    /// A write or flush on the channel failed.
    Io(io::Error),
    /// The registry already holds its maximum number of connections.
    RegistryFull(usize),
}

impl ConnectionError {
    /// True when the error means the connection is gone rather than faulted.
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionError::Closed)
    }
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::InvalidBufferSize(size) => {
                write!(f, "Invalid max message size {size}: must be at least 1 byte")
            }
            ConnectionError::Configure(e) => write!(f, "Failed to configure channel: {e}"),
            ConnectionError::Closed => write!(f, "Connection is closed"),
            ConnectionError::Io(e) => write!(f, "Connection I/O error: {e}"),
            ConnectionError::RegistryFull(max) => {
                write!(f, "Connection registry is full ({max} connections)")
            }
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Configure(e) | ConnectionError::Io(e) => Some(e),
            _ => None,
        }
    }
}
