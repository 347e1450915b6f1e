//! Fixed-capacity receive buffer.
//!
//! One `FrameBuffer` is allocated per connection and reused by every read.
//! Completed reads are copied out into an owned `Bytes` before the buffer is
//! handed to the next read, so data already delivered to a sink can never be
//! overwritten.

use bytes::Bytes;

/// Reusable receive buffer sized by the configured maximum message length.
pub struct FrameBuffer {
    /// Backing storage. Never reallocated after construction.
    buf: Box<[u8]>,
}

impl FrameBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    /// Capacity in bytes (the full span offered to each read).
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The whole buffer, for arming a read.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Copy the first `len` bytes into an independently owned message.
    ///
    /// # Panics
    /// Panics if `len` exceeds the capacity.
    pub fn copy_out(&self, len: usize) -> Bytes {
        Bytes::copy_from_slice(&self.buf[..len])
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("capacity", &self.capacity())
            .finish()
    }
}
