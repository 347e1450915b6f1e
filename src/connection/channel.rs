//! Duplex byte channel abstraction.
//!
//! A `ConnectionHandle` owns exactly one channel. TCP streams get their
//! kernel buffer sizes bounded by the max message size; in-memory streams
//! have nothing to configure.

use socket2::SockRef;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

/// An accepted duplex stream that a connection can take ownership of.
pub trait ByteChannel: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Apply per-connection options before the first read is armed.
    fn configure(&self, _max_message_size: usize) -> io::Result<()> {
        Ok(())
    }

    /// Remote address, when the channel has one.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl ByteChannel for TcpStream {
    fn configure(&self, max_message_size: usize) -> io::Result<()> {
        let socket = SockRef::from(self);
        socket.set_recv_buffer_size(max_message_size)?;
        socket.set_send_buffer_size(max_message_size)?;
        Ok(())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }
}

impl ByteChannel for DuplexStream {}
