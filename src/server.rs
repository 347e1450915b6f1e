//! TCP server: accepts connections and hands each to a `ConnectionHandle`.
//!
//! The server assigns identifiers through its registry, caps the number of
//! live connections, and removes each handle from the registry when its
//! disconnect notification arrives.

use crate::config::Config;
use crate::connection::{ConnectionHandle, ConnectionId, ConnectionOptions, MessageSink};
use crate::registry::ConnectionRegistry;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Server instance
pub struct Server {
    config: Config,
    registry: Arc<ConnectionRegistry>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));

        Server {
            config,
            registry,
            connection_limit,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.listen).await?;
        info!(address = %self.config.listen, "Server listening");
        Ok(listener)
    }

    /// Bind and accept connections until the listener fails.
    pub async fn run(&self, sink: Arc<dyn MessageSink>) -> io::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, sink).await
    }

    /// Accept connections from `listener`, delivering their traffic to `sink`.
    pub async fn serve(&self, listener: TcpListener, sink: Arc<dyn MessageSink>) -> io::Result<()> {
        let sink: Arc<dyn MessageSink> = Arc::new(Deregister {
            registry: Arc::clone(&self.registry),
            inner: sink,
        });
        let options = ConnectionOptions::new(self.config.max_message_size)
            .with_pending_messages(self.config.pending_messages);

        loop {
            // Wait for a connection slot
            let permit = Arc::clone(&self.connection_limit)
                .acquire_owned()
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

            match listener.accept().await {
                Ok((stream, addr)) => {
                    let opened = self.registry.register_with_permit(permit, |id| {
                        ConnectionHandle::open_with(id, stream, Arc::clone(&sink), options)
                    });
                    match opened {
                        Ok(conn) => debug!(conn_id = %conn.id(), peer = %addr, "New connection"),
                        Err(e) => warn!(peer = %addr, error = %e, "Rejected connection"),
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Send `message` to one connection. Returns false if the id is unknown.
    pub async fn send_to(&self, id: ConnectionId, message: &[u8]) -> bool {
        match self.registry.get(id) {
            Some(conn) => {
                conn.send(message).await;
                true
            }
            None => false,
        }
    }

    /// Send `message` to every registered connection.
    pub async fn broadcast(&self, message: &[u8]) -> usize {
        let handles = self.registry.handles();
        for conn in &handles {
            conn.send(message).await;
        }
        handles.len()
    }

    /// Close every live connection.
    pub fn shutdown(&self) {
        info!(connections = self.registry.len(), "Closing all connections");
        self.registry.close_all();
    }
}

/// Removes a handle from the registry before the wrapped sink sees its disconnect.
struct Deregister {
    registry: Arc<ConnectionRegistry>,
    inner: Arc<dyn MessageSink>,
}

#[async_trait]
impl MessageSink for Deregister {
    async fn on_message(&self, conn: &ConnectionHandle, message: Bytes) {
        self.inner.on_message(conn, message).await;
    }

    async fn on_disconnect(&self, conn: &ConnectionHandle) {
        self.registry.remove(conn);
        self.inner.on_disconnect(conn).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{wait_until, RecordingSink};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_config(max_connections: usize) -> Config {
        Config {
            listen: "127.0.0.1:0".to_string(),
            max_message_size: 64,
            max_connections,
            pending_messages: 16,
            log_level: "info".to_string(),
        }
    }

    async fn start(server: &Arc<Server>, sink: Arc<dyn MessageSink>) -> std::net::SocketAddr {
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::clone(server);
        tokio::spawn(async move { server.serve(listener, sink).await });
        addr
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = Server::new(test_config(8));
        assert!(server.registry().is_empty());
        assert_eq!(server.registry().capacity(), 8);
    }

    #[tokio::test]
    async fn test_disconnect_deregisters() {
        let server = Arc::new(Server::new(test_config(8)));
        let sink = Arc::new(RecordingSink::default());
        let addr = start(&server, sink.clone()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        wait_until(|| server.registry().len() == 1).await;

        client.write_all(b"ping").await.unwrap();
        wait_until(|| sink.messages().concat() == b"ping").await;

        drop(client);
        sink.wait_for_disconnect().await;
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn test_stale_disconnect_keeps_reused_id_registered() {
        let server = Arc::new(Server::new(test_config(8)));
        let sink = Arc::new(RecordingSink::default());
        let addr = start(&server, sink.clone()).await;

        let first_client = TcpStream::connect(addr).await.unwrap();
        wait_until(|| server.registry().len() == 1).await;
        let first = server.registry().handles().pop().unwrap();
        assert!(server.registry().remove(&first));

        let _second_client = TcpStream::connect(addr).await.unwrap();
        wait_until(|| server.registry().len() == 1).await;
        let second = server.registry().handles().pop().unwrap();
        assert_eq!(second.id(), first.id());

        // First connection's disconnect must not evict the second
        drop(first_client);
        sink.wait_for_disconnect().await;

        assert!(second.is_connected());
        assert_eq!(server.registry().len(), 1);
        assert!(server.registry().get(second.id()).unwrap().same_as(&second));
    }

    #[tokio::test]
    async fn test_broadcast_and_send_to() {
        let server = Arc::new(Server::new(test_config(8)));
        let sink = Arc::new(RecordingSink::default());
        let addr = start(&server, sink.clone()).await;

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();
        wait_until(|| server.registry().len() == 2).await;

        assert_eq!(server.broadcast(b"all").await, 2);
        let mut buf = [0u8; 3];
        a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"all");
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"all");

        let id = server.registry().handles()[0].id();
        assert!(server.send_to(id, b"one").await);
        assert!(!server.send_to(ConnectionId(999), b"nobody").await);
    }

    #[tokio::test]
    async fn test_connection_limit_waits_for_slot() {
        let server = Arc::new(Server::new(test_config(1)));
        let sink = Arc::new(RecordingSink::default());
        let addr = start(&server, sink.clone()).await;

        let first = TcpStream::connect(addr).await.unwrap();
        wait_until(|| server.registry().len() == 1).await;

        // Second connect completes at TCP level but is not accepted yet
        let _second = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(server.registry().len(), 1);

        drop(first);
        sink.wait_for_disconnect().await;
        wait_until(|| server.registry().len() == 1).await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let server = Arc::new(Server::new(test_config(8)));
        let sink = Arc::new(RecordingSink::default());
        let addr = start(&server, sink.clone()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        wait_until(|| server.registry().len() == 1).await;

        server.shutdown();
        sink.wait_for_disconnect().await;

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(server.registry().is_empty());
    }
}
