//! End-to-end tests against a loopback listener.

use async_trait::async_trait;
use bytes::Bytes;
use sockline::config::Config;
use sockline::echo::EchoSink;
use sockline::{ConnectionHandle, MessageSink, Server};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn config(max_message_size: usize) -> Config {
    Config {
        listen: "127.0.0.1:0".to_string(),
        max_message_size,
        max_connections: 16,
        pending_messages: 64,
        log_level: "info".to_string(),
    }
}

async fn start(server: Arc<Server>, sink: Arc<dyn MessageSink>) -> std::net::SocketAddr {
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.serve(listener, sink).await });
    addr
}

async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_echo_round_trip() {
    let server = Arc::new(Server::new(config(4096)));
    let addr = start(Arc::clone(&server), Arc::new(EchoSink)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"hello sockline").await.unwrap();

    let mut buf = [0u8; 14];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello sockline");

    drop(client);
    eventually(|| server.registry().is_empty()).await;
}

#[tokio::test]
async fn test_payload_larger_than_buffer_is_echoed_in_pieces() {
    let server = Arc::new(Server::new(config(8)));
    let addr = start(Arc::clone(&server), Arc::new(EchoSink)).await;

    let payload: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&payload).await.unwrap();

    let mut echoed = vec![0u8; payload.len()];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);

    let conn = server.registry().handles().pop().unwrap();
    assert!(conn.stats().messages_received >= 25);
    assert_eq!(conn.stats().bytes_received, 200);
}

#[derive(Default)]
struct CountingSink {
    messages: AtomicUsize,
    disconnects: AtomicUsize,
}

#[async_trait]
impl MessageSink for CountingSink {
    async fn on_message(&self, _conn: &ConnectionHandle, _message: Bytes) {
        self.messages.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_disconnect(&self, _conn: &ConnectionHandle) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_each_client_disconnects_once() {
    let server = Arc::new(Server::new(config(64)));
    let sink = Arc::new(CountingSink::default());
    let addr = start(Arc::clone(&server), sink.clone()).await;

    let mut clients = Vec::new();
    for _ in 0..5 {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"x").await.unwrap();
        clients.push(client);
    }
    eventually(|| sink.messages.load(Ordering::SeqCst) == 5).await;

    drop(clients);
    eventually(|| sink.disconnects.load(Ordering::SeqCst) == 5).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sink.disconnects.load(Ordering::SeqCst), 5);
    assert!(server.registry().is_empty());
}
