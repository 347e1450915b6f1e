//! Shared test helpers.

use crate::connection::{ConnectionHandle, MessageSink};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Message(Bytes),
    Disconnect,
}

/// Sink that records every callback in order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
    disconnects: AtomicUsize,
    disconnected: Notify,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<Bytes> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Message(message) => Some(message),
                Event::Disconnect => None,
            })
            .collect()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub async fn wait_for_disconnect(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.disconnected.notified())
            .await
            .expect("timed out waiting for disconnect");
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn on_message(&self, _conn: &ConnectionHandle, message: Bytes) {
        self.events.lock().unwrap().push(Event::Message(message));
    }

    async fn on_disconnect(&self, _conn: &ConnectionHandle) {
        self.events.lock().unwrap().push(Event::Disconnect);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.disconnected.notify_one();
    }
}

/// Poll `condition` until it holds, failing after five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for condition"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
