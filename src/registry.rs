//! Registry of live connections using slab allocation.
//!
//! The registry hands out connection identifiers: a slot is reserved, the
//! handle is opened with that slot's key as its id, and the handle is stored
//! in the slot. Removing a connection frees its id for reuse.

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::ConnectionError;
use slab::Slab;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedSemaphorePermit;

struct Entry {
    handle: ConnectionHandle,
    /// Connection slot held on the server's limiter until removal.
    _permit: Option<OwnedSemaphorePermit>,
}

/// Thread-safe registry with O(1) insert, lookup, and remove.
pub struct ConnectionRegistry {
    connections: Mutex<Slab<Entry>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Mutex::new(Slab::with_capacity(max_connections)),
            max_connections,
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slab<Entry>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve an id, open a connection with it, and store the handle.
    ///
    /// Returns [`ConnectionError::RegistryFull`] at capacity, or whatever
    /// error `open` produced. The registry is unchanged on error.
    pub fn register<F>(&self, open: F) -> Result<ConnectionHandle, ConnectionError>
    where
        F: FnOnce(ConnectionId) -> Result<ConnectionHandle, ConnectionError>,
    {
        self.insert(None, open)
    }

    /// Like [`ConnectionRegistry::register`], keeping `permit` alive until the
    /// connection is removed.
    pub fn register_with_permit<F>(
        &self,
        permit: OwnedSemaphorePermit,
        open: F,
    ) -> Result<ConnectionHandle, ConnectionError>
    where
        F: FnOnce(ConnectionId) -> Result<ConnectionHandle, ConnectionError>,
    {
        self.insert(Some(permit), open)
    }

    fn insert<F>(
        &self,
        permit: Option<OwnedSemaphorePermit>,
        open: F,
    ) -> Result<ConnectionHandle, ConnectionError>
    where
        F: FnOnce(ConnectionId) -> Result<ConnectionHandle, ConnectionError>,
    {
        let mut slots = self.slots();
        if slots.len() >= self.max_connections {
            return Err(ConnectionError::RegistryFull(self.max_connections));
        }

        let slot = slots.vacant_entry();
        let handle = open(ConnectionId(slot.key()))?;
        slot.insert(Entry {
            handle: handle.clone(),
            _permit: permit,
        });
        Ok(handle)
    }

    /// Remove `conn` from the registry.
    ///
    /// Only removes the slot if it still holds this same connection; a stale
    /// handle whose id was reused leaves the current occupant alone.
    pub fn remove(&self, conn: &ConnectionHandle) -> bool {
        let mut slots = self.slots();
        let id = conn.id().0;
        match slots.get(id) {
            Some(entry) if entry.handle.same_as(conn) => {
                slots.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.slots().get(id.0).map(|entry| entry.handle.clone())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.slots().contains(id.0)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Snapshot of all registered handles.
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.slots()
            .iter()
            .map(|(_, entry)| entry.handle.clone())
            .collect()
    }

    /// Close every registered connection. Each is removed as its disconnect
    /// notification is processed.
    pub fn close_all(&self) {
        for handle in self.handles() {
            handle.close();
        }
    }
}
