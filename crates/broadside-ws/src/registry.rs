//! Connection registry.
//!
//! The registry is the set of open connections. Insert, remove and snapshot
//! all take the same lock, so a snapshot never contains a half-registered
//! connection and a removal is never lost to a concurrent insert. A
//! connection leaves the registry as soon as it stops being `Open`: the
//! handle that wins the close removes it through a back-reference set on
//! insert.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::connection::{CloseReason, ConnectionHandle, ConnectionId};
use crate::error::{WsError, WsResult};

#[derive(Debug, Default)]
struct Inner {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    sealed: bool,
}

/// Registry of open connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
    drained: Notify,
    total_registered: AtomicU64,
    total_removed: AtomicU64,
}

/// Point-in-time registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Currently registered connections.
    pub active: usize,
    /// Connections registered since the registry was created.
    pub total_registered: u64,
    /// Connections removed since the registry was created.
    pub total_removed: u64,
    /// Whether the registry refuses new connections.
    pub sealed: bool,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a connection and move it to `Open`.
    ///
    /// Fails if the registry is sealed, if the ID is already present, or if
    /// the connection is no longer `Connecting`.
    pub fn insert(self: &Arc<Self>, handle: &ConnectionHandle) -> WsResult<()> {
        let id = handle.id();
        let mut inner = self.inner.write();

        if inner.sealed {
            return Err(WsError::RegistryClosed);
        }
        if inner.connections.contains_key(&id) {
            error!(connection_id = %id, "Connection registered twice");
            return Err(WsError::DuplicateConnection { connection_id: id });
        }
        handle.attach(Arc::downgrade(self));
        if !handle.open() {
            return Err(WsError::connection_closed(id));
        }

        inner.connections.insert(id, handle.clone());
        let active = inner.connections.len();
        drop(inner);

        self.total_registered.fetch_add(1, Ordering::Relaxed);
        counter!("broadside_connections_total").increment(1);
        gauge!("broadside_connections_active").increment(1.0);
        debug!(connection_id = %id, active, "Connection registered");
        Ok(())
    }

    /// Insert a connection and return a guard that removes it when dropped.
    pub fn register(self: &Arc<Self>, handle: &ConnectionHandle) -> WsResult<Registration> {
        self.insert(handle)?;
        Ok(Registration {
            registry: Arc::clone(self),
            handle: handle.clone(),
        })
    }

    /// Remove a connection. Removing an absent ID is a no-op.
    pub fn remove(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        let mut inner = self.inner.write();
        let removed = inner.connections.remove(id);
        let empty = inner.connections.is_empty();
        drop(inner);

        if removed.is_some() {
            self.total_removed.fetch_add(1, Ordering::Relaxed);
            gauge!("broadside_connections_active").decrement(1.0);
            debug!(connection_id = %id, "Connection removed");
        }
        if empty {
            self.drained.notify_waiters();
        }
        removed
    }

    /// Get a connection by ID.
    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.inner.read().connections.get(id).cloned()
    }

    /// Check if a connection is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.read().connections.contains_key(id)
    }

    /// Copy of the current membership.
    ///
    /// The returned handles are independent of later inserts and removals.
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.inner.read().connections.values().cloned().collect()
    }

    /// IDs of all registered connections.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.inner.read().connections.keys().copied().collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.inner.read().connections.len()
    }

    /// Check if no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().connections.is_empty()
    }

    /// Check if the registry refuses new connections.
    pub fn is_sealed(&self) -> bool {
        self.inner.read().sealed
    }

    /// Current statistics.
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read();
        RegistryStats {
            active: inner.connections.len(),
            total_registered: self.total_registered.load(Ordering::Relaxed),
            total_removed: self.total_removed.load(Ordering::Relaxed),
            sealed: inner.sealed,
        }
    }

    /// Refuse further inserts and return the connections registered at that
    /// instant.
    pub fn seal(&self) -> Vec<ConnectionHandle> {
        let mut inner = self.inner.write();
        inner.sealed = true;
        inner.connections.values().cloned().collect()
    }

    /// Seal the registry and ask every connection to close.
    ///
    /// Each connection leaves the registry as it starts closing. Its task
    /// keeps flushing in the background.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let connections = self.seal();
        let count = connections.len();
        for handle in &connections {
            handle.close(reason);
        }
        if count > 0 {
            info!(count, reason = %reason, "Closing all connections");
        }
        count
    }

    /// Wait until no connections remain.
    pub async fn wait_until_empty(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Remove every connection and mark it closed without waiting for its task.
    pub fn clear(&self) -> usize {
        let drained: Vec<ConnectionHandle> = {
            let mut inner = self.inner.write();
            inner.connections.drain().map(|(_, handle)| handle).collect()
        };

        for handle in &drained {
            handle.mark_closed();
        }
        let count = drained.len();
        if count > 0 {
            self.total_removed.fetch_add(count as u64, Ordering::Relaxed);
            gauge!("broadside_connections_active").decrement(count as f64);
        }
        self.drained.notify_waiters();
        count
    }
}

/// Keeps a connection registered for as long as it lives.
///
/// Dropping the guard removes the connection and marks it `Closed`, which also
/// covers connection tasks that are aborted rather than finishing normally.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    handle: ConnectionHandle,
}

impl Registration {
    /// The registered connection.
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Remove the connection from the registry ahead of the guard being dropped.
    pub fn deregister(&self) {
        self.registry.remove(&self.handle.id());
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.handle.id());
        self.handle.mark_closed();
    }
}
