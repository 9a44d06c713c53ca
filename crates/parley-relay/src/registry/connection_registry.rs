//! Connection Registry implementation.
//!
//! Tracks admitted connections by display name.

use std::fmt;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, instrument};

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::metrics;

/// Registry of online display names.
///
/// Thread-safe map from display name to connection handle. Uses DashMap so
/// every operation is atomic with respect to the others without a global
/// lock; no operation performs I/O while holding a shard.
///
/// ## Usage
///
/// ```ignore
/// let registry = ConnectionRegistry::new();
///
/// // On a successful handshake:
/// if !registry.register(handle.clone()) {
///     // name taken
/// }
///
/// // When routing:
/// if let Some(recipient) = registry.lookup("bob") {
///     recipient.send(envelope).await?;
/// }
///
/// // When the connection's read loop ends:
/// registry.unregister_connection(handle.name(), handle.id());
/// ```
pub struct ConnectionRegistry {
    /// Map of display name to connection handle (case-sensitive keys)
    connections: DashMap<String, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Create a new connection registry.
    pub fn new() -> Self {
        info!("Creating connection registry");
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection under its display name.
    ///
    /// Returns false, leaving the existing entry untouched, if the name is
    /// already held. The check and the insert happen under one shard lock,
    /// so two concurrent registrations of the same name cannot both succeed.
    #[instrument(skip(self, handle), fields(name = %handle.name(), id = %handle.id()))]
    pub fn register(&self, handle: ConnectionHandle) -> bool {
        let registered = match self.connections.entry(handle.name().to_string()) {
            Entry::Occupied(_) => {
                debug!("Name already registered");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
                debug!("Registered new connection");
                true
            }
        };
        if registered {
            metrics::record_connection_count(self.connections.len() as i64);
        }
        registered
    }

    /// Unregister whatever connection holds `name`.
    ///
    /// No-op if the name is not registered.
    #[instrument(skip(self))]
    pub fn unregister(&self, name: &str) -> Option<ConnectionHandle> {
        let removed = self.connections.remove(name).map(|(_, handle)| handle);
        if removed.is_some() {
            debug!("Unregistered connection");
            metrics::record_connection_count(self.connections.len() as i64);
        } else {
            debug!("Connection was not registered");
        }
        removed
    }

    /// Unregister `name` only if it is still held by connection `id`.
    ///
    /// Returns true if an entry was removed.
    #[instrument(skip(self))]
    pub fn unregister_connection(&self, name: &str, id: ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(name, |_, handle| handle.id() == id)
            .is_some();
        if removed {
            debug!("Unregistered connection");
            metrics::record_connection_count(self.connections.len() as i64);
        }
        removed
    }

    /// Look up the connection holding `name`.
    pub fn lookup(&self, name: &str) -> Option<ConnectionHandle> {
        self.connections.get(name).map(|entry| entry.value().clone())
    }

    /// Check if a name is currently registered.
    pub fn is_connected(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    /// Get the number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// List all registered names.
    ///
    /// Useful for debugging and monitoring.
    pub fn list_connections(&self) -> Vec<String> {
        self.connections.iter().map(|r| r.key().clone()).collect()
    }

    /// Close every registered connection and clear the registry.
    ///
    /// Used on shutdown. Handles are collected first so no shard lock is
    /// held across the close writes.
    pub async fn close_all(&self) -> usize {
        let names = self.list_connections();
        let mut handles = Vec::with_capacity(names.len());
        for name in names {
            if let Some(handle) = self.unregister(&name) {
                handles.push(handle);
            }
        }

        for handle in &handles {
            handle.close().await;
        }

        if !handles.is_empty() {
            info!(count = handles.len(), "Closed registered connections");
        }
        handles.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.connections.len())
            .finish()
    }
}
