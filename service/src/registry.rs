//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Registry of live connections
//!
//! The registry is responsible for:
//! - Handing out connection IDs
//! - Tracking every connection between accept and drainer exit
//! - Force-closing everything on server shutdown
//!
//! Only the accept loop inserts. Removal happens from the drainer on exit and
//! from [`close_all`](ConnectionRegistry::close_all); whichever runs second
//! finds nothing to remove.

use crate::{
    ConnectionId, ConnectionInfo, ConnectionState, HttpConnection, Result, ServerError,
    ServerMetrics,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Instant;

/// Drainer-side view of a registered connection
///
/// Shared between the registry entry and the drainer so state can be read
/// without touching the drainer.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionStatus {
    state: Arc<AtomicU8>,
    requests: Arc<AtomicU64>,
}

impl ConnectionStatus {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ConnectionState::Accepted.as_u8())),
            requests: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get the current state
    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Set the state
    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Count a request handed to the consumer
    pub(crate) fn request_delivered(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Registered connection entry
struct RegisteredConnection {
    connection: Arc<dyn HttpConnection>,
    status: ConnectionStatus,
    peer_addr: SocketAddr,
    created_at: Instant,
}

impl RegisteredConnection {
    fn info(&self, id: ConnectionId) -> ConnectionInfo {
        ConnectionInfo {
            id,
            state: self.status.state(),
            peer_addr: self.peer_addr,
            created_at: self.created_at,
            requests: self.status.requests(),
        }
    }
}

/// Registry of live connections
pub struct ConnectionRegistry {
    /// Registered connections (lock-free concurrent map)
    connections: DashMap<ConnectionId, RegisteredConnection>,
    /// Next connection ID (monotonically increasing)
    next_id: AtomicU64,
    /// Server metrics
    metrics: Arc<ServerMetrics>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new(metrics: Arc<ServerMetrics>) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            metrics,
        }
    }

    /// Get the next connection ID
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Server metrics shared with the registry
    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    /// Track a connection until it is deregistered
    pub(crate) fn register(
        &self,
        connection: Arc<dyn HttpConnection>,
        peer_addr: SocketAddr,
    ) -> ConnectionStatus {
        let status = ConnectionStatus::new();
        let entry = RegisteredConnection {
            connection: connection.clone(),
            status: status.clone(),
            peer_addr,
            created_at: Instant::now(),
        };
        self.connections.insert(connection.id(), entry);
        self.metrics.connection_opened();
        status
    }

    /// Stop tracking a connection
    ///
    /// Returns the connection if it was still registered; a second call for
    /// the same ID is a no-op returning `None`.
    pub fn deregister(&self, id: ConnectionId) -> Option<Arc<dyn HttpConnection>> {
        let (_, entry) = self.connections.remove(&id)?;
        self.metrics.connection_closed(entry.created_at.elapsed());
        Some(entry.connection)
    }

    /// Deregister and close one connection
    pub fn close_connection(&self, id: ConnectionId) -> Result<()> {
        let connection = self
            .deregister(id)
            .ok_or(ServerError::ConnectionNotFound(id))?;
        close_tolerant(connection.as_ref());
        Ok(())
    }

    /// Deregister and close every connection
    ///
    /// Returns the number of connections that were closed.
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.deregister(id))
            .map(|connection| close_tolerant(connection.as_ref()))
            .count()
    }

    /// Check if a connection is registered
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Get connection info
    pub fn info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(&id).map(|entry| entry.info(id))
    }

    /// Get all connection infos
    pub fn infos(&self) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .map(|entry| entry.value().info(*entry.key()))
            .collect()
    }

    /// Get all connection IDs
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Get the number of registered connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connection is registered
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

/// Close a connection, treating "already closed" as success
pub(crate) fn close_tolerant(connection: &dyn HttpConnection) {
    match connection.close() {
        Ok(()) | Err(ServerError::AlreadyClosed) => {}
        Err(e) => tracing::debug!(
            connection_id = %connection.id(),
            error = %e,
            "Failed to close connection"
        ),
    }
}
