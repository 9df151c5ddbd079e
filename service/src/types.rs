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

//! Core types shared by the accept loop, drainers and the server handle

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Unique identifier for a connection (monotonically increasing, never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a new connection ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the underlying u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Drainer state of a connection (stored as atomic u8 for lock-free reads)
///
/// ```text
/// Accepted -> Pulling -> Delivered -> Pulling -> ... -> Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Connection has been accepted and registered, no pull yet
    Accepted = 0,
    /// Waiting for the next request on the connection
    Pulling = 1,
    /// A request was handed to the consumer; waiting for its response
    Delivered = 2,
    /// Drainer finished; the connection is deregistered and closed
    Done = 3,
}

impl ConnectionState {
    /// Convert from u8 (for atomic operations)
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Accepted,
            1 => Self::Pulling,
            2 => Self::Delivered,
            _ => Self::Done,
        }
    }

    /// Convert to u8 (for atomic operations)
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if the drainer has finished
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }

    /// Check if a request is currently in flight
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Delivered)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Pulling => write!(f, "pulling"),
            Self::Delivered => write!(f, "delivered"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Connection information snapshot (for non-blocking queries)
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection ID
    pub id: ConnectionId,
    /// Current drainer state
    pub state: ConnectionState,
    /// Peer address
    pub peer_addr: SocketAddr,
    /// When the connection was accepted
    pub created_at: Instant,
    /// Requests handed to the consumer so far
    pub requests: u64,
}

impl ConnectionInfo {
    /// Get the connection duration
    pub fn duration(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Server snapshot for non-blocking debug information
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    /// Number of registered connections
    pub active_connections: usize,
    /// Total connections accepted since server start
    pub total_connections: u64,
    /// Address the listener is bound to
    pub local_addr: Option<SocketAddr>,
    /// Whether close has been requested
    pub closing: bool,
    /// Server uptime
    pub uptime: Duration,
    /// Server start time
    pub started_at: Instant,
}

impl fmt::Display for ServerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = self
            .local_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "Server {{ active: {}, total: {}, addr: {}, closing: {}, uptime: {:?} }}",
            self.active_connections, self.total_connections, addr, self.closing, self.uptime
        )
    }
}
