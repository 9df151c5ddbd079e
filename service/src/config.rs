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

//! Server configuration

use crate::{Result, ServerError};
use std::time::Duration;

/// Server configuration
///
/// Controls connection limits and the behaviour of the HTTP protocol layer.
/// Where the server listens is not part of the configuration; that comes
/// from the address handed to [`serve`](crate::serve).
///
/// # Example
///
/// ```
/// use httpmux_service::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::default()
///     .with_max_connections(500)
///     .with_handshake_timeout(Duration::from_secs(5))
///     .with_http2(false);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of concurrently registered connections
    ///
    /// Connections accepted beyond this limit are dropped immediately and
    /// the accept loop moves on to the next one.
    pub max_connections: usize,

    /// Keep HTTP/1.1 connections open between requests
    pub keep_alive: bool,

    /// Allow HTTP/2 on accepted connections
    pub http2: bool,

    /// Deadline for the TLS handshake of an accepted connection
    ///
    /// A handshake that runs past the deadline is a recoverable accept
    /// failure.
    pub handshake_timeout: Duration,

    /// Capacity of the queue between the protocol layer and a drainer
    pub request_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            keep_alive: true,
            http2: true,
            handshake_timeout: Duration::from_secs(10),
            request_buffer: 16,
        }
    }
}

impl ServerConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of concurrent connections
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Enable or disable HTTP/1.1 keep-alive
    pub fn with_keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// Enable or disable HTTP/2
    pub fn with_http2(mut self, enabled: bool) -> Self {
        self.http2 = enabled;
        self
    }

    /// Set the TLS handshake deadline
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the per-connection request queue capacity
    pub fn with_request_buffer(mut self, capacity: usize) -> Self {
        self.request_buffer = capacity;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(ServerError::InvalidConfig(
                "max_connections must be greater than 0".to_string(),
            ));
        }

        if self.handshake_timeout.is_zero() {
            return Err(ServerError::InvalidConfig(
                "handshake_timeout must be greater than 0".to_string(),
            ));
        }

        if self.request_buffer == 0 {
            return Err(ServerError::InvalidConfig(
                "request_buffer must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
