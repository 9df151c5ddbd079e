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

//! Error types for the HTTP request multiplexer

use crate::types::ConnectionId;
use std::io;
use thiserror::Error;

/// Result type for operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Boxed error used by request and response bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server error types
#[derive(Debug, Error)]
pub enum ServerError {
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A response was delivered twice for the same request
    #[error("Response already sent")]
    ResponseAlreadySent,

    /// The listener or connection was already closed
    #[error("Resource already closed")]
    AlreadyClosed,

    /// Pulling the next request from an established connection failed
    #[error("Connection {id} failed: {source}")]
    ConnectionPull {
        /// Connection the failure happened on
        id: ConnectionId,
        /// Underlying protocol failure
        #[source]
        source: BoxError,
    },

    /// The listener failed in a way the accept loop cannot absorb
    #[error("Fatal accept error: {0}")]
    FatalAccept(#[source] io::Error),

    /// Malformed address string
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The transport upgrade capability is not available in this build
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Certificate or key material could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Connection with the given ID was not found
    #[error("Connection {0} not found")]
    ConnectionNotFound(ConnectionId),
}

impl ServerError {
    /// Check if the error is recoverable
    ///
    /// Recoverable errors are contained at their origin: they affect a
    /// single request or connection and never the accept loop.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ServerError::ResponseAlreadySent
                | ServerError::AlreadyClosed
                | ServerError::ConnectionPull { .. }
                | ServerError::ConnectionNotFound(_)
        )
    }

    /// Check if the error is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ServerError::ConnectionPull { .. }
                | ServerError::ConnectionNotFound(_)
                | ServerError::Io(_)
        )
    }

    /// Check if the error was raised while constructing the server
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidAddress(_)
                | ServerError::UnsupportedPlatform(_)
                | ServerError::Tls(_)
                | ServerError::InvalidConfig(_)
        )
    }
}

/// Failure returned by [`Listener::accept`](crate::Listener::accept)
#[derive(Debug, Error)]
pub enum AcceptError {
    /// The listener has been closed and will never yield another connection
    #[error("Listener closed")]
    Closed,

    /// The accept or handshake failed
    #[error("Accept failed: {0}")]
    Io(#[from] io::Error),
}

impl AcceptError {
    /// Check if the failure is expected and the accept loop should retry
    ///
    /// Peer resets, aborted or half-open sockets, handshake garbage and
    /// handshake timeouts only cost the one connection being accepted.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AcceptError::Closed => true,
            AcceptError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::InvalidData
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::WouldBlock
            ),
        }
    }

    /// Check if the listener is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, AcceptError::Closed)
    }
}

impl From<AcceptError> for ServerError {
    fn from(err: AcceptError) -> Self {
        match err {
            AcceptError::Closed => ServerError::AlreadyClosed,
            AcceptError::Io(err) => ServerError::FatalAccept(err),
        }
    }
}
