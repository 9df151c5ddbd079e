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

//! Multiplexed HTTP request stream
//!
//! This crate turns a listening socket with any number of keep-alive
//! connections into a single stream of requests:
//!
//! - Accepting never waits on an existing connection
//! - Each connection is drained strictly one request at a time; the next
//!   request is pulled only after the previous response reached the
//!   transport
//! - Requests from all connections are merged first-ready-first-served
//! - Closing shuts the listener and every connection exactly once,
//!   tolerating anything already closed
//! - Per-connection failures stay with their connection
//!
//! # Architecture
//!
//! ```text
//! Server (Stream<Item = Result<RequestContext>>)
//!     ↓
//! Multiplexer ← accept source (Listener + Upgrade)
//!     ↓
//! ConnectionDrainer × N → HttpConnection → RequestEvent
//! ```
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use http::Response;
//! use httpmux_service::{full, serve};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = serve(":8000").await?;
//!     let closer = server.closer();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         closer.close();
//!     });
//!
//!     while let Some(request) = server.next().await {
//!         let request = request?;
//!         let body = format!("{}: {}", request.method(), request.url());
//!         request.respond_with(Response::new(full(body)))?;
//!     }
//!     Ok(())
//! }
//! ```

mod address;
mod body;
mod config;
mod connection;
mod context;
mod drainer;
mod error;
mod handler;
mod listener;
mod metrics;
mod mux;
mod registry;
mod request;
mod server;
#[cfg(feature = "tls")]
mod tls;
mod types;

pub use address::{
    BindOptions, DEFAULT_HOSTNAME, DEFAULT_PORT, ListenOptions, TlsListenOptions, ToBindOptions,
    parse_address,
};
pub use body::{Body, TrackedBody, boxed, empty, full};
pub use config::ServerConfig;
pub use connection::{Http, HttpConnection, HyperConnection, Upgrade};
pub use context::RequestContext;
pub use error::{AcceptError, BoxError, Result, ServerError};
pub use handler::RequestHandler;
pub use listener::{Listener, NetListener, NetStream};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use mux::{MuxHandle, Multiplexer};
pub use registry::ConnectionRegistry;
pub use request::{Completion, CompletionGuard, PendingResponse, RequestEvent, ResponseFuture};
pub use server::{
    NetServer, Server, ServerCloser, listen_and_serve, serve, serve_with_config,
};
#[cfg(feature = "tls")]
pub use tls::{build_acceptor, load_certs, load_private_key};
pub use types::{ConnectionId, ConnectionInfo, ConnectionState, ServerSnapshot};
