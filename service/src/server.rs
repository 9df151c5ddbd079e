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

//! Server lifecycle and accept loop
//!
//! A [`Server`] owns the listener and the connection registry and is itself
//! the merged stream of requests. Internally it is a [`Multiplexer`] seeded
//! with one accept source:
//!
//! ```text
//! accept ──► accepted ──► add(next accept) ──► add(drainer)
//!   │
//!   ├─ recoverable failure ──► accept again
//!   ├─ listener closed / server closing ──► stop
//!   └─ fatal failure ──► yield Err, stop
//! ```
//!
//! Accepting the next connection is scheduled before the accepted one is
//! drained, so a long keep-alive session never holds up new connections.

use crate::drainer::ConnectionDrainer;
use crate::mux::{MuxHandle, Multiplexer};
use crate::{
    AcceptError, ConnectionId, ConnectionInfo, ConnectionRegistry, Http, Listener, MetricsSnapshot,
    NetListener, RequestContext, RequestHandler, Result, ServerConfig, ServerError, ServerMetrics,
    ServerSnapshot, ToBindOptions, Upgrade,
};
use futures::stream::{self, BoxStream, FusedStream, Stream, StreamExt};
use std::future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Item of the merged request stream
type Item = Result<RequestContext>;

/// Server bound through [`serve`]
pub type NetServer = Server<NetListener, Http>;

/// State shared by the server handle, the accept loop and closers
struct ServerShared<L, U> {
    listener: L,
    upgrade: U,
    config: ServerConfig,
    /// Closing flag (set exactly once)
    closing: AtomicBool,
    /// Wakes drainers waiting on a response when the server closes
    shutdown: CancellationToken,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<ServerMetrics>,
    started_at: Instant,
}

/// HTTP server yielding every request of every connection
///
/// `Server` is a [`Stream`] of [`RequestContext`]s. Requests from different
/// connections interleave in whatever order they arrive; requests from one
/// connection arrive in order, each only after the previous one has been
/// answered.
///
/// The stream ends after [`close`](Self::close) once every connection has
/// wound down. An `Err` item signals that the listener failed for good; the
/// connections already accepted keep draining.
///
/// # Example
///
/// ```no_run
/// use futures::StreamExt;
/// use http::Response;
/// use httpmux_service::{full, serve};
///
/// #[tokio::main]
/// async fn main() -> httpmux_service::Result<()> {
///     let mut server = serve(":8000").await?;
///     while let Some(request) = server.next().await {
///         let request = request?;
///         request.respond_with(Response::new(full("hello")))?;
///     }
///     Ok(())
/// }
/// ```
pub struct Server<L: Listener, U> {
    shared: Arc<ServerShared<L, U>>,
    requests: Multiplexer<Item>,
}

impl<L, U> Server<L, U>
where
    L: Listener,
    U: Upgrade<L::Stream>,
{
    /// Serve requests from connections accepted on `listener`
    ///
    /// Accepted streams are turned into request-capable connections through
    /// `upgrade`. Nothing is accepted until the server is polled.
    pub fn new(listener: L, upgrade: U, config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(ServerMetrics::new());
        let shared = Arc::new(ServerShared {
            listener,
            upgrade,
            config,
            closing: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            registry: Arc::new(ConnectionRegistry::new(metrics.clone())),
            metrics,
            started_at: Instant::now(),
        });

        let (mut requests, handle) = Multiplexer::new();
        requests.push(accept_source(shared.clone(), handle));

        Ok(Self { shared, requests })
    }
}

impl<L: Listener, U> Server<L, U> {
    /// Close the server
    ///
    /// Closes the listener, then every live connection, tolerating resources
    /// that are already closed. Safe to call any number of times, including
    /// while the server is being polled.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Get a handle that can close the server from another task
    pub fn closer(&self) -> ServerCloser<L, U> {
        ServerCloser {
            shared: self.shared.clone(),
        }
    }

    /// Check if the server is closing
    pub fn is_closing(&self) -> bool {
        self.shared.is_closing()
    }

    /// The underlying listener
    pub fn listener(&self) -> &L {
        &self.shared.listener
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.shared.listener.local_addr()
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Get connection info
    pub fn connection_info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.shared.registry.info(id)
    }

    /// Get info for every live connection
    pub fn connection_infos(&self) -> Vec<ConnectionInfo> {
        self.shared.registry.infos()
    }

    /// Force-close one connection
    pub fn close_connection(&self, id: ConnectionId) -> Result<()> {
        self.shared.registry.close_connection(id)
    }

    /// Server metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Get a snapshot of the server state
    pub fn snapshot(&self) -> ServerSnapshot {
        let metrics = self.shared.metrics.snapshot();
        ServerSnapshot {
            active_connections: self.shared.registry.len(),
            total_connections: metrics.total_connections,
            local_addr: self.shared.listener.local_addr().ok(),
            closing: self.is_closing(),
            uptime: self.shared.started_at.elapsed(),
            started_at: self.shared.started_at,
        }
    }

    /// Hand every request to `handler`, each on its own task
    ///
    /// Returns once the server has been closed and drained. A fatal listener
    /// failure closes the server and is returned.
    pub async fn run<H: RequestHandler>(mut self, handler: H) -> Result<()> {
        let handler = Arc::new(handler);
        while let Some(next) = self.next().await {
            match next {
                Ok(request) => {
                    let handler = handler.clone();
                    tokio::spawn(async move { handler.handle(request).await });
                }
                Err(e) => {
                    error!(error = %e, "Server stopped");
                    self.close();
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

impl<L: Listener, U> Stream for Server<L, U> {
    type Item = Result<RequestContext>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.requests.poll_next_unpin(cx)
    }
}

impl<L: Listener, U> FusedStream for Server<L, U> {
    fn is_terminated(&self) -> bool {
        self.requests.is_terminated()
    }
}

impl<L: Listener, U> std::fmt::Debug for Server<L, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.shared.listener.local_addr().ok())
            .field("connections", &self.shared.registry.len())
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// Closes a [`Server`] from anywhere
pub struct ServerCloser<L, U> {
    shared: Arc<ServerShared<L, U>>,
}

impl<L: Listener, U> ServerCloser<L, U> {
    /// Close the server (see [`Server::close`])
    pub fn close(&self) {
        self.shared.close();
    }

    /// Check if the server is closing
    pub fn is_closing(&self) -> bool {
        self.shared.is_closing()
    }
}

impl<L, U> Clone for ServerCloser<L, U> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<L: Listener, U> std::fmt::Debug for ServerCloser<L, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCloser")
            .field("closing", &self.is_closing())
            .finish()
    }
}

impl<L: Listener, U> ServerShared<L, U> {
    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn close(&self) {
        let first = !self.closing.swap(true, Ordering::SeqCst);
        if first {
            info!("Closing server");
        }
        self.shutdown.cancel();

        match self.listener.close() {
            Ok(()) | Err(ServerError::AlreadyClosed) => {}
            Err(e) => warn!(error = %e, "Failed to close listener"),
        }

        let closed = self.registry.close_all();
        if first {
            info!(connections = closed, "Server closed");
        }
    }
}

impl<L, U> ServerShared<L, U>
where
    L: Listener,
    U: Upgrade<L::Stream>,
{
    /// Register and upgrade an accepted stream
    fn open_connection(
        &self,
        stream: L::Stream,
        peer_addr: SocketAddr,
    ) -> Option<ConnectionDrainer> {
        if self.registry.len() >= self.config.max_connections {
            warn!(%peer_addr, limit = self.config.max_connections, "Connection limit reached, dropping connection");
            self.metrics.connection_rejected();
            return None;
        }

        let id = self.registry.next_connection_id();
        let connection = match self.upgrade.upgrade(stream, id, peer_addr) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(connection_id = %id, %peer_addr, error = %e, "Failed to upgrade connection");
                self.metrics.accept_error();
                return None;
            }
        };

        let status = self.registry.register(connection.clone(), peer_addr);
        let drainer = ConnectionDrainer::new(
            connection,
            status,
            self.registry.clone(),
            self.shutdown.clone(),
        );

        // close() may have swept the registry before this registration
        if self.is_closing() {
            return None;
        }

        debug!(connection_id = %id, %peer_addr, "Connection accepted");
        Some(drainer)
    }
}

/// One-shot source accepting the next connection
fn accept_source<L, U>(shared: Arc<ServerShared<L, U>>, handle: MuxHandle<Item>) -> BoxStream<'static, Item>
where
    L: Listener,
    U: Upgrade<L::Stream>,
{
    stream::once(accept_next(shared, handle))
        .filter_map(future::ready)
        .boxed()
}

#[instrument(level = "debug", skip_all)]
async fn accept_next<L, U>(shared: Arc<ServerShared<L, U>>, handle: MuxHandle<Item>) -> Option<Item>
where
    L: Listener,
    U: Upgrade<L::Stream>,
{
    loop {
        if shared.is_closing() {
            debug!("Server closing, accept loop stopped");
            return None;
        }

        match shared.listener.accept().await {
            Ok((stream, peer_addr)) => {
                if shared.is_closing() {
                    debug!(%peer_addr, "Server closing, accepted connection dropped");
                    return None;
                }
                handle.add(accept_source(shared.clone(), handle.clone()));
                if let Some(drainer) = shared.open_connection(stream, peer_addr) {
                    handle.add(drainer.into_stream().map(Ok));
                }
                return None;
            }
            Err(AcceptError::Closed) => {
                debug!("Listener closed, accept loop stopped");
                return None;
            }
            Err(e) if e.is_recoverable() => {
                debug!(error = %e, "Accept failed, retrying");
                shared.metrics.accept_error();
            }
            Err(e) => {
                error!(error = %e, "Listener failed");
                return Some(Err(e.into()));
            }
        }
    }
}

/// Bind a listener for `address` and serve requests from it
///
/// `address` is anything implementing [`ToBindOptions`]: a port number, a
/// `"host:port"` or `":port"` string, `None` for port 80, or listen options
/// (plain or TLS).
///
/// # Errors
///
/// [`ServerError::InvalidAddress`] for a malformed address string,
/// [`ServerError::UnsupportedPlatform`] when TLS is requested in a build
/// without it, and I/O or TLS errors from binding the listener.
pub async fn serve(address: impl ToBindOptions) -> Result<NetServer> {
    serve_with_config(address, ServerConfig::default()).await
}

/// [`serve`] with an explicit configuration
pub async fn serve_with_config(address: impl ToBindOptions, config: ServerConfig) -> Result<NetServer> {
    config.validate()?;
    let options = address.to_bind_options()?;
    let listener = NetListener::bind(&options, &config).await?;
    let upgrade = Http::new(&config).with_tls(options.is_tls());
    Server::new(listener, upgrade, config)
}

/// Serve requests on `address`, handing each to `handler` on its own task
///
/// Runs until the listener fails for good. A handler that never answers a
/// request only stalls that request's connection.
pub async fn listen_and_serve<H: RequestHandler>(address: impl ToBindOptions, handler: H) -> Result<()> {
    serve(address).await?.run(handler).await
}
