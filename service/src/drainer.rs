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

//! Per-connection request drainer
//!
//! The drainer is responsible for:
//! - Pulling requests from one connection, strictly one at a time
//! - Holding back the next pull until the previous response is delivered
//! - Containing pull failures to the one connection
//! - Deregistering and closing the connection when it is done
//!
//! ```text
//! Accepted -> Pulling -> Delivered -> Pulling -> ... -> Done
//! ```

use crate::registry::{ConnectionStatus, close_tolerant};
use crate::request::Completion;
use crate::{ConnectionId, ConnectionRegistry, ConnectionState, HttpConnection, RequestContext};
use futures::stream::{self, Stream};
use std::sync::Arc;
use std::time::Instant;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Drains one connection into a stream of request contexts
pub(crate) struct ConnectionDrainer {
    id: ConnectionId,
    connection: Arc<dyn HttpConnection>,
    status: ConnectionStatus,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    in_flight: Option<(Completion, Instant)>,
    done: bool,
}

impl ConnectionDrainer {
    /// Create a drainer for a registered connection
    pub(crate) fn new(
        connection: Arc<dyn HttpConnection>,
        status: ConnectionStatus,
        registry: Arc<ConnectionRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id: connection.id(),
            connection,
            status,
            registry,
            shutdown,
            in_flight: None,
            done: false,
        }
    }

    /// Get the current state
    pub(crate) fn state(&self) -> ConnectionState {
        self.status.state()
    }

    /// Pull the next request
    ///
    /// Waits for the response to the previous request first. Returns `None`
    /// once the connection is done; the connection is then deregistered and
    /// closed.
    #[instrument(level = "debug", skip(self), fields(connection_id = %self.id))]
    pub(crate) async fn next_request(&mut self) -> Option<RequestContext> {
        if self.done {
            return None;
        }

        // Cloned so a cancelled wait keeps the request in flight
        if let Some((completion, delivered_at)) = self.in_flight.clone() {
            select! {
                _ = completion => self
                    .registry
                    .metrics()
                    .request_responded(delivered_at.elapsed()),
                _ = self.shutdown.cancelled() => {}
            }
            self.in_flight = None;
        }

        if self.is_closing() {
            debug!("Server closing, connection drained");
            self.finish();
            return None;
        }

        self.status.set_state(ConnectionState::Pulling);
        match self.connection.next_request().await {
            Ok(Some(event)) => {
                if self.is_closing() {
                    debug!("Server closing, request discarded");
                    self.finish();
                    return None;
                }
                let context = RequestContext::new(event, self.id);
                debug!(method = %context.method(), url = %context.uri(), "Request delivered");

                self.in_flight = Some((context.completion(), Instant::now()));
                self.status.request_delivered();
                self.status.set_state(ConnectionState::Delivered);
                self.registry.metrics().request_received();
                Some(context)
            }
            Ok(None) => {
                debug!("Connection ended");
                self.finish();
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to pull request, closing connection");
                self.registry.metrics().pull_error();
                self.finish();
                None
            }
        }
    }

    /// Turn the drainer into a stream of request contexts
    pub(crate) fn into_stream(self) -> impl Stream<Item = RequestContext> + Send + 'static {
        stream::unfold(self, |mut drainer| async move {
            drainer
                .next_request()
                .await
                .map(|context| (context, drainer))
        })
    }

    fn is_closing(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.in_flight = None;
        self.status.set_state(ConnectionState::Done);
        // A concurrent server close may have deregistered it already
        if self.registry.deregister(self.id).is_some() {
            close_tolerant(self.connection.as_ref());
        }
    }
}

impl Drop for ConnectionDrainer {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for ConnectionDrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDrainer")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight.is_some())
            .finish()
    }
}
