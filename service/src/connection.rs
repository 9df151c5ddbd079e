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

//! Request-capable connections
//!
//! An accepted transport stream becomes an [`HttpConnection`] through an
//! [`Upgrade`]. The connection exposes a sequential pull of
//! [`RequestEvent`]s and a close operation; everything below that (framing,
//! keep-alive, HTTP/2 streams) belongs to the protocol layer.
//!
//! [`Http`] is the hyper-backed upgrade used by [`serve`](crate::serve). It
//! drives each connection on its own task and queues request events for the
//! drainer.

use crate::body::boxed;
use crate::{ConnectionId, RequestEvent, Result, ServerConfig, ServerError};
use async_trait::async_trait;
use http::header::HOST;
use http::{HeaderMap, Request, Uri};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::select;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

/// A connection that yields requests one after another
#[async_trait]
pub trait HttpConnection: Send + Sync + 'static {
    /// Connection ID
    fn id(&self) -> ConnectionId;

    /// Pull the next request
    ///
    /// Returns `Ok(None)` once the connection has ended cleanly. Any error
    /// ends the connection as well.
    async fn next_request(&self) -> Result<Option<RequestEvent>>;

    /// Close the connection
    ///
    /// Fails with [`ServerError::AlreadyClosed`] when called a second time.
    fn close(&self) -> Result<()>;
}

/// Turns an accepted transport stream into an [`HttpConnection`]
pub trait Upgrade<S>: Send + Sync + 'static {
    /// Upgrade `stream`, accepted from `peer_addr`, under the given ID
    fn upgrade(
        &self,
        stream: S,
        id: ConnectionId,
        peer_addr: SocketAddr,
    ) -> Result<Arc<dyn HttpConnection>>;
}

/// Hyper-backed HTTP/1.1 and HTTP/2 upgrade
#[derive(Debug, Clone)]
pub struct Http {
    keep_alive: bool,
    http2: bool,
    request_buffer: usize,
    scheme: &'static str,
}

impl Http {
    /// Create an upgrade using the protocol settings of `config`
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            keep_alive: config.keep_alive,
            http2: config.http2,
            request_buffer: config.request_buffer.max(1),
            scheme: "http",
        }
    }

    /// Mark upgraded connections as carried over TLS
    ///
    /// Only affects the scheme of rewritten request URLs.
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.scheme = if tls { "https" } else { "http" };
        self
    }
}

impl Default for Http {
    fn default() -> Self {
        Self::new(&ServerConfig::default())
    }
}

impl<S> Upgrade<S> for Http
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn upgrade(
        &self,
        stream: S,
        id: ConnectionId,
        peer_addr: SocketAddr,
    ) -> Result<Arc<dyn HttpConnection>> {
        let (tx, rx) = mpsc::channel(self.request_buffer);
        let shutdown = CancellationToken::new();

        tokio::spawn(drive_connection(
            stream,
            id,
            self.clone(),
            tx,
            shutdown.clone(),
        ));

        Ok(Arc::new(HyperConnection {
            id,
            peer_addr,
            requests: Mutex::new(rx),
            shutdown,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Connection served by hyper on a background task
pub struct HyperConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    requests: Mutex<mpsc::Receiver<Result<RequestEvent>>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl HyperConnection {
    /// Peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Check if the connection has been closed by the server
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl HttpConnection for HyperConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn next_request(&self) -> Result<Option<RequestEvent>> {
        let mut requests = self.requests.lock().await;
        select! {
            _ = self.shutdown.cancelled() => Ok(None),
            next = requests.recv() => next.transpose(),
        }
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ServerError::AlreadyClosed);
        }
        self.shutdown.cancel();
        Ok(())
    }
}

impl std::fmt::Debug for HyperConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperConnection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Serve one connection until the peer hangs up or the server closes it
#[instrument(level = "debug", skip_all, fields(connection_id = %id))]
async fn drive_connection<S>(
    stream: S,
    id: ConnectionId,
    settings: Http,
    tx: mpsc::Sender<Result<RequestEvent>>,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let scheme = settings.scheme;
    let events = tx.clone();
    let service = service_fn(move |request: Request<Incoming>| {
        let events = events.clone();
        async move {
            let request = into_request(request, scheme);
            trace!(method = %request.method(), uri = %request.uri(), "Request received");
            let (event, pending) = RequestEvent::new(request);
            // A failed send drops the event, which answers with a 500
            let _ = events.send(Ok(event)).await;
            Ok::<_, Infallible>(pending.into_response().await)
        }
    });

    let mut builder = auto::Builder::new(TokioExecutor::new());
    if !settings.http2 {
        builder = builder.http1_only();
    }
    builder.http1().keep_alive(settings.keep_alive);

    let connection = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    select! {
        result = connection.as_mut() => match result {
            Ok(()) => debug!("Connection ended by peer"),
            Err(source) => {
                let _ = tx.send(Err(ServerError::ConnectionPull { id, source })).await;
            }
        },
        _ = shutdown.cancelled() => debug!("Connection closed by server"),
    }
}

/// Box the body and give the request an absolute URI
fn into_request(request: Request<Incoming>, scheme: &str) -> Request<crate::Body> {
    let (mut parts, body) = request.into_parts();
    if let Some(uri) = absolute_uri(&parts.uri, &parts.headers, scheme) {
        parts.uri = uri;
    }
    Request::from_parts(parts, boxed(body))
}

/// Rebuild an origin-form URI as `scheme://host/path?query`
fn absolute_uri(uri: &Uri, headers: &HeaderMap, scheme: &str) -> Option<Uri> {
    if uri.scheme().is_some() {
        return None;
    }
    let host = headers
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))?;
    let path = uri.path_and_query().map_or("/", |path| path.as_str());
    format!("{scheme}://{host}{path}").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::full;
    use http::{Response, StatusCode};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    fn headers(host: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, host.parse().unwrap());
        headers
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_absolute_uri_from_host_header() {
        let uri: Uri = "/items?x=1".parse().unwrap();
        let absolute = absolute_uri(&uri, &headers("localhost:4505"), "http").unwrap();
        assert_eq!(absolute.to_string(), "http://localhost:4505/items?x=1");
    }

    #[test]
    fn test_absolute_uri_keeps_absolute_form() {
        let uri: Uri = "https://example.com/a".parse().unwrap();
        assert!(absolute_uri(&uri, &headers("other"), "http").is_none());
    }

    #[test]
    fn test_absolute_uri_without_host() {
        let uri: Uri = "/".parse().unwrap();
        assert!(absolute_uri(&uri, &HeaderMap::new(), "http").is_none());
    }

    #[test]
    fn test_https_scheme() {
        let uri: Uri = "/".parse().unwrap();
        let absolute = absolute_uri(&uri, &headers("example.com"), "https").unwrap();
        assert_eq!(absolute.to_string(), "https://example.com/");
    }

    #[tokio::test]
    async fn test_hyper_connection_round_trip() {
        let (client, server) = duplex(4096);
        let http = Http::default();
        let connection = http.upgrade(server, ConnectionId::new(1), peer()).unwrap();

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write
            .write_all(b"POST /echo HTTP/1.1\r\nHost: test\r\nContent-Length: 4\r\n\r\nping")
            .await
            .unwrap();

        let event = connection.next_request().await.unwrap().unwrap();
        assert_eq!(event.request().uri().to_string(), "http://test/echo");
        assert_eq!(event.request().method(), http::Method::POST);

        let mut context = crate::RequestContext::new(event, connection.id());
        let payload = context.take_body().collect().await.unwrap().to_bytes();
        assert_eq!(&payload[..], b"ping");

        let mut response = Response::new(full("pong"));
        *response.status_mut() = StatusCode::CREATED;
        let completion = context.respond_with(response).unwrap();
        tokio::time::timeout(Duration::from_secs(1), completion)
            .await
            .unwrap();

        let mut received = Vec::new();
        let mut buffer = [0u8; 1024];
        while !received.ends_with(b"pong") {
            let read = client_read.read(&mut buffer).await.unwrap();
            assert!(read > 0, "connection closed early");
            received.extend_from_slice(&buffer[..read]);
        }
        let text = String::from_utf8_lossy(&received);
        assert!(text.starts_with("HTTP/1.1 201"), "{text}");

        connection.close().unwrap();
        assert!(matches!(connection.close(), Err(ServerError::AlreadyClosed)));
        assert!(connection.next_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_http2_streams_are_pulled_one_at_a_time() {
        let (client, server) = duplex(64 * 1024);
        let connection = Http::default()
            .upgrade(server, ConnectionId::new(3), peer())
            .unwrap();

        let (sender, driver) =
            hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(client))
                .await
                .unwrap();
        tokio::spawn(driver);

        let exchanges = ["/first", "/second"].map(|path| {
            let mut sender = sender.clone();
            tokio::spawn(async move {
                let request = Request::get(format!("http://test{path}"))
                    .body(crate::body::empty())
                    .unwrap();
                let response = sender.send_request(request).await.unwrap();
                let status = response.status();
                let body = response.into_body().collect().await.unwrap().to_bytes();
                (status, body)
            })
        });

        let mut paths = Vec::new();
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(1), connection.next_request())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            let context = crate::RequestContext::new(event, connection.id());
            assert_eq!(context.version(), http::Version::HTTP_2);
            assert_eq!(context.connection_id(), ConnectionId::new(3));
            let path = context.uri().path().to_string();
            context.respond_with(Response::new(full(path.clone()))).unwrap();
            paths.push(path);
        }
        paths.sort();
        assert_eq!(paths, ["/first", "/second"]);

        for (exchange, path) in exchanges.into_iter().zip(["/first", "/second"]) {
            let (status, body) = exchange.await.unwrap();
            assert_eq!(status, StatusCode::OK);
            assert_eq!(&body[..], path.as_bytes());
        }
        connection.close().unwrap();
    }

    #[tokio::test]
    async fn test_peer_hangup_ends_connection() {
        let (client, server) = duplex(1024);
        let connection = Http::default()
            .upgrade(server, ConnectionId::new(2), peer())
            .unwrap();
        drop(client);
        let next = tokio::time::timeout(Duration::from_secs(1), connection.next_request())
            .await
            .unwrap();
        assert!(matches!(next, Ok(None) | Err(_)));
    }
}
