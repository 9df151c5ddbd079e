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

//! In-memory listener, connections and clients for server tests
//!
//! A [`MockListener`] accepts whatever its [`ListenerControl`] feeds it. Each
//! accepted [`MockStream`] is upgraded by [`MockUpgrade`] into a
//! [`MockConnection`] whose requests are sent by the matching
//! [`MockClient`]. A client plays the transport: it waits for the response
//! to each request and consumes its body, which is what completes the
//! exchange.
//!
//! Everything observable is written to a shared [`Journal`].

#![allow(dead_code)]

use async_trait::async_trait;
use http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use httpmux_service::{
    AcceptError, ConnectionId, HttpConnection, Listener, RequestEvent, Result, Server,
    ServerConfig, ServerError, Upgrade, empty, full,
};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::select;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Default timeout for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(2);

/// Shared record of listener and connection activity
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<StdMutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| e.as_str() == entry).count()
    }
}

type Accepted = std::result::Result<(MockStream, SocketAddr), AcceptError>;

/// Listener accepting scripted connections
pub struct MockListener {
    incoming: Mutex<mpsc::UnboundedReceiver<Accepted>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    journal: Journal,
}

/// Feeds a [`MockListener`]
#[derive(Clone)]
pub struct ListenerControl {
    tx: mpsc::UnboundedSender<Accepted>,
    next_port: Arc<AtomicU16>,
}

impl MockListener {
    pub fn new(journal: Journal) -> (Self, ListenerControl) {
        let (tx, incoming) = mpsc::unbounded_channel();
        let listener = Self {
            incoming: Mutex::new(incoming),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            journal,
        };
        let control = ListenerControl {
            tx,
            next_port: Arc::new(AtomicU16::new(50_000)),
        };
        (listener, control)
    }
}

#[async_trait]
impl Listener for MockListener {
    type Stream = MockStream;

    async fn accept(&self) -> Accepted {
        let mut incoming = self.incoming.lock().await;
        let next = select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            next = incoming.recv() => next,
        };
        match next {
            Some(accepted) => {
                if let Ok((_, peer_addr)) = &accepted {
                    self.journal.record(format!("accept {peer_addr}"));
                }
                accepted
            }
            None => {
                self.shutdown.cancelled().await;
                Err(AcceptError::Closed)
            }
        }
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyClosed);
        }
        self.shutdown.cancel();
        self.journal.record("close listener");
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok("127.0.0.1:4505".parse().expect("valid address"))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ListenerControl {
    /// Open a new client connection
    pub fn connect(&self) -> MockClient {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        let peer_addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("valid address");
        let (tx, rx) = mpsc::unbounded_channel();
        let (responses_tx, responses) = mpsc::unbounded_channel();
        let _ = self.tx.send(Ok((MockStream { requests: rx }, peer_addr)));
        MockClient {
            peer_addr,
            tx,
            responses_tx,
            responses,
        }
    }

    /// Make the next accept fail
    pub fn fail(&self, kind: io::ErrorKind) {
        let _ = self.tx.send(Err(AcceptError::Io(kind.into())));
    }
}

/// Raw accepted stream: the request side of a client
pub struct MockStream {
    requests: mpsc::UnboundedReceiver<Result<RequestEvent>>,
}

/// Test client speaking through a [`MockStream`]
pub struct MockClient {
    pub peer_addr: SocketAddr,
    tx: mpsc::UnboundedSender<Result<RequestEvent>>,
    responses_tx: mpsc::UnboundedSender<(StatusCode, String)>,
    responses: mpsc::UnboundedReceiver<(StatusCode, String)>,
}

impl MockClient {
    /// Send a request; its response is collected in the background
    pub fn request(&self, method: Method, path: &str) -> bool {
        self.request_with_body(method, path, "")
    }

    /// Send a request carrying a body
    pub fn request_with_body(&self, method: Method, path: &str, body: &'static str) -> bool {
        let request = Request::builder()
            .method(method)
            .uri(format!("http://localhost:4505{path}"))
            .body(if body.is_empty() { empty() } else { full(body) })
            .expect("valid request");
        let (event, pending) = RequestEvent::new(request);
        if self.tx.send(Ok(event)).is_err() {
            return false;
        }

        let responses = self.responses_tx.clone();
        tokio::spawn(async move {
            let response = pending.into_response().await;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map(|collected| String::from_utf8_lossy(&collected.to_bytes()).into_owned())
                .unwrap_or_default();
            let _ = responses.send((status, body));
        });
        true
    }

    /// Make the next pull on this connection fail
    pub fn fail(&self, message: &'static str) {
        let _ = self.tx.send(Err(ServerError::ConnectionPull {
            id: ConnectionId::new(0),
            source: message.into(),
        }));
    }

    /// Wait for the next response
    pub async fn response(&mut self) -> (StatusCode, String) {
        tokio::time::timeout(WAIT, self.responses.recv())
            .await
            .expect("response in time")
            .expect("response channel open")
    }

    /// Check that no response arrives within `wait`
    pub async fn no_response(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.responses.recv()).await.is_err()
    }

    /// Check whether the server side dropped the connection
    pub fn is_dropped(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Runs once, in the middle of the next upgrade
type UpgradeHook = Box<dyn FnOnce() + Send>;

/// Upgrade for [`MockStream`]s
#[derive(Clone, Default)]
pub struct MockUpgrade {
    journal: Journal,
    hook: Arc<StdMutex<Option<UpgradeHook>>>,
}

impl MockUpgrade {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            hook: Arc::default(),
        }
    }

    /// Run `hook` during the next upgrade, before the connection is registered
    pub fn on_next_upgrade(&self, hook: impl FnOnce() + Send + 'static) {
        *self
            .hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Box::new(hook));
    }
}

impl Upgrade<MockStream> for MockUpgrade {
    fn upgrade(
        &self,
        stream: MockStream,
        id: ConnectionId,
        _peer_addr: SocketAddr,
    ) -> Result<Arc<dyn HttpConnection>> {
        let hook = self
            .hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(Arc::new(MockConnection {
            id,
            requests: Mutex::new(stream.requests),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            journal: self.journal.clone(),
        }))
    }
}

/// Connection pulling requests sent by a [`MockClient`]
pub struct MockConnection {
    id: ConnectionId,
    requests: Mutex<mpsc::UnboundedReceiver<Result<RequestEvent>>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    journal: Journal,
}

#[async_trait]
impl HttpConnection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn next_request(&self) -> Result<Option<RequestEvent>> {
        self.journal.record(format!("pull {}", self.id));
        let mut requests = self.requests.lock().await;
        select! {
            biased;
            _ = self.shutdown.cancelled() => Ok(None),
            next = requests.recv() => next.transpose(),
        }
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyClosed);
        }
        self.shutdown.cancel();
        self.journal.record(format!("close {}", self.id));
        Ok(())
    }
}

/// Server over a mock listener
pub type MockServer = Server<MockListener, MockUpgrade>;

/// Build a mock server with the given configuration
pub fn mock_server(config: ServerConfig) -> (MockServer, ListenerControl, Journal) {
    let (server, control, journal, _upgrade) = mock_server_with_upgrade(config);
    (server, control, journal)
}

/// [`mock_server`], also handing back the server's upgrade
pub fn mock_server_with_upgrade(
    config: ServerConfig,
) -> (MockServer, ListenerControl, Journal, MockUpgrade) {
    let journal = Journal::default();
    let (listener, control) = MockListener::new(journal.clone());
    let upgrade = MockUpgrade::new(journal.clone());
    let server = Server::new(listener, upgrade.clone(), config).expect("valid configuration");
    (server, control, journal, upgrade)
}
