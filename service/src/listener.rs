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

//! Listening sockets

use crate::{AcceptError, BindOptions, Result, ServerConfig, ServerError};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Source of accepted transport connections
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Transport stream produced by [`accept`](Self::accept)
    type Stream: Send + 'static;

    /// Accept the next connection
    ///
    /// Returns [`AcceptError::Closed`] once the listener has been closed.
    async fn accept(&self) -> std::result::Result<(Self::Stream, SocketAddr), AcceptError>;

    /// Close the listener
    ///
    /// Fails with [`ServerError::AlreadyClosed`] when called a second time.
    /// A pending [`accept`](Self::accept) returns [`AcceptError::Closed`].
    fn close(&self) -> Result<()>;

    /// Address the listener is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Check if the listener has been closed
    fn is_closed(&self) -> bool;
}

/// Outcome of a handshake running in the background
type Handshake = (io::Result<NetStream>, SocketAddr);

/// Socket plus the handshakes still in progress
struct AcceptState {
    listener: Option<TcpListener>,
    handshakes: JoinSet<Handshake>,
}

impl AcceptState {
    fn new(listener: TcpListener) -> Self {
        Self {
            listener: Some(listener),
            handshakes: JoinSet::new(),
        }
    }

    fn shut_down(&mut self) {
        self.listener.take();
        self.handshakes.abort_all();
    }
}

/// What woke a pending accept
enum Wakeup {
    Closed,
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Handshaken(std::result::Result<Handshake, JoinError>),
}

/// TCP listener, optionally terminating TLS
///
/// TLS handshakes run on their own tasks. A client that connects and then
/// stalls only delays itself; `accept` returns whichever handshake finishes
/// first.
pub struct NetListener {
    state: Mutex<AcceptState>,
    local_addr: SocketAddr,
    closed: AtomicBool,
    shutdown: CancellationToken,
    #[cfg(feature = "tls")]
    tls: Option<tokio_rustls::TlsAcceptor>,
    handshake_timeout: Duration,
}

impl NetListener {
    /// Bind a listener as described by `options`
    pub async fn bind(options: &BindOptions, config: &ServerConfig) -> Result<Self> {
        #[cfg(feature = "tls")]
        let tls = match options {
            BindOptions::Http(_) => None,
            BindOptions::Https(tls) => Some(crate::tls::build_acceptor(tls)?),
        };
        #[cfg(not(feature = "tls"))]
        if options.is_tls() {
            return Err(ServerError::UnsupportedPlatform(
                "TLS listeners require the `tls` feature".to_string(),
            ));
        }

        let listen = options.listen();
        let listener = TcpListener::bind((listen.hostname.as_str(), listen.port)).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, tls = options.is_tls(), "Listener bound");

        Ok(Self {
            state: Mutex::new(AcceptState::new(listener)),
            local_addr,
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            #[cfg(feature = "tls")]
            tls,
            handshake_timeout: config.handshake_timeout,
        })
    }

    /// Wrap an already bound plain TCP listener
    pub fn from_tcp(listener: TcpListener) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        Ok(Self {
            state: Mutex::new(AcceptState::new(listener)),
            local_addr,
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            #[cfg(feature = "tls")]
            tls: None,
            handshake_timeout: ServerConfig::default().handshake_timeout,
        })
    }

    /// Check if accepted connections are TLS
    pub fn is_tls(&self) -> bool {
        #[cfg(feature = "tls")]
        {
            self.tls.is_some()
        }
        #[cfg(not(feature = "tls"))]
        {
            false
        }
    }

    /// Hand a plain stream back at once, or start its TLS handshake
    #[cfg(feature = "tls")]
    fn start_handshake(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        handshakes: &mut JoinSet<Handshake>,
    ) -> Option<NetStream> {
        let Some(acceptor) = self.tls.clone() else {
            return Some(NetStream::Plain(stream));
        };
        let handshake_timeout = self.handshake_timeout;
        tracing::trace!(%peer_addr, "TLS handshake started");
        handshakes.spawn(async move {
            let handshake = tokio::time::timeout(handshake_timeout, acceptor.accept(stream));
            let result = match handshake.await {
                Ok(Ok(stream)) => Ok(NetStream::Tls(Box::new(stream))),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "TLS handshake timed out",
                )),
            };
            (result, peer_addr)
        });
        None
    }

    #[cfg(not(feature = "tls"))]
    fn start_handshake(
        &self,
        stream: TcpStream,
        _peer_addr: SocketAddr,
        _handshakes: &mut JoinSet<Handshake>,
    ) -> Option<NetStream> {
        let _ = self.handshake_timeout;
        Some(NetStream::Plain(stream))
    }
}

#[async_trait]
impl Listener for NetListener {
    type Stream = NetStream;

    async fn accept(&self) -> std::result::Result<(NetStream, SocketAddr), AcceptError> {
        let mut state = select! {
            _ = self.shutdown.cancelled() => return Err(AcceptError::Closed),
            state = self.state.lock() => state,
        };

        loop {
            if self.shutdown.is_cancelled() {
                state.shut_down();
                return Err(AcceptError::Closed);
            }
            let AcceptState {
                listener,
                handshakes,
            } = &mut *state;
            let Some(listener) = listener.as_ref() else {
                return Err(AcceptError::Closed);
            };

            let wakeup = select! {
                _ = self.shutdown.cancelled() => Wakeup::Closed,
                Some(joined) = handshakes.join_next() => Wakeup::Handshaken(joined),
                accepted = listener.accept() => Wakeup::Accepted(accepted),
            };

            match wakeup {
                Wakeup::Closed => continue,
                Wakeup::Handshaken(joined) => {
                    let (result, peer_addr) = joined.map_err(|e| {
                        io::Error::new(io::ErrorKind::ConnectionAborted, e)
                    })?;
                    return Ok((result?, peer_addr));
                }
                Wakeup::Accepted(accepted) => {
                    let (stream, peer_addr) = accepted?;
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer_addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    if let Some(stream) = self.start_handshake(stream, peer_addr, handshakes) {
                        return Ok((stream, peer_addr));
                    }
                }
            }
        }
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ServerError::AlreadyClosed);
        }
        self.shutdown.cancel();
        // A pending accept holds the lock and drops the socket itself
        if let Ok(mut state) = self.state.try_lock() {
            state.shut_down();
        }
        debug!(local_addr = %self.local_addr, "Listener closed");
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for NetListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetListener")
            .field("local_addr", &self.local_addr)
            .field("tls", &self.is_tls())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Stream accepted by a [`NetListener`]
pub enum NetStream {
    /// Plain TCP
    Plain(TcpStream),
    /// TLS over TCP
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl NetStream {
    /// Negotiated ALPN protocol, if any
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        match self {
            NetStream::Plain(_) => None,
            #[cfg(feature = "tls")]
            NetStream::Tls(stream) => stream.get_ref().1.alpn_protocol(),
        }
    }
}

impl AsyncRead for NetStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            NetStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            NetStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            NetStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            NetStream::Plain(stream) => Pin::new(stream).poll_write_vectored(cx, bufs),
            #[cfg(feature = "tls")]
            NetStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            NetStream::Plain(stream) => stream.is_write_vectored(),
            #[cfg(feature = "tls")]
            NetStream::Tls(stream) => stream.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "tls")]
            NetStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            NetStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
