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

//! Request events as surfaced by the protocol layer
//!
//! A protocol layer turns every inbound request into a pair:
//!
//! - a [`RequestEvent`], handed to the drainer of the connection, holding the
//!   request and a single-use slot for its response;
//! - a [`PendingResponse`], kept by the protocol layer, which resolves to the
//!   response once somebody fills that slot.
//!
//! Both halves share a [`Completion`] signal. It resolves when the
//! [`CompletionGuard`] carried by the pending half is released, which the
//! protocol layer does once the response has been handed to the transport
//! (or the exchange was abandoned).

use crate::body::{Body, TrackedBody, empty};
use futures::future::{BoxFuture, FutureExt, Shared};
use http::{Request, Response, StatusCode};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// A response that may still be in the making
pub type ResponseFuture = BoxFuture<'static, Response<Body>>;

/// Signal that resolves once a response has been handed to the transport
///
/// Cloning is cheap and every clone resolves at the same time, so any number
/// of tasks may await the same exchange.
#[derive(Clone)]
pub struct Completion {
    inner: Shared<BoxFuture<'static, ()>>,
    done: Arc<AtomicBool>,
}

impl Completion {
    /// Create a completion signal and the guard that resolves it
    pub fn new() -> (Completion, CompletionGuard) {
        let (tx, rx) = oneshot::channel::<()>();
        let done = Arc::new(AtomicBool::new(false));
        let completion = Completion {
            inner: rx.map(|_| ()).boxed().shared(),
            done: done.clone(),
        };
        (completion, CompletionGuard { done, _tx: tx })
    }

    /// Check whether the signal has resolved, without waiting
    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Future for Completion {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.inner.poll_unpin(cx)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Resolves the matching [`Completion`] when released or dropped
pub struct CompletionGuard {
    done: Arc<AtomicBool>,
    _tx: oneshot::Sender<()>,
}

impl CompletionGuard {
    /// Resolve the completion signal now
    pub fn complete(self) {}
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Release);
    }
}

impl fmt::Debug for CompletionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionGuard").finish_non_exhaustive()
    }
}

/// One inbound request plus the means to answer it exactly once
pub struct RequestEvent {
    pub(crate) request: Request<Body>,
    pub(crate) responder: oneshot::Sender<ResponseFuture>,
    pub(crate) completion: Completion,
}

impl RequestEvent {
    /// Create a request event and the pending response the protocol layer
    /// waits on
    pub fn new(request: Request<Body>) -> (Self, PendingResponse) {
        let (responder, response) = oneshot::channel();
        let (completion, guard) = Completion::new();
        let event = Self {
            request,
            responder,
            completion,
        };
        (event, PendingResponse { response, guard })
    }

    /// The request
    pub fn request(&self) -> &Request<Body> {
        &self.request
    }

    /// Signal that resolves once the response has reached the transport
    pub fn completion(&self) -> Completion {
        self.completion.clone()
    }

    /// Answer the request, consuming the event
    pub fn respond_with(self, response: Response<Body>) -> Completion {
        let _ = self.responder.send(Box::pin(async move { response }));
        self.completion
    }
}

impl fmt::Debug for RequestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestEvent")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .finish_non_exhaustive()
    }
}

/// The protocol side of a [`RequestEvent`]
pub struct PendingResponse {
    response: oneshot::Receiver<ResponseFuture>,
    guard: CompletionGuard,
}

impl PendingResponse {
    /// Wait for the consumer's response
    ///
    /// Returns `None` when the request was dropped without an answer. The
    /// returned guard resolves the completion signal once released.
    pub async fn wait(self) -> (Option<Response<Body>>, CompletionGuard) {
        let response = match self.response.await {
            Ok(response) => Some(response.await),
            Err(_) => None,
        };
        (response, self.guard)
    }

    /// Wait for the consumer's response and tie completion to its body
    ///
    /// A request dropped without an answer is turned into an empty
    /// `500 Internal Server Error`.
    pub async fn into_response(self) -> Response<TrackedBody> {
        let (response, guard) = self.wait().await;
        let response = response.unwrap_or_else(|| {
            tracing::debug!("Request dropped without a response");
            let mut response = Response::new(empty());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        });
        response.map(|body| TrackedBody::new(body, guard))
    }
}

impl fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponse").finish_non_exhaustive()
    }
}
