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

//! Consumer-facing request context

use crate::body::{Body, empty};
use crate::request::{Completion, RequestEvent, ResponseFuture};
use crate::{ConnectionId, Result, ServerError};
use http::{HeaderMap, Method, Request, Response, Uri, Version};
use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// One inbound request handed to the consumer
///
/// The context owns the request and a single-use slot for its response.
/// Answering it with [`respond_with`](Self::respond_with) or
/// [`respond_with_future`](Self::respond_with_future) lets the connection it
/// came from move on to its next request. Until then no further request is
/// pulled from that connection.
///
/// Dropping a context without answering it sends an empty
/// `500 Internal Server Error`.
///
/// # Example
///
/// ```no_run
/// use futures::StreamExt;
/// use http::Response;
/// use httpmux_service::{full, serve};
///
/// # async fn run() -> httpmux_service::Result<()> {
/// let mut server = serve(":8000").await?;
/// while let Some(request) = server.next().await {
///     let request = request?;
///     let body = format!("{}: {}", request.method(), request.url());
///     request.respond_with(Response::new(full(body)))?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct RequestContext {
    request: Request<Body>,
    connection_id: ConnectionId,
    responder: Mutex<Option<oneshot::Sender<ResponseFuture>>>,
    completion: Completion,
}

impl RequestContext {
    /// Wrap a request event pulled from the given connection
    pub fn new(event: RequestEvent, connection_id: ConnectionId) -> Self {
        let RequestEvent {
            request,
            responder,
            completion,
        } = event;
        Self {
            request,
            connection_id,
            responder: Mutex::new(Some(responder)),
            completion,
        }
    }

    /// The wrapped request
    pub fn request(&self) -> &Request<Body> {
        &self.request
    }

    /// Mutable access to the wrapped request
    pub fn request_mut(&mut self) -> &mut Request<Body> {
        &mut self.request
    }

    /// The absolute request URL
    pub fn url(&self) -> String {
        self.request.uri().to_string()
    }

    /// The request URI
    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    /// The request method
    pub fn method(&self) -> &Method {
        self.request.method()
    }

    /// The request headers
    pub fn headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    /// The HTTP version the request arrived with
    pub fn version(&self) -> Version {
        self.request.version()
    }

    /// Take the request body, leaving an empty one behind
    pub fn take_body(&mut self) -> Body {
        std::mem::replace(self.request.body_mut(), empty())
    }

    /// Connection the request arrived on
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Check whether a response has been delivered
    pub fn is_responded(&self) -> bool {
        self.lock_responder().is_none()
    }

    /// Deliver the response
    ///
    /// Returns a [`Completion`] that resolves once the response has been
    /// handed to the transport. Fails with
    /// [`ServerError::ResponseAlreadySent`] if a response was already
    /// delivered.
    pub fn respond_with(&self, response: Response<Body>) -> Result<Completion> {
        self.deliver(Box::pin(async move { response }))
    }

    /// Deliver a response that is still being produced
    ///
    /// The connection is held until `response` resolves and has been handed
    /// to the transport.
    pub fn respond_with_future<F>(&self, response: F) -> Result<Completion>
    where
        F: Future<Output = Response<Body>> + Send + 'static,
    {
        self.deliver(Box::pin(response))
    }

    /// Signal that resolves once the response has been handed to the
    /// transport
    pub fn completion(&self) -> Completion {
        self.completion.clone()
    }

    /// Wait until the response has been handed to the transport
    pub async fn done(&self) {
        self.completion.clone().await
    }

    fn deliver(&self, response: ResponseFuture) -> Result<Completion> {
        let responder = self
            .lock_responder()
            .take()
            .ok_or(ServerError::ResponseAlreadySent)?;
        if responder.send(response).is_err() {
            tracing::debug!(
                connection_id = %self.connection_id,
                "Response delivered after the exchange was abandoned"
            );
        }
        Ok(self.completion.clone())
    }

    fn lock_responder(&self) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<ResponseFuture>>> {
        self.responder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("connection_id", &self.connection_id)
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("responded", &self.is_responded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::full;
    use crate::request::PendingResponse;
    use http::StatusCode;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::time::Duration;

    fn context(method: Method, uri: &str, body: &'static str) -> (RequestContext, PendingResponse) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-test", "yes")
            .body(full(body))
            .unwrap();
        let (event, pending) = RequestEvent::new(request);
        (RequestContext::new(event, ConnectionId::new(7)), pending)
    }

    #[test]
    fn test_accessors() {
        let (ctx, _pending) = context(Method::POST, "http://localhost:4505/items?x=1", "");
        assert_eq!(ctx.method(), Method::POST);
        assert_eq!(ctx.url(), "http://localhost:4505/items?x=1");
        assert_eq!(ctx.uri().path(), "/items");
        assert_eq!(ctx.headers()["x-test"], "yes");
        assert_eq!(ctx.connection_id(), ConnectionId::new(7));
        assert!(!ctx.is_responded());
    }

    #[tokio::test]
    async fn test_take_body() {
        let (mut ctx, _pending) = context(Method::PUT, "http://localhost/", "payload");
        let body = ctx.take_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"payload");
        let rest = ctx.take_body().collect().await.unwrap().to_bytes();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_respond_once() {
        let (ctx, pending) = context(Method::GET, "http://localhost/", "");
        let completion = ctx
            .respond_with(Response::new(full("first")))
            .unwrap();
        assert!(ctx.is_responded());

        let second = ctx.respond_with(Response::new(full("second")));
        assert!(matches!(second, Err(ServerError::ResponseAlreadySent)));

        let response = pending.into_response().await;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"first");
        completion.await;
    }

    #[tokio::test]
    async fn test_second_respond_leaves_completion_alone() {
        let (ctx, pending) = context(Method::GET, "http://localhost/", "");
        let completion = ctx.respond_with(Response::new(empty())).unwrap();
        drop(pending.into_response().await);
        completion.clone().await;

        assert!(ctx.respond_with(Response::new(empty())).is_err());
        assert!(completion.is_complete());
        assert!(ctx.completion().is_complete());
    }

    #[tokio::test]
    async fn test_completion_waits_for_response() {
        let (ctx, pending) = context(Method::GET, "http://localhost/", "");
        let completion = ctx.completion();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!completion.is_complete());

        ctx.respond_with(Response::new(empty())).unwrap();
        let (response, guard) = pending.wait().await;
        assert!(response.is_some());
        assert!(!completion.is_complete());

        drop(guard);
        ctx.done().await;
        assert!(completion.is_complete());
    }

    #[tokio::test]
    async fn test_respond_with_future() {
        let (ctx, pending) = context(Method::GET, "http://localhost/", "");
        ctx.respond_with_future(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let mut response = Response::new(full("late"));
            *response.status_mut() = StatusCode::ACCEPTED;
            response
        })
        .unwrap();

        let response = pending.into_response().await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_concurrent_respond_only_one_wins() {
        let (ctx, _pending) = context(Method::GET, "http://localhost/", "");
        let ctx = Arc::new(ctx);
        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let ctx = ctx.clone();
                tokio::spawn(async move { ctx.respond_with(Response::new(empty())).is_ok() })
            })
            .collect();

        let mut succeeded = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                succeeded += 1;
            }
        }
        assert_eq!(succeeded, 1);
    }

    #[tokio::test]
    async fn test_dropped_context_answers_internal_error() {
        let (ctx, pending) = context(Method::GET, "http://localhost/", "");
        drop(ctx);
        let response = pending.into_response().await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
