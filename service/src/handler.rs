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

//! Request handler trait for [`listen_and_serve`](crate::listen_and_serve)

use crate::RequestContext;
use async_trait::async_trait;
use std::future::Future;

/// Request handler
///
/// Each request is handled on its own task; the handler answers through
/// the context it is given. Async closures taking a [`RequestContext`]
/// implement this trait directly.
///
/// # Example
///
/// ```no_run
/// use async_trait::async_trait;
/// use http::Response;
/// use httpmux_service::{RequestContext, RequestHandler, full};
///
/// struct Hello;
///
/// #[async_trait]
/// impl RequestHandler for Hello {
///     async fn handle(&self, request: RequestContext) {
///         let _ = request.respond_with(Response::new(full("hello")));
///     }
/// }
/// ```
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle one request
    async fn handle(&self, request: RequestContext);
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, request: RequestContext) {
        (self)(request).await
    }
}
