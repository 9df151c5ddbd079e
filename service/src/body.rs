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

//! Request and response bodies

use crate::error::BoxError;
use crate::request::CompletionGuard;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

/// Body type used for both requests and responses
pub type Body = BoxBody<Bytes, BoxError>;

/// Create a body holding the given bytes
pub fn full(data: impl Into<Bytes>) -> Body {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Create an empty body
pub fn empty() -> Body {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Box any compatible body
pub fn boxed<B>(body: B) -> Body
where
    B: HttpBody<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed()
}

pin_project! {
    /// Response body that releases a completion guard once the transport is
    /// done with it
    ///
    /// The guard is released when the body reaches its end, fails, or is
    /// dropped by the protocol layer, whichever comes first.
    pub struct TrackedBody {
        #[pin]
        inner: Body,
        guard: Option<CompletionGuard>,
    }
}

impl TrackedBody {
    /// Wrap a body so that `guard` is released when it is consumed
    pub fn new(inner: Body, guard: CompletionGuard) -> Self {
        Self {
            inner,
            guard: Some(guard),
        }
    }
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let frame = ready!(this.inner.poll_frame(cx));
        if !matches!(frame, Some(Ok(_))) {
            this.guard.take();
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Completion;

    #[tokio::test]
    async fn test_full_body_collects() {
        let bytes = full("hello").collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn test_empty_body_is_end_stream() {
        let body = empty();
        assert!(body.is_end_stream());
        assert!(body.collect().await.unwrap().to_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_tracked_body_releases_on_end() {
        let (completion, guard) = Completion::new();
        let body = TrackedBody::new(full("payload"), guard);

        assert!(!completion.is_complete());
        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"payload");

        completion.clone().await;
        assert!(completion.is_complete());
    }

    #[tokio::test]
    async fn test_tracked_body_releases_on_drop() {
        let (completion, guard) = Completion::new();
        let body = TrackedBody::new(full("unsent"), guard);
        drop(body);
        completion.await;
    }
}
