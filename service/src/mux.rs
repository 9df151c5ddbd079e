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

//! Fan-in over a growing set of streams
//!
//! [`Multiplexer`] merges any number of streams into one, yielding whichever
//! item is ready first. Sources can be added through a [`MuxHandle`] while
//! the merged stream is being consumed; the multiplexer ends once every
//! handle is gone and every source is exhausted.
//!
//! ```text
//! MuxHandle::add ──► channel ──┐
//!                              ▼
//!          source, source, ... SelectAll ──► Multiplexer::poll_next
//! ```

use futures::stream::{BoxStream, FusedStream, SelectAll, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Merges a dynamically growing set of streams into one
pub struct Multiplexer<T> {
    sources: SelectAll<BoxStream<'static, T>>,
    incoming: mpsc::UnboundedReceiver<BoxStream<'static, T>>,
    incoming_closed: bool,
    terminated: bool,
}

/// Adds sources to a running [`Multiplexer`]
pub struct MuxHandle<T> {
    tx: mpsc::UnboundedSender<BoxStream<'static, T>>,
}

impl<T: Send + 'static> Multiplexer<T> {
    /// Create an empty multiplexer and the handle that feeds it
    pub fn new() -> (Self, MuxHandle<T>) {
        let (tx, incoming) = mpsc::unbounded_channel();
        let mux = Self {
            sources: SelectAll::new(),
            incoming,
            incoming_closed: false,
            terminated: false,
        };
        (mux, MuxHandle { tx })
    }

    /// Add a source directly
    pub fn push<S>(&mut self, source: S)
    where
        S: Stream<Item = T> + Send + 'static,
    {
        self.sources.push(source.boxed());
    }

    /// Number of sources currently being polled
    ///
    /// Sources still queued in the handle channel are not counted.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if no source is currently being polled
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    fn drain_incoming(&mut self, cx: &mut Context<'_>) {
        while !self.incoming_closed {
            match self.incoming.poll_recv(cx) {
                Poll::Ready(Some(source)) => self.sources.push(source),
                Poll::Ready(None) => self.incoming_closed = true,
                Poll::Pending => break,
            }
        }
    }
}

impl<T: Send + 'static> Stream for Multiplexer<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }

        this.drain_incoming(cx);

        match this.sources.poll_next_unpin(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Some(item)),
            Poll::Ready(None) if this.incoming_closed => {
                this.terminated = true;
                Poll::Ready(None)
            }
            // Sources may still arrive through a live handle; the channel
            // waker registered above covers that.
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: Send + 'static> FusedStream for Multiplexer<T> {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl<T> fmt::Debug for Multiplexer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("sources", &self.sources.len())
            .field("incoming_closed", &self.incoming_closed)
            .field("terminated", &self.terminated)
            .finish()
    }
}

impl<T: Send + 'static> MuxHandle<T> {
    /// Add a source to the multiplexer
    ///
    /// Returns `false` if the multiplexer has been dropped.
    pub fn add<S>(&self, source: S) -> bool
    where
        S: Stream<Item = T> + Send + 'static,
    {
        self.tx.send(source.boxed()).is_ok()
    }

    /// Check if the multiplexer has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> Clone for MuxHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> fmt::Debug for MuxHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;
    use tokio::sync::mpsc as chan;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_merges_sources() {
        let (mut mux, handle) = Multiplexer::new();
        mux.push(stream::iter(vec![1, 2, 3]));
        handle.add(stream::iter(vec![10, 20]));
        drop(handle);

        let mut items: Vec<i32> = mux.collect().await;
        items.sort();
        assert_eq!(items, vec![1, 2, 3, 10, 20]);
    }

    #[tokio::test]
    async fn test_preserves_order_within_source() {
        let (mut mux, handle) = Multiplexer::new();
        mux.push(stream::iter((0..50).map(|i| ('a', i))));
        mux.push(stream::iter((0..50).map(|i| ('b', i))));
        drop(handle);

        let items: Vec<(char, i32)> = mux.collect().await;
        for source in ['a', 'b'] {
            let seen: Vec<i32> = items
                .iter()
                .filter(|(s, _)| *s == source)
                .map(|(_, i)| *i)
                .collect();
            assert_eq!(seen, (0..50).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_add_while_iterating() {
        let (mut mux, handle) = Multiplexer::<u32>::new();
        let (tx, rx) = chan::unbounded_channel();
        mux.push(tokio_stream(rx));

        tx.send(1).unwrap();
        assert_eq!(mux.next().await, Some(1));

        // New source appears after consumption began
        handle.add(stream::iter(vec![100]));
        assert_eq!(mux.next().await, Some(100));

        tx.send(2).unwrap();
        assert_eq!(mux.next().await, Some(2));
    }

    #[tokio::test]
    async fn test_source_added_from_another_task_wakes_consumer() {
        let (mut mux, handle) = Multiplexer::<u32>::new();
        let adder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.add(stream::iter(vec![7]));
        });

        let item = timeout(Duration::from_secs(1), mux.next()).await.unwrap();
        assert_eq!(item, Some(7));
        adder.await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_while_handle_alive() {
        let (mut mux, handle) = Multiplexer::<u32>::new();
        assert!(timeout(Duration::from_millis(20), mux.next()).await.is_err());
        assert!(!mux.is_terminated());

        drop(handle);
        assert_eq!(mux.next().await, None);
        assert!(mux.is_terminated());
        assert_eq!(mux.next().await, None);
    }

    #[tokio::test]
    async fn test_handle_reports_dropped_multiplexer() {
        let (mux, handle) = Multiplexer::<u32>::new();
        assert!(!handle.is_closed());
        drop(mux);
        assert!(handle.is_closed());
        assert!(!handle.add(stream::iter(vec![1])));
    }

    fn tokio_stream(mut rx: chan::UnboundedReceiver<u32>) -> impl Stream<Item = u32> + Send {
        stream::poll_fn(move |cx| rx.poll_recv(cx))
    }
}
