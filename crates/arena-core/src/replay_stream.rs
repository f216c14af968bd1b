//! Multi-subscriber, append-only stream with full replay of history to
//! late subscribers.
//!
//! Grounded on `ReplayableStream` from the original Python backend: a
//! buffer plus a closed flag plus one channel per subscriber, not a shared
//! broadcast channel, so that a subscriber arriving after ten items still
//! sees all ten before anything new.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{Mutex, mpsc};

use crate::errors::{ArenaError, ArenaResult};

struct Inner<T> {
    items: Vec<T>,
    closed: bool,
    subscribers: Vec<mpsc::UnboundedSender<T>>,
}

pub struct ReplayStream<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for ReplayStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for ReplayStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> ReplayStream<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                items: Vec::new(),
                closed: false,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Append an item, delivering it to every currently-subscribed reader.
    ///
    /// Fails if the stream has already been closed.
    pub async fn append(&self, item: T) -> ArenaResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(ArenaError::GamebattleError(
                "replay stream is closed".to_string(),
            ));
        }
        inner.items.push(item.clone());
        inner.subscribers.retain(|tx| tx.send(item.clone()).is_ok());
        Ok(())
    }

    /// Close the stream. Subscribers keep draining whatever history they
    /// already have buffered, then their iterator ends.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.subscribers.clear();
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    /// Snapshot of every item appended so far.
    pub async fn accumulated(&self) -> Vec<T> {
        self.inner.lock().await.items.clone()
    }

    /// Subscribe. The returned stream yields `accumulated_at_subscribe_time
    /// ++ future_items_until_close`, with no duplicates and no gaps — the
    /// snapshot and the subscriber registration happen under the same lock
    /// acquisition.
    pub async fn subscribe(&self) -> ReplaySubscription<T> {
        let mut inner = self.inner.lock().await;
        let history: VecDeque<T> = inner.items.iter().cloned().collect();
        let rx = if inner.closed {
            None
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            inner.subscribers.push(tx);
            Some(rx)
        };
        ReplaySubscription { history, rx }
    }
}

/// A single subscriber's view of a `ReplayStream`.
pub struct ReplaySubscription<T> {
    history: VecDeque<T>,
    rx: Option<mpsc::UnboundedReceiver<T>>,
}

impl<T> ReplaySubscription<T> {
    /// Pull the next item, or `None` once history is drained and the
    /// stream has closed.
    pub async fn next(&mut self) -> Option<T> {
        if let Some(item) = self.history.pop_front() {
            return Some(item);
        }
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl<T: Unpin> Stream for ReplaySubscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(item) = self.history.pop_front() {
            return Poll::Ready(Some(item));
        }
        match self.rx.as_mut() {
            Some(rx) => Pin::new(rx).poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ReplayStream;

    #[tokio::test]
    async fn late_subscriber_sees_full_history_then_new_items() {
        let stream: ReplayStream<String> = ReplayStream::new();
        stream.append("he".to_string()).await.unwrap();
        stream.append("ll".to_string()).await.unwrap();
        stream.append("o".to_string()).await.unwrap();

        let mut sub = stream.subscribe().await;
        stream.append("!".to_string()).await.unwrap();
        stream.close().await;

        let mut seen = Vec::new();
        while let Some(item) = sub.next().await {
            seen.push(item);
        }
        assert_eq!(seen, vec!["he", "ll", "o", "!"]);
    }

    #[tokio::test]
    async fn append_after_close_fails() {
        let stream: ReplayStream<u8> = ReplayStream::new();
        stream.close().await;
        assert!(stream.append(1).await.is_err());
    }

    #[tokio::test]
    async fn two_independent_subscribers_each_see_everything() {
        let stream: ReplayStream<i32> = ReplayStream::new();
        stream.append(1).await.unwrap();

        let mut early = stream.subscribe().await;
        stream.append(2).await.unwrap();
        let mut late = stream.subscribe().await;
        stream.append(3).await.unwrap();
        stream.close().await;

        let mut early_seen = Vec::new();
        while let Some(item) = early.next().await {
            early_seen.push(item);
        }
        let mut late_seen = Vec::new();
        while let Some(item) = late.next().await {
            late_seen.push(item);
        }

        assert_eq!(early_seen, vec![1, 2, 3]);
        assert_eq!(late_seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn accumulated_is_a_snapshot() {
        let stream: ReplayStream<i32> = ReplayStream::new();
        stream.append(1).await.unwrap();
        stream.append(2).await.unwrap();
        assert_eq!(stream.accumulated().await, vec![1, 2]);
    }
}
