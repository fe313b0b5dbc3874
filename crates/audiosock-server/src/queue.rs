//! Bounded audio queues with drop-oldest overflow
//!
//! The receive loop owns the timing-critical reply write, so it must never
//! block on a full inbound queue. [`AudioQueue::push_evict`] therefore evicts
//! the oldest frame to admit a new one: live audio favors recency over
//! completeness. The outbound direction uses [`AudioQueue::push_wait`], which
//! applies ordinary backpressure to the writer instead.
//!
//! A queue can optionally be given a prebuffer threshold: after an underrun,
//! delivery is held back until the threshold is reached again, trading
//! latency for smoothness on jittery producers.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

struct Inner {
    items: VecDeque<Bytes>,
    capacity: usize,
    prebuffer: Option<usize>,
    buffering: bool,
    closed: bool,
}

impl Inner {
    fn maybe_release_buffering(&mut self) {
        if self.buffering {
            if let Some(threshold) = self.prebuffer {
                if self.items.len() >= threshold {
                    self.buffering = false;
                }
            }
        }
    }

    fn note_emptied(&mut self) {
        if self.items.is_empty() && self.prebuffer.is_some() && !self.closed {
            self.buffering = true;
        }
    }
}

/// Bounded FIFO of audio payloads shared between the receive loop and the
/// application-facing calls.
pub struct AudioQueue {
    inner: Mutex<Inner>,
    /// Signaled when an item arrives, buffering releases, or the queue closes.
    readable: Notify,
    /// Signaled when capacity frees up or the queue closes.
    writable: Notify,
    /// Signaled when the queue empties or closes.
    drained: Notify,
}

impl AudioQueue {
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    /// A queue that prebuffers `threshold` items before delivering after an
    /// underrun.
    pub fn with_prebuffer(capacity: usize, threshold: usize) -> Self {
        Self::build(capacity, Some(threshold.max(1).min(capacity)))
    }

    fn build(capacity: usize, prebuffer: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.max(1)),
                capacity: capacity.max(1),
                prebuffer,
                buffering: prebuffer.is_some(),
                closed: false,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
            drained: Notify::new(),
        }
    }

    /// Push without ever blocking; on overflow the oldest item is evicted to
    /// make room. Returns `true` when an eviction happened so the caller can
    /// log it. Items pushed after close are discarded.
    pub fn push_evict(&self, item: Bytes) -> bool {
        let evicted = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return false;
            }
            let evicted = if inner.items.len() >= inner.capacity {
                inner.items.pop_front();
                true
            } else {
                false
            };
            inner.items.push_back(item);
            inner.maybe_release_buffering();
            evicted
        };
        self.readable.notify_waiters();
        evicted
    }

    /// Push, waiting for capacity. Returns `false` if the queue closed before
    /// the item could be admitted.
    pub async fn push_wait(&self, item: Bytes) -> bool {
        let mut item = Some(item);
        loop {
            let notified = self.writable.notified();
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return false;
                }
                if inner.items.len() < inner.capacity {
                    if let Some(item) = item.take() {
                        inner.items.push_back(item);
                    }
                    inner.maybe_release_buffering();
                    drop(inner);
                    self.readable.notify_waiters();
                    return true;
                }
            }
            notified.await;
        }
    }

    /// Wait for the next item. Returns `None` once the queue is closed and
    /// empty; items queued before close are still delivered.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            let notified = self.readable.notified();
            match self.take_one() {
                Taken::Item(item) => return Some(item),
                Taken::Closed => return None,
                Taken::Wait => notified.await,
            }
        }
    }

    /// Non-blocking variant of [`pop`](Self::pop).
    pub fn try_pop(&self) -> Option<Bytes> {
        match self.take_one() {
            Taken::Item(item) => Some(item),
            _ => None,
        }
    }

    fn take_one(&self) -> Taken {
        let mut inner = self.inner.lock();
        if !inner.buffering || inner.closed {
            if let Some(item) = inner.items.pop_front() {
                if inner.items.is_empty() {
                    inner.note_emptied();
                    self.drained.notify_waiters();
                }
                drop(inner);
                self.writable.notify_waiters();
                return Taken::Item(item);
            }
        }
        if inner.closed {
            Taken::Closed
        } else {
            Taken::Wait
        }
    }

    /// Discard everything queued without processing it.
    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock();
            inner.items.clear();
            inner.note_emptied();
        }
        self.writable.notify_waiters();
        self.drained.notify_waiters();
    }

    /// Wait until the queue is empty (everything pushed has been consumed)
    /// or closed.
    pub async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            {
                let inner = self.inner.lock();
                if inner.items.is_empty() || inner.closed {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Close the queue: pending items remain poppable, new pushes are
    /// rejected, and all waiters wake.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.buffering = false;
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
        self.drained.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}

enum Taken {
    Item(Bytes),
    Closed,
    Wait,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn frame(tag: u8) -> Bytes {
        Bytes::from(vec![tag; 4])
    }

    #[test]
    fn test_drop_oldest_keeps_capacity() {
        let queue = AudioQueue::new(3);
        assert!(!queue.push_evict(frame(0)));
        assert!(!queue.push_evict(frame(1)));
        assert!(!queue.push_evict(frame(2)));
        // Queue is at capacity: the next push evicts frame 0.
        assert!(queue.push_evict(frame(3)));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_pop().unwrap()[0], 1);
        assert_eq!(queue.try_pop().unwrap()[0], 2);
        assert_eq!(queue.try_pop().unwrap()[0], 3);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(AudioQueue::new(4));
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push_evict(frame(7));
        let got = popper.await.unwrap().unwrap();
        assert_eq!(got[0], 7);
    }

    #[tokio::test]
    async fn test_push_wait_blocks_until_capacity() {
        let queue = Arc::new(AudioQueue::new(1));
        assert!(queue.push_wait(frame(1)).await);
        let pusher = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push_wait(frame(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pusher.is_finished());
        assert_eq!(queue.pop().await.unwrap()[0], 1);
        assert!(pusher.await.unwrap());
        assert_eq!(queue.pop().await.unwrap()[0], 2);
    }

    #[tokio::test]
    async fn test_close_delivers_remainder_then_none() {
        let queue = AudioQueue::new(4);
        queue.push_evict(frame(1));
        queue.push_evict(frame(2));
        queue.close();
        assert!(!queue.push_evict(frame(3)));
        assert_eq!(queue.pop().await.unwrap()[0], 1);
        assert_eq!(queue.pop().await.unwrap()[0], 2);
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_drain_resolves_when_emptied() {
        let queue = Arc::new(AudioQueue::new(4));
        queue.push_evict(frame(1));
        queue.push_evict(frame(2));
        let drainer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!drainer.is_finished());
        queue.pop().await;
        queue.pop().await;
        tokio::time::timeout(Duration::from_secs(1), drainer)
            .await
            .expect("drain should resolve once empty")
            .unwrap();
    }

    #[test]
    fn test_prebuffer_withholds_until_threshold() {
        let queue = AudioQueue::with_prebuffer(10, 3);
        queue.push_evict(frame(1));
        assert!(queue.try_pop().is_none(), "still prebuffering");
        queue.push_evict(frame(2));
        queue.push_evict(frame(3));
        assert_eq!(queue.try_pop().unwrap()[0], 1);
        assert_eq!(queue.try_pop().unwrap()[0], 2);
        assert_eq!(queue.try_pop().unwrap()[0], 3);
        // Underrun: prebuffering starts over.
        queue.push_evict(frame(4));
        assert!(queue.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_prebuffer_ignored_after_close() {
        let queue = AudioQueue::with_prebuffer(10, 5);
        queue.push_evict(frame(1));
        queue.close();
        assert_eq!(queue.pop().await.unwrap()[0], 1);
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_clear_empties_and_unblocks_drain() {
        let queue = Arc::new(AudioQueue::new(4));
        queue.push_evict(frame(1));
        queue.push_evict(frame(2));
        queue.clear();
        assert!(queue.is_empty());
        tokio::time::timeout(Duration::from_millis(100), queue.drain())
            .await
            .expect("drain after clear must not block");
    }
}
