//! FIFO queues with ownership transfer and condition-variable-style wakeups.
//!
//! Replaces the original manual linked-list atomic queue: `push` moves an
//! owned item across to the consumer, never blocks, and drops (with a log
//! line) rather than failing if the receiver has gone away. A shared
//! [`tokio::sync::Notify`] plays the role of the condition variable that
//! wakes `FrameManager` when new work arrives.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::warn;

/// The producer half of a FIFO queue.
#[derive(Clone)]
pub struct FifoSender<T> {
    tx: UnboundedSender<T>,
    len: Arc<AtomicUsize>,
    notify: Arc<Notify>,
    label: &'static str,
}

impl<T> FifoSender<T> {
    /// Enqueues `item`. Never blocks; if the consumer has been dropped the
    /// item is dropped and logged rather than treated as fatal.
    pub fn push(&self, item: T) {
        if self.tx.send(item).is_err() {
            warn!(queue = self.label, "push failed: receiver gone, item dropped");
            return;
        }
        self.len.fetch_add(1, Ordering::SeqCst);
        // `notify_one`, not `notify_waiters`: the latter only wakes tasks
        // already parked in `.notified().await` and stores no permit, so a
        // push landing between the consumer's loop iterations would be
        // silently lost. `notify_one` stores a permit when nobody is
        // currently waiting, so the consumer's next `.notified().await`
        // still completes immediately.
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The consumer half of a FIFO queue.
pub struct FifoReceiver<T> {
    rx: UnboundedReceiver<T>,
    len: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl<T> FifoReceiver<T> {
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for the shared notification (a push or an external shutdown
    /// broadcast touching the same `Notify`).
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Pops one item if available, without waiting.
    pub fn try_pop(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => {
                self.len.fetch_sub(1, Ordering::SeqCst);
                Some(item)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Pops every currently queued item, draining the queue. Used by
    /// `ScriptRunner` to coalesce a burst into one invocation.
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.try_pop() {
            items.push(item);
        }
        items
    }
}

/// Constructs a FIFO pair sharing one wakeup `Notify`, so a single consumer
/// can wait on multiple queues simultaneously (see `FrameManager`).
pub fn fifo<T>(label: &'static str, notify: Arc<Notify>) -> (FifoSender<T>, FifoReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let len = Arc::new(AtomicUsize::new(0));
    (
        FifoSender { tx, len: len.clone(), notify: notify.clone(), label },
        FifoReceiver { rx, len, notify },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_pop_preserves_order() {
        let notify = Arc::new(Notify::new());
        let (tx, mut rx) = fifo::<i32>("test", notify);
        tx.push(1);
        tx.push(2);
        tx.push(3);
        assert_eq!(rx.len(), 3);
        assert_eq!(rx.try_pop(), Some(1));
        assert_eq!(rx.try_pop(), Some(2));
        assert_eq!(rx.try_pop(), Some(3));
        assert_eq!(rx.try_pop(), None);
    }

    #[tokio::test]
    async fn drain_coalesces_a_burst() {
        let notify = Arc::new(Notify::new());
        let (tx, mut rx) = fifo::<&str>("test", notify);
        for item in ["a", "b", "c"] {
            tx.push(item);
        }
        assert_eq!(rx.drain(), vec!["a", "b", "c"]);
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn push_before_anyone_is_waiting_is_not_lost() {
        let notify = Arc::new(Notify::new());
        let (tx, rx) = fifo::<i32>("test", notify);
        // Nothing is awaiting `notified()` yet at this point.
        tx.push(7);
        // Must resolve immediately rather than hang forever waiting for a
        // notification that already happened.
        tokio::time::timeout(std::time::Duration::from_millis(500), rx.notified())
            .await
            .expect("a push before any waiter registered must still be observed");
    }

    #[tokio::test]
    async fn push_wakes_a_waiting_receiver() {
        let notify = Arc::new(Notify::new());
        let (tx, rx) = fifo::<i32>("test", notify);
        let waiter = tokio::spawn(async move {
            rx.notified().await;
            rx.len()
        });
        tokio::task::yield_now().await;
        tx.push(42);
        let len = waiter.await.unwrap();
        assert_eq!(len, 1);
    }
}
