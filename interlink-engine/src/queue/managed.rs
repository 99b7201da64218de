//! The managed queue: bounded, discipline-aware, overflow-aware.

// Layer 1: Standard library imports
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::warn;

// Layer 3: Internal module imports
use super::metrics::QueueMetrics;
use super::{OverflowPolicy, QueueKind};
use crate::error::EngineError;
use crate::message::MessagePriority;

/// Items stored in a managed queue expose a priority for the priority
/// discipline; everything else defaults to `Normal`.
pub trait QueueItem: Send + 'static {
    fn priority(&self) -> MessagePriority {
        MessagePriority::Normal
    }
}

impl QueueItem for crate::message::Message {
    fn priority(&self) -> MessagePriority {
        self.envelope.priority
    }
}

// Plain integers are handy in tests and for simple work tokens.
impl QueueItem for u64 {}
impl QueueItem for String {}

/// Priority heap entry ordered by (ordinal, arrival sequence).
struct PrioEntry<T> {
    ordinal: u8,
    seq: u64,
    item: T,
}

impl<T> PartialEq for PrioEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ordinal == other.ordinal && self.seq == other.seq
    }
}

impl<T> Eq for PrioEntry<T> {}

impl<T> PartialOrd for PrioEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for PrioEntry<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; reverse so the lowest (ordinal, seq)
        // pair (most urgent, earliest) pops first.
        (other.ordinal, other.seq).cmp(&(self.ordinal, self.seq))
    }
}

enum Storage<T> {
    Fifo(VecDeque<T>),
    Lifo(Vec<T>),
    Priority { heap: BinaryHeap<PrioEntry<T>>, seq: u64 },
    Unordered(VecDeque<T>),
}

impl<T: QueueItem> Storage<T> {
    fn new(kind: QueueKind) -> Self {
        match kind {
            QueueKind::Fifo => Storage::Fifo(VecDeque::new()),
            QueueKind::Lifo => Storage::Lifo(Vec::new()),
            QueueKind::Priority => Storage::Priority {
                heap: BinaryHeap::new(),
                seq: 0,
            },
            QueueKind::Unordered => Storage::Unordered(VecDeque::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            Storage::Fifo(q) | Storage::Unordered(q) => q.len(),
            Storage::Lifo(v) => v.len(),
            Storage::Priority { heap, .. } => heap.len(),
        }
    }

    fn push(&mut self, item: T) {
        match self {
            Storage::Fifo(q) | Storage::Unordered(q) => q.push_back(item),
            Storage::Lifo(v) => v.push(item),
            Storage::Priority { heap, seq } => {
                let ordinal = item.priority().ordinal();
                heap.push(PrioEntry {
                    ordinal,
                    seq: *seq,
                    item,
                });
                *seq += 1;
            }
        }
    }

    /// Remove the item at the head of this discipline's order.
    fn pop(&mut self) -> Option<T> {
        match self {
            Storage::Fifo(q) | Storage::Unordered(q) => q.pop_front(),
            Storage::Lifo(v) => v.pop(),
            Storage::Priority { heap, .. } => heap.pop().map(|e| e.item),
        }
    }
}

/// Bounded queue with discipline and overflow policy.
///
/// Internally synchronised; clones share the same queue.
///
/// # Examples
///
/// ```rust
/// use interlink_engine::queue::{ManagedQueue, OverflowPolicy, QueueKind};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let queue: ManagedQueue<u64> =
///     ManagedQueue::new(QueueKind::Fifo, 3, OverflowPolicy::DropOldest, None);
///
/// for n in 1..=5 {
///     queue.put(n).await;
/// }
/// // Capacity 3 with drop_oldest: the last three items survive.
/// assert_eq!(queue.get(None).await.unwrap(), 3);
/// assert_eq!(queue.get(None).await.unwrap(), 4);
/// assert_eq!(queue.get(None).await.unwrap(), 5);
/// assert_eq!(queue.metrics().total_dropped(), 2);
/// # }
/// ```
pub struct ManagedQueue<T: QueueItem> {
    inner: Arc<Inner<T>>,
}

impl<T: QueueItem> Clone for ManagedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T: QueueItem> {
    kind: QueueKind,
    capacity: usize,
    policy: OverflowPolicy,
    overflow: Option<ManagedQueue<T>>,
    storage: Mutex<Storage<T>>,
    item_available: Notify,
    space_available: Notify,
    metrics: QueueMetrics,
}

impl<T: QueueItem> ManagedQueue<T> {
    /// Create a queue. `capacity` 0 means unbounded.
    pub fn new(
        kind: QueueKind,
        capacity: usize,
        policy: OverflowPolicy,
        overflow: Option<ManagedQueue<T>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                capacity,
                policy,
                overflow,
                storage: Mutex::new(Storage::new(kind)),
                item_available: Notify::new(),
                space_available: Notify::new(),
                metrics: QueueMetrics::new(),
            }),
        }
    }

    /// FIFO queue with the default blocking overflow policy.
    pub fn fifo(capacity: usize) -> Self {
        Self::new(QueueKind::Fifo, capacity, OverflowPolicy::Block, None)
    }

    /// Enqueue an item per the overflow policy.
    ///
    /// Returns `true` when the item was accepted (here or via redirect) and
    /// `false` when it was rejected or dropped. With the `Block` policy the
    /// call suspends until space is available and always returns `true`.
    pub async fn put(&self, item: T) -> bool {
        self.put_boxed(item).await
    }

    // Indirection so the redirect path can recurse through a boxed future.
    fn put_boxed(&self, item: T) -> BoxFuture<'_, bool> {
        Box::pin(self.put_impl(item))
    }

    async fn put_impl(&self, item: T) -> bool {
        let mut item = item;
        loop {
            // Scoped so the (non-Send) mutex guard never spans the await
            // points below; `redirect` only signals which branch to take
            // once the guard has gone out of scope, it never carries `item`.
            let mut redirect = false;
            {
                let mut storage = self.inner.storage.lock();
                let full = self.inner.capacity > 0 && storage.len() >= self.inner.capacity;
                if !full {
                    storage.push(item);
                    self.inner.metrics.record_put(storage.len());
                    drop(storage);
                    self.inner.item_available.notify_one();
                    return true;
                }

                self.inner.metrics.record_overflow();
                match self.inner.policy {
                    OverflowPolicy::Block => {
                        // Fall through to wait for space below.
                    }
                    OverflowPolicy::DropNewest => {
                        self.inner.metrics.record_dropped();
                        warn!(
                            discipline = ?self.inner.kind,
                            size = storage.len(),
                            "queue full, dropping incoming item"
                        );
                        return false;
                    }
                    OverflowPolicy::DropOldest => {
                        if storage.pop().is_some() {
                            self.inner.metrics.record_dropped();
                        }
                        storage.push(item);
                        self.inner.metrics.record_put(storage.len());
                        warn!(
                            discipline = ?self.inner.kind,
                            size = storage.len(),
                            "queue full, evicted head for incoming item"
                        );
                        drop(storage);
                        self.inner.item_available.notify_one();
                        return true;
                    }
                    OverflowPolicy::Redirect => {
                        drop(storage);
                        redirect = true;
                    }
                }
            }

            if redirect {
                return match &self.inner.overflow {
                    Some(target) => target.put_boxed(item).await,
                    None => {
                        self.inner.metrics.record_dropped();
                        warn!("queue full and no overflow queue configured");
                        false
                    }
                };
            }

            // Block policy: wait for a consumer to make room, then retry.
            self.inner.space_available.notified().await;
            // The item was moved into this scope already; keep looping with it.
            item = match self.try_put_once(item) {
                Ok(()) => return true,
                Err(returned) => returned,
            };
        }
    }

    /// One non-waiting attempt, returning the item back on failure.
    fn try_put_once(&self, item: T) -> Result<(), T> {
        let mut storage = self.inner.storage.lock();
        let full = self.inner.capacity > 0 && storage.len() >= self.inner.capacity;
        if full {
            return Err(item);
        }
        storage.push(item);
        self.inner.metrics.record_put(storage.len());
        drop(storage);
        self.inner.item_available.notify_one();
        Ok(())
    }

    /// Non-blocking enqueue: accept only when space is available right now.
    pub fn try_put(&self, item: T) -> bool {
        self.try_put_once(item).is_ok()
    }

    /// Dequeue the next item per the discipline.
    ///
    /// Blocks until an item arrives, or fails with `TimeoutError` when
    /// `deadline` elapses first.
    pub async fn get(&self, deadline: Option<Duration>) -> Result<T, EngineError> {
        let wait = async {
            loop {
                {
                    let mut storage = self.inner.storage.lock();
                    if let Some(item) = storage.pop() {
                        self.inner.metrics.record_get(storage.len());
                        drop(storage);
                        self.inner.space_available.notify_one();
                        return item;
                    }
                }
                self.inner.item_available.notified().await;
            }
        };

        match deadline {
            Some(limit) => timeout(limit, wait).await.map_err(|_| EngineError::Timeout {
                operation: "queue get".into(),
                timeout: limit,
            }),
            None => Ok(wait.await),
        }
    }

    /// Non-blocking dequeue.
    pub fn try_get(&self) -> Option<T> {
        let mut storage = self.inner.storage.lock();
        let item = storage.pop()?;
        self.inner.metrics.record_get(storage.len());
        drop(storage);
        self.inner.space_available.notify_one();
        Some(item)
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.inner.storage.lock().len()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` when the queue is at capacity.
    pub fn is_full(&self) -> bool {
        self.inner.capacity > 0 && self.len() >= self.inner.capacity
    }

    /// The queue's configured discipline.
    pub fn kind(&self) -> QueueKind {
        self.inner.kind
    }

    /// The queue's configured capacity (0 = unbounded).
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Runtime metrics.
    pub fn metrics(&self) -> &QueueMetrics {
        &self.inner.metrics
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn msg(priority: MessagePriority) -> Message {
        let mut m = Message::create(b"x".to_vec(), "text/plain", "test");
        m.envelope.priority = priority;
        m
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue: ManagedQueue<u64> = ManagedQueue::fifo(10);
        for n in 1..=3 {
            assert!(queue.put(n).await);
        }
        assert_eq!(queue.get(None).await.unwrap(), 1);
        assert_eq!(queue.get(None).await.unwrap(), 2);
        assert_eq!(queue.get(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_lifo_order() {
        let queue: ManagedQueue<u64> =
            ManagedQueue::new(QueueKind::Lifo, 10, OverflowPolicy::Block, None);
        for n in 1..=3 {
            queue.put(n).await;
        }
        assert_eq!(queue.get(None).await.unwrap(), 3);
        assert_eq!(queue.get(None).await.unwrap(), 2);
        assert_eq!(queue.get(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_priority_order_with_fifo_ties() {
        let queue: ManagedQueue<Message> =
            ManagedQueue::new(QueueKind::Priority, 10, OverflowPolicy::Block, None);

        let low = msg(MessagePriority::Low);
        let normal_a = msg(MessagePriority::Normal);
        let normal_b = msg(MessagePriority::Normal);
        let urgent = msg(MessagePriority::Urgent);
        let ids = (
            normal_a.envelope.message_id,
            normal_b.envelope.message_id,
            urgent.envelope.message_id,
            low.envelope.message_id,
        );

        queue.put(low).await;
        queue.put(normal_a).await;
        queue.put(normal_b).await;
        queue.put(urgent).await;

        assert_eq!(queue.get(None).await.unwrap().envelope.message_id, ids.2);
        assert_eq!(queue.get(None).await.unwrap().envelope.message_id, ids.0);
        assert_eq!(queue.get(None).await.unwrap().envelope.message_id, ids.1);
        assert_eq!(queue.get(None).await.unwrap().envelope.message_id, ids.3);
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_last_k() {
        let queue: ManagedQueue<u64> =
            ManagedQueue::new(QueueKind::Fifo, 3, OverflowPolicy::DropOldest, None);
        for n in 1..=5 {
            assert!(queue.put(n).await);
        }
        let drained = [
            queue.get(None).await.unwrap(),
            queue.get(None).await.unwrap(),
            queue.get(None).await.unwrap(),
        ];
        assert_eq!(drained, [3, 4, 5]);
        assert_eq!(queue.metrics().total_dropped(), 2);
        assert_eq!(queue.metrics().overflow_count(), 2);
    }

    #[tokio::test]
    async fn test_drop_newest_rejects_incoming() {
        let queue: ManagedQueue<u64> =
            ManagedQueue::new(QueueKind::Fifo, 2, OverflowPolicy::DropNewest, None);
        assert!(queue.put(1).await);
        assert!(queue.put(2).await);
        assert!(!queue.put(3).await);

        assert_eq!(queue.get(None).await.unwrap(), 1);
        assert_eq!(queue.get(None).await.unwrap(), 2);
        assert_eq!(queue.metrics().total_dropped(), 1);
    }

    #[tokio::test]
    async fn test_redirect_to_overflow_queue() {
        let overflow: ManagedQueue<u64> = ManagedQueue::fifo(10);
        let queue: ManagedQueue<u64> = ManagedQueue::new(
            QueueKind::Fifo,
            1,
            OverflowPolicy::Redirect,
            Some(overflow.clone()),
        );

        assert!(queue.put(1).await);
        assert!(queue.put(2).await);
        assert_eq!(queue.len(), 1);
        assert_eq!(overflow.len(), 1);
        assert_eq!(overflow.get(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_redirect_without_target_fails() {
        let queue: ManagedQueue<u64> =
            ManagedQueue::new(QueueKind::Fifo, 1, OverflowPolicy::Redirect, None);
        assert!(queue.put(1).await);
        assert!(!queue.put(2).await);
    }

    #[tokio::test]
    async fn test_block_waits_for_space() {
        let queue: ManagedQueue<u64> = ManagedQueue::fifo(1);
        assert!(queue.put(1).await);

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.put(2).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.get(None).await.unwrap(), 1);
        assert!(producer.await.unwrap());
        assert_eq!(queue.get(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_get_deadline() {
        let queue: ManagedQueue<u64> = ManagedQueue::fifo(1);
        let result = queue.get(Some(Duration::from_millis(20))).await;
        assert!(matches!(result, Err(EngineError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_unbounded_capacity() {
        let queue: ManagedQueue<u64> =
            ManagedQueue::new(QueueKind::Fifo, 0, OverflowPolicy::Block, None);
        for n in 0..10_000 {
            assert!(queue.put(n).await);
        }
        assert!(!queue.is_full());
        assert_eq!(queue.len(), 10_000);
    }

    #[tokio::test]
    async fn test_size_accessors_and_metrics() {
        let queue: ManagedQueue<u64> = ManagedQueue::fifo(2);
        assert!(queue.is_empty());
        queue.put(1).await;
        queue.put(2).await;
        assert!(queue.is_full());
        assert_eq!(queue.metrics().peak_size(), 2);
        queue.get(None).await.unwrap();
        assert_eq!(queue.metrics().current_size(), 1);
        assert_eq!(queue.metrics().total_put(), 2);
        assert_eq!(queue.metrics().total_get(), 1);
    }

    #[tokio::test]
    async fn test_try_put_and_try_get() {
        let queue: ManagedQueue<u64> = ManagedQueue::fifo(1);
        assert!(queue.try_put(1));
        assert!(!queue.try_put(2));
        assert_eq!(queue.try_get(), Some(1));
        assert_eq!(queue.try_get(), None);
    }
}
