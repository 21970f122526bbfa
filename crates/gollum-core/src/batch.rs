//! Bounded message batch with size/time thresholds and a single
//! in-flight flush, matching spec.md §4.3's `MessageBatch` contract.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::message::Message;

/// Double-buffered message accumulator. Appends land in the active
/// side and never block on I/O; the moment the active side fills, it
/// is swapped out and handed to a flush closure while a fresh active
/// buffer keeps accepting appends. Only one flush may be in flight at
/// a time per batch — a second swap attempted before the first flush
/// finishes waits on `flush_permit`, which is the "briefly wait on a
/// mutex protecting the active/flushing swap" suspension point
/// described in spec.md §5.
pub struct MessageBatch {
    capacity: usize,
    active: SyncMutex<Vec<Message>>,
    last_append: SyncMutex<Instant>,
    flush_permit: AsyncMutex<()>,
}

impl MessageBatch {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            active: SyncMutex::new(Vec::new()),
            last_append: SyncMutex::new(Instant::now()),
            flush_permit: AsyncMutex::new(()),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn reached_size_threshold(&self, n: usize) -> bool {
        self.active_count() >= n
    }

    pub fn reached_time_threshold(&self, d: Duration) -> bool {
        self.active_count() > 0 && self.last_append.lock().elapsed() >= d
    }

    fn take_active(&self) -> Vec<Message> {
        std::mem::take(&mut *self.active.lock())
    }

    /// Appends `msg` unless `can_append` is false, in which case it is
    /// dropped via `drop_fn` instead. If the append fills the batch to
    /// capacity, swaps the active buffer out and awaits `flush_fn` on
    /// it, with at most one such flush in flight at a time.
    pub async fn append_or_flush<Fut>(
        &self,
        msg: Message,
        can_append: impl FnOnce() -> bool,
        drop_fn: impl FnOnce(Message),
        flush_fn: impl FnOnce(Vec<Message>) -> Fut,
    ) where
        Fut: Future<Output = ()>,
    {
        if !can_append() {
            drop_fn(msg);
            return;
        }
        let full = {
            let mut active = self.active.lock();
            active.push(msg);
            *self.last_append.lock() = Instant::now();
            active.len() >= self.capacity
        };
        if full {
            let _permit = self.flush_permit.lock().await;
            let batch = self.take_active();
            if !batch.is_empty() {
                flush_fn(batch).await;
            }
        }
    }

    /// Synchronous swap-and-call: a no-op if the batch is empty.
    pub async fn flush<Fut>(&self, flush_fn: impl FnOnce(Vec<Message>) -> Fut)
    where
        Fut: Future<Output = ()>,
    {
        let _permit = self.flush_permit.lock().await;
        let batch = self.take_active();
        if !batch.is_empty() {
            flush_fn(batch).await;
        }
    }

    /// Swaps out whatever is resident and flushes it, waiting up to
    /// `timeout` total. If the flush permit itself can't be acquired
    /// within the deadline (another flush is still draining), the
    /// swapped-out messages are dropped via `drop_fn` instead — they
    /// were never handed to `flush_fn`, so the drop path is the only
    /// way to honor "exactly once or dropped" for them.
    ///
    /// If `flush_fn` is invoked but the future itself exceeds the
    /// deadline, the messages were already passed to it (ownership
    /// moved in); this satisfies "passed to flushFn exactly once" even
    /// though completion isn't observed.
    pub async fn close<Fut>(
        &self,
        flush_fn: impl FnOnce(Vec<Message>) -> Fut,
        timeout_dur: Duration,
        drop_fn: impl Fn(Message),
    ) where
        Fut: Future<Output = ()>,
    {
        let batch = self.take_active();
        if batch.is_empty() {
            return;
        }
        let permit = match tokio::time::timeout(timeout_dur, self.flush_permit.lock()).await {
            Ok(permit) => permit,
            Err(_) => {
                for msg in batch {
                    drop_fn(msg);
                }
                return;
            }
        };
        let _permit = permit;
        if tokio::time::timeout(timeout_dur, flush_fn(batch)).await.is_err() {
            tracing::warn!("message batch close: flush did not complete within shutdown timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{hash_stream_name, SequenceGenerator};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn msg(seq: &SequenceGenerator) -> Message {
        Message::new(b"m".to_vec(), hash_stream_name("s"), seq)
    }

    #[tokio::test]
    async fn append_below_capacity_does_not_flush() {
        let batch = MessageBatch::new(4);
        let seq = SequenceGenerator::new();
        let flushed = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let flushed = flushed.clone();
            batch
                .append_or_flush(
                    msg(&seq),
                    || true,
                    |_| {},
                    |batch| {
                        flushed.fetch_add(batch.len(), Ordering::SeqCst);
                        async {}
                    },
                )
                .await;
        }
        assert_eq!(flushed.load(Ordering::SeqCst), 0);
        assert_eq!(batch.active_count(), 3);
    }

    #[tokio::test]
    async fn filling_capacity_swaps_and_flushes() {
        let batch = MessageBatch::new(3);
        let seq = SequenceGenerator::new();
        let flushed = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let flushed = flushed.clone();
            batch
                .append_or_flush(
                    msg(&seq),
                    || true,
                    |_| {},
                    |batch| {
                        flushed.fetch_add(batch.len(), Ordering::SeqCst);
                        async {}
                    },
                )
                .await;
        }
        assert_eq!(flushed.load(Ordering::SeqCst), 3);
        assert_eq!(batch.active_count(), 0);
    }

    #[tokio::test]
    async fn rejected_append_goes_to_drop_path() {
        let batch = MessageBatch::new(4);
        let seq = SequenceGenerator::new();
        let dropped = Arc::new(AtomicUsize::new(0));
        let d = dropped.clone();
        batch
            .append_or_flush(msg(&seq), || false, move |_| { d.fetch_add(1, Ordering::SeqCst); }, |_| async {})
            .await;
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(batch.active_count(), 0);
    }

    #[tokio::test]
    async fn flush_is_noop_when_empty() {
        let batch = MessageBatch::new(4);
        let called = Arc::new(AtomicUsize::new(0));
        let c = called.clone();
        batch.flush(move |b| { c.fetch_add(b.len(), Ordering::SeqCst); async {} }).await;
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn close_flushes_residents_exactly_once() {
        let batch = MessageBatch::new(10);
        let seq = SequenceGenerator::new();
        for _ in 0..5 {
            batch.append_or_flush(msg(&seq), || true, |_| {}, |_| async {}).await;
        }
        let flushed = Arc::new(AtomicUsize::new(0));
        let f = flushed.clone();
        batch
            .close(move |b| { f.fetch_add(b.len(), Ordering::SeqCst); async {} }, Duration::from_millis(500), |_| {})
            .await;
        assert_eq!(flushed.load(Ordering::SeqCst), 5);
        assert_eq!(batch.active_count(), 0);
    }

    #[test]
    fn size_threshold_checks_active_count() {
        let batch = MessageBatch::new(10);
        assert!(!batch.reached_size_threshold(1));
    }

    #[tokio::test]
    async fn time_threshold_false_when_empty() {
        let batch = MessageBatch::new(10);
        assert!(!batch.reached_time_threshold(Duration::from_millis(0)));
    }
}
