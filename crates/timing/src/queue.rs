//! Bounded multi-producer, single-consumer ring buffer.
//!
//! Producers serialize on a short critical section; the consumer side never
//! takes a lock. Storage is `N + 1` slots allocated once in [`BoundedQueue::new`]
//! (one slot is the sentinel that tells "full" apart from "empty"), so the
//! queue never grows: a push into a full queue hands the item straight back.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Poll interval used by [`BoundedQueue::wait_pop`].
const WAIT_POP_POLL: Duration = Duration::from_micros(100);

/// Fixed-capacity MPSC queue holding at most `N` items.
pub struct BoundedQueue<T, const N: usize> {
    slots: Box<[UnsafeCell<Option<T>>]>,
    head: AtomicUsize,
    tail: AtomicUsize,
    push_lock: Mutex<()>,
    consumer_busy: AtomicBool,
}

// SAFETY: slots in [tail, head) are only touched by the (single) consumer and
// the slot at `head` only by the producer holding `push_lock`; ownership of a
// slot changes hands through release/acquire on `head` and `tail`.
unsafe impl<T: Send, const N: usize> Send for BoundedQueue<T, N> {}
// SAFETY: see above. Items are moved in and out, never shared.
unsafe impl<T: Send, const N: usize> Sync for BoundedQueue<T, N> {}

impl<T, const N: usize> BoundedQueue<T, N> {
    const CAPACITY_IN_RANGE: () = assert!(
        N >= 1 && N <= 256,
        "BoundedQueue capacity must be in [1, 256]"
    );

    /// Allocate the ring. This is the only allocation the queue ever makes.
    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_IN_RANGE;

        let slots = (0..N + 1)
            .map(|_| UnsafeCell::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            push_lock: Mutex::new(()),
            consumer_busy: AtomicBool::new(false),
        }
    }

    /// Usable capacity.
    pub const fn capacity() -> usize {
        N
    }

    /// Push without blocking.
    ///
    /// Safe to call from any number of producer threads. Returns the item
    /// back when the queue is full; the queue state is left untouched and the
    /// caller decides what to do with it.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let _guard = self.push_lock.lock();
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) % (N + 1);
        if next == self.tail.load(Ordering::Acquire) {
            return Err(item);
        }
        // SAFETY: the slot at `head` is outside [tail, head), so the consumer
        // cannot observe it until `head` is published below, and `push_lock`
        // excludes other producers.
        unsafe {
            *self.slots[head].get() = Some(item);
        }
        self.head.store(next, Ordering::Release);
        Ok(())
    }

    /// Pop without blocking or locking.
    ///
    /// Intended for a single consumer thread. A second consumer racing the
    /// first simply sees an empty queue.
    pub fn try_pop(&self) -> Option<T> {
        let _consumer = ConsumerGuard::acquire(&self.consumer_busy)?;

        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: `tail != head`, so the producer that filled this slot has
        // published it and no producer will write it again until `tail` moves.
        let item = unsafe { (*self.slots[tail].get()).take() };
        self.tail.store((tail + 1) % (N + 1), Ordering::Release);
        item
    }

    /// Poll [`try_pop`](Self::try_pop) until an item arrives or `timeout` elapses.
    pub fn wait_pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            std::thread::sleep(WAIT_POP_POLL.min(deadline - now));
        }
    }

    /// Current occupancy. Approximate while producers are active, never above `N`.
    pub fn size(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        let len = if head >= tail {
            head - tail
        } else {
            N + 1 - tail + head
        };
        len.min(N)
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        let next = (self.head.load(Ordering::Acquire) + 1) % (N + 1);
        next == self.tail.load(Ordering::Acquire)
    }
}

impl<T, const N: usize> Default for BoundedQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> std::fmt::Debug for BoundedQueue<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &N)
            .field("size", &self.size())
            .finish()
    }
}

struct ConsumerGuard<'a>(&'a AtomicBool);

impl<'a> ConsumerGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ConsumerGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Arc;

    #[test]
    fn test_starts_empty() {
        let q: BoundedQueue<u32, 5> = BoundedQueue::new();
        assert!(q.is_empty());
        assert!(!q.is_full());
        assert_eq!(q.size(), 0);
        assert_eq!(BoundedQueue::<u32, 5>::capacity(), 5);
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn test_fifo_order() {
        let q: BoundedQueue<u32, 5> = BoundedQueue::new();
        for i in 0..5 {
            q.try_push(i).unwrap();
        }
        let popped: Vec<u32> = std::iter::from_fn(|| q.try_pop()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_full_queue_rejects_and_recovers() {
        let q: BoundedQueue<u32, 5> = BoundedQueue::new();
        for i in 0..5 {
            assert!(q.try_push(i).is_ok());
        }
        assert!(q.is_full());
        assert_eq!(q.try_push(5), Err(5));
        assert_eq!(q.size(), 5);

        assert_eq!(q.try_pop(), Some(0));
        assert!(q.try_push(5).is_ok());
        assert_eq!(q.size(), 5);
    }

    #[test]
    fn test_wait_pop_times_out_on_empty() {
        let q: BoundedQueue<u32, 4> = BoundedQueue::new();
        let start = Instant::now();
        assert!(q.wait_pop(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_pop_receives_late_item() {
        let q: Arc<BoundedQueue<u32, 4>> = Arc::new(BoundedQueue::new());
        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                q.try_push(7).unwrap();
            })
        };
        assert_eq!(q.wait_pop(Duration::from_secs(2)), Some(7));
        producer.join().unwrap();
    }

    #[test]
    fn test_items_are_moved_not_cloned() {
        let q: BoundedQueue<Box<Vec<u8>>, 2> = BoundedQueue::new();
        let payload = Box::new(vec![1u8, 2, 3]);
        let addr = payload.as_ptr();
        q.try_push(payload).unwrap();
        let out = q.try_pop().unwrap();
        assert_eq!(out.as_ptr(), addr);
    }

    #[test]
    fn test_drop_releases_queued_items() {
        let item = Arc::new(());
        {
            let q: BoundedQueue<Arc<()>, 3> = BoundedQueue::new();
            q.try_push(Arc::clone(&item)).unwrap();
            q.try_push(Arc::clone(&item)).unwrap();
            assert_eq!(Arc::strong_count(&item), 3);
        }
        assert_eq!(Arc::strong_count(&item), 1);
    }

    #[test]
    fn test_concurrent_producers_never_exceed_capacity() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 2_000;

        let q: Arc<BoundedQueue<usize, 5>> = Arc::new(BoundedQueue::new());
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    let mut accepted = 0usize;
                    for i in 0..PER_PRODUCER {
                        if q.try_push(p * PER_PRODUCER + i).is_ok() {
                            accepted += 1;
                        }
                        assert!(q.size() <= 5);
                    }
                    accepted
                })
            })
            .collect();

        let mut received = 0usize;
        let mut last_seen = vec![None::<usize>; PRODUCERS];
        loop {
            assert!(q.size() <= 5);
            if let Some(v) = q.try_pop() {
                // Per-producer FIFO order survives interleaving.
                let producer = v / PER_PRODUCER;
                if let Some(prev) = last_seen[producer] {
                    assert!(v > prev);
                }
                last_seen[producer] = Some(v);
                received += 1;
            } else if handles.iter().all(|h| h.is_finished()) && q.is_empty() {
                break;
            }
        }

        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(received, accepted);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(u16),
        Pop,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![any::<u16>().prop_map(Op::Push), Just(Op::Pop)]
    }

    proptest! {
        #[test]
        fn prop_matches_bounded_model(ops in proptest::collection::vec(op_strategy(), 0..200)) {
            let q: BoundedQueue<u16, 5> = BoundedQueue::new();
            let mut model: VecDeque<u16> = VecDeque::new();

            for op in ops {
                match op {
                    Op::Push(v) => {
                        let before = q.size();
                        let res = q.try_push(v);
                        if model.len() == 5 {
                            prop_assert_eq!(res, Err(v));
                            prop_assert_eq!(q.size(), before);
                        } else {
                            prop_assert!(res.is_ok());
                            model.push_back(v);
                        }
                    }
                    Op::Pop => prop_assert_eq!(q.try_pop(), model.pop_front()),
                }
                prop_assert_eq!(q.size(), model.len());
                prop_assert!(q.size() <= 5);
                prop_assert_eq!(q.is_full(), model.len() == 5);
                prop_assert_eq!(q.is_empty(), model.is_empty());
            }
        }
    }
}
