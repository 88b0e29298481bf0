//! Fixed-capacity pool of pre-allocated items with free and ready sets
//!
//! Items move free → (filled by the producer) → ready → (consumed) → free.
//! The producer acquires a free item, fills it and publishes it; the consumer
//! takes ready items and releases them. Both sets are backed by a `PoolQueue`
//! strategy chosen at construction:
//!
//! - `QueueProfile::SingleThreaded` uses a lock-free bounded queue. This is the
//!   direct-submit profile, where producer and consumer are the same thread.
//! - `QueueProfile::Shared` uses a mutex and condition variable so a separate
//!   decode thread can block on the ready set.
//!
//! Items leave the pool as `Pooled<T>` handles. Dropping a handle returns the
//! item to the free set after running the cleanup hook, so the hook runs
//! exactly once per acquisition.

use crate::capability::Capabilities;
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::Backoff;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Queue strategy backing the free and ready sets of a `BufferPool`
pub trait PoolQueue<T>: Send + Sync {
    /// Push an item, handing it back if the queue is full
    fn push(&self, item: T) -> Result<(), T>;

    /// Pop an item without blocking
    fn pop(&self) -> Option<T>;

    /// Pop an item, waiting until one is available
    ///
    /// Returns `None` only once the queue has been interrupted.
    fn pop_blocking(&self) -> Option<T>;

    /// Wake every blocked waiter and make further blocking pops return `None`
    fn interrupt(&self);

    /// Number of queued items
    fn len(&self) -> usize;

    /// Check if the queue is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lock-free bounded queue for the single-threaded (direct-submit) profile
pub struct LockFreeQueue<T> {
    queue: ArrayQueue<T>,
    interrupted: AtomicBool,
}

impl<T> LockFreeQueue<T> {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        LockFreeQueue {
            queue: ArrayQueue::new(capacity.max(1)),
            interrupted: AtomicBool::new(false),
        }
    }
}

impl<T: Send> PoolQueue<T> for LockFreeQueue<T> {
    fn push(&self, item: T) -> Result<(), T> {
        self.queue.push(item)
    }

    fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    fn pop_blocking(&self) -> Option<T> {
        let backoff = Backoff::new();
        loop {
            if self.interrupted.load(Ordering::Acquire) {
                return None;
            }
            if let Some(item) = self.queue.pop() {
                return Some(item);
            }
            if backoff.is_completed() {
                thread::sleep(Duration::from_micros(100));
            } else {
                backoff.snooze();
            }
        }
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

struct BlockingState<T> {
    items: VecDeque<T>,
    interrupted: bool,
}

/// Mutex and condition variable queue for the shared (decode thread) profile
pub struct BlockingQueue<T> {
    state: Mutex<BlockingState<T>>,
    available: Condvar,
    capacity: usize,
}

impl<T> BlockingQueue<T> {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        BlockingQueue {
            state: Mutex::new(BlockingState {
                items: VecDeque::with_capacity(capacity),
                interrupted: false,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
        }
    }
}

impl<T: Send> PoolQueue<T> for BlockingQueue<T> {
    fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.items.len() >= self.capacity {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    fn pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    fn pop_blocking(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.interrupted {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            self.available.wait(&mut state);
        }
    }

    fn interrupt(&self) {
        self.state.lock().interrupted = true;
        self.available.notify_all();
    }

    fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}

/// Concurrency profile of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueProfile {
    /// Producer and consumer run on the same thread
    SingleThreaded,
    /// The consumer runs on its own thread and blocks on the ready set
    Shared,
}

impl QueueProfile {
    /// Pick the profile matching a decode consumer's capabilities
    pub fn for_capabilities(capabilities: Capabilities) -> Self {
        if capabilities.contains(Capabilities::DIRECT_SUBMIT) {
            QueueProfile::SingleThreaded
        } else {
            QueueProfile::Shared
        }
    }

    fn queue<T: Send + 'static>(self, capacity: usize) -> Box<dyn PoolQueue<T>> {
        match self {
            QueueProfile::SingleThreaded => Box::new(LockFreeQueue::new(capacity)),
            QueueProfile::Shared => Box::new(BlockingQueue::new(capacity)),
        }
    }
}

type CleanupHook<T> = Box<dyn Fn(&mut T) + Send + Sync>;

struct PoolInner<T> {
    free: Box<dyn PoolQueue<T>>,
    ready: Box<dyn PoolQueue<T>>,
    cleanup: Option<CleanupHook<T>>,
    capacity: usize,
    profile: QueueProfile,
}

/// Fixed-capacity pool of reusable items
pub struct BufferPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        BufferPool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> BufferPool<T> {
    /// Create a pool of `capacity` items built by `factory`
    pub fn new<F>(capacity: usize, profile: QueueProfile, factory: F) -> Self
    where
        F: FnMut() -> T,
    {
        Self::build(capacity, profile, factory, None)
    }

    /// Create a pool whose items pass through `cleanup` on every release
    pub fn new_with_cleanup<F, C>(
        capacity: usize,
        profile: QueueProfile,
        factory: F,
        cleanup: C,
    ) -> Self
    where
        F: FnMut() -> T,
        C: Fn(&mut T) + Send + Sync + 'static,
    {
        Self::build(capacity, profile, factory, Some(Box::new(cleanup)))
    }

    fn build<F>(
        capacity: usize,
        profile: QueueProfile,
        mut factory: F,
        cleanup: Option<CleanupHook<T>>,
    ) -> Self
    where
        F: FnMut() -> T,
    {
        let capacity = capacity.max(1);
        let free = profile.queue(capacity);
        for _ in 0..capacity {
            // Sized to capacity, cannot overflow
            let _ = free.push(factory());
        }

        BufferPool {
            inner: Arc::new(PoolInner {
                free,
                ready: profile.queue(capacity),
                cleanup,
                capacity,
                profile,
            }),
        }
    }

    fn wrap(&self, item: T) -> Pooled<T> {
        Pooled {
            item: Some(item),
            pool: self.clone(),
        }
    }

    fn recycle(&self, mut item: T) {
        if let Some(cleanup) = &self.inner.cleanup {
            cleanup(&mut item);
        }
        if self.inner.free.push(item).is_err() {
            warn!("pool free set full on release, discarding item");
        }
    }

    /// Take a free item without blocking
    pub fn acquire_free(&self) -> Option<Pooled<T>> {
        self.inner.free.pop().map(|item| self.wrap(item))
    }

    /// Take a free item, waiting until one is released
    ///
    /// Returns `None` once the pool has been interrupted.
    pub fn acquire_free_blocking(&self) -> Option<Pooled<T>> {
        self.inner.free.pop_blocking().map(|item| self.wrap(item))
    }

    /// Move a filled item to the ready set
    pub fn publish(&self, mut item: Pooled<T>) {
        let Some(inner) = item.item.take() else {
            return;
        };
        if let Err(inner) = self.inner.ready.push(inner) {
            warn!("pool ready set full on publish, releasing item");
            self.recycle(inner);
        }
    }

    /// Take the oldest ready item without blocking
    pub fn take_ready(&self) -> Option<Pooled<T>> {
        self.inner.ready.pop().map(|item| self.wrap(item))
    }

    /// Take the oldest ready item, waiting until one is published
    ///
    /// Returns `None` once the pool has been interrupted.
    pub fn take_ready_blocking(&self) -> Option<Pooled<T>> {
        self.inner.ready.pop_blocking().map(|item| self.wrap(item))
    }

    /// Return an item to the free set
    ///
    /// Same as dropping the handle.
    pub fn release(&self, item: Pooled<T>) {
        drop(item);
    }

    /// Release every ready item, returning how many were released
    pub fn flush_ready(&self) -> usize {
        let mut flushed = 0;
        while let Some(item) = self.inner.ready.pop() {
            self.recycle(item);
            flushed += 1;
        }
        if flushed > 0 {
            debug!(flushed, "flushed ready pool");
        }
        flushed
    }

    /// Release the oldest ready item, returning false if none was ready
    pub fn drop_oldest_ready(&self) -> bool {
        match self.inner.ready.pop() {
            Some(item) => {
                self.recycle(item);
                true
            }
            None => false,
        }
    }

    /// Wake every blocked waiter for shutdown
    pub fn interrupt(&self) {
        self.inner.free.interrupt();
        self.inner.ready.interrupt();
    }

    /// Number of free items
    pub fn free_len(&self) -> usize {
        self.inner.free.len()
    }

    /// Number of ready items
    pub fn ready_len(&self) -> usize {
        self.inner.ready.len()
    }

    /// Total number of items owned by the pool
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Concurrency profile chosen at construction
    pub fn profile(&self) -> QueueProfile {
        self.inner.profile
    }
}

impl<T> fmt::Debug for BufferPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.inner.capacity)
            .field("profile", &self.inner.profile)
            .field("free", &self.inner.free.len())
            .field("ready", &self.inner.ready.len())
            .finish()
    }
}

/// An item checked out of a `BufferPool`
///
/// Dropping the handle returns the item to the pool's free set.
pub struct Pooled<T: Send + 'static> {
    item: Option<T>,
    pool: BufferPool<T>,
}

impl<T: Send + 'static> Pooled<T> {
    /// Pool this item belongs to
    pub fn pool(&self) -> &BufferPool<T> {
        &self.pool
    }
}

impl<T: Send + 'static> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only emptied by publish or drop, which consume the handle
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled item accessed after release"),
        }
    }
}

impl<T: Send + 'static> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled item accessed after release"),
        }
    }
}

impl<T: Send + 'static> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.recycle(item);
        }
    }
}

impl<T: Send + fmt::Debug + 'static> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.item).finish()
    }
}
