/// Mailboxes backed by one process-wide fixed block pool.
///
/// Every queued message holds one [`Block`] until it is fetched. When the
/// pool runs dry, `post` parks the sender and `try_post` hands the message
/// back; nothing is ever over-committed.
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use super::kernel::{Deadline, Kernel, Timeout};
use super::wait::WaitQueue;
use super::{ObjectSlot, SysError};

/// Fixed pool of message blocks shared by every mailbox.
pub struct BlockPool {
    capacity: usize,
    available: AtomicUsize,
    waiters: WaitQueue,
    kernel: Arc<dyn Kernel>,
}

impl BlockPool {
    pub fn new(kernel: Arc<dyn Kernel>, capacity: usize) -> Result<Arc<Self>, SysError> {
        if capacity == 0 {
            return Err(SysError::OutOfResources);
        }
        Ok(Arc::new(Self {
            capacity,
            available: AtomicUsize::new(capacity),
            waiters: WaitQueue::new(),
            kernel,
        }))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    pub fn try_alloc(self: &Arc<Self>) -> Option<Block> {
        let mut cur = self.available.load(Ordering::Acquire);
        loop {
            if cur == 0 {
                return None;
            }
            match self.available.compare_exchange_weak(cur, cur - 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Some(Block { pool: self.clone() }),
                Err(seen) => cur = seen,
            }
        }
    }

    /// Take a block, parking until one is returned.
    pub fn alloc(self: &Arc<Self>, timeout: Timeout) -> Option<Block> {
        self.waiters.block_on(&*self.kernel, timeout, || self.try_alloc())
    }
}

/// One message block. Returned to its pool on drop.
pub struct Block {
    pool: Arc<BlockPool>,
}

impl Drop for Block {
    fn drop(&mut self) {
        self.pool.available.fetch_add(1, Ordering::AcqRel);
        self.pool.waiters.wake_one(&*self.pool.kernel);
    }
}

/// Non-blocking post failed; the message comes back to the caller.
pub struct Full<T>(pub T);

impl<T> Full<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Full(..)")
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "mailbox full")
    }
}

/// Mailbox handle. Clones refer to the same kernel object.
pub struct Mailbox<T> {
    inner: Arc<MboxInner<T>>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

struct MboxInner<T> {
    queue: Mutex<VecDeque<(Block, T)>>,
    /// Per-mailbox bound on top of the pool (0 = pool only).
    capacity: usize,
    receivers: WaitQueue,
    senders: WaitQueue,
    pool: Arc<BlockPool>,
    kernel: Arc<dyn Kernel>,
    _slot: Option<ObjectSlot>,
}

impl<T: Send> Mailbox<T> {
    pub fn new(pool: Arc<BlockPool>, capacity: usize) -> Self {
        Self::build(pool, capacity, None)
    }

    pub(crate) fn build(pool: Arc<BlockPool>, capacity: usize, slot: Option<ObjectSlot>) -> Self {
        let kernel = pool.kernel.clone();
        Self {
            inner: Arc::new(MboxInner {
                queue: Mutex::new(VecDeque::new()),
                capacity,
                receivers: WaitQueue::new(),
                senders: WaitQueue::new(),
                pool,
                kernel,
                _slot: slot,
            }),
        }
    }

    /// Queue `msg`, parking while the pool or the mailbox is full.
    pub fn post(&self, msg: T) {
        let kernel = &*self.inner.kernel;
        let mut pending = Some(msg);
        let mut block = None;
        loop {
            if block.is_none() {
                block = self.inner.pool.alloc(Timeout::Forever);
            }
            let queued = self.inner.senders.block_on(kernel, Timeout::Forever, || {
                let mut q = self.inner.queue.lock();
                if self.has_room(&q) {
                    if let (Some(b), Some(m)) = (block.take(), pending.take()) {
                        q.push_back((b, m));
                    }
                    Some(())
                } else {
                    None
                }
            });
            if queued.is_some() && pending.is_none() {
                break;
            }
        }
        self.inner.receivers.wake_one(kernel);
    }

    /// Queue `msg` without blocking.
    pub fn try_post(&self, msg: T) -> Result<(), Full<T>> {
        let block = match self.inner.pool.try_alloc() {
            Some(b) => b,
            None => return Err(Full(msg)),
        };
        {
            let mut q = self.inner.queue.lock();
            if !self.has_room(&q) {
                return Err(Full(msg));
            }
            q.push_back((block, msg));
        }
        self.inner.receivers.wake_one(&*self.inner.kernel);
        Ok(())
    }

    /// Take the oldest message. Returns it with the milliseconds waited.
    pub fn fetch(&self, timeout: Timeout) -> Result<(T, u32), SysError> {
        let kernel = &*self.inner.kernel;
        let deadline = Deadline::new(kernel, timeout);
        match self.inner.receivers.block_on(kernel, timeout, || self.pop()) {
            Some(msg) => Ok((msg, deadline.elapsed(kernel))),
            None => Err(SysError::Timeout),
        }
    }

    pub fn try_fetch(&self) -> Result<T, SysError> {
        self.pop().ok_or(SysError::Empty)
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn has_room(&self, q: &VecDeque<(Block, T)>) -> bool {
        self.inner.capacity == 0 || q.len() < self.inner.capacity
    }

    fn pop(&self) -> Option<T> {
        let (block, msg) = self.inner.queue.lock().pop_front()?;
        drop(block);
        self.inner.senders.wake_one(&*self.inner.kernel);
        Some(msg)
    }
}
