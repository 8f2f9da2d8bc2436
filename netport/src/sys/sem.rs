/// Counting semaphore with a ceiling, binary by default.
use alloc::sync::Arc;
use spin::Mutex;

use super::kernel::{Deadline, Kernel, Timeout};
use super::wait::WaitQueue;
use super::{ObjectSlot, SysError};

/// Semaphore handle. Clones refer to the same kernel object.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<SemInner>,
}

struct SemInner {
    count: Mutex<u32>,
    max: u32,
    waiters: WaitQueue,
    kernel: Arc<dyn Kernel>,
    _slot: Option<ObjectSlot>,
}

impl Semaphore {
    /// Binary semaphore (ceiling 1).
    pub fn new(kernel: Arc<dyn Kernel>, initial: u32) -> Self {
        Self::with_max(kernel, initial, 1)
    }

    /// Counting semaphore; `initial` is clamped to `max`.
    pub fn with_max(kernel: Arc<dyn Kernel>, initial: u32, max: u32) -> Self {
        Self::build(kernel, initial, max, None)
    }

    pub(crate) fn build(kernel: Arc<dyn Kernel>, initial: u32, max: u32, slot: Option<ObjectSlot>) -> Self {
        let max = max.max(1);
        Self {
            inner: Arc::new(SemInner {
                count: Mutex::new(initial.min(max)),
                max,
                waiters: WaitQueue::new(),
                kernel,
                _slot: slot,
            }),
        }
    }

    /// Take one count. Returns the milliseconds spent waiting.
    pub fn wait(&self, timeout: Timeout) -> Result<u32, SysError> {
        let kernel = &*self.inner.kernel;
        let deadline = Deadline::new(kernel, timeout);
        match self.inner.waiters.block_on(kernel, timeout, || self.take()) {
            Some(()) => Ok(deadline.elapsed(kernel)),
            None => Err(SysError::Timeout),
        }
    }

    pub fn try_wait(&self) -> bool {
        self.take().is_some()
    }

    /// Add one count (saturating at the ceiling) and wake one waiter.
    pub fn signal(&self) {
        {
            let mut count = self.inner.count.lock();
            if *count < self.inner.max {
                *count += 1;
            }
        }
        self.inner.waiters.wake_one(&*self.inner.kernel);
    }

    pub fn count(&self) -> u32 {
        *self.inner.count.lock()
    }

    pub fn same_object(&self, other: &Semaphore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn take(&self) -> Option<()> {
        let mut count = self.inner.count.lock();
        if *count > 0 {
            *count -= 1;
            Some(())
        } else {
            None
        }
    }
}
