/// Process-wide recursive critical section (`sys_arch_protect`).
///
/// An exclusive binary semaphore plus an owner/depth pair keyed by the
/// current task. Same-task re-entry only bumps the depth. Never taken from
/// interrupt context.
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use super::kernel::{Kernel, TaskId, Timeout};
use super::sem::Semaphore;

/// Nesting depth observed when the section was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtToken(pub u32);

pub struct RecursiveLock {
    lock: Semaphore,
    owner: AtomicU32,
    depth: AtomicU32,
    kernel: Arc<dyn Kernel>,
}

impl RecursiveLock {
    pub fn new(kernel: Arc<dyn Kernel>) -> Self {
        Self {
            lock: Semaphore::new(kernel.clone(), 1),
            owner: AtomicU32::new(TaskId::NONE.0),
            depth: AtomicU32::new(0),
            kernel,
        }
    }

    pub fn protect(&self) -> ProtToken {
        let me = self.kernel.current_task();
        // Only the owner can observe its own id here.
        if self.owner.load(Ordering::Acquire) != me.0 {
            while self.lock.wait(Timeout::Forever).is_err() {}
            self.owner.store(me.0, Ordering::Release);
        }
        ProtToken(self.depth.fetch_add(1, Ordering::AcqRel))
    }

    /// Leave one level. A call from a task that does not own the lock does nothing.
    pub fn unprotect(&self, _token: ProtToken) {
        let me = self.kernel.current_task();
        if self.owner.load(Ordering::Acquire) != me.0 {
            return;
        }
        if self.depth.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.owner.store(TaskId::NONE.0, Ordering::Release);
            self.lock.signal();
        }
    }

    pub fn owner(&self) -> Option<TaskId> {
        let id = TaskId(self.owner.load(Ordering::Acquire));
        if id.is_none() {
            None
        } else {
            Some(id)
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Acquire)
    }
}
