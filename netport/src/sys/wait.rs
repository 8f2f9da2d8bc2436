/// Task wait queue for the task-only primitives (semaphore, mailbox, block pool).
use alloc::collections::VecDeque;
use spin::Mutex;

use super::kernel::{Deadline, Kernel, TaskId, Timeout};

/// FIFO of parked tasks.
pub struct WaitQueue {
    waiters: Mutex<VecDeque<TaskId>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self { waiters: Mutex::new(VecDeque::new()) }
    }

    /// Run `attempt` until it yields a value or `timeout` passes.
    ///
    /// The caller is queued before the second attempt, so a wake issued
    /// between the first attempt and going to sleep is never missed.
    pub fn block_on<T>(
        &self,
        kernel: &dyn Kernel,
        timeout: Timeout,
        mut attempt: impl FnMut() -> Option<T>,
    ) -> Option<T> {
        let deadline = Deadline::new(kernel, timeout);
        let me = kernel.current_task();
        loop {
            if let Some(v) = attempt() {
                return Some(v);
            }
            self.waiters.lock().push_back(me);
            if let Some(v) = attempt() {
                self.remove(me);
                return Some(v);
            }
            match deadline.remaining(kernel) {
                Some(left) => kernel.sleep(left),
                None => {
                    // Popped by a waker we will not serve: pass the wake on.
                    if !self.remove(me) {
                        self.wake_one(kernel);
                    }
                    return None;
                }
            }
            self.remove(me);
        }
    }

    pub fn wake_one(&self, kernel: &dyn Kernel) {
        let next = self.waiters.lock().pop_front();
        if let Some(task) = next {
            kernel.wakeup(task);
        }
    }

    pub fn wake_all(&self, kernel: &dyn Kernel) {
        let all: VecDeque<TaskId> = core::mem::take(&mut *self.waiters.lock());
        for task in all {
            kernel.wakeup(task);
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    fn remove(&self, task: TaskId) -> bool {
        let mut q = self.waiters.lock();
        match q.iter().position(|t| *t == task) {
            Some(pos) => {
                q.remove(pos);
                true
            }
            None => false,
        }
    }
}
