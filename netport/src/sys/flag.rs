/// Event flag: a bit pattern set from interrupt context, waited on by one task.
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use super::kernel::{Deadline, Kernel, TaskId, Timeout};
use super::SysError;

pub struct EventFlag {
    bits: AtomicU32,
    waiter: AtomicU32,
    kernel: Arc<dyn Kernel>,
}

impl EventFlag {
    pub fn new(kernel: Arc<dyn Kernel>) -> Self {
        Self {
            bits: AtomicU32::new(0),
            waiter: AtomicU32::new(TaskId::NONE.0),
            kernel,
        }
    }

    /// OR `bits` into the pattern and wake the waiter. Interrupt-safe.
    pub fn set(&self, bits: u32) {
        self.bits.fetch_or(bits, Ordering::AcqRel);
        let waiter = self.waiter.load(Ordering::Acquire);
        if waiter != TaskId::NONE.0 {
            self.kernel.wakeup(TaskId(waiter));
        }
    }

    pub fn clear(&self, mask: u32) {
        self.bits.fetch_and(!mask, Ordering::AcqRel);
    }

    pub fn peek(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    /// Wait until any bit of `mask` is set, then clear the matched bits.
    /// Returns the matched pattern. One waiter at a time.
    pub fn wait_any_clear(&self, mask: u32, timeout: Timeout) -> Result<u32, SysError> {
        let kernel = &*self.kernel;
        let deadline = Deadline::new(kernel, timeout);
        let me = kernel.current_task();
        loop {
            if let Some(hit) = self.take(mask) {
                return Ok(hit);
            }
            self.waiter.store(me.0, Ordering::Release);
            if let Some(hit) = self.take(mask) {
                self.waiter.store(TaskId::NONE.0, Ordering::Release);
                return Ok(hit);
            }
            match deadline.remaining(kernel) {
                Some(left) => kernel.sleep(left),
                None => {
                    self.waiter.store(TaskId::NONE.0, Ordering::Release);
                    return Err(SysError::Timeout);
                }
            }
            self.waiter.store(TaskId::NONE.0, Ordering::Release);
        }
    }

    fn take(&self, mask: u32) -> Option<u32> {
        let hit = self.bits.fetch_and(!mask, Ordering::AcqRel) & mask;
        if hit != 0 {
            Some(hit)
        } else {
            None
        }
    }
}
