/// Free receive buffer queue, shared by the MAC interrupt and tasks.
///
/// Task-side pushes mask the MAC's interrupt line around the queue
/// operation; the interrupt handler runs with that line already masked.
/// The backing deque is reserved for the whole pool up front, so a push
/// never allocates. The length is kept in an atomic so it can be read from
/// any context without taking the queue lock.
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use super::mac::{IrqControl, IrqGuard, IrqLine};
use crate::mem::{FrameBuf, Owner};

pub struct FreeQueue {
    bufs: Mutex<VecDeque<FrameBuf>>,
    queued: AtomicUsize,
    irq: Arc<dyn IrqControl>,
    line: IrqLine,
    priority: u8,
}

impl FreeQueue {
    pub fn new(capacity: usize, irq: Arc<dyn IrqControl>, line: IrqLine, priority: u8) -> Self {
        Self {
            bufs: Mutex::new(VecDeque::with_capacity(capacity)),
            queued: AtomicUsize::new(0),
            irq,
            line,
            priority,
        }
    }

    /// Mask the MAC interrupt until the guard drops.
    pub fn mask(&self) -> IrqGuard<'_> {
        IrqGuard::new(&*self.irq, self.line, self.priority)
    }

    /// Return a buffer from task context.
    pub fn return_buffer(&self, buf: FrameBuf) {
        let _mask = self.mask();
        self.return_from_isr(buf);
    }

    /// Return a buffer from the interrupt handler, or with the line already masked.
    pub fn return_from_isr(&self, buf: FrameBuf) {
        buf.set_owner(Owner::Free);
        let mut bufs = self.bufs.lock();
        bufs.push_back(buf);
        self.queued.store(bufs.len(), Ordering::Release);
    }

    /// Take a buffer for re-arming a descriptor. Interrupt context.
    pub fn take_buffer(&self) -> Option<FrameBuf> {
        let mut bufs = self.bufs.lock();
        let buf = bufs.pop_front();
        self.queued.store(bufs.len(), Ordering::Release);
        buf
    }

    /// Take a buffer from task context.
    pub fn take_masked(&self) -> Option<FrameBuf> {
        let _mask = self.mask();
        self.take_buffer()
    }

    /// Buffers queued. Never takes the queue lock.
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
