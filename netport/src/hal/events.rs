/// Interrupt → task event channel.
///
/// A lock-free `heapless` MPMC queue with a runtime depth limit. The
/// interrupt side only ever calls [`EventRing::try_send`], which never
/// blocks; the single consumer task parks in [`EventRing::recv`].
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use heapless::mpmc::MpMcQueue;

use crate::config::RX_EVENT_DEPTH;
use crate::sys::kernel::{Deadline, Kernel, TaskId, Timeout};

pub enum SendError<T> {
    /// Channel at its depth limit.
    Full(T),
    Closed(T),
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SendError::Full(v) | SendError::Closed(v) => v,
        }
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SendError::Full(_) => write!(f, "Full(..)"),
            SendError::Closed(_) => write!(f, "Closed(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    Timeout,
    Closed,
}

pub struct EventRing<T> {
    queue: MpMcQueue<T, RX_EVENT_DEPTH>,
    len: AtomicUsize,
    limit: usize,
    consumer: AtomicU32,
    closed: AtomicBool,
    kernel: Arc<dyn Kernel>,
}

impl<T> fmt::Debug for EventRing<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EventRing")
            .field("len", &self.len())
            .field("depth", &self.limit)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> EventRing<T> {
    /// `depth` is clamped to `1..=RX_EVENT_DEPTH`.
    pub fn new(kernel: Arc<dyn Kernel>, depth: usize) -> Self {
        Self {
            queue: MpMcQueue::new(),
            len: AtomicUsize::new(0),
            limit: depth.clamp(1, RX_EVENT_DEPTH),
            consumer: AtomicU32::new(TaskId::NONE.0),
            closed: AtomicBool::new(false),
            kernel,
        }
    }

    /// Post without blocking. Interrupt-safe.
    pub fn try_send(&self, item: T) -> Result<(), SendError<T>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed(item));
        }
        if self.len.fetch_add(1, Ordering::AcqRel) >= self.limit {
            self.len.fetch_sub(1, Ordering::AcqRel);
            return Err(SendError::Full(item));
        }
        if let Err(item) = self.queue.enqueue(item) {
            self.len.fetch_sub(1, Ordering::AcqRel);
            return Err(SendError::Full(item));
        }
        let consumer = self.consumer.load(Ordering::Acquire);
        if consumer != TaskId::NONE.0 {
            self.kernel.wakeup(TaskId(consumer));
        }
        Ok(())
    }

    pub fn try_recv(&self) -> Option<T> {
        let item = self.queue.dequeue()?;
        self.len.fetch_sub(1, Ordering::AcqRel);
        Some(item)
    }

    /// Block until an event arrives. `None` once closed and drained.
    pub fn recv(&self) -> Option<T> {
        self.recv_timeout(Timeout::Forever).ok()
    }

    pub fn recv_timeout(&self, timeout: Timeout) -> Result<T, RecvError> {
        let kernel = &*self.kernel;
        let deadline = Deadline::new(kernel, timeout);
        let me = kernel.current_task();
        loop {
            if let Some(item) = self.try_recv() {
                return Ok(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(RecvError::Closed);
            }
            self.consumer.store(me.0, Ordering::Release);
            if let Some(item) = self.try_recv() {
                self.consumer.store(TaskId::NONE.0, Ordering::Release);
                return Ok(item);
            }
            match deadline.remaining(kernel) {
                Some(left) if !self.closed.load(Ordering::Acquire) => kernel.sleep(left),
                Some(_) => {}
                None => {
                    self.consumer.store(TaskId::NONE.0, Ordering::Release);
                    return Err(RecvError::Timeout);
                }
            }
            self.consumer.store(TaskId::NONE.0, Ordering::Release);
        }
    }

    /// Stop the channel: further sends fail, the consumer drains and ends.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let consumer = self.consumer.load(Ordering::Acquire);
        if consumer != TaskId::NONE.0 {
            self.kernel.wakeup(TaskId(consumer));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn depth(&self) -> usize {
        self.limit
    }
}
