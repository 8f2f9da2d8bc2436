/// OS primitives the TCP/IP stack runs on: semaphores, mailboxes, the
/// recursive protect section, thread creation and the millisecond clock.
///
/// [`Sys`] is the facade the stack port calls. It applies the stack's
/// conventions (0 ms = wait forever, 0 stack/priority = defaults) and
/// bounds object creation like the kernel's object table would.
pub mod flag;
pub mod kernel;
pub mod mbox;
pub mod protect;
pub mod sem;
pub mod wait;

#[cfg(test)]
pub mod std_kernel;

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{SysConfig, DEFAULT_THREAD_PRIO, DEFAULT_THREAD_STACKSIZE};

pub use flag::EventFlag;
pub use kernel::{elapsed_ms, Kernel, KernelError, TaskId, ThreadSpec, Timeout};
pub use mbox::{Block, BlockPool, Full, Mailbox};
pub use protect::{ProtToken, RecursiveLock};
pub use sem::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
    /// Kernel object table, memory or block pool exhausted.
    OutOfResources,
    Timeout,
    Full,
    Empty,
}

impl fmt::Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SysError::OutOfResources => write!(f, "out of kernel resources"),
            SysError::Timeout => write!(f, "timed out"),
            SysError::Full => write!(f, "mailbox full"),
            SysError::Empty => write!(f, "mailbox empty"),
        }
    }
}

impl From<KernelError> for SysError {
    fn from(_: KernelError) -> Self {
        SysError::OutOfResources
    }
}

/// Bounded count of live kernel objects of one kind.
pub(crate) struct ObjectQuota {
    used: AtomicUsize,
    limit: usize,
}

impl ObjectQuota {
    fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self { used: AtomicUsize::new(0), limit })
    }

    fn acquire(self: &Arc<Self>) -> Option<ObjectSlot> {
        let mut cur = self.used.load(Ordering::Acquire);
        loop {
            if cur >= self.limit {
                return None;
            }
            match self.used.compare_exchange_weak(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Some(ObjectSlot { quota: self.clone() }),
                Err(seen) => cur = seen,
            }
        }
    }

    fn in_use(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }
}

/// One occupied entry of an [`ObjectQuota`], freed on drop.
pub(crate) struct ObjectSlot {
    quota: Arc<ObjectQuota>,
}

impl Drop for ObjectSlot {
    fn drop(&mut self) {
        self.quota.used.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The stack-facing OS layer.
pub struct Sys {
    kernel: Arc<dyn Kernel>,
    blocks: Arc<BlockPool>,
    prot: RecursiveLock,
    semaphores: Arc<ObjectQuota>,
    mailboxes: Arc<ObjectQuota>,
}

impl Sys {
    /// Create the mailbox block pool and the protect section.
    pub fn new(kernel: Arc<dyn Kernel>, config: &SysConfig) -> Result<Self, SysError> {
        let blocks = BlockPool::new(kernel.clone(), config.mailbox_blocks)?;
        log::info!(
            "[sys] init: {} mailbox blocks, {} semaphores, {} mailboxes",
            config.mailbox_blocks,
            config.max_semaphores,
            config.max_mailboxes
        );
        Ok(Self {
            prot: RecursiveLock::new(kernel.clone()),
            kernel,
            blocks,
            semaphores: ObjectQuota::new(config.max_semaphores),
            mailboxes: ObjectQuota::new(config.max_mailboxes),
        })
    }

    pub fn kernel(&self) -> &Arc<dyn Kernel> {
        &self.kernel
    }

    pub fn block_pool(&self) -> &Arc<BlockPool> {
        &self.blocks
    }

    // ---- Semaphores ----

    /// Binary semaphore with `count` initial tokens.
    pub fn sem_new(&self, count: u8) -> Result<Semaphore, SysError> {
        let slot = self.semaphores.acquire().ok_or_else(|| {
            log::warn!("[sys] semaphore table full ({})", self.semaphores.limit);
            SysError::OutOfResources
        })?;
        Ok(Semaphore::build(self.kernel.clone(), count as u32, 1, Some(slot)))
    }

    /// Returns the milliseconds waited. `timeout_ms == 0` waits forever.
    pub fn sem_wait(&self, sem: &Semaphore, timeout_ms: u32) -> Result<u32, SysError> {
        sem.wait(Timeout::from_ms(timeout_ms))
    }

    pub fn sem_signal(&self, sem: &Semaphore) {
        sem.signal();
    }

    pub fn semaphores_in_use(&self) -> usize {
        self.semaphores.in_use()
    }

    // ---- Mailboxes ----

    /// `capacity == 0` bounds the mailbox by the shared block pool only.
    pub fn mbox_new<T: Send>(&self, capacity: usize) -> Result<Mailbox<T>, SysError> {
        let slot = self.mailboxes.acquire().ok_or_else(|| {
            log::warn!("[sys] mailbox table full ({})", self.mailboxes.limit);
            SysError::OutOfResources
        })?;
        Ok(Mailbox::build(self.blocks.clone(), capacity, Some(slot)))
    }

    pub fn mbox_post<T: Send>(&self, mbox: &Mailbox<T>, msg: T) {
        mbox.post(msg);
    }

    pub fn mbox_trypost<T: Send>(&self, mbox: &Mailbox<T>, msg: T) -> Result<(), Full<T>> {
        mbox.try_post(msg)
    }

    /// Returns the message and the milliseconds waited. `timeout_ms == 0` waits forever.
    pub fn mbox_fetch<T: Send>(&self, mbox: &Mailbox<T>, timeout_ms: u32) -> Result<(T, u32), SysError> {
        mbox.fetch(Timeout::from_ms(timeout_ms))
    }

    pub fn mbox_tryfetch<T: Send>(&self, mbox: &Mailbox<T>) -> Result<T, SysError> {
        mbox.try_fetch()
    }

    pub fn mailboxes_in_use(&self) -> usize {
        self.mailboxes.in_use()
    }

    // ---- Protect section ----

    pub fn protect(&self) -> ProtToken {
        self.prot.protect()
    }

    pub fn unprotect(&self, token: ProtToken) {
        self.prot.unprotect(token)
    }

    pub fn protect_lock(&self) -> &RecursiveLock {
        &self.prot
    }

    // ---- Threads and time ----

    /// Start a task. Zero `stack_size` or `priority` selects the default.
    pub fn thread_new<F>(&self, name: &'static str, entry: F, stack_size: usize, priority: u8) -> Result<TaskId, SysError>
    where
        F: FnOnce() + Send + 'static,
    {
        let spec = ThreadSpec {
            name,
            stack_size: if stack_size == 0 { DEFAULT_THREAD_STACKSIZE } else { stack_size },
            priority: if priority == 0 { DEFAULT_THREAD_PRIO } else { priority },
        };
        match self.kernel.spawn(spec, Box::new(entry)) {
            Ok(id) => {
                log::debug!("[sys] thread {} started as task {} (prio {}, stack {})", name, id.0, spec.priority, spec.stack_size);
                Ok(id)
            }
            Err(e) => {
                log::warn!("[sys] thread {} not created: {}", name, e);
                Err(e.into())
            }
        }
    }

    /// Milliseconds since boot, wrapping at 32 bits.
    pub fn now(&self) -> u32 {
        self.kernel.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std_kernel::StdKernel;

    fn sys_with(config: SysConfig) -> Sys {
        Sys::new(StdKernel::new(), &config).unwrap()
    }

    #[test]
    fn semaphore_quota() {
        let sys = sys_with(SysConfig { max_semaphores: 2, ..SysConfig::default() });
        let a = sys.sem_new(0).unwrap();
        let _b = sys.sem_new(1).unwrap();
        assert!(matches!(sys.sem_new(0), Err(SysError::OutOfResources)));
        drop(a);
        assert_eq!(sys.semaphores_in_use(), 1);
        assert!(sys.sem_new(0).is_ok());
    }

    #[test]
    fn sem_wait_zero_means_forever() {
        let sys = sys_with(SysConfig::default());
        let sem = sys.sem_new(0).unwrap();
        let s = sem.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            s.signal();
        });
        assert!(sys.sem_wait(&sem, 0).is_ok());
        t.join().unwrap();
    }

    #[test]
    fn mailboxes_share_the_block_pool() {
        let sys = sys_with(SysConfig { mailbox_blocks: 3, ..SysConfig::default() });
        let a = sys.mbox_new::<u32>(0).unwrap();
        let b = sys.mbox_new::<u32>(0).unwrap();
        sys.mbox_post(&a, 1);
        sys.mbox_post(&a, 2);
        sys.mbox_post(&b, 3);
        assert!(sys.mbox_trypost(&b, 4).is_err());
        assert_eq!(sys.mbox_tryfetch(&a), Ok(1));
        assert!(sys.mbox_trypost(&b, 4).is_ok());
        assert_eq!(sys.mbox_fetch(&b, 10).map(|(m, _)| m), Ok(3));
    }

    #[test]
    fn thread_new_uses_defaults() {
        let sys = sys_with(SysConfig::default());
        let done = sys.sem_new(0).unwrap();
        let d = done.clone();
        let id = sys.thread_new("worker", move || d.signal(), 0, 0).unwrap();
        assert!(!id.is_none());
        assert!(sys.sem_wait(&done, 1000).is_ok());
    }

    #[test]
    fn thread_new_failure_is_reported() {
        let sys = Sys::new(StdKernel::with_spawn_limit(0), &SysConfig::default()).unwrap();
        assert_eq!(sys.thread_new("t", || {}, 0, 0), Err(SysError::OutOfResources));
    }

    #[test]
    fn clock_wraps() {
        let sys = Sys::new(StdKernel::with_clock_offset(u32::MAX - 5), &SysConfig::default()).unwrap();
        let start = sys.now();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let spent = elapsed_ms(start, sys.now());
        assert!(spent >= 15 && spent < 1000, "spent {}", spent);
    }
}
