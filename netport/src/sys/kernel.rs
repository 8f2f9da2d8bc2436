/// Kernel seam: what the port needs from the real-time kernel.
///
/// Everything that blocks in this crate is built from five calls: who is
/// running, what time is it, park the current task, wake a task, create a
/// task. The board glue implements [`Kernel`] over the real scheduler;
/// host tests use `std_kernel::StdKernel`.
use alloc::boxed::Box;
use core::fmt;

/// Kernel task identifier. Zero is reserved for "no task".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

impl TaskId {
    pub const NONE: TaskId = TaskId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// How long a blocking call may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Forever,
    Millis(u32),
}

impl Timeout {
    /// Stack convention: 0 means wait forever.
    pub fn from_ms(ms: u32) -> Self {
        if ms == 0 {
            Timeout::Forever
        } else {
            Timeout::Millis(ms)
        }
    }
}

/// Parameters for a new kernel task.
#[derive(Debug, Clone, Copy)]
pub struct ThreadSpec {
    pub name: &'static str,
    pub stack_size: usize,
    pub priority: u8,
}

pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No task control block or stack memory left.
    NoMemory,
    /// Bad stack size or priority.
    Param,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelError::NoMemory => write!(f, "out of kernel memory"),
            KernelError::Param => write!(f, "invalid task parameter"),
        }
    }
}

/// The real-time kernel as seen by the port.
///
/// `sleep`/`wakeup` follow the wakeup-count model of `tk_slp_tsk` /
/// `tk_wup_tsk`: a wakeup delivered before the target sleeps is not lost,
/// and `sleep` may return early. Callers always re-check their condition.
pub trait Kernel: Send + Sync {
    /// Identity of the calling task. Never [`TaskId::NONE`].
    fn current_task(&self) -> TaskId;

    /// Millisecond tick. Wraps at 32 bits.
    fn now_ms(&self) -> u32;

    /// Park the calling task until woken or until `timeout` passes.
    fn sleep(&self, timeout: Timeout);

    /// Wake `task`. Callable from interrupt context.
    fn wakeup(&self, task: TaskId);

    /// Create and start a task.
    fn spawn(&self, spec: ThreadSpec, entry: ThreadEntry) -> Result<TaskId, KernelError>;
}

/// Milliseconds between two `now_ms` readings, across wraparound.
pub fn elapsed_ms(start: u32, now: u32) -> u32 {
    now.wrapping_sub(start)
}

/// A timeout pinned to the moment a blocking call started.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    start: u32,
    timeout: Timeout,
}

impl Deadline {
    pub fn new(kernel: &dyn Kernel, timeout: Timeout) -> Self {
        Self { start: kernel.now_ms(), timeout }
    }

    pub fn elapsed(&self, kernel: &dyn Kernel) -> u32 {
        elapsed_ms(self.start, kernel.now_ms())
    }

    /// Time left to sleep, or `None` once the bound has passed.
    pub fn remaining(&self, kernel: &dyn Kernel) -> Option<Timeout> {
        match self.timeout {
            Timeout::Forever => Some(Timeout::Forever),
            Timeout::Millis(ms) => {
                let spent = self.elapsed(kernel);
                if spent >= ms {
                    None
                } else {
                    Some(Timeout::Millis(ms - spent))
                }
            }
        }
    }
}
