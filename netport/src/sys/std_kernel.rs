/// Host-side [`Kernel`] for unit tests: std threads stand in for kernel
/// tasks, park/unpark for sleep/wakeup.
use std::cell::Cell;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};
use std::vec::Vec;

use super::kernel::{Kernel, KernelError, TaskId, ThreadEntry, ThreadSpec, Timeout};

static NEXT_ID: AtomicU32 = AtomicU32::new(1);
static THREADS: Mutex<Vec<(u32, Thread)>> = Mutex::new(Vec::new());

std::thread_local! {
    static CURRENT: Cell<u32> = Cell::new(0);
}

fn register(id: u32) {
    CURRENT.with(|c| c.set(id));
    THREADS.lock().unwrap().push((id, thread::current()));
}

pub struct StdKernel {
    base: Instant,
    clock_offset: u32,
    spawn_limit: Option<usize>,
    spawned: AtomicUsize,
}

impl StdKernel {
    pub fn new() -> Arc<Self> {
        Self::build(0, None)
    }

    /// Clock starting at `offset` ms, for wraparound tests.
    pub fn with_clock_offset(offset: u32) -> Arc<Self> {
        Self::build(offset, None)
    }

    /// Fails every spawn past the first `limit`.
    pub fn with_spawn_limit(limit: usize) -> Arc<Self> {
        Self::build(0, Some(limit))
    }

    fn build(clock_offset: u32, spawn_limit: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            base: Instant::now(),
            clock_offset,
            spawn_limit,
            spawned: AtomicUsize::new(0),
        })
    }
}

impl Kernel for StdKernel {
    fn current_task(&self) -> TaskId {
        let id = CURRENT.with(|c| c.get());
        if id != 0 {
            return TaskId(id);
        }
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        register(id);
        TaskId(id)
    }

    fn now_ms(&self) -> u32 {
        (self.base.elapsed().as_millis() as u64 as u32).wrapping_add(self.clock_offset)
    }

    fn sleep(&self, timeout: Timeout) {
        match timeout {
            Timeout::Forever => thread::park(),
            Timeout::Millis(ms) => thread::park_timeout(Duration::from_millis(ms as u64)),
        }
    }

    fn wakeup(&self, task: TaskId) {
        let threads = THREADS.lock().unwrap();
        if let Some((_, t)) = threads.iter().find(|(id, _)| *id == task.0) {
            t.unpark();
        }
    }

    fn spawn(&self, spec: ThreadSpec, entry: ThreadEntry) -> Result<TaskId, KernelError> {
        if let Some(limit) = self.spawn_limit {
            if self.spawned.fetch_add(1, Ordering::AcqRel) >= limit {
                return Err(KernelError::NoMemory);
            }
        }
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(spec.name.into())
            .stack_size(spec.stack_size.max(256 * 1024))
            .spawn(move || {
                register(id);
                entry();
            })
            .map_err(|_| KernelError::NoMemory)?;
        Ok(TaskId(id))
    }
}
