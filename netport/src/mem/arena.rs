/// Receive buffer arena: N fixed, aligned slots carved once at bring-up.
///
/// The arena comes either from the global allocator or from a board's
/// DMA-reachable region (`BufferPlacement`). Slots are zeroed, never
/// resized, never freed individually; the pool size is constant for the
/// life of the driver.
use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use super::frame::{FrameBuf, Owner, OwnershipViolation};
use crate::config::BufferPlacement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Zero buffers or zero-sized buffers requested.
    Empty,
    /// Alignment not a power of two, or too many slots.
    BadLayout,
    OutOfMemory,
    RegionTooSmall { needed: usize, available: usize },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PoolError::Empty => write!(f, "empty buffer pool"),
            PoolError::BadLayout => write!(f, "invalid buffer layout"),
            PoolError::OutOfMemory => write!(f, "out of memory for buffer pool"),
            PoolError::RegionTooSmall { needed, available } => {
                write!(f, "buffer region too small: need {} bytes, have {}", needed, available)
            }
        }
    }
}

pub(crate) struct Slot {
    pub owner: AtomicU8,
    pub generation: AtomicU32,
}

pub(crate) struct Arena {
    base: NonNull<u8>,
    stride: usize,
    buf_size: usize,
    slots: Box<[Slot]>,
    /// Set when the arena came from the global allocator.
    heap_layout: Option<Layout>,
    violations: AtomicU32,
    minted: AtomicBool,
}

// Slot memory is reached only through the slot's single FrameBuf; the
// bookkeeping is atomic.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    #[inline]
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    #[inline]
    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    #[inline]
    pub fn slot_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.count());
        unsafe { self.base.as_ptr().add(index * self.stride) }
    }

    pub fn record_violation(&self, v: &OwnershipViolation) {
        self.violations.fetch_add(1, Ordering::Relaxed);
        log::error!("[mem] ownership violation: {}", v);
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if let Some(layout) = self.heap_layout {
            unsafe { dealloc(self.base.as_ptr(), layout) };
        }
    }
}

/// Snapshot of where every buffer is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Census {
    pub free: usize,
    pub hardware: usize,
    pub in_flight: usize,
    pub stack: usize,
}

impl Census {
    pub fn total(&self) -> usize {
        self.free + self.hardware + self.in_flight + self.stack
    }
}

/// Shared view of one arena.
#[derive(Clone)]
pub struct BufferPool {
    arena: Arc<Arena>,
}

impl BufferPool {
    pub fn new(count: usize, buf_size: usize, align: usize, placement: &BufferPlacement) -> Result<Self, PoolError> {
        if count == 0 || buf_size == 0 {
            return Err(PoolError::Empty);
        }
        if !align.is_power_of_two() || count > u16::MAX as usize {
            return Err(PoolError::BadLayout);
        }
        let stride = (buf_size + align - 1) & !(align - 1);
        let total = stride.checked_mul(count).ok_or(PoolError::BadLayout)?;

        let (base, heap_layout) = match *placement {
            BufferPlacement::Heap => {
                let layout = Layout::from_size_align(total, align).map_err(|_| PoolError::BadLayout)?;
                let raw = unsafe { alloc_zeroed(layout) };
                let base = NonNull::new(raw).ok_or(PoolError::OutOfMemory)?;
                (base, Some(layout))
            }
            BufferPlacement::Region { base, len } => {
                let addr = base.as_ptr() as usize;
                let pad = (align - addr % align) % align;
                let needed = pad + total;
                if len < needed {
                    return Err(PoolError::RegionTooSmall { needed, available: len });
                }
                let start = unsafe { base.as_ptr().add(pad) };
                unsafe { ptr::write_bytes(start, 0, total) };
                let start = NonNull::new(start).ok_or(PoolError::BadLayout)?;
                (start, None)
            }
        };

        let slots: Vec<Slot> = (0..count)
            .map(|_| Slot { owner: AtomicU8::new(Owner::Free as u8), generation: AtomicU32::new(0) })
            .collect();

        log::debug!("[mem] buffer pool: {} x {} bytes (stride {}) at {:#x}", count, buf_size, stride, base.as_ptr() as usize);

        Ok(Self {
            arena: Arc::new(Arena {
                base,
                stride,
                buf_size,
                slots: slots.into_boxed_slice(),
                heap_layout,
                violations: AtomicU32::new(0),
                minted: AtomicBool::new(false),
            }),
        })
    }

    /// Every buffer of the pool, exactly once. Later calls return `None`.
    pub fn take_all(&self) -> Option<Vec<FrameBuf>> {
        if self.arena.minted.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some((0..self.arena.count()).map(|i| FrameBuf::new(self.arena.clone(), i as u16)).collect())
    }

    pub fn len(&self) -> usize {
        self.arena.count()
    }

    pub fn buf_size(&self) -> usize {
        self.arena.buf_size()
    }

    pub fn census(&self) -> Census {
        let mut c = Census::default();
        for slot in self.arena.slots.iter() {
            match Owner::from_u8(slot.owner.load(Ordering::Acquire)) {
                Owner::Free => c.free += 1,
                Owner::Hardware => c.hardware += 1,
                Owner::InFlight => c.in_flight += 1,
                Owner::Stack => c.stack += 1,
            }
        }
        c
    }

    pub fn owner_of(&self, index: usize) -> Option<Owner> {
        self.arena.slots.get(index).map(|s| Owner::from_u8(s.owner.load(Ordering::Acquire)))
    }

    /// Ownership violations detected so far.
    pub fn violations(&self) -> u32 {
        self.arena.violations.load(Ordering::Relaxed)
    }

    pub(crate) fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RX_BUF_ALIGN, RX_BUF_SIZE};

    #[test]
    fn heap_pool_is_aligned_and_zeroed() {
        let pool = BufferPool::new(4, 1514, RX_BUF_ALIGN, &BufferPlacement::Heap).unwrap();
        let bufs = pool.take_all().unwrap();
        assert_eq!(bufs.len(), 4);
        for b in &bufs {
            assert_eq!(b.dma_addr() % RX_BUF_ALIGN, 0);
            assert_eq!(b.capacity(), 1514);
            assert!(b.as_slice().iter().all(|&x| x == 0));
        }
        assert_eq!(bufs[1].dma_addr() - bufs[0].dma_addr(), 1536);
    }

    #[test]
    fn buffers_are_minted_once() {
        let pool = BufferPool::new(2, RX_BUF_SIZE, RX_BUF_ALIGN, &BufferPlacement::Heap).unwrap();
        assert!(pool.take_all().is_some());
        assert!(pool.take_all().is_none());
    }

    #[test]
    fn region_placement() {
        let mut backing = std::vec![0u8; 3 * RX_BUF_SIZE + RX_BUF_ALIGN];
        let addr = backing.as_mut_ptr() as usize;
        let placement = unsafe { BufferPlacement::region(addr, backing.len()).unwrap() };
        let pool = BufferPool::new(3, RX_BUF_SIZE, RX_BUF_ALIGN, &placement).unwrap();
        let mut bufs = pool.take_all().unwrap();
        assert!(bufs[0].dma_addr() >= addr);
        assert_eq!(bufs[0].dma_addr() % RX_BUF_ALIGN, 0);
        bufs[2].as_mut_slice()[0] = 0xAB;
        assert!(bufs[2].dma_addr() + RX_BUF_SIZE <= addr + backing.len());
        drop(bufs);
        drop(pool);
        assert!(backing.contains(&0xAB));
    }

    #[test]
    fn region_too_small() {
        let mut backing = std::vec![0u8; RX_BUF_SIZE];
        let placement = unsafe { BufferPlacement::region(backing.as_mut_ptr() as usize, backing.len()).unwrap() };
        assert!(matches!(
            BufferPool::new(2, RX_BUF_SIZE, RX_BUF_ALIGN, &placement),
            Err(PoolError::RegionTooSmall { .. })
        ));
    }

    #[test]
    fn census_tracks_owner_tags() {
        let pool = BufferPool::new(4, 64, 32, &BufferPlacement::Heap).unwrap();
        let bufs = pool.take_all().unwrap();
        bufs[0].set_owner(Owner::Hardware);
        bufs[1].set_owner(Owner::InFlight);
        assert_eq!(pool.census(), Census { free: 2, hardware: 1, in_flight: 1, stack: 0 });
        let generation = bufs[1].enter_stack();
        assert_eq!(pool.census().stack, 1);
        assert!(bufs[1].leave_stack(generation).is_ok());
        assert_eq!(pool.census().total(), 4);
        assert_eq!(pool.violations(), 0);
    }

    #[test]
    fn forged_second_release_is_detected() {
        let pool = BufferPool::new(2, 64, 32, &BufferPlacement::Heap).unwrap();
        let bufs = pool.take_all().unwrap();
        bufs[0].set_owner(Owner::InFlight);
        let generation = bufs[0].enter_stack();
        let forged = unsafe { FrameBuf::from_tag(&pool, bufs[0].tag()).unwrap() };
        assert!(bufs[0].leave_stack(generation).is_ok());
        let err = forged.leave_stack(generation).unwrap_err();
        assert_eq!(err.found, Owner::Free);
        assert_eq!(pool.violations(), 1);
    }
}
