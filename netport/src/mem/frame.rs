/// One receive buffer slot, owned by exactly one party at a time.
///
/// A `FrameBuf` is a move-only handle to a fixed slot of a
/// [`BufferPool`](super::BufferPool) arena. Only one handle per slot is ever
/// minted, so holding it is holding the buffer. Each slot also carries an
/// owner tag and a generation counter; hand-offs that cross the stack
/// boundary are checked against both so a forged second release is caught
/// instead of queueing the same memory twice.
use alloc::sync::Arc;
use core::fmt;
use core::slice;
use core::sync::atomic::Ordering;

use super::arena::{Arena, BufferPool};

/// Who currently holds a buffer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Sitting in the free queue.
    Free = 0,
    /// Armed in a hardware receive descriptor (or being drained by the ISR).
    Hardware = 1,
    /// Posted to the event channel, not yet wrapped by the receive task.
    InFlight = 2,
    /// Wrapped in a stack buffer object.
    Stack = 3,
}

impl Owner {
    pub(crate) fn from_u8(v: u8) -> Owner {
        match v {
            1 => Owner::Hardware,
            2 => Owner::InFlight,
            3 => Owner::Stack,
            _ => Owner::Free,
        }
    }
}

/// Slot index plus the generation it was handed to the stack under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferTag {
    pub index: u16,
    pub generation: u32,
}

/// A buffer was handed back by a party that does not own it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipViolation {
    pub index: u16,
    /// Owner tag found in the slot.
    pub found: Owner,
    /// The release carried an out-of-date generation.
    pub stale: bool,
}

impl fmt::Display for OwnershipViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "buffer {} released while owned by {:?}", self.index, self.found)?;
        if self.stale {
            write!(f, " (stale generation)")?;
        }
        Ok(())
    }
}

pub struct FrameBuf {
    arena: Arc<Arena>,
    index: u16,
}

impl FrameBuf {
    pub(crate) fn new(arena: Arc<Arena>, index: u16) -> Self {
        Self { arena, index }
    }

    /// Rebuild a handle from a tag handed out earlier.
    ///
    /// Returns `None` if the index is outside the pool.
    ///
    /// # Safety
    /// Creates a second handle to a slot whose original handle may still
    /// exist. The caller must guarantee the original is gone (for instance
    /// it was leaked across an FFI boundary). Releasing both is detected as
    /// an [`OwnershipViolation`] but reading through both is undefined.
    pub unsafe fn from_tag(pool: &BufferPool, tag: BufferTag) -> Option<FrameBuf> {
        let arena = pool.arena();
        if (tag.index as usize) < arena.count() {
            Some(FrameBuf::new(arena.clone(), tag.index))
        } else {
            None
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Usable bytes in the slot.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.arena.buf_size()
    }

    /// Address the MAC DMA engine is programmed with.
    #[inline]
    pub fn dma_addr(&self) -> usize {
        self.arena.slot_ptr(self.index()) as usize
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.arena.slot_ptr(self.index()), self.capacity()) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.arena.slot_ptr(self.index()), self.capacity()) }
    }

    pub fn owner(&self) -> Owner {
        Owner::from_u8(self.arena.slot(self.index()).owner.load(Ordering::Acquire))
    }

    pub fn tag(&self) -> BufferTag {
        BufferTag {
            index: self.index,
            generation: self.arena.slot(self.index()).generation.load(Ordering::Acquire),
        }
    }

    pub fn same_pool_as(&self, pool: &BufferPool) -> bool {
        Arc::ptr_eq(&self.arena, pool.arena())
    }

    /// Both handles come from the same pool.
    pub fn same_pool(&self, other: &FrameBuf) -> bool {
        Arc::ptr_eq(&self.arena, &other.arena)
    }

    pub(crate) fn set_owner(&self, owner: Owner) {
        self.arena.slot(self.index()).owner.store(owner as u8, Ordering::Release);
    }

    /// In-flight → stack. Starts a new generation and returns it.
    pub(crate) fn enter_stack(&self) -> u32 {
        let slot = self.arena.slot(self.index());
        let prev = slot.owner.swap(Owner::Stack as u8, Ordering::AcqRel);
        if prev != Owner::InFlight as u8 {
            let v = OwnershipViolation { index: self.index, found: Owner::from_u8(prev), stale: false };
            self.arena.record_violation(&v);
        }
        slot.generation.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Stack → free, only for the generation the stack was handed.
    pub(crate) fn leave_stack(&self, generation: u32) -> Result<(), OwnershipViolation> {
        let slot = self.arena.slot(self.index());
        let current = slot.generation.load(Ordering::Acquire);
        let stale = current != generation;
        let swapped = if stale {
            Err(slot.owner.load(Ordering::Acquire))
        } else {
            slot.owner
                .compare_exchange(Owner::Stack as u8, Owner::Free as u8, Ordering::AcqRel, Ordering::Acquire)
        };
        match swapped {
            Ok(_) => Ok(()),
            Err(found) => {
                let v = OwnershipViolation { index: self.index, found: Owner::from_u8(found), stale };
                self.arena.record_violation(&v);
                Err(v)
            }
        }
    }
}

impl fmt::Debug for FrameBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FrameBuf")
            .field("index", &self.index)
            .field("owner", &self.owner())
            .finish()
    }
}

// A slot is only reachable through its single handle.
unsafe impl Send for FrameBuf {}
unsafe impl Sync for FrameBuf {}
