/// Zero-copy stack buffer wrapping a landed receive buffer.
///
/// The payload is the DMA memory the MAC wrote into. Dropping the
/// `StackBuf` is the release: the raw buffer goes back to the device
/// through [`NetDevice::release_rx_buf`](crate::hal::NetDevice::release_rx_buf),
/// exactly once.
use core::fmt;

use crate::hal::{DeviceHandle, NetEvent};
use crate::mem::{BufferTag, FrameBuf, Owner};

pub struct StackBuf {
    buf: Option<FrameBuf>,
    len: u16,
    generation: u32,
    device: DeviceHandle,
}

impl StackBuf {
    pub(crate) fn wrap(event: NetEvent, device: DeviceHandle) -> Self {
        let NetEvent { buf, len } = event;
        let generation = buf.enter_stack();
        let len = (len as usize).min(buf.capacity()) as u16;
        Self { buf: Some(buf), len, generation, device }
    }

    /// Rebuild a stack buffer from a tag that crossed a raw callback. The
    /// slot is looked up in `device`'s own pool; `None` if the device has
    /// no pool or the index is out of range.
    ///
    /// # Safety
    /// The original `StackBuf` for `tag` must have been leaked (for example
    /// with `core::mem::forget`). Rebuilding from a tag that was already
    /// released is caught at drop as an ownership violation; reading the
    /// payload of such a buffer is undefined.
    pub unsafe fn from_tag(tag: BufferTag, len: u16, device: DeviceHandle) -> Option<Self> {
        let buf = FrameBuf::from_tag(device.rx_pool()?, tag)?;
        Some(Self { buf: Some(buf), len, generation: tag.generation, device })
    }

    pub fn payload(&self) -> &[u8] {
        match &self.buf {
            Some(buf) => &buf.as_slice()[..self.len as usize],
            None => &[],
        }
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let len = self.len as usize;
        match &mut self.buf {
            Some(buf) => &mut buf.as_mut_slice()[..len],
            None => &mut [],
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn tag(&self) -> BufferTag {
        BufferTag {
            index: self.buf.as_ref().map(|b| b.index() as u16).unwrap_or(0),
            generation: self.generation,
        }
    }
}

impl Drop for StackBuf {
    fn drop(&mut self) {
        let buf = match self.buf.take() {
            Some(buf) => buf,
            None => return,
        };
        // A buffer we do not own must not be queued a second time.
        if buf.leave_stack(self.generation).is_err() {
            return;
        }
        if let Err((e, buf)) = self.device.release_rx_buf(buf) {
            log::error!("[netif] rx buffer release to {} failed: {}", self.device.name(), e);
            // Lost to the pool; keep it out of the free count.
            buf.set_owner(Owner::Stack);
        }
    }
}

impl fmt::Debug for StackBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StackBuf")
            .field("tag", &self.tag())
            .field("len", &self.len)
            .finish()
    }
}
