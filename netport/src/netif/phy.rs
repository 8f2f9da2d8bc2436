/// smoltcp PHY device adapter.
///
/// The receive task hands frames to an [`RxQueue`] (the interface's input
/// hook); smoltcp's poll loop pulls them out through [`SmoltcpDevice`].
/// Received payloads stay in the DMA buffer until smoltcp has consumed
/// them. Transmit goes through [`EtherIf::link_output`].
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use smoltcp::phy::{self, Device, DeviceCapabilities, Medium};
use smoltcp::time::Instant;
use spin::Mutex;

use super::pbuf::StackBuf;
use super::{EtherIf, NetifError, StackInput};
use crate::config::{DEV_RBUF_NUM, ETH_MAX_FRAME_LENGTH};

/// Bounded queue of received frames waiting for the stack's poll.
pub struct RxQueue {
    frames: Mutex<VecDeque<StackBuf>>,
    limit: usize,
}

impl RxQueue {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(VecDeque::with_capacity(limit)),
            limit,
        })
    }

    pub fn pop(&self) -> Option<StackBuf> {
        self.frames.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RxQueue {
    fn default() -> Self {
        Self { frames: Mutex::new(VecDeque::new()), limit: DEV_RBUF_NUM }
    }
}

impl StackInput for RxQueue {
    fn input(&self, frame: StackBuf) -> Result<(), NetifError> {
        let mut q = self.frames.lock();
        if q.len() >= self.limit {
            // Dropping the frame here releases its buffer.
            return Err(NetifError::Memory);
        }
        q.push_back(frame);
        Ok(())
    }
}

/// Adapter that implements smoltcp's Device trait over an [`EtherIf`].
pub struct SmoltcpDevice {
    netif: Arc<EtherIf>,
    rx: Arc<RxQueue>,
}

impl SmoltcpDevice {
    pub fn new(netif: Arc<EtherIf>, rx: Arc<RxQueue>) -> Self {
        Self { netif, rx }
    }

    pub fn hardware_addr(&self) -> smoltcp::wire::EthernetAddress {
        self.netif.info().hwaddr
    }
}

impl Device for SmoltcpDevice {
    type RxToken<'a> = RxToken;
    type TxToken<'a> = TxToken;

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        let frame = self.rx.pop()?;
        Some((RxToken { frame }, TxToken { netif: self.netif.clone() }))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        Some(TxToken { netif: self.netif.clone() })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.medium = Medium::Ethernet;
        caps.max_transmission_unit = ETH_MAX_FRAME_LENGTH;
        caps.max_burst_size = Some(1);
        caps
    }
}

/// Receive token: a landed frame, released after smoltcp consumes it.
pub struct RxToken {
    frame: StackBuf,
}

impl phy::RxToken for RxToken {
    fn consume<R, F>(mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        f(self.frame.payload_mut())
    }
}

/// Transmit token: smoltcp fills a scratch frame, sent synchronously.
pub struct TxToken {
    netif: Arc<EtherIf>,
}

impl phy::TxToken for TxToken {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut buf = vec![0u8; len];
        let result = f(&mut buf);
        if let Err(e) = self.netif.link_output(&[buf.as_slice()]) {
            log::debug!("[netif] smoltcp transmit of {} bytes failed: {}", len, e);
        }
        result
    }
}
