/// Vendor MAC seam and interrupt-line masking.
///
/// The vendor SDK owns the descriptor rings and registers. The driver only
/// needs: open, the station address, start a transmit, poll the PHY,
/// pop completed receive records and arm descriptors with buffers.
use core::fmt;
use smoltcp::wire::EthernetAddress;

use crate::config::ETH_MAX_FRAME_LENGTH;
use crate::mem::FrameBuf;

/// A completed receive descriptor: the landed buffer and the frame length.
#[derive(Debug)]
pub struct RxRecord {
    pub buf: FrameBuf,
    pub len: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacError {
    /// Transmit descriptor still owned by the DMA.
    Busy,
    Io,
    NotOpen,
    Unsupported,
}

impl fmt::Display for MacError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MacError::Busy => write!(f, "MAC busy"),
            MacError::Io => write!(f, "MAC I/O error"),
            MacError::NotOpen => write!(f, "MAC not open"),
            MacError::Unsupported => write!(f, "not supported by MAC"),
        }
    }
}

pub trait EtherMac: Send {
    fn open(&mut self) -> Result<(), MacError>;

    fn mac_address(&self) -> EthernetAddress;

    fn max_frame_len(&self) -> usize {
        ETH_MAX_FRAME_LENGTH
    }

    /// Receive descriptors in the ring; each needs one buffer armed at start.
    fn rx_slots(&self) -> usize;

    /// Start sending `frame`. Completion arrives later as a device event.
    fn transmit(&mut self, frame: &[u8]) -> Result<(), MacError>;

    /// Poll the PHY and return whether the link is up.
    fn link_process(&mut self) -> bool;

    /// Pop the oldest completed receive descriptor. Its slot stays empty
    /// until the next `rx_arm`.
    fn rx_read(&mut self) -> Option<RxRecord>;

    /// Hand `buf` to the first empty descriptor.
    fn rx_arm(&mut self, buf: FrameBuf);

    /// Descriptors currently without a buffer.
    fn rx_starving(&self) -> usize;

    /// Program the hardware multicast hash/perfect filter.
    fn set_multicast(&mut self, _table: &[EthernetAddress]) -> Result<(), MacError> {
        Err(MacError::Unsupported)
    }

    fn accept_all_multicast(&mut self, _on: bool) -> Result<(), MacError> {
        Err(MacError::Unsupported)
    }

    /// Interrupt line of the MAC.
    fn irq_line(&self) -> IrqLine;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqLine(pub u32);

/// Per-line interrupt masking (`DisableInt` / `EnableInt`).
pub trait IrqControl: Send + Sync {
    fn disable(&self, line: IrqLine);
    fn enable(&self, line: IrqLine, priority: u8);
}

/// Masks one interrupt line for its lifetime.
pub struct IrqGuard<'a> {
    irq: &'a dyn IrqControl,
    line: IrqLine,
    priority: u8,
}

impl<'a> IrqGuard<'a> {
    pub fn new(irq: &'a dyn IrqControl, line: IrqLine, priority: u8) -> Self {
        irq.disable(line);
        Self { irq, line, priority }
    }
}

impl Drop for IrqGuard<'_> {
    fn drop(&mut self) {
        self.irq.enable(self.line, self.priority);
    }
}
