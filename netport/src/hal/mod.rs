/// Device layer: the Ethernet MAC driver behind a request/response
/// interface, the free receive buffer queue and the interrupt bridge.
///
/// Devices are registered in a [`DeviceTable`] owned by the initializer
/// and opened by name (`neta`, `netb`, ...). The interface layer only sees
/// the [`NetDevice`] trait object behind a [`DeviceHandle`].
pub mod attr;
pub mod bridge;
pub mod driver;
pub mod events;
pub mod freeq;
pub mod mac;

#[cfg(any(test, feature = "mock-mac"))]
pub mod mock_mac;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Deref;
use heapless::String as HString;

use crate::config::{DEVNAME_NET, NET_UNIT_MAX};
use crate::mem::{BufferPool, FrameBuf};

pub use attr::{Attr, AttrId, EventSink, McastTable, NetEvent, NetRxBufSz, NetStInfo};
pub use driver::HalNet;
pub use events::{EventRing, RecvError, SendError};
pub use freeq::FreeQueue;
pub use mac::{EtherMac, IrqControl, IrqGuard, IrqLine, MacError, RxRecord};

/// Device-layer errors, mirroring the kernel's error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevError {
    Param,
    NotSupported,
    Io,
    Timeout,
    NoMedia,
    /// Device not initialized.
    Context,
    NoMemory,
    System,
    NoDevice,
}

impl DevError {
    /// Numeric kernel error code.
    pub fn code(self) -> i32 {
        match self {
            DevError::System => -5,
            DevError::NotSupported => -9,
            DevError::Param => -17,
            DevError::Context => -25,
            DevError::NoMemory => -33,
            DevError::NoDevice => -42,
            DevError::Timeout => -50,
            DevError::Io => -57,
            DevError::NoMedia => -58,
        }
    }
}

impl fmt::Display for DevError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DevError::Param => write!(f, "invalid parameter"),
            DevError::NotSupported => write!(f, "not supported"),
            DevError::Io => write!(f, "I/O error"),
            DevError::Timeout => write!(f, "timed out"),
            DevError::NoMedia => write!(f, "no link"),
            DevError::Context => write!(f, "device not initialized"),
            DevError::NoMemory => write!(f, "out of memory"),
            DevError::System => write!(f, "system error"),
            DevError::NoDevice => write!(f, "no such device"),
        }
    }
}

impl From<MacError> for DevError {
    fn from(e: MacError) -> Self {
        match e {
            MacError::Unsupported => DevError::NotSupported,
            MacError::NotOpen => DevError::Context,
            MacError::Busy | MacError::Io => DevError::Io,
        }
    }
}

/// Hardware events delivered to the driver in interrupt context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    LinkUp,
    LinkDown,
    RxComplete,
    TxComplete,
    TxAborted,
}

/// Request/response interface of a network device.
pub trait NetDevice: Send + Sync {
    fn unit(&self) -> usize;

    fn name(&self) -> &str;

    fn open(&self) -> Result<(), DevError>;

    fn close(&self) -> Result<(), DevError>;

    fn read_attr(&self, id: AttrId) -> Result<Attr, DevError>;

    fn write_attr(&self, attr: Attr) -> Result<(), DevError>;

    /// Hand a receive buffer back to the device (the `NetRxBuf` write).
    /// A buffer the device does not own is returned with the error.
    fn release_rx_buf(&self, buf: FrameBuf) -> Result<(), (DevError, FrameBuf)>;

    /// Pool the device's receive buffers come from.
    fn rx_pool(&self) -> Option<&BufferPool> {
        None
    }

    /// Receive is event-driven; data reads are not supported.
    fn read_data(&self, _buf: &mut [u8]) -> Result<usize, DevError> {
        Err(DevError::NotSupported)
    }

    /// Send one frame. An empty write returns the largest frame size.
    fn write_data(&self, frame: &[u8]) -> Result<usize, DevError>;

    /// Raw-code entry point: unknown codes are a parameter error.
    fn read_attr_code(&self, code: i32) -> Result<Attr, DevError> {
        let id = AttrId::try_from(code).map_err(|_| DevError::Param)?;
        self.read_attr(id)
    }
}

/// Device name for a unit: `"net"` + ('a' + unit).
pub fn unit_name(unit: usize) -> Option<HString<8>> {
    if unit >= NET_UNIT_MAX {
        return None;
    }
    let mut name = HString::new();
    name.push_str(DEVNAME_NET).ok()?;
    name.push((b'a' + unit as u8) as char).ok()?;
    Some(name)
}

/// An opened device.
#[derive(Clone)]
pub struct DeviceHandle {
    dev: Arc<dyn NetDevice>,
}

impl Deref for DeviceHandle {
    type Target = dyn NetDevice;

    fn deref(&self) -> &Self::Target {
        &*self.dev
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DeviceHandle({})", self.dev.name())
    }
}

/// Registered network devices by unit.
pub struct DeviceTable {
    units: Vec<Option<Arc<dyn NetDevice>>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        let mut units = Vec::with_capacity(NET_UNIT_MAX);
        units.resize_with(NET_UNIT_MAX, || None);
        Self { units }
    }

    pub fn register(&mut self, dev: Arc<dyn NetDevice>) -> Result<(), DevError> {
        let unit = dev.unit();
        let slot = self.units.get_mut(unit).ok_or(DevError::Param)?;
        if slot.is_some() {
            log::warn!("[hal-net] unit {} already registered", unit);
            return Err(DevError::Param);
        }
        log::info!("[hal-net] registered {}", dev.name());
        *slot = Some(dev);
        Ok(())
    }

    pub fn open(&self, name: &str) -> Result<DeviceHandle, DevError> {
        let dev = self
            .units
            .iter()
            .flatten()
            .find(|d| d.name() == name)
            .ok_or(DevError::NoDevice)?;
        dev.open()?;
        Ok(DeviceHandle { dev: dev.clone() })
    }

    pub fn unregister(&mut self, unit: usize) -> Option<Arc<dyn NetDevice>> {
        self.units.get_mut(unit).and_then(|s| s.take())
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}
