/// Ethernet network interface: bring-up, removal, receive task, link
/// output and multicast filters on top of a [`NetDevice`](crate::hal::NetDevice).
///
/// Bring-up sequence (`EtherIf::setup`):
///   1. open `net` + ('a' + channel) from the device table
///   2. read the station address
///   3. create the event channel and attach it to the device
///   4. negotiate the receive buffer size
///   5. start the receive task
///   6. join the IPv6 all-nodes groups when enabled
///
/// Any failure undoes what was done and aborts bring-up.
pub mod mcast;
pub mod pbuf;
pub mod phy;
pub mod rx;
mod tx;


use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;
use smoltcp::wire::{EthernetAddress, Ipv6Address};
use spin::Mutex;

use crate::config::{NetifConfig, ETHER_DRV_BUFF_SIZE, ETH_MIN_FRAME_LENGTH, NETIF_MTU};
use crate::hal::{unit_name, Attr, AttrId, DevError, DeviceHandle, DeviceTable, EventRing, EventSink, NetRxBufSz};
use crate::sys::{Sys, TaskId};

pub use mcast::{multicast_mac, FilterAction, FilterList};
pub use pbuf::StackBuf;
pub use phy::{RxQueue, SmoltcpDevice};
pub use rx::{classify, Delivery, FrameKind, RxTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetifError {
    Memory,
    Argument,
    NotFound,
    /// Device rejected a filter update.
    Interface,
    Timeout,
    Io,
    FrameTooLarge,
    Device(DevError),
}

impl fmt::Display for NetifError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NetifError::Memory => write!(f, "out of memory"),
            NetifError::Argument => write!(f, "invalid argument"),
            NetifError::NotFound => write!(f, "not found"),
            NetifError::Interface => write!(f, "interface error"),
            NetifError::Timeout => write!(f, "timed out"),
            NetifError::Io => write!(f, "I/O error"),
            NetifError::FrameTooLarge => write!(f, "frame too large"),
            NetifError::Device(e) => write!(f, "device: {}", e),
        }
    }
}

impl From<DevError> for NetifError {
    fn from(e: DevError) -> Self {
        match e {
            DevError::Timeout => NetifError::Timeout,
            DevError::Io => NetifError::Io,
            other => NetifError::Device(other),
        }
    }
}

/// The stack's input hook. Takes ownership of the frame; dropping it
/// (whether accepted or refused) releases the buffer.
pub trait StackInput: Send + Sync {
    fn input(&self, frame: StackBuf) -> Result<(), NetifError>;
}

bitflags! {
    /// Interface flags, same bit values as the stack's `NETIF_FLAG_*`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NetifFlags: u8 {
        const UP        = 0x01;
        const BROADCAST = 0x02;
        const LINK_UP   = 0x04;
        const ETHARP    = 0x08;
        const ETHERNET  = 0x10;
        const IGMP      = 0x20;
        const MLD6      = 0x40;
    }
}

/// What the stack learns about the interface at bring-up.
#[derive(Debug, Clone, Copy)]
pub struct NetifInfo {
    pub name: [u8; 2],
    pub hwaddr: EthernetAddress,
    pub mtu: u16,
    pub flags: NetifFlags,
    pub hostname: &'static str,
}

impl NetifInfo {
    pub fn name_str(&self) -> &str {
        core::str::from_utf8(&self.name[..1]).unwrap_or("?")
    }
}

/// IPv6 all-nodes groups joined at bring-up.
pub const ALLNODES_IF_LOCAL: Ipv6Address = Ipv6Address::new(0xff01, 0, 0, 0, 0, 0, 0, 1);
pub const ALLNODES_LINK_LOCAL: Ipv6Address = Ipv6Address::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

pub struct EtherIf {
    info: NetifInfo,
    device: DeviceHandle,
    events: EventSink,
    output: Mutex<Vec<u8>>,
    tx_headroom: usize,
    /// Largest frame the device sends, queried at bring-up.
    tx_max: usize,
    filters: Mutex<FilterList>,
    rx_task: TaskId,
}

impl EtherIf {
    pub fn setup(
        sys: &Sys,
        devices: &DeviceTable,
        input: Arc<dyn StackInput>,
        config: &NetifConfig,
    ) -> Result<Arc<EtherIf>, NetifError> {
        let devname = unit_name(config.channel as usize).ok_or(NetifError::Argument)?;
        let device = devices.open(&devname).map_err(|e| {
            log::warn!("[netif] open {} failed: {}", devname, e);
            NetifError::Device(e)
        })?;

        match Self::attach(sys, &device, input, config) {
            Ok(netif) => Ok(netif),
            Err(e) => {
                log::warn!("[netif] bring-up on {} failed: {}", devname, e);
                if let Err(ce) = device.close() {
                    log::warn!("[netif] {}: device close failed: {}", devname, ce);
                }
                Err(e)
            }
        }
    }

    fn attach(
        sys: &Sys,
        device: &DeviceHandle,
        input: Arc<dyn StackInput>,
        config: &NetifConfig,
    ) -> Result<Arc<EtherIf>, NetifError> {
        let hwaddr = match device.read_attr(AttrId::NetAddr)? {
            Attr::NetAddr(addr) => addr,
            _ => return Err(NetifError::Device(DevError::System)),
        };

        let events: EventSink = Arc::new(EventRing::new(sys.kernel().clone(), config.event_depth));
        device.write_attr(Attr::NetEvent(Some(events.clone())))?;
        device.write_attr(Attr::NetRxBufSz(NetRxBufSz {
            min: ETH_MIN_FRAME_LENGTH,
            max: ETHER_DRV_BUFF_SIZE,
        }))?;
        let tx_max = device.write_data(&[])?.min(ETHER_DRV_BUFF_SIZE);

        let task = RxTask::new(events.clone(), device.clone(), input, config.pppoe);
        let rx_task = sys
            .thread_new("netif-rx", move || task.run(), config.rx_task_stack, config.rx_task_priority)
            .map_err(|_| NetifError::Memory)?;

        let mut flags = NetifFlags::BROADCAST | NetifFlags::ETHARP | NetifFlags::LINK_UP | NetifFlags::IGMP;
        if config.ipv6 {
            flags |= NetifFlags::MLD6;
        }
        let info = NetifInfo {
            name: [b'0' + config.channel, 0],
            hwaddr,
            mtu: NETIF_MTU,
            flags,
            hostname: config.hostname,
        };

        let netif = Arc::new(EtherIf {
            info,
            device: device.clone(),
            events,
            output: Mutex::new(vec![0u8; config.tx_headroom + ETHER_DRV_BUFF_SIZE]),
            tx_headroom: config.tx_headroom,
            tx_max,
            filters: Mutex::new(FilterList::new()),
            rx_task,
        });

        if config.ipv6 {
            for group in [ALLNODES_IF_LOCAL, ALLNODES_LINK_LOCAL] {
                if let Err(e) = netif.mld_mac_filter(group, FilterAction::Add) {
                    log::warn!("[netif] join {} failed: {}", group, e);
                }
            }
        }

        log::info!(
            "[netif] {} up on {}: hwaddr {}, mtu {}, rx task {}",
            netif.info.name_str(),
            device.name(),
            hwaddr,
            NETIF_MTU,
            rx_task.0
        );
        Ok(netif)
    }

    /// Detach from the device and stop the receive task.
    pub fn remove(&self) {
        if let Err(e) = self.device.close() {
            log::warn!("[netif] {}: device close failed: {}", self.info.name_str(), e);
        }
        self.events.close();
        log::info!("[netif] {} removed", self.info.name_str());
    }

    pub fn info(&self) -> &NetifInfo {
        &self.info
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn rx_task(&self) -> TaskId {
        self.rx_task
    }
}

impl fmt::Debug for EtherIf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EtherIf")
            .field("name", &self.info.name_str())
            .field("device", &self.device)
            .field("rx_task", &self.rx_task.0)
            .finish()
    }
}
