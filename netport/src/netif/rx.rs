/// Receive task: block on the event channel, wrap, classify, deliver.
use alloc::sync::Arc;
use smoltcp::wire::{EthernetFrame, EthernetProtocol};

use super::pbuf::StackBuf;
use super::StackInput;
use crate::hal::{DeviceHandle, EventSink, NetEvent};

pub const ETHTYPE_PPPOEDISC: u16 = 0x8863;
pub const ETHTYPE_PPPOE: u16 = 0x8864;

/// EtherTypes handed to the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Ipv4,
    Arp,
    Ipv6,
    PppoeDiscovery,
    PppoeSession,
}

/// What happened to one received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered(FrameKind),
    /// The stack's input hook rejected it (and released it).
    Refused(FrameKind),
    /// Unrecognized type or runt frame; released here.
    Dropped,
}

/// Classify an Ethernet frame. `None` for runts and unhandled types.
pub fn classify(frame: &[u8], pppoe: bool) -> Option<FrameKind> {
    let eth = EthernetFrame::new_checked(frame).ok()?;
    match eth.ethertype() {
        EthernetProtocol::Ipv4 => Some(FrameKind::Ipv4),
        EthernetProtocol::Arp => Some(FrameKind::Arp),
        EthernetProtocol::Ipv6 => Some(FrameKind::Ipv6),
        EthernetProtocol::Unknown(ETHTYPE_PPPOEDISC) if pppoe => Some(FrameKind::PppoeDiscovery),
        EthernetProtocol::Unknown(ETHTYPE_PPPOE) if pppoe => Some(FrameKind::PppoeSession),
        _ => None,
    }
}

pub struct RxTask {
    events: EventSink,
    device: DeviceHandle,
    input: Arc<dyn StackInput>,
    pppoe: bool,
}

impl RxTask {
    pub fn new(events: EventSink, device: DeviceHandle, input: Arc<dyn StackInput>, pppoe: bool) -> Self {
        Self { events, device, input, pppoe }
    }

    /// Task body. Returns once the channel is closed and drained.
    pub fn run(self) {
        log::info!("[netif] rx task on {} running", self.device.name());
        while let Some(event) = self.events.recv() {
            self.deliver(event);
        }
        log::info!("[netif] rx task on {} stopped", self.device.name());
    }

    pub fn deliver(&self, event: NetEvent) -> Delivery {
        let frame = StackBuf::wrap(event, self.device.clone());
        let kind = match classify(frame.payload(), self.pppoe) {
            Some(kind) => kind,
            None => {
                log::trace!("[netif] rx: dropped {} byte frame of unhandled type", frame.len());
                return Delivery::Dropped;
            }
        };
        match self.input.input(frame) {
            Ok(()) => Delivery::Delivered(kind),
            Err(e) => {
                log::debug!("[netif] rx: stack refused {:?} frame: {}", kind, e);
                Delivery::Refused(kind)
            }
        }
    }
}
