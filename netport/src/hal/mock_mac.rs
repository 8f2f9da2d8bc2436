/// RAM-backed MAC model for testing the driver without hardware.
///
/// Enabled in tests and with the `mock-mac` feature. Received frames are
/// injected through a [`MockHandle`] and land in whatever buffer the
/// driver armed; transmits are recorded instead of sent. Completion and
/// link interrupts are raised by the test calling `HalNet::on_event`.
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use smoltcp::wire::EthernetAddress;
use spin::Mutex;

use super::mac::{EtherMac, IrqControl, IrqLine, MacError, RxRecord};
use crate::mem::FrameBuf;

pub const MOCK_IRQ_LINE: IrqLine = IrqLine(61);

struct MockState {
    opened: bool,
    slots: usize,
    armed: VecDeque<FrameBuf>,
    done: VecDeque<RxRecord>,
    overruns: u32,
    link: bool,
    sent: Vec<Vec<u8>>,
    reject_tx: bool,
    mcast_supported: bool,
    mcast_tables: Vec<Vec<EthernetAddress>>,
    all_mcast: Option<bool>,
}

pub struct MockMac {
    addr: EthernetAddress,
    state: Arc<Mutex<MockState>>,
}

/// Test-side view of a [`MockMac`] after it moved into the driver.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockMac {
    /// A MAC with `rx_slots` receive descriptors, link up, multicast table supported.
    pub fn new(addr: EthernetAddress, rx_slots: usize) -> (MockMac, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            opened: false,
            slots: rx_slots,
            armed: VecDeque::with_capacity(rx_slots),
            done: VecDeque::with_capacity(rx_slots),
            overruns: 0,
            link: true,
            sent: Vec::new(),
            reject_tx: false,
            mcast_supported: true,
            mcast_tables: Vec::new(),
            all_mcast: None,
        }));
        (MockMac { addr, state: state.clone() }, MockHandle { state })
    }
}

impl EtherMac for MockMac {
    fn open(&mut self) -> Result<(), MacError> {
        self.state.lock().opened = true;
        Ok(())
    }

    fn mac_address(&self) -> EthernetAddress {
        self.addr
    }

    fn rx_slots(&self) -> usize {
        self.state.lock().slots
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), MacError> {
        let mut s = self.state.lock();
        if !s.opened {
            return Err(MacError::NotOpen);
        }
        if s.reject_tx {
            return Err(MacError::Busy);
        }
        s.sent.push(frame.to_vec());
        Ok(())
    }

    fn link_process(&mut self) -> bool {
        self.state.lock().link
    }

    fn rx_read(&mut self) -> Option<RxRecord> {
        self.state.lock().done.pop_front()
    }

    fn rx_arm(&mut self, buf: FrameBuf) {
        self.state.lock().armed.push_back(buf);
    }

    fn rx_starving(&self) -> usize {
        let s = self.state.lock();
        s.slots.saturating_sub(s.armed.len() + s.done.len())
    }

    fn set_multicast(&mut self, table: &[EthernetAddress]) -> Result<(), MacError> {
        let mut s = self.state.lock();
        if !s.mcast_supported {
            return Err(MacError::Unsupported);
        }
        s.mcast_tables.push(table.to_vec());
        Ok(())
    }

    fn accept_all_multicast(&mut self, on: bool) -> Result<(), MacError> {
        self.state.lock().all_mcast = Some(on);
        Ok(())
    }

    fn irq_line(&self) -> IrqLine {
        MOCK_IRQ_LINE
    }
}

impl MockHandle {
    /// Land `frame` in the oldest armed descriptor. Returns false (overrun)
    /// if no descriptor holds a buffer.
    pub fn inject(&self, frame: &[u8]) -> bool {
        let mut s = self.state.lock();
        let mut buf = match s.armed.pop_front() {
            Some(buf) => buf,
            None => {
                s.overruns += 1;
                return false;
            }
        };
        let len = frame.len().min(buf.capacity());
        buf.as_mut_slice()[..len].copy_from_slice(&frame[..len]);
        s.done.push_back(RxRecord { buf, len: len as u16 });
        true
    }

    pub fn armed(&self) -> usize {
        self.state.lock().armed.len()
    }

    /// Frames landed but not yet drained by the interrupt.
    pub fn landed(&self) -> usize {
        self.state.lock().done.len()
    }

    pub fn overruns(&self) -> u32 {
        self.state.lock().overruns
    }

    pub fn set_link(&self, up: bool) {
        self.state.lock().link = up;
    }

    pub fn reject_transmits(&self, reject: bool) {
        self.state.lock().reject_tx = reject;
    }

    pub fn set_multicast_supported(&self, supported: bool) {
        self.state.lock().mcast_supported = supported;
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    pub fn tx_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    pub fn mcast_tables(&self) -> Vec<Vec<EthernetAddress>> {
        self.state.lock().mcast_tables.clone()
    }

    pub fn all_mcast(&self) -> Option<bool> {
        self.state.lock().all_mcast
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().opened
    }
}

/// Interrupt controller double that counts mask/unmask calls.
pub struct MockIrq {
    disables: AtomicU32,
    enables: AtomicU32,
    depth: AtomicI32,
}

impl MockIrq {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            disables: AtomicU32::new(0),
            enables: AtomicU32::new(0),
            depth: AtomicI32::new(0),
        })
    }

    pub fn disables(&self) -> u32 {
        self.disables.load(Ordering::SeqCst)
    }

    pub fn enables(&self) -> u32 {
        self.enables.load(Ordering::SeqCst)
    }

    /// Line masked right now by some task.
    pub fn masked(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }
}

impl IrqControl for MockIrq {
    fn disable(&self, _line: IrqLine) {
        self.disables.fetch_add(1, Ordering::SeqCst);
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    fn enable(&self, _line: IrqLine, _priority: u8) {
        self.enables.fetch_add(1, Ordering::SeqCst);
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A started driver over a fresh mock: `rx_buffers` spare buffers and
/// `rx_slots` descriptors.
#[cfg(test)]
pub(crate) fn test_device(
    rx_buffers: usize,
    rx_slots: usize,
    tx_timeout_ms: u32,
) -> (Arc<super::HalNet<MockMac>>, MockHandle, Arc<MockIrq>) {
    let (mac, handle) = MockMac::new(EthernetAddress([0x02, 0x00, 0x00, 0x12, 0x34, 0x56]), rx_slots);
    let irq = MockIrq::new();
    let config = crate::config::DriverConfig { rx_buffers, tx_timeout_ms, ..Default::default() };
    let hal = super::HalNet::new(mac, irq.clone(), crate::sys::std_kernel::StdKernel::new(), &config)
        .unwrap();
    hal.start().unwrap();
    (hal, handle, irq)
}

/// Census of `hal`'s pool, cross-checked against where the buffers really
/// are: free tags against the free queue, hardware tags against the ring.
#[cfg(test)]
pub(crate) fn check_census(hal: &super::HalNet<MockMac>, handle: &MockHandle) -> crate::mem::Census {
    let c = hal.census();
    assert_eq!(c.free, hal.free_buffers(), "free tags vs free queue in {:?}", c);
    assert_eq!(c.hardware, handle.armed() + handle.landed(), "hardware tags vs ring in {:?}", c);
    c
}
