/// Ethernet device driver: the device control block and its
/// request/response entry points.
///
/// One `HalNet` per MAC. It owns the receive buffer pool, the free queue,
/// the transmit completion flag and the link state. Task-side entry points
/// mask the MAC interrupt line before touching anything the interrupt
/// bridge also touches (`bridge.rs`).
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use bitflags::bitflags;
use heapless::String as HString;
use spin::Mutex;

use super::attr::{Attr, AttrId, EventSink, NetRxBufSz, NetStInfo};
use super::freeq::FreeQueue;
use super::mac::{EtherMac, IrqControl};
use super::{unit_name, DevError, NetDevice};
use crate::config::{DriverConfig, RX_BUF_ALIGN, RX_BUF_SIZE};
use crate::mem::{BufferPool, Census, FrameBuf, Owner};
use crate::sys::{EventFlag, Kernel, Timeout};

bitflags! {
    /// Transmit completion pattern on the driver's event flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxFlags: u32 {
        const COMPLETE = 1 << 0;
        const ABORTED  = 1 << 1;
    }
}

/// Live statistics counters.
#[derive(Default)]
pub(crate) struct NetStats {
    pub rxpkt: AtomicU32,
    pub misspkt: AtomicU32,
    pub invpkt: AtomicU32,
    pub txpkt: AtomicU32,
    pub txerr: AtomicU32,
    pub txbusy: AtomicU32,
    pub nint: AtomicU32,
    pub rxint: AtomicU32,
    pub txint: AtomicU32,
}

impl NetStats {
    #[inline]
    pub fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> NetStInfo {
        let get = |c: &AtomicU32| c.load(Ordering::Relaxed);
        NetStInfo {
            rxpkt: get(&self.rxpkt),
            misspkt: get(&self.misspkt),
            invpkt: get(&self.invpkt),
            txpkt: get(&self.txpkt),
            txerr: get(&self.txerr),
            txbusy: get(&self.txbusy),
            nint: get(&self.nint),
            rxint: get(&self.rxint),
            txint: get(&self.txint),
            ..NetStInfo::default()
        }
    }

    fn clear(&self) {
        for c in [
            &self.rxpkt, &self.misspkt, &self.invpkt, &self.txpkt, &self.txerr,
            &self.txbusy, &self.nint, &self.rxint, &self.txint,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

/// Device control block for one MAC.
pub struct HalNet<M: EtherMac> {
    unit: usize,
    name: HString<8>,
    pub(crate) mac: Mutex<M>,
    pub(crate) pool: BufferPool,
    pub(crate) freeq: FreeQueue,
    pub(crate) events: Mutex<Option<EventSink>>,
    pub(crate) tx_flag: EventFlag,
    pub(crate) link_up: AtomicBool,
    pub(crate) stats: NetStats,
    initialized: AtomicBool,
    max_frame: usize,
    tx_timeout: Timeout,
}

impl<M: EtherMac> HalNet<M> {
    /// Build the control block and carve the buffer pool. Every buffer
    /// starts in the free queue; [`HalNet::start`] arms the descriptors.
    ///
    /// The pool holds `config.rx_buffers` spare buffers plus one per
    /// hardware receive descriptor.
    pub fn new(
        mac: M,
        irq: Arc<dyn IrqControl>,
        kernel: Arc<dyn Kernel>,
        config: &DriverConfig,
    ) -> Result<Arc<Self>, DevError> {
        let name = unit_name(config.unit).ok_or(DevError::Param)?;
        let total = config.rx_buffers + mac.rx_slots();
        let pool = BufferPool::new(total, RX_BUF_SIZE, RX_BUF_ALIGN, &config.placement).map_err(|e| {
            log::error!("[hal-net] {}: buffer pool: {}", name, e);
            DevError::NoMemory
        })?;
        let freeq = FreeQueue::new(total, irq, mac.irq_line(), config.irq_priority);
        for buf in pool.take_all().ok_or(DevError::System)? {
            freeq.return_from_isr(buf);
        }
        let max_frame = mac.max_frame_len();

        Ok(Arc::new(Self {
            unit: config.unit,
            name,
            mac: Mutex::new(mac),
            pool,
            freeq,
            events: Mutex::new(None),
            tx_flag: EventFlag::new(kernel),
            link_up: AtomicBool::new(false),
            stats: NetStats::default(),
            initialized: AtomicBool::new(false),
            max_frame,
            tx_timeout: Timeout::from_ms(config.tx_timeout_ms),
        }))
    }

    /// Open the MAC, arm every receive descriptor, take a first link reading.
    pub fn start(&self) -> Result<(), DevError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let _mask = self.freeq.mask();
        let mut mac = self.mac.lock();
        mac.open().map_err(|e| {
            log::error!("[hal-net] {}: MAC open failed: {}", self.name, e);
            DevError::System
        })?;
        let mut armed = 0;
        for _ in 0..mac.rx_slots() {
            match self.freeq.take_buffer() {
                Some(buf) => {
                    buf.set_owner(Owner::Hardware);
                    mac.rx_arm(buf);
                    armed += 1;
                }
                None => break,
            }
        }
        let up = mac.link_process();
        self.link_up.store(up, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
        log::info!(
            "[hal-net] {}: started, MAC {}, {} rx descriptors armed, {} spare buffers, link {}",
            self.name,
            mac.mac_address(),
            armed,
            self.freeq.len(),
            if up { "up" } else { "down" }
        );
        Ok(())
    }

    /// `Ok` when the link is up, `NoMedia` when down, `Context` before start.
    pub fn link_status(&self) -> Result<(), DevError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(DevError::Context);
        }
        if self.link_up.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DevError::NoMedia)
        }
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn census(&self) -> Census {
        self.pool.census()
    }

    pub fn free_buffers(&self) -> usize {
        self.freeq.len()
    }

    pub fn stats(&self) -> NetStInfo {
        self.stats.snapshot()
    }

    /// Run `f` on the MAC with its interrupt line masked.
    fn with_mac<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        let _mask = self.freeq.mask();
        let mut mac = self.mac.lock();
        f(&mut *mac)
    }

    fn poll_link(&self) -> bool {
        let up = self.with_mac(|mac| mac.link_process());
        self.link_up.store(up, Ordering::Release);
        up
    }

    /// A buffer released by the stack: arm a starving descriptor directly,
    /// otherwise park it in the free queue.
    fn give_rx_buffer(&self, buf: FrameBuf) {
        let _mask = self.freeq.mask();
        let mut mac = self.mac.lock();
        if self.initialized.load(Ordering::Acquire) && mac.rx_starving() > 0 {
            buf.set_owner(Owner::Hardware);
            mac.rx_arm(buf);
        } else {
            drop(mac);
            self.freeq.return_from_isr(buf);
        }
    }

    fn set_multicast(&self, table: &[smoltcp::wire::EthernetAddress]) -> Result<(), DevError> {
        self.with_mac(|mac| mac.set_multicast(table)).map_err(|e| {
            if e != super::MacError::Unsupported {
                log::warn!("[hal-net] {}: multicast table rejected: {}", self.name, e);
            }
            DevError::from(e)
        })
    }
}

impl<M: EtherMac> NetDevice for HalNet<M> {
    fn unit(&self) -> usize {
        self.unit
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<(), DevError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(DevError::Context);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), DevError> {
        {
            let _mask = self.freeq.mask();
            *self.events.lock() = None;
        }
        log::info!("[hal-net] {}: closed", self.name);
        Ok(())
    }

    fn read_attr(&self, id: AttrId) -> Result<Attr, DevError> {
        match id {
            AttrId::NetEvent => {
                let _mask = self.freeq.mask();
                Ok(Attr::NetEvent(self.events.lock().clone()))
            }
            AttrId::NetAddr => Ok(Attr::NetAddr(self.with_mac(|mac| mac.mac_address()))),
            AttrId::NetStInfo => Ok(Attr::NetStInfo(self.stats.snapshot())),
            AttrId::NetRxBufSz => Ok(Attr::NetRxBufSz(NetRxBufSz { min: 0, max: self.pool.buf_size() })),
            AttrId::NetReset
            | AttrId::NetDevInfo
            | AttrId::NetCStInfo
            | AttrId::WlanConfig
            | AttrId::WlanStInfo
            | AttrId::WlanCStInfo => Err(DevError::NotSupported),
            AttrId::NetRxBuf | AttrId::SetMcastList | AttrId::SetAllMcast => Err(DevError::Param),
        }
    }

    fn write_attr(&self, attr: Attr) -> Result<(), DevError> {
        match attr {
            Attr::NetEvent(sink) => {
                let _mask = self.freeq.mask();
                *self.events.lock() = sink;
                Ok(())
            }
            Attr::NetRxBufSz(sz) => {
                if sz.min > sz.max || sz.max > self.pool.buf_size() {
                    return Err(DevError::Param);
                }
                // Fixed by the hardware buffer layout.
                Ok(())
            }
            Attr::NetCStInfo => {
                self.stats.clear();
                Ok(())
            }
            Attr::SetMcastList(table) => self.set_multicast(&table),
            Attr::SetAllMcast(on) => self.with_mac(|mac| mac.accept_all_multicast(on)).map_err(DevError::from),
            Attr::NetReset => Err(DevError::NotSupported),
            Attr::NetAddr(_) | Attr::NetStInfo(_) => Err(DevError::Param),
        }
    }

    fn release_rx_buf(&self, buf: FrameBuf) -> Result<(), (DevError, FrameBuf)> {
        if !buf.same_pool_as(&self.pool) {
            log::error!("[hal-net] {}: foreign buffer released", self.name);
            return Err((DevError::Param, buf));
        }
        self.give_rx_buffer(buf);
        Ok(())
    }

    fn rx_pool(&self) -> Option<&BufferPool> {
        Some(&self.pool)
    }

    fn write_data(&self, frame: &[u8]) -> Result<usize, DevError> {
        if frame.is_empty() {
            return Ok(self.max_frame);
        }
        if frame.len() > self.max_frame {
            return Err(DevError::Param);
        }
        if !self.initialized.load(Ordering::Acquire) {
            return Err(DevError::Context);
        }
        if !self.link_up.load(Ordering::Acquire) && !self.poll_link() {
            return Err(DevError::NoMedia);
        }

        // A completion left over from an earlier timed-out send must not
        // finish this one.
        self.tx_flag.clear(TxFlags::all().bits());
        if let Err(e) = self.with_mac(|mac| mac.transmit(frame)) {
            if e == super::MacError::Busy {
                NetStats::bump(&self.stats.txbusy);
            }
            NetStats::bump(&self.stats.txerr);
            log::warn!("[hal-net] {}: transmit rejected: {}", self.name, e);
            return Err(DevError::Io);
        }

        match self.tx_flag.wait_any_clear(TxFlags::all().bits(), self.tx_timeout) {
            Ok(bits) if TxFlags::from_bits_truncate(bits).contains(TxFlags::ABORTED) => {
                NetStats::bump(&self.stats.txerr);
                log::warn!("[hal-net] {}: transmit aborted", self.name);
                Err(DevError::Io)
            }
            Ok(_) => {
                NetStats::bump(&self.stats.txpkt);
                Ok(frame.len())
            }
            Err(_) => {
                let up = self.poll_link();
                NetStats::bump(&self.stats.txerr);
                log::warn!(
                    "[hal-net] {}: transmit timeout, link {}",
                    self.name,
                    if up { "up" } else { "down" }
                );
                Err(DevError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock_mac::{check_census, test_device, MockHandle, MockMac};
    use crate::hal::DeviceEvent;
    use crate::sys::std_kernel::StdKernel;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Fire `event` once the mock has recorded `count` transmits.
    fn complete_after(hal: &Arc<HalNet<MockMac>>, handle: &MockHandle, count: usize, event: DeviceEvent) -> thread::JoinHandle<()> {
        let (hal, handle) = (hal.clone(), handle.clone());
        thread::spawn(move || {
            while handle.tx_count() < count {
                thread::sleep(Duration::from_millis(1));
            }
            hal.on_event(event);
        })
    }

    #[test]
    fn start_arms_every_descriptor() {
        let (hal, handle, irq) = test_device(8, 4, 2000);
        assert_eq!(handle.armed(), 4);
        assert_eq!(hal.free_buffers(), 8);
        let c = check_census(&hal, &handle);
        assert_eq!((c.free, c.hardware), (8, 4));
        assert!(!irq.masked());
    }

    #[test]
    fn link_status_before_start() {
        let (mac, _handle) = MockMac::new(smoltcp::wire::EthernetAddress([2, 0, 0, 0, 0, 1]), 2);
        let irq = crate::hal::mock_mac::MockIrq::new();
        let hal = HalNet::new(mac, irq, StdKernel::new(), &DriverConfig::default()).unwrap();
        assert_eq!(hal.link_status(), Err(DevError::Context));
        assert_eq!(hal.open(), Err(DevError::Context));
        hal.start().unwrap();
        assert_eq!(hal.link_status(), Ok(()));
    }

    #[test]
    fn attribute_dispatch() {
        let (hal, _handle, _irq) = test_device(2, 2, 2000);
        match hal.read_attr(AttrId::NetAddr) {
            Ok(Attr::NetAddr(addr)) => assert_eq!(addr.0, [0x02, 0x00, 0x00, 0x12, 0x34, 0x56]),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(hal.read_attr(AttrId::NetEvent), Ok(Attr::NetEvent(None))));
        assert_eq!(hal.read_attr(AttrId::WlanConfig).unwrap_err(), DevError::NotSupported);
        assert_eq!(hal.read_attr(AttrId::NetRxBuf).unwrap_err(), DevError::Param);
        assert_eq!(hal.read_attr_code(-99).unwrap_err(), DevError::Param);
        assert_eq!(hal.write_attr(Attr::NetReset), Err(DevError::NotSupported));
        assert_eq!(hal.write_attr(Attr::NetRxBufSz(NetRxBufSz { min: 60, max: 1520 })), Ok(()));
        assert_eq!(hal.write_attr(Attr::NetRxBufSz(NetRxBufSz { min: 60, max: 4096 })), Err(DevError::Param));
    }

    #[test]
    fn empty_write_reports_max_frame() {
        let (hal, handle, _irq) = test_device(2, 2, 2000);
        assert_eq!(hal.write_data(&[]), Ok(1514));
        assert_eq!(handle.tx_count(), 0);
        assert_eq!(hal.write_data(&[0u8; 1515]), Err(DevError::Param));
    }

    #[test]
    fn transmit_waits_for_completion() {
        let (hal, handle, _irq) = test_device(2, 2, 2000);
        let t = complete_after(&hal, &handle, 1, DeviceEvent::TxComplete);
        assert_eq!(hal.write_data(&[0xAA; 64]), Ok(64));
        t.join().unwrap();
        assert_eq!(handle.sent(), std::vec![std::vec![0xAA; 64]]);
        assert_eq!(hal.stats().txpkt, 1);
    }

    #[test]
    fn aborted_transmit_is_io_error() {
        let (hal, handle, _irq) = test_device(2, 2, 2000);
        let t = complete_after(&hal, &handle, 1, DeviceEvent::TxAborted);
        assert_eq!(hal.write_data(&[1; 60]), Err(DevError::Io));
        t.join().unwrap();
        assert_eq!(hal.stats().txerr, 1);
    }

    #[test]
    fn rejected_transmit_is_io_error() {
        let (hal, handle, _irq) = test_device(2, 2, 2000);
        handle.reject_transmits(true);
        assert_eq!(hal.write_data(&[1; 60]), Err(DevError::Io));
        assert_eq!(hal.stats().txbusy, 1);
    }

    #[test]
    fn link_down_is_no_media() {
        let (hal, handle, _irq) = test_device(2, 2, 2000);
        hal.on_event(DeviceEvent::LinkDown);
        handle.set_link(false);
        assert_eq!(hal.link_status(), Err(DevError::NoMedia));
        assert_eq!(hal.write_data(&[1; 60]), Err(DevError::NoMedia));
        assert_eq!(handle.tx_count(), 0);

        // The PHY came back without an interrupt: one poll recovers.
        handle.set_link(true);
        let t = complete_after(&hal, &handle, 1, DeviceEvent::TxComplete);
        assert_eq!(hal.write_data(&[1; 60]), Ok(60));
        t.join().unwrap();
        assert_eq!(hal.link_status(), Ok(()));
    }

    #[test]
    fn stale_completion_does_not_finish_next_send() {
        let (hal, _handle, _irq) = test_device(2, 2, 100);
        hal.on_event(DeviceEvent::TxComplete);
        let start = Instant::now();
        assert_eq!(hal.write_data(&[1; 60]), Err(DevError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(99));
    }

    #[test]
    fn statistics_read_and_clear() {
        let (hal, handle, _irq) = test_device(2, 2, 2000);
        handle.inject(&[0u8; 60]);
        hal.on_event(DeviceEvent::RxComplete);
        match hal.read_attr(AttrId::NetStInfo) {
            Ok(Attr::NetStInfo(st)) => {
                assert_eq!(st.nint, 1);
                assert_eq!(st.rxint, 1);
                assert_eq!(st.misspkt, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        hal.write_attr(Attr::NetCStInfo).unwrap();
        assert_eq!(hal.stats(), NetStInfo::default());
    }

    #[test]
    fn released_buffer_goes_to_starving_descriptor() {
        let (hal, handle, irq) = test_device(0, 2, 2000);
        // One descriptor loses its buffer: no spare to re-arm it with.
        handle.inject(&[0u8; 60]);
        let mut mac = hal.mac.lock();
        let rec = mac.rx_read().unwrap();
        drop(mac);
        assert_eq!(handle.armed(), 1);

        let masks = irq.disables();
        hal.release_rx_buf(rec.buf).unwrap();
        assert_eq!(handle.armed(), 2);
        assert_eq!(hal.free_buffers(), 0);
        check_census(&hal, &handle);
        assert!(irq.disables() > masks);
        assert!(!irq.masked());
    }

    #[test]
    fn released_buffer_goes_to_free_queue_when_ring_is_full() {
        let (hal, handle, _irq) = test_device(1, 2, 2000);
        let spare = hal.freeq.take_masked().unwrap();
        hal.release_rx_buf(spare).unwrap();
        assert_eq!(handle.armed(), 2);
        assert_eq!(hal.free_buffers(), 1);
        check_census(&hal, &handle);
    }

    #[test]
    fn foreign_buffer_comes_back_to_the_caller() {
        let (hal, handle, _irq) = test_device(1, 1, 2000);
        let (other, other_handle, _i2) = test_device(1, 1, 2000);
        let buf = other.freeq.take_masked().unwrap();

        let (err, buf) = hal.release_rx_buf(buf).unwrap_err();
        assert_eq!(err, DevError::Param);
        assert_eq!(hal.free_buffers(), 1);
        check_census(&hal, &handle);

        other.release_rx_buf(buf).unwrap();
        assert_eq!(other.free_buffers(), 1);
        let c = check_census(&other, &other_handle);
        assert_eq!((c.free, c.hardware), (1, 1));
    }

    #[test]
    fn device_close_leaves_the_mac_running() {
        let (hal, handle, _irq) = test_device(1, 1, 2000);
        assert!(handle.is_open());
        hal.open().unwrap();
        hal.close().unwrap();
        assert!(handle.is_open());
        assert_eq!(hal.start(), Ok(()));
    }
}
