/// Interrupt bridge: hardware events in, receive events out.
///
/// Runs in interrupt context with the MAC line masked. Nothing here
/// blocks or allocates. On receive completion every finished descriptor
/// is drained in hardware order:
///
///   free buffer available, event posted   → descriptor re-armed with the
///                                           fresh buffer
///   no free buffer                        → completed buffer goes straight
///                                           back to its descriptor, frame
///                                           dropped
///   event channel full / not attached     → fresh buffer back to the free
///                                           queue, completed buffer back to
///                                           its descriptor, frame dropped
use super::attr::NetEvent;
use super::driver::{HalNet, NetStats, TxFlags};
use super::mac::{EtherMac, RxRecord};
use super::DeviceEvent;
use crate::mem::{FrameBuf, Owner};
use core::sync::atomic::Ordering;

/// Outcome of one receive drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub posted: u32,
    pub dropped: u32,
}

impl<M: EtherMac> HalNet<M> {
    /// Interrupt handler entry point.
    pub fn on_event(&self, event: DeviceEvent) {
        NetStats::bump(&self.stats.nint);
        match event {
            DeviceEvent::RxComplete => {
                NetStats::bump(&self.stats.rxint);
                self.on_rx_complete();
            }
            DeviceEvent::TxComplete => {
                NetStats::bump(&self.stats.txint);
                self.tx_flag.set(TxFlags::COMPLETE.bits());
            }
            DeviceEvent::TxAborted => {
                NetStats::bump(&self.stats.txint);
                self.tx_flag.set(TxFlags::ABORTED.bits());
            }
            DeviceEvent::LinkUp => {
                self.link_up.store(true, Ordering::Release);
                log::info!("[hal-net] {}: link up", super::NetDevice::name(self));
            }
            DeviceEvent::LinkDown => {
                self.link_up.store(false, Ordering::Release);
                log::info!("[hal-net] {}: link down", super::NetDevice::name(self));
            }
        }
    }

    /// Drain every completed receive descriptor.
    pub fn on_rx_complete(&self) -> DrainReport {
        let sink = self.events.lock().clone();
        let mut mac = self.mac.lock();
        let mut report = DrainReport::default();

        while let Some(RxRecord { buf, len }) = mac.rx_read() {
            let fresh = match self.freeq.take_buffer() {
                Some(fresh) => fresh,
                None => {
                    log::trace!("[hal-net] rx: no free buffer, frame dropped");
                    arm(&mut *mac, buf);
                    NetStats::bump(&self.stats.misspkt);
                    report.dropped += 1;
                    continue;
                }
            };

            buf.set_owner(Owner::InFlight);
            let event = NetEvent { buf, len };
            let sent = match &sink {
                Some(ring) => ring.try_send(event).map_err(|e| e.into_inner()),
                None => Err(event),
            };
            match sent {
                Ok(()) => {
                    arm(&mut *mac, fresh);
                    NetStats::bump(&self.stats.rxpkt);
                    report.posted += 1;
                }
                Err(event) => {
                    log::trace!("[hal-net] rx: event channel full, frame dropped");
                    self.freeq.return_from_isr(fresh);
                    arm(&mut *mac, event.buf);
                    NetStats::bump(&self.stats.misspkt);
                    report.dropped += 1;
                }
            }
        }
        report
    }
}

fn arm<M: EtherMac>(mac: &mut M, buf: FrameBuf) {
    buf.set_owner(Owner::Hardware);
    mac.rx_arm(buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::attr::{Attr, EventSink};
    use crate::hal::events::EventRing;
    use crate::hal::mock_mac::{check_census, test_device};
    use crate::hal::NetDevice;
    use crate::sys::std_kernel::StdKernel;
    use alloc::sync::Arc;

    fn attach(hal: &HalNet<crate::hal::mock_mac::MockMac>, depth: usize) -> EventSink {
        let ring = Arc::new(EventRing::new(StdKernel::new(), depth));
        hal.write_attr(Attr::NetEvent(Some(ring.clone()))).unwrap();
        ring
    }

    #[test]
    fn completed_frames_become_events_in_order() {
        let (hal, handle, _irq) = test_device(4, 4, 2000);
        let ring = attach(&hal, 8);
        for tag in 1..=3u8 {
            assert!(handle.inject(&[tag; 64]));
        }
        let report = hal.on_rx_complete();
        assert_eq!(report, DrainReport { posted: 3, dropped: 0 });

        for tag in 1..=3u8 {
            let ev = ring.try_recv().unwrap();
            assert_eq!(ev.len, 64);
            assert_eq!(ev.buf.as_slice()[0], tag);
            assert_eq!(ev.buf.owner(), Owner::InFlight);
            hal.release_rx_buf(ev.buf).unwrap();
        }
        // Descriptors were re-armed from the free queue every time.
        assert_eq!(handle.armed(), 4);
        let c = check_census(&hal, &handle);
        assert_eq!((c.free, c.hardware), (4, 4));
    }

    #[test]
    fn no_channel_recycles_in_place() {
        let (hal, handle, _irq) = test_device(4, 2, 2000);
        handle.inject(&[0u8; 60]);
        handle.inject(&[0u8; 60]);
        let report = hal.on_rx_complete();
        assert_eq!(report, DrainReport { posted: 0, dropped: 2 });
        assert_eq!(handle.armed(), 2);
        assert_eq!(hal.free_buffers(), 4);
        assert_eq!(hal.stats().misspkt, 2);
        let c = check_census(&hal, &handle);
        assert_eq!((c.free, c.hardware, c.in_flight, c.stack), (4, 2, 0, 0));
    }

    #[test]
    fn full_channel_returns_fresh_buffer() {
        let (hal, handle, _irq) = test_device(4, 2, 2000);
        let ring = attach(&hal, 1);
        handle.inject(&[1u8; 60]);
        handle.inject(&[2u8; 60]);
        let report = hal.on_rx_complete();
        assert_eq!(report, DrainReport { posted: 1, dropped: 1 });
        assert_eq!(ring.len(), 1);
        assert_eq!(handle.armed(), 2);
        assert_eq!(hal.free_buffers(), 3);
        let c = check_census(&hal, &handle);
        assert_eq!((c.free, c.hardware, c.in_flight), (3, 2, 1));
    }

    #[test]
    fn tx_events_set_the_flag() {
        let (hal, _handle, _irq) = test_device(1, 1, 2000);
        hal.on_event(DeviceEvent::TxComplete);
        assert_eq!(hal.tx_flag.peek(), TxFlags::COMPLETE.bits());
        hal.on_event(DeviceEvent::TxAborted);
        assert_eq!(hal.tx_flag.peek(), (TxFlags::COMPLETE | TxFlags::ABORTED).bits());
        assert_eq!(hal.stats().txint, 2);
    }
}
