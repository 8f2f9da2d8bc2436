use super::{EtherIf, NetifError};

impl EtherIf {
    /// Link-layer output: gather `segments` into the transmit buffer and
    /// send them as one frame. Callers are serialized by the stack; the
    /// call returns once the MAC reports completion.
    pub fn link_output(&self, segments: &[&[u8]]) -> Result<(), NetifError> {
        let total: usize = segments.iter().map(|s| s.len()).sum();
        if total == 0 {
            return Err(NetifError::Argument);
        }

        let mut out = self.output.lock();
        let head = self.tx_headroom;
        let room = (out.len() - head).min(self.tx_max);
        if total > room {
            log::warn!("[netif] {}: {} byte frame exceeds the {} byte limit", self.info.name_str(), total, room);
            return Err(NetifError::FrameTooLarge);
        }

        let mut at = head;
        for seg in segments {
            out[at..at + seg.len()].copy_from_slice(seg);
            at += seg.len();
        }

        match self.device.write_data(&out[head..at]) {
            Ok(_) => Ok(()),
            Err(e) => {
                log::debug!("[netif] {}: transmit failed: {}", self.info.name_str(), e);
                Err(e.into())
            }
        }
    }
}
