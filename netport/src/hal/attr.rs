/// Device attribute codes and their typed values.
///
/// Codes are the small negative numbers of the device-driver interface;
/// values travel as [`Attr`] instead of raw byte buffers.
use alloc::sync::Arc;
use heapless::Vec as HVec;
use smoltcp::wire::EthernetAddress;

use super::events::EventRing;
use crate::config::MCAST_TABLE_MAX;
use crate::mem::FrameBuf;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrId {
    NetEvent = -100,
    NetReset = -103,
    NetAddr = -105,
    NetDevInfo = -110,
    NetStInfo = -111,
    NetCStInfo = -112,
    NetRxBuf = -113,
    NetRxBufSz = -114,
    SetMcastList = -115,
    SetAllMcast = -116,
    WlanConfig = -130,
    WlanStInfo = -131,
    WlanCStInfo = -132,
}

impl AttrId {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for AttrId {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, i32> {
        Ok(match code {
            -100 => AttrId::NetEvent,
            -103 => AttrId::NetReset,
            -105 => AttrId::NetAddr,
            -110 => AttrId::NetDevInfo,
            -111 => AttrId::NetStInfo,
            -112 => AttrId::NetCStInfo,
            -113 => AttrId::NetRxBuf,
            -114 => AttrId::NetRxBufSz,
            -115 => AttrId::SetMcastList,
            -116 => AttrId::SetAllMcast,
            -130 => AttrId::WlanConfig,
            -131 => AttrId::WlanStInfo,
            -132 => AttrId::WlanCStInfo,
            other => return Err(other),
        })
    }
}

/// Receive completion handed from the interrupt bridge to the receive task.
#[derive(Debug)]
pub struct NetEvent {
    pub buf: FrameBuf,
    pub len: u16,
}

pub type EventSink = Arc<EventRing<NetEvent>>;

/// Receive buffer size range the interface can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetRxBufSz {
    pub min: usize,
    pub max: usize,
}

/// Device statistics (`NetStInfo`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetStInfo {
    pub rxpkt: u32,
    pub rxerr: u32,
    pub misspkt: u32,
    pub invpkt: u32,
    pub txpkt: u32,
    pub txerr: u32,
    pub txbusy: u32,
    pub collision: u32,
    pub nint: u32,
    pub rxint: u32,
    pub txint: u32,
    pub overrun: u32,
    pub hwerr: u32,
}

pub type McastTable = HVec<EthernetAddress, MCAST_TABLE_MAX>;

/// A typed attribute value.
#[derive(Debug)]
pub enum Attr {
    /// Event channel for receive completions; `None` detaches it.
    NetEvent(Option<EventSink>),
    NetAddr(EthernetAddress),
    NetStInfo(NetStInfo),
    /// Clear statistics.
    NetCStInfo,
    NetRxBufSz(NetRxBufSz),
    SetMcastList(McastTable),
    SetAllMcast(bool),
    NetReset,
}

impl Attr {
    pub fn id(&self) -> AttrId {
        match self {
            Attr::NetEvent(_) => AttrId::NetEvent,
            Attr::NetAddr(_) => AttrId::NetAddr,
            Attr::NetStInfo(_) => AttrId::NetStInfo,
            Attr::NetCStInfo => AttrId::NetCStInfo,
            Attr::NetRxBufSz(_) => AttrId::NetRxBufSz,
            Attr::SetMcastList(_) => AttrId::SetMcastList,
            Attr::SetAllMcast(_) => AttrId::SetAllMcast,
            Attr::NetReset => AttrId::NetReset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_codes_are_rejected() {
        assert_eq!(AttrId::try_from(-113), Ok(AttrId::NetRxBuf));
        assert_eq!(AttrId::NetAddr.code(), -105);
        assert_eq!(AttrId::try_from(-101), Err(-101));
        assert_eq!(AttrId::try_from(7), Err(7));
    }
}
