/// Multicast filter list.
///
/// Joined groups are kept in join order, duplicates included. After every
/// change the whole list is mapped to Ethernet multicast addresses and
/// pushed to the device, falling back to accept-all-multicast when the
/// MAC has no table or the list outgrows it.
use alloc::vec::Vec;
use smoltcp::wire::{EthernetAddress, IpAddress, Ipv4Address, Ipv6Address};

use super::{EtherIf, NetifError};
use crate::config::MCAST_TABLE_MAX;
use crate::hal::{Attr, DevError, McastTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Add,
    Delete,
}

/// Ethernet multicast address for an IP group:
/// IPv4 → `01:00:5e` + low 23 bits, IPv6 → `33:33` + last four bytes.
pub fn multicast_mac(addr: &IpAddress) -> EthernetAddress {
    match addr {
        IpAddress::Ipv4(a) => {
            let b = a.as_bytes();
            EthernetAddress([0x01, 0x00, 0x5e, b[1] & 0x7f, b[2], b[3]])
        }
        IpAddress::Ipv6(a) => {
            let b = a.as_bytes();
            EthernetAddress([0x33, 0x33, b[12], b[13], b[14], b[15]])
        }
    }
}

#[derive(Debug, Default)]
pub struct FilterList {
    entries: Vec<IpAddress>,
    /// Accept-all was switched on because the list outgrew the table.
    overflowed: bool,
}

impl FilterList {
    pub fn new() -> Self {
        Self { entries: Vec::new(), overflowed: false }
    }

    pub fn add(&mut self, addr: IpAddress) {
        self.entries.push(addr);
    }

    /// Remove the first entry equal to `addr`. False if none matched.
    pub fn remove(&mut self, addr: &IpAddress) -> bool {
        match self.entries.iter().position(|e| e == addr) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpAddress> {
        self.entries.iter()
    }

    /// Hardware table for the list, or `None` if it does not fit.
    pub fn compile(&self) -> Option<McastTable> {
        let mut table = McastTable::new();
        for addr in &self.entries {
            table.push(multicast_mac(addr)).ok()?;
        }
        Some(table)
    }
}

impl EtherIf {
    pub fn add_filter(&self, addr: IpAddress) -> Result<(), NetifError> {
        let mut list = self.filters.lock();
        list.add(addr);
        self.push_filters(&mut list)
    }

    /// `NotFound` (and no device update) if `addr` was never joined.
    pub fn remove_filter(&self, addr: IpAddress) -> Result<(), NetifError> {
        let mut list = self.filters.lock();
        if !list.remove(&addr) {
            return Err(NetifError::NotFound);
        }
        self.push_filters(&mut list)
    }

    /// IGMP hook.
    pub fn igmp_mac_filter(&self, group: Ipv4Address, action: FilterAction) -> Result<(), NetifError> {
        self.mac_filter(IpAddress::Ipv4(group), action)
    }

    /// MLD hook.
    pub fn mld_mac_filter(&self, group: Ipv6Address, action: FilterAction) -> Result<(), NetifError> {
        self.mac_filter(IpAddress::Ipv6(group), action)
    }

    pub fn filter_count(&self) -> usize {
        self.filters.lock().len()
    }

    fn mac_filter(&self, addr: IpAddress, action: FilterAction) -> Result<(), NetifError> {
        match action {
            FilterAction::Add => self.add_filter(addr),
            FilterAction::Delete => self.remove_filter(addr),
        }
    }

    fn push_filters(&self, list: &mut FilterList) -> Result<(), NetifError> {
        let pushed = match list.compile() {
            Some(table) => match self.device.write_attr(Attr::SetMcastList(table)) {
                Err(DevError::NotSupported) => self.device.write_attr(Attr::SetAllMcast(!list.is_empty())),
                Ok(()) if list.overflowed => {
                    log::debug!("[netif] {} groups fit the hardware table again", list.len());
                    let off = self.device.write_attr(Attr::SetAllMcast(false));
                    list.overflowed = off.is_err();
                    off
                }
                other => other,
            },
            None => {
                log::debug!("[netif] {} groups exceed the hardware table, accepting all multicast", list.len());
                let on = self.device.write_attr(Attr::SetAllMcast(true));
                list.overflowed |= on.is_ok();
                on
            }
        };
        pushed.map_err(|e| {
            log::warn!("[netif] {}: multicast filter update failed: {}", self.info.name_str(), e);
            NetifError::Interface
        })
    }
}
