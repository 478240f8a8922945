/*!
Enumeration of local network interfaces and a search primitive over them. Backed by `pnet`'s
`datalink` module.
*/

use crate::error::{invalid_field_value, Error, MessageFormatError};
use ipnetwork::IpNetwork;
use pnet::datalink;
use std::net::IpAddr;
use std::str::FromStr;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

/// Selects which interface(s) `NetAdapter::find_first`/`find_next` should match.
#[derive(Clone, Debug)]
pub enum Selector {
    /// Pick any usable address, preferring non-loopback global/unicast addresses.
    Any,
    InterfaceName(String),
    Address(IpAddr),
    Index(u32),
    Loopback,
}

/// One `(interface, address)` pair; a physical interface with several addresses appears once
/// per address.
#[derive(Clone, Debug)]
pub struct NetInterface {
    index: u32,
    name: String,
    address: IpAddr,
    prefix_bits: u8,
}

///
/// Iterates the local machine's network interface addresses and supports searching them by
/// name, address, index or the literal selector `loopback`.
///
#[derive(Debug, Default)]
pub struct NetAdapter {
    entries: Vec<NetInterface>,
    cursor: Option<usize>,
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl NetInterface {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sockaddr(&self) -> IpAddr {
        self.address
    }

    pub fn bitmask(&self) -> u8 {
        self.prefix_bits
    }

    pub fn socknetmask(&self) -> IpAddr {
        bitmask_to_netmask(self.address, self.prefix_bits)
    }

    fn tier(&self) -> u8 {
        if self.address.is_loopback() {
            2
        } else if is_unique_or_link_local(&self.address) {
            1
        } else {
            0
        }
    }
}

impl NetAdapter {
    /// Populate the adapter's internal list from the OS.
    pub fn get_first(&mut self) -> Result<bool, Error> {
        let mut entries = Vec::new();
        for interface in datalink::interfaces() {
            for network in &interface.ips {
                entries.push(NetInterface {
                    index: interface.index,
                    name: interface.name.clone(),
                    address: network.ip(),
                    prefix_bits: network.prefix(),
                });
            }
        }
        // Stable sort by tier preserves each tier's OS-reported insertion order.
        entries.sort_by_key(|e| e.tier());
        self.entries = entries;
        self.cursor = if self.entries.is_empty() { None } else { Some(0) };
        Ok(self.cursor.is_some())
    }

    /// Advance to the next entry in the internally held list.
    pub fn get_next(&mut self) -> bool {
        match self.cursor {
            None => false,
            Some(i) if i + 1 < self.entries.len() => {
                self.cursor = Some(i + 1);
                true
            }
            Some(_) => {
                self.cursor = None;
                false
            }
        }
    }

    pub fn current(&self) -> Option<&NetInterface> {
        self.cursor.and_then(|i| self.entries.get(i))
    }

    /// Find the first entry matching `selector`, without mutating the underlying list; a
    /// second pass via `find_next` continues scanning from there.
    pub fn find_first(&mut self, selector: &Selector) -> bool {
        self.cursor = None;
        self.find_next(selector)
    }

    pub fn find_next(&mut self, selector: &Selector) -> bool {
        let start = self.cursor.map(|i| i + 1).unwrap_or(0);
        for (i, entry) in self.entries.iter().enumerate().skip(start) {
            if selector_matches(selector, entry) {
                self.cursor = Some(i);
                return true;
            }
        }
        false
    }
}

fn selector_matches(selector: &Selector, entry: &NetInterface) -> bool {
    match selector {
        Selector::Any => !entry.address.is_loopback(),
        Selector::InterfaceName(name) => &entry.name == name,
        Selector::Address(addr) => &entry.address == addr,
        Selector::Index(idx) => entry.index == *idx,
        Selector::Loopback => entry.address.is_loopback(),
    }
}

fn is_unique_or_link_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_link_local() || v4.is_private(),
        IpAddr::V6(v6) => is_ipv6_link_local(v6),
    }
}

/// `true` for `fe80::/10` — used to pick between an evented device's link-local and ULA/GUA
/// callback address (spec §4.8).
pub fn is_ipv6_link_local(v6: &std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xffc0) == 0xfe80
}

impl Selector {
    /// Parse the same selector vocabulary accepted by `find_first`: empty string (any), an
    /// interface name, a textual address, an interface index, or the literal `"loopback"`.
    pub fn parse(s: &str) -> Self {
        if s.is_empty() {
            Selector::Any
        } else if s.eq_ignore_ascii_case("loopback") {
            Selector::Loopback
        } else if let Ok(addr) = IpAddr::from_str(s) {
            Selector::Address(addr)
        } else if let Ok(idx) = s.parse::<u32>() {
            Selector::Index(idx)
        } else {
            Selector::InterfaceName(s.to_string())
        }
    }
}

/// Convert a prefix-bitmask to a dotted/colon netmask for the address family of `like`
///.
pub fn bitmask_to_netmask(like: IpAddr, bits: u8) -> IpAddr {
    match like {
        IpAddr::V4(_) => {
            let mask: u32 = if bits == 0 {
                0
            } else {
                u32::MAX << (32 - bits)
            };
            IpAddr::V4(mask.into())
        }
        IpAddr::V6(_) => {
            let mask: u128 = if bits == 0 {
                0
            } else {
                u128::MAX << (128 - bits)
            };
            IpAddr::V6(mask.into())
        }
    }
}

/// Convert a netmask back to its prefix-bitmask, rejecting non-contiguous netmasks
/// (e.g. `ffff:ffff:ffff:ffff:f0f0::`) with `Invalid`.
pub fn netmask_to_bitmask(mask: IpAddr) -> Result<u8, MessageFormatError> {
    match mask {
        IpAddr::V4(v4) => {
            let bits: u32 = v4.into();
            contiguous_prefix_len(bits as u128, 32)
        }
        IpAddr::V6(v6) => {
            let bits: u128 = v6.into();
            contiguous_prefix_len(bits, 128)
        }
    }
}

fn contiguous_prefix_len(mask: u128, width: u32) -> Result<u8, MessageFormatError> {
    let mut ones = 0u32;
    let mut seen_zero = false;
    for i in (0..width).rev() {
        let bit = (mask >> i) & 1;
        if bit == 1 {
            if seen_zero {
                return Err(invalid_field_value("netmask", format!("{:#x}", mask)));
            }
            ones += 1;
        } else {
            seen_zero = true;
        }
    }
    Ok(ones as u8)
}

/// Parse a CIDR-style `addr/prefix` string via `ipnetwork`, used by the web server and
/// interface matching when a caller supplies an explicit network rather than a bare address.
pub fn parse_network(s: &str) -> Result<IpNetwork, MessageFormatError> {
    IpNetwork::from_str(s).map_err(|_| invalid_field_value("network", s))
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn netmask_bitmask_bijection_v4() {
        for bits in 0..=32u8 {
            let mask = bitmask_to_netmask(IpAddr::V4(Ipv4Addr::UNSPECIFIED), bits);
            assert_eq!(netmask_to_bitmask(mask).unwrap(), bits);
        }
    }

    #[test]
    fn netmask_bitmask_bijection_v6() {
        for bits in 0..=128u8 {
            let mask = bitmask_to_netmask(IpAddr::V6(Ipv6Addr::UNSPECIFIED), bits);
            assert_eq!(netmask_to_bitmask(mask).unwrap(), bits);
        }
    }

    #[test]
    fn non_contiguous_netmask_is_invalid() {
        let mask = Ipv6Addr::from_str("ffff:ffff:ffff:ffff:f0f0::").unwrap();
        assert!(netmask_to_bitmask(IpAddr::V6(mask)).is_err());
    }

    #[test]
    fn get_first_then_next_exhausts() {
        let mut adapter = NetAdapter::default();
        if adapter.get_first().unwrap() {
            let mut count = 1;
            while adapter.get_next() {
                count += 1;
            }
            assert_eq!(count, adapter.entries.len());
        }
    }

    #[test]
    fn selector_parsing() {
        assert!(matches!(Selector::parse(""), Selector::Any));
        assert!(matches!(Selector::parse("loopback"), Selector::Loopback));
        assert!(matches!(Selector::parse("127.0.0.1"), Selector::Address(_)));
        assert!(matches!(Selector::parse("eth0"), Selector::InterfaceName(_)));
    }
}
