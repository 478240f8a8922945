/*!
Parsing, comparison and rendering of textual network-address + port pairs. Supported textual
forms:

```text
host
host:port
[ipv6]
[ipv6]:port
[ipv6%zone]:port
ipv4:port
ipv4:service
```
*/

use crate::error::{invalid_field_value, MessageFormatError};
use pnet::datalink;
use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

/// A parsed and resolved zone-id: an IPv6 scope may be given as a numeric index or as an
/// interface name. We remember which form was given even though we may also resolve it to a
/// numeric scope at parse time.
#[derive(Clone, Debug)]
pub enum Zone {
    Numeric(u32),
    Named(String),
}

///
/// A textual network address, optionally carrying a port and, for IPv6, a zone-id.
///
#[derive(Clone, Debug)]
pub struct SocketAddress {
    ip: IpAddr,
    port: Option<u16>,
    zone: Option<Zone>,
}

// A tiny fixed table standing in for a full `/etc/services`-style lookup; an alphanumeric
// service name is accepted even when it isn't one of these registered entries.
const SERVICE_TABLE: &[(&str, u16)] = &[("http", 80), ("https", 443), ("ssdp", 1900)];

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl SocketAddress {
    /// The all-zero "any" address of the given family, as produced for empty input with
    /// `AI_PASSIVE` set.
    pub fn unspecified(prefer_v6: bool) -> Self {
        SocketAddress {
            ip: if prefer_v6 {
                IpAddr::V6(Ipv6Addr::UNSPECIFIED)
            } else {
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            },
            port: None,
            zone: None,
        }
    }

    pub fn new(ip: IpAddr, port: Option<u16>) -> Self {
        SocketAddress {
            ip,
            port,
            zone: None,
        }
    }

    pub fn with_zone(ip: Ipv6Addr, port: Option<u16>, zone: Zone) -> Self {
        SocketAddress {
            ip: IpAddr::V6(ip),
            port,
            zone: Some(zone),
        }
    }

    pub fn parse(input: &str, passive: bool) -> Result<Self, MessageFormatError> {
        let s = input.trim();
        if s.is_empty() {
            return if passive {
                Ok(Self::unspecified(false))
            } else {
                Err(invalid_field_value("socket-address", input))
            };
        }

        if let Some(rest) = s.strip_prefix('[') {
            return Self::parse_bracketed(rest, input);
        }

        // A bare IPv6 literal (no port, no zone) is also legal without brackets.
        if let Ok(ip6) = Ipv6Addr::from_str(s) {
            return Ok(SocketAddress {
                ip: IpAddr::V6(ip6),
                port: None,
                zone: None,
            });
        }

        // host[:port|:service]
        match s.rfind(':') {
            None => Self::host_only(s, input),
            Some(idx) => {
                let (host, port_str) = (&s[..idx], &s[idx + 1..]);
                let ip = Self::parse_host(host, input)?;
                let port = Self::parse_port_or_service(port_str, input)?;
                Ok(SocketAddress {
                    ip,
                    port: Some(port),
                    zone: None,
                })
            }
        }
    }

    fn parse_bracketed(rest: &str, original: &str) -> Result<Self, MessageFormatError> {
        let close = rest
            .find(']')
            .ok_or_else(|| invalid_field_value("socket-address", original))?;
        let inside = &rest[..close];
        let after = &rest[close + 1..];

        let (addr_part, zone) = match inside.find('%') {
            Some(pct) => {
                let zone_str = &inside[pct + 1..];
                let zone = match zone_str.parse::<u32>() {
                    Ok(n) => Zone::Numeric(n),
                    Err(_) => Zone::Named(zone_str.to_string()),
                };
                (&inside[..pct], Some(zone))
            }
            None => (inside, None),
        };

        let ip = Ipv6Addr::from_str(addr_part)
            .map_err(|_| invalid_field_value("socket-address", original))?;

        let port = if let Some(port_str) = after.strip_prefix(':') {
            Some(Self::parse_port_or_service(port_str, original)?)
        } else if after.is_empty() {
            None
        } else {
            return Err(invalid_field_value("socket-address", original));
        };

        Ok(SocketAddress {
            ip: IpAddr::V6(ip),
            port,
            zone,
        })
    }

    fn host_only(host: &str, original: &str) -> Result<Self, MessageFormatError> {
        let ip = Self::parse_host(host, original)?;
        Ok(SocketAddress {
            ip,
            port: None,
            zone: None,
        })
    }

    fn parse_host(host: &str, original: &str) -> Result<IpAddr, MessageFormatError> {
        Ipv4Addr::from_str(host)
            .map(IpAddr::V4)
            .or_else(|_| Ipv6Addr::from_str(host).map(IpAddr::V6))
            .map_err(|_| invalid_field_value("socket-address", original))
    }

    fn parse_port_or_service(s: &str, original: &str) -> Result<u16, MessageFormatError> {
        if let Ok(port) = s.parse::<u32>() {
            return u16::try_from(port).map_err(|_| invalid_field_value("port", original));
        }
        SERVICE_TABLE
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|(_, port)| *port)
            .ok_or_else(|| invalid_field_value("port-or-service", original))
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn zone(&self) -> Option<&Zone> {
        self.zone.as_ref()
    }

    /// Loopback covers `::1` as well as the whole `127.0.0.0/8` block.
    pub fn is_loopback(&self) -> bool {
        self.ip.is_loopback()
    }

    /// Resolve a named zone to its interface index, if this host has an interface by that
    /// name; numeric zones are returned unchanged.
    fn resolved_zone_index(&self) -> Option<u32> {
        match &self.zone {
            None => None,
            Some(Zone::Numeric(n)) => Some(*n),
            Some(Zone::Named(name)) => datalink::interfaces()
                .into_iter()
                .find(|ni| &ni.name == name)
                .map(|ni| ni.index),
        }
    }
}

impl Display for SocketAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V6(ip6) => {
                let needs_brackets = self.port.is_some() || self.zone.is_some();
                if needs_brackets {
                    write!(f, "[{}", ip6)?;
                    if let Some(zone) = &self.zone {
                        match zone {
                            Zone::Numeric(n) => write!(f, "%{}", n)?,
                            Zone::Named(name) => write!(f, "%{}", name)?,
                        }
                    }
                    write!(f, "]")?;
                    if let Some(port) = self.port {
                        write!(f, ":{}", port)?;
                    }
                    Ok(())
                } else {
                    write!(f, "{}", ip6)
                }
            }
            IpAddr::V4(ip4) => match self.port {
                Some(port) => write!(f, "{}:{}", ip4, port),
                None => write!(f, "{}", ip4),
            },
        }
    }
}

impl PartialEq for SocketAddress {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip
            && self.port == other.port
            && self.resolved_zone_index() == other.resolved_zone_index()
    }
}

impl Eq for SocketAddress {}

impl FromStr for SocketAddress {
    type Err = MessageFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, false)
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render_round_trips() {
        let cases = [
            "[::1]:0",
            "127.0.0.1:0",
            "[2001:db8::14]:443",
            "192.168.200.203:80",
        ];
        for case in cases {
            let parsed = SocketAddress::parse(case, false).unwrap();
            let rendered = parsed.to_string();
            let reparsed = SocketAddress::parse(&rendered, false).unwrap();
            assert_eq!(parsed, reparsed, "fixed point for {}", case);
        }
    }

    #[test]
    fn zoned_ipv6_round_trips() {
        let parsed = SocketAddress::parse("[2001:db8::55%1]:443", false).unwrap();
        assert_eq!(parsed.port(), Some(443));
        assert!(matches!(parsed.zone(), Some(Zone::Numeric(1))));
        assert_eq!(parsed.to_string(), "[2001:db8::55%1]:443");
    }

    #[test]
    fn empty_passive_is_unspecified() {
        let parsed = SocketAddress::parse("", true).unwrap();
        assert!(parsed.ip().is_unspecified());
    }

    #[test]
    fn empty_non_passive_is_invalid() {
        assert!(SocketAddress::parse("", false).is_err());
    }

    #[test]
    fn loopback_detection() {
        assert!(SocketAddress::parse("127.0.0.1:0", false)
            .unwrap()
            .is_loopback());
        assert!(SocketAddress::parse("[::1]:0", false).unwrap().is_loopback());
        assert!(!SocketAddress::parse("10.0.0.1:0", false)
            .unwrap()
            .is_loopback());
    }

    #[test]
    fn bare_ipv6_without_brackets() {
        let parsed = SocketAddress::parse("::1", false).unwrap();
        assert_eq!(parsed.port(), None);
        assert_eq!(parsed.to_string(), "::1");
    }

    #[test]
    fn service_name_port() {
        let parsed = SocketAddress::parse("192.168.1.1:http", false).unwrap();
        assert_eq!(parsed.port(), Some(80));
    }

    #[test]
    fn out_of_range_port_is_invalid() {
        assert!(SocketAddress::parse("192.168.1.1:99999", false).is_err());
    }
}
