/*!
Fixed SSDP constants: the well-known multicast group addresses and port every message in this
module is addressed to or from.
*/

/// Standard SSDP port (both IPv4 and IPv6).
pub const SSDP_PORT: u16 = 1900;

/// IPv4 multicast group `239.255.255.250`.
pub const MULTICAST_ADDR_V4: &str = "239.255.255.250";

/// IPv6 link-local multicast group `FF02::C`.
pub const MULTICAST_ADDR_V6_LINK_LOCAL: &str = "FF02::C";

/// IPv6 site-local multicast group `FF05::C`.
pub const MULTICAST_ADDR_V6_SITE_LOCAL: &str = "FF05::C";

/// Default `MX` header value used on outgoing search requests when the caller doesn't override it.
pub const DEFAULT_MX: u8 = 3;

/// Header name constants, matched case-insensitively by the HTTP-over-UDP parser.
pub mod header {
    pub const HOST: &str = "HOST";
    pub const CACHE_CONTROL: &str = "CACHE-CONTROL";
    pub const LOCATION: &str = "LOCATION";
    pub const NT: &str = "NT";
    pub const NTS: &str = "NTS";
    pub const USN: &str = "USN";
    pub const SERVER: &str = "SERVER";
    pub const MAN: &str = "MAN";
    pub const MX: &str = "MX";
    pub const ST: &str = "ST";
    pub const EXT: &str = "EXT";
    pub const BOOTID: &str = "BOOTID.UPNP.ORG";
    pub const CONFIGID: &str = "CONFIGID.UPNP.ORG";
    pub const SEARCHPORT: &str = "SEARCHPORT.UPNP.ORG";
    pub const NLS: &str = "01-NLS";
}

/// `NTS` values.
pub mod nts {
    pub const ALIVE: &str = "ssdp:alive";
    pub const BYEBYE: &str = "ssdp:byebye";
    pub const UPDATE: &str = "ssdp:update";
}

pub const MAN_DISCOVER: &str = "\"ssdp:discover\"";
