/*!
Device-side advertisement: `ssdp:alive`/`ssdp:byebye` NOTIFY bodies, one per advertised root
device, embedded device and service type.
*/

use crate::http::{HttpMessage, Method};
use crate::ssdp::protocol::{header, nts, MULTICAST_ADDR_V4, SSDP_PORT};

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotifyType {
    Alive,
    ByeBye,
}

// ------------------------------------------------------------------------------------------------
// Public Functions
// ------------------------------------------------------------------------------------------------

///
/// Build one `ssdp:alive` NOTIFY for a single `(nt, usn)` pair (a root device, an embedded
/// device, or a service type advertises one of these each, per the discovery fan-out rules).
///
#[allow(clippy::too_many_arguments)]
pub fn alive_message(
    nt: &str,
    usn: &str,
    location: &str,
    server: &str,
    max_age: u32,
    boot_id: u64,
    config_id: u64,
    search_port: Option<u16>,
) -> HttpMessage {
    let mut message = HttpMessage::new_request(Method::Notify, "*");
    message.add_header(header::HOST, format!("{}:{}", MULTICAST_ADDR_V4, SSDP_PORT));
    message.add_header(header::CACHE_CONTROL, format!("max-age={}", max_age));
    message.add_header(header::LOCATION, location);
    message.add_header(header::NT, nt);
    message.add_header(header::NTS, nts::ALIVE);
    message.add_header(header::USN, usn);
    message.add_header(header::SERVER, server);
    message.add_header(header::BOOTID, boot_id.to_string());
    message.add_header(header::CONFIGID, config_id.to_string());
    if let Some(port) = search_port {
        message.add_header(header::SEARCHPORT, port.to_string());
    }
    message
}

/// Build one `ssdp:byebye` NOTIFY for the same `(nt, usn)` pair. `byebye` carries no
/// `Cache-Control`, `Location` or `Server` header (the resource is withdrawing, not describing
/// itself).
pub fn byebye_message(nt: &str, usn: &str, boot_id: u64, config_id: u64) -> HttpMessage {
    let mut message = HttpMessage::new_request(Method::Notify, "*");
    message.add_header(header::HOST, format!("{}:{}", MULTICAST_ADDR_V4, SSDP_PORT));
    message.add_header(header::NT, nt);
    message.add_header(header::NTS, nts::BYEBYE);
    message.add_header(header::USN, usn);
    message.add_header(header::BOOTID, boot_id.to_string());
    message.add_header(header::CONFIGID, config_id.to_string());
    message
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alive_message_carries_required_headers() {
        let message = alive_message(
            "upnp:rootdevice",
            "uuid:abc::upnp:rootdevice",
            "http://192.168.1.5:8080/description.xml",
            "Linux/1.0 UPnP/1.1 example/1.0",
            1800,
            1,
            1,
            None,
        );
        assert_eq!(message.method, Some(Method::Notify));
        assert_eq!(message.header_by_name("NTS"), Some(nts::ALIVE));
        assert_eq!(message.header_by_name("CACHE-CONTROL"), Some("max-age=1800"));
    }

    #[test]
    fn byebye_message_omits_location_and_cache_control() {
        let message = byebye_message("upnp:rootdevice", "uuid:abc::upnp:rootdevice", 1, 1);
        assert!(message.header_by_name("LOCATION").is_none());
        assert!(message.header_by_name("CACHE-CONTROL").is_none());
        assert_eq!(message.header_by_name("NTS"), Some(nts::BYEBYE));
    }
}
