/*!
Control-point search requests and device-side search-target matching and replies.
*/

use crate::http::{HttpMessage, Method};
use crate::ssdp::protocol::{header, MAN_DISCOVER, MULTICAST_ADDR_V4, SSDP_PORT};
use regex::Regex;

lazy_static! {
    /// Matches a `urn:<domain>:(device|service):<type>:<version>` search/notification target,
    /// distinguishing a device URN from a service URN by its third segment rather than the
    /// looser `contains(":service:")` substring check a hand-rolled parser would otherwise need.
    static ref DOMAIN_URN: Regex = Regex::new(r"^urn:[^:]+:(device|service):.+$").unwrap();

    /// Matches the `max-age` directive of a `CACHE-CONTROL` header value, tolerant of the
    /// optional whitespace around `=` that `max-age=1800` vs `max-age = 1800` both allow.
    static ref MAX_AGE: Regex = Regex::new(r"max-age\s*=\s*(\d+)").unwrap();
}

/// Extract the `max-age` seconds from a `CACHE-CONTROL` header value (e.g. `max-age=1800`),
/// returning `None` if the directive is absent or malformed.
pub fn parse_max_age(cache_control: &str) -> Option<u32> {
    MAX_AGE.captures(cache_control).and_then(|c| c[1].parse().ok())
}

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

/// The search target a control point is looking for, or a device is advertising (the `ST`
/// header's parsed form).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SearchTarget {
    All,
    RootDevice,
    Device(String),
    DeviceType(String),
    ServiceType(String),
}

impl SearchTarget {
    pub fn to_header_value(&self) -> String {
        match self {
            SearchTarget::All => "ssdp:all".to_string(),
            SearchTarget::RootDevice => "upnp:rootdevice".to_string(),
            SearchTarget::Device(uuid) => format!("uuid:{}", uuid),
            SearchTarget::DeviceType(urn) => urn.clone(),
            SearchTarget::ServiceType(urn) => urn.clone(),
        }
    }

    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("ssdp:all") {
            SearchTarget::All
        } else if value.eq_ignore_ascii_case("upnp:rootdevice") {
            SearchTarget::RootDevice
        } else if let Some(uuid) = value.strip_prefix("uuid:") {
            SearchTarget::Device(uuid.to_string())
        } else if let Some(captures) = DOMAIN_URN.captures(value) {
            if &captures[1] == "service" {
                SearchTarget::ServiceType(value.to_string())
            } else {
                SearchTarget::DeviceType(value.to_string())
            }
        } else {
            SearchTarget::DeviceType(value.to_string())
        }
    }
}

/// One reply a device advertises when a `(nt, usn)` pair matches an incoming search's target.
#[derive(Clone, Debug)]
pub struct SearchReply {
    pub st: String,
    pub usn: String,
    pub location: String,
}

// ------------------------------------------------------------------------------------------------
// Public Functions
// ------------------------------------------------------------------------------------------------

/// Build an outgoing `M-SEARCH * HTTP/1.1` request (control-point side).
pub fn search_request(target: &SearchTarget, mx: u8) -> HttpMessage {
    let mut message = HttpMessage::new_request(Method::MSearch, "*");
    message.add_header(header::HOST, format!("{}:{}", MULTICAST_ADDR_V4, SSDP_PORT));
    message.add_header(header::MAN, MAN_DISCOVER);
    message.add_header(header::MX, mx.to_string());
    message.add_header(header::ST, target.to_header_value());
    message
}

/// Build a unicast 200 OK search response (device side).
#[allow(clippy::too_many_arguments)]
pub fn search_response(
    reply: &SearchReply,
    server: &str,
    max_age: u32,
    boot_id: u64,
    config_id: u64,
) -> HttpMessage {
    let mut message = HttpMessage::new_response(200, "OK");
    message.add_header(header::CACHE_CONTROL, format!("max-age={}", max_age));
    message.add_header(header::EXT, "");
    message.add_header(header::LOCATION, reply.location.clone());
    message.add_header(header::SERVER, server);
    message.add_header(header::ST, reply.st.clone());
    message.add_header(header::USN, reply.usn.clone());
    message.add_header(header::BOOTID, boot_id.to_string());
    message.add_header(header::CONFIGID, config_id.to_string());
    message
}

/// Enumerate every `(ST, USN)` reply pair a device advertises for `target` — the same fan-out
/// rule drives both an M-SEARCH reply burst and the periodic/initial `ssdp:alive` advertisement
/// set: `ssdp:all` expands to the root-device, UDN, device-type and each service-type
/// pair; every other target yields at most one reply.
pub fn device_search_replies(
    target: &SearchTarget,
    device_uuid: &str,
    device_type: &str,
    location: &str,
    service_types: &[String],
) -> Vec<SearchReply> {
    let root_reply = || SearchReply {
        st: "upnp:rootdevice".to_string(),
        usn: format!("uuid:{}::upnp:rootdevice", device_uuid),
        location: location.to_string(),
    };
    let uuid_reply = || SearchReply {
        st: format!("uuid:{}", device_uuid),
        usn: format!("uuid:{}", device_uuid),
        location: location.to_string(),
    };
    let device_type_reply = || SearchReply {
        st: device_type.to_string(),
        usn: format!("uuid:{}::{}", device_uuid, device_type),
        location: location.to_string(),
    };
    let service_reply = |s: &str| SearchReply {
        st: s.to_string(),
        usn: format!("uuid:{}::{}", device_uuid, s),
        location: location.to_string(),
    };

    match target {
        SearchTarget::All => {
            let mut replies = vec![root_reply(), uuid_reply(), device_type_reply()];
            replies.extend(service_types.iter().map(|s| service_reply(s)));
            replies
        }
        SearchTarget::RootDevice => vec![root_reply()],
        SearchTarget::Device(uuid) if uuid == device_uuid => vec![uuid_reply()],
        SearchTarget::Device(_) => Vec::new(),
        SearchTarget::DeviceType(urn) if urn == device_type => vec![device_type_reply()],
        SearchTarget::DeviceType(_) => Vec::new(),
        SearchTarget::ServiceType(urn) if service_types.iter().any(|s| s == urn) => {
            vec![service_reply(urn)]
        }
        SearchTarget::ServiceType(_) => Vec::new(),
    }
}

/// Whether a reply's `ST` satisfies an outstanding search's target, per spec §4.7: "an incoming
/// reply matches an active search when (search.requestType, search.target) agrees with the
/// reply's ST". `ssdp:all` agrees with every reply; every other search target must match the
/// reply's target exactly (a device answering `ssdp:all` emits several distinct STs, only one
/// of which — the one a narrower search actually asked for — should be delivered to it).
pub fn search_matches_reply(search: &SearchTarget, reply: &SearchTarget) -> bool {
    match search {
        SearchTarget::All => true,
        other => other == reply,
    }
}

/// Whether an advertised `(nt, device_uuid, device_type, service_types)` set matches an
/// incoming search's target.
pub fn matches_search_target(
    target: &SearchTarget,
    device_uuid: &str,
    device_type: Option<&str>,
    service_types: &[String],
) -> bool {
    match target {
        SearchTarget::All => true,
        SearchTarget::RootDevice => device_type.is_some(),
        SearchTarget::Device(uuid) => uuid == device_uuid,
        SearchTarget::DeviceType(urn) => device_type == Some(urn.as_str()),
        SearchTarget::ServiceType(urn) => service_types.iter().any(|s| s == urn),
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_age_parses_with_or_without_surrounding_whitespace() {
        assert_eq!(parse_max_age("max-age=1800"), Some(1800));
        assert_eq!(parse_max_age("max-age = 1800"), Some(1800));
        assert_eq!(parse_max_age("no-cache"), None);
    }

    #[test]
    fn service_urn_distinguished_from_device_urn() {
        let device = SearchTarget::parse("urn:schemas-upnp-org:device:Example:1");
        let service = SearchTarget::parse("urn:schemas-upnp-org:service:Dimming:1");
        assert!(matches!(device, SearchTarget::DeviceType(_)));
        assert!(matches!(service, SearchTarget::ServiceType(_)));
    }

    #[test]
    fn search_request_carries_man_discover() {
        let message = search_request(&SearchTarget::All, 3);
        assert_eq!(message.header_by_name("MAN"), Some(MAN_DISCOVER));
        assert_eq!(message.header_by_name("ST"), Some("ssdp:all"));
    }

    #[test]
    fn root_device_matches_only_with_device_type() {
        assert!(matches_search_target(
            &SearchTarget::RootDevice,
            "uuid-1",
            Some("urn:schemas-upnp-org:device:Example:1"),
            &[]
        ));
        assert!(!matches_search_target(&SearchTarget::RootDevice, "uuid-1", None, &[]));
    }

    #[test]
    fn service_type_matches_any_advertised_service() {
        let services = vec!["urn:schemas-upnp-org:service:Dimming:1".to_string()];
        let target = SearchTarget::parse("urn:schemas-upnp-org:service:Dimming:1");
        assert!(matches_search_target(&target, "uuid-1", None, &services));
    }

    #[test]
    fn all_search_matches_any_reply_target() {
        assert!(search_matches_reply(&SearchTarget::All, &SearchTarget::RootDevice));
        assert!(search_matches_reply(&SearchTarget::All, &SearchTarget::Device("abc".to_string())));
    }

    #[test]
    fn narrow_search_only_matches_identical_reply_target() {
        let search = SearchTarget::DeviceType("urn:schemas-upnp-org:device:Example:1".to_string());
        assert!(search_matches_reply(&search, &search.clone()));
        assert!(!search_matches_reply(&search, &SearchTarget::RootDevice));
        assert!(!search_matches_reply(
            &search,
            &SearchTarget::DeviceType("urn:schemas-upnp-org:device:Other:1".to_string())
        ));
    }

    #[test]
    fn uuid_target_round_trips() {
        let target = SearchTarget::Device("abc-123".to_string());
        assert_eq!(target.to_header_value(), "uuid:abc-123");
        assert_eq!(SearchTarget::parse("uuid:abc-123"), target);
    }

    #[test]
    fn all_target_expands_to_root_uuid_type_and_each_service() {
        let services = vec!["urn:schemas-upnp-org:service:Dimming:1".to_string()];
        let replies = device_search_replies(
            &SearchTarget::All,
            "abc",
            "urn:schemas-upnp-org:device:Example:1",
            "http://192.168.1.5:8080/description.xml",
            &services,
        );
        assert_eq!(replies.len(), 4);
        assert_eq!(replies[0].st, "upnp:rootdevice");
        assert_eq!(replies[1].st, "uuid:abc");
        assert_eq!(replies[2].st, "urn:schemas-upnp-org:device:Example:1");
        assert_eq!(replies[3].st, "urn:schemas-upnp-org:service:Dimming:1");
    }

    #[test]
    fn all_target_with_no_services_yields_three_replies() {
        let replies = device_search_replies(
            &SearchTarget::All,
            "abc",
            "urn:schemas-upnp-org:device:Example:1",
            "http://192.168.1.5:8080/description.xml",
            &[],
        );
        assert_eq!(replies.len(), 3);
    }

    #[test]
    fn device_type_target_matches_only_its_own_type() {
        let target = SearchTarget::DeviceType("urn:schemas-upnp-org:device:Example:1".to_string());
        let replies = device_search_replies(
            &target,
            "abc",
            "urn:schemas-upnp-org:device:Example:1",
            "http://192.168.1.5:8080/description.xml",
            &[],
        );
        assert_eq!(replies.len(), 1);

        let other = SearchTarget::DeviceType("urn:schemas-upnp-org:device:Other:1".to_string());
        assert!(device_search_replies(
            &other,
            "abc",
            "urn:schemas-upnp-org:device:Example:1",
            "http://192.168.1.5:8080/description.xml",
            &[]
        )
        .is_empty());
    }
}
