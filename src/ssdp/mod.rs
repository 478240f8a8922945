/*!
SSDP: multicast discovery, device-side advertisement and control-point search.
*/

// ------------------------------------------------------------------------------------------------
// Modules
// ------------------------------------------------------------------------------------------------

mod protocol;
pub use protocol::{
    MULTICAST_ADDR_V4, MULTICAST_ADDR_V6_LINK_LOCAL, MULTICAST_ADDR_V6_SITE_LOCAL, SSDP_PORT,
};

mod advertise;
pub use advertise::{alive_message, byebye_message, NotifyType};

mod search;
pub use search::{
    device_search_replies, matches_search_target, parse_max_age, search_matches_reply, search_request,
    search_response, SearchReply, SearchTarget,
};

mod engine;
pub use engine::{MessageHandler, SsdpEngine};
