/*!
The network-adapter and socket-address abstractions shared by every protocol layer.
*/

// ------------------------------------------------------------------------------------------------
// Modules
// ------------------------------------------------------------------------------------------------

mod socket_addr;
pub use socket_addr::SocketAddress;

mod adapter;
pub use adapter::{is_ipv6_link_local, NetAdapter, NetInterface, Selector};
