/*!
A UPnP 1.0/1.1 device-host and control-point core.

This crate implements the four protocol layers that together realise UPnP
networking:

* [`ssdp`] — multicast discovery (advertisement, search, search replies).
* [`http`] — the HTTP/1.1 parser, streaming client and mini embedded server
  that carry everything else.
* [`soap`] — action invocation and state-variable queries.
* [`gena`] — eventing (subscribe / notify / unsubscribe).

These sit on a shared concurrency substrate ([`concurrency`]), a registry of
device/control-point handles ([`registry`]), and a network-adapter
abstraction ([`net`]). [`context`] bundles all of this into a single
[`CoreContext`](context::CoreContext) value, created once by
[`api::init`] and threaded explicitly through every operation — there is no
global mutable state.

More Information:

* [UPnP Device Architecture 1.0](http://www.upnp.org/specs/arch/UPnP-arch-DeviceArchitecture-v1.0.pdf)
*/

#![warn(
    missing_debug_implementations,
    unused_extern_crates,
    rust_2018_idioms
)]

#[macro_use]
extern crate tracing;

#[macro_use]
extern crate lazy_static;

// ------------------------------------------------------------------------------------------------
// Modules
// ------------------------------------------------------------------------------------------------

mod error;
pub use error::{Error, MessageFormatError, ValueSource};

mod config;
pub use config::CoreConfig;

mod event;
pub use event::{Callback, Event, EventCallback};

pub mod net;

pub mod concurrency;

pub mod http;

pub mod webserver;

pub mod ssdp;

pub mod soap;

pub mod gena;

pub mod registry;

mod xml;

mod context;
pub use context::CoreContext;

mod api;
pub use api::*;

// ------------------------------------------------------------------------------------------------
// Crate-wide constants
// ------------------------------------------------------------------------------------------------

/// The UPnP Device Architecture version this crate implements the wire format of.
pub const UPNP_VERSION: &str = "1.1";

/// Token used in `SERVER`/`USER-AGENT` product strings to identify the UPnP version.
pub const UPNP_STRING: &str = "UPnP";

/// Default root domain used when building `urn:` device/service type identifiers.
pub const UPNP_DOMAIN: &str = "schemas-upnp-org";

/// The maximum number of simultaneously registered device/control-point handles.
pub const MAX_HANDLES: usize = 200;

/// `AUTO_RENEW_TIME`: seconds before a GENA subscription's expiry that an automatic renewal
/// is attempted.
pub const AUTO_RENEW_TIME: u64 = 10;

/// Interval, in seconds, at which each control point's search-timeout ticker runs.
pub const VERIFY_TIMEOUTS_INTERVAL: u64 = 30;
