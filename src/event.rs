/*!
Asynchronous completion and notification events delivered to user-registered callbacks. Every
async operation in [`crate::api`] and every inbound SSDP/GENA occurrence that isn't a direct
synchronous return value reaches user code through exactly one [`Event`] variant, handed to the
registered [`Callback`] on a thread-pool worker.
*/

use crate::registry::Handle;
use std::collections::HashMap;
use std::sync::Arc;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

/// One completion or notification delivered to a registered device or control-point callback.
/// Covers every asynchronous completion and out-of-band occurrence; inbound action/variable
/// requests and subscription requests answer synchronously through [`crate::webserver::RequestHandler`]
/// instead, since the HTTP response they produce can't wait on a callback's return value.
#[derive(Clone, Debug)]
pub enum Event {
    /// A device somewhere on the network advertised `ssdp:alive`.
    DiscoveryAdvertisementAlive {
        cookie: u64,
        device_id: String,
        device_type: String,
        location: String,
        expires: u32,
    },
    /// A unicast M-SEARCH reply matched one of this control point's active searches.
    DiscoverySearchResult {
        cookie: u64,
        device_id: String,
        location: String,
        expires: u32,
    },
    /// An active search's `mx` deadline elapsed with no further matches expected.
    DiscoverySearchTimeout { cookie: u64 },
    /// A device somewhere on the network advertised `ssdp:byebye`.
    DiscoveryAdvertisementByeBye { cookie: u64, device_id: String },
    /// A `send_action`/`send_action_async` call's result (control-point side).
    ControlActionComplete {
        cookie: u64,
        result: Result<HashMap<String, String>, (u32, String)>,
    },
    /// A `get_service_var_status`/`_async` call's result (control-point side).
    ControlGetVarComplete {
        cookie: u64,
        result: Result<String, (u32, String)>,
    },
    /// A NOTIFY arrived for one of this control point's client subscriptions.
    EventReceived {
        cookie: u64,
        sid: String,
        event_key: u32,
        properties: HashMap<String, String>,
    },
    /// A `subscribe`/`subscribe_async` call's result.
    EventSubscribeComplete {
        cookie: u64,
        result: Result<(String, u32), String>,
    },
    /// An `unsubscribe`/`unsubscribe_async` call's result.
    EventUnsubscribeComplete { cookie: u64, result: Result<(), String> },
    /// A `renew_subscription`/`_async` call's result.
    EventRenewalComplete { cookie: u64, result: Result<u32, String> },
    /// An automatic renewal (scheduled `AUTO_RENEW_TIME` before expiry) failed.
    EventAutorenewalFailed { cookie: u64, sid: String },
    /// A client subscription expired without a successful renewal.
    EventSubscriptionExpired { cookie: u64, sid: String },
    /// A device's NOTIFY to one of its subscribers exhausted [`crate::gena::RetryPolicy`] without
    /// a successful delivery; the subscription is dropped.
    EventNotifyDeliveryFailed { handle: Handle, sid: String },
}

/// A user-supplied event sink, erased behind `Arc<dyn Fn>` so a single closure can stand in for
/// the old pairing of an opaque cookie value and a function pointer.
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// Wraps an [`EventCallback`] so it can live in a `#[derive(Debug, Clone)]` registry record —
/// `Arc<dyn Fn>` has neither impl on its own.
#[derive(Clone)]
pub struct Callback(pub EventCallback);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        Callback(Arc::new(f))
    }

    pub fn call(&self, event: Event) {
        (self.0)(event)
    }
}

impl Default for Callback {
    fn default() -> Self {
        Callback(Arc::new(|_| {}))
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Callback(..)")
    }
}
