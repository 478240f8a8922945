/*!
The crate's top-level entry point: a single free function, [`init`], that starts a
[`CoreContext`] from a [`CoreConfig`]. Every other operation — device registration,
search, SOAP calls, subscriptions — is a method on the [`CoreContext`] value this returns;
there's no separate flat function table to keep in sync with it.
*/

use crate::config::CoreConfig;
use crate::context::CoreContext;
use crate::error::Error;

/// Starts a new UPnP core: binds the HTTP listener, starts the embedded web server and the
/// SSDP receive loop, and spins up the shared thread pool and timer wheel.
///
/// Multiple independent cores can coexist in one process — each [`init`] call returns its own
/// [`CoreContext`], cheaply `Clone`, with no shared global state between them. Call
/// [`CoreContext::finish`] (or drop every clone) to tear one down.
pub fn init(config: CoreConfig) -> Result<CoreContext, Error> {
    CoreContext::new(config)
}
