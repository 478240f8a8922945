/*!
The handle table: a fixed-capacity slot array mapping a small integer handle to either a
`DeviceRecord` or a `ControlPointRecord`, plus the secondary SID→handle index GENA needs (the
"Handle table / CoreContext" row of the module map).
*/

use crate::error::Error;
use crate::event::Callback;
use crate::gena::{ClientSubscription, ServiceSubscription};
use crate::webserver::{ControlRequest, ControlResponse, RequestHandler};
use crate::MAX_HANDLES;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

pub type Handle = i32;

/// A device's application-supplied answer to an inbound SOAP action or `QueryStateVariable`
/// request — the only part of a device's behaviour this crate cannot synthesize itself, since
/// subscription bookkeeping is otherwise handled directly against the registry.
#[derive(Clone)]
pub struct ActionHandler(pub Arc<RequestHandler>);

impl ActionHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Handle, ControlRequest) -> ControlResponse + Send + Sync + 'static,
    {
        ActionHandler(Arc::new(f))
    }

    pub fn call(&self, handle: Handle, request: ControlRequest) -> ControlResponse {
        (self.0)(handle, request)
    }
}

impl Default for ActionHandler {
    fn default() -> Self {
        ActionHandler(Arc::new(|_, _| ControlResponse::Action(Err((501, "Action Failed".to_string())))))
    }
}

impl std::fmt::Debug for ActionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ActionHandler(..)")
    }
}

/// A device's application-supplied initial property values for a newly accepted GENA
/// subscription — called once, synchronously, right after the subscription is recorded, so the
/// initial NOTIFY can carry the current state of every evented variable.
#[derive(Clone)]
pub struct SubscriptionHandler(pub Arc<dyn Fn(Handle) -> Vec<(String, String)> + Send + Sync>);

impl SubscriptionHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Handle) -> Vec<(String, String)> + Send + Sync + 'static,
    {
        SubscriptionHandler(Arc::new(f))
    }

    pub fn call(&self, handle: Handle) -> Vec<(String, String)> {
        (self.0)(handle)
    }
}

impl Default for SubscriptionHandler {
    fn default() -> Self {
        SubscriptionHandler(Arc::new(|_| Vec::new()))
    }
}

impl std::fmt::Debug for SubscriptionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SubscriptionHandler(..)")
    }
}

/// One service a root device advertises: its type URN plus the control/event URL paths the
/// embedded web server routes SOAP and GENA requests against. Parsing these paths out of a
/// device description document is out of scope here, so a caller registering a root device
/// supplies them directly.
#[derive(Clone, Debug)]
pub struct ServiceRegistration {
    pub service_type: String,
    pub control_path: String,
    pub event_path: String,
}

/// Device-side registration.
#[derive(Clone, Debug)]
pub struct DeviceRecord {
    pub root_description_url: String,
    pub device_type: String,
    pub udn: String,
    pub cookie: u64,
    pub advertisement_max_age: u32,
    pub address_family: IpAddr,
    pub active: bool,
    pub service_types: Vec<ServiceRegistration>,
    pub subscriptions: HashMap<String, ServiceSubscription>,
    /// `SEARCHPORT.UPNP.ORG` — an alternate unicast port this device also answers search on.
    pub search_port: Option<u16>,
    /// Monotonic boot counter threaded into every SSDP message this device sends
    /// (`BOOTID.UPNP.ORG`).
    pub boot_id: u64,
    pub config_id: u64,
    pub callback: Callback,
    pub action_handler: ActionHandler,
    pub subscription_handler: SubscriptionHandler,
}

/// Control-point-side registration.
#[derive(Clone, Debug, Default)]
pub struct ControlPointRecord {
    pub cookie: u64,
    pub active_searches: Vec<u64>,
    pub client_subscriptions: Vec<ClientSubscription>,
    pub callback: Callback,
}

#[derive(Clone, Debug)]
enum Record {
    Device(DeviceRecord),
    ControlPoint(ControlPointRecord),
}

struct Slots {
    slots: Vec<Option<Record>>,
    /// SID (as text) → owning handle, so GENA's inbound SUBSCRIBE/UNSUBSCRIBE/NOTIFY handling
    /// can find the parent DeviceRecord in O(1) without scanning every slot.
    sid_index: HashMap<String, Handle>,
}

///
/// The single handle table shared by every component: handle ids are reused only after the slot
/// has been emptied, exactly one record lives per slot, and every operation takes the table's
/// lock.
///
pub struct Registry {
    inner: RwLock<Slots>,
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_HANDLES);
        slots.resize_with(MAX_HANDLES, || None);
        Registry {
            inner: RwLock::new(Slots {
                slots,
                sid_index: HashMap::new(),
            }),
        }
    }

    fn allocate(&self, record: Record) -> Result<Handle, Error> {
        let mut guard = self.inner.write().unwrap();
        let index = guard
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::OutOfMemory)?;
        guard.slots[index] = Some(record);
        Ok((index + 1) as Handle)
    }

    pub fn register_device(&self, record: DeviceRecord) -> Result<Handle, Error> {
        self.allocate(Record::Device(record))
    }

    pub fn register_control_point(&self, record: ControlPointRecord) -> Result<Handle, Error> {
        self.allocate(Record::ControlPoint(record))
    }

    pub fn unregister(&self, handle: Handle) -> Result<(), Error> {
        let mut guard = self.inner.write().unwrap();
        let index = slot_index(handle)?;
        let slot = guard.slots.get_mut(index).ok_or(Error::InvalidHandle(handle))?;
        if slot.is_none() {
            return Err(Error::InvalidHandle(handle));
        }
        if let Some(Record::Device(device)) = slot.as_ref() {
            let sids: Vec<String> = device.subscriptions.keys().cloned().collect();
            for sid in sids {
                guard.sid_index.remove(&sid);
            }
        }
        *slot = None;
        Ok(())
    }

    pub fn with_device<R>(&self, handle: Handle, f: impl FnOnce(&DeviceRecord) -> R) -> Result<R, Error> {
        let guard = self.inner.read().unwrap();
        match self.get_slot(&guard, handle)? {
            Record::Device(device) => Ok(f(device)),
            Record::ControlPoint(_) => Err(Error::InvalidHandle(handle)),
        }
    }

    pub fn with_device_mut<R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut DeviceRecord) -> R,
    ) -> Result<R, Error> {
        let mut guard = self.inner.write().unwrap();
        let index = slot_index(handle)?;
        match guard.slots.get_mut(index).and_then(|s| s.as_mut()) {
            Some(Record::Device(device)) => Ok(f(device)),
            _ => Err(Error::InvalidHandle(handle)),
        }
    }

    pub fn with_control_point<R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&ControlPointRecord) -> R,
    ) -> Result<R, Error> {
        let guard = self.inner.read().unwrap();
        match self.get_slot(&guard, handle)? {
            Record::ControlPoint(cp) => Ok(f(cp)),
            Record::Device(_) => Err(Error::InvalidHandle(handle)),
        }
    }

    pub fn with_control_point_mut<R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut ControlPointRecord) -> R,
    ) -> Result<R, Error> {
        let mut guard = self.inner.write().unwrap();
        let index = slot_index(handle)?;
        match guard.slots.get_mut(index).and_then(|s| s.as_mut()) {
            Some(Record::ControlPoint(cp)) => Ok(f(cp)),
            _ => Err(Error::InvalidHandle(handle)),
        }
    }

    /// Record that `sid` belongs to the device registered at `handle`, for O(1) lookup on
    /// inbound GENA traffic.
    pub fn index_sid(&self, sid: String, handle: Handle) {
        self.inner.write().unwrap().sid_index.insert(sid, handle);
    }

    pub fn remove_sid(&self, sid: &str) {
        self.inner.write().unwrap().sid_index.remove(sid);
    }

    pub fn handle_for_sid(&self, sid: &str) -> Option<Handle> {
        self.inner.read().unwrap().sid_index.get(sid).copied()
    }

    /// Iterate every currently-registered device handle (used by `UpnpFinish` teardown and by
    /// the auto-renewal/expiry tickers).
    pub fn device_handles(&self) -> Vec<Handle> {
        let guard = self.inner.read().unwrap();
        guard
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Some(Record::Device(_)) => Some((i + 1) as Handle),
                _ => None,
            })
            .collect()
    }

    /// Iterate every currently-registered control-point handle (used by the advertisement/search
    /// reply dispatcher and the auto-renewal/search-timeout tickers).
    pub fn control_point_handles(&self) -> Vec<Handle> {
        let guard = self.inner.read().unwrap();
        guard
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Some(Record::ControlPoint(_)) => Some((i + 1) as Handle),
                _ => None,
            })
            .collect()
    }

    fn get_slot<'a>(&self, guard: &'a Slots, handle: Handle) -> Result<&'a Record, Error> {
        let index = slot_index(handle)?;
        guard.slots.get(index).and_then(|s| s.as_ref()).ok_or(Error::InvalidHandle(handle))
    }
}

fn slot_index(handle: Handle) -> Result<usize, Error> {
    if handle < 1 || handle as usize > MAX_HANDLES {
        return Err(Error::InvalidHandle(handle));
    }
    Ok((handle - 1) as usize)
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn sample_device() -> DeviceRecord {
        DeviceRecord {
            root_description_url: "http://192.168.1.5:8080/description.xml".to_string(),
            device_type: "urn:schemas-upnp-org:device:Example:1".to_string(),
            udn: "uuid:example".to_string(),
            cookie: 0,
            advertisement_max_age: 1800,
            address_family: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)),
            active: true,
            service_types: Vec::new(),
            subscriptions: HashMap::new(),
            search_port: None,
            boot_id: 1,
            config_id: 1,
            callback: Callback::default(),
            action_handler: ActionHandler::default(),
            subscription_handler: SubscriptionHandler::default(),
        }
    }

    #[test]
    fn register_and_unregister_round_trips() {
        let registry = Registry::new();
        let handle = registry.register_device(sample_device()).unwrap();
        assert!(registry.with_device(handle, |_| ()).is_ok());
        registry.unregister(handle).unwrap();
        assert!(registry.with_device(handle, |_| ()).is_err());
    }

    #[test]
    fn handle_reused_only_after_slot_emptied() {
        let registry = Registry::new();
        let first = registry.register_device(sample_device()).unwrap();
        registry.unregister(first).unwrap();
        let second = registry.register_device(sample_device()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn out_of_range_handle_is_invalid() {
        let registry = Registry::new();
        assert!(matches!(
            registry.with_device(999, |_| ()),
            Err(Error::InvalidHandle(999))
        ));
    }

    #[test]
    fn sid_index_resolves_to_owning_handle() {
        let registry = Registry::new();
        let handle = registry.register_device(sample_device()).unwrap();
        registry.index_sid("uuid:sub-1".to_string(), handle);
        assert_eq!(registry.handle_for_sid("uuid:sub-1"), Some(handle));
        registry.remove_sid("uuid:sub-1");
        assert_eq!(registry.handle_for_sid("uuid:sub-1"), None);
    }

    #[test]
    fn exhausting_capacity_returns_out_of_memory() {
        let registry = Registry::new();
        for _ in 0..MAX_HANDLES {
            registry.register_device(sample_device()).unwrap();
        }
        assert!(matches!(registry.register_device(sample_device()), Err(Error::OutOfMemory)));
    }
}
