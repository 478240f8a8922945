/*!
`CoreContext`: the single value every operation in [`crate::api`] is threaded through, bundling
what the source kept as process-global state (`GlobalDeviceList`, `gSsdpReqSocket4`, `gIF_IPV4`,
the thread pool and timer singletons, ...) into one owned, `Clone`-able handle threaded through
every call instead.

Creating one runs `Init`: it picks a bind interface, starts the embedded web server and the
SSDP receive loop, and starts the shared thread pool and timer. Dropping the last clone (or
calling [`CoreContext::finish`] explicitly) tears all of that down again.
*/

use crate::concurrency::{JobPriority, ThreadPool, TimerHandle, TimerWheel};
use crate::config::CoreConfig;
use crate::error::Error;
use crate::event::{Callback, Event};
use crate::gena::ClientSubscription;
use crate::net::{is_ipv6_link_local, NetAdapter, Selector};
use crate::registry::{ActionHandler, ControlPointRecord, DeviceRecord, Handle, Registry, SubscriptionHandler};
use crate::ssdp::{
    matches_search_target, parse_max_age, search_matches_reply, search_response, SearchReply, SearchTarget, SsdpEngine,
    MULTICAST_ADDR_V4, SSDP_PORT,
};
use crate::webserver::{
    DirCallbacks, HostValidator, HttpServer, NotifyHandler, RequestHandler, ServiceEndpoint, VirtualDirTable, WebAlias,
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Minimum pause between successive multicast packets of one advertisement/byebye burst,
/// so a lossy link doesn't drop the whole set.
const SSDP_PAUSE: Duration = Duration::from_millis(100);

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

/// One control point's outstanding M-SEARCH. Kept outside
/// [`ControlPointRecord`] because it needs a [`TimerHandle`] and an owned [`SearchTarget`]
/// alongside the handle/cookie the record already tracks by id.
#[derive(Clone)]
struct ActiveSearch {
    handle: Handle,
    cookie: u64,
    target: SearchTarget,
    timer: TimerHandle,
}

/// Per-device periodic re-advertisement state, so [`CoreContext::unregister_root_device`] can
/// cancel the timer a successful [`CoreContext::register_root_device`] started.
struct DeviceAdvertising {
    max_age: u32,
    timer: Option<TimerHandle>,
}

/// The SSDP engine's send sockets, held outside the engine itself so the message handler (built
/// before the engine exists) can reply without owning it — see [`build_ssdp_handler`]. Both
/// advertisements and outgoing M-SEARCH always go out over `v4`; `v6`, when present, is only
/// used to reply to a unicast M-SEARCH that itself arrived over IPv6.
#[derive(Clone)]
struct SsdpSockets {
    v4: Arc<UdpSocket>,
    v6: Option<Arc<UdpSocket>>,
}

impl SsdpSockets {
    fn for_target(&self, target: SocketAddr) -> &Arc<UdpSocket> {
        match (target, &self.v6) {
            (SocketAddr::V6(_), Some(v6)) => v6,
            _ => &self.v4,
        }
    }
}

/// Everything a dispatched control/event request needs that isn't already reachable through
/// the [`Registry`] — built once and handed to [`webserver::HttpServer::start`] as the single
/// [`RequestHandler`]/[`NotifyHandler`] pair every inbound connection is routed through.
struct Dispatch {
    registry: Arc<Registry>,
    pool: Arc<ThreadPool>,
    timer: Arc<TimerWheel>,
    max_subscriptions: Arc<AtomicUsize>,
    max_subscription_timeout_secs: Arc<AtomicU32>,
    notify_retry: crate::gena::RetryPolicy,
}

///
/// The single, explicit handle every [`crate::api`] call takes. Created by [`crate::init`]
/// ("Init"), destroyed by [`CoreContext::finish`] ("Finish"). Cheaply `Clone`, since it's a thin
/// wrapper over an `Arc<Inner>` — every clone refers to the same running core.
///
#[derive(Clone)]
pub struct CoreContext {
    inner: Arc<Inner>,
}

struct Inner {
    config: CoreConfig,
    finished: AtomicBool,
    max_content_length: AtomicUsize,
    boot_id: AtomicU64,
    config_id: AtomicU64,

    registry: Arc<Registry>,
    pool: Arc<ThreadPool>,
    timer: Arc<TimerWheel>,

    server_addr: SocketAddr,
    /// Second HTTP listener bound on an IPv6 address, when one is available; `None` on a
    /// v4-only host. Bound to the unspecified address so both the link-local and ULA/GUA
    /// addresses below reach it on the same port.
    server_addr6: Option<SocketAddr>,
    /// Link-local (`fe80::/10`) address found at `Init` time, used to build GENA `CALLBACK`
    /// URLs for publishers on link-local addresses (spec §4.8).
    ipv6_link_local: Option<IpAddr>,
    /// Unique-local/global-unicast IPv6 address found at `Init` time, preferred for `CALLBACK`
    /// URLs whenever the publisher itself is non-link-local IPv6.
    ipv6_ula_gua: Option<IpAddr>,

    alias: Arc<WebAlias>,
    virtual_dirs: Arc<RwLock<VirtualDirTable>>,
    document_root: Arc<RwLock<Option<PathBuf>>>,
    endpoints: Arc<RwLock<Vec<ServiceEndpoint>>>,
    event_subscriptions: Arc<RwLock<HashMap<String, Handle>>>,
    webserver_enabled: Arc<AtomicBool>,
    host_validator: Arc<RwLock<Option<Arc<HostValidator>>>>,
    allow_literal_host_redirection: AtomicBool,
    max_subscriptions: Arc<AtomicUsize>,
    max_subscription_timeout_secs: Arc<AtomicU32>,

    http_server: Mutex<Option<HttpServer>>,
    http_server6: Mutex<Option<HttpServer>>,
    ssdp_engine: Mutex<Option<SsdpEngine>>,
    ssdp_sockets: Arc<Mutex<Option<SsdpSockets>>>,

    active_searches: Arc<RwLock<HashMap<u64, ActiveSearch>>>,
    next_search_id: AtomicU64,
    device_advertising: RwLock<HashMap<Handle, DeviceAdvertising>>,
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl std::fmt::Debug for CoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreContext")
            .field("server_addr", &self.inner.server_addr)
            .field("finished", &self.inner.finished.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl CoreContext {
    /// `Init(interface, port)`: pick a bind address, start the thread pool, timer, embedded
    /// web server and SSDP engine.
    pub fn new(config: CoreConfig) -> Result<Self, Error> {
        let bind_ip = resolve_bind_address(&config.interface)?;

        let pool = Arc::new(ThreadPool::new(&config.thread_pool));
        let timer = Arc::new(TimerWheel::new(Arc::clone(&pool)));
        let registry = Arc::new(Registry::new());

        let alias = Arc::new(WebAlias::new());
        let virtual_dirs = Arc::new(RwLock::new(VirtualDirTable::new()));
        let document_root = Arc::new(RwLock::new(config.document_root.clone()));
        let endpoints = Arc::new(RwLock::new(Vec::new()));
        let event_subscriptions = Arc::new(RwLock::new(HashMap::new()));
        let webserver_enabled = Arc::new(AtomicBool::new(config.webserver_enabled));
        let host_validator: Arc<RwLock<Option<Arc<HostValidator>>>> = Arc::new(RwLock::new(None));
        let max_subscriptions = Arc::new(AtomicUsize::new(config.max_subscriptions));
        let max_subscription_timeout_secs = Arc::new(AtomicU32::new(config.max_subscription_timeout_secs));

        let dispatch = Arc::new(Dispatch {
            registry: Arc::clone(&registry),
            pool: Arc::clone(&pool),
            timer: Arc::clone(&timer),
            max_subscriptions: Arc::clone(&max_subscriptions),
            max_subscription_timeout_secs: Arc::clone(&max_subscription_timeout_secs),
            notify_retry: crate::gena::RetryPolicy::default(),
        });

        let request_handler: Arc<RequestHandler> = build_request_handler(Arc::clone(&dispatch));
        let notify_handler: Arc<NotifyHandler> = build_notify_handler(Arc::clone(&registry), Arc::clone(&pool));

        let http_server = HttpServer::start(
            SocketAddr::new(bind_ip, config.port),
            Arc::clone(&alias),
            Arc::clone(&virtual_dirs),
            Arc::clone(&document_root),
            Arc::clone(&endpoints),
            Arc::clone(&request_handler),
            Arc::clone(&event_subscriptions),
            Arc::clone(&notify_handler),
            Arc::clone(&webserver_enabled),
            Arc::clone(&host_validator),
            Duration::from_secs(30),
        )?;
        let server_addr = http_server.local_addr();

        // A v6-capable host gets a second listener bound to `[::]:port6` so both its
        // link-local and ULA/GUA addresses are reachable on one port; a v4-only host (or one
        // where the second bind fails, e.g. IPv6 disabled in the kernel) simply has none of
        // this and `server_ip6_address` etc. report `None`.
        let mut v6_adapter = NetAdapter::default();
        let _ = v6_adapter.get_first();
        let mut ipv6_link_local = None;
        let mut ipv6_ula_gua = None;
        if v6_adapter.find_first(&Selector::Any) {
            loop {
                if let Some(entry) = v6_adapter.current() {
                    if let IpAddr::V6(v6) = entry.sockaddr() {
                        if is_ipv6_link_local(&v6) {
                            ipv6_link_local.get_or_insert(IpAddr::V6(v6));
                        } else {
                            ipv6_ula_gua.get_or_insert(IpAddr::V6(v6));
                        }
                    }
                }
                if !v6_adapter.find_next(&Selector::Any) {
                    break;
                }
            }
        }
        let http_server6 = if ipv6_link_local.is_some() || ipv6_ula_gua.is_some() {
            HttpServer::start(
                SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), config.port6),
                Arc::clone(&alias),
                Arc::clone(&virtual_dirs),
                Arc::clone(&document_root),
                Arc::clone(&endpoints),
                request_handler,
                Arc::clone(&event_subscriptions),
                notify_handler,
                Arc::clone(&webserver_enabled),
                Arc::clone(&host_validator),
                Duration::from_secs(30),
            )
            .ok()
        } else {
            None
        };
        let server_addr6 = http_server6.as_ref().map(|s| s.local_addr());

        let active_searches: Arc<RwLock<HashMap<u64, ActiveSearch>>> = Arc::new(RwLock::new(HashMap::new()));
        let ssdp_sockets: Arc<Mutex<Option<SsdpSockets>>> = Arc::new(Mutex::new(None));
        let ssdp_handler = build_ssdp_handler(
            Arc::clone(&registry),
            Arc::clone(&pool),
            Arc::clone(&timer),
            Arc::clone(&ssdp_sockets),
            Arc::clone(&active_searches),
        );

        let bind_v4 = match bind_ip {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => std::net::Ipv4Addr::UNSPECIFIED,
        };
        let ssdp_engine = SsdpEngine::start(bind_v4, config.ssdp_ttl, Arc::clone(&pool), ssdp_handler)?;
        *ssdp_sockets.lock().unwrap() = Some(SsdpSockets {
            v4: ssdp_engine.socket_handle(),
            v6: ssdp_engine.socket_handle_v6(),
        });

        info!("UPnP core initialised, HTTP listening on {}", server_addr);

        let max_content_length = config.max_content_length;
        Ok(CoreContext {
            inner: Arc::new(Inner {
                config,
                finished: AtomicBool::new(false),
                max_content_length: AtomicUsize::new(max_content_length),
                boot_id: AtomicU64::new(1),
                config_id: AtomicU64::new(1),
                registry,
                pool,
                timer,
                server_addr,
                server_addr6,
                ipv6_link_local,
                ipv6_ula_gua,
                alias,
                virtual_dirs,
                document_root,
                endpoints,
                event_subscriptions,
                webserver_enabled,
                host_validator,
                allow_literal_host_redirection: AtomicBool::new(false),
                max_subscriptions,
                max_subscription_timeout_secs,
                http_server: Mutex::new(Some(http_server)),
                http_server6: Mutex::new(http_server6),
                ssdp_engine: Mutex::new(Some(ssdp_engine)),
                ssdp_sockets,
                active_searches,
                next_search_id: AtomicU64::new(1),
                device_advertising: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn is_inited(&self) -> bool {
        !self.inner.finished.load(Ordering::SeqCst)
    }

    /// `Finish()`. A second call on an already-finished context returns `Error::Finish`.
    pub fn finish(&self) -> Result<(), Error> {
        if self.inner.finished.swap(true, Ordering::SeqCst) {
            return Err(Error::Finish);
        }
        for handle in self.inner.registry.device_handles() {
            let _ = self.unregister_root_device(handle);
        }
        for handle in self.inner.registry.control_point_handles() {
            let _ = self.unregister_client(handle);
        }
        if let Some(mut server) = self.inner.http_server.lock().unwrap().take() {
            server.shutdown();
        }
        if let Some(mut server) = self.inner.http_server6.lock().unwrap().take() {
            server.shutdown();
        }
        if let Some(mut engine) = self.inner.ssdp_engine.lock().unwrap().take() {
            engine.shutdown();
        }
        info!("UPnP core finished");
        Ok(())
    }

    fn require_inited(&self) -> Result<(), Error> {
        if self.inner.finished.load(Ordering::SeqCst) {
            Err(Error::Finish)
        } else {
            Ok(())
        }
    }

    pub fn set_max_content_length(&self, n: usize) {
        self.inner.max_content_length.store(n, Ordering::SeqCst);
    }

    pub fn server_ip_address(&self) -> IpAddr {
        self.inner.server_addr.ip()
    }

    pub fn server_port(&self) -> u16 {
        self.inner.server_addr.port()
    }

    /// `GetServerIp6Address()`: the link-local IPv6 address the embedded web server also
    /// listens on, if this host has one.
    pub fn server_ip6_address(&self) -> Option<IpAddr> {
        self.inner.ipv6_link_local
    }

    /// `GetServerPort6()`: shared by both the link-local and ULA/GUA addresses, since the v6
    /// listener binds the unspecified address rather than one specific one.
    pub fn server_port6(&self) -> Option<u16> {
        self.inner.server_addr6.map(|a| a.port())
    }

    /// `GetServerUlaGuaIp6Address()`: the first unique-local or global-unicast IPv6 address
    /// found at `Init` time, if any.
    pub fn server_ula_gua_ip6_address(&self) -> Option<IpAddr> {
        self.inner.ipv6_ula_gua
    }

    pub fn server_ula_gua_port6(&self) -> Option<u16> {
        self.inner.server_addr6.map(|a| a.port())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub(crate) fn pool(&self) -> &Arc<ThreadPool> {
        &self.inner.pool
    }

    pub(crate) fn timer(&self) -> &Arc<TimerWheel> {
        &self.inner.timer
    }

    // ------------------------------------------------------------------------------------------
    // Web server configuration
    // ------------------------------------------------------------------------------------------

    pub fn set_web_server_root_dir(&self, root: Option<PathBuf>) {
        *self.inner.document_root.write().unwrap() = root;
    }

    pub fn enable_webserver(&self, enabled: bool) {
        self.inner.webserver_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_webserver_enabled(&self) -> bool {
        self.inner.webserver_enabled.load(Ordering::SeqCst)
    }

    pub fn set_host_validate_callback(&self, validator: Option<Arc<HostValidator>>) {
        *self.inner.host_validator.write().unwrap() = validator;
    }

    pub fn set_allow_literal_host_redirection(&self, allow: bool) {
        self.inner.allow_literal_host_redirection.store(allow, Ordering::SeqCst);
    }

    pub fn allow_literal_host_redirection(&self) -> bool {
        self.inner.allow_literal_host_redirection.load(Ordering::SeqCst)
    }

    pub fn set_description_alias(&self, path: impl Into<String>, content: Vec<u8>, content_type: impl Into<String>) {
        self.inner.alias.set(path, content, content_type);
    }

    pub fn add_virtual_dir(&self, prefix: impl Into<String>, callbacks: DirCallbacks) {
        self.inner.virtual_dirs.write().unwrap().add(prefix, callbacks);
    }

    pub fn remove_virtual_dir(&self, prefix: &str) -> bool {
        self.inner.virtual_dirs.write().unwrap().remove(prefix)
    }

    pub fn remove_all_virtual_dirs(&self) {
        *self.inner.virtual_dirs.write().unwrap() = VirtualDirTable::new();
    }

    pub fn set_max_subscriptions(&self, n: usize) {
        self.inner.max_subscriptions.store(n, Ordering::SeqCst);
    }

    pub fn set_max_subscription_timeout(&self, secs: u32) {
        self.inner.max_subscription_timeout_secs.store(secs, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------------------------------
    // Device registration
    // ------------------------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn register_root_device(
        &self,
        description_url: impl Into<String>,
        device_type: impl Into<String>,
        udn: impl Into<String>,
        services: Vec<crate::registry::ServiceRegistration>,
        advertisement_max_age: u32,
        search_port: Option<u16>,
        cookie: u64,
        callback: Callback,
        action_handler: ActionHandler,
        subscription_handler: SubscriptionHandler,
    ) -> Result<Handle, Error> {
        self.require_inited()?;
        let record = DeviceRecord {
            root_description_url: description_url.into(),
            device_type: device_type.into(),
            udn: udn.into(),
            cookie,
            advertisement_max_age,
            address_family: self.inner.server_addr.ip(),
            active: true,
            service_types: services.clone(),
            subscriptions: HashMap::new(),
            search_port,
            boot_id: self.inner.boot_id.load(Ordering::SeqCst),
            config_id: self.inner.config_id.load(Ordering::SeqCst),
            callback,
            action_handler,
            subscription_handler,
        };
        let handle = self.inner.registry.register_device(record)?;

        {
            let mut endpoints = self.inner.endpoints.write().unwrap();
            for service in &services {
                endpoints.push(ServiceEndpoint {
                    handle,
                    service_type: service.service_type.clone(),
                    control_path: service.control_path.clone(),
                    event_path: service.event_path.clone(),
                });
            }
        }

        info!(handle, "root device registered");
        self.send_advertisement(handle, advertisement_max_age)?;
        self.schedule_readvertisement(handle, advertisement_max_age);
        Ok(handle)
    }

    pub fn unregister_root_device(&self, handle: Handle) -> Result<(), Error> {
        self.send_byebye(handle)?;
        if let Some(advertising) = self.inner.device_advertising.write().unwrap().remove(&handle) {
            if let Some(timer) = advertising.timer {
                self.inner.timer.remove(timer);
            }
        }
        let sids: Vec<(String, Option<TimerHandle>)> = self
            .inner
            .registry
            .with_device(handle, |d| {
                d.subscriptions
                    .iter()
                    .map(|(sid, sub)| (sid.clone(), sub.renew_timer))
                    .collect()
            })
            .unwrap_or_default();
        for (sid, timer) in sids {
            if let Some(timer) = timer {
                self.inner.timer.remove(timer);
            }
            self.inner.registry.remove_sid(&sid);
        }
        self.inner.endpoints.write().unwrap().retain(|e| e.handle != handle);
        self.inner.registry.unregister(handle)?;
        info!(handle, "root device unregistered");
        Ok(())
    }

    /// `SendAdvertisement(handle, expires)`: one `ssdp:alive` burst,
    /// used both for the initial advertisement at registration and any later manual refresh.
    pub fn send_advertisement(&self, handle: Handle, expires: u32) -> Result<(), Error> {
        self.require_inited()?;
        let (udn, device_type, location, service_types, boot_id, config_id, search_port) =
            self.inner.registry.with_device(handle, |d| {
                (
                    d.udn.clone(),
                    d.device_type.clone(),
                    d.root_description_url.clone(),
                    d.service_types.iter().map(|s| s.service_type.clone()).collect::<Vec<_>>(),
                    d.boot_id,
                    d.config_id,
                    d.search_port,
                )
            })?;
        let uuid = udn.strip_prefix("uuid:").unwrap_or(&udn).to_string();
        let replies = crate::ssdp::device_search_replies(&SearchTarget::All, &uuid, &device_type, &location, &service_types);
        self.send_reply_burst(&replies, expires, boot_id, config_id, search_port, NotifyKind::Alive);
        Ok(())
    }

    fn send_byebye(&self, handle: Handle) -> Result<(), Error> {
        let (udn, device_type, service_types, boot_id, config_id) = self.inner.registry.with_device(handle, |d| {
            (
                d.udn.clone(),
                d.device_type.clone(),
                d.service_types.iter().map(|s| s.service_type.clone()).collect::<Vec<_>>(),
                d.boot_id,
                d.config_id,
            )
        })?;
        let uuid = udn.strip_prefix("uuid:").unwrap_or(&udn).to_string();
        let replies =
            crate::ssdp::device_search_replies(&SearchTarget::All, &uuid, &device_type, "", &service_types);
        self.send_reply_burst(&replies, 0, boot_id, config_id, None, NotifyKind::ByeBye);
        Ok(())
    }

    fn send_reply_burst(
        &self,
        replies: &[SearchReply],
        max_age: u32,
        boot_id: u64,
        config_id: u64,
        search_port: Option<u16>,
        kind: NotifyKind,
    ) {
        let socket = match self.inner.ssdp_sockets.lock().unwrap().clone() {
            Some(s) => s.v4,
            None => return,
        };
        let server_string = server_product_string();
        let target: SocketAddr = format!("{}:{}", MULTICAST_ADDR_V4, SSDP_PORT).parse().unwrap();
        for (i, reply) in replies.iter().enumerate() {
            let message = match kind {
                NotifyKind::Alive => crate::ssdp::alive_message(
                    &reply.st,
                    &reply.usn,
                    &reply.location,
                    &server_string,
                    max_age,
                    boot_id,
                    config_id,
                    search_port,
                ),
                NotifyKind::ByeBye => crate::ssdp::byebye_message(&reply.st, &reply.usn, boot_id, config_id),
            };
            let bytes = crate::http::render(&message);
            let _ = socket.send_to(&bytes, target);
            if i + 1 < replies.len() {
                std::thread::sleep(SSDP_PAUSE);
            }
        }
    }

    fn schedule_readvertisement(&self, handle: Handle, max_age: u32) {
        if max_age == 0 {
            return;
        }
        let period = Duration::from_secs((max_age / 2).max(1) as u64);
        let context = self.clone();
        let timer = self.inner.timer.schedule(period, crate::concurrency::TimerKind::Relative, JobPriority::Low, move || {
            context.reschedule_readvertisement(handle, max_age);
        });
        self.inner
            .device_advertising
            .write()
            .unwrap()
            .insert(handle, DeviceAdvertising { max_age, timer: Some(timer) });
    }

    fn reschedule_readvertisement(&self, handle: Handle, max_age: u32) {
        if self.inner.registry.with_device(handle, |_| ()).is_err() {
            return;
        }
        let _ = self.send_advertisement(handle, max_age);
        self.schedule_readvertisement(handle, max_age);
    }

    // ------------------------------------------------------------------------------------------
    // Control point registration and search
    // ------------------------------------------------------------------------------------------

    pub fn register_client(&self, cookie: u64, callback: Callback) -> Result<Handle, Error> {
        self.require_inited()?;
        let handle = self.inner.registry.register_control_point(ControlPointRecord {
            cookie,
            callback,
            ..Default::default()
        })?;
        info!(handle, "control point registered");
        Ok(handle)
    }

    pub fn unregister_client(&self, handle: Handle) -> Result<(), Error> {
        let (search_ids, client_subs) = self.inner.registry.with_control_point(handle, |cp| {
            (cp.active_searches.clone(), cp.client_subscriptions.clone())
        })?;
        for id in search_ids {
            if let Some(search) = self.inner.active_searches.write().unwrap().remove(&id) {
                self.inner.timer.remove(search.timer);
            }
        }
        for sub in client_subs {
            if let Some(timer) = sub.renewal_timer {
                self.inner.timer.remove(timer);
            }
            self.inner.event_subscriptions.write().unwrap().retain(|_, h| *h != handle);
        }
        self.inner.registry.unregister(handle)?;
        info!(handle, "control point unregistered");
        Ok(())
    }

    /// `SearchAsync(handle, mx, target, cookie)`. `mx` is clamped into `1..=5`.
    pub fn search_async(&self, handle: Handle, mx: u8, target: SearchTarget, cookie: u64) -> Result<(), Error> {
        self.require_inited()?;
        self.inner.registry.with_control_point(handle, |_| ())?;
        let mx = mx.clamp(1, 5);

        let socket = self.inner.ssdp_sockets.lock().unwrap().clone().ok_or(Error::SocketError)?.v4;
        let message = crate::ssdp::search_request(&target, mx);
        let bytes = crate::http::render(&message);
        let dest: SocketAddr = format!("{}:{}", MULTICAST_ADDR_V4, SSDP_PORT).parse().unwrap();
        socket.send_to(&bytes, dest).map_err(|_| Error::SocketWrite)?;

        let id = self.inner.next_search_id.fetch_add(1, Ordering::SeqCst);
        let registry = Arc::clone(&self.inner.registry);
        let pool = Arc::clone(&self.inner.pool);
        let context = self.clone();
        let timer = self.inner.timer.schedule(
            Duration::from_secs(mx as u64),
            crate::concurrency::TimerKind::Relative,
            JobPriority::Low,
            move || {
                context.inner.active_searches.write().unwrap().remove(&id);
                if let Ok(callback) = registry.with_control_point(handle, |cp| cp.callback.clone()) {
                    let _ = pool.add_job(JobPriority::Medium, move || {
                        callback.call(Event::DiscoverySearchTimeout { cookie });
                    });
                }
            },
        );

        self.inner
            .active_searches
            .write()
            .unwrap()
            .insert(id, ActiveSearch { handle, cookie, target, timer });
        self.inner.registry.with_control_point_mut(handle, |cp| cp.active_searches.push(id))?;
        Ok(())
    }

    // ------------------------------------------------------------------------------------------
    // SOAP
    // ------------------------------------------------------------------------------------------

    pub fn send_action(
        &self,
        handle: Handle,
        control_url: &str,
        action: &crate::soap::Action,
        arguments: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<crate::soap::ActionResult, Error> {
        self.require_inited()?;
        self.inner.registry.with_control_point(handle, |_| ())?;
        let (addr, path) = parse_http_url(control_url)?;
        crate::soap::send_action(addr, &path, action, arguments, timeout)
    }

    pub fn send_action_async(
        &self,
        handle: Handle,
        control_url: String,
        action: crate::soap::Action,
        arguments: Vec<(String, String)>,
        cookie: u64,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.require_inited()?;
        let callback = self.inner.registry.with_control_point(handle, |cp| cp.callback.clone())?;
        let context = self.clone();
        self.inner.pool.add_job(JobPriority::Medium, move || {
            let pairs: Vec<(&str, &str)> = arguments.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let result = context.send_action(handle, &control_url, &action, &pairs, timeout);
            let event = match result {
                Ok(crate::soap::ActionResult::Response(values)) => {
                    Event::ControlActionComplete { cookie, result: Ok(values) }
                }
                Ok(crate::soap::ActionResult::Fault { upnp_error_code, upnp_error_description }) => {
                    Event::ControlActionComplete { cookie, result: Err((upnp_error_code, upnp_error_description)) }
                }
                Err(e) => Event::ControlActionComplete { cookie, result: Err((0, e.to_string())) },
            };
            callback.call(event);
        })
    }

    pub fn get_service_var_status(
        &self,
        handle: Handle,
        control_url: &str,
        var_name: &str,
        timeout: Duration,
    ) -> Result<String, Error> {
        self.require_inited()?;
        self.inner.registry.with_control_point(handle, |_| ())?;
        let (addr, path) = parse_http_url(control_url)?;
        crate::soap::query_state_variable(addr, &path, var_name, timeout)
    }

    pub fn get_service_var_status_async(
        &self,
        handle: Handle,
        control_url: String,
        var_name: String,
        cookie: u64,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.require_inited()?;
        let callback = self.inner.registry.with_control_point(handle, |cp| cp.callback.clone())?;
        let context = self.clone();
        self.inner.pool.add_job(JobPriority::Medium, move || {
            let result = context
                .get_service_var_status(handle, &control_url, &var_name, timeout)
                .map_err(|e| (0u32, e.to_string()));
            callback.call(Event::ControlGetVarComplete { cookie, result });
        })
    }

    // ------------------------------------------------------------------------------------------
    // GENA
    // ------------------------------------------------------------------------------------------

    pub fn subscribe(
        &self,
        handle: Handle,
        event_url: &str,
        timeout_secs: u32,
        cookie: u64,
        timeout: Duration,
    ) -> Result<(String, u32), Error> {
        self.require_inited()?;
        self.inner.registry.with_control_point(handle, |_| ())?;
        let (addr, path) = parse_http_url(event_url)?;

        let local_sid = Uuid::new_v4();
        let event_path = format!("/event/{}", local_sid);
        let callback_url = self.event_callback_url(addr.ip(), &event_path);

        let (remote_sid, granted) = crate::gena::subscribe(addr, &path, &callback_url, timeout_secs, timeout)?;

        let mut sub = ClientSubscription::new(remote_sid.clone(), event_url.to_string(), Duration::from_secs(granted as u64));
        sub.local_sid = local_sid;
        let renew_delay = sub.renew_delay(Duration::from_secs(crate::AUTO_RENEW_TIME));
        if let Some(delay) = renew_delay {
            let context = self.clone();
            let event_url = event_url.to_string();
            let sid_for_timer = remote_sid.clone();
            let timer = self.inner.timer.schedule(delay, crate::concurrency::TimerKind::Relative, JobPriority::Low, move || {
                context.auto_renew(handle, event_url, sid_for_timer, cookie, timeout);
            });
            sub.renewal_timer = Some(timer);
        }

        self.inner.event_subscriptions.write().unwrap().insert(event_path, handle);
        self.inner
            .registry
            .with_control_point_mut(handle, |cp| cp.client_subscriptions.push(sub))?;
        Ok((remote_sid, granted))
    }

    pub fn subscribe_async(
        &self,
        handle: Handle,
        event_url: String,
        timeout_secs: u32,
        cookie: u64,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.require_inited()?;
        let callback = self.inner.registry.with_control_point(handle, |cp| cp.callback.clone())?;
        let context = self.clone();
        self.inner.pool.add_job(JobPriority::Medium, move || {
            let result = context
                .subscribe(handle, &event_url, timeout_secs, cookie, timeout)
                .map_err(|e| e.to_string());
            callback.call(Event::EventSubscribeComplete { cookie, result });
        })
    }

    /// Pick the address embedded in a GENA `CALLBACK` header per spec §4.8: the ULA/GUA address
    /// when `publisher` is non-link-local IPv6, else the link-local address, else plain IPv4.
    fn event_callback_url(&self, publisher: IpAddr, path: &str) -> String {
        let prefer_v6_ula_gua = matches!(publisher, IpAddr::V6(v6) if !is_ipv6_link_local(&v6));
        if prefer_v6_ula_gua {
            if let (Some(ip), Some(port)) = (self.inner.ipv6_ula_gua, self.server_port6()) {
                return format!("http://[{}]:{}{}", ip, port, path);
            }
        }
        if matches!(publisher, IpAddr::V6(_)) {
            if let (Some(ip), Some(port)) = (self.inner.ipv6_link_local, self.server_port6()) {
                return format!("http://[{}]:{}{}", ip, port, path);
            }
        }
        format!("http://{}{}", self.inner.server_addr, path)
    }

    fn auto_renew(&self, handle: Handle, event_url: String, remote_sid: String, cookie: u64, timeout: Duration) {
        let callback = match self.inner.registry.with_control_point(handle, |cp| cp.callback.clone()) {
            Ok(c) => c,
            Err(_) => return,
        };
        let (addr, path) = match parse_http_url(&event_url) {
            Ok(v) => v,
            Err(_) => return,
        };
        let current_timeout = self
            .inner
            .registry
            .with_control_point(handle, |cp| {
                cp.client_subscriptions
                    .iter()
                    .find(|s| s.remote_sid == remote_sid)
                    .map(|s| s.timeout)
            })
            .ok()
            .flatten()
            .unwrap_or(Duration::ZERO);

        if current_timeout.is_zero() {
            callback.call(Event::EventSubscriptionExpired { cookie, sid: remote_sid });
            let _ = self.inner.registry.with_control_point_mut(handle, |cp| {
                cp.client_subscriptions.retain(|s| s.remote_sid != remote_sid);
            });
            return;
        }

        let timeout_secs = current_timeout.as_secs() as u32;
        match crate::gena::renew(addr, &path, &remote_sid, timeout_secs, timeout) {
            Ok(granted) => {
                let renew_delay = Duration::from_secs(granted as u64).saturating_sub(Duration::from_secs(crate::AUTO_RENEW_TIME));
                let context = self.clone();
                let sid_for_timer = remote_sid.clone();
                let new_timer = self.inner.timer.schedule(
                    renew_delay,
                    crate::concurrency::TimerKind::Relative,
                    JobPriority::Low,
                    move || context.auto_renew(handle, event_url, sid_for_timer, cookie, timeout),
                );
                let _ = self.inner.registry.with_control_point_mut(handle, |cp| {
                    if let Some(sub) = cp.client_subscriptions.iter_mut().find(|s| s.remote_sid == remote_sid) {
                        sub.timeout = Duration::from_secs(granted as u64);
                        sub.renewal_timer = Some(new_timer);
                    }
                });
            }
            Err(_) => {
                warn!(handle, sid = %remote_sid, "GENA auto-renewal failed");
                callback.call(Event::EventAutorenewalFailed { cookie, sid: remote_sid });
            }
        }
    }

    pub fn renew_subscription(&self, handle: Handle, remote_sid: &str, timeout_secs: u32, timeout: Duration) -> Result<u32, Error> {
        self.require_inited()?;
        let event_url = self
            .inner
            .registry
            .with_control_point(handle, |cp| {
                cp.client_subscriptions
                    .iter()
                    .find(|s| s.remote_sid == remote_sid)
                    .map(|s| s.publisher_url.clone())
            })?
            .ok_or_else(|| Error::InvalidParam("no such subscription".to_string()))?;
        let (addr, path) = parse_http_url(&event_url)?;
        let granted = crate::gena::renew(addr, &path, remote_sid, timeout_secs, timeout)?;
        self.inner.registry.with_control_point_mut(handle, |cp| {
            if let Some(sub) = cp.client_subscriptions.iter_mut().find(|s| s.remote_sid == remote_sid) {
                sub.timeout = Duration::from_secs(granted as u64);
            }
        })?;
        Ok(granted)
    }

    pub fn renew_subscription_async(
        &self,
        handle: Handle,
        remote_sid: String,
        timeout_secs: u32,
        cookie: u64,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.require_inited()?;
        let callback = self.inner.registry.with_control_point(handle, |cp| cp.callback.clone())?;
        let context = self.clone();
        self.inner.pool.add_job(JobPriority::Medium, move || {
            let result = context
                .renew_subscription(handle, &remote_sid, timeout_secs, timeout)
                .map_err(|e| e.to_string());
            callback.call(Event::EventRenewalComplete { cookie, result });
        })
    }

    pub fn unsubscribe(&self, handle: Handle, remote_sid: &str, timeout: Duration) -> Result<(), Error> {
        self.require_inited()?;
        let (event_url, renewal_timer) = self
            .inner
            .registry
            .with_control_point(handle, |cp| {
                cp.client_subscriptions
                    .iter()
                    .find(|s| s.remote_sid == remote_sid)
                    .map(|s| (s.publisher_url.clone(), s.renewal_timer))
            })?
            .ok_or_else(|| Error::InvalidParam("no such subscription".to_string()))?;
        if let Some(timer) = renewal_timer {
            self.inner.timer.remove(timer);
        }
        let (addr, path) = parse_http_url(&event_url)?;
        let result = crate::gena::unsubscribe(addr, &path, remote_sid, timeout);
        self.inner.registry.with_control_point_mut(handle, |cp| {
            cp.client_subscriptions.retain(|s| s.remote_sid != remote_sid);
        })?;
        self.inner.event_subscriptions.write().unwrap().retain(|_, h| *h != handle);
        result
    }

    pub fn unsubscribe_async(&self, handle: Handle, remote_sid: String, cookie: u64, timeout: Duration) -> Result<(), Error> {
        self.require_inited()?;
        let callback = self.inner.registry.with_control_point(handle, |cp| cp.callback.clone())?;
        let context = self.clone();
        self.inner.pool.add_job(JobPriority::Medium, move || {
            let result = context.unsubscribe(handle, &remote_sid, timeout).map_err(|e| e.to_string());
            callback.call(Event::EventUnsubscribeComplete { cookie, result });
        })
    }

    /// `Notify(handle, serviceType, varNames, varValues)`: push one NOTIFY, at the next event
    /// key, to every subscriber of `service_type` on `handle`.
    pub fn notify(&self, handle: Handle, service_type: &str, properties: &[(&str, &str)]) -> Result<(), Error> {
        self.require_inited()?;
        let subscriptions: Vec<(String, Vec<String>, u32)> = self.inner.registry.with_device_mut(handle, |device| {
            let matches_service = device.service_types.iter().any(|s| s.service_type == service_type);
            if !matches_service {
                return Vec::new();
            }
            device
                .subscriptions
                .iter_mut()
                .map(|(sid, sub)| (sid.clone(), sub.event_urls.clone(), sub.next_event_key()))
                .collect()
        })?;

        let body = crate::gena::build_notify_body(properties);
        let retry = crate::gena::RetryPolicy::default();
        for (sid, event_urls, event_key) in subscriptions {
            for event_url in event_urls {
                if let Ok((addr, path)) = parse_http_url(&event_url) {
                    if crate::gena::deliver_notify(addr, &path, &sid, event_key, &body, &retry, Duration::from_secs(5)).is_err() {
                        warn!(handle, sid = %sid, "NOTIFY delivery exhausted retries, dropping subscription");
                        let _ = self.inner.registry.with_device_mut(handle, |d| d.subscriptions.remove(&sid));
                        self.inner.registry.remove_sid(&sid);
                        if let Ok(callback) = self.inner.registry.with_device(handle, |d| d.callback.clone()) {
                            let sid = sid.clone();
                            let _ = self.inner.pool.add_job(JobPriority::Medium, move || {
                                callback.call(Event::EventNotifyDeliveryFailed { handle, sid });
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum NotifyKind {
    Alive,
    ByeBye,
}

// ------------------------------------------------------------------------------------------------
// Private Functions
// ------------------------------------------------------------------------------------------------

fn resolve_bind_address(selector: &str) -> Result<IpAddr, Error> {
    let mut adapter = NetAdapter::default();
    adapter.get_first()?;
    let selector = Selector::parse(selector);
    if adapter.find_first(&selector) {
        return Ok(adapter.current().expect("matched entry exists").sockaddr());
    }
    if matches!(selector, Selector::Any) {
        // No non-loopback interface at all (e.g. a sandboxed CI host) — fall back to loopback
        // rather than fail `Init` outright.
        if adapter.find_first(&Selector::Loopback) {
            return Ok(adapter.current().expect("matched entry exists").sockaddr());
        }
    }
    Err(Error::InvalidInterface(format!("{:?}", selector)))
}

/// Builds the `SERVER`/`USER-AGENT` identity string SSDP and the web server advertise, in the
/// `OS/version UPnP/1.1 product/version` form the spec requires. `os_version::detect()` can fail
/// on an unrecognized platform, in which case this falls back to the bare `std::env::consts::OS`
/// name rather than failing `Init` over a cosmetic header value.
fn server_product_string() -> String {
    let os = os_version::detect()
        .map(|v| v.to_string())
        .unwrap_or_else(|_| std::env::consts::OS.to_string());
    format!(
        "{} {}/{} {}/1.0",
        os,
        crate::UPNP_STRING,
        crate::UPNP_VERSION,
        env!("CARGO_PKG_NAME")
    )
}

/// Split an `http://host[:port]/path` URL into its socket address and path; this crate has no
/// `url`-crate dependency, so it reuses [`crate::net::SocketAddress`]'s `host[:port]` grammar for
/// the authority part.
pub(crate) fn parse_http_url(url: &str) -> Result<(SocketAddr, String), Error> {
    let rest = url.strip_prefix("http://").unwrap_or(url);
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let socket_address = crate::net::SocketAddress::parse(authority, false)
        .map_err(|_| Error::InvalidParam(format!("malformed URL `{}`", url)))?;
    let port = socket_address.port().unwrap_or(80);
    Ok((SocketAddr::new(socket_address.ip(), port), path.to_string()))
}

/// Build the single [`RequestHandler`] every SOAP/GENA control- and event-URL is dispatched
/// through, consulting the registry for the owning device's action/subscription handlers and
/// managing the device-side subscription table itself.
fn build_request_handler(dispatch: Arc<Dispatch>) -> Arc<RequestHandler> {
    Arc::new(move |handle: Handle, request: crate::webserver::ControlRequest| {
        use crate::webserver::{ControlRequest, ControlResponse};
        match request {
            ControlRequest::Action { action_name, service_type, arguments } => {
                match dispatch.registry.with_device(handle, |d| d.action_handler.clone()) {
                    Ok(action_handler) => action_handler.call(
                        handle,
                        ControlRequest::Action { action_name, service_type, arguments },
                    ),
                    Err(_) => ControlResponse::Action(Err((401, "Invalid Action".to_string()))),
                }
            }
            ControlRequest::GetVar { var_name } => {
                match dispatch.registry.with_device(handle, |d| d.action_handler.clone()) {
                    Ok(action_handler) => action_handler.call(handle, ControlRequest::GetVar { var_name }),
                    Err(_) => ControlResponse::GetVar(Err((404, "Invalid Var".to_string()))),
                }
            }
            ControlRequest::Subscribe { event_urls, timeout_secs } => {
                dispatch_subscribe(&dispatch, handle, event_urls, timeout_secs)
            }
            ControlRequest::Renew { sid, timeout_secs } => dispatch_renew(&dispatch, handle, sid, timeout_secs),
            ControlRequest::Unsubscribe { sid } => dispatch_unsubscribe(&dispatch, handle, sid),
        }
    })
}

fn dispatch_subscribe(
    dispatch: &Arc<Dispatch>,
    handle: Handle,
    event_urls: Vec<String>,
    timeout_secs: Option<u32>,
) -> crate::webserver::ControlResponse {
    use crate::gena::ServiceSubscription;
    use crate::webserver::ControlResponse;

    let ceiling = dispatch.max_subscription_timeout_secs.load(Ordering::SeqCst);
    let requested = timeout_secs.unwrap_or(1800);
    let granted = if ceiling == 0 { requested } else { requested.min(ceiling) };

    let current_count = dispatch.registry.with_device(handle, |d| d.subscriptions.len()).unwrap_or(usize::MAX);
    if current_count >= dispatch.max_subscriptions.load(Ordering::SeqCst) {
        return ControlResponse::Subscribe(Err(()));
    }

    let sub = ServiceSubscription::new(event_urls, Duration::from_secs(granted as u64));
    let sid = format!("uuid:{}", sub.sid);

    let initial_properties = match dispatch.registry.with_device(handle, |d| d.subscription_handler.clone()) {
        Ok(handler) => handler.call(handle),
        Err(_) => return ControlResponse::Subscribe(Err(())),
    };

    let insert_result = dispatch.registry.with_device_mut(handle, |d| {
        d.subscriptions.insert(sid.clone(), sub);
    });
    if insert_result.is_err() {
        return ControlResponse::Subscribe(Err(()));
    }
    dispatch.registry.index_sid(sid.clone(), handle);

    let body = crate::gena::build_notify_body(
        &initial_properties.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect::<Vec<_>>(),
    );
    let registry = Arc::clone(&dispatch.registry);
    let retry = dispatch.notify_retry.clone();
    let sid_for_job = sid.clone();
    let _ = dispatch.pool.add_job(JobPriority::Medium, move || {
        let (event_urls, event_key) = match registry.with_device_mut(handle, |d| {
            d.subscriptions.get_mut(&sid_for_job).map(|s| (s.event_urls.clone(), s.next_event_key()))
        }) {
            Ok(Some(v)) => v,
            _ => return,
        };
        for url in event_urls {
            if let Ok((addr, path)) = parse_http_url(&url) {
                let _ = crate::gena::deliver_notify(addr, &path, &sid_for_job, event_key, &body, &retry, Duration::from_secs(5));
            }
        }
    });

    ControlResponse::Subscribe(Ok((sid, granted)))
}

fn dispatch_renew(dispatch: &Arc<Dispatch>, handle: Handle, sid: String, timeout_secs: Option<u32>) -> crate::webserver::ControlResponse {
    use crate::webserver::ControlResponse;
    let ceiling = dispatch.max_subscription_timeout_secs.load(Ordering::SeqCst);
    let requested = timeout_secs.unwrap_or(1800);
    let granted = if ceiling == 0 { requested } else { requested.min(ceiling) };
    let result = dispatch.registry.with_device_mut(handle, |d| {
        d.subscriptions
            .get_mut(&sid)
            .map(|s| s.renew(Duration::from_secs(granted as u64)))
    });
    match result {
        Ok(Some(())) => ControlResponse::Renew(Ok(granted)),
        _ => ControlResponse::Renew(Err(())),
    }
}

fn dispatch_unsubscribe(dispatch: &Arc<Dispatch>, handle: Handle, sid: String) -> crate::webserver::ControlResponse {
    use crate::webserver::ControlResponse;
    let removed = dispatch.registry.with_device_mut(handle, |d| d.subscriptions.remove(&sid));
    match removed {
        Ok(Some(_)) => {
            dispatch.registry.remove_sid(&sid);
            ControlResponse::Unsubscribe(Ok(()))
        }
        _ => ControlResponse::Unsubscribe(Err(())),
    }
}

/// Build the [`NotifyHandler`] delivered NOTIFYs from a remote publisher are routed through,
/// matched by path against whatever [`CoreContext::subscribe`] registered.
fn build_notify_handler(registry: Arc<Registry>, pool: Arc<ThreadPool>) -> Arc<NotifyHandler> {
    Arc::new(move |handle: Handle, message: &crate::http::HttpMessage| {
        use crate::http::KnownHeader;
        let sid = message.header(KnownHeader::Sid).unwrap_or("").to_string();
        let event_key: u32 = message.header(KnownHeader::Seq).and_then(|v| v.parse().ok()).unwrap_or(0);
        let properties = match crate::xml::extract_propertyset(&message.entity) {
            Ok(p) => p,
            Err(_) => return,
        };

        let accept = registry
            .with_control_point_mut(handle, |cp| {
                cp.client_subscriptions
                    .iter_mut()
                    .find(|s| s.remote_sid == sid)
                    .map(|s| {
                        let in_order = event_key >= s.next_event_key_expected;
                        if in_order {
                            s.next_event_key_expected = event_key.wrapping_add(1);
                        }
                        in_order
                    })
            })
            .unwrap_or(None);

        if accept != Some(true) {
            return;
        }

        if let Ok(callback) = registry.with_control_point(handle, |cp| cp.callback.clone()) {
            let _ = pool.add_job(JobPriority::Medium, move || {
                callback.call(Event::EventReceived { cookie: 0, sid, event_key, properties });
            });
        }
    })
}

/// Build the [`crate::ssdp::MessageHandler`] registered with the [`SsdpEngine`]: answers
/// M-SEARCH on behalf of every registered device and delivers advertisement/search-result/
/// byebye events to every registered control point.
fn build_ssdp_handler(
    registry: Arc<Registry>,
    pool: Arc<ThreadPool>,
    timer: Arc<TimerWheel>,
    socket_cell: Arc<Mutex<Option<SsdpSockets>>>,
    active_searches: Arc<RwLock<HashMap<u64, ActiveSearch>>>,
) -> Arc<crate::ssdp::MessageHandler> {
    Arc::new(move |message: crate::http::HttpMessage, from: SocketAddr| {
        use crate::http::Method;
        if message.is_request && message.method == Some(Method::MSearch) {
            handle_incoming_search(&registry, &timer, &socket_cell, &message, from);
        } else if !message.is_request && message.status_code == Some(200) {
            handle_search_reply(&registry, &pool, &active_searches, &message);
        } else if message.is_request && message.method == Some(Method::Notify) {
            handle_incoming_notify_advertisement(&registry, &pool, &message);
        }
    })
}

fn handle_incoming_search(
    registry: &Arc<Registry>,
    timer: &Arc<TimerWheel>,
    socket_cell: &Arc<Mutex<Option<SsdpSockets>>>,
    message: &crate::http::HttpMessage,
    from: SocketAddr,
) {
    let man = message.header_by_name("MAN").unwrap_or("").trim_matches('"').to_string();
    if !man.eq_ignore_ascii_case("ssdp:discover") {
        return;
    }
    let mx: u8 = message.header_by_name("MX").and_then(|v| v.parse().ok()).unwrap_or(1).clamp(1, 5);
    let target = SearchTarget::parse(message.header_by_name("ST").unwrap_or("ssdp:all"));
    let delay = jittered_delay(mx);

    for handle in registry.device_handles() {
        let device = match registry.with_device(handle, |d| {
            (
                d.udn.clone(),
                d.device_type.clone(),
                d.root_description_url.clone(),
                d.service_types.iter().map(|s| s.service_type.clone()).collect::<Vec<_>>(),
                d.advertisement_max_age,
                d.boot_id,
                d.config_id,
                d.search_port,
            )
        }) {
            Ok(d) => d,
            Err(_) => continue,
        };
        let (udn, device_type, location, service_types, max_age, boot_id, config_id, search_port) = device;
        let uuid = udn.strip_prefix("uuid:").unwrap_or(&udn).to_string();
        if !matches_search_target(&target, &uuid, Some(device_type.as_str()), &service_types) {
            continue;
        }
        let replies = crate::ssdp::device_search_replies(&target, &uuid, &device_type, &location, &service_types);
        let server_string = server_product_string();
        let socket_cell = Arc::clone(socket_cell);
        timer.schedule(delay, crate::concurrency::TimerKind::Relative, JobPriority::Medium, move || {
            if let Some(sockets) = socket_cell.lock().unwrap().clone() {
                let socket = sockets.for_target(from);
                for reply in &replies {
                    let response = search_response(reply, &server_string, max_age, boot_id, config_id);
                    let _ = search_port; // SEARCHPORT.UPNP.ORG is advertised, not separately bound.
                    let bytes = crate::http::render(&response);
                    let _ = socket.send_to(&bytes, from);
                }
            }
        });
    }
}

/// §4.7: "An incoming reply matches an active search when (search.requestType, search.target)
/// agrees with the reply's ST; matches dispatch a `DISCOVERY_SEARCH_RESULT` callback". Unlike
/// alive/byebye (delivered to every control point unconditionally), a search reply is only ever
/// delivered to the control point(s) whose still-outstanding [`ActiveSearch`] it answers.
fn handle_search_reply(
    registry: &Arc<Registry>,
    pool: &Arc<ThreadPool>,
    active_searches: &Arc<RwLock<HashMap<u64, ActiveSearch>>>,
    message: &crate::http::HttpMessage,
) {
    let st = match message.header_by_name("ST") {
        Some(s) => SearchTarget::parse(s),
        None => return,
    };
    let usn = message.header_by_name("USN").unwrap_or("").to_string();
    let location = message.header_by_name("LOCATION").unwrap_or("").to_string();
    let expires = message
        .header_by_name("CACHE-CONTROL")
        .and_then(parse_max_age)
        .unwrap_or(0u32);
    if expires == 0 {
        return;
    }
    let device_id = usn.split("::").next().unwrap_or(&usn).to_string();

    let matches: Vec<ActiveSearch> = active_searches
        .read()
        .unwrap()
        .values()
        .filter(|search| search_matches_reply(&search.target, &st))
        .cloned()
        .collect();

    for search in matches {
        let callback = match registry.with_control_point(search.handle, |cp| cp.callback.clone()) {
            Ok(c) => c,
            Err(_) => continue,
        };
        let device_id = device_id.clone();
        let location = location.clone();
        let cookie = search.cookie;
        let _ = pool.add_job(JobPriority::Medium, move || {
            callback.call(Event::DiscoverySearchResult { cookie, device_id, location, expires });
        });
    }
}

fn handle_incoming_notify_advertisement(registry: &Arc<Registry>, pool: &Arc<ThreadPool>, message: &crate::http::HttpMessage) {
    let nts = message.header_by_name("NTS").unwrap_or("").to_string();
    let usn = message.header_by_name("USN").unwrap_or("").to_string();
    let device_id = usn.split("::").next().unwrap_or(&usn).to_string();
    let device_type = message.header_by_name("NT").unwrap_or("").to_string();
    let location = message.header_by_name("LOCATION").unwrap_or("").to_string();
    let expires = message
        .header_by_name("CACHE-CONTROL")
        .and_then(parse_max_age)
        .unwrap_or(0u32);

    const NTS_ALIVE: &str = "ssdp:alive";
    const NTS_BYEBYE: &str = "ssdp:byebye";

    if nts != NTS_ALIVE && nts != NTS_BYEBYE {
        return;
    }
    if nts == NTS_ALIVE && expires == 0 {
        return;
    }

    for handle in registry.control_point_handles() {
        let cookie = match registry.with_control_point(handle, |cp| cp.cookie) {
            Ok(c) => c,
            Err(_) => continue,
        };
        let callback = match registry.with_control_point(handle, |cp| cp.callback.clone()) {
            Ok(c) => c,
            Err(_) => continue,
        };
        let event = if nts == NTS_ALIVE {
            Event::DiscoveryAdvertisementAlive {
                cookie,
                device_id: device_id.clone(),
                device_type: device_type.clone(),
                location: location.clone(),
                expires,
            }
        } else {
            Event::DiscoveryAdvertisementByeBye { cookie, device_id: device_id.clone() }
        };
        let _ = pool.add_job(JobPriority::Medium, move || callback.call(event));
    }
}

/// A small jitter source for M-SEARCH reply scheduling: a random delay in `[0, MX)` seconds
/// spreads replies out so a busy control point isn't hit with every device's answer at once.
/// This crate has no `rand` dependency, so the jitter is derived from the wall clock rather
/// than a PRNG — adequate for spreading replies, not for anything security-sensitive.
fn jittered_delay(mx: u8) -> Duration {
    let nanos = Instant::now().elapsed().subsec_nanos() as u64 ^ (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0));
    let span_ms = (mx as u64) * 1000;
    Duration::from_millis(if span_ms == 0 { 0 } else { nanos % span_ms })
}
