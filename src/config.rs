/*!
Configuration bundled once at init time and threaded explicitly through the core rather than
kept as global state.
*/

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

///
/// Tuning knobs for the [`concurrency::ThreadPool`](crate::concurrency::ThreadPool).
///
#[derive(Clone, Debug)]
pub struct ThreadPoolConfig {
    pub min_threads: usize,
    pub max_threads: usize,
    pub max_idle_time_secs: u64,
    pub jobs_per_thread: usize,
    pub max_jobs_total: usize,
    pub stack_size: usize,
}

///
/// Top-level configuration passed to [`crate::init`]. Keeping this as an explicit value rather
/// than process-global state lets multiple independent cores coexist in one process.
///
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Selector passed to [`net::NetAdapter::find_first`](crate::net::NetAdapter::find_first);
    /// empty string means "any usable interface".
    pub interface: String,
    /// Requested HTTP listener port; `0` picks an ephemeral port.
    pub port: u16,
    /// Requested HTTPv6 listener port; `0` picks an ephemeral port.
    pub port6: u16,
    pub thread_pool: ThreadPoolConfig,
    /// IP TTL used on outgoing SSDP multicast packets. Defaults to 4; setting it to 0
    /// additionally disables `IP_MULTICAST_LOOP`.
    pub ssdp_ttl: u32,
    /// Document root for the mini web server; `None` disables static file serving.
    pub document_root: Option<std::path::PathBuf>,
    /// Ceiling on any single HTTP entity body, in bytes.
    pub max_content_length: usize,
    /// Maximum number of active subscriptions a device-side service will accept.
    pub max_subscriptions: usize,
    /// Ceiling on any subscription `TIMEOUT`, in seconds; `0` means unbounded.
    pub max_subscription_timeout_secs: u32,
    /// Whether the embedded web server is enabled at all.
    pub webserver_enabled: bool,
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        ThreadPoolConfig {
            min_threads: 2,
            max_threads: 12,
            max_idle_time_secs: 10,
            jobs_per_thread: 10,
            max_jobs_total: 100,
            stack_size: 256 * 1024,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            interface: String::new(),
            port: 0,
            port6: 0,
            thread_pool: ThreadPoolConfig::default(),
            ssdp_ttl: 4,
            document_root: None,
            max_content_length: 16 * 1024 * 1024,
            max_subscriptions: 100,
            max_subscription_timeout_secs: 0,
            webserver_enabled: true,
        }
    }
}
