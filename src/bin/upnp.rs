use human_panic::setup_panic;
use std::str::FromStr;

#[macro_use]
extern crate tracing;
use std::sync::mpsc;
use std::time::Duration;
use structopt::StructOpt;
use tracing_subscriber::filter::LevelFilter;
use upnp_core::ssdp::SearchTarget;
use upnp_core::{init, CoreConfig, Event};

#[derive(Debug, StructOpt)]
#[structopt(name = "upnp")]
struct CommandLine {
    /// The level of logging to perform, from off to trace.
    #[structopt(long, short = "v", parse(from_occurrences))]
    verbose: i8,

    #[structopt(long, short)]
    interface: Option<String>,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Send an M-SEARCH and print every reply received before `max_wait` elapses.
    Search {
        #[structopt(long, short = "t", default_value = "")]
        search_target: CLSearchTarget,

        #[structopt(long, short, default_value = "3")]
        max_wait: u8,
    },
    /// Start the embedded web server and SSDP engine and sit idle, logging every
    /// discovery advertisement seen on the network.
    Listen,
    /// Serve a single root device description from a document root, advertising it over
    /// SSDP, and keep running until interrupted.
    Serve {
        #[structopt(long, short)]
        document_root: std::path::PathBuf,

        #[structopt(long, short)]
        description_path: String,

        #[structopt(long, short)]
        device_type: String,

        #[structopt(long, short)]
        udn: String,
    },
}

#[derive(Debug)]
enum CLSearchTarget {
    All,
    RootDevices,
    Device(String),
    DeviceType(String),
    ServiceType(String),
}

#[derive(Debug)]
struct InvalidSearchTarget(String);

impl std::fmt::Display for InvalidSearchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid search target: {}", self.0)
    }
}

impl std::error::Error for InvalidSearchTarget {}

impl FromStr for CLSearchTarget {
    type Err = InvalidSearchTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == "root" {
            Ok(CLSearchTarget::RootDevices)
        } else if s == "all" {
            Ok(CLSearchTarget::All)
        } else if let Some(rest) = s.strip_prefix("device:") {
            Ok(CLSearchTarget::Device(rest.to_string()))
        } else if let Some(rest) = s.strip_prefix("device-type:") {
            Ok(CLSearchTarget::DeviceType(rest.to_string()))
        } else if let Some(rest) = s.strip_prefix("service-type:") {
            Ok(CLSearchTarget::ServiceType(rest.to_string()))
        } else {
            Err(InvalidSearchTarget(s.to_string()))
        }
    }
}

impl From<CLSearchTarget> for SearchTarget {
    fn from(value: CLSearchTarget) -> Self {
        match value {
            CLSearchTarget::All => SearchTarget::All,
            CLSearchTarget::RootDevices => SearchTarget::RootDevice,
            CLSearchTarget::Device(id) => SearchTarget::Device(id),
            CLSearchTarget::DeviceType(dt) => SearchTarget::DeviceType(dt),
            CLSearchTarget::ServiceType(st) => SearchTarget::ServiceType(st),
        }
    }
}

pub fn main() {
    setup_panic!();

    let args = CommandLine::from_args();
    init_tracing(args.verbose);

    let mut config = CoreConfig::default();
    if let Some(interface) = args.interface {
        config.interface = interface;
    }

    match args.cmd {
        Command::Search { search_target, max_wait } => do_search(config, search_target, max_wait),
        Command::Listen => do_listen(config),
        Command::Serve { document_root, description_path, device_type, udn } => {
            do_serve(config, document_root, description_path, device_type, udn)
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Private Functions
// ------------------------------------------------------------------------------------------------

fn init_tracing(verbosity: i8) {
    let level = match verbosity {
        0 => LevelFilter::OFF,
        1 => LevelFilter::ERROR,
        2 => LevelFilter::WARN,
        3 => LevelFilter::INFO,
        4 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
    info!("max log filter level set to {:?}", level);
}

fn do_search(config: CoreConfig, search_target: CLSearchTarget, max_wait: u8) {
    let core = match init(config) {
        Ok(core) => core,
        Err(error) => {
            eprintln!("failed to start core: {}", error);
            return;
        }
    };

    let (tx, rx) = mpsc::channel();
    let callback = upnp_core::Callback::new(move |event| {
        let _ = tx.send(event);
    });

    let handle = match core.register_client(1, callback) {
        Ok(handle) => handle,
        Err(error) => {
            eprintln!("failed to register control point: {}", error);
            return;
        }
    };

    let target: SearchTarget = search_target.into();
    if let Err(error) = core.search_async(handle, max_wait, target, 1) {
        eprintln!("search failed: {}", error);
        return;
    }

    let deadline = Duration::from_secs(max_wait as u64 + 1);
    let mut found = 0usize;
    loop {
        match rx.recv_timeout(deadline) {
            Ok(Event::DiscoverySearchResult { device_id, location, expires, .. }) => {
                found += 1;
                println!("{}: {} at {} (expires {}s)", found, device_id, location, expires);
            }
            Ok(Event::DiscoverySearchTimeout { .. }) => break,
            Ok(_) => continue,
            Err(_) => break,
        }
    }
    println!("search returned {} result(s).", found);

    let _ = core.unregister_client(handle);
    let _ = core.finish();
}

fn do_listen(config: CoreConfig) {
    let core = match init(config) {
        Ok(core) => core,
        Err(error) => {
            eprintln!("failed to start core: {}", error);
            return;
        }
    };

    let callback = upnp_core::Callback::new(|event| match event {
        Event::DiscoveryAdvertisementAlive { device_id, location, .. } => {
            println!("alive: {} at {}", device_id, location);
        }
        Event::DiscoveryAdvertisementByeBye { device_id, .. } => {
            println!("byebye: {}", device_id);
        }
        _ => {}
    });

    let handle = match core.register_client(1, callback) {
        Ok(handle) => handle,
        Err(error) => {
            eprintln!("failed to register control point: {}", error);
            return;
        }
    };

    println!("listening on {}:{} — press Ctrl-C to stop", core.server_ip_address(), core.server_port());
    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
    #[allow(unreachable_code)]
    {
        let _ = core.unregister_client(handle);
        let _ = core.finish();
    }
}

fn do_serve(
    mut config: CoreConfig,
    document_root: std::path::PathBuf,
    description_path: String,
    device_type: String,
    udn: String,
) {
    config.document_root = Some(document_root);
    let core = match init(config) {
        Ok(core) => core,
        Err(error) => {
            eprintln!("failed to start core: {}", error);
            return;
        }
    };

    let callback = upnp_core::Callback::new(|_event| {});
    let action_handler = upnp_core::registry::ActionHandler::new(|_handle, request| match request {
        upnp_core::webserver::ControlRequest::GetVar { .. } => {
            upnp_core::webserver::ControlResponse::GetVar(Err((404, "Invalid Var".to_string())))
        }
        _ => upnp_core::webserver::ControlResponse::Action(Err((401, "Invalid Action".to_string()))),
    });
    let subscription_handler = upnp_core::registry::SubscriptionHandler::default();

    let description_url = format!(
        "http://{}:{}{}",
        core.server_ip_address(),
        core.server_port(),
        description_path
    );

    match core.register_root_device(
        description_url,
        device_type,
        udn,
        Vec::new(),
        1800,
        None,
        1,
        callback,
        action_handler,
        subscription_handler,
    ) {
        Ok(handle) => {
            println!("serving root device on {}:{}", core.server_ip_address(), core.server_port());
            loop {
                std::thread::sleep(Duration::from_secs(60));
            }
            #[allow(unreachable_code)]
            {
                let _ = core.unregister_root_device(handle);
                let _ = core.finish();
            }
        }
        Err(error) => {
            eprintln!("failed to register root device: {}", error);
        }
    }
}
