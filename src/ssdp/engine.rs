/*!
The SSDP engine: owns the multicast UDP socket(s), sends datagram-framed HTTP requests/responses
(HTTPU/HTTPMU, SSDP's HTTP-over-UDP transport) and dispatches received ones to a caller-supplied
handler, running its receive loop on a dedicated OS thread handed off to the shared thread pool
for per-message processing.
*/

use crate::concurrency::{JobPriority, ThreadPool};
use crate::error::Error;
use crate::http::{HttpMessage, HttpParser, ParseOutcome, Method};
use crate::ssdp::protocol::{MULTICAST_ADDR_V4, MULTICAST_ADDR_V6_LINK_LOCAL, MULTICAST_ADDR_V6_SITE_LOCAL, SSDP_PORT};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

pub type MessageHandler = dyn Fn(HttpMessage, SocketAddr) + Send + Sync;

///
/// Owns the SSDP multicast socket and a background receive thread; incoming datagrams are handed
/// off to the thread pool, at `Medium` priority, for the registered handler to process so that a
/// slow handler never stalls further receives.
///
pub struct SsdpEngine {
    socket: Arc<UdpSocket>,
    /// The IPv6 link-local/site-local multicast receiver, when this host has an IPv6 stack
    /// (spec §4.7 requires both groups be joined; a v4-only host simply has none of this).
    socket6: Option<Arc<UdpSocket>>,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    thread6: Option<thread::JoinHandle<()>>,
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl SsdpEngine {
    /// Bind a multicast-joined IPv4 socket on `bind_addr`'s interface and start the receive loop.
    pub fn start(
        bind_addr: Ipv4Addr,
        ttl: u32,
        pool: Arc<ThreadPool>,
        handler: Arc<MessageHandler>,
    ) -> Result<Self, Error> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SSDP_PORT))
            .map_err(|_| Error::SocketBind)?;
        let group: Ipv4Addr = MULTICAST_ADDR_V4.parse().expect("valid multicast literal");
        socket
            .join_multicast_v4(&group, &bind_addr)
            .map_err(|_| Error::SocketError)?;
        socket.set_multicast_ttl_v4(ttl).map_err(|_| Error::SocketError)?;
        socket
            .set_multicast_loop_v4(ttl != 0)
            .map_err(|_| Error::SocketError)?;

        let socket = Arc::new(socket);
        let shutdown = Arc::new(AtomicBool::new(false));

        let recv_socket = Arc::clone(&socket);
        let recv_shutdown = Arc::clone(&shutdown);
        let recv_pool = Arc::clone(&pool);
        let recv_handler = Arc::clone(&handler);
        let thread = thread::Builder::new()
            .name("upnp-ssdp".to_string())
            .spawn(move || receive_loop(recv_socket, recv_shutdown, recv_pool, recv_handler))
            .map_err(|_| Error::InternalError("failed to spawn SSDP receive thread".to_string()))?;

        // IPv6 is joined on a best-effort basis: a host with no IPv6 stack at all (or one
        // where multicast join fails, e.g. in a container without CAP_NET_ADMIN) still gets a
        // fully working v4 engine rather than failing `Init` outright.
        let socket6 = bind_ipv6_multicast().ok().map(Arc::new);
        let thread6 = socket6.as_ref().and_then(|s6| {
            let recv_socket6 = Arc::clone(s6);
            let recv_shutdown6 = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("upnp-ssdp6".to_string())
                .spawn(move || receive_loop(recv_socket6, recv_shutdown6, pool, handler))
                .ok()
        });

        Ok(SsdpEngine {
            socket,
            socket6,
            shutdown,
            thread: Some(thread),
            thread6,
        })
    }

    /// Send a single HTTPU/HTTPMU-framed message to `target` (unicast reply, or multicast
    /// advertisement/search when `target` is the SSDP group address). An IPv6 target is sent
    /// from the IPv6 receive socket, if one was bound, so the reply's source address matches
    /// what the requester multicast to.
    pub fn send(&self, message: &HttpMessage, target: SocketAddr) -> Result<(), Error> {
        let bytes = crate::http::render(message);
        let socket = match (target, &self.socket6) {
            (SocketAddr::V6(_), Some(socket6)) => socket6.as_ref(),
            _ => self.socket.as_ref(),
        };
        socket.send_to(&bytes, target).map(|_| ()).map_err(|_| Error::SocketWrite)
    }

    /// A clone of the underlying multicast-joined socket handle, so a message handler
    /// registered at construction time (before this `SsdpEngine` value exists) can send replies
    /// without owning the engine itself — see `context::build_ssdp_handler`.
    pub fn socket_handle(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    /// A clone of the IPv6 receive socket, if this host has one — used the same way as
    /// [`SsdpEngine::socket_handle`] to reply to a unicast M-SEARCH that arrived over IPv6.
    pub fn socket_handle_v6(&self) -> Option<Arc<UdpSocket>> {
        self.socket6.as_ref().map(Arc::clone)
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Sending a zero-length datagram to ourselves unblocks a thread parked in `recv_from`.
        if let Ok(local) = self.socket.local_addr() {
            let _ = self.socket.send_to(&[], local);
        }
        if let Some(socket6) = &self.socket6 {
            if let Ok(local) = socket6.local_addr() {
                let _ = socket6.send_to(&[], local);
            }
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        if let Some(thread6) = self.thread6.take() {
            let _ = thread6.join();
        }
    }
}

impl Drop for SsdpEngine {
    fn drop(&mut self) {
        if !self.shutdown.load(Ordering::SeqCst) {
            self.shutdown();
        }
    }
}

/// Bind `[::]:1900` and join both the link-local (`FF02::C`) and site-local (`FF05::C`)
/// multicast groups on the default interface (spec §4.7 requires both).
fn bind_ipv6_multicast() -> Result<UdpSocket, Error> {
    let socket = UdpSocket::bind(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, SSDP_PORT, 0, 0)).map_err(|_| Error::SocketBind)?;
    let link_local: Ipv6Addr = MULTICAST_ADDR_V6_LINK_LOCAL.parse().expect("valid multicast literal");
    let site_local: Ipv6Addr = MULTICAST_ADDR_V6_SITE_LOCAL.parse().expect("valid multicast literal");
    socket.join_multicast_v6(&link_local, 0).map_err(|_| Error::SocketError)?;
    socket.join_multicast_v6(&site_local, 0).map_err(|_| Error::SocketError)?;
    Ok(socket)
}

fn receive_loop(
    socket: Arc<UdpSocket>,
    shutdown: Arc<AtomicBool>,
    pool: Arc<ThreadPool>,
    handler: Arc<MessageHandler>,
) {
    let mut buf = vec![0u8; 4096];
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        match socket.recv_from(&mut buf) {
            Ok((n, from)) if n > 0 => {
                if let Some(message) = parse_datagram(&buf[..n]) {
                    let handler = Arc::clone(&handler);
                    let _ = pool.add_job(JobPriority::Medium, move || handler(message, from));
                }
            }
            Ok(_) => {}
            Err(_) => {
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
            }
        }
    }
}

/// Each SSDP datagram is exactly one HTTP-over-UDP request or response with no framing header
/// at all; feed it whole to the parser and accept the no-Content-Length completion it allows.
fn parse_datagram(data: &[u8]) -> Option<HttpMessage> {
    let looks_like_response = data.starts_with(b"HTTP/");
    let mut parser = if looks_like_response {
        HttpParser::new_response(Method::MSearch)
    } else {
        HttpParser::new_request()
    };
    match parser.append(data) {
        ParseOutcome::Success { message, .. } => Some(message.clone()),
        ParseOutcome::IncompleteEntity => {
            parser.finish_until_close();
            match parser.append(&[]) {
                ParseOutcome::Success { message, .. } => Some(message.clone()),
                _ => None,
            }
        }
        _ => None,
    }
}
