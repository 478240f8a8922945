/*!
The inbound HTTP/1.1 accept loop: one thread per accepted connection parses a single request
and dispatches it. Plain GET/HEAD/POST falls through to [`crate::webserver::router`]; a POST
carrying a `SOAPACTION` header, or a SUBSCRIBE/UNSUBSCRIBE, is matched against the registered
[`ServiceEndpoint`] table and handed to a caller-supplied [`RequestHandler`].
*/

use crate::error::Error;
use crate::http::{render, HttpMessage, HttpParser, KnownHeader, MessageBuilder, Method, ParseOutcome};
use crate::registry::Handle;
use crate::soap::{build_action_response_envelope, build_fault_envelope, build_query_state_variable_response_envelope, Action};
use crate::webserver::alias::WebAlias;
use crate::webserver::router;
use crate::webserver::virtual_dir::{DirCallbacks, VirtualDirTable};
use crate::xml;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

/// A registered service's control and event URL paths, so the accept loop knows which device
/// handle a SOAP/GENA request matching one of them belongs to.
#[derive(Clone, Debug)]
pub struct ServiceEndpoint {
    pub handle: Handle,
    pub service_type: String,
    pub control_path: String,
    pub event_path: String,
}

/// One synchronous control request arriving at a device's control or event URL.
#[derive(Clone, Debug)]
pub enum ControlRequest {
    Action {
        action_name: String,
        service_type: String,
        arguments: HashMap<String, String>,
    },
    GetVar {
        var_name: String,
    },
    Subscribe {
        event_urls: Vec<String>,
        timeout_secs: Option<u32>,
    },
    Renew {
        sid: String,
        timeout_secs: Option<u32>,
    },
    Unsubscribe {
        sid: String,
    },
}

/// The matching synchronous result, carried back into the HTTP response the accept loop sends.
#[derive(Clone, Debug)]
pub enum ControlResponse {
    Action(Result<HashMap<String, String>, (u32, String)>),
    GetVar(Result<String, (u32, String)>),
    Subscribe(Result<(String, u32), ()>),
    Renew(Result<u32, ()>),
    Unsubscribe(Result<(), ()>),
}

pub type RequestHandler = dyn Fn(Handle, ControlRequest) -> ControlResponse + Send + Sync;

/// Delivery of an inbound NOTIFY to whichever control point subscribed at the matched event path.
pub type NotifyHandler = dyn Fn(Handle, &HttpMessage) + Send + Sync;

///
/// Owns the listening socket and a background accept thread; every connection is served on its
/// own short-lived thread rather than a pool job, since the pool is reserved for bounded,
/// bursty work (SSDP replies, async SOAP/GENA) rather than connection lifetime.
///
pub struct HttpServer {
    listener_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

/// A caller-supplied predicate deciding whether a request's `Host` header is acceptable —
/// an anti-DNS-rebinding hook set via `set_host_validate_callback`.
pub type HostValidator = dyn Fn(&str) -> bool + Send + Sync;

struct DispatchContext {
    alias: Arc<WebAlias>,
    virtual_dirs: Arc<RwLock<VirtualDirTable>>,
    document_root: Arc<RwLock<Option<PathBuf>>>,
    endpoints: Arc<RwLock<Vec<ServiceEndpoint>>>,
    handler: Arc<RequestHandler>,
    event_subscriptions: Arc<RwLock<HashMap<String, Handle>>>,
    notify_handler: Arc<NotifyHandler>,
    webserver_enabled: Arc<AtomicBool>,
    host_validator: Arc<RwLock<Option<Arc<HostValidator>>>>,
    read_timeout: Duration,
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl HttpServer {
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        bind_addr: SocketAddr,
        alias: Arc<WebAlias>,
        virtual_dirs: Arc<RwLock<VirtualDirTable>>,
        document_root: Arc<RwLock<Option<PathBuf>>>,
        endpoints: Arc<RwLock<Vec<ServiceEndpoint>>>,
        handler: Arc<RequestHandler>,
        event_subscriptions: Arc<RwLock<HashMap<String, Handle>>>,
        notify_handler: Arc<NotifyHandler>,
        webserver_enabled: Arc<AtomicBool>,
        host_validator: Arc<RwLock<Option<Arc<HostValidator>>>>,
        read_timeout: Duration,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(bind_addr).map_err(|_| Error::SocketBind)?;
        let listener_addr = listener.local_addr().map_err(|_| Error::SocketError)?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);

        let context = Arc::new(DispatchContext {
            alias,
            virtual_dirs,
            document_root,
            endpoints,
            handler,
            event_subscriptions,
            notify_handler,
            webserver_enabled,
            host_validator,
            read_timeout,
        });

        let thread = thread::Builder::new()
            .name("upnp-http".to_string())
            .spawn(move || accept_loop(listener, thread_shutdown, context))
            .map_err(|_| Error::InternalError("failed to spawn HTTP accept thread".to_string()))?;

        Ok(HttpServer {
            listener_addr,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener_addr
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Unblock the accept thread parked in `accept()`.
        if let Ok(stream) = TcpStream::connect(self.listener_addr) {
            drop(stream);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        if !self.shutdown.load(Ordering::SeqCst) {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("listener_addr", &self.listener_addr)
            .finish_non_exhaustive()
    }
}

fn accept_loop(listener: TcpListener, shutdown: Arc<AtomicBool>, context: Arc<DispatchContext>) {
    for incoming in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(stream) = incoming {
            let context = Arc::clone(&context);
            thread::spawn(move || serve_connection(stream, context));
        }
    }
}

fn serve_connection(mut stream: TcpStream, context: Arc<DispatchContext>) {
    stream.set_read_timeout(Some(context.read_timeout)).ok();
    stream.set_write_timeout(Some(context.read_timeout)).ok();

    let mut parser = HttpParser::new_request();
    let mut buf = vec![0u8; crate::http::READ_BUFFER_SIZE];
    let (message, chunk_boundaries) = loop {
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => match parser.append(&buf[..n]) {
                ParseOutcome::Success { message, .. } => break (message.clone(), parser.chunk_boundaries().to_vec()),
                ParseOutcome::Incomplete | ParseOutcome::IncompleteEntity => continue,
                ParseOutcome::NoMatch | ParseOutcome::Failure(_) => {
                    let _ = stream.write_all(&render(&simple_response(400, "Bad Request")));
                    return;
                }
            },
            Err(_) => return,
        }
    };

    let response = dispatch(&message, &chunk_boundaries, &context);
    let _ = stream.write_all(&render(&response));
}

// ------------------------------------------------------------------------------------------------
// Private Functions
// ------------------------------------------------------------------------------------------------

fn dispatch(request: &HttpMessage, chunk_boundaries: &[usize], context: &DispatchContext) -> HttpMessage {
    let validator = context.host_validator.read().unwrap().clone();
    if let Some(validator) = validator {
        let host = request.header(KnownHeader::Host).unwrap_or("");
        if !validator(host) {
            return simple_response(403, "Forbidden");
        }
    }

    let method = request.method.unwrap_or(Method::Get);
    let path = request.uri.split('?').next().unwrap_or(&request.uri).to_string();

    match method {
        Method::SoapMethodPost => dispatch_action(request, &path, context),
        Method::Subscribe => dispatch_subscribe(request, &path, context),
        Method::Unsubscribe => dispatch_unsubscribe(request, &path, context),
        Method::Notify => dispatch_notify(request, &path, context),
        Method::Post => {
            let callbacks = {
                let virtual_dirs = context.virtual_dirs.read().unwrap();
                virtual_dirs.find(&path).map(|dir| Arc::clone(&dir.callbacks))
            };
            match callbacks {
                Some(callbacks) => dispatch_virtual_post(request, &path, chunk_boundaries, &callbacks),
                None => dispatch_fallback(request, context),
            }
        }
        _ => dispatch_fallback(request, context),
    }
}

fn dispatch_fallback(request: &HttpMessage, context: &DispatchContext) -> HttpMessage {
    if !context.webserver_enabled.load(Ordering::SeqCst) {
        return simple_response(404, "Not Found");
    }
    let virtual_dirs = context.virtual_dirs.read().unwrap();
    let document_root = context.document_root.read().unwrap();
    match router::handle_request(request, &context.alias, &virtual_dirs, document_root.as_deref()) {
        Ok(response) => response,
        Err(err) => error_response(err),
    }
}

fn find_endpoint(context: &DispatchContext, path: &str, control: bool) -> Option<ServiceEndpoint> {
    let endpoints = context.endpoints.read().unwrap();
    endpoints
        .iter()
        .find(|e| if control { e.control_path == path } else { e.event_path == path })
        .cloned()
}

fn dispatch_action(request: &HttpMessage, path: &str, context: &DispatchContext) -> HttpMessage {
    let endpoint = match find_endpoint(context, path, true) {
        Some(e) => e,
        None => return simple_response(404, "Not Found"),
    };

    let soap_action = request
        .header(KnownHeader::SoapAction)
        .unwrap_or("")
        .trim_matches('"')
        .to_string();

    if soap_action.ends_with("#QueryStateVariable") {
        let var_name = match xml::extract_query_state_variable_request(&request.entity) {
            Ok(v) => v,
            Err(_) => return fault_response(402, "Invalid Args"),
        };
        return match (context.handler)(endpoint.handle, ControlRequest::GetVar { var_name }) {
            ControlResponse::GetVar(Ok(value)) => {
                let body = build_query_state_variable_response_envelope(&value);
                xml_response(200, "OK", body)
            }
            ControlResponse::GetVar(Err((code, description))) => fault_response(code, &description),
            _ => fault_response(501, "Action Failed"),
        };
    }

    let (action_name, arguments) = match xml::extract_action_request(&request.entity) {
        Ok(v) => v,
        Err(_) => return fault_response(402, "Invalid Args"),
    };

    let service_type = soap_action.rsplit_once('#').map(|(s, _)| s.to_string()).unwrap_or(endpoint.service_type);
    let request_value = ControlRequest::Action {
        action_name: action_name.clone(),
        service_type: service_type.clone(),
        arguments,
    };

    match (context.handler)(endpoint.handle, request_value) {
        ControlResponse::Action(Ok(out_args)) => {
            let action = Action::new(service_type, action_name);
            let pairs: Vec<(&str, &str)> = out_args.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let body = build_action_response_envelope(&action, &pairs);
            xml_response(200, "OK", body)
        }
        ControlResponse::Action(Err((code, description))) => fault_response(code, &description),
        _ => fault_response(501, "Action Failed"),
    }
}

fn dispatch_subscribe(request: &HttpMessage, path: &str, context: &DispatchContext) -> HttpMessage {
    let endpoint = match find_endpoint(context, path, false) {
        Some(e) => e,
        None => return simple_response(404, "Not Found"),
    };

    let timeout_secs = parse_timeout_header(request.header(KnownHeader::Timeout));
    let sid_header = request.header(KnownHeader::Sid).map(str::to_string);

    let response = match sid_header {
        // SID present with no CALLBACK: this is a renewal.
        Some(sid) => (context.handler)(endpoint.handle, ControlRequest::Renew { sid: sid.clone(), timeout_secs }),
        None => {
            let event_urls = parse_callback_header(request.header(KnownHeader::Callback));
            if event_urls.is_empty() {
                return simple_response(412, "Precondition Failed");
            }
            (context.handler)(endpoint.handle, ControlRequest::Subscribe { event_urls, timeout_secs })
        }
    };

    match response {
        ControlResponse::Subscribe(Ok((sid, timeout))) => subscribe_ok_response(&sid, timeout),
        ControlResponse::Renew(Ok(timeout)) => {
            let sid = request.header(KnownHeader::Sid).unwrap_or("").to_string();
            subscribe_ok_response(&sid, timeout)
        }
        _ => simple_response(412, "Precondition Failed"),
    }
}

fn dispatch_unsubscribe(request: &HttpMessage, path: &str, context: &DispatchContext) -> HttpMessage {
    let endpoint = match find_endpoint(context, path, false) {
        Some(e) => e,
        None => return simple_response(404, "Not Found"),
    };
    let sid = match request.header(KnownHeader::Sid) {
        Some(sid) => sid.to_string(),
        None => return simple_response(412, "Precondition Failed"),
    };
    match (context.handler)(endpoint.handle, ControlRequest::Unsubscribe { sid }) {
        ControlResponse::Unsubscribe(Ok(())) => simple_response(200, "OK"),
        _ => simple_response(412, "Precondition Failed"),
    }
}

/// A NOTIFY arriving at one of our own control points' event URLs (GENA delivery, control-point
/// side); matched by path against whatever `subscribe` registered.
fn dispatch_notify(request: &HttpMessage, path: &str, context: &DispatchContext) -> HttpMessage {
    let handle = {
        let subscriptions = context.event_subscriptions.read().unwrap();
        subscriptions.get(path).copied()
    };
    match handle {
        Some(handle) => {
            (context.notify_handler)(handle, request);
            simple_response(200, "OK")
        }
        None => simple_response(412, "Precondition Failed"),
    }
}

/// Feed a POST body to a matched virtual directory's `write` callback, one call per chunk as it
/// arrived on the wire (or a single call with the whole body for Content-Length framing), then
/// `close` exactly once.
fn dispatch_virtual_post(
    request: &HttpMessage,
    path: &str,
    chunk_boundaries: &[usize],
    callbacks: &DirCallbacks,
) -> HttpMessage {
    let mut offset = 0usize;
    let mut failed = false;
    if chunk_boundaries.is_empty() {
        if !request.entity.is_empty() && (callbacks.write)(path, &request.entity).is_err() {
            failed = true;
        }
    } else {
        for &end in chunk_boundaries {
            if let Some(slice) = request.entity.get(offset..end) {
                if (callbacks.write)(path, slice).is_err() {
                    failed = true;
                    break;
                }
            }
            offset = end;
        }
    }
    (callbacks.close)(path);

    if failed {
        return simple_response(500, "Internal Server Error");
    }
    MessageBuilder::response(200, "OK")
        .content_type("text/html")
        .date_now()
        .body_bytes(Vec::new())
        .build()
}

fn parse_timeout_header(value: Option<&str>) -> Option<u32> {
    let value = value?;
    let suffix = value.strip_prefix("Second-")?;
    if suffix.eq_ignore_ascii_case("infinite") {
        Some(0)
    } else {
        suffix.parse().ok()
    }
}

fn parse_callback_header(value: Option<&str>) -> Vec<String> {
    match value {
        Some(v) => v
            .split('>')
            .filter_map(|part| part.trim().strip_prefix('<'))
            .map(|url| url.to_string())
            .collect(),
        None => Vec::new(),
    }
}

fn simple_response(code: u16, reason: &str) -> HttpMessage {
    MessageBuilder::response(code, reason).date_now().body_bytes(Vec::new()).build()
}

fn xml_response(code: u16, reason: &str, body: Vec<u8>) -> HttpMessage {
    MessageBuilder::response(code, reason)
        .content_type("text/xml; charset=\"utf-8\"")
        .date_now()
        .body_bytes(body)
        .build()
}

fn fault_response(upnp_error_code: u32, upnp_error_description: &str) -> HttpMessage {
    let body = build_fault_envelope(upnp_error_code, upnp_error_description);
    xml_response(500, "Internal Server Error", body)
}

fn subscribe_ok_response(sid: &str, timeout_secs: u32) -> HttpMessage {
    let timeout_value = if timeout_secs == 0 {
        "Second-infinite".to_string()
    } else {
        format!("Second-{}", timeout_secs)
    };
    MessageBuilder::response(200, "OK")
        .header("SID", sid.to_string())
        .header("TIMEOUT", timeout_value)
        .date_now()
        .body_bytes(Vec::new())
        .build()
}

fn error_response(err: router::RouterError) -> HttpMessage {
    match err {
        router::RouterError::NotFound => simple_response(404, "Not Found"),
        router::RouterError::Forbidden => simple_response(403, "Forbidden"),
        router::RouterError::RangeNotSatisfiable => simple_response(416, "Requested Range Not Satisfiable"),
        router::RouterError::MethodNotAllowed => simple_response(405, "Method Not Allowed"),
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    fn endpoints_with(handle: Handle) -> Arc<RwLock<Vec<ServiceEndpoint>>> {
        Arc::new(RwLock::new(vec![ServiceEndpoint {
            handle,
            service_type: "urn:schemas-upnp-org:service:Dimming:1".to_string(),
            control_path: "/control".to_string(),
            event_path: "/event".to_string(),
        }]))
    }

    #[test]
    fn action_round_trip_against_local_listener() {
        let alias = Arc::new(WebAlias::new());
        let virtual_dirs = Arc::new(RwLock::new(VirtualDirTable::new()));
        let endpoints = endpoints_with(7);
        let handler: Arc<RequestHandler> = Arc::new(|handle, request| {
            assert_eq!(handle, 7);
            match request {
                ControlRequest::Action { action_name, .. } => {
                    assert_eq!(action_name, "GetLoadLevelTarget");
                    let mut out = HashMap::new();
                    out.insert("RetLoadlevelTarget".to_string(), "40".to_string());
                    ControlResponse::Action(Ok(out))
                }
                _ => ControlResponse::Action(Err((501, "unexpected".to_string()))),
            }
        });

        let server = HttpServer::start(
            "127.0.0.1:0".parse().unwrap(),
            alias,
            virtual_dirs,
            Arc::new(RwLock::new(None)),
            endpoints,
            handler,
            Arc::new(RwLock::new(HashMap::new())),
            Arc::new(|_, _| {}),
            Arc::new(AtomicBool::new(true)),
            Arc::new(RwLock::new(None)),
            Duration::from_secs(2),
        )
        .unwrap();
        let addr = server.local_addr();

        let body = br#"<?xml version="1.0"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><u:GetLoadLevelTarget xmlns:u="urn:schemas-upnp-org:service:Dimming:1"></u:GetLoadLevelTarget></s:Body></s:Envelope>"#;
        let request = format!(
            "POST /control HTTP/1.1\r\nHOST: {}\r\nCONTENT-TYPE: text/xml; charset=\"utf-8\"\r\nCONTENT-LENGTH: {}\r\nSOAPACTION: \"urn:schemas-upnp-org:service:Dimming:1#GetLoadLevelTarget\"\r\n\r\n",
            addr,
            body.len()
        );

        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(request.as_bytes()).unwrap();
        stream.write_all(body).unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains("<RetLoadlevelTarget>40</RetLoadlevelTarget>"));
    }

    #[test]
    fn chunked_post_delivers_one_write_per_chunk_then_closes() {
        use crate::http::open_http_post_chunked;
        use crate::webserver::virtual_dir::{DirCallbacks, FileInfo};
        use std::sync::Mutex;

        let alias = Arc::new(WebAlias::new());
        let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let received_clone = Arc::clone(&received);
        let closed_clone = Arc::clone(&closed);
        let mut table = VirtualDirTable::new();
        table.add(
            "/vdir",
            DirCallbacks {
                get_info: Box::new(|_| {
                    Some(FileInfo {
                        length: 0,
                        is_directory: false,
                        is_readable: false,
                        content_type: "application/octet-stream".to_string(),
                        last_modified: std::time::SystemTime::now(),
                    })
                }),
                open: Box::new(|_| Err(Error::NotFound)),
                write: Box::new(move |_, data| {
                    received_clone.lock().unwrap().push(data.to_vec());
                    Ok(())
                }),
                close: Box::new(move |_| closed_clone.store(true, Ordering::SeqCst)),
            },
        );
        let virtual_dirs = Arc::new(RwLock::new(table));
        let endpoints = Arc::new(RwLock::new(Vec::new()));
        let handler: Arc<RequestHandler> = Arc::new(|_, _| ControlResponse::Action(Err((501, "n/a".to_string()))));

        let server = HttpServer::start(
            "127.0.0.1:0".parse().unwrap(),
            alias,
            virtual_dirs,
            Arc::new(RwLock::new(None)),
            endpoints,
            handler,
            Arc::new(RwLock::new(HashMap::new())),
            Arc::new(|_, _| {}),
            Arc::new(AtomicBool::new(true)),
            Arc::new(RwLock::new(None)),
            Duration::from_secs(2),
        )
        .unwrap();
        let addr = server.local_addr();

        let mut post = open_http_post_chunked(addr, "/vdir/x", "application/octet-stream", &[], Duration::from_secs(2)).unwrap();
        post.write_chunk(b"ABC").unwrap();
        post.write_chunk(b"DE").unwrap();
        let response = post.finish().unwrap();

        assert_eq!(response.status_code, Some(200));
        assert_eq!(*received.lock().unwrap(), vec![b"ABC".to_vec(), b"DE".to_vec()]);
        assert!(closed.load(Ordering::SeqCst));
    }
}
