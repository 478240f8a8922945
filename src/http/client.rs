/*!
Streaming, non-blocking HTTP/1.1 client I/O over `std::net::TcpStream`. Every socket operation
here is bounded by a per-call timeout rather than left to block indefinitely, so no call can
stall a worker thread forever under the synchronous, OS-thread concurrency model.
*/

use crate::error::Error;
use crate::http::builder::{render, MessageBuilder};
use crate::http::message::{HttpMessage, Method};
use crate::http::parser::{HttpParser, ParseOutcome};
use crate::http::READ_BUFFER_SIZE;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

/// Default per-operation timeout applied to connect/read/write when the caller doesn't override
/// it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A connected HTTP/1.1 socket, reusable across keep-alive requests.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    timeout: Duration,
}

/// A GET response whose body is streamed rather than buffered whole, for serving large files
///.
pub struct HttpGetStream {
    connection: Connection,
    message: HttpMessage,
    remaining_in_buffer: Vec<u8>,
}

/// An open POST body writer; the caller streams bytes in and then reads the response.
pub struct HttpPostStream {
    connection: Connection,
    content_length: u64,
    sent: u64,
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl Connection {
    /// Connect to `addr`, bounded by `timeout`. Both the connect itself and every subsequent
    /// read/write respect this timeout.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, Error> {
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|_| Error::SocketError)?;
        stream.set_read_timeout(Some(timeout)).map_err(|_| Error::SocketError)?;
        stream.set_write_timeout(Some(timeout)).map_err(|_| Error::SocketError)?;
        stream.set_nodelay(true).ok();
        Ok(Connection { stream, timeout })
    }

    pub fn connect_host(host: &str, timeout: Duration) -> Result<Self, Error> {
        let mut addrs = host.to_socket_addrs().map_err(|_| Error::InvalidParam(host.to_string()))?;
        let addr = addrs.next().ok_or_else(|| Error::InvalidParam(host.to_string()))?;
        Self::connect(addr, timeout)
    }

    pub fn send(&mut self, message: &HttpMessage) -> Result<(), Error> {
        let bytes = render(message);
        self.stream.write_all(&bytes).map_err(|_| Error::SocketWrite)
    }

    /// Read until a complete message has been parsed, or `timeout` elapses with no progress.
    pub fn receive(&mut self, request_method: Method) -> Result<HttpMessage, Error> {
        let mut parser = HttpParser::new_response(request_method);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    parser.finish_until_close();
                    match parser.append(&[]) {
                        ParseOutcome::Success { message, .. } => return Ok(message.clone()),
                        _ => return Err(Error::SocketRead),
                    }
                }
                Ok(n) => match parser.append(&buf[..n]) {
                    ParseOutcome::Success { message, .. } => return Ok(message.clone()),
                    ParseOutcome::Incomplete | ParseOutcome::IncompleteEntity => continue,
                    ParseOutcome::NoMatch => return Err(Error::BadResponse("unrecognised status line".to_string())),
                    ParseOutcome::Failure(msg) => return Err(Error::BadResponse(msg)),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(Error::Timeout)
                }
                Err(_) => return Err(Error::SocketRead),
            }
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.timeout = timeout;
        self.stream.set_read_timeout(Some(timeout)).map_err(|_| Error::SocketError)?;
        self.stream.set_write_timeout(Some(timeout)).map_err(|_| Error::SocketError)
    }
}

impl HttpGetStream {
    /// Reads the full body into memory. Large-file streaming to a caller-provided sink is
    /// exposed via [`HttpGetStream::copy_to`] instead of forcing everything through this path.
    pub fn into_message(self) -> HttpMessage {
        self.message
    }

    pub fn copy_to<W: Write>(mut self, sink: &mut W) -> Result<u64, Error> {
        sink.write_all(&self.message.entity).map_err(|_| Error::SocketWrite)?;
        let mut total = self.message.entity.len() as u64;
        if !self.remaining_in_buffer.is_empty() {
            sink.write_all(&self.remaining_in_buffer).map_err(|_| Error::SocketWrite)?;
            total += self.remaining_in_buffer.len() as u64;
        }
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match self.connection.stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    sink.write_all(&buf[..n]).map_err(|_| Error::SocketWrite)?;
                    total += n as u64;
                }
                Err(_) => break,
            }
        }
        Ok(total)
    }
}

// ------------------------------------------------------------------------------------------------
// Public Functions
// ------------------------------------------------------------------------------------------------

/// A one-shot GET: connect, send the request, wait for the response — a single convenience call
/// for control points fetching a description document or presentation page.
pub fn open_http_get(addr: SocketAddr, uri: &str, timeout: Duration) -> Result<HttpGetStream, Error> {
    let mut connection = Connection::connect(addr, timeout)?;
    let request = MessageBuilder::request(Method::Get, uri)
        .header("HOST", addr.to_string())
        .close()
        .build();
    connection.send(&request)?;
    let message = connection.receive(Method::Get)?;
    Ok(HttpGetStream {
        connection,
        message,
        remaining_in_buffer: Vec::new(),
    })
}

/// Open a connection for streaming a POST body of known length (used by SOAP action
/// invocation). The caller writes the body with repeated calls to
/// [`HttpPostStream::write_chunk`] and then calls [`HttpPostStream::finish`].
pub fn open_http_post(
    addr: SocketAddr,
    uri: &str,
    content_type: &str,
    content_length: u64,
    extra_headers: &[(&str, &str)],
    timeout: Duration,
) -> Result<HttpPostStream, Error> {
    open_body_request(Method::Post, addr, uri, content_type, content_length, extra_headers, timeout)
}

/// Same as [`open_http_post`] but with an arbitrary request method — GENA NOTIFY delivery rides
/// on this with `Method::Notify` rather than `Method::Post`.
pub fn open_body_request(
    method: Method,
    addr: SocketAddr,
    uri: &str,
    content_type: &str,
    content_length: u64,
    extra_headers: &[(&str, &str)],
    timeout: Duration,
) -> Result<HttpPostStream, Error> {
    let mut connection = Connection::connect(addr, timeout)?;
    let mut builder = MessageBuilder::request(method, uri)
        .header("HOST", addr.to_string())
        .content_type(content_type)
        .body_length_only(content_length)
        .close();
    for (name, value) in extra_headers {
        builder = builder.header(name.to_string(), value.to_string());
    }
    let request = builder.build();
    connection.send(&request)?;
    Ok(HttpPostStream {
        connection,
        content_length,
        sent: 0,
    })
}

impl HttpPostStream {
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), Error> {
        self.connection.stream.write_all(data).map_err(|_| Error::SocketWrite)?;
        self.sent += data.len() as u64;
        Ok(())
    }

    /// Flush the trailing bytes (if the caller didn't write exactly `content_length`, that's an
    /// internal misuse rather than something to paper over) and read the response.
    pub fn finish(mut self) -> Result<HttpMessage, Error> {
        if self.sent != self.content_length {
            return Err(Error::InternalError(format!(
                "POST body length mismatch: declared {} but wrote {}",
                self.content_length, self.sent
            )));
        }
        self.connection.receive(Method::Post)
    }
}

/// An open POST body writer whose total length isn't known up front: each
/// [`ChunkedPostStream::write_chunk`] call becomes exactly one `Transfer-Encoding: chunked` wire
/// chunk, so a receiver that tracks chunk boundaries (the mini web server's virtual-directory
/// POST handler) sees the same call pattern the caller made.
pub struct ChunkedPostStream {
    connection: Connection,
}

/// Open a connection for streaming a POST body whose total length is discovered only as the
/// caller writes it — used for virtual-directory uploads rather than SOAP/GENA, where the body
/// is built in memory first and its length is known.
pub fn open_http_post_chunked(
    addr: SocketAddr,
    uri: &str,
    content_type: &str,
    extra_headers: &[(&str, &str)],
    timeout: Duration,
) -> Result<ChunkedPostStream, Error> {
    let mut connection = Connection::connect(addr, timeout)?;
    let mut builder = MessageBuilder::request(Method::Post, uri)
        .header("HOST", addr.to_string())
        .content_type(content_type)
        .chunked()
        .close();
    for (name, value) in extra_headers {
        builder = builder.header(name.to_string(), value.to_string());
    }
    let request = builder.build();
    connection.send(&request)?;
    Ok(ChunkedPostStream { connection })
}

impl ChunkedPostStream {
    /// Write one chunk: `data` may be empty (a legitimate zero-byte chunk is still one `write`
    /// call to the receiver).
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), Error> {
        let header = format!("{:x}\r\n", data.len());
        self.connection.stream.write_all(header.as_bytes()).map_err(|_| Error::SocketWrite)?;
        self.connection.stream.write_all(data).map_err(|_| Error::SocketWrite)?;
        self.connection.stream.write_all(b"\r\n").map_err(|_| Error::SocketWrite)
    }

    /// Send the terminating zero-size chunk and read the response.
    pub fn finish(mut self) -> Result<HttpMessage, Error> {
        self.connection.stream.write_all(b"0\r\n\r\n").map_err(|_| Error::SocketWrite)?;
        self.connection.receive(Method::Post)
    }
}

/// Fetch `uri` from `addr` and return the whole entity body as bytes — the common case for
/// retrieving a small description document.
pub fn download_url_item(addr: SocketAddr, uri: &str, timeout: Duration) -> Result<Vec<u8>, Error> {
    let stream = open_http_get(addr, uri, timeout)?;
    Ok(stream.into_message().entity)
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn get_round_trip_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let n = socket.read(&mut buf).unwrap();
            assert!(String::from_utf8_lossy(&buf[..n]).starts_with("GET /desc.xml"));
            let body = b"<root/>";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
                body.len()
            );
            socket.write_all(response.as_bytes()).unwrap();
            socket.write_all(body).unwrap();
        });

        let result = download_url_item(addr, "/desc.xml", Duration::from_secs(2)).unwrap();
        assert_eq!(result, b"<root/>");
        server.join().unwrap();
    }
}
