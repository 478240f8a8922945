/*!
Control-point-side subscription requests: the SUBSCRIBE/RENEW/UNSUBSCRIBE sends a control point
makes against a remote publisher's event URL, mirroring [`crate::soap::send_action`]'s shape for
the GENA side of the wire.
*/

use crate::error::Error;
use crate::http::{Connection, HttpMessage, KnownHeader, MessageBuilder, Method};
use std::net::SocketAddr;
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// Public Functions
// ------------------------------------------------------------------------------------------------

/// Render the `TIMEOUT` header value for a requested subscription length; `0` asks for
/// `Second-infinite`.
fn timeout_header_value(timeout_secs: u32) -> String {
    if timeout_secs == 0 {
        "Second-infinite".to_string()
    } else {
        format!("Second-{}", timeout_secs)
    }
}

/// Parse a `TIMEOUT` response header back into seconds, `0` meaning infinite.
fn parse_timeout_response(value: Option<&str>) -> Result<u32, Error> {
    let value = value.ok_or_else(|| Error::BadResponse("SUBSCRIBE response missing TIMEOUT".to_string()))?;
    let suffix = value
        .strip_prefix("Second-")
        .ok_or_else(|| Error::BadResponse(format!("malformed TIMEOUT header `{}`", value)))?;
    if suffix.eq_ignore_ascii_case("infinite") {
        Ok(0)
    } else {
        suffix
            .parse()
            .map_err(|_| Error::BadResponse(format!("malformed TIMEOUT header `{}`", value)))
    }
}

fn send_subscribe_request(addr: SocketAddr, message: HttpMessage, timeout: Duration) -> Result<HttpMessage, Error> {
    let mut connection = Connection::connect(addr, timeout)?;
    connection.send(&message)?;
    connection.receive(Method::Subscribe)
}

/// Initial SUBSCRIBE: `NT: upnp:event`, our `CALLBACK` event URL, and the requested `TIMEOUT`.
/// On success returns the publisher-assigned `(SID, granted timeout in seconds)`.
pub fn subscribe(
    addr: SocketAddr,
    event_url: &str,
    our_callback_url: &str,
    timeout_secs: u32,
    timeout: Duration,
) -> Result<(String, u32), Error> {
    let message = MessageBuilder::request(Method::Subscribe, event_url)
        .header("HOST", addr.to_string())
        .header("NT", "upnp:event")
        .header("CALLBACK", format!("<{}>", our_callback_url))
        .header("TIMEOUT", timeout_header_value(timeout_secs))
        .close()
        .build();

    let response = send_subscribe_request(addr, message, timeout)?;
    match response.status_code {
        Some(code) if (200..300).contains(&code) => {
            let sid = response
                .header(KnownHeader::Sid)
                .ok_or_else(|| Error::BadResponse("SUBSCRIBE response missing SID".to_string()))?
                .to_string();
            let granted = parse_timeout_response(response.header(KnownHeader::Timeout))?;
            Ok((sid, granted))
        }
        other => Err(Error::SubscribeUnaccepted(format!("{:?}", other))),
    }
}

/// Renewal SUBSCRIBE: carries only `SID` and the requested `TIMEOUT`, no `CALLBACK`/`NT`
///. Returns the newly granted timeout in seconds.
pub fn renew(addr: SocketAddr, event_url: &str, sid: &str, timeout_secs: u32, timeout: Duration) -> Result<u32, Error> {
    let message = MessageBuilder::request(Method::Subscribe, event_url)
        .header("HOST", addr.to_string())
        .header("SID", sid.to_string())
        .header("TIMEOUT", timeout_header_value(timeout_secs))
        .close()
        .build();

    let response = send_subscribe_request(addr, message, timeout)?;
    match response.status_code {
        Some(code) if (200..300).contains(&code) => parse_timeout_response(response.header(KnownHeader::Timeout)),
        other => Err(Error::SubscribeUnaccepted(format!("{:?}", other))),
    }
}

/// UNSUBSCRIBE: carries only `SID`. A non-2xx response surfaces as `UnsubscribeUnaccepted`
///; callers drop the local `ClientSubscription` regardless, since the renewal
/// path already treats the subscription as gone the moment we stop renewing it.
pub fn unsubscribe(addr: SocketAddr, event_url: &str, sid: &str, timeout: Duration) -> Result<(), Error> {
    let message = MessageBuilder::request(Method::Unsubscribe, event_url)
        .header("HOST", addr.to_string())
        .header("SID", sid.to_string())
        .close()
        .build();

    let response = send_subscribe_request(addr, message, timeout)?;
    match response.status_code {
        Some(code) if (200..300).contains(&code) => Ok(()),
        other => Err(Error::UnsubscribeUnaccepted(format!("{:?}", other))),
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn subscribe_round_trip_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let n = socket.read(&mut buf).unwrap();
            let text = String::from_utf8_lossy(&buf[..n]);
            assert!(text.starts_with("SUBSCRIBE /event HTTP/1.1"));
            assert!(text.contains("CALLBACK: <http://127.0.0.1:9999/evt>"));
            let response = "HTTP/1.1 200 OK\r\nSID: uuid:sub-1\r\nTIMEOUT: Second-1800\r\nContent-Length: 0\r\n\r\n";
            socket.write_all(response.as_bytes()).unwrap();
        });

        let (sid, timeout) = subscribe(addr, "/event", "http://127.0.0.1:9999/evt", 1800, Duration::from_secs(2)).unwrap();
        assert_eq!(sid, "uuid:sub-1");
        assert_eq!(timeout, 1800);
        server.join().unwrap();
    }

    #[test]
    fn unsubscribe_failure_is_unaccepted() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).unwrap();
            socket.write_all(b"HTTP/1.1 412 Precondition Failed\r\nContent-Length: 0\r\n\r\n").unwrap();
        });

        let result = unsubscribe(addr, "/event", "uuid:sub-1", Duration::from_secs(2));
        assert!(matches!(result, Err(Error::UnsubscribeUnaccepted(_))));
        server.join().unwrap();
    }
}
