/*!
NOTIFY body/request construction and delivery, including the retry/back-off policy applied when
a subscriber's event URL is temporarily unreachable.
*/

use crate::error::Error;
use crate::http::client::open_body_request;
use crate::http::{HttpMessage, Method};
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

///
/// Three attempts with 2s/4s/8s back-off; the subscription is dropped by the caller after the
/// final failure. Shared between device-side NOTIFY delivery and the initial NOTIFY sent right
/// after a SUBSCRIBE is accepted.
///
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            delays: vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(8)],
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> usize {
        self.delays.len() + 1
    }

    pub fn delay_before_attempt(&self, attempt: usize) -> Option<Duration> {
        if attempt == 0 {
            None
        } else {
            self.delays.get(attempt - 1).copied()
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Public Functions
// ------------------------------------------------------------------------------------------------

/// Build the `<e:propertyset>` body for one NOTIFY carrying the given evented `(name, value)`
/// pairs, in declaration order.
pub fn build_notify_body(properties: &[(&str, &str)]) -> Vec<u8> {
    let mut body = String::new();
    body.push_str("<?xml version=\"1.0\"?>\r\n");
    body.push_str("<e:propertyset xmlns:e=\"urn:schemas-upnp-org:event-1-0\">\r\n");
    for (name, value) in properties {
        body.push_str(&format!(
            "<e:property>\r\n<{name}>{value}</{name}>\r\n</e:property>\r\n",
            name = name,
            value = crate::xml::escape_text(value)
        ));
    }
    body.push_str("</e:propertyset>\r\n");
    body.into_bytes()
}

/// Build the NOTIFY request line and GENA-specific headers for one subscriber/event-key pair
///.
pub fn build_notify_request(event_path: &str, sid: &str, event_key: u32) -> HttpMessage {
    let mut message = HttpMessage::new_request(Method::Notify, event_path);
    message.add_header("NT", "upnp:event");
    message.add_header("NTS", "upnp:propchange");
    message.add_header("SID", sid);
    message.add_header("SEQ", event_key.to_string());
    message
}

/// Deliver one NOTIFY to `addr`/`event_path`, retrying per `policy` on connection failure.
/// Returns the last error if every attempt fails.
pub fn deliver_notify(
    addr: SocketAddr,
    event_path: &str,
    sid: &str,
    event_key: u32,
    body: &[u8],
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<(), Error> {
    let mut last_error = Error::SocketError;
    for attempt in 0..policy.attempts() {
        if let Some(delay) = policy.delay_before_attempt(attempt) {
            thread::sleep(delay);
        }
        match try_deliver(addr, event_path, sid, event_key, body, timeout) {
            Ok(()) => return Ok(()),
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}

fn try_deliver(
    addr: SocketAddr,
    event_path: &str,
    sid: &str,
    event_key: u32,
    body: &[u8],
    timeout: Duration,
) -> Result<(), Error> {
    let request = build_notify_request(event_path, sid, event_key);
    let mut stream = open_body_request(
        Method::Notify,
        addr,
        event_path,
        "text/xml; charset=\"utf-8\"",
        body.len() as u64,
        &[
            ("NT", request.header_by_name("NT").unwrap_or("upnp:event")),
            ("NTS", "upnp:propchange"),
            ("SID", sid),
            ("SEQ", &event_key.to_string()),
        ],
        timeout,
    )?;
    stream.write_chunk(body)?;
    let response = stream.finish()?;
    if response.status_code == Some(200) {
        Ok(())
    } else {
        Err(Error::BadResponse(format!(
            "subscriber rejected NOTIFY with status {:?}",
            response.status_code
        )))
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_body_wraps_each_property() {
        let body = build_notify_body(&[("Volume", "7")]);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("<e:property>"));
        assert!(text.contains("<Volume>7</Volume>"));
    }

    #[test]
    fn retry_policy_has_three_backoff_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 4);
        assert_eq!(policy.delay_before_attempt(0), None);
        assert_eq!(policy.delay_before_attempt(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_before_attempt(3), Some(Duration::from_secs(8)));
    }

    #[test]
    fn notify_request_carries_gena_headers() {
        let request = build_notify_request("/event/1", "uuid:abc", 3);
        assert_eq!(request.header_by_name("SID"), Some("uuid:abc"));
        assert_eq!(request.header_by_name("SEQ"), Some("3"));
    }
}
