/*!
A typed replacement for the printf-style message-assembly API: rather than a format
string of single-letter directives, `MessageBuilder` exposes one method per concern and renders
the wire bytes with [`MessageBuilder::build`].
*/

use crate::http::message::{HttpMessage, KnownHeader, Method};
use crate::{UPNP_STRING, UPNP_VERSION};

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

///
/// Builds the byte representation of an outgoing request or response. Each builder method below
/// corresponds to one of the format letters of the directive table this API replaces:
/// `q`/`R` (request line), `N` (status line), `T` (content-type), `L`/`K` (keep-alive/close),
/// `G` (content-range), `S`/`X` (server/user-agent identification), `D` (date), `A` (accept-ranges),
/// `E` (ext), `b`/`f`/`c` (body from bytes/file/chunked), `s` (status text), `d` (date header).
///
pub struct MessageBuilder {
    message: HttpMessage,
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl MessageBuilder {
    pub fn request(method: Method, uri: impl Into<String>) -> Self {
        MessageBuilder {
            message: HttpMessage::new_request(method, uri),
        }
    }

    pub fn response(status_code: u16, reason: impl Into<String>) -> Self {
        MessageBuilder {
            message: HttpMessage::new_response(status_code, reason),
        }
    }

    pub fn version(mut self, major: u8, minor: u8) -> Self {
        self.message.major = major;
        self.message.minor = minor;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.message.add_header(name, value);
        self
    }

    pub fn content_type(self, mime: impl Into<String>) -> Self {
        self.header("CONTENT-TYPE", mime)
    }

    pub fn content_range(self, first: u64, last: u64, total: u64) -> Self {
        self.header(
            "CONTENT-RANGE",
            format!("bytes {}-{}/{}", first, last, total),
        )
    }

    pub fn accept_ranges_bytes(self) -> Self {
        self.header("ACCEPT-RANGES", "bytes")
    }

    /// `L` — keep this connection alive after the response.
    pub fn keep_alive(self) -> Self {
        self.header("CONNECTION", "keep-alive")
    }

    /// `K` — close the connection after the response.
    pub fn close(self) -> Self {
        self.header("CONNECTION", "close")
    }

    /// `S` — identify this message as coming from the core (`OS/version UPnP/1.1 product/version`).
    pub fn server_identity(self, os_version: impl Into<String>, product: impl Into<String>) -> Self {
        let value = format!("{} {}/{} {}", os_version.into(), UPNP_STRING, UPNP_VERSION, product.into());
        self.header(KnownHeader::Server.name_str(), value)
    }

    /// `X` — identify the peer-facing user agent the same way.
    pub fn user_agent_identity(self, os_version: impl Into<String>, product: impl Into<String>) -> Self {
        let value = format!("{} {}/{} {}", os_version.into(), UPNP_STRING, UPNP_VERSION, product.into());
        self.header("USER-AGENT", value)
    }

    /// `D`/`d` — stamp the current time as an RFC 1123 `Date` header.
    pub fn date_now(self) -> Self {
        self.header(
            "DATE",
            httpdate::fmt_http_date(std::time::SystemTime::now()),
        )
    }

    /// `E` — mark this response with the `EXT` header required on a successful SSDP-style reply.
    pub fn ext(self) -> Self {
        self.header("EXT", "")
    }

    pub fn soap_action(self, action: impl Into<String>) -> Self {
        self.header("SOAPACTION", action)
    }

    /// `b` — set the entity body to a fixed byte buffer and add a matching `Content-Length`.
    pub fn body_bytes(mut self, bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        self.message.entity = bytes;
        self.header_mut("CONTENT-LENGTH", len.to_string());
        self
    }

    /// `f` — same as `body_bytes` but the caller is streaming a file; only the length is known
    /// up front, the bytes are supplied later by the connection layer.
    pub fn body_length_only(mut self, len: u64) -> Self {
        self.header_mut("CONTENT-LENGTH", len.to_string());
        self
    }

    /// `c` — mark this response as chunked instead of length-delimited.
    pub fn chunked(self) -> Self {
        self.header("TRANSFER-ENCODING", "chunked")
    }

    fn header_mut(&mut self, name: &str, value: String) {
        self.message.add_header(name, value);
    }

    /// Consume the builder and render the message as request/status line + headers + body
    ///. The caller is responsible for wrapping the body in chunk framing if
    /// `chunked()` was requested.
    pub fn build(self) -> HttpMessage {
        self.message
    }

    /// Render straight to wire bytes, for callers (SSDP, HTTPU) that want the bytes rather than
    /// the structured message.
    pub fn to_bytes(self) -> Vec<u8> {
        render(&self.message)
    }
}

/// Serialise a [`HttpMessage`] to its wire representation: parsing consumes these bytes,
/// `render` produces them.
pub fn render(message: &HttpMessage) -> Vec<u8> {
    let mut out = Vec::new();
    if message.is_request {
        let method = message.method.unwrap_or(Method::Get);
        out.extend_from_slice(method.as_token().as_bytes());
        out.push(b' ');
        out.extend_from_slice(message.uri.as_bytes());
        out.push(b' ');
        out.extend_from_slice(format!("HTTP/{}.{}", message.major, message.minor).as_bytes());
        out.extend_from_slice(b"\r\n");
    } else {
        out.extend_from_slice(
            format!(
                "HTTP/{}.{} {} {}",
                message.major,
                message.minor,
                message.status_code.unwrap_or(200),
                message.reason.as_deref().unwrap_or("OK")
            )
            .as_bytes(),
        );
        out.extend_from_slice(b"\r\n");
    }
    for header in &message.headers {
        out.extend_from_slice(header.name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(header.value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&message.entity);
    out
}

impl KnownHeader {
    fn name_str(&self) -> &'static str {
        match self {
            KnownHeader::ContentLength => "CONTENT-LENGTH",
            KnownHeader::ContentType => "CONTENT-TYPE",
            KnownHeader::ContentRange => "CONTENT-RANGE",
            KnownHeader::TransferEncoding => "TRANSFER-ENCODING",
            KnownHeader::Connection => "CONNECTION",
            KnownHeader::Host => "HOST",
            KnownHeader::SoapAction => "SOAPACTION",
            KnownHeader::Range => "RANGE",
            KnownHeader::Server => "SERVER",
            KnownHeader::UserAgent => "USER-AGENT",
            KnownHeader::Date => "DATE",
            KnownHeader::LastModified => "LAST-MODIFIED",
            KnownHeader::Location => "LOCATION",
            KnownHeader::CacheControl => "CACHE-CONTROL",
            KnownHeader::Nt => "NT",
            KnownHeader::Nts => "NTS",
            KnownHeader::Sid => "SID",
            KnownHeader::Callback => "CALLBACK",
            KnownHeader::Timeout => "TIMEOUT",
            KnownHeader::Seq => "SEQ",
            KnownHeader::AcceptRanges => "ACCEPT-RANGES",
            KnownHeader::Man => "MAN",
            KnownHeader::Mx => "MX",
            KnownHeader::St => "ST",
            KnownHeader::Usn => "USN",
            KnownHeader::Ext => "EXT",
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_simple_get_request() {
        let message = MessageBuilder::request(Method::Get, "/foo")
            .header("HOST", "example.com:1900")
            .build();
        let bytes = render(&message);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("GET /foo HTTP/1.1\r\n"));
        assert!(text.contains("HOST: example.com:1900\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn body_bytes_sets_content_length() {
        let message = MessageBuilder::response(200, "OK")
            .content_type("text/xml")
            .body_bytes(b"hello".to_vec())
            .build();
        assert_eq!(message.content_length(), Some(5));
        assert_eq!(message.entity, b"hello");
    }
}
