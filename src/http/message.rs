/*!
The `HTTPMessage` value type and the fixed method/known-header tables the parser matches
against.
*/

use std::fmt::{self, Display, Formatter};

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

///
/// The fixed, sorted table of methods the scanner recognises. Unknown methods are
/// rejected with `NotImplemented` (501) before a message is ever built.
///
/// Note: `POST` appears twice — once as the ordinary method and once, implicitly, as
/// `SoapMethodPost` when a `SOAPACTION` header is seen on a `POST`. `SoapMethodPost` is never
/// matched by name, only reached by promotion during header parsing.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    MPost,
    MSearch,
    Notify,
    Subscribe,
    Unsubscribe,
    /// The legacy HTTP/0.9-style "simple GET": method and target, no version.
    SimpleGet,
    /// `Post` promoted by the presence of a `SOAPACTION` header.
    SoapMethodPost,
}

impl Method {
    /// Case-sensitive match against the fixed method table: method matching stays
    /// case-sensitive on requests.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "GET" => Some(Method::Get),
            "HEAD" => Some(Method::Head),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            "M-POST" => Some(Method::MPost),
            "M-SEARCH" => Some(Method::MSearch),
            "NOTIFY" => Some(Method::Notify),
            "SUBSCRIBE" => Some(Method::Subscribe),
            "UNSUBSCRIBE" => Some(Method::Unsubscribe),
            _ => None,
        }
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::MPost => "M-POST",
            Method::MSearch => "M-SEARCH",
            Method::Notify => "NOTIFY",
            Method::Subscribe => "SUBSCRIBE",
            Method::Unsubscribe => "UNSUBSCRIBE",
            Method::SimpleGet => "GET",
            Method::SoapMethodPost => "POST",
        }
    }

    /// Requests using these methods never carry a body.
    pub fn is_bodyless_request(&self) -> bool {
        matches!(
            self,
            Method::Head
                | Method::Get
                | Method::SimpleGet
                | Method::Subscribe
                | Method::Unsubscribe
                | Method::MSearch
        )
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_token())
    }
}

///
/// Known-header ids, matched case-insensitively, giving O(1) lookup for the headers every
/// component in the core actually inspects.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum KnownHeader {
    ContentLength,
    ContentType,
    ContentRange,
    TransferEncoding,
    Connection,
    Host,
    SoapAction,
    Range,
    Server,
    UserAgent,
    Date,
    LastModified,
    Location,
    CacheControl,
    Nt,
    Nts,
    Sid,
    Callback,
    Timeout,
    Seq,
    AcceptRanges,
    Man,
    Mx,
    St,
    Usn,
    Ext,
}

const KNOWN_HEADER_TABLE: &[(&str, KnownHeader)] = &[
    ("CONTENT-LENGTH", KnownHeader::ContentLength),
    ("CONTENT-TYPE", KnownHeader::ContentType),
    ("CONTENT-RANGE", KnownHeader::ContentRange),
    ("TRANSFER-ENCODING", KnownHeader::TransferEncoding),
    ("CONNECTION", KnownHeader::Connection),
    ("HOST", KnownHeader::Host),
    ("SOAPACTION", KnownHeader::SoapAction),
    ("RANGE", KnownHeader::Range),
    ("SERVER", KnownHeader::Server),
    ("USER-AGENT", KnownHeader::UserAgent),
    ("DATE", KnownHeader::Date),
    ("LAST-MODIFIED", KnownHeader::LastModified),
    ("LOCATION", KnownHeader::Location),
    ("CACHE-CONTROL", KnownHeader::CacheControl),
    ("NT", KnownHeader::Nt),
    ("NTS", KnownHeader::Nts),
    ("SID", KnownHeader::Sid),
    ("CALLBACK", KnownHeader::Callback),
    ("TIMEOUT", KnownHeader::Timeout),
    ("SEQ", KnownHeader::Seq),
    ("ACCEPT-RANGES", KnownHeader::AcceptRanges),
    ("MAN", KnownHeader::Man),
    ("MX", KnownHeader::Mx),
    ("ST", KnownHeader::St),
    ("USN", KnownHeader::Usn),
    ("EXT", KnownHeader::Ext),
];

impl KnownHeader {
    pub fn lookup(name: &str) -> Option<Self> {
        KNOWN_HEADER_TABLE
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, id)| *id)
    }
}

/// One header line: name is case-preserved as received, `known` gives O(1) lookup
///.
#[derive(Clone, Debug)]
pub struct Header {
    pub name: String,
    pub value: String,
    pub known: Option<KnownHeader>,
}

impl Header {
    pub fn new<S1: Into<String>, S2: Into<String>>(name: S1, value: S2) -> Self {
        let name = name.into();
        let known = KnownHeader::lookup(&name);
        Header {
            name,
            value: value.into(),
            known,
        }
    }
}

///
/// A parsed (or, for an outgoing message, to-be-serialised) HTTP request or response
///.
///
#[derive(Clone, Debug)]
pub struct HttpMessage {
    pub is_request: bool,
    pub method: Option<Method>,
    /// For a response, the method of the request that produced it — needed to decide
    /// whether this response has a body.
    pub request_method: Option<Method>,
    pub uri: String,
    pub major: u8,
    pub minor: u8,
    pub status_code: Option<u16>,
    pub reason: Option<String>,
    pub headers: Vec<Header>,
    pub entity: Vec<u8>,
    /// Extra bytes received beyond a declared `Content-Length`, discarded rather than appended.
    pub amount_discarded: usize,
    /// Set when a NOTIFY with no body-framing header is treated as the legacy SSDP-over-HTTP
    /// hack rather than rejected with `LengthRequired`.
    pub valid_ssdp_notify_hack: bool,
}

impl HttpMessage {
    pub fn new_request(method: Method, uri: impl Into<String>) -> Self {
        HttpMessage {
            is_request: true,
            method: Some(method),
            request_method: None,
            uri: uri.into(),
            major: 1,
            minor: 1,
            status_code: None,
            reason: None,
            headers: Vec::new(),
            entity: Vec::new(),
            amount_discarded: 0,
            valid_ssdp_notify_hack: false,
        }
    }

    pub fn new_response(status_code: u16, reason: impl Into<String>) -> Self {
        HttpMessage {
            is_request: false,
            method: None,
            request_method: None,
            uri: String::new(),
            major: 1,
            minor: 1,
            status_code: Some(status_code),
            reason: Some(reason.into()),
            headers: Vec::new(),
            entity: Vec::new(),
            amount_discarded: 0,
            valid_ssdp_notify_hack: false,
        }
    }

    pub fn header(&self, known: KnownHeader) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.known == Some(known))
            .map(|h| h.value.as_str())
    }

    pub fn header_by_name(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push(Header::new(name, value));
    }

    /// Merge a repeated known (or arbitrary) header's value with `", "`, the way line-folding
    /// and repeated headers are merged while parsing.
    pub fn merge_header(&mut self, name: &str, value: &str) {
        if let Some(existing) = self.headers.iter_mut().find(|h| h.name.eq_ignore_ascii_case(name)) {
            existing.value.push_str(", ");
            existing.value.push_str(value);
        } else {
            self.add_header(name.to_string(), value.to_string());
        }
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header(KnownHeader::ContentLength)
            .and_then(|v| v.trim().parse::<usize>().ok())
    }

    pub fn is_chunked(&self) -> bool {
        self.header(KnownHeader::TransferEncoding)
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }

    /// Status codes that never carry a body regardless of framing headers.
    pub fn status_forbids_body(code: u16) -> bool {
        (100..200).contains(&code) || code == 204 || code == 304
    }
}
