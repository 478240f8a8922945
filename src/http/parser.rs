/*!
The push-driven HTTP/1.1 parser.

The parser is fed bytes as they arrive off the wire with [`HttpParser::append`] and never blocks;
a short read simply leaves it in [`ParseOutcome::Incomplete`] until the caller has more bytes. This
mirrors the scan/parse/entity-read state machine of the httpparser the core is built around, minus
the separate "parser objects are single-use" restriction: a `HttpParser` is reset with
[`HttpParser::reset`] and reused across keep-alive requests on the same connection.
*/

use crate::http::message::{HttpMessage, Method};
use std::str;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

/// How the entity body of the current message is framed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntityFraming {
    /// No body at all (bodyless request, or a response status that forbids one).
    None,
    /// `Content-Length: N` — read exactly `N` bytes.
    ContentLength(usize),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Neither header present; read until the peer closes the connection (responses only).
    UntilClose,
    /// A NOTIFY with no framing header at all — the legacy SSDP-over-HTTP multicast hack
    ///: treated as a bodyless message rather than rejected.
    SsdpNotifyHack,
}

/// The result of feeding more bytes to the parser.
#[derive(Debug)]
pub enum ParseOutcome<'a> {
    /// A complete message was parsed; `message` is ready and `remainder` is the unconsumed tail
    /// of the input (the start of the next pipelined message, if any).
    Success {
        message: &'a HttpMessage,
        remainder: usize,
    },
    /// More bytes are needed before the request/status line and headers are complete.
    Incomplete,
    /// The start line and headers parsed, framing is known, but the entity is not fully read yet.
    IncompleteEntity,
    /// The bytes seen so far cannot be a valid start line (nothing was matched against the
    /// method table, or the status line isn't `HTTP/x.y NNN ...`).
    NoMatch,
    /// A structural parse failure after some part of the message was recognised (bad header
    /// line, invalid chunk size, oversized start line, and so on).
    Failure(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    StartLine,
    Headers,
    Entity,
    Complete,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum EntitySub {
    ContentLength,
    Chunked,
    ChunkedTrailer,
    UntilClose,
    None,
}

///
/// A resumable HTTP/1.1 message scanner. One instance is created per connection and
/// fed bytes via [`HttpParser::append`] until a full message (or an unrecoverable error) results.
///
pub struct HttpParser {
    is_request: bool,
    state: State,
    entity_sub: EntitySub,
    buffer: Vec<u8>,
    consumed: usize,
    message: HttpMessage,
    framing: EntityFraming,
    content_length_remaining: usize,
    chunk_remaining: usize,
    request_method_hint: Option<Method>,
    max_start_line_len: usize,
    /// Cumulative `message.entity` length after each chunk completes, for callers (the mini web
    /// server's POST-to-virtual-directory path) that need the original chunk boundaries rather
    /// than the flattened entity.
    chunk_boundaries: Vec<usize>,
}

const MAX_START_LINE_LEN: usize = 8192;

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl HttpParser {
    pub fn new_request() -> Self {
        HttpParser {
            is_request: true,
            state: State::StartLine,
            entity_sub: EntitySub::None,
            buffer: Vec::new(),
            consumed: 0,
            message: HttpMessage::new_request(Method::Get, ""),
            framing: EntityFraming::None,
            content_length_remaining: 0,
            chunk_remaining: 0,
            request_method_hint: None,
            max_start_line_len: MAX_START_LINE_LEN,
            chunk_boundaries: Vec::new(),
        }
    }

    /// `request_method` is required to interpret a response's entity framing:
    /// a response to a HEAD request never has a body regardless of its headers.
    pub fn new_response(request_method: Method) -> Self {
        HttpParser {
            is_request: false,
            state: State::StartLine,
            entity_sub: EntitySub::None,
            buffer: Vec::new(),
            consumed: 0,
            message: HttpMessage::new_response(0, ""),
            framing: EntityFraming::None,
            content_length_remaining: 0,
            chunk_remaining: 0,
            request_method_hint: Some(request_method),
            max_start_line_len: MAX_START_LINE_LEN,
            chunk_boundaries: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        let is_request = self.is_request;
        let request_method_hint = self.request_method_hint;
        *self = if is_request {
            HttpParser::new_request()
        } else {
            HttpParser::new_response(request_method_hint.unwrap_or(Method::Get))
        };
    }

    /// Feed newly-received bytes to the parser, returning the current state after consuming as
    /// much of `data` as it can. Call again with more bytes whenever the outcome is
    /// `Incomplete` or `IncompleteEntity`.
    pub fn append(&mut self, data: &[u8]) -> ParseOutcome<'_> {
        self.buffer.extend_from_slice(data);

        if self.state == State::StartLine || self.state == State::Headers {
            match self.try_parse_head() {
                Ok(true) => {}
                Ok(false) => {
                    if self.buffer.len() > self.max_start_line_len && self.state == State::StartLine {
                        return ParseOutcome::Failure("start line too long".to_string());
                    }
                    return ParseOutcome::Incomplete;
                }
                Err(Outcome::NoMatch) => return ParseOutcome::NoMatch,
                Err(Outcome::Failure(msg)) => return ParseOutcome::Failure(msg),
            }
        }

        if self.state == State::Entity {
            match self.try_parse_entity() {
                Ok(true) => {}
                Ok(false) => return ParseOutcome::IncompleteEntity,
                Err(msg) => return ParseOutcome::Failure(msg),
            }
        }

        if self.state == State::Complete {
            let remainder = self.buffer.len() - self.consumed;
            return ParseOutcome::Success {
                message: &self.message,
                remainder,
            };
        }

        ParseOutcome::Incomplete
    }

    /// Bytes left over in the internal buffer past the last complete message (the start of a
    /// pipelined next request, for instance). Drain with [`HttpParser::reset`] followed by
    /// feeding this slice back in.
    pub fn trailing_bytes(&self) -> &[u8] {
        &self.buffer[self.consumed..]
    }

    pub fn message(&self) -> &HttpMessage {
        &self.message
    }

    /// Cumulative entity-length offsets recorded after each completed chunk, when the body was
    /// `Transfer-Encoding: chunked`; empty for Content-Length or until-close framing.
    pub fn chunk_boundaries(&self) -> &[usize] {
        &self.chunk_boundaries
    }

    fn try_parse_head(&mut self) -> Result<bool, Outcome> {
        loop {
            let line_end = match find_crlf(&self.buffer[self.consumed..]) {
                Some(idx) => self.consumed + idx,
                None => return Ok(false),
            };
            let line = match str::from_utf8(&self.buffer[self.consumed..line_end]) {
                Ok(s) => s,
                Err(_) => return Err(Outcome::Failure("header line is not valid UTF-8".to_string())),
            };
            let line = line.to_string();
            let advance_to = line_end + 2;

            if self.state == State::StartLine {
                if line.is_empty() {
                    // Tolerate a leading blank line before the request line, as real clients do.
                    self.consumed = advance_to;
                    continue;
                }
                self.parse_start_line(&line)?;
                self.consumed = advance_to;
                self.state = State::Headers;
                continue;
            }

            // Headers state.
            if line.is_empty() {
                self.consumed = advance_to;
                self.finish_headers()?;
                return Ok(true);
            }
            self.parse_header_line(&line)?;
            self.consumed = advance_to;
        }
    }

    fn parse_start_line(&mut self, line: &str) -> Result<(), Outcome> {
        if self.is_request {
            let mut parts = line.splitn(3, ' ');
            let method_token = parts.next().ok_or(Outcome::NoMatch)?;
            let uri = parts.next().ok_or(Outcome::NoMatch)?;
            let version = parts.next();

            let method = Method::from_token(method_token).ok_or(Outcome::NoMatch)?;

            let (major, minor) = match version {
                Some(v) => parse_http_version(v).ok_or(Outcome::NoMatch)?,
                None => {
                    // No version token at all: HTTP/0.9-style simple GET.
                    if method == Method::Get {
                        self.message.method = Some(Method::SimpleGet);
                        self.message.uri = uri.to_string();
                        self.message.major = 0;
                        self.message.minor = 9;
                        self.framing = EntityFraming::None;
                        self.state = State::Complete;
                        return Ok(());
                    }
                    return Err(Outcome::NoMatch);
                }
            };

            self.message.method = Some(method);
            self.message.uri = uri.to_string();
            self.message.major = major;
            self.message.minor = minor;
            Ok(())
        } else {
            let mut parts = line.splitn(3, ' ');
            let version = parts.next().ok_or(Outcome::NoMatch)?;
            let code = parts.next().ok_or(Outcome::NoMatch)?;
            let reason = parts.next().unwrap_or("");

            let (major, minor) = parse_http_version(version).ok_or(Outcome::NoMatch)?;
            let status_code: u16 = code.parse().map_err(|_| Outcome::NoMatch)?;

            self.message.major = major;
            self.message.minor = minor;
            self.message.status_code = Some(status_code);
            self.message.reason = Some(reason.to_string());
            self.message.request_method = self.request_method_hint;
            Ok(())
        }
    }

    fn parse_header_line(&mut self, line: &str) -> Result<(), Outcome> {
        // RFC 2616 line folding: a header continuation starts with space or tab.
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = self.message.headers.last_mut() {
                last.value.push(' ');
                last.value.push_str(line.trim());
                return Ok(());
            }
            return Err(Outcome::Failure("continuation line with no preceding header".to_string()));
        }

        let colon = line
            .find(':')
            .ok_or_else(|| Outcome::Failure(format!("malformed header line: `{}`", line)))?;
        let name = line[..colon].trim();
        let value = line[colon + 1..].trim();
        if name.is_empty() {
            return Err(Outcome::Failure("header with empty name".to_string()));
        }
        self.message.merge_header(name, value);
        Ok(())
    }

    fn finish_headers(&mut self) -> Result<(), Outcome> {
        if self.is_request
            && self.message.method == Some(Method::Post)
            && self.message.header_by_name("SOAPACTION").is_some()
        {
            self.message.method = Some(Method::SoapMethodPost);
        }

        self.framing = self.determine_framing();
        self.entity_sub = match self.framing {
            EntityFraming::ContentLength(n) => {
                self.content_length_remaining = n;
                EntitySub::ContentLength
            }
            EntityFraming::Chunked => EntitySub::Chunked,
            EntityFraming::UntilClose => EntitySub::UntilClose,
            EntityFraming::None | EntityFraming::SsdpNotifyHack => EntitySub::None,
        };

        if matches!(self.framing, EntityFraming::None | EntityFraming::SsdpNotifyHack) {
            self.message.valid_ssdp_notify_hack = matches!(self.framing, EntityFraming::SsdpNotifyHack);
            self.state = State::Complete;
        } else {
            self.state = State::Entity;
        }
        Ok(())
    }

    /// Decide the entity framing for the just-parsed headers.
    fn determine_framing(&self) -> EntityFraming {
        if self.is_request {
            let method = self.message.method.unwrap_or(Method::Get);
            if method.is_bodyless_request() {
                return EntityFraming::None;
            }
        } else if let Some(code) = self.message.status_code {
            if HttpMessage::status_forbids_body(code) {
                return EntityFraming::None;
            }
            if self.message.request_method == Some(Method::Head) {
                return EntityFraming::None;
            }
        }

        if self.message.is_chunked() {
            return EntityFraming::Chunked;
        }
        if let Some(len) = self.message.content_length() {
            return EntityFraming::ContentLength(len);
        }
        if self.is_request {
            if self.message.method == Some(Method::Notify) {
                // No Content-Length and no Transfer-Encoding on a NOTIFY: the legacy
                // SSDP-over-HTTP multicast message has no framing header at all.
                return EntityFraming::SsdpNotifyHack;
            }
            EntityFraming::None
        } else {
            EntityFraming::UntilClose
        }
    }

    fn try_parse_entity(&mut self) -> Result<bool, String> {
        match self.entity_sub {
            EntitySub::ContentLength => self.read_content_length(),
            EntitySub::Chunked => self.read_chunked(),
            EntitySub::ChunkedTrailer => self.read_chunked_trailer(),
            EntitySub::UntilClose => {
                // The caller signals EOF by calling `finish_until_close`; until then, buffer
                // whatever arrived and report incomplete.
                let available = self.buffer.len() - self.consumed;
                self.message.entity.extend_from_slice(&self.buffer[self.consumed..]);
                self.consumed += available;
                Ok(false)
            }
            EntitySub::None => {
                self.state = State::Complete;
                Ok(true)
            }
        }
    }

    /// Signal that the peer closed the connection while framing was `UntilClose`; whatever has
    /// been buffered becomes the final entity.
    pub fn finish_until_close(&mut self) {
        if self.entity_sub == EntitySub::UntilClose {
            self.state = State::Complete;
        }
    }

    fn read_content_length(&mut self) -> Result<bool, String> {
        let available = self.buffer.len() - self.consumed;
        let take = available.min(self.content_length_remaining);
        self.message
            .entity
            .extend_from_slice(&self.buffer[self.consumed..self.consumed + take]);
        self.consumed += take;
        self.content_length_remaining -= take;

        if self.content_length_remaining == 0 {
            // Bytes received past the declared length are discarded, not appended.
            let leftover = self.buffer.len() - self.consumed;
            self.message.amount_discarded += leftover;
            self.consumed += leftover;
            self.state = State::Complete;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn read_chunked(&mut self) -> Result<bool, String> {
        loop {
            if self.chunk_remaining > 0 {
                let available = self.buffer.len() - self.consumed;
                let take = available.min(self.chunk_remaining);
                self.message
                    .entity
                    .extend_from_slice(&self.buffer[self.consumed..self.consumed + take]);
                self.consumed += take;
                self.chunk_remaining -= take;
                if self.chunk_remaining > 0 {
                    return Ok(false);
                }
                // Consume the trailing CRLF after chunk data.
                match find_crlf(&self.buffer[self.consumed..]) {
                    Some(0) => self.consumed += 2,
                    Some(_) => return Err("malformed chunk terminator".to_string()),
                    None => return Ok(false),
                }
                self.chunk_boundaries.push(self.message.entity.len());
                continue;
            }

            let line_end = match find_crlf(&self.buffer[self.consumed..]) {
                Some(idx) => self.consumed + idx,
                None => return Ok(false),
            };
            let line = str::from_utf8(&self.buffer[self.consumed..line_end])
                .map_err(|_| "chunk size line is not valid UTF-8".to_string())?;
            // Strip chunk extensions (";ext=value") before parsing the size.
            let size_token = line.split(';').next().unwrap_or("").trim();
            let size = usize::from_str_radix(size_token, 16)
                .map_err(|_| format!("invalid chunk size `{}`", size_token))?;
            self.consumed = line_end + 2;

            if size == 0 {
                self.entity_sub = EntitySub::ChunkedTrailer;
                return self.read_chunked_trailer();
            }
            self.chunk_remaining = size;
        }
    }

    /// Zero-size chunk marker is followed by zero or more trailer header lines, terminated by a
    /// blank line — folded into the message's header list (SPEC_FULL.md §B).
    fn read_chunked_trailer(&mut self) -> Result<bool, String> {
        loop {
            let line_end = match find_crlf(&self.buffer[self.consumed..]) {
                Some(idx) => self.consumed + idx,
                None => return Ok(false),
            };
            let line = str::from_utf8(&self.buffer[self.consumed..line_end])
                .map_err(|_| "trailer line is not valid UTF-8".to_string())?
                .to_string();
            self.consumed = line_end + 2;
            if line.is_empty() {
                self.state = State::Complete;
                return Ok(true);
            }
            if let Some(colon) = line.find(':') {
                let name = line[..colon].trim().to_string();
                let value = line[colon + 1..].trim().to_string();
                self.message.merge_header(name, value);
            }
        }
    }
}

enum Outcome {
    NoMatch,
    Failure(String),
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_http_version(token: &str) -> Option<(u8, u8)> {
    let rest = token.strip_prefix("HTTP/")?;
    let mut parts = rest.splitn(2, '.');
    let major: u8 = parts.next()?.parse().ok()?;
    let minor: u8 = parts.next()?.parse().ok()?;
    Some((major, minor))
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get_request() {
        let mut parser = HttpParser::new_request();
        let outcome = parser.append(b"GET /foo HTTP/1.1\r\nHost: example.com\r\n\r\n");
        match outcome {
            ParseOutcome::Success { message, .. } => {
                assert_eq!(message.method, Some(Method::Get));
                assert_eq!(message.uri, "/foo");
                assert_eq!(message.header_by_name("Host"), Some("example.com"));
            }
            other => panic!("expected Success, got {:?}", other),
        }
    }

    #[test]
    fn incomplete_until_headers_terminated() {
        let mut parser = HttpParser::new_request();
        let outcome = parser.append(b"GET /foo HTTP/1.1\r\nHost: example.com\r\n");
        assert!(matches!(outcome, ParseOutcome::Incomplete));
    }

    #[test]
    fn parses_request_with_content_length_body() {
        let mut parser = HttpParser::new_request();
        let data = b"POST /ctrl HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        match parser.append(data) {
            ParseOutcome::Success { message, remainder } => {
                assert_eq!(message.entity, b"hello");
                assert_eq!(remainder, 0);
            }
            other => panic!("expected Success, got {:?}", other),
        }
    }

    #[test]
    fn parses_chunked_body_with_trailer() {
        let mut parser = HttpParser::new_request();
        let data = b"POST /ctrl HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\nX-Trailer: ok\r\n\r\n";
        match parser.append(data) {
            ParseOutcome::Success { message, .. } => {
                assert_eq!(message.entity, b"hello");
                assert_eq!(message.header_by_name("X-Trailer"), Some("ok"));
            }
            other => panic!("expected Success, got {:?}", other),
        }
    }

    #[test]
    fn bytes_past_content_length_are_counted_as_discarded() {
        let mut parser = HttpParser::new_request();
        let data = b"POST /ctrl HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloXXX";
        match parser.append(data) {
            ParseOutcome::Success { message, remainder } => {
                assert_eq!(message.entity, b"hello");
                assert_eq!(message.amount_discarded, 3);
                assert_eq!(remainder, 0);
            }
            other => panic!("expected Success, got {:?}", other),
        }
    }

    #[test]
    fn unknown_method_is_no_match() {
        let mut parser = HttpParser::new_request();
        let outcome = parser.append(b"FROBNICATE / HTTP/1.1\r\n\r\n");
        assert!(matches!(outcome, ParseOutcome::NoMatch));
    }

    #[test]
    fn simple_get_without_version() {
        let mut parser = HttpParser::new_request();
        let outcome = parser.append(b"GET /index.html\r\n\r\n");
        match outcome {
            ParseOutcome::Success { message, .. } => {
                assert_eq!(message.method, Some(Method::SimpleGet));
            }
            other => panic!("expected Success, got {:?}", other),
        }
    }

    #[test]
    fn response_with_no_framing_header_reads_until_close() {
        let mut parser = HttpParser::new_response(Method::Get);
        let outcome = parser.append(b"HTTP/1.1 200 OK\r\n\r\nsome data");
        assert!(matches!(outcome, ParseOutcome::IncompleteEntity));
        parser.finish_until_close();
        match parser.append(b"") {
            ParseOutcome::Success { message, .. } => {
                assert_eq!(message.entity, b"some data");
            }
            other => panic!("expected Success, got {:?}", other),
        }
    }

    #[test]
    fn head_response_has_no_body_even_with_content_length() {
        let mut parser = HttpParser::new_response(Method::Head);
        let outcome = parser.append(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n");
        match outcome {
            ParseOutcome::Success { message, remainder } => {
                assert!(message.entity.is_empty());
                assert_eq!(remainder, 0);
            }
            other => panic!("expected Success, got {:?}", other),
        }
    }
}
