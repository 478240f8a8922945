/*!
Resolves an incoming GET/HEAD/POST against the alias, the virtual directory table and finally
the plain filesystem document root, and builds the response — including byte-range handling.
*/

use crate::http::{HttpMessage, KnownHeader, MessageBuilder, Method};
use crate::webserver::alias::WebAlias;
use crate::webserver::virtual_dir::{FileInfo, VirtualDirTable};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Eq, PartialEq)]
pub enum RouterError {
    NotFound,
    Forbidden,
    RangeNotSatisfiable,
    MethodNotAllowed,
}

struct Resolved {
    content_type: String,
    length: u64,
    last_modified: SystemTime,
    body: ResolvedBody,
}

enum ResolvedBody {
    InMemory(std::sync::Arc<Vec<u8>>),
    File(PathBuf),
}

// ------------------------------------------------------------------------------------------------
// Public Functions
// ------------------------------------------------------------------------------------------------

///
/// Resolve and build the full response for `request`, trying the alias first, then registered
/// virtual directories, then the plain document root.
///
pub fn handle_request(
    request: &HttpMessage,
    alias: &WebAlias,
    virtual_dirs: &VirtualDirTable,
    document_root: Option<&Path>,
) -> Result<HttpMessage, RouterError> {
    let method = request.method.unwrap_or(Method::Get);
    if !matches!(method, Method::Get | Method::Head | Method::Post) {
        return Err(RouterError::MethodNotAllowed);
    }

    let path = request_path(&request.uri)?;
    let resolved = resolve(&path, alias, virtual_dirs, document_root)?;

    let range = request.header(KnownHeader::Range);
    let body_only_head = method == Method::Head;

    match range {
        Some(range_value) => build_range_response(&resolved, range_value, body_only_head),
        None => build_full_response(&resolved, body_only_head),
    }
}

// ------------------------------------------------------------------------------------------------
// Private Functions
// ------------------------------------------------------------------------------------------------

/// Percent-decodes the request target and rejects anything that could escape the document
/// root, per spec §4.6 step 1: "percent-decode the path; reject any `..` segment that would
/// escape the document root". Decoding first matters — a segment like `%2e%2e` must be caught
/// too, not just a literal `..`.
fn request_path(uri: &str) -> Result<String, RouterError> {
    let raw = uri.split('?').next().unwrap_or(uri);
    let decoded = percent_decode(raw).ok_or(RouterError::Forbidden)?;
    if !decoded.starts_with('/') {
        return Err(RouterError::Forbidden);
    }
    if decoded.split('/').any(|segment| segment == "..") {
        return Err(RouterError::Forbidden);
    }
    Ok(decoded)
}

/// Decodes `%XX` escapes in a request path. Returns `None` on a malformed escape or on bytes
/// that don't form valid UTF-8 once decoded.
fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = (*bytes.get(i + 1)? as char).to_digit(16)?;
            let lo = (*bytes.get(i + 2)? as char).to_digit(16)?;
            out.push((hi * 16 + lo) as u8);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn resolve(
    path: &str,
    alias: &WebAlias,
    virtual_dirs: &VirtualDirTable,
    document_root: Option<&Path>,
) -> Result<Resolved, RouterError> {
    if let Some((content, content_type, last_modified)) = alias.get(path) {
        return Ok(Resolved {
            length: content.len() as u64,
            content_type,
            last_modified,
            body: ResolvedBody::InMemory(content),
        });
    }

    if let Some(dir) = virtual_dirs.find(path) {
        let info: FileInfo = (dir.callbacks.get_info)(path).ok_or(RouterError::NotFound)?;
        if info.is_directory || !info.is_readable {
            return Err(RouterError::Forbidden);
        }
        let mut reader = (dir.callbacks.open)(path).map_err(|_| RouterError::NotFound)?;
        let mut buf = Vec::with_capacity(info.length as usize);
        reader.read_to_end(&mut buf).map_err(|_| RouterError::NotFound)?;
        return Ok(Resolved {
            length: info.length,
            content_type: info.content_type,
            last_modified: info.last_modified,
            body: ResolvedBody::InMemory(std::sync::Arc::new(buf)),
        });
    }

    let root = document_root.ok_or(RouterError::NotFound)?;
    let relative = path.trim_start_matches('/');
    let full_path = root.join(relative);
    if !full_path.starts_with(root) {
        // `request_path` already rejects any `..` segment, so this is normally unreachable.
        return Err(RouterError::Forbidden);
    }
    let metadata = fs::metadata(&full_path).map_err(|_| RouterError::NotFound)?;
    if metadata.is_dir() {
        return Err(RouterError::Forbidden);
    }
    Ok(Resolved {
        length: metadata.len(),
        content_type: guess_content_type(&full_path),
        last_modified: metadata.modified().unwrap_or(SystemTime::now()),
        body: ResolvedBody::File(full_path),
    })
}

fn read_body(resolved: &Resolved) -> Result<Vec<u8>, RouterError> {
    match &resolved.body {
        ResolvedBody::InMemory(content) => Ok(content.as_ref().clone()),
        ResolvedBody::File(path) => fs::read(path).map_err(|_| RouterError::NotFound),
    }
}

fn build_full_response(resolved: &Resolved, head_only: bool) -> Result<HttpMessage, RouterError> {
    let mut builder = MessageBuilder::response(200, "OK")
        .content_type(resolved.content_type.clone())
        .accept_ranges_bytes()
        .date_now();
    if head_only {
        builder = builder.body_length_only(resolved.length);
    } else {
        builder = builder.body_bytes(read_body(resolved)?);
    }
    Ok(builder.build())
}

/// Byte-range clamping: a `last` beyond `length - 1` is clamped rather than rejected; only a
/// `first` past the end of the resource is a hard 416.
fn build_range_response(
    resolved: &Resolved,
    range_header: &str,
    head_only: bool,
) -> Result<HttpMessage, RouterError> {
    let (first, last) = parse_byte_range(range_header, resolved.length)
        .ok_or(RouterError::RangeNotSatisfiable)?;

    if first >= resolved.length {
        return Err(RouterError::RangeNotSatisfiable);
    }
    let clamped_last = last.min(resolved.length.saturating_sub(1));
    let slice_len = clamped_last - first + 1;

    let mut builder = MessageBuilder::response(206, "Partial Content")
        .content_type(resolved.content_type.clone())
        .content_range(first, clamped_last, resolved.length)
        .accept_ranges_bytes()
        .date_now();

    if head_only {
        builder = builder.body_length_only(slice_len);
    } else {
        let full = read_body(resolved)?;
        let slice = full
            .get(first as usize..=clamped_last as usize)
            .ok_or(RouterError::RangeNotSatisfiable)?
            .to_vec();
        builder = builder.body_bytes(slice);
    }
    Ok(builder.build())
}

/// Parses a single `bytes=first-last` range (the only form spec clients are expected to send).
fn parse_byte_range(value: &str, length: u64) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    // Only the first range of a (possibly multi-range) request is honored.
    let first_range = spec.split(',').next()?.trim();
    let (start, end) = first_range.split_once('-')?;

    if start.is_empty() {
        // Suffix range: "-N" means the last N bytes.
        let suffix_len: u64 = end.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        let first = length.saturating_sub(suffix_len);
        return Some((first, length.saturating_sub(1)));
    }

    let first: u64 = start.parse().ok()?;
    let last = if end.is_empty() {
        length.saturating_sub(1)
    } else {
        end.parse().ok()?
    };
    if first > last {
        return None;
    }
    Some((first, last))
}

fn guess_content_type(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("xml") => "text/xml",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
    .to_string()
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webserver::virtual_dir::VirtualDirTable;

    fn get_request(uri: &str) -> HttpMessage {
        HttpMessage::new_request(Method::Get, uri)
    }

    #[test]
    fn serves_alias_document() {
        let alias = WebAlias::new();
        alias.set("/description.xml", b"<root/>".to_vec(), "text/xml");
        let dirs = VirtualDirTable::new();
        let response = handle_request(&get_request("/description.xml"), &alias, &dirs, None).unwrap();
        assert_eq!(response.status_code, Some(200));
        assert_eq!(response.entity, b"<root/>");
    }

    #[test]
    fn dot_dot_segment_is_forbidden() {
        let alias = WebAlias::new();
        let dirs = VirtualDirTable::new();
        let err = handle_request(&get_request("/../etc/passwd"), &alias, &dirs, None).unwrap_err();
        assert_eq!(err, RouterError::Forbidden);
    }

    #[test]
    fn percent_encoded_dot_dot_segment_is_forbidden() {
        let alias = WebAlias::new();
        let dirs = VirtualDirTable::new();
        let err = handle_request(&get_request("/%2e%2e/etc/passwd"), &alias, &dirs, None).unwrap_err();
        assert_eq!(err, RouterError::Forbidden);
    }

    #[test]
    fn percent_encoded_path_resolves_alias() {
        let alias = WebAlias::new();
        alias.set("/a b.xml", b"<root/>".to_vec(), "text/xml");
        let dirs = VirtualDirTable::new();
        let response = handle_request(&get_request("/a%20b.xml"), &alias, &dirs, None).unwrap();
        assert_eq!(response.status_code, Some(200));
    }

    #[test]
    fn unknown_path_is_not_found() {
        let alias = WebAlias::new();
        let dirs = VirtualDirTable::new();
        let err = handle_request(&get_request("/nope"), &alias, &dirs, None).unwrap_err();
        assert_eq!(err, RouterError::NotFound);
    }

    #[test]
    fn range_clamped_when_last_exceeds_length() {
        let alias = WebAlias::new();
        alias.set("/data.bin", vec![0u8; 10], "application/octet-stream");
        let dirs = VirtualDirTable::new();
        let mut request = get_request("/data.bin");
        request.add_header("RANGE", "bytes=5-999");
        let response = handle_request(&request, &alias, &dirs, None).unwrap();
        assert_eq!(response.status_code, Some(206));
        assert_eq!(response.entity.len(), 5);
        assert_eq!(
            response.header(KnownHeader::ContentRange),
            Some("bytes 5-9/10")
        );
    }

    #[test]
    fn range_starting_past_end_is_unsatisfiable() {
        let alias = WebAlias::new();
        alias.set("/data.bin", vec![0u8; 10], "application/octet-stream");
        let dirs = VirtualDirTable::new();
        let mut request = get_request("/data.bin");
        request.add_header("RANGE", "bytes=20-30");
        let err = handle_request(&request, &alias, &dirs, None).unwrap_err();
        assert_eq!(err, RouterError::RangeNotSatisfiable);
    }

    #[test]
    fn suffix_range_returns_last_n_bytes() {
        let alias = WebAlias::new();
        alias.set("/data.bin", (0u8..10).collect(), "application/octet-stream");
        let dirs = VirtualDirTable::new();
        let mut request = get_request("/data.bin");
        request.add_header("RANGE", "bytes=-3");
        let response = handle_request(&request, &alias, &dirs, None).unwrap();
        assert_eq!(response.entity, vec![7, 8, 9]);
    }
}
