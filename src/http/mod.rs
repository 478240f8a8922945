/*!
HTTP/1.1 message parsing and client I/O; the web server itself lives in [`crate::webserver`].
*/

// ------------------------------------------------------------------------------------------------
// Modules
// ------------------------------------------------------------------------------------------------

mod message;
pub use message::{Header, HttpMessage, KnownHeader, Method};

mod parser;
pub use parser::{EntityFraming, HttpParser, ParseOutcome};

mod builder;
pub use builder::{render, MessageBuilder};

pub(crate) mod client;
pub use client::{
    download_url_item, open_http_get, open_http_post, open_http_post_chunked, ChunkedPostStream,
    Connection, HttpGetStream, HttpPostStream,
};

pub const HTTP_NAME: &str = "HTTP";
pub const DEFAULT_HTTP_VERSION: (u8, u8) = (1, 1);
pub const READ_BUFFER_SIZE: usize = 8192;
