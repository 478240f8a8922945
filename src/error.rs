/*!
The flat error taxonomy shared by every component in the core.
*/

use std::fmt::Display;
use std::io::Error as IOError;
use std::net::AddrParseError;
use std::str::Utf8Error;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

///
/// This provides a common error type across the stack, standing in for the negative return
/// codes of a C-style status-code API; `Ok` stands in for the `Success` (0) case.
///
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    NetworkTransport(#[from] IOError),

    #[error(transparent)]
    MessageFormat(#[from] MessageFormatError),

    #[error("out of memory")]
    OutOfMemory,

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("handle {0} is not registered")]
    InvalidHandle(i32),

    #[error("the library has not been initialized, or has already been shut down")]
    Finish,

    #[error("no network interface matched selector `{0}`")]
    InvalidInterface(String),

    #[error("network error")]
    NetworkError,

    #[error("socket error")]
    SocketError,

    #[error("socket bind failed")]
    SocketBind,

    #[error("socket write failed")]
    SocketWrite,

    #[error("socket read failed")]
    SocketRead,

    #[error("out of sockets")]
    OutOfSocket,

    #[error("operation timed out")]
    Timeout,

    #[error("buffer too small")]
    BufferTooSmall,

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("subscription request was not accepted (status `{0}`)")]
    SubscribeUnaccepted(String),

    #[error("unsubscribe request was not accepted (status `{0}`)")]
    UnsubscribeUnaccepted(String),

    #[error("bad response from peer: {0}")]
    BadResponse(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("An operation you attempted returned an error status `{status}` (Operation: `{operation}`)")]
    OperationFailed { operation: String, status: String },

    #[error("An operation you attempted is not supported (Operation: `{operation}`)")]
    UnsupportedOperation { operation: String },
}

#[derive(Clone, Copy, Debug)]
pub enum ValueSource {
    Socket,
    Header,
    Field,
}

#[derive(Debug, Error)]
pub enum MessageFormatError {
    #[error(transparent)]
    XmlFormat(#[from] quick_xml::Error),

    #[error(transparent)]
    SourceEncoding(#[from] Utf8Error),

    #[error(transparent)]
    AddrFormat(#[from] AddrParseError),

    #[error("A required {source} `{name}` was either missing or empty")]
    MissingRequiredValue { source: ValueSource, name: String },

    #[error("The {source} `{name}` value did not match the expected type (Expected: `{expected}`, Found: `{found}`)")]
    ValueTypeMismatch {
        source: ValueSource,
        name: String,
        expected: String,
        found: String,
    },

    #[error("The {source} `{name}` was incorrectly formatted (Value: `{value}`)")]
    InvalidValue {
        source: ValueSource,
        name: String,
        value: String,
    },

    #[error("The value provided is not valid for type `{for_type}` (Value: `{value}`)")]
    InvalidValueForType { for_type: String, value: String },
}

// ------------------------------------------------------------------------------------------------
// Public Functions
// ------------------------------------------------------------------------------------------------

pub fn missing_required_header<S>(name: S) -> MessageFormatError
where
    S: Into<String>,
{
    MessageFormatError::MissingRequiredValue {
        source: ValueSource::Header,
        name: name.into(),
    }
}

pub fn header_type_mismatch<S1, S2, S3>(name: S1, expected: S2, found: S3) -> MessageFormatError
where
    S1: Into<String>,
    S2: Into<String>,
    S3: Into<String>,
{
    MessageFormatError::ValueTypeMismatch {
        source: ValueSource::Header,
        name: name.into(),
        expected: expected.into(),
        found: found.into(),
    }
}

pub fn invalid_header_value<S1, S2>(name: S1, value: S2) -> MessageFormatError
where
    S1: Into<String>,
    S2: Into<String>,
{
    MessageFormatError::InvalidValue {
        source: ValueSource::Header,
        name: name.into(),
        value: value.into(),
    }
}

pub fn invalid_field_value<S1, S2>(name: S1, value: S2) -> MessageFormatError
where
    S1: Into<String>,
    S2: Into<String>,
{
    MessageFormatError::InvalidValue {
        source: ValueSource::Field,
        name: name.into(),
        value: value.into(),
    }
}

pub fn invalid_socket_value<S1, S2>(name: S1, value: S2) -> MessageFormatError
where
    S1: Into<String>,
    S2: Into<String>,
{
    MessageFormatError::InvalidValue {
        source: ValueSource::Socket,
        name: name.into(),
        value: value.into(),
    }
}

pub fn invalid_value_for_type<S1, S2>(for_type: S1, value: S2) -> MessageFormatError
where
    S1: Into<String>,
    S2: Into<String>,
{
    MessageFormatError::InvalidValueForType {
        for_type: for_type.into(),
        value: value.into(),
    }
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ValueSource::Socket => "socket",
                ValueSource::Header => "message header",
                ValueSource::Field => "message field",
            }
        )
    }
}

impl<T> From<MessageFormatError> for Result<T, MessageFormatError> {
    fn from(e: MessageFormatError) -> Self {
        Err(e)
    }
}

impl<T> From<MessageFormatError> for Result<T, Error> {
    fn from(e: MessageFormatError) -> Self {
        Err(Error::MessageFormat(e))
    }
}
