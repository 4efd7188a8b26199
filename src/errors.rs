//! Error handling for the gateway

use std::error;
use std::fmt;
use std::io;

/// A Result for internal operations.
pub type Result<T> = ::std::result::Result<T, Error>;

/// All errors which might arise while serving one request
///
/// The first group comes from talking to the FastCGI backend, the second from
/// reading the client's HTTP request. None of them outlive the request that
/// produced them.
#[derive(Debug)]
pub enum Error {
    /// The backend could not be reached or dropped the connection
    ConnectionError(io::Error),
    /// The backend did not finish within the configured deadline
    Timeout,
    /// The backend sent bytes that do not frame as a FastCGI record
    MalformedRecord(String),
    /// A name-value pair stream was cut short
    MalformedNameValuePair,
    /// The backend ended the request with a protocol status other than
    /// `FCGI_REQUEST_COMPLETE`
    RequestIncomplete { protocol_status: u8, app_status: u32 },
    /// A record body would not fit the 16-bit content length
    RecordTooLong,

    Io(io::Error),
    Parse(httparse::Error),
    RequestTruncated,
    RequestLineTooLong,
    PathNotInOriginForm,
    IllegalPercentEncoding,
    PathEscapesRoot,
    LengthRequired,
    BadContentLength
}

impl Error {
    /// Is this a failure of the FastCGI backend rather than of the client?
    pub fn is_backend(&self) -> bool {
        match *self {
            Error::ConnectionError(_) |
            Error::Timeout |
            Error::MalformedRecord(_) |
            Error::MalformedNameValuePair |
            Error::RequestIncomplete { .. } |
            Error::RecordTooLong => true,
            _ => false
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::ConnectionError(ref e) =>
                write!(f, "FastCGI connection error: {}", e),
            Error::Timeout =>
                write!(f, "FastCGI backend timed out"),
            Error::MalformedRecord(ref why) =>
                write!(f, "malformed FastCGI record: {}", why),
            Error::MalformedNameValuePair =>
                write!(f, "malformed FastCGI name-value pair"),
            Error::RequestIncomplete { protocol_status, app_status } =>
                write!(f, "FastCGI request incomplete: protocol status {}, \
                           application status {}",
                       protocol_status, app_status),
            Error::RecordTooLong =>
                write!(f, "FastCGI record content exceeds 65535 bytes"),
            Error::Io(ref e) => write!(f, "I/O error: {}", e),
            Error::Parse(ref e) => write!(f, "bad HTTP request: {}", e),
            Error::RequestTruncated => write!(f, "HTTP request ended early"),
            Error::RequestLineTooLong =>
                write!(f, "HTTP request head is too long"),
            Error::PathNotInOriginForm =>
                write!(f, "request path does not start with '/'"),
            Error::IllegalPercentEncoding =>
                write!(f, "request path has bad percent-encoding"),
            Error::PathEscapesRoot =>
                write!(f, "request path climbs above the root"),
            Error::LengthRequired =>
                write!(f, "request body needs a Content-Length"),
            Error::BadContentLength =>
                write!(f, "request has an unparsable Content-Length")
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::ConnectionError(ref e) | Error::Io(ref e) => Some(e),
            Error::Parse(ref e) => Some(e),
            _ => None
        }
    }
}

impl From<httparse::Error> for Error {
    fn from(e: httparse::Error) -> Error {
        Error::Parse(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}
