//! CGI/1.1 on both sides of the gateway
//!
//! FastCGI 1 inherits its message format and semantics from CGI/1.1: the
//! request goes out as a set of meta-variables, and the answer comes back as a
//! CGI document.

pub mod environment;
pub mod parser;

/// A status line
#[derive(Debug, PartialEq, Eq)]
pub struct Status {
    pub code: u16,
    pub reason_phrase: Vec<u8>
}

/// A location redirect
#[derive(Debug, PartialEq, Eq)]
pub struct Location {
    pub url: Vec<u8>
}

/// Other headers
#[derive(Debug, PartialEq, Eq)]
pub struct Header {
    pub name: Vec<u8>,
    pub content: Vec<u8>
}

/// The header portion of a document
#[derive(Debug, PartialEq, Eq)]
pub struct DocumentHeaders {
    pub status: Option<Status>,
    pub location: Option<Location>,
    /// Every field except `Status`, in document order
    pub headers: Vec<Header>
}

impl DocumentHeaders {
    /// The HTTP status this document asks for
    ///
    /// An explicit `Status` wins; a bare `Location` is a client redirect.
    pub fn http_status(&self) -> (u16, String) {
        match self.status {
            Some(Status { code, ref reason_phrase }) =>
                (code, String::from_utf8_lossy(reason_phrase).into_owned()),
            None if self.location.is_some() => (302, String::from("Found")),
            None => (200, String::from("OK"))
        }
    }
}
