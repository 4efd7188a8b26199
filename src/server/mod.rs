//! Server functionality

pub mod gateway;

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::filesystem::normalize_path;
use crate::server::gateway::Gateway;

use std::io::{self, BufWriter, Chain, Cursor, Read, Take, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How long the client may stall while sending a request or taking a response
const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// The largest request head we are willing to buffer
const MAX_HEAD_LENGTH: usize = 16 * 1024;

/// Binds the configured address and forwards every request it receives to the
/// FastCGI application.
///
/// Each connection is served on its own thread and carries one request.
pub fn serve(config: Config) -> Result<()> {
    let listener = TcpListener::bind(config.listen)?;
    info!("Listening on {}, forwarding to {}",
          config.listen, config.fcgi.backend);

    let gateway = Arc::new(Gateway::new(config));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let handler = Arc::clone(&gateway);
                thread::spawn(move || {
                    if let Err(e) = handle_client(&*handler, stream) {
                        warn!("Dropped a connection: {}", e);
                    }
                });
            },
            Err(e) => {
                warn!("Failed connection: {}", e);
            }
        };
    }

    Ok(())
}

fn handle_client<H: Handler + ?Sized>(handler: &H, stream: TcpStream)
                                      -> Result<()>
{
    stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
    stream.set_write_timeout(Some(CLIENT_TIMEOUT))?;

    let remote_addr = stream.peer_addr()?.to_string();
    let res = Response::new(stream.try_clone()?);

    match Request::parse(stream, remote_addr, false) {
        Ok(req) => handler.serve(req, res),
        Err(e @ Error::Io(_)) => return Err(e),
        Err(Error::LengthRequired) => error_messages::error_411(res)?,
        Err(e) => {
            info!("Rejected a request: {}", e);
            error_messages::error_400(res)?;
        }
    }

    Ok(())
}

/// Values which can handle requests
pub trait Handler: Send + Sync {
    fn serve(&self, req: Request, res: Response);
}

/// Everything about a request except its body
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    /// The request target exactly as the client sent it
    pub target: String,
    /// Minor version of HTTP/1.x
    pub version: u8,
    pub headers: Headers,
    pub remote_addr: String,
    /// Did the request arrive over TLS?
    pub secure: bool,
    /// The percent-decoded, normalized path of the target
    pub path: Vec<u8>,
    /// Scheme of an absolute-form target; empty otherwise
    pub scheme: String,
    /// Authority of an absolute-form target
    pub authority: Option<String>
}

impl RequestHead {
    pub fn protocol(&self) -> String {
        format!("HTTP/1.{}", self.version)
    }

    /// The host the request is addressed to, from the target or `Host`
    pub fn host(&self) -> Option<&[u8]> {
        match self.authority {
            Some(ref authority) => Some(authority.as_bytes()),
            None => self.headers.get("Host")
        }
    }

    /// Raw text after the first `?` of the target
    pub fn query(&self) -> &str {
        match self.target.find('?') {
            Some(i) => &self.target[i + 1 ..],
            None => ""
        }
    }
}

/// An incoming request from the client
///
/// Reading from a `Request` yields exactly the body its `Content-Length`
/// announced, or nothing.
#[derive(Debug)]
pub struct Request<R = TcpStream> {
    pub head: RequestHead,
    body: Take<Chain<Cursor<Vec<u8>>, R>>
}

impl<R: Read> Request<R> {
    pub fn parse(mut stream: R, remote_addr: String, secure: bool)
                 -> Result<Request<R>>
    {
        let (raw, leftover) = read_head(&mut stream)?;

        if let Some(coding) = raw.headers.get("Transfer-Encoding") {
            if !coding.eq_ignore_ascii_case(b"identity") {
                return Err(Error::LengthRequired);
            }
        }

        let length = match raw.headers.get("Content-Length") {
            Some(value) => ::std::str::from_utf8(value).ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .ok_or(Error::BadContentLength)?,
            None => 0
        };

        let (scheme, authority, path) = split_target(&raw.target)?;
        let path = normalize_path(path.as_bytes())?;

        Ok(Request {
            head: RequestHead {
                method: raw.method,
                target: raw.target,
                version: raw.version,
                headers: raw.headers,
                remote_addr: remote_addr,
                secure: secure,
                path: path,
                scheme: scheme,
                authority: authority
            },
            body: Cursor::new(leftover).chain(stream).take(length)
        })
    }
}

impl<R: Read> Read for Request<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.body.read(buf)
    }
}

/// The request line and header fields, before interpretation
#[derive(Debug)]
struct RawHead {
    method: String,
    target: String,
    version: u8,
    headers: Headers
}

/// Reads until the end of the request head
///
/// Returns the head along with whatever body bytes were read past it.
fn read_head<R: Read>(source: &mut R) -> Result<(RawHead, Vec<u8>)> {
    let mut buffer = Vec::with_capacity(4096);
    let mut chunk = [0; 4096];

    loop {
        {
            let mut headers = [httparse::EMPTY_HEADER; 100];
            let mut req = httparse::Request::new(&mut headers);

            if let httparse::Status::Complete(consumed) = req.parse(&buffer)? {
                let mut fields = Headers::new();
                for header in req.headers.iter() {
                    fields.insert(header.name, Vec::from(header.value));
                }

                let head = RawHead {
                    method: String::from(req.method.unwrap_or("")),
                    target: String::from(req.path.unwrap_or("")),
                    version: req.version.unwrap_or(1),
                    headers: fields
                };
                return Ok((head, Vec::from(&buffer[consumed ..])));
            }
        }

        if buffer.len() >= MAX_HEAD_LENGTH {
            return Err(Error::RequestLineTooLong);
        }

        let read = source.read(&mut chunk)?;
        if read == 0 {
            return Err(Error::RequestTruncated);
        }
        buffer.extend_from_slice(&chunk[.. read]);
    }
}

/// Splits a request target into scheme, authority and path
///
/// Origin-form targets have no scheme or authority. The query is dropped from
/// the path.
fn split_target(target: &str) -> Result<(String, Option<String>, &str)> {
    fn path_of(rest: &str) -> &str {
        let path = rest.split('?').next().unwrap_or("");
        if path.is_empty() { "/" } else { path }
    }

    if target.starts_with('/') {
        return Ok((String::new(), None, path_of(target)));
    }

    match target.find("://") {
        Some(i) if i > 0 => {
            let rest = &target[i + 3 ..];
            let end = rest.find(|c: char| c == '/' || c == '?').unwrap_or(rest.len());

            Ok((target[.. i].to_ascii_lowercase(),
                Some(String::from(&rest[.. end])),
                path_of(&rest[end ..])))
        },
        _ => Err(Error::PathNotInOriginForm)
    }
}

/// A list of HTTP headers in arrival order
///
/// Names are case-normalized on input. The first word, and any words after a
/// hyphen, are capitalized, with all other letters lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, Vec<u8>)>
}

fn normalize_header_name(name: &str) -> String {
    let lowercased = name.to_ascii_lowercase();
    let mut lower_chars = lowercased.chars();

    let mut normalized = String::with_capacity(lowercased.len());
    if let Some(ch) = lower_chars.next() {
        normalized.push(ch.to_ascii_uppercase());
    }
    else {
        return normalized;
    }

    let mut after_hyphen = false;
    for ch in lower_chars {
        if ch == '-' {
            after_hyphen = true;
            normalized.push(ch);
        }
        else if after_hyphen {
            normalized.push(ch.to_ascii_uppercase());
            after_hyphen = false;
        }
        else {
            normalized.push(ch);
        }
    }

    normalized
}

impl Headers {
    pub fn new() -> Headers {
        Headers {
            fields: Vec::new()
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|&(ref n, _)| n == name)
    }

    /// Adds a value, comma-joining it onto an existing field of that name
    pub fn insert(&mut self, key: &str, mut value: Vec<u8>) {
        let name = normalize_header_name(key);
        match self.position(&name) {
            None => self.fields.push((name, value)),
            Some(i) => {
                let entry = &mut self.fields[i].1;
                entry.reserve(value.len() + 1);
                entry.push(b',');
                entry.append(&mut value);
            }
        }
    }

    /// Adds a field line of its own, even if the name is already present
    pub fn append(&mut self, key: &str, value: Vec<u8>) {
        self.fields.push((normalize_header_name(key), value));
    }

    /// Replaces every field of that name with one holding `value`
    pub fn set(&mut self, key: &str, value: Vec<u8>) {
        let name = normalize_header_name(key);
        self.fields.retain(|&(ref n, _)| *n != name);
        self.fields.push((name, value));
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        let name = normalize_header_name(key);
        self.position(&name).map(|i| self.fields[i].1.as_slice())
    }

    pub fn iter(&self) -> ::std::slice::Iter<'_, (String, Vec<u8>)> {
        self.fields.iter()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a (String, Vec<u8>);
    type IntoIter = ::std::slice::Iter<'a, (String, Vec<u8>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// The response being constructed by a `Handler`
///
/// The whole body is known before anything goes out, so a response is written
/// in one shot with a `Content-Length`.
pub struct Response<W: Write = TcpStream> {
    writer: BufWriter<W>,
    status: ResponseStatus,
    headers: Headers
}

struct ResponseStatus {
    code: u16,
    reason: String
}

impl<W: Write> Response<W> {
    pub fn new(stream: W) -> Self {
        Response {
            writer: BufWriter::new(stream),
            status: ResponseStatus {
                code: 200,
                reason: String::from("OK")
            },
            headers: Headers::new()
        }
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn set_status(&mut self, code: u16, reason: String) {
        self.status = ResponseStatus {
            code: code,
            reason: reason
        };
    }

    /// Writes the status line, the headers and `body`, then closes out the
    /// exchange
    pub fn send(mut self, body: &[u8]) -> io::Result<()> {
        self.headers.set("Content-Length", body.len().to_string().into_bytes());
        self.headers.set("Connection", Vec::from(&b"close"[..]));

        self.write_headers()?;
        self.writer.write_all(body)?;
        self.writer.flush()
    }

    fn write_headers(&mut self) -> io::Result<()> {
        // Status line
        write!(self.writer, "HTTP/1.1 {} {}\r\n",
               self.status.code, self.status.reason)?;

        for &(ref header, ref content) in &self.headers {
            write!(self.writer, "{}: ", header)?;
            self.writer.write_all(content)?;
            self.writer.write_all(b"\r\n")?;
        }

        self.writer.write_all(b"\r\n")
    }
}

pub mod error_messages {
    use super::Response;

    use std::io::{self, Write};

    fn page<W: Write>(mut res: Response<W>, code: u16, reason: &str,
                      body: &[u8])
                      -> io::Result<()>
    {
        res.set_status(code, String::from(reason));
        res.headers_mut().set("Content-Type", Vec::from(&b"text/html"[..]));
        res.send(body)
    }

    pub fn error_400<W: Write>(res: Response<W>) -> io::Result<()> {
        page(res, 400, "Bad Request", ERROR_400)
    }

    const ERROR_400: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Bad Request</h1><p>Your request had some kind of bad syntax. Are you using netcat?</p></body></html>";

    pub fn error_411<W: Write>(res: Response<W>) -> io::Result<()> {
        page(res, 411, "Length Required", ERROR_411)
    }

    const ERROR_411: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Length Required</h1><p>Request bodies need a <code>Content-Length</code>; chunked uploads are not understood here.</p></body></html>";
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(raw: &[u8]) -> Result<Request<&[u8]>> {
        Request::parse(raw, String::from("127.0.0.1:40000"), false)
    }

    #[test]
    fn parse_request_basic() {
        let request: &[u8] = b"GET / HTTP/1.1\r\nHost: google.com\r\nUser-Agent: curl/7.47.1\r\nAccept: */*\r\n\r\n";

        let head = parse(request).unwrap().head;

        assert_eq!(head.method, "GET");
        assert_eq!(head.path, b"/");
        assert_eq!(head.protocol(), "HTTP/1.1");
        assert_eq!(head.host(), Some(&b"google.com"[..]));
        assert_eq!(head.headers.get("user-agent"), Some(&b"curl/7.47.1"[..]));
    }

    #[test]
    fn parse_request_keeps_raw_target() {
        let head = parse(b"GET /a%20b?x=%20 HTTP/1.1\r\n\r\n").unwrap().head;

        assert_eq!(head.target, "/a%20b?x=%20");
        assert_eq!(head.path, b"/a b");
        assert_eq!(head.query(), "x=%20");
    }

    #[test]
    fn parse_request_fails_on_illegal_percent_decoding() {
        match parse(b"GET /bogus%zz HTTP/1.1\r\n\r\n") {
            Err(Error::IllegalPercentEncoding) => (),
            other => panic!("{:?}", other.map(|r| r.head))
        }
    }

    #[test]
    fn parse_request_fails_on_bad_bytes() {
        assert!(parse(b"GET /bogon\xff HTTP/1.1\r\n").is_err());
    }

    #[test]
    fn parse_request_needs_the_whole_head() {
        match parse(b"GET / HTTP/1.1\r\nHost: x\r\n") {
            Err(Error::RequestTruncated) => (),
            other => panic!("{:?}", other.map(|r| r.head))
        }
    }

    #[test]
    fn parse_request_refuses_chunked_bodies() {
        match parse(b"POST /x.php HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n") {
            Err(Error::LengthRequired) => (),
            other => panic!("{:?}", other.map(|r| r.head))
        }
    }

    #[test]
    fn parse_request_rejects_bad_length() {
        match parse(b"POST /x.php HTTP/1.1\r\nContent-Length: lots\r\n\r\n") {
            Err(Error::BadContentLength) => (),
            other => panic!("{:?}", other.map(|r| r.head))
        }
    }

    #[test]
    fn parse_request_rejects_escaping_paths() {
        match parse(b"GET /../etc/passwd HTTP/1.1\r\n\r\n") {
            Err(Error::PathEscapesRoot) => (),
            other => panic!("{:?}", other.map(|r| r.head))
        }
    }

    #[test]
    fn body_stops_at_content_length() {
        let mut req = parse(b"POST /x.php HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello, trailing junk").unwrap();

        let mut body = Vec::new();
        req.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn body_is_empty_without_length() {
        let mut req = parse(b"GET / HTTP/1.1\r\n\r\nstray").unwrap();

        let mut body = Vec::new();
        req.read_to_end(&mut body).unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn absolute_form_target() {
        let head = parse(b"GET HTTP://example.org:81?q=1 HTTP/1.1\r\n\r\n").unwrap().head;

        assert_eq!(head.scheme, "http");
        assert_eq!(head.authority.as_ref().map(|s| &s[..]), Some("example.org:81"));
        assert_eq!(head.path, b"/");
        assert_eq!(head.query(), "q=1");
    }

    #[test]
    fn asterisk_form_is_refused() {
        assert!(parse(b"OPTIONS * HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn overlong_head_is_refused() {
        let mut raw = Vec::from(&b"GET / HTTP/1.1\r\n"[..]);
        for _ in 0 .. 2000 {
            raw.extend_from_slice(b"X-Padding: 0123456789\r\n");
        }

        match parse(&raw) {
            Err(Error::RequestLineTooLong) | Err(Error::Parse(_)) => (),
            other => panic!("{:?}", other.map(|r| r.head))
        }
    }

    #[test]
    fn normalize_content_type() {
        let expected = "Content-Type";
        assert_eq!(expected, &normalize_header_name("Content-Type"));
        assert_eq!(expected, &normalize_header_name("content-type"));
        assert_eq!(expected, &normalize_header_name("CONTENT-TYPE"));
        assert_eq!(expected, &normalize_header_name("cOnTeNt-TyPe"));
    }

    #[test]
    fn headers_merge_append_and_set() {
        let mut headers = Headers::new();
        headers.insert("x-foo", b"a".to_vec());
        headers.insert("X-FOO", b"b".to_vec());
        assert_eq!(headers.get("X-Foo"), Some(&b"a,b"[..]));

        headers.append("Set-Cookie", b"a=1".to_vec());
        headers.append("set-cookie", b"b=2".to_vec());
        assert_eq!(headers.iter().filter(|&&(ref n, _)| n == "Set-Cookie").count(), 2);

        headers.set("Set-Cookie", b"c=3".to_vec());
        assert_eq!(headers.get("Set-Cookie"), Some(&b"c=3"[..]));
        assert_eq!(headers.iter().count(), 2);
    }

    #[test]
    fn response_is_written_in_one_shot() {
        let mut out = Vec::new();
        {
            let mut res = Response::new(&mut out);
            res.set_status(404, String::from("Not Found"));
            res.headers_mut().append("Content-Type", b"text/plain".to_vec());
            res.send(b"gone").unwrap();
        }

        assert_eq!(String::from_utf8(out).unwrap(),
                   "HTTP/1.1 404 Not Found\r\n\
                    Content-Type: text/plain\r\n\
                    Content-Length: 4\r\n\
                    Connection: close\r\n\
                    \r\n\
                    gone");
    }

    #[test]
    fn canned_pages_carry_their_status() {
        let mut out = Vec::new();
        error_messages::error_411(Response::new(&mut out)).unwrap();

        assert!(out.starts_with(b"HTTP/1.1 411 Length Required\r\n"));
    }
}
