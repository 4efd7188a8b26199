//! A driver for FastCGI connections
//!
//! Every request gets a connection of its own: BEGIN_REQUEST without
//! `FCGI_KEEP_CONN`, the parameter and stdin streams, then records are read
//! back until the application ends the request and the connection is dropped.

use crate::errors::{Error, Result};
use crate::fastcgi::{Content, EndRequest, Params, protocol_status};
use crate::fastcgi::parser::read_record;
use crate::fastcgi::serializer::*;
use crate::log_util::*;

use std::fmt;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use socket2::{Domain, SockAddr, Socket as Socket2, Type};

/// The request ID used on every connection; there is only ever one request
/// in flight per connection.
pub const REQUEST_ID: u16 = 1;

/// How long an ABORT_REQUEST may take to write once the deadline has passed
const ABORT_GRACE: Duration = Duration::from_millis(100);

/// Where the FastCGI application server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A `host:port` pair, resolved on every connect
    Tcp(String),
    Unix(PathBuf)
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> ::std::result::Result<Target, String> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(String::from("empty Unix socket path"));
            }
            return Ok(Target::Unix(PathBuf::from(path)));
        }

        if s.starts_with('/') {
            return Ok(Target::Unix(PathBuf::from(s)));
        }

        match s.rfind(':') {
            Some(i) if i > 0 && i + 1 < s.len() => Ok(Target::Tcp(String::from(s))),
            _ => Err(format!("expected host:port or a socket path, got {:?}", s))
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Target::Tcp(ref addr) => write!(f, "{}", addr),
            Target::Unix(ref path) => write!(f, "unix:{}", path.display())
        }
    }
}

/// What the application produced for one request
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Output {
    /// The CGI document: header fields, a blank line, then the body
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub app_status: u32
}

/// A point in time by which the whole exchange must be over
#[derive(Debug, Clone, Copy)]
struct Deadline(Instant);

impl Deadline {
    fn after(timeout: Duration) -> Deadline {
        Deadline(Instant::now() + timeout)
    }

    fn remaining(&self) -> Result<Duration> {
        let now = Instant::now();
        if now >= self.0 {
            Err(Error::Timeout)
        }
        else {
            Ok(self.0 - now)
        }
    }

    /// What is left, as a socket timeout
    fn budget(&self) -> io::Result<Duration> {
        self.remaining().map_err(|_| io::Error::new(
            ErrorKind::TimedOut, "FastCGI deadline passed"))
    }
}

/// Pause between attempts on a Unix socket whose accept queue is full
const CONNECT_RETRY: Duration = Duration::from_millis(10);

/// Did this I/O error come from a socket timeout?
fn timed_out(e: &io::Error) -> bool {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => true,
        _ => false
    }
}

/// Reclassifies errors raised while talking to the application
fn backend(e: Error) -> Error {
    match e {
        Error::Io(ref io) if timed_out(io) => Error::Timeout,
        Error::Io(io) => Error::ConnectionError(io),
        other => other
    }
}

enum Socket {
    Tcp(TcpStream),
    Unix(UnixStream)
}

impl Socket {
    fn set_read_timeout(&self, dur: Duration) -> io::Result<()> {
        match *self {
            Socket::Tcp(ref s) => s.set_read_timeout(Some(dur)),
            Socket::Unix(ref s) => s.set_read_timeout(Some(dur))
        }
    }

    fn set_write_timeout(&self, dur: Duration) -> io::Result<()> {
        match *self {
            Socket::Tcp(ref s) => s.set_write_timeout(Some(dur)),
            Socket::Unix(ref s) => s.set_write_timeout(Some(dur))
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match *self {
            Socket::Tcp(ref s) => s.shutdown(Shutdown::Both),
            Socket::Unix(ref s) => s.shutdown(Shutdown::Both)
        }
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match *self {
            Socket::Tcp(ref mut s) => s.read(buf),
            Socket::Unix(ref mut s) => s.read(buf)
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            Socket::Tcp(ref mut s) => s.write(buf),
            Socket::Unix(ref mut s) => s.write(buf)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *self {
            Socket::Tcp(ref mut s) => s.flush(),
            Socket::Unix(ref mut s) => s.flush()
        }
    }
}

/// A socket whose every read and write must finish by the deadline
///
/// The socket timeout is recomputed before each call, so a peer trickling
/// bytes cannot stretch the exchange past the deadline.
struct Stream {
    socket: Socket,
    deadline: Deadline
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.set_read_timeout(self.deadline.budget()?)?;
        self.socket.read(buf)
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.set_write_timeout(self.deadline.budget()?)?;
        self.socket.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.socket.flush()
    }
}

/// A connection to a FastCGI application server
///
/// Dropping it closes the socket.
pub struct Connection {
    stream: Stream
}

impl Connection {
    /// Connects to `target`; the returned connection must finish its work
    /// within `timeout` of this call.
    pub fn establish(target: &Target, timeout: Duration) -> Result<Connection> {
        let deadline = Deadline::after(timeout);

        let socket = match *target {
            Target::Tcp(ref addr) => Socket::Tcp(connect_tcp(addr, deadline)?),
            Target::Unix(ref path) => Socket::Unix(connect_unix(path, deadline)?)
        };

        Ok(Connection {
            stream: Stream { socket: socket, deadline: deadline }
        })
    }

    /// Runs one responder request to completion
    ///
    /// On a timeout the application is told to abort and the connection is
    /// shut down before `Error::Timeout` is returned.
    pub fn request<R: Read>(mut self, params: &Params, body: R)
                            -> Result<Output>
    {
        match self.exchange(params, body) {
            Err(Error::Timeout) => {
                self.abort();
                Err(Error::Timeout)
            },
            other => other
        }
    }

    fn exchange<R: Read>(&mut self, params: &Params, mut body: R)
                         -> Result<Output>
    {
        {
            let mut writer = BufWriter::new(&mut self.stream);
            start_request(&mut writer, REQUEST_ID, 0).map_err(backend)?;
            super::serializer::params(&mut writer, REQUEST_ID, params)
                .map_err(backend)?;
            writer.flush().map_err(|e| backend(Error::from(e)))?;
        }

        // Send any request body there might be
        let mut client_buffer = vec![0; 16 * 1024];
        loop {
            let read = match body.read(&mut client_buffer) {
                Ok(size) => size,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e))
            };
            if read == 0 {
                break;
            }

            stdin(&mut self.stream, REQUEST_ID, &client_buffer[.. read])
                .map_err(backend)?;
        }
        // Write the stream's sentinel marker
        stdin(&mut self.stream, REQUEST_ID, &[]).map_err(backend)?;

        self.collect()
    }

    /// Reads records until the application ends our request
    fn collect(&mut self) -> Result<Output> {
        let mut reader = BufReader::new(&mut self.stream);
        let mut output = Output::default();

        loop {
            let record = match read_record(&mut reader).map_err(backend)? {
                Some(r) => r,
                None => return Err(Error::ConnectionError(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "application closed the connection before END_REQUEST")))
            };

            if record.id != REQUEST_ID {
                debug!("Ignoring a record of kind {} for request {}",
                       record.kind(), record.id);
                continue;
            }

            match record.content {
                Content::Stdout(data) => output.stdout.extend(data),
                Content::Stderr(msg) => {
                    warn!("Error message from responder: \"{}\"",
                          ascii_escape(&msg));
                    output.stderr.extend(msg);
                },
                Content::EndRequest(EndRequest {
                    app_status, protocol_status
                }) => {
                    if protocol_status != protocol_status::REQUEST_COMPLETE {
                        return Err(Error::RequestIncomplete {
                            protocol_status: protocol_status,
                            app_status: app_status
                        });
                    }

                    if app_status != 0 {
                        warn!("Responder closed unsuccesfully with code {}",
                              app_status);
                    }

                    output.app_status = app_status;
                    return Ok(output);
                },
                other => debug!("Ignoring a record of kind {}", other.kind())
            }
        }
    }

    /// Best-effort ABORT_REQUEST followed by closing both directions
    fn abort(&mut self) {
        let socket = &mut self.stream.socket;
        let _ = socket.set_write_timeout(ABORT_GRACE);
        let _ = abort_request(&mut *socket, REQUEST_ID);
        let _ = socket.shutdown();
    }
}

fn connect_tcp(addr: &str, deadline: Deadline) -> Result<TcpStream> {
    let addrs = addr.to_socket_addrs().map_err(Error::ConnectionError)?;

    let mut last_error = io::Error::new(
        ErrorKind::NotFound, format!("{} resolved to no addresses", addr));
    for candidate in addrs {
        match TcpStream::connect_timeout(&candidate, deadline.remaining()?) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = e
        }
    }

    if timed_out(&last_error) {
        return Err(Error::Timeout);
    }
    Err(Error::ConnectionError(last_error))
}

/// Connects to a Unix socket by the deadline
///
/// A listener with a full accept queue refuses a non-blocking connect with
/// `EAGAIN`, so that case is retried until the deadline passes.
fn connect_unix(path: &Path, deadline: Deadline) -> Result<UnixStream> {
    let addr = SockAddr::unix(path).map_err(Error::ConnectionError)?;

    loop {
        let socket = Socket2::new(Domain::UNIX, Type::STREAM, None)
            .map_err(Error::ConnectionError)?;

        match socket.connect_timeout(&addr, deadline.remaining()?) {
            Ok(()) => return Ok(UnixStream::from(socket)),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock =>
                thread::sleep(CONNECT_RETRY.min(deadline.remaining()?)),
            Err(ref e) if timed_out(e) => return Err(Error::Timeout),
            Err(e) => return Err(Error::ConnectionError(e))
        }
    }
}

/// Sends one request to the application at `target` and collects its output
///
/// `timeout` bounds everything: connecting, writing the request and waiting
/// for END_REQUEST.
pub fn send<R: Read>(target: &Target, params: &Params, body: R,
                     timeout: Duration)
                     -> Result<Output>
{
    Connection::establish(target, timeout)?.request(params, body)
}

/// Asks the application for FCGI_MAX_CONNS, FCGI_MAX_REQS and
/// FCGI_MPXS_CONNS
pub fn probe(target: &Target, timeout: Duration) -> Result<Params> {
    let mut conn = Connection::establish(target, timeout)?;

    get_capabilities(&mut conn.stream).map_err(backend)?;

    loop {
        match read_record(&mut conn.stream).map_err(backend)? {
            Some(record) => match record.content {
                Content::GetValuesResult(values) => return Ok(values),
                other => debug!("Ignoring a record of kind {} while probing",
                                other.kind())
            },
            None => return Err(Error::ConnectionError(io::Error::new(
                ErrorKind::UnexpectedEof,
                "application closed the connection before answering")))
        }
    }
}
