//! Turns one HTTP request into one FastCGI request and back

use crate::cgi::environment;
use crate::cgi::parser::document;
use crate::config::Config;
use crate::errors::Error;
use crate::fastcgi::driver::{self, Output};
use crate::log_util::ascii_escape;
use crate::server::{Handler, Request, Response};

use std::io::{self, Read, Write};

/// Fields the application may not dictate, since we frame the response
const FRAMING_HEADERS: [&str; 3] = ["Content-Length", "Connection",
                                    "Transfer-Encoding"];

/// Forwards requests to the configured FastCGI application
pub struct Gateway {
    config: Config
}

impl Gateway {
    pub fn new(config: Config) -> Gateway {
        Gateway {
            config: config
        }
    }

    /// Runs the request against the application and writes what came of it
    pub fn forward<R: Read, W: Write>(&self, mut req: Request<R>,
                                      res: Response<W>)
                                      -> io::Result<()>
    {
        let fcgi = &self.config.fcgi;
        let params = environment::build(&fcgi.document_root, &req.head);

        debug!("{} {} -> {}", req.head.method, req.head.target, fcgi.backend);

        match driver::send(&fcgi.backend, &params, &mut req, fcgi.timeout) {
            Ok(output) => relay(output, res),
            Err(e) => {
                error!("{} {} failed: {}", req.head.method, req.head.target, e);
                self.report(e, res)
            }
        }
    }

    /// Writes an error as the response
    ///
    /// The body is the error's description; the status stays 200 unless
    /// status codes for errors were asked for.
    fn report<W: Write>(&self, e: Error, mut res: Response<W>)
                        -> io::Result<()>
    {
        if self.config.gateway.error_status_codes && e.is_backend() {
            match e {
                Error::Timeout =>
                    res.set_status(504, String::from("Gateway Timeout")),
                _ => res.set_status(502, String::from("Bad Gateway"))
            }
        }

        res.headers_mut().set("Content-Type",
                              Vec::from(&b"text/plain; charset=utf-8"[..]));
        res.send(e.to_string().as_bytes())
    }
}

/// Writes the application's CGI document as an HTTP response
///
/// A document whose header block does not parse goes out verbatim.
fn relay<W: Write>(output: Output, mut res: Response<W>) -> io::Result<()> {
    if output.app_status != 0 {
        warn!("Application exited with status {}", output.app_status);
    }

    let (body, doc) = match document(&output.stdout) {
        Ok(parsed) => parsed,
        Err(_) => {
            debug!("Passing through a document without headers: {}",
                   ascii_escape(&output.stdout[.. output.stdout.len().min(64)]));
            return res.send(&output.stdout);
        }
    };

    let (code, reason) = doc.http_status();
    res.set_status(code, reason);

    for field in &doc.headers {
        let name = String::from_utf8_lossy(&field.name);
        if FRAMING_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        res.headers_mut().append(&name, field.content.clone());
    }

    res.send(body)
}

impl Handler for Gateway {
    fn serve(&self, req: Request, res: Response) {
        if let Err(e) = self.forward(req, res) {
            warn!("Could not answer the client: {}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::fastcgi::{Content, EndRequest, Record, protocol_status};
    use crate::fastcgi::driver::{Target, REQUEST_ID};
    use crate::fastcgi::parser::{name_value_pairs, read_record};
    use crate::fastcgi::serializer::write_record;

    use std::net::{TcpListener, TcpStream};
    use std::path::PathBuf;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    /// An application that answers one request with `stdout`, and hands back
    /// the PARAMS and STDIN it received
    fn stub(stdout: &'static [u8]) -> (Target, JoinHandle<(Vec<u8>, Vec<u8>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let target = Target::Tcp(listener.local_addr().unwrap().to_string());

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let (mut params, mut stdin) = (Vec::new(), Vec::new());

            loop {
                match read_record(&mut stream).unwrap().unwrap().content {
                    Content::Params(bytes) => params.extend(bytes),
                    Content::Stdin(ref bytes) if bytes.is_empty() => break,
                    Content::Stdin(bytes) => stdin.extend(bytes),
                    _ => ()
                }
            }

            reply(&mut stream, Content::Stdout(Vec::from(stdout)));
            reply(&mut stream, Content::EndRequest(EndRequest {
                app_status: 0,
                protocol_status: protocol_status::REQUEST_COMPLETE
            }));

            (params, stdin)
        });

        (target, handle)
    }

    fn reply(stream: &mut TcpStream, content: Content) {
        write_record(&mut *stream, &Record { id: REQUEST_ID, content: content })
            .unwrap();
    }

    fn gateway(target: Target, error_status_codes: bool) -> Gateway {
        let mut config = Config::default();
        config.fcgi.document_root = PathBuf::from("/srv/www");
        config.fcgi.backend = target;
        config.fcgi.timeout = Duration::from_secs(5);
        config.gateway.error_status_codes = error_status_codes;

        Gateway::new(config)
    }

    fn exchange(gateway: &Gateway, raw: &[u8]) -> String {
        let req = Request::parse(raw, String::from("127.0.0.1:40000"), false)
            .unwrap();
        let mut out = Vec::new();
        gateway.forward(req, Response::new(&mut out)).unwrap();

        String::from_utf8(out).unwrap()
    }

    #[test]
    fn forwards_a_php_response() {
        let (target, app) = stub(b"X-Powered-By: PHP\r\nContent-type: text/html\r\n\r\n<p>hi</p>");
        let gateway = gateway(target, false);

        let response = exchange(&gateway, b"GET /index.php?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let (params, stdin) = app.join().unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("X-Powered-By: PHP\r\n"));
        assert!(response.contains("Content-Type: text/html\r\n"));
        assert!(response.contains("Content-Length: 9\r\n"));
        assert!(response.ends_with("\r\n\r\n<p>hi</p>"));

        let params = name_value_pairs(&params).unwrap();
        assert_eq!(params.get("SCRIPT_FILENAME"), Some(&b"/srv/www/index.php"[..]));
        assert_eq!(params.get("QUERY_STRING"), Some(&b"x=1"[..]));
        assert!(stdin.is_empty());
    }

    #[test]
    fn request_body_goes_to_stdin() {
        let (target, app) = stub(b"Content-type: text/plain\r\n\r\nok");
        let gateway = gateway(target, false);

        exchange(&gateway, b"POST /form.php HTTP/1.1\r\nHost: h\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 7\r\n\r\nname=me");
        let (params, stdin) = app.join().unwrap();

        assert_eq!(stdin, b"name=me");
        let params = name_value_pairs(&params).unwrap();
        assert_eq!(params.get("CONTENT_LENGTH"), Some(&b"7"[..]));
        assert_eq!(params.get("REQUEST_METHOD"), Some(&b"POST"[..]));
    }

    #[test]
    fn status_header_sets_the_code() {
        let (target, app) = stub(b"Status: 404 Not Found\r\nContent-Length: 999\r\n\r\nnope");
        let gateway = gateway(target, false);

        let response = exchange(&gateway, b"GET /missing.php HTTP/1.1\r\n\r\n");
        app.join().unwrap();

        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(!response.contains("Status:"));
        assert!(!response.contains("999"));
        assert!(response.contains("Content-Length: 4\r\n"));
    }

    #[test]
    fn location_alone_redirects() {
        let (target, app) = stub(b"Location: /login.php\r\n\r\n");
        let gateway = gateway(target, false);

        let response = exchange(&gateway, b"GET /admin.php HTTP/1.1\r\n\r\n");
        app.join().unwrap();

        assert!(response.starts_with("HTTP/1.1 302 Found\r\n"));
        assert!(response.contains("Location: /login.php\r\n"));
    }

    #[test]
    fn headerless_output_passes_through() {
        let (target, app) = stub(b"Hello");
        let gateway = gateway(target, false);

        let response = exchange(&gateway, b"GET /hello.php HTTP/1.1\r\n\r\n");
        app.join().unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("\r\n\r\nHello"));
    }

    fn unreachable_target() -> Target {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let target = Target::Tcp(listener.local_addr().unwrap().to_string());
        drop(listener);
        target
    }

    #[test]
    fn errors_are_reported_in_the_body() {
        let gateway = gateway(unreachable_target(), false);

        let response = exchange(&gateway, b"GET /index.php HTTP/1.1\r\n\r\n");

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("FastCGI connection error"));
    }

    #[test]
    fn errors_can_map_to_status_codes() {
        let gateway = gateway(unreachable_target(), true);

        let response = exchange(&gateway, b"GET /index.php HTTP/1.1\r\n\r\n");

        assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
    }

    #[test]
    fn timeouts_map_to_504() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let target = Target::Tcp(listener.local_addr().unwrap().to_string());
        let app = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink);
        });

        let mut gateway = gateway(target, true);
        gateway.config.fcgi.timeout = Duration::from_millis(200);

        let response = exchange(&gateway, b"GET /slow.php HTTP/1.1\r\n\r\n");
        app.join().unwrap();

        assert!(response.starts_with("HTTP/1.1 504 Gateway Timeout\r\n"));
    }
}
