use super::*;
use toml::{Table, Value};

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::net::ToSocketAddrs;
use std::path::Path;

pub fn parse_file<P: AsRef<Path>>(conf: P) -> Result<Config, Error> {
    let mut toml = String::new();
    {
        let mut f = File::open(conf)?;
        f.read_to_string(&mut toml)?;
    }

    parse_str(&toml)
}

pub fn parse_str(toml: &str) -> Result<Config, Error> {
    match toml.parse::<Table>() {
        Ok(table) => config_from_table(&table),
        Err(e) => Err(Error::Parse(message_from_error(toml, &e)))
    }
}

/// Finds a dotted key like `"fastcgi.backend"`
fn lookup<'a>(table: &'a Table, path: &str) -> Option<&'a Value> {
    let mut keys = path.split('.');
    let mut value = table.get(keys.next()?)?;

    for key in keys {
        value = value.as_table()?.get(key)?;
    }

    Some(value)
}

fn config_from_table(table: &Table) -> Result<Config, Error> {
    let mut config: Config = Default::default();

    match lookup(table, "listen.address") {
        Some(&Value::String(ref addr)) =>
            config.listen = parse_address(addr)?,
        Some(val) => return Err(Error::Validation(
            format!("Expected the listen address to be a string, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    match lookup(table, "fastcgi.document_root") {
        Some(&Value::String(ref path)) =>
            config.fcgi.document_root = PathBuf::from(path),
        Some(val) => return Err(Error::Validation(
            format!("Expected the document root to be a string, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    match lookup(table, "fastcgi.backend") {
        Some(&Value::String(ref target)) =>
            config.fcgi.backend = parse_backend(target)?,
        Some(val) => return Err(Error::Validation(
            format!("Expected the FastCGI backend to be a string, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    match lookup(table, "fastcgi.timeout_secs") {
        Some(&Value::Integer(secs)) if secs > 0 =>
            config.fcgi.timeout = Duration::from_secs(secs as u64),
        Some(&Value::Integer(secs)) => return Err(Error::Validation(
            format!("The FastCGI timeout {} is out of range", secs)
        )),
        Some(val) => return Err(Error::Validation(
            format!("Expected the FastCGI timeout to be an integer, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    match lookup(table, "gateway.error_status_codes") {
        Some(&Value::Boolean(on)) => config.gateway.error_status_codes = on,
        Some(val) => return Err(Error::Validation(
            format!("Expected error_status_codes to be a boolean, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    Ok(config)
}

/// Accepts `host:port`, or `:port` for every interface
pub fn parse_address(addr: &str) -> Result<SocketAddr, Error> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        String::from(addr)
    };

    let mut addrs = full.to_socket_addrs().map_err(|e| Error::Validation(
        format!("Cannot listen on {:?}: {}", addr, e)
    ))?;

    addrs.next().ok_or_else(|| Error::Validation(
        format!("The listen address {:?} resolves to nothing", addr)
    ))
}

pub fn parse_backend(target: &str) -> Result<Target, Error> {
    target.parse().map_err(|why| Error::Validation(
        format!("Bad FastCGI backend: {}", why)
    ))
}

/// Settings given on the command line, which win over the file
#[derive(Debug, Default)]
pub struct Overrides {
    pub address: Option<String>,
    pub document_root: Option<PathBuf>,
    pub backend: Option<String>
}

impl Overrides {
    pub fn apply(self, config: &mut Config) -> Result<(), Error> {
        if let Some(addr) = self.address {
            config.listen = parse_address(&addr)?;
        }
        if let Some(root) = self.document_root {
            config.fcgi.document_root = root;
        }
        if let Some(target) = self.backend {
            config.fcgi.backend = parse_backend(&target)?;
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Parse(ErrorMessage),
    Validation(String)
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Io(ref e) => write!(f, "{}", e),
            Error::Parse(ref m) =>
                write!(f, "line {} column {}: {}", m.line, m.column, m.desc),
            Error::Validation(ref message) => write!(f, "{}", message)
        }
    }
}

/// An owned, rendered version of a TOML syntax error
#[derive(Debug, Clone)]
pub struct ErrorMessage {
    pub desc: String,
    pub line: usize,
    pub column: usize
}

/// Convert a `toml::de::Error` into an `ErrorMessage`
///
/// Lines and columns count from 1.
fn message_from_error(toml: &str, error: &toml::de::Error) -> ErrorMessage {
    let offset = error.span().map_or(0, |span| span.start).min(toml.len());
    let before = &toml.as_bytes()[.. offset];

    let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
    let column = match before.iter().rposition(|&b| b == b'\n') {
        Some(newline) => offset - newline,
        None => offset + 1
    };

    ErrorMessage {
        desc: String::from(error.message()),
        line: line,
        column: column
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse_str("").unwrap();

        assert_eq!(config.listen, "0.0.0.0:9090".parse::<SocketAddr>().unwrap());
        assert_eq!(config.fcgi.document_root, PathBuf::from("/var/www"));
        assert_eq!(config.fcgi.backend,
                   Target::Unix(PathBuf::from("/run/php/php-fpm.sock")));
        assert_eq!(config.fcgi.timeout, Duration::from_secs(30));
        assert!(!config.gateway.error_status_codes);
    }

    #[test]
    fn full_file() {
        let config = parse_str(r#"
            [listen]
            address = "127.0.0.1:8080"

            [fastcgi]
            document_root = "/srv/www"
            backend = "127.0.0.1:9000"
            timeout_secs = 5

            [gateway]
            error_status_codes = true
        "#).unwrap();

        assert_eq!(config.listen, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.fcgi.document_root, PathBuf::from("/srv/www"));
        assert_eq!(config.fcgi.backend,
                   Target::Tcp(String::from("127.0.0.1:9000")));
        assert_eq!(config.fcgi.timeout, Duration::from_secs(5));
        assert!(config.gateway.error_status_codes);
    }

    #[test]
    fn port_only_address_listens_everywhere() {
        assert_eq!(parse_address(":9091").unwrap(),
                   "0.0.0.0:9091".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn wrong_types_are_rejected() {
        match parse_str("[fastcgi]\ntimeout_secs = \"soon\"\n") {
            Err(Error::Validation(_)) => (),
            other => panic!("{:?}", other)
        }
        match parse_str("[listen]\naddress = 9090\n") {
            Err(Error::Validation(_)) => (),
            other => panic!("{:?}", other)
        }
        match parse_str("[fastcgi]\ntimeout_secs = 0\n") {
            Err(Error::Validation(_)) => (),
            other => panic!("{:?}", other)
        }
        match parse_str("[fastcgi]\nbackend = \"nowhere\"\n") {
            Err(Error::Validation(_)) => (),
            other => panic!("{:?}", other)
        }
    }

    #[test]
    fn syntax_errors_carry_a_position() {
        match parse_str("[listen]\naddress = \n") {
            Err(Error::Parse(message)) => {
                assert!(message.line >= 2);
                assert!(message.column >= 1);
            },
            other => panic!("{:?}", other)
        }
    }

    #[test]
    fn overrides_win() {
        let mut config = parse_str("[fastcgi]\nbackend = \"127.0.0.1:9000\"\n")
            .unwrap();

        Overrides {
            address: Some(String::from(":8000")),
            document_root: Some(PathBuf::from("/tmp/site")),
            backend: Some(String::from("unix:/tmp/fpm.sock"))
        }.apply(&mut config).unwrap();

        assert_eq!(config.listen, "0.0.0.0:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.fcgi.document_root, PathBuf::from("/tmp/site"));
        assert_eq!(config.fcgi.backend,
                   Target::Unix(PathBuf::from("/tmp/fpm.sock")));
    }
}
