//! An HTTP front for FastCGI applications.
//!
//! Call it like this:
//!
//!     fcgi-gateway -f config.toml
//!
//! The config file is in the [TOML format][toml] because it’s commonly used in
//! the Rust ecosystem. Here is an example:
//!
//! ```toml
//! [listen]
//! address = "0.0.0.0:9090"
//!
//! [fastcgi]
//! document_root = "/var/www"
//! backend = "unix:/run/php/php-fpm.sock"
//! timeout_secs = 30
//!
//! [gateway]
//! error_status_codes = false
//! ```
//!
//! This example also serves as the defaults if no config file is provided,
//! or any given key is not present. If a key is of the wrong type, the server
//! will bail, so don’t do that. `--addr`, `--docroot` and `--backend` override
//! whatever the file says.
//!
//! Every request, whatever its path, becomes one request to the FastCGI
//! application; its output goes back to the client as the response.
//!
//! [toml]: https://github.com/toml-lang/toml

#[macro_use] extern crate log;

mod cgi;
mod config;
mod errors;
mod fastcgi;
mod filesystem;
mod log_util;
mod server;

use config::Config;
use config::parser::{self, parse_file, Overrides};
use fastcgi::driver::probe;
use log_util::ascii_escape;
use server::serve;

use clap::{value_parser, Arg, Command};

use std::env;
use std::io::{stderr, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

const DEFAULT_CONFIG_FILE: &str = "/etc/fcgi-gateway/config.toml";

fn main() {
    let mut log_builder = env_logger::Builder::new();
    log_builder.filter_level(log::LevelFilter::Info);

    if let Ok(var) = env::var("GATEWAY_LOG") {
        log_builder.parse_filters(&var);
    }

    if let Err(e) = log_builder.try_init() {
        let _ = writeln!(stderr(),
                         "fcgi-gateway: Error when initializing logging: {}",
                         e);
        exit(1);
    }

    let matches = Command::new("fcgi-gateway")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Serves HTTP by forwarding every request to a FastCGI application")
        .arg(Arg::new("config_file")
             .short('f')
             .value_name("FILE")
             .value_parser(value_parser!(PathBuf))
             .help("The TOML file with server configuration"))
        .arg(Arg::new("addr")
             .long("addr")
             .value_name("ADDR")
             .help("Address to listen on, like 0.0.0.0:9090 or :9090"))
        .arg(Arg::new("docroot")
             .long("docroot")
             .value_name("DIR")
             .value_parser(value_parser!(PathBuf))
             .help("Document root as the FastCGI application sees it"))
        .arg(Arg::new("backend")
             .long("backend")
             .alias("socket")
             .value_name("TARGET")
             .help("FastCGI application: host:port, unix:/path or /path"))
        .get_matches();

    let mut config = match matches.get_one::<PathBuf>("config_file") {
        Some(file) => load(file),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() =>
            load(Path::new(DEFAULT_CONFIG_FILE)),
        None => Config::default()
    };

    let overrides = Overrides {
        address: matches.get_one::<String>("addr").cloned(),
        document_root: matches.get_one::<PathBuf>("docroot").cloned(),
        backend: matches.get_one::<String>("backend").cloned()
    };
    if let Err(e) = overrides.apply(&mut config) {
        error!("Error in command line: {}", e);
        exit(1);
    }

    match probe(&config.fcgi.backend, config.fcgi.timeout) {
        Ok(values) => {
            for pair in &values {
                info!("FastCGI application reports {} = {}",
                      ascii_escape(&pair.name), ascii_escape(&pair.value));
            }
        },
        Err(e) => warn!("Could not query the FastCGI application at {}: {}",
                        config.fcgi.backend, e)
    }

    info!("Starting server on {}", config.listen);
    if let Err(e) = serve(config) {
        error!("Server stopped: {}", e);
        exit(1);
    }
}

/// Reads the config file, or exits explaining why not
fn load(config_file: &Path) -> Config {
    match parse_file(config_file) {
        Ok(c) => c,
        Err(parser::Error::Io(e)) => {
            error!("Error opening config file {:?}: {}", config_file, e);
            exit(1);
        },
        Err(parser::Error::Parse(e)) => {
            error!("Config file {:?} error at line {} column {}: {}",
                   config_file, e.line, e.column, e.desc);
            exit(1);
        },
        Err(parser::Error::Validation(message)) => {
            error!("Error in config file: {}", message);
            exit(1);
        }
    }
}
