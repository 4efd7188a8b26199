pub mod parser;

use crate::fastcgi::driver::Target;

use std::net::{SocketAddr, IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// A holder for app configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to accept HTTP connections on
    pub listen: SocketAddr,
    pub fcgi: FastCgiConfig,
    pub gateway: GatewayConfig
}

impl Default for Config {
    fn default() -> Config {
        Config {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9090),
            fcgi: Default::default(),
            gateway: Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct FastCgiConfig {
    /// Where the scripts are located on the application's disk
    pub document_root: PathBuf,
    pub backend: Target,
    /// Budget for one whole FastCGI exchange
    pub timeout: Duration
}

impl Default for FastCgiConfig {
    fn default() -> FastCgiConfig {
        FastCgiConfig {
            document_root: PathBuf::from("/var/www"),
            backend: Target::Unix(PathBuf::from("/run/php/php-fpm.sock")),
            timeout: Duration::from_secs(30)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Answer backend failures with 502/504 instead of 200
    pub error_status_codes: bool
}
