//! Manager addresses.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use rustls::pki_types::ServerName;

use crate::TransportError;

/// Server name presented in the TLS handshake when dialling a Unix socket.
pub const UNIX_SERVER_NAME: &str = "localhost";

/// Where the manager listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// `tcp://host:port`
    Tcp {
        /// Host name or IP literal.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// `unix:///path/to/socket`
    Unix(PathBuf),
}

impl Target {
    /// Name the TLS handshake is performed against.
    ///
    /// Peer names are not enforced (see [`crate::tls`]), but rustls still
    /// requires one for SNI.
    pub fn server_name(&self) -> Result<ServerName<'static>, TransportError> {
        let host = match self {
            Target::Tcp { host, .. } => host.trim_start_matches('[').trim_end_matches(']'),
            Target::Unix(_) => UNIX_SERVER_NAME,
        };
        ServerName::try_from(host.to_string()).map_err(|err| TransportError::InvalidTarget {
            target: self.to_string(),
            reason: err.to_string(),
        })
    }
}

impl FromStr for Target {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| TransportError::InvalidTarget {
            target: s.to_string(),
            reason: reason.to_string(),
        };

        if let Some(path) = s.strip_prefix("unix://") {
            if !path.starts_with('/') {
                return Err(invalid("unix socket path must be absolute"));
            }
            return Ok(Target::Unix(PathBuf::from(path)));
        }

        let Some(authority) = s.strip_prefix("tcp://") else {
            return Err(invalid("expected a tcp:// or unix:// URL"));
        };
        let authority = authority.trim_end_matches('/');
        let Some((host, port)) = authority.rsplit_once(':') else {
            return Err(invalid("missing port"));
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = port.parse::<u16>().map_err(|_| invalid("port is not a number"))?;
        Ok(Target::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Target::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}
