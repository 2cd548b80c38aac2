//! Management daemon addressing.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// Default management daemon port, used when a caller passes port 0.
pub const DEFAULT_MGMT_PORT: u16 = 24007;

/// Transport used to reach the management daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// TCP socket (`socket` or `tcp`).
    #[default]
    Socket,
    /// UNIX domain socket; the host is the socket path.
    Unix,
    /// RDMA verbs. Recognised but not supported by this build.
    Rdma,
}

impl TransportKind {
    /// Parses a transport type, treating `None` and `""` as the default socket.
    pub fn parse_optional(raw: Option<&str>) -> Result<Self> {
        match raw {
            None => Ok(TransportKind::Socket),
            Some(s) if s.trim().is_empty() => Ok(TransportKind::Socket),
            Some(s) => s.parse(),
        }
    }

    /// Name as written in volfiles.
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Socket => "socket",
            TransportKind::Unix => "unix",
            TransportKind::Rdma => "rdma",
        }
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "socket" | "tcp" => Ok(TransportKind::Socket),
            "unix" => Ok(TransportKind::Unix),
            "rdma" => Ok(TransportKind::Rdma),
            other => Err(TransportError::UnknownTransport(other.to_string())),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A management daemon endpoint: transport, host (or socket path) and port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Transport kind.
    #[serde(default)]
    pub transport: TransportKind,
    /// FQDN, IP address, or UNIX socket path.
    pub host: String,
    /// TCP port; unused for UNIX sockets.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_MGMT_PORT
}

impl Endpoint {
    /// Builds an endpoint, substituting the default port for 0.
    pub fn new(transport: TransportKind, host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(TransportError::InvalidEndpoint {
                reason: "management host cannot be empty".into(),
            });
        }
        let port = if port == 0 { DEFAULT_MGMT_PORT } else { port };
        Ok(Self {
            transport,
            host,
            port,
        })
    }

    /// `host:port` for TCP dialing.
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Socket path for UNIX transports.
    pub fn unix_path(&self) -> PathBuf {
        PathBuf::from(&self.host)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transport {
            TransportKind::Unix => write!(f, "unix://{}", self.host),
            kind => write!(f, "{}://{}", kind, self.socket_addr()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_transports() {
        assert_eq!("socket".parse::<TransportKind>().unwrap(), TransportKind::Socket);
        assert_eq!("TCP".parse::<TransportKind>().unwrap(), TransportKind::Socket);
        assert_eq!("unix".parse::<TransportKind>().unwrap(), TransportKind::Unix);
        assert_eq!("rdma".parse::<TransportKind>().unwrap(), TransportKind::Rdma);
    }

    #[test]
    fn test_parse_unknown_transport() {
        assert!(matches!(
            "infiniband".parse::<TransportKind>(),
            Err(TransportError::UnknownTransport(_))
        ));
    }

    #[test]
    fn test_missing_transport_defaults_to_socket() {
        assert_eq!(TransportKind::parse_optional(None).unwrap(), TransportKind::Socket);
        assert_eq!(TransportKind::parse_optional(Some("")).unwrap(), TransportKind::Socket);
    }

    #[test]
    fn test_port_zero_uses_default() {
        let ep = Endpoint::new(TransportKind::Socket, "localhost", 0).unwrap();
        assert_eq!(ep.port, DEFAULT_MGMT_PORT);
        assert_eq!(ep.socket_addr(), "localhost:24007");
    }

    #[test]
    fn test_ipv6_host_is_bracketed() {
        let ep = Endpoint::new(TransportKind::Socket, "::1", 24008).unwrap();
        assert_eq!(ep.socket_addr(), "[::1]:24008");
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(Endpoint::new(TransportKind::Socket, "  ", 24007).is_err());
    }

    #[test]
    fn test_display() {
        let tcp = Endpoint::new(TransportKind::Socket, "storage01", 24007).unwrap();
        assert_eq!(tcp.to_string(), "socket://storage01:24007");
        let unix = Endpoint::new(TransportKind::Unix, "/tmp/glusterd.socket", 0).unwrap();
        assert_eq!(unix.to_string(), "unix:///tmp/glusterd.socket");
    }
}
