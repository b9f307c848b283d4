use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{PoolError, Result};

/// One backend endpoint the pool can dial.
///
/// A node pairs the host name it was configured with and the socket address
/// that name resolved to. An optional port override replaces the resolved
/// port when dialing. Nodes are immutable once built; the pool compares and
/// hashes them to key its per-node bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node {
    host: String,
    addr: SocketAddr,
    port_override: Option<u16>,
}

impl Node {
    /// Creates a node from an already resolved address.
    pub fn new(host: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            host: host.into(),
            addr,
            port_override: None,
        }
    }

    /// Resolves a `host:port` string into a node.
    ///
    /// The first address returned by the system resolver is used.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidArgument` if the string cannot be parsed or
    /// resolves to no address at all.
    pub fn resolve(host_port: &str) -> Result<Self> {
        let addr = host_port
            .to_socket_addrs()
            .map_err(|e| {
                PoolError::InvalidArgument(format!("Invalid address '{}': {}", host_port, e))
            })?
            .next()
            .ok_or_else(|| {
                PoolError::InvalidArgument(format!("Address '{}' resolved to nothing", host_port))
            })?;

        let host = host_port
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(host_port)
            .trim_start_matches('[')
            .trim_end_matches(']');

        Ok(Self::new(host, addr))
    }

    /// Returns a copy of this node that dials `port` instead of the resolved port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port_override = Some(port);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port_override(&self) -> Option<u16> {
        self.port_override
    }

    /// The address a connection to this node should target.
    pub fn socket_addr(&self) -> SocketAddr {
        match self.port_override {
            Some(port) => SocketAddr::new(self.addr.ip(), port),
            None => self.addr,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.socket_addr())
    }
}
