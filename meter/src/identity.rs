use serde::Serialize;
use std::borrow::Borrow;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Host part of a peer address, used as the accounting key.
///
/// Connections from the same host share one identity regardless of the
/// source port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn from_ip(ip: IpAddr) -> Self {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
            v4 => v4,
        };
        Self(ip.to_string())
    }

    pub fn from_socket_addr(addr: &SocketAddr) -> Self {
        Self::from_ip(addr.ip())
    }

    /// Derives an identity from `host:port`, `[v6]:port` or a bare host.
    ///
    /// Never fails: input that does not look like an address is kept as is.
    pub fn parse(addr: &str) -> Self {
        let addr = addr.trim();
        if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
            return Self::from_socket_addr(&socket_addr);
        }
        if let Ok(ip) = addr.parse::<IpAddr>() {
            return Self::from_ip(ip);
        }
        if let Some(rest) = addr.strip_prefix('[')
            && let Some(end) = rest.find(']')
        {
            return Self(rest[..end].to_string());
        }
        match addr.rsplit_once(':') {
            Some((host, port))
                if !host.is_empty() && !host.contains([':', '[']) && port.parse::<u16>().is_ok() =>
            {
                Self(host.to_string())
            }
            _ => Self(addr.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for ClientIdentity {
    fn from(addr: SocketAddr) -> Self {
        Self::from_socket_addr(&addr)
    }
}

impl Borrow<str> for ClientIdentity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
