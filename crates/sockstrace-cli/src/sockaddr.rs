//! Decoding the `sockaddr` a connect call points at.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// Largest sockaddr worth reading (`sizeof(struct sockaddr_storage)`).
pub const MAX_LEN: usize = 128;

/// Where a connect call is headed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Inet(SocketAddr),
    /// Filesystem path, or `@name` for the abstract namespace.
    Unix(String),
    /// Unnamed unix socket (autobind).
    UnixUnnamed,
    Other(u16),
}

impl Destination {
    /// Decode raw sockaddr bytes. `None` if too short for its family.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let family = u16::from_ne_bytes(bytes.get(0..2)?.try_into().ok()?);
        match i32::from(family) {
            libc::AF_INET => {
                let port = u16::from_be_bytes(bytes.get(2..4)?.try_into().ok()?);
                let ip: [u8; 4] = bytes.get(4..8)?.try_into().ok()?;
                Some(Self::Inet(SocketAddr::V4(SocketAddrV4::new(
                    Ipv4Addr::from(ip),
                    port,
                ))))
            }
            libc::AF_INET6 => {
                let port = u16::from_be_bytes(bytes.get(2..4)?.try_into().ok()?);
                let flowinfo = u32::from_be_bytes(bytes.get(4..8)?.try_into().ok()?);
                let ip: [u8; 16] = bytes.get(8..24)?.try_into().ok()?;
                let scope_id = bytes
                    .get(24..28)
                    .and_then(|b| b.try_into().ok())
                    .map_or(0, u32::from_ne_bytes);
                Some(Self::Inet(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(ip),
                    port,
                    flowinfo,
                    scope_id,
                ))))
            }
            libc::AF_UNIX => {
                let path = &bytes[2..];
                match path.first() {
                    None => Some(Self::UnixUnnamed),
                    Some(0) => Some(Self::Unix(format!(
                        "@{}",
                        String::from_utf8_lossy(&path[1..])
                    ))),
                    Some(_) => {
                        let end = path.iter().position(|&b| b == 0).unwrap_or(path.len());
                        Some(Self::Unix(
                            String::from_utf8_lossy(&path[..end]).into_owned(),
                        ))
                    }
                }
            }
            _ => Some(Self::Other(family)),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet(addr) => write!(f, "{addr}"),
            Self::Unix(path) => write!(f, "unix:{path}"),
            Self::UnixUnnamed => f.write_str("unix:(unnamed)"),
            Self::Other(family) => write!(f, "family {family}"),
        }
    }
}
