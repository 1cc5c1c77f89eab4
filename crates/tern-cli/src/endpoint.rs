//! Destination address parsing: `<addr>[%iface]` plus a port.

use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("unable to parse destination address {0:?}")]
    BadAddress(String),
    #[error("unable to parse interface {0:?}, expected a numeric index")]
    BadInterface(String),
    #[error("must specify interface for link local target")]
    LinkLocalWithoutInterface,
    #[error("interfaces only apply to IPv6 targets")]
    InterfaceOnIpv4,
}

/// Resolve `addr` (optionally `%`-suffixed with an interface index) and
/// `port` into a socket address. Port 0 is kept as is.
pub fn resolve(addr: &str, port: u16) -> Result<SocketAddr, EndpointError> {
    let (host, iface) = match addr.split_once('%') {
        Some((host, iface)) => (host, Some(iface)),
        None => (addr, None),
    };
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let ip: IpAddr = host
        .parse()
        .map_err(|_| EndpointError::BadAddress(host.to_string()))?;

    match ip {
        IpAddr::V4(ip) => {
            if iface.is_some() {
                return Err(EndpointError::InterfaceOnIpv4);
            }
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        IpAddr::V6(ip) => {
            let scope_id = match iface {
                Some(iface) => iface
                    .parse::<u32>()
                    .map_err(|_| EndpointError::BadInterface(iface.to_string()))?,
                None if is_unicast_link_local(&ip) => {
                    return Err(EndpointError::LinkLocalWithoutInterface);
                }
                None => 0,
            };
            Ok(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, scope_id)))
        }
    }
}

/// fe80::/10
fn is_unicast_link_local(ip: &Ipv6Addr) -> bool {
    ip.segments()[0] & 0xffc0 == 0xfe80
}
