use std::net::SocketAddr;

use tern_msg::Method;
use thiserror::Error;

use crate::endpoint::{self, EndpointError};

pub const USAGE: &str = "usage: tern <get|post|put|delete> <addr>[%iface] <port> <path> [data]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub method: Method,
    /// Port 0 means the configured default port.
    pub remote: SocketAddr,
    pub path: String,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgsError {
    #[error("{}", USAGE)]
    Usage,
    #[error("unknown method {0:?}")]
    UnknownMethod(String),
    #[error("unable to parse destination port {0:?}")]
    BadPort(String),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

/// Parse the arguments after the program name.
pub fn parse(args: &[String]) -> Result<Invocation, ArgsError> {
    let [method, addr, port, path, rest @ ..] = args else {
        return Err(ArgsError::Usage);
    };
    let data = match rest {
        [] => None,
        [data] => Some(data.clone()),
        _ => return Err(ArgsError::Usage),
    };

    let method: Method = method
        .parse()
        .map_err(|_| ArgsError::UnknownMethod(method.clone()))?;
    let port: u16 = port.parse().map_err(|_| ArgsError::BadPort(port.clone()))?;
    let remote = endpoint::resolve(addr, port)?;

    Ok(Invocation {
        method,
        remote,
        path: path.clone(),
        data,
    })
}
