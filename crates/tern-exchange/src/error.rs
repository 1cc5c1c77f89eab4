use std::fmt;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Linux errno values used as numeric indicators in diagnostics.
const EIO: i32 = 5;
const EBADMSG: i32 = 74;
const ETIMEDOUT: i32 = 110;

/// Every way a confirmable exchange can end without a response.
///
/// Only timeouts are retried, and only inside the engine; everything here is
/// final for the exchange that produced it.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The session could not be created, bound or connected. Nothing was sent.
    #[error("cannot open session to {remote}: {source}")]
    TransportOpen { remote: SocketAddr, source: io::Error },

    /// A local send failed or wrote nothing.
    #[error("send failed on attempt {attempt}: {source}")]
    Send { attempt: u32, source: io::Error },

    /// Receiving failed for a reason other than the timeout expiring.
    #[error("receive failed on attempt {attempt}: {source}")]
    Receive { attempt: u32, source: io::Error },

    /// The peer stayed silent for every attempt.
    #[error("maximum retries reached after {attempts} attempts")]
    TimeoutExhausted { attempts: u32 },

    /// The peer replied with bytes that do not decode as a message.
    #[error("malformed response: {0}")]
    MalformedResponse(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeErrorKind {
    TransportOpen,
    Send,
    Receive,
    TimeoutExhausted,
    MalformedResponse,
}

impl ExchangeErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::TransportOpen => "transport-open",
            Self::Send => "send",
            Self::Receive => "receive",
            Self::TimeoutExhausted => "timeout",
            Self::MalformedResponse => "malformed-response",
        }
    }
}

impl fmt::Display for ExchangeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ExchangeError {
    pub fn kind(&self) -> ExchangeErrorKind {
        match self {
            Self::TransportOpen { .. } => ExchangeErrorKind::TransportOpen,
            Self::Send { .. } => ExchangeErrorKind::Send,
            Self::Receive { .. } => ExchangeErrorKind::Receive,
            Self::TimeoutExhausted { .. } => ExchangeErrorKind::TimeoutExhausted,
            Self::MalformedResponse(_) => ExchangeErrorKind::MalformedResponse,
        }
    }

    /// Negative errno-style indicator: the OS error behind a transport
    /// failure when there is one, `-ETIMEDOUT` for exhaustion and
    /// `-EBADMSG` for an undecodable reply.
    pub fn code(&self) -> i32 {
        match self {
            Self::TransportOpen { source, .. }
            | Self::Send { source, .. }
            | Self::Receive { source, .. } => -source.raw_os_error().unwrap_or(EIO),
            Self::TimeoutExhausted { .. } => -ETIMEDOUT,
            Self::MalformedResponse(_) => -EBADMSG,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}={value:?} is not a valid value")]
    Invalid { key: &'static str, value: String },
}
