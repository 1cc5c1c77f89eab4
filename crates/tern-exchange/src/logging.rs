//! Exchange logging trait for structured per-attempt events.
//!
//! The engine reports every send, timeout and outcome through an optional
//! [`ExchangeLogger`], so hosts can route them to `tracing`, collect them in
//! tests, or drop them.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Structured log entry for one exchange step. Borrows everything so that
/// logging an attempt never allocates.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeLog<'a> {
    pub component: &'static str,
    /// Token of the request being exchanged, empty when it could not be read.
    pub token: &'a [u8],
    pub event: ExchangeEvent<'a>,
}

/// Exchange events that can be logged.
#[derive(Debug, Clone, Copy)]
pub enum ExchangeEvent<'a> {
    /// Session bound and connected.
    SessionOpened {
        local: Option<SocketAddr>,
        remote: SocketAddr,
    },
    /// Request bytes handed to the transport.
    RequestSent { attempt: u32, bytes: usize },
    /// No reply within `waited`; the next attempt waits `next_timeout`.
    ReceiveTimedOut {
        attempt: u32,
        waited: Duration,
        next_timeout: Duration,
    },
    /// Reply bytes arrived.
    ResponseReceived { attempt: u32, bytes: usize },
    SendFailed { attempt: u32, error: &'a io::Error },
    ReceiveFailed { attempt: u32, error: &'a io::Error },
    MalformedResponse {
        bytes: usize,
        error: &'a (dyn std::error::Error + Send + Sync),
    },
    /// Every attempt timed out.
    RetriesExhausted { attempts: u32 },
    SessionClosed,
}

impl fmt::Display for ExchangeEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionOpened { local, remote } => match local {
                Some(local) => write!(f, "session_opened local={} remote={}", local, remote),
                None => write!(f, "session_opened remote={}", remote),
            },
            Self::RequestSent { attempt, bytes } => {
                write!(f, "request_sent attempt={} bytes={}", attempt, bytes)
            }
            Self::ReceiveTimedOut { attempt, waited, next_timeout } => {
                write!(
                    f,
                    "receive_timed_out attempt={} waited_ms={} next_timeout_ms={}",
                    attempt,
                    waited.as_millis(),
                    next_timeout.as_millis()
                )
            }
            Self::ResponseReceived { attempt, bytes } => {
                write!(f, "response_received attempt={} bytes={}", attempt, bytes)
            }
            Self::SendFailed { attempt, error } => {
                write!(f, "send_failed attempt={}: {}", attempt, error)
            }
            Self::ReceiveFailed { attempt, error } => {
                write!(f, "receive_failed attempt={}: {}", attempt, error)
            }
            Self::MalformedResponse { bytes, error } => {
                write!(f, "malformed_response bytes={}: {}", bytes, error)
            }
            Self::RetriesExhausted { attempts } => {
                write!(f, "retries_exhausted attempts={}", attempts)
            }
            Self::SessionClosed => write!(f, "session_closed"),
        }
    }
}

/// Trait for exchange logging. Implementations can write to tracing,
/// collect entries, or discard them.
pub trait ExchangeLogger: Send + Sync {
    fn log(&self, entry: ExchangeLog<'_>);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl ExchangeLogger for TracingLogger {
    fn log(&self, entry: ExchangeLog<'_>) {
        // Lifecycle at info, per-attempt chatter at debug, failures at warn.
        // Fields are only evaluated when the level is enabled.
        match &entry.event {
            ExchangeEvent::SendFailed { .. }
            | ExchangeEvent::ReceiveFailed { .. }
            | ExchangeEvent::MalformedResponse { .. }
            | ExchangeEvent::RetriesExhausted { .. } => {
                tracing::warn!(
                    component = entry.component,
                    token = %hex::encode(entry.token),
                    "{}",
                    entry.event
                );
            }
            ExchangeEvent::SessionOpened { .. } | ExchangeEvent::ResponseReceived { .. } => {
                tracing::info!(
                    component = entry.component,
                    token = %hex::encode(entry.token),
                    "{}",
                    entry.event
                );
            }
            _ => {
                tracing::debug!(
                    component = entry.component,
                    token = %hex::encode(entry.token),
                    "{}",
                    entry.event
                );
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl ExchangeLogger for NullLogger {
    fn log(&self, _entry: ExchangeLog<'_>) {}
}
