//! Confirmable CoAP exchanges over UDP.
//!
//! An [`Exchange`] sends one encoded request, retransmits it with
//! exponential backoff while the peer stays silent, and decodes the first
//! reply in the caller's buffer. Failures are reported as an
//! [`ExchangeError`] of one of five kinds.
//!
//! ```no_run
//! use tern_exchange::{request, ExchangeConfig};
//! use tern_msg::{Method, PacketBuf, RequestBuilder};
//!
//! let mut buf = PacketBuf::with_capacity(128);
//! RequestBuilder::new(Method::Get, 0x1234, &[0xDA, 0xEC])
//!     .uri_path("/riot/board")
//!     .encode(&mut buf)?;
//! let response = request(&mut buf, "[::1]:5683".parse()?, ExchangeConfig::default())?;
//! println!("{} {:?}", response.code(), response.payload());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod spawn;
pub mod transport;

pub use config::ExchangeConfig;
pub use engine::{CoapCodec, Exchange, ResponseCodec, request};
pub use error::{ConfigError, ExchangeError, ExchangeErrorKind};
pub use logging::{ExchangeEvent, ExchangeLog, ExchangeLogger, NullLogger, TracingLogger};
pub use spawn::{ExchangeHandle, WorkerPanicked, spawn_exchange};
pub use transport::{CancelToken, Received, Session, Transport, UdpSession, UdpTransport};
