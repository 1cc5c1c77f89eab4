//! Transport session contract and its UDP implementation.
//!
//! The engine needs exactly three things from a transport: send a datagram,
//! wait a bounded time for one, and release the session. Everything else
//! (socket options, address families, cancellation) stays behind
//! [`Transport::open`].

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

/// Longest single blocking read. A pending receive notices an out-of-band
/// close within this interval.
const RECV_POLL_SLICE: Duration = Duration::from_millis(50);

/// Shortest wait a receive performs, even when asked for zero.
const MIN_RECV_WAIT: Duration = Duration::from_millis(1);

/// Outcome of a bounded receive that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// A datagram of this many bytes was written to the front of the buffer.
    Data(usize),
    /// The wait elapsed with nothing to read.
    Elapsed,
}

/// One open, connected datagram session.
pub trait Session {
    /// Send `bytes` as one datagram, returning bytes written.
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Wait up to `timeout` for one datagram and read it into `buf`.
    /// `buf` is left untouched unless `Data` is returned.
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Received>;

    /// Release the session. Idempotent; failures are swallowed.
    fn close(&mut self);

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Opens sessions toward a remote endpoint.
pub trait Transport {
    type Session: Session;

    /// Bind to `local` (or an ephemeral endpoint of the remote's family) and
    /// connect to `remote`.
    fn open(&mut self, local: Option<SocketAddr>, remote: SocketAddr) -> io::Result<Self::Session>;
}

/// Cancels the sessions opened through a [`UdpTransport`] from another
/// thread. A pending receive on a cancelled session fails with
/// `ConnectionAborted`; opening after cancellation fails with `Interrupted`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    sessions: Mutex<Vec<Arc<AtomicBool>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        for closed in self.inner.sessions.lock().iter() {
            closed.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    fn register(&self, closed: Arc<AtomicBool>) {
        let mut sessions = self.inner.sessions.lock();
        sessions.retain(|s| !s.load(Ordering::SeqCst));
        sessions.push(closed.clone());
        // Cancelled between the open check and now
        if self.is_cancelled() {
            closed.store(true, Ordering::SeqCst);
        }
    }
}

/// UDP transport backed by blocking `std` sockets created through socket2.
#[derive(Debug, Clone, Default)]
pub struct UdpTransport {
    cancel: Option<CancelToken>,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every session this transport opens with `token`.
    pub fn with_cancel(token: CancelToken) -> Self {
        Self {
            cancel: Some(token),
        }
    }
}

impl Transport for UdpTransport {
    type Session = UdpSession;

    fn open(&mut self, local: Option<SocketAddr>, remote: SocketAddr) -> io::Result<UdpSession> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "exchange cancelled"));
        }

        let socket = create_udp_socket(local, remote)?;
        let closed = Arc::new(AtomicBool::new(false));
        if let Some(token) = &self.cancel {
            token.register(closed.clone());
        }
        Ok(UdpSession {
            socket: Some(socket),
            closed,
        })
    }
}

/// Create a UDP socket of the remote's family, bound and connected.
/// Connecting makes the kernel drop datagrams from any other peer.
fn create_udp_socket(local: Option<SocketAddr>, remote: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(remote), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(false)?;
    let bind_addr = local.unwrap_or_else(|| unspecified(remote));
    socket.bind(&bind_addr.into())?;
    socket.connect(&remote.into())?;
    Ok(socket.into())
}

fn unspecified(remote: SocketAddr) -> SocketAddr {
    match remote {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

#[derive(Debug)]
pub struct UdpSession {
    socket: Option<UdpSocket>,
    closed: Arc<AtomicBool>,
}

impl UdpSession {
    fn socket(&self) -> io::Result<&UdpSocket> {
        match &self.socket {
            Some(socket) if !self.closed.load(Ordering::SeqCst) => Ok(socket),
            _ => Err(io::Error::new(io::ErrorKind::ConnectionAborted, "session closed")),
        }
    }
}

impl Session for UdpSession {
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.socket()?.send(bytes)
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Received> {
        // `None` when the deadline is past the clock's range: wait forever
        let deadline = Instant::now().checked_add(timeout.max(MIN_RECV_WAIT));
        loop {
            let socket = self.socket()?;
            let slice = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(Received::Elapsed);
                    }
                    remaining.min(RECV_POLL_SLICE)
                }
                None => RECV_POLL_SLICE,
            };
            socket.set_read_timeout(Some(slice))?;

            match socket.recv(buf) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "empty datagram"));
                }
                Ok(n) => return Ok(Received::Data(n)),
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.socket = None;
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}

impl Drop for UdpSession {
    fn drop(&mut self) {
        self.close();
    }
}
