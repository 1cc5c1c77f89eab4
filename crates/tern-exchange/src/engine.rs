//! Confirmable request engine.
//!
//! One call to [`Exchange::execute`] owns one session: it sends the request
//! held in the caller's buffer, waits for a reply with a timeout that doubles
//! after every silent attempt, and decodes the first datagram that arrives in
//! place in the same buffer.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tern_msg::{HEADER_SIZE, MAX_TOKEN_LEN, Message, PacketBuf, ParseError};

use crate::config::ExchangeConfig;
use crate::error::ExchangeError;
use crate::logging::{ExchangeEvent, ExchangeLog, ExchangeLogger, TracingLogger};
use crate::transport::{Received, Session, Transport, UdpTransport};

const COMPONENT: &str = "exchange";

/// Turns received bytes into a response that borrows them.
pub trait ResponseCodec {
    type Response<'a>;
    type Error: std::error::Error + Send + Sync + 'static;

    fn decode<'a>(&self, bytes: &'a [u8]) -> Result<Self::Response<'a>, Self::Error>;
}

/// Decodes replies as CoAP messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoapCodec;

impl ResponseCodec for CoapCodec {
    type Response<'a> = Message<'a>;
    type Error = ParseError;

    fn decode<'a>(&self, bytes: &'a [u8]) -> Result<Message<'a>, ParseError> {
        Message::parse(bytes)
    }
}

/// Runs confirmable exchanges over a transport. Holds no state between
/// calls, so one value can serve any number of sequential exchanges.
pub struct Exchange<T, C = CoapCodec> {
    transport: T,
    codec: C,
    config: ExchangeConfig,
    logger: Option<Arc<dyn ExchangeLogger>>,
}

impl<T: Transport, C: ResponseCodec> Exchange<T, C> {
    pub fn new(transport: T, codec: C, config: ExchangeConfig) -> Self {
        Self {
            transport,
            codec,
            config,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn ExchangeLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Send the request in `buf[..len]` to `remote` and wait for the reply.
    ///
    /// A remote port of 0 is replaced with the configured default port. On
    /// success the reply occupies `buf[..len]` and the returned response
    /// borrows it; on failure the buffer contents are unspecified.
    pub fn execute<'b>(
        &mut self,
        buf: &'b mut PacketBuf,
        local: Option<SocketAddr>,
        mut remote: SocketAddr,
    ) -> Result<C::Response<'b>, ExchangeError> {
        if remote.port() == 0 {
            remote.set_port(self.config.default_port);
        }
        let held = RequestToken::read(buf.as_slice());
        let token = held.as_slice();

        let mut session = self
            .transport
            .open(local, remote)
            .map_err(|source| ExchangeError::TransportOpen { remote, source })?;
        self.log(
            token,
            ExchangeEvent::SessionOpened {
                local: session.local_addr(),
                remote,
            },
        );

        let outcome = self.run_attempts(&mut session, buf, token);
        session.close();
        self.log(token, ExchangeEvent::SessionClosed);
        let (attempt, len) = outcome?;

        buf.set_len(len).map_err(|e| ExchangeError::Receive {
            attempt,
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;

        let buf: &'b PacketBuf = buf;
        match self.codec.decode(buf.as_slice()) {
            Ok(response) => Ok(response),
            Err(e) => {
                self.log(
                    token,
                    ExchangeEvent::MalformedResponse {
                        bytes: len,
                        error: &e,
                    },
                );
                Err(ExchangeError::MalformedResponse(Box::new(e)))
            }
        }
    }

    /// Send/receive loop. Returns the attempt that got a reply and the reply
    /// length; the session is left open for the caller to close.
    fn run_attempts(
        &self,
        session: &mut T::Session,
        buf: &mut PacketBuf,
        token: &[u8],
    ) -> Result<(u32, usize), ExchangeError> {
        let attempts = self.config.attempts();

        for attempt in 1..=attempts {
            let timeout = self.config.timeout_for(attempt);
            match session.send(buf.as_slice()) {
                Ok(0) => {
                    let source = io::Error::from(io::ErrorKind::WriteZero);
                    return Err(self.send_failed(token, attempt, source));
                }
                Ok(bytes) => self.log(token, ExchangeEvent::RequestSent { attempt, bytes }),
                Err(source) => return Err(self.send_failed(token, attempt, source)),
            }

            match session.recv(buf.storage_mut(), timeout) {
                Ok(Received::Data(bytes)) => {
                    self.log(token, ExchangeEvent::ResponseReceived { attempt, bytes });
                    return Ok((attempt, bytes));
                }
                Ok(Received::Elapsed) => {
                    self.log(
                        token,
                        ExchangeEvent::ReceiveTimedOut {
                            attempt,
                            waited: timeout,
                            next_timeout: self.config.timeout_for(attempt.saturating_add(1)),
                        },
                    );
                }
                Err(source) => {
                    self.log(
                        token,
                        ExchangeEvent::ReceiveFailed {
                            attempt,
                            error: &source,
                        },
                    );
                    return Err(ExchangeError::Receive { attempt, source });
                }
            }
        }

        self.log(token, ExchangeEvent::RetriesExhausted { attempts });
        Err(ExchangeError::TimeoutExhausted { attempts })
    }

    fn send_failed(&self, token: &[u8], attempt: u32, source: io::Error) -> ExchangeError {
        self.log(
            token,
            ExchangeEvent::SendFailed {
                attempt,
                error: &source,
            },
        );
        ExchangeError::Send { attempt, source }
    }

    fn log(&self, token: &[u8], event: ExchangeEvent<'_>) {
        if let Some(logger) = &self.logger {
            logger.log(ExchangeLog {
                component: COMPONENT,
                token,
                event,
            });
        }
    }
}

/// Copy of the request token, held on the stack while the buffer is reused
/// for the reply.
#[derive(Clone, Copy)]
struct RequestToken {
    bytes: [u8; MAX_TOKEN_LEN],
    len: usize,
}

impl RequestToken {
    fn read(packet: &[u8]) -> Self {
        let token = request_token(packet);
        let mut bytes = [0u8; MAX_TOKEN_LEN];
        bytes[..token.len()].copy_from_slice(token);
        Self {
            bytes,
            len: token.len(),
        }
    }

    fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Token of an encoded request, or empty when the header is unreadable.
fn request_token(bytes: &[u8]) -> &[u8] {
    let Some(first) = bytes.first() else {
        return &[];
    };
    let tkl = usize::from(first & 0x0F);
    if tkl > MAX_TOKEN_LEN {
        return &[];
    }
    bytes.get(HEADER_SIZE..HEADER_SIZE + tkl).unwrap_or(&[])
}

/// Run one exchange over UDP from an ephemeral local endpoint, logging
/// through `tracing`.
pub fn request(
    buf: &mut PacketBuf,
    remote: SocketAddr,
    config: ExchangeConfig,
) -> Result<Message<'_>, ExchangeError> {
    Exchange::new(UdpTransport::new(), CoapCodec, config)
        .with_logger(Arc::new(TracingLogger))
        .execute(buf, None, remote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExchangeErrorKind;
    use crate::logging::NullLogger;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::sync::Mutex;
    use std::time::Duration;
    use tern_msg::{Code, MessageType, Method, RequestBuilder};

    enum Step {
        Timeout,
        Reply(Vec<u8>),
        Fail(io::ErrorKind),
    }

    #[derive(Default)]
    struct Record {
        opens: Vec<SocketAddr>,
        sends: Vec<Vec<u8>>,
        waits: Vec<Duration>,
        closes: u32,
    }

    struct MockTransport {
        record: Rc<RefCell<Record>>,
        script: Rc<RefCell<VecDeque<Step>>>,
        open_error: Option<io::ErrorKind>,
        send_result: Option<io::Result<usize>>,
    }

    struct MockSession {
        record: Rc<RefCell<Record>>,
        script: Rc<RefCell<VecDeque<Step>>>,
        send_result: Option<io::Result<usize>>,
    }

    impl MockTransport {
        fn new(script: Vec<Step>) -> (Self, Rc<RefCell<Record>>) {
            let record = Rc::new(RefCell::new(Record::default()));
            let transport = Self {
                record: record.clone(),
                script: Rc::new(RefCell::new(script.into())),
                open_error: None,
                send_result: None,
            };
            (transport, record)
        }
    }

    impl Transport for MockTransport {
        type Session = MockSession;

        fn open(&mut self, _local: Option<SocketAddr>, remote: SocketAddr) -> io::Result<MockSession> {
            if let Some(kind) = self.open_error {
                return Err(io::Error::new(kind, "open refused"));
            }
            self.record.borrow_mut().opens.push(remote);
            Ok(MockSession {
                record: self.record.clone(),
                script: self.script.clone(),
                send_result: self.send_result.take(),
            })
        }
    }

    impl Session for MockSession {
        fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
            self.record.borrow_mut().sends.push(bytes.to_vec());
            match self.send_result.take() {
                Some(result) => result,
                None => Ok(bytes.len()),
            }
        }

        fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Received> {
            self.record.borrow_mut().waits.push(timeout);
            match self.script.borrow_mut().pop_front() {
                None | Some(Step::Timeout) => Ok(Received::Elapsed),
                Some(Step::Reply(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(Received::Data(n))
                }
                Some(Step::Fail(kind)) => Err(io::Error::new(kind, "recv failed")),
            }
        }

        fn close(&mut self) {
            self.record.borrow_mut().closes += 1;
        }
    }

    /// Keeps `(component, token, rendered event)` per entry.
    #[derive(Default)]
    struct CollectingLogger {
        entries: Mutex<Vec<(&'static str, Vec<u8>, String)>>,
    }

    impl ExchangeLogger for CollectingLogger {
        fn log(&self, entry: ExchangeLog<'_>) {
            self.entries.lock().unwrap().push((
                entry.component,
                entry.token.to_vec(),
                entry.event.to_string(),
            ));
        }
    }

    const TOKEN: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];
    const CONTENT_ACK: [u8; 12] = [
        0x64, 0x45, 0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF, 0xFF, b'o', b'k', b'!',
    ];

    fn remote() -> SocketAddr {
        "[fe80::1%2]:5683".parse().unwrap()
    }

    fn config(ack_ms: u64, max_retransmit: u32) -> ExchangeConfig {
        ExchangeConfig {
            ack_timeout: Duration::from_millis(ack_ms),
            max_retransmit,
            ..Default::default()
        }
    }

    fn request_buf() -> PacketBuf {
        let mut buf = PacketBuf::with_capacity(128);
        RequestBuilder::new(Method::Get, 0x1234, &TOKEN)
            .uri_path("/riot/board")
            .encode(&mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn silent_peer_exhausts_every_attempt() {
        let (transport, record) = MockTransport::new(vec![]);
        let mut exchange = Exchange::new(transport, CoapCodec, config(1000, 4));
        let mut buf = request_buf();

        let err = exchange.execute(&mut buf, None, remote()).unwrap_err();
        assert!(matches!(err, ExchangeError::TimeoutExhausted { attempts: 5 }));

        let record = record.borrow();
        assert_eq!(record.sends.len(), 5);
        let waits: Vec<u64> = record.waits.iter().map(|d| d.as_secs()).collect();
        assert_eq!(waits, vec![1, 2, 4, 8, 16]);
        assert_eq!(record.closes, 1);
    }

    #[test]
    fn reply_on_third_attempt() {
        let script = vec![Step::Timeout, Step::Timeout, Step::Reply(CONTENT_ACK.to_vec())];
        let (transport, record) = MockTransport::new(script);
        let mut exchange = Exchange::new(transport, CoapCodec, config(2000, 4));
        let mut buf = request_buf();
        let request = buf.as_slice().to_vec();

        let response = exchange.execute(&mut buf, None, remote()).unwrap();
        assert_eq!(response.message_type(), MessageType::Acknowledgement);
        assert_eq!(response.code(), Code::CONTENT);
        assert_eq!(response.token(), &TOKEN);
        assert_eq!(response.payload(), b"ok!");

        let record = record.borrow();
        assert_eq!(record.sends.len(), 3);
        assert!(record.sends.iter().all(|sent| *sent == request));
        assert_eq!(
            record.waits,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
        assert_eq!(record.closes, 1);
    }

    #[test]
    fn reply_replaces_request_in_buffer() {
        let (transport, _record) = MockTransport::new(vec![Step::Reply(CONTENT_ACK.to_vec())]);
        let mut exchange = Exchange::new(transport, CoapCodec, config(10, 0));
        let mut buf = request_buf();

        let payload = exchange.execute(&mut buf, None, remote()).unwrap().payload().to_vec();
        assert_eq!(payload, b"ok!");
        assert_eq!(buf.as_slice(), &CONTENT_ACK);
    }

    #[test]
    fn receive_error_is_not_retried() {
        let script = vec![Step::Fail(io::ErrorKind::ConnectionRefused)];
        let (transport, record) = MockTransport::new(script);
        let mut exchange = Exchange::new(transport, CoapCodec, config(1000, 5));
        let mut buf = request_buf();

        let err = exchange.execute(&mut buf, None, remote()).unwrap_err();
        assert!(matches!(err, ExchangeError::Receive { attempt: 1, .. }));
        assert_eq!(record.borrow().sends.len(), 1);
        assert_eq!(record.borrow().closes, 1);
    }

    #[test]
    fn receive_error_after_timeouts_reports_attempt() {
        let script = vec![Step::Timeout, Step::Fail(io::ErrorKind::Other)];
        let (transport, record) = MockTransport::new(script);
        let mut exchange = Exchange::new(transport, CoapCodec, config(1000, 4));
        let mut buf = request_buf();

        let err = exchange.execute(&mut buf, None, remote()).unwrap_err();
        assert!(matches!(err, ExchangeError::Receive { attempt: 2, .. }));
        assert_eq!(record.borrow().sends.len(), 2);
    }

    #[test]
    fn malformed_reply_is_not_retried() {
        let script = vec![Step::Reply(vec![0x00, 0x01])];
        let (transport, record) = MockTransport::new(script);
        let mut exchange = Exchange::new(transport, CoapCodec, config(1000, 4));
        let mut buf = request_buf();

        let err = exchange.execute(&mut buf, None, remote()).unwrap_err();
        assert_eq!(err.kind(), ExchangeErrorKind::MalformedResponse);
        let record = record.borrow();
        assert_eq!(record.sends.len(), 1);
        assert_eq!(record.closes, 1);
    }

    #[test]
    fn open_failure_sends_nothing_and_never_closes() {
        let (mut transport, record) = MockTransport::new(vec![]);
        transport.open_error = Some(io::ErrorKind::AddrNotAvailable);
        let mut exchange = Exchange::new(transport, CoapCodec, config(1000, 4));
        let mut buf = request_buf();

        let err = exchange.execute(&mut buf, None, remote()).unwrap_err();
        assert!(matches!(err, ExchangeError::TransportOpen { .. }));
        let record = record.borrow();
        assert!(record.sends.is_empty());
        assert_eq!(record.closes, 0);
    }

    #[test]
    fn send_failure_stops_the_exchange() {
        let (mut transport, record) = MockTransport::new(vec![]);
        transport.send_result = Some(Err(io::Error::from_raw_os_error(101)));
        let mut exchange = Exchange::new(transport, CoapCodec, config(1000, 4));
        let mut buf = request_buf();

        let err = exchange.execute(&mut buf, None, remote()).unwrap_err();
        assert!(matches!(err, ExchangeError::Send { attempt: 1, .. }));
        assert_eq!(err.code(), -101);
        let record = record.borrow();
        assert_eq!(record.sends.len(), 1);
        assert!(record.waits.is_empty());
        assert_eq!(record.closes, 1);
    }

    #[test]
    fn zero_byte_send_is_a_send_error() {
        let (mut transport, record) = MockTransport::new(vec![]);
        transport.send_result = Some(Ok(0));
        let mut exchange = Exchange::new(transport, CoapCodec, config(1000, 4));
        let mut buf = request_buf();

        match exchange.execute(&mut buf, None, remote()) {
            Err(ExchangeError::Send { attempt, source }) => {
                assert_eq!(attempt, 1);
                assert_eq!(source.kind(), io::ErrorKind::WriteZero);
            }
            other => panic!("unexpected outcome: {:?}", other.map(|m| m.code())),
        }
        assert_eq!(record.borrow().closes, 1);
    }

    #[test]
    fn port_zero_uses_default_port() {
        let (transport, record) = MockTransport::new(vec![]);
        let mut config = config(1, 0);
        config.default_port = 15683;
        let mut exchange = Exchange::new(transport, CoapCodec, config);
        let mut buf = request_buf();

        let zero: SocketAddr = "[::1]:0".parse().unwrap();
        let explicit: SocketAddr = "[::1]:6000".parse().unwrap();
        let _ = exchange.execute(&mut buf, None, zero);
        let _ = exchange.execute(&mut buf, None, explicit);

        let ports: Vec<u16> = record.borrow().opens.iter().map(|a| a.port()).collect();
        assert_eq!(ports, vec![15683, 6000]);
    }

    #[test]
    fn no_retransmissions_means_one_send() {
        let (transport, record) = MockTransport::new(vec![]);
        let mut exchange = Exchange::new(transport, CoapCodec, config(500, 0));
        let mut buf = request_buf();

        let err = exchange.execute(&mut buf, None, remote()).unwrap_err();
        assert!(matches!(err, ExchangeError::TimeoutExhausted { attempts: 1 }));
        assert_eq!(record.borrow().sends.len(), 1);
        assert_eq!(record.borrow().waits, vec![Duration::from_millis(500)]);
    }

    #[test]
    fn waits_follow_config_schedule_past_32_attempts() {
        let (transport, record) = MockTransport::new(vec![]);
        let config = config(1, 34);
        let mut exchange =
            Exchange::new(transport, CoapCodec, config).with_logger(Arc::new(NullLogger));
        let mut buf = request_buf();

        let err = exchange.execute(&mut buf, None, remote()).unwrap_err();
        assert!(matches!(err, ExchangeError::TimeoutExhausted { attempts: 35 }));

        let record = record.borrow();
        assert_eq!(record.waits.len(), 35);
        for (k, waited) in (1u32..).zip(&record.waits) {
            assert_eq!(*waited, config.timeout_for(k), "attempt {}", k);
        }
        assert_eq!(record.waits[32], Duration::from_millis(1 << 32));
        assert_eq!(record.waits.iter().sum::<Duration>(), config.max_wait());
    }

    #[test]
    fn logs_each_step_with_request_token() {
        let script = vec![Step::Timeout, Step::Reply(CONTENT_ACK.to_vec())];
        let (transport, _record) = MockTransport::new(script);
        let logger = Arc::new(CollectingLogger::default());
        let mut exchange =
            Exchange::new(transport, CoapCodec, config(100, 4)).with_logger(logger.clone());
        let mut buf = request_buf();
        let request_len = buf.len();

        exchange.execute(&mut buf, None, remote()).unwrap();

        let entries = logger.entries.lock().unwrap();
        assert!(
            entries
                .iter()
                .all(|(component, token, _)| *component == "exchange" && *token == TOKEN)
        );
        let events: Vec<&str> = entries.iter().map(|(_, _, event)| event.as_str()).collect();
        assert_eq!(
            events,
            vec![
                "session_opened remote=[fe80::1%2]:5683".to_string(),
                format!("request_sent attempt=1 bytes={}", request_len),
                "receive_timed_out attempt=1 waited_ms=100 next_timeout_ms=200".to_string(),
                format!("request_sent attempt=2 bytes={}", request_len),
                format!("response_received attempt=2 bytes={}", CONTENT_ACK.len()),
                "session_closed".to_string(),
            ]
        );
    }

    #[test]
    fn logs_failures_with_their_error() {
        let script = vec![Step::Reply(vec![0x40, 0x45])];
        let (transport, _record) = MockTransport::new(script);
        let logger = Arc::new(CollectingLogger::default());
        let mut exchange =
            Exchange::new(transport, CoapCodec, config(100, 4)).with_logger(logger.clone());
        let mut buf = request_buf();

        exchange.execute(&mut buf, None, remote()).unwrap_err();

        let entries = logger.entries.lock().unwrap();
        let events: Vec<&str> = entries.iter().map(|(_, _, event)| event.as_str()).collect();
        // Decoding happens after the session is released
        let closed = events.iter().position(|e| *e == "session_closed").unwrap();
        assert_eq!(closed, events.len() - 2);
        assert!(events[closed + 1].starts_with("malformed_response bytes=2: "));
    }

    #[test]
    fn token_read_from_request_header() {
        let buf = request_buf();
        assert_eq!(request_token(buf.as_slice()), &TOKEN);
        assert!(request_token(&[]).is_empty());
        assert!(request_token(&[0x4F, 0x01, 0x00, 0x00]).is_empty());
        assert!(request_token(&[0x44, 0x01, 0x00, 0x00, 0xAA]).is_empty());
    }
}
