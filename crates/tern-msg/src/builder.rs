//! Confirmable request construction into a caller-provided [`PacketBuf`].

use thiserror::Error;

use crate::buf::PacketBuf;
use crate::option::{self, MAX_EXTENDED};
use crate::protocol::*;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("token is {0} bytes, at most 8 allowed")]
    TokenTooLong(usize),
    #[error("option {number} value is {len} bytes, too long to encode")]
    OptionTooLong { number: u16, len: usize },
    #[error("encoded message needs {needed} bytes, buffer holds {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },
}

/// Builds a CON request: header, token, options in ascending number order,
/// and the payload behind a marker when one is set.
#[derive(Debug, Clone)]
pub struct RequestBuilder<'a> {
    code: Code,
    message_id: u16,
    token: &'a [u8],
    options: Vec<(u16, Vec<u8>)>,
    payload: &'a [u8],
}

impl<'a> RequestBuilder<'a> {
    pub fn new(method: Method, message_id: u16, token: &'a [u8]) -> Self {
        Self {
            code: method.code(),
            message_id,
            token,
            options: Vec::new(),
            payload: &[],
        }
    }

    /// Add one Uri-Path option per non-empty `/`-separated segment.
    pub fn uri_path(mut self, path: &str) -> Self {
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.options.push((OPT_URI_PATH, segment.as_bytes().to_vec()));
        }
        self
    }

    /// Add one Uri-Query option per non-empty `&`-separated argument.
    pub fn uri_query(mut self, query: &str) -> Self {
        for arg in query.split('&').filter(|s| !s.is_empty()) {
            self.options.push((OPT_URI_QUERY, arg.as_bytes().to_vec()));
        }
        self
    }

    pub fn content_format(self, format: ContentFormat) -> Self {
        self.uint_option(OPT_CONTENT_FORMAT, format.0 as u32)
    }

    pub fn accept(self, format: ContentFormat) -> Self {
        self.uint_option(OPT_ACCEPT, format.0 as u32)
    }

    pub fn uint_option(mut self, number: u16, value: u32) -> Self {
        self.options.push((number, option::encode_uint(value)));
        self
    }

    pub fn option(mut self, number: u16, value: &[u8]) -> Self {
        self.options.push((number, value.to_vec()));
        self
    }

    pub fn payload(mut self, payload: &'a [u8]) -> Self {
        self.payload = payload;
        self
    }

    /// Total wire length of the request as currently configured.
    pub fn encoded_len(&self) -> usize {
        let mut len = HEADER_SIZE + self.token.len();
        let mut prev = 0u16;
        for (number, value) in self.sorted_options() {
            len += option::header_len(number - prev, value.len()) + value.len();
            prev = number;
        }
        if !self.payload.is_empty() {
            len += 1 + self.payload.len();
        }
        len
    }

    fn sorted_options(&self) -> impl Iterator<Item = (u16, &[u8])> {
        let mut sorted: Vec<_> = self
            .options
            .iter()
            .map(|(n, v)| (*n, v.as_slice()))
            .collect();
        // Stable: repeated options keep their insertion order.
        sorted.sort_by_key(|(n, _)| *n);
        sorted.into_iter()
    }

    /// Encode into `buf`, set its cursor to the encoded length and return it.
    pub fn encode(&self, buf: &mut PacketBuf) -> Result<usize, EncodeError> {
        if self.token.len() > MAX_TOKEN_LEN {
            return Err(EncodeError::TokenTooLong(self.token.len()));
        }
        if let Some((number, value)) = self.options.iter().find(|(_, v)| v.len() > MAX_EXTENDED) {
            return Err(EncodeError::OptionTooLong {
                number: *number,
                len: value.len(),
            });
        }
        let needed = self.encoded_len();
        if needed > buf.capacity() {
            return Err(EncodeError::BufferTooSmall {
                needed,
                capacity: buf.capacity(),
            });
        }

        let out = buf.storage_mut();
        out[0] = (VERSION << 6)
            | (MessageType::Confirmable.bits() << 4)
            | self.token.len() as u8;
        out[1] = self.code.to_byte();
        out[2..4].copy_from_slice(&self.message_id.to_be_bytes());
        let mut pos = HEADER_SIZE;

        out[pos..pos + self.token.len()].copy_from_slice(self.token);
        pos += self.token.len();

        let mut prev = 0u16;
        for (number, value) in self.sorted_options() {
            pos += option::write_header(&mut out[pos..], number - prev, value.len());
            out[pos..pos + value.len()].copy_from_slice(value);
            pos += value.len();
            prev = number;
        }

        if !self.payload.is_empty() {
            out[pos] = PAYLOAD_MARKER;
            pos += 1;
            out[pos..pos + self.payload.len()].copy_from_slice(self.payload);
            pos += self.payload.len();
        }

        debug_assert_eq!(pos, needed);
        buf.set_len(pos).map_err(|e| EncodeError::BufferTooSmall {
            needed: e.requested,
            capacity: e.capacity,
        })?;
        Ok(pos)
    }
}
