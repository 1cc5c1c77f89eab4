//! Decoded view over a CoAP message held in a borrowed byte slice.

use thiserror::Error;

use crate::option::{self, Step};
use crate::protocol::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("message is {0} bytes, shorter than the 4-byte header")]
    TooShort(usize),
    #[error("unsupported protocol version {0}")]
    BadVersion(u8),
    #[error("reserved token length {0}")]
    BadTokenLength(u8),
    #[error("token, option or extension runs past the end of the message")]
    Truncated,
    #[error("reserved option nibble 15")]
    ReservedNibble,
    #[error("option number exceeds 65535")]
    OptionNumberOverflow,
    #[error("payload marker followed by an empty payload")]
    EmptyPayload,
    #[error("empty message carries token, options or payload")]
    NonEmptyEmptyMessage,
}

/// A parsed message. All slices borrow from the bytes given to
/// [`Message::parse`]; nothing is copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    message_type: MessageType,
    code: Code,
    message_id: u16,
    token: &'a [u8],
    options: &'a [u8],
    payload: &'a [u8],
}

impl<'a> Message<'a> {
    /// Parse and fully validate a message, including every option header.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ParseError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ParseError::TooShort(bytes.len()));
        }
        let version = bytes[0] >> 6;
        if version != VERSION {
            return Err(ParseError::BadVersion(version));
        }
        let message_type = MessageType::from_bits(bytes[0] >> 4);
        let tkl = bytes[0] & 0x0F;
        if tkl as usize > MAX_TOKEN_LEN {
            return Err(ParseError::BadTokenLength(tkl));
        }
        let code = Code::from_byte(bytes[1]);
        let message_id = u16::from_be_bytes([bytes[2], bytes[3]]);

        let token_end = HEADER_SIZE + tkl as usize;
        if token_end > bytes.len() {
            return Err(ParseError::Truncated);
        }
        let token = &bytes[HEADER_SIZE..token_end];

        let region = &bytes[token_end..];
        let mut rest = region;
        let mut number: u32 = 0;
        let (options, payload) = loop {
            match option::read(rest)? {
                Step::Option { delta, rest: next, .. } => {
                    number += delta;
                    if number > u16::MAX as u32 {
                        return Err(ParseError::OptionNumberOverflow);
                    }
                    rest = next;
                }
                Step::Marker { payload } => {
                    if payload.is_empty() {
                        return Err(ParseError::EmptyPayload);
                    }
                    let opts_len = region.len() - payload.len() - 1;
                    break (&region[..opts_len], payload);
                }
                Step::End => break (region, &region[region.len()..]),
            }
        };

        if code.is_empty() && (!token.is_empty() || !region.is_empty()) {
            return Err(ParseError::NonEmptyEmptyMessage);
        }

        Ok(Self {
            message_type,
            code,
            message_id,
            token,
            options,
            payload,
        })
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    pub fn token(&self) -> &'a [u8] {
        self.token
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Options in wire order as `(number, value)` pairs.
    pub fn options(&self) -> Options<'a> {
        Options {
            rest: self.options,
            number: 0,
        }
    }

    /// First value of option `number`, if present.
    pub fn option(&self, number: u16) -> Option<&'a [u8]> {
        self.options().find(|(n, _)| *n == number).map(|(_, v)| v)
    }

    pub fn content_format(&self) -> Option<ContentFormat> {
        let value = self.option(OPT_CONTENT_FORMAT)?;
        let raw = option::decode_uint(value)?;
        u16::try_from(raw).ok().map(ContentFormat)
    }

    /// URI-Path segments joined with `/`, lossily decoded as UTF-8.
    pub fn uri_path(&self) -> String {
        self.options()
            .filter(|(n, _)| *n == OPT_URI_PATH)
            .map(|(_, v)| String::from_utf8_lossy(v).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Iterator over an already-validated option region.
#[derive(Debug, Clone)]
pub struct Options<'a> {
    rest: &'a [u8],
    number: u32,
}

impl<'a> Iterator for Options<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        match option::read(self.rest) {
            Ok(Step::Option { delta, value, rest }) => {
                self.number += delta;
                self.rest = rest;
                Some((self.number as u16, value))
            }
            _ => None,
        }
    }
}
