//! CoAP message format constants and header field types (RFC 7252 §3).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Token (if any, TKL bytes) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Options (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |1 1 1 1 1 1 1 1|    Payload (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::fmt;
use std::str::FromStr;

/// Protocol version carried in the two high bits of the first byte.
pub const VERSION: u8 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 4;

/// Longest token the header's 4-bit TKL field may announce.
pub const MAX_TOKEN_LEN: usize = 8;

/// Separates options from the payload.
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// Well-known UDP port for unsecured CoAP.
pub const DEFAULT_PORT: u16 = 5683;

pub const OPT_URI_HOST: u16 = 3;
pub const OPT_URI_PORT: u16 = 7;
pub const OPT_URI_PATH: u16 = 11;
pub const OPT_CONTENT_FORMAT: u16 = 12;
pub const OPT_URI_QUERY: u16 = 15;
pub const OPT_ACCEPT: u16 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Confirmable,
            1 => Self::NonConfirmable,
            2 => Self::Acknowledgement,
            _ => Self::Reset,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Confirmable => 0,
            Self::NonConfirmable => 1,
            Self::Acknowledgement => 2,
            Self::Reset => 3,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Confirmable => "CON",
            Self::NonConfirmable => "NON",
            Self::Acknowledgement => "ACK",
            Self::Reset => "RST",
        };
        f.write_str(name)
    }
}

/// Message code split into its 3-bit class and 5-bit detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code {
    pub class: u8,
    pub detail: u8,
}

impl Code {
    pub const EMPTY: Code = Code::new(0, 0);
    pub const GET: Code = Code::new(0, 1);
    pub const POST: Code = Code::new(0, 2);
    pub const PUT: Code = Code::new(0, 3);
    pub const DELETE: Code = Code::new(0, 4);

    pub const CREATED: Code = Code::new(2, 1);
    pub const DELETED: Code = Code::new(2, 2);
    pub const VALID: Code = Code::new(2, 3);
    pub const CHANGED: Code = Code::new(2, 4);
    pub const CONTENT: Code = Code::new(2, 5);

    pub const BAD_REQUEST: Code = Code::new(4, 0);
    pub const NOT_FOUND: Code = Code::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);

    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);
    pub const NOT_IMPLEMENTED: Code = Code::new(5, 1);

    pub const fn new(class: u8, detail: u8) -> Self {
        Self {
            class: class & 0x07,
            detail: detail & 0x1F,
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        Self::new(byte >> 5, byte)
    }

    pub fn to_byte(self) -> u8 {
        (self.class << 5) | self.detail
    }

    pub fn is_empty(self) -> bool {
        self == Self::EMPTY
    }

    pub fn is_request(self) -> bool {
        self.class == 0 && self.detail != 0
    }

    pub fn is_success(self) -> bool {
        self.class == 2
    }

    pub fn is_client_error(self) -> bool {
        self.class == 4
    }

    pub fn is_server_error(self) -> bool {
        self.class == 5
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class, self.detail)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn code(self) -> Code {
        match self {
            Self::Get => Code::GET,
            Self::Post => Code::POST,
            Self::Put => Code::PUT,
            Self::Delete => Code::DELETE,
        }
    }
}

/// Returned when a method name is not one of get/post/put/delete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown method {0:?}")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Self::Get),
            "post" => Ok(Self::Post),
            "put" => Ok(Self::Put),
            "delete" => Ok(Self::Delete),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

/// Content-Format option value (RFC 7252 §12.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentFormat(pub u16);

impl ContentFormat {
    pub const TEXT_PLAIN: ContentFormat = ContentFormat(0);
    pub const LINK_FORMAT: ContentFormat = ContentFormat(40);
    pub const OCTET_STREAM: ContentFormat = ContentFormat(42);
    pub const JSON: ContentFormat = ContentFormat(50);
    pub const CBOR: ContentFormat = ContentFormat(60);

    /// Formats whose payload is meant to be read as text.
    pub fn is_textual(self) -> bool {
        self == Self::TEXT_PLAIN || self == Self::LINK_FORMAT
    }
}
