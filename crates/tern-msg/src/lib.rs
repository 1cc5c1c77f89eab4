//! Tern message codec: CoAP request encoding and response decoding over a
//! caller-owned packet buffer.
//!
//! Requests are built with [`RequestBuilder`] straight into a [`PacketBuf`];
//! replies received into the same buffer are decoded in place with
//! [`Message::parse`], which borrows rather than copies.

pub mod buf;
pub mod builder;
pub mod message;
pub mod option;
pub mod protocol;

pub use buf::{CapacityError, PacketBuf};
pub use builder::{EncodeError, RequestBuilder};
pub use message::{Message, Options, ParseError};
pub use protocol::{
    Code, ContentFormat, MessageType, Method, UnknownMethod, DEFAULT_PORT, HEADER_SIZE,
    MAX_TOKEN_LEN, OPT_ACCEPT, OPT_CONTENT_FORMAT, OPT_URI_HOST, OPT_URI_PATH, OPT_URI_PORT,
    OPT_URI_QUERY, PAYLOAD_MARKER, VERSION,
};
