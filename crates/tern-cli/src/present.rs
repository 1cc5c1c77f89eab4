//! Human-readable rendering of exchange outcomes.

use std::fmt::Write;

use tern_exchange::ExchangeError;
use tern_msg::{ContentFormat, Message};

/// Bytes per hex dump row.
const OD_WIDTH: usize = 16;

/// `response <Success|Error>, code <c.dd>` followed by the payload.
///
/// Payloads are printed as text when the content format says so, and for
/// client and server errors, which carry diagnostic text. Anything else,
/// including a payload with no content format, is hex dumped.
pub fn response(message: &Message<'_>) -> String {
    let code = message.code();
    let class = if code.is_success() { "Success" } else { "Error" };
    let mut out = format!("response {}, code {}", class, code);

    let payload = message.payload();
    if payload.is_empty() {
        out.push_str(", empty payload\n");
        return out;
    }

    let _ = writeln!(out, ", {} bytes", payload.len());
    let textual = message.content_format().is_some_and(ContentFormat::is_textual)
        || code.is_client_error()
        || code.is_server_error();
    if textual {
        out.push_str(&String::from_utf8_lossy(payload));
        out.push('\n');
    } else {
        out.push_str(&hex_dump(payload));
    }
    out
}

pub fn failure(err: &ExchangeError) -> String {
    format!("msg send failed: {} ({})", err.kind(), err.code())
}

/// `od`-style dump: an 8-digit hex offset, then up to 16 bytes per row.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(OD_WIDTH).enumerate() {
        let _ = write!(out, "{:08x}", row * OD_WIDTH);
        let digits = hex::encode_upper(chunk);
        for pair in digits.as_bytes().chunks(2) {
            out.push_str("  ");
            out.push(char::from(pair[0]));
            out.push(char::from(pair[1]));
        }
        out.push('\n');
    }
    out
}
