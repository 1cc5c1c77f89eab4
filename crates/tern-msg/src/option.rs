//! Option delta/length encoding (RFC 7252 §3.1).
//!
//! Each option starts with a byte holding a 4-bit delta and a 4-bit length.
//! Nibble values 13 and 14 announce one and two extension bytes; 15 is
//! reserved and only legal as the full `0xFF` payload marker.

use crate::message::ParseError;
use crate::protocol::PAYLOAD_MARKER;

const EXT_8: u8 = 13;
const EXT_16: u8 = 14;
const RESERVED: u8 = 15;

const EXT_8_BASE: u32 = 13;
const EXT_16_BASE: u32 = 269;

/// Largest delta or length the two-byte extension can express.
pub const MAX_EXTENDED: usize = 65_535 + EXT_16_BASE as usize;

/// Bytes needed to encode an option header for `delta` and `len`.
pub fn header_len(delta: u16, len: usize) -> usize {
    1 + ext_len(delta as usize) + ext_len(len)
}

fn ext_len(value: usize) -> usize {
    if value < EXT_8_BASE as usize {
        0
    } else if value < EXT_16_BASE as usize {
        1
    } else {
        2
    }
}

fn nibble(value: usize) -> u8 {
    match ext_len(value) {
        0 => value as u8,
        1 => EXT_8,
        _ => EXT_16,
    }
}

fn write_ext(out: &mut [u8], value: usize) -> usize {
    match ext_len(value) {
        0 => 0,
        1 => {
            out[0] = (value - EXT_8_BASE as usize) as u8;
            1
        }
        _ => {
            let ext = (value - EXT_16_BASE as usize) as u16;
            out[..2].copy_from_slice(&ext.to_be_bytes());
            2
        }
    }
}

/// Write an option header into `out`, returning bytes written.
///
/// # Panics
/// Panics if `out` is shorter than [`header_len`] or `len` exceeds
/// [`MAX_EXTENDED`].
pub fn write_header(out: &mut [u8], delta: u16, len: usize) -> usize {
    assert!(len <= MAX_EXTENDED);
    assert!(out.len() >= header_len(delta, len));

    out[0] = (nibble(delta as usize) << 4) | nibble(len);
    let mut pos = 1;
    pos += write_ext(&mut out[pos..], delta as usize);
    pos += write_ext(&mut out[pos..], len);
    pos
}

/// Encode an unsigned integer option value in the fewest bytes (zero is
/// the empty value).
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    bytes[skip..].to_vec()
}

/// Decode an unsigned integer option value. Values longer than four bytes
/// are rejected.
pub fn decode_uint(value: &[u8]) -> Option<u32> {
    if value.len() > 4 {
        return None;
    }
    Some(value.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
}

fn read_ext(nib: u8, rest: &[u8]) -> Result<(u32, usize), ParseError> {
    match nib {
        EXT_8 => {
            let b = *rest.first().ok_or(ParseError::Truncated)?;
            Ok((b as u32 + EXT_8_BASE, 1))
        }
        EXT_16 => {
            if rest.len() < 2 {
                return Err(ParseError::Truncated);
            }
            let ext = u16::from_be_bytes([rest[0], rest[1]]);
            Ok((ext as u32 + EXT_16_BASE, 2))
        }
        RESERVED => Err(ParseError::ReservedNibble),
        n => Ok((n as u32, 0)),
    }
}

/// One step over the option region.
pub(crate) enum Step<'a> {
    Option {
        delta: u32,
        value: &'a [u8],
        rest: &'a [u8],
    },
    /// The payload marker; `payload` is everything after it.
    Marker { payload: &'a [u8] },
    End,
}

/// Read the next option (or the payload marker) from `data`.
pub(crate) fn read(data: &[u8]) -> Result<Step<'_>, ParseError> {
    let Some(&first) = data.first() else {
        return Ok(Step::End);
    };
    if first == PAYLOAD_MARKER {
        return Ok(Step::Marker { payload: &data[1..] });
    }

    let mut pos = 1;
    let (delta, used) = read_ext(first >> 4, &data[pos..])?;
    pos += used;
    let (len, used) = read_ext(first & 0x0F, &data[pos..])?;
    pos += used;

    let end = pos + len as usize;
    if end > data.len() {
        return Err(ParseError::Truncated);
    }
    Ok(Step::Option {
        delta,
        value: &data[pos..end],
        rest: &data[end..],
    })
}
