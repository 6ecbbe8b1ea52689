//! Low-level field codecs shared by every packet type.
//!
//! The remaining-length field uses up to 4 bytes where each byte carries 7 bits
//! of the value, least significant group first. The high bit of a byte is set
//! when another byte follows, which allows values from 0 to 268,435,455.

use bytes::{Buf, BufMut, Bytes};

use crate::utils::PacketError;

/// Largest value the remaining-length field can carry (`0xFF,0xFF,0xFF,0x7F`).
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Maximum number of bytes in a remaining-length field.
const MAX_LENGTH_BYTES: usize = 4;

/// Encode `len` in the variable-length remaining-length format.
///
/// # Examples
///
/// ```rust
/// use popmqtt::packet::codec::encode_length;
///
/// assert_eq!(encode_length(0).unwrap(), vec![0x00]);
/// assert_eq!(encode_length(300).unwrap(), vec![0xAC, 0x02]);
/// ```
pub fn encode_length(len: usize) -> Result<Vec<u8>, PacketError> {
    let mut out = Vec::with_capacity(MAX_LENGTH_BYTES);
    write_length(&mut out, len)?;
    Ok(out)
}

/// Append the encoded remaining length to `buf`.
pub fn write_length<B: BufMut>(buf: &mut B, mut len: usize) -> Result<(), PacketError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(PacketError::LengthTooLarge(len));
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            return Ok(());
        }
    }
}

/// Decode a remaining-length field from the start of `buf`.
///
/// Returns the value and the number of bytes it occupied, or `None` when the
/// buffer ends before the field does. A fifth continuation byte is rejected as
/// malformed input.
pub fn decode_length(buf: &[u8]) -> Result<Option<(usize, usize)>, PacketError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, byte) in buf.iter().enumerate() {
        if i == MAX_LENGTH_BYTES {
            return Err(PacketError::MalformedLength);
        }
        value += (*byte as usize & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= MAX_LENGTH_BYTES {
        return Err(PacketError::MalformedLength);
    }
    Ok(None)
}

/// Writes a UTF-8 string with its 16-bit big-endian length prefix.
pub(crate) fn put_string<B: BufMut>(buf: &mut B, value: &str) -> Result<(), PacketError> {
    put_binary(buf, value.as_bytes())
}

pub(crate) fn put_binary<B: BufMut>(buf: &mut B, value: &[u8]) -> Result<(), PacketError> {
    let len = u16::try_from(value.len()).map_err(|_| PacketError::FieldTooLong(value.len()))?;
    buf.put_u16(len);
    buf.put_slice(value);
    Ok(())
}

pub(crate) fn string_len(value: &str) -> usize {
    2 + value.len()
}

pub(crate) fn get_u8(buf: &mut Bytes) -> Result<u8, PacketError> {
    if buf.remaining() < 1 {
        return Err(PacketError::Incomplete);
    }
    Ok(buf.get_u8())
}

pub(crate) fn get_u16(buf: &mut Bytes) -> Result<u16, PacketError> {
    if buf.remaining() < 2 {
        return Err(PacketError::Incomplete);
    }
    Ok(buf.get_u16())
}

pub(crate) fn get_binary(buf: &mut Bytes) -> Result<Bytes, PacketError> {
    let len = get_u16(buf)? as usize;
    if buf.remaining() < len {
        return Err(PacketError::Incomplete);
    }
    Ok(buf.split_to(len))
}

pub(crate) fn get_string(buf: &mut Bytes) -> Result<String, PacketError> {
    let raw = get_binary(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|_| PacketError::Utf8)
}
