//! Primitive wire encodings.
//!
//! Fixed-width numbers are big-endian and go through [`bytes::BufMut`] directly
//! on the write side. Reads check the remaining length first so truncated
//! input is an error rather than a panic.

use bytes::{Buf, BufMut};

/// Longest valid VarInt encoding of a 32-bit value.
pub const MAX_VARINT_LEN: usize = 5;

/// Errors decoding primitive values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    #[error("VarInt longer than {MAX_VARINT_LEN} bytes")]
    VarIntTooLong,
    #[error("negative length prefix {0}")]
    NegativeLength(i32),
    #[error("string of {len} exceeds limit of {max} characters")]
    StringTooLong { len: usize, max: usize },
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

fn ensure(buf: &impl Buf, needed: usize) -> Result<(), CodecError> {
    let remaining = buf.remaining();
    if remaining < needed {
        return Err(CodecError::UnexpectedEof { needed, remaining });
    }
    Ok(())
}

/// Write `value` as a VarInt: 7 bits per byte, least significant group first,
/// high bit set on every byte but the last. Negative values take five bytes.
pub fn write_varint(buf: &mut impl BufMut, value: i32) {
    let mut v = value as u32;
    while v & !0x7f != 0 {
        buf.put_u8((v & 0x7f) as u8 | 0x80);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

pub fn read_varint(buf: &mut impl Buf) -> Result<i32, CodecError> {
    let mut value = 0u32;
    for group in 0..MAX_VARINT_LEN {
        ensure(buf, 1)?;
        let byte = buf.get_u8();
        value |= ((byte & 0x7f) as u32) << (7 * group);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(CodecError::VarIntTooLong)
}

/// Number of bytes [`write_varint`] emits for `value`.
pub fn varint_len(value: i32) -> usize {
    match value as u32 {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        0x20_0000..=0x0fff_ffff => 4,
        _ => 5,
    }
}

/// VarInt byte length followed by the UTF-8 bytes, no terminator.
pub fn write_string(buf: &mut impl BufMut, s: &str) {
    write_varint(buf, s.len() as i32);
    buf.put_slice(s.as_bytes());
}

/// Read a string of at most `max_chars` characters.
pub fn read_string(buf: &mut impl Buf, max_chars: usize) -> Result<String, CodecError> {
    let len = read_varint(buf)?;
    if len < 0 {
        return Err(CodecError::NegativeLength(len));
    }
    let len = len as usize;
    // A character is at most four UTF-8 bytes.
    if len > max_chars.saturating_mul(4) {
        return Err(CodecError::StringTooLong {
            len,
            max: max_chars,
        });
    }
    ensure(buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    let s = std::str::from_utf8(&bytes).map_err(|_| CodecError::InvalidUtf8)?;
    let chars = s.chars().count();
    if chars > max_chars {
        return Err(CodecError::StringTooLong {
            len: chars,
            max: max_chars,
        });
    }
    Ok(s.to_owned())
}

/// Quantize degrees to a byte: `round(angle * 256 / 360) mod 256`.
pub fn angle_to_byte(degrees: f32) -> u8 {
    ((degrees as f64 * 256.0 / 360.0).round() as i64).rem_euclid(256) as u8
}

pub fn byte_to_angle(byte: u8) -> f32 {
    byte as f32 * 360.0 / 256.0
}

pub fn read_u8(buf: &mut impl Buf) -> Result<u8, CodecError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn read_bool(buf: &mut impl Buf) -> Result<bool, CodecError> {
    Ok(read_u8(buf)? != 0)
}

pub fn read_u16(buf: &mut impl Buf) -> Result<u16, CodecError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn read_i16(buf: &mut impl Buf) -> Result<i16, CodecError> {
    ensure(buf, 2)?;
    Ok(buf.get_i16())
}

pub fn read_i32(buf: &mut impl Buf) -> Result<i32, CodecError> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn read_i64(buf: &mut impl Buf) -> Result<i64, CodecError> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

pub fn read_f32(buf: &mut impl Buf) -> Result<f32, CodecError> {
    ensure(buf, 4)?;
    Ok(buf.get_f32())
}

pub fn read_f64(buf: &mut impl Buf) -> Result<f64, CodecError> {
    ensure(buf, 8)?;
    Ok(buf.get_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encoded(value: i32) -> Vec<u8> {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, value);
        buf.to_vec()
    }

    #[test]
    fn varint_known_vectors() {
        assert_eq!(encoded(0), [0x00]);
        assert_eq!(encoded(1), [0x01]);
        assert_eq!(encoded(127), [0x7f]);
        assert_eq!(encoded(128), [0x80, 0x01]);
        assert_eq!(encoded(255), [0xff, 0x01]);
        assert_eq!(encoded(25565), [0xdd, 0xc7, 0x01]);
        assert_eq!(encoded(2_097_151), [0xff, 0xff, 0x7f]);
        assert_eq!(encoded(i32::MAX), [0xff, 0xff, 0xff, 0xff, 0x07]);
        assert_eq!(encoded(-1), [0xff, 0xff, 0xff, 0xff, 0x0f]);
    }

    #[test]
    fn varint_rejects_overlong() {
        let mut data: &[u8] = &[0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        assert_eq!(read_varint(&mut data), Err(CodecError::VarIntTooLong));
    }

    #[test]
    fn varint_rejects_truncated() {
        let mut data: &[u8] = &[0x80, 0x80];
        assert!(matches!(
            read_varint(&mut data),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn varint_len_matches_encoding() {
        for v in [0, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152, i32::MAX, -1] {
            assert_eq!(varint_len(v), encoded(v).len(), "value {v}");
        }
    }

    #[test]
    fn string_layout() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "hé");
        assert_eq!(&buf[..], &[3, b'h', 0xc3, 0xa9]);
        let mut read = buf.freeze();
        assert_eq!(read_string(&mut read, 16).unwrap(), "hé");
    }

    #[test]
    fn string_limits_enforced() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "abcdef");
        assert!(matches!(
            read_string(&mut buf.clone().freeze(), 5),
            Err(CodecError::StringTooLong { .. })
        ));
        let mut bad: &[u8] = &[2, 0xff, 0xfe];
        assert_eq!(read_string(&mut bad, 16), Err(CodecError::InvalidUtf8));
        let mut short: &[u8] = &[4, b'a'];
        assert!(matches!(
            read_string(&mut short, 16),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn angle_quantization() {
        assert_eq!(angle_to_byte(0.0), 0);
        assert_eq!(angle_to_byte(90.0), 64);
        assert_eq!(angle_to_byte(180.0), 128);
        assert_eq!(angle_to_byte(360.0), 0);
        assert_eq!(angle_to_byte(-90.0), 192);
        assert_eq!(angle_to_byte(45.5), angle_to_byte(45.5 + 720.0));
        assert_eq!(byte_to_angle(128), 180.0);
    }

    #[test]
    fn fixed_width_is_big_endian() {
        let mut buf = BytesMut::new();
        buf.put_i32(0x0102_0304);
        buf.put_i16(-2);
        assert_eq!(&buf[..], &[1, 2, 3, 4, 0xff, 0xfe]);
        let mut read = buf.freeze();
        assert_eq!(read_i32(&mut read).unwrap(), 0x0102_0304);
        assert_eq!(read_i16(&mut read).unwrap(), -2);
        assert!(read_u8(&mut read).is_err());
    }
}
