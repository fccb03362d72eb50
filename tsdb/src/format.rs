//! File header, entry instruction set, and the value format table.
//!
//! # Header
//!
//! ```text
//! | "TSDB" + 4 zero bytes (8) | version = 1 (u32 LE) | entries... |
//! ```
//!
//! # Entry types
//!
//! One type byte, then a type-specific payload:
//!
//! - `0x00..=0xef`: value entry, the byte is the 8-bit channel id
//! - `0xf0`: absolute timestamp (u64 LE ms)
//! - `0xf1..=0xf4`: relative timestamp (u8/u16/u24/u32 LE delta ms)
//! - `0xf5`: 8-bit channel definition
//! - `0xf6`: 16-bit channel definition
//! - `0xfe`: end-of-file marker of a finalized file
//! - `0xff`: value entry with escaped 16-bit channel id
//!
//! # Format ids
//!
//! The per-channel format id fixes the payload layout of its value entries.
//! `0x00` is a raw IEEE-754 float, `0x01..=0x07` doubles with a display
//! decimals hint, `0x08..=0x0b` length-prefixed UTF-8 strings. For the
//! integer families the high nibble selects width and signedness
//! (`1..5` signed 1/2/3/4/8 bytes, `9..d` unsigned) and the low nibble a
//! decimal divisor (0 → none, 1 → 10, 2 → 100, 3 → 1000). Divided integers
//! decode to doubles; undivided ones stay exact integers.

use bytes::{BufMut, BytesMut};

use crate::codec::{self, Cursor};
use crate::error::FormatError;
use crate::model::Value;

/// File magic: ASCII "TSDB" padded to 8 bytes with zeros.
pub const MAGIC: [u8; 8] = *b"TSDB\x00\x00\x00\x00";

/// The single supported format version.
pub const VERSION: u32 = 1;

/// Bytes of magic plus version.
pub const HEADER_LEN: usize = 12;

pub(crate) const ENTRY_TIME_ABSOLUTE: u8 = 0xf0;
pub(crate) const ENTRY_TIME_REL_8: u8 = 0xf1;
pub(crate) const ENTRY_TIME_REL_16: u8 = 0xf2;
pub(crate) const ENTRY_TIME_REL_24: u8 = 0xf3;
pub(crate) const ENTRY_TIME_REL_32: u8 = 0xf4;
pub(crate) const ENTRY_CHANNEL_DEF_8: u8 = 0xf5;
pub(crate) const ENTRY_CHANNEL_DEF_16: u8 = 0xf6;
pub(crate) const ENTRY_EOF: u8 = 0xfe;
pub(crate) const ENTRY_VALUE_WIDE: u8 = 0xff;

pub const FORMAT_FLOAT: u8 = 0x00;
pub const FORMAT_DOUBLE: u8 = 0x01;
pub const FORMAT_DOUBLE_DEC6PLUS: u8 = 0x07;
pub const FORMAT_STRING_U8: u8 = 0x08;
pub const FORMAT_STRING_U64: u8 = 0x0b;

/// Appends the file header to `buf`.
pub(crate) fn write_header(buf: &mut BytesMut) {
    buf.put_slice(&MAGIC);
    buf.put_u32_le(VERSION);
}

/// Validates magic and version at the start of `data`.
pub(crate) fn validate_header(data: &[u8]) -> Result<(), FormatError> {
    if data.len() < HEADER_LEN {
        return Err(FormatError::ShortRead("file header"));
    }
    if data[..8] != MAGIC {
        return Err(FormatError::BadMagic);
    }
    let version = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    if version != VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    Ok(())
}

/// The decoded shape of a format id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    /// Raw IEEE-754 float, 4 bytes.
    Float,
    /// Raw IEEE-754 double, 8 bytes, with a display decimals hint.
    Double { decimals: u8 },
    /// UTF-8 string with a little-endian length prefix of `len_width` bytes.
    Text { len_width: u8 },
    /// Integer of `width` bytes, divided by `scale` on decode when > 1.
    Scaled { width: u8, signed: bool, scale: u32 },
}

impl FormatKind {
    /// Resolves a format id to its payload shape.
    pub fn from_id(format_id: u8) -> Result<FormatKind, FormatError> {
        match format_id {
            FORMAT_FLOAT => return Ok(FormatKind::Float),
            0x01..=0x07 => {
                return Ok(FormatKind::Double {
                    decimals: format_id - 1,
                });
            }
            0x08 => return Ok(FormatKind::Text { len_width: 1 }),
            0x09 => return Ok(FormatKind::Text { len_width: 2 }),
            0x0a => return Ok(FormatKind::Text { len_width: 4 }),
            0x0b => return Ok(FormatKind::Text { len_width: 8 }),
            _ => {}
        }
        let hi = format_id >> 4;
        let lo = format_id & 0x0f;
        let width = match hi {
            0x1 | 0x9 => 1,
            0x2 | 0xa => 2,
            0x3 | 0xb => 3,
            0x4 | 0xc => 4,
            0x5 | 0xd => 8,
            _ => return Err(FormatError::UnknownFormat(format_id)),
        };
        if lo > 3 {
            return Err(FormatError::UnknownFormat(format_id));
        }
        let signed = hi <= 0x5;
        let scale = 10u32.pow(u32::from(lo));
        Ok(FormatKind::Scaled {
            width,
            signed,
            scale,
        })
    }

    /// Reads one value payload.
    pub(crate) fn decode(&self, cur: &mut Cursor<'_>) -> Result<Value, FormatError> {
        match *self {
            FormatKind::Float => Ok(Value::Double(f64::from(cur.read_f32("float")?))),
            FormatKind::Double { .. } => Ok(Value::Double(cur.read_f64("double")?)),
            FormatKind::Text { len_width } => {
                let len = match len_width {
                    1 => u64::from(cur.read_u8("string length")?),
                    2 => u64::from(cur.read_u16("string length")?),
                    4 => u64::from(cur.read_u32("string length")?),
                    _ => cur.read_u64("string length")?,
                };
                if len > cur.remaining() as u64 {
                    return Err(FormatError::StringTooLong {
                        len,
                        remaining: cur.remaining(),
                    });
                }
                let raw = cur.read_bytes(len as usize, "string bytes")?;
                Ok(Value::Text(String::from_utf8_lossy(raw).into_owned()))
            }
            FormatKind::Scaled {
                width,
                signed,
                scale,
            } => {
                if signed {
                    let raw = match width {
                        1 => i64::from(cur.read_i8("int8")?),
                        2 => i64::from(cur.read_i16("int16")?),
                        3 => i64::from(cur.read_i24("int24")?),
                        4 => i64::from(cur.read_i32("int32")?),
                        _ => cur.read_i64("int64")?,
                    };
                    if scale == 1 {
                        Ok(Value::Integer(raw))
                    } else {
                        Ok(Value::Double(raw as f64 / f64::from(scale)))
                    }
                } else {
                    let raw = match width {
                        1 => u64::from(cur.read_u8("uint8")?),
                        2 => u64::from(cur.read_u16("uint16")?),
                        3 => u64::from(cur.read_u24("uint24")?),
                        4 => u64::from(cur.read_u32("uint32")?),
                        _ => cur.read_u64("uint64")?,
                    };
                    if scale == 1 {
                        // u64 values past i64::MAX lose exactness rather than wrap.
                        Ok(i64::try_from(raw)
                            .map(Value::Integer)
                            .unwrap_or(Value::Double(raw as f64)))
                    } else {
                        Ok(Value::Double(raw as f64 / f64::from(scale)))
                    }
                }
            }
        }
    }

    /// Appends one value payload to `buf`.
    ///
    /// Returns `false` when the value cannot be represented in this format:
    /// wrong variant, non-finite, out of the integer range, or losing more
    /// than six decimals of precision through the fixed-point round-trip.
    pub(crate) fn encode(&self, value: &Value, buf: &mut BytesMut) -> bool {
        match *self {
            FormatKind::Double { .. } => match value.as_f64() {
                Some(v) if v.is_finite() => {
                    buf.put_f64_le(v);
                    true
                }
                _ => false,
            },
            FormatKind::Float => match value.as_f64() {
                Some(v) if v.is_finite() => {
                    let narrowed = v as f32;
                    if !equal_to_6_decimals(v, f64::from(narrowed)) {
                        return false;
                    }
                    buf.put_f32_le(narrowed);
                    true
                }
                _ => false,
            },
            FormatKind::Text { len_width } => {
                let Value::Text(text) = value else {
                    return false;
                };
                let raw = text.as_bytes();
                let max_len: u64 = match len_width {
                    1 => u64::from(u8::MAX),
                    2 => u64::from(u16::MAX),
                    4 => u64::from(u32::MAX),
                    _ => u64::MAX,
                };
                if raw.len() as u64 > max_len {
                    return false;
                }
                match len_width {
                    1 => buf.put_u8(raw.len() as u8),
                    2 => buf.put_u16_le(raw.len() as u16),
                    4 => buf.put_u32_le(raw.len() as u32),
                    _ => buf.put_u64_le(raw.len() as u64),
                }
                buf.put_slice(raw);
                true
            }
            FormatKind::Scaled {
                width,
                signed,
                scale,
            } => {
                if signed {
                    let Some(scaled) = scaled_signed(value, scale) else {
                        return false;
                    };
                    if !fits_signed(scaled, width) {
                        return false;
                    }
                    match width {
                        1 => buf.put_i8(scaled as i8),
                        2 => buf.put_i16_le(scaled as i16),
                        3 => codec::put_u24(buf, (scaled as i32 as u32) & 0xff_ffff),
                        4 => buf.put_i32_le(scaled as i32),
                        _ => buf.put_i64_le(scaled),
                    }
                } else {
                    let Some(scaled) = scaled_unsigned(value, scale) else {
                        return false;
                    };
                    if !fits_unsigned(scaled, width) {
                        return false;
                    }
                    match width {
                        1 => buf.put_u8(scaled as u8),
                        2 => buf.put_u16_le(scaled as u16),
                        3 => codec::put_u24(buf, scaled as u32),
                        4 => buf.put_u32_le(scaled as u32),
                        _ => buf.put_u64_le(scaled),
                    }
                }
                true
            }
        }
    }
}

/// Display decimal-places hint for a format id.
///
/// Doubles with a decimals suffix report it, scaled integers report their
/// divisor's digit count, and everything else falls back to 3.
pub fn decimal_places(format_id: u8) -> u8 {
    match format_id {
        0x02..=0x07 => format_id - 1,
        FORMAT_FLOAT | FORMAT_DOUBLE | 0x08..=0x0b => 3,
        _ => match FormatKind::from_id(format_id) {
            Ok(FormatKind::Scaled { .. }) => format_id & 0x0f,
            _ => 3,
        },
    }
}

/// Double format id carrying a display decimals hint.
pub fn double_format_for_decimals(decimals: u8) -> u8 {
    if decimals == 0 {
        FORMAT_DOUBLE
    } else if decimals >= 6 {
        FORMAT_DOUBLE_DEC6PLUS
    } else {
        FORMAT_DOUBLE + decimals
    }
}

/// Rounded-to-six-decimals equality, the precision contract of the
/// fixed-point formats.
fn equal_to_6_decimals(a: f64, b: f64) -> bool {
    (a - b).abs() < 0.5e-6 || round6(a) == round6(b)
}

fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

/// Scaled integer candidate for a signed format. `None` when the value is
/// the wrong variant, non-finite, outside the i64 domain, or loses more
/// than six decimals through the fixed-point round trip.
fn scaled_signed(value: &Value, scale: u32) -> Option<i64> {
    if scale == 1 {
        if let Value::Integer(v) = value {
            return Some(*v);
        }
    }
    let v = value.as_f64()?;
    if !v.is_finite() {
        return None;
    }
    let scaled = (v * f64::from(scale)).round();
    if !equal_to_6_decimals(v, scaled / f64::from(scale)) {
        return None;
    }
    // Domain check in f64 space; the cast below would saturate silently.
    if scaled < -(2f64.powi(63)) || scaled >= 2f64.powi(63) {
        return None;
    }
    Some(scaled as i64)
}

/// Scaled integer candidate for an unsigned format, validated in u64
/// space so values past `i64::MAX` stay exact.
fn scaled_unsigned(value: &Value, scale: u32) -> Option<u64> {
    if scale == 1 {
        if let Value::Integer(v) = value {
            return u64::try_from(*v).ok();
        }
    }
    let v = value.as_f64()?;
    if !v.is_finite() {
        return None;
    }
    let scaled = (v * f64::from(scale)).round();
    if !equal_to_6_decimals(v, scaled / f64::from(scale)) {
        return None;
    }
    if scaled < 0.0 || scaled >= 2f64.powi(64) {
        return None;
    }
    Some(scaled as u64)
}

/// Width checks run before any narrowing; the value is still in its full
/// domain here.
fn fits_signed(value: i64, width: u8) -> bool {
    if width == 8 {
        return true;
    }
    let bits = u32::from(width) * 8;
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    value >= min && value <= max
}

fn fits_unsigned(value: u64, width: u8) -> bool {
    if width == 8 {
        return true;
    }
    let bits = u32::from(width) * 8;
    value <= (1u64 << bits) - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(format_id: u8, payload: &[u8]) -> Value {
        let kind = FormatKind::from_id(format_id).unwrap();
        let mut cur = Cursor::new(payload);
        kind.decode(&mut cur).unwrap()
    }

    fn encode_one(format_id: u8, value: &Value) -> Option<Vec<u8>> {
        let kind = FormatKind::from_id(format_id).unwrap();
        let mut buf = BytesMut::new();
        kind.encode(value, &mut buf).then(|| buf.to_vec())
    }

    #[test]
    fn should_validate_header() {
        // given
        let mut buf = BytesMut::new();
        write_header(&mut buf);

        // then
        assert_eq!(&buf[..8], b"TSDB\x00\x00\x00\x00");
        assert_eq!(&buf[8..12], &[0x01, 0x00, 0x00, 0x00]);
        assert!(validate_header(&buf).is_ok());
    }

    #[test]
    fn should_reject_bad_magic_and_version() {
        // given
        let mut good = BytesMut::new();
        write_header(&mut good);
        let mut bad_magic = good.to_vec();
        bad_magic[0] = b'X';
        let mut bad_version = good.to_vec();
        bad_version[8] = 2;

        // then
        assert_eq!(validate_header(&bad_magic), Err(FormatError::BadMagic));
        assert_eq!(
            validate_header(&bad_version),
            Err(FormatError::UnsupportedVersion(2))
        );
        assert_eq!(
            validate_header(&good[..5]),
            Err(FormatError::ShortRead("file header"))
        );
    }

    #[test]
    fn should_decode_scaled_int16_to_double() {
        // given: raw 2345 with divisor 100 (format 0x22)
        let value = decode_one(0x22, &[0x29, 0x09]);

        // then
        assert_eq!(value, Value::Double(23.45));
    }

    #[test]
    fn should_decode_raw_integers_exactly() {
        assert_eq!(decode_one(0x10, &[0xff]), Value::Integer(-1));
        assert_eq!(decode_one(0x90, &[0xff]), Value::Integer(255));
        assert_eq!(
            decode_one(0x30, &[0x00, 0x00, 0x80]),
            Value::Integer(-8_388_608)
        );
        assert_eq!(
            decode_one(0xb0, &[0x00, 0x00, 0x80]),
            Value::Integer(8_388_608)
        );
    }

    #[test]
    fn should_decode_u64_beyond_i64_as_double() {
        // given: u64::MAX in format 0xd0
        let value = decode_one(0xd0, &u64::MAX.to_le_bytes());

        // then
        assert_eq!(value, Value::Double(u64::MAX as f64));
    }

    #[test]
    fn should_decode_float_and_double() {
        assert_eq!(
            decode_one(FORMAT_FLOAT, &23.45f32.to_le_bytes()),
            Value::Double(f64::from(23.45f32))
        );
        assert_eq!(
            decode_one(0x04, &(-0.125f64).to_le_bytes()),
            Value::Double(-0.125)
        );
    }

    #[test]
    fn should_decode_length_prefixed_string() {
        // given: "on" with u8 length prefix
        let value = decode_one(FORMAT_STRING_U8, &[0x02, b'o', b'n']);

        // then
        assert_eq!(value, Value::Text("on".to_string()));
    }

    #[test]
    fn should_reject_string_longer_than_remaining_bytes() {
        // given: length prefix of 200 with only 2 bytes behind it
        let kind = FormatKind::from_id(FORMAT_STRING_U8).unwrap();
        let mut cur = Cursor::new(&[200, b'o', b'n']);

        // when
        let result = kind.decode(&mut cur);

        // then
        assert_eq!(
            result,
            Err(FormatError::StringTooLong {
                len: 200,
                remaining: 2
            })
        );
    }

    #[test]
    fn should_reject_unknown_format_ids() {
        for id in [0x0c, 0x14, 0x64, 0x7f, 0x84, 0xe0, 0xd4] {
            assert_eq!(
                FormatKind::from_id(id),
                Err(FormatError::UnknownFormat(id)),
                "format id 0x{:02x}",
                id
            );
        }
    }

    #[test]
    fn should_roundtrip_scaled_encoding() {
        // given
        let encoded = encode_one(0x22, &Value::Double(23.45)).unwrap();

        // then
        assert_eq!(encoded, vec![0x29, 0x09]);
        assert_eq!(decode_one(0x22, &encoded), Value::Double(23.45));
    }

    #[test]
    fn should_reject_value_outside_scaled_range() {
        // int16 / 100 maxes out at 327.67
        assert!(encode_one(0x22, &Value::Double(400.0)).is_none());
        // uint8 cannot hold negatives
        assert!(encode_one(0x90, &Value::Integer(-1)).is_none());
        // int8 range
        assert!(encode_one(0x10, &Value::Integer(200)).is_none());
    }

    #[test]
    fn should_reject_value_losing_precision() {
        // 1.2345 cannot survive a divide-by-10 round trip
        assert!(encode_one(0x21, &Value::Double(1.2345)).is_none());
        // but it survives divide-by-10000... which is not a legal scale,
        // so the double format takes it
        assert!(encode_one(FORMAT_DOUBLE, &Value::Double(1.2345)).is_some());
    }

    #[test]
    fn should_encode_unsigned_64_bit_values_beyond_i64() {
        // given: a whole double past i64::MAX but within u64
        let encoded = encode_one(0xd0, &Value::Double(1.5e19)).unwrap();

        // then: exact bytes, not a saturated i64
        assert_eq!(
            encoded,
            15_000_000_000_000_000_000u64.to_le_bytes().to_vec()
        );
        assert_eq!(decode_one(0xd0, &encoded), Value::Double(1.5e19));
    }

    #[test]
    fn should_reject_whole_doubles_outside_the_integer_domain() {
        // past u64::MAX
        assert!(encode_one(0xd0, &Value::Double(2.0e19)).is_none());
        // past i64::MAX for the signed 8-byte format
        assert!(encode_one(0x50, &Value::Double(1.0e19)).is_none());
        // negative into an unsigned 8-byte format
        assert!(encode_one(0xd0, &Value::Integer(-1)).is_none());
        assert!(encode_one(0xd0, &Value::Double(-2.0)).is_none());
        // the divisor pushes a representable value out of range
        assert!(encode_one(0x53, &Value::Double(1.0e17)).is_none());
    }

    #[test]
    fn should_reject_non_finite_numerics() {
        assert!(encode_one(FORMAT_DOUBLE, &Value::Double(f64::NAN)).is_none());
        assert!(encode_one(FORMAT_FLOAT, &Value::Double(f64::INFINITY)).is_none());
        assert!(encode_one(0x22, &Value::Double(f64::NEG_INFINITY)).is_none());
    }

    #[test]
    fn should_encode_negative_int24() {
        // given
        let encoded = encode_one(0x32, &Value::Double(-23.45)).unwrap();

        // then
        assert_eq!(decode_one(0x32, &encoded), Value::Double(-23.45));
    }

    #[test]
    fn should_encode_string_with_u64_prefix() {
        // given
        let encoded = encode_one(FORMAT_STRING_U64, &Value::Text("hi".into())).unwrap();

        // then: 8-byte length prefix then the bytes
        assert_eq!(encoded.len(), 10);
        assert_eq!(&encoded[..8], &2u64.to_le_bytes());
        assert_eq!(&encoded[8..], b"hi");
    }

    #[test]
    fn should_report_decimal_places() {
        assert_eq!(decimal_places(FORMAT_DOUBLE), 3);
        assert_eq!(decimal_places(0x03), 2);
        assert_eq!(decimal_places(FORMAT_DOUBLE_DEC6PLUS), 6);
        assert_eq!(decimal_places(0x22), 2);
        assert_eq!(decimal_places(0xb1), 1);
        assert_eq!(decimal_places(0x90), 0);
        assert_eq!(decimal_places(FORMAT_STRING_U8), 3);
        assert_eq!(decimal_places(0xee), 3);
    }

    #[test]
    fn should_pick_double_format_for_decimals_hint() {
        assert_eq!(double_format_for_decimals(0), FORMAT_DOUBLE);
        assert_eq!(double_format_for_decimals(2), 0x03);
        assert_eq!(double_format_for_decimals(9), FORMAT_DOUBLE_DEC6PLUS);
    }
}
