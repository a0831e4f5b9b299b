//! CBOR encoding of [`PackValue`].
//!
//! Covers the subset needed for constant payloads: definite-length items,
//! text-keyed maps and the simple values `false`, `true`, `null` and
//! `undefined`. Floats are written as `f32` when that is lossless.

use json_crdt_buffers::{is_float32, BufferError, Reader, Writer};
use thiserror::Error;

use crate::{PackMap, PackValue};

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_SIMPLE: u8 = 7;

const FALSE: u8 = 0xf4;
const TRUE: u8 = 0xf5;
const NULL: u8 = 0xf6;
const UNDEFINED: u8 = 0xf7;
const FLOAT16: u8 = 0xf9;
const FLOAT32: u8 = 0xfa;
const FLOAT64: u8 = 0xfb;

/// Nesting limit for decoding untrusted input.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CborError {
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("unsupported cbor item 0x{0:02x}")]
    Unsupported(u8),
    #[error("cbor map key is not a text string")]
    NonTextKey,
    #[error("negative integer out of range")]
    IntegerOverflow,
    #[error("cbor nesting deeper than {MAX_DEPTH}")]
    TooDeep,
}

/// Encodes `value` into a fresh byte vector.
pub fn encode(value: &PackValue) -> Vec<u8> {
    let mut writer = Writer::with_alloc_size(256);
    write_any(&mut writer, value);
    writer.flush()
}

/// Decodes exactly one item; trailing bytes are left unread and ignored.
pub fn decode(data: &[u8]) -> Result<PackValue, CborError> {
    read_any(&mut Reader::new(data))
}

pub fn write_any(w: &mut Writer, value: &PackValue) {
    match value {
        PackValue::Null => w.u8(NULL),
        PackValue::Undefined => w.u8(UNDEFINED),
        PackValue::Bool(b) => w.u8(if *b { TRUE } else { FALSE }),
        PackValue::Integer(i) => write_integer(w, *i),
        PackValue::UInteger(u) => write_head(w, MAJOR_UNSIGNED, *u),
        PackValue::Float(f) => write_float(w, *f),
        PackValue::Bytes(b) => {
            write_head(w, MAJOR_BYTES, b.len() as u64);
            w.buf(b);
        }
        PackValue::Str(s) => write_str(w, s),
        PackValue::Array(items) => {
            write_head(w, MAJOR_ARRAY, items.len() as u64);
            for item in items {
                write_any(w, item);
            }
        }
        PackValue::Object(map) => {
            write_head(w, MAJOR_MAP, map.len() as u64);
            for (key, item) in map {
                write_str(w, key);
                write_any(w, item);
            }
        }
    }
}

pub fn write_integer(w: &mut Writer, int: i64) {
    if int >= 0 {
        write_head(w, MAJOR_UNSIGNED, int as u64);
    } else {
        write_head(w, MAJOR_NEGATIVE, (-1i64 - int) as u64);
    }
}

pub fn write_float(w: &mut Writer, float: f64) {
    if is_float32(float) {
        w.u8(FLOAT32);
        w.f32(float as f32);
    } else {
        w.u8(FLOAT64);
        w.f64(float);
    }
}

pub fn write_str(w: &mut Writer, s: &str) {
    write_head(w, MAJOR_TEXT, s.len() as u64);
    w.utf8(s);
}

/// Writes a major type with its argument in the shortest form.
fn write_head(w: &mut Writer, major: u8, arg: u64) {
    let overlay = major << 5;
    if arg <= 23 {
        w.u8(overlay | arg as u8);
    } else if arg <= 0xff {
        w.u8(overlay | 24);
        w.u8(arg as u8);
    } else if arg <= 0xffff {
        w.u8(overlay | 25);
        w.u16(arg as u16);
    } else if arg <= 0xffff_ffff {
        w.u8(overlay | 26);
        w.u32(arg as u32);
    } else {
        w.u8(overlay | 27);
        w.u64(arg);
    }
}

pub fn read_any(r: &mut Reader<'_>) -> Result<PackValue, CborError> {
    read_at_depth(r, 0)
}

fn read_at_depth(r: &mut Reader<'_>, depth: usize) -> Result<PackValue, CborError> {
    if depth > MAX_DEPTH {
        return Err(CborError::TooDeep);
    }
    let head = r.u8()?;
    let major = head >> 5;
    if major == MAJOR_SIMPLE {
        return read_simple(r, head);
    }
    let arg = read_arg(r, head)?;
    Ok(match major {
        MAJOR_UNSIGNED => PackValue::from(arg),
        MAJOR_NEGATIVE => {
            let n = i64::try_from(arg).map_err(|_| CborError::IntegerOverflow)?;
            PackValue::Integer(-1 - n)
        }
        MAJOR_BYTES => PackValue::Bytes(r.buf(length(arg)?)?.to_vec()),
        MAJOR_TEXT => PackValue::Str(r.utf8(length(arg)?)?.to_owned()),
        MAJOR_ARRAY => {
            let len = length(arg)?;
            // Each item takes at least one byte.
            let mut items = Vec::with_capacity(len.min(r.size()));
            for _ in 0..len {
                items.push(read_at_depth(r, depth + 1)?);
            }
            PackValue::Array(items)
        }
        MAJOR_MAP => {
            let len = length(arg)?;
            let mut map = PackMap::with_capacity(len.min(r.size()));
            for _ in 0..len {
                let key = match read_at_depth(r, depth + 1)? {
                    PackValue::Str(key) => key,
                    _ => return Err(CborError::NonTextKey),
                };
                let value = read_at_depth(r, depth + 1)?;
                map.insert(key, value);
            }
            PackValue::Object(map)
        }
        _ => return Err(CborError::Unsupported(head)),
    })
}

fn read_simple(r: &mut Reader<'_>, head: u8) -> Result<PackValue, CborError> {
    Ok(match head {
        FALSE => PackValue::Bool(false),
        TRUE => PackValue::Bool(true),
        NULL => PackValue::Null,
        UNDEFINED => PackValue::Undefined,
        FLOAT16 => PackValue::Float(f16_to_f64(r.u16()?)),
        FLOAT32 => PackValue::Float(r.f32()? as f64),
        FLOAT64 => PackValue::Float(r.f64()?),
        _ => return Err(CborError::Unsupported(head)),
    })
}

fn read_arg(r: &mut Reader<'_>, head: u8) -> Result<u64, CborError> {
    Ok(match head & 0b1_1111 {
        minor @ 0..=23 => minor as u64,
        24 => r.u8()? as u64,
        25 => r.u16()? as u64,
        26 => r.u32()? as u64,
        27 => r.u64()?,
        _ => return Err(CborError::Unsupported(head)),
    })
}

fn length(arg: u64) -> Result<usize, CborError> {
    usize::try_from(arg).map_err(|_| CborError::IntegerOverflow)
}

fn f16_to_f64(half: u16) -> f64 {
    let exp = (half >> 10) & 0x1f;
    let mant = (half & 0x3ff) as f64;
    let value = match exp {
        0 => mant * 2f64.powi(-24),
        0x1f if mant == 0.0 => f64::INFINITY,
        0x1f => f64::NAN,
        _ => (1.0 + mant / 1024.0) * 2f64.powi(exp as i32 - 15),
    };
    if half & 0x8000 != 0 {
        -value
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn pack_value() -> impl Strategy<Value = PackValue> {
        let leaf = prop_oneof![
            Just(PackValue::Null),
            Just(PackValue::Undefined),
            any::<bool>().prop_map(PackValue::Bool),
            any::<i64>().prop_map(PackValue::Integer),
            (i64::MAX as u64 + 1..=u64::MAX).prop_map(PackValue::UInteger),
            any::<f64>()
                .prop_filter("nan never equals itself", |f| !f.is_nan())
                .prop_map(PackValue::Float),
            prop::collection::vec(any::<u8>(), 0..8).prop_map(PackValue::Bytes),
            ".{0,8}".prop_map(PackValue::Str),
        ];
        leaf.prop_recursive(4, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(PackValue::Array),
                prop::collection::vec(("[a-z]{0,4}", inner), 0..6)
                    .prop_map(|entries| PackValue::Object(entries.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(value in pack_value()) {
            prop_assert_eq!(decode(&encode(&value)).unwrap(), value);
        }
    }

    #[test]
    fn small_values_use_one_byte() {
        assert_eq!(encode(&PackValue::Integer(0)), vec![0x00]);
        assert_eq!(encode(&PackValue::Integer(23)), vec![0x17]);
        assert_eq!(encode(&PackValue::Integer(-1)), vec![0x20]);
        assert_eq!(encode(&PackValue::Bool(true)), vec![0xf5]);
        assert_eq!(encode(&PackValue::Undefined), vec![0xf7]);
    }

    #[test]
    fn integer_boundaries() {
        for n in [24i64, 255, 256, 65535, 65536, 1 << 32, i64::MAX, i64::MIN, -25] {
            let bytes = encode(&PackValue::Integer(n));
            assert_eq!(decode(&bytes).unwrap(), PackValue::Integer(n), "{n}");
        }
        let big = PackValue::UInteger(u64::MAX);
        assert_eq!(decode(&encode(&big)).unwrap(), big);
    }

    #[test]
    fn floats_prefer_f32_when_lossless() {
        assert_eq!(encode(&PackValue::Float(1.5)).len(), 5);
        assert_eq!(encode(&PackValue::Float(0.1)).len(), 9);
        assert_eq!(decode(&encode(&PackValue::Float(0.1))).unwrap(), PackValue::Float(0.1));
    }

    #[test]
    fn decodes_half_floats() {
        assert_eq!(decode(&[0xf9, 0x3c, 0x00]).unwrap(), PackValue::Float(1.0));
        assert_eq!(decode(&[0xf9, 0xc0, 0x00]).unwrap(), PackValue::Float(-2.0));
    }

    #[test]
    fn nested_document() {
        let value = PackValue::from(json!({"a": [1, "two", {"b": null}], "c": 3.25}));
        assert_eq!(decode(&encode(&value)).unwrap(), value);
        let bin = PackValue::Array(vec![PackValue::Bytes(vec![0, 1, 2]), PackValue::Undefined]);
        assert_eq!(decode(&encode(&bin)).unwrap(), bin);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(decode(&[]), Err(CborError::Buffer(_))));
        assert!(matches!(decode(&[0x62, b'a']), Err(CborError::Buffer(_))));
        assert_eq!(decode(&[0x9f]), Err(CborError::Unsupported(0x9f)));
        assert_eq!(decode(&[0xa1, 0x01, 0x01]), Err(CborError::NonTextKey));
    }

    #[test]
    fn rejects_excessive_nesting() {
        let data = vec![0x81u8; MAX_DEPTH + 2];
        assert_eq!(decode(&data), Err(CborError::TooDeep));
    }
}
