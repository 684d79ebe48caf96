//! # Cell Values
//!
//! [`Value`] is the in-memory form of one cell. Its binary form is chosen by
//! the column type, not by the value: a `Value::String` is written with a
//! 1, 2 or 4-byte length prefix depending on whether the column is a
//! `p8string`, `p16string` or `p32string`.
//!
//! ## Conversions
//!
//! [`Value::convert_to`] is used when a row written under an older schema is
//! read with a column whose type changed. Conversions are checked; a value
//! that cannot be represented in the target type is a schema mismatch.
//!
//! | From               | To                  | Rule                                  |
//! |--------------------|---------------------|---------------------------------------|
//! | integer family     | integer family      | range checked                         |
//! | time / ms / us     | time / ms / us      | rescaled, range checked               |
//! | integer family     | float32 / float64   | nearest float                         |
//! | float              | integer family      | only finite integral values in range  |
//! | float64            | float32             | finite values within f32 range        |
//! | version            | integer family      | `major << 16 \| minor`                |
//! | string / buffer    | string / buffer     | length checked, buffers must be UTF-8 |
//!
//! The integer family is boolean, signed and unsigned integers, times,
//! references and object ids.

use std::fmt;

use eyre::{bail, Result};

use crate::encoding::{put_u16, put_u32, put_u64, put_u8, Reader};
use crate::error::StorageError;
use crate::schema::ColumnType;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    /// Seconds since the Unix epoch.
    Time(i64),
    /// Milliseconds since the Unix epoch.
    MsTime(i64),
    /// Microseconds since the Unix epoch.
    UsTime(i64),
    Version { major: u16, minor: u16 },
    Reference(u64),
    Oid(u64),
    String(String),
    Buffer(Vec<u8>),
}

fn mismatch(value: &Value, target: ColumnType) -> eyre::Report {
    StorageError::SchemaMismatch(format!("cannot convert {} to {}", value, target)).into()
}

fn time_scale(ty: ColumnType) -> i128 {
    match ty {
        ColumnType::Time => 1_000_000,
        ColumnType::MsTime => 1_000,
        _ => 1,
    }
}

impl Value {
    /// `true` when this value can be stored in a column of type `ty`
    /// without conversion.
    pub fn matches(&self, ty: ColumnType) -> bool {
        match self {
            Value::String(_) => ty.is_string(),
            Value::Buffer(_) => ty.is_buffer(),
            _ => self.natural_type() == Some(ty),
        }
    }

    fn natural_type(&self) -> Option<ColumnType> {
        Some(match self {
            Value::Boolean(_) => ColumnType::Boolean,
            Value::Int8(_) => ColumnType::Int8,
            Value::UInt8(_) => ColumnType::UInt8,
            Value::Int16(_) => ColumnType::Int16,
            Value::UInt16(_) => ColumnType::UInt16,
            Value::Int32(_) => ColumnType::Int32,
            Value::UInt32(_) => ColumnType::UInt32,
            Value::Int64(_) => ColumnType::Int64,
            Value::UInt64(_) => ColumnType::UInt64,
            Value::Float32(_) => ColumnType::Float32,
            Value::Float64(_) => ColumnType::Float64,
            Value::Time(_) => ColumnType::Time,
            Value::MsTime(_) => ColumnType::MsTime,
            Value::UsTime(_) => ColumnType::UsTime,
            Value::Version { .. } => ColumnType::Version,
            Value::Reference(_) => ColumnType::Reference,
            Value::Oid(_) => ColumnType::Oid,
            Value::String(_) | Value::Buffer(_) => return None,
        })
    }

    /// Length of string and buffer payloads.
    pub fn payload_len(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.len()),
            Value::Buffer(b) => Some(b.len()),
            _ => None,
        }
    }

    /// Numeric view used by min/max checks.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => self.as_i128().map(|v| v as f64),
        }
    }

    fn as_i128(&self) -> Option<i128> {
        Some(match *self {
            Value::Boolean(v) => v as i128,
            Value::Int8(v) => v as i128,
            Value::UInt8(v) => v as i128,
            Value::Int16(v) => v as i128,
            Value::UInt16(v) => v as i128,
            Value::Int32(v) => v as i128,
            Value::UInt32(v) => v as i128,
            Value::Int64(v) | Value::Time(v) | Value::MsTime(v) | Value::UsTime(v) => v as i128,
            Value::UInt64(v) | Value::Reference(v) | Value::Oid(v) => v as i128,
            _ => return None,
        })
    }

    fn from_i128(ty: ColumnType, v: i128) -> Option<Value> {
        Some(match ty {
            ColumnType::Boolean => match v {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                _ => return None,
            },
            ColumnType::Int8 => Value::Int8(i8::try_from(v).ok()?),
            ColumnType::UInt8 => Value::UInt8(u8::try_from(v).ok()?),
            ColumnType::Int16 => Value::Int16(i16::try_from(v).ok()?),
            ColumnType::UInt16 => Value::UInt16(u16::try_from(v).ok()?),
            ColumnType::Int32 => Value::Int32(i32::try_from(v).ok()?),
            ColumnType::UInt32 => Value::UInt32(u32::try_from(v).ok()?),
            ColumnType::Int64 => Value::Int64(i64::try_from(v).ok()?),
            ColumnType::UInt64 => Value::UInt64(u64::try_from(v).ok()?),
            ColumnType::Time => Value::Time(i64::try_from(v).ok()?),
            ColumnType::MsTime => Value::MsTime(i64::try_from(v).ok()?),
            ColumnType::UsTime => Value::UsTime(i64::try_from(v).ok()?),
            ColumnType::Reference => Value::Reference(u64::try_from(v).ok()?),
            ColumnType::Oid => Value::Oid(u64::try_from(v).ok()?),
            ColumnType::Version => {
                let packed = u32::try_from(v).ok()?;
                Value::Version {
                    major: (packed >> 16) as u16,
                    minor: packed as u16,
                }
            }
            _ => return None,
        })
    }

    /// Converts the value for storage in a column of type `target`.
    pub fn convert_to(&self, target: ColumnType) -> Result<Value> {
        if self.matches(target) {
            if let Some(len) = self.payload_len() {
                if target.max_length().is_some_and(|max| len as u64 > max) {
                    return Err(mismatch(self, target));
                }
            }
            return Ok(self.clone());
        }

        let converted = match (self, target) {
            (Value::String(s), t) if t.is_buffer() => Some(Value::Buffer(s.as_bytes().to_vec())),
            (Value::Buffer(b), t) if t.is_string() => {
                String::from_utf8(b.clone()).ok().map(Value::String)
            }
            (Value::Version { major, minor }, t) if t.is_integer() => {
                Self::from_i128(t, ((*major as i128) << 16) | *minor as i128)
            }
            (Value::Float32(v), ColumnType::Float64) => Some(Value::Float64(*v as f64)),
            (Value::Float64(v), ColumnType::Float32) => {
                (v.is_finite() && v.abs() <= f32::MAX as f64).then(|| Value::Float32(*v as f32))
            }
            (Value::Float32(_) | Value::Float64(_), t) if t.is_integer() => {
                // INVARIANT: floats always have an f64 view
                let v = self.as_f64().unwrap();
                if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e38 {
                    Self::from_i128(t, v as i128)
                } else {
                    None
                }
            }
            (v, ColumnType::Float32) => v.as_i128().map(|i| Value::Float32(i as f32)),
            (v, ColumnType::Float64) => v.as_i128().map(|i| Value::Float64(i as f64)),
            (v, t) => match (v.as_i128(), v.natural_type()) {
                (Some(i), Some(from)) if from.is_time() && t.is_time() => {
                    let micros = i * time_scale(from);
                    Self::from_i128(t, micros / time_scale(t))
                }
                (Some(i), _) => Self::from_i128(t, i),
                (None, _) => None,
            },
        };

        converted
            .filter(|v| match (v.payload_len(), target.max_length()) {
                (Some(len), Some(max)) => len as u64 <= max,
                _ => true,
            })
            .ok_or_else(|| mismatch(self, target))
    }

    /// Appends the stored form of the value for a column of type `ty`.
    pub fn encode(&self, ty: ColumnType, buf: &mut Vec<u8>) -> Result<()> {
        if !self.matches(ty) {
            bail!(StorageError::SchemaMismatch(format!(
                "value {} cannot be stored in a {} column",
                self, ty
            )));
        }

        if let Some(len) = self.payload_len() {
            // INVARIANT: only string and buffer types match payload values
            let max = ty.max_length().unwrap();
            if len as u64 > max {
                bail!(StorageError::Size(format!(
                    "{} bytes do not fit a {} column (max {})",
                    len, ty, max
                )));
            }
            match ty.length_prefix() {
                Some(1) => put_u8(buf, len as u8),
                Some(2) => put_u16(buf, len as u16),
                _ => put_u32(buf, len as u32),
            }
        }

        self.put_canonical(buf);
        Ok(())
    }

    /// Appends the row-key form: the stored form without length prefix,
    /// followed by a zero byte for strings and buffers.
    pub fn encode_key(&self, ty: ColumnType, buf: &mut Vec<u8>) -> Result<()> {
        if !self.matches(ty) {
            bail!(StorageError::SchemaMismatch(format!(
                "value {} cannot be used as a {} key",
                self, ty
            )));
        }
        self.put_canonical(buf);
        if !ty.is_self_delimiting() {
            buf.push(0);
        }
        Ok(())
    }

    fn put_canonical(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Boolean(v) => put_u8(buf, *v as u8),
            Value::Int8(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::UInt8(v) => put_u8(buf, *v),
            Value::Int16(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::UInt16(v) => put_u16(buf, *v),
            Value::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::UInt32(v) => put_u32(buf, *v),
            Value::Int64(v) | Value::Time(v) | Value::MsTime(v) | Value::UsTime(v) => {
                buf.extend_from_slice(&v.to_le_bytes())
            }
            Value::UInt64(v) | Value::Reference(v) | Value::Oid(v) => put_u64(buf, *v),
            Value::Float32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Float64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Version { major, minor } => {
                put_u16(buf, *major);
                put_u16(buf, *minor);
            }
            Value::String(s) => buf.extend_from_slice(s.as_bytes()),
            Value::Buffer(b) => buf.extend_from_slice(b),
        }
    }

    /// Reads one value stored for a column of type `ty`.
    pub fn decode(ty: ColumnType, reader: &mut Reader<'_>) -> Result<Value> {
        let what = ty.name();
        Ok(match ty {
            ColumnType::Boolean => Value::Boolean(reader.u8(what)? != 0),
            ColumnType::Int8 => Value::Int8(reader.u8(what)? as i8),
            ColumnType::UInt8 => Value::UInt8(reader.u8(what)?),
            ColumnType::Int16 => Value::Int16(reader.u16(what)? as i16),
            ColumnType::UInt16 => Value::UInt16(reader.u16(what)?),
            ColumnType::Int32 => Value::Int32(reader.u32(what)? as i32),
            ColumnType::UInt32 => Value::UInt32(reader.u32(what)?),
            ColumnType::Int64 => Value::Int64(reader.u64(what)? as i64),
            ColumnType::UInt64 => Value::UInt64(reader.u64(what)?),
            ColumnType::Float32 => Value::Float32(f32::from_bits(reader.u32(what)?)),
            ColumnType::Float64 => Value::Float64(reader.f64(what)?),
            ColumnType::Time => Value::Time(reader.u64(what)? as i64),
            ColumnType::MsTime => Value::MsTime(reader.u64(what)? as i64),
            ColumnType::UsTime => Value::UsTime(reader.u64(what)? as i64),
            ColumnType::Version => Value::Version {
                major: reader.u16(what)?,
                minor: reader.u16(what)?,
            },
            ColumnType::Reference => Value::Reference(reader.u64(what)?),
            ColumnType::Oid => Value::Oid(reader.u64(what)?),
            ColumnType::P8String
            | ColumnType::P16String
            | ColumnType::P32String
            | ColumnType::Buffer8
            | ColumnType::Buffer16
            | ColumnType::Buffer32 => {
                let len = match ty.length_prefix() {
                    Some(1) => reader.u8(what)? as usize,
                    Some(2) => reader.u16(what)? as usize,
                    _ => reader.u32(what)? as usize,
                };
                let bytes = reader.bytes(len, what)?.to_vec();
                if ty.is_string() {
                    Value::String(String::from_utf8(bytes).map_err(|_| {
                        StorageError::Corrupt(format!("{} value is not valid UTF-8", what))
                    })?)
                } else {
                    Value::Buffer(bytes)
                }
            }
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::UInt8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Time(v) => write!(f, "{}s", v),
            Value::MsTime(v) => write!(f, "{}ms", v),
            Value::UsTime(v) => write!(f, "{}us", v),
            Value::Version { major, minor } => write!(f, "{}.{}", major, minor),
            Value::Reference(v) => write!(f, "@{}", v),
            Value::Oid(v) => write!(f, "oid:{}", v),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Buffer(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Buffer(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};

    fn stored(value: &Value, ty: ColumnType) -> Vec<u8> {
        let mut buf = Vec::new();
        value.encode(ty, &mut buf).unwrap();
        buf
    }

    #[test]
    fn strings_carry_the_column_prefix() {
        let value = Value::from("abc");

        assert_eq!(stored(&value, ColumnType::P8String), vec![3, b'a', b'b', b'c']);
        assert_eq!(stored(&value, ColumnType::P16String), vec![3, 0, b'a', b'b', b'c']);
        assert_eq!(stored(&value, ColumnType::P32String).len(), 7);
    }

    #[test]
    fn decode_reads_stored_form() {
        let cases = [
            (Value::Int16(-2), ColumnType::Int16),
            (Value::Version { major: 3, minor: 9 }, ColumnType::Version),
            (Value::MsTime(1_700_000_000_000), ColumnType::MsTime),
            (Value::Float32(0.25), ColumnType::Float32),
            (Value::Buffer(vec![0, 1, 2]), ColumnType::Buffer16),
        ];

        for (value, ty) in cases {
            let bytes = stored(&value, ty);
            let mut reader = Reader::new(&bytes);
            assert_eq!(Value::decode(ty, &mut reader).unwrap(), value);
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn oversized_string_is_size_error() {
        let value = Value::String("x".repeat(300));
        let mut buf = Vec::new();

        let err = value.encode(ColumnType::P8String, &mut buf).unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Size));
    }

    #[test]
    fn wrong_type_is_schema_mismatch() {
        let mut buf = Vec::new();

        let err = Value::Int32(1).encode(ColumnType::Int64, &mut buf).unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::SchemaMismatch));
    }

    #[test]
    fn key_form_terminates_strings_only() {
        let mut buf = Vec::new();
        Value::UInt16(0x0102).encode_key(ColumnType::UInt16, &mut buf).unwrap();
        Value::from("ab").encode_key(ColumnType::P32String, &mut buf).unwrap();

        assert_eq!(buf, vec![0x02, 0x01, b'a', b'b', 0]);
    }

    #[test]
    fn integer_conversions_are_range_checked() {
        assert_eq!(
            Value::Int64(200).convert_to(ColumnType::UInt8).unwrap(),
            Value::UInt8(200)
        );
        assert_eq!(
            Value::UInt8(1).convert_to(ColumnType::Boolean).unwrap(),
            Value::Boolean(true)
        );

        let err = Value::Int64(-1).convert_to(ColumnType::UInt32).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::SchemaMismatch));
    }

    #[test]
    fn time_conversions_rescale() {
        assert_eq!(
            Value::Time(2).convert_to(ColumnType::MsTime).unwrap(),
            Value::MsTime(2000)
        );
        assert_eq!(
            Value::UsTime(3_500_000).convert_to(ColumnType::Time).unwrap(),
            Value::Time(3)
        );
        assert_eq!(
            Value::Time(5).convert_to(ColumnType::Int64).unwrap(),
            Value::Int64(5)
        );
    }

    #[test]
    fn float_conversions() {
        assert_eq!(
            Value::Float64(42.0).convert_to(ColumnType::Int32).unwrap(),
            Value::Int32(42)
        );
        assert!(Value::Float64(1.5).convert_to(ColumnType::Int32).is_err());
        assert!(Value::Float64(f64::MAX).convert_to(ColumnType::Float32).is_err());
        assert_eq!(
            Value::Int32(7).convert_to(ColumnType::Float64).unwrap(),
            Value::Float64(7.0)
        );
    }

    #[test]
    fn string_and_buffer_conversions() {
        assert_eq!(
            Value::from("hi").convert_to(ColumnType::Buffer8).unwrap(),
            Value::Buffer(b"hi".to_vec())
        );
        assert!(Value::Buffer(vec![0xff, 0xfe]).convert_to(ColumnType::P8String).is_err());
        assert!(Value::String("x".repeat(256)).convert_to(ColumnType::P8String).is_err());
        assert!(Value::String("x".repeat(256)).convert_to(ColumnType::P16String).is_ok());
    }

    #[test]
    fn version_packs_into_integers() {
        assert_eq!(
            Value::Version { major: 1, minor: 2 }
                .convert_to(ColumnType::UInt32)
                .unwrap(),
            Value::UInt32(0x0001_0002)
        );
        assert_eq!(
            Value::UInt32(0x0003_0004).convert_to(ColumnType::Version).unwrap(),
            Value::Version { major: 3, minor: 4 }
        );
    }
}
