//! # Column Types, Flags and Storage Models
//!
//! ## Column Types
//!
//! | Type          | Code | Stored as                         | Key bytes        |
//! |---------------|------|-----------------------------------|------------------|
//! | boolean       | 1    | 1 byte (0 or 1)                   | same             |
//! | int8..uint64  | 2-9  | 1/2/4/8 bytes little-endian       | same             |
//! | float32/64    | 10-11| IEEE 754 little-endian            | same             |
//! | time          | 12   | i64 seconds since the epoch       | same             |
//! | ms_time       | 13   | i64 milliseconds                  | same             |
//! | us_time       | 14   | i64 microseconds                  | same             |
//! | version       | 15   | u16 major + u16 minor             | same             |
//! | reference     | 16   | u64 file offset                   | same             |
//! | oid           | 17   | u64 object id                     | same             |
//! | p8/16/32string| 18-20| 1/2/4-byte length + UTF-8         | bytes + 0 byte   |
//! | buffer8/16/32 | 21-23| 1/2/4-byte length + raw bytes     | bytes + 0 byte   |
//!
//! Fixed-width types are self-delimiting. Strings and buffers are not once
//! their length prefix is dropped, so row keys terminate them with a zero
//! byte.

use std::fmt;
use std::ops::BitOr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Time,
    MsTime,
    UsTime,
    Version,
    Reference,
    Oid,
    P8String,
    P16String,
    P32String,
    Buffer8,
    Buffer16,
    Buffer32,
}

impl ColumnType {
    pub const ALL: [ColumnType; 23] = [
        ColumnType::Boolean,
        ColumnType::Int8,
        ColumnType::UInt8,
        ColumnType::Int16,
        ColumnType::UInt16,
        ColumnType::Int32,
        ColumnType::UInt32,
        ColumnType::Int64,
        ColumnType::UInt64,
        ColumnType::Float32,
        ColumnType::Float64,
        ColumnType::Time,
        ColumnType::MsTime,
        ColumnType::UsTime,
        ColumnType::Version,
        ColumnType::Reference,
        ColumnType::Oid,
        ColumnType::P8String,
        ColumnType::P16String,
        ColumnType::P32String,
        ColumnType::Buffer8,
        ColumnType::Buffer16,
        ColumnType::Buffer32,
    ];

    /// Persistent type code. Never reuse or renumber.
    pub fn code(self) -> u8 {
        // INVARIANT: ALL lists every variant once, and has fewer than 255 entries
        Self::ALL.iter().position(|&t| t == self).unwrap() as u8 + 1
    }

    pub fn from_code(code: u8) -> Option<Self> {
        (code as usize)
            .checked_sub(1)
            .and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Int8 => "int8",
            ColumnType::UInt8 => "uint8",
            ColumnType::Int16 => "int16",
            ColumnType::UInt16 => "uint16",
            ColumnType::Int32 => "int32",
            ColumnType::UInt32 => "uint32",
            ColumnType::Int64 => "int64",
            ColumnType::UInt64 => "uint64",
            ColumnType::Float32 => "float32",
            ColumnType::Float64 => "float64",
            ColumnType::Time => "time",
            ColumnType::MsTime => "ms_time",
            ColumnType::UsTime => "us_time",
            ColumnType::Version => "version",
            ColumnType::Reference => "reference",
            ColumnType::Oid => "oid",
            ColumnType::P8String => "p8string",
            ColumnType::P16String => "p16string",
            ColumnType::P32String => "p32string",
            ColumnType::Buffer8 => "buffer8",
            ColumnType::Buffer16 => "buffer16",
            ColumnType::Buffer32 => "buffer32",
        }
    }

    /// Parses the names used by table descriptions ("uint32", "p8string").
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Width of fixed-size types, `None` for strings and buffers.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            ColumnType::Boolean | ColumnType::Int8 | ColumnType::UInt8 => Some(1),
            ColumnType::Int16 | ColumnType::UInt16 => Some(2),
            ColumnType::Int32 | ColumnType::UInt32 | ColumnType::Float32 | ColumnType::Version => {
                Some(4)
            }
            ColumnType::Int64
            | ColumnType::UInt64
            | ColumnType::Float64
            | ColumnType::Time
            | ColumnType::MsTime
            | ColumnType::UsTime
            | ColumnType::Reference
            | ColumnType::Oid => Some(8),
            _ => None,
        }
    }

    /// Width of the length prefix of strings and buffers.
    pub fn length_prefix(self) -> Option<usize> {
        match self {
            ColumnType::P8String | ColumnType::Buffer8 => Some(1),
            ColumnType::P16String | ColumnType::Buffer16 => Some(2),
            ColumnType::P32String | ColumnType::Buffer32 => Some(4),
            _ => None,
        }
    }

    /// Largest payload a value of this type can carry.
    pub fn max_length(self) -> Option<u64> {
        self.length_prefix().map(|bytes| match bytes {
            1 => u8::MAX as u64,
            2 => u16::MAX as u64,
            _ => u32::MAX as u64,
        })
    }

    pub fn is_string(self) -> bool {
        matches!(
            self,
            ColumnType::P8String | ColumnType::P16String | ColumnType::P32String
        )
    }

    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            ColumnType::Buffer8 | ColumnType::Buffer16 | ColumnType::Buffer32
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, ColumnType::Float32 | ColumnType::Float64)
    }

    pub fn is_time(self) -> bool {
        matches!(self, ColumnType::Time | ColumnType::MsTime | ColumnType::UsTime)
    }

    /// Booleans, integers, times, references and object ids: every type
    /// stored as a plain integer.
    pub fn is_integer(self) -> bool {
        self.fixed_size().is_some() && !self.is_float() && self != ColumnType::Version
    }

    /// `true` when the row key bytes of this type need no terminator.
    pub fn is_self_delimiting(self) -> bool {
        self.fixed_size().is_some()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ColumnFlags(u32);

impl ColumnFlags {
    pub const NONE: Self = Self(0);
    /// Length or value limits apply.
    pub const LIMITED: Self = Self(1);
    pub const REQUIRED: Self = Self(1 << 1);
    pub const ENCRYPT: Self = Self(1 << 2);
    pub const DEFAULT_VALUE: Self = Self(1 << 3);
    pub const BLOB: Self = Self(1 << 4);
    /// Maintained by the engine, not by applications.
    pub const SYSTEM: Self = Self(1 << 5);

    const NAMES: [(ColumnFlags, &'static str); 6] = [
        (Self::LIMITED, "LIMITED"),
        (Self::REQUIRED, "REQUIRED"),
        (Self::ENCRYPT, "ENCRYPT"),
        (Self::DEFAULT_VALUE, "DEFAULT_VALUE"),
        (Self::BLOB, "BLOB"),
        (Self::SYSTEM, "SYSTEM"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ColumnFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for ColumnFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "ColumnFlags({})", names.join(" | "))
    }
}

/// How a table is expected to be used. Recorded with the schema so tools can
/// pick sensible maintenance policies; the storage layer treats all models
/// the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Model {
    #[default]
    Content,
    Data,
    Debug,
    Log,
    Queue,
    Secure,
    Session,
    Sequential,
    Tree,
}

impl Model {
    pub const ALL: [Model; 9] = [
        Model::Content,
        Model::Data,
        Model::Debug,
        Model::Log,
        Model::Queue,
        Model::Secure,
        Model::Session,
        Model::Sequential,
        Model::Tree,
    ];

    pub fn code(self) -> u8 {
        // INVARIANT: ALL lists every variant once
        Self::ALL.iter().position(|&m| m == self).unwrap() as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Model::Content => "content",
            Model::Data => "data",
            Model::Debug => "debug",
            Model::Log => "log",
            Model::Queue => "queue",
            Model::Secure => "secure",
            Model::Session => "session",
            Model::Sequential => "sequential",
            Model::Tree => "tree",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|m| m.name() == name)
    }
}
