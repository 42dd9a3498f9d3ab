use derive_more::Display;
use serde::{Deserialize, Serialize};

/// The element type of an attribute or metadata value.
///
/// Each data type has a stable one byte tag used by the binary metadata encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datatype {
    /// `int8`
    #[display("int8")]
    Int8,
    /// `int16`
    #[display("int16")]
    Int16,
    /// `int32`
    #[display("int32")]
    Int32,
    /// `int64`
    #[display("int64")]
    Int64,
    /// `uint8`
    #[display("uint8")]
    #[serde(rename = "uint8")]
    UInt8,
    /// `uint16`
    #[display("uint16")]
    #[serde(rename = "uint16")]
    UInt16,
    /// `uint32`
    #[display("uint32")]
    #[serde(rename = "uint32")]
    UInt32,
    /// `uint64`
    #[display("uint64")]
    #[serde(rename = "uint64")]
    UInt64,
    /// `float32`
    #[display("float32")]
    Float32,
    /// `float64`
    #[display("float64")]
    Float64,
    /// A single character.
    #[display("char")]
    Char,
    /// An ASCII string, one byte per character.
    #[display("string_ascii")]
    StringAscii,
    /// A UTF-8 string, one byte per code unit.
    #[display("string_utf8")]
    StringUtf8,
    /// Opaque bytes.
    #[display("blob")]
    Blob,
    /// A boolean stored as one byte.
    #[display("bool")]
    Bool,
}

impl Datatype {
    /// The size of one value of the data type in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Int8
            | Self::UInt8
            | Self::Char
            | Self::StringAscii
            | Self::StringUtf8
            | Self::Blob
            | Self::Bool => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// The binary encoding tag of the data type.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 => 3,
            Self::Int64 => 4,
            Self::UInt8 => 5,
            Self::UInt16 => 6,
            Self::UInt32 => 7,
            Self::UInt64 => 8,
            Self::Float32 => 9,
            Self::Float64 => 10,
            Self::Char => 11,
            Self::StringAscii => 12,
            Self::StringUtf8 => 13,
            Self::Blob => 14,
            Self::Bool => 15,
        }
    }

    /// The data type with the binary encoding tag `tag`.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Self::Int8,
            2 => Self::Int16,
            3 => Self::Int32,
            4 => Self::Int64,
            5 => Self::UInt8,
            6 => Self::UInt16,
            7 => Self::UInt32,
            8 => Self::UInt64,
            9 => Self::Float32,
            10 => Self::Float64,
            11 => Self::Char,
            12 => Self::StringAscii,
            13 => Self::StringUtf8,
            14 => Self::Blob,
            15 => Self::Bool,
            _ => return None,
        })
    }
}
