//! Offset-addressed wire format shared with the native engine.
//!
//! Every buffer starts with an eight word header. All integers are native
//! endian `u32` words, strings are NUL-terminated and every field starts on a
//! four byte boundary.
//!
//! ```text
//! PK READ REQUEST
//! [op type][capacity][length][db][table][pk cols][read cols][op id]   header, 32 bytes
//! db\0  table\0
//! [count][tuple 1]..[tuple n]                  pk block, tuple offsets
//! [key off][val off] key\0 [len:2][mut:2]value\0   one tuple per filter
//! [count][col 1]..[col n]                      read column block
//! [return type] name\0                         one entry per read column
//! op id\0
//!
//! PK READ RESPONSE
//! [op type][status][capacity][length][db][table][cols][op id]         header, 32 bytes
//! [count]([name off][value off][is null][data type])*count
//! name\0 value\0 ...
//! ```
//!
//! The request encoder and response decoder run on the serving side. The
//! request view and response writer are the engine side of the same contract
//! and back the in-memory engine.

mod cursor;
mod ndb_string;
mod request;
mod response;

pub use ndb_string::{escape_json_string, unquote_value};
pub use request::{encode_pk_read, ArrayType, PkReadRequestView};
pub use response::{decode_pk_read, is_pk_response, PkReadResponseWriter};

/// Errors produced while encoding or decoding native buffers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// A write would run past the end of the buffer.
    #[error("trying to write more data than the buffer capacity. Required: {needed}, capacity: {capacity}")]
    CapacityExceeded {
        /// End offset the write needed.
        needed: u64,
        /// Buffer capacity.
        capacity: u32,
    },
    /// A read column asked for a return type other than the default.
    #[error("return data type is not supported. Data type: {0}")]
    UnsupportedReturnType(String),
    /// A filter value could not be encoded.
    #[error("invalid filter value: {0}")]
    InvalidValue(String),
    /// Header op type did not match.
    #[error("wrong response type. Expected: {expected}, found: {found}")]
    WrongOperationType {
        /// Expected op type id.
        expected: u32,
        /// Op type id found in the header.
        found: u32,
    },
    /// Header capacity/length failed the sanity check.
    #[error("response buffer may be corrupt. Buffer capacity: {declared_capacity}, Buffer data length: {length}, actual capacity: {capacity}")]
    BadLength {
        /// Real capacity of the buffer.
        capacity: u32,
        /// Capacity recorded in the header.
        declared_capacity: u32,
        /// Used length recorded in the header.
        length: u32,
    },
    /// An offset found inside the buffer points outside of it.
    #[error("offset {offset} is out of bounds for {limit} bytes of data")]
    OffsetOutOfBounds {
        /// Offending offset.
        offset: u64,
        /// Readable length.
        limit: u32,
    },
    /// A string has no NUL terminator before the end of the data.
    #[error("string at offset {offset} is not NUL-terminated")]
    Unterminated {
        /// String start offset.
        offset: u32,
    },
    /// A string is not valid UTF-8.
    #[error("string at offset {offset} is not valid UTF-8")]
    InvalidUtf8 {
        /// String start offset.
        offset: u32,
    },
}

/// Engine data type tag attached to every returned column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum DataType {
    /// Unknown or NULL
    #[default]
    Unknown = 0,
    /// Character data
    String = 1,
    /// Integral number
    Integer = 2,
    /// Floating point or decimal number
    Float = 3,
    /// Binary data
    Binary = 4,
    /// Date, time or timestamp
    DateTime = 5,
    /// Bit field
    Bit = 6,
}

impl DataType {
    /// Map a wire tag. Unrecognised tags map to `Unknown`.
    pub const fn from_tag(tag: u32) -> Self {
        match tag {
            1 => DataType::String,
            2 => DataType::Integer,
            3 => DataType::Float,
            4 => DataType::Binary,
            5 => DataType::DateTime,
            6 => DataType::Bit,
            _ => DataType::Unknown,
        }
    }

    /// Wire tag
    #[inline]
    pub const fn tag(&self) -> u32 {
        *self as u32
    }

    /// Numbers are rendered unquoted in JSON, everything else quoted.
    #[inline]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }
}

/// Requested representation of a read column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataReturnType {
    /// Engine's natural representation
    Default,
    /// Base64 encoded
    Base64,
    /// Hex encoded
    Hex,
}

impl DataReturnType {
    /// Wire tag of the default return type
    pub const DEFAULT_TAG: u32 = 1;

    /// Parse a return-type name.
    pub fn from_name(name: &str) -> Result<Self, CodecError> {
        match name {
            "default" => Ok(DataReturnType::Default),
            "base64" => Ok(DataReturnType::Base64),
            "hex" => Ok(DataReturnType::Hex),
            other => Err(CodecError::UnsupportedReturnType(other.to_string())),
        }
    }

    /// Name as it appears in requests
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataReturnType::Default => "default",
            DataReturnType::Base64 => "base64",
            DataReturnType::Hex => "hex",
        }
    }

    /// Wire tag. Only the default type is supported by the engine.
    pub fn tag(&self) -> Result<u32, CodecError> {
        match self {
            DataReturnType::Default => Ok(Self::DEFAULT_TAG),
            other => Err(CodecError::UnsupportedReturnType(other.as_str().to_string())),
        }
    }
}
