//! PK read request encoding and the engine-side request view.

use crate::buffer_pool::NativeBuffer;
use crate::codec::cursor::{BufferReader, BufferWriter};
use crate::codec::ndb_string::unquote_value;
use crate::codec::{CodecError, DataReturnType};
use crate::constants::{
    ADDRESS_SIZE, PK_REQ_CAPACITY_IDX, PK_REQ_DB_IDX, PK_REQ_HEADER_END, PK_REQ_ID,
    PK_REQ_LENGTH_IDX, PK_REQ_OP_ID_IDX, PK_REQ_OP_TYPE_IDX, PK_REQ_PK_COLS_IDX,
    PK_REQ_READ_COLS_IDX, PK_REQ_TABLE_IDX,
};
use crate::operation::ReadRequest;

/// Encode `request` into `buffer` and return the used length.
///
/// The header is written last, so a failed encode leaves a buffer whose op
/// type word is still zero and that the engine would reject.
pub fn encode_pk_read(request: &ReadRequest, buffer: &mut NativeBuffer) -> Result<u32, CodecError> {
    let capacity = buffer.capacity();
    let mut w = BufferWriter::new(buffer.as_bytes_mut(), PK_REQ_HEADER_END);

    let db_offset = w.push_cstr(request.database.as_bytes())?;
    let table_offset = w.push_cstr(request.table.as_bytes())?;

    // [count][tuple offset]*count
    let pk_offset = w.push_u32(request.filters.len() as u32)?;
    let tuple_slots = w.reserve_words(request.filters.len() as u32)?;
    for (i, filter) in request.filters.iter().enumerate() {
        let tuple = w.reserve_words(2)?;
        let key = w.push_cstr(filter.column.as_bytes())?;
        let value = unquote_value(&filter.value)?;
        let value = w.push_ndb_str(value.as_bytes())?;

        w.put_u32(tuple_slots + i as u32 * ADDRESS_SIZE, tuple)?;
        w.put_u32(tuple, key)?;
        w.put_u32(tuple + ADDRESS_SIZE, value)?;
    }

    let mut read_cols_offset = 0;
    if let Some(columns) = &request.read_columns {
        read_cols_offset = w.push_u32(columns.len() as u32)?;
        let col_slots = w.reserve_words(columns.len() as u32)?;
        for (i, col) in columns.iter().enumerate() {
            let return_type = match &col.return_type {
                Some(name) => DataReturnType::from_name(name)?.tag()?,
                None => DataReturnType::DEFAULT_TAG,
            };
            let entry = w.push_u32(return_type)?;
            w.push_cstr(col.column.as_bytes())?;
            w.put_u32(col_slots + i as u32 * ADDRESS_SIZE, entry)?;
        }
    }

    let mut op_id_offset = 0;
    if let Some(op_id) = &request.operation_id {
        op_id_offset = w.push_cstr(op_id.as_bytes())?;
    }

    let length = w.head();
    for (idx, value) in [
        (PK_REQ_OP_TYPE_IDX, PK_REQ_ID),
        (PK_REQ_CAPACITY_IDX, capacity),
        (PK_REQ_LENGTH_IDX, length),
        (PK_REQ_DB_IDX, db_offset),
        (PK_REQ_TABLE_IDX, table_offset),
        (PK_REQ_PK_COLS_IDX, pk_offset),
        (PK_REQ_READ_COLS_IDX, read_cols_offset),
        (PK_REQ_OP_ID_IDX, op_id_offset),
    ] {
        w.put_u32(idx * ADDRESS_SIZE, value)?;
    }

    Ok(length)
}

/// Storage class of the column a filter value is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayType {
    /// No length prefix
    Fixed,
    /// One byte length prefix
    ShortVar,
    /// Two byte little-endian length prefix
    MediumVar,
}

impl ArrayType {
    /// Length prefix width in bytes
    pub const fn length_bytes(&self) -> usize {
        match self {
            ArrayType::Fixed => 0,
            ArrayType::ShortVar => 1,
            ArrayType::MediumVar => 2,
        }
    }
}

/// Read access to an encoded PK read request, as the engine sees it.
///
/// Every accessor is bounds-checked against the length recorded in the
/// header.
pub struct PkReadRequestView<'a> {
    buf: &'a mut [u8],
    length: u32,
}

impl<'a> PkReadRequestView<'a> {
    /// Validate the header and wrap the buffer.
    pub fn new(buf: &'a mut [u8]) -> Result<Self, CodecError> {
        let capacity = buf.len() as u32;
        let header = BufferReader::new(buf);
        let op_type = header.read_word_at(0, PK_REQ_OP_TYPE_IDX)?;
        if op_type != PK_REQ_ID {
            return Err(CodecError::WrongOperationType {
                expected: PK_REQ_ID,
                found: op_type,
            });
        }
        let declared_capacity = header.read_word_at(0, PK_REQ_CAPACITY_IDX)?;
        let length = header.read_word_at(0, PK_REQ_LENGTH_IDX)?;
        if declared_capacity != capacity || length > capacity || length < PK_REQ_HEADER_END {
            return Err(CodecError::BadLength {
                capacity,
                declared_capacity,
                length,
            });
        }
        Ok(Self { buf, length })
    }

    fn reader(&self) -> BufferReader<'_> {
        BufferReader::new(&self.buf[..self.length as usize])
    }

    fn header(&self, idx: u32) -> Result<u32, CodecError> {
        self.reader().read_word_at(0, idx)
    }

    /// Used length
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Database name
    pub fn database(&self) -> Result<&str, CodecError> {
        let offset = self.header(PK_REQ_DB_IDX)?;
        self.reader().read_cstr(offset)
    }

    /// Table name
    pub fn table(&self) -> Result<&str, CodecError> {
        let offset = self.header(PK_REQ_TABLE_IDX)?;
        self.reader().read_cstr(offset)
    }

    /// Number of primary-key filters
    pub fn pk_count(&self) -> Result<u32, CodecError> {
        let offset = self.header(PK_REQ_PK_COLS_IDX)?;
        self.reader().read_u32(offset)
    }

    fn pk_tuple(&self, index: u32) -> Result<u32, CodecError> {
        let count = self.pk_count()?;
        if index >= count {
            return Err(CodecError::InvalidValue(format!(
                "filter index {index} out of range for {count} filters"
            )));
        }
        let offset = self.header(PK_REQ_PK_COLS_IDX)?;
        self.reader().read_word_at(offset, index + 1)
    }

    fn pk_value_offset(&self, index: u32) -> Result<u32, CodecError> {
        let tuple = self.pk_tuple(index)?;
        self.reader().read_word_at(tuple, 1)
    }

    /// Column name of filter `index`
    pub fn pk_name(&self, index: u32) -> Result<&str, CodecError> {
        let tuple = self.pk_tuple(index)?;
        let key = self.reader().read_u32(tuple)?;
        self.reader().read_cstr(key)
    }

    /// Value length from the immutable length field
    pub fn pk_value_len(&self, index: u32) -> Result<u16, CodecError> {
        let offset = self.pk_value_offset(index)?;
        let len = self.reader().read_bytes(offset, 2)?;
        Ok(u16::from_le_bytes([len[0], len[1]]))
    }

    /// Value bytes of filter `index`, without any length prefix
    pub fn pk_value(&self, index: u32) -> Result<&[u8], CodecError> {
        let offset = self.pk_value_offset(index)?;
        let len = self.pk_value_len(index)?;
        self.reader().read_bytes(offset + 4, len as u32)
    }

    /// Rewrite the mutable length field of filter `index` for a column of
    /// `array_type` and return the bytes to hand to storage: the length
    /// prefix the column expects followed by the value.
    ///
    /// Values longer than `max_size` are rejected.
    pub fn prepare_ndb_value(
        &mut self,
        index: u32,
        array_type: ArrayType,
        max_size: usize,
    ) -> Result<&[u8], CodecError> {
        let offset = self.pk_value_offset(index)? as usize;
        let len = self.pk_value_len(index)? as usize;
        if len > max_size {
            return Err(CodecError::InvalidValue(format!(
                "value of {len} bytes exceeds the column size of {max_size} bytes"
            )));
        }
        if offset + 4 + len > self.length as usize {
            return Err(CodecError::OffsetOutOfBounds {
                offset: (offset + 4 + len) as u64,
                limit: self.length,
            });
        }

        let start = match array_type {
            ArrayType::Fixed => offset + 4,
            ArrayType::ShortVar => {
                self.buf[offset + 3] = self.buf[offset];
                offset + 3
            }
            ArrayType::MediumVar => {
                self.buf[offset + 2] = self.buf[offset];
                self.buf[offset + 3] = self.buf[offset + 1];
                offset + 2
            }
        };
        Ok(&self.buf[start..offset + 4 + len])
    }

    /// Number of requested read columns, zero when absent
    pub fn read_column_count(&self) -> Result<u32, CodecError> {
        match self.header(PK_REQ_READ_COLS_IDX)? {
            0 => Ok(0),
            offset => self.reader().read_u32(offset),
        }
    }

    fn read_column_entry(&self, index: u32) -> Result<u32, CodecError> {
        let count = self.read_column_count()?;
        if index >= count {
            return Err(CodecError::InvalidValue(format!(
                "read column index {index} out of range for {count} columns"
            )));
        }
        let offset = self.header(PK_REQ_READ_COLS_IDX)?;
        self.reader().read_word_at(offset, index + 1)
    }

    /// Name of read column `index`
    pub fn read_column_name(&self, index: u32) -> Result<&str, CodecError> {
        let entry = self.read_column_entry(index)?;
        self.reader().read_cstr(entry + ADDRESS_SIZE)
    }

    /// Return type tag of read column `index`
    pub fn read_column_return_type(&self, index: u32) -> Result<u32, CodecError> {
        let entry = self.read_column_entry(index)?;
        self.reader().read_u32(entry)
    }

    /// Operation id, if one was sent
    pub fn operation_id(&self) -> Result<Option<&str>, CodecError> {
        match self.header(PK_REQ_OP_ID_IDX)? {
            0 => Ok(None),
            offset => self.reader().read_cstr(offset).map(Some),
        }
    }

    /// Header word `idx`, for alignment checks
    pub fn header_word(&self, idx: u32) -> Result<u32, CodecError> {
        self.header(idx)
    }
}
