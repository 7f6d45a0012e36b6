//! PK read response decoding and the engine-side response writer.

use tracing::error;

use crate::buffer_pool::NativeBuffer;
use crate::codec::cursor::{BufferReader, BufferWriter};
use crate::codec::{CodecError, DataType};
use crate::constants::{
    ADDRESS_SIZE, PK_RESP_CAPACITY_IDX, PK_RESP_COLS_IDX, PK_RESP_DB_IDX, PK_RESP_HEADER_END,
    PK_RESP_ID, PK_RESP_LENGTH_IDX, PK_RESP_OP_ID_IDX, PK_RESP_OP_STATUS_IDX, PK_RESP_OP_TYPE_IDX,
    PK_RESP_TABLE_IDX,
};
use crate::operation::ReadResponse;
use crate::status::http;

/// Words per column table entry: name, value, is-null, data type.
const COLUMN_ENTRY_WORDS: u32 = 4;

/// Decode a PK read response buffer.
///
/// Every offset found in the buffer is checked against the used length
/// before it is followed. Failures are protocol corruption and are logged.
pub fn decode_pk_read(buffer: &NativeBuffer) -> Result<ReadResponse, CodecError> {
    decode(buffer.as_bytes()).map_err(|e| {
        error!(error = %e, capacity = buffer.capacity(), "failed to decode pk read response");
        e
    })
}

/// Whether the engine wrote a PK read response header into `buffer`.
///
/// Errors raised before the engine builds a response (an unknown database
/// or table) leave the buffer untouched.
pub fn is_pk_response(buffer: &NativeBuffer) -> bool {
    BufferReader::new(buffer.as_bytes())
        .read_word_at(0, PK_RESP_OP_TYPE_IDX)
        .map_or(false, |op_type| op_type == PK_RESP_ID)
}

fn decode(bytes: &[u8]) -> Result<ReadResponse, CodecError> {
    let header = BufferReader::new(bytes);
    let op_type = header.read_word_at(0, PK_RESP_OP_TYPE_IDX)?;
    if op_type != PK_RESP_ID {
        return Err(CodecError::WrongOperationType {
            expected: PK_RESP_ID,
            found: op_type,
        });
    }

    let capacity = header.limit();
    let declared_capacity = header.read_word_at(0, PK_RESP_CAPACITY_IDX)?;
    let length = header.read_word_at(0, PK_RESP_LENGTH_IDX)?;
    if declared_capacity != capacity || length >= capacity || length < PK_RESP_HEADER_END {
        return Err(CodecError::BadLength {
            capacity,
            declared_capacity,
            length,
        });
    }

    let data = BufferReader::new(&bytes[..length as usize]);
    let mut response = ReadResponse::with_status(data.read_word_at(0, PK_RESP_OP_STATUS_IDX)? as i32);

    let op_id_offset = data.read_word_at(0, PK_RESP_OP_ID_IDX)?;
    if op_id_offset != 0 {
        response.operation_id = Some(data.read_cstr(op_id_offset)?.to_owned());
    }

    if response.status != http::OK {
        return Ok(response);
    }

    let cols = data.read_word_at(0, PK_RESP_COLS_IDX)?;
    let count = data.read_u32(cols)?;
    let table_end = cols as u64 + ADDRESS_SIZE as u64 * (1 + count as u64 * COLUMN_ENTRY_WORDS as u64);
    if table_end > length as u64 {
        return Err(data.out_of_bounds(table_end));
    }
    for i in 0..count {
        let entry = 1 + i * COLUMN_ENTRY_WORDS;
        let name_offset = data.read_word_at(cols, entry)?;
        let value_offset = data.read_word_at(cols, entry + 1)?;
        let is_null = data.read_word_at(cols, entry + 2)?;
        let data_type = DataType::from_tag(data.read_word_at(cols, entry + 3)?);

        let name = data.read_cstr(name_offset)?.to_owned();
        let value = if is_null == 0 {
            Some(data.read_cstr(value_offset)?.to_owned())
        } else {
            None
        };
        response.set_column(name, value, data_type);
    }

    Ok(response)
}

/// Builds a PK read response buffer the way the engine does.
pub struct PkReadResponseWriter<'a> {
    w: BufferWriter<'a>,
    cols_offset: u32,
    cols_to_write: u32,
    cols_written: u32,
}

impl<'a> PkReadResponseWriter<'a> {
    /// Clear the header and stamp the op type and capacity.
    pub fn new(buf: &'a mut [u8]) -> Result<Self, CodecError> {
        let capacity = buf.len() as u32;
        let mut w = BufferWriter::new(buf, 0);
        w.reserve_words(PK_RESP_HEADER_END / ADDRESS_SIZE)?;
        w.put_u32(PK_RESP_OP_TYPE_IDX * ADDRESS_SIZE, PK_RESP_ID)?;
        w.put_u32(PK_RESP_CAPACITY_IDX * ADDRESS_SIZE, capacity)?;
        Ok(Self {
            w,
            cols_offset: 0,
            cols_to_write: 0,
            cols_written: 0,
        })
    }

    fn header_field(&mut self, idx: u32, value: u32) -> Result<(), CodecError> {
        self.w.put_u32(idx * ADDRESS_SIZE, value)
    }

    fn string_field(&mut self, idx: u32, value: Option<&str>) -> Result<(), CodecError> {
        let offset = match value {
            Some(s) => self.w.push_cstr(s.as_bytes())?,
            None => 0,
        };
        self.header_field(idx, offset)
    }

    /// Set the operation status
    pub fn set_status(&mut self, code: i32) -> Result<(), CodecError> {
        self.header_field(PK_RESP_OP_STATUS_IDX, code as u32)
    }

    /// Write the database name
    pub fn set_db(&mut self, db: &str) -> Result<(), CodecError> {
        self.string_field(PK_RESP_DB_IDX, Some(db))
    }

    /// Write the table name
    pub fn set_table(&mut self, table: &str) -> Result<(), CodecError> {
        self.string_field(PK_RESP_TABLE_IDX, Some(table))
    }

    /// Write the operation id, or clear its header slot
    pub fn set_operation_id(&mut self, op_id: Option<&str>) -> Result<(), CodecError> {
        self.string_field(PK_RESP_OP_ID_IDX, op_id)
    }

    /// Reserve the column table for `count` columns.
    pub fn set_column_count(&mut self, count: u32) -> Result<(), CodecError> {
        let offset = self.w.reserve_words(1 + count * COLUMN_ENTRY_WORDS)?;
        self.w.put_u32(offset, count)?;
        self.header_field(PK_RESP_COLS_IDX, offset)?;
        self.cols_offset = offset;
        self.cols_to_write = count;
        self.cols_written = 0;
        Ok(())
    }

    /// Append one column. A `None` value is written as NULL with an
    /// unknown data type.
    pub fn append_column(
        &mut self,
        name: &str,
        value: Option<&str>,
        data_type: DataType,
    ) -> Result<(), CodecError> {
        if self.cols_written >= self.cols_to_write {
            return Err(CodecError::InvalidValue(format!(
                "column table holds {} columns",
                self.cols_to_write
            )));
        }

        let name_offset = self.w.push_cstr(name.as_bytes())?;
        let (value_offset, is_null, tag) = match value {
            Some(v) => (self.w.push_cstr(v.as_bytes())?, 0, data_type.tag()),
            None => (0, 1, DataType::Unknown.tag()),
        };

        let entry = self.cols_offset
            + ADDRESS_SIZE
            + self.cols_written * COLUMN_ENTRY_WORDS * ADDRESS_SIZE;
        for (i, word) in [name_offset, value_offset, is_null, tag].into_iter().enumerate() {
            self.w.put_u32(entry + i as u32 * ADDRESS_SIZE, word)?;
        }
        self.cols_written += 1;
        Ok(())
    }

    /// Record the used length and return it.
    pub fn close(mut self) -> Result<u32, CodecError> {
        let length = self.w.head();
        if length >= self.w.capacity() {
            // The decoder requires spare room after the data.
            return Err(CodecError::CapacityExceeded {
                needed: length as u64 + 1,
                capacity: self.w.capacity(),
            });
        }
        self.header_field(PK_RESP_LENGTH_IDX, length)?;
        Ok(length)
    }
}
