//! Bounds-checked readers and writers over native buffer bytes.

use crate::codec::CodecError;
use crate::constants::ADDRESS_SIZE;
use crate::utility::align_word;

/// Append-only writer with random access to already reserved words.
pub(crate) struct BufferWriter<'a> {
    buf: &'a mut [u8],
    head: u32,
}

impl<'a> BufferWriter<'a> {
    pub(crate) fn new(buf: &'a mut [u8], head: u32) -> Self {
        Self { buf, head }
    }

    #[inline]
    pub(crate) fn head(&self) -> u32 {
        self.head
    }

    #[inline]
    pub(crate) fn capacity(&self) -> u32 {
        self.buf.len() as u32
    }

    fn ensure(&self, at: u32, len: u64) -> Result<(), CodecError> {
        let end = at as u64 + len;
        if end > self.buf.len() as u64 {
            return Err(CodecError::CapacityExceeded {
                needed: end,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    /// Move the head to the next word boundary.
    pub(crate) fn align(&mut self) -> Result<u32, CodecError> {
        let aligned = align_word(self.head);
        self.ensure(aligned, 0)?;
        self.head = aligned;
        Ok(aligned)
    }

    /// Overwrite the word at `offset`.
    pub(crate) fn put_u32(&mut self, offset: u32, value: u32) -> Result<(), CodecError> {
        self.ensure(offset, ADDRESS_SIZE as u64)?;
        let at = offset as usize;
        self.buf[at..at + 4].copy_from_slice(&value.to_ne_bytes());
        Ok(())
    }

    /// Reserve `count` zeroed words at the (aligned) head.
    pub(crate) fn reserve_words(&mut self, count: u32) -> Result<u32, CodecError> {
        let at = self.align()?;
        let len = count as u64 * ADDRESS_SIZE as u64;
        self.ensure(at, len)?;
        let start = at as usize;
        self.buf[start..start + len as usize].fill(0);
        self.head = at + len as u32;
        Ok(at)
    }

    /// Append one word at the (aligned) head.
    pub(crate) fn push_u32(&mut self, value: u32) -> Result<u32, CodecError> {
        let at = self.reserve_words(1)?;
        self.put_u32(at, value)?;
        Ok(at)
    }

    /// Append a NUL-terminated string at the (aligned) head.
    pub(crate) fn push_cstr(&mut self, bytes: &[u8]) -> Result<u32, CodecError> {
        let at = self.align()?;
        self.ensure(at, bytes.len() as u64 + 1)?;
        let start = at as usize;
        self.buf[start..start + bytes.len()].copy_from_slice(bytes);
        self.buf[start + bytes.len()] = 0;
        self.head = at + bytes.len() as u32 + 1;
        Ok(at)
    }

    /// Append an NDB string: immutable 2-byte LE length, 2-byte mutable
    /// length reserved for the engine, the bytes, and a NUL.
    pub(crate) fn push_ndb_str(&mut self, bytes: &[u8]) -> Result<u32, CodecError> {
        let len = u16::try_from(bytes.len()).map_err(|_| {
            CodecError::InvalidValue(format!("value of {} bytes is too long", bytes.len()))
        })?;
        let at = self.align()?;
        self.ensure(at, bytes.len() as u64 + 4 + 1)?;
        let start = at as usize;
        self.buf[start..start + 2].copy_from_slice(&len.to_le_bytes());
        self.buf[start + 2] = 0;
        self.buf[start + 3] = 0;
        self.buf[start + 4..start + 4 + bytes.len()].copy_from_slice(bytes);
        self.buf[start + 4 + bytes.len()] = 0;
        self.head = at + 4 + len as u32 + 1;
        Ok(at)
    }
}

/// Reader that validates every offset against the readable length.
#[derive(Clone, Copy)]
pub(crate) struct BufferReader<'a> {
    buf: &'a [u8],
}

impl<'a> BufferReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    #[inline]
    pub(crate) fn limit(&self) -> u32 {
        self.buf.len() as u32
    }

    pub(crate) fn out_of_bounds(&self, offset: u64) -> CodecError {
        CodecError::OffsetOutOfBounds {
            offset,
            limit: self.limit(),
        }
    }

    pub(crate) fn read_u32(&self, offset: u32) -> Result<u32, CodecError> {
        let start = offset as usize;
        let bytes = self
            .buf
            .get(start..start + ADDRESS_SIZE as usize)
            .ok_or_else(|| self.out_of_bounds(offset as u64))?;
        let mut word = [0u8; 4];
        word.copy_from_slice(bytes);
        Ok(u32::from_ne_bytes(word))
    }

    /// Read the `index`-th word of the block starting at `offset`.
    pub(crate) fn read_word_at(&self, offset: u32, index: u32) -> Result<u32, CodecError> {
        let at = offset as u64 + index as u64 * ADDRESS_SIZE as u64;
        let at = u32::try_from(at).map_err(|_| self.out_of_bounds(at))?;
        self.read_u32(at)
    }

    pub(crate) fn read_bytes(&self, offset: u32, len: u32) -> Result<&'a [u8], CodecError> {
        let start = offset as usize;
        self.buf
            .get(start..start + len as usize)
            .ok_or_else(|| self.out_of_bounds(offset as u64 + len as u64))
    }

    pub(crate) fn read_cstr(&self, offset: u32) -> Result<&'a str, CodecError> {
        let tail = self
            .buf
            .get(offset as usize..)
            .ok_or_else(|| self.out_of_bounds(offset as u64))?;
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::Unterminated { offset })?;
        std::str::from_utf8(&tail[..end]).map_err(|_| CodecError::InvalidUtf8 { offset })
    }
}
