//! Word alignment helpers for the wire codec.

use crate::constants::ADDRESS_SIZE;

/// Round a buffer offset up to the next word boundary.
#[inline]
pub const fn align_word(offset: u32) -> u32 {
    let rem = offset % ADDRESS_SIZE;
    if rem == 0 {
        offset
    } else {
        offset + (ADDRESS_SIZE - rem)
    }
}

/// Whether `offset` sits on a word boundary.
#[inline]
pub const fn is_word_aligned(offset: u32) -> bool {
    offset % ADDRESS_SIZE == 0
}
