//! Low-level byte order and safe reading utilities for core file parsing.
//!
//! Every typed read the engine performs ends up here: the memory reference layer, the
//! link-map walk and the note parser all funnel through these functions, so width and
//! endianness decisions live in exactly one place. All reads are bounds-checked against
//! the source buffer and fail with [`crate::Error::OutOfRange`] instead of truncating
//! or zero-filling.
//!
//! Core files from Android targets are little-endian without exception (arm, arm64,
//! x86, x86_64, riscv64), so only little-endian readers are provided.
//!
//! # Usage
//!
//! ```rust,ignore
//! use corescope::file::io::{read_le_at, read_ptr_at};
//!
//! let data = [0x01, 0x00, 0x00, 0x00, 0xEF, 0xBE, 0xAD, 0xDE];
//! let mut offset = 0;
//! let count: u32 = read_le_at(&data, &mut offset)?;   // offset: 0 -> 4
//! let tag: u32 = read_le_at(&data, &mut offset)?;     // offset: 4 -> 8
//! assert_eq!(count, 1);
//! assert_eq!(tag, 0xDEAD_BEEF);
//! # Ok::<(), corescope::Error>(())
//! ```

use crate::{layout::Bitness, Result};

/// Trait for implementing type-specific safe binary data reading operations.
///
/// Implemented for the primitive widths that occur in target structures. Each
/// implementation defines the fixed-size byte array for its width and the conversion
/// from little-endian bytes.
pub trait CoreIO: Sized {
    /// Fixed-size byte array matching the width of the implementing type
    type Bytes: for<'a> TryFrom<&'a [u8]>;

    /// Convert from little-endian bytes to the native value
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Width of the type in bytes
    fn size() -> usize {
        std::mem::size_of::<Self>()
    }
}

macro_rules! impl_core_io {
    ($($t:ty),*) => {
        $(
            impl CoreIO for $t {
                type Bytes = [u8; std::mem::size_of::<$t>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$t>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_core_io!(u8, u16, u32, u64, i8, i16, i32, i64);

/// Read a value of type `T` from the start of `data` in little-endian byte order.
///
/// # Errors
/// Returns [`crate::Error::OutOfRange`] if `data` is shorter than the width of `T`.
pub fn read_le<T: CoreIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0;
    read_le_at(data, &mut offset)
}

/// Read a value of type `T` at `*offset`, advancing the offset past the value.
///
/// # Errors
/// Returns [`crate::Error::OutOfRange`] if fewer than `T::size()` bytes remain.
pub fn read_le_at<T: CoreIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let size = T::size();
    let Some(end) = offset.checked_add(size) else {
        return Err(out_of_range_error!(*offset, size, data.len()));
    };

    if end > data.len() {
        return Err(out_of_range_error!(*offset, size, data.len()));
    }

    let Ok(bytes) = T::Bytes::try_from(&data[*offset..end]) else {
        return Err(out_of_range_error!(*offset, size, data.len()));
    };

    *offset = end;
    Ok(T::from_le_bytes(bytes))
}

/// Read a pointer-width value at `*offset`, widened to `u64`, advancing the offset.
///
/// 32-bit targets store pointers as 4 bytes; 64-bit targets as 8. This is the single
/// place where pointer width is interpreted, which keeps every consumer of pointer
/// fields agnostic of the target's bitness.
///
/// # Errors
/// Returns [`crate::Error::OutOfRange`] if the remaining bytes are narrower than a
/// target pointer.
pub fn read_ptr_at(data: &[u8], offset: &mut usize, bitness: Bitness) -> Result<u64> {
    match bitness {
        Bitness::B32 => Ok(u64::from(read_le_at::<u32>(data, offset)?)),
        Bitness::B64 => read_le_at::<u64>(data, offset),
    }
}
