#![allow(unused_macros)]

/// Helper macro for building an [`crate::Error::OutOfRange`] from a failed range check
///
/// ```rust, ignore
///  return Err(out_of_range_error!(offset, len, self.data.len()));
/// ```
macro_rules! out_of_range_error {
    ($offset:expr, $len:expr, $real:expr) => {
        crate::Error::OutOfRange {
            offset: $offset as u64,
            len: $len as u64,
            real_size: $real as u64,
        }
    };
}
