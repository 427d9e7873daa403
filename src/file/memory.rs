//! In-memory buffer backend.
//!
//! Used when the snapshot bytes are already in memory: regions read out of a live
//! process by an attach collaborator, or synthetic cores built by tests.

use super::Backend;
use crate::Result;

/// A backend over an owned byte buffer.
///
/// Provides the same bounds-checked access as [`super::Physical`], with the data held
/// in a `Vec<u8>` instead of a file mapping.
#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Create a new memory backend taking ownership of `data`.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Memory {
        Memory { data }
    }
}

impl Backend for Memory {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(out_of_range_error!(offset, len, self.data.len()));
        };

        if offset_end > self.data.len() {
            return Err(out_of_range_error!(offset, len, self.data.len()));
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_basic() {
        let memory = Memory::new(vec![0x7F, b'E', b'L', b'F']);

        assert_eq!(memory.len(), 4);
        assert!(!memory.is_empty());
        assert_eq!(memory.data_slice(1, 3).unwrap(), b"ELF");
        assert!(memory.data_slice(2, 3).is_err());
    }

    #[test]
    fn test_memory_empty() {
        let memory = Memory::new(Vec::new());

        assert_eq!(memory.len(), 0);
        assert!(memory.is_empty());
        assert!(memory.data_slice(0, 1).is_err());
        let empty_slice: &[u8] = &[];
        assert_eq!(memory.data_slice(0, 0).unwrap(), empty_slice);
    }

    #[test]
    fn test_memory_offset_overflow() {
        let memory = Memory::new(vec![0x00; 100]);

        let result = memory.data_slice(usize::MAX, 1);
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            crate::Error::OutOfRange { .. }
        ));

        assert!(memory.data_slice(100, 1).is_err());
        assert!(memory.data_slice(99, 2).is_err());
        assert_eq!(memory.data_slice(99, 1).unwrap(), &[0x00]);
    }
}
