//! Memory-mapped file backend.
//!
//! Core files routinely run to multiple gigabytes, and access during analysis is sparse
//! and random (a heap walk touches a few bytes per object across the whole space).
//! Mapping the file keeps resident memory proportional to what is actually touched and
//! lets the operating system handle caching and eviction.
//!
//! The same backend backs two different things: the snapshot itself, and each replayed
//! backing file that a file-backed segment re-opens to recover truncated content.

use super::Backend;
use crate::{
    Error::{Error, FileError},
    Result,
};

use memmap2::Mmap;
use std::{fs, path::Path};

/// A file backend that uses memory-mapped I/O for efficient access to files on disk.
///
/// The mapping is created read-only and shared. All access operations include bounds
/// checking; a request past the end of the mapping fails rather than faulting.
///
/// # Examples
///
/// ```rust,ignore
/// use corescope::file::{Physical, Backend};
/// use std::path::Path;
///
/// let core = Physical::new(Path::new("/tmp/default.core"))?;
/// assert_eq!(core.data_slice(0, 4)?, b"\x7fELF");
/// # Ok::<(), corescope::Error>(())
/// ```
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data
    data: Mmap,
}

impl Physical {
    /// Create a new physical file backend by memory-mapping the specified file.
    ///
    /// # Arguments
    /// * `path` - Path to the file on disk. Accepts `&Path`, `&str`, `String`, or `PathBuf`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or
    /// [`crate::Error::Error`] if memory mapping fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => return Err(FileError(error)),
        };

        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => return Err(Error(error.to_string())),
        };

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
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
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
