//! Byte-source abstraction for snapshots and replayed backing files.
//!
//! Everything the engine reads comes from one of two places: the snapshot itself (an ELF
//! core file on disk or a buffer captured from a live process) and, for file-backed
//! segments, the original on-disk file re-opened and mapped at its recorded offset. Both
//! are represented by the [`Backend`] trait so the rest of the crate never cares which
//! one it is reading from.
//!
//! # Key Components
//!
//! - [`Backend`] - trait for bounds-checked byte access to a finite source
//! - [`physical::Physical`] - memory-mapped read-only file backend
//! - [`memory::Memory`] - owned in-memory buffer backend
//! - [`io`] - endian-aware, bounds-checked scalar readers
//!
//! # Examples
//!
//! ```rust,no_run
//! use corescope::file::{Backend, Physical};
//! use std::path::Path;
//!
//! let core = Physical::new(Path::new("/tmp/default.core"))?;
//! let ident = core.data_slice(0, 4)?;
//! assert_eq!(ident, b"\x7fELF");
//! # Ok::<(), corescope::Error>(())
//! ```

use crate::Result;

pub mod io;
mod memory;
mod physical;

pub use memory::Memory;
pub use physical::Physical;

/// A finite, seekable byte source.
///
/// Implementations provide bounds-checked random access to their content. The snapshot
/// loader holds one backend for the core file itself; each file-backed load segment may
/// additionally hold a backend for its replayed backing file.
///
/// All access is read-only; the engine never writes through a backend.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Arguments
    /// * `offset` - The starting offset within the data.
    /// * `len` - The length of the slice in bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfRange`] if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;

    /// Returns `true` if the source contains no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
