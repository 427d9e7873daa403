use thiserror::Error;

use crate::layout::StructKind;
use crate::space::Source;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The taxonomy splits into two halves with very different handling expectations:
///
/// ## Fatal load errors
/// - [`Error::Malformed`] - the snapshot is not a recognizable core file
/// - [`Error::UnsupportedMachine`] - the core's machine has no known structure layouts
/// - [`Error::FileError`] / [`Error::GoblinErr`] - I/O and ELF-parser failures
///
/// A failed load publishes nothing: either [`crate::AddressSpace::load_core`] returns a fully
/// built address space or it returns one of these.
///
/// ## Local access errors
/// - [`Error::NotLoaded`] - the address space was unloaded
/// - [`Error::NotMapped`] - the address falls outside every load segment. This is the
///   *expected* outcome for stale pointers found inside heap data and must be treated as a
///   normal branch by walkers, not surfaced as a failure
/// - [`Error::NotReady`] - a typed reference points at unmapped memory or a segment with
///   no usable backing
/// - [`Error::SourceUnavailable`] - the requested backing source was never attached
/// - [`Error::OutOfRange`] - a read past the materialized bytes of a segment
/// - [`Error::UnknownField`] - the active layout table has no such field; this is how an
///   unsupported runtime release surfaces as a per-feature error instead of silent corruption
///
/// Consumers walking many objects are expected to skip or annotate the offending item and
/// continue; none of these aborts a traversal in progress.
///
/// # Examples
///
/// ```rust,no_run
/// use corescope::{AddressSpace, Error};
/// use std::path::Path;
///
/// match AddressSpace::load_core(Path::new("/tmp/default.core"), true) {
///     Ok(space) => println!("{} load segments", space.block_count()),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("bad core file: {} ({}:{})", message, file, line);
///     }
///     Err(Error::UnsupportedMachine(machine)) => {
///         eprintln!("no layouts for e_machine {}", machine);
///     }
///     Err(e) => eprintln!("{}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The snapshot is damaged or is not an ELF core file.
    ///
    /// Includes the source location where the malformation was detected, in the same way
    /// the parser reports it for every other structural check.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The core file's machine type has no known structure layouts.
    ///
    /// Carries the raw `e_machine` value from the ELF header.
    #[error("Unsupported machine type {0:#x}")]
    UnsupportedMachine(u16),

    /// The address space has been unloaded.
    ///
    /// Returned by every query once [`crate::AddressSpace::unload`] has run.
    #[error("No core file is loaded")]
    NotLoaded,

    /// The address does not fall inside any load segment.
    ///
    /// This is a normal, non-exceptional branch for consumers chasing pointers found in
    /// heap memory; display layers render it as "address unmapped" rather than failing.
    #[error("Address {0:#x} is not mapped")]
    NotMapped(u64),

    /// The requested backing source was never attached to this segment.
    ///
    /// Anonymous segments have no replayed-file source; segments the quick loader skipped
    /// have no source at all.
    #[error("Backing source {0:?} is unavailable for this segment")]
    SourceUnavailable(Source),

    /// A read exceeded the materialized bytes of a segment.
    ///
    /// Segments can be captured truncated (`real_size < mem_size`); reads are checked
    /// against what was actually materialized.
    #[error(
        "Read of {len} bytes at offset {offset:#x} exceeds the {real_size:#x} materialized bytes"
    )]
    OutOfRange {
        /// Byte offset of the read, relative to the segment start
        offset: u64,
        /// Length of the attempted read
        len: u64,
        /// Number of bytes actually materialized for the segment
        real_size: u64,
    },

    /// The active layout table has no entry for this field.
    #[error("Unknown field {kind}::{field} in the active layout table")]
    UnknownField {
        /// Structure kind the lookup was performed against
        kind: StructKind,
        /// Requested field name
        field: &'static str,
    },

    /// A typed reference points at memory that is unmapped or has no usable backing.
    ///
    /// Reads against a non-ready reference fail instead of returning garbage.
    #[error("Memory at {0:#x} is not ready")]
    NotReady(u64),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Error from the goblin crate during ELF parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),
}
