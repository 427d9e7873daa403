#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # corescope
//!
//! A framework for reconstructing and analyzing Android process core dumps.
//! Built in pure Rust, `corescope` loads an ELF core file, rebuilds the crashed
//! process's virtual address space, and exposes typed, version-aware access to the
//! runtime structures captured inside it, without requiring a device, a debugger or
//! the Android toolchain.
//!
//! ## Features
//!
//! - **Efficient memory access** - Memory-mapped core files with reference-based,
//!   bounds-checked reads and minimal allocations
//! - **Full address-space reconstruction** - Every load segment indexed, resolvable
//!   and traversable, including segments the capture truncated
//! - **Dual backing sources** - Segment bytes served from the snapshot or replayed
//!   from the original on-disk file, independently
//! - **Version-aware structure layouts** - Field offsets selected per Android release
//!   and pointer width, swappable at runtime without reloading
//! - **Consistency verification** - CRC-based cross-source comparison that locates
//!   and symbolizes corrupted ranges
//! - **Damage tolerant** - Stale pointers and truncated segments are ordinary
//!   `Result`s, never panics
//!
//! ## Quick Start
//!
//! Add `corescope` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! corescope = "0.1"
//! ```
//!
//! ### Using the Prelude
//!
//! For convenient access to the most commonly used types, import the prelude:
//!
//! ```rust,no_run
//! use corescope::prelude::*;
//! use std::path::Path;
//!
//! // Load a core file and rebuild the address space
//! let space = AddressSpace::load_core(Path::new("/tmp/default.core"), true)?;
//! println!("{} machine, {} segments", space.machine(), space.block_count());
//! # Ok::<(), corescope::Error>(())
//! ```
//!
//! ### Basic Usage
//!
//! ```rust,no_run
//! use corescope::AddressSpace;
//! use std::path::Path;
//!
//! let space = AddressSpace::load_core(Path::new("/tmp/default.core"), false)?;
//!
//! // Resolve an address to its segment
//! let block = space.resolve(0x7fff_0000_1000)?;
//! println!(
//!     "[{:#x}, {:#x}) {} {:?}",
//!     block.vaddr(),
//!     block.vaddr() + block.size(),
//!     block.flags(),
//!     block.backing()
//! );
//!
//! // Walk all segments in address order
//! space.for_each_block(false, |block| {
//!     println!("{block:?}");
//!     false
//! })?;
//! # Ok::<(), corescope::Error>(())
//! ```
//!
//! ### Typed Memory Access
//!
//! ```rust,no_run
//! use corescope::{AddressSpace, MemRef};
//! use corescope::layout::{Family, StructKind};
//! use std::path::Path;
//!
//! let mut space = AddressSpace::load_core(Path::new("/tmp/default.core"), true)?;
//!
//! // Activate the layout tables of the target's Android release
//! space.select_version(Family::Runtime, 31);
//!
//! // Read fields through a typed reference
//! let debug = MemRef::new(&space, space.debug_addr(), StructKind::Debug);
//! let version = debug.field("r_version")?;
//! println!("r_debug version {version}");
//! # Ok::<(), corescope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `corescope` is organized into several key modules:
//!
//! - [`prelude`] - Convenient re-exports of commonly used types and traits
//! - [`space`] - Address-space reconstruction: [`AddressSpace`], [`space::LoadBlock`],
//!   module enumeration
//! - [`layout`] - Version-aware structure layout tables and the
//!   [`layout::LayoutRegistry`]
//! - [`memref`] - Typed references into target memory
//! - [`verify`] - Cross-source consistency verification
//! - [`file`] - Memory-mapped and in-memory data backends
//! - [`Error`] and [`Result`] - Comprehensive error handling
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result) with detailed error information:
//!
//! ```rust,no_run
//! use corescope::{AddressSpace, Error};
//! use std::path::Path;
//!
//! match AddressSpace::load_core(Path::new("/tmp/default.core"), true) {
//!     Ok(space) => println!("{} segments", space.block_count()),
//!     Err(Error::Malformed { message, .. }) => println!("Malformed core: {}", message),
//!     Err(Error::UnsupportedMachine(machine)) => println!("Unsupported machine {machine}"),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! Address resolution failures deserve special mention: dereferencing stale pointers
//! is the *normal case* when analyzing a damaged heap, so [`Error::NotMapped`] is an
//! ordinary, matchable outcome rather than something to bubble up blindly.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
mod error;

/// Data backends: memory-mapped files and owned in-memory buffers.
///
/// The [`file::Backend`] trait abstracts where snapshot bytes physically live;
/// [`file::Physical`] maps a file, [`file::Memory`] owns a buffer. The [`file::io`]
/// submodule holds the bounds-checked little-endian readers every typed access
/// funnels through.
pub mod file;

/// Version-aware structure layout tables.
///
/// Field offsets of target structures vary with pointer width and Android release;
/// the [`layout::LayoutRegistry`] owns the active selection and answers every
/// "offset of field X" question in the crate. See the module documentation for the
/// versioning rules.
pub mod layout;

/// Typed references into target memory.
///
/// A [`MemRef`] asserts "the bytes at this address are this structure" and reads
/// fields through the active layout selection. Construction never touches memory;
/// failures surface on the first field read.
pub mod memref;

/// Address-space reconstruction.
///
/// The [`AddressSpace`] is the root object of the engine: it parses a core file,
/// indexes one [`space::LoadBlock`] per load segment, and serves address resolution,
/// traversal, overlay patching and module attachment.
pub mod space;

/// Cross-source consistency verification.
///
/// The [`Verifier`] compares a segment's snapshot bytes against its replayed backing
/// file and reports where they disagree, with nearest-symbol annotation when modules
/// are attached.
pub mod verify;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust,no_run
/// use corescope::prelude::*;
/// use std::path::Path;
///
/// let space = AddressSpace::load_core(Path::new("/tmp/default.core"), true)?;
/// # Ok::<(), corescope::Error>(())
/// ```
pub mod prelude;

/// `corescope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always
/// [`Error`]. Used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `corescope` Error type
///
/// The main error type for all operations in this crate. Provides detailed error
/// information for core file parsing, address resolution and verification.
pub use error::Error;

/// Main entry point for core dump analysis.
///
/// See [`space::AddressSpace`] for loading, resolution and traversal.
pub use space::AddressSpace;

/// Typed reference to a structure in target memory.
///
/// See [`memref::MemRef`] for field access and pointer chasing.
pub use memref::MemRef;

/// Cross-source consistency scanner and its result types.
pub use verify::{Finding, Selector, Verifier};
