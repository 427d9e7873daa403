//! A single contiguous load segment of the reconstructed address space.
//!
//! Every [`LoadBlock`] couples one virtual-memory range with its backing-data policy.
//! A segment can be backed by up to two independent sources:
//!
//! 1. **Original** - the bytes the snapshot itself captured for the segment
//! 2. **ReplayedFile** - the bytes of the original on-disk file, re-opened and mapped
//!    at the segment's recorded file offset
//!
//! The two sources are not guaranteed to agree. Capture tools truncate read-only
//! file-backed pages to keep snapshots small, and a corrupted capture can differ from
//! the file it claims to map; the replayed source exists to recover the former and the
//! [`crate::verify::Verifier`] reports the latter. This block never resolves the
//! divergence itself.
//!
//! A block may additionally carry an in-memory *overlay*: a copy-on-write patch of the
//! Original view. Overlays are how write commands mutate the engine's view without ever
//! touching the snapshot file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bitflags::bitflags;
use crc32fast::Hasher;

use crate::file::{Backend, Physical};
use crate::space::module::SymbolResolver;
use crate::{Error, Result};

bitflags! {
    /// Protection flags of a load segment, mirroring ELF `p_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u32 {
        /// Segment is executable
        const X = 1;
        /// Segment is writable
        const W = 2;
        /// Segment is readable
        const R = 4;
    }
}

impl fmt::Display for Flags {
    /// Renders `rwx`-style protection strings, e.g. `r-x`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.contains(Flags::R) { 'r' } else { '-' },
            if self.contains(Flags::W) { 'w' } else { '-' },
            if self.contains(Flags::X) { 'x' } else { '-' },
        )
    }
}

/// Which backing source a read should be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The bytes embedded in the snapshot (what the capture actually recorded).
    ///
    /// Preferred default for correctness; reflects any overlay patches.
    Original,
    /// The bytes of the original backing file, mapped at the recorded offset.
    ///
    /// Exists to recover truncated segments and to cross-validate the capture.
    ReplayedFile,
}

/// Aggregate backing condition of a block, as an explicit tagged state.
///
/// Whether the two sources of a [`BackingState::Dual`] block *agree* is a separate
/// fact established by the [`crate::verify::Verifier`], not recorded here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingState {
    /// No usable source; every read fails
    Unmaterialized,
    /// Exactly one source is usable
    Single(Source),
    /// Both the snapshot bytes and a replayed file mapping are usable
    Dual,
}

/// The replayed-file source: the original backing file mapped read-only.
struct FileBacking {
    map: Physical,
    offset: u64,
    path: PathBuf,
}

/// Module association, attached once the link-map walk has named the segment.
struct ModuleLink {
    path: String,
    resolver: Arc<dyn SymbolResolver>,
}

/// One contiguous virtual-memory region of the snapshot plus its backing policy and
/// validity state.
///
/// Blocks are created in bulk when a snapshot is loaded (one per segment descriptor)
/// and destroyed en masse on unload. After creation they are never mutated except to
/// attach a module/symbol handle (idempotent) or an overlay patch.
pub struct LoadBlock {
    vaddr: u64,
    mem_size: u64,
    real_size: u64,
    flags: Flags,
    /// Original source: the snapshot backend plus this segment's offset within it.
    /// `None` when the quick loader skipped materialization.
    core: Option<(Arc<dyn Backend>, u64)>,
    /// Replayed-file source, when the segment is file-backed and the file was found.
    file: Option<FileBacking>,
    /// Backing path and file offset recorded by the snapshot (NT_FILE), before any
    /// replay mapping.
    backing: Option<(PathBuf, u64)>,
    /// Copy-on-write patch of the Original view.
    overlay: Option<Vec<u8>>,
    module: Option<ModuleLink>,
}

impl LoadBlock {
    pub(crate) fn new(
        vaddr: u64,
        mem_size: u64,
        real_size: u64,
        flags: Flags,
        core: Option<(Arc<dyn Backend>, u64)>,
        backing: Option<(PathBuf, u64)>,
    ) -> LoadBlock {
        debug_assert!(real_size <= mem_size);
        LoadBlock {
            vaddr,
            mem_size,
            real_size,
            flags,
            core,
            file: None,
            backing,
            overlay: None,
            module: None,
        }
    }

    /// Virtual start address of the segment.
    #[must_use]
    pub fn vaddr(&self) -> u64 {
        self.vaddr
    }

    /// Size of the segment in the target's address space.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.mem_size
    }

    /// Bytes actually materialized for the segment. Always `<= size()`; a truncated
    /// capture leaves `real_size < size`.
    #[must_use]
    pub fn real_size(&self) -> u64 {
        match &self.overlay {
            Some(overlay) => overlay.len() as u64,
            None => self.real_size,
        }
    }

    /// Protection flags.
    #[must_use]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// `true` if `addr` falls inside this segment's range.
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        // Subtraction form: immune to vaddr + mem_size wrapping on crafted headers
        addr >= self.vaddr && addr - self.vaddr < self.mem_size
    }

    /// A block is valid when at least one source can serve reads.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.overlay.is_some() || (self.core.is_some() && self.real_size > 0) || self.file.is_some()
    }

    /// `true` once an overlay patch has been applied.
    #[must_use]
    pub fn is_overlay(&self) -> bool {
        self.overlay.is_some()
    }

    /// `true` when the replayed-file source is mapped.
    #[must_use]
    pub fn is_file_backed(&self) -> bool {
        self.file.is_some()
    }

    /// The backing path the snapshot recorded for this segment, if any.
    #[must_use]
    pub fn backing_path(&self) -> Option<&Path> {
        self.backing.as_ref().map(|(p, _)| p.as_path())
    }

    /// Offset of this segment within its recorded backing file.
    #[must_use]
    pub fn backing_file_offset(&self) -> u64 {
        self.backing.as_ref().map_or(0, |(_, o)| *o)
    }

    /// Offset of this segment within its backing file, if the replayed source is mapped.
    #[must_use]
    pub fn file_offset(&self) -> Option<u64> {
        self.file.as_ref().map(|f| f.offset)
    }

    /// Path of the mapped replayed file, if the replayed source is mapped. May differ
    /// from [`LoadBlock::backing_path`] when the operator supplied a local copy.
    #[must_use]
    pub fn replayed_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }

    /// Aggregate backing condition.
    #[must_use]
    pub fn backing(&self) -> BackingState {
        let original = self.overlay.is_some() || (self.core.is_some() && self.real_size > 0);
        match (original, self.file.is_some()) {
            (false, false) => BackingState::Unmaterialized,
            (true, false) => BackingState::Single(Source::Original),
            (false, true) => BackingState::Single(Source::ReplayedFile),
            (true, true) => BackingState::Dual,
        }
    }

    /// Module path attached by the link-map walk, if resolved.
    #[must_use]
    pub fn module_path(&self) -> Option<&str> {
        self.module.as_ref().map(|m| m.path.as_str())
    }

    /// Symbol resolver of the attached module, if resolved.
    #[must_use]
    pub fn symbols(&self) -> Option<&dyn SymbolResolver> {
        self.module.as_ref().map(|m| &*m.resolver)
    }

    /// Returns a byte view of the block's content for the requested source.
    ///
    /// `offset` is relative to the segment start. For [`Source::Original`] the view is
    /// bounded by the materialized bytes; for [`Source::ReplayedFile`] by the segment
    /// size and the mapped file's length.
    ///
    /// # Errors
    /// [`crate::Error::SourceUnavailable`] if the source was never attached,
    /// [`crate::Error::OutOfRange`] if the range exceeds what the source holds.
    pub fn bytes(&self, source: Source, offset: u64, len: u64) -> Result<&[u8]> {
        match source {
            Source::Original => {
                if let Some(overlay) = &self.overlay {
                    let end = offset
                        .checked_add(len)
                        .filter(|end| *end <= overlay.len() as u64)
                        .ok_or(out_of_range_error!(offset, len, overlay.len()))?;
                    #[allow(clippy::cast_possible_truncation)]
                    Ok(&overlay[offset as usize..end as usize])
                } else {
                    let (backend, core_offset) = self
                        .core
                        .as_ref()
                        .filter(|_| self.real_size > 0)
                        .ok_or(Error::SourceUnavailable(Source::Original))?;
                    if offset.checked_add(len).is_none_or(|end| end > self.real_size) {
                        return Err(out_of_range_error!(offset, len, self.real_size));
                    }
                    #[allow(clippy::cast_possible_truncation)]
                    backend.data_slice((core_offset + offset) as usize, len as usize)
                }
            }
            Source::ReplayedFile => {
                let file = self
                    .file
                    .as_ref()
                    .ok_or(Error::SourceUnavailable(Source::ReplayedFile))?;
                if offset.checked_add(len).is_none_or(|end| end > self.mem_size) {
                    return Err(out_of_range_error!(offset, len, self.mem_size));
                }
                #[allow(clippy::cast_possible_truncation)]
                file.map
                    .data_slice((file.offset + offset) as usize, len as usize)
            }
        }
    }

    /// CRC-32 over `len` bytes of the requested source starting at `offset`.
    ///
    /// # Errors
    /// Propagates the range and availability errors of [`LoadBlock::bytes`].
    pub fn checksum(&self, source: Source, offset: u64, len: u64) -> Result<u32> {
        let data = self.bytes(source, offset, len)?;
        let mut hasher = Hasher::new();
        hasher.update(data);
        Ok(hasher.finalize())
    }

    /// Map the original backing file as the replayed source.
    ///
    /// `file_offset` is the segment's recorded offset within that file. No-op if the
    /// replayed source is already mapped.
    ///
    /// # Errors
    /// [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub(crate) fn replay_file(&mut self, path: &Path, file_offset: u64) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        let map = Physical::new(path)?;
        self.file = Some(FileBacking {
            map,
            offset: file_offset,
            path: path.to_path_buf(),
        });
        Ok(())
    }

    /// Record the module identity and symbol resolver for this segment.
    ///
    /// Idempotent: once attached, later calls (same or different path) are ignored.
    /// Resolution is pure, so a repeated attach would be referentially identical anyway.
    pub fn attach_module(&mut self, path: &str, resolver: Arc<dyn SymbolResolver>) {
        if self.module.is_none() {
            self.module = Some(ModuleLink {
                path: path.to_string(),
                resolver,
            });
        }
    }

    /// Patch bytes of the in-memory view, never the snapshot.
    ///
    /// The first write materializes the overlay as a copy of the Original view padded
    /// with zeroes to the full segment size, so truncated ranges become patchable.
    ///
    /// # Errors
    /// [`crate::Error::OutOfRange`] if the write exceeds the segment.
    pub fn overlay_write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let len = bytes.len() as u64;
        if offset.checked_add(len).is_none_or(|end| end > self.mem_size) {
            return Err(out_of_range_error!(offset, len, self.mem_size));
        }

        if self.overlay.is_none() {
            #[allow(clippy::cast_possible_truncation)]
            let mut seed = vec![0u8; self.mem_size as usize];
            if self.real_size > 0 {
                if let Some((backend, core_offset)) = &self.core {
                    #[allow(clippy::cast_possible_truncation)]
                    if let Ok(data) =
                        backend.data_slice(*core_offset as usize, self.real_size as usize)
                    {
                        seed[..data.len()].copy_from_slice(data);
                    }
                }
            }
            self.overlay = Some(seed);
        }

        if let Some(overlay) = self.overlay.as_mut() {
            #[allow(clippy::cast_possible_truncation)]
            overlay[offset as usize..(offset + len) as usize].copy_from_slice(bytes);
        }
        Ok(())
    }
}

impl fmt::Debug for LoadBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBlock")
            .field("vaddr", &format_args!("{:#x}", self.vaddr))
            .field("size", &format_args!("{:#x}", self.mem_size))
            .field("real_size", &format_args!("{:#x}", self.real_size))
            .field("flags", &format_args!("{}", self.flags))
            .field("backing", &self.backing())
            .field("module", &self.module_path())
            .finish()
    }
}
