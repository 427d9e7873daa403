//! Virtual address-space reconstruction.
//!
//! This module turns a snapshot's load segments into an addressable, queryable memory
//! space. It is the root object of the engine: one [`AddressSpace`] per loaded
//! snapshot, owning the ordered [`LoadBlock`] index, the global snapshot metadata
//! (pointer width, machine, debug-structure address) and the
//! [`crate::layout::LayoutRegistry`] that every typed read consults.
//!
//! # Architecture
//!
//! Loading is all-or-nothing: [`AddressSpace::load_core`] either returns a fully built
//! space or an error, never a partial one. After that, reads take `&self` and
//! mutations (unload, version selection, overlay patches, module attach) take
//! `&mut self`, which statically enforces the engine's one-command-in-flight
//! discipline - no read can observe a half-swapped layout table or a half-built index.
//!
//! Address resolution is the hot path: a heap walk performs one [`AddressSpace::resolve`]
//! per field access across millions of objects, so it is a binary search over the
//! sorted block index, preceded only by a linear probe of the (rare) synthetic overlay
//! segments that take precedence over the blocks they shadow.
//!
//! # Examples
//!
//! ```rust,no_run
//! use corescope::AddressSpace;
//! use std::path::Path;
//!
//! let space = AddressSpace::load_core(Path::new("/tmp/default.core"), true)?;
//! println!("{} machine, {} segments", space.machine(), space.block_count());
//!
//! let block = space.resolve(0x7fff_0000_1000)?;
//! println!("[{:#x}, {:#x}) {}", block.vaddr(), block.vaddr() + block.size(), block.flags());
//! # Ok::<(), corescope::Error>(())
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use strum::Display;
use tracing::{debug, info};

use crate::file::{io, Backend, Physical};
use crate::layout::{Bitness, Family, LayoutRegistry};
use crate::{Error, Result};

mod block;
pub mod module;

pub use block::{BackingState, Flags, LoadBlock, Source};
pub use module::{ModuleRecord, Symbol, SymbolResolver, SymbolSource};

/// The `NT_FILE` core note: per-segment backing file ranges and paths.
const NT_FILE: u32 = 0x46494c45;

/// Longest C string the engine will read out of target memory.
const MAX_CSTRING: u64 = 4096;

/// Machine type of the target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Machine {
    /// AArch64
    #[strum(serialize = "arm64")]
    Arm64,
    /// 32-bit ARM
    #[strum(serialize = "arm")]
    Arm,
    /// x86-64
    #[strum(serialize = "x86_64")]
    X86_64,
    /// 32-bit x86
    #[strum(serialize = "x86")]
    X86,
    /// RISC-V 64
    #[strum(serialize = "riscv64")]
    Riscv64,
}

impl Machine {
    /// Map an ELF `e_machine` value to a supported machine.
    fn from_elf(e_machine: u16) -> Option<Machine> {
        use goblin::elf::header::{EM_386, EM_AARCH64, EM_ARM, EM_RISCV, EM_X86_64};
        match e_machine {
            EM_AARCH64 => Some(Machine::Arm64),
            EM_ARM => Some(Machine::Arm),
            EM_X86_64 => Some(Machine::X86_64),
            EM_386 => Some(Machine::X86),
            EM_RISCV => Some(Machine::Riscv64),
            _ => None,
        }
    }
}

/// One segment of a snapshot, as reported by its source.
///
/// For ELF cores these come from the program headers plus the `NT_FILE` note; a
/// live-process source builds them from its memory map.
#[derive(Debug, Clone)]
pub struct SegmentDescriptor {
    /// Virtual start address
    pub vaddr: u64,
    /// Size in the target's address space
    pub mem_size: u64,
    /// Bytes materialized in the snapshot
    pub file_size: u64,
    /// Offset of the materialized bytes within the snapshot source
    pub offset: u64,
    /// Protection flags
    pub flags: Flags,
    /// Backing file path recorded for the segment, if file-backed
    pub path: Option<PathBuf>,
    /// Offset of the segment within its backing file
    pub path_offset: u64,
}

/// The reconstructed virtual address space of one snapshot.
///
/// See the [module documentation](self) for the lifecycle and resolution rules.
pub struct AddressSpace {
    loaded: bool,
    quick: bool,
    machine: Machine,
    layout: LayoutRegistry,
    /// Main index: one block per snapshot segment, sorted by vaddr, non-overlapping.
    blocks: Vec<LoadBlock>,
    /// Synthetic overlay segments; take precedence over `blocks` in resolution.
    overlays: Vec<LoadBlock>,
    /// Address of the dynamic linker's `r_debug`, 0 if unknown.
    debug_addr: u64,
}

impl AddressSpace {
    /// Load a snapshot from an ELF core file on disk.
    ///
    /// `quick` skips materializing segments that carry no read permission, trading
    /// address-space completeness for load speed on very large cores; such segments
    /// still resolve, but to invalid blocks.
    ///
    /// # Errors
    /// [`crate::Error::Malformed`] if the file is not an ELF core,
    /// [`crate::Error::UnsupportedMachine`] if the machine has no structure layouts,
    /// [`crate::Error::FileError`] on I/O failure.
    pub fn load_core(path: &Path, quick: bool) -> Result<AddressSpace> {
        let backend: Arc<dyn Backend> = Arc::new(Physical::new(path)?);
        let mut space = Self::load_core_backend(backend, quick)?;
        space.replay_known_files();
        info!(
            core = %path.display(),
            machine = %space.machine,
            segments = space.blocks.len(),
            quick,
            "core file loaded"
        );
        Ok(space)
    }

    /// Load a snapshot from an in-memory ELF core image.
    ///
    /// Same contract as [`AddressSpace::load_core`]; used for live-process captures
    /// that were already read into memory.
    pub fn load_core_bytes(data: Vec<u8>, quick: bool) -> Result<AddressSpace> {
        let backend: Arc<dyn Backend> = Arc::new(crate::file::Memory::new(data));
        let mut space = Self::load_core_backend(backend, quick)?;
        space.replay_known_files();
        Ok(space)
    }

    /// Build an address space from pre-parsed segment descriptors.
    ///
    /// This is the generic entry for non-ELF snapshot sources (a live-process reader,
    /// tests); [`AddressSpace::load_core`] is a thin ELF front-end over it. Replayed
    /// backing files are *not* mapped automatically through this entry.
    ///
    /// # Errors
    /// [`crate::Error::Malformed`] if two descriptors overlap.
    pub fn from_segments(
        backend: Arc<dyn Backend>,
        segments: Vec<SegmentDescriptor>,
        machine: Machine,
        bitness: Bitness,
        quick: bool,
    ) -> Result<AddressSpace> {
        let mut blocks = Vec::with_capacity(segments.len());
        for segment in segments {
            if segment.vaddr.checked_add(segment.mem_size).is_none() {
                return Err(malformed_error!(
                    "segment at {:#x} with size {:#x} wraps the address space",
                    segment.vaddr,
                    segment.mem_size
                ));
            }
            // Quick load: leave non-readable segments in the index but unmaterialized.
            let materialize = !quick || segment.flags.contains(Flags::R);
            let available = backend.len() as u64;
            let real_size = if materialize && segment.offset < available {
                segment.file_size.min(available - segment.offset)
            } else {
                0
            };
            let core = if materialize {
                Some((backend.clone(), segment.offset))
            } else {
                None
            };

            blocks.push(LoadBlock::new(
                segment.vaddr,
                segment.mem_size,
                real_size.min(segment.mem_size),
                segment.flags,
                core,
                segment.path.map(|p| (p, segment.path_offset)),
            ));
        }

        blocks.sort_by_key(LoadBlock::vaddr);
        for pair in blocks.windows(2) {
            if pair[1].vaddr() < pair[0].vaddr() + pair[0].size() {
                return Err(malformed_error!(
                    "segments [{:#x}, {:#x}) and [{:#x}, {:#x}) overlap",
                    pair[0].vaddr(),
                    pair[0].vaddr() + pair[0].size(),
                    pair[1].vaddr(),
                    pair[1].vaddr() + pair[1].size()
                ));
            }
        }

        Ok(AddressSpace {
            loaded: true,
            quick,
            machine,
            layout: LayoutRegistry::new(bitness),
            blocks,
            overlays: Vec::new(),
            debug_addr: 0,
        })
    }

    /// Parse an ELF core image into segments and build the space.
    fn load_core_backend(backend: Arc<dyn Backend>, quick: bool) -> Result<AddressSpace> {
        use goblin::elf::{header::ET_CORE, program_header::PT_LOAD, Elf};

        let data = backend.data();
        let elf = Elf::parse(data)?;

        if elf.header.e_type != ET_CORE {
            return Err(malformed_error!(
                "not a core file (e_type {})",
                elf.header.e_type
            ));
        }

        let Some(machine) = Machine::from_elf(elf.header.e_machine) else {
            return Err(Error::UnsupportedMachine(elf.header.e_machine));
        };
        let bitness = if elf.is_64 { Bitness::B64 } else { Bitness::B32 };

        let mut files = Vec::new();
        if let Some(notes) = elf.iter_note_headers(data) {
            for note in notes.flatten() {
                if note.n_type == NT_FILE && note.name.trim_end_matches('\0') == "CORE" {
                    files = parse_nt_file(&note.desc, bitness)?;
                }
            }
        }

        let mut segments = Vec::new();
        for phdr in &elf.program_headers {
            if phdr.p_type != PT_LOAD {
                continue;
            }

            let backing = files
                .iter()
                .find(|f| f.start == phdr.p_vaddr)
                .map(|f| (f.path.clone(), f.file_offset));

            segments.push(SegmentDescriptor {
                vaddr: phdr.p_vaddr,
                mem_size: phdr.p_memsz,
                file_size: phdr.p_filesz,
                offset: phdr.p_offset,
                flags: Flags::from_bits_truncate(phdr.p_flags),
                path: backing.as_ref().map(|(p, _)| p.clone()),
                path_offset: backing.map_or(0, |(_, o)| o),
            });
        }

        if segments.is_empty() {
            return Err(malformed_error!("core file has no load segments"));
        }

        Self::from_segments(backend, segments, machine, bitness, quick)
    }

    /// Map on-disk backing files as replayed sources, for every file-backed block
    /// whose recorded path still exists. Failures are ignored: analysis commonly runs
    /// on a different machine than the crash.
    fn replay_known_files(&mut self) {
        for block in &mut self.blocks {
            let Some((path, offset)) = block
                .backing_path()
                .map(|p| (p.to_path_buf(), block.backing_file_offset()))
            else {
                continue;
            };
            if !path.exists() {
                continue;
            }
            if let Err(error) = block.replay_file(&path, offset) {
                debug!(path = %path.display(), %error, "backing file replay failed");
            }
        }
    }

    /// `true` while a snapshot is loaded.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.loaded
    }

    /// Release all blocks and mapped files. Subsequent queries fail with
    /// [`crate::Error::NotLoaded`].
    pub fn unload(&mut self) {
        self.blocks.clear();
        self.overlays.clear();
        self.loaded = false;
        info!("core file unloaded");
    }

    /// Pointer width of the target.
    #[must_use]
    pub fn bitness(&self) -> Bitness {
        self.layout.bitness()
    }

    /// Machine type of the target.
    #[must_use]
    pub fn machine(&self) -> Machine {
        self.machine
    }

    /// `true` if the snapshot was loaded in quick mode.
    #[must_use]
    pub fn quick(&self) -> bool {
        self.quick
    }

    /// The active layout selection for this snapshot.
    #[must_use]
    pub fn layout(&self) -> &LayoutRegistry {
        &self.layout
    }

    /// Activate the version-specific layout tables for one structure family.
    ///
    /// Typically driven by a runtime-version detector (library build id) or an
    /// explicit operator override. Atomic: references constructed after this returns
    /// see only the new tables.
    pub fn select_version(&mut self, family: Family, sdk: u32) {
        self.layout.select_version(family, sdk);
    }

    /// Address of the dynamic linker's `r_debug` structure, 0 if unknown.
    #[must_use]
    pub fn debug_addr(&self) -> u64 {
        self.debug_addr
    }

    /// Record the address of the dynamic linker's `r_debug` structure.
    ///
    /// Supplied by the collaborator that located it (auxv walk or linker symbol).
    pub fn set_debug_addr(&mut self, addr: u64) {
        self.debug_addr = addr;
    }

    /// Number of indexed segments, synthetic overlays included.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len() + self.overlays.len()
    }

    /// Resolve an address to the unique block covering it.
    ///
    /// Synthetic overlay segments take precedence over the blocks they shadow.
    ///
    /// # Errors
    /// [`crate::Error::NotLoaded`] after [`AddressSpace::unload`];
    /// [`crate::Error::NotMapped`] when no segment covers `addr` - the expected,
    /// non-exceptional outcome for stale pointers.
    pub fn resolve(&self, addr: u64) -> Result<&LoadBlock> {
        if !self.loaded {
            return Err(Error::NotLoaded);
        }

        if let Some(overlay) = self.overlays.iter().find(|b| b.contains(addr)) {
            return Ok(overlay);
        }

        let idx = self.blocks.partition_point(|b| b.vaddr() <= addr);
        if idx > 0 && self.blocks[idx - 1].contains(addr) {
            return Ok(&self.blocks[idx - 1]);
        }
        Err(Error::NotMapped(addr))
    }

    /// Visit blocks in ascending address order; the callback returns `true` to stop.
    ///
    /// `quick` restricts the traversal to read-bearing segments, mirroring the quick
    /// loader's materialization rule. Each block is visited exactly once per call.
    ///
    /// # Errors
    /// [`crate::Error::NotLoaded`] after [`AddressSpace::unload`].
    pub fn for_each_block(
        &self,
        quick: bool,
        mut callback: impl FnMut(&LoadBlock) -> bool,
    ) -> Result<()> {
        for block in self.blocks_ordered()? {
            if quick && !block.flags().contains(Flags::R) {
                continue;
            }
            if callback(block) {
                break;
            }
        }
        Ok(())
    }

    /// All blocks in ascending address order, overlay segments merged in (an overlay
    /// precedes a same-address main block, matching resolution precedence).
    pub(crate) fn blocks_ordered(&self) -> Result<impl Iterator<Item = &LoadBlock>> {
        if !self.loaded {
            return Err(Error::NotLoaded);
        }

        let mut merged: Vec<&LoadBlock> = self.overlays.iter().chain(&self.blocks).collect();
        merged.sort_by_key(|b| (b.vaddr(), !b.is_overlay()));
        Ok(merged.into_iter())
    }

    /// Patch bytes of the in-memory view at `addr`.
    ///
    /// The write lands in the covering block's overlay copy; the snapshot file is
    /// never modified.
    ///
    /// # Errors
    /// [`crate::Error::NotMapped`] if no segment covers `addr`,
    /// [`crate::Error::OutOfRange`] if the write crosses the segment end.
    pub fn overlay_write(&mut self, addr: u64, bytes: &[u8]) -> Result<()> {
        if !self.loaded {
            return Err(Error::NotLoaded);
        }

        if let Some(block) = self.overlays.iter_mut().find(|b| b.contains(addr)) {
            return block.overlay_write(addr - block.vaddr(), bytes);
        }

        let idx = self.blocks.partition_point(|b| b.vaddr() <= addr);
        if idx > 0 && self.blocks[idx - 1].contains(addr) {
            let block = &mut self.blocks[idx - 1];
            return block.overlay_write(addr - block.vaddr(), bytes);
        }
        Err(Error::NotMapped(addr))
    }

    /// Insert a synthetic overlay segment that shadows whatever it covers.
    ///
    /// Used to patch known-corrupt ranges with bytes from elsewhere; resolution will
    /// prefer this segment over any main block claiming the same addresses.
    pub fn insert_overlay(&mut self, vaddr: u64, data: Vec<u8>, flags: Flags) {
        let size = data.len() as u64;
        let mut block = LoadBlock::new(vaddr, size, 0, flags, None, None);
        // Seeding via overlay_write keeps the block's state machine in one place.
        let _ = block.overlay_write(0, &data);
        self.overlays.push(block);
        self.overlays.sort_by_key(LoadBlock::vaddr);
    }

    /// Map `path` as the replayed source of the block covering `vaddr`, overriding
    /// the recorded backing path (e.g. a local copy of the target's library).
    ///
    /// # Errors
    /// [`crate::Error::NotMapped`] if no segment covers `vaddr`,
    /// [`crate::Error::FileError`] if the file cannot be mapped.
    pub fn replay_block_file(&mut self, vaddr: u64, path: &Path, file_offset: u64) -> Result<()> {
        if !self.loaded {
            return Err(Error::NotLoaded);
        }

        let idx = self.blocks.partition_point(|b| b.vaddr() <= vaddr);
        if idx > 0 && self.blocks[idx - 1].contains(vaddr) {
            return self.blocks[idx - 1].replay_file(path, file_offset);
        }
        Err(Error::NotMapped(vaddr))
    }

    /// Walk the target's link map and attach module identities and symbol resolvers
    /// to the blocks each module covers.
    ///
    /// Returns the recovered module records. Idempotent: already-attached blocks keep
    /// their first resolver.
    ///
    /// # Errors
    /// [`crate::Error::NotLoaded`] after unload. A stale or absent link map is not an
    /// error; it yields an empty record list.
    pub fn attach_modules(&mut self, symbols: &dyn SymbolSource) -> Result<Vec<ModuleRecord>> {
        if !self.loaded {
            return Err(Error::NotLoaded);
        }

        let records = module::walk_link_map(self)?;
        let mut attached = 0usize;
        for record in &records {
            if record.name.is_empty() {
                continue;
            }
            let Some(resolver) = symbols.resolver_for(&record.name) else {
                continue;
            };
            for block in &mut self.blocks {
                let named = block
                    .backing_path()
                    .is_some_and(|p| p == Path::new(&record.name));
                if named || block.contains(record.addr) {
                    block.attach_module(&record.name, resolver.clone());
                    attached += 1;
                }
            }
        }

        debug!(modules = records.len(), blocks = attached, "modules attached");
        Ok(records)
    }

    /// Attach a module identity and symbol resolver to the block covering `vaddr`.
    ///
    /// Manual counterpart of [`AddressSpace::attach_modules`], for when the link map
    /// is stale or absent but the operator knows the mapping.
    ///
    /// # Errors
    /// [`crate::Error::NotMapped`] if no segment covers `vaddr`.
    pub fn attach_module_at(
        &mut self,
        vaddr: u64,
        path: &str,
        resolver: Arc<dyn SymbolResolver>,
    ) -> Result<()> {
        if !self.loaded {
            return Err(Error::NotLoaded);
        }

        let idx = self.blocks.partition_point(|b| b.vaddr() <= vaddr);
        if idx > 0 && self.blocks[idx - 1].contains(vaddr) {
            self.blocks[idx - 1].attach_module(path, resolver);
            return Ok(());
        }
        Err(Error::NotMapped(vaddr))
    }

    /// Read a NUL-terminated string from target memory at `addr`.
    ///
    /// Bounded by the covering segment and by [`MAX_CSTRING`].
    ///
    /// # Errors
    /// Resolution and range errors of the covering block.
    pub fn read_cstring(&self, addr: u64) -> Result<String> {
        let block = self.resolve(addr)?;
        let offset = addr - block.vaddr();
        let available = block.real_size().saturating_sub(offset).min(MAX_CSTRING);
        if available == 0 {
            return Err(Error::NotReady(addr));
        }

        let data = block.bytes(Source::Original, offset, available)?;
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Ok(String::from_utf8_lossy(&data[..end]).into_owned())
    }
}

/// One entry of the `NT_FILE` note.
struct NtFileEntry {
    start: u64,
    path: PathBuf,
    file_offset: u64,
}

/// Parse the `NT_FILE` descriptor: `count`, `page_size`, `count` (start, end,
/// page-offset) triples, then `count` NUL-terminated paths. All words are
/// pointer-width.
fn parse_nt_file(desc: &[u8], bitness: Bitness) -> Result<Vec<NtFileEntry>> {
    let mut offset = 0usize;
    let count = io::read_ptr_at(desc, &mut offset, bitness)?;
    let page_size = io::read_ptr_at(desc, &mut offset, bitness)?;

    // Every word of the note is target-controlled; bound the count by what the note
    // can actually hold before allocating anything.
    let entry_size = 3 * bitness.ptr_size();
    let available = (desc.len() - offset) as u64;
    if count > available / entry_size {
        return Err(malformed_error!(
            "NT_FILE count {} exceeds the note's {} remaining bytes",
            count,
            available
        ));
    }

    #[allow(clippy::cast_possible_truncation)]
    let count = count as usize;
    let mut ranges = Vec::with_capacity(count);
    for _ in 0..count {
        let start = io::read_ptr_at(desc, &mut offset, bitness)?;
        let _end = io::read_ptr_at(desc, &mut offset, bitness)?;
        let page_offset = io::read_ptr_at(desc, &mut offset, bitness)?;
        ranges.push((start, page_offset));
    }

    let mut entries = Vec::with_capacity(count);
    for (start, page_offset) in ranges {
        let rest = &desc[offset..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| malformed_error!("NT_FILE strings are truncated"))?;
        let path = PathBuf::from(String::from_utf8_lossy(&rest[..end]).into_owned());
        offset += end + 1;

        let file_offset = page_offset.checked_mul(page_size).ok_or_else(|| {
            malformed_error!(
                "NT_FILE offset {:#x} * page size {:#x} overflows for {}",
                page_offset,
                page_size,
                path.display()
            )
        })?;

        entries.push(NtFileEntry {
            start,
            path,
            file_offset,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::Memory;

    fn descriptor(vaddr: u64, size: u64, file_size: u64, offset: u64, flags: Flags) -> SegmentDescriptor {
        SegmentDescriptor {
            vaddr,
            mem_size: size,
            file_size,
            offset,
            flags,
            path: None,
            path_offset: 0,
        }
    }

    fn two_segment_space() -> AddressSpace {
        let backend: Arc<dyn Backend> = Arc::new(Memory::new(vec![0xAB; 0x2000]));
        AddressSpace::from_segments(
            backend,
            vec![
                descriptor(0x1000, 0x1000, 0x1000, 0, Flags::R | Flags::W),
                descriptor(0x2000, 0x1000, 0x1000, 0x1000, Flags::R | Flags::X),
            ],
            Machine::Arm64,
            Bitness::B64,
            false,
        )
        .unwrap()
    }

    #[test]
    fn resolve_partitions_the_space() {
        let space = two_segment_space();

        let first = space.resolve(0x1500).unwrap();
        assert_eq!(first.vaddr(), 0x1000);
        let last = space.resolve(0x2FFF).unwrap();
        assert_eq!(last.vaddr(), 0x2000);
        assert_eq!(space.resolve(0x2000).unwrap().vaddr(), 0x2000);

        assert!(matches!(space.resolve(0xFFF), Err(Error::NotMapped(0xFFF))));
        assert!(matches!(space.resolve(0x3000), Err(Error::NotMapped(_))));
    }

    #[test]
    fn overlapping_segments_are_malformed() {
        let backend: Arc<dyn Backend> = Arc::new(Memory::new(vec![0; 0x100]));
        let result = AddressSpace::from_segments(
            backend,
            vec![
                descriptor(0x1000, 0x1000, 0, 0, Flags::R),
                descriptor(0x1800, 0x1000, 0, 0, Flags::R),
            ],
            Machine::Arm64,
            Bitness::B64,
            false,
        );
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }

    #[test]
    fn quick_load_skips_materializing_unreadable_segments() {
        let backend: Arc<dyn Backend> = Arc::new(Memory::new(vec![0xCD; 0x2000]));
        let space = AddressSpace::from_segments(
            backend,
            vec![
                descriptor(0x1000, 0x1000, 0x1000, 0, Flags::empty()),
                descriptor(0x2000, 0x1000, 0x1000, 0x1000, Flags::R),
            ],
            Machine::Arm64,
            Bitness::B64,
            true,
        )
        .unwrap();

        // Still indexed, but invalid
        let hidden = space.resolve(0x1800).unwrap();
        assert!(!hidden.is_valid());
        assert!(space.resolve(0x2800).unwrap().is_valid());

        // Quick traversal skips it, full traversal does not
        let mut quick_count = 0;
        space.for_each_block(true, |_| { quick_count += 1; false }).unwrap();
        assert_eq!(quick_count, 1);

        let mut full_count = 0;
        space.for_each_block(false, |_| { full_count += 1; false }).unwrap();
        assert_eq!(full_count, 2);
    }

    #[test]
    fn traversal_is_ordered_and_stoppable() {
        let space = two_segment_space();

        let mut seen = Vec::new();
        space
            .for_each_block(false, |block| {
                seen.push(block.vaddr());
                false
            })
            .unwrap();
        assert_eq!(seen, vec![0x1000, 0x2000]);

        let mut visits = 0;
        space
            .for_each_block(false, |_| {
                visits += 1;
                true // stop after the first
            })
            .unwrap();
        assert_eq!(visits, 1);
    }

    #[test]
    fn unload_invalidates_queries() {
        let mut space = two_segment_space();
        assert!(space.is_ready());

        space.unload();
        assert!(!space.is_ready());
        assert!(matches!(space.resolve(0x1500), Err(Error::NotLoaded)));
        assert!(matches!(
            space.for_each_block(false, |_| false),
            Err(Error::NotLoaded)
        ));
    }

    #[test]
    fn overlay_segment_takes_precedence() {
        let mut space = two_segment_space();

        space.insert_overlay(0x1800, vec![0xEE; 0x100], Flags::R | Flags::W);

        let block = space.resolve(0x1880).unwrap();
        assert!(block.is_overlay());
        assert_eq!(block.vaddr(), 0x1800);
        assert_eq!(block.bytes(Source::Original, 0, 1).unwrap(), &[0xEE]);

        // Outside the overlay the main block still answers
        assert!(!space.resolve(0x1400).unwrap().is_overlay());

        // Traversal yields the overlay in address order
        let mut seen = Vec::new();
        space
            .for_each_block(false, |block| {
                seen.push(block.vaddr());
                false
            })
            .unwrap();
        assert_eq!(seen, vec![0x1000, 0x1800, 0x2000]);
    }

    #[test]
    fn overlay_write_patches_view() {
        let mut space = two_segment_space();

        space.overlay_write(0x1004, &[1, 2, 3, 4]).unwrap();
        let block = space.resolve(0x1004).unwrap();
        assert_eq!(
            block.bytes(Source::Original, 4, 4).unwrap(),
            &[1, 2, 3, 4]
        );

        assert!(matches!(
            space.overlay_write(0x9000, &[0]),
            Err(Error::NotMapped(_))
        ));
    }

    #[test]
    fn read_cstring_stops_at_nul() {
        let mut data = vec![0u8; 0x100];
        data[0x10..0x1C].copy_from_slice(b"/system/lib\0");
        let backend: Arc<dyn Backend> = Arc::new(Memory::new(data));
        let space = AddressSpace::from_segments(
            backend,
            vec![descriptor(0x1000, 0x100, 0x100, 0, Flags::R)],
            Machine::Arm64,
            Bitness::B64,
            false,
        )
        .unwrap();

        assert_eq!(space.read_cstring(0x1010).unwrap(), "/system/lib");
        assert!(space.read_cstring(0x4000).is_err());
    }

    #[test]
    fn nt_file_parsing() {
        // count=1, page_size=0x1000, one (start, end, page_offset) triple, one path
        let mut desc = Vec::new();
        for word in [1u64, 0x1000, 0x7000_0000, 0x7000_4000, 2] {
            desc.extend_from_slice(&word.to_le_bytes());
        }
        desc.extend_from_slice(b"/system/lib64/libart.so\0");

        let entries = parse_nt_file(&desc, Bitness::B64).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].start, 0x7000_0000);
        assert_eq!(entries[0].path, PathBuf::from("/system/lib64/libart.so"));
        assert_eq!(entries[0].file_offset, 0x2000);

        // Truncated strings are malformed
        let truncated = &desc[..desc.len() - 1];
        assert!(parse_nt_file(truncated, Bitness::B64).is_err());
    }

    #[test]
    fn nt_file_rejects_overflowing_offset() {
        // page_size * page_offset would wrap; must fail, not panic
        let mut desc = Vec::new();
        for word in [1u64, u64::MAX, 0x7000_0000, 0x7000_4000, 2] {
            desc.extend_from_slice(&word.to_le_bytes());
        }
        desc.extend_from_slice(b"/system/lib64/libc.so\0");

        assert!(matches!(
            parse_nt_file(&desc, Bitness::B64),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn nt_file_rejects_implausible_count() {
        // A count the note cannot possibly hold must fail before any allocation
        let mut desc = Vec::new();
        for word in [u64::MAX, 0x1000u64] {
            desc.extend_from_slice(&word.to_le_bytes());
        }

        assert!(matches!(
            parse_nt_file(&desc, Bitness::B64),
            Err(Error::Malformed { .. })
        ));

        // Same for a count merely larger than the remaining triples
        let mut desc = Vec::new();
        for word in [2u64, 0x1000, 0x7000_0000, 0x7000_1000, 0] {
            desc.extend_from_slice(&word.to_le_bytes());
        }
        desc.extend_from_slice(b"/a\0");
        assert!(matches!(
            parse_nt_file(&desc, Bitness::B64),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn wrapping_segment_is_malformed() {
        let backend: Arc<dyn Backend> = Arc::new(Memory::new(vec![0; 0x100]));
        let result = AddressSpace::from_segments(
            backend,
            vec![descriptor(u64::MAX - 0x100, 0x1000, 0, 0, Flags::R)],
            Machine::Arm64,
            Bitness::B64,
            false,
        );
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }
}
