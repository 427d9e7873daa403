//! Cross-source consistency verification.
//!
//! A file-backed segment has two stories about its bytes: what the snapshot captured
//! ([`Source::Original`]) and what the backing file on disk says
//! ([`Source::ReplayedFile`]). For read-only mappings of libraries they must agree;
//! where they differ, either the capture is damaged or the target's memory was
//! modified in place, and both are exactly what a post-mortem investigation needs
//! surfaced.
//!
//! The scan is two-phase per segment. A whole-range CRC-32 of each source answers
//! "consistent or not" in one pass over the bytes, and only on a mismatch does the
//! byte-level window comparison run to pin down where. Matching segments, the
//! overwhelmingly common case, therefore cost two checksums and no allocation.
//!
//! ELF headers are exempt: the linker patches a mapped module's first page (and the
//! capture may store a pristine copy), so a segment that starts with the ELF magic is
//! compared from past its header only.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use crate::space::{AddressSpace, BackingState, LoadBlock, Source, Symbol};
use crate::layout::Bitness;
use crate::Result;

/// Comparison granularity of the mismatch-location pass.
const WINDOW: u64 = 16;

/// Which segments a scan covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// Every dual-backed segment of the space
    All,
    /// A single segment, by its position in address-ordered traversal
    Block(usize),
}

/// One contiguous range where the two sources disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Virtual address of the first differing window
    pub address: u64,
    /// The snapshot's bytes for the range
    pub original: Vec<u8>,
    /// The backing file's bytes for the range
    pub replayed: Vec<u8>,
    /// Nearest symbol covering or preceding the address, when the segment's module
    /// has been attached
    pub symbol: Option<Symbol>,
}

/// The consistency scanner. Stateless; every scan is a pure function of the address
/// space it is given.
pub struct Verifier;

impl Verifier {
    /// Compare the Original and ReplayedFile views of the selected segments.
    ///
    /// Only segments with both sources attached participate; the rest are skipped
    /// silently, since a missing replay source is the ordinary state of anonymous
    /// memory. Findings come back in ascending address order. `stop` is checked
    /// between segments, so cancellation leaves a valid prefix of the full result.
    ///
    /// # Errors
    /// [`crate::Error::NotLoaded`] if the space has been unloaded.
    pub fn scan(
        space: &AddressSpace,
        selector: Selector,
        stop: &AtomicBool,
    ) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        let mut scanned = 0usize;

        for (index, block) in space.blocks_ordered()?.enumerate() {
            if let Selector::Block(wanted) = selector {
                if index != wanted {
                    continue;
                }
            }
            if stop.load(Ordering::Relaxed) {
                debug!(index, "verification cancelled");
                break;
            }
            if block.backing() != BackingState::Dual {
                continue;
            }

            scanned += 1;
            Self::scan_block(space.bitness(), block, &mut findings);
        }

        info!(
            segments = scanned,
            findings = findings.len(),
            "verification finished"
        );
        Ok(findings)
    }

    /// Compare one dual-backed segment, appending findings for differing ranges.
    fn scan_block(bitness: Bitness, block: &LoadBlock, findings: &mut Vec<Finding>) {
        let skip = Self::header_skip(bitness, block);
        let len = block.real_size().saturating_sub(skip);
        if len == 0 {
            return;
        }

        let (Ok(original_crc), Ok(replayed_crc)) = (
            block.checksum(Source::Original, skip, len),
            block.checksum(Source::ReplayedFile, skip, len),
        ) else {
            // The replayed file is shorter than the recorded mapping; nothing to
            // compare against.
            debug!(vaddr = block.vaddr(), "replay source truncated, segment skipped");
            return;
        };
        if original_crc == replayed_crc {
            return;
        }

        // Mismatch: locate it, coalescing adjacent differing windows into one finding.
        let mut run: Option<(u64, u64)> = None;
        let mut offset = skip;
        while offset < skip + len {
            let window = WINDOW.min(skip + len - offset);
            let differs = match (
                block.bytes(Source::Original, offset, window),
                block.bytes(Source::ReplayedFile, offset, window),
            ) {
                (Ok(original), Ok(replayed)) => original != replayed,
                _ => false,
            };

            match (&mut run, differs) {
                (None, true) => run = Some((offset, window)),
                (Some((_, run_len)), true) => *run_len += window,
                (Some(_), false) => {
                    if let Some((start, len)) = run.take() {
                        Self::push_finding(block, start, len, findings);
                    }
                }
                (None, false) => {}
            }
            offset += window;
        }
        if let Some((start, len)) = run {
            Self::push_finding(block, start, len, findings);
        }
    }

    fn push_finding(block: &LoadBlock, offset: u64, len: u64, findings: &mut Vec<Finding>) {
        let (Ok(original), Ok(replayed)) = (
            block.bytes(Source::Original, offset, len),
            block.bytes(Source::ReplayedFile, offset, len),
        ) else {
            return;
        };

        let address = block.vaddr() + offset;
        findings.push(Finding {
            address,
            original: original.to_vec(),
            replayed: replayed.to_vec(),
            symbol: block.symbols().and_then(|resolver| resolver.nearest(address)),
        });
    }

    /// Bytes to exempt at the segment start: the ELF header, when present.
    fn header_skip(bitness: Bitness, block: &LoadBlock) -> u64 {
        let magic = block
            .bytes(Source::ReplayedFile, 0, 4)
            .map(|bytes| bytes == b"\x7fELF")
            .unwrap_or(false);
        if !magic {
            return 0;
        }
        match bitness {
            Bitness::B64 => 64,
            Bitness::B32 => 52,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{Backend, Memory};
    use crate::space::{Flags, Machine, SegmentDescriptor, SymbolResolver};
    use std::path::Path;
    use std::sync::Arc;

    const SIZE: usize = 0x400;

    fn plain_descriptor(vaddr: u64, offset: u64, path: &Path) -> SegmentDescriptor {
        SegmentDescriptor {
            vaddr,
            mem_size: SIZE as u64,
            file_size: SIZE as u64,
            offset,
            flags: Flags::R | Flags::X,
            path: Some(path.to_path_buf()),
            path_offset: 0,
        }
    }

    /// One segment whose snapshot bytes are `core` and whose backing file holds
    /// `file`, with the replay source mapped.
    fn dual_space(core: Vec<u8>, file: &[u8]) -> (AddressSpace, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libtarget.so");
        std::fs::write(&path, file).unwrap();

        let backend: Arc<dyn Backend> = Arc::new(Memory::new(core));
        let mut space = AddressSpace::from_segments(
            backend,
            vec![plain_descriptor(0x7000_0000, 0, &path)],
            Machine::Arm64,
            crate::layout::Bitness::B64,
            false,
        )
        .unwrap();
        space.replay_block_file(0x7000_0000, &path, 0).unwrap();
        (space, dir)
    }

    #[test]
    fn matching_sources_produce_no_findings() {
        let bytes = vec![0x42u8; SIZE];
        let (space, _dir) = dual_space(bytes.clone(), &bytes);

        let findings = Verifier::scan(&space, Selector::All, &AtomicBool::new(false)).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn corruption_is_located_and_coalesced() {
        let file = vec![0x42u8; SIZE];
        let mut core = file.clone();
        // One 40-byte corruption spanning three 16-byte windows
        for b in &mut core[0x100..0x128] {
            *b = 0xFF;
        }

        let (space, _dir) = dual_space(core, &file);
        let findings = Verifier::scan(&space, Selector::All, &AtomicBool::new(false)).unwrap();

        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.address, 0x7000_0100);
        // Coalesced to whole windows: 0x100..0x130
        assert_eq!(finding.original.len(), 0x30);
        assert!(finding.original[..0x28].iter().all(|&b| b == 0xFF));
        assert!(finding.replayed.iter().all(|&b| b == 0x42));
        assert!(finding.symbol.is_none());
    }

    #[test]
    fn separate_corruptions_yield_separate_findings() {
        let file = vec![0u8; SIZE];
        let mut core = file.clone();
        core[0x40] = 1;
        core[0x200] = 1;

        let (space, _dir) = dual_space(core, &file);
        let findings = Verifier::scan(&space, Selector::All, &AtomicBool::new(false)).unwrap();

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].address, 0x7000_0040);
        assert_eq!(findings[1].address, 0x7000_0200);
    }

    #[test]
    fn elf_header_differences_are_exempt() {
        let mut file = vec![0x42u8; SIZE];
        file[..4].copy_from_slice(b"\x7fELF");
        let mut core = file.clone();
        // Linker-patched bytes inside the 64-byte header
        core[0x20] = 0xAA;
        core[0x21] = 0xBB;

        let (space, _dir) = dual_space(core, &file);
        let findings = Verifier::scan(&space, Selector::All, &AtomicBool::new(false)).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn difference_past_header_is_still_reported() {
        let mut file = vec![0x42u8; SIZE];
        file[..4].copy_from_slice(b"\x7fELF");
        let mut core = file.clone();
        core[0x80] = 0;

        let (space, _dir) = dual_space(core, &file);
        let findings = Verifier::scan(&space, Selector::All, &AtomicBool::new(false)).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].address, 0x7000_0080);
    }

    #[test]
    fn stop_token_cancels_between_segments() {
        let bytes = vec![7u8; SIZE];
        let (space, _dir) = dual_space(bytes.clone(), &bytes);

        let stop = AtomicBool::new(true);
        let findings = Verifier::scan(&space, Selector::All, &stop).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn block_selector_scans_one_segment() {
        let file = vec![0u8; SIZE];
        let mut core = file.clone();
        core[0x10] = 9;

        let (space, _dir) = dual_space(core, &file);

        // Index 0 is the only segment; out-of-range index scans nothing
        let hit = Verifier::scan(&space, Selector::Block(0), &AtomicBool::new(false)).unwrap();
        assert_eq!(hit.len(), 1);
        let miss = Verifier::scan(&space, Selector::Block(5), &AtomicBool::new(false)).unwrap();
        assert!(miss.is_empty());
    }

    #[test]
    fn findings_carry_nearest_symbol() {
        struct OneSymbol;
        impl SymbolResolver for OneSymbol {
            fn nearest(&self, addr: u64) -> Option<Symbol> {
                Some(Symbol {
                    name: "art::Heap::Trim".to_string(),
                    addr: addr & !0xFF,
                    size: 0x100,
                })
            }
        }

        let file = vec![0u8; SIZE];
        let mut core = file.clone();
        core[0x150] = 1;

        let (mut space, _dir) = dual_space(core, &file);
        space
            .attach_module_at(0x7000_0000, "/system/lib64/libtarget.so", Arc::new(OneSymbol))
            .unwrap();

        let findings = Verifier::scan(&space, Selector::All, &AtomicBool::new(false)).unwrap();
        assert_eq!(findings.len(), 1);
        let symbol = findings[0].symbol.as_ref().unwrap();
        assert_eq!(symbol.name, "art::Heap::Trim");
        assert!(symbol.covers(findings[0].address));
    }
}
