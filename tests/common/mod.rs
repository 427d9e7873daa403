//! Shared functionality for integration tests: a synthetic ELF core builder.
//!
//! Real Android cores are hundreds of megabytes and not checked in; these tests build
//! minimal but structurally honest cores instead (valid ELF header, program headers,
//! an `NT_FILE` note and load segments with real bytes), so the loader exercises the
//! same parsing paths it would on a device capture.

// Each integration-test binary compiles its own copy; not all of them use every helper.
#![allow(dead_code)]

/// `e_machine` for AArch64, the default target of these tests.
pub const EM_AARCH64: u16 = 183;

/// One load segment of a core under construction.
pub struct CoreSegment {
    pub vaddr: u64,
    pub mem_size: u64,
    /// ELF `p_flags`: PF_X = 1, PF_W = 2, PF_R = 4
    pub flags: u32,
    /// Materialized bytes; shorter than `mem_size` models a truncated capture
    pub data: Vec<u8>,
    /// Backing file for the `NT_FILE` note: (path, offset in pages)
    pub file: Option<(String, u64)>,
}

/// Builds a 64-bit little-endian ELF core image in memory.
pub struct CoreBuilder {
    machine: u16,
    e_type: u16,
    page_size: u64,
    segments: Vec<CoreSegment>,
}

impl CoreBuilder {
    pub fn new() -> CoreBuilder {
        CoreBuilder {
            machine: EM_AARCH64,
            e_type: 4, // ET_CORE
            page_size: 0x1000,
            segments: Vec::new(),
        }
    }

    pub fn machine(mut self, machine: u16) -> CoreBuilder {
        self.machine = machine;
        self
    }

    /// Override `e_type`, to build deliberately-wrong inputs.
    pub fn e_type(mut self, e_type: u16) -> CoreBuilder {
        self.e_type = e_type;
        self
    }

    /// Override the `NT_FILE` page size, to build deliberately-wrong inputs.
    pub fn page_size(mut self, page_size: u64) -> CoreBuilder {
        self.page_size = page_size;
        self
    }

    /// Add an anonymous load segment.
    pub fn segment(mut self, vaddr: u64, mem_size: u64, flags: u32, data: Vec<u8>) -> CoreBuilder {
        self.segments.push(CoreSegment {
            vaddr,
            mem_size,
            flags,
            data,
            file: None,
        });
        self
    }

    /// Add a file-backed load segment; `page_offset` is the mapping offset in pages,
    /// as the kernel records it in `NT_FILE`.
    pub fn file_segment(
        mut self,
        vaddr: u64,
        mem_size: u64,
        flags: u32,
        data: Vec<u8>,
        path: &str,
        page_offset: u64,
    ) -> CoreBuilder {
        self.segments.push(CoreSegment {
            vaddr,
            mem_size,
            flags,
            data,
            file: Some((path.to_string(), page_offset)),
        });
        self
    }

    /// Serialize the core image.
    pub fn build(self) -> Vec<u8> {
        const EHDR_SIZE: u64 = 64;
        const PHDR_SIZE: u64 = 56;

        let note = self.build_nt_file_note();
        let phnum = self.segments.len() as u64 + 1; // PT_NOTE + loads
        let note_offset = EHDR_SIZE + phnum * PHDR_SIZE;

        // Segment data follows the note, in declaration order
        let mut data_offsets = Vec::new();
        let mut cursor = note_offset + note.len() as u64;
        for segment in &self.segments {
            data_offsets.push(cursor);
            cursor += segment.data.len() as u64;
        }

        let mut image = Vec::new();

        // ELF header
        image.extend_from_slice(b"\x7fELF");
        image.push(2); // ELFCLASS64
        image.push(1); // ELFDATA2LSB
        image.push(1); // EV_CURRENT
        image.extend_from_slice(&[0u8; 9]); // OSABI + padding
        image.extend_from_slice(&self.e_type.to_le_bytes());
        image.extend_from_slice(&self.machine.to_le_bytes());
        image.extend_from_slice(&1u32.to_le_bytes()); // e_version
        image.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        image.extend_from_slice(&EHDR_SIZE.to_le_bytes()); // e_phoff
        image.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
        image.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        image.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        image.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        image.extend_from_slice(&(phnum as u16).to_le_bytes());
        image.extend_from_slice(&[0u8; 6]); // shentsize, shnum, shstrndx

        // PT_NOTE program header
        push_phdr(&mut image, 4, 4, note_offset, 0, note.len() as u64, 0, 0);

        // PT_LOAD program headers
        for (segment, offset) in self.segments.iter().zip(&data_offsets) {
            push_phdr(
                &mut image,
                1,
                segment.flags,
                *offset,
                segment.vaddr,
                segment.data.len() as u64,
                segment.mem_size,
                self.page_size,
            );
        }

        assert_eq!(image.len() as u64, note_offset);
        image.extend_from_slice(&note);
        for segment in &self.segments {
            image.extend_from_slice(&segment.data);
        }
        image
    }

    /// NT_FILE note: `count`, `page_size`, `count` (start, end, page offset) triples,
    /// then `count` NUL-terminated paths, wrapped in the ELF note envelope.
    fn build_nt_file_note(&self) -> Vec<u8> {
        let files: Vec<&CoreSegment> = self.segments.iter().filter(|s| s.file.is_some()).collect();

        let mut desc = Vec::new();
        desc.extend_from_slice(&(files.len() as u64).to_le_bytes());
        desc.extend_from_slice(&self.page_size.to_le_bytes());
        for segment in &files {
            let (_, page_offset) = segment.file.as_ref().unwrap();
            desc.extend_from_slice(&segment.vaddr.to_le_bytes());
            desc.extend_from_slice(&(segment.vaddr + segment.mem_size).to_le_bytes());
            desc.extend_from_slice(&page_offset.to_le_bytes());
        }
        for segment in &files {
            let (path, _) = segment.file.as_ref().unwrap();
            desc.extend_from_slice(path.as_bytes());
            desc.push(0);
        }

        let mut note = Vec::new();
        note.extend_from_slice(&5u32.to_le_bytes()); // namesz: "CORE\0"
        note.extend_from_slice(&(desc.len() as u32).to_le_bytes());
        note.extend_from_slice(&0x4649_4c45u32.to_le_bytes()); // NT_FILE
        note.extend_from_slice(b"CORE\0\0\0\0"); // padded to 4
        note.extend_from_slice(&desc);
        while note.len() % 4 != 0 {
            note.push(0);
        }
        note
    }
}

#[allow(clippy::too_many_arguments)]
fn push_phdr(
    image: &mut Vec<u8>,
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
) {
    image.extend_from_slice(&p_type.to_le_bytes());
    image.extend_from_slice(&p_flags.to_le_bytes());
    image.extend_from_slice(&p_offset.to_le_bytes());
    image.extend_from_slice(&p_vaddr.to_le_bytes());
    image.extend_from_slice(&p_vaddr.to_le_bytes()); // p_paddr mirrors p_vaddr
    image.extend_from_slice(&p_filesz.to_le_bytes());
    image.extend_from_slice(&p_memsz.to_le_bytes());
    image.extend_from_slice(&p_align.to_le_bytes());
}

/// Write `value` into `data` at the offset `addr - base`, little-endian.
pub fn put_u64(data: &mut [u8], base: u64, addr: u64, value: u64) {
    let offset = (addr - base) as usize;
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
