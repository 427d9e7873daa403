//! Static field-offset tables.
//!
//! One table per (structure kind, pointer width, runtime release). Offsets are data,
//! not logic: the rest of the crate only ever asks the registry for "the offset of
//! field X under the active selection", so supporting a new release means adding a
//! table here and nothing else.
//!
//! Linker structures (`Debug`, `LinkMap`) are fixed by the platform ABI and vary only
//! with pointer width. ART runtime structures additionally vary with the Android SDK
//! release; a release that did not change a structure reuses the newest table at or
//! below it.

use super::{Bitness, FieldDesc, FieldWidth, StructKind, StructLayout};

const fn field(name: &'static str, offset: u64, width: FieldWidth) -> FieldDesc {
    FieldDesc {
        name,
        offset,
        width,
        target: None,
    }
}

const fn ptr_field(name: &'static str, offset: u64, target: StructKind) -> FieldDesc {
    FieldDesc {
        name,
        offset,
        width: FieldWidth::Ptr,
        target: Some(target),
    }
}

// ---------------------------------------------------------------------------------------------
// Linker family: struct r_debug and struct link_map, bionic ABI
// ---------------------------------------------------------------------------------------------

static DEBUG_64: StructLayout = StructLayout {
    kind: StructKind::Debug,
    total_size: 40,
    fields: &[
        field("r_version", 0, FieldWidth::U32),
        ptr_field("r_map", 8, StructKind::LinkMap),
        field("r_brk", 16, FieldWidth::Ptr),
        field("r_state", 24, FieldWidth::U32),
        field("r_ldbase", 32, FieldWidth::Ptr),
    ],
};

static DEBUG_32: StructLayout = StructLayout {
    kind: StructKind::Debug,
    total_size: 20,
    fields: &[
        field("r_version", 0, FieldWidth::U32),
        ptr_field("r_map", 4, StructKind::LinkMap),
        field("r_brk", 8, FieldWidth::Ptr),
        field("r_state", 12, FieldWidth::U32),
        field("r_ldbase", 16, FieldWidth::Ptr),
    ],
};

static LINK_MAP_64: StructLayout = StructLayout {
    kind: StructKind::LinkMap,
    total_size: 40,
    fields: &[
        field("l_addr", 0, FieldWidth::Ptr),
        field("l_name", 8, FieldWidth::Ptr),
        field("l_ld", 16, FieldWidth::Ptr),
        ptr_field("l_next", 24, StructKind::LinkMap),
        ptr_field("l_prev", 32, StructKind::LinkMap),
    ],
};

static LINK_MAP_32: StructLayout = StructLayout {
    kind: StructKind::LinkMap,
    total_size: 20,
    fields: &[
        field("l_addr", 0, FieldWidth::Ptr),
        field("l_name", 4, FieldWidth::Ptr),
        field("l_ld", 8, FieldWidth::Ptr),
        ptr_field("l_next", 12, StructKind::LinkMap),
        ptr_field("l_prev", 16, StructKind::LinkMap),
    ],
};

// ---------------------------------------------------------------------------------------------
// Runtime family: art::ImageHeader
//
// The header layout is pointer-width independent; it moved across releases as image
// sections were added and removed.
// ---------------------------------------------------------------------------------------------

static IMAGE_HEADER_28: StructLayout = StructLayout {
    kind: StructKind::ImageHeader,
    total_size: 240,
    fields: &[field("image_methods_", 152, FieldWidth::U64)],
};

static IMAGE_HEADER_29: StructLayout = StructLayout {
    kind: StructKind::ImageHeader,
    total_size: 256,
    fields: &[field("image_methods_", 168, FieldWidth::U64)],
};

static IMAGE_HEADER_31: StructLayout = StructLayout {
    kind: StructKind::ImageHeader,
    total_size: 248,
    fields: &[field("image_methods_", 160, FieldWidth::U64)],
};

static IMAGE_HEADER_34: StructLayout = StructLayout {
    kind: StructKind::ImageHeader,
    total_size: 256,
    fields: &[field("image_methods_", 168, FieldWidth::U64)],
};

// ---------------------------------------------------------------------------------------------
// Runtime family: art::gc::space::LargeObjectSpace and subclasses
//
// The allocation counters are u64 on both pointer widths; begin_/end_ are pointers.
// ---------------------------------------------------------------------------------------------

static LARGE_OBJECT_SPACE_64: StructLayout = StructLayout {
    kind: StructKind::LargeObjectSpace,
    total_size: 392,
    fields: &[
        field("lock_", 304, FieldWidth::Ptr),
        field("num_bytes_allocated_", 344, FieldWidth::U64),
        field("num_objects_allocated_", 352, FieldWidth::U64),
        field("total_bytes_allocated_", 360, FieldWidth::U64),
        field("total_objects_allocated_", 368, FieldWidth::U64),
        field("begin_", 376, FieldWidth::Ptr),
        field("end_", 384, FieldWidth::Ptr),
    ],
};

static LARGE_OBJECT_SPACE_32: StructLayout = StructLayout {
    kind: StructKind::LargeObjectSpace,
    total_size: 232,
    fields: &[
        field("lock_", 160, FieldWidth::Ptr),
        field("num_bytes_allocated_", 192, FieldWidth::U64),
        field("num_objects_allocated_", 200, FieldWidth::U64),
        field("total_bytes_allocated_", 208, FieldWidth::U64),
        field("total_objects_allocated_", 216, FieldWidth::U64),
        field("begin_", 224, FieldWidth::Ptr),
        field("end_", 228, FieldWidth::Ptr),
    ],
};

static LARGE_OBJECT_MAP_SPACE_64: StructLayout = StructLayout {
    kind: StructKind::LargeObjectMapSpace,
    total_size: 416,
    fields: &[field("large_objects_", 392, FieldWidth::Ptr)],
};

static LARGE_OBJECT_MAP_SPACE_32: StructLayout = StructLayout {
    kind: StructKind::LargeObjectMapSpace,
    total_size: 244,
    fields: &[field("large_objects_", 232, FieldWidth::Ptr)],
};

static FREE_LIST_SPACE_64: StructLayout = StructLayout {
    kind: StructKind::FreeListSpace,
    total_size: 576,
    fields: &[
        field("mem_map_", 392, FieldWidth::Ptr),
        field("allocation_info_map_", 464, FieldWidth::Ptr),
        field("allocation_info_", 536, FieldWidth::Ptr),
        field("free_end_", 544, FieldWidth::Ptr),
        field("free_blocks_", 552, FieldWidth::Ptr),
    ],
};

static FREE_LIST_SPACE_32: StructLayout = StructLayout {
    kind: StructKind::FreeListSpace,
    total_size: 332,
    fields: &[
        field("mem_map_", 232, FieldWidth::Ptr),
        field("allocation_info_map_", 272, FieldWidth::Ptr),
        field("allocation_info_", 312, FieldWidth::Ptr),
        field("free_end_", 316, FieldWidth::Ptr),
        field("free_blocks_", 320, FieldWidth::Ptr),
    ],
};

/// Returns the table for `kind` under the given pointer width and SDK release.
///
/// Runtime-family kinds forward-fill: a release between two listed tables uses the
/// newest table at or below it, and releases older than the oldest table fall back to
/// that oldest table.
pub(super) fn lookup(kind: StructKind, bitness: Bitness, sdk: u32) -> &'static StructLayout {
    use Bitness::{B32, B64};

    match (kind, bitness) {
        (StructKind::Debug, B64) => &DEBUG_64,
        (StructKind::Debug, B32) => &DEBUG_32,
        (StructKind::LinkMap, B64) => &LINK_MAP_64,
        (StructKind::LinkMap, B32) => &LINK_MAP_32,
        (StructKind::ImageHeader, _) => match sdk {
            0..=28 => &IMAGE_HEADER_28,
            29..=30 => &IMAGE_HEADER_29,
            31..=33 => &IMAGE_HEADER_31,
            _ => &IMAGE_HEADER_34,
        },
        (StructKind::LargeObjectSpace, B64) => &LARGE_OBJECT_SPACE_64,
        (StructKind::LargeObjectSpace, B32) => &LARGE_OBJECT_SPACE_32,
        (StructKind::LargeObjectMapSpace, B64) => &LARGE_OBJECT_MAP_SPACE_64,
        (StructKind::LargeObjectMapSpace, B32) => &LARGE_OBJECT_MAP_SPACE_32,
        (StructKind::FreeListSpace, B64) => &FREE_LIST_SPACE_64,
        (StructKind::FreeListSpace, B32) => &FREE_LIST_SPACE_32,
    }
}
