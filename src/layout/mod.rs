//! Version-adaptive structure layout registry.
//!
//! The engine reads C structures straight out of snapshot memory, and the byte offset of
//! every field depends on two things that are only known once a snapshot is loaded: the
//! target's pointer width, and - for runtime-internal structures - the Android release
//! the target was running. This module owns that mapping.
//!
//! # Architecture
//!
//! Offsets are *data*, kept in static per-version tables ([`tables`]); the registry is
//! the selection state over those tables. A [`LayoutRegistry`] is an explicit value owned
//! by its [`crate::AddressSpace`], never ambient global state, so two loaded snapshots
//! (a 32-bit SDK-30 core and a 64-bit SDK-34 core, say) can coexist with independent
//! selections.
//!
//! Selection is atomic from the consumer's point of view: [`LayoutRegistry::select_bitness`]
//! and [`LayoutRegistry::select_version`] replace the affected tables wholesale, so a
//! field read computed after the call returns can never mix offsets from two releases.
//!
//! Structure families version independently. Selecting a new runtime release swaps only
//! the [`Family::Runtime`] tables; the link-map layout ([`Family::Linker`]) is fixed by
//! the platform ABI and survives the swap untouched.
//!
//! # Examples
//!
//! ```rust
//! use corescope::layout::{Bitness, Family, LayoutRegistry, StructKind};
//!
//! let mut layout = LayoutRegistry::new(Bitness::B64);
//! assert_eq!(layout.offset(StructKind::LargeObjectSpace, "begin_")?, 376);
//!
//! layout.select_bitness(Bitness::B32);
//! assert_eq!(layout.offset(StructKind::LargeObjectSpace, "begin_")?, 224);
//!
//! layout.select_version(Family::Runtime, 29);
//! assert_eq!(layout.offset(StructKind::ImageHeader, "image_methods_")?, 168);
//! # Ok::<(), corescope::Error>(())
//! ```

use std::collections::HashMap;

use strum::{Display, EnumIter, IntoEnumIterator};

use crate::{Error, Result};

mod tables;

/// Default runtime release assumed until a version detector reports otherwise.
///
/// Matches Android 14 (UPSIDE_DOWN_CAKE), the newest release the tables fully cover.
pub const DEFAULT_SDK: u32 = 34;

/// Pointer width of the target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bitness {
    /// 32-bit target (ILP32)
    B32,
    /// 64-bit target (LP64)
    B64,
}

impl Bitness {
    /// Size of a target pointer in bytes.
    #[must_use]
    pub fn ptr_size(self) -> u64 {
        match self {
            Bitness::B32 => 4,
            Bitness::B64 => 8,
        }
    }
}

/// A family of structures that versions together.
///
/// Selecting a new version for one family must not disturb the tables of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// Dynamic linker structures (`r_debug`, `link_map`) - ABI-stable across releases
    Linker,
    /// ART runtime internals - shape changes across Android releases
    Runtime,
}

/// The structure kinds the engine knows how to overlay onto target memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum StructKind {
    /// The dynamic linker's `struct r_debug`
    Debug,
    /// One entry of the linker's `struct link_map` list
    LinkMap,
    /// `art::ImageHeader` at the start of a boot-image mapping
    ImageHeader,
    /// `art::gc::space::LargeObjectSpace`
    LargeObjectSpace,
    /// `art::gc::space::LargeObjectMapSpace`
    LargeObjectMapSpace,
    /// `art::gc::space::FreeListSpace`
    FreeListSpace,
}

impl StructKind {
    /// The family this kind versions with.
    #[must_use]
    pub fn family(self) -> Family {
        match self {
            StructKind::Debug | StructKind::LinkMap => Family::Linker,
            StructKind::ImageHeader
            | StructKind::LargeObjectSpace
            | StructKind::LargeObjectMapSpace
            | StructKind::FreeListSpace => Family::Runtime,
        }
    }
}

/// Storage width of a structure field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWidth {
    /// One byte
    U8,
    /// Two bytes, little-endian
    U16,
    /// Four bytes, little-endian
    U32,
    /// Eight bytes, little-endian
    U64,
    /// Target pointer width (4 or 8 bytes depending on the active bitness)
    Ptr,
}

impl FieldWidth {
    /// Width in bytes under the given pointer width.
    #[must_use]
    pub fn size(self, bitness: Bitness) -> u64 {
        match self {
            FieldWidth::U8 => 1,
            FieldWidth::U16 => 2,
            FieldWidth::U32 => 4,
            FieldWidth::U64 => 8,
            FieldWidth::Ptr => bitness.ptr_size(),
        }
    }
}

/// One field of a structure layout: name, byte offset, width, and - for pointer fields
/// whose target the engine can also overlay - the target structure kind.
#[derive(Debug)]
pub struct FieldDesc {
    /// Field name, matching the member name in the target's source
    pub name: &'static str,
    /// Byte offset from the start of the structure
    pub offset: u64,
    /// Storage width
    pub width: FieldWidth,
    /// Structure kind at the pointed-to address, if this is a pointer field with a
    /// known target
    pub target: Option<StructKind>,
}

/// The layout of one structure kind under one (pointer width, version) selection.
#[derive(Debug)]
pub struct StructLayout {
    /// Structure kind this table describes
    pub kind: StructKind,
    /// Total size of the structure in bytes
    pub total_size: u64,
    /// Field descriptors, in declaration order
    pub fields: &'static [FieldDesc],
}

impl StructLayout {
    /// Look up a field descriptor by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&'static FieldDesc> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// The active layout selection for one loaded snapshot.
///
/// Holds one active table per structure kind, chosen from pointer width and the
/// runtime-family version. Reads go through [`LayoutRegistry::offset`] /
/// [`LayoutRegistry::field`]; a field absent from the active table surfaces as
/// [`crate::Error::UnknownField`].
#[derive(Debug)]
pub struct LayoutRegistry {
    bitness: Bitness,
    sdk: u32,
    active: HashMap<StructKind, &'static StructLayout>,
}

impl LayoutRegistry {
    /// Create a registry with every table selected for `bitness` and [`DEFAULT_SDK`].
    #[must_use]
    pub fn new(bitness: Bitness) -> LayoutRegistry {
        let mut registry = LayoutRegistry {
            bitness,
            sdk: DEFAULT_SDK,
            active: HashMap::new(),
        };
        registry.reselect(None);
        registry
    }

    /// The active pointer width.
    #[must_use]
    pub fn bitness(&self) -> Bitness {
        self.bitness
    }

    /// The active runtime-family version (Android SDK level).
    #[must_use]
    pub fn sdk(&self) -> u32 {
        self.sdk
    }

    /// Activate the version-specific tables for one structure family.
    ///
    /// Only that family's tables are replaced; selecting a new runtime release leaves
    /// the linker tables untouched. Releases between two known tables use the newest
    /// table at or below them, so re-selecting the same version twice is idempotent.
    pub fn select_version(&mut self, family: Family, sdk: u32) {
        if family == Family::Runtime {
            self.sdk = sdk;
        }
        self.reselect(Some(family));
    }

    /// Activate the table set for the given pointer width.
    ///
    /// Every pointer-width-dependent table is replaced in one swap; re-selecting the
    /// current width is a no-op in effect (offsets are unchanged).
    pub fn select_bitness(&mut self, bitness: Bitness) {
        self.bitness = bitness;
        self.reselect(None);
    }

    /// Byte offset of `field` in `kind` under the active selection.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownField`] if the active table has no such field.
    pub fn offset(&self, kind: StructKind, field: &'static str) -> Result<u64> {
        Ok(self.field(kind, field)?.offset)
    }

    /// Full descriptor of `field` in `kind` under the active selection.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownField`] if the active table has no such field.
    pub fn field(&self, kind: StructKind, field: &'static str) -> Result<&'static FieldDesc> {
        self.layout(kind)
            .field(field)
            .ok_or(Error::UnknownField { kind, field })
    }

    /// Total size in bytes of `kind` under the active selection.
    #[must_use]
    pub fn size_of(&self, kind: StructKind) -> u64 {
        self.layout(kind).total_size
    }

    /// The active table for `kind`.
    #[must_use]
    pub fn layout(&self, kind: StructKind) -> &'static StructLayout {
        // reselect() populates every kind, so the entry always exists
        self.active[&kind]
    }

    /// Rebuild the active map, limited to `family` if given. The fresh map is built
    /// completely before it replaces the old entries, so no lookup ever observes a
    /// half-updated selection.
    fn reselect(&mut self, family: Option<Family>) {
        let mut fresh = HashMap::new();
        for kind in StructKind::iter() {
            if family.is_some_and(|f| kind.family() != f) && self.active.contains_key(&kind) {
                fresh.insert(kind, self.active[&kind]);
            } else {
                fresh.insert(kind, tables::lookup(kind, self.bitness, self.sdk));
            }
        }
        self.active = fresh;
    }
}
