//! Typed references into target memory.
//!
//! A [`MemRef`] couples a target address with a [`crate::layout::StructKind`]: "the
//! bytes at this address are one of these". Field reads consult the address space's
//! active layout tables at the moment of the read, so a reference constructed before a
//! version switch reads with the new offsets afterwards; references carry no layout
//! state of their own.
//!
//! Construction performs no I/O. Dereferencing stale pointers out of a damaged heap is
//! the normal case for this engine, so building a reference to unmapped memory is
//! legal and cheap; the failure surfaces on the first field read, as a `Result` the
//! caller can handle per-object instead of per-walk.
//!
//! # Examples
//!
//! ```rust,no_run
//! use corescope::{AddressSpace, MemRef};
//! use corescope::layout::StructKind;
//! # fn demo(space: &AddressSpace) -> corescope::Result<()> {
//! let debug = MemRef::new(space, space.debug_addr(), StructKind::Debug);
//! let head = debug.field_ref("r_map")?;
//! let base = head.field("l_addr")?;
//! println!("first module loads at {base:#x}");
//! # Ok(())
//! # }
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::file::io;
use crate::layout::{FieldWidth, StructKind};
use crate::space::{AddressSpace, Source};
use crate::{Error, Result};

/// A typed reference to a structure in target memory.
///
/// Cheap to construct and copy around; holds a borrow of the address space, which
/// statically prevents it from outliving the snapshot it points into.
pub struct MemRef<'a> {
    space: &'a AddressSpace,
    addr: u64,
    kind: StructKind,
    /// Memoized targets of followed pointer fields, keyed by field name. Target memory
    /// never changes under a loaded snapshot, so a pointer field read twice resolves
    /// to the same address.
    targets: RefCell<HashMap<&'static str, u64>>,
}

impl<'a> MemRef<'a> {
    /// Construct a reference asserting that `addr` holds a `kind` structure.
    ///
    /// No validation happens here; see the [module documentation](self).
    #[must_use]
    pub fn new(space: &'a AddressSpace, addr: u64, kind: StructKind) -> MemRef<'a> {
        MemRef {
            space,
            addr,
            kind,
            targets: RefCell::new(HashMap::new()),
        }
    }

    /// Target address of the reference.
    #[must_use]
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Structure kind asserted at the target address.
    #[must_use]
    pub fn kind(&self) -> StructKind {
        self.kind
    }

    /// `true` if the target address resolves to a block that can serve reads.
    ///
    /// A not-ready reference is not an error condition; it is the honest state of a
    /// pointer into memory the snapshot did not capture.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.space
            .resolve(self.addr)
            .map(|block| block.is_valid())
            .unwrap_or(false)
    }

    /// Read a field by name, widened to `u64`.
    ///
    /// The field's offset and width come from the active layout selection of the
    /// underlying address space at call time.
    ///
    /// # Errors
    /// [`crate::Error::UnknownField`] if the active layout does not define the field;
    /// [`crate::Error::NotReady`] when the target memory is unmapped or was never
    /// materialized; [`crate::Error::OutOfRange`] when the field crosses the end of
    /// the captured bytes.
    pub fn field(&self, name: &'static str) -> Result<u64> {
        let desc = self.space.layout().field(self.kind, name)?;
        self.read_at(desc.offset, desc.width)
    }

    /// Read a pointer-width field by name.
    ///
    /// Identical to [`MemRef::field`] for fields declared [`FieldWidth::Ptr`]; named
    /// separately so call sites document that the value is an address.
    pub fn field_ptr(&self, name: &'static str) -> Result<u64> {
        self.field(name)
    }

    /// Follow a pointer field to a typed reference of its declared target kind.
    ///
    /// The pointed-to address is memoized per field name, so chasing the same edge of
    /// an object graph twice costs one read. A null pointer yields a reference at
    /// address 0, which the caller checks via [`MemRef::addr`].
    ///
    /// # Errors
    /// [`crate::Error::UnknownField`] if the field is undefined or declares no target
    /// kind; resolution and range errors when the target memory is absent.
    pub fn field_ref(&self, name: &'static str) -> Result<MemRef<'a>> {
        let desc = self.space.layout().field(self.kind, name)?;
        let Some(target_kind) = desc.target else {
            return Err(Error::UnknownField {
                kind: self.kind,
                field: name,
            });
        };

        if let Some(&cached) = self.targets.borrow().get(name) {
            return Ok(MemRef::new(self.space, cached, target_kind));
        }

        let target = self.read_at(desc.offset, desc.width)?;
        self.targets.borrow_mut().insert(name, target);
        Ok(MemRef::new(self.space, target, target_kind))
    }

    /// Read `width` bytes at `self.addr + offset` from the Original view.
    ///
    /// Unmapped and unmaterialized memory both surface as [`crate::Error::NotReady`];
    /// to a field read they are the same condition, "this reference cannot answer".
    fn read_at(&self, offset: u64, width: FieldWidth) -> Result<u64> {
        let addr = self
            .addr
            .checked_add(offset)
            .ok_or(Error::NotReady(self.addr))?;
        let block = match self.space.resolve(addr) {
            Ok(block) => block,
            Err(Error::NotMapped(_)) => return Err(Error::NotReady(self.addr)),
            Err(error) => return Err(error),
        };
        let len = width.size(self.space.bitness());
        let data = match block.bytes(Source::Original, addr - block.vaddr(), len) {
            Ok(data) => data,
            Err(Error::SourceUnavailable(_)) => return Err(Error::NotReady(self.addr)),
            Err(error) => return Err(error),
        };

        match width {
            FieldWidth::U8 => Ok(u64::from(io::read_le::<u8>(data)?)),
            FieldWidth::U16 => Ok(u64::from(io::read_le::<u16>(data)?)),
            FieldWidth::U32 => Ok(u64::from(io::read_le::<u32>(data)?)),
            FieldWidth::U64 => io::read_le::<u64>(data),
            FieldWidth::Ptr => {
                let mut cursor = 0;
                io::read_ptr_at(data, &mut cursor, self.space.bitness())
            }
        }
    }
}

/// Identity is the target address alone: two references to the same address compare
/// equal even under different kind assertions, mirroring raw-pointer semantics.
impl PartialEq for MemRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for MemRef<'_> {}

impl Hash for MemRef<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl fmt::Debug for MemRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemRef")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("kind", &format_args!("{}", self.kind))
            .field("ready", &self.is_ready())
            .finish()
    }
}
