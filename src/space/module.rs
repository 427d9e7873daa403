//! Module enumeration via the dynamic linker's debug structure.
//!
//! A core file does not name its segments. The names live in the target's own memory:
//! the dynamic linker maintains a `link_map` list reachable from `r_debug`, and the
//! snapshot captured both. Walking that list through typed memory references recovers
//! `{load base, soname path}` records, which are then attached to the load blocks they
//! cover so that diagnostics (the consistency verifier above all) can name addresses.
//!
//! Symbol tables themselves are a collaborator concern: callers hand in a
//! [`SymbolSource`] that produces a [`SymbolResolver`] per module path, typically built
//! from the module's on-disk ELF `.symtab`/`.dynsym`.

use std::collections::HashSet;
use std::sync::Arc;

use crate::layout::StructKind;
use crate::memref::MemRef;
use crate::space::AddressSpace;
use crate::Result;

/// Walks at most this many link-map entries; a list longer than this is assumed to be
/// corrupt (a cycle through stale memory that still happens to chain).
const MAX_LINK_MAP_ENTRIES: usize = 4096;

/// A resolved symbol: name plus the address range it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Demangled or raw symbol name
    pub name: String,
    /// Virtual address of the symbol's start
    pub addr: u64,
    /// Size of the symbol in bytes; 0 when the symbol table does not record one
    pub size: u64,
}

impl Symbol {
    /// `true` if `addr` falls inside this symbol's range.
    #[must_use]
    pub fn covers(&self, addr: u64) -> bool {
        self.size > 0 && addr >= self.addr && addr < self.addr + self.size
    }
}

/// Per-module address-to-symbol lookup, supplied by an ELF symbol-table collaborator.
///
/// Lookups must be pure: the same module and address always produce the same answer.
pub trait SymbolResolver: Send + Sync {
    /// The nearest symbol at or preceding `addr`, or `None` if the module has no
    /// symbol there.
    fn nearest(&self, addr: u64) -> Option<Symbol>;
}

/// Produces a [`SymbolResolver`] for a module path, or `None` when the module's
/// symbols are unavailable (file missing, stripped, etc.).
pub trait SymbolSource {
    /// Resolver for the module at `path`.
    fn resolver_for(&self, path: &str) -> Option<Arc<dyn SymbolResolver>>;
}

/// One entry recovered from the target's link-map list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    /// Load base of the module (`l_addr`)
    pub addr: u64,
    /// Path the linker recorded for the module (`l_name`); empty for the executable
    pub name: String,
}

/// Walk the link-map list from the snapshot's `r_debug` address.
///
/// Entries whose memory has gone stale end the walk rather than failing it: a partial
/// module list is still useful, and a corrupt `l_next` is ordinary in damaged cores.
/// Returns an empty list when the snapshot recorded no debug-structure address.
pub(crate) fn walk_link_map(space: &AddressSpace) -> Result<Vec<ModuleRecord>> {
    let debug_addr = space.debug_addr();
    if debug_addr == 0 {
        return Ok(Vec::new());
    }

    let debug = MemRef::new(space, debug_addr, StructKind::Debug);
    let Ok(head) = debug.field_ref("r_map") else {
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    let mut seen = HashSet::new();
    let mut current = head;

    while current.addr() != 0 && seen.len() < MAX_LINK_MAP_ENTRIES {
        if !seen.insert(current.addr()) {
            break; // cycle
        }

        let (Ok(l_addr), Ok(l_name)) = (current.field_ptr("l_addr"), current.field_ptr("l_name"))
        else {
            break;
        };

        let name = space.read_cstring(l_name).unwrap_or_default();
        records.push(ModuleRecord { addr: l_addr, name });

        match current.field_ref("l_next") {
            Ok(next) if next.addr() != 0 => current = next,
            _ => break,
        }
    }

    Ok(records)
}
