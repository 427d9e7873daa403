//! # corescope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and
//! traits from the corescope library. Import this module to get quick access to the
//! essential types for core dump analysis.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all corescope operations
pub use crate::Error;

/// The result type used throughout corescope
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Main entry point for core dump analysis
pub use crate::AddressSpace;

/// Low-level data backends
pub use crate::file::{Backend, Memory, Physical};

// ================================================================================================
// Address Space
// ================================================================================================

/// Load segments and their backing policies
pub use crate::space::{BackingState, Flags, LoadBlock, Source};

/// Snapshot metadata and segment descriptors
pub use crate::space::{Machine, SegmentDescriptor};

/// Module enumeration and symbolization
pub use crate::space::{ModuleRecord, Symbol, SymbolResolver, SymbolSource};

// ================================================================================================
// Structure Layouts
// ================================================================================================

/// The version-aware layout registry and its selection axes
pub use crate::layout::{Bitness, Family, LayoutRegistry, StructKind};

// ================================================================================================
// Typed Memory Access
// ================================================================================================

/// Typed reference to a structure in target memory
pub use crate::MemRef;

// ================================================================================================
// Verification
// ================================================================================================

/// Cross-source consistency scanning
pub use crate::{Finding, Selector, Verifier};
