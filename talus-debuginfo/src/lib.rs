//! Symbol databases for crash symbolication.
//!
//! This crate contains the pieces that turn compiler debug information into a
//! compact, address-indexed symbol database:
//!
//! - [`Module`] is the in-memory database: functions with inline call trees,
//!   source line tables, public symbols, and stack unwind records.
//! - [`DwarfCuToModule`] is a streaming consumer of DWARF debugging
//!   information entries that populates a module for one compilation unit,
//!   resolving specification and abstract-origin indirections and qualifying
//!   names along language-appropriate scope chains.
//! - [`breakpad`] implements the line-oriented symbol file text format, and
//!   [`SymbolFileWriter`] serializes a module into it.
//!
//! The container formats that carry DWARF sections (ELF, MachO, PE) are out
//! of scope; callers drive [`DwarfCuToModule`] from their own reader and hand
//! the `.debug_line` bytes to the bundled [`line program
//! reader`](dwarf::DebugLineReader).

#![warn(missing_docs)]

pub mod breakpad;
pub mod dwarf;
mod module;
mod writer;

pub use crate::dwarf::{
    DwarfCuToModule, DwarfError, DwarfErrorKind, FileContext, LogWarningReporter, WarningReporter,
};
pub use crate::module::*;
pub use crate::writer::*;
