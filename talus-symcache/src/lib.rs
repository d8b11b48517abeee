//! A compact, memory-mappable symbol database.
//!
//! The symbol file text format is convenient to produce and inspect but slow
//! to query. This crate converts parsed symbol files into a pointer-free
//! binary format that can be written to disk once and memory-mapped for
//! every subsequent crash analysis:
//!
//! - [`SymCacheConverter`] turns a [`Module`](talus_debuginfo::Module) into
//!   the binary format.
//! - [`SymCache`] parses the format from a byte buffer without copying and
//!   answers address lookups over it.
//! - [`FastResolver`] manages a set of loaded modules and implements the
//!   unwinder's [`SymbolProvider`](talus_unwind::SymbolProvider), serving
//!   function names, source lines, inline frames, and unwind information.
//!
//! # Lookups
//!
//! Looking up an instruction address yields a chain of source locations,
//! starting at the innermost inlined call and walking out to the function
//! that physically contains the address. Addresses covered by no function
//! fall back to the public symbol table.

#![warn(missing_docs)]

mod cache;
mod error;
mod raw;
mod resolver;
mod writer;

pub use crate::cache::*;
pub use crate::error::*;
pub use crate::resolver::*;
pub use crate::writer::*;
