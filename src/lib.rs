//! Talus turns native debug information into crash reports with function
//! names, file names, and line numbers.
//!
//! The heavy lifting happens in the member crates, which can also be used
//! independently and in parts:
//!
//! - [`common`]: types shared by all crates, such as architectures,
//!   languages, and symbol names.
//! - [`debuginfo`]: the in-memory symbol database, the streaming DWARF
//!   consumer that fills it, and the Breakpad-compatible symbol file format.
//! - [`demangle`]: demangling for C++ and Rust symbol names.
//! - [`symcache`]: a memory-mappable binary symbol database and the resolver
//!   that answers address lookups from it.
//! - [`unwind`]: post-mortem stack unwinding driven by call frame
//!   information, frame pointer chains, and stack scanning.
//!
//! At dump time, a DWARF reader drives `debuginfo::DwarfCuToModule`, which
//! populates a `debuginfo::Module`; the module is serialized with
//! `debuginfo::SymbolFileWriter`. At analysis time, a
//! `symcache::FastResolver` ingests symbol files and serves per-architecture
//! stackwalkers through a `unwind::StackFrameSymbolizer`.

#![warn(missing_docs)]

#[doc(inline)]
pub use talus_common as common;
#[doc(inline)]
#[cfg(feature = "debuginfo")]
pub use talus_debuginfo as debuginfo;
#[doc(inline)]
#[cfg(feature = "demangle")]
pub use talus_demangle as demangle;
#[doc(inline)]
#[cfg(feature = "symcache")]
pub use talus_symcache as symcache;
#[doc(inline)]
#[cfg(feature = "unwind")]
pub use talus_unwind as unwind;
