//! Stack unwinding for crash analysis.
//!
//! Given a CPU context captured at crash time and a snapshot of the process
//! memory, the [`Stackwalker`] reconstructs the call stack frame by frame.
//! For every frame it tries, in order:
//!
//! 1. **Call frame information**: postfix expression programs from the
//!    symbol database, evaluated by [`CfiFrameInfo`] over the callee's
//!    registers and stack memory.
//! 2. **Frame pointer chains**: the platform's frame linkage convention,
//!    where one exists.
//! 3. **Stack scanning**: walking up the stack word by word looking for
//!    plausible return addresses, bounded and only if permitted.
//!
//! The walker talks to symbol data exclusively through the
//! [`StackFrameSymbolizer`], which binds a [`SymbolProvider`] (such as the
//! resolver in `talus-symcache`) to the walk and fills in function names,
//! source lines, and inline frames.
//!
//! Supported architectures are ARM64 (including pointer authentication
//! stripping), PPC64, x86 (including Windows frame data), and AMD64.

#![warn(missing_docs)]

mod base;
mod cfi;
mod frame;
mod memory;
mod modules;
mod symbolizer;
mod walker;

pub mod evaluator;

pub use crate::base::*;
pub use crate::cfi::*;
pub use crate::frame::*;
pub use crate::memory::*;
pub use crate::modules::*;
pub use crate::symbolizer::*;
pub use crate::walker::*;
