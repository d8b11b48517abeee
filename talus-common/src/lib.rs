//! Common types and utilities for all talus crates.
//!
//! This crate contains the shared vocabulary of the workspace: CPU
//! [architectures](Arch), source [languages](Language), potentially mangled
//! symbol [names](Name), and the [`ByteView`] abstraction for reading file
//! data either from memory or from a memory mapped file.

#![warn(missing_docs)]

mod byteview;
mod types;

pub use crate::byteview::*;
pub use crate::types::*;

pub use debugid::{DebugId, ParseDebugIdError};
