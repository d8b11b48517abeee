//! The error type for the binary symbol cache.

use thiserror::Error;

/// An error encountered while parsing a symbol cache buffer.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The buffer does not start at an 8-byte aligned address.
    #[error("binary buffer is not correctly aligned")]
    BufferNotAligned,

    /// The buffer is too small to contain the file header.
    #[error("header does not fit in the given buffer")]
    HeaderTooSmall,

    /// The file was written on a machine of the opposite endianness.
    #[error("endianness of the file does not match this machine")]
    WrongEndianness,

    /// The buffer does not contain a symbol cache.
    #[error("wrong file magic")]
    WrongFormat,

    /// The file was written by an incompatible version of this crate.
    #[error("unknown file version")]
    WrongVersion,

    /// The section counts in the header contradict the buffer length.
    #[error("file length does not match the header")]
    BadFormatLength,
}
