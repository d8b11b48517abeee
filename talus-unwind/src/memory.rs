//! Access to snapshots of process memory.

use crate::base::{Endianness, RuntimeEndian};

/// Provides read access to a region of the crashed process's memory.
///
/// All unwinding reads go through this capability. Implementations typically
/// wrap a minidump's memory list; tests use [`MemorySlice`] over a byte
/// buffer. A failed read is reported as `None` and treated as the end of the
/// stack by the walker, never as an error.
pub trait MemoryRegion {
    /// The base address of this region.
    fn base_address(&self) -> u64;

    /// The size of this region in bytes.
    fn size(&self) -> u64;

    /// Reads the byte at `address`.
    fn read_u8(&self, address: u64) -> Option<u8>;

    /// Reads a 16-bit value at `address`.
    fn read_u16(&self, address: u64) -> Option<u16>;

    /// Reads a 32-bit value at `address`.
    fn read_u32(&self, address: u64) -> Option<u32>;

    /// Reads a 64-bit value at `address`.
    fn read_u64(&self, address: u64) -> Option<u64>;
}

/// A view into a region of memory, given by a slice and a base address.
pub struct MemorySlice<'a> {
    base_address: u64,
    contents: &'a [u8],
    endian: RuntimeEndian,
}

impl<'a> MemorySlice<'a> {
    /// Creates a little-endian memory region over `contents`.
    pub fn new(base_address: u64, contents: &'a [u8]) -> Self {
        MemorySlice {
            base_address,
            contents,
            endian: RuntimeEndian::Little,
        }
    }

    /// Creates a memory region with explicit endianness.
    pub fn with_endian(base_address: u64, contents: &'a [u8], endian: RuntimeEndian) -> Self {
        MemorySlice {
            base_address,
            contents,
            endian,
        }
    }

    fn bytes(&self, address: u64, len: usize) -> Option<&'a [u8]> {
        let offset = address.checked_sub(self.base_address)? as usize;
        self.contents.get(offset..offset.checked_add(len)?)
    }
}

macro_rules! read_impl {
    ($name:ident, $ty:ty) => {
        fn $name(&self, address: u64) -> Option<$ty> {
            let bytes = self.bytes(address, std::mem::size_of::<$ty>())?;
            let bytes = bytes.try_into().ok()?;
            Some(if self.endian.is_big_endian() {
                <$ty>::from_be_bytes(bytes)
            } else {
                <$ty>::from_le_bytes(bytes)
            })
        }
    };
}

impl MemoryRegion for MemorySlice<'_> {
    fn base_address(&self) -> u64 {
        self.base_address
    }

    fn size(&self) -> u64 {
        self.contents.len() as u64
    }

    fn read_u8(&self, address: u64) -> Option<u8> {
        self.bytes(address, 1).map(|bytes| bytes[0])
    }

    read_impl!(read_u16, u16);
    read_impl!(read_u32, u32);
    read_impl!(read_u64, u64);
}
