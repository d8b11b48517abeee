//! Zero-copy parsing and lookup over the binary format.

use std::mem;

use crate::error::Error;
use crate::raw;

type Result<T, E = Error> = std::result::Result<T, E>;

/// A parsed symbol cache.
///
/// This borrows the underlying buffer and performs no allocation during
/// parsing; all sections are reinterpreted in place. The buffer must start
/// at an 8-byte aligned address, which memory mappings and the aligned
/// buffers used by the resolver guarantee.
#[derive(Clone, Debug)]
pub struct SymCache<'data> {
    header: &'data raw::Header,
    strings: &'data [raw::String],
    files: &'data [raw::File],
    functions: &'data [raw::Function],
    source_locations: &'data [raw::SourceLocation],
    ranges: &'data [raw::Range],
    publics: &'data [raw::Public],
    cfi_ranges: &'data [raw::CfiRange],
    cfi_deltas: &'data [raw::CfiDelta],
    stack_win: &'data [raw::StackWin],
    string_bytes: &'data [u8],
}

/// Splits `buf` at an aligned array of `T`, reinterpreting the prefix.
///
/// Safety: `T` must be a `repr(C)` plain data type without padding
/// requirements beyond its alignment, and the caller must have verified the
/// buffer's alignment and total length.
unsafe fn read_section<'data, T>(buf: &mut &'data [u8], count: usize) -> Result<&'data [T]> {
    let mut size = mem::size_of::<T>() * count;
    size += raw::align_to_eight(size);

    if buf.len() < size {
        return Err(Error::BadFormatLength);
    }

    let (section, rest) = buf.split_at(size);
    *buf = rest;
    Ok(&*(std::ptr::slice_from_raw_parts(section.as_ptr() as *const T, count)))
}

impl<'data> SymCache<'data> {
    /// Tests whether the buffer could contain a symbol cache.
    pub fn test(data: &[u8]) -> bool {
        data.len() >= 4 && data[..4] == raw::SYMCACHE_MAGIC.to_be_bytes()
    }

    /// Parses the binary format from the given buffer.
    pub fn parse(buf: &'data [u8]) -> Result<Self> {
        if raw::align_to_eight(buf.as_ptr() as usize) != 0 {
            return Err(Error::BufferNotAligned);
        }

        let mut header_size = mem::size_of::<raw::Header>();
        header_size += raw::align_to_eight(header_size);
        if buf.len() < header_size {
            return Err(Error::HeaderTooSmall);
        }

        // SAFETY: the buffer is aligned and large enough for the header.
        let header = unsafe { &*(buf.as_ptr() as *const raw::Header) };
        if header.magic == raw::SYMCACHE_MAGIC_FLIPPED {
            return Err(Error::WrongEndianness);
        }
        if header.magic != raw::SYMCACHE_MAGIC {
            return Err(Error::WrongFormat);
        }
        if header.version != raw::SYMCACHE_VERSION {
            return Err(Error::WrongVersion);
        }

        let mut rest = &buf[header_size..];

        // SAFETY: every section type is plain data; lengths are checked by
        // `read_section` against the remaining buffer.
        unsafe {
            let strings = read_section(&mut rest, header.num_strings as usize)?;
            let files = read_section(&mut rest, header.num_files as usize)?;
            let functions = read_section(&mut rest, header.num_functions as usize)?;
            let source_locations =
                read_section(&mut rest, header.num_source_locations as usize)?;
            let ranges = read_section(&mut rest, header.num_ranges as usize)?;
            let publics = read_section(&mut rest, header.num_publics as usize)?;
            let cfi_ranges = read_section(&mut rest, header.num_cfi_ranges as usize)?;
            let cfi_deltas = read_section(&mut rest, header.num_cfi_deltas as usize)?;
            let stack_win = read_section(&mut rest, header.num_stack_win as usize)?;

            let string_bytes_len = header.string_bytes as usize;
            if rest.len() < string_bytes_len {
                return Err(Error::BadFormatLength);
            }
            let string_bytes = &rest[..string_bytes_len];

            Ok(SymCache {
                header,
                strings,
                files,
                functions,
                source_locations,
                ranges,
                publics,
                cfi_ranges,
                cfi_deltas,
                stack_win,
                string_bytes,
            })
        }
    }

    /// Resolves a string reference.
    pub(crate) fn get_string(&self, string_idx: u32) -> Option<&'data str> {
        if string_idx == raw::NO_REF {
            return None;
        }
        let string = self.strings.get(string_idx as usize)?;

        let start = string.offset as usize;
        let end = start + string.len as usize;
        let bytes = self.string_bytes.get(start..end)?;
        std::str::from_utf8(bytes).ok()
    }

    /// The operating system the module was built for.
    pub fn os(&self) -> &'data str {
        self.get_string(self.header.os_idx).unwrap_or_default()
    }

    /// The architecture name of the module.
    pub fn arch(&self) -> &'data str {
        self.get_string(self.header.arch_idx).unwrap_or_default()
    }

    /// The debug identifier of the module.
    pub fn id(&self) -> &'data str {
        self.get_string(self.header.id_idx).unwrap_or_default()
    }

    /// The name of the module.
    pub fn name(&self) -> &'data str {
        self.get_string(self.header.name_idx).unwrap_or_default()
    }

    /// The code identifier of the module, if known.
    pub fn code_id(&self) -> Option<&'data str> {
        self.get_string(self.header.code_id_idx)
    }

    /// Looks up an instruction address, yielding the chain of source
    /// locations at that address.
    ///
    /// The iterator starts at the innermost inlined call and proceeds
    /// outward; the last yielded location belongs to the function that
    /// physically contains the address. The iterator is empty if no
    /// function covers the address.
    pub fn lookup(&self, addr: u64) -> SourceLocationIter<'data, '_> {
        let idx = self.ranges.partition_point(|range| range.addr <= addr);
        let (source_location_idx, range_start) = match idx.checked_sub(1) {
            Some(idx) => (self.ranges[idx].source_location_idx, self.ranges[idx].addr),
            None => (raw::NO_REF, 0),
        };

        SourceLocationIter {
            cache: self,
            source_location_idx,
            range_start,
        }
    }

    /// Returns the function record with the given index.
    pub(crate) fn function(&self, function_idx: u32) -> Option<&'data raw::Function> {
        self.functions.get(function_idx as usize)
    }

    /// Returns the file record with the given index.
    pub(crate) fn file(&self, file_idx: u32) -> Option<&'data raw::File> {
        if file_idx == raw::NO_REF {
            return None;
        }
        self.files.get(file_idx as usize)
    }

    /// Finds the public symbol with the greatest address at or below
    /// `addr`.
    pub(crate) fn public_for_address(&self, addr: u64) -> Option<&'data raw::Public> {
        let idx = self.publics.partition_point(|public| public.addr <= addr);
        self.publics.get(idx.checked_sub(1)?)
    }

    /// Returns the call frame information rules covering `addr`: the
    /// initial rules followed by every delta at or below the address.
    pub fn cfi_rules_for_address(&self, addr: u64) -> Option<Vec<String>> {
        let idx = self
            .cfi_ranges
            .partition_point(|range| range.addr <= addr)
            .checked_sub(1)?;
        let range = &self.cfi_ranges[idx];
        if addr >= range.addr + range.size {
            return None;
        }

        let mut rules = vec![self.get_string(range.init_rules_idx)?.to_string()];

        let start = range.delta_start as usize;
        let end = start + range.delta_count as usize;
        for delta in self.cfi_deltas.get(start..end)? {
            if delta.addr <= addr {
                rules.push(self.get_string(delta.rules_idx)?.to_string());
            }
        }

        Some(rules)
    }

    /// Returns the Windows frame record covering `addr`.
    pub(crate) fn stack_win_for_address(&self, addr: u64) -> Option<&'data raw::StackWin> {
        let idx = self
            .stack_win
            .partition_point(|record| (record.addr as u64) <= addr)
            .checked_sub(1)?;
        let record = &self.stack_win[idx];
        if addr >= record.addr as u64 + record.size as u64 {
            return None;
        }
        Some(record)
    }
}

/// One resolved source location in an inlining chain.
#[derive(Clone, Debug)]
pub struct SourceLocation<'data> {
    /// The name of the function or inline origin.
    pub function_name: Option<&'data str>,
    /// The entry address of the function, absent for inline origins.
    pub function_entry: Option<u64>,
    /// The flags of the function record.
    pub function_flags: u32,
    /// The size of the function's parameters on the stack.
    pub parameter_size: u32,
    /// The source file path.
    pub file: Option<&'data str>,
    /// The one-based line number, zero if unknown.
    pub line: u32,
    /// The start of the address range this location was resolved from.
    pub range_start: u64,
}

/// An iterator over the source locations at one address, innermost first.
#[derive(Clone, Debug)]
pub struct SourceLocationIter<'data, 'cache> {
    cache: &'cache SymCache<'data>,
    source_location_idx: u32,
    range_start: u64,
}

impl<'data, 'cache> Iterator for SourceLocationIter<'data, 'cache> {
    type Item = SourceLocation<'data>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.source_location_idx == raw::NO_REF {
            return None;
        }

        let location = self
            .cache
            .source_locations
            .get(self.source_location_idx as usize)?;
        self.source_location_idx = location.inlined_into_idx;

        let function = self.cache.function(location.function_idx);
        let file = self
            .cache
            .file(location.file_idx)
            .and_then(|file| self.cache.get_string(file.name_idx));

        Some(SourceLocation {
            function_name: function.and_then(|f| self.cache.get_string(f.name_idx)),
            function_entry: function
                .map(|f| f.entry)
                .filter(|&entry| entry != raw::NO_ENTRY),
            function_flags: function.map(|f| f.flags).unwrap_or(0),
            parameter_size: function.map(|f| f.parameter_size).unwrap_or(0),
            file,
            line: location.line,
            range_start: self.range_start,
        })
    }
}
