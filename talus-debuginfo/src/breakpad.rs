//! The line-oriented symbol file text format.
//!
//! Symbol files comprise records describing the object file, functions and
//! lines, inlined calls, public symbols, and unwind information. The format
//! values legibility over compactness: one record per line, space separated
//! fields, lowercase hexadecimal numbers without a `0x` prefix.
//!
//! Each record type has a struct with a `parse` constructor that reads a
//! single line, and iterators over all records of one kind are available from
//! [`SymbolFile`]. Parsing is zero-copy: records borrow their string fields
//! from the underlying buffer.

use std::collections::HashMap;
use std::fmt;
use std::str;

use thiserror::Error;

use crate::module::{
    Function, InlineInstance, Line, Module, PublicSymbol, Range, StackFrameEntry, StackWinEntry,
    StackWinKind,
};

/// Length at which the symbol file header is capped.
///
/// This protects against scanning an entire file for a line break if the
/// first bytes do not contain a valid MODULE record.
const HEADER_CAP: usize = 320;

/// Placeholder used for missing function or symbol names.
const UNKNOWN_NAME: &str = "<unknown>";

/// The kind of record a parse error occurred in.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum RecordType {
    Module,
    Info,
    File,
    InlineOrigin,
    Func,
    Line,
    Inline,
    Public,
    StackCfi,
    StackWin,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::Module => write!(f, "MODULE"),
            RecordType::Info => write!(f, "INFO"),
            RecordType::File => write!(f, "FILE"),
            RecordType::InlineOrigin => write!(f, "INLINE_ORIGIN"),
            RecordType::Func => write!(f, "FUNC"),
            RecordType::Line => write!(f, "LINE"),
            RecordType::Inline => write!(f, "INLINE"),
            RecordType::Public => write!(f, "PUBLIC"),
            RecordType::StackCfi => write!(f, "STACK CFI"),
            RecordType::StackWin => write!(f, "STACK WIN"),
        }
    }
}

/// The error type for symbol file parsing.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SymbolError {
    /// The symbol header (`MODULE` record) is missing or malformed.
    #[error("missing symbol file header")]
    InvalidMagic,

    /// A part of the file is not encoded in valid UTF-8.
    #[error("bad utf-8 sequence")]
    BadEncoding,

    /// Parsing of a record failed.
    #[error("failed to parse {0} record: {1}")]
    Parse(RecordType, &'static str),
}

impl From<str::Utf8Error> for SymbolError {
    fn from(_: str::Utf8Error) -> Self {
        SymbolError::BadEncoding
    }
}

type Result<A, E = SymbolError> = std::result::Result<A, E>;
type ParseResult<A> = std::result::Result<A, &'static str>;

/// An iterator over the lines of a symbol file, stripping `\r` and skipping
/// blank lines.
#[derive(Clone, Debug, Default)]
struct FileLines<'d> {
    data: &'d [u8],
}

impl<'d> FileLines<'d> {
    fn new(data: &'d [u8]) -> Self {
        FileLines { data }
    }
}

impl<'d> Iterator for FileLines<'d> {
    type Item = &'d [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while !self.data.is_empty() {
            let (line, rest) = match self.data.iter().position(|&b| b == b'\n') {
                Some(idx) => (&self.data[..idx], &self.data[idx + 1..]),
                None => (self.data, &[][..]),
            };
            self.data = rest;

            let line = match line.split_last() {
                Some((b'\r', stripped)) => stripped,
                _ => line,
            };

            if !line.is_empty() {
                return Some(line);
            }
        }

        None
    }
}

fn next(input: &str) -> ParseResult<(&str, &str)> {
    if input.is_empty() {
        return Err("unexpected end of input");
    }

    Ok(match input.find(char::is_whitespace) {
        Some(split) => (&input[..split], input[split..].trim_start()),
        None => (input, ""),
    })
}

fn expect<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    let (field, rest) = next(input).ok()?;
    (field == prefix).then_some(rest)
}

fn next_and<T, F>(input: &str, parser: F) -> ParseResult<(T, &str)>
where
    F: FnOnce(&str) -> ParseResult<T>,
{
    next(input).and_then(|(part, rest)| Ok((parser(part)?, rest)))
}

fn parse_hex64(input: &str) -> ParseResult<u64> {
    u64::from_str_radix(input, 16).or(Err("expected hex number"))
}

fn parse_hex32(input: &str) -> ParseResult<u32> {
    u32::from_str_radix(input, 16).or(Err("expected hex number"))
}

fn parse_u64(input: &str) -> ParseResult<u64> {
    input.parse().or(Err("expected number"))
}

fn parse_line_number(input: &str) -> ParseResult<u64> {
    // Tools occasionally write negative line numbers; clamp them to zero
    // rather than rejecting the record.
    let line = input.parse::<i64>().or(Err("expected line number"))?;
    Ok(line.max(0) as u64)
}

fn done(input: &str) -> ParseResult<()> {
    match input {
        "" => Ok(()),
        _ => Err("unexpected trailing data"),
    }
}

/// Strips an optional `m` multiple-marker field.
fn multiple(input: &str) -> (bool, &str) {
    match expect(input, "m") {
        Some(rest) => (true, rest),
        None => (false, input),
    }
}

/// A module record, constituting the header of a symbol file.
///
/// Example: `MODULE Linux x86_64 D3096ED481217FD4C16B29CD9BC208BA0 firefox-bin`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ModuleRecord<'d> {
    /// Name of the operating system.
    pub os: &'d str,
    /// Name of the CPU architecture.
    pub arch: &'d str,
    /// The debug identifier, formatted as hex digits.
    pub id: &'d str,
    /// Name of the original debug file.
    pub name: &'d str,
}

impl<'d> ModuleRecord<'d> {
    /// Parses a module record from the first line of the given data.
    pub fn parse(data: &'d [u8]) -> Result<Self> {
        let input = str::from_utf8(data)?;

        let go = |input: &'d str| {
            let first_line = input.lines().next().ok_or("expected module record")?;
            let rest = expect(first_line, "MODULE").ok_or("expected MODULE prefix")?;

            let (os, rest) = next(rest)?;
            let (arch, rest) = next(rest)?;
            let (id, name) = next(rest)?;

            if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err("expected hex id");
            }

            Ok(ModuleRecord {
                os,
                arch,
                id,
                name: if name.is_empty() { UNKNOWN_NAME } else { name },
            })
        };

        go(input).map_err(|message| SymbolError::Parse(RecordType::Module, message))
    }
}

/// An information record following the header.
///
/// Currently only the `CODE_ID` scope is interpreted, which carries the
/// platform-dependent code identifier of the object file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InfoRecord<'d> {
    /// Information on the code file.
    CodeId {
        /// Identifier of the code file.
        code_id: &'d str,
        /// File name of the code file.
        code_file: &'d str,
    },
    /// Any other INFO record.
    Other {
        /// The scope of this info record.
        scope: &'d str,
        /// The information for this scope.
        info: &'d str,
    },
}

impl<'d> InfoRecord<'d> {
    /// Parses an info record from a single line.
    pub fn parse(data: &'d [u8]) -> Result<Self> {
        let input = str::from_utf8(data)?;

        let go = |input: &'d str| {
            let rest = expect(input, "INFO").ok_or("expected INFO prefix")?;

            if let Some(rest) = expect(rest, "CODE_ID") {
                let (code_id, code_file) = next(rest)?;
                Ok(InfoRecord::CodeId { code_id, code_file })
            } else {
                let (scope, info) = next(rest)?;
                Ok(InfoRecord::Other { scope, info })
            }
        };

        go(input).map_err(|message| SymbolError::Parse(RecordType::Info, message))
    }
}

/// A file record, mapping a file id to a source path.
///
/// Example: `FILE 2 /home/jimb/mc/in/browser/app/nsBrowserApp.cpp`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileRecord<'d> {
    /// The id by which line records refer to this file.
    pub id: u64,
    /// The path to the source file.
    pub name: &'d str,
}

impl<'d> FileRecord<'d> {
    /// Parses a file record from a single line.
    pub fn parse(data: &'d [u8]) -> Result<Self> {
        let input = str::from_utf8(data)?;

        let go = |input: &'d str| {
            let rest = expect(input, "FILE").ok_or("expected FILE prefix")?;
            let (id, name) = next_and(rest, parse_u64)?;

            Ok(FileRecord {
                id,
                name: if name.is_empty() { UNKNOWN_NAME } else { name },
            })
        };

        go(input).map_err(|message| SymbolError::Parse(RecordType::File, message))
    }
}

/// An inline origin record, mapping an origin id to a function name.
///
/// Example: `INLINE_ORIGIN 1 std::vector<int>::size() const`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InlineOriginRecord<'d> {
    /// The id by which INLINE records refer to this origin.
    pub id: u64,
    /// The fully qualified name of the inlined function.
    pub name: &'d str,
}

impl<'d> InlineOriginRecord<'d> {
    /// Parses an inline origin record from a single line.
    pub fn parse(data: &'d [u8]) -> Result<Self> {
        let input = str::from_utf8(data)?;

        let go = |input: &'d str| {
            let rest = expect(input, "INLINE_ORIGIN").ok_or("expected INLINE_ORIGIN prefix")?;
            let (id, name) = next_and(rest, parse_u64)?;

            Ok(InlineOriginRecord {
                id,
                name: if name.is_empty() { UNKNOWN_NAME } else { name },
            })
        };

        go(input).map_err(|message| SymbolError::Parse(RecordType::InlineOrigin, message))
    }
}

/// A function record.
///
/// Example: `FUNC m c184 30 0 nsQueryInterfaceWithError::operator()(nsID const&, void**) const`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FuncRecord<'d> {
    /// Whether multiple function records cover this address.
    pub multiple: bool,
    /// The start address relative to the module's load address.
    pub address: u64,
    /// The size of the code covered by this function.
    pub size: u64,
    /// The size of the parameters on the runtime stack.
    pub parameter_size: u64,
    /// The demangled function name.
    pub name: &'d str,
}

impl<'d> FuncRecord<'d> {
    /// Parses a function record from a single line.
    pub fn parse(data: &'d [u8]) -> Result<Self> {
        let input = str::from_utf8(data)?;

        let go = |input: &'d str| {
            let rest = expect(input, "FUNC").ok_or("expected FUNC prefix")?;
            let (multiple, rest) = multiple(rest);

            let (address, rest) = next_and(rest, parse_hex64)?;
            let (size, rest) = next_and(rest, parse_hex64)?;
            let (parameter_size, name) = next_and(rest, parse_hex64)?;

            Ok(FuncRecord {
                multiple,
                address,
                size,
                parameter_size,
                name: if name.is_empty() { UNKNOWN_NAME } else { name },
            })
        };

        go(input).map_err(|message| SymbolError::Parse(RecordType::Func, message))
    }
}

/// A line record, scoped to the preceding function record.
///
/// Line records are so frequent that they carry no record identifier.
///
/// Example: `c184 7 59 4`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LineRecord {
    /// The start address relative to the module's load address.
    pub address: u64,
    /// The size of the code covered by this line.
    pub size: u64,
    /// The one-based line number (zero means no line number).
    pub line: u64,
    /// Identifier of the [`FileRecord`] with the file name.
    pub file_id: u64,
}

impl LineRecord {
    /// Parses a line record from a single line.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let input = str::from_utf8(data)?;

        let go = |input: &str| {
            let (address, rest) = next_and(input, parse_hex64)?;
            let (size, rest) = next_and(rest, parse_hex64)?;
            let (line, rest) = next_and(rest, parse_line_number)?;
            let (file_id, rest) = next_and(rest, parse_u64)?;
            done(rest)?;

            Ok(LineRecord {
                address,
                size,
                line,
                file_id,
            })
        };

        go(input).map_err(|message| SymbolError::Parse(RecordType::Line, message))
    }
}

/// An inline record, scoped to the preceding function record.
///
/// Example: `INLINE 0 3082 52 1 29fe0 a 29ff4 58`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InlineRecord {
    /// The nesting depth of this call; direct calls from the function are 0.
    pub depth: u64,
    /// The source line of the call site in the caller.
    pub call_site_line: u64,
    /// Identifier of the [`FileRecord`] containing the call site.
    pub call_site_file_id: u64,
    /// Identifier of the [`InlineOriginRecord`] naming the inlined function.
    pub origin_id: u64,
    /// The address ranges covered by this inlined call.
    pub ranges: Vec<Range>,
}

impl InlineRecord {
    /// Parses an inline record from a single line.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let input = str::from_utf8(data)?;

        let go = |input: &str| {
            let rest = expect(input, "INLINE").ok_or("expected INLINE prefix")?;
            let (depth, rest) = next_and(rest, parse_u64)?;
            let (call_site_line, rest) = next_and(rest, parse_line_number)?;
            let (call_site_file_id, rest) = next_and(rest, parse_u64)?;
            let (origin_id, mut rest) = next_and(rest, parse_u64)?;

            let mut ranges = Vec::new();
            while !rest.is_empty() {
                let (address, r) = next_and(rest, parse_hex64)?;
                let (size, r) = next_and(r, parse_hex64)?;
                ranges.push(Range::new(address, size));
                rest = r;
            }

            if ranges.is_empty() {
                return Err("expected at least one address range");
            }

            Ok(InlineRecord {
                depth,
                call_site_line,
                call_site_file_id,
                origin_id,
                ranges,
            })
        };

        go(input).map_err(|message| SymbolError::Parse(RecordType::Inline, message))
    }
}

/// A public symbol record.
///
/// Example: `PUBLIC m 2160 0 Public2_1`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PublicRecord<'d> {
    /// Whether multiple symbols share this address.
    pub multiple: bool,
    /// The address relative to the module's load address.
    pub address: u64,
    /// The size of the parameters on the runtime stack.
    pub parameter_size: u64,
    /// The demangled symbol name.
    pub name: &'d str,
}

impl<'d> PublicRecord<'d> {
    /// Parses a public symbol record from a single line.
    pub fn parse(data: &'d [u8]) -> Result<Self> {
        let input = str::from_utf8(data)?;

        let go = |input: &'d str| {
            let rest = expect(input, "PUBLIC").ok_or("expected PUBLIC prefix")?;
            let (multiple, rest) = multiple(rest);

            let (address, rest) = next_and(rest, parse_hex64)?;
            let (parameter_size, name) = next_and(rest, parse_hex64)?;

            Ok(PublicRecord {
                multiple,
                address,
                parameter_size,
                name: if name.is_empty() { UNKNOWN_NAME } else { name },
            })
        };

        go(input).map_err(|message| SymbolError::Parse(RecordType::Public, message))
    }
}

/// A `STACK CFI INIT` record opening a call frame information range.
///
/// Example: `STACK CFI INIT 3d40 af .cfa: $esp 4 + $ebp: .cfa 8 - ^`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StackCfiInitRecord<'d> {
    /// The first address covered.
    pub address: u64,
    /// The number of bytes covered.
    pub size: u64,
    /// The unwind program rules at the entry address.
    pub init_rules: &'d str,
}

impl<'d> StackCfiInitRecord<'d> {
    /// Parses a `STACK CFI INIT` record from a single line.
    pub fn parse(data: &'d [u8]) -> Result<Self> {
        let input = str::from_utf8(data)?;

        let go = |input: &'d str| {
            let rest = expect(input, "STACK").ok_or("expected STACK prefix")?;
            let rest = expect(rest, "CFI").ok_or("expected CFI prefix")?;
            let rest = expect(rest, "INIT").ok_or("expected INIT prefix")?;

            let (address, rest) = next_and(rest, parse_hex64)?;
            let (size, init_rules) = next_and(rest, parse_hex64)?;

            if init_rules.is_empty() {
                return Err("expected unwind rules");
            }

            Ok(StackCfiInitRecord {
                address,
                size,
                init_rules,
            })
        };

        go(input).map_err(|message| SymbolError::Parse(RecordType::StackCfi, message))
    }
}

/// A `STACK CFI` delta record updating the rules of the preceding
/// `STACK CFI INIT`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StackCfiDeltaRecord<'d> {
    /// The address the updated rules take effect at.
    pub address: u64,
    /// The unwind program rule updates.
    pub rules: &'d str,
}

impl<'d> StackCfiDeltaRecord<'d> {
    /// Parses a `STACK CFI` delta record from a single line.
    pub fn parse(data: &'d [u8]) -> Result<Self> {
        let input = str::from_utf8(data)?;

        let go = |input: &'d str| {
            let rest = expect(input, "STACK").ok_or("expected STACK prefix")?;
            let rest = expect(rest, "CFI").ok_or("expected CFI prefix")?;

            let (address, rules) = next_and(rest, parse_hex64)?;

            if rules.is_empty() {
                return Err("expected unwind rules");
            }

            Ok(StackCfiDeltaRecord { address, rules })
        };

        go(input).map_err(|message| SymbolError::Parse(RecordType::StackCfi, message))
    }
}

/// A Windows stack frame record, used on x86.
///
/// Example: `STACK WIN 4 2170 14 1 0 0 0 0 0 1 $eip 4 + ^ = $esp $ebp 8 + = $ebp $ebp ^ =`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackWinRecord<'d> {
    /// The kind of frame data this record holds.
    pub kind: StackWinKind,
    /// The starting address covered by this record.
    pub address: u32,
    /// The number of bytes covered.
    pub size: u32,
    /// The size of the prologue machine code in bytes.
    pub prolog_size: u32,
    /// The size of the epilogue machine code in bytes.
    pub epilog_size: u32,
    /// The number of argument bytes the function expects.
    pub parameter_size: u32,
    /// The number of bytes used for callee-saves registers.
    pub saved_register_size: u32,
    /// The number of bytes used for local variables.
    pub local_size: u32,
    /// The maximum number of bytes pushed onto the stack.
    pub max_stack_size: u32,
    /// Whether the base pointer is allocated as a general purpose register.
    pub allocates_base_pointer: bool,
    /// A program recovering the caller's registers, for FrameData records.
    pub program_string: Option<&'d str>,
}

impl<'d> StackWinRecord<'d> {
    /// Parses a `STACK WIN` record from a single line.
    pub fn parse(data: &'d [u8]) -> Result<Self> {
        let input = str::from_utf8(data)?;

        let go = |input: &'d str| {
            let rest = expect(input, "STACK").ok_or("expected STACK prefix")?;
            let rest = expect(rest, "WIN").ok_or("expected WIN prefix")?;

            let (kind, rest) = next_and(rest, |s| match s {
                "0" => Ok(StackWinKind::Fpo),
                "4" => Ok(StackWinKind::FrameData),
                _ => Err("unsupported stack win record type"),
            })?;

            let (address, rest) = next_and(rest, parse_hex32)?;
            let (size, rest) = next_and(rest, parse_hex32)?;
            let (prolog_size, rest) = next_and(rest, parse_hex32)?;
            let (epilog_size, rest) = next_and(rest, parse_hex32)?;
            let (parameter_size, rest) = next_and(rest, parse_hex32)?;
            let (saved_register_size, rest) = next_and(rest, parse_hex32)?;
            let (local_size, rest) = next_and(rest, parse_hex32)?;
            let (max_stack_size, rest) = next_and(rest, parse_hex32)?;
            let (has_program_string, rest) = next_and(rest, |s| Ok(s != "0"))?;

            let (allocates_base_pointer, program_string) = if has_program_string {
                (false, Some(rest))
            } else {
                (rest != "0", None)
            };

            Ok(StackWinRecord {
                kind,
                address,
                size,
                prolog_size,
                epilog_size,
                parameter_size,
                saved_register_size,
                local_size,
                max_stack_size,
                allocates_base_pointer,
                program_string,
            })
        };

        go(input).map_err(|message| SymbolError::Parse(RecordType::StackWin, message))
    }
}

/// A parsed symbol file.
///
/// This wraps the raw file data and hands out iterators over the various
/// record kinds. Only the header is parsed eagerly; everything else is read
/// lazily while iterating, so opening a symbol file is cheap.
pub struct SymbolFile<'d> {
    module: ModuleRecord<'d>,
    data: &'d [u8],
}

impl<'d> SymbolFile<'d> {
    /// Tests whether the buffer could contain a symbol file.
    pub fn test(data: &[u8]) -> bool {
        data.starts_with(b"MODULE ")
    }

    /// Parses a symbol file from the given buffer.
    pub fn parse(data: &'d [u8]) -> Result<Self> {
        if !Self::test(data) {
            return Err(SymbolError::InvalidMagic);
        }

        // Cap the header before parsing so a file without line breaks cannot
        // make us scan everything at once.
        let header = if data.len() > HEADER_CAP {
            match str::from_utf8(&data[..HEADER_CAP]) {
                Ok(_) => &data[..HEADER_CAP],
                Err(e) => match e.error_len() {
                    None => &data[..e.valid_up_to()],
                    Some(_) => return Err(SymbolError::BadEncoding),
                },
            }
        } else {
            data
        };

        let module = ModuleRecord::parse(header)?;
        Ok(SymbolFile { module, data })
    }

    /// The parsed MODULE header record.
    pub fn module_record(&self) -> &ModuleRecord<'d> {
        &self.module
    }

    /// The raw data of the symbol file.
    pub fn data(&self) -> &'d [u8] {
        self.data
    }

    /// Builds a [`Module`] from all records in the file.
    ///
    /// Unknown record kinds are counted and otherwise skipped; the count is
    /// returned alongside the module so callers can log it. The returned
    /// module is frozen.
    pub fn to_module(&self) -> Result<(Module, usize)> {
        let mut module = Module::new(
            self.module.name,
            self.module.os,
            self.module.arch,
            self.module.id,
        );

        // Maps ids from the file to the module's interned ids. Well-formed
        // writers emit dense ids, but readers cannot rely on that.
        let mut file_ids: HashMap<u64, u64> = HashMap::new();
        let mut origin_ids: HashMap<u64, u64> = HashMap::new();

        let mut skipped = 0usize;
        let mut current_func: Option<Function> = None;
        // The DFS path of inline instances of the current function, one per
        // nesting depth.
        let mut inline_stack: Vec<InlineInstance> = Vec::new();
        let mut current_cfi: Option<StackFrameEntry> = None;

        for line in FileLines::new(self.data) {
            if line.starts_with(b"MODULE ") {
                continue;
            } else if line.starts_with(b"INFO ") {
                if let InfoRecord::CodeId { code_id, .. } = InfoRecord::parse(line)? {
                    if !code_id.is_empty() {
                        module.set_code_id(code_id);
                    }
                }
            } else if line.starts_with(b"FILE ") {
                let record = FileRecord::parse(line)?;
                file_ids.insert(record.id, module.find_file(record.name));
            } else if line.starts_with(b"INLINE_ORIGIN ") {
                let record = InlineOriginRecord::parse(line)?;
                origin_ids.insert(record.id, module.find_inline_origin(record.name));
            } else if line.starts_with(b"FUNC ") {
                flush_function(&mut module, &mut current_func, &mut inline_stack);
                let record = FuncRecord::parse(line)?;
                current_func = Some(Function {
                    name: record.name.to_string(),
                    address: record.address,
                    ranges: vec![Range::new(record.address, record.size)],
                    parameter_size: record.parameter_size,
                    is_multiple: record.multiple,
                    ..Default::default()
                });
            } else if line.starts_with(b"INLINE ") {
                let record = InlineRecord::parse(line)?;
                let func = current_func
                    .as_mut()
                    .ok_or(SymbolError::Parse(RecordType::Inline, "INLINE without FUNC"))?;

                let instance = InlineInstance {
                    call_site_file_id: file_ids
                        .get(&record.call_site_file_id)
                        .copied()
                        .unwrap_or(record.call_site_file_id),
                    call_site_line: record.call_site_line,
                    origin_id: origin_ids
                        .get(&record.origin_id)
                        .copied()
                        .unwrap_or(record.origin_id),
                    ranges: record.ranges,
                    children: Vec::new(),
                };

                // Records arrive in depth-first order; unwind the stack to
                // the parent depth and attach.
                while inline_stack.len() > record.depth as usize {
                    pop_inline(func, &mut inline_stack);
                }
                inline_stack.push(instance);
            } else if line.starts_with(b"PUBLIC ") {
                let record = PublicRecord::parse(line)?;
                module.add_public(PublicSymbol {
                    address: record.address,
                    parameter_size: record.parameter_size,
                    name: record.name.to_string(),
                    is_multiple: record.multiple,
                });
            } else if line.starts_with(b"STACK CFI INIT ") {
                if let Some(entry) = current_cfi.take() {
                    module.add_stack_cfi(entry);
                }
                let record = StackCfiInitRecord::parse(line)?;
                current_cfi = Some(StackFrameEntry {
                    address: record.address,
                    size: record.size,
                    init_rules: record.init_rules.to_string(),
                    delta_rules: Default::default(),
                });
            } else if line.starts_with(b"STACK CFI ") {
                let record = StackCfiDeltaRecord::parse(line)?;
                let entry = current_cfi.as_mut().ok_or(SymbolError::Parse(
                    RecordType::StackCfi,
                    "STACK CFI without STACK CFI INIT",
                ))?;
                entry
                    .delta_rules
                    .insert(record.address, record.rules.to_string());
            } else if line.starts_with(b"STACK WIN ") {
                let record = StackWinRecord::parse(line)?;
                module.add_stack_win(StackWinEntry {
                    kind: record.kind,
                    address: record.address as u64,
                    size: record.size as u64,
                    prolog_size: record.prolog_size,
                    epilog_size: record.epilog_size,
                    parameter_size: record.parameter_size,
                    saved_register_size: record.saved_register_size,
                    local_size: record.local_size,
                    max_stack_size: record.max_stack_size,
                    allocates_base_pointer: record.allocates_base_pointer,
                    program_string: record.program_string.map(str::to_string),
                });
            } else if line.first().is_some_and(u8::is_ascii_hexdigit) {
                let record = LineRecord::parse(line)?;
                // Line records for empty ranges carry no information.
                if record.size == 0 {
                    continue;
                }
                let func = current_func
                    .as_mut()
                    .ok_or(SymbolError::Parse(RecordType::Line, "line without FUNC"))?;
                func.lines.push(Line {
                    address: record.address,
                    size: record.size,
                    file_id: file_ids.get(&record.file_id).copied().unwrap_or(record.file_id),
                    number: record.line,
                });
            } else {
                skipped += 1;
            }
        }

        flush_function(&mut module, &mut current_func, &mut inline_stack);
        if let Some(entry) = current_cfi.take() {
            module.add_stack_cfi(entry);
        }

        module.freeze();
        Ok((module, skipped))
    }
}

impl fmt::Debug for SymbolFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolFile")
            .field("module", &self.module)
            .field("len()", &self.data.len())
            .finish()
    }
}

fn pop_inline(func: &mut Function, stack: &mut Vec<InlineInstance>) {
    if let Some(done) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.children.push(done),
            None => func.inlines.push(done),
        }
    }
}

fn flush_function(
    module: &mut Module,
    current: &mut Option<Function>,
    inline_stack: &mut Vec<InlineInstance>,
) {
    if let Some(mut func) = current.take() {
        while !inline_stack.is_empty() {
            pop_inline(&mut func, inline_stack);
        }
        func.lines.sort_by_key(|l| l.address);
        module.add_function(func);
    }
}
