//! Reading DWARF line programs into module lines.

use std::collections::HashMap;

use gimli::read::{AttributeValue, EndianSlice, LineProgramHeader};
use gimli::RunTimeEndian;

use crate::module::{Line, Module};

type Slice<'d> = EndianSlice<'d, RunTimeEndian>;

/// Consumes a `.debug_line` program and appends the resulting lines to a
/// module.
///
/// The DWARF consumer invokes this exactly once per compilation unit that
/// carries a `DW_AT_stmt_list` attribute. Implementations append [`Line`]s
/// referring to files interned in the module via
/// [`Module::find_file`](crate::Module::find_file).
pub trait LineToModuleHandler {
    /// Announces the compilation directory of the unit about to be read.
    fn start_compilation_unit(&mut self, compilation_dir: &str);

    /// Reads the line program at `offset` within `section` and appends the
    /// produced lines to `lines`.
    ///
    /// `files` receives the mapping from the line program's file indices to
    /// the file ids interned in the module, so that inline call sites can be
    /// resolved against the same table.
    fn read_program(
        &mut self,
        section: &[u8],
        offset: u64,
        address_size: u8,
        module: &mut Module,
        lines: &mut Vec<Line>,
        files: &mut HashMap<u64, u64>,
    );
}

/// A [`LineToModuleHandler`] backed by the gimli line program state machine.
pub struct DebugLineReader {
    endian: RunTimeEndian,
    compilation_dir: String,
}

impl DebugLineReader {
    /// Creates a reader decoding line data with the given endianness.
    pub fn new(endian: RunTimeEndian) -> Self {
        DebugLineReader {
            endian,
            compilation_dir: String::new(),
        }
    }

    fn resolve_file(
        &self,
        header: &LineProgramHeader<Slice<'_>>,
        file_index: u64,
        module: &mut Module,
    ) -> Option<u64> {
        let entry = header.file(file_index)?;

        let name = attr_string(entry.path_name())?;
        if name.starts_with('/') {
            return Some(module.find_file(&name));
        }

        let mut path = String::new();
        let dir = entry.directory(header).and_then(attr_string);
        match dir {
            Some(dir) if dir.starts_with('/') => path.push_str(&dir),
            Some(dir) => {
                path.push_str(&self.compilation_dir);
                push_component(&mut path, &dir);
            }
            None => path.push_str(&self.compilation_dir),
        }
        push_component(&mut path, &name);

        Some(module.find_file(&path))
    }
}

fn attr_string(value: AttributeValue<Slice<'_>>) -> Option<String> {
    match value {
        AttributeValue::String(slice) => Some(String::from_utf8_lossy(slice.slice()).into_owned()),
        _ => None,
    }
}

fn push_component(path: &mut String, component: &str) {
    if !path.is_empty() && !path.ends_with('/') {
        path.push('/');
    }
    path.push_str(component);
}

/// A row produced by the state machine, sized against its successor.
struct PendingRow {
    address: u64,
    number: u64,
    file_id: Option<u64>,
}

impl LineToModuleHandler for DebugLineReader {
    fn start_compilation_unit(&mut self, compilation_dir: &str) {
        self.compilation_dir = compilation_dir.to_string();
    }

    fn read_program(
        &mut self,
        section: &[u8],
        offset: u64,
        address_size: u8,
        module: &mut Module,
        lines: &mut Vec<Line>,
        files: &mut HashMap<u64, u64>,
    ) {
        let debug_line = gimli::read::DebugLine::new(section, self.endian);
        let program = match debug_line.program(
            gimli::DebugLineOffset(offset as usize),
            address_size,
            None,
            None,
        ) {
            Ok(program) => program,
            Err(err) => {
                log::warn!("failed to parse line program at offset {:#x}: {}", offset, err);
                return;
            }
        };

        let mut rows = program.rows();
        let mut pending: Vec<PendingRow> = Vec::new();

        fn flush(
            pending: &mut Vec<PendingRow>,
            end: u64,
            module: &mut Module,
            lines: &mut Vec<Line>,
        ) {
            for index in 0..pending.len() {
                // Rows carry no size; it is the distance to the next row in
                // the sequence, or to the sequence end for the last row.
                let next = pending
                    .get(index + 1)
                    .map(|row| row.address)
                    .unwrap_or(end);
                let row = &pending[index];
                let size = next.saturating_sub(row.address);
                if size == 0 {
                    continue;
                }
                let file_id = row.file_id.unwrap_or_else(|| module.find_file("<unknown>"));
                lines.push(Line {
                    address: row.address,
                    size,
                    file_id,
                    number: row.number,
                });
            }
            pending.clear();
        }

        while let Ok(Some((header, row))) = rows.next_row() {
            let address = row.address();

            // Compilers emit sequences at address zero for code that the
            // linker discarded. Skip them.
            if address == 0 && !row.end_sequence() {
                pending.clear();
                continue;
            }

            if row.end_sequence() {
                flush(&mut pending, address, module, lines);
                continue;
            }

            // Rows within a sequence may only increase in address; a
            // decreasing row indicates broken data and is dropped.
            if let Some(last) = pending.last() {
                if address < last.address {
                    continue;
                }
            }

            let file_index = row.file_index();
            let number = row.line().map(u64::from).unwrap_or(0);
            let file_id = self.resolve_file(header, file_index, module);
            if let Some(id) = file_id {
                files.insert(file_index, id);
            }

            match pending.last_mut() {
                // Several rows at one address: the last one wins.
                Some(last) if last.address == address => {
                    last.number = number;
                    last.file_id = file_id;
                }
                _ => pending.push(PendingRow {
                    address,
                    number,
                    file_id,
                }),
            }
        }

        // A sequence without an end marker: assume the last row covers one
        // byte.
        if let Some(last) = pending.last() {
            let end = last.address.saturating_add(1);
            flush(&mut pending, end, module, lines);
        }

        lines.sort_by_key(|line| line.address);
    }
}
