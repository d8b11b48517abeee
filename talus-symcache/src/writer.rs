//! Conversion of a symbol database into the binary format.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use indexmap::{IndexMap, IndexSet};

use talus_debuginfo::{Function, InlineInstance, Module};

use crate::raw;

/// Converts a frozen [`Module`] into the binary symbol cache format.
///
/// The converter collects and deduplicates strings, files, and functions,
/// flattens each function's line table and inline call tree into address
/// ranges pointing at source location chains, and serializes everything
/// with [`serialize`](Self::serialize).
#[derive(Debug, Default)]
pub struct SymCacheConverter {
    os_idx: u32,
    arch_idx: u32,
    id_idx: u32,
    name_idx: u32,
    code_id_idx: u32,

    string_bytes: Vec<u8>,
    strings: IndexMap<String, raw::String>,
    files: IndexSet<raw::File>,
    functions: IndexSet<raw::Function>,
    source_locations: IndexSet<raw::SourceLocation>,
    ranges: BTreeMap<u64, u32>,
    publics: Vec<raw::Public>,
    cfi_ranges: Vec<raw::CfiRange>,
    cfi_deltas: Vec<raw::CfiDelta>,
    stack_win: Vec<raw::StackWin>,
}

/// A covered interval of one function, used while resolving overlaps.
struct Segment {
    start: u64,
    end: u64,
    source_location_idx: u32,
    function_address: u64,
}

impl SymCacheConverter {
    /// Creates a new converter.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_string(&mut self, s: &str) -> u32 {
        if let Some(existing_idx) = self.strings.get_index_of(s) {
            return existing_idx as u32;
        }
        let offset = self.string_bytes.len() as u32;
        let len = s.len() as u32;
        self.string_bytes.extend(s.bytes());
        let (string_idx, _) = self.strings.insert_full(s.to_owned(), raw::String { offset, len });
        string_idx as u32
    }

    fn insert_file(&mut self, module: &Module, file_id: u64) -> u32 {
        let name = match module.file(file_id) {
            Some(file) => file.name.clone(),
            None => return raw::NO_REF,
        };
        let name_idx = self.insert_string(&name);
        self.files.insert_full(raw::File { name_idx }).0 as u32
    }

    fn insert_function(&mut self, function: &Function) -> u32 {
        let name_idx = self.insert_string(&function.name);
        let mut flags = 0;
        if function.is_multiple {
            flags |= raw::FUNCTION_MULTIPLE;
        }
        if function.prefer_extern_name {
            flags |= raw::FUNCTION_PREFER_EXTERN;
        }

        let record = raw::Function {
            entry: function.address,
            size: function.size(),
            name_idx,
            parameter_size: function.parameter_size as u32,
            flags,
            _reserved: 0,
        };
        self.functions.insert_full(record).0 as u32
    }

    fn insert_inline_origin(&mut self, name: &str) -> u32 {
        let name_idx = self.insert_string(name);
        let record = raw::Function {
            entry: raw::NO_ENTRY,
            size: 0,
            name_idx,
            parameter_size: 0,
            flags: 0,
            _reserved: 0,
        };
        self.functions.insert_full(record).0 as u32
    }

    fn insert_source_location(&mut self, location: raw::SourceLocation) -> u32 {
        self.source_locations.insert_full(location).0 as u32
    }

    /// Processes a frozen module, adding all of its content to the
    /// converter.
    pub fn process_module(&mut self, module: &Module) {
        self.os_idx = self.insert_string(module.os());
        self.arch_idx = self.insert_string(module.arch());
        self.id_idx = self.insert_string(module.id());
        self.name_idx = self.insert_string(module.name());
        self.code_id_idx = match module.code_id() {
            Some(code_id) => self.insert_string(code_id),
            None => raw::NO_REF,
        };

        let mut segments = Vec::new();
        let mut function_ends = BTreeSet::new();
        for function in module.functions() {
            self.process_function(module, function, &mut segments);
            for range in &function.ranges {
                function_ends.insert(range.end());
            }
        }

        self.resolve_segments(segments, function_ends);

        for public in module.publics() {
            let name_idx = self.insert_string(&public.name);
            self.publics.push(raw::Public {
                addr: public.address,
                name_idx,
                parameter_size: public.parameter_size as u32,
                flags: if public.is_multiple {
                    raw::FUNCTION_MULTIPLE
                } else {
                    0
                },
                _reserved: 0,
            });
        }

        for entry in module.stack_cfi() {
            let init_rules_idx = self.insert_string(&entry.init_rules);
            let delta_start = self.cfi_deltas.len() as u32;
            for (addr, rules) in &entry.delta_rules {
                let rules_idx = self.insert_string(rules);
                self.cfi_deltas.push(raw::CfiDelta {
                    addr: *addr,
                    rules_idx,
                    _reserved: 0,
                });
            }

            self.cfi_ranges.push(raw::CfiRange {
                addr: entry.address,
                size: entry.size,
                init_rules_idx,
                delta_start,
                delta_count: self.cfi_deltas.len() as u32 - delta_start,
                _reserved: 0,
            });
        }

        for entry in module.stack_win() {
            let mut flags = 0;
            if entry.kind == talus_debuginfo::StackWinKind::FrameData {
                flags |= raw::STACK_WIN_FRAME_DATA;
            }
            if entry.allocates_base_pointer {
                flags |= raw::STACK_WIN_ALLOCATES_BASE_POINTER;
            }
            let program_idx = match entry.program_string.as_deref() {
                Some(program) => self.insert_string(program),
                None => raw::NO_REF,
            };

            self.stack_win.push(raw::StackWin {
                addr: entry.address as u32,
                size: entry.size as u32,
                prolog_size: entry.prolog_size,
                epilog_size: entry.epilog_size,
                parameter_size: entry.parameter_size,
                saved_register_size: entry.saved_register_size,
                local_size: entry.local_size,
                max_stack_size: entry.max_stack_size,
                flags,
                program_idx,
            });
        }
    }

    /// Flattens one function into segments carrying source location chains.
    fn process_function(
        &mut self,
        module: &Module,
        function: &Function,
        segments: &mut Vec<Segment>,
    ) {
        let function_idx = self.insert_function(function);

        // Flatten the inline tree into spans with their nesting depth.
        let mut spans = Vec::new();
        flatten_inlines(&function.inlines, 0, &mut spans);
        let spans: Vec<InlineSpan> = spans
            .into_iter()
            .map(|span| InlineSpan {
                origin_idx: self.lookup_or_insert_origin(module, span.origin_id),
                call_file_idx: self.insert_file(module, span.call_file_id),
                ..span
            })
            .collect();

        for range in &function.ranges {
            // Elementary intervals break at every line and inline boundary.
            let mut boundaries = BTreeSet::new();
            boundaries.insert(range.address);
            for line in &function.lines {
                if line.address < range.end() && line.end() > range.address {
                    boundaries.insert(line.address.max(range.address));
                    boundaries.insert(line.end().min(range.end()));
                }
            }
            for span in &spans {
                if span.start < range.end() && span.end > range.address {
                    boundaries.insert(span.start.max(range.address));
                    boundaries.insert(span.end.min(range.end()));
                }
            }
            boundaries.insert(range.end());

            let points: Vec<u64> = boundaries.into_iter().collect();
            for window in points.windows(2) {
                let (start, end) = (window[0], window[1]);
                if start >= range.end() {
                    break;
                }

                let leaf = function
                    .lines
                    .iter()
                    .find(|line| line.address <= start && start < line.end());
                let leaf_file_idx = match leaf {
                    Some(line) => self.insert_file(module, line.file_id),
                    None => raw::NO_REF,
                };
                let leaf_line = leaf.map(|line| line.number as u32).unwrap_or(0);

                // The inline stack at this address, outermost first.
                let mut stack: Vec<&InlineSpan> = spans
                    .iter()
                    .filter(|span| span.start <= start && start < span.end)
                    .collect();
                stack.sort_by_key(|span| span.depth);

                // Build the chain from the outermost location inward; each
                // inner location records the call site of the next inline.
                let outer = raw::SourceLocation {
                    file_idx: match stack.first() {
                        Some(span) => span.call_file_idx,
                        None => leaf_file_idx,
                    },
                    line: match stack.first() {
                        Some(span) => span.call_line as u32,
                        None => leaf_line,
                    },
                    function_idx,
                    inlined_into_idx: raw::NO_REF,
                };
                let mut prev = self.insert_source_location(outer);

                for (depth, span) in stack.iter().enumerate() {
                    let (file_idx, line) = match stack.get(depth + 1) {
                        Some(inner) => (inner.call_file_idx, inner.call_line as u32),
                        None => (leaf_file_idx, leaf_line),
                    };
                    prev = self.insert_source_location(raw::SourceLocation {
                        file_idx,
                        line,
                        function_idx: span.origin_idx,
                        inlined_into_idx: prev,
                    });
                }

                segments.push(Segment {
                    start,
                    end,
                    source_location_idx: prev,
                    function_address: function.address,
                });
            }
        }
    }

    fn lookup_or_insert_origin(&mut self, module: &Module, origin_id: u64) -> u32 {
        let name = module.inline_origin(origin_id).unwrap_or("<unknown>");
        let name = name.to_string();
        self.insert_inline_origin(&name)
    }

    /// Builds the final range map from per-function segments.
    ///
    /// Functions can overlap after identical code folding; the sweep gives
    /// every address to the covering function with the lowest start
    /// address, and closes coverage gaps with sentinel ranges.
    fn resolve_segments(&mut self, mut segments: Vec<Segment>, function_ends: BTreeSet<u64>) {
        let mut boundaries = BTreeSet::new();
        for segment in &segments {
            boundaries.insert(segment.start);
            boundaries.insert(segment.end);
        }
        boundaries.extend(function_ends);

        segments.sort_by_key(|segment| segment.start);

        let mut active: Vec<usize> = Vec::new();
        let mut next = 0;
        let mut last_inserted = raw::NO_REF;
        let mut first = true;
        for boundary in boundaries {
            while next < segments.len() && segments[next].start <= boundary {
                active.push(next);
                next += 1;
            }
            active.retain(|&index| segments[index].end > boundary);

            let best = active
                .iter()
                .map(|&index| &segments[index])
                .min_by_key(|segment| (segment.function_address, segment.start));

            let source_location_idx = match best {
                Some(segment) => segment.source_location_idx,
                None => raw::NO_REF,
            };

            // Skip boundaries that do not change the mapping.
            if !first && source_location_idx == last_inserted {
                continue;
            }

            self.ranges.insert(boundary, source_location_idx);
            last_inserted = source_location_idx;
            first = false;
        }
    }

    /// Serializes the converted data into the binary format.
    pub fn serialize<W: Write>(self, writer: &mut W) -> std::io::Result<()> {
        let mut writer = SectionWriter::new(writer);

        let header = raw::Header {
            magic: raw::SYMCACHE_MAGIC,
            version: raw::SYMCACHE_VERSION,
            os_idx: self.os_idx,
            arch_idx: self.arch_idx,
            id_idx: self.id_idx,
            name_idx: self.name_idx,
            code_id_idx: self.code_id_idx,
            num_strings: self.strings.len() as u32,
            num_files: self.files.len() as u32,
            num_functions: self.functions.len() as u32,
            num_source_locations: self.source_locations.len() as u32,
            num_ranges: self.ranges.len() as u32,
            num_publics: self.publics.len() as u32,
            num_cfi_ranges: self.cfi_ranges.len() as u32,
            num_cfi_deltas: self.cfi_deltas.len() as u32,
            num_stack_win: self.stack_win.len() as u32,
            string_bytes: self.string_bytes.len() as u32,
            _reserved: 0,
        };

        writer.write(std::slice::from_ref(&header))?;
        writer.align()?;

        for (_, string) in &self.strings {
            writer.write(std::slice::from_ref(string))?;
        }
        writer.align()?;

        for file in &self.files {
            writer.write(std::slice::from_ref(file))?;
        }
        writer.align()?;

        for function in &self.functions {
            writer.write(std::slice::from_ref(function))?;
        }
        writer.align()?;

        for location in &self.source_locations {
            writer.write(std::slice::from_ref(location))?;
        }
        writer.align()?;

        for (addr, source_location_idx) in &self.ranges {
            let range = raw::Range {
                addr: *addr,
                source_location_idx: *source_location_idx,
                _reserved: 0,
            };
            writer.write(std::slice::from_ref(&range))?;
        }
        writer.align()?;

        for public in &self.publics {
            writer.write(std::slice::from_ref(public))?;
        }
        writer.align()?;

        for range in &self.cfi_ranges {
            writer.write(std::slice::from_ref(range))?;
        }
        writer.align()?;

        for delta in &self.cfi_deltas {
            writer.write(std::slice::from_ref(delta))?;
        }
        writer.align()?;

        for record in &self.stack_win {
            writer.write(std::slice::from_ref(record))?;
        }
        writer.align()?;

        writer.write(&self.string_bytes)?;
        Ok(())
    }

    /// Converts a module and returns the serialized bytes.
    pub fn serialize_module(module: &Module) -> Vec<u8> {
        let mut converter = Self::new();
        converter.process_module(module);
        let mut buffer = Vec::new();
        converter
            .serialize(&mut buffer)
            .expect("writing to a Vec cannot fail");
        buffer
    }
}

/// An inline call span produced by flattening the call tree.
struct InlineSpan {
    depth: u32,
    start: u64,
    end: u64,
    origin_id: u64,
    origin_idx: u32,
    call_file_id: u64,
    call_file_idx: u32,
    call_line: u64,
}

fn flatten_inlines(inlines: &[InlineInstance], depth: u32, spans: &mut Vec<InlineSpan>) {
    for inline in inlines {
        for range in &inline.ranges {
            spans.push(InlineSpan {
                depth,
                start: range.address,
                end: range.end(),
                origin_id: inline.origin_id,
                origin_idx: raw::NO_REF,
                call_file_id: inline.call_site_file_id,
                call_file_idx: raw::NO_REF,
                call_line: inline.call_site_line,
            });
        }
        flatten_inlines(&inline.children, depth + 1, spans);
    }
}

/// Writes sections with 8-byte alignment between them.
struct SectionWriter<W> {
    writer: W,
    position: usize,
}

impl<W: Write> SectionWriter<W> {
    fn new(writer: W) -> Self {
        Self {
            writer,
            position: 0,
        }
    }

    fn write<T>(&mut self, data: &[T]) -> std::io::Result<usize> {
        let pointer = data.as_ptr() as *const u8;
        let len = std::mem::size_of_val(data);
        // SAFETY: pointer and len are derived directly from the slice.
        let buf = unsafe { std::slice::from_raw_parts(pointer, len) };
        self.writer.write_all(buf)?;
        self.position += len;
        Ok(len)
    }

    fn align(&mut self) -> std::io::Result<usize> {
        let buf = [0u8; 7];
        let len = raw::align_to_eight(self.position);
        self.write(&buf[0..len])
    }
}
