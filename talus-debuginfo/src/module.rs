//! The in-memory symbol database.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// An address within a module, relative to the module's load address.
pub type Address = u64;

/// A contiguous range of code addresses.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Range {
    /// The first address covered by this range.
    pub address: Address,
    /// The number of bytes covered by this range.
    pub size: u64,
}

impl Range {
    /// Creates a new range from a start address and a size.
    pub fn new(address: Address, size: u64) -> Self {
        Range { address, size }
    }

    /// The first address past the end of this range.
    ///
    /// Saturates instead of wrapping for ranges at the end of the address
    /// space.
    pub fn end(&self) -> Address {
        self.address.saturating_add(self.size)
    }

    /// Returns true if `address` lies within this range.
    pub fn contains(&self, address: Address) -> bool {
        address >= self.address && address < self.end()
    }

    /// Returns true if the two ranges share at least one address.
    pub fn intersects(&self, other: &Range) -> bool {
        self.address < other.end() && other.address < self.end()
    }
}

/// A source file, interned by [`Module::find_file`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct File {
    /// The stable identifier of this file within its module.
    pub id: u64,
    /// The path of the source file.
    pub name: String,
}

/// A source line record.
///
/// Invariant: `size` is greater than zero and `address + size` does not wrap.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Line {
    /// The first address covered by this line.
    pub address: Address,
    /// The number of bytes covered.
    pub size: u64,
    /// Identifier of the [`File`] containing the source.
    pub file_id: u64,
    /// The one-based source line number.
    pub number: u64,
}

impl Line {
    /// The first address past the end of this line.
    pub fn end(&self) -> Address {
        self.address.saturating_add(self.size)
    }
}

/// One inlined function call within a [`Function`].
///
/// Inline instances form a tree rooted at their function; the nesting depth
/// corresponds to call stack nesting at runtime.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InlineInstance {
    /// Identifier of the [`File`] containing the call site.
    pub call_site_file_id: u64,
    /// The source line of the call site in the caller.
    pub call_site_line: u64,
    /// Identifier of the inline origin (the name of the inlined function),
    /// interned via [`Module::find_inline_origin`].
    pub origin_id: u64,
    /// The address ranges covered by this inlined call.
    pub ranges: Vec<Range>,
    /// Calls inlined into this call, if any.
    pub children: Vec<InlineInstance>,
}

/// A function with its owned lines and inline call tree.
#[derive(Clone, Debug, Default)]
pub struct Function {
    /// The fully qualified name of the function.
    pub name: String,
    /// The primary entry address.
    pub address: Address,
    /// The address ranges covered by this function.
    ///
    /// Invariant: non-empty, non-overlapping, and sorted by start address.
    pub ranges: Vec<Range>,
    /// The size of the function's parameters on the stack.
    pub parameter_size: u64,
    /// True if the symbol table name should win over the DWARF name.
    pub prefer_extern_name: bool,
    /// True if more than one function record covers some of these addresses,
    /// for example due to identical code folding.
    pub is_multiple: bool,
    /// Source lines inside this function, sorted by address.
    pub lines: Vec<Line>,
    /// The roots of the inline call tree.
    pub inlines: Vec<InlineInstance>,
}

impl Function {
    /// The size of the function, from its entry to the end of its last range.
    pub fn size(&self) -> u64 {
        match self.ranges.last() {
            Some(last) => last.end() - self.address,
            None => 0,
        }
    }

    /// Returns true if any of the function's ranges contains `address`.
    pub fn contains(&self, address: Address) -> bool {
        self.ranges.iter().any(|r| r.contains(address))
    }

    /// A total order on `(entry address, name)`.
    pub fn compare_by_address(a: &Function, b: &Function) -> Ordering {
        a.address
            .cmp(&b.address)
            .then_with(|| a.name.cmp(&b.name))
    }
}

/// An address-labeled name without size information.
///
/// Public symbols are a coarse fallback used when no function record covers
/// an address.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PublicSymbol {
    /// The address of the symbol.
    pub address: Address,
    /// The size of the function's parameters on the stack.
    pub parameter_size: u64,
    /// The demangled name of the symbol.
    pub name: String,
    /// True if multiple symbols share this address.
    pub is_multiple: bool,
}

/// Call frame information for a range of code.
///
/// The rules strings are postfix expression programs in the symbol file
/// grammar. `init_rules` applies at the entry of the range; each entry in
/// `delta_rules` updates the rule set for all addresses at or past its key.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StackFrameEntry {
    /// The first address covered by this entry.
    pub address: Address,
    /// The number of bytes covered.
    pub size: u64,
    /// Rules in effect at the entry address.
    pub init_rules: String,
    /// Rule updates, keyed by the absolute address they take effect at.
    pub delta_rules: BTreeMap<Address, String>,
}

/// The kind of data a [`StackWinEntry`] was produced from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StackWinKind {
    /// Frame pointer omitted; FPO info available.
    Fpo,
    /// Frame pointer omitted; frame data info available.
    FrameData,
}

/// A Windows stack frame record, used on x86.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackWinEntry {
    /// The kind of frame data this entry holds.
    pub kind: StackWinKind,
    /// The first address covered.
    pub address: Address,
    /// The number of bytes covered.
    pub size: u64,
    /// The size of the function prologue in bytes.
    pub prolog_size: u32,
    /// The size of the function epilogue in bytes.
    pub epilog_size: u32,
    /// The number of argument bytes the function expects.
    pub parameter_size: u32,
    /// The number of bytes used for callee-saves registers.
    pub saved_register_size: u32,
    /// The number of bytes used for local variables.
    pub local_size: u32,
    /// The maximum number of bytes pushed onto the stack by the frame.
    pub max_stack_size: u32,
    /// Whether the base pointer is allocated as a general purpose register.
    pub allocates_base_pointer: bool,
    /// A postfix program recovering the caller's registers, if present.
    pub program_string: Option<String>,
}

/// A named compilation target and its symbol database.
///
/// A module owns all functions, lines, files, public symbols, and unwind
/// records extracted from one object file. It is filled during ingestion,
/// [frozen](Module::freeze) exactly once, and read-only afterwards.
#[derive(Debug)]
pub struct Module {
    name: String,
    os: String,
    arch: String,
    id: String,
    code_id: Option<String>,

    files: Vec<File>,
    files_by_name: HashMap<String, u64>,
    inline_origins: Vec<String>,
    inline_origins_by_name: HashMap<String, u64>,

    functions: Vec<Function>,
    publics: BTreeMap<Address, PublicSymbol>,
    stack_cfi: Vec<StackFrameEntry>,
    stack_win: Vec<StackWinEntry>,

    frozen: bool,
}

impl Module {
    /// Creates a new, empty module.
    pub fn new(
        name: impl Into<String>,
        os: impl Into<String>,
        arch: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Module {
            name: name.into(),
            os: os.into(),
            arch: arch.into(),
            id: id.into(),
            code_id: None,
            files: Vec::new(),
            files_by_name: HashMap::new(),
            inline_origins: Vec::new(),
            inline_origins_by_name: HashMap::new(),
            functions: Vec::new(),
            publics: BTreeMap::new(),
            stack_cfi: Vec::new(),
            stack_win: Vec::new(),
            frozen: false,
        }
    }

    /// The name of the module, usually the debug file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The operating system the module was built for.
    pub fn os(&self) -> &str {
        &self.os
    }

    /// The CPU architecture of the module.
    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// The debug identifier of the module.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The platform-dependent code identifier, if known.
    pub fn code_id(&self) -> Option<&str> {
        self.code_id.as_deref()
    }

    /// Sets the platform-dependent code identifier.
    pub fn set_code_id(&mut self, code_id: impl Into<String>) {
        self.code_id = Some(code_id.into());
    }

    /// Returns the id of the file with the given path, interning it on first
    /// use.
    ///
    /// File ids are dense and monotonic per module.
    pub fn find_file(&mut self, name: &str) -> u64 {
        debug_assert!(!self.frozen);
        if let Some(&id) = self.files_by_name.get(name) {
            return id;
        }

        let id = self.files.len() as u64;
        self.files.push(File {
            id,
            name: name.to_string(),
        });
        self.files_by_name.insert(name.to_string(), id);
        id
    }

    /// Returns the file with the given id.
    pub fn file(&self, id: u64) -> Option<&File> {
        self.files.get(id as usize)
    }

    /// All interned files in id order.
    pub fn files(&self) -> &[File] {
        &self.files
    }

    /// Returns the id of the inline origin with the given name, interning it
    /// on first use.
    pub fn find_inline_origin(&mut self, name: &str) -> u64 {
        debug_assert!(!self.frozen);
        if let Some(&id) = self.inline_origins_by_name.get(name) {
            return id;
        }

        let id = self.inline_origins.len() as u64;
        self.inline_origins.push(name.to_string());
        self.inline_origins_by_name.insert(name.to_string(), id);
        id
    }

    /// Returns the inline origin name with the given id.
    pub fn inline_origin(&self, id: u64) -> Option<&str> {
        self.inline_origins.get(id as usize).map(String::as_str)
    }

    /// All interned inline origin names in id order.
    pub fn inline_origins(&self) -> &[String] {
        &self.inline_origins
    }

    /// Adds a function to the module, taking ownership.
    pub fn add_function(&mut self, function: Function) {
        debug_assert!(!self.frozen);
        debug_assert!(!function.ranges.is_empty());
        self.functions.push(function);
    }

    /// All functions owned by the module.
    ///
    /// Sorted by [`Function::compare_by_address`] once the module is frozen;
    /// in insertion order before that.
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Appends all functions to `out`, preserving the module's order.
    pub fn get_functions(&self, out: &mut Vec<Function>) {
        out.extend(self.functions.iter().cloned());
    }

    pub(crate) fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }

    /// Adds a public symbol.
    ///
    /// Inserting a second symbol at an existing address marks the record as
    /// multiple instead of duplicating it; the earlier name wins.
    pub fn add_public(&mut self, public: PublicSymbol) {
        debug_assert!(!self.frozen);
        match self.publics.entry(public.address) {
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(public);
            }
            std::collections::btree_map::Entry::Occupied(mut entry) => {
                entry.get_mut().is_multiple = true;
            }
        }
    }

    /// All public symbols in address order.
    pub fn publics(&self) -> impl Iterator<Item = &PublicSymbol> {
        self.publics.values()
    }

    /// Adds a call frame information entry.
    pub fn add_stack_cfi(&mut self, entry: StackFrameEntry) {
        debug_assert!(!self.frozen);
        self.stack_cfi.push(entry);
    }

    /// All call frame information entries.
    pub fn stack_cfi(&self) -> &[StackFrameEntry] {
        &self.stack_cfi
    }

    /// Adds a Windows stack frame entry.
    pub fn add_stack_win(&mut self, entry: StackWinEntry) {
        debug_assert!(!self.frozen);
        self.stack_win.push(entry);
    }

    /// All Windows stack frame entries.
    pub fn stack_win(&self) -> &[StackWinEntry] {
        &self.stack_win
    }

    /// Whether [`Module::freeze`] has been called.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Freezes the module: sorts functions by address, applies the overlap
    /// policy, and sorts unwind records.
    ///
    /// After freezing the module is immutable and may be shared across
    /// threads without synchronization. Freezing twice is a no-op.
    ///
    /// Overlapping functions with an identical name are merged into one
    /// record with the union of their ranges. Functions overlapping under
    /// different names are preserved and marked [`Function::is_multiple`];
    /// address queries use the lower-address match. Ties on the start address
    /// break towards the lexicographically smaller name, independent of
    /// ingestion order.
    pub fn freeze(&mut self) {
        if self.frozen {
            return;
        }

        self.functions.sort_by(Function::compare_by_address);

        let mut merged: Vec<Function> = Vec::with_capacity(self.functions.len());
        for mut function in self.functions.drain(..) {
            match merged.last_mut() {
                Some(prev) if prev.name == function.name && overlaps(prev, &function) => {
                    prev.ranges.append(&mut function.ranges);
                    prev.ranges.sort();
                    prev.ranges.dedup();
                    coalesce(&mut prev.ranges);
                    prev.lines.append(&mut function.lines);
                    prev.lines.sort_by_key(|l| l.address);
                    prev.inlines.append(&mut function.inlines);
                    prev.is_multiple |= function.is_multiple;
                }
                Some(prev) if overlaps(prev, &function) => {
                    prev.is_multiple = true;
                    function.is_multiple = true;
                    merged.push(function);
                }
                _ => merged.push(function),
            }
        }
        self.functions = merged;

        self.stack_cfi.sort_by_key(|e| e.address);
        self.stack_win.sort_by_key(|e| e.address);
        self.frozen = true;
    }

    /// Finds the function covering `address` after freezing.
    ///
    /// When multiple records cover the address, the lower-address match wins.
    pub fn function_at(&self, address: Address) -> Option<&Function> {
        let idx = match self
            .functions
            .binary_search_by(|f| f.address.cmp(&address))
        {
            Ok(idx) => idx,
            Err(0) => return None,
            Err(idx) => idx - 1,
        };

        // Walk back over functions that start at or before the address; the
        // lowest-address record covering it wins.
        self.functions[..=idx]
            .iter()
            .find(|f| f.contains(address))
    }
}

fn overlaps(a: &Function, b: &Function) -> bool {
    a.ranges
        .iter()
        .any(|ra| b.ranges.iter().any(|rb| ra.intersects(rb)))
}

/// Collapses adjacent or overlapping sorted ranges into maximal ones.
fn coalesce(ranges: &mut Vec<Range>) {
    let mut out: Vec<Range> = Vec::with_capacity(ranges.len());
    for range in ranges.drain(..) {
        match out.last_mut() {
            Some(last) if range.address <= last.end() => {
                let end = last.end().max(range.end());
                last.size = end - last.address;
            }
            _ => out.push(range),
        }
    }
    *ranges = out;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(name: &str, address: Address, size: u64) -> Function {
        Function {
            name: name.into(),
            address,
            ranges: vec![Range::new(address, size)],
            ..Default::default()
        }
    }

    #[test]
    fn test_find_file_interns() {
        let mut module = Module::new("a.out", "linux", "x86_64", "ID");
        let id1 = module.find_file("a.c");
        let id2 = module.find_file("b.c");
        let id3 = module.find_file("a.c");
        assert_eq!(id1, id3);
        assert_ne!(id1, id2);
        assert_eq!(module.file(id2).unwrap().name, "b.c");
    }

    #[test]
    fn test_freeze_sorts_by_address_then_name() {
        let mut module = Module::new("a.out", "linux", "x86_64", "ID");
        module.add_function(func("z", 0x2000, 0x10));
        module.add_function(func("b", 0x1000, 0x10));
        module.add_function(func("a", 0x1000, 0x8));
        module.freeze();

        let names: Vec<_> = module.functions().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "z"]);
    }

    #[test]
    fn test_freeze_merges_same_name_overlap() {
        let mut module = Module::new("a.out", "linux", "x86_64", "ID");
        module.add_function(func("f", 0x1000, 0x20));
        module.add_function(func("f", 0x1010, 0x30));
        module.freeze();

        assert_eq!(module.functions().len(), 1);
        let merged = &module.functions()[0];
        assert_eq!(merged.ranges, vec![Range::new(0x1000, 0x40)]);
        assert!(!merged.is_multiple);
    }

    #[test]
    fn test_freeze_marks_cross_name_overlap_multiple() {
        let mut module = Module::new("a.out", "linux", "x86_64", "ID");
        module.add_function(func("f", 0x1000, 0x20));
        module.add_function(func("g", 0x1010, 0x30));
        module.freeze();

        assert_eq!(module.functions().len(), 2);
        assert!(module.functions().iter().all(|f| f.is_multiple));
        // The lower-address match wins lookups in the overlap.
        assert_eq!(module.function_at(0x1015).unwrap().name, "f");
        assert_eq!(module.function_at(0x1025).unwrap().name, "g");
    }

    #[test]
    fn test_public_dedup() {
        let mut module = Module::new("a.out", "linux", "x86_64", "ID");
        module.add_public(PublicSymbol {
            address: 0x100,
            name: "one".into(),
            ..Default::default()
        });
        module.add_public(PublicSymbol {
            address: 0x100,
            name: "two".into(),
            ..Default::default()
        });

        let publics: Vec<_> = module.publics().collect();
        assert_eq!(publics.len(), 1);
        assert_eq!(publics[0].name, "one");
        assert!(publics[0].is_multiple);
    }
}
