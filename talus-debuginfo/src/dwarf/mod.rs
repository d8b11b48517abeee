//! A streaming consumer of DWARF debugging information.
//!
//! [`DwarfCuToModule`] accepts the DIE stream of one compilation unit from an
//! external DWARF reader and populates a [`Module`] with functions, inline
//! call trees, and source lines. Names are fully qualified along the scope
//! chain using the separators of the unit's source language, and
//! `DW_AT_specification` / `DW_AT_abstract_origin` indirections are resolved
//! through per-file tables, with forward and cross-unit references parked and
//! resolved in a final pass.
//!
//! The reader drives the handler through a small intake interface: unit and
//! root-DIE announcements, typed attribute emitters, and a parent-directed
//! dispatch that decides which child DIEs to walk:
//!
//! ```text
//! start_compilation_unit  -> start_root_die -> attr_* ... -> end_attributes
//!   -> find_child_handler -> attr_* ... -> end_attributes -> (children)
//!      -> finish
//! -> finish
//! ```
//!
//! Recoverable problems never abort processing; they surface through the
//! [`WarningReporter`] collaborator.

mod line;
mod reporter;

pub use self::line::*;
pub use self::reporter::*;

use std::collections::HashMap;
use std::fmt;

use gimli::constants;
use gimli::{DwAt, DwForm, DwLang, DwTag};
use thiserror::Error;

use talus_common::{Language, Name, NameMangling};
use talus_demangle::{Demangle, DemangleOptions};

use crate::module::{Function, InlineInstance, Line, Module, Range};

/// Placeholder name for functions whose name cannot be determined.
const NAME_OMITTED: &str = "<name omitted>";

/// The error type for [`DwarfError`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DwarfErrorKind {
    /// The compilation unit declares a DWARF version we do not read.
    UnsupportedVersion(u16),

    /// The root DIE of the compilation unit is not a compile unit DIE.
    BadRootDie(DwTag),
}

impl fmt::Display for DwarfErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion(version) => {
                write!(f, "unsupported DWARF version {}", version)
            }
            Self::BadRootDie(tag) => write!(f, "unexpected root DIE tag {}", tag),
        }
    }
}

/// An error rejecting a compilation unit.
///
/// Only format-fatal conditions are errors; everything recoverable goes
/// through the [`WarningReporter`] instead. A rejected unit does not affect
/// other units of the same file.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct DwarfError {
    kind: DwarfErrorKind,
}

impl DwarfError {
    /// Returns the corresponding [`DwarfErrorKind`] for this error.
    pub fn kind(&self) -> DwarfErrorKind {
        self.kind
    }
}

impl From<DwarfErrorKind> for DwarfError {
    fn from(kind: DwarfErrorKind) -> Self {
        Self { kind }
    }
}

/// Reads `DW_AT_ranges` lists from the `.debug_ranges` / `.debug_rnglists`
/// sections on behalf of the handler.
///
/// Range lists live outside the `.debug_info` section, so the handler cannot
/// decode them from the attribute stream alone. Readers resolve the section
/// offset into a list of address ranges, applying the unit's base address to
/// base-relative entries. Returning `None` drops the referencing function.
pub trait RangesReader {
    /// Reads the range list at `offset`, relative to `base_address`.
    fn read_ranges(&mut self, offset: u64, base_address: u64) -> Option<Vec<Range>>;
}

/// A declaration recorded for later reference through
/// `DW_AT_specification`.
#[derive(Debug, Clone)]
struct Specification {
    cu_index: u64,
    enclosing_name: String,
    name: Option<String>,
    mangled_name: Option<String>,
}

/// An abstract instance recorded for later reference through
/// `DW_AT_abstract_origin`.
#[derive(Debug, Clone)]
struct AbstractOrigin {
    cu_index: u64,
    name: String,
}

enum Lookup<'a, T> {
    Found(&'a T),
    OtherCu,
    Missing,
}

/// A function emitted with a provisional name, waiting for another unit to
/// define the referenced declaration or abstract instance.
struct FileFixup {
    function_index: usize,
    die_offset: u64,
    parent_scope: String,
    name: Option<String>,
    mangled: Option<String>,
    spec_ref: Option<u64>,
    origin_ref: Option<u64>,
    language: Language,
}

/// Per-file state shared by all compilation units of one object file.
///
/// The context owns the debug section map and the specification and
/// abstract-origin tables. When `handle_inter_cu_refs` is true, references
/// may cross compilation unit boundaries and unresolved ones are parked until
/// [`finish`](Self::finish); otherwise cross-unit references are reported as
/// unhandled and fall back to lexical naming.
pub struct FileContext<'d> {
    filename: String,
    handle_inter_cu_refs: bool,
    sections: HashMap<String, &'d [u8]>,
    specifications: HashMap<u64, Specification>,
    abstract_origins: HashMap<u64, AbstractOrigin>,
    pending: Vec<FileFixup>,
    cu_count: u64,
}

impl<'d> FileContext<'d> {
    /// Creates a context for the object file `filename`.
    pub fn new(filename: impl Into<String>, handle_inter_cu_refs: bool) -> Self {
        FileContext {
            filename: filename.into(),
            handle_inter_cu_refs,
            sections: HashMap::new(),
            specifications: HashMap::new(),
            abstract_origins: HashMap::new(),
            pending: Vec::new(),
            cu_count: 0,
        }
    }

    /// The name of the object file this context reads.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Registers the raw contents of a debug section, e.g. `.debug_line`.
    pub fn add_section(&mut self, name: &str, contents: &'d [u8]) {
        self.sections.insert(name.to_string(), contents);
    }

    /// Removes all registered sections.
    pub fn clear_sections(&mut self) {
        self.sections.clear();
    }

    fn lookup_specification(&self, target: u64, cu_index: u64) -> Lookup<'_, Specification> {
        match self.specifications.get(&target) {
            Some(spec) if spec.cu_index == cu_index || self.handle_inter_cu_refs => {
                Lookup::Found(spec)
            }
            Some(_) => Lookup::OtherCu,
            None => Lookup::Missing,
        }
    }

    fn lookup_abstract_origin(&self, target: u64, cu_index: u64) -> Lookup<'_, AbstractOrigin> {
        match self.abstract_origins.get(&target) {
            Some(origin) if origin.cu_index == cu_index || self.handle_inter_cu_refs => {
                Lookup::Found(origin)
            }
            Some(_) => Lookup::OtherCu,
            None => Lookup::Missing,
        }
    }

    /// Resolves references that were still open when their compilation unit
    /// finished, patching the affected function names in `module`.
    ///
    /// Call this after all units have been processed and before freezing the
    /// module. References that remain unresolved are reported through the
    /// reporter and keep their fallback names.
    pub fn finish(&mut self, module: &mut Module, reporter: &mut dyn WarningReporter) {
        for fixup in std::mem::take(&mut self.pending) {
            let spec = fixup
                .spec_ref
                .and_then(|target| self.specifications.get(&target));
            let origin = fixup
                .origin_ref
                .and_then(|target| self.abstract_origins.get(&target));

            if let (Some(target), None) = (fixup.spec_ref, spec) {
                reporter.unknown_specification(fixup.die_offset, target);
            }
            if let (Some(target), None) = (fixup.origin_ref, origin) {
                reporter.unknown_abstract_origin(fixup.die_offset, target);
            }
            if spec.is_none() && origin.is_none() {
                continue;
            }

            let resolved = compose_function_name(
                fixup.language,
                &fixup.parent_scope,
                fixup.name.as_deref(),
                fixup.mangled.as_deref(),
                spec,
                origin,
                reporter,
            );

            if let Some((name, prefer_extern_name)) = resolved {
                if let Some(function) = module.functions_mut().get_mut(fixup.function_index) {
                    function.name = name;
                    function.prefer_extern_name = prefer_extern_name;
                }
            }
        }
    }
}

/// A function gathered from a subprogram DIE, pending name resolution at
/// unit finish.
struct PendingFunction {
    die_offset: u64,
    parent_scope: String,
    name: Option<String>,
    mangled: Option<String>,
    spec_ref: Option<u64>,
    origin_ref: Option<u64>,
    ranges: Vec<Range>,
    inlines: Vec<InlineInstance>,
}

/// The streaming DIE consumer for one compilation unit.
///
/// Construct one handler per unit, drive it through the intake interface,
/// and call [`finish`](Self::finish) to run post-processing: the line
/// program, name resolution, and function/line pairing.
pub struct DwarfCuToModule<'d, 'ctx> {
    file_context: &'ctx mut FileContext<'d>,
    module: &'ctx mut Module,
    line_reader: &'ctx mut dyn LineToModuleHandler,
    ranges_reader: Option<&'ctx mut dyn RangesReader>,
    reporter: &'ctx mut dyn WarningReporter,

    cu_index: u64,
    address_size: u8,
    language: Language,
    stmt_list: Option<u64>,
    base_address: u64,

    functions: Vec<PendingFunction>,
    func_stack: Vec<PendingFunction>,
    inline_stack: Vec<InlineInstance>,
    lines: Vec<Line>,
    line_files: HashMap<u64, u64>,
}

impl<'d, 'ctx> DwarfCuToModule<'d, 'ctx> {
    /// Creates a handler for one compilation unit.
    pub fn new(
        file_context: &'ctx mut FileContext<'d>,
        module: &'ctx mut Module,
        line_reader: &'ctx mut dyn LineToModuleHandler,
        ranges_reader: Option<&'ctx mut dyn RangesReader>,
        reporter: &'ctx mut dyn WarningReporter,
    ) -> Self {
        DwarfCuToModule {
            file_context,
            module,
            line_reader,
            ranges_reader,
            reporter,
            cu_index: 0,
            address_size: 8,
            language: Language::Unknown,
            stmt_list: None,
            base_address: 0,
            functions: Vec::new(),
            func_stack: Vec::new(),
            inline_stack: Vec::new(),
            lines: Vec::new(),
            line_files: HashMap::new(),
        }
    }

    /// Announces the compilation unit header.
    ///
    /// Versions 2 through 5 are accepted; anything else rejects the unit.
    /// Other units of the same file are unaffected by a rejection.
    pub fn start_compilation_unit(
        &mut self,
        _header_offset: u64,
        address_size: u8,
        _offset_size: u8,
        _abbrev_offset: u64,
        version: u16,
    ) -> Result<(), DwarfError> {
        if !(2..=5).contains(&version) {
            return Err(DwarfErrorKind::UnsupportedVersion(version).into());
        }

        self.address_size = address_size;
        self.cu_index = self.file_context.cu_count;
        self.file_context.cu_count += 1;
        Ok(())
    }

    /// Announces the root DIE, which must be a compile unit DIE.
    pub fn start_root_die(&mut self, _offset: u64, tag: DwTag) -> Result<(), DwarfError> {
        if tag != constants::DW_TAG_compile_unit {
            return Err(DwarfErrorKind::BadRootDie(tag).into());
        }

        Ok(())
    }

    /// Processes an unsigned attribute of the root DIE.
    pub fn attr_unsigned(&mut self, at: DwAt, _form: DwForm, value: u64) {
        match at {
            constants::DW_AT_stmt_list => self.stmt_list = Some(value),
            constants::DW_AT_language => self.set_language(value as u16),
            constants::DW_AT_low_pc => self.base_address = value,
            _ => {}
        }
    }

    /// Processes a signed attribute of the root DIE.
    pub fn attr_signed(&mut self, at: DwAt, _form: DwForm, value: i64) {
        if at == constants::DW_AT_language {
            self.set_language(value as u16);
        }
    }

    /// Processes a reference attribute of the root DIE.
    pub fn attr_reference(&mut self, _at: DwAt, _form: DwForm, _target: u64) {}

    /// Processes a string attribute of the root DIE.
    pub fn attr_string(&mut self, at: DwAt, _form: DwForm, value: &str) {
        match at {
            constants::DW_AT_name => self.reporter.set_cu_name(value),
            constants::DW_AT_comp_dir => self.line_reader.start_compilation_unit(value),
            _ => {}
        }
    }

    /// Processes a buffer attribute of the root DIE.
    pub fn attr_buffer(&mut self, _at: DwAt, _form: DwForm, _value: &[u8]) {}

    /// Signals the end of the root DIE's attributes.
    ///
    /// Returns whether the reader should descend into the unit's children.
    pub fn end_attributes(&mut self) -> bool {
        true
    }

    /// Returns a handler for a child DIE of the root, or `None` for children
    /// that do not contribute symbols.
    ///
    /// Namespaces, class-like types, and subprograms are walked; everything
    /// else, including lexical blocks, is skipped.
    pub fn find_child_handler(&mut self, offset: u64, tag: DwTag) -> Option<DieHandler> {
        dispatch_child(String::new(), offset, tag)
    }

    /// Runs post-processing for the unit: reads the line program, resolves
    /// names, pairs functions with lines, and moves the results into the
    /// module.
    pub fn finish(&mut self) {
        self.read_line_program();

        // Resolve names and build module functions.
        let pending = std::mem::take(&mut self.functions);
        let mut functions = Vec::with_capacity(pending.len());
        let mut fixups = Vec::new();

        for mut func in pending {
            // Nested functions cannot be expressed in unqualified languages.
            if self.language == Language::Assembler && !func.parent_scope.is_empty() {
                continue;
            }

            let spec = match func.spec_ref {
                Some(target) => {
                    match self.file_context.lookup_specification(target, self.cu_index) {
                        Lookup::Found(spec) => Some(spec.clone()),
                        Lookup::OtherCu => {
                            self.reporter
                                .unhandled_inter_cu_reference(func.die_offset, target);
                            None
                        }
                        Lookup::Missing => None,
                    }
                }
                None => None,
            };
            let origin = match func.origin_ref {
                Some(target) => {
                    match self
                        .file_context
                        .lookup_abstract_origin(target, self.cu_index)
                    {
                        Lookup::Found(origin) => Some(origin.clone()),
                        Lookup::OtherCu => {
                            self.reporter
                                .unhandled_inter_cu_reference(func.die_offset, target);
                            None
                        }
                        Lookup::Missing => None,
                    }
                }
                None => None,
            };

            let missing_spec = func.spec_ref.is_some() && spec.is_none();
            let missing_origin = func.origin_ref.is_some() && origin.is_none();
            let defer = (missing_spec || missing_origin) && self.file_context.handle_inter_cu_refs;

            if !defer {
                if let (true, Some(target)) = (missing_spec, func.spec_ref) {
                    self.reporter.unknown_specification(func.die_offset, target);
                }
                if let (true, Some(target)) = (missing_origin, func.origin_ref) {
                    self.reporter
                        .unknown_abstract_origin(func.die_offset, target);
                }
            }

            let has_any_name_source = func.name.is_some()
                || func.mangled.is_some()
                || func.spec_ref.is_some()
                || func.origin_ref.is_some();
            if !has_any_name_source {
                self.reporter.unnamed_function(func.die_offset);
            }

            let resolved = compose_function_name(
                self.language,
                &func.parent_scope,
                func.name.as_deref(),
                func.mangled.as_deref(),
                spec.as_ref(),
                origin.as_ref(),
                self.reporter,
            );
            let (name, prefer_extern_name) = match resolved {
                Some(resolved) => resolved,
                None => continue,
            };

            remap_inline_files(&mut func.inlines, &self.line_files);

            if defer {
                fixups.push(FileFixup {
                    // Patched below once the module index is known.
                    function_index: 0,
                    die_offset: func.die_offset,
                    parent_scope: func.parent_scope.clone(),
                    name: func.name.clone(),
                    mangled: func.mangled.clone(),
                    spec_ref: func.spec_ref.filter(|_| missing_spec),
                    origin_ref: func.origin_ref.filter(|_| missing_origin),
                    language: self.language,
                });
            }

            functions.push((
                Function {
                    name,
                    address: func.ranges[0].address,
                    ranges: func.ranges,
                    parameter_size: 0,
                    prefer_extern_name,
                    is_multiple: false,
                    lines: Vec::new(),
                    inlines: func.inlines,
                },
                if defer { Some(fixups.len() - 1) } else { None },
            ));
        }

        functions.sort_by(|a, b| Function::compare_by_address(&a.0, &b.0));
        self.lines.sort_by_key(|line| line.address);

        let fixup_indices: Vec<Option<usize>> = functions.iter().map(|(_, i)| *i).collect();
        let mut functions: Vec<Function> = functions.into_iter().map(|(f, _)| f).collect();
        assign_lines_to_functions(&mut functions, &self.lines, &mut *self.reporter);

        for (function, fixup_index) in functions.into_iter().zip(fixup_indices) {
            if let Some(index) = fixup_index {
                fixups[index].function_index = self.module.functions().len();
            }
            self.module.add_function(function);
        }

        self.file_context.pending.append(&mut fixups);
    }

    fn set_language(&mut self, value: u16) {
        self.language = language_from_dwarf(DwLang(value));
    }

    fn read_line_program(&mut self) {
        let offset = match self.stmt_list {
            Some(offset) => offset,
            None => return,
        };

        let section = match self.file_context.sections.get(".debug_line") {
            Some(section) => *section,
            None => {
                self.reporter.missing_section(".debug_line");
                return;
            }
        };

        if offset >= section.len() as u64 {
            self.reporter.bad_line_info_offset(offset);
            return;
        }

        self.line_reader.read_program(
            section,
            offset,
            self.address_size,
            self.module,
            &mut self.lines,
            &mut self.line_files,
        );
    }
}

/// Maps the source language of a compilation unit to the common type.
fn language_from_dwarf(language: DwLang) -> Language {
    match language {
        constants::DW_LANG_C | constants::DW_LANG_C89 | constants::DW_LANG_C99
        | constants::DW_LANG_C11 => Language::C,
        constants::DW_LANG_C_plus_plus
        | constants::DW_LANG_C_plus_plus_03
        | constants::DW_LANG_C_plus_plus_11
        | constants::DW_LANG_C_plus_plus_14 => Language::Cpp,
        constants::DW_LANG_Cobol74 => Language::Cobol,
        constants::DW_LANG_Java => Language::Java,
        constants::DW_LANG_Mips_Assembler => Language::Assembler,
        constants::DW_LANG_ObjC => Language::ObjC,
        constants::DW_LANG_ObjC_plus_plus => Language::ObjCpp,
        constants::DW_LANG_Rust => Language::Rust,
        constants::DW_LANG_Swift => Language::Swift,
        _ => Language::Unknown,
    }
}

/// Joins a scope and a leaf name with the language's separator.
///
/// Returns `None` when the language has no notion of nested names, in which
/// case nested functions are suppressed entirely.
fn qualified_name(language: Language, enclosing: &str, name: &str) -> Option<String> {
    if enclosing.is_empty() {
        return Some(name.to_string());
    }

    let separator = match language {
        Language::Java => ".",
        Language::Assembler => return None,
        _ => "::",
    };

    Some(format!("{}{}{}", enclosing, separator, name))
}

/// Scope names always compose, even in unqualified languages; suppression
/// applies to functions only.
fn scope_name(language: Language, enclosing: &str, name: &str) -> String {
    qualified_name(language, enclosing, name)
        .unwrap_or_else(|| format!("{}::{}", enclosing, name))
}

/// Computes the final name of a function and whether the symbol table name
/// should be preferred over it.
///
/// The composition rules: a resolved specification supplies the base scope
/// (overriding the lexical parent) and its name is used unless the concrete
/// DIE has its own; an abstract origin supplies the whole name unless the
/// concrete DIE has its own; otherwise the lexical parent qualifies the DIE's
/// name. A mangled name, if present, replaces the composed name when it
/// demangles; Swift and Rust names pass through according to their language
/// rules.
///
/// Returns `None` if the function cannot be named in this language (nested
/// functions in assembler units).
fn compose_function_name(
    language: Language,
    parent_scope: &str,
    own_name: Option<&str>,
    own_mangled: Option<&str>,
    spec: Option<&Specification>,
    origin: Option<&AbstractOrigin>,
    reporter: &mut dyn WarningReporter,
) -> Option<(String, bool)> {
    let composed = if let Some(spec) = spec {
        let leaf = own_name.or(spec.name.as_deref());
        match leaf {
            Some(leaf) if !leaf.is_empty() => {
                Some(qualified_name(language, &spec.enclosing_name, leaf)?)
            }
            _ => None,
        }
    } else if let Some(origin) = origin {
        match own_name {
            Some(name) if !name.is_empty() => Some(qualified_name(language, parent_scope, name)?),
            _ => Some(origin.name.clone()),
        }
    } else {
        match own_name {
            Some(name) if !name.is_empty() => Some(qualified_name(language, parent_scope, name)?),
            _ => None,
        }
    };

    let mangled = own_mangled.or_else(|| spec.and_then(|s| s.mangled_name.as_deref()));

    if let Some(mangled) = mangled {
        match language {
            // Swift mangled names pass through untouched; there is no
            // in-process demangler for them.
            Language::Swift => return Some((mangled.to_string(), false)),
            Language::Rust => {
                let name = Name::new(mangled, NameMangling::Mangled, Language::Rust);
                let demangled = name
                    .demangle(DemangleOptions::complete())
                    .unwrap_or_else(|| mangled.to_string());
                return Some((demangled, false));
            }
            _ => {
                let name = Name::new(mangled, NameMangling::Mangled, Language::Cpp);
                match name.demangle(DemangleOptions::complete()) {
                    Some(demangled) => return Some((demangled, false)),
                    None => {
                        reporter.demangle_error(mangled);
                        let fallback = composed.unwrap_or_else(|| NAME_OMITTED.to_string());
                        return Some((fallback, true));
                    }
                }
            }
        }
    }

    Some((composed.unwrap_or_else(|| NAME_OMITTED.to_string()), false))
}

fn remap_inline_files(inlines: &mut [InlineInstance], line_files: &HashMap<u64, u64>) {
    for inline in inlines {
        if let Some(&mapped) = line_files.get(&inline.call_site_file_id) {
            inline.call_site_file_id = mapped;
        }
        remap_inline_files(&mut inline.children, line_files);
    }
}

/// Dispatches a child DIE to a handler based on its tag.
fn dispatch_child(parent_scope: String, offset: u64, tag: DwTag) -> Option<DieHandler> {
    match tag {
        constants::DW_TAG_namespace => Some(DieHandler::Namespace(ScopeHandler::new(
            parent_scope,
            offset,
            tag,
        ))),
        constants::DW_TAG_class_type
        | constants::DW_TAG_structure_type
        | constants::DW_TAG_union_type => Some(DieHandler::Type(ScopeHandler::new(
            parent_scope,
            offset,
            tag,
        ))),
        constants::DW_TAG_subprogram => {
            Some(DieHandler::Subprogram(FuncHandler::new(parent_scope, offset)))
        }
        _ => None,
    }
}

/// A handler for one DIE below the compilation unit root.
///
/// The variant is chosen by the parent's dispatch based on the child's tag;
/// DIEs without a variant are not walked.
pub enum DieHandler {
    /// A `DW_TAG_namespace` DIE.
    Namespace(ScopeHandler),
    /// A class, struct, or union type DIE.
    Type(ScopeHandler),
    /// A `DW_TAG_subprogram` DIE.
    Subprogram(FuncHandler),
    /// A `DW_TAG_inlined_subroutine` DIE inside a subprogram.
    Inline(InlineHandler),
}

impl DieHandler {
    /// Processes an unsigned attribute.
    pub fn attr_unsigned(&mut self, at: DwAt, form: DwForm, value: u64) {
        match self {
            DieHandler::Namespace(h) | DieHandler::Type(h) => h.attr_unsigned(at, form, value),
            DieHandler::Subprogram(h) => h.attr_unsigned(at, form, value),
            DieHandler::Inline(h) => h.attr_unsigned(at, form, value),
        }
    }

    /// Processes a signed attribute.
    pub fn attr_signed(&mut self, at: DwAt, form: DwForm, value: i64) {
        match self {
            DieHandler::Namespace(h) | DieHandler::Type(h) => {
                h.attr_unsigned(at, form, value as u64)
            }
            DieHandler::Subprogram(h) => h.attr_unsigned(at, form, value as u64),
            DieHandler::Inline(h) => h.attr_unsigned(at, form, value as u64),
        }
    }

    /// Processes a reference attribute.
    pub fn attr_reference(&mut self, at: DwAt, form: DwForm, target: u64) {
        match self {
            DieHandler::Namespace(h) | DieHandler::Type(h) => h.attr_reference(at, form, target),
            DieHandler::Subprogram(h) => h.attr_reference(at, form, target),
            DieHandler::Inline(h) => h.attr_reference(at, form, target),
        }
    }

    /// Processes a string attribute.
    pub fn attr_string(&mut self, at: DwAt, form: DwForm, value: &str) {
        match self {
            DieHandler::Namespace(h) | DieHandler::Type(h) => h.attr_string(at, form, value),
            DieHandler::Subprogram(h) => h.attr_string(at, form, value),
            DieHandler::Inline(h) => h.attr_string(at, form, value),
        }
    }

    /// Processes a buffer attribute. No handler currently consumes these.
    pub fn attr_buffer(&mut self, _at: DwAt, _form: DwForm, _value: &[u8]) {}

    /// Signals the end of this DIE's attributes.
    ///
    /// Returns whether the reader should descend into the DIE's children.
    pub fn end_attributes(&mut self, cu: &mut DwarfCuToModule<'_, '_>) -> bool {
        match self {
            DieHandler::Namespace(h) | DieHandler::Type(h) => h.end_attributes(cu),
            DieHandler::Subprogram(h) => h.end_attributes(cu),
            DieHandler::Inline(h) => h.end_attributes(cu),
        }
    }

    /// Returns a handler for a child of this DIE, or `None` for children
    /// that do not contribute symbols.
    pub fn find_child_handler(&mut self, offset: u64, tag: DwTag) -> Option<DieHandler> {
        match self {
            DieHandler::Namespace(h) | DieHandler::Type(h) => {
                dispatch_child(h.qualified.clone(), offset, tag)
            }
            DieHandler::Subprogram(h) => match tag {
                constants::DW_TAG_inlined_subroutine => Some(DieHandler::Inline(
                    InlineHandler::new(offset),
                )),
                constants::DW_TAG_subprogram => {
                    Some(DieHandler::Subprogram(FuncHandler::new(h.scope(), offset)))
                }
                _ => None,
            },
            DieHandler::Inline(_) => match tag {
                constants::DW_TAG_inlined_subroutine => {
                    Some(DieHandler::Inline(InlineHandler::new(offset)))
                }
                _ => None,
            },
        }
    }

    /// Signals that this DIE and all of its children have been processed.
    pub fn finish(self, cu: &mut DwarfCuToModule<'_, '_>) {
        match self {
            DieHandler::Namespace(_) | DieHandler::Type(_) => {}
            DieHandler::Subprogram(h) => h.finish(cu),
            DieHandler::Inline(h) => h.finish(cu),
        }
    }
}

/// Handles namespace and class-like DIEs, which contribute scope names.
pub struct ScopeHandler {
    parent_scope: String,
    die_offset: u64,
    tag: DwTag,
    name: Option<String>,
    mangled: Option<String>,
    declaration: bool,
    spec_ref: Option<u64>,
    qualified: String,
}

impl ScopeHandler {
    fn new(parent_scope: String, die_offset: u64, tag: DwTag) -> Self {
        ScopeHandler {
            parent_scope,
            die_offset,
            tag,
            name: None,
            mangled: None,
            declaration: false,
            spec_ref: None,
            qualified: String::new(),
        }
    }

    fn attr_unsigned(&mut self, at: DwAt, _form: DwForm, value: u64) {
        if at == constants::DW_AT_declaration {
            self.declaration = value != 0;
        }
    }

    fn attr_reference(&mut self, at: DwAt, _form: DwForm, target: u64) {
        if at == constants::DW_AT_specification {
            self.spec_ref = Some(target);
        }
    }

    fn attr_string(&mut self, at: DwAt, _form: DwForm, value: &str) {
        match at {
            constants::DW_AT_name => self.name = Some(value.to_string()),
            constants::DW_AT_linkage_name | constants::DW_AT_MIPS_linkage_name => {
                self.mangled = Some(value.to_string())
            }
            _ => {}
        }
    }

    fn placeholder(&self) -> &'static str {
        match self.tag {
            constants::DW_TAG_namespace => "(anonymous namespace)",
            constants::DW_TAG_structure_type => "<anonymous struct>",
            constants::DW_TAG_union_type => "<anonymous union>",
            _ => "<anonymous class>",
        }
    }

    fn end_attributes(&mut self, cu: &mut DwarfCuToModule<'_, '_>) -> bool {
        // Scope names are needed immediately to qualify children, so scope
        // specifications resolve eagerly rather than through promises.
        let mut enclosing = self.parent_scope.clone();
        let mut declared_name = None;

        if let Some(target) = self.spec_ref {
            match cu.file_context.lookup_specification(target, cu.cu_index) {
                Lookup::Found(spec) => {
                    enclosing = spec.enclosing_name.clone();
                    declared_name = spec.name.clone();
                }
                Lookup::OtherCu => {
                    cu.reporter
                        .unhandled_inter_cu_reference(self.die_offset, target);
                }
                Lookup::Missing => {
                    cu.reporter.unknown_specification(self.die_offset, target);
                }
            }
        }

        let leaf = self
            .name
            .clone()
            .or(declared_name)
            .unwrap_or_else(|| self.placeholder().to_string());
        self.qualified = scope_name(cu.language, &enclosing, &leaf);

        if self.declaration {
            cu.file_context.specifications.insert(
                self.die_offset,
                Specification {
                    cu_index: cu.cu_index,
                    enclosing_name: self.parent_scope.clone(),
                    name: self.name.clone(),
                    mangled_name: self.mangled.clone(),
                },
            );
        }

        true
    }
}

/// Handles subprogram DIEs: declarations, abstract instances, and concrete
/// functions.
pub struct FuncHandler {
    parent_scope: String,
    die_offset: u64,
    name: Option<String>,
    mangled: Option<String>,
    spec_ref: Option<u64>,
    origin_ref: Option<u64>,
    declaration: bool,
    inline_attr: bool,
    low_pc: Option<u64>,
    high_pc: Option<u64>,
    high_pc_is_addr: bool,
    ranges_offset: Option<u64>,
    concrete: bool,
}

impl FuncHandler {
    fn new(parent_scope: String, die_offset: u64) -> Self {
        FuncHandler {
            parent_scope,
            die_offset,
            name: None,
            mangled: None,
            spec_ref: None,
            origin_ref: None,
            declaration: false,
            inline_attr: false,
            low_pc: None,
            high_pc: None,
            high_pc_is_addr: false,
            ranges_offset: None,
            concrete: false,
        }
    }

    fn scope(&self) -> String {
        // Nested subprograms qualify against the enclosing function.
        match &self.name {
            Some(name) if !name.is_empty() => scope_name(Language::Unknown, &self.parent_scope, name),
            _ => self.parent_scope.clone(),
        }
    }

    fn attr_unsigned(&mut self, at: DwAt, form: DwForm, value: u64) {
        match at {
            constants::DW_AT_low_pc => self.low_pc = Some(value),
            constants::DW_AT_high_pc => {
                self.high_pc = Some(value);
                self.high_pc_is_addr = form == constants::DW_FORM_addr;
            }
            constants::DW_AT_ranges => self.ranges_offset = Some(value),
            constants::DW_AT_declaration => self.declaration = value != 0,
            // The presence of DW_AT_inline matters, not its value: even
            // DW_INL_not_inlined DIEs can be cited as abstract origins.
            constants::DW_AT_inline => self.inline_attr = true,
            _ => {}
        }
    }

    fn attr_reference(&mut self, at: DwAt, _form: DwForm, target: u64) {
        match at {
            constants::DW_AT_specification => self.spec_ref = Some(target),
            constants::DW_AT_abstract_origin => self.origin_ref = Some(target),
            constants::DW_AT_ranges => self.ranges_offset = Some(target),
            _ => {}
        }
    }

    fn attr_string(&mut self, at: DwAt, _form: DwForm, value: &str) {
        match at {
            constants::DW_AT_name => self.name = Some(value.to_string()),
            constants::DW_AT_linkage_name | constants::DW_AT_MIPS_linkage_name => {
                self.mangled = Some(value.to_string())
            }
            _ => {}
        }
    }

    fn resolve_ranges(&self, cu: &mut DwarfCuToModule<'_, '_>) -> Vec<Range> {
        if let Some(offset) = self.ranges_offset {
            let base = cu.base_address;
            return match cu.ranges_reader.as_deref_mut() {
                Some(reader) => reader.read_ranges(offset, base).unwrap_or_default(),
                None => {
                    cu.reporter.missing_section(".debug_ranges");
                    Vec::new()
                }
            };
        }

        let low = match self.low_pc {
            Some(low) => low,
            None => return Vec::new(),
        };
        let high = match self.high_pc {
            Some(high) if self.high_pc_is_addr => high,
            Some(length) => low.wrapping_add(length),
            None => return Vec::new(),
        };

        if high <= low {
            return Vec::new();
        }

        vec![Range::new(low, high - low)]
    }

    fn end_attributes(&mut self, cu: &mut DwarfCuToModule<'_, '_>) -> bool {
        if self.declaration {
            cu.file_context.specifications.insert(
                self.die_offset,
                Specification {
                    cu_index: cu.cu_index,
                    enclosing_name: self.parent_scope.clone(),
                    name: self.name.clone(),
                    mangled_name: self.mangled.clone(),
                },
            );
            return true;
        }

        if self.inline_attr {
            // Abstract instances resolve eagerly; they are recorded before
            // the concrete DIEs that cite them.
            let mut enclosing = self.parent_scope.clone();
            let mut declared_name = None;
            if let Some(target) = self.spec_ref {
                match cu.file_context.lookup_specification(target, cu.cu_index) {
                    Lookup::Found(spec) => {
                        enclosing = spec.enclosing_name.clone();
                        declared_name = spec.name.clone();
                    }
                    Lookup::OtherCu => {
                        cu.reporter
                            .unhandled_inter_cu_reference(self.die_offset, target);
                    }
                    Lookup::Missing => {
                        cu.reporter.unknown_specification(self.die_offset, target);
                    }
                }
            }

            let leaf = self.name.clone().or(declared_name);
            let name = match leaf {
                Some(leaf) if !leaf.is_empty() => {
                    qualified_name(cu.language, &enclosing, &leaf)
                        .unwrap_or_else(|| NAME_OMITTED.to_string())
                }
                _ => NAME_OMITTED.to_string(),
            };

            cu.file_context.abstract_origins.insert(
                self.die_offset,
                AbstractOrigin {
                    cu_index: cu.cu_index,
                    name,
                },
            );
            return true;
        }

        let ranges = self.resolve_ranges(cu);
        if !ranges.is_empty() {
            self.concrete = true;
            cu.func_stack.push(PendingFunction {
                die_offset: self.die_offset,
                parent_scope: self.parent_scope.clone(),
                name: self.name.clone(),
                mangled: self.mangled.clone(),
                spec_ref: self.spec_ref,
                origin_ref: self.origin_ref,
                ranges,
                inlines: Vec::new(),
            });
        }

        true
    }

    fn finish(self, cu: &mut DwarfCuToModule<'_, '_>) {
        if self.concrete {
            if let Some(func) = cu.func_stack.pop() {
                cu.functions.push(func);
            }
        }
    }
}

/// Handles inlined subroutine DIEs inside a subprogram.
pub struct InlineHandler {
    die_offset: u64,
    name: Option<String>,
    origin_ref: Option<u64>,
    low_pc: Option<u64>,
    high_pc: Option<u64>,
    high_pc_is_addr: bool,
    ranges_offset: Option<u64>,
    call_file: Option<u64>,
    call_line: Option<u64>,
    pushed: bool,
}

impl InlineHandler {
    fn new(die_offset: u64) -> Self {
        InlineHandler {
            die_offset,
            name: None,
            origin_ref: None,
            low_pc: None,
            high_pc: None,
            high_pc_is_addr: false,
            ranges_offset: None,
            call_file: None,
            call_line: None,
            pushed: false,
        }
    }

    fn attr_unsigned(&mut self, at: DwAt, form: DwForm, value: u64) {
        match at {
            constants::DW_AT_low_pc => self.low_pc = Some(value),
            constants::DW_AT_high_pc => {
                self.high_pc = Some(value);
                self.high_pc_is_addr = form == constants::DW_FORM_addr;
            }
            constants::DW_AT_ranges => self.ranges_offset = Some(value),
            constants::DW_AT_call_file => self.call_file = Some(value),
            constants::DW_AT_call_line => self.call_line = Some(value),
            _ => {}
        }
    }

    fn attr_reference(&mut self, at: DwAt, _form: DwForm, target: u64) {
        match at {
            constants::DW_AT_abstract_origin => self.origin_ref = Some(target),
            constants::DW_AT_ranges => self.ranges_offset = Some(target),
            _ => {}
        }
    }

    fn attr_string(&mut self, at: DwAt, _form: DwForm, value: &str) {
        if at == constants::DW_AT_name {
            self.name = Some(value.to_string());
        }
    }

    fn resolve_ranges(&self, cu: &mut DwarfCuToModule<'_, '_>) -> Vec<Range> {
        if let Some(offset) = self.ranges_offset {
            let base = cu.base_address;
            return match cu.ranges_reader.as_deref_mut() {
                Some(reader) => reader.read_ranges(offset, base).unwrap_or_default(),
                None => Vec::new(),
            };
        }

        let low = match self.low_pc {
            Some(low) => low,
            None => return Vec::new(),
        };
        let high = match self.high_pc {
            Some(high) if self.high_pc_is_addr => high,
            Some(length) => low.wrapping_add(length),
            None => return Vec::new(),
        };

        if high <= low {
            return Vec::new();
        }

        vec![Range::new(low, high - low)]
    }

    fn end_attributes(&mut self, cu: &mut DwarfCuToModule<'_, '_>) -> bool {
        let ranges = self.resolve_ranges(cu);
        if ranges.is_empty() {
            return true;
        }

        let name = match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => match self.origin_ref {
                Some(target) => {
                    match cu.file_context.lookup_abstract_origin(target, cu.cu_index) {
                        Lookup::Found(origin) => origin.name.clone(),
                        Lookup::OtherCu => {
                            cu.reporter
                                .unhandled_inter_cu_reference(self.die_offset, target);
                            NAME_OMITTED.to_string()
                        }
                        Lookup::Missing => {
                            cu.reporter
                                .unknown_abstract_origin(self.die_offset, target);
                            NAME_OMITTED.to_string()
                        }
                    }
                }
                None => NAME_OMITTED.to_string(),
            },
        };

        let origin_id = cu.module.find_inline_origin(&name);
        cu.inline_stack.push(InlineInstance {
            call_site_file_id: self.call_file.unwrap_or(0),
            call_site_line: self.call_line.unwrap_or(0),
            origin_id,
            ranges,
            children: Vec::new(),
        });
        self.pushed = true;

        true
    }

    fn finish(self, cu: &mut DwarfCuToModule<'_, '_>) {
        if !self.pushed {
            return;
        }

        if let Some(instance) = cu.inline_stack.pop() {
            match cu.inline_stack.last_mut() {
                Some(parent) => parent.children.push(instance),
                None => match cu.func_stack.last_mut() {
                    Some(func) => func.inlines.push(instance),
                    // An inline without an enclosing function has nowhere to
                    // live; drop it.
                    None => {}
                },
            }
        }
    }
}

/// Pairs sorted functions with sorted lines, trimming lines at function
/// boundaries and reporting coverage gaps.
fn assign_lines_to_functions(
    functions: &mut [Function],
    lines: &[Line],
    reporter: &mut dyn WarningReporter,
) {
    // Flatten all function ranges into one sorted sequence.
    let mut ranges: Vec<(Range, usize)> = Vec::new();
    for (index, function) in functions.iter().enumerate() {
        for range in &function.ranges {
            ranges.push((*range, index));
        }
    }
    ranges.sort_by_key(|(range, _)| range.address);

    for line in lines {
        let line_end = line.end();
        let wrapped = line.address.checked_add(line.size).is_none();
        let mut pos = line.address;
        let mut used = false;
        let mut warned = false;

        while pos < line_end {
            // The candidate range is the last one starting at or before pos.
            let idx = ranges.partition_point(|(range, _)| range.address <= pos);
            let covering = idx
                .checked_sub(1)
                .map(|i| ranges[i])
                .filter(|(range, _)| range.contains(pos));

            match covering {
                Some((range, function_index)) => {
                    let segment_end = line_end.min(range.end());
                    functions[function_index].lines.push(Line {
                        address: pos,
                        size: segment_end - pos,
                        file_id: line.file_id,
                        number: line.number,
                    });
                    used = true;
                    pos = segment_end;
                }
                None => {
                    let next_start = ranges
                        .get(idx)
                        .map(|(range, _)| range.address)
                        .unwrap_or(line_end);
                    // Compilers attribute alignment padding after a function
                    // to its last line while excluding it from the function's
                    // address range. If part of this line was already used,
                    // assume that is what happened and stay quiet.
                    if !used && !warned {
                        reporter.uncovered_line(line);
                        warned = true;
                    }
                    pos = line_end.min(next_start);
                }
            }
        }

        // A line extending past the end of the address space cannot be fully
        // covered by any function.
        if wrapped && !warned {
            reporter.uncovered_line(line);
        }
    }

    // A function any part of which has no line data is reported exactly
    // once. Lines were attributed in address order, so a single sweep per
    // function suffices.
    for function in functions.iter() {
        let mut uncovered = false;
        for range in &function.ranges {
            let mut pos = range.address;
            for line in &function.lines {
                if line.address >= range.end() {
                    break;
                }
                if line.address > pos {
                    uncovered = true;
                }
                pos = pos.max(line.end());
            }
            if pos < range.end() {
                uncovered = true;
            }
        }

        if uncovered {
            reporter.uncovered_function(function);
        }
    }
}
