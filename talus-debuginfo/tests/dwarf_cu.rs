//! Tests for the streaming DWARF consumer, driving the intake interface the
//! way a DWARF reader would.

use std::collections::HashMap;

use gimli::constants::*;
use gimli::{DwForm, DwTag};

use talus_debuginfo::dwarf::{
    DieHandler, DwarfCuToModule, DwarfErrorKind, FileContext, LineToModuleHandler, WarningReporter,
};
use talus_debuginfo::{Function, Line, Module};

const DUMMY_LINE_PROGRAM: &[u8] = b"lots of fun data";

/// A warning reporter that records everything it is told.
#[derive(Default)]
struct RecordingReporter {
    cu_names: Vec<String>,
    unknown_specifications: Vec<(u64, u64)>,
    unknown_abstract_origins: Vec<(u64, u64)>,
    missing_sections: Vec<String>,
    bad_line_info_offsets: Vec<u64>,
    uncovered_functions: usize,
    uncovered_lines: usize,
    unnamed_functions: Vec<u64>,
    demangle_errors: Vec<String>,
    inter_cu_references: Vec<(u64, u64)>,
}

impl RecordingReporter {
    fn assert_silent(&self) {
        assert_eq!(self.unknown_specifications, []);
        assert_eq!(self.unknown_abstract_origins, []);
        assert_eq!(self.missing_sections, Vec::<String>::new());
        assert_eq!(self.bad_line_info_offsets, []);
        assert_eq!(self.uncovered_functions, 0);
        assert_eq!(self.uncovered_lines, 0);
        assert_eq!(self.unnamed_functions, []);
        assert_eq!(self.demangle_errors, Vec::<String>::new());
        assert_eq!(self.inter_cu_references, []);
    }
}

impl WarningReporter for RecordingReporter {
    fn set_cu_name(&mut self, name: &str) {
        self.cu_names.push(name.to_string());
    }

    fn unknown_specification(&mut self, offset: u64, target: u64) {
        self.unknown_specifications.push((offset, target));
    }

    fn unknown_abstract_origin(&mut self, offset: u64, target: u64) {
        self.unknown_abstract_origins.push((offset, target));
    }

    fn missing_section(&mut self, name: &str) {
        self.missing_sections.push(name.to_string());
    }

    fn bad_line_info_offset(&mut self, offset: u64) {
        self.bad_line_info_offsets.push(offset);
    }

    fn uncovered_function(&mut self, _function: &Function) {
        self.uncovered_functions += 1;
    }

    fn uncovered_line(&mut self, _line: &Line) {
        self.uncovered_lines += 1;
    }

    fn unnamed_function(&mut self, offset: u64) {
        self.unnamed_functions.push(offset);
    }

    fn demangle_error(&mut self, input: &str) {
        self.demangle_errors.push(input.to_string());
    }

    fn unhandled_inter_cu_reference(&mut self, offset: u64, target: u64) {
        self.inter_cu_references.push((offset, target));
    }
}

/// A line reader that appends a preset list of lines.
#[derive(Default)]
struct TestLineReader {
    lines: Vec<Line>,
    files: Vec<(u64, u64)>,
    compilation_dirs: Vec<String>,
    read_calls: usize,
}

impl LineToModuleHandler for TestLineReader {
    fn start_compilation_unit(&mut self, compilation_dir: &str) {
        self.compilation_dirs.push(compilation_dir.to_string());
    }

    fn read_program(
        &mut self,
        _section: &[u8],
        _offset: u64,
        _address_size: u8,
        _module: &mut Module,
        lines: &mut Vec<Line>,
        files: &mut HashMap<u64, u64>,
    ) {
        self.read_calls += 1;
        lines.extend(self.lines.iter().cloned());
        files.extend(self.files.iter().copied());
    }
}

struct Fixture {
    module: Module,
    file_context: FileContext<'static>,
    reporter: RecordingReporter,
    line_reader: TestLineReader,
    language: Option<(u64, bool)>,
}

impl Fixture {
    fn new() -> Self {
        let mut file_context = FileContext::new("dwarf-filename", true);
        file_context.add_section(".debug_line", DUMMY_LINE_PROGRAM);

        Fixture {
            module: Module::new("module-name", "module-os", "module-arch", "module-id"),
            file_context,
            reporter: RecordingReporter::default(),
            line_reader: TestLineReader::default(),
            language: None,
        }
    }

    fn push_line(&mut self, address: u64, size: u64, filename: &str, number: u64) {
        let file_id = self.module.find_file(filename);
        self.line_reader.lines.push(Line {
            address,
            size,
            file_id,
            number,
        });
    }

    fn set_language(&mut self, language: gimli::DwLang, signed: bool) {
        self.language = Some((language.0 as u64, signed));
    }

    fn raw_cu<'a>(&'a mut self) -> DwarfCuToModule<'static, 'a> {
        DwarfCuToModule::new(
            &mut self.file_context,
            &mut self.module,
            &mut self.line_reader,
            None,
            &mut self.reporter,
        )
    }

    /// Mirrors the start of a compilation unit: header, root DIE, root
    /// attributes, leaving the handler ready to hear about children.
    fn start_cu<'a>(&'a mut self) -> DwarfCuToModule<'static, 'a> {
        let has_lines = !self.line_reader.lines.is_empty();
        let language = self.language;

        let mut cu = self.raw_cu();
        cu.start_compilation_unit(0x51182ec307610b51, 0x81, 0x44, 0x4241b4f33720dd5c, 3)
            .unwrap();
        cu.start_root_die(0x02e56bfbda9e7337, DW_TAG_compile_unit)
            .unwrap();
        cu.attr_string(DW_AT_name, DW_FORM_strp, "compilation-unit-name");
        if has_lines {
            cu.attr_unsigned(DW_AT_stmt_list, DW_FORM_ref4, 0);
        }
        if let Some((language, signed)) = language {
            if signed {
                cu.attr_signed(DW_AT_language, DW_FORM_sdata, language as i64);
            } else {
                cu.attr_unsigned(DW_AT_language, DW_FORM_udata, language);
            }
        }
        assert!(cu.end_attributes());
        cu
    }

    fn functions(&self) -> Vec<&Function> {
        self.module.functions().iter().collect()
    }

    fn assert_function(&self, index: usize, name: &str, address: u64, size: u64) {
        let functions = self.functions();
        let function = functions[index];
        assert_eq!(function.name, name);
        assert_eq!(function.address, address);
        assert_eq!(function.ranges[0].size, size);
        assert_eq!(function.parameter_size, 0);
    }

    fn assert_line(&self, func: usize, line: usize, address: u64, size: u64, number: u64) {
        let functions = self.functions();
        let record = &functions[func].lines[line];
        assert_eq!(record.address, address);
        assert_eq!(record.size, size);
        assert_eq!(record.number, number);
    }
}

enum Parent<'h> {
    Root,
    Die(&'h mut DieHandler),
}

fn find_child(
    cu: &mut DwarfCuToModule<'_, '_>,
    parent: &mut Parent<'_>,
    offset: u64,
    tag: DwTag,
) -> Option<DieHandler> {
    match parent {
        Parent::Root => cu.find_child_handler(offset, tag),
        Parent::Die(handler) => handler.find_child_handler(offset, tag),
    }
}

/// Attributes no handler should care about.
fn process_strange_attributes(handler: &mut DieHandler) {
    handler.attr_unsigned(gimli::DwAt(0xf560), DwForm(0x41), 0xa592571997facda1);
    handler.attr_signed(gimli::DwAt(0x8538), DwForm(0x0f), 0x12602a4e3bf1f446);
    handler.attr_reference(gimli::DwAt(0xf7f7), DwForm(0x82), 0x50fddef44734fdec);
    handler.attr_buffer(gimli::DwAt(0xa55f), DwForm(0x2f), b"frobynode");
    handler.attr_string(gimli::DwAt(0x2f43), DwForm(0x89), "strange string");
}

fn define_function(
    cu: &mut DwarfCuToModule<'_, '_>,
    mut parent: Parent<'_>,
    name: &str,
    address: u64,
    size: u64,
    mangled_name: Option<&str>,
    high_pc_form: DwForm,
) {
    let mut func = find_child(cu, &mut parent, 0xe34797c7e68590a8, DW_TAG_subprogram).unwrap();
    func.attr_string(DW_AT_name, DW_FORM_strp, name);
    func.attr_unsigned(DW_AT_low_pc, DW_FORM_addr, address);

    let high_pc = if high_pc_form == DW_FORM_addr {
        address + size
    } else {
        size
    };
    func.attr_unsigned(DW_AT_high_pc, high_pc_form, high_pc);

    if let Some(mangled) = mangled_name {
        func.attr_string(DW_AT_MIPS_linkage_name, DW_FORM_strp, mangled);
    }

    process_strange_attributes(&mut func);
    assert!(func.end_attributes(cu));
    func.finish(cu);
}

fn start_named_die(
    cu: &mut DwarfCuToModule<'_, '_>,
    mut parent: Parent<'_>,
    tag: DwTag,
    name: &str,
) -> DieHandler {
    let mut handler = find_child(cu, &mut parent, 0x8f4c783c0467c989, tag).unwrap();
    handler.attr_string(DW_AT_name, DW_FORM_strp, name);
    process_strange_attributes(&mut handler);
    assert!(handler.end_attributes(cu));
    handler
}

fn start_specified_die(
    cu: &mut DwarfCuToModule<'_, '_>,
    mut parent: Parent<'_>,
    tag: DwTag,
    specification: u64,
    name: Option<&str>,
) -> DieHandler {
    let mut handler = find_child(cu, &mut parent, 0x8f4c783c0467c989, tag).unwrap();
    if let Some(name) = name {
        handler.attr_string(DW_AT_name, DW_FORM_strp, name);
    }
    handler.attr_reference(DW_AT_specification, DW_FORM_ref4, specification);
    assert!(handler.end_attributes(cu));
    handler
}

fn declaration_die(
    cu: &mut DwarfCuToModule<'_, '_>,
    mut parent: Parent<'_>,
    offset: u64,
    tag: DwTag,
    name: &str,
    mangled_name: &str,
) {
    let mut die = find_child(cu, &mut parent, offset, tag).unwrap();
    if !name.is_empty() {
        die.attr_string(DW_AT_name, DW_FORM_strp, name);
    }
    if !mangled_name.is_empty() {
        die.attr_string(DW_AT_MIPS_linkage_name, DW_FORM_strp, mangled_name);
    }
    die.attr_unsigned(DW_AT_declaration, DW_FORM_flag, 1);
    assert!(die.end_attributes(cu));
    die.finish(cu);
}

fn definition_die(
    cu: &mut DwarfCuToModule<'_, '_>,
    mut parent: Parent<'_>,
    tag: DwTag,
    specification: u64,
    name: &str,
    address: u64,
    size: u64,
) {
    let mut die = find_child(cu, &mut parent, 0x6ccfea031a9e6cc9, tag).unwrap();
    die.attr_reference(DW_AT_specification, DW_FORM_ref4, specification);
    if !name.is_empty() {
        die.attr_string(DW_AT_name, DW_FORM_strp, name);
    }
    if size != 0 {
        die.attr_unsigned(DW_AT_low_pc, DW_FORM_addr, address);
        die.attr_unsigned(DW_AT_high_pc, DW_FORM_addr, address + size);
    }
    assert!(die.end_attributes(cu));
    die.finish(cu);
}

fn abstract_instance_die(
    cu: &mut DwarfCuToModule<'_, '_>,
    mut parent: Parent<'_>,
    offset: u64,
    specification: u64,
    name: &str,
    signed_inline_attr: bool,
) {
    let mut die = find_child(cu, &mut parent, offset, DW_TAG_subprogram).unwrap();
    if specification != 0 {
        die.attr_reference(DW_AT_specification, DW_FORM_ref4, specification);
    }
    if signed_inline_attr {
        die.attr_signed(DW_AT_inline, DW_FORM_sdata, DW_INL_inlined.0 as i64);
    } else {
        die.attr_unsigned(DW_AT_inline, DW_FORM_data1, DW_INL_inlined.0 as u64);
    }
    if !name.is_empty() {
        die.attr_string(DW_AT_name, DW_FORM_strp, name);
    }
    assert!(die.end_attributes(cu));
    die.finish(cu);
}

fn define_inline_instance_die(
    cu: &mut DwarfCuToModule<'_, '_>,
    mut parent: Parent<'_>,
    name: &str,
    origin: u64,
    address: u64,
    size: u64,
) {
    let mut func = find_child(cu, &mut parent, 0x11c70f94c6e87ccd, DW_TAG_subprogram).unwrap();
    if !name.is_empty() {
        func.attr_string(DW_AT_name, DW_FORM_strp, name);
    }
    func.attr_unsigned(DW_AT_low_pc, DW_FORM_addr, address);
    func.attr_unsigned(DW_AT_high_pc, DW_FORM_addr, address + size);
    func.attr_reference(DW_AT_abstract_origin, DW_FORM_ref4, origin);
    process_strange_attributes(&mut func);
    assert!(func.end_attributes(cu));
    func.finish(cu);
}

#[test]
fn one_func() {
    let mut fixture = Fixture::new();
    fixture.push_line(0x938cf8c07def4d34, 0x55592d727f6cd01f, "line-file", 246571772);

    let mut cu = fixture.start_cu();
    define_function(
        &mut cu,
        Parent::Root,
        "function1",
        0x938cf8c07def4d34,
        0x55592d727f6cd01f,
        None,
        DW_FORM_addr,
    );
    cu.finish();
    drop(cu);

    assert_eq!(fixture.functions().len(), 1);
    fixture.assert_function(0, "function1", 0x938cf8c07def4d34, 0x55592d727f6cd01f);
    assert_eq!(fixture.functions()[0].lines.len(), 1);
    fixture.assert_line(0, 0, 0x938cf8c07def4d34, 0x55592d727f6cd01f, 246571772);
    assert_eq!(fixture.line_reader.read_calls, 1);
    assert_eq!(fixture.reporter.cu_names, ["compilation-unit-name"]);
    fixture.reporter.assert_silent();
}

#[test]
fn one_func_high_pc_is_length() {
    let mut fixture = Fixture::new();
    fixture.push_line(0x938cf8c07def4d34, 0x55592d727f6cd01f, "line-file", 246571772);

    let mut cu = fixture.start_cu();
    define_function(
        &mut cu,
        Parent::Root,
        "function1",
        0x938cf8c07def4d34,
        0x55592d727f6cd01f,
        None,
        DW_FORM_udata,
    );
    cu.finish();
    drop(cu);

    assert_eq!(fixture.functions().len(), 1);
    fixture.assert_function(0, "function1", 0x938cf8c07def4d34, 0x55592d727f6cd01f);
}

#[test]
fn mangled_name() {
    let mut fixture = Fixture::new();
    fixture.push_line(0x938cf8c07def4d34, 0x55592d727f6cd01f, "line-file", 246571772);

    let mut cu = fixture.start_cu();
    define_function(
        &mut cu,
        Parent::Root,
        "function1",
        0x938cf8c07def4d34,
        0x55592d727f6cd01f,
        Some("_ZN1n1fEi"),
        DW_FORM_addr,
    );
    cu.finish();
    drop(cu);

    fixture.assert_function(0, "n::f(int)", 0x938cf8c07def4d34, 0x55592d727f6cd01f);
}

#[test]
fn irrelevant_root_children() {
    let mut fixture = Fixture::new();
    let mut cu = fixture.start_cu();
    assert!(cu
        .find_child_handler(0x7db32bff4e2dcfb1, DW_TAG_lexical_block)
        .is_none());
}

#[test]
fn irrelevant_named_scope_children() {
    let mut fixture = Fixture::new();
    let mut cu = fixture.start_cu();
    let mut class_handler = start_named_die(&mut cu, Parent::Root, DW_TAG_class_type, "class_A");
    assert!(class_handler
        .find_child_handler(0x02e55999b865e4e9, DW_TAG_lexical_block)
        .is_none());
}

#[test]
fn inline_function() {
    let mut fixture = Fixture::new();
    fixture.push_line(0x1758a0f941b71efb, 0x1cf154f1f545e146, "line-file", 75173118);

    let mut cu = fixture.start_cu();
    abstract_instance_die(&mut cu, Parent::Root, 0x1e8dac5d507ed7ab, 0, "inline-name", false);
    define_inline_instance_die(
        &mut cu,
        Parent::Root,
        "",
        0x1e8dac5d507ed7ab,
        0x1758a0f941b71efb,
        0x1cf154f1f545e146,
    );
    cu.finish();
    drop(cu);

    assert_eq!(fixture.functions().len(), 1);
    fixture.assert_function(0, "inline-name", 0x1758a0f941b71efb, 0x1cf154f1f545e146);
    fixture.reporter.assert_silent();
}

#[test]
fn inline_function_signed_attribute() {
    let mut fixture = Fixture::new();
    fixture.push_line(0x1758a0f941b71efb, 0x1cf154f1f545e146, "line-file", 75173118);

    let mut cu = fixture.start_cu();
    abstract_instance_die(&mut cu, Parent::Root, 0x1e8dac5d507ed7ab, 0, "inline-name", true);
    define_inline_instance_die(
        &mut cu,
        Parent::Root,
        "",
        0x1e8dac5d507ed7ab,
        0x1758a0f941b71efb,
        0x1cf154f1f545e146,
    );
    cu.finish();
    drop(cu);

    fixture.assert_function(0, "inline-name", 0x1758a0f941b71efb, 0x1cf154f1f545e146);
}

#[test]
fn unknown_abstract_origin() {
    let mut fixture = Fixture::new();
    fixture.push_line(0x1758a0f941b71efb, 0x1cf154f1f545e146, "line-file", 75173118);

    let mut cu = fixture.start_cu();
    abstract_instance_die(&mut cu, Parent::Root, 0x1e8dac5d507ed7ab, 0, "inline-name", false);
    define_inline_instance_die(
        &mut cu,
        Parent::Root,
        "",
        1,
        0x1758a0f941b71efb,
        0x1cf154f1f545e146,
    );
    cu.finish();
    drop(cu);

    // The reference stays unresolved; with whole-file processing enabled the
    // warning surfaces when the file context finishes.
    fixture
        .file_context
        .finish(&mut fixture.module, &mut fixture.reporter);

    assert_eq!(fixture.functions().len(), 1);
    fixture.assert_function(0, "<name omitted>", 0x1758a0f941b71efb, 0x1cf154f1f545e146);
    assert_eq!(fixture.reporter.unknown_abstract_origins.len(), 1);
}

#[test]
fn unnamed_function() {
    let mut fixture = Fixture::new();
    fixture.push_line(0x72b80e41a0ac1d40, 0x537174f231ee181c, "line-file", 14044850);

    let mut cu = fixture.start_cu();
    define_function(
        &mut cu,
        Parent::Root,
        "",
        0x72b80e41a0ac1d40,
        0x537174f231ee181c,
        None,
        DW_FORM_addr,
    );
    cu.finish();
    drop(cu);

    fixture.assert_function(0, "<name omitted>", 0x72b80e41a0ac1d40, 0x537174f231ee181c);
    // The name attribute was present, just empty; that is not warned about.
    assert_eq!(fixture.reporter.unnamed_functions, []);
}

#[test]
fn gcc_alignment_stretch() {
    let mut fixture = Fixture::new();
    fixture.push_line(10, 10, "line-file", 63351048);
    fixture.push_line(20, 10, "line-file", 61661044);

    let mut cu = fixture.start_cu();
    define_function(&mut cu, Parent::Root, "function1", 10, 5, None, DW_FORM_addr);
    // Five-byte alignment gap between the functions, covered by the first
    // line. This must not be warned about.
    define_function(&mut cu, Parent::Root, "function2", 20, 10, None, DW_FORM_addr);
    cu.finish();
    drop(cu);

    assert_eq!(fixture.functions().len(), 2);
    fixture.assert_function(0, "function1", 10, 5);
    assert_eq!(fixture.functions()[0].lines.len(), 1);
    fixture.assert_line(0, 0, 10, 5, 63351048);
    fixture.assert_function(1, "function2", 20, 10);
    assert_eq!(fixture.functions()[1].lines.len(), 1);
    fixture.assert_line(1, 0, 20, 10, 61661044);
    fixture.reporter.assert_silent();
}

#[test]
fn gap_then_function() {
    let mut fixture = Fixture::new();
    fixture.push_line(20, 2, "line-file-2", 174314698);
    fixture.push_line(10, 2, "line-file-1", 263008005);

    let mut cu = fixture.start_cu();
    define_function(&mut cu, Parent::Root, "function1", 10, 2, None, DW_FORM_addr);
    define_function(&mut cu, Parent::Root, "function2", 20, 2, None, DW_FORM_addr);
    cu.finish();
    drop(cu);

    fixture.assert_function(0, "function1", 10, 2);
    fixture.assert_line(0, 0, 10, 2, 263008005);
    fixture.assert_function(1, "function2", 20, 2);
    fixture.assert_line(1, 0, 20, 2, 174314698);
    fixture.reporter.assert_silent();
}

#[test]
fn funcs_no_lines() {
    let mut fixture = Fixture::new();

    let mut cu = fixture.start_cu();
    define_function(
        &mut cu,
        Parent::Root,
        "function1",
        0x127da12ffcf5c51f,
        0x1000,
        None,
        DW_FORM_addr,
    );
    cu.finish();
    drop(cu);

    fixture.assert_function(0, "function1", 0x127da12ffcf5c51f, 0x1000);
    assert_eq!(fixture.reporter.uncovered_functions, 1);
}

#[test]
fn lines_no_funcs() {
    let mut fixture = Fixture::new();
    fixture.push_line(40, 2, "line-file", 82485646);

    let mut cu = fixture.start_cu();
    cu.finish();
    drop(cu);

    assert_eq!(fixture.functions().len(), 0);
    assert_eq!(fixture.reporter.uncovered_lines, 1);
}

#[test]
fn warn_once_func() {
    let mut fixture = Fixture::new();
    fixture.push_line(20, 1, "line-file-2", 262951329);
    fixture.push_line(11, 1, "line-file-1", 219964021);

    let mut cu = fixture.start_cu();
    define_function(&mut cu, Parent::Root, "function", 10, 11, None, DW_FORM_addr);
    cu.finish();
    drop(cu);

    fixture.assert_function(0, "function", 10, 11);
    assert_eq!(fixture.functions()[0].lines.len(), 2);
    fixture.assert_line(0, 0, 11, 1, 219964021);
    fixture.assert_line(0, 1, 20, 1, 262951329);
    assert_eq!(fixture.reporter.uncovered_functions, 1);
}

#[test]
fn warn_once_line() {
    let mut fixture = Fixture::new();
    fixture.push_line(10, 20, "filename1", 118581871);

    let mut cu = fixture.start_cu();
    define_function(&mut cu, Parent::Root, "function1", 11, 1, None, DW_FORM_addr);
    define_function(&mut cu, Parent::Root, "function2", 13, 1, None, DW_FORM_addr);
    cu.finish();
    drop(cu);

    fixture.assert_line(0, 0, 11, 1, 118581871);
    fixture.assert_line(1, 0, 13, 1, 118581871);
    assert_eq!(fixture.reporter.uncovered_lines, 1);
}

#[test]
fn line_at_end_of_address_space() {
    let mut fixture = Fixture::new();
    fixture.push_line(0xfffffffffffffff0, 16, "line-file", 63351048);

    let mut cu = fixture.start_cu();
    define_function(
        &mut cu,
        Parent::Root,
        "function1",
        0xfffffffffffffff0,
        6,
        None,
        DW_FORM_addr,
    );
    define_function(
        &mut cu,
        Parent::Root,
        "function2",
        0xfffffffffffffffa,
        5,
        None,
        DW_FORM_addr,
    );
    cu.finish();
    drop(cu);

    fixture.assert_line(0, 0, 0xfffffffffffffff0, 6, 63351048);
    fixture.assert_line(1, 0, 0xfffffffffffffffa, 5, 63351048);
    assert_eq!(fixture.reporter.uncovered_lines, 1);
}

#[test]
fn qualified_names_in_enclosures() {
    for tag in [
        DW_TAG_class_type,
        DW_TAG_structure_type,
        DW_TAG_union_type,
        DW_TAG_namespace,
    ] {
        let mut fixture = Fixture::new();
        fixture.set_language(DW_LANG_C_plus_plus, false);
        fixture.push_line(10, 1, "filename1", 69819327);
        fixture.push_line(20, 1, "filename2", 95115701);

        let mut cu = fixture.start_cu();
        let mut enclosure = start_named_die(&mut cu, Parent::Root, tag, "Enclosure");
        define_function(
            &mut cu,
            Parent::Die(&mut enclosure),
            "func_B",
            10,
            1,
            None,
            DW_FORM_addr,
        );
        define_function(
            &mut cu,
            Parent::Die(&mut enclosure),
            "func_C",
            20,
            1,
            None,
            DW_FORM_addr,
        );
        enclosure.finish(&mut cu);
        cu.finish();
        drop(cu);

        fixture.assert_function(0, "Enclosure::func_B", 10, 1);
        fixture.assert_function(1, "Enclosure::func_C", 20, 1);
    }
}

#[test]
fn function_in_class_in_struct_in_namespace() {
    let mut fixture = Fixture::new();
    fixture.set_language(DW_LANG_C_plus_plus, false);
    fixture.push_line(10, 1, "filename1", 69819327);

    let mut cu = fixture.start_cu();
    let mut namespace = start_named_die(&mut cu, Parent::Root, DW_TAG_namespace, "namespace_A");
    let mut strukt = start_named_die(
        &mut cu,
        Parent::Die(&mut namespace),
        DW_TAG_structure_type,
        "struct_B",
    );
    let mut class = start_named_die(
        &mut cu,
        Parent::Die(&mut strukt),
        DW_TAG_class_type,
        "class_C",
    );
    define_function(
        &mut cu,
        Parent::Die(&mut class),
        "function_D",
        10,
        1,
        None,
        DW_FORM_addr,
    );
    class.finish(&mut cu);
    strukt.finish(&mut cu);
    namespace.finish(&mut cu);
    cu.finish();
    drop(cu);

    fixture.assert_function(0, "namespace_A::struct_B::class_C::function_D", 10, 1);
}

#[test]
fn qualified_for_language() {
    let cases: &[(gimli::DwLang, Option<&str>)] = &[
        (gimli::DwLang(0), Some("class_A::function_B")),
        (DW_LANG_C, Some("class_A::function_B")),
        (DW_LANG_C89, Some("class_A::function_B")),
        (DW_LANG_C99, Some("class_A::function_B")),
        (DW_LANG_C_plus_plus, Some("class_A::function_B")),
        (DW_LANG_Java, Some("class_A.function_B")),
        (DW_LANG_Cobol74, Some("class_A::function_B")),
        (DW_LANG_Mips_Assembler, None),
    ];

    for signed in [false, true] {
        for &(language, expected) in cases {
            let mut fixture = Fixture::new();
            fixture.push_line(10, 1, "line-file", 212966758);
            if language.0 != 0 {
                fixture.set_language(language, signed);
            }

            let mut cu = fixture.start_cu();
            let mut class = start_named_die(&mut cu, Parent::Root, DW_TAG_class_type, "class_A");
            define_function(
                &mut cu,
                Parent::Die(&mut class),
                "function_B",
                10,
                1,
                None,
                DW_FORM_addr,
            );
            class.finish(&mut cu);
            cu.finish();
            drop(cu);

            match expected {
                Some(name) => {
                    assert_eq!(fixture.functions().len(), 1, "language {:?}", language);
                    fixture.assert_function(0, name, 10, 1);
                }
                None => assert_eq!(fixture.functions().len(), 0, "language {:?}", language),
            }
        }
    }
}

#[test]
fn specification_function() {
    let mut fixture = Fixture::new();
    fixture.push_line(0x93cd3dfc1aa10097, 0x0397d47a0b4ca0d4, "line-file", 54883661);

    let mut cu = fixture.start_cu();
    declaration_die(
        &mut cu,
        Parent::Root,
        0xcd3c51b946fb1eee,
        DW_TAG_subprogram,
        "declaration-name",
        "",
    );
    definition_die(
        &mut cu,
        Parent::Root,
        DW_TAG_subprogram,
        0xcd3c51b946fb1eee,
        "",
        0x93cd3dfc1aa10097,
        0x0397d47a0b4ca0d4,
    );
    cu.finish();
    drop(cu);

    fixture.assert_function(0, "declaration-name", 0x93cd3dfc1aa10097, 0x0397d47a0b4ca0d4);
    fixture.reporter.assert_silent();
}

#[test]
fn specification_mangled_name() {
    let mut fixture = Fixture::new();
    fixture.push_line(0x93cd3dfc1aa10097, 0x0397d47a0b4ca0d4, "line-file", 54883661);

    let mut cu = fixture.start_cu();
    declaration_die(
        &mut cu,
        Parent::Root,
        0xcd3c51b946fb1eee,
        DW_TAG_subprogram,
        "declaration-name",
        "_ZN1C1fEi",
    );
    definition_die(
        &mut cu,
        Parent::Root,
        DW_TAG_subprogram,
        0xcd3c51b946fb1eee,
        "",
        0x93cd3dfc1aa10097,
        0x0397d47a0b4ca0d4,
    );
    cu.finish();
    drop(cu);

    fixture.assert_function(0, "C::f(int)", 0x93cd3dfc1aa10097, 0x0397d47a0b4ca0d4);
}

#[test]
fn specification_mangled_name_swift() {
    let mut fixture = Fixture::new();
    fixture.set_language(DW_LANG_Swift, false);
    fixture.push_line(0x93cd3dfc1aa10097, 0x0397d47a0b4ca0d4, "line-file", 54883661);

    let name = "_TFC9swifttest5Shape17simpleDescriptionfS0_FT_Si";
    let mut cu = fixture.start_cu();
    declaration_die(
        &mut cu,
        Parent::Root,
        0xcd3c51b946fb1eee,
        DW_TAG_subprogram,
        "declaration-name",
        name,
    );
    definition_die(
        &mut cu,
        Parent::Root,
        DW_TAG_subprogram,
        0xcd3c51b946fb1eee,
        "",
        0x93cd3dfc1aa10097,
        0x0397d47a0b4ca0d4,
    );
    cu.finish();
    drop(cu);

    fixture.assert_function(0, name, 0x93cd3dfc1aa10097, 0x0397d47a0b4ca0d4);
}

#[test]
fn specification_mangled_name_rust() {
    let mut fixture = Fixture::new();
    fixture.set_language(DW_LANG_Rust, false);
    fixture.push_line(0x93cd3dfc1aa10097, 0x0397d47a0b4ca0d4, "line-file", 54883661);

    let mut cu = fixture.start_cu();
    declaration_die(
        &mut cu,
        Parent::Root,
        0xcd3c51b946fb1eee,
        DW_TAG_subprogram,
        "declaration-name",
        "_ZN14rustc_demangle8demangle17h373defa94bffacdeE",
    );
    definition_die(
        &mut cu,
        Parent::Root,
        DW_TAG_subprogram,
        0xcd3c51b946fb1eee,
        "",
        0x93cd3dfc1aa10097,
        0x0397d47a0b4ca0d4,
    );
    cu.finish();
    drop(cu);

    fixture.assert_function(
        0,
        "rustc_demangle::demangle",
        0x93cd3dfc1aa10097,
        0x0397d47a0b4ca0d4,
    );
}

#[test]
fn specification_member_function() {
    let mut fixture = Fixture::new();
    fixture.push_line(0x3341a248634e7170, 0x5f6938ee5553b953, "line-file", 18116691);

    let mut cu = fixture.start_cu();
    let mut class = start_named_die(&mut cu, Parent::Root, DW_TAG_class_type, "class_A");
    declaration_die(
        &mut cu,
        Parent::Die(&mut class),
        0x7d83028c431406e8,
        DW_TAG_subprogram,
        "declaration-name",
        "",
    );
    class.finish(&mut cu);
    definition_die(
        &mut cu,
        Parent::Root,
        DW_TAG_subprogram,
        0x7d83028c431406e8,
        "",
        0x3341a248634e7170,
        0x5f6938ee5553b953,
    );
    cu.finish();
    drop(cu);

    fixture.assert_function(
        0,
        "class_A::declaration-name",
        0x3341a248634e7170,
        0x5f6938ee5553b953,
    );
}

#[test]
fn specification_function_declaration_parent() {
    let mut fixture = Fixture::new();
    fixture.push_line(0x463c9ddf405be227, 0x6a47774af5049680, "line-file", 70254922);

    let mut cu = fixture.start_cu();
    let mut class = start_named_die(&mut cu, Parent::Root, DW_TAG_class_type, "class_A");
    declaration_die(
        &mut cu,
        Parent::Die(&mut class),
        0x0e0e877c8404544a,
        DW_TAG_subprogram,
        "declaration-name",
        "",
    );
    class.finish(&mut cu);
    definition_die(
        &mut cu,
        Parent::Root,
        DW_TAG_subprogram,
        0x0e0e877c8404544a,
        "definition-name",
        0x463c9ddf405be227,
        0x6a47774af5049680,
    );
    cu.finish();
    drop(cu);

    fixture.assert_function(
        0,
        "class_A::definition-name",
        0x463c9ddf405be227,
        0x6a47774af5049680,
    );
}

#[test]
fn specification_named_scope_declaration_parent() {
    let mut fixture = Fixture::new();
    fixture.push_line(0x5d13433d0df13d00, 0x48ebebe5ade2cab4, "line-file", 77392604);

    let mut cu = fixture.start_cu();

    let mut space = start_named_die(&mut cu, Parent::Root, DW_TAG_namespace, "space_A");
    declaration_die(
        &mut cu,
        Parent::Die(&mut space),
        0x419bb1d12f9a73a2,
        DW_TAG_class_type,
        "class-declaration-name",
        "",
    );
    space.finish(&mut cu);

    let mut class = start_specified_die(
        &mut cu,
        Parent::Root,
        DW_TAG_class_type,
        0x419bb1d12f9a73a2,
        Some("class-definition-name"),
    );
    define_function(
        &mut cu,
        Parent::Die(&mut class),
        "function",
        0x5d13433d0df13d00,
        0x48ebebe5ade2cab4,
        None,
        DW_FORM_addr,
    );
    class.finish(&mut cu);

    cu.finish();
    drop(cu);

    fixture.assert_function(
        0,
        "space_A::class-definition-name::function",
        0x5d13433d0df13d00,
        0x48ebebe5ade2cab4,
    );
}

#[test]
fn specification_inline_function() {
    let mut fixture = Fixture::new();
    fixture.push_line(0x1758a0f941b71efb, 0x1cf154f1f545e146, "line-file", 75173118);

    let mut cu = fixture.start_cu();
    declaration_die(
        &mut cu,
        Parent::Root,
        0xcd3c51b946fb1eee,
        DW_TAG_subprogram,
        "inline-name",
        "",
    );
    abstract_instance_die(&mut cu, Parent::Root, 0x1e8dac5d507ed7ab, 0xcd3c51b946fb1eee, "", false);
    define_inline_instance_die(
        &mut cu,
        Parent::Root,
        "",
        0x1e8dac5d507ed7ab,
        0x1758a0f941b71efb,
        0x1cf154f1f545e146,
    );
    cu.finish();
    drop(cu);

    fixture.assert_function(0, "inline-name", 0x1758a0f941b71efb, 0x1cf154f1f545e146);
}

#[test]
fn inline_function_in_namespace() {
    let mut fixture = Fixture::new();
    fixture.push_line(0x1758a0f941b71efb, 0x1cf154f1f545e146, "line-file", 75173118);

    let mut cu = fixture.start_cu();
    let mut space = start_named_die(&mut cu, Parent::Root, DW_TAG_namespace, "Namespace");
    abstract_instance_die(
        &mut cu,
        Parent::Die(&mut space),
        0x1e8dac5d507ed7ab,
        0,
        "func-name",
        false,
    );
    define_inline_instance_die(
        &mut cu,
        Parent::Die(&mut space),
        "",
        0x1e8dac5d507ed7ab,
        0x1758a0f941b71efb,
        0x1cf154f1f545e146,
    );
    space.finish(&mut cu);
    cu.finish();
    drop(cu);

    fixture.assert_function(
        0,
        "Namespace::func-name",
        0x1758a0f941b71efb,
        0x1cf154f1f545e146,
    );
}

#[test]
fn specification_long_chain() {
    let mut fixture = Fixture::new();
    fixture.set_language(DW_LANG_C_plus_plus, false);
    fixture.push_line(0x5a0dd6bb85db754c, 0x3bccb213d08c7fd3, "line-file", 21192926);

    // space_A full definition
    //   space_B declaration
    // space_B definition
    //   struct_C full definition
    //     struct_D declaration
    // struct_D definition
    //   union_E full definition
    //     union_F declaration
    // union_F definition
    //   class_G full definition
    //     class_H declaration
    // class_H definition
    //   func_I declaration
    // func_I definition
    let mut cu = fixture.start_cu();

    let mut space_a = start_named_die(&mut cu, Parent::Root, DW_TAG_namespace, "space_A");
    declaration_die(
        &mut cu,
        Parent::Die(&mut space_a),
        0x2e111126496596e2,
        DW_TAG_namespace,
        "space_B",
        "",
    );
    space_a.finish(&mut cu);

    let mut space_b =
        start_specified_die(&mut cu, Parent::Root, DW_TAG_namespace, 0x2e111126496596e2, None);
    let mut struct_c = start_named_die(
        &mut cu,
        Parent::Die(&mut space_b),
        DW_TAG_structure_type,
        "struct_C",
    );
    declaration_die(
        &mut cu,
        Parent::Die(&mut struct_c),
        0x20cd423bf2a25a4c,
        DW_TAG_structure_type,
        "struct_D",
        "",
    );
    struct_c.finish(&mut cu);
    space_b.finish(&mut cu);

    let mut struct_d = start_specified_die(
        &mut cu,
        Parent::Root,
        DW_TAG_structure_type,
        0x20cd423bf2a25a4c,
        None,
    );
    let mut union_e = start_named_die(
        &mut cu,
        Parent::Die(&mut struct_d),
        DW_TAG_union_type,
        "union_E",
    );
    declaration_die(
        &mut cu,
        Parent::Die(&mut union_e),
        0xe25c84805aa58c32,
        DW_TAG_union_type,
        "union_F",
        "",
    );
    union_e.finish(&mut cu);
    struct_d.finish(&mut cu);

    let mut union_f =
        start_specified_die(&mut cu, Parent::Root, DW_TAG_union_type, 0xe25c84805aa58c32, None);
    let mut class_g = start_named_die(
        &mut cu,
        Parent::Die(&mut union_f),
        DW_TAG_class_type,
        "class_G",
    );
    declaration_die(
        &mut cu,
        Parent::Die(&mut class_g),
        0xb70d960dcc173b6e,
        DW_TAG_class_type,
        "class_H",
        "",
    );
    class_g.finish(&mut cu);
    union_f.finish(&mut cu);

    let mut class_h =
        start_specified_die(&mut cu, Parent::Root, DW_TAG_class_type, 0xb70d960dcc173b6e, None);
    declaration_die(
        &mut cu,
        Parent::Die(&mut class_h),
        0x27ff829e3bf69f37,
        DW_TAG_subprogram,
        "func_I",
        "",
    );
    class_h.finish(&mut cu);

    definition_die(
        &mut cu,
        Parent::Root,
        DW_TAG_subprogram,
        0x27ff829e3bf69f37,
        "",
        0x5a0dd6bb85db754c,
        0x3bccb213d08c7fd3,
    );
    cu.finish();
    drop(cu);

    fixture.assert_function(
        0,
        "space_A::space_B::struct_C::struct_D::union_E::union_F::class_G::class_H::func_I",
        0x5a0dd6bb85db754c,
        0x3bccb213d08c7fd3,
    );
}

#[test]
fn specification_prefer_specification_parents() {
    let mut fixture = Fixture::new();
    fixture.push_line(0xbbd9d54dce3b95b7, 0x39188b7b52b0899f, "line-file", 79488694);

    let mut cu = fixture.start_cu();

    let mut declaration_class =
        start_named_die(&mut cu, Parent::Root, DW_TAG_class_type, "declaration-class");
    declaration_die(
        &mut cu,
        Parent::Die(&mut declaration_class),
        0x9ddb35517455ef7a,
        DW_TAG_subprogram,
        "function-declaration",
        "",
    );
    declaration_class.finish(&mut cu);

    let mut definition_class =
        start_named_die(&mut cu, Parent::Root, DW_TAG_class_type, "definition-class");
    definition_die(
        &mut cu,
        Parent::Die(&mut definition_class),
        DW_TAG_subprogram,
        0x9ddb35517455ef7a,
        "function-definition",
        0xbbd9d54dce3b95b7,
        0x39188b7b52b0899f,
    );
    definition_class.finish(&mut cu);

    cu.finish();
    drop(cu);

    fixture.assert_function(
        0,
        "declaration-class::function-definition",
        0xbbd9d54dce3b95b7,
        0x39188b7b52b0899f,
    );
}

#[test]
fn inter_cu_specification() {
    let mut module = Module::new("module-name", "module-os", "module-arch", "module-id");
    let mut file_context = FileContext::new("dwarf-filename", true);
    let mut reporter = RecordingReporter::default();
    let mut line_reader = TestLineReader::default();

    // First CU: declares class_A.
    {
        let mut cu = DwarfCuToModule::new(
            &mut file_context,
            &mut module,
            &mut line_reader,
            None,
            &mut reporter,
        );
        cu.start_compilation_unit(0, 1, 2, 3, 3).unwrap();
        cu.start_root_die(1, DW_TAG_compile_unit).unwrap();
        assert!(cu.end_attributes());
        declaration_die(
            &mut cu,
            Parent::Root,
            0xb8fbfdd5f0b26fce,
            DW_TAG_class_type,
            "class_A",
            "",
        );
        cu.finish();
    }

    // Second CU: defines class_A, declares member_func_B.
    {
        let mut cu = DwarfCuToModule::new(
            &mut file_context,
            &mut module,
            &mut line_reader,
            None,
            &mut reporter,
        );
        cu.start_compilation_unit(0, 1, 2, 3, 3).unwrap();
        cu.start_root_die(1, DW_TAG_compile_unit).unwrap();
        assert!(cu.end_attributes());
        let mut class = start_specified_die(
            &mut cu,
            Parent::Root,
            DW_TAG_class_type,
            0xb8fbfdd5f0b26fce,
            None,
        );
        declaration_die(
            &mut cu,
            Parent::Die(&mut class),
            0xb01fef8b380bd1a2,
            DW_TAG_subprogram,
            "member_func_B",
            "",
        );
        class.finish(&mut cu);
        cu.finish();
    }

    // Third CU: defines member_func_B.
    {
        let mut cu = DwarfCuToModule::new(
            &mut file_context,
            &mut module,
            &mut line_reader,
            None,
            &mut reporter,
        );
        cu.start_compilation_unit(0, 1, 2, 3, 3).unwrap();
        cu.start_root_die(1, DW_TAG_compile_unit).unwrap();
        assert!(cu.end_attributes());
        definition_die(
            &mut cu,
            Parent::Root,
            DW_TAG_subprogram,
            0xb01fef8b380bd1a2,
            "",
            0x2618f00a1a711e53,
            0x4fd94b76d7c2caf5,
        );
        cu.finish();
    }

    file_context.finish(&mut module, &mut reporter);

    assert_eq!(module.functions().len(), 1);
    assert_eq!(module.functions()[0].name, "class_A::member_func_B");
    assert_eq!(reporter.inter_cu_references, []);
    assert_eq!(reporter.uncovered_functions, 1);
}

#[test]
fn unhandled_inter_cu_specification() {
    let mut module = Module::new("module-name", "module-os", "module-arch", "module-id");
    let mut file_context = FileContext::new("dwarf-filename", false);
    let mut reporter = RecordingReporter::default();
    let mut line_reader = TestLineReader::default();

    {
        let mut cu = DwarfCuToModule::new(
            &mut file_context,
            &mut module,
            &mut line_reader,
            None,
            &mut reporter,
        );
        cu.start_compilation_unit(0, 1, 2, 3, 3).unwrap();
        cu.start_root_die(1, DW_TAG_compile_unit).unwrap();
        assert!(cu.end_attributes());
        declaration_die(
            &mut cu,
            Parent::Root,
            0xb8fbfdd5f0b26fce,
            DW_TAG_class_type,
            "class_A",
            "",
        );
        cu.finish();
    }

    {
        let mut cu = DwarfCuToModule::new(
            &mut file_context,
            &mut module,
            &mut line_reader,
            None,
            &mut reporter,
        );
        cu.start_compilation_unit(0, 1, 2, 3, 3).unwrap();
        cu.start_root_die(1, DW_TAG_compile_unit).unwrap();
        assert!(cu.end_attributes());
        let mut class = start_specified_die(
            &mut cu,
            Parent::Root,
            DW_TAG_class_type,
            0xb8fbfdd5f0b26fce,
            None,
        );
        declaration_die(
            &mut cu,
            Parent::Die(&mut class),
            0xb01fef8b380bd1a2,
            DW_TAG_subprogram,
            "member_func_B",
            "",
        );
        class.finish(&mut cu);
        cu.finish();
    }
    assert_eq!(reporter.inter_cu_references.len(), 1);

    {
        let mut cu = DwarfCuToModule::new(
            &mut file_context,
            &mut module,
            &mut line_reader,
            None,
            &mut reporter,
        );
        cu.start_compilation_unit(0, 1, 2, 3, 3).unwrap();
        cu.start_root_die(1, DW_TAG_compile_unit).unwrap();
        assert!(cu.end_attributes());
        definition_die(
            &mut cu,
            Parent::Root,
            DW_TAG_subprogram,
            0xb01fef8b380bd1a2,
            "",
            0x2618f00a1a711e53,
            0x4fd94b76d7c2caf5,
        );
        cu.finish();
    }
    assert_eq!(reporter.inter_cu_references.len(), 2);
}

#[test]
fn bad_stmt_list_offset() {
    let mut fixture = Fixture::new();
    let bad_offset = DUMMY_LINE_PROGRAM.len() as u64 + 10;

    let mut cu = fixture.raw_cu();
    cu.start_compilation_unit(0xc591d5b037543d7c, 0x11, 0xcd, 0x2d7d19546cf6590c, 3)
        .unwrap();
    cu.start_root_die(0xae789dc102cfca54, DW_TAG_compile_unit)
        .unwrap();
    cu.attr_string(DW_AT_name, DW_FORM_strp, "compilation-unit-name");
    cu.attr_unsigned(DW_AT_stmt_list, DW_FORM_ref4, bad_offset);
    assert!(cu.end_attributes());
    cu.finish();
    drop(cu);

    assert_eq!(fixture.reporter.bad_line_info_offsets, [bad_offset]);
    assert_eq!(fixture.line_reader.read_calls, 0);
}

#[test]
fn no_line_section() {
    let mut fixture = Fixture::new();
    fixture.push_line(0x88507fb678052611, 0x42c8e9de6bbaa0fa, "line-file", 64472290);
    fixture.file_context.clear_sections();

    let mut cu = fixture.start_cu();
    cu.finish();
    drop(cu);

    assert_eq!(fixture.reporter.missing_sections, [".debug_line"]);
    assert_eq!(fixture.line_reader.read_calls, 0);
}

#[test]
fn bad_dwarf_version() {
    let mut fixture = Fixture::new();
    let mut cu = fixture.raw_cu();
    let err = cu
        .start_compilation_unit(0xadf6e0eb71e2b0d9, 0x4d, 0x90, 0xc9de224ccb99ac3e, 1)
        .unwrap_err();
    assert_eq!(err.kind(), DwarfErrorKind::UnsupportedVersion(1));

    let err = cu
        .start_compilation_unit(0xadf6e0eb71e2b0d9, 0x4d, 0x90, 0xc9de224ccb99ac3e, 6)
        .unwrap_err();
    assert_eq!(err.kind(), DwarfErrorKind::UnsupportedVersion(6));
}

#[test]
fn good_dwarf_versions() {
    for version in 2..=5 {
        let mut fixture = Fixture::new();
        let mut cu = fixture.raw_cu();
        cu.start_compilation_unit(0xadf6e0eb71e2b0d9, 0x4d, 0x90, 0xc9de224ccb99ac3e, version)
            .unwrap();
    }
}

#[test]
fn bad_root_die_tag() {
    let mut fixture = Fixture::new();
    let mut cu = fixture.raw_cu();
    cu.start_compilation_unit(0xadf6e0eb71e2b0d9, 0x4d, 0x90, 0xc9de224ccb99ac3e, 3)
        .unwrap();
    let err = cu
        .start_root_die(0x02e56bfbda9e7337, DW_TAG_subprogram)
        .unwrap_err();
    assert_eq!(err.kind(), DwarfErrorKind::BadRootDie(DW_TAG_subprogram));
}

#[test]
fn inline_call_tree() {
    let mut fixture = Fixture::new();
    let call_file = fixture.module.find_file("calls.c");
    fixture.line_reader.files.push((7, call_file));
    fixture.push_line(0x1000, 0x100, "calls.c", 10);

    let mut cu = fixture.start_cu();

    abstract_instance_die(&mut cu, Parent::Root, 0xaaa, 0, "inner_fn", false);
    abstract_instance_die(&mut cu, Parent::Root, 0xbbb, 0, "outer_fn", false);

    let mut func = cu.find_child_handler(0xccc, DW_TAG_subprogram).unwrap();
    func.attr_string(DW_AT_name, DW_FORM_strp, "caller");
    func.attr_unsigned(DW_AT_low_pc, DW_FORM_addr, 0x1000);
    func.attr_unsigned(DW_AT_high_pc, DW_FORM_addr, 0x1100);
    assert!(func.end_attributes(&mut cu));

    let mut outer = func
        .find_child_handler(0xddd, DW_TAG_inlined_subroutine)
        .unwrap();
    outer.attr_reference(DW_AT_abstract_origin, DW_FORM_ref4, 0xbbb);
    outer.attr_unsigned(DW_AT_low_pc, DW_FORM_addr, 0x1010);
    outer.attr_unsigned(DW_AT_high_pc, DW_FORM_addr, 0x1050);
    outer.attr_unsigned(DW_AT_call_file, DW_FORM_udata, 7);
    outer.attr_unsigned(DW_AT_call_line, DW_FORM_udata, 12);
    assert!(outer.end_attributes(&mut cu));

    let mut inner = outer
        .find_child_handler(0xeee, DW_TAG_inlined_subroutine)
        .unwrap();
    inner.attr_reference(DW_AT_abstract_origin, DW_FORM_ref4, 0xaaa);
    inner.attr_unsigned(DW_AT_low_pc, DW_FORM_addr, 0x1020);
    inner.attr_unsigned(DW_AT_high_pc, DW_FORM_addr, 0x1030);
    inner.attr_unsigned(DW_AT_call_file, DW_FORM_udata, 7);
    inner.attr_unsigned(DW_AT_call_line, DW_FORM_udata, 3);
    assert!(inner.end_attributes(&mut cu));
    inner.finish(&mut cu);

    outer.finish(&mut cu);
    func.finish(&mut cu);
    cu.finish();
    drop(cu);

    assert_eq!(fixture.functions().len(), 1);
    let function = fixture.functions()[0];
    assert_eq!(function.name, "caller");
    assert_eq!(function.inlines.len(), 1);

    let outer = &function.inlines[0];
    assert_eq!(fixture.module.inline_origin(outer.origin_id), Some("outer_fn"));
    assert_eq!(outer.call_site_file_id, call_file);
    assert_eq!(outer.call_site_line, 12);
    assert_eq!(outer.children.len(), 1);

    let inner = &outer.children[0];
    assert_eq!(fixture.module.inline_origin(inner.origin_id), Some("inner_fn"));
    assert_eq!(inner.call_site_line, 3);
}
