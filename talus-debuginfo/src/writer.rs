//! Serialization of a [`Module`] into the symbol file text format.

use std::io::{self, Write};

use crate::module::{Function, InlineInstance, Module, StackWinKind};

/// Writes a [`Module`] in the symbol file text format.
///
/// Records are emitted in the canonical order: the `MODULE` header, `INFO`,
/// `FILE` and `INLINE_ORIGIN` tables, `FUNC` records with their line and
/// `INLINE` records, `PUBLIC` symbols, and finally stack records. All numbers
/// are lowercase hexadecimal except file ids, origin ids, and line numbers,
/// which are decimal.
///
/// Writing a module and parsing the output back yields the same logical
/// content, which the resolver relies on when converting symbol files into
/// its binary cache format.
pub struct SymbolFileWriter<W> {
    inner: W,
}

impl<W: Write> SymbolFileWriter<W> {
    /// Creates a new writer over an [`io::Write`] sink.
    pub fn new(inner: W) -> Self {
        SymbolFileWriter { inner }
    }

    /// Writes the complete module and returns the underlying sink.
    pub fn write_module(mut self, module: &Module) -> io::Result<W> {
        self.write_header(module)?;
        self.write_files(module)?;
        self.write_inline_origins(module)?;
        for function in module.functions() {
            self.write_function(function)?;
        }
        self.write_publics(module)?;
        self.write_stack_records(module)?;
        Ok(self.inner)
    }

    fn write_header(&mut self, module: &Module) -> io::Result<()> {
        writeln!(
            self.inner,
            "MODULE {} {} {} {}",
            module.os(),
            module.arch(),
            module.id(),
            module.name()
        )?;

        if let Some(code_id) = module.code_id() {
            writeln!(self.inner, "INFO CODE_ID {}", code_id)?;
        }

        Ok(())
    }

    fn write_files(&mut self, module: &Module) -> io::Result<()> {
        for file in module.files() {
            writeln!(self.inner, "FILE {} {}", file.id, file.name)?;
        }
        Ok(())
    }

    fn write_inline_origins(&mut self, module: &Module) -> io::Result<()> {
        for (id, name) in module.inline_origins().iter().enumerate() {
            writeln!(self.inner, "INLINE_ORIGIN {} {}", id, name)?;
        }
        Ok(())
    }

    fn write_function(&mut self, function: &Function) -> io::Result<()> {
        let multiple = if function.is_multiple { "m " } else { "" };
        writeln!(
            self.inner,
            "FUNC {}{:x} {:x} {:x} {}",
            multiple,
            function.address,
            function.size(),
            function.parameter_size,
            function.name
        )?;

        for inline in &function.inlines {
            self.write_inline(inline, 0)?;
        }

        for line in &function.lines {
            writeln!(
                self.inner,
                "{:x} {:x} {} {}",
                line.address, line.size, line.number, line.file_id
            )?;
        }

        Ok(())
    }

    fn write_inline(&mut self, inline: &InlineInstance, depth: u64) -> io::Result<()> {
        write!(
            self.inner,
            "INLINE {} {} {} {}",
            depth, inline.call_site_line, inline.call_site_file_id, inline.origin_id
        )?;
        for range in &inline.ranges {
            write!(self.inner, " {:x} {:x}", range.address, range.size)?;
        }
        writeln!(self.inner)?;

        for child in &inline.children {
            self.write_inline(child, depth + 1)?;
        }

        Ok(())
    }

    fn write_publics(&mut self, module: &Module) -> io::Result<()> {
        for public in module.publics() {
            let multiple = if public.is_multiple { "m " } else { "" };
            writeln!(
                self.inner,
                "PUBLIC {}{:x} {:x} {}",
                multiple, public.address, public.parameter_size, public.name
            )?;
        }
        Ok(())
    }

    fn write_stack_records(&mut self, module: &Module) -> io::Result<()> {
        for entry in module.stack_cfi() {
            writeln!(
                self.inner,
                "STACK CFI INIT {:x} {:x} {}",
                entry.address, entry.size, entry.init_rules
            )?;
            for (address, rules) in &entry.delta_rules {
                writeln!(self.inner, "STACK CFI {:x} {}", address, rules)?;
            }
        }

        for entry in module.stack_win() {
            let kind = match entry.kind {
                StackWinKind::Fpo => 0,
                StackWinKind::FrameData => 4,
            };
            let (has_program, tail) = match entry.program_string.as_deref() {
                Some(program) => (1, program.to_string()),
                None => (0, if entry.allocates_base_pointer { "1" } else { "0" }.to_string()),
            };
            writeln!(
                self.inner,
                "STACK WIN {} {:x} {:x} {:x} {:x} {:x} {:x} {:x} {:x} {} {}",
                kind,
                entry.address,
                entry.size,
                entry.prolog_size,
                entry.epilog_size,
                entry.parameter_size,
                entry.saved_register_size,
                entry.local_size,
                entry.max_stack_size,
                has_program,
                tail
            )?;
        }

        Ok(())
    }
}

/// Writes `module` to a `String` in the symbol file text format.
pub fn to_symbol_string(module: &Module) -> String {
    let buffer = SymbolFileWriter::new(Vec::new())
        .write_module(module)
        .expect("writing to a Vec cannot fail");
    String::from_utf8(buffer).expect("symbol files are valid UTF-8")
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::breakpad::SymbolFile;

    #[test]
    fn test_roundtrip() {
        let input = "\
MODULE Linux x86_64 A33E46AB3BF110D5AB3EED326E1A67B40 crash
INFO CODE_ID 1122334455
FILE 0 a.c
FILE 1 b.c
INLINE_ORIGIN 0 inlined_fn()
FUNC 1000 60 0 outer_fn()
INLINE 0 12 0 0 1010 20
INLINE 1 3 1 0 1014 8
1000 10 11 0
1010 20 3 1
1030 30 13 0
PUBLIC 2000 0 entry
PUBLIC m 2010 8 shared
STACK CFI INIT 1000 60 .cfa: $rsp 8 + .ra: .cfa 8 - ^
STACK CFI 1004 .cfa: $rsp 16 +
STACK WIN 4 2170 14 1 0 0 0 0 0 1 $eip 4 + ^ =
";
        let (module, _) = SymbolFile::parse(input.as_bytes())
            .unwrap()
            .to_module()
            .unwrap();
        let output = to_symbol_string(&module);
        assert_eq!(input, output);
    }
}
