//! Warning reporting for DWARF ingestion.

use crate::module::{Function, Line};

/// Receives warnings about recoverable problems in the DWARF data.
///
/// All conditions reported here are recoverable: processing continues and the
/// affected entity either uses a fallback name or is dropped. Implementations
/// must be idempotent and free of side effects beyond their output; tests
/// inject a recording implementation to assert on emitted warnings.
pub trait WarningReporter {
    /// The name of the compilation unit became known.
    fn set_cu_name(&mut self, name: &str);

    /// The DIE at `offset` cites a specification at `target` that was never
    /// resolved.
    fn unknown_specification(&mut self, offset: u64, target: u64);

    /// The DIE at `offset` cites an abstract origin at `target` that was
    /// never resolved.
    fn unknown_abstract_origin(&mut self, offset: u64, target: u64);

    /// A debug section needed for processing is missing from the file.
    fn missing_section(&mut self, name: &str);

    /// The `DW_AT_stmt_list` offset lies outside the line section.
    fn bad_line_info_offset(&mut self, offset: u64);

    /// Part of `function` is not covered by any source line.
    fn uncovered_function(&mut self, function: &Function);

    /// Part of `line` is not covered by any function.
    fn uncovered_line(&mut self, line: &Line);

    /// The subprogram DIE at `offset` has no name.
    fn unnamed_function(&mut self, offset: u64);

    /// A mangled name failed to demangle.
    fn demangle_error(&mut self, input: &str);

    /// The DIE at `offset` references `target` in another compilation unit,
    /// but the file is not processed as a whole.
    fn unhandled_inter_cu_reference(&mut self, offset: u64, target: u64);
}

/// A [`WarningReporter`] that writes through the `log` facade at warn level.
///
/// Warnings about functions and lines not covering each other are noisy on
/// real-world binaries and disabled by default; enable them with
/// [`set_uncovered_warnings_enabled`](Self::set_uncovered_warnings_enabled).
pub struct LogWarningReporter {
    filename: String,
    cu_offset: u64,
    cu_name: String,
    uncovered_warnings_enabled: bool,
}

impl LogWarningReporter {
    /// Creates a reporter for the compilation unit at `cu_offset` in
    /// `filename`.
    pub fn new(filename: impl Into<String>, cu_offset: u64) -> Self {
        LogWarningReporter {
            filename: filename.into(),
            cu_offset,
            cu_name: String::from("<unknown>"),
            uncovered_warnings_enabled: false,
        }
    }

    /// Whether uncovered function/line warnings are emitted.
    pub fn uncovered_warnings_enabled(&self) -> bool {
        self.uncovered_warnings_enabled
    }

    /// Enables or disables uncovered function/line warnings.
    pub fn set_uncovered_warnings_enabled(&mut self, enabled: bool) {
        self.uncovered_warnings_enabled = enabled;
    }

    fn context(&self) -> String {
        format!(
            "{}, section offset {:#x}, compilation unit '{}'",
            self.filename, self.cu_offset, self.cu_name
        )
    }
}

impl WarningReporter for LogWarningReporter {
    fn set_cu_name(&mut self, name: &str) {
        self.cu_name = name.to_string();
    }

    fn unknown_specification(&mut self, offset: u64, target: u64) {
        log::warn!(
            "{}: the DIE at offset {:#x} has a DW_AT_specification attribute referring to the \
             DIE at offset {:#x}, which was not marked as a declaration",
            self.context(),
            offset,
            target
        );
    }

    fn unknown_abstract_origin(&mut self, offset: u64, target: u64) {
        log::warn!(
            "{}: the DIE at offset {:#x} has a DW_AT_abstract_origin attribute referring to the \
             DIE at offset {:#x}, which was not marked as an inline",
            self.context(),
            offset,
            target
        );
    }

    fn missing_section(&mut self, name: &str) {
        log::warn!("{}: the file has no {} section", self.context(), name);
    }

    fn bad_line_info_offset(&mut self, offset: u64) {
        log::warn!(
            "{}: the DW_AT_stmt_list offset {:#x} lies outside the line section",
            self.context(),
            offset
        );
    }

    fn uncovered_function(&mut self, function: &Function) {
        if !self.uncovered_warnings_enabled {
            return;
        }
        log::warn!(
            "{}: function starting at {:#x} is not covered by any line data: {}",
            self.context(),
            function.address,
            function.name
        );
    }

    fn uncovered_line(&mut self, line: &Line) {
        if !self.uncovered_warnings_enabled {
            return;
        }
        log::warn!(
            "{}: line starting at {:#x} is not covered by any function",
            self.context(),
            line.address
        );
    }

    fn unnamed_function(&mut self, offset: u64) {
        log::warn!(
            "{}: the subprogram DIE at offset {:#x} has no name",
            self.context(),
            offset
        );
    }

    fn demangle_error(&mut self, input: &str) {
        log::warn!("{}: failed to demangle '{}'", self.context(), input);
    }

    fn unhandled_inter_cu_reference(&mut self, offset: u64, target: u64) {
        log::warn!(
            "{}: the DIE at offset {:#x} refers to the DIE at offset {:#x} in another \
             compilation unit, which is only supported when processing a file as a whole",
            self.context(),
            offset,
            target
        );
    }
}
