//! Binding between the stack walker and symbol resolvers.

use crate::cfi::{CfiFrameInfo, WindowsFrameInfo};
use crate::frame::StackFrame;

/// Answers symbol queries for loaded modules.
///
/// Implementations resolve module-relative addresses against whatever symbol
/// store they manage; `talus-symcache` provides the production
/// implementation, tests use recording or table-driven stubs. Addresses
/// passed to all methods are relative to the module's load address.
pub trait SymbolProvider {
    /// Returns call frame information covering `address` in `module`.
    fn find_cfi_frame_info(&self, module: &str, address: u64) -> Option<CfiFrameInfo>;

    /// Returns Windows stack frame information covering `address` in
    /// `module`.
    fn find_windows_frame_info(&self, module: &str, address: u64) -> Option<WindowsFrameInfo>;

    /// Fills `frame` with function and source line information for
    /// `address` in `module`, and appends one synthetic frame per inlined
    /// call, innermost first.
    fn fill_source_line_info(
        &self,
        module: &str,
        address: u64,
        frame: &mut StackFrame,
        inline_frames: &mut Vec<StackFrame>,
    );
}

/// Fills stack frames with source information during a walk.
///
/// The symbolizer maps a frame's instruction address to its module, rebases
/// it, and forwards queries to the [`SymbolProvider`]. Frames outside any
/// known module are left untouched.
pub struct StackFrameSymbolizer<'a> {
    provider: &'a dyn SymbolProvider,
}

impl<'a> StackFrameSymbolizer<'a> {
    /// Creates a symbolizer over the given provider.
    pub fn new(provider: &'a dyn SymbolProvider) -> Self {
        StackFrameSymbolizer { provider }
    }

    /// Returns call frame information covering the frame's instruction.
    pub fn find_cfi_frame_info(&self, frame: &StackFrame) -> Option<CfiFrameInfo> {
        let module = frame.module.as_ref()?;
        self.provider
            .find_cfi_frame_info(&module.code_file, frame.instruction - module.base_address)
    }

    /// Returns Windows frame information covering the frame's instruction.
    pub fn find_windows_frame_info(&self, frame: &StackFrame) -> Option<WindowsFrameInfo> {
        let module = frame.module.as_ref()?;
        self.provider
            .find_windows_frame_info(&module.code_file, frame.instruction - module.base_address)
    }

    /// Fills the frame's function and source line fields and produces the
    /// frame's inline frames, innermost first.
    ///
    /// Inline frames carry [`FrameTrust::Inline`](crate::FrameTrust::Inline)
    /// and no register context; their `function_base` and
    /// `source_line_base` point at the inlined call site.
    pub fn fill_source_line_info(
        &self,
        frame: &mut StackFrame,
        inline_frames: &mut Vec<StackFrame>,
    ) {
        let module = match frame.module.as_ref() {
            Some(module) => module.clone(),
            None => return,
        };

        self.provider.fill_source_line_info(
            &module.code_file,
            frame.instruction - module.base_address,
            frame,
            inline_frames,
        );

        // Providers answer in module relative addresses; rebase them onto
        // the module's load address.
        if frame.function_name.is_some() {
            frame.function_base += module.base_address;
            frame.source_line_base += module.base_address;
        }

        for inline_frame in inline_frames.iter_mut() {
            inline_frame.module = Some(module.clone());
            inline_frame.function_base += module.base_address;
            inline_frame.source_line_base += module.base_address;
        }
    }
}
