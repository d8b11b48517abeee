//! Frame-by-frame stack unwinding.

mod amd64;
mod arm64;
mod ppc64;
mod x86;

use log::trace;

use crate::frame::{CallStack, FrameContext, StackFrame};
use crate::memory::MemoryRegion;
use crate::modules::ModuleList;
use crate::symbolizer::StackFrameSymbolizer;

/// The default number of stack words examined when scanning for a return
/// address.
const DEFAULT_SCAN_DEPTH: u64 = 64;

/// The maximum number of frames a walk will produce.
///
/// This bounds the walk on malformed stacks that would otherwise recurse
/// forever through scanned garbage.
const MAX_FRAMES: usize = 1024;

/// Reconstructs call stacks from a thread context and a memory snapshot.
///
/// One walker serves one memory snapshot and module index; it can walk any
/// number of threads. For every frame the walker tries call frame
/// information first, then the architecture's frame pointer convention, and
/// finally, if permitted, scanning the stack for plausible return
/// addresses.
pub struct Stackwalker<'a> {
    pub(crate) memory: &'a dyn MemoryRegion,
    pub(crate) modules: &'a ModuleList,
    pub(crate) symbolizer: &'a StackFrameSymbolizer<'a>,
    pub(crate) scan_depth: u64,
    max_frames: usize,
}

impl<'a> Stackwalker<'a> {
    /// Creates a stack walker.
    pub fn new(
        memory: &'a dyn MemoryRegion,
        modules: &'a ModuleList,
        symbolizer: &'a StackFrameSymbolizer<'a>,
    ) -> Self {
        Stackwalker {
            memory,
            modules,
            symbolizer,
            scan_depth: DEFAULT_SCAN_DEPTH,
            max_frames: MAX_FRAMES,
        }
    }

    /// Sets the number of stack words examined during scanning.
    pub fn with_scan_depth(mut self, words: u64) -> Self {
        self.scan_depth = words;
        self
    }

    /// Sets the maximum number of frames produced per walk.
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Walks the stack starting from the given thread context.
    ///
    /// Returns the reconstructed call stack, innermost frame first. Every
    /// frame is symbolized on the way, and synthetic frames for inlined
    /// calls are inserted before their surrounding concrete frame.
    pub fn walk(&self, context: FrameContext, stack_scan_allowed: bool) -> CallStack {
        let mut stack = CallStack::new();

        let mut frame = self.context_frame(context);
        loop {
            self.symbolize_and_push(&mut stack, frame);

            if stack.frames().len() >= self.max_frames {
                trace!("stack walk terminated at the frame limit");
                break;
            }

            frame = match self.get_caller_frame(&stack, stack_scan_allowed) {
                Some(frame) => frame,
                None => break,
            };
        }

        stack
    }

    /// Builds the innermost frame directly from the thread context.
    fn context_frame(&self, context: FrameContext) -> StackFrame {
        match context {
            FrameContext::Arm64(context) => arm64::context_frame(self, context),
            FrameContext::Ppc64(context) => ppc64::context_frame(context),
            FrameContext::X86(context) => x86::context_frame(context),
            FrameContext::Amd64(context) => amd64::context_frame(context),
        }
    }

    /// Unwinds one frame from the last concrete frame on `stack`.
    ///
    /// Returns `None` when the walk should end: no strategy produced a
    /// frame, or the produced frame violates a termination invariant.
    pub fn get_caller_frame(&self, stack: &CallStack, stack_scan_allowed: bool) -> Option<StackFrame> {
        let last = stack.last_with_context()?;
        match last.context.as_ref()? {
            FrameContext::Arm64(_) => arm64::get_caller_frame(self, stack, stack_scan_allowed),
            FrameContext::Ppc64(_) => ppc64::get_caller_frame(self, stack, stack_scan_allowed),
            FrameContext::X86(_) => x86::get_caller_frame(self, stack, stack_scan_allowed),
            FrameContext::Amd64(_) => amd64::get_caller_frame(self, stack, stack_scan_allowed),
        }
    }

    fn symbolize_and_push(&self, stack: &mut CallStack, mut frame: StackFrame) {
        frame.module = self.modules.module_for_address(frame.instruction).cloned();

        let mut inline_frames = Vec::new();
        self.symbolizer
            .fill_source_line_info(&mut frame, &mut inline_frames);

        // Inline frames are deeper than their surrounding concrete frame
        // and arrive innermost first, so they go onto the stack first.
        for inline_frame in inline_frames {
            stack.push(inline_frame);
        }
        stack.push(frame);
    }

    /// Returns true if `address` looks like it points into executable code.
    pub(crate) fn instruction_address_seems_valid(&self, address: u64) -> bool {
        self.modules.module_for_address(address).is_some()
    }

    /// Scans the stack upward from `stack_pointer` for a plausible return
    /// address.
    ///
    /// Returns the address of the stack slot and the candidate found there.
    /// The scan window is bounded by the walker's scan depth; a failed read
    /// ends the scan, as it means the snapshot ran out.
    pub(crate) fn scan_for_return_address(
        &self,
        stack_pointer: u64,
        word_size: u64,
    ) -> Option<(u64, u64)> {
        for index in 0..self.scan_depth {
            let address = stack_pointer.checked_add(index.checked_mul(word_size)?)?;
            let candidate = match word_size {
                4 => self.memory.read_u32(address)? as u64,
                _ => self.memory.read_u64(address)?,
            };

            if self.instruction_address_seems_valid(candidate) {
                trace!(
                    "scan found return address candidate {:#x} at {:#x}",
                    candidate,
                    address
                );
                return Some((address, candidate));
            }
        }

        None
    }
}

/// Decides whether the walk must stop before accepting a caller frame.
///
/// A walk terminates when the recovered program counter is zero, or when the
/// caller's stack pointer does not lie strictly above the callee's. The
/// first unwind from a context frame may leave the stack pointer unchanged,
/// since the crashing function may not have set up a frame yet.
///
/// There is a third stop condition the per-architecture callers apply after
/// this one: a recovered program counter outside every known module ends
/// the walk whenever stack scanning is disallowed.
pub(crate) fn terminate_walk(
    caller_pc: u64,
    caller_sp: u64,
    callee_sp: u64,
    first_unwind: bool,
) -> bool {
    if caller_pc == 0 {
        trace!("stack walk terminated: program counter is zero");
        return true;
    }

    let stack_ok = if first_unwind {
        caller_sp >= callee_sp
    } else {
        caller_sp > callee_sp
    };
    if !stack_ok {
        trace!(
            "stack walk terminated: stack pointer did not advance ({:#x} -> {:#x})",
            callee_sp,
            caller_sp
        );
        return true;
    }

    false
}
