//! ARM64 stack unwinding.
//!
//! ARM64 can store pointer authentication codes in the upper bits of return
//! addresses. The walker derives a best-guess address mask from the range of
//! loaded modules and strips candidate pointers before using them.

use log::trace;

use super::{terminate_walk, Stackwalker};
use crate::cfi::RegisterMap;
use crate::frame::{Arm64Context, CallStack, FrameContext, FrameTrust, StackFrame};

use crate::frame::Arm64Context as Ctx;

/// Strips a pointer authentication code from `ptr`.
///
/// If the stripped value lies within a known module it is used; otherwise
/// the original pointer is preserved.
fn ptrauth_strip(walker: &Stackwalker<'_>, ptr: u64) -> u64 {
    let stripped = ptr & walker.modules.pointer_authentication_mask();
    if walker.modules.module_for_address(stripped).is_some() {
        stripped
    } else {
        ptr
    }
}

pub(super) fn context_frame(walker: &Stackwalker<'_>, mut context: Arm64Context) -> StackFrame {
    context.iregs[Ctx::REG_LR] = ptrauth_strip(walker, context.iregs[Ctx::REG_LR]);

    let instruction = context.iregs[Ctx::REG_PC];
    let mut frame = StackFrame::with_context(FrameContext::Arm64(context), FrameTrust::Context);
    frame.context_validity = Ctx::VALID_ALL;
    frame.instruction = instruction;
    frame
}

fn last_context<'s>(stack: &'s CallStack) -> Option<(&'s StackFrame, &'s Arm64Context)> {
    let frame = stack.last_with_context()?;
    match frame.context.as_ref()? {
        FrameContext::Arm64(context) => Some((frame, context)),
        _ => None,
    }
}

fn caller_by_cfi(
    walker: &Stackwalker<'_>,
    last_frame: &StackFrame,
    last: &Arm64Context,
) -> Option<StackFrame> {
    let cfi = walker.symbolizer.find_cfi_frame_info(last_frame)?;

    let mut callee = RegisterMap::new();
    for (index, name) in Ctx::REGISTER_NAMES.iter().enumerate() {
        if last_frame.context_validity & Ctx::valid(index) != 0 {
            callee.insert((*name).to_string(), last.iregs[index]);
        }
    }

    let caller_registers = cfi.find_caller_regs(&callee, walker.memory)?;

    let mut context = Arm64Context::default();
    let mut validity = 0u64;
    for (index, name) in Ctx::REGISTER_NAMES.iter().enumerate() {
        if let Some(&value) = caller_registers.get(*name) {
            context.iregs[index] = value;
            validity |= Ctx::valid(index);
        } else if (19..=29).contains(&index)
            && last_frame.context_validity & Ctx::valid(index) != 0
        {
            // x19 through x29 are callee-saves. If the rules do not mention
            // one that was valid in the callee, the callee has not changed
            // it yet.
            context.iregs[index] = last.iregs[index];
            validity |= Ctx::valid(index);
        }
    }

    // If the rules do not recover the program counter or stack pointer
    // explicitly, substitute the return address and the frame address.
    if validity & Ctx::valid(Ctx::REG_PC) == 0 {
        if let Some(&ra) = caller_registers.get(".ra") {
            context.iregs[Ctx::REG_PC] = ra;
            validity |= Ctx::valid(Ctx::REG_PC);
        }
    }
    if validity & Ctx::valid(Ctx::REG_SP) == 0 {
        if let Some(&cfa) = caller_registers.get(".cfa") {
            context.iregs[Ctx::REG_SP] = cfa;
            validity |= Ctx::valid(Ctx::REG_SP);
        }
    }

    // Without both the program counter and the stack pointer the frame is
    // not useful.
    let essentials = Ctx::valid(Ctx::REG_PC) | Ctx::valid(Ctx::REG_SP);
    if validity & essentials != essentials {
        return None;
    }

    context.iregs[Ctx::REG_PC] = ptrauth_strip(walker, context.iregs[Ctx::REG_PC]);

    let mut frame = StackFrame::with_context(FrameContext::Arm64(context), FrameTrust::Cfi);
    frame.context_validity = validity;
    Some(frame)
}

/// Re-derives the callee frame's link register by following the callee's
/// own frame chain back one link.
///
/// Only applies when the chain agrees with the frame pointer the unwind
/// derived for the callee; a mismatch means the frame pointer is not part
/// of a conventional chain and the stored value cannot be trusted.
fn corrected_lr(
    walker: &Stackwalker<'_>,
    stack: &CallStack,
    last_frame: &StackFrame,
    last: &Arm64Context,
) -> Option<u64> {
    if last.iregs[Ctx::REG_FP] <= last.iregs[Ctx::REG_SP] {
        return None;
    }

    // The callee of the frame being unwound is the previous frame with a
    // register context; inline frames carry none and are skipped.
    let last_index = stack
        .frames()
        .iter()
        .rposition(|frame| std::ptr::eq(frame, last_frame))?;
    let callee = stack.frames()[..last_index]
        .iter()
        .rev()
        .find(|frame| frame.context.is_some())?;
    let callee_fp = match callee.context.as_ref()? {
        FrameContext::Arm64(context) => context.iregs[Ctx::REG_FP],
        _ => return None,
    };

    let chained_fp = if callee_fp != 0 {
        walker.memory.read_u64(callee_fp)?
    } else {
        0
    };

    // Give up unless the chain agrees with the frame pointer in hand.
    if last.iregs[Ctx::REG_FP] != chained_fp {
        return None;
    }

    let lr = if callee_fp != 0 {
        walker.memory.read_u64(callee_fp + 8)?
    } else {
        0
    };
    Some(ptrauth_strip(walker, lr))
}

fn caller_by_frame_pointer(
    walker: &Stackwalker<'_>,
    stack: &CallStack,
    last_frame: &StackFrame,
    last: &Arm64Context,
) -> Option<StackFrame> {
    let mut last_lr = last.iregs[Ctx::REG_LR];
    if last_frame.context_validity & Ctx::valid(Ctx::REG_LR) == 0 {
        if let Some(lr) = corrected_lr(walker, stack, last_frame, last) {
            last_lr = lr;
        }
    }

    let last_fp = last.iregs[Ctx::REG_FP];

    let caller_fp = if last_fp != 0 {
        match walker.memory.read_u64(last_fp) {
            Some(value) => value,
            None => {
                trace!("unable to read caller fp from {:#x}", last_fp);
                return None;
            }
        }
    } else {
        0
    };

    let caller_lr = if last_fp != 0 {
        match walker.memory.read_u64(last_fp + 8) {
            Some(value) => ptrauth_strip(walker, value),
            None => {
                trace!("unable to read caller lr from {:#x}", last_fp + 8);
                return None;
            }
        }
    } else {
        0
    };

    let caller_sp = if last_fp != 0 {
        last_fp + 16
    } else {
        last.iregs[Ctx::REG_SP]
    };

    let mut context = last.clone();
    context.iregs[Ctx::REG_FP] = caller_fp;
    context.iregs[Ctx::REG_SP] = caller_sp;
    context.iregs[Ctx::REG_PC] = last_lr;
    context.iregs[Ctx::REG_LR] = caller_lr;

    let mut frame = StackFrame::with_context(FrameContext::Arm64(context), FrameTrust::FramePointer);
    frame.context_validity = Ctx::valid(Ctx::REG_PC)
        | Ctx::valid(Ctx::REG_LR)
        | Ctx::valid(Ctx::REG_FP)
        | Ctx::valid(Ctx::REG_SP);
    Some(frame)
}

fn caller_by_stack_scan(
    walker: &Stackwalker<'_>,
    last: &Arm64Context,
) -> Option<StackFrame> {
    let last_sp = last.iregs[Ctx::REG_SP];
    let (slot, caller_pc) = walker.scan_for_return_address(last_sp, 8)?;
    let caller_sp = slot + 8;

    let mut context = last.clone();
    context.iregs[Ctx::REG_PC] = caller_pc;
    context.iregs[Ctx::REG_SP] = caller_sp;

    let mut frame = StackFrame::with_context(FrameContext::Arm64(context), FrameTrust::Scan);
    frame.context_validity = Ctx::valid(Ctx::REG_PC) | Ctx::valid(Ctx::REG_SP);
    Some(frame)
}

pub(super) fn get_caller_frame(
    walker: &Stackwalker<'_>,
    stack: &CallStack,
    stack_scan_allowed: bool,
) -> Option<StackFrame> {
    let (last_frame, last) = last_context(stack)?;

    let mut frame = caller_by_cfi(walker, last_frame, last);
    if frame.is_none() {
        frame = caller_by_frame_pointer(walker, stack, last_frame, last);
    }
    if frame.is_none() && stack_scan_allowed {
        frame = caller_by_stack_scan(walker, last);
    }

    let mut frame = frame?;
    let context = match frame.context.as_ref()? {
        FrameContext::Arm64(context) => context,
        _ => return None,
    };

    if terminate_walk(
        context.iregs[Ctx::REG_PC],
        context.iregs[Ctx::REG_SP],
        last.iregs[Ctx::REG_SP],
        last_frame.trust == FrameTrust::Context,
    ) {
        return None;
    }

    // With scanning disallowed, a recovered address outside every known
    // module cannot be validated; end the walk rather than produce a
    // phantom frame.
    if !stack_scan_allowed && !walker.instruction_address_seems_valid(context.iregs[Ctx::REG_PC]) {
        return None;
    }

    // The program counter is the return address, one instruction past the
    // call. Instructions are uniformly four bytes, so step back to the call
    // itself so that source lines match up.
    frame.instruction = context.iregs[Ctx::REG_PC] - 4;
    Some(frame)
}
