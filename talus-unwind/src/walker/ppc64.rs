//! PPC64 stack unwinding.
//!
//! PPC64 has no hardware stack and no separate frame pointer; the ABI keeps
//! a chain of stack frames linked through `gpr[1]`. The called procedure
//! stores the caller's stack pointer at `0(r1)` and its return address at
//! `16(r1)`, so the chain doubles as the frame pointer walk of the cascade.

use super::{terminate_walk, Stackwalker};
use crate::cfi::RegisterMap;
use crate::frame::{CallStack, FrameContext, FrameTrust, Ppc64Context, StackFrame};

use crate::frame::Ppc64Context as Ctx;

pub(super) fn context_frame(context: Ppc64Context) -> StackFrame {
    let instruction = context.srr0;
    let mut frame = StackFrame::with_context(FrameContext::Ppc64(context), FrameTrust::Context);
    frame.context_validity = Ctx::VALID_ALL;
    frame.instruction = instruction;
    frame
}

fn last_context<'s>(stack: &'s CallStack) -> Option<(&'s StackFrame, &'s Ppc64Context)> {
    let frame = stack.last_with_context()?;
    match frame.context.as_ref()? {
        FrameContext::Ppc64(context) => Some((frame, context)),
        _ => None,
    }
}

fn caller_by_cfi(
    walker: &Stackwalker<'_>,
    last_frame: &StackFrame,
    last: &Ppc64Context,
) -> Option<StackFrame> {
    let cfi = walker.symbolizer.find_cfi_frame_info(last_frame)?;

    let mut callee = RegisterMap::new();
    if last_frame.context_validity & Ctx::VALID_SRR0 != 0 {
        callee.insert("srr0".to_string(), last.srr0);
    }
    for (index, value) in last.gpr.iter().enumerate() {
        if last_frame.context_validity & Ctx::valid_gpr(index) != 0 {
            callee.insert(format!("r{}", index), *value);
        }
    }

    let caller_registers = cfi.find_caller_regs(&callee, walker.memory)?;

    let mut context = last.clone();
    let mut validity = 0u64;
    for (index, value) in context.gpr.iter_mut().enumerate() {
        if let Some(&recovered) = caller_registers.get(format!("r{}", index).as_str()) {
            *value = recovered;
            validity |= Ctx::valid_gpr(index);
        }
    }

    context.srr0 = match caller_registers.get("srr0").or(caller_registers.get(".ra")) {
        Some(&value) => value,
        None => return None,
    };
    validity |= Ctx::VALID_SRR0;

    if validity & Ctx::valid_gpr(1) == 0 {
        let cfa = *caller_registers.get(".cfa")?;
        context.gpr[1] = cfa;
        validity |= Ctx::valid_gpr(1);
    }

    let mut frame = StackFrame::with_context(FrameContext::Ppc64(context), FrameTrust::Cfi);
    frame.context_validity = validity;
    Some(frame)
}

fn caller_by_stack_chain(
    walker: &Stackwalker<'_>,
    last: &Ppc64Context,
) -> Option<StackFrame> {
    // A caller frame must reside higher in memory than its callee frames.
    // Anything else is an error or the end of the stack.
    let last_sp = last.gpr[1];
    let stack_pointer = walker.memory.read_u64(last_sp)?;
    if stack_pointer <= last_sp {
        return None;
    }

    // Thread entry points have 0 or 1 stored as their return address; treat
    // those as the end of the stack rather than producing a phantom frame.
    let instruction = walker.memory.read_u64(stack_pointer + 16)?;
    if instruction <= 1 {
        return None;
    }

    let mut context = last.clone();
    context.srr0 = instruction;
    context.gpr[1] = stack_pointer;

    let mut frame = StackFrame::with_context(FrameContext::Ppc64(context), FrameTrust::FramePointer);
    frame.context_validity = Ctx::VALID_SRR0 | Ctx::valid_gpr(1);
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
        frame = caller_by_stack_chain(walker, last);
    }

    let mut frame = frame?;
    let context = match frame.context.as_ref()? {
        FrameContext::Ppc64(context) => context,
        _ => return None,
    };

    if terminate_walk(
        context.srr0,
        context.gpr[1],
        last.gpr[1],
        last_frame.trust == FrameTrust::Context,
    ) {
        return None;
    }

    // With scanning disallowed, a recovered address outside every known
    // module cannot be validated; end the walk rather than produce a
    // phantom frame.
    if !stack_scan_allowed && !walker.instruction_address_seems_valid(context.srr0) {
        return None;
    }

    // srr0 holds the return address, one instruction past the branch.
    // Instructions are eight bytes wide, so the branch is eight less.
    frame.instruction = context.srr0 - 8;
    Some(frame)
}
