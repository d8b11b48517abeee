//! AMD64 stack unwinding.

use log::trace;

use super::{terminate_walk, Stackwalker};
use crate::cfi::RegisterMap;
use crate::frame::{Amd64Context, CallStack, FrameContext, FrameTrust, StackFrame};

use crate::frame::Amd64Context as Ctx;

/// Register names as used in unwind rules, paired with their validity bits.
const REGISTERS: [(&str, u64); 8] = [
    ("$rip", Ctx::VALID_RIP),
    ("$rsp", Ctx::VALID_RSP),
    ("$rbp", Ctx::VALID_RBP),
    ("$rbx", Ctx::VALID_RBX),
    ("$r12", Ctx::VALID_R12),
    ("$r13", Ctx::VALID_R13),
    ("$r14", Ctx::VALID_R14),
    ("$r15", Ctx::VALID_R15),
];

/// Registers the callee must preserve; used when the unwind rules are
/// silent about one that was valid in the callee.
const CALLEE_SAVES: u64 = Ctx::VALID_RBP
    | Ctx::VALID_RBX
    | Ctx::VALID_R12
    | Ctx::VALID_R13
    | Ctx::VALID_R14
    | Ctx::VALID_R15;

fn get(context: &Amd64Context, bit: u64) -> u64 {
    match bit {
        Ctx::VALID_RIP => context.rip,
        Ctx::VALID_RSP => context.rsp,
        Ctx::VALID_RBP => context.rbp,
        Ctx::VALID_RBX => context.rbx,
        Ctx::VALID_R12 => context.r12,
        Ctx::VALID_R13 => context.r13,
        Ctx::VALID_R14 => context.r14,
        _ => context.r15,
    }
}

fn set(context: &mut Amd64Context, bit: u64, value: u64) {
    match bit {
        Ctx::VALID_RIP => context.rip = value,
        Ctx::VALID_RSP => context.rsp = value,
        Ctx::VALID_RBP => context.rbp = value,
        Ctx::VALID_RBX => context.rbx = value,
        Ctx::VALID_R12 => context.r12 = value,
        Ctx::VALID_R13 => context.r13 = value,
        Ctx::VALID_R14 => context.r14 = value,
        _ => context.r15 = value,
    }
}

pub(super) fn context_frame(context: Amd64Context) -> StackFrame {
    let instruction = context.rip;
    let mut frame = StackFrame::with_context(FrameContext::Amd64(context), FrameTrust::Context);
    frame.context_validity = Ctx::VALID_ALL;
    frame.instruction = instruction;
    frame
}

fn last_context<'s>(stack: &'s CallStack) -> Option<(&'s StackFrame, &'s Amd64Context)> {
    let frame = stack.last_with_context()?;
    match frame.context.as_ref()? {
        FrameContext::Amd64(context) => Some((frame, context)),
        _ => None,
    }
}

fn caller_by_cfi(
    walker: &Stackwalker<'_>,
    last_frame: &StackFrame,
    last: &Amd64Context,
) -> Option<StackFrame> {
    let cfi = walker.symbolizer.find_cfi_frame_info(last_frame)?;

    let mut callee = RegisterMap::new();
    for (name, bit) in REGISTERS {
        if last_frame.context_validity & bit != 0 {
            callee.insert(name.to_string(), get(last, bit));
        }
    }

    let caller_registers = cfi.find_caller_regs(&callee, walker.memory)?;

    let mut context = Amd64Context::default();
    let mut validity = 0u64;
    for (name, bit) in REGISTERS {
        if let Some(&value) = caller_registers.get(name) {
            set(&mut context, bit, value);
            validity |= bit;
        } else if CALLEE_SAVES & bit != 0 && last_frame.context_validity & bit != 0 {
            set(&mut context, bit, get(last, bit));
            validity |= bit;
        }
    }

    if validity & Ctx::VALID_RIP == 0 {
        let ra = *caller_registers.get(".ra")?;
        context.rip = ra;
        validity |= Ctx::VALID_RIP;
    }
    if validity & Ctx::VALID_RSP == 0 {
        let cfa = *caller_registers.get(".cfa")?;
        context.rsp = cfa;
        validity |= Ctx::VALID_RSP;
    }

    let mut frame = StackFrame::with_context(FrameContext::Amd64(context), FrameTrust::Cfi);
    frame.context_validity = validity;
    Some(frame)
}

fn caller_by_frame_pointer(
    walker: &Stackwalker<'_>,
    last: &Amd64Context,
) -> Option<StackFrame> {
    let last_rbp = last.rbp;
    if last_rbp == 0 {
        return None;
    }

    let caller_rbp = match walker.memory.read_u64(last_rbp) {
        Some(value) => value,
        None => {
            trace!("unable to read caller rbp from {:#x}", last_rbp);
            return None;
        }
    };
    let caller_rip = walker.memory.read_u64(last_rbp + 8)?;
    let caller_rsp = last_rbp + 16;

    let mut context = last.clone();
    context.rbp = caller_rbp;
    context.rip = caller_rip;
    context.rsp = caller_rsp;

    let mut frame = StackFrame::with_context(FrameContext::Amd64(context), FrameTrust::FramePointer);
    frame.context_validity = Ctx::VALID_RIP | Ctx::VALID_RSP | Ctx::VALID_RBP;
    Some(frame)
}

fn caller_by_stack_scan(walker: &Stackwalker<'_>, last: &Amd64Context) -> Option<StackFrame> {
    let (slot, caller_rip) = walker.scan_for_return_address(last.rsp, 8)?;

    let mut context = last.clone();
    context.rip = caller_rip;
    context.rsp = slot + 8;

    let mut frame = StackFrame::with_context(FrameContext::Amd64(context), FrameTrust::Scan);
    frame.context_validity = Ctx::VALID_RIP | Ctx::VALID_RSP;
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
        frame = caller_by_frame_pointer(walker, last);
    }
    if frame.is_none() && stack_scan_allowed {
        frame = caller_by_stack_scan(walker, last);
    }

    let mut frame = frame?;
    let context = match frame.context.as_ref()? {
        FrameContext::Amd64(context) => context,
        _ => return None,
    };

    if terminate_walk(
        context.rip,
        context.rsp,
        last.rsp,
        last_frame.trust == FrameTrust::Context,
    ) {
        return None;
    }

    // With scanning disallowed, a recovered address outside every known
    // module cannot be validated; end the walk rather than produce a
    // phantom frame.
    if !stack_scan_allowed && !walker.instruction_address_seems_valid(context.rip) {
        return None;
    }

    // The return address points one past the call; variable length
    // instructions leave no exact call address, so step back one byte into
    // the call instruction.
    frame.instruction = context.rip - 1;
    Some(frame)
}
