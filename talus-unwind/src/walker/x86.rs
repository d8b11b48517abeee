//! x86 stack unwinding.
//!
//! x86 additionally consults Windows stack frame data, which describes
//! frames built by MSVC with frame pointer omission. Its postfix programs
//! are evaluated exactly like call frame information.

use log::trace;

use super::{terminate_walk, Stackwalker};
use crate::cfi::RegisterMap;
use crate::frame::{CallStack, FrameContext, FrameTrust, StackFrame, X86Context};

use crate::frame::X86Context as Ctx;

const REGISTERS: [(&str, u64); 6] = [
    ("$eip", Ctx::VALID_EIP),
    ("$esp", Ctx::VALID_ESP),
    ("$ebp", Ctx::VALID_EBP),
    ("$ebx", Ctx::VALID_EBX),
    ("$esi", Ctx::VALID_ESI),
    ("$edi", Ctx::VALID_EDI),
];

const CALLEE_SAVES: u64 = Ctx::VALID_EBP | Ctx::VALID_EBX | Ctx::VALID_ESI | Ctx::VALID_EDI;

fn get(context: &X86Context, bit: u64) -> u32 {
    match bit {
        Ctx::VALID_EIP => context.eip,
        Ctx::VALID_ESP => context.esp,
        Ctx::VALID_EBP => context.ebp,
        Ctx::VALID_EBX => context.ebx,
        Ctx::VALID_ESI => context.esi,
        _ => context.edi,
    }
}

fn set(context: &mut X86Context, bit: u64, value: u32) {
    match bit {
        Ctx::VALID_EIP => context.eip = value,
        Ctx::VALID_ESP => context.esp = value,
        Ctx::VALID_EBP => context.ebp = value,
        Ctx::VALID_EBX => context.ebx = value,
        Ctx::VALID_ESI => context.esi = value,
        _ => context.edi = value,
    }
}

pub(super) fn context_frame(context: X86Context) -> StackFrame {
    let instruction = context.eip as u64;
    let mut frame = StackFrame::with_context(FrameContext::X86(context), FrameTrust::Context);
    frame.context_validity = Ctx::VALID_ALL;
    frame.instruction = instruction;
    frame
}

fn last_context<'s>(stack: &'s CallStack) -> Option<(&'s StackFrame, &'s X86Context)> {
    let frame = stack.last_with_context()?;
    match frame.context.as_ref()? {
        FrameContext::X86(context) => Some((frame, context)),
        _ => None,
    }
}

fn callee_registers(last_frame: &StackFrame, last: &X86Context) -> RegisterMap<u32> {
    let mut callee = RegisterMap::new();
    for (name, bit) in REGISTERS {
        if last_frame.context_validity & bit != 0 {
            callee.insert(name.to_string(), get(last, bit));
        }
    }
    callee
}

fn frame_from_registers(
    caller_registers: &RegisterMap<u32>,
    last_frame: &StackFrame,
    last: &X86Context,
    trust: FrameTrust,
) -> Option<StackFrame> {
    let mut context = X86Context::default();
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

    if validity & Ctx::VALID_EIP == 0 {
        let ra = *caller_registers.get(".ra")?;
        context.eip = ra;
        validity |= Ctx::VALID_EIP;
    }
    if validity & Ctx::VALID_ESP == 0 {
        let cfa = *caller_registers.get(".cfa")?;
        context.esp = cfa;
        validity |= Ctx::VALID_ESP;
    }

    let mut frame = StackFrame::with_context(FrameContext::X86(context), trust);
    frame.context_validity = validity;
    Some(frame)
}

fn caller_by_windows_frame_info(
    walker: &Stackwalker<'_>,
    last_frame: &StackFrame,
    last: &X86Context,
) -> Option<StackFrame> {
    let info = walker.symbolizer.find_windows_frame_info(last_frame)?;
    let callee = callee_registers(last_frame, last);

    let caller_registers = info.find_caller_regs(&callee, walker.memory, 0)?;
    frame_from_registers(&caller_registers, last_frame, last, FrameTrust::Cfi)
}

fn caller_by_cfi(
    walker: &Stackwalker<'_>,
    last_frame: &StackFrame,
    last: &X86Context,
) -> Option<StackFrame> {
    let cfi = walker.symbolizer.find_cfi_frame_info(last_frame)?;
    let callee = callee_registers(last_frame, last);

    let caller_registers = cfi.find_caller_regs(&callee, walker.memory)?;
    frame_from_registers(&caller_registers, last_frame, last, FrameTrust::Cfi)
}

fn caller_by_frame_pointer(
    walker: &Stackwalker<'_>,
    last: &X86Context,
) -> Option<StackFrame> {
    let last_ebp = last.ebp as u64;
    if last_ebp == 0 {
        return None;
    }

    let caller_ebp = match walker.memory.read_u32(last_ebp) {
        Some(value) => value,
        None => {
            trace!("unable to read caller ebp from {:#x}", last_ebp);
            return None;
        }
    };
    let caller_eip = walker.memory.read_u32(last_ebp + 4)?;
    let caller_esp = (last_ebp + 8) as u32;

    let mut context = last.clone();
    context.ebp = caller_ebp;
    context.eip = caller_eip;
    context.esp = caller_esp;

    let mut frame = StackFrame::with_context(FrameContext::X86(context), FrameTrust::FramePointer);
    frame.context_validity = Ctx::VALID_EIP | Ctx::VALID_ESP | Ctx::VALID_EBP;
    Some(frame)
}

fn caller_by_stack_scan(walker: &Stackwalker<'_>, last: &X86Context) -> Option<StackFrame> {
    let (slot, caller_eip) = walker.scan_for_return_address(last.esp as u64, 4)?;

    let mut context = last.clone();
    context.eip = caller_eip as u32;
    context.esp = (slot + 4) as u32;

    let mut frame = StackFrame::with_context(FrameContext::X86(context), FrameTrust::Scan);
    frame.context_validity = Ctx::VALID_EIP | Ctx::VALID_ESP;
    Some(frame)
}

pub(super) fn get_caller_frame(
    walker: &Stackwalker<'_>,
    stack: &CallStack,
    stack_scan_allowed: bool,
) -> Option<StackFrame> {
    let (last_frame, last) = last_context(stack)?;

    let mut frame = caller_by_windows_frame_info(walker, last_frame, last);
    if frame.is_none() {
        frame = caller_by_cfi(walker, last_frame, last);
    }
    if frame.is_none() {
        frame = caller_by_frame_pointer(walker, last);
    }
    if frame.is_none() && stack_scan_allowed {
        frame = caller_by_stack_scan(walker, last);
    }

    let mut frame = frame?;
    let context = match frame.context.as_ref()? {
        FrameContext::X86(context) => context,
        _ => return None,
    };

    if terminate_walk(
        context.eip as u64,
        context.esp as u64,
        last.esp as u64,
        last_frame.trust == FrameTrust::Context,
    ) {
        return None;
    }

    // With scanning disallowed, a recovered address outside every known
    // module cannot be validated; end the walk rather than produce a
    // phantom frame.
    if !stack_scan_allowed && !walker.instruction_address_seems_valid(context.eip as u64) {
        return None;
    }

    // Step back one byte from the return address into the call instruction.
    frame.instruction = context.eip as u64 - 1;
    Some(frame)
}
