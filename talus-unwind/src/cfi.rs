//! Call frame information and Windows stack frame data.

use std::collections::BTreeMap;

use log::debug;

use crate::base::RegisterValue;
use crate::evaluator::{Constant, Evaluator, Expr, Variable};
use crate::memory::MemoryRegion;

/// A map from register names to recovered values.
///
/// Keys are the names used by the unwind rules: `$`-prefixed on x86-style
/// architectures (`$ebp`), plain elsewhere (`x29`, `sp`), plus the two
/// pseudo-registers `.cfa` and `.ra`.
pub type RegisterMap<A> = BTreeMap<String, A>;

/// Call frame information for one instruction address.
///
/// A rule set consists of the rules in force at the start of the covered
/// range followed by the updates whose address is at or before the address
/// being unwound. Each rule string is a sequence of `REG: EXPR` pairs; a
/// register mentioned in a later rule overrides earlier mentions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CfiFrameInfo {
    rule_sets: Vec<String>,
}

impl CfiFrameInfo {
    /// Creates frame info from the initial rules and the applicable deltas,
    /// in address order.
    pub fn new(rule_sets: Vec<String>) -> Self {
        CfiFrameInfo { rule_sets }
    }

    /// Recovers the caller's registers from the callee's.
    ///
    /// `callee` maps register names to their values in the callee frame.
    /// The rules must produce both `.cfa` and `.ra`, otherwise the frame is
    /// rejected and `None` is returned. The returned map contains `.cfa`,
    /// `.ra`, and every register the rules recovered.
    pub fn find_caller_regs<A: RegisterValue>(
        &self,
        callee: &RegisterMap<A>,
        memory: &dyn MemoryRegion,
    ) -> Option<RegisterMap<A>> {
        // Gather `REG: EXPR` pairs, later rules overriding earlier ones.
        let mut rules: Vec<(String, String)> = Vec::new();
        for rule_set in &self.rule_sets {
            for (register, expr) in parse_rules(rule_set)? {
                match rules.iter_mut().find(|(name, _)| *name == register) {
                    Some(entry) => entry.1 = expr,
                    None => rules.push((register, expr)),
                }
            }
        }

        let cfa_expr = take_rule(&mut rules, ".cfa")?;
        let ra_expr = take_rule(&mut rules, ".ra")?;

        // Seed the dictionaries with the callee's registers: `$`-prefixed
        // names become variables, everything else constants.
        let mut constants = BTreeMap::new();
        let mut variables = BTreeMap::new();
        for (name, value) in callee {
            if name.starts_with('$') {
                variables.insert(Variable(name.clone()), *value);
            } else {
                constants.insert(Constant(name.clone()), *value);
            }
        }

        let mut evaluator = Evaluator::new()
            .memory(memory)
            .constants(constants)
            .variables(variables);

        // The CFA is computed first; every other rule may refer to it.
        let cfa = eval_rule(&evaluator, &cfa_expr)?;
        evaluator.constant(Constant(".cfa".to_string()), cfa);

        let ra = eval_rule(&evaluator, &ra_expr)?;

        let mut caller = RegisterMap::new();
        caller.insert(".cfa".to_string(), cfa);
        caller.insert(".ra".to_string(), ra);

        for (register, expr) in rules {
            // Losing a general purpose register is fine; skip rules that do
            // not evaluate.
            if let Some(value) = eval_rule(&evaluator, &expr) {
                caller.insert(register, value);
            }
        }

        Some(caller)
    }
}

/// Splits a rule string into `(register, expression)` pairs.
///
/// Returns `None` if the string contains a malformed register token.
fn parse_rules(input: &str) -> Option<Vec<(String, String)>> {
    let mut rules = Vec::new();
    let mut register: Option<&str> = None;
    let mut expr = String::new();

    for token in input.split_ascii_whitespace() {
        if let Some(name) = token.strip_suffix(':') {
            if let Some(register) = register.take() {
                rules.push((register.to_string(), std::mem::take(&mut expr)));
            }

            if name.is_empty() {
                debug!("malformed register in unwind rule: {}", token);
                return None;
            }
            register = Some(name);
        } else {
            if register.is_none() {
                debug!("unwind rule does not start with a register: {}", input);
                return None;
            }
            if !expr.is_empty() {
                expr.push(' ');
            }
            expr.push_str(token);
        }
    }

    if let Some(register) = register {
        rules.push((register.to_string(), expr));
    }

    Some(rules)
}

fn take_rule(rules: &mut Vec<(String, String)>, name: &str) -> Option<String> {
    let index = rules.iter().position(|(register, _)| register == name)?;
    Some(rules.remove(index).1)
}

fn eval_rule<A: RegisterValue>(evaluator: &Evaluator<'_, A>, expr: &str) -> Option<A> {
    // ".undef" marks a register as explicitly unrecoverable.
    if expr == ".undef" {
        return None;
    }

    let parsed: Expr<A> = match expr.parse() {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!("failed to parse unwind rule expression: {}", err);
            return None;
        }
    };

    match evaluator.evaluate(&parsed) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!("failed to evaluate unwind rule expression: {}", err);
            None
        }
    }
}

/// The kind of data a [`WindowsFrameInfo`] holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowsFrameInfoType {
    /// Frame pointer omitted; FPO info available.
    Fpo,
    /// Frame pointer omitted; frame data info available.
    FrameData,
    /// Derived from a FUNC record rather than a stack record.
    Unknown,
}

/// Windows stack frame information for one x86 code range.
///
/// `FrameData` records carry a postfix program that recovers the caller's
/// registers; it is evaluated exactly like call frame information. `Fpo`
/// records describe the frame layout numerically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowsFrameInfo {
    /// The type of frame data.
    pub ty: WindowsFrameInfoType,
    /// The size of the function prologue in bytes.
    pub prolog_size: u32,
    /// The size of the function epilogue in bytes.
    pub epilog_size: u32,
    /// The number of argument bytes the function expects.
    pub parameter_size: u32,
    /// The number of bytes used for callee-saves registers.
    pub saved_register_size: u32,
    /// The number of bytes used for local variables.
    pub local_size: u32,
    /// The maximum number of bytes pushed onto the stack.
    pub max_stack_size: u32,
    /// Whether the base pointer is allocated as a general purpose register.
    pub allocates_base_pointer: bool,
    /// The program recovering the caller's registers, if present.
    pub program_string: Option<String>,
}

impl WindowsFrameInfo {
    /// Recovers the caller's registers from the callee's.
    ///
    /// `grand_callee_parameter_size` is the parameter size of the frame
    /// below the callee, whose arguments the callee popped into its own
    /// frame.
    ///
    /// The program must produce `$eip` and `$esp`; the result additionally
    /// maps `.ra` and `.cfa` to them so that callers can treat this
    /// uniformly with [`CfiFrameInfo`].
    pub fn find_caller_regs(
        &self,
        callee: &RegisterMap<u32>,
        memory: &dyn MemoryRegion,
        grand_callee_parameter_size: u32,
    ) -> Option<RegisterMap<u32>> {
        let esp = *callee.get("$esp")?;

        // The stack pointer as set up by the prologue: locals and saved
        // registers sit between it and the return address.
        let frame_size = self
            .local_size
            .wrapping_add(self.saved_register_size)
            .wrapping_add(grand_callee_parameter_size);
        let ra_search_start = esp.wrapping_add(frame_size);

        let program = match self.program_string.as_deref() {
            Some(program) => program.to_string(),
            None => self.synthesize_fpo_program(),
        };

        let mut variables = BTreeMap::new();
        for (name, value) in callee {
            if name.starts_with('$') {
                variables.insert(Variable(name.clone()), *value);
            }
        }

        let mut evaluator = Evaluator::<u32>::new().memory(memory).variables(variables);
        evaluator.constant(Constant(".cbParams".to_string()), self.parameter_size);
        evaluator.constant(Constant(".cbSavedRegs".to_string()), self.saved_register_size);
        evaluator.constant(Constant(".cbLocals".to_string()), self.local_size);
        evaluator.constant(Constant(".raSearch".to_string()), ra_search_start);
        evaluator.constant(Constant(".raSearchStart".to_string()), ra_search_start);

        if evaluator.process(&program).is_err() {
            debug!("failed to evaluate windows frame program: {}", program);
            return None;
        }

        let mut caller = RegisterMap::new();
        for register in ["$eip", "$esp", "$ebp", "$ebx", "$esi", "$edi"] {
            if let Some(value) = evaluator.variable(&Variable(register.to_string())) {
                caller.insert(register.to_string(), *value);
            }
        }

        let eip = *caller.get("$eip")?;
        let esp = *caller.get("$esp")?;
        caller.insert(".ra".to_string(), eip);
        caller.insert(".cfa".to_string(), esp);

        Some(caller)
    }

    /// Builds the unwind program for FPO frames, which carry no program
    /// string.
    ///
    /// The layout below the return address follows the prologue's push
    /// order: the saved base pointer sits directly below it, then edi, esi,
    /// and ebx when the base pointer was allocated as a scratch register.
    fn synthesize_fpo_program(&self) -> String {
        if self.allocates_base_pointer {
            "$T0 .raSearchStart = \
             $eip $T0 ^ = \
             $esp $T0 4 + = \
             $ebp $T0 4 - ^ = \
             $edi $T0 8 - ^ = \
             $esi $T0 12 - ^ = \
             $ebx $T0 16 - ^ ="
                .to_string()
        } else {
            "$T0 .raSearchStart = \
             $eip $T0 ^ = \
             $esp $T0 4 + ="
                .to_string()
        }
    }
}
