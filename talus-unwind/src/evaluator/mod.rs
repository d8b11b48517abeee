//! Evaluation of postfix expression programs.
//!
//! Call frame information and Windows frame data record unwind programs as
//! postfix expressions:
//!
//! ```text
//! <expr>     ::=  <constant> | <variable> | <literal> | <expr> <expr> <binop> | <expr> ^
//! <constant> ::=  [a-zA-Z_.][a-zA-Z0-9_.]*
//! <variable> ::=  $[a-zA-Z][a-zA-Z0-9]*
//! <binop>    ::=  + | - | * | / | % | @
//! <literal>  ::=  -?[0-9]+
//! ```
//!
//! `^` dereferences the top of the stack through the program's memory
//! region; `@` truncates its first operand to a multiple of its second.
//! Literals are decimal. Constants and variables are looked up in
//! dictionaries seeded by the caller; referencing an undefined name makes
//! the expression's value undefined.
//!
//! In addition to expressions there are *assignments*:
//!
//! ```text
//! <assignment> ::=  <variable> <expr> =
//! ```
//!
//! An assignment updates the variable's value in the dictionary, or inserts
//! it if it was not defined before.

pub mod parsing;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use parsing::ExprParsingError;

use crate::base::RegisterValue;
use crate::memory::MemoryRegion;

/// Evaluates expressions over dictionaries of constants and variables, and
/// an optional region of memory for dereference operations.
pub struct Evaluator<'m, A> {
    /// Memory for dereference operations; without it, `^` fails.
    memory: Option<&'m dyn MemoryRegion>,

    /// Values of constants. Using an undefined constant fails evaluation.
    constants: BTreeMap<Constant, A>,

    /// Values of variables. Modified by [`assign`](Self::assign) and
    /// [`process`](Self::process).
    variables: BTreeMap<Variable, A>,
}

impl<'m, A> Evaluator<'m, A> {
    /// Creates an evaluator with no memory and empty dictionaries.
    pub fn new() -> Self {
        Self {
            memory: None,
            constants: BTreeMap::new(),
            variables: BTreeMap::new(),
        }
    }

    /// Sets the evaluator's memory region.
    pub fn memory(mut self, memory: &'m dyn MemoryRegion) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Sets the evaluator's constant dictionary.
    pub fn constants(mut self, constants: BTreeMap<Constant, A>) -> Self {
        self.constants = constants;
        self
    }

    /// Sets the evaluator's variable dictionary.
    pub fn variables(mut self, variables: BTreeMap<Variable, A>) -> Self {
        self.variables = variables;
        self
    }

    /// Defines a single constant.
    pub fn constant(&mut self, constant: Constant, value: A) {
        self.constants.insert(constant, value);
    }

    /// Returns the value of a variable, if defined.
    pub fn variable(&self, variable: &Variable) -> Option<&A> {
        self.variables.get(variable)
    }

    /// Consumes the evaluator, returning its variable dictionary.
    pub fn into_variables(self) -> BTreeMap<Variable, A> {
        self.variables
    }
}

impl<'m, A> Default for Evaluator<'m, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'m, A: RegisterValue> Evaluator<'m, A> {
    /// Evaluates a single expression.
    ///
    /// This fails if the expression dereferences unavailable memory, divides
    /// by zero, or uses undefined constants or variables.
    pub fn evaluate(&self, expr: &Expr<A>) -> Result<A, EvaluationError> {
        match expr {
            Expr::Value(x) => Ok(*x),
            Expr::Const(c) => self
                .constants
                .get(c)
                .copied()
                .ok_or_else(|| EvaluationError::UndefinedConstant(c.clone())),
            Expr::Var(v) => self
                .variables
                .get(v)
                .copied()
                .ok_or_else(|| EvaluationError::UndefinedVariable(v.clone())),
            Expr::Op(e1, e2, op) => {
                let e1 = self.evaluate(e1)?;
                let e2 = self.evaluate(e2)?;
                match op {
                    BinOp::Add => Ok(e1.add(e2)),
                    BinOp::Sub => Ok(e1.sub(e2)),
                    BinOp::Mul => Ok(e1.mul(e2)),
                    BinOp::Div => e1.div(e2).ok_or(EvaluationError::DivisionByZero),
                    BinOp::Mod => e1.rem(e2).ok_or(EvaluationError::DivisionByZero),
                    BinOp::Align => e1
                        .div(e2)
                        .map(|d| d.mul(e2))
                        .ok_or(EvaluationError::DivisionByZero),
                }
            }
            Expr::Deref(address) => {
                let address = self.evaluate(address)?.into_u64();
                let memory = self.memory.ok_or(EvaluationError::MemoryUnavailable)?;
                A::read_from(memory, address)
                    .ok_or(EvaluationError::IllegalMemoryAccess { address })
            }
        }
    }

    /// Performs an assignment by evaluating its right-hand side and updating
    /// the variable dictionary accordingly.
    ///
    /// Returns `true` iff the assignment modified an existing variable.
    pub fn assign(&mut self, Assignment(v, e): &Assignment<A>) -> Result<bool, EvaluationError> {
        let value = self.evaluate(e)?;
        Ok(self.variables.insert(v.clone(), value).is_some())
    }
}

impl<'m, A: RegisterValue> Evaluator<'m, A> {
    /// Processes a string of assignments, modifying the variable dictionary
    /// accordingly.
    ///
    /// Returns the set of variables that were assigned a value, even if the
    /// value did not change.
    pub fn process(&mut self, input: &str) -> Result<BTreeSet<Variable>, ExpressionError> {
        let mut changed_variables = BTreeSet::new();
        let assignments = parsing::parse_assignments::<A>(input)?;
        for assignment in assignments {
            self.assign(&assignment)?;
            changed_variables.insert(assignment.0);
        }

        Ok(changed_variables)
    }
}

/// An error encountered while evaluating an expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvaluationError {
    /// The expression contains an undefined constant.
    UndefinedConstant(Constant),

    /// The expression contains an undefined variable.
    UndefinedVariable(Variable),

    /// The expression divides by zero.
    DivisionByZero,

    /// The expression dereferences memory, but none is available.
    MemoryUnavailable,

    /// The dereferenced address lies outside the available memory.
    IllegalMemoryAccess {
        /// The address at which the read was attempted.
        address: u64,
    },
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedConstant(c) => write!(f, "constant {} is not defined", c),
            Self::UndefinedVariable(v) => write!(f, "variable {} is not defined", v),
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::MemoryUnavailable => write!(f, "the evaluator has no access to memory"),
            Self::IllegalMemoryAccess { address } => {
                write!(f, "failed to read memory at address {:#x}", address)
            }
        }
    }
}

impl std::error::Error for EvaluationError {}

/// An error encountered while parsing or evaluating an expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpressionError {
    /// An error was encountered while parsing an expression.
    Parsing(ExprParsingError),

    /// An error was encountered while evaluating an expression.
    Evaluation(EvaluationError),
}

impl From<ExprParsingError> for ExpressionError {
    fn from(other: ExprParsingError) -> Self {
        Self::Parsing(other)
    }
}

impl From<EvaluationError> for ExpressionError {
    fn from(other: EvaluationError) -> Self {
        Self::Evaluation(other)
    }
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parsing(e) => write!(f, "error while parsing: {}", e),
            Self::Evaluation(e) => write!(f, "error while evaluating: {}", e),
        }
    }
}

impl std::error::Error for ExpressionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parsing(e) => Some(e),
            Self::Evaluation(e) => Some(e),
        }
    }
}

/// A variable, named with a `$` prefix.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(pub(crate) String);

impl Variable {
    /// The name of the variable, including the `$` prefix.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Variable {
    type Err = ExprParsingError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        parsing::parse_variable(input)
    }
}

/// A constant value, such as `.cfa` or a plain register name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Constant(pub(crate) String);

impl Constant {
    /// The name of the constant.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Constant {
    type Err = ExprParsingError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        parsing::parse_constant(input)
    }
}

/// A binary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Remainder.
    Mod,
    /// Alignment: truncates the first operand to a multiple of the second.
    Align,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "+"),
            Self::Sub => write!(f, "-"),
            Self::Mul => write!(f, "*"),
            Self::Div => write!(f, "/"),
            Self::Mod => write!(f, "%"),
            Self::Align => write!(f, "@"),
        }
    }
}

/// A parsed postfix expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr<T> {
    /// A literal value.
    Value(T),
    /// A named constant.
    Const(Constant),
    /// A variable.
    Var(Variable),
    /// An application of a [binary operator](BinOp).
    Op(Box<Expr<T>>, Box<Expr<T>>, BinOp),
    /// A dereferenced subexpression.
    Deref(Box<Expr<T>>),
}

impl<T: fmt::Display> fmt::Display for Expr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(n) => write!(f, "{}", n),
            Self::Const(c) => write!(f, "{}", c),
            Self::Var(v) => write!(f, "{}", v),
            Self::Op(x, y, op) => write!(f, "{} {} {}", x, y, op),
            Self::Deref(x) => write!(f, "{} ^", x),
        }
    }
}

impl<T: RegisterValue> FromStr for Expr<T> {
    type Err = ExprParsingError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        parsing::parse_expression(input)
    }
}

/// An assignment `v e =` of an [expression](Expr) to a [variable](Variable).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment<T>(pub(crate) Variable, pub(crate) Expr<T>);

impl<T: fmt::Display> fmt::Display for Assignment<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} =", self.0, self.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySlice;

    #[test]
    fn test_assignment() {
        let input = "$rAdd3 2 2 + = $rMul2 9 6 * =";

        let mut eval = Evaluator::<u64>::new();
        let r_add3: Variable = "$rAdd3".parse().unwrap();
        let r_mul2: Variable = "$rMul2".parse().unwrap();

        let changed = eval.process(input).unwrap();
        assert_eq!(
            changed,
            vec![r_add3.clone(), r_mul2.clone()].into_iter().collect()
        );

        assert_eq!(eval.variable(&r_add3), Some(&4));
        assert_eq!(eval.variable(&r_mul2), Some(&54));
    }

    #[test]
    fn test_deref() {
        let input = "$rDeref 9 ^ =";

        let contents = 10u64.to_le_bytes();
        let memory = MemorySlice::new(9, &contents);
        let mut eval = Evaluator::<u64>::new().memory(&memory);

        let r_deref: Variable = "$rDeref".parse().unwrap();
        eval.process(input).unwrap();

        assert_eq!(eval.variable(&r_deref), Some(&10));
    }

    #[test]
    fn test_constants_and_align() {
        let mut constants = BTreeMap::new();
        constants.insert(".cfa".parse::<Constant>().unwrap(), 0x1001fu64);

        let mut eval = Evaluator::<u64>::new().constants(constants);
        eval.process("$aligned .cfa 16 @ =").unwrap();

        let aligned: Variable = "$aligned".parse().unwrap();
        assert_eq!(eval.variable(&aligned), Some(&0x10010));
    }

    #[test]
    fn test_negative_literal() {
        let mut eval = Evaluator::<u64>::new();
        eval.process("$r 0 -4 + =").unwrap();

        let r: Variable = "$r".parse().unwrap();
        assert_eq!(eval.variable(&r), Some(&(-4i64 as u64)));
    }

    #[test]
    fn test_undefined_constant() {
        let eval = Evaluator::<u64>::new();
        let expr: Expr<u64> = "frobnicate 2 +".parse().unwrap();
        assert!(matches!(
            eval.evaluate(&expr),
            Err(EvaluationError::UndefinedConstant(_))
        ));
    }
}
