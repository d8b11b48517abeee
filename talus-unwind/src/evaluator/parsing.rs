//! Parsing of postfix expression programs.
//!
//! The grammar is flat: a program is a whitespace separated stream of
//! literals, names, operators, and `=` marks, with all structure implied by
//! the stack discipline. Parsing therefore happens in two small steps:
//! `nom` recognizes individual [`Token`]s, and the token stream is replayed
//! against an expression stack, mirroring what the evaluator does with the
//! finished expressions at run time.

use std::error::Error;
use std::fmt;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{alpha1, alphanumeric0, alphanumeric1, char, digit1, multispace0};
use nom::combinator::{all_consuming, map, map_res, opt, recognize, value};
use nom::multi::many0;
use nom::sequence::{pair, preceded, terminated, tuple};
use nom::{Finish, IResult};

use super::{Assignment, BinOp, Constant, Expr, Variable};
use crate::base::RegisterValue;

/// An error encountered while parsing an expression program.
///
/// Each variant carries the part of the input at which parsing stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExprParsingError {
    /// The input contains a token the grammar does not know.
    UnrecognizedToken(String),

    /// An operator was applied without enough operands on the stack.
    NotEnoughOperands(String),

    /// An `=` was reached, but what precedes it is not a single variable
    /// followed by a single expression.
    MalformedAssignment(String),

    /// More than one expression remained where a single one was expected.
    TooManyExpressions(String),

    /// The input contains no expression.
    Empty,
}

impl fmt::Display for ExprParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnrecognizedToken(input) => {
                write!(f, "unrecognized token at {:?}", input)
            }
            Self::NotEnoughOperands(input) => {
                write!(f, "not enough operands on the stack in {:?}", input)
            }
            Self::MalformedAssignment(input) => {
                write!(f, "assignment does not take the form `$var <expr> =` in {:?}", input)
            }
            Self::TooManyExpressions(input) => {
                write!(f, "more than one expression in {:?}", input)
            }
            Self::Empty => write!(f, "the input contains no expression"),
        }
    }
}

impl Error for ExprParsingError {}

impl<'a> nom::error::ParseError<&'a str> for ExprParsingError {
    fn from_error_kind(input: &'a str, _kind: nom::error::ErrorKind) -> Self {
        ExprParsingError::UnrecognizedToken(input.to_string())
    }

    fn append(_input: &'a str, _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a, E> nom::error::FromExternalError<&'a str, E> for ExprParsingError {
    fn from_external_error(input: &'a str, _kind: nom::error::ErrorKind, _e: E) -> Self {
        ExprParsingError::UnrecognizedToken(input.to_string())
    }
}

type TokenResult<'a, T> = IResult<&'a str, T, ExprParsingError>;

/// One token of the postfix grammar.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Token<T> {
    /// A decimal literal, `-?[0-9]+`.
    Literal(T),
    /// A variable, `$[a-zA-Z][a-zA-Z0-9]*`.
    Var(Variable),
    /// A constant, `[a-zA-Z_.][a-zA-Z0-9_.]*`.
    Const(Constant),
    /// A binary operator.
    Op(BinOp),
    /// The dereference mark `^`.
    Deref,
    /// The assignment mark `=`.
    Assign,
}

fn variable(input: &str) -> TokenResult<'_, Variable> {
    let (rest, name) = recognize(tuple((char('$'), alpha1, alphanumeric0)))(input)?;
    Ok((rest, Variable(name.to_string())))
}

fn constant(input: &str) -> TokenResult<'_, Constant> {
    let (rest, name) = recognize(preceded(
        alt((alpha1, tag("_"), tag("."))),
        many0(alt((alphanumeric1, tag("_"), tag(".")))),
    ))(input)?;
    Ok((rest, Constant(name.to_string())))
}

fn literal<T: RegisterValue>(input: &str) -> TokenResult<'_, T> {
    map_res(recognize(pair(opt(char('-')), digit1)), |digits: &str| {
        digits.parse::<i64>().map(T::from_i64)
    })(input)
}

/// Recognizes a single token.
///
/// Literals go first so that a `-` followed by digits reads as a negative
/// number rather than as subtraction.
fn token<T: RegisterValue>(input: &str) -> TokenResult<'_, Token<T>> {
    alt((
        map(literal, Token::Literal),
        map(variable, Token::Var),
        map(constant, Token::Const),
        value(Token::Deref, tag("^")),
        value(Token::Assign, tag("=")),
        value(Token::Op(BinOp::Add), tag("+")),
        value(Token::Op(BinOp::Sub), tag("-")),
        value(Token::Op(BinOp::Mul), tag("*")),
        value(Token::Op(BinOp::Div), tag("/")),
        value(Token::Op(BinOp::Mod), tag("%")),
        value(Token::Op(BinOp::Align), tag("@")),
    ))(input)
}

fn tokenize<T: RegisterValue>(input: &str) -> Result<Vec<Token<T>>, ExprParsingError> {
    all_consuming(terminated(many0(preceded(multispace0, token)), multispace0))(input)
        .finish()
        .map(|(_, tokens)| tokens)
}

/// The expression stack the token stream is replayed against.
///
/// Operand tokens push expressions, operator tokens combine them, and the
/// `=` mark drains a completed assignment. The `=` mark demands that the
/// stack holds exactly a variable and one expression, which is what makes a
/// sequence of assignments self-delimiting.
struct TokenStack<T> {
    stack: Vec<Expr<T>>,
    assignments: Vec<Assignment<T>>,
}

impl<T: RegisterValue> TokenStack<T> {
    fn new() -> Self {
        TokenStack {
            stack: Vec::new(),
            assignments: Vec::new(),
        }
    }

    fn pop(&mut self, input: &str) -> Result<Expr<T>, ExprParsingError> {
        self.stack
            .pop()
            .ok_or_else(|| ExprParsingError::NotEnoughOperands(input.to_string()))
    }

    fn replay(&mut self, token: Token<T>, input: &str) -> Result<(), ExprParsingError> {
        match token {
            Token::Literal(value) => self.stack.push(Expr::Value(value)),
            Token::Var(variable) => self.stack.push(Expr::Var(variable)),
            Token::Const(constant) => self.stack.push(Expr::Const(constant)),
            Token::Deref => {
                let address = self.pop(input)?;
                self.stack.push(Expr::Deref(Box::new(address)));
            }
            Token::Op(op) => {
                let rhs = self.pop(input)?;
                let lhs = self.pop(input)?;
                self.stack.push(Expr::Op(Box::new(lhs), Box::new(rhs), op));
            }
            Token::Assign => {
                let expr = self.pop(input)?;
                let target = self.pop(input)?;
                let variable = match target {
                    Expr::Var(variable) => variable,
                    _ => return Err(ExprParsingError::MalformedAssignment(input.to_string())),
                };
                if !self.stack.is_empty() {
                    return Err(ExprParsingError::MalformedAssignment(input.to_string()));
                }
                self.assignments.push(Assignment(variable, expr));
            }
        }

        Ok(())
    }
}

fn replay_all<T: RegisterValue>(input: &str) -> Result<TokenStack<T>, ExprParsingError> {
    let mut machine = TokenStack::new();
    for token in tokenize::<T>(input)? {
        machine.replay(token, input)?;
    }
    Ok(machine)
}

/// Parses a program of [assignments](super::Assignment), e.g.
/// `$foo 4 ^ = $bar .cfa 8 - =`.
///
/// All tokens must be consumed by assignments; operands left on the stack
/// make the program malformed.
pub fn parse_assignments<T: RegisterValue>(
    input: &str,
) -> Result<Vec<Assignment<T>>, ExprParsingError> {
    let machine = replay_all::<T>(input)?;
    if !machine.stack.is_empty() {
        return Err(ExprParsingError::MalformedAssignment(input.to_string()));
    }
    Ok(machine.assignments)
}

/// Parses a single [expression](super::Expr) without assignments.
pub fn parse_expression<T: RegisterValue>(input: &str) -> Result<Expr<T>, ExprParsingError> {
    let mut machine = replay_all::<T>(input)?;
    if !machine.assignments.is_empty() || machine.stack.len() > 1 {
        return Err(ExprParsingError::TooManyExpressions(input.to_string()));
    }
    machine.stack.pop().ok_or(ExprParsingError::Empty)
}

/// Parses a [variable](super::Variable), failing on trailing input.
pub fn parse_variable(input: &str) -> Result<Variable, ExprParsingError> {
    all_consuming(variable)(input).finish().map(|(_, v)| v)
}

/// Parses a [constant](super::Constant), failing on trailing input.
pub fn parse_constant(input: &str) -> Result<Constant, ExprParsingError> {
    all_consuming(constant)(input).finish().map(|(_, c)| c)
}
