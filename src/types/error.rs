use thiserror::Error;

use crate::parse::ParseError;

use super::Type;

/// Reasons a rule definition is rejected by the compiler.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("undeclared reference to '{name}'")]
    UndeclaredReference { name: String },

    #[error("'{name}' cannot be used as a value; select one of its fields")]
    BareVariable { name: String },

    #[error("undefined field '{field}' on type {receiver}")]
    UndefinedField { field: String, receiver: Type },

    #[error("undeclared function '{name}'")]
    UnknownFunction { name: String },

    #[error("function '{function}' takes {expected} argument(s), got {actual}")]
    WrongArity {
        function: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("found no matching overload for '{operator}' applied to ({})", join_types(.operands))]
    NoMatchingOverload {
        operator: String,
        operands: Vec<Type>,
    },

    #[error("conditional branches have incompatible types {then} and {otherwise}")]
    IncompatibleBranches { then: Type, otherwise: Type },

    #[error("got {actual}, but want bool type")]
    NotBoolean { actual: Type },
}

fn join_types(types: &[Type]) -> String {
    types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl CompileError {
    pub(crate) fn overload(operator: impl ToString, operands: &[&Type]) -> Self {
        CompileError::NoMatchingOverload {
            operator: operator.to_string(),
            operands: operands.iter().map(|t| (*t).clone()).collect(),
        }
    }
}

/// Failures while evaluating a compiled program against a transaction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("no such key: {key}")]
    NoSuchKey { key: String },

    #[error("index {index} out of range for list of size {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in '{operator}'")]
    Overflow { operator: String },

    #[error("no matching overload for '{operator}' applied to ({operands})")]
    NoMatchingOverload { operator: String, operands: String },

    #[error("cannot convert {value} to {target}")]
    InvalidConversion { value: String, target: &'static str },

    #[error("program produced {actual}, but want bool")]
    NotBoolean { actual: &'static str },
}
